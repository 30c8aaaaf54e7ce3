// SPDX-License-Identifier: Apache-2.0

//! Parsing of the `file://<glob>[?log_level=..][&max_buffer_size=..]` source
//! descriptor used for one-shot reads from the command line.

use std::collections::BTreeMap;

use tracing::Level;

use crate::acquisition::file::config::parse_level;
use crate::acquisition::file::error::{Error, Result};

const SCHEME: &str = "file://";

/// A parsed `file://` descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDsn {
    pub pattern: String,
    pub log_level: Option<Level>,
    pub max_buffer_size: Option<usize>,
}

impl FileDsn {
    pub fn parse(dsn: &str) -> Result<Self> {
        let Some(rest) = dsn.strip_prefix(SCHEME) else {
            return Err(Error::DsnScheme(dsn.to_string()));
        };

        let (pattern, query) = match rest.split_once('?') {
            Some((pattern, query)) => (pattern, Some(query)),
            None => (rest, None),
        };
        if pattern.is_empty() {
            return Err(Error::DsnEmpty);
        }

        let mut parsed = FileDsn {
            pattern: pattern.to_string(),
            log_level: None,
            max_buffer_size: None,
        };

        let Some(query) = query.filter(|q| !q.is_empty()) else {
            return Ok(parsed);
        };

        let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            params
                .entry(key.into_owned())
                .or_default()
                .push(value.into_owned());
        }

        for (key, values) in params {
            match key.as_str() {
                "log_level" => {
                    let value = single_value(&key, &values)?;
                    let level = parse_level(value).map_err(|message| Error::DsnValue {
                        key: key.clone(),
                        value: value.to_string(),
                        message,
                    })?;
                    parsed.log_level = Some(level);
                }
                "max_buffer_size" => {
                    let value = single_value(&key, &values)?;
                    let size = value.parse::<usize>().map_err(|e| Error::DsnValue {
                        key: key.clone(),
                        value: value.to_string(),
                        message: e.to_string(),
                    })?;
                    parsed.max_buffer_size = Some(size);
                }
                _ => return Err(Error::DsnUnknownParameter(key.clone())),
            }
        }

        Ok(parsed)
    }
}

fn single_value<'a>(key: &str, values: &'a [String]) -> Result<&'a str> {
    match values {
        [value] => Ok(value.as_str()),
        _ => Err(Error::DsnArity(key.to_string())),
    }
}
