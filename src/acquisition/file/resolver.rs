// SPDX-License-Identifier: Apache-2.0

//! Expansion of configured patterns into concrete files.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, info, warn};

use crate::acquisition::file::error::{Error, Result};

/// Compiled exclude regular expressions. A path matching any of them is never
/// read.
#[derive(Debug, Clone, Default)]
pub struct ExcludeFilter {
    patterns: Vec<Regex>,
}

impl ExcludeFilter {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|source| Error::InvalidExclude {
                    pattern: p.as_ref().to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// First exclude pattern matching `path`, in configuration order.
    pub fn matching(&self, path: &Path) -> Option<&Regex> {
        let path = path.to_string_lossy();
        self.patterns.iter().find(|re| re.is_match(&path))
    }

    pub fn is_excluded(&self, path: &Path) -> bool {
        self.matching(path).is_some()
    }
}

/// How a resolved file was named in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Named exactly; no directory watch is needed for it.
    Exact,
    /// Matched by a glob; its directory is watched for future siblings.
    Glob,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFile {
    pub path: PathBuf,
    pub origin: Origin,
}

/// Whether `pattern` contains glob metacharacters.
pub fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Anchor a relative pattern at the current working directory, so that
/// matches and watch notifications carry absolute paths.
pub fn absolute_pattern(pattern: &str) -> String {
    if Path::new(pattern).is_absolute() {
        return pattern.to_string();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(pattern).to_string_lossy().into_owned(),
        Err(_) => pattern.to_string(),
    }
}

/// Expands patterns into files, dropping excluded ones.
pub struct PathResolver<'a> {
    patterns: &'a [String],
    exclude: &'a ExcludeFilter,
}

impl<'a> PathResolver<'a> {
    pub fn new(patterns: &'a [String], exclude: &'a ExcludeFilter) -> Self {
        Self { patterns, exclude }
    }

    /// Resolve every pattern in order.
    ///
    /// With `strict`, a pattern matching nothing is an error; otherwise it is
    /// logged and the remaining patterns are still resolved. Paths reached
    /// through several patterns are kept once, under the first of them.
    pub fn resolve(&self, strict: bool) -> Result<Vec<ResolvedFile>> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();

        for pattern in self.patterns {
            let absolute = absolute_pattern(pattern);
            let matches = glob::glob(&absolute).map_err(|e| Error::InvalidGlob {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;

            let mut matched = 0usize;
            for entry in matches {
                let path = match entry {
                    Ok(path) => path,
                    Err(e) => {
                        warn!(pattern = %pattern, error = %e, "Skipping unreadable glob match");
                        continue;
                    }
                };
                matched += 1;

                if let Some(re) = self.exclude.matching(&path) {
                    info!(
                        path = ?path,
                        exclude = %re,
                        "Skipping file as it matches exclude pattern"
                    );
                    continue;
                }

                let canonical = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
                if !seen.insert(canonical) {
                    debug!(path = ?path, pattern = %pattern, "File already resolved by an earlier pattern");
                    continue;
                }

                let origin = if is_glob(pattern) {
                    Origin::Glob
                } else {
                    Origin::Exact
                };
                info!(path = ?path, "Adding file to datasources");
                files.push(ResolvedFile { path, origin });
            }

            if matched == 0 {
                if strict {
                    return Err(Error::NoMatchingFiles(pattern.clone()));
                }
                warn!(pattern = %pattern, "No matching files for pattern");
            }
        }

        Ok(files)
    }

    /// Directories to subscribe to for creation notifications.
    ///
    /// Covers the parent of every glob-matched file and the literal directory
    /// of every glob pattern that exists now, so that a pattern with no match
    /// at startup still catches its first file. With `force_watch`, the
    /// directory of every pattern is included, glob or not.
    pub fn watch_directories(&self, files: &[ResolvedFile], force_watch: bool) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        let mut dirs = Vec::new();
        let mut push = |dir: PathBuf| {
            if seen.insert(dir.clone()) {
                dirs.push(dir);
            }
        };

        for pattern in self.patterns {
            let absolute = absolute_pattern(pattern);
            let Some(dir) = Path::new(&absolute).parent() else {
                continue;
            };
            let dir_str = dir.to_string_lossy();
            if force_watch || (is_glob(pattern) && !is_glob(&dir_str) && dir.is_dir()) {
                push(dir.to_path_buf());
            }
        }

        for file in files.iter().filter(|f| f.origin == Origin::Glob) {
            if let Some(dir) = file.path.parent() {
                push(dir.to_path_buf());
            }
        }

        dirs
    }
}
