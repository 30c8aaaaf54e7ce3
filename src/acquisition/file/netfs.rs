// SPDX-License-Identifier: Apache-2.0

//! Network filesystem detection, used to pick polling over native watching
//! for files whose filesystem does not deliver change notifications.

use std::io;
use std::path::Path;

use tracing::{debug, warn};

#[cfg(target_os = "linux")]
const FS_MAGICS: &[(u64, &str, bool)] = &[
    (0x6969, "nfs", true),
    (0x517B, "smb", true),
    (0xFE53_4D42, "smb2", true),
    (0xFF53_4D42, "cifs", true),
    (0x00C3_6400, "ceph", true),
    (0x7375_7245, "coda", true),
    (0x5346_414F, "afs", true),
    (0x0102_1997, "9p", true),
    // glusterfs and sshfs mount through fuse and cannot be told apart here
    (0x6573_5546, "fuse", false),
    (0xEF53, "ext4", false),
    (0x5846_5342, "xfs", false),
    (0x9123_683E, "btrfs", false),
    (0x0102_1994, "tmpfs", false),
    (0x794C_7630, "overlayfs", false),
];

/// Filesystem type name of `path` and whether it is a network share.
#[cfg(target_os = "linux")]
pub fn network_fs(path: &Path) -> io::Result<(bool, &'static str)> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let mut stat: libc::statfs = unsafe { std::mem::zeroed() };
    let result = unsafe { libc::statfs(c_path.as_ptr(), &mut stat) };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }

    #[allow(clippy::unnecessary_cast)]
    let magic = (stat.f_type as u64) & 0xFFFF_FFFF;
    Ok(FS_MAGICS
        .iter()
        .find(|(m, _, _)| *m == magic)
        .map(|(_, name, network)| (*network, *name))
        .unwrap_or((false, "unknown")))
}

#[cfg(not(target_os = "linux"))]
pub fn network_fs(path: &Path) -> io::Result<(bool, &'static str)> {
    std::fs::metadata(path)?;
    Ok((false, "unknown"))
}

/// Decide between polling and native watching for `path`.
///
/// An explicit override wins. Otherwise files on a network share are polled
/// and everything else is watched.
pub fn should_poll(path: &Path, poll_override: Option<bool>) -> bool {
    if let Some(poll) = poll_override {
        return poll;
    }

    match network_fs(path) {
        Ok((true, fs_type)) => {
            warn!(
                path = ?path,
                fs_type,
                "Disabling inotify on file as it is on a network share. \
                 Set poll_without_inotify to true to silence this, or to false to enforce inotify"
            );
            true
        }
        Ok((false, fs_type)) => {
            debug!(path = ?path, fs_type, "File is not on a network share");
            false
        }
        Err(e) => {
            warn!(path = ?path, error = %e, "Could not get filesystem type");
            false
        }
    }
}
