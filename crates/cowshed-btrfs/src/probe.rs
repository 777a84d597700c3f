//! Filesystem probes via statfs(2).

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Btrfs filesystem magic as reported in `statfs.f_type`.
pub const BTRFS_SUPER_MAGIC: u64 = 0x9123_683E;

/// Raw filesystem totals from statfs(2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsTotals {
    /// Total size of the filesystem in bytes.
    pub total_bytes: u64,
    /// Bytes available to unprivileged users.
    pub available_bytes: u64,
}

fn statfs(path: &Path) -> std::io::Result<libc::statfs> {
    let cpath = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
    let mut st: libc::statfs = unsafe { std::mem::zeroed() };
    // SAFETY: cpath is a valid NUL-terminated string and st is a zeroed
    // out-parameter of the correct type.
    let rc = unsafe { libc::statfs(cpath.as_ptr(), &mut st) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(st)
}

/// Returns true when `path` resides on a btrfs filesystem.
pub fn is_btrfs(path: &Path) -> bool {
    match statfs(path) {
        Ok(st) => st.f_type as u64 == BTRFS_SUPER_MAGIC,
        Err(_) => false,
    }
}

/// Returns the total and available byte counts of the filesystem holding
/// `path`.
pub fn fs_totals(path: &Path) -> std::io::Result<FsTotals> {
    let st = statfs(path)?;
    let bsize = st.f_bsize as u64;
    Ok(FsTotals {
        total_bytes: st.f_blocks as u64 * bsize,
        available_bytes: st.f_bavail as u64 * bsize,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fs_totals_of_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let totals = fs_totals(dir.path()).unwrap();
        assert!(totals.total_bytes > 0);
        assert!(totals.available_bytes <= totals.total_bytes);
    }

    #[test]
    fn test_fs_totals_of_missing_path() {
        assert!(fs_totals(Path::new("/definitely/not/here")).is_err());
    }

    #[test]
    fn test_is_btrfs_false_for_missing_path() {
        assert!(!is_btrfs(Path::new("/definitely/not/here")));
    }
}
