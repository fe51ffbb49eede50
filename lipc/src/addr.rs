//! Socket path validation and filesystem preparation.

use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::sys;

/// Longest socket path, in bytes, the platform accepts.
///
/// One byte of the address structure is reserved for the terminating NUL.
pub fn max_path_len() -> usize {
    sys::sun_path_capacity() - 1
}

/// Checks that `path` fits the platform's local-socket address.
///
/// Performs no I/O.
pub(crate) fn validate(path: &Path) -> Result<()> {
    let len = path.as_os_str().len();
    let max = max_path_len();
    if len > max {
        return Err(Error::PathTooLong {
            path: path.to_path_buf(),
            len,
            max,
        });
    }
    Ok(())
}

/// Creates the parent directories of `path` and removes a stale entry.
pub(crate) fn prepare(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| Error::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed stale socket entry"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        // bind() reports the real problem if the entry is still in the way.
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove stale socket entry"),
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn path_of_len(len: usize) -> PathBuf {
        PathBuf::from("x".repeat(len))
    }

    #[test]
    fn accepts_paths_up_to_the_limit() {
        validate(Path::new("/tmp/lipc.sock")).unwrap();
        validate(&path_of_len(max_path_len())).unwrap();
    }

    #[test]
    fn rejects_oversized_path() {
        let long = path_of_len(max_path_len() + 1);
        let err = validate(&long).unwrap_err();
        assert!(matches!(err, Error::PathTooLong { .. }));
        assert!(err.to_string().contains(&*long.to_string_lossy()));
    }

    #[test]
    fn prepare_creates_parents_and_clears_stale_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/srv.sock");

        prepare(&path).unwrap();
        assert!(path.parent().unwrap().is_dir());

        fs::write(&path, b"stale").unwrap();
        prepare(&path).unwrap();
        assert!(!path.exists());
    }
}
