//! Filesystem helpers: atomic writes and filename sanitisation.
//!
//! Every persistent file in the core is written with [`atomic_write`] so a
//! crash mid-write can never leave a torn file; the newest successfully
//! renamed version always wins.

use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Writes `bytes` to `path` atomically: temp file in the same directory,
/// fsync, rename over the target.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name: OsString = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let result = (|| {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Sanitises a domain name for use as a file-name component.
#[must_use]
pub fn filename_slug(domain: &str) -> String {
    domain.replace(['.', '/'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_creates_parents_and_replaces() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("file.json");

        atomic_write(&path, b"first").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"first");

        atomic_write(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");

        // No temp file left behind.
        assert!(!path.parent().unwrap().join("file.json.tmp").exists());
    }

    #[test]
    fn slug_replaces_separators() {
        assert_eq!(filename_slug("example.com"), "example_com");
        assert_eq!(filename_slug("a/b.c"), "a_b_c");
    }
}
