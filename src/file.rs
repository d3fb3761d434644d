// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::{fs::File, io::Write, path::Path};

/// Magic bytes at the start of every segment file, followed by a codec
/// version byte and the `block_size` (§4.1).
pub const SEGMENT_MAGIC_BYTES: [u8; 4] = [b'F', b'P', b'I', 1];

/// Magic bytes at the start of `index.dat` (§4.1).
pub const INDEX_MAGIC_BYTES: [u8; 4] = [b'F', b'P', b'X', 1];

/// Name of the index file under the data directory.
pub const INDEX_FILE: &str = "index.dat";

/// Name of the data subdirectory holding segment files.
pub const DATA_FOLDER: &str = "data";

/// Name of the oplog subdirectory.
pub const OPLOG_FOLDER: &str = "oplog";

/// Atomically rewrites a file: write-to-temp, flush, fsync, rename, then
/// fsync the parent directory so the rename itself survives a crash.
pub fn rewrite_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    #[expect(
        clippy::expect_used,
        reason = "every file should have a parent directory"
    )]
    let folder = path.parent().expect("should have a parent");

    let mut temp_file = tempfile::NamedTempFile::new_in(folder)?;
    temp_file.write_all(content)?;
    temp_file.flush()?;
    temp_file.as_file_mut().sync_all()?;
    temp_file.persist(path)?;

    #[cfg(not(target_os = "windows"))]
    {
        let file = File::open(path)?;
        file.sync_all()?;
        fsync_directory(folder)?;
    }

    Ok(())
}

#[cfg(not(target_os = "windows"))]
pub fn fsync_directory(path: &Path) -> std::io::Result<()> {
    let file = File::open(path)?;
    debug_assert!(file.metadata()?.is_dir());
    file.sync_all()
}

#[cfg(target_os = "windows")]
pub fn fsync_directory(_path: &Path) -> std::io::Result<()> {
    // Cannot fsync a directory handle on Windows.
    Ok(())
}

/// Formats a segment file name from its id, using the
/// `segment_<version>_<merges>.dat` naming (zero-padded to keep directory
/// listings sorted).
#[must_use]
pub fn segment_file_name(version: u64, included_merges: u64) -> String {
    format!("segment_{version:020}_{included_merges:020}.dat")
}

/// Formats an oplog file name from a starting commit id.
#[must_use]
pub fn oplog_file_name(commit_id: u64) -> String {
    format!("{commit_id:020}.xlog")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use test_log::test;

    #[test]
    fn atomic_rewrite() -> crate::Result<()> {
        let dir = tempfile::tempdir()?;

        let path = dir.path().join("test.txt");
        {
            let mut file = File::create(&path)?;
            write!(file, "asdasdasdasdasd")?;
        }

        rewrite_atomic(&path, b"newcontent")?;

        let content = std::fs::read_to_string(&path)?;
        assert_eq!("newcontent", content);

        Ok(())
    }

    #[test]
    fn segment_names_sort_lexically_like_numerically() {
        let a = segment_file_name(1, 0);
        let b = segment_file_name(2, 0);
        assert!(a < b);
    }
}
