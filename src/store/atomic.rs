//! Crash-safe replacement of collection files.

use std::io;
use std::path::Path;
use tempfile::NamedTempFile;

/// Replace the file at `path` with `content` in a single rename.
///
/// The parent directory is created when missing. Content is written to a
/// temporary sibling, synced, then persisted over the target, so readers see
/// either the old document set or the new one and never a partial write.
pub async fn atomic_write(path: &Path, content: &str) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "Path has no parent directory"))?
        .to_path_buf();
    let target = path.to_path_buf();
    let bytes = content.as_bytes().to_vec();

    tokio::task::spawn_blocking(move || -> io::Result<()> {
        use std::io::Write;

        std::fs::create_dir_all(&parent)?;
        let mut staged = NamedTempFile::new_in(&parent)?;
        staged.write_all(&bytes)?;
        staged.as_file().sync_all()?;
        staged.persist(&target).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_replaces_existing_content() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sellers.json");
        std::fs::write(&path, "old").unwrap();

        atomic_write(&path, "new").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    }

    #[tokio::test]
    async fn test_creates_missing_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("sellers.json");

        atomic_write(&path, "{}").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_leaves_no_staging_files() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("sellers.json");

        atomic_write(&path, "a").await.unwrap();
        atomic_write(&path, "b").await.unwrap();

        let entries = std::fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
