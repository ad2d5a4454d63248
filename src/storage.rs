use async_trait::async_trait;
use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};
use uuid::Uuid;

// 1. FileStore Contract
/// FileStore
///
/// Where attachment bytes live. Keys are relative, `/`-separated paths; every
/// implementation sanitizes them before touching storage, so a key can never
/// escape the store's root.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Writes `bytes` under `key`, replacing any previous content.
    async fn save(&self, key: &str, bytes: &[u8]) -> io::Result<()>;

    /// Deletes the file under `key`. A missing file is not an error.
    async fn remove(&self, key: &str) -> io::Result<()>;
}

// 2. The Real Implementation (local disk)
/// LocalFileStore
///
/// Stores files below `UPLOAD_DIR`, creating directories on demand.
#[derive(Clone, Debug)]
pub struct LocalFileStore {
    root: PathBuf,
}

impl LocalFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> io::Result<PathBuf> {
        let key = sanitize_key(key);
        if key.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty storage key"));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn save(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        tracing::debug!(path = %path.display(), size = bytes.len(), "file stored");
        Ok(())
    }

    async fn remove(&self, key: &str) -> io::Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// sanitize_key
///
/// Prevents path traversal by removing directory navigation components
/// (`..`, `.`) and empty segments from a key.
pub fn sanitize_key(key: &str) -> String {
    key.split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".." && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}

/// Lower-cased extension of a client-side file name, if it has one.
pub fn file_extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_ascii_lowercase())
}

/// Storage key of a new attachment: `<issue id>/<uuid>.<ext>`. The client's
/// file name is never part of the key.
pub fn attachment_key(issue_id: i64, extension: &str) -> String {
    format!("{issue_id}/{}.{extension}", Uuid::new_v4())
}

// 3. The Mock Implementation (For Tests)
/// MockFileStore
///
/// Keeps files in memory so handler tests can assert on what was written and
/// removed without touching the disk.
#[derive(Debug, Default)]
pub struct MockFileStore {
    /// When true, all operations return a simulated failure.
    pub should_fail: bool,
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MockFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::default()
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.files
            .lock()
            .map(|files| files.contains_key(&sanitize_key(key)))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.files.lock().map(|files| files.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fail_if_requested(&self) -> io::Result<()> {
        if self.should_fail {
            return Err(io::Error::other("mock storage error: simulation requested"));
        }
        Ok(())
    }
}

#[async_trait]
impl FileStore for MockFileStore {
    async fn save(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        self.fail_if_requested()?;
        self.files
            .lock()
            .map_err(|_| io::Error::other("mock storage poisoned"))?
            .insert(sanitize_key(key), bytes.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &str) -> io::Result<()> {
        self.fail_if_requested()?;
        self.files
            .lock()
            .map_err(|_| io::Error::other("mock storage poisoned"))?
            .remove(&sanitize_key(key));
        Ok(())
    }
}

/// FileStoreState
///
/// The concrete type used to share the file store across the application state.
pub type FileStoreState = Arc<dyn FileStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_traversal() {
        assert_eq!(sanitize_key("../../etc/passwd"), "etc/passwd");
        assert_eq!(sanitize_key("/3/./a.png"), "3/a.png");
        assert_eq!(sanitize_key("..\\..\\boot.ini"), "boot.ini");
    }

    #[test]
    fn extension_is_lowercased() {
        assert_eq!(file_extension("Photo.JPG").as_deref(), Some("jpg"));
        assert_eq!(file_extension("archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(file_extension("README"), None);
        assert_eq!(file_extension("trailing."), None);
    }

    #[test]
    fn attachment_keys_are_unique_per_upload() {
        let first = attachment_key(7, "png");
        let second = attachment_key(7, "png");

        assert!(first.starts_with("7/"));
        assert!(first.ends_with(".png"));
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn local_store_writes_below_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());

        store.save("../5/image.png", b"png-bytes").await.unwrap();

        let written = dir.path().join("5").join("image.png");
        assert_eq!(std::fs::read(&written).unwrap(), b"png-bytes");

        store.remove("5/image.png").await.unwrap();
        assert!(!written.exists());
        // Removing twice is fine.
        store.remove("5/image.png").await.unwrap();
    }

    #[tokio::test]
    async fn local_store_rejects_empty_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new(dir.path());

        let err = store.save("../..", b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn mock_tracks_files_and_can_fail() {
        let mock = MockFileStore::new();
        mock.save("1/a.png", b"a").await.unwrap();
        assert!(mock.contains("1/a.png"));

        mock.remove("1/a.png").await.unwrap();
        assert!(mock.is_empty());

        let failing = MockFileStore::new_failing();
        assert!(failing.save("1/a.png", b"a").await.is_err());
    }
}
