use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::{fs, io::AsyncWriteExt};
use uuid::Uuid;

const TMP_SUFFIX: &str = ".tmp";

/// Extension after the last dot, if the allow-list contains it (any case).
/// The returned slice keeps the caller's casing.
pub fn allowed_extension<'a>(filename: &'a str, allowed: &[String]) -> Option<&'a str> {
    let (_, ext) = filename.rsplit_once('.')?;
    allowed.iter().any(|a| a.eq_ignore_ascii_case(ext)).then_some(ext)
}

#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub filename: String,
    pub path: PathBuf,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: u64,
    pub kept: u64,
}

/// Write-once directory of original uploads. Nothing here ever reads a
/// stored file back.
#[derive(Debug)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub async fn open(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path { &self.dir }

    /// Persist `bytes` as `<uuid>.<ext>`.
    pub async fn save(&self, ext: &str, bytes: &[u8]) -> std::io::Result<StoredUpload> {
        self.save_as(format!("{}.{}", Uuid::new_v4(), ext), bytes).await
    }

    /// Writes to `<filename>.tmp`, then hard-links it into place. The link
    /// fails on an existing name, so a stored file is never overwritten.
    /// The temp file is gone afterwards whether or not the save succeeded.
    async fn save_as(&self, filename: String, bytes: &[u8]) -> std::io::Result<StoredUpload> {
        let tmp = self.dir.join(format!("{filename}{TMP_SUFFIX}"));
        let path = self.dir.join(&filename);

        let mut f = fs::OpenOptions::new().write(true).create_new(true).open(&tmp).await?;
        let placed = async {
            f.write_all(bytes).await?;
            let _ = f.sync_all().await; // best-effort
            drop(f);
            fs::hard_link(&tmp, &path).await
        }
        .await;
        let _ = fs::remove_file(&tmp).await;
        placed?;

        Ok(StoredUpload { filename, path })
    }

    /// Remove stored files last modified at least `max_age` ago. Temp files
    /// belong to saves still in flight and are left alone.
    pub async fn prune(&self, max_age: Duration) -> std::io::Result<PruneReport> {
        let now = Utc::now();
        let max_age = chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::MAX);
        let mut report = PruneReport::default();

        let mut rd = fs::read_dir(&self.dir).await?;
        while let Some(ent) = rd.next_entry().await? {
            if ent.file_name().to_string_lossy().ends_with(TMP_SUFFIX) { continue; }
            let meta = match ent.metadata().await {
                Ok(m) => m,
                Err(_) => continue, // raced with another remover
            };
            if !meta.is_file() { continue; }
            let modified: DateTime<Utc> = match meta.modified() {
                Ok(t) => t.into(),
                Err(_) => { report.kept += 1; continue; }
            };
            if now.signed_duration_since(modified) >= max_age {
                match fs::remove_file(ent.path()).await {
                    Ok(()) => report.removed += 1,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
            } else {
                report.kept += 1;
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn allowed() -> Vec<String> {
        crate::config::ALLOWED_EXTENSIONS.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn extension_allow_list() {
        let a = allowed();
        assert_eq!(allowed_extension("face.jpg", &a), Some("jpg"));
        assert_eq!(allowed_extension("face.JPEG", &a), Some("JPEG"));
        assert_eq!(allowed_extension("archive.tar.png", &a), Some("png"));
        assert_eq!(allowed_extension(".png", &a), Some("png"));
        assert_eq!(allowed_extension("jpg", &a), None);
        assert_eq!(allowed_extension("face.gif", &a), None);
        assert_eq!(allowed_extension("face.png.exe", &a), None);
        assert_eq!(allowed_extension("face.", &a), None);
        assert_eq!(allowed_extension("", &a), None);
    }

    #[tokio::test]
    async fn save_writes_unique_files() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path()).await.unwrap();

        let a = store.save("jpg", b"one").await.unwrap();
        let b = store.save("jpg", b"two").await.unwrap();

        assert_ne!(a.filename, b.filename);
        assert!(a.filename.ends_with(".jpg"));
        assert_eq!(std::fs::read(&a.path).unwrap(), b"one");
        assert_eq!(std::fs::read(&b.path).unwrap(), b"two");

        let names: HashSet<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 2, "no temp files left behind: {names:?}");
    }

    #[tokio::test]
    async fn save_keeps_extension_case() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path()).await.unwrap();
        let s = store.save("PNG", b"x").await.unwrap();
        assert!(s.filename.ends_with(".PNG"));
    }

    #[tokio::test]
    async fn open_creates_nested_dir() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a/b/uploads");
        let store = UploadStore::open(&nested).await.unwrap();
        assert!(store.dir().is_dir());
    }

    #[tokio::test]
    async fn save_never_overwrites_and_cleans_up() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("taken.jpg"), b"first").unwrap();

        let err = store.save_as("taken.jpg".into(), b"second").await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(dir.path().join("taken.jpg")).unwrap(), b"first");
        assert!(!dir.path().join("taken.jpg.tmp").exists());
    }

    #[tokio::test]
    async fn prune_skips_in_flight_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("abc.jpg.tmp"), b"partial").unwrap();
        store.save("jpg", b"done").await.unwrap();

        let report = store.prune(Duration::ZERO).await.unwrap();
        assert_eq!(report, PruneReport { removed: 1, kept: 0 });
        assert!(dir.path().join("abc.jpg.tmp").exists());
    }

    #[tokio::test]
    async fn prune_respects_age() {
        let dir = TempDir::new().unwrap();
        let store = UploadStore::open(dir.path()).await.unwrap();
        store.save("jpg", b"a").await.unwrap();
        store.save("png", b"b").await.unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        let report = store.prune(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(report, PruneReport { removed: 0, kept: 2 });

        let report = store.prune(Duration::ZERO).await.unwrap();
        assert_eq!(report, PruneReport { removed: 2, kept: 0 });
        assert!(dir.path().join("subdir").is_dir());
    }
}
