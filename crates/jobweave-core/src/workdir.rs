//! Per-job working directories.
//!
//! When a run is configured with `create_folders`, every job executes with a
//! freshly created directory whose name is unique within the run root. The
//! engine only needs a path back; how it is made is up to the provider.

use std::path::{Path, PathBuf};

use jobweave_types::job::JobKey;

/// Prefix of every directory created by [`LocalWorkdirProvider`].
pub const JOB_DIR_PREFIX: &str = "job_";

/// Creates the directory a job runs in.
pub trait WorkdirProvider: Send + Sync {
    fn create(
        &self,
        root: &Path,
        key: JobKey,
    ) -> impl std::future::Future<Output = std::io::Result<PathBuf>> + Send;
}

/// Creates `{root}/job_{timestamp}-{suffix}` on the local filesystem.
///
/// The suffix is taken from the job uuid's random tail so two jobs finishing
/// within the same microsecond still get distinct directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalWorkdirProvider;

impl WorkdirProvider for LocalWorkdirProvider {
    async fn create(&self, root: &Path, key: JobKey) -> std::io::Result<PathBuf> {
        let stamp = chrono::Utc::now().format("%Y-%m-%d-%H-%M-%S-%6f");
        let simple = key.uuid.simple().to_string();
        let suffix = &simple[simple.len() - 8..];
        let dir = root.join(format!("{JOB_DIR_PREFIX}{stamp}-{suffix}-{}", key.index));
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_local_provider_creates_unique_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = LocalWorkdirProvider;

        let a = provider
            .create(tmp.path(), JobKey::new(Uuid::now_v7(), 1))
            .await
            .unwrap();
        let b = provider
            .create(tmp.path(), JobKey::new(Uuid::now_v7(), 1))
            .await
            .unwrap();

        assert_ne!(a, b);
        assert!(a.is_dir());
        assert!(b.is_dir());
        let name = a.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with(JOB_DIR_PREFIX));
    }

    #[tokio::test]
    async fn test_local_provider_creates_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("nested").join("runs");
        let dir = LocalWorkdirProvider
            .create(&root, JobKey::new(Uuid::now_v7(), 2))
            .await
            .unwrap();
        assert!(dir.starts_with(&root));
        assert!(dir.to_string_lossy().ends_with("-2"));
    }
}
