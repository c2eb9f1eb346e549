//! Run configuration loader for jobweave.
//!
//! Reads `jobweave.toml` from a directory and deserializes it into
//! [`RunConfig`]. Falls back to defaults when the file is missing or malformed.

use std::path::Path;

use jobweave_types::config::RunConfig;

/// File name looked up by [`load_run_config`].
pub const CONFIG_FILE_NAME: &str = "jobweave.toml";

/// Load run configuration from `{dir}/jobweave.toml`.
///
/// - If the file does not exist, returns [`RunConfig::default()`].
/// - If the file exists but fails to read or parse, logs a warning and returns the default.
/// - Otherwise returns the parsed config. A relative `root_dir` is taken
///   relative to `dir`.
pub async fn load_run_config(dir: &Path) -> RunConfig {
    let config_path = dir.join(CONFIG_FILE_NAME);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No {CONFIG_FILE_NAME} found at {}, using defaults", config_path.display());
            return RunConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return RunConfig::default();
        }
    };

    match toml::from_str::<RunConfig>(&content) {
        Ok(mut config) => {
            if config.root_dir.is_relative() {
                config.root_dir = dir.join(&config.root_dir);
            }
            config
        }
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            RunConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_run_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_run_config(tmp.path()).await;
        assert_eq!(config, RunConfig::default());
    }

    #[tokio::test]
    async fn load_run_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            r#"
create_folders = true
log = false
root_dir = "runs"
"#,
        )
        .await
        .unwrap();

        let config = load_run_config(tmp.path()).await;
        assert!(config.create_folders);
        assert!(!config.log);
        assert_eq!(config.root_dir, tmp.path().join("runs"));
        assert!(!config.allow_external_references);
    }

    #[tokio::test]
    async fn load_run_config_absolute_root_dir_kept() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("elsewhere");
        tokio::fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            format!("root_dir = {:?}\n", root.display().to_string()),
        )
        .await
        .unwrap();

        let config = load_run_config(tmp.path()).await;
        assert_eq!(config.root_dir, root);
    }

    #[tokio::test]
    async fn load_run_config_malformed_returns_default() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join(CONFIG_FILE_NAME), "log = \"yes please\"")
            .await
            .unwrap();

        let config = load_run_config(tmp.path()).await;
        assert_eq!(config, RunConfig::default());
    }
}
