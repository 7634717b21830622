use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_NAME: &str = "logsieve";
const CONFIG_FILE: &str = "config.json";

/// Application configuration stored in the app data directory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding the source logs (resolves source ids)
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Directory for output artifacts and index files
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Directory holding named keyword configurations
    #[serde(default = "default_keyword_config_dir")]
    pub keyword_config_dir: PathBuf,

    /// Lines between two index checkpoints
    #[serde(default = "default_index_stride")]
    pub index_stride: u32,

    /// Output lines needed before partial content is served
    #[serde(default = "default_first_chunk_lines")]
    pub first_chunk_lines: u64,

    /// Client polling interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Source lines between two progress publications
    #[serde(default = "default_progress_tick_lines")]
    pub progress_tick_lines: u64,

    /// Average line length assumed for the total-line estimate (approximate only)
    #[serde(default = "default_assumed_avg_line_bytes")]
    pub assumed_avg_line_bytes: u64,

    /// File name globs listed as selectable sources
    #[serde(default = "default_source_globs")]
    pub source_globs: Vec<String>,

    /// Loaded line indexes kept in memory by the service
    #[serde(default = "default_index_cache_size")]
    pub index_cache_size: usize,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join(APP_NAME)
}

fn default_keyword_config_dir() -> PathBuf {
    PathBuf::from("configs")
}

fn default_index_stride() -> u32 {
    500
}

fn default_first_chunk_lines() -> u64 {
    200
}

fn default_poll_interval_ms() -> u64 {
    800
}

fn default_progress_tick_lines() -> u64 {
    4096
}

fn default_assumed_avg_line_bytes() -> u64 {
    120
}

fn default_source_globs() -> Vec<String> {
    vec!["*.log".to_string(), "*.txt".to_string(), "*.text".to_string()]
}

fn default_index_cache_size() -> usize {
    16
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            work_dir: default_work_dir(),
            keyword_config_dir: default_keyword_config_dir(),
            index_stride: default_index_stride(),
            first_chunk_lines: default_first_chunk_lines(),
            poll_interval_ms: default_poll_interval_ms(),
            progress_tick_lines: default_progress_tick_lines(),
            assumed_avg_line_bytes: default_assumed_avg_line_bytes(),
            source_globs: default_source_globs(),
            index_cache_size: default_index_cache_size(),
        }
    }
}

impl AppConfig {
    /// Load config from the app data directory, or return default if not found
    pub fn load() -> Result<Self> {
        let config_path = get_config_path()?;
        Self::load_from(&config_path)
    }

    /// Load config from an explicit path, or return default if not found
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = fs::read_to_string(config_path)
                .context("Failed to read config file")?;
            let config: AppConfig = serde_json::from_str(&content)
                .context("Failed to parse config file")?;
            Ok(config.normalized())
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to the app data directory
    pub fn save(&self) -> Result<()> {
        let config_path = get_config_path()?;
        let content = serde_json::to_string_pretty(self)
            .context("Failed to serialize config")?;
        fs::write(&config_path, content)
            .context("Failed to write config file")?;
        Ok(())
    }

    /// Clamp values that would break the engine back to usable ones
    pub fn normalized(mut self) -> Self {
        self.index_stride = self.index_stride.max(1);
        self.first_chunk_lines = self.first_chunk_lines.max(1);
        self.poll_interval_ms = self.poll_interval_ms.clamp(50, 60_000);
        self.progress_tick_lines = self.progress_tick_lines.max(1);
        self.assumed_avg_line_bytes = self.assumed_avg_line_bytes.max(1);
        self.index_cache_size = self.index_cache_size.max(1);
        if self.source_globs.iter().all(|g| g.trim().is_empty()) {
            self.source_globs = default_source_globs();
        }
        self
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }

    /// Resolve relative directories against the current directory, so the
    /// config survives the daemon changing to `/`
    pub fn with_absolute_paths(mut self) -> Result<Self> {
        for dir in [&mut self.log_dir, &mut self.work_dir, &mut self.keyword_config_dir] {
            *dir = std::path::absolute(&*dir)
                .with_context(|| format!("Failed to resolve {}", dir.display()))?;
        }
        Ok(self)
    }
}

/// Get the path to the config file
pub fn get_config_path() -> Result<PathBuf> {
    let app_dir = get_app_data_dir()?;
    Ok(app_dir.join(CONFIG_FILE))
}

/// Get the application data directory
pub fn get_app_data_dir() -> Result<PathBuf> {
    let base = if cfg!(target_os = "macos") {
        dirs::home_dir()
            .map(|h| h.join("Library").join("Application Support"))
    } else {
        // Linux/Unix: use XDG_DATA_HOME or ~/.local/share
        dirs::data_dir()
    };

    let base = base.context("Could not determine app data directory")?;
    let app_dir = base.join(APP_NAME);

    fs::create_dir_all(&app_dir)?;
    Ok(app_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.index_stride, 500);
        assert_eq!(config.first_chunk_lines, 200);
        assert_eq!(config.poll_interval_ms, 800);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"index_stride": 64, "log_dir": "/var/log/app"}"#).unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.index_stride, 64);
        assert_eq!(config.log_dir, PathBuf::from("/var/log/app"));
        assert_eq!(config.source_globs, default_source_globs());
    }

    #[test]
    fn test_normalized_clamps_zeroes() {
        let config = AppConfig {
            index_stride: 0,
            first_chunk_lines: 0,
            poll_interval_ms: 0,
            source_globs: vec![" ".to_string()],
            ..AppConfig::default()
        }
        .normalized();

        assert_eq!(config.index_stride, 1);
        assert_eq!(config.first_chunk_lines, 1);
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.source_globs, default_source_globs());
    }

    #[test]
    fn test_absolute_paths() {
        let config = AppConfig::default().with_absolute_paths().unwrap();
        assert!(config.log_dir.is_absolute());
        assert!(config.log_dir.ends_with("logs"));
        assert!(config.keyword_config_dir.ends_with("configs"));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(AppConfig::load_from(&path).is_err());
    }
}
