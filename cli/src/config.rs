use anyhow::{Context, Result};
use common::{ConfigurationError, DeliveryMode};
use log::*;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// 交给分发器的最终配置
///
/// 优先级：命令行 > 环境变量 > 配置文件 > 默认值。命令行与环境变量已由 clap 合并。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub project_id: String,
    pub credentials_file: PathBuf,
    pub mode: DeliveryMode,
}

impl Configuration {
    /// 发起任何网络请求前的检查
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.project_id.trim().is_empty() {
            return Err(ConfigurationError::MissingProjectId);
        }
        if !self.credentials_file.is_file() {
            return Err(ConfigurationError::MissingCredentialsFile(
                self.credentials_file.clone(),
            ));
        }
        Ok(())
    }
}

/// `~/.config/cc_monitor/config.json` 的内容，所有键可选
#[derive(Debug, Default, Deserialize, PartialEq)]
pub struct FileConfig {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
    #[serde(default)]
    pub mode: Option<DeliveryMode>,
}

impl FileConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config").join("cc_monitor").join("config.json"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// 文件存在时加载；解析失败只警告并忽略
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(p) if p.exists() => p,
            _ => return Self::default(),
        };
        match Self::load(&path) {
            Ok(config) => {
                debug!("Loaded config file {}", path.display());
                config
            }
            Err(e) => {
                warn!("Failed to load config file: {e:#}");
                Self::default()
            }
        }
    }
}

/// 命令行或环境变量提供的值
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub project_id: Option<String>,
    pub credentials_file: Option<PathBuf>,
    pub mode: Option<DeliveryMode>,
}

fn default_credentials_file() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".config").join("cc_monitor"))
        .unwrap_or_default()
        .join("service-account.json")
}

pub fn resolve(overrides: Overrides, file: FileConfig) -> Configuration {
    Configuration {
        project_id: overrides.project_id.or(file.project_id).unwrap_or_default(),
        credentials_file: overrides
            .credentials_file
            .or(file.credentials_file)
            .unwrap_or_else(default_credentials_file),
        mode: overrides.mode.or(file.mode).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_overrides_win_over_file() {
        let file = FileConfig {
            project_id: Some("from-file".to_string()),
            credentials_file: Some(PathBuf::from("/etc/file-key.json")),
            mode: Some(DeliveryMode::Push),
        };
        let overrides = Overrides {
            project_id: Some("from-flag".to_string()),
            credentials_file: None,
            mode: Some(DeliveryMode::Document),
        };

        let config = resolve(overrides, file);
        assert_eq!(config.project_id, "from-flag");
        assert_eq!(config.credentials_file, PathBuf::from("/etc/file-key.json"));
        assert_eq!(config.mode, DeliveryMode::Document);
    }

    #[test]
    fn test_defaults() {
        let config = resolve(Overrides::default(), FileConfig::default());
        assert_eq!(config.mode, DeliveryMode::Both);
        assert!(config.project_id.is_empty());
        assert!(config.credentials_file.ends_with("service-account.json"));
    }

    #[test]
    fn test_load_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"project_id": "ccpush-demo", "mode": "firestore", "unknown_key": 1}}"#
        )
        .unwrap();

        let config = FileConfig::load(file.path()).unwrap();
        assert_eq!(config.project_id.as_deref(), Some("ccpush-demo"));
        assert_eq!(config.mode, Some(DeliveryMode::Document));
        assert!(config.credentials_file.is_none());
    }

    #[test]
    fn test_broken_file_is_ignored() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{broken").unwrap();

        assert_eq!(FileConfig::load_or_default(Some(file.path())), FileConfig::default());
    }

    #[test]
    fn test_validate() {
        let key = NamedTempFile::new().unwrap();
        let mut config = Configuration {
            project_id: "demo".to_string(),
            credentials_file: key.path().to_path_buf(),
            mode: DeliveryMode::Both,
        };
        assert!(config.validate().is_ok());

        config.project_id = " ".to_string();
        assert!(matches!(config.validate(), Err(ConfigurationError::MissingProjectId)));

        config.project_id = "demo".to_string();
        config.credentials_file = PathBuf::from("/nonexistent/key.json");
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingCredentialsFile(_)));
        assert!(err.remediation().is_some());
    }
}
