//! 仓库内的部署描述文件 `molt-config.yml`
//!
//! ```yaml
//! compose_files:
//!   - docker-compose.yml
//!   - docker-compose.preview.yml
//! entry: web
//! init: scripts/preview-init.sh
//! ```

use serde::de::DeserializeOwned;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// 描述文件名（位于工作树根目录）
pub const CONFIG_FILE_NAME: &str = "molt-config.yml";

/// 描述文件加载错误
///
/// 缺失的配置永远是错误，不做任何默认值替换
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("molt-config.yml does not exist in the repository")]
    Missing,

    #[error("molt-config.yml could not be read: {0}")]
    Unreadable(#[source] io::Error),

    #[error("molt-config.yml contains no usable settings: {0}")]
    Malformed(String),

    #[error("\"{0}\" is required but molt-config.yml does not define it")]
    MissingKey(&'static str),

    #[error("\"{key}\" in molt-config.yml is invalid: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// 初始化脚本
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitScript {
    /// 工作树内的可执行文件（相对路径）
    Path(PathBuf),
    /// 内联脚本文本
    Inline(String),
}

impl InitScript {
    /// 判断配置值是工作树内的文件路径还是内联脚本
    pub fn resolve(value: &str, working_tree: &Path) -> Self {
        if !value.contains('\n') && working_tree.join(value).is_file() {
            InitScript::Path(PathBuf::from(value))
        } else {
            InitScript::Inline(value.to_string())
        }
    }
}

/// 部署描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentConfig {
    /// compose 片段（相对工作树，按顺序合并）
    pub compose_files: Vec<PathBuf>,
    /// 上报地址的入口服务
    pub entry: String,
    pub init: Option<InitScript>,
}

impl DeploymentConfig {
    /// 从工作树加载描述文件
    pub async fn load(working_tree: &Path) -> Result<Self, ConfigError> {
        let path = working_tree.join(CONFIG_FILE_NAME);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ConfigError::Missing),
            Err(e) => return Err(ConfigError::Unreadable(e)),
        };
        Self::parse(&content, working_tree)
    }

    /// 解析描述文件内容
    pub fn parse(content: &str, working_tree: &Path) -> Result<Self, ConfigError> {
        let value: serde_yaml::Value = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::Malformed(e.to_string()))?;

        let mapping = match value {
            serde_yaml::Value::Null => {
                return Err(ConfigError::Malformed("the document is empty".to_string()))
            }
            serde_yaml::Value::Mapping(mapping) => mapping,
            _ => {
                return Err(ConfigError::Malformed(
                    "the document is not a mapping".to_string(),
                ))
            }
        };

        for key in ["compose_files", "entry"] {
            if !mapping.contains_key(key) {
                return Err(ConfigError::MissingKey(key));
            }
        }

        let compose_files: Option<Vec<String>> = field(&mapping, "compose_files")?;
        let entry: Option<String> = field(&mapping, "entry")?;
        let init: Option<String> = field(&mapping, "init")?;

        let entry = entry
            .filter(|e| !e.trim().is_empty())
            .ok_or(ConfigError::InvalidValue {
                key: "entry",
                reason: "must be a non-empty service name".to_string(),
            })?;

        let compose_files = compose_files
            .unwrap_or_default()
            .into_iter()
            .map(PathBuf::from)
            .collect();

        let init = init
            .filter(|s| !s.trim().is_empty())
            .map(|s| InitScript::resolve(&s, working_tree));

        Ok(Self {
            compose_files,
            entry,
            init,
        })
    }
}

/// 读取单个字段，`null` 视为未设置
fn field<T: DeserializeOwned>(
    mapping: &serde_yaml::Mapping,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match mapping.get(key) {
        None => Ok(None),
        Some(value) => serde_yaml::from_value(value.clone()).map_err(|e| {
            ConfigError::InvalidValue {
                key,
                reason: e.to_string(),
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) {
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), content).unwrap();
    }

    #[tokio::test]
    async fn test_load_full_config() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("scripts")).unwrap();
        std::fs::write(dir.path().join("scripts/init.sh"), "#!/bin/sh\n").unwrap();
        write_config(
            &dir,
            "compose_files:\n  - docker-compose.yml\n  - preview.yml\nentry: web\ninit: scripts/init.sh\n",
        );

        let config = DeploymentConfig::load(dir.path()).await.unwrap();
        assert_eq!(
            config.compose_files,
            vec![PathBuf::from("docker-compose.yml"), PathBuf::from("preview.yml")]
        );
        assert_eq!(config.entry, "web");
        assert_eq!(
            config.init,
            Some(InitScript::Path(PathBuf::from("scripts/init.sh")))
        );
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = DeploymentConfig::load(dir.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Missing));
    }

    #[tokio::test]
    async fn test_load_empty_document() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "");
        let err = DeploymentConfig::load(dir.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(_)));
    }

    #[test]
    fn test_parse_not_a_mapping() {
        let err = DeploymentConfig::parse("- a\n- b\n", Path::new("/nonexistent")).unwrap_err();
        assert!(matches!(err, ConfigError::Malformed(_)));
    }

    #[test]
    fn test_parse_missing_keys() {
        let tree = Path::new("/nonexistent");
        let err = DeploymentConfig::parse("entry: web\n", tree).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("compose_files")));

        let err = DeploymentConfig::parse("compose_files: []\n", tree).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("entry")));
    }

    #[test]
    fn test_parse_empty_compose_files() {
        let tree = Path::new("/nonexistent");
        let config = DeploymentConfig::parse("compose_files: []\nentry: web\n", tree).unwrap();
        assert!(config.compose_files.is_empty());

        let config = DeploymentConfig::parse("compose_files:\nentry: web\n", tree).unwrap();
        assert!(config.compose_files.is_empty());
        assert!(config.init.is_none());
    }

    #[test]
    fn test_parse_invalid_values() {
        let tree = Path::new("/nonexistent");
        let err = DeploymentConfig::parse("compose_files: 3\nentry: web\n", tree).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = DeploymentConfig::parse("compose_files: []\nentry:\n", tree).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "entry", .. }));
    }

    #[test]
    fn test_inline_init_script() {
        let tree = Path::new("/nonexistent");
        let config = DeploymentConfig::parse(
            "compose_files: []\nentry: web\ninit: |\n  echo seeding\n  ./seed.sh\n",
            tree,
        )
        .unwrap();
        assert_eq!(
            config.init,
            Some(InitScript::Inline("echo seeding\n./seed.sh\n".to_string()))
        );
    }
}
