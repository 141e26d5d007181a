//! Compose 片段合并
//!
//! 把仓库的多个 compose 片段合并成一个文档，并改写容器名、网络和端口，
//! 让并发的预览环境互不冲突

use serde_yaml::{Mapping, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::domain::vhost::VirtualHostKey;

/// compose 合并错误
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("compose file '{}' could not be read: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("compose file '{}' is not valid YAML: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("compose file '{}' is not a mapping", .path.display())]
    NotAMapping { path: PathBuf },

    #[error("\"services\" must be a mapping of service names")]
    InvalidServices,

    #[error("entry service '{0}' is not defined by the compose files")]
    UnknownEntry(String),

    #[error("failed to write merged compose file: {0}")]
    Write(#[from] std::io::Error),

    #[error("failed to serialize merged compose file: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

impl ComposeError {
    /// 是否是仓库自身文件的问题
    pub fn is_config_fault(&self) -> bool {
        !matches!(self, ComposeError::Write(_) | ComposeError::Serialize(_))
    }
}

/// 合并后的文档及其临时文件
///
/// 值被丢弃时临时文件随之删除
#[derive(Debug)]
pub struct MergedCompose {
    document: Mapping,
    file: NamedTempFile,
}

impl MergedCompose {
    pub fn document(&self) -> &Mapping {
        &self.document
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn service_names(&self) -> Vec<String> {
        services(&self.document)
            .map(|services| {
                services
                    .keys()
                    .filter_map(|k| k.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn has_service(&self, name: &str) -> bool {
        services(&self.document)
            .map(|services| services.contains_key(name))
            .unwrap_or(false)
    }
}

/// 合并 `files`（相对 `working_tree`），隔离改写后写入临时文件
pub async fn merge(
    working_tree: &Path,
    files: &[PathBuf],
    key: &VirtualHostKey,
    network: &str,
) -> Result<MergedCompose, ComposeError> {
    let mut fragments = Vec::with_capacity(files.len());
    for file in files {
        let path = working_tree.join(file);
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| ComposeError::Read {
                path: path.clone(),
                source,
            })?;
        fragments.push(parse_fragment(&path, &content)?);
    }

    let mut document = merge_fragments(fragments);
    isolate(&mut document, key, network)?;
    materialize(document)
}

/// 解析单个片段，空文件视为空映射
pub fn parse_fragment(path: &Path, content: &str) -> Result<Mapping, ComposeError> {
    let value: Value = serde_yaml::from_str(content).map_err(|source| ComposeError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    match value {
        Value::Mapping(mapping) => Ok(mapping),
        Value::Null => Ok(Mapping::new()),
        _ => Err(ComposeError::NotAMapping {
            path: path.to_path_buf(),
        }),
    }
}

/// 浅合并：后面片段的顶层键整体覆盖前面的
pub fn merge_fragments(fragments: impl IntoIterator<Item = Mapping>) -> Mapping {
    let mut merged = Mapping::new();
    for fragment in fragments {
        for (key, value) in fragment {
            merged.insert(key, value);
        }
    }
    merged
}

/// 原地执行隔离改写，重复执行结果不变
pub fn isolate(
    document: &mut Mapping,
    key: &VirtualHostKey,
    network: &str,
) -> Result<(), ComposeError> {
    if let Some(services) = document.get_mut("services") {
        if services.is_null() {
            *services = Value::Mapping(Mapping::new());
        }
        let services = services
            .as_mapping_mut()
            .ok_or(ComposeError::InvalidServices)?;

        for (name, service) in services.iter_mut() {
            let name = name.as_str().ok_or(ComposeError::InvalidServices)?;
            if service.is_null() {
                *service = Value::Mapping(Mapping::new());
            }
            let service = service
                .as_mapping_mut()
                .ok_or(ComposeError::InvalidServices)?;

            service.insert(
                Value::from("container_name"),
                Value::from(key.container_name(name)),
            );
            service.remove("ports");
            // compose 里 network_mode 与 networks 互斥
            if !service.contains_key("network_mode") {
                attach_network(service, network);
            }
        }
    }

    declare_network(document, network);
    Ok(())
}

fn attach_network(service: &mut Mapping, network: &str) {
    match service.get_mut("networks") {
        Some(Value::Sequence(list)) => {
            if !list.iter().any(|n| n.as_str() == Some(network)) {
                list.push(Value::from(network));
            }
        }
        Some(Value::Mapping(map)) => {
            if !map.contains_key(network) {
                map.insert(Value::from(network), Value::Null);
            }
        }
        _ => {
            service.insert(
                Value::from("networks"),
                Value::Sequence(vec![Value::from(network)]),
            );
        }
    }
}

fn declare_network(document: &mut Mapping, network: &str) {
    let mut declaration = Mapping::new();
    declaration.insert(Value::from("external"), Value::Bool(true));
    declaration.insert(Value::from("name"), Value::from(network));

    match document.get_mut("networks") {
        Some(Value::Mapping(networks)) => {
            networks.insert(Value::from(network), Value::Mapping(declaration));
        }
        _ => {
            let mut networks = Mapping::new();
            networks.insert(Value::from(network), Value::Mapping(declaration));
            document.insert(Value::from("networks"), Value::Mapping(networks));
        }
    }
}

fn services(document: &Mapping) -> Option<&Mapping> {
    document.get("services").and_then(Value::as_mapping)
}

fn materialize(document: Mapping) -> Result<MergedCompose, ComposeError> {
    let yaml = serde_yaml::to_string(&document)?;
    let mut file = tempfile::Builder::new()
        .prefix("molt-compose-")
        .suffix(".yml")
        .tempfile()?;
    file.write_all(yaml.as_bytes())?;
    file.flush()?;
    Ok(MergedCompose { document, file })
}
