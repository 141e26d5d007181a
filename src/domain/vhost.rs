//! 虚拟主机键
//!
//! `<revision>.<repository>.<owner>` 形式的主机名标签，是去重、日志关联和容器命名的唯一标识

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// 主机名解析错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("virtual host '{0}' must have at least three dot-separated labels")]
    TooFewLabels(String),

    #[error("virtual host '{0}' contains an empty label")]
    EmptyLabel(String),

    /// 标签会被当作路径片段和命令参数使用
    #[error("virtual host '{0}' contains a label with a path separator, NUL or a leading '-'")]
    UnsafeLabel(String),
}

/// 预览部署的标识 (revision, repository, owner)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct VirtualHostKey {
    pub revision: String,
    /// 仓库名可以包含 `.`
    pub repository: String,
    pub owner: String,
}

impl VirtualHostKey {
    pub fn new(
        revision: impl Into<String>,
        repository: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            revision: revision.into(),
            repository: repository.into(),
            owner: owner.into(),
        }
    }

    /// 解析主机名标签
    ///
    /// 第一个标签为 revision，最后一个标签为 owner，中间部分（含 `.`）全部归入 repository。
    /// 不做大小写或空白规范化。
    pub fn parse(virtual_host: &str) -> Result<Self, FormatError> {
        let too_few = || FormatError::TooFewLabels(virtual_host.to_string());

        let (revision, rest) = virtual_host.split_once('.').ok_or_else(too_few)?;
        let (repository, owner) = rest.rsplit_once('.').ok_or_else(too_few)?;

        let has_empty = revision.is_empty()
            || owner.is_empty()
            || repository.split('.').any(str::is_empty);
        if has_empty {
            return Err(FormatError::EmptyLabel(virtual_host.to_string()));
        }

        let has_unsafe = [revision, owner]
            .into_iter()
            .chain(repository.split('.'))
            .any(is_unsafe_label);
        if has_unsafe {
            return Err(FormatError::UnsafeLabel(virtual_host.to_string()));
        }

        Ok(Self::new(revision, repository, owner))
    }

    /// 服务对应的确定性容器名: `owner-repository-revision-service`
    pub fn container_name(&self, service: &str) -> String {
        format!(
            "{}-{}-{}-{}",
            self.owner, self.repository, self.revision, service
        )
    }

    /// compose 项目名
    ///
    /// compose 只接受小写字母、数字、`-` 和 `_`。可读部分会丢失大小写和 `.`，
    /// 所以追加完整主机名的 sha256 前 8 位，不同的键不会共用一个项目
    pub fn project_name(&self) -> String {
        let readable: String = format!("{}-{}-{}", self.owner, self.repository, self.revision)
            .chars()
            .map(|c| {
                let c = c.to_ascii_lowercase();
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '-'
                }
            })
            .collect();

        let mut hasher = Sha256::new();
        hasher.update(self.to_string().as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!("{}-{}", readable, &digest[..8])
    }

    /// 对外的完整主机名
    pub fn hostname(&self, base_domain: &str) -> String {
        format!("{}.{}", self, base_domain)
    }

    /// 本地工作树路径: `<root>/<owner>/<repository>/<revision>`
    pub fn working_tree(&self, root: &Path) -> PathBuf {
        root.join(&self.owner)
            .join(&self.repository)
            .join(&self.revision)
    }
}

fn is_unsafe_label(label: &str) -> bool {
    label.starts_with('-') || label.contains(['/', '\\', '\0'])
}

impl fmt::Display for VirtualHostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.revision, self.repository, self.owner)
    }
}

impl FromStr for VirtualHostKey {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let key = VirtualHostKey::parse("a1b2c3.demo.carol").unwrap();
        assert_eq!(key.revision, "a1b2c3");
        assert_eq!(key.repository, "demo");
        assert_eq!(key.owner, "carol");
    }

    #[test]
    fn test_parse_dotted_repository() {
        let key = VirtualHostKey::parse("abc123.my.repo.alice").unwrap();
        assert_eq!(key.revision, "abc123");
        assert_eq!(key.repository, "my.repo");
        assert_eq!(key.owner, "alice");

        let key: VirtualHostKey = "r.a.b.c.d.o".parse().unwrap();
        assert_eq!(key.repository, "a.b.c.d");
    }

    #[test]
    fn test_parse_too_few_labels() {
        for input in ["", "abc", "abc.def"] {
            assert_eq!(
                VirtualHostKey::parse(input),
                Err(FormatError::TooFewLabels(input.to_string()))
            );
        }
    }

    #[test]
    fn test_parse_empty_labels() {
        for input in [".repo.owner", "rev.repo.", "rev..owner", "rev.a..b.owner"] {
            assert!(matches!(
                VirtualHostKey::parse(input),
                Err(FormatError::EmptyLabel(_))
            ));
        }
    }

    #[test]
    fn test_parse_rejects_unsafe_labels() {
        for input in [
            "rev.repo./tmp",
            "rev.repo.own/er",
            "rev.a/b.owner",
            "rev.a.-b.owner",
            "--orphan.repo.owner",
            "rev.repo.-owner",
            "rev.re\\po.owner",
            "rev.re\0po.owner",
        ] {
            assert_eq!(
                VirtualHostKey::parse(input),
                Err(FormatError::UnsafeLabel(input.to_string())),
                "{:?}",
                input
            );
        }

        // `-` 只在开头不允许
        assert!(VirtualHostKey::parse("rev-1.my-repo.some-owner").is_ok());
    }

    #[test]
    fn test_project_names_are_distinct() {
        let a = VirtualHostKey::parse("a.My.Repo.carol").unwrap();
        let b = VirtualHostKey::parse("a.my-repo.carol").unwrap();
        let c = VirtualHostKey::parse("a.my.repo.carol").unwrap();
        assert!(a.project_name().starts_with("carol-my-repo-a-"));
        assert!(b.project_name().starts_with("carol-my-repo-a-"));
        assert_ne!(a.project_name(), b.project_name());
        assert_ne!(a.project_name(), c.project_name());
        assert_ne!(b.project_name(), c.project_name());

        // 同一个键总是得到同一个项目名
        assert_eq!(a.project_name(), a.clone().project_name());
        let name = a.project_name();
        assert!(name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_'));
    }

    #[test]
    fn test_parse_keeps_case() {
        let key = VirtualHostKey::parse("ABC.Repo.Owner").unwrap();
        assert_eq!(key.to_string(), "ABC.Repo.Owner");
    }

    #[test]
    fn test_derived_names() {
        let key = VirtualHostKey::new("a1b2c3", "My.Repo", "carol");
        assert_eq!(key.container_name("web"), "carol-My.Repo-a1b2c3-web");
        assert!(key.project_name().starts_with("carol-my-repo-a1b2c3-"));
        assert_eq!(key.project_name().len(), "carol-my-repo-a1b2c3-".len() + 8);
        assert_eq!(key.hostname("preview.dev"), "a1b2c3.My.Repo.carol.preview.dev");
        assert_eq!(
            key.working_tree(Path::new("/srv/repos")),
            PathBuf::from("/srv/repos/carol/My.Repo/a1b2c3")
        );
    }
}
