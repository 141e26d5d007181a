//! 地址簿
//!
//! 记录每个预览对应的入口容器地址，并转发给外部存储

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::vhost::VirtualHostKey;
use crate::infra::callback::AddressStoreClient;

/// 一条地址记录
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct AddressRecord {
    pub virtual_host: String,
    pub address: String,
    pub published_at: DateTime<Utc>,
}

/// 地址簿
pub struct AddressBook {
    entries: RwLock<HashMap<VirtualHostKey, AddressRecord>>,
    store: AddressStoreClient,
}

impl AddressBook {
    pub fn new(store: AddressStoreClient) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            store,
        }
    }

    /// 只在进程内记录
    pub fn in_memory() -> Self {
        Self::new(AddressStoreClient::new(None))
    }

    /// 发布地址
    ///
    /// 外部存储失败只记日志，进程内记录仍然生效
    pub async fn publish(&self, key: &VirtualHostKey, address: &str) -> AddressRecord {
        let record = AddressRecord {
            virtual_host: key.to_string(),
            address: address.to_string(),
            published_at: Utc::now(),
        };
        self.entries
            .write()
            .await
            .insert(key.clone(), record.clone());
        info!(virtual_host = %key, address = %address, "Address published");

        if let Err(e) = self.store.publish(&record.virtual_host, address).await {
            warn!(virtual_host = %key, error = %e, "Address store was not updated");
        }
        record
    }

    pub async fn resolve(&self, key: &VirtualHostKey) -> Option<AddressRecord> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_then_resolve() {
        let book = AddressBook::in_memory();
        let key = VirtualHostKey::new("a1b2c3", "demo", "carol");
        assert!(book.resolve(&key).await.is_none());

        book.publish(&key, "172.28.0.7").await;
        book.publish(&key, "172.28.0.9").await;

        let record = book.resolve(&key).await.unwrap();
        assert_eq!(record.virtual_host, "a1b2c3.demo.carol");
        assert_eq!(record.address, "172.28.0.9");
        assert_eq!(book.len().await, 1);
    }
}
