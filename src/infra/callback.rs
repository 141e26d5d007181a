//! 地址存储回调 Client
//!
//! 预览上线后把 `虚拟主机 → 地址` 推送给外部存储，反向代理从那里读取路由

use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// 最大尝试次数
const MAX_ATTEMPTS: u32 = 3;

/// 回调错误类型
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("address store returned status {0}")]
    NonSuccessStatus(u16),
}

/// 发布请求体
#[derive(Debug, Serialize)]
struct PublishBody<'a> {
    virtual_host: &'a str,
    address: &'a str,
}

/// 地址存储客户端
#[derive(Clone)]
pub struct AddressStoreClient {
    client: Client,
    callback_url: Option<String>,
}

impl AddressStoreClient {
    /// 创建客户端，`callback_url` 为空时所有调用直接返回
    pub fn new(callback_url: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(5)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                Client::new()
            });

        Self {
            client,
            callback_url: callback_url.map(|url| url.trim_end_matches('/').to_string()),
        }
    }

    pub fn has_callback(&self) -> bool {
        self.callback_url.is_some()
    }

    pub fn callback_url(&self) -> Option<&str> {
        self.callback_url.as_deref()
    }

    /// 发布地址（带重试）
    pub async fn publish(&self, virtual_host: &str, address: &str) -> Result<(), CallbackError> {
        let Some(url) = &self.callback_url else {
            return Ok(());
        };

        let publish_url = format!("{}/addresses", url);
        let body = PublishBody {
            virtual_host,
            address,
        };
        let mut last_error = None;

        for attempt in 1..=MAX_ATTEMPTS {
            match self
                .client
                .post(&publish_url)
                .timeout(Duration::from_secs(10))
                .json(&body)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    info!(
                        virtual_host = %virtual_host,
                        address = %address,
                        attempt = attempt,
                        "Published address to store"
                    );
                    return Ok(());
                }
                Ok(resp) => {
                    warn!(
                        virtual_host = %virtual_host,
                        status = %resp.status(),
                        attempt = attempt,
                        "Address store returned non-success status"
                    );
                    last_error = Some(CallbackError::NonSuccessStatus(resp.status().as_u16()));
                }
                Err(e) => {
                    warn!(
                        virtual_host = %virtual_host,
                        error = %e,
                        attempt = attempt,
                        "Failed to publish address, will retry"
                    );
                    last_error = Some(CallbackError::Network(e));
                }
            }

            // 重试前等待
            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }

        error!(
            virtual_host = %virtual_host,
            "Failed to publish address after {} attempts", MAX_ATTEMPTS
        );
        Err(last_error.unwrap_or(CallbackError::NonSuccessStatus(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_without_callback() {
        let client = AddressStoreClient::new(None);
        assert!(!client.has_callback());
        assert!(client.callback_url().is_none());
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = AddressStoreClient::new(Some("https://store.example.com/".to_string()));
        assert!(client.has_callback());
        assert_eq!(client.callback_url(), Some("https://store.example.com"));
    }

    #[tokio::test]
    async fn test_publish_without_callback_is_noop() {
        let client = AddressStoreClient::new(None);
        client.publish("a1b2c3.demo.carol", "172.28.0.7").await.unwrap();
    }
}
