pub mod amfi;
pub mod fyers;

use kura_core::market::error::MarketError;
use reqwest::Client;
use std::time::Duration;

/// 构建带整体超时的 HTTP 客户端。
pub(crate) fn http_client(timeout: Duration) -> Result<Client, MarketError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("kura/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| MarketError::Unknown(format!("Failed to build HTTP client: {}", e)))
}

/// 将 reqwest 错误映射为领域错误，超时单独区分。
pub(crate) fn transport_error(e: reqwest::Error, timeout: Duration) -> MarketError {
    if e.is_timeout() {
        MarketError::Timeout(timeout.as_secs())
    } else {
        MarketError::Network(e.to_string())
    }
}
