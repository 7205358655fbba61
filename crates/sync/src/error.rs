use kura_core::market::error::MarketError;
use kura_core::store::error::StoreError;
use thiserror::Error;

/// # Summary
/// 同步流程错误，汇总存储与数据源两侧的失败。
///
/// # Invariants
/// - 单个工作单元 (一份主表、一只证券) 的失败不会升级为整个任务的失败。
#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Market(#[from] MarketError),
    // 请求了未装配的任务
    #[error("Job not configured: {0}")]
    NotConfigured(&'static str),
}
