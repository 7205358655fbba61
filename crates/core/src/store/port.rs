use super::error::StoreError;
use crate::common::Series;
use crate::instrument::entity::{Instrument, InstrumentMeta, InstrumentType, MasterChangeset};
use crate::market::entity::PriceBar;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// # Summary
/// 证券主表存储接口 (SCD2)。
///
/// # Invariants
/// - 历史版本只关闭不删除。
/// - `apply_changeset` 要么整体生效，要么整体回滚。
#[async_trait]
pub trait InstrumentStore: Send + Sync {
    /// # Summary
    /// 加载某交易所分段下全部活跃版本行。
    ///
    /// # Arguments
    /// * `exchange`: 交易所。
    /// * `segment`: 市场分段。
    ///
    /// # Returns
    /// 活跃版本行列表。
    async fn active_instruments(
        &self,
        exchange: &str,
        segment: &str,
    ) -> Result<Vec<Instrument>, StoreError>;

    /// # Summary
    /// 全部交易所分段中持有 ISIN 的活跃行，返回 `ISIN → 代码`。
    ///
    /// # Invariants
    /// - 活跃 ISIN 全局唯一，与分段无关。
    async fn active_isins(&self) -> Result<HashMap<String, String>, StoreError>;

    /// # Summary
    /// 在单个事务内应用一次对账变更集。
    ///
    /// # Logic
    /// 1. 关闭 `closures` 中的活跃行 (`valid_to = effective_at`)。
    /// 2. 对 `revisions` 先关闭旧行，再插入新版本及其元数据。
    /// 3. 插入 `additions` 及其元数据。
    /// 4. 提交；任何一步失败则整体回滚。
    ///
    /// # Arguments
    /// * `changeset`: 变更集。
    ///
    /// # Returns
    /// 操作结果。
    async fn apply_changeset(&self, changeset: &MasterChangeset) -> Result<(), StoreError>;

    /// # Summary
    /// 按品种类型筛选全部活跃版本行，按代码排序。
    async fn active_by_types(
        &self,
        types: &[InstrumentType],
    ) -> Result<Vec<Instrument>, StoreError>;

    /// # Summary
    /// 查询某代码的全部版本 (按 `valid_from` 升序)。
    async fn instrument_versions(&self, symbol: &str) -> Result<Vec<Instrument>, StoreError>;

    /// # Summary
    /// 查询版本行的附属元数据。
    async fn instrument_meta(&self, instrument_id: i64)
    -> Result<Option<InstrumentMeta>, StoreError>;
}

/// # Summary
/// 行情序列存储接口，负责 K 线数据的持久化与读取。
///
/// # Invariants
/// - 已存在的 `(security_id, timestamp)` 不会被覆盖。
/// - 每次批量写入在单个事务内完成。
#[async_trait]
pub trait PriceStore: Send + Sync {
    /// # Summary
    /// 查询某证券在某序列上的最大时间戳，即同步检查点。
    ///
    /// # Returns
    /// 无数据时返回 None。
    async fn max_timestamp(
        &self,
        security_id: i64,
        series: Series,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// # Summary
    /// 批量写入 K 线数据。
    ///
    /// # Logic
    /// 1. 开启事务。
    /// 2. 逐条插入，已存在的键被忽略。
    /// 3. 提交事务。
    ///
    /// # Arguments
    /// * `series`: 目标序列。
    /// * `bars`: 待写入的数据列表。
    ///
    /// # Returns
    /// 成功返回实际插入的行数。
    async fn bulk_insert(&self, series: Series, bars: &[PriceBar]) -> Result<u64, StoreError>;

    /// # Summary
    /// 从存储中加载特定时间段的 K 线数据 (闭区间，按时间升序)。
    async fn load_bars(
        &self,
        security_id: i64,
        series: Series,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PriceBar>, StoreError>;
}
