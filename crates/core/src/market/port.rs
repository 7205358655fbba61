use crate::common::Timeframe;
use crate::instrument::entity::RawInstrument;
use crate::market::entity::{NavPoint, RawBar};
use crate::market::error::MarketError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// # Summary
/// 证券主表数据源接口。
///
/// # Invariants
/// - 返回的映射以交易代码为键，键在单次返回中唯一。
#[async_trait]
pub trait MasterListProvider: Send + Sync {
    /// # Summary
    /// 下载并解析一份主表文件。
    ///
    /// # Logic
    /// 1. 请求主表文件 URL。
    /// 2. 将数据源特有的字段映射为 `RawInstrument`。
    ///
    /// # Arguments
    /// * `url`: 主表文件地址。
    ///
    /// # Returns
    /// 成功返回 代码 → 原始记录 的有序映射。
    async fn fetch_instrument_list(
        &self,
        url: &str,
    ) -> Result<BTreeMap<String, RawInstrument>, MarketError>;
}

/// # Summary
/// 历史 K 线数据源接口。
///
/// # Invariants
/// - 返回顺序不作保证，调用方负责去重与排序。
/// - 空结果与“更早的数据不存在”在此层无法区分。
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// # Summary
    /// 获取特定证券在指定时间范围内的 K 线数据。
    ///
    /// # Logic
    /// 1. 映射周期为数据源识别的分辨率。
    /// 2. 执行网络请求并解析响应数据。
    ///
    /// # Arguments
    /// * `symbol`: 交易代码。
    /// * `timeframe`: K 线周期。
    /// * `from`: 开始时间。
    /// * `to`: 结束时间。
    ///
    /// # Returns
    /// 成功返回 K 线列表 (可能为空)。
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RawBar>, MarketError>;
}

/// # Summary
/// 公募基金数据源接口 (基金列表与净值历史)。
#[async_trait]
pub trait FundDataProvider: Send + Sync {
    /// # Summary
    /// 获取全部基金列表。
    ///
    /// # Returns
    /// 成功返回 基金代码 → 原始记录 的有序映射。
    async fn fetch_fund_list(&self) -> Result<BTreeMap<String, RawInstrument>, MarketError>;

    /// # Summary
    /// 获取单只基金的完整净值历史。
    ///
    /// # Arguments
    /// * `scheme_code`: 基金代码。
    ///
    /// # Returns
    /// 成功返回净值点列表，格式错误的条目已被跳过。
    async fn fetch_nav_history(&self, scheme_code: &str) -> Result<Vec<NavPoint>, MarketError>;
}
