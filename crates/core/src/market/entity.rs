use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// # Summary
/// 已落库的单根 K 线，记录特定时段内的行情波动。
///
/// # Invariants
/// - `(security_id, timestamp)` 在所属序列内唯一，写入后不再修订。
/// - 日线序列的 `timestamp` 为交易所日期零点。
/// - `close` 必填；净值类数据源只提供 `close`，其余字段为 None。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBar {
    // 主表版本行号
    pub security_id: i64,
    // K 线开始时间
    pub timestamp: DateTime<Utc>,
    // 开盘价
    pub open: Option<Decimal>,
    // 最高价
    pub high: Option<Decimal>,
    // 最低价
    pub low: Option<Decimal>,
    // 收盘价 (净值)
    pub close: Decimal,
    // 成交量
    pub volume: Option<i64>,
}

/// # Summary
/// 历史行情接口返回的原始 K 线，顺序任意且可能在分片边界重复。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBar {
    // K 线开始时间 (epoch 秒)
    pub epoch: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: i64,
}

/// # Summary
/// 基金单日净值点。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavPoint {
    pub date: NaiveDate,
    pub nav: Decimal,
}
