pub mod time;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// # Summary
/// 证券引用，历史行情同步只需要知道主表行号与下单代码。
///
/// # Invariants
/// - `id` 指向 `instruments` 表中的某一版本行。
/// - `symbol` 必须是数据源可识别的完整代码 (例如: NSE:SBIN-EQ)。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRef {
    // 主表行号
    pub id: i64,
    // 交易代码
    pub symbol: String,
}

/// # Summary
/// 交易时间周期枚举，定义 K 线的时间跨度。
///
/// # Invariants
/// - 日线及以上周期按交易所日期存储，日内周期按分钟时间戳存储。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timeframe {
    // 1分钟
    #[serde(rename = "1m")]
    Minute1,
    // 5分钟
    #[serde(rename = "5m")]
    Minute5,
    // 15分钟
    #[serde(rename = "15m")]
    Minute15,
    // 1小时
    #[serde(rename = "1h")]
    Hour1,
    // 1日
    #[serde(rename = "1d")]
    Day1,
}

impl Timeframe {
    /// 单根 K 线覆盖的时长。
    pub fn bar_duration(&self) -> Duration {
        match self {
            Timeframe::Minute1 => Duration::minutes(1),
            Timeframe::Minute5 => Duration::minutes(5),
            Timeframe::Minute15 => Duration::minutes(15),
            Timeframe::Hour1 => Duration::hours(1),
            Timeframe::Day1 => Duration::days(1),
        }
    }

    /// 是否为日线或更粗的周期。
    pub fn is_daily_or_coarser(&self) -> bool {
        self.bar_duration() >= Duration::days(1)
    }

    /// # Summary
    /// 将周期映射到其落地的存储序列。
    ///
    /// # Logic
    /// 1. 日线进入日线表。
    /// 2. 1 分钟进入分钟表。
    /// 3. 其余日内周期进入预聚合表，并以周期区分。
    pub fn series(&self) -> Series {
        match self {
            Timeframe::Day1 => Series::Daily,
            Timeframe::Minute1 => Series::OneMinute,
            other => Series::Aggregated(*other),
        }
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1m" | "minute1" => Ok(Timeframe::Minute1),
            "5m" | "minute5" => Ok(Timeframe::Minute5),
            "15m" | "minute15" => Ok(Timeframe::Minute15),
            "1h" | "hour1" => Ok(Timeframe::Hour1),
            "1d" | "day1" => Ok(Timeframe::Day1),
            _ => Err(format!("Unknown Timeframe: {}", s)),
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Timeframe::Minute1 => write!(f, "1m"),
            Timeframe::Minute5 => write!(f, "5m"),
            Timeframe::Minute15 => write!(f, "15m"),
            Timeframe::Hour1 => write!(f, "1h"),
            Timeframe::Day1 => write!(f, "1d"),
        }
    }
}

/// # Summary
/// 行情序列，按粒度划分为相互独立的逻辑存储。
///
/// # Invariants
/// - 同一 `(security_id, timestamp)` 在同一序列内唯一。
/// - 不同序列独立写入，不存在跨序列的隐式复制。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Series {
    Daily,
    OneMinute,
    Aggregated(Timeframe),
}

impl Series {
    /// 是否以交易所日期为粒度。
    pub fn is_date_granular(&self) -> bool {
        matches!(self, Series::Daily)
    }
}

impl std::fmt::Display for Series {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Series::Daily => write!(f, "daily"),
            Series::OneMinute => write!(f, "one_minute"),
            Series::Aggregated(tf) => write!(f, "aggregated:{}", tf),
        }
    }
}
