use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use std::sync::RwLock;

/// 交易所所在时区相对 UTC 的偏移 (IST, +05:30)。
pub const EXCHANGE_UTC_OFFSET_SECS: i32 = 5 * 3600 + 30 * 60;

/// # Summary
/// 时间供给器接口，用于劫持和隔离物理系统时钟。
/// 主表同步与历史补数所用的“当前时间”都必须通过此接口获取。
pub trait TimeProvider: Send + Sync {
    /// 获取当前挂载的时间
    fn now(&self) -> DateTime<Utc>;
}

/// # Summary
/// 普通运行使用的真实时钟，直接返回操作系统当前时间。
pub struct RealTimeProvider;

impl TimeProvider for RealTimeProvider {
    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// # Summary
/// 测试专用虚拟时钟，允许主动拨快或回退时间。
///
/// # Invariants
/// - 并发安全：内部利用 `RwLock` 提供给多线程安全修改和读取时间的权限。
/// - 锁中毒时沿用中毒前写入的值，不向调用方抛出。
pub struct FakeClockProvider {
    current_time: RwLock<DateTime<Utc>>,
}

impl FakeClockProvider {
    /// 使用指定的初始时间创建虚拟时钟
    pub fn new(initial_time: DateTime<Utc>) -> Self {
        Self {
            current_time: RwLock::new(initial_time),
        }
    }

    /// 强制修改时钟的当前时间
    pub fn set_time(&self, new_time: DateTime<Utc>) {
        let mut time = self
            .current_time
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *time = new_time;
    }
}

impl TimeProvider for FakeClockProvider {
    fn now(&self) -> DateTime<Utc> {
        *self
            .current_time
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn exchange_offset() -> FixedOffset {
    FixedOffset::east_opt(EXCHANGE_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// # Summary
/// 取某一时刻在交易所时区下的日期。
pub fn exchange_date(instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&exchange_offset()).date_naive()
}

/// # Summary
/// 取交易所日期零点对应的 UTC 时刻，作为日线 K 线的标准时间戳。
///
/// # Logic
/// 1. 将日期与 00:00 组合为交易所本地时间。
/// 2. 减去固定偏移换算为 UTC。
pub fn exchange_midnight(date: NaiveDate) -> DateTime<Utc> {
    let local = date.and_time(NaiveTime::MIN);
    let offset = exchange_offset();
    match offset.from_local_datetime(&local).single() {
        Some(dt) => dt.with_timezone(&Utc),
        None => Utc.from_utc_datetime(&local),
    }
}

/// # Summary
/// 将 epoch 秒转换为交易所日期。
///
/// # Returns
/// epoch 超出可表示范围时返回 None。
pub fn epoch_to_exchange_date(epoch_secs: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp(epoch_secs, 0).map(exchange_date)
}
