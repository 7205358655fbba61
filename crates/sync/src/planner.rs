use chrono::{DateTime, Duration, Utc};
use kura_core::common::Timeframe;

/// 检查点之后的首个待取时刻与检查点之间的间隔，等于存储精度。
pub const CHECKPOINT_STEP: Duration = Duration::seconds(1);

/// # Summary
/// 单个周期类别的分片策略。
///
/// # Invariants
/// - `chunk_span` 为正。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    // 单个分片覆盖的时长，受数据源单次请求上限约束
    pub chunk_span: Duration,
    // 无检查点时的回溯时长
    pub default_lookback: Duration,
}

impl WindowPolicy {
    /// # Summary
    /// 按周期类别给出默认策略。
    ///
    /// # Logic
    /// 1. 日线及以上：分片 2 年，回溯 20 年。
    /// 2. 日内：分片 60 天，回溯 7 年。
    pub fn for_timeframe(timeframe: Timeframe) -> Self {
        if timeframe.is_daily_or_coarser() {
            Self {
                chunk_span: Duration::days(2 * 365),
                default_lookback: Duration::days(20 * 365),
            }
        } else {
            Self {
                chunk_span: Duration::days(60),
                default_lookback: Duration::days(7 * 365),
            }
        }
    }
}

/// 一个待请求的时间窗口，`from <= to`。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// # Summary
/// 历史窗口规划器：根据检查点与当前时间计算待补区间，并切分为由新到旧的分片。
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryWindowPlanner;

impl HistoryWindowPlanner {
    pub fn new() -> Self {
        Self
    }

    /// # Summary
    /// 规划一次同步需要请求的分片序列。
    ///
    /// # Logic
    /// 1. 有检查点时起点为检查点之后一秒，否则为 `now` 减去默认回溯。
    /// 2. 起点不早于 `now` 时返回空序列 (已是最新)。
    /// 3. 否则从 `now` 向过去逐段切分，惰性产出。
    ///
    /// # Arguments
    /// * `last_checkpoint`: 已落库的最大时间戳。
    /// * `now`: 当前时间。
    /// * `timeframe`: 周期，决定分片策略。
    ///
    /// # Returns
    /// 由新到旧的惰性分片迭代器。
    pub fn plan(
        &self,
        last_checkpoint: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        timeframe: Timeframe,
    ) -> ChunkWalk {
        let policy = WindowPolicy::for_timeframe(timeframe);
        let start = match last_checkpoint {
            Some(checkpoint) => checkpoint.checked_add_signed(CHECKPOINT_STEP),
            None => Some(
                now.checked_sub_signed(policy.default_lookback)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC),
            ),
        };
        ChunkWalk::new(start.unwrap_or(now), now, policy.chunk_span)
    }
}

/// # Summary
/// 由新到旧遍历 `[start, end]` 的分片迭代器。
///
/// # Invariants
/// - 相邻分片首尾相接：后一个分片的 `to` 等于前一个分片的 `from`。
/// - 每个分片的跨度不超过 `span`，最后一个分片的 `from` 等于 `start`。
#[derive(Debug, Clone)]
pub struct ChunkWalk {
    start: DateTime<Utc>,
    cursor: DateTime<Utc>,
    span: Duration,
}

impl ChunkWalk {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, span: Duration) -> Self {
        Self {
            start,
            cursor: end,
            span,
        }
    }
}

impl Iterator for ChunkWalk {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.cursor <= self.start || self.span <= Duration::zero() {
            return None;
        }
        let from = self
            .cursor
            .checked_sub_signed(self.span)
            .map_or(self.start, |f| f.max(self.start));
        let chunk = Chunk {
            from,
            to: self.cursor,
        };
        self.cursor = from;
        Some(chunk)
    }
}
