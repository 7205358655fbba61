use crate::error::SyncError;
use crate::planner::{Chunk, HistoryWindowPlanner};
use chrono::{DateTime, Utc};
use kura_core::common::time::{TimeProvider, exchange_date, exchange_midnight};
use kura_core::common::{SecurityRef, Timeframe};
use kura_core::market::entity::{PriceBar, RawBar};
use kura_core::market::port::HistoryProvider;
use kura_core::store::port::PriceStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// # Summary
/// 单只证券单个周期的补数结果。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryReport {
    // 实际落库的 K 线数
    pub bars_written: u64,
    // 发出的远程请求数
    pub calls: usize,
    // 落库失败而被跳过的分片数
    pub failed_chunks: usize,
}

/// # Summary
/// 增量历史行情同步器：从检查点之后开始，按由新到旧的分片逐段请求并立即落库。
///
/// # Invariants
/// - 同一证券同一周期内分片严格串行：上一分片落库结束后才发出下一次请求。
/// - 不会写入检查点及之前的 K 线，也不会在同一批次内写入重复时间戳。
pub struct IncrementalHistoryFetcher {
    provider: Arc<dyn HistoryProvider>,
    store: Arc<dyn PriceStore>,
    clock: Arc<dyn TimeProvider>,
    planner: HistoryWindowPlanner,
    // 相邻两次远程调用之间的间隔
    pacing: Duration,
    // 单次远程调用的时限
    call_timeout: Duration,
}

impl IncrementalHistoryFetcher {
    pub fn new(
        provider: Arc<dyn HistoryProvider>,
        store: Arc<dyn PriceStore>,
        clock: Arc<dyn TimeProvider>,
        pacing: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            store,
            clock,
            planner: HistoryWindowPlanner::new(),
            pacing,
            call_timeout,
        }
    }

    /// # Summary
    /// 补齐一只证券在一个周期上的历史数据。
    ///
    /// # Logic
    /// 1. 读取检查点并规划分片。
    /// 2. 逐个分片请求数据源，两次请求之间按节流间隔等待。
    /// 3. 空结果、请求失败或超时均停止向更早的分片推进。
    /// 4. 非空结果去重、排序、过滤掉检查点及之前的 K 线后立即落库。
    /// 5. 落库失败记录日志并继续下一个分片。
    ///
    /// # Arguments
    /// * `security`: 目标证券。
    /// * `timeframe`: 周期。
    ///
    /// # Returns
    /// 补数结果；仅检查点读取失败时返回错误。
    pub async fn sync(
        &self,
        security: &SecurityRef,
        timeframe: Timeframe,
    ) -> Result<HistoryReport, SyncError> {
        let series = timeframe.series();
        let checkpoint = self.store.max_timestamp(security.id, series).await?;
        let now = self.clock.now();
        let mut report = HistoryReport::default();

        for chunk in self.planner.plan(checkpoint, now, timeframe) {
            if report.calls > 0 && !self.pacing.is_zero() {
                tokio::time::sleep(self.pacing).await;
            }
            report.calls += 1;

            let Some(raw) = self.fetch_chunk(security, timeframe, chunk).await else {
                break;
            };

            let bars = normalize(security.id, timeframe, checkpoint, raw);
            if bars.is_empty() {
                debug!(
                    symbol = %security.symbol,
                    %timeframe,
                    "Chunk held nothing newer than the checkpoint"
                );
                continue;
            }

            match self.store.bulk_insert(series, &bars).await {
                Ok(written) => {
                    report.bars_written += written;
                    debug!(
                        symbol = %security.symbol,
                        %timeframe,
                        from = %chunk.from,
                        to = %chunk.to,
                        bars = written,
                        "Chunk persisted"
                    );
                }
                Err(e) => {
                    report.failed_chunks += 1;
                    error!(
                        symbol = %security.symbol,
                        %timeframe,
                        from = %chunk.from,
                        to = %chunk.to,
                        "Failed to persist chunk: {}",
                        e
                    );
                }
            }
        }

        if report.calls > 0 {
            info!(
                symbol = %security.symbol,
                %timeframe,
                bars = report.bars_written,
                calls = report.calls,
                "History sync finished"
            );
        } else {
            debug!(symbol = %security.symbol, %timeframe, "Already up to date");
        }
        Ok(report)
    }

    /// 请求一个分片；返回 None 表示应停止向更早推进。
    async fn fetch_chunk(
        &self,
        security: &SecurityRef,
        timeframe: Timeframe,
        chunk: Chunk,
    ) -> Option<Vec<RawBar>> {
        let call = self
            .provider
            .fetch_bars(&security.symbol, timeframe, chunk.from, chunk.to);
        match tokio::time::timeout(self.call_timeout, call).await {
            Err(_) => {
                warn!(
                    symbol = %security.symbol,
                    %timeframe,
                    from = %chunk.from,
                    to = %chunk.to,
                    "History call timed out after {:?}, stopping",
                    self.call_timeout
                );
                None
            }
            Ok(Err(e)) => {
                warn!(
                    symbol = %security.symbol,
                    %timeframe,
                    from = %chunk.from,
                    to = %chunk.to,
                    "History call failed, stopping: {}",
                    e
                );
                None
            }
            Ok(Ok(bars)) if bars.is_empty() => {
                warn!(
                    symbol = %security.symbol,
                    %timeframe,
                    from = %chunk.from,
                    to = %chunk.to,
                    "History call returned no data (end of history or provider error), stopping"
                );
                None
            }
            Ok(Ok(bars)) => Some(bars),
        }
    }
}

/// # Summary
/// 将一个分片的原始 K 线整理为待落库记录。
///
/// # Logic
/// 1. epoch 无法表示的行跳过。
/// 2. 日线及以上周期归一到交易所日期零点。
/// 3. 以时间戳去重 (后出现者覆盖)，并按时间升序。
/// 4. 丢弃不晚于检查点的 K 线。
pub(crate) fn normalize(
    security_id: i64,
    timeframe: Timeframe,
    checkpoint: Option<DateTime<Utc>>,
    raw: Vec<RawBar>,
) -> Vec<PriceBar> {
    let mut unique: BTreeMap<DateTime<Utc>, RawBar> = BTreeMap::new();
    for bar in raw {
        let Some(instant) = DateTime::from_timestamp(bar.epoch, 0) else {
            warn!("Dropping bar with out-of-range epoch {}", bar.epoch);
            continue;
        };
        let timestamp = if timeframe.is_daily_or_coarser() {
            exchange_midnight(exchange_date(instant))
        } else {
            instant
        };
        unique.insert(timestamp, bar);
    }

    unique
        .into_iter()
        .filter(|(ts, _)| checkpoint.is_none_or(|c| *ts > c))
        .map(|(timestamp, bar)| PriceBar {
            security_id,
            timestamp,
            open: Some(bar.open),
            high: Some(bar.high),
            low: Some(bar.low),
            close: bar.close,
            volume: Some(bar.volume),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use rust_decimal::Decimal;

    fn raw(epoch: i64, close: i64) -> RawBar {
        RawBar {
            epoch,
            open: Decimal::from(close),
            high: Decimal::from(close),
            low: Decimal::from(close),
            close: Decimal::from(close),
            volume: 10,
        }
    }

    #[test]
    fn test_normalize_dedups_and_sorts() {
        let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 3, 45, 0).unwrap().timestamp();
        let bars = normalize(
            7,
            Timeframe::Minute1,
            None,
            vec![raw(t0 + 120, 3), raw(t0, 1), raw(t0 + 60, 2), raw(t0 + 60, 22)],
        );
        let closes: Vec<Decimal> = bars.iter().map(|b| b.close).collect();
        assert_eq!(
            closes,
            vec![Decimal::from(1), Decimal::from(22), Decimal::from(3)]
        );
        assert!(bars.iter().all(|b| b.security_id == 7));
    }

    #[test]
    fn test_normalize_daily_to_exchange_midnight_and_filters_checkpoint() {
        // Fyers 日线时间戳为交易所零点 (前一日 18:30 UTC)
        let d1 = exchange_midnight(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
        let d2 = exchange_midnight(NaiveDate::from_ymd_opt(2026, 3, 3).unwrap());
        let bars = normalize(
            1,
            Timeframe::Day1,
            Some(d1),
            vec![
                raw(d1.timestamp(), 1),
                raw(d2.timestamp() + 3600, 2),
            ],
        );
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].timestamp, d2);
    }
}
