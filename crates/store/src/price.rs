use crate::database::{parse_decimal, parse_optional_decimal};
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use kura_core::common::Series;
use kura_core::common::time::{exchange_date, exchange_midnight};
use kura_core::market::entity::PriceBar;
use kura_core::store::error::StoreError;
use kura_core::store::port::PriceStore;
use sqlx::SqlitePool;
use tracing::debug;

type DailyRow = (
    NaiveDate,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    Option<i64>,
);

type IntradayRow = (DateTime<Utc>, String, String, String, String, i64);

/// PriceStore 的 SQLite 实现。
///
/// # Summary
/// 三个序列各自落在独立的表中：日线表以交易所日期为键，
/// 分钟表与预聚合表以 UTC 时间戳为键。
///
/// # Invariants
/// * 写入使用 `INSERT OR IGNORE`，已存在的行不会被覆盖。
/// * 日内序列的 OHLCV 全部必填。
pub struct SqlitePriceStore {
    pool: SqlitePool,
}

impl SqlitePriceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// 日内表不接受缺失字段，写入前整体校验，避免批次只写入一半。
fn ensure_complete(series: Series, bars: &[PriceBar]) -> Result<(), StoreError> {
    if series.is_date_granular() {
        return Ok(());
    }
    match bars.iter().find(|b| {
        b.open.is_none() || b.high.is_none() || b.low.is_none() || b.volume.is_none()
    }) {
        Some(bar) => Err(StoreError::Database(format!(
            "Incomplete {} bar for security {} at {}",
            series, bar.security_id, bar.timestamp
        ))),
        None => Ok(()),
    }
}

fn daily_bar(security_id: i64, r: DailyRow) -> Result<PriceBar, StoreError> {
    Ok(PriceBar {
        security_id,
        timestamp: exchange_midnight(r.0),
        open: parse_optional_decimal("open", r.1)?,
        high: parse_optional_decimal("high", r.2)?,
        low: parse_optional_decimal("low", r.3)?,
        close: parse_decimal("close", &r.4)?,
        volume: r.5,
    })
}

fn intraday_bar(security_id: i64, r: IntradayRow) -> Result<PriceBar, StoreError> {
    Ok(PriceBar {
        security_id,
        timestamp: r.0,
        open: Some(parse_decimal("open", &r.1)?),
        high: Some(parse_decimal("high", &r.2)?),
        low: Some(parse_decimal("low", &r.3)?),
        close: parse_decimal("close", &r.4)?,
        volume: Some(r.5),
    })
}

fn decimal_text(value: Option<rust_decimal::Decimal>) -> Option<String> {
    value.map(|d| d.to_string())
}

#[async_trait]
impl PriceStore for SqlitePriceStore {
    /// # Summary
    /// 查询同步检查点。
    ///
    /// # Logic
    /// 1. 日线取最大交易所日期，并换算为该日零点。
    /// 2. 分钟序列取最大时间戳。
    /// 3. 预聚合序列按周期过滤后取最大时间戳。
    async fn max_timestamp(
        &self,
        security_id: i64,
        series: Series,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        match series {
            Series::Daily => {
                let date: Option<NaiveDate> = sqlx::query_scalar(
                    "SELECT MAX(price_date) FROM daily_price_history WHERE security_id = ?",
                )
                .bind(security_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
                Ok(date.map(exchange_midnight))
            }
            Series::OneMinute => sqlx::query_scalar(
                "SELECT MAX(price_timestamp) FROM one_minute_history WHERE security_id = ?",
            )
            .bind(security_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string())),
            Series::Aggregated(tf) => sqlx::query_scalar(
                "SELECT MAX(price_timestamp) FROM aggregated_intraday_history WHERE security_id = ? AND timeframe = ?",
            )
            .bind(security_id)
            .bind(tf.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string())),
        }
    }

    /// # Summary
    /// 在单个事务内批量写入 K 线。
    ///
    /// # Logic
    /// 1. 校验日内序列的字段完整性。
    /// 2. 开启事务，逐条 `INSERT OR IGNORE`。
    /// 3. 累加实际插入行数后提交。
    ///
    /// # Arguments
    /// * `series` - 目标序列。
    /// * `bars` - 数据列表。
    ///
    /// # Returns
    /// * `Result<u64, StoreError>` - 实际插入行数，重复键不计入。
    async fn bulk_insert(&self, series: Series, bars: &[PriceBar]) -> Result<u64, StoreError> {
        if bars.is_empty() {
            return Ok(0);
        }
        ensure_complete(series, bars)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let mut inserted = 0u64;

        for bar in bars {
            let query = match series {
                Series::Daily => sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO daily_price_history
                        (security_id, price_date, open, high, low, close, volume)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(bar.security_id)
                .bind(exchange_date(bar.timestamp)),
                Series::OneMinute => sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO one_minute_history
                        (security_id, price_timestamp, open, high, low, close, volume)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(bar.security_id)
                .bind(bar.timestamp),
                Series::Aggregated(tf) => sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO aggregated_intraday_history
                        (security_id, timeframe, price_timestamp, open, high, low, close, volume)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(bar.security_id)
                .bind(tf.to_string())
                .bind(bar.timestamp),
            };

            let result = query
                .bind(decimal_text(bar.open))
                .bind(decimal_text(bar.high))
                .bind(decimal_text(bar.low))
                .bind(bar.close.to_string())
                .bind(bar.volume)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?;
            inserted += result.rows_affected();
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        debug!("Inserted {}/{} {} bars", inserted, bars.len(), series);
        Ok(inserted)
    }

    async fn load_bars(
        &self,
        security_id: i64,
        series: Series,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PriceBar>, StoreError> {
        match series {
            Series::Daily => {
                // 闭区间 [start, end] 内的零点所对应的日期范围
                let mut first = exchange_date(start);
                if exchange_midnight(first) < start {
                    first = first.checked_add_days(Days::new(1)).unwrap_or(first);
                }
                let last = exchange_date(end);

                sqlx::query_as::<_, DailyRow>(
                    r#"
                    SELECT price_date, open, high, low, close, volume
                    FROM daily_price_history
                    WHERE security_id = ? AND price_date >= ? AND price_date <= ?
                    ORDER BY price_date ASC
                    "#,
                )
                .bind(security_id)
                .bind(first)
                .bind(last)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| StoreError::Database(e.to_string()))?
                .into_iter()
                .map(|r| daily_bar(security_id, r))
                .collect()
            }
            Series::OneMinute => sqlx::query_as::<_, IntradayRow>(
                r#"
                SELECT price_timestamp, open, high, low, close, volume
                FROM one_minute_history
                WHERE security_id = ? AND price_timestamp >= ? AND price_timestamp <= ?
                ORDER BY price_timestamp ASC
                "#,
            )
            .bind(security_id)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .into_iter()
            .map(|r| intraday_bar(security_id, r))
            .collect(),
            Series::Aggregated(tf) => sqlx::query_as::<_, IntradayRow>(
                r#"
                SELECT price_timestamp, open, high, low, close, volume
                FROM aggregated_intraday_history
                WHERE security_id = ? AND timeframe = ? AND price_timestamp >= ? AND price_timestamp <= ?
                ORDER BY price_timestamp ASC
                "#,
            )
            .bind(security_id)
            .bind(tf.to_string())
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .into_iter()
            .map(|r| intraday_bar(security_id, r))
            .collect(),
        }
    }
}
