use chrono::{Duration, NaiveDate, TimeZone, Utc};
use kura_core::common::time::exchange_midnight;
use kura_core::common::{Series, Timeframe};
use kura_core::instrument::entity::{InstrumentType, MasterChangeset, NewInstrument};
use kura_core::market::entity::PriceBar;
use kura_core::store::port::{InstrumentStore, PriceStore};
use kura_store::database::connect;
use kura_store::instrument::SqliteInstrumentStore;
use kura_store::price::SqlitePriceStore;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sqlx::SqlitePool;
use tempfile::TempDir;

/// 建库并登记一只证券，返回 (临时目录, 连接池, 证券行号)。
async fn setup() -> anyhow::Result<(TempDir, SqlitePool, i64)> {
    let tmp = tempfile::tempdir()?;
    let pool = connect(&tmp.path().join("kura.db")).await?;
    let instruments = SqliteInstrumentStore::new(pool.clone());
    let mut changeset = MasterChangeset::new(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
    changeset.additions = vec![NewInstrument {
        symbol: "NSE:ABC-EQ".to_string(),
        name: "Abc Ltd".to_string(),
        instrument_type: InstrumentType::Equity,
        exchange: "NSE".to_string(),
        segment: "CM".to_string(),
        isin: None,
        meta: None,
    }];
    instruments.apply_changeset(&changeset).await?;
    let id = instruments.instrument_versions("NSE:ABC-EQ").await?[0].id;
    Ok((tmp, pool, id))
}

fn bar(security_id: i64, at: chrono::DateTime<Utc>, close: Decimal) -> PriceBar {
    PriceBar {
        security_id,
        timestamp: at,
        open: Some(close),
        high: Some(close + dec!(1)),
        low: Some(close - dec!(1)),
        close,
        volume: Some(1_000),
    }
}

#[tokio::test]
async fn test_daily_checkpoint_and_duplicates_ignored() -> anyhow::Result<()> {
    let (_tmp, pool, id) = setup().await?;
    let store = SqlitePriceStore::new(pool);

    assert_eq!(store.max_timestamp(id, Series::Daily).await?, None);

    let d1 = exchange_midnight(NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
    let d2 = exchange_midnight(NaiveDate::from_ymd_opt(2026, 3, 3).unwrap());
    let inserted = store
        .bulk_insert(Series::Daily, &[bar(id, d1, dec!(100.5)), bar(id, d2, dec!(101.25))])
        .await?;
    assert_eq!(inserted, 2);
    assert_eq!(store.max_timestamp(id, Series::Daily).await?, Some(d2));

    // 重复日期不覆盖已有数据
    let again = store
        .bulk_insert(Series::Daily, &[bar(id, d2, dec!(999))])
        .await?;
    assert_eq!(again, 0);

    let loaded = store
        .load_bars(id, Series::Daily, d1, d2)
        .await?;
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[1].close, dec!(101.25));
    assert_eq!(loaded[0].timestamp, d1);
    Ok(())
}

#[tokio::test]
async fn test_daily_accepts_close_only_bars() -> anyhow::Result<()> {
    let (_tmp, pool, id) = setup().await?;
    let store = SqlitePriceStore::new(pool);

    let day = exchange_midnight(NaiveDate::from_ymd_opt(2026, 4, 1).unwrap());
    let nav = PriceBar {
        security_id: id,
        timestamp: day,
        open: None,
        high: None,
        low: None,
        close: dec!(45.6789),
        volume: None,
    };
    assert_eq!(store.bulk_insert(Series::Daily, &[nav.clone()]).await?, 1);
    let loaded = store.load_bars(id, Series::Daily, day, day).await?;
    assert_eq!(loaded, vec![nav]);
    Ok(())
}

#[tokio::test]
async fn test_intraday_series_are_independent() -> anyhow::Result<()> {
    let (_tmp, pool, id) = setup().await?;
    let store = SqlitePriceStore::new(pool);

    let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 3, 45, 0).unwrap();
    let minute_bars: Vec<PriceBar> = (0..3)
        .map(|i| bar(id, t0 + Duration::minutes(i), dec!(200)))
        .collect();
    assert_eq!(store.bulk_insert(Series::OneMinute, &minute_bars).await?, 3);

    let fifteen = Series::Aggregated(Timeframe::Minute15);
    assert_eq!(store.bulk_insert(fifteen, &[bar(id, t0, dec!(201))]).await?, 1);

    assert_eq!(
        store.max_timestamp(id, Series::OneMinute).await?,
        Some(t0 + Duration::minutes(2))
    );
    assert_eq!(store.max_timestamp(id, fifteen).await?, Some(t0));
    assert_eq!(
        store
            .max_timestamp(id, Series::Aggregated(Timeframe::Hour1))
            .await?,
        None
    );

    let loaded = store
        .load_bars(id, Series::OneMinute, t0 + Duration::minutes(1), t0 + Duration::minutes(5))
        .await?;
    assert_eq!(loaded.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_incomplete_intraday_batch_is_rejected() -> anyhow::Result<()> {
    let (_tmp, pool, id) = setup().await?;
    let store = SqlitePriceStore::new(pool);

    let t0 = Utc.with_ymd_and_hms(2026, 3, 2, 3, 45, 0).unwrap();
    let mut broken = bar(id, t0 + Duration::minutes(1), dec!(10));
    broken.volume = None;

    let result = store
        .bulk_insert(Series::OneMinute, &[bar(id, t0, dec!(10)), broken])
        .await;
    assert!(result.is_err());
    assert_eq!(store.max_timestamp(id, Series::OneMinute).await?, None);
    Ok(())
}
