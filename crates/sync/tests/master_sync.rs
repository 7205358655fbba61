use chrono::{Duration, NaiveDate, TimeZone, Utc};
use kura_core::common::time::{FakeClockProvider, TimeProvider};
use kura_core::instrument::entity::{
    ContractKind, EquityMeta, InstrumentMeta, InstrumentType, MasterKind, MasterScope,
    RawInstrument,
};
use kura_core::store::port::InstrumentStore;
use kura_core::testing::{MemStore, StaticMasterProvider};
use kura_sync::error::SyncError;
use kura_sync::master::{InstrumentMasterSync, SyncReport};
use rust_decimal_macros::dec;
use std::collections::BTreeMap;
use std::sync::Arc;

fn cm_scope() -> MasterScope {
    MasterScope {
        exchange: "NSE".to_string(),
        segment: "CM".to_string(),
        kind: MasterKind::CapitalMarket,
    }
}

fn fo_scope() -> MasterScope {
    MasterScope {
        exchange: "NSE".to_string(),
        segment: "FO".to_string(),
        kind: MasterKind::Derivative,
    }
}

fn equity(name: &str, isin: Option<&str>) -> RawInstrument {
    RawInstrument {
        name: name.to_string(),
        isin: isin.map(str::to_string),
        lot_size: Some(1),
        tick_size: Some(dec!(0.05)),
        ..RawInstrument::default()
    }
}

fn derivative(name: &str, opt_type: &str, expiry: &str, strike: Option<i64>) -> RawInstrument {
    RawInstrument {
        name: name.to_string(),
        lot_size: Some(75),
        tick_size: Some(dec!(0.05)),
        underlying: Some("NIFTY".to_string()),
        option_type: Some(opt_type.to_string()),
        expiry: Some(expiry.to_string()),
        strike: strike.map(rust_decimal::Decimal::from),
        ..RawInstrument::default()
    }
}

fn records(items: Vec<(&str, RawInstrument)>) -> BTreeMap<String, RawInstrument> {
    items
        .into_iter()
        .map(|(s, r)| (s.to_string(), r))
        .collect()
}

struct Harness {
    store: Arc<MemStore>,
    clock: Arc<FakeClockProvider>,
    sync: InstrumentMasterSync,
}

fn harness() -> Harness {
    let store = Arc::new(MemStore::new());
    let clock = Arc::new(FakeClockProvider::new(
        Utc.with_ymd_and_hms(2026, 1, 5, 2, 30, 0).unwrap(),
    ));
    let sync = InstrumentMasterSync::new(store.clone(), clock.clone());
    Harness { store, clock, sync }
}

#[tokio::test]
async fn test_new_equity_and_index_are_added() -> anyhow::Result<()> {
    let h = harness();
    let provider = records(vec![
        ("A-EQ", equity("Alpha Ltd", Some("INE000A01010"))),
        ("B-INDEX", equity("Beta Index", None)),
    ]);

    let report = h.sync.reconcile(&provider, &cm_scope()).await?;
    assert_eq!(report.added, 2);

    let active = h.store.active_instruments("NSE", "CM").await?;
    assert_eq!(active.len(), 2);

    let a = active.iter().find(|i| i.symbol == "A-EQ").unwrap();
    assert_eq!(a.instrument_type, InstrumentType::Equity);
    assert_eq!(a.valid_from, h.clock.now());
    assert_eq!(
        h.store.instrument_meta(a.id).await?,
        Some(InstrumentMeta::Equity(EquityMeta {
            lot_size: 1,
            tick_size: dec!(0.05),
            company_name: Some("Alpha Ltd".to_string()),
        }))
    );

    let b = active.iter().find(|i| i.symbol == "B-INDEX").unwrap();
    assert_eq!(b.instrument_type, InstrumentType::Index);
    assert_eq!(h.store.instrument_meta(b.id).await?, None);
    Ok(())
}

#[tokio::test]
async fn test_dropped_symbol_is_closed_and_others_untouched() -> anyhow::Result<()> {
    let h = harness();
    let t0 = h.clock.now();
    h.sync
        .reconcile(
            &records(vec![
                ("A-EQ", equity("Alpha Ltd", None)),
                ("C-EQ", equity("Gamma Ltd", None)),
            ]),
            &cm_scope(),
        )
        .await?;

    let t1 = t0 + Duration::days(1);
    h.clock.set_time(t1);
    let report = h
        .sync
        .reconcile(&records(vec![("A-EQ", equity("Alpha Ltd", None))]), &cm_scope())
        .await?;
    assert_eq!(
        report,
        SyncReport {
            retired: 1,
            ..SyncReport::default()
        }
    );

    let c = h.store.instrument_versions("C-EQ").await?;
    assert_eq!(c.len(), 1);
    assert_eq!(c[0].valid_to, Some(t1));

    let a = h.store.instrument_versions("A-EQ").await?;
    assert_eq!(a.len(), 1);
    assert!(a[0].is_active());
    assert_eq!(a[0].valid_from, t0);
    Ok(())
}

#[tokio::test]
async fn test_reconcile_is_idempotent() -> anyhow::Result<()> {
    let h = harness();
    let provider = records(vec![
        ("A-EQ", equity("Alpha Ltd", Some("INE000A01010"))),
        ("B-INDEX", equity("Beta Index", None)),
        ("X-QQ", equity("Mystery", None)),
    ]);

    h.sync.reconcile(&provider, &cm_scope()).await?;
    let rows_before = h.store.all_rows().await;
    let calls_before = h.store.changeset_calls();

    h.clock.set_time(h.clock.now() + Duration::hours(6));
    let second = h.sync.reconcile(&provider, &cm_scope()).await?;

    assert_eq!(second.added, 0);
    assert_eq!(second.retired, 0);
    assert_eq!(second.revised, 0);
    assert_eq!(h.store.changeset_calls(), calls_before);
    assert_eq!(h.store.all_rows().await, rows_before);
    Ok(())
}

#[tokio::test]
async fn test_rename_creates_new_version() -> anyhow::Result<()> {
    let h = harness();
    let t0 = h.clock.now();
    h.sync
        .reconcile(
            &records(vec![("A-EQ", equity("Alpha Ltd", Some("INE000A01010")))]),
            &cm_scope(),
        )
        .await?;

    let t1 = t0 + Duration::days(30);
    h.clock.set_time(t1);
    let report = h
        .sync
        .reconcile(
            &records(vec![("A-EQ", equity("Alpha Limited", Some("INE000A01010")))]),
            &cm_scope(),
        )
        .await?;
    assert_eq!(report.revised, 1);

    let versions = h.store.instrument_versions("A-EQ").await?;
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].name, "Alpha Ltd");
    assert_eq!(versions[0].valid_to, Some(t1));
    assert_eq!(versions[1].name, "Alpha Limited");
    assert_eq!(versions[1].valid_from, t1);
    assert_eq!(versions.iter().filter(|v| v.is_active()).count(), 1);

    match h.store.instrument_meta(versions[1].id).await? {
        Some(InstrumentMeta::Equity(meta)) => {
            assert_eq!(meta.company_name.as_deref(), Some("Alpha Limited"));
        }
        other => panic!("unexpected meta: {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_at_most_one_active_row_per_symbol() -> anyhow::Result<()> {
    let h = harness();
    let names = ["One", "Two", "Two", "Three", "Three", "Four"];
    for (day, name) in names.iter().enumerate() {
        h.clock
            .set_time(h.clock.now() + Duration::days(1));
        let mut provider = records(vec![("A-EQ", equity(name, None))]);
        if day % 2 == 0 {
            provider.insert("B-EQ".to_string(), equity("Bee", None));
        }
        h.sync.reconcile(&provider, &cm_scope()).await?;
    }

    for symbol in ["A-EQ", "B-EQ"] {
        let active = h
            .store
            .all_rows()
            .await
            .into_iter()
            .filter(|r| r.symbol == symbol && r.is_active())
            .count();
        assert!(active <= 1, "{} has {} active rows", symbol, active);
    }
    assert_eq!(h.store.instrument_versions("A-EQ").await?.len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_fund_and_unknown_symbols_are_skipped_in_capital_market() -> anyhow::Result<()> {
    let h = harness();
    let provider = records(vec![
        ("A-EQ", equity("Alpha Ltd", None)),
        ("LIQUID-EQ", equity("Liquid Fund", Some("INF732E01037"))),
        ("ABC-QQ", equity("Unknown thing", None)),
    ]);
    let report = h.sync.reconcile(&provider, &cm_scope()).await?;
    assert_eq!(report.added, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(h.store.active_instruments("NSE", "CM").await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_malformed_records_do_not_abort_batch() -> anyhow::Result<()> {
    let h = harness();
    let mut missing_lot = equity("No Lot", None);
    missing_lot.lot_size = None;
    let provider = records(vec![
        ("A-EQ", equity("Alpha Ltd", None)),
        ("BAD-EQ", missing_lot),
        ("B-BE", equity("Bees ETF", None)),
    ]);
    let report = h.sync.reconcile(&provider, &cm_scope()).await?;
    assert_eq!(report.added, 2);
    assert_eq!(report.malformed, 1);
    assert!(h.store.instrument_versions("BAD-EQ").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_duplicate_isin_keeps_first_identifier() -> anyhow::Result<()> {
    let h = harness();
    let provider = records(vec![
        ("A-EQ", equity("Alpha Ltd", Some("INE000A01010"))),
        ("A-BE", equity("Alpha Bees", Some("INE000A01010"))),
        ("C-EQ", equity("Gamma Ltd", Some("INE000C01010"))),
    ]);
    let report = h.sync.reconcile(&provider, &cm_scope()).await?;
    assert_eq!(report.added, 2);
    assert_eq!(report.malformed, 1);

    // 标识符有序，A-BE 排在 A-EQ 之前
    assert_eq!(h.store.instrument_versions("A-BE").await?.len(), 1);
    assert!(h.store.instrument_versions("A-EQ").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_isin_held_in_other_segment_skips_only_that_record() -> anyhow::Result<()> {
    let h = harness();
    let bse = MasterScope {
        exchange: "BSE".to_string(),
        ..cm_scope()
    };
    h.sync
        .reconcile(
            &records(vec![("NSE:SBIN-EQ", equity("State Bank", Some("INE062A01020")))]),
            &cm_scope(),
        )
        .await?;

    let report = h
        .sync
        .reconcile(
            &records(vec![
                ("BSE:SBIN-EQ", equity("State Bank", Some("INE062A01020"))),
                ("BSE:TCS-EQ", equity("Tata Consultancy", Some("INE467B01029"))),
            ]),
            &bse,
        )
        .await?;
    assert_eq!(report.added, 1);
    assert_eq!(report.malformed, 1);
    assert!(h.store.instrument_versions("BSE:SBIN-EQ").await?.is_empty());
    assert_eq!(h.store.instrument_versions("BSE:TCS-EQ").await?.len(), 1);

    // NSE 下线后 ISIN 被释放
    h.clock.set_time(h.clock.now() + Duration::days(1));
    h.sync
        .reconcile(&records(vec![("NSE:A-EQ", equity("Alpha Ltd", None))]), &cm_scope())
        .await?;
    let report = h
        .sync
        .reconcile(
            &records(vec![
                ("BSE:SBIN-EQ", equity("State Bank", Some("INE062A01020"))),
                ("BSE:TCS-EQ", equity("Tata Consultancy", Some("INE467B01029"))),
            ]),
            &bse,
        )
        .await?;
    assert_eq!(report.added, 1);
    assert_eq!(report.malformed, 0);
    assert_eq!(h.store.active_instruments("BSE", "CM").await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_empty_provider_list_changes_nothing() -> anyhow::Result<()> {
    let h = harness();
    h.sync
        .reconcile(&records(vec![("A-EQ", equity("Alpha Ltd", None))]), &cm_scope())
        .await?;
    let report = h.sync.reconcile(&BTreeMap::new(), &cm_scope()).await?;
    assert_eq!(report, SyncReport::default());
    assert_eq!(h.store.active_instruments("NSE", "CM").await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_store_failure_rolls_back_whole_batch() -> anyhow::Result<()> {
    let h = harness();
    h.sync
        .reconcile(&records(vec![("A-EQ", equity("Alpha Ltd", None))]), &cm_scope())
        .await?;
    let before = h.store.all_rows().await;

    h.store.fail_changesets(true);
    let result = h
        .sync
        .reconcile(&records(vec![("B-EQ", equity("Beta Ltd", None))]), &cm_scope())
        .await;
    assert!(result.is_err());
    assert_eq!(h.store.all_rows().await, before);
    Ok(())
}

#[tokio::test]
async fn test_derivatives_are_typed_and_never_revised() -> anyhow::Result<()> {
    let h = harness();
    // 1769538600 = 2026-01-28 00:00 IST
    let provider = records(vec![
        ("NIFTY26JANFUT", derivative("NIFTY Jan FUT", "XX", "1769538600", None)),
        ("NIFTY26JAN24000CE", derivative("NIFTY Jan 24000 CE", "CE", "1769538600", Some(24000))),
        ("NIFTY26JAN24000PE", derivative("NIFTY Jan 24000 PE", "PE", "not-a-date", Some(24000))),
        ("ODDITY", derivative("Odd", "ZZ", "1769538600", None)),
    ]);
    let report = h.sync.reconcile(&provider, &fo_scope()).await?;
    assert_eq!(report.added, 2);
    assert_eq!(report.malformed, 1);
    assert_eq!(report.skipped, 1);

    let fut = &h.store.instrument_versions("NIFTY26JANFUT").await?[0];
    assert_eq!(fut.instrument_type, InstrumentType::Future);
    match h.store.instrument_meta(fut.id).await? {
        Some(InstrumentMeta::Derivative(meta)) => {
            assert_eq!(meta.contract, ContractKind::Future);
            assert_eq!(meta.expiry_date, NaiveDate::from_ymd_opt(2026, 1, 28).unwrap());
            assert_eq!(meta.strike_price, None);
        }
        other => panic!("unexpected meta: {:?}", other),
    }

    // 名称变化不触发衍生品修订
    let mut renamed = provider.clone();
    if let Some(r) = renamed.get_mut("NIFTY26JANFUT") {
        r.name = "NIFTY January Future".to_string();
    }
    h.clock.set_time(h.clock.now() + Duration::days(1));
    let report = h.sync.reconcile(&renamed, &fo_scope()).await?;
    assert_eq!(report.revised, 0);
    assert_eq!(h.store.instrument_versions("NIFTY26JANFUT").await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_sync_file_reports_transport_failure() -> anyhow::Result<()> {
    let h = harness();
    let provider = StaticMasterProvider::new().with_file(
        "https://masters.test/cm.json",
        records(vec![("A-EQ", equity("Alpha Ltd", None))]),
    );

    let report = h
        .sync
        .sync_file(&provider, "https://masters.test/cm.json", &cm_scope())
        .await?;
    assert_eq!(report.added, 1);

    let missing = h
        .sync
        .sync_file(&provider, "https://masters.test/missing.json", &cm_scope())
        .await;
    assert!(matches!(missing, Err(SyncError::Market(_))));
    assert_eq!(h.store.active_instruments("NSE", "CM").await?.len(), 1);
    Ok(())
}
