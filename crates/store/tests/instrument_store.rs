use chrono::{NaiveDate, TimeZone, Utc};
use kura_core::instrument::entity::{
    ContractKind, DerivativeMeta, EquityMeta, InstrumentMeta, InstrumentType, MasterChangeset,
    NewInstrument, OptionRight,
};
use kura_core::store::port::InstrumentStore;
use kura_store::database::connect;
use kura_store::instrument::SqliteInstrumentStore;
use rust_decimal_macros::dec;
use tempfile::tempdir;

fn equity(symbol: &str, name: &str, isin: Option<&str>) -> NewInstrument {
    NewInstrument {
        symbol: symbol.to_string(),
        name: name.to_string(),
        instrument_type: InstrumentType::Equity,
        exchange: "NSE".to_string(),
        segment: "CM".to_string(),
        isin: isin.map(str::to_string),
        meta: Some(InstrumentMeta::Equity(EquityMeta {
            lot_size: 1,
            tick_size: dec!(0.05),
            company_name: Some(name.to_string()),
        })),
    }
}

#[tokio::test]
async fn test_changeset_closes_revises_and_adds() -> anyhow::Result<()> {
    let tmp = tempdir()?;
    let pool = connect(&tmp.path().join("db").join("kura.db")).await?;
    let store = SqliteInstrumentStore::new(pool);

    let t1 = Utc.with_ymd_and_hms(2026, 1, 5, 0, 30, 0).unwrap();
    let mut first = MasterChangeset::new(t1);
    first.additions = vec![
        equity("NSE:ABC-EQ", "Abc Ltd", Some("INE000A01010")),
        equity("NSE:XYZ-EQ", "Xyz Ltd", Some("INE000X01010")),
    ];
    store.apply_changeset(&first).await?;
    assert_eq!(store.active_instruments("NSE", "CM").await?.len(), 2);

    let t2 = Utc.with_ymd_and_hms(2026, 1, 6, 0, 30, 0).unwrap();
    let mut second = MasterChangeset::new(t2);
    second.closures = vec!["NSE:XYZ-EQ".to_string()];
    second.revisions = vec![equity("NSE:ABC-EQ", "Abc Limited", Some("INE000A01010"))];
    store.apply_changeset(&second).await?;

    let versions = store.instrument_versions("NSE:ABC-EQ").await?;
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].name, "Abc Ltd");
    assert_eq!(versions[0].valid_to, Some(t2));
    assert_eq!(versions[1].name, "Abc Limited");
    assert_eq!(versions[1].valid_from, t2);
    assert!(versions[1].is_active());

    let retired = store.instrument_versions("NSE:XYZ-EQ").await?;
    assert_eq!(retired.len(), 1);
    assert_eq!(retired[0].valid_to, Some(t2));

    let active = store.active_instruments("NSE", "CM").await?;
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].symbol, "NSE:ABC-EQ");

    let meta = store.instrument_meta(versions[1].id).await?;
    assert_eq!(
        meta,
        Some(InstrumentMeta::Equity(EquityMeta {
            lot_size: 1,
            tick_size: dec!(0.05),
            company_name: Some("Abc Limited".to_string()),
        }))
    );
    Ok(())
}

#[tokio::test]
async fn test_failed_changeset_rolls_back() -> anyhow::Result<()> {
    let tmp = tempdir()?;
    let pool = connect(&tmp.path().join("kura.db")).await?;
    let store = SqliteInstrumentStore::new(pool);

    let t1 = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
    let mut first = MasterChangeset::new(t1);
    first.additions = vec![equity("NSE:ABC-EQ", "Abc Ltd", Some("INE000A01010"))];
    store.apply_changeset(&first).await?;

    // 新增行与现有活跃行 ISIN 冲突，整批应回滚
    let t2 = Utc.with_ymd_and_hms(2026, 1, 6, 0, 0, 0).unwrap();
    let mut second = MasterChangeset::new(t2);
    second.revisions = vec![equity("NSE:ABC-EQ", "Abc Limited", Some("INE000A01010"))];
    second.additions = vec![equity("NSE:DUP-EQ", "Dup Ltd", Some("INE000A01010"))];
    assert!(store.apply_changeset(&second).await.is_err());

    let versions = store.instrument_versions("NSE:ABC-EQ").await?;
    assert_eq!(versions.len(), 1);
    assert!(versions[0].is_active());
    assert_eq!(versions[0].name, "Abc Ltd");
    assert!(store.instrument_versions("NSE:DUP-EQ").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_active_by_types_and_derivative_meta() -> anyhow::Result<()> {
    let tmp = tempdir()?;
    let pool = connect(&tmp.path().join("kura.db")).await?;
    let store = SqliteInstrumentStore::new(pool);

    let option = NewInstrument {
        symbol: "NSE:NIFTY26JAN24000CE".to_string(),
        name: "NIFTY 29 Jan 26 24000 CE".to_string(),
        instrument_type: InstrumentType::Option,
        exchange: "NSE".to_string(),
        segment: "FO".to_string(),
        isin: None,
        meta: Some(InstrumentMeta::Derivative(DerivativeMeta {
            underlying_symbol: "NIFTY".to_string(),
            contract: ContractKind::Option,
            expiry_date: NaiveDate::from_ymd_opt(2026, 1, 29).unwrap(),
            strike_price: Some(dec!(24000)),
            option_right: Some(OptionRight::Call),
            lot_size: 75,
            tick_size: dec!(0.05),
        })),
    };
    let future = NewInstrument {
        symbol: "NSE:NIFTY26JANFUT".to_string(),
        name: "NIFTY 26 Jan FUT".to_string(),
        instrument_type: InstrumentType::Future,
        exchange: "NSE".to_string(),
        segment: "FO".to_string(),
        isin: None,
        meta: None,
    };

    let mut changeset = MasterChangeset::new(Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap());
    changeset.additions = vec![
        option,
        future,
        equity("NSE:ABC-EQ", "Abc Ltd", Some("INE000A01010")),
    ];
    store.apply_changeset(&changeset).await?;

    let picked = store
        .active_by_types(&[InstrumentType::Future, InstrumentType::Equity])
        .await?;
    let symbols: Vec<&str> = picked.iter().map(|i| i.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["NSE:ABC-EQ", "NSE:NIFTY26JANFUT"]);
    assert!(store.active_by_types(&[]).await?.is_empty());

    let opt = &store.instrument_versions("NSE:NIFTY26JAN24000CE").await?[0];
    match store.instrument_meta(opt.id).await? {
        Some(InstrumentMeta::Derivative(meta)) => {
            assert_eq!(meta.contract, ContractKind::Option);
            assert_eq!(meta.strike_price, Some(dec!(24000)));
            assert_eq!(meta.option_right, Some(OptionRight::Call));
            assert_eq!(meta.lot_size, 75);
        }
        other => panic!("unexpected meta: {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_active_isins_span_all_segments() -> anyhow::Result<()> {
    let tmp = tempdir()?;
    let pool = connect(&tmp.path().join("kura.db")).await?;
    let store = SqliteInstrumentStore::new(pool);

    let t1 = Utc.with_ymd_and_hms(2026, 1, 5, 0, 30, 0).unwrap();
    let mut bse = equity("BSE:TCS-EQ", "Tata Consultancy", Some("INE467B01029"));
    bse.exchange = "BSE".to_string();
    let mut first = MasterChangeset::new(t1);
    first.additions = vec![
        equity("NSE:SBIN-EQ", "State Bank", Some("INE062A01020")),
        equity("NSE:NIFTY50-INDEX", "Nifty 50", None),
        bse,
    ];
    store.apply_changeset(&first).await?;

    let mut second = MasterChangeset::new(Utc.with_ymd_and_hms(2026, 1, 6, 0, 30, 0).unwrap());
    second.closures = vec!["NSE:SBIN-EQ".to_string()];
    store.apply_changeset(&second).await?;

    let isins = store.active_isins().await?;
    assert_eq!(isins.len(), 1);
    assert_eq!(isins.get("INE467B01029").map(String::as_str), Some("BSE:TCS-EQ"));
    Ok(())
}
