//! 测试替身：内存存储与脚本化数据源。
//!
//! 仅在 `test-utils` feature 下编译，供各 crate 的集成测试复用。

use crate::common::{Series, Timeframe};
use crate::instrument::entity::{
    Instrument, InstrumentMeta, InstrumentType, MasterChangeset, NewInstrument, RawInstrument,
};
use crate::market::entity::{NavPoint, PriceBar, RawBar};
use crate::market::error::MarketError;
use crate::market::port::{FundDataProvider, HistoryProvider, MasterListProvider};
use crate::store::error::StoreError;
use crate::store::port::{InstrumentStore, PriceStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Default)]
struct InstrumentTables {
    rows: Vec<Instrument>,
    meta: HashMap<i64, InstrumentMeta>,
    next_id: i64,
}

impl InstrumentTables {
    fn close(&mut self, symbol: &str, at: DateTime<Utc>) -> bool {
        match self
            .rows
            .iter_mut()
            .find(|r| r.symbol == symbol && r.valid_to.is_none())
        {
            Some(row) => {
                row.valid_to = Some(at);
                true
            }
            None => false,
        }
    }

    fn insert(&mut self, new: &NewInstrument, at: DateTime<Utc>) -> Result<(), StoreError> {
        let active = self.rows.iter().filter(|r| r.valid_to.is_none());
        for row in active {
            if row.symbol == new.symbol {
                return Err(StoreError::Database(format!(
                    "UNIQUE constraint failed: active symbol {}",
                    new.symbol
                )));
            }
            if new.isin.is_some() && row.isin == new.isin {
                return Err(StoreError::Database(format!(
                    "UNIQUE constraint failed: active isin {:?}",
                    new.isin
                )));
            }
        }
        self.next_id += 1;
        let id = self.next_id;
        self.rows.push(Instrument {
            id,
            symbol: new.symbol.clone(),
            name: new.name.clone(),
            instrument_type: new.instrument_type,
            exchange: new.exchange.clone(),
            segment: new.segment.clone(),
            isin: new.isin.clone(),
            valid_from: at,
            valid_to: None,
        });
        if let Some(meta) = &new.meta {
            self.meta.insert(id, meta.clone());
        }
        Ok(())
    }
}

/// # Summary
/// 内存版存储，同时实现 `InstrumentStore` 与 `PriceStore`。
///
/// # Invariants
/// - 与 SQLite 实现保持相同的唯一性约束：活跃代码唯一、活跃 ISIN 唯一、序列内时间戳唯一。
/// - 变更集在副本上应用，成功后整体替换，失败时原状态不变。
#[derive(Default)]
pub struct MemStore {
    tables: Mutex<InstrumentTables>,
    bars: DashMap<(i64, Series), BTreeMap<DateTime<Utc>, PriceBar>>,
    fail_bulk_inserts: AtomicUsize,
    fail_changesets: AtomicBool,
    bulk_insert_calls: AtomicUsize,
    changeset_calls: AtomicUsize,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让接下来的 `n` 次批量写入失败。
    pub fn fail_next_bulk_inserts(&self, n: usize) {
        self.fail_bulk_inserts.store(n, Ordering::SeqCst);
    }

    /// 让所有变更集应用失败 (模拟连接中断)。
    pub fn fail_changesets(&self, fail: bool) {
        self.fail_changesets.store(fail, Ordering::SeqCst);
    }

    pub fn bulk_insert_calls(&self) -> usize {
        self.bulk_insert_calls.load(Ordering::SeqCst)
    }

    pub fn changeset_calls(&self) -> usize {
        self.changeset_calls.load(Ordering::SeqCst)
    }

    /// 全部版本行的快照。
    pub async fn all_rows(&self) -> Vec<Instrument> {
        self.tables.lock().await.rows.clone()
    }

    /// 某序列上已存储的全部 K 线 (按时间升序)。
    pub fn stored_bars(&self, security_id: i64, series: Series) -> Vec<PriceBar> {
        self.bars
            .get(&(security_id, series))
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl InstrumentStore for MemStore {
    async fn active_instruments(
        &self,
        exchange: &str,
        segment: &str,
    ) -> Result<Vec<Instrument>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .rows
            .iter()
            .filter(|r| r.exchange == exchange && r.segment == segment && r.valid_to.is_none())
            .cloned()
            .collect())
    }

    async fn active_isins(&self) -> Result<HashMap<String, String>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .rows
            .iter()
            .filter(|r| r.valid_to.is_none())
            .filter_map(|r| Some((r.isin.clone()?, r.symbol.clone())))
            .collect())
    }

    async fn apply_changeset(&self, changeset: &MasterChangeset) -> Result<(), StoreError> {
        self.changeset_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_changesets.load(Ordering::SeqCst) {
            return Err(StoreError::Database("injected changeset failure".to_string()));
        }

        let mut tables = self.tables.lock().await;
        let mut staged = tables.clone();
        let at = changeset.effective_at;

        for symbol in &changeset.closures {
            staged.close(symbol, at);
        }
        for revision in &changeset.revisions {
            staged.close(&revision.symbol, at);
            staged.insert(revision, at)?;
        }
        for addition in &changeset.additions {
            staged.insert(addition, at)?;
        }

        *tables = staged;
        Ok(())
    }

    async fn active_by_types(
        &self,
        types: &[InstrumentType],
    ) -> Result<Vec<Instrument>, StoreError> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Instrument> = tables
            .rows
            .iter()
            .filter(|r| r.valid_to.is_none() && types.contains(&r.instrument_type))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(rows)
    }

    async fn instrument_versions(&self, symbol: &str) -> Result<Vec<Instrument>, StoreError> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Instrument> = tables
            .rows
            .iter()
            .filter(|r| r.symbol == symbol)
            .cloned()
            .collect();
        rows.sort_by_key(|r| (r.valid_from, r.id));
        Ok(rows)
    }

    async fn instrument_meta(
        &self,
        instrument_id: i64,
    ) -> Result<Option<InstrumentMeta>, StoreError> {
        Ok(self.tables.lock().await.meta.get(&instrument_id).cloned())
    }
}

#[async_trait]
impl PriceStore for MemStore {
    async fn max_timestamp(
        &self,
        security_id: i64,
        series: Series,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .bars
            .get(&(security_id, series))
            .and_then(|m| m.keys().next_back().copied()))
    }

    async fn bulk_insert(&self, series: Series, bars: &[PriceBar]) -> Result<u64, StoreError> {
        self.bulk_insert_calls.fetch_add(1, Ordering::SeqCst);
        let pending = self.fail_bulk_inserts.load(Ordering::SeqCst);
        if pending > 0 {
            self.fail_bulk_inserts.store(pending - 1, Ordering::SeqCst);
            return Err(StoreError::Database("injected bulk insert failure".to_string()));
        }

        let mut inserted = 0;
        for bar in bars {
            let mut entry = self.bars.entry((bar.security_id, series)).or_default();
            if !entry.contains_key(&bar.timestamp) {
                entry.insert(bar.timestamp, bar.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn load_bars(
        &self,
        security_id: i64,
        series: Series,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PriceBar>, StoreError> {
        Ok(self
            .bars
            .get(&(security_id, series))
            .map(|m| m.range(start..=end).map(|(_, b)| b.clone()).collect())
            .unwrap_or_default())
    }
}

/// 一次历史接口调用的记录。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryCall {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// # Summary
/// 按脚本依次返回结果的历史数据源，并记录每次调用。
///
/// # Invariants
/// - 脚本耗尽后返回空结果。
#[derive(Default)]
pub struct ScriptedHistoryProvider {
    script: Mutex<VecDeque<Result<Vec<RawBar>, MarketError>>>,
    calls: Mutex<Vec<HistoryCall>>,
    delay: Option<Duration>,
}

impl ScriptedHistoryProvider {
    pub fn new(script: Vec<Result<Vec<RawBar>, MarketError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// 每次调用前先等待 `delay`，用于超时测试。
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn calls(&self) -> Vec<HistoryCall> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl HistoryProvider for ScriptedHistoryProvider {
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RawBar>, MarketError> {
        self.calls.lock().await.push(HistoryCall {
            symbol: symbol.to_string(),
            timeframe,
            from,
            to,
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script.lock().await.pop_front().unwrap_or(Ok(Vec::new()))
    }
}

/// # Summary
/// 以 URL 为键返回固定主表的数据源，未登记的 URL 返回网络错误。
#[derive(Default)]
pub struct StaticMasterProvider {
    files: HashMap<String, BTreeMap<String, RawInstrument>>,
}

impl StaticMasterProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, url: &str, records: BTreeMap<String, RawInstrument>) -> Self {
        self.files.insert(url.to_string(), records);
        self
    }
}

#[async_trait]
impl MasterListProvider for StaticMasterProvider {
    async fn fetch_instrument_list(
        &self,
        url: &str,
    ) -> Result<BTreeMap<String, RawInstrument>, MarketError> {
        self.files
            .get(url)
            .cloned()
            .ok_or_else(|| MarketError::Network(format!("HTTP 404 for {}", url)))
    }
}

/// # Summary
/// 固定基金列表与净值历史的数据源。
#[derive(Default)]
pub struct StaticFundProvider {
    funds: BTreeMap<String, RawInstrument>,
    navs: HashMap<String, Vec<NavPoint>>,
    failing: HashSet<String>,
}

impl StaticFundProvider {
    pub fn new(funds: BTreeMap<String, RawInstrument>) -> Self {
        Self {
            funds,
            ..Self::default()
        }
    }

    pub fn with_navs(mut self, scheme_code: &str, navs: Vec<NavPoint>) -> Self {
        self.navs.insert(scheme_code.to_string(), navs);
        self
    }

    /// 让某只基金的净值请求返回网络错误。
    pub fn with_failure(mut self, scheme_code: &str) -> Self {
        self.failing.insert(scheme_code.to_string());
        self
    }
}

#[async_trait]
impl FundDataProvider for StaticFundProvider {
    async fn fetch_fund_list(&self) -> Result<BTreeMap<String, RawInstrument>, MarketError> {
        Ok(self.funds.clone())
    }

    async fn fetch_nav_history(&self, scheme_code: &str) -> Result<Vec<NavPoint>, MarketError> {
        if self.failing.contains(scheme_code) {
            return Err(MarketError::Network("connection reset".to_string()));
        }
        Ok(self.navs.get(scheme_code).cloned().unwrap_or_default())
    }
}
