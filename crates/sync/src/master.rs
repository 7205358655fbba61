use crate::classifier::classify;
use crate::error::SyncError;
use kura_core::common::time::{TimeProvider, epoch_to_exchange_date};
use kura_core::instrument::entity::{
    ContractKind, DerivativeMeta, EquityMeta, Instrument, InstrumentMeta, InstrumentType,
    MasterChangeset, MasterKind, MasterScope, NewInstrument, OptionRight, RawInstrument,
};
use kura_core::market::port::MasterListProvider;
use kura_core::store::error::StoreError;
use kura_core::store::port::InstrumentStore;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// # Summary
/// 一次主表对账的结果统计。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub retired: usize,
    pub revised: usize,
    // 不属于本主表管辖的记录 (基金、无法识别、未知衍生品类型)
    pub skipped: usize,
    // 字段缺失或无法解析的记录
    pub malformed: usize,
}

impl std::ops::AddAssign for SyncReport {
    fn add_assign(&mut self, other: Self) {
        self.added += other.added;
        self.retired += other.retired;
        self.revised += other.revised;
        self.skipped += other.skipped;
        self.malformed += other.malformed;
    }
}

/// # Summary
/// 证券主表同步器：对比数据源当前列表与本地活跃集合，生成 SCD2 变更集并原子提交。
///
/// # Invariants
/// - 同一代码任意时刻至多一行活跃。
/// - 对同一份输入重复执行时第二次不产生任何写入。
pub struct InstrumentMasterSync {
    store: Arc<dyn InstrumentStore>,
    clock: Arc<dyn TimeProvider>,
}

/// 单条记录无法落库的原因。
enum Rejection {
    NotOwned(InstrumentType),
    Malformed(String),
}

impl InstrumentMasterSync {
    pub fn new(store: Arc<dyn InstrumentStore>, clock: Arc<dyn TimeProvider>) -> Self {
        Self { store, clock }
    }

    /// # Summary
    /// 下载一份主表文件并对账。
    ///
    /// # Arguments
    /// * `provider`: 主表数据源。
    /// * `url`: 文件地址。
    /// * `scope`: 对账范围。
    pub async fn sync_file(
        &self,
        provider: &dyn MasterListProvider,
        url: &str,
        scope: &MasterScope,
    ) -> Result<SyncReport, SyncError> {
        info!("Processing master file for {} from {}", scope, url);
        let records = provider.fetch_instrument_list(url).await?;
        Ok(self.reconcile(&records, scope).await?)
    }

    /// # Summary
    /// 将数据源列表与本地活跃集合对账。
    ///
    /// # Logic
    /// 1. 空列表视为传输失败，不做任何变更。
    /// 2. 读取范围内活跃行，按代码划分为新增、下线、共有三组。
    /// 3. 下线代码全部关闭。
    /// 4. 共有代码在允许修订的主表类别下，名称变化时生成新版本。
    /// 5. 新增代码按主表类别分类并构建元数据，不归属或字段异常的记录跳过。
    /// 6. ISIN 与任意分段的保留行或本批次较早记录冲突时跳过该记录。
    /// 7. 变更集非空时一次性提交，失败整体回滚。
    ///
    /// # Arguments
    /// * `records`: 代码 → 原始记录。
    /// * `scope`: 对账范围。
    ///
    /// # Returns
    /// 成功返回统计结果；存储失败时本次对账无任何写入。
    pub async fn reconcile(
        &self,
        records: &BTreeMap<String, RawInstrument>,
        scope: &MasterScope,
    ) -> Result<SyncReport, StoreError> {
        let mut report = SyncReport::default();
        if records.is_empty() {
            warn!("Provider returned an empty list for {}, nothing reconciled", scope);
            return Ok(report);
        }

        let active: BTreeMap<String, Instrument> = self
            .store
            .active_instruments(&scope.exchange, &scope.segment)
            .await?
            .into_iter()
            .map(|i| (i.symbol.clone(), i))
            .collect();

        let mut changeset = MasterChangeset::new(self.clock.now());

        // 活跃 ISIN 跨分段唯一，本次关闭的行释放其 ISIN
        let mut held_isins: HashMap<String, String> = self.store.active_isins().await?;
        for (symbol, row) in active.iter().filter(|(s, _)| !records.contains_key(*s)) {
            if let Some(isin) = &row.isin
                && held_isins.get(isin) == Some(symbol)
            {
                held_isins.remove(isin);
            }
            changeset.closures.push(symbol.clone());
        }
        report.retired = changeset.closures.len();

        if scope.kind.revises_on_rename() {
            for (symbol, row) in &active {
                let Some(raw) = records.get(symbol) else {
                    continue;
                };
                if raw.name == row.name {
                    continue;
                }
                let revision = match build_revision(symbol, raw, row, scope) {
                    Ok(r) => r,
                    Err(reason) => {
                        warn!("Skipping revision of {}: {}", symbol, reason);
                        report.malformed += 1;
                        continue;
                    }
                };
                if let Some(isin) = &revision.isin
                    && let Some(holder) = held_isins.get(isin)
                    && holder != symbol
                {
                    warn!("Skipping revision of {}: ISIN {} held by {}", symbol, isin, holder);
                    report.malformed += 1;
                    continue;
                }
                debug!("Revising {}: {:?} -> {:?}", symbol, row.name, raw.name);
                if let Some(old) = &row.isin {
                    held_isins.remove(old);
                }
                if let Some(isin) = &revision.isin {
                    held_isins.insert(isin.clone(), symbol.clone());
                }
                changeset.revisions.push(revision);
            }
        }
        report.revised = changeset.revisions.len();

        for (symbol, raw) in records.iter().filter(|(s, _)| !active.contains_key(*s)) {
            let addition = match build_instrument(symbol, raw, scope) {
                Ok(a) => a,
                Err(Rejection::NotOwned(t)) => {
                    debug!("Skipping symbol {} (type: {})", symbol, t);
                    report.skipped += 1;
                    continue;
                }
                Err(Rejection::Malformed(reason)) => {
                    warn!("Skipping malformed record {}: {}", symbol, reason);
                    report.malformed += 1;
                    continue;
                }
            };
            if let Some(isin) = &addition.isin {
                if let Some(holder) = held_isins.get(isin) {
                    warn!("Skipping {}: ISIN {} held by {}", symbol, isin, holder);
                    report.malformed += 1;
                    continue;
                }
                held_isins.insert(isin.clone(), symbol.clone());
            }
            changeset.additions.push(addition);
        }
        report.added = changeset.additions.len();

        if changeset.is_empty() {
            info!("Master for {} already up to date ({} active)", scope, active.len());
            return Ok(report);
        }

        self.store.apply_changeset(&changeset).await?;
        info!(
            "Master for {} reconciled: {} added, {} retired, {} revised, {} skipped, {} malformed",
            scope, report.added, report.retired, report.revised, report.skipped, report.malformed
        );
        Ok(report)
    }
}

/// # Summary
/// 按主表类别确定新代码的品种类型。
///
/// # Logic
/// 1. 现货主表：按代码后缀与 ISIN 分类，基金与无法识别的代码不归本主表管辖。
/// 2. 衍生品主表：`XX` 为期货，`CE`/`PE` 为期权，其他类型代码跳过。
/// 3. 基金主表：全部为基金。
fn resolve_type(
    symbol: &str,
    raw: &RawInstrument,
    kind: MasterKind,
) -> Result<InstrumentType, Rejection> {
    match kind {
        MasterKind::CapitalMarket => match classify(symbol, raw.isin.as_deref()) {
            t @ (InstrumentType::Mf | InstrumentType::Unknown) => Err(Rejection::NotOwned(t)),
            t => Ok(t),
        },
        MasterKind::Derivative => match raw.option_type.as_deref() {
            Some("XX") => Ok(InstrumentType::Future),
            Some("CE") | Some("PE") => Ok(InstrumentType::Option),
            _ => Err(Rejection::NotOwned(InstrumentType::Unknown)),
        },
        MasterKind::MutualFund => Ok(InstrumentType::Mf),
    }
}

fn build_instrument(
    symbol: &str,
    raw: &RawInstrument,
    scope: &MasterScope,
) -> Result<NewInstrument, Rejection> {
    let instrument_type = resolve_type(symbol, raw, scope.kind)?;
    let meta = build_meta(instrument_type, raw).map_err(Rejection::Malformed)?;
    Ok(NewInstrument {
        symbol: symbol.to_string(),
        name: raw.name.clone(),
        instrument_type,
        exchange: scope.exchange.clone(),
        segment: scope.segment.clone(),
        isin: raw.isin.clone(),
        meta,
    })
}

/// 修订沿用旧行的品种类型，名称、ISIN 与元数据取自数据源当前记录。
fn build_revision(
    symbol: &str,
    raw: &RawInstrument,
    current: &Instrument,
    scope: &MasterScope,
) -> Result<NewInstrument, String> {
    Ok(NewInstrument {
        symbol: symbol.to_string(),
        name: raw.name.clone(),
        instrument_type: current.instrument_type,
        exchange: scope.exchange.clone(),
        segment: scope.segment.clone(),
        isin: raw.isin.clone(),
        meta: build_meta(current.instrument_type, raw)?,
    })
}

/// # Summary
/// 按品种类型构建附属元数据。
///
/// # Logic
/// 1. 股票：需要最小交易单位与最小变动价位。
/// 2. 期货/期权：额外需要标的代码与可解析的到期时间，期权还需要行权价与方向。
/// 3. 其余类型无元数据。
///
/// # Returns
/// 必要字段缺失或无法解析时返回原因。
fn build_meta(
    instrument_type: InstrumentType,
    raw: &RawInstrument,
) -> Result<Option<InstrumentMeta>, String> {
    match instrument_type {
        InstrumentType::Equity => Ok(Some(InstrumentMeta::Equity(EquityMeta {
            lot_size: raw.lot_size.ok_or("missing lot size")?,
            tick_size: raw.tick_size.ok_or("missing tick size")?,
            company_name: Some(raw.name.clone()),
        }))),
        InstrumentType::Future | InstrumentType::Option => {
            let expiry_raw = raw.expiry.as_deref().ok_or("missing expiry")?;
            let expiry_date = expiry_raw
                .trim()
                .parse::<i64>()
                .ok()
                .and_then(epoch_to_exchange_date)
                .ok_or_else(|| format!("could not parse expiry {:?}", expiry_raw))?;

            let (contract, strike_price, option_right) = if instrument_type == InstrumentType::Option
            {
                let right = match raw.option_type.as_deref() {
                    Some("CE") => OptionRight::Call,
                    Some("PE") => OptionRight::Put,
                    other => return Err(format!("unknown option type {:?}", other)),
                };
                let strike = raw.strike.ok_or("missing strike price")?;
                (ContractKind::Option, Some(strike), Some(right))
            } else {
                (ContractKind::Future, None, None)
            };

            Ok(Some(InstrumentMeta::Derivative(DerivativeMeta {
                underlying_symbol: raw
                    .underlying
                    .clone()
                    .ok_or("missing underlying symbol")?,
                contract,
                expiry_date,
                strike_price,
                option_right,
                lot_size: raw.lot_size.ok_or("missing lot size")?,
                tick_size: raw.tick_size.ok_or("missing tick size")?,
            })))
        }
        _ => Ok(None),
    }
}
