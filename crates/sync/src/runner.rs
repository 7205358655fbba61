use crate::error::SyncError;
use crate::fund::FundNavSync;
use crate::history::IncrementalHistoryFetcher;
use crate::master::{InstrumentMasterSync, SyncReport};
use futures::stream::{self, StreamExt};
use kura_core::common::{SecurityRef, Timeframe};
use kura_core::config::MasterFileConfig;
use kura_core::instrument::entity::{Instrument, InstrumentType, MasterScope};
use kura_core::market::port::MasterListProvider;
use kura_core::store::port::InstrumentStore;
use std::sync::Arc;
use tracing::{error, info, warn};

/// 可执行的数据加载任务。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    // 同步全部主表文件
    Symbols,
    // 补齐行情历史
    Prices,
    // 同步基金主表与净值
    Funds,
    // 依次执行以上全部任务
    All,
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Job::Symbols => write!(f, "symbols"),
            Job::Prices => write!(f, "prices"),
            Job::Funds => write!(f, "funds"),
            Job::All => write!(f, "all"),
        }
    }
}

/// # Summary
/// 一次运行的汇总结果。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub master: SyncReport,
    // 下载或对账失败的主表文件数
    pub master_failures: usize,
    pub securities: usize,
    pub bars_written: u64,
    // 检查点读取失败的 证券×周期 数
    pub history_failures: usize,
    pub funds: SyncReport,
    pub nav_bars_written: u64,
    pub fund_failures: usize,
}

/// 行情补数的范围与并发度。
#[derive(Debug, Clone)]
pub struct PricePlan {
    pub timeframes: Vec<Timeframe>,
    pub instrument_types: Vec<InstrumentType>,
    pub workers: usize,
}

struct MasterJob {
    sync: InstrumentMasterSync,
    provider: Arc<dyn MasterListProvider>,
    files: Vec<MasterFileConfig>,
}

struct PriceJob {
    fetcher: IncrementalHistoryFetcher,
    plan: PricePlan,
}

struct FundJob {
    sync: FundNavSync,
    scope: MasterScope,
    workers: usize,
}

/// # Summary
/// 数据加载编排器：按“主表 → 行情 → 基金”的顺序驱动各同步器。
///
/// # Invariants
/// - 单个工作单元的失败只记录日志，不中断整个任务。
/// - 多只证券可并发处理，同一证券的各周期串行执行。
pub struct DataloadRunner {
    instruments: Arc<dyn InstrumentStore>,
    masters: Option<MasterJob>,
    prices: Option<PriceJob>,
    funds: Option<FundJob>,
}

impl DataloadRunner {
    pub fn new(instruments: Arc<dyn InstrumentStore>) -> Self {
        Self {
            instruments,
            masters: None,
            prices: None,
            funds: None,
        }
    }

    pub fn with_masters(
        mut self,
        sync: InstrumentMasterSync,
        provider: Arc<dyn MasterListProvider>,
        files: Vec<MasterFileConfig>,
    ) -> Self {
        self.masters = Some(MasterJob {
            sync,
            provider,
            files,
        });
        self
    }

    pub fn with_prices(mut self, fetcher: IncrementalHistoryFetcher, plan: PricePlan) -> Self {
        self.prices = Some(PriceJob { fetcher, plan });
        self
    }

    pub fn with_funds(mut self, sync: FundNavSync, scope: MasterScope, workers: usize) -> Self {
        self.funds = Some(FundJob {
            sync,
            scope,
            workers,
        });
        self
    }

    /// # Summary
    /// 执行一个任务。
    ///
    /// # Logic
    /// 1. 检查任务所需的同步器均已装配。
    /// 2. `All` 依次执行主表、行情、基金。
    ///
    /// # Returns
    /// 运行汇总；仅在任务未装配或读取证券列表失败时返回错误。
    pub async fn run(&self, job: Job) -> Result<RunSummary, SyncError> {
        let wants_symbols = matches!(job, Job::Symbols | Job::All);
        let wants_prices = matches!(job, Job::Prices | Job::All);
        let wants_funds = matches!(job, Job::Funds | Job::All);

        if wants_symbols && self.masters.is_none() {
            return Err(SyncError::NotConfigured("symbols"));
        }
        if wants_prices && self.prices.is_none() {
            return Err(SyncError::NotConfigured("prices"));
        }
        if wants_funds && self.funds.is_none() {
            return Err(SyncError::NotConfigured("funds"));
        }

        info!("Starting {} job", job);
        let mut summary = RunSummary::default();
        if wants_symbols {
            self.sync_symbols(&mut summary).await;
        }
        if wants_prices {
            self.sync_prices(&mut summary).await?;
        }
        if wants_funds {
            self.sync_funds(&mut summary).await?;
        }
        info!("Finished {} job: {:?}", job, summary);
        Ok(summary)
    }

    /// 逐份同步主表文件，单份失败不影响后续文件。
    async fn sync_symbols(&self, summary: &mut RunSummary) {
        let Some(job) = &self.masters else {
            return;
        };
        for file in &job.files {
            let scope = file.scope();
            match job
                .sync
                .sync_file(job.provider.as_ref(), &file.url, &scope)
                .await
            {
                Ok(report) => summary.master += report,
                Err(e) => {
                    summary.master_failures += 1;
                    error!("Master file {} ({}) failed: {}", file.key, scope, e);
                }
            }
        }
    }

    /// # Summary
    /// 对全部活跃证券补齐行情历史。
    ///
    /// # Logic
    /// 1. 按配置的品种类型读取活跃证券。
    /// 2. 以 `workers` 为上限并发处理证券。
    /// 3. 每只证券内按配置顺序串行处理各周期。
    async fn sync_prices(&self, summary: &mut RunSummary) -> Result<(), SyncError> {
        let Some(job) = &self.prices else {
            return Ok(());
        };
        let securities = self
            .instruments
            .active_by_types(&job.plan.instrument_types)
            .await?;
        info!("Loading price history for {} securities", securities.len());
        summary.securities = securities.len();

        let results: Vec<(u64, usize)> = stream::iter(securities.iter())
            .map(|instrument| self.sync_security(job, instrument))
            .buffer_unordered(job.plan.workers.max(1))
            .collect()
            .await;

        for (bars, failures) in results {
            summary.bars_written += bars;
            summary.history_failures += failures;
        }
        Ok(())
    }

    async fn sync_security(&self, job: &PriceJob, instrument: &Instrument) -> (u64, usize) {
        let security = SecurityRef {
            id: instrument.id,
            symbol: instrument.symbol.clone(),
        };
        let mut bars = 0;
        let mut failures = 0;
        for timeframe in &job.plan.timeframes {
            match job.fetcher.sync(&security, *timeframe).await {
                Ok(report) => bars += report.bars_written,
                Err(e) => {
                    failures += 1;
                    error!("History sync for {} {} failed: {}", security.symbol, timeframe, e);
                }
            }
        }
        (bars, failures)
    }

    /// # Summary
    /// 同步基金主表后补齐全部活跃基金的净值。
    ///
    /// # Logic
    /// 1. 基金列表获取或对账失败时记录日志，仍对已有基金补净值。
    /// 2. 以 `workers` 为上限并发补净值。
    async fn sync_funds(&self, summary: &mut RunSummary) -> Result<(), SyncError> {
        let Some(job) = &self.funds else {
            return Ok(());
        };
        match job.sync.sync_master(&job.scope).await {
            Ok(report) => summary.funds = report,
            Err(e) => {
                summary.fund_failures += 1;
                warn!("Fund master sync for {} failed: {}", job.scope, e);
            }
        }

        let funds = self
            .instruments
            .active_instruments(&job.scope.exchange, &job.scope.segment)
            .await?;
        info!("Loading NAV history for {} funds", funds.len());

        let results: Vec<Result<u64, (String, SyncError)>> = stream::iter(funds.iter())
            .map(|fund| async move {
                let security = SecurityRef {
                    id: fund.id,
                    symbol: fund.symbol.clone(),
                };
                let result = job.sync.sync_nav(&security).await;
                result.map_err(|e| (security.symbol, e))
            })
            .buffer_unordered(job.workers.max(1))
            .collect()
            .await;

        for result in results {
            match result {
                Ok(written) => summary.nav_bars_written += written,
                Err((symbol, e)) => {
                    summary.fund_failures += 1;
                    error!("NAV sync for {} failed: {}", symbol, e);
                }
            }
        }
        Ok(())
    }
}
