mod settings;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use kura_core::common::time::{RealTimeProvider, TimeProvider};
use kura_core::config::{AppConfig, LoggingConfig};
use kura_core::store::error::StoreError;
use kura_feed::amfi::AmfiProvider;
use kura_feed::fyers::{FyersHistoryProvider, FyersMasterProvider};
use kura_store::instrument::SqliteInstrumentStore;
use kura_store::price::SqlitePriceStore;
use kura_sync::error::SyncError;
use kura_sync::fund::FundNavSync;
use kura_sync::history::IncrementalHistoryFetcher;
use kura_sync::master::InstrumentMasterSync;
use kura_sync::runner::{DataloadRunner, Job, PricePlan};
use thiserror::Error;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// 启动期错误，任何一种都会在开始同步前终止进程。
#[derive(Error, Debug)]
enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Initialization error: {0}")]
    Init(String),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum JobArg {
    Symbols,
    Prices,
    Funds,
    All,
}

impl From<JobArg> for Job {
    fn from(arg: JobArg) -> Self {
        match arg {
            JobArg::Symbols => Job::Symbols,
            JobArg::Prices => Job::Prices,
            JobArg::Funds => Job::Funds,
            JobArg::All => Job::All,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "kura", version, about = "Incremental market-data loader")]
struct Cli {
    /// 要执行的任务
    #[arg(value_enum, default_value_t = JobArg::All)]
    job: JobArg,

    /// 配置文件路径，默认读取 config/kura.toml (可缺省)
    #[arg(long, short)]
    config: Option<PathBuf>,
}

/// # Summary
/// 应用启动入口，纯粹的 DI 容器。
/// 负责加载配置、初始化日志，实例化具体实现并通过 Arc<dyn Trait> 注入到 DataloadRunner。
///
/// # Logic
/// 1. 读取 `.env` 与配置文件，校验配置。
/// 2. 初始化全局日志 (控制台 + 按日滚动文件)。
/// 3. 实例化基础设施层 (Store、Feed)。
/// 4. 按任务装配同步器并执行。
#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();
    let job = Job::from(cli.job);

    // .env 缺失属于正常情况，凭证也可以直接来自环境变量
    let dotenv_missing = dotenvy::dotenv().is_err();

    let config = settings::load(cli.config.as_deref())
        .map_err(|e| AppError::Config(e.to_string()))?;
    config
        .validate()
        .map_err(|e| AppError::Config(e.to_string()))?;

    let _guard = init_logging(&config.logging)?;
    info!("Kura dataload starting: job={}", job);
    if dotenv_missing {
        info!("No .env file loaded, using process environment only");
    }

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    let runner = build_runner(&config, job).await?;
    let summary = runner.run(job).await?;

    info!(
        "Kura dataload finished: {} master failures, {} bars, {} history failures, {} NAV entries, {} fund failures",
        summary.master_failures,
        summary.bars_written,
        summary.history_failures,
        summary.nav_bars_written,
        summary.fund_failures
    );
    Ok(())
}

/// # Summary
/// 安装全局 tracing 订阅器。
///
/// # Logic
/// 1. 过滤级别优先取 `RUST_LOG`，否则取配置。
/// 2. 控制台输出带颜色，文件输出按日滚动且不带颜色。
///
/// # Returns
/// 文件写入线程的守卫，需在 main 结束前保持存活。
/// 按天滚动的日志文件；目录不可用时返回错误而不是 panic。
fn file_appender(config: &LoggingConfig) -> Result<RollingFileAppender, AppError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(&config.file_prefix)
        .build(&config.dir)
        .map_err(|e| AppError::Init(format!("Failed to open log dir {}: {}", config.dir, e)))
}

fn init_logging(config: &LoggingConfig) -> Result<WorkerGuard, AppError> {
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender(config)?);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .try_init()
        .map_err(|e| AppError::Init(format!("Failed to install tracing subscriber: {}", e)))?;

    Ok(guard)
}

/// # Summary
/// 按任务装配同步器。
///
/// # Logic
/// 1. 打开数据库并初始化表结构。
/// 2. 仅为任务实际需要的环节构建数据源；行情任务缺少 Fyers 凭证时直接失败。
async fn build_runner(config: &AppConfig, job: Job) -> Result<DataloadRunner, AppError> {
    let pool = kura_store::database::connect(Path::new(&config.database.path)).await?;
    let instruments = Arc::new(SqliteInstrumentStore::new(pool.clone()));
    let prices = Arc::new(SqlitePriceStore::new(pool));
    let clock: Arc<dyn TimeProvider> = Arc::new(RealTimeProvider);

    let mut runner = DataloadRunner::new(instruments.clone());

    if matches!(job, Job::Symbols | Job::All) {
        let provider =
            FyersMasterProvider::new(Duration::from_secs(config.fyers.master_timeout_secs))
                .map_err(|e| AppError::Init(e.to_string()))?;
        runner = runner.with_masters(
            InstrumentMasterSync::new(instruments.clone(), clock.clone()),
            Arc::new(provider),
            config.masters.clone(),
        );
    }

    if matches!(job, Job::Prices | Job::All) {
        let (client_id, access_token) = config
            .fyers_credentials()
            .map_err(|e| AppError::Config(e.to_string()))?;
        let provider = FyersHistoryProvider::new(
            &config.fyers.history_url,
            &client_id,
            &access_token,
            Duration::from_secs(config.fyers.request_timeout_secs),
        )
        .map_err(|e| AppError::Init(e.to_string()))?;
        let fetcher = IncrementalHistoryFetcher::new(
            Arc::new(provider),
            prices.clone(),
            clock.clone(),
            Duration::from_millis(config.history.pacing_ms),
            Duration::from_secs(config.history.call_timeout_secs),
        );
        runner = runner.with_prices(
            fetcher,
            PricePlan {
                timeframes: config.history.timeframes.clone(),
                instrument_types: config.history.instrument_types.clone(),
                workers: config.history.workers,
            },
        );
    }

    if matches!(job, Job::Funds | Job::All) {
        let provider = AmfiProvider::new(
            &config.funds.list_url,
            &config.funds.nav_url_template,
            Duration::from_secs(config.funds.request_timeout_secs),
        )
        .map_err(|e| AppError::Init(e.to_string()))?;
        let sync = FundNavSync::new(
            Arc::new(provider),
            InstrumentMasterSync::new(instruments.clone(), clock.clone()),
            prices.clone(),
        );
        runner = runner.with_funds(sync, config.funds.scope(), config.funds.workers);
    }

    Ok(runner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logging(dir: &Path) -> LoggingConfig {
        LoggingConfig {
            dir: dir.display().to_string(),
            ..LoggingConfig::default()
        }
    }

    #[test]
    fn test_file_appender_creates_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("logs");
        assert!(file_appender(&logging(&dir)).is_ok());
        assert!(dir.is_dir());
    }

    #[test]
    fn test_unusable_log_dir_is_init_error() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();

        match file_appender(&logging(&file.join("logs"))) {
            Err(AppError::Init(msg)) => assert!(msg.contains("not-a-dir")),
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }
}
