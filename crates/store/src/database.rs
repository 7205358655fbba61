use kura_core::store::error::StoreError;
use rust_decimal::Decimal;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// # Summary
/// 打开 (必要时创建) 数据库文件并初始化全部表结构。
///
/// # Logic
/// 1. 确保数据库文件所在目录存在。
/// 2. 配置 SQLite 连接选项：`create_if_missing`、WAL、忙等待超时。
/// 3. 连接数据库并执行 DDL 初始化主表、元数据表与各粒度行情表。
///
/// # Arguments
/// * `path` - 数据库文件路径。
///
/// # Returns
/// * `Result<SqlitePool, StoreError>` - 连接池或初始化错误。
pub async fn connect(path: &Path) -> Result<SqlitePool, StoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::InitError(e.to_string()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(10));

    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect_with(options)
        .await
        .map_err(|e| StoreError::InitError(e.to_string()))?;

    init_schema(&pool).await?;
    info!("Database ready at {}", path.display());
    Ok(pool)
}

/// 初始化表结构，可重复执行。
async fn init_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    // 价格字段以 TEXT 存储十进制字面量，避免浮点误差
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS instruments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol TEXT NOT NULL,
            name TEXT NOT NULL,
            instrument_type TEXT NOT NULL,
            exchange TEXT NOT NULL,
            segment TEXT NOT NULL,
            isin TEXT,
            valid_from DATETIME NOT NULL,
            valid_to DATETIME
        );

        CREATE UNIQUE INDEX IF NOT EXISTS uq_instruments_active_symbol
            ON instruments (symbol) WHERE valid_to IS NULL;

        CREATE UNIQUE INDEX IF NOT EXISTS uq_instruments_active_isin
            ON instruments (isin) WHERE valid_to IS NULL AND isin IS NOT NULL;

        CREATE INDEX IF NOT EXISTS ix_instruments_scope
            ON instruments (exchange, segment, valid_to);

        CREATE INDEX IF NOT EXISTS ix_instruments_type
            ON instruments (instrument_type, valid_to);

        CREATE TABLE IF NOT EXISTS instrument_equity_meta (
            instrument_id INTEGER PRIMARY KEY REFERENCES instruments (id),
            lot_size INTEGER NOT NULL,
            tick_size TEXT NOT NULL,
            company_name TEXT
        );

        CREATE TABLE IF NOT EXISTS instrument_derivative_meta (
            instrument_id INTEGER PRIMARY KEY REFERENCES instruments (id),
            underlying_symbol TEXT NOT NULL,
            contract TEXT NOT NULL,
            expiry_date DATE NOT NULL,
            strike_price TEXT,
            option_right TEXT,
            lot_size INTEGER NOT NULL,
            tick_size TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS ix_derivative_underlying
            ON instrument_derivative_meta (underlying_symbol, expiry_date);

        CREATE TABLE IF NOT EXISTS daily_price_history (
            security_id INTEGER NOT NULL REFERENCES instruments (id),
            price_date DATE NOT NULL,
            open TEXT,
            high TEXT,
            low TEXT,
            close TEXT NOT NULL,
            volume INTEGER,
            PRIMARY KEY (security_id, price_date)
        );

        CREATE TABLE IF NOT EXISTS one_minute_history (
            security_id INTEGER NOT NULL REFERENCES instruments (id),
            price_timestamp DATETIME NOT NULL,
            open TEXT NOT NULL,
            high TEXT NOT NULL,
            low TEXT NOT NULL,
            close TEXT NOT NULL,
            volume INTEGER NOT NULL,
            PRIMARY KEY (security_id, price_timestamp)
        );

        CREATE TABLE IF NOT EXISTS aggregated_intraday_history (
            security_id INTEGER NOT NULL REFERENCES instruments (id),
            timeframe TEXT NOT NULL,
            price_timestamp DATETIME NOT NULL,
            open TEXT NOT NULL,
            high TEXT NOT NULL,
            low TEXT NOT NULL,
            close TEXT NOT NULL,
            volume INTEGER NOT NULL,
            PRIMARY KEY (security_id, timeframe, price_timestamp)
        );
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| StoreError::InitError(e.to_string()))?;

    Ok(())
}

/// 解析以 TEXT 存储的十进制字段。
pub(crate) fn parse_decimal(column: &str, raw: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(raw)
        .map_err(|e| StoreError::Database(format!("Corrupt decimal in {}: {} ({})", column, raw, e)))
}

pub(crate) fn parse_optional_decimal(
    column: &str,
    raw: Option<String>,
) -> Result<Option<Decimal>, StoreError> {
    raw.map(|s| parse_decimal(column, &s)).transpose()
}
