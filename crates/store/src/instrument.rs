use crate::database::{parse_decimal, parse_optional_decimal};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use kura_core::instrument::entity::{
    ContractKind, DerivativeMeta, EquityMeta, Instrument, InstrumentMeta, InstrumentType,
    MasterChangeset, NewInstrument, OptionRight,
};
use kura_core::store::error::StoreError;
use kura_core::store::port::InstrumentStore;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::debug;

type InstrumentRow = (
    i64,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

const INSTRUMENT_COLUMNS: &str =
    "id, symbol, name, instrument_type, exchange, segment, isin, valid_from, valid_to";

/// InstrumentStore 的 SQLite 实现。
///
/// # Summary
/// 以 SCD2 方式维护证券主表：版本行只关闭不删除，附属元数据随版本行一同写入。
///
/// # Invariants
/// * 活跃代码与活跃 ISIN 的唯一性由部分唯一索引保证。
/// * 每个变更集在一个事务内提交。
pub struct SqliteInstrumentStore {
    pool: SqlitePool,
}

impl SqliteInstrumentStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn into_instrument(row: InstrumentRow) -> Result<Instrument, StoreError> {
    let instrument_type = InstrumentType::from_str(&row.3).map_err(StoreError::Database)?;
    Ok(Instrument {
        id: row.0,
        symbol: row.1,
        name: row.2,
        instrument_type,
        exchange: row.4,
        segment: row.5,
        isin: row.6,
        valid_from: row.7,
        valid_to: row.8,
    })
}

/// 关闭某代码的活跃版本行，返回受影响行数。
async fn close_active(
    conn: &mut SqliteConnection,
    symbol: &str,
    at: DateTime<Utc>,
) -> Result<u64, StoreError> {
    let result = sqlx::query("UPDATE instruments SET valid_to = ? WHERE symbol = ? AND valid_to IS NULL")
        .bind(at)
        .bind(symbol)
        .execute(&mut *conn)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
    Ok(result.rows_affected())
}

/// # Summary
/// 插入一个新版本行及其附属元数据。
///
/// # Logic
/// 1. 写入 `instruments`，取得自增行号。
/// 2. 按元数据类别写入股票或衍生品元数据表。
async fn insert_version(
    conn: &mut SqliteConnection,
    new: &NewInstrument,
    at: DateTime<Utc>,
) -> Result<i64, StoreError> {
    let id = sqlx::query(
        r#"
        INSERT INTO instruments (symbol, name, instrument_type, exchange, segment, isin, valid_from, valid_to)
        VALUES (?, ?, ?, ?, ?, ?, ?, NULL)
        "#,
    )
    .bind(&new.symbol)
    .bind(&new.name)
    .bind(new.instrument_type.as_str())
    .bind(&new.exchange)
    .bind(&new.segment)
    .bind(&new.isin)
    .bind(at)
    .execute(&mut *conn)
    .await
    .map_err(|e| StoreError::Database(format!("{} ({})", e, new.symbol)))?
    .last_insert_rowid();

    match &new.meta {
        Some(InstrumentMeta::Equity(meta)) => {
            sqlx::query(
                "INSERT INTO instrument_equity_meta (instrument_id, lot_size, tick_size, company_name) VALUES (?, ?, ?, ?)",
            )
            .bind(id)
            .bind(meta.lot_size)
            .bind(meta.tick_size.to_string())
            .bind(&meta.company_name)
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        }
        Some(InstrumentMeta::Derivative(meta)) => {
            sqlx::query(
                r#"
                INSERT INTO instrument_derivative_meta
                    (instrument_id, underlying_symbol, contract, expiry_date, strike_price, option_right, lot_size, tick_size)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(id)
            .bind(&meta.underlying_symbol)
            .bind(meta.contract.as_str())
            .bind(meta.expiry_date)
            .bind(meta.strike_price.map(|d| d.to_string()))
            .bind(meta.option_right.map(|r| r.as_str()))
            .bind(meta.lot_size)
            .bind(meta.tick_size.to_string())
            .execute(&mut *conn)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        }
        None => {}
    }

    Ok(id)
}

#[async_trait]
impl InstrumentStore for SqliteInstrumentStore {
    async fn active_instruments(
        &self,
        exchange: &str,
        segment: &str,
    ) -> Result<Vec<Instrument>, StoreError> {
        let sql = format!(
            "SELECT {} FROM instruments WHERE exchange = ? AND segment = ? AND valid_to IS NULL",
            INSTRUMENT_COLUMNS
        );
        sqlx::query_as::<_, InstrumentRow>(&sql)
            .bind(exchange)
            .bind(segment)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .into_iter()
            .map(into_instrument)
            .collect()
    }

    async fn active_isins(&self) -> Result<HashMap<String, String>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT isin, symbol FROM instruments WHERE valid_to IS NULL AND isin IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(rows.into_iter().collect())
    }

    /// # Summary
    /// 在单个事务内应用变更集。
    ///
    /// # Logic
    /// 1. 开启事务。
    /// 2. 关闭下线代码。
    /// 3. 修订：关闭旧版本后插入新版本。
    /// 4. 插入新增代码。
    /// 5. 提交；中途返回错误时事务随 `tx` 释放而回滚。
    async fn apply_changeset(&self, changeset: &MasterChangeset) -> Result<(), StoreError> {
        let at = changeset.effective_at;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        for symbol in &changeset.closures {
            let closed = close_active(&mut tx, symbol, at).await?;
            debug!("Closed {} active row(s) for {}", closed, symbol);
        }

        for revision in &changeset.revisions {
            close_active(&mut tx, &revision.symbol, at).await?;
            insert_version(&mut tx, revision, at).await?;
        }

        for addition in &changeset.additions {
            insert_version(&mut tx, addition, at).await?;
        }

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(())
    }

    async fn active_by_types(
        &self,
        types: &[InstrumentType],
    ) -> Result<Vec<Instrument>, StoreError> {
        if types.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM instruments WHERE valid_to IS NULL AND instrument_type IN (",
            INSTRUMENT_COLUMNS
        ));
        let mut separated = builder.separated(", ");
        for t in types {
            separated.push_bind(t.as_str());
        }
        separated.push_unseparated(") ORDER BY symbol ASC");

        builder
            .build_query_as::<InstrumentRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .into_iter()
            .map(into_instrument)
            .collect()
    }

    async fn instrument_versions(&self, symbol: &str) -> Result<Vec<Instrument>, StoreError> {
        let sql = format!(
            "SELECT {} FROM instruments WHERE symbol = ? ORDER BY valid_from ASC, id ASC",
            INSTRUMENT_COLUMNS
        );
        sqlx::query_as::<_, InstrumentRow>(&sql)
            .bind(symbol)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .into_iter()
            .map(into_instrument)
            .collect()
    }

    /// # Summary
    /// 查询版本行的附属元数据。
    ///
    /// # Logic
    /// 1. 先查股票元数据表。
    /// 2. 未命中再查衍生品元数据表。
    async fn instrument_meta(
        &self,
        instrument_id: i64,
    ) -> Result<Option<InstrumentMeta>, StoreError> {
        let equity = sqlx::query_as::<_, (i64, String, Option<String>)>(
            "SELECT lot_size, tick_size, company_name FROM instrument_equity_meta WHERE instrument_id = ?",
        )
        .bind(instrument_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if let Some(r) = equity {
            return Ok(Some(InstrumentMeta::Equity(EquityMeta {
                lot_size: r.0,
                tick_size: parse_decimal("tick_size", &r.1)?,
                company_name: r.2,
            })));
        }

        let derivative = sqlx::query_as::<
            _,
            (String, String, NaiveDate, Option<String>, Option<String>, i64, String),
        >(
            r#"
            SELECT underlying_symbol, contract, expiry_date, strike_price, option_right, lot_size, tick_size
            FROM instrument_derivative_meta
            WHERE instrument_id = ?
            "#,
        )
        .bind(instrument_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        derivative
            .map(|r| {
                Ok(InstrumentMeta::Derivative(DerivativeMeta {
                    underlying_symbol: r.0,
                    contract: ContractKind::from_str(&r.1).map_err(StoreError::Database)?,
                    expiry_date: r.2,
                    strike_price: parse_optional_decimal("strike_price", r.3)?,
                    option_right: r
                        .4
                        .as_deref()
                        .map(OptionRight::from_str)
                        .transpose()
                        .map_err(StoreError::Database)?,
                    lot_size: r.5,
                    tick_size: parse_decimal("tick_size", &r.6)?,
                }))
            })
            .transpose()
    }
}
