use crate::error::SyncError;
use crate::master::{InstrumentMasterSync, SyncReport};
use kura_core::common::time::{exchange_date, exchange_midnight};
use kura_core::common::{SecurityRef, Series};
use kura_core::instrument::entity::MasterScope;
use kura_core::market::entity::PriceBar;
use kura_core::market::port::FundDataProvider;
use kura_core::store::port::PriceStore;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// # Summary
/// 公募基金同步器：维护基金主表，并按净值历史补齐日线收盘价。
///
/// # Invariants
/// - 净值只写入日线序列，开高低与成交量为空。
/// - 不写入检查点当日及之前的净值。
pub struct FundNavSync {
    provider: Arc<dyn FundDataProvider>,
    master: InstrumentMasterSync,
    store: Arc<dyn PriceStore>,
}

impl FundNavSync {
    pub fn new(
        provider: Arc<dyn FundDataProvider>,
        master: InstrumentMasterSync,
        store: Arc<dyn PriceStore>,
    ) -> Self {
        Self {
            provider,
            master,
            store,
        }
    }

    /// # Summary
    /// 拉取基金列表并按基金主表规则对账。
    pub async fn sync_master(&self, scope: &MasterScope) -> Result<SyncReport, SyncError> {
        let funds = self.provider.fetch_fund_list().await?;
        info!("Fetched {} funds for {}", funds.len(), scope);
        Ok(self.master.reconcile(&funds, scope).await?)
    }

    /// # Summary
    /// 补齐一只基金的净值历史。
    ///
    /// # Logic
    /// 1. 检查点取日线最大日期。
    /// 2. 拉取完整净值序列，失败时记录日志并返回 0。
    /// 3. 仅保留检查点之后的日期，按日期去重并升序。
    /// 4. 以仅含收盘价的日线写入。
    ///
    /// # Arguments
    /// * `fund`: 基金主表行，代码即基金代码。
    ///
    /// # Returns
    /// 实际写入的条数；检查点读取或落库失败时返回错误。
    pub async fn sync_nav(&self, fund: &SecurityRef) -> Result<u64, SyncError> {
        let last_date = self
            .store
            .max_timestamp(fund.id, Series::Daily)
            .await?
            .map(exchange_date);

        let points = match self.provider.fetch_nav_history(&fund.symbol).await {
            Ok(points) => points,
            Err(e) => {
                warn!("Failed to fetch NAV history for {}: {}", fund.symbol, e);
                return Ok(0);
            }
        };

        let fresh: BTreeMap<_, _> = points
            .into_iter()
            .filter(|p| last_date.is_none_or(|d| p.date > d))
            .map(|p| (p.date, p.nav))
            .collect();
        if fresh.is_empty() {
            debug!("No new NAV entries for {}", fund.symbol);
            return Ok(0);
        }

        let bars: Vec<PriceBar> = fresh
            .into_iter()
            .map(|(date, nav)| PriceBar {
                security_id: fund.id,
                timestamp: exchange_midnight(date),
                open: None,
                high: None,
                low: None,
                close: nav,
                volume: None,
            })
            .collect();

        let written = self.store.bulk_insert(Series::Daily, &bars).await?;
        debug!("Stored {} NAV entries for {}", written, fund.symbol);
        Ok(written)
    }
}
