use crate::{http_client, transport_error};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kura_core::common::Timeframe;
use kura_core::instrument::entity::RawInstrument;
use kura_core::market::entity::RawBar;
use kura_core::market::error::MarketError;
use kura_core::market::port::{HistoryProvider, MasterListProvider};
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

/// # Summary
/// Fyers 主表文件下载器，公开文件无需鉴权。
pub struct FyersMasterProvider {
    client: Client,
    timeout: Duration,
}

impl FyersMasterProvider {
    /// # Summary
    /// 创建主表下载器。
    ///
    /// # Arguments
    /// * `timeout`: 单次下载的整体超时，主表文件较大，通常远长于行情请求。
    pub fn new(timeout: Duration) -> Result<Self, MarketError> {
        Ok(Self {
            client: http_client(timeout)?,
            timeout,
        })
    }
}

/// # Summary
/// Fyers 主表单条记录，字段名沿用文件原样。
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct MasterRecord {
    symbol_details: Option<String>,
    isin: Option<String>,
    min_lot_size: Option<i64>,
    tick_size: Option<Decimal>,
    under_sym: Option<String>,
    opt_type: Option<String>,
    // 字符串或数字形式的 epoch 秒
    expiry_date: Option<Value>,
    strike_price: Option<Decimal>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn expiry_text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) => non_empty(Some(s)),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// # Summary
/// 将主表文件映射为数据源无关的原始记录。
///
/// # Logic
/// 1. 逐条反序列化，结构不合法的记录记录告警后跳过。
/// 2. 缺少名称的记录跳过。
/// 3. 空字符串字段视为缺失。
pub(crate) fn parse_master(raw: BTreeMap<String, Value>) -> BTreeMap<String, RawInstrument> {
    let mut records = BTreeMap::new();
    for (symbol, value) in raw {
        let record: MasterRecord = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                warn!("Skipping malformed master record {}: {}", symbol, e);
                continue;
            }
        };
        let Some(name) = non_empty(record.symbol_details) else {
            warn!("Skipping master record {} without symbolDetails", symbol);
            continue;
        };
        records.insert(
            symbol,
            RawInstrument {
                name,
                isin: non_empty(record.isin),
                lot_size: record.min_lot_size,
                tick_size: record.tick_size,
                underlying: non_empty(record.under_sym),
                option_type: non_empty(record.opt_type),
                expiry: expiry_text(record.expiry_date),
                strike: record.strike_price,
            },
        );
    }
    records
}

#[async_trait]
impl MasterListProvider for FyersMasterProvider {
    /// # Summary
    /// 下载并解析 Fyers 主表文件。
    ///
    /// # Logic
    /// 1. 请求文件 URL，非 2xx 视为网络错误。
    /// 2. 顶层必须是以代码为键的 JSON 对象。
    /// 3. 逐条映射为 `RawInstrument`。
    async fn fetch_instrument_list(
        &self,
        url: &str,
    ) -> Result<BTreeMap<String, RawInstrument>, MarketError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        if !resp.status().is_success() {
            return Err(MarketError::Network(format!("HTTP {} for {}", resp.status(), url)));
        }

        let raw: BTreeMap<String, Value> = resp
            .json()
            .await
            .map_err(|e| MarketError::Parse(e.to_string()))?;
        debug!("Downloaded {} master records from {}", raw.len(), url);

        Ok(parse_master(raw))
    }
}

/// # Summary
/// Fyers 历史 K 线接口。
///
/// # Invariants
/// - 每个请求都携带 `client_id:access_token` 形式的鉴权头。
pub struct FyersHistoryProvider {
    client: Client,
    history_url: String,
    authorization: String,
    timeout: Duration,
}

impl FyersHistoryProvider {
    pub fn new(
        history_url: &str,
        client_id: &str,
        access_token: &str,
        timeout: Duration,
    ) -> Result<Self, MarketError> {
        Ok(Self {
            client: http_client(timeout)?,
            history_url: history_url.to_string(),
            authorization: format!("{}:{}", client_id, access_token),
            timeout,
        })
    }
}

/// Fyers 识别的分辨率参数。
pub(crate) fn resolution(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::Minute1 => "1",
        Timeframe::Minute5 => "5",
        Timeframe::Minute15 => "15",
        Timeframe::Hour1 => "60",
        Timeframe::Day1 => "D",
    }
}

/// # Summary
/// 历史接口响应。`candles` 每项为 `[epoch, open, high, low, close, volume]`。
#[derive(Deserialize, Debug)]
pub(crate) struct HistoryResponse {
    s: String,
    #[serde(default)]
    candles: Vec<(i64, Decimal, Decimal, Decimal, Decimal, Decimal)>,
    #[serde(default)]
    message: Option<String>,
}

/// # Summary
/// 将历史接口响应转换为原始 K 线。
///
/// # Logic
/// 1. `ok` 返回全部 K 线，`no_data` 返回空列表。
/// 2. 其他状态映射为 `MarketError::Unknown`，携带接口给出的消息。
/// 3. 成交量取整，超出 i64 范围的行跳过。
pub(crate) fn parse_history(resp: HistoryResponse) -> Result<Vec<RawBar>, MarketError> {
    match resp.s.as_str() {
        "ok" => Ok(resp
            .candles
            .into_iter()
            .filter_map(|(epoch, open, high, low, close, volume)| {
                let volume = volume.trunc().to_i64();
                if volume.is_none() {
                    warn!("Dropping candle at {} with unrepresentable volume", epoch);
                }
                Some(RawBar {
                    epoch,
                    open,
                    high,
                    low,
                    close,
                    volume: volume?,
                })
            })
            .collect()),
        "no_data" => Ok(Vec::new()),
        other => Err(MarketError::Unknown(format!(
            "Fyers status {}: {}",
            other,
            resp.message.unwrap_or_default()
        ))),
    }
}

#[async_trait]
impl HistoryProvider for FyersHistoryProvider {
    /// # Summary
    /// 从 Fyers 拉取一个时间窗口的历史 K 线。
    ///
    /// # Logic
    /// 1. 映射周期为 Fyers 分辨率。
    /// 2. 以 epoch 秒传递窗口边界 (`date_format=0`)，期货请求连续合约 (`cont_flag=1`)。
    /// 3. 解析响应状态与 K 线数组。
    ///
    /// # Arguments
    /// * `symbol`: 交易代码。
    /// * `timeframe`: 周期。
    /// * `from`: 窗口开始。
    /// * `to`: 窗口结束。
    ///
    /// # Returns
    /// 成功返回 K 线列表，失败返回 MarketError。
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<RawBar>, MarketError> {
        let range_from = from.timestamp().to_string();
        let range_to = to.timestamp().to_string();
        let resp = self
            .client
            .get(&self.history_url)
            .header(reqwest::header::AUTHORIZATION, &self.authorization)
            .query(&[
                ("symbol", symbol),
                ("resolution", resolution(timeframe)),
                ("date_format", "0"),
                ("range_from", range_from.as_str()),
                ("range_to", range_to.as_str()),
                ("cont_flag", "1"),
            ])
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        if !resp.status().is_success() {
            return Err(MarketError::Network(format!("HTTP {}", resp.status())));
        }

        let body: HistoryResponse = resp
            .json()
            .await
            .map_err(|e| MarketError::Parse(e.to_string()))?;

        parse_history(body)
    }
}
