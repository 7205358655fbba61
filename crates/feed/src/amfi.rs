use crate::{http_client, transport_error};
use async_trait::async_trait;
use chrono::NaiveDate;
use kura_core::instrument::entity::RawInstrument;
use kura_core::market::entity::NavPoint;
use kura_core::market::error::MarketError;
use kura_core::market::port::FundDataProvider;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// # Summary
/// AMFI 公募基金数据源 (mfapi 格式)。
///
/// # Invariants
/// - 基金代码即主表中的交易代码。
pub struct AmfiProvider {
    client: Client,
    list_url: String,
    nav_url_template: String,
    timeout: Duration,
}

impl AmfiProvider {
    /// # Arguments
    /// * `list_url`: 基金列表地址。
    /// * `nav_url_template`: 净值历史地址模板，含 `{scheme_code}` 占位符。
    /// * `timeout`: 单次请求超时。
    pub fn new(
        list_url: &str,
        nav_url_template: &str,
        timeout: Duration,
    ) -> Result<Self, MarketError> {
        Ok(Self {
            client: http_client(timeout)?,
            list_url: list_url.to_string(),
            nav_url_template: nav_url_template.to_string(),
            timeout,
        })
    }
}

fn nav_url(template: &str, scheme_code: &str) -> String {
    template.replace("{scheme_code}", scheme_code)
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FundRecord {
    #[serde(default)]
    scheme_code: Value,
    scheme_name: Option<String>,
    isin_growth: Option<String>,
    isin_div_reinvestment: Option<String>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct NavHistory {
    #[serde(default)]
    data: Vec<NavEntry>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct NavEntry {
    date: Option<String>,
    nav: Option<Value>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn scheme_code_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    }
}

/// # Summary
/// 将基金列表映射为以基金代码为键的原始记录。
///
/// # Logic
/// 1. 基金代码可为数字或字符串，缺失时跳过。
/// 2. 缺少名称时跳过。
/// 3. ISIN 优先取成长型，其次取红利再投资型。
pub(crate) fn parse_fund_list(funds: Vec<FundRecord>) -> BTreeMap<String, RawInstrument> {
    let mut records = BTreeMap::new();
    for fund in funds {
        let Some(code) = scheme_code_text(&fund.scheme_code) else {
            warn!("Skipping fund without usable schemeCode: {}", fund.scheme_code);
            continue;
        };
        let Some(name) = non_empty(fund.scheme_name) else {
            warn!("Skipping fund {} without schemeName", code);
            continue;
        };
        records.insert(
            code,
            RawInstrument {
                name,
                isin: non_empty(fund.isin_growth).or(non_empty(fund.isin_div_reinvestment)),
                ..RawInstrument::default()
            },
        );
    }
    records
}

fn parse_nav_entry(entry: &NavEntry) -> Option<NavPoint> {
    let date = NaiveDate::parse_from_str(entry.date.as_deref()?, "%d-%m-%Y").ok()?;
    let nav = match entry.nav.as_ref()? {
        Value::String(s) => Decimal::from_str(s.trim()).ok()?,
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok()?,
        _ => return None,
    };
    Some(NavPoint { date, nav })
}

/// # Summary
/// 解析净值历史，格式错误的条目告警后跳过。
pub(crate) fn parse_nav_history(scheme_code: &str, history: NavHistory) -> Vec<NavPoint> {
    history
        .data
        .iter()
        .filter_map(|entry| {
            let point = parse_nav_entry(entry);
            if point.is_none() {
                warn!("Could not parse NAV entry for {}: {:?}", scheme_code, entry);
            }
            point
        })
        .collect()
}

#[async_trait]
impl FundDataProvider for AmfiProvider {
    async fn fetch_fund_list(&self) -> Result<BTreeMap<String, RawInstrument>, MarketError> {
        let resp = self
            .client
            .get(&self.list_url)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        if !resp.status().is_success() {
            return Err(MarketError::Network(format!("HTTP {}", resp.status())));
        }

        let funds: Vec<FundRecord> = resp
            .json()
            .await
            .map_err(|e| MarketError::Parse(e.to_string()))?;
        debug!("Fetched {} funds from {}", funds.len(), self.list_url);

        Ok(parse_fund_list(funds))
    }

    /// # Summary
    /// 获取单只基金的完整净值历史。
    ///
    /// # Logic
    /// 1. 以基金代码填充地址模板并请求。
    /// 2. 空响应体视为无数据。
    /// 3. 解析 `data` 数组，跳过格式错误的条目。
    async fn fetch_nav_history(&self, scheme_code: &str) -> Result<Vec<NavPoint>, MarketError> {
        let resp = self
            .client
            .get(nav_url(&self.nav_url_template, scheme_code))
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;

        if !resp.status().is_success() {
            return Err(MarketError::Network(format!("HTTP {}", resp.status())));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| transport_error(e, self.timeout))?;
        if body.trim().is_empty() {
            warn!("Received empty NAV response for scheme {}", scheme_code);
            return Ok(Vec::new());
        }

        let history: NavHistory =
            serde_json::from_str(&body).map_err(|e| MarketError::Parse(e.to_string()))?;
        Ok(parse_nav_history(scheme_code, history))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_fund_list_prefers_growth_isin() {
        let funds: Vec<FundRecord> = serde_json::from_value(json!([
            {"schemeCode": 119551, "schemeName": "Alpha Fund - Growth",
             "isinGrowth": "INF209KA12Z1", "isinDivReinvestment": "INF209KA13Z9"},
            {"schemeCode": "100027", "schemeName": "Beta Fund - IDCW",
             "isinGrowth": null, "isinDivReinvestment": "INF200K01180"},
            {"schemeCode": 100028, "schemeName": "", "isinGrowth": null},
            {"schemeCode": null, "schemeName": "Ghost Fund"}
        ]))
        .unwrap();

        let records = parse_fund_list(funds);
        assert_eq!(records.len(), 2);
        assert_eq!(records["119551"].isin.as_deref(), Some("INF209KA12Z1"));
        assert_eq!(records["100027"].isin.as_deref(), Some("INF200K01180"));
        assert_eq!(records["100027"].name, "Beta Fund - IDCW");
        assert_eq!(records["100027"].lot_size, None);
    }

    #[test]
    fn test_parse_nav_history_skips_malformed() {
        let history: NavHistory = serde_json::from_value(json!({
            "meta": {"scheme_code": 119551},
            "data": [
                {"date": "03-01-2026", "nav": "45.67890"},
                {"date": "2026-01-02", "nav": "45.1"},
                {"date": "01-01-2026", "nav": "N.A."},
                {"date": "31-12-2025", "nav": 44.5}
            ],
            "status": "SUCCESS"
        }))
        .unwrap();

        let points = parse_nav_history("119551", history);
        assert_eq!(
            points,
            vec![
                NavPoint {
                    date: NaiveDate::from_ymd_opt(2026, 1, 3).unwrap(),
                    nav: dec!(45.67890),
                },
                NavPoint {
                    date: NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
                    nav: dec!(44.5),
                },
            ]
        );
    }

    #[test]
    fn test_nav_url_template() {
        assert_eq!(
            nav_url("https://api.mfapi.in/mf/{scheme_code}", "119551"),
            "https://api.mfapi.in/mf/119551"
        );
    }
}
