use crate::common::Timeframe;
use crate::instrument::entity::{InstrumentType, MasterKind, MasterScope};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 配置校验错误，属于启动期致命错误。
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub fyers: FyersConfig,
    pub masters: Vec<MasterFileConfig>,
    pub history: HistoryConfig,
    pub funds: FundConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub dir: String,
    pub file_prefix: String,
}

/// Fyers 接口配置，凭证通常来自环境变量。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FyersConfig {
    pub history_url: String,
    pub client_id: Option<String>,
    pub access_token: Option<String>,
    pub request_timeout_secs: u64,
    pub master_timeout_secs: u64,
}

/// 单份主表文件的下载地址与对账范围。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterFileConfig {
    pub key: String,
    pub url: String,
    pub exchange: String,
    pub segment: String,
    pub kind: MasterKind,
}

impl MasterFileConfig {
    pub fn scope(&self) -> MasterScope {
        MasterScope {
            exchange: self.exchange.clone(),
            segment: self.segment.clone(),
            kind: self.kind,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub timeframes: Vec<Timeframe>,
    pub instrument_types: Vec<InstrumentType>,
    // 相邻两次远程调用之间的间隔
    pub pacing_ms: u64,
    pub call_timeout_secs: u64,
    // 并发处理的证券数
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FundConfig {
    pub list_url: String,
    // 含 `{scheme_code}` 占位符
    pub nav_url_template: String,
    pub exchange: String,
    pub segment: String,
    pub request_timeout_secs: u64,
    pub workers: usize,
}

impl FundConfig {
    pub fn scope(&self) -> MasterScope {
        MasterScope {
            exchange: self.exchange.clone(),
            segment: self.segment.clone(),
            kind: MasterKind::MutualFund,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "data/kura.db".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: "logs".to_string(),
            file_prefix: "kura.log".to_string(),
        }
    }
}

impl Default for FyersConfig {
    fn default() -> Self {
        Self {
            history_url: "https://api-t1.fyers.in/data/history".to_string(),
            client_id: None,
            access_token: None,
            request_timeout_secs: 10,
            master_timeout_secs: 60,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            timeframes: vec![Timeframe::Day1, Timeframe::Minute1],
            instrument_types: vec![
                InstrumentType::Equity,
                InstrumentType::Future,
                InstrumentType::Etf,
                InstrumentType::Index,
            ],
            pacing_ms: 500,
            call_timeout_secs: 30,
            workers: 1,
        }
    }
}

impl Default for FundConfig {
    fn default() -> Self {
        Self {
            list_url: "https://api.mfapi.in/mf".to_string(),
            nav_url_template: "https://api.mfapi.in/mf/{scheme_code}".to_string(),
            exchange: "AMFI".to_string(),
            segment: "MF".to_string(),
            request_timeout_secs: 30,
            workers: 1,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            fyers: FyersConfig::default(),
            masters: vec![
                MasterFileConfig {
                    key: "nse_cm".to_string(),
                    url: "https://public.fyers.in/sym_details/NSE_CM_sym_master.json".to_string(),
                    exchange: "NSE".to_string(),
                    segment: "CM".to_string(),
                    kind: MasterKind::CapitalMarket,
                },
                MasterFileConfig {
                    key: "nse_fo".to_string(),
                    url: "https://public.fyers.in/sym_details/NSE_FO_sym_master.json".to_string(),
                    exchange: "NSE".to_string(),
                    segment: "FO".to_string(),
                    kind: MasterKind::Derivative,
                },
            ],
            history: HistoryConfig::default(),
            funds: FundConfig::default(),
        }
    }
}

impl AppConfig {
    /// # Summary
    /// 校验访问 Fyers 历史接口所需的凭证。
    ///
    /// # Returns
    /// 成功返回 (client_id, access_token)，缺失或为空时返回 `ConfigError::Missing`。
    pub fn fyers_credentials(&self) -> Result<(String, String), ConfigError> {
        let client_id = self
            .fyers
            .client_id
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("fyers.client_id"))?;
        let access_token = self
            .fyers
            .access_token
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("fyers.access_token"))?;
        Ok((client_id.to_string(), access_token.to_string()))
    }

    /// # Summary
    /// 校验与凭证无关的基础配置。
    ///
    /// # Logic
    /// 1. 并发度必须大于 0。
    /// 2. 各类超时必须大于 0 秒。
    /// 3. 基金净值地址模板必须包含 `{scheme_code}`。
    /// 4. 主表文件的 key 不得重复。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history.workers == 0 {
            return Err(ConfigError::Invalid {
                key: "history.workers",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.funds.workers == 0 {
            return Err(ConfigError::Invalid {
                key: "funds.workers",
                reason: "must be at least 1".to_string(),
            });
        }
        let timeouts = [
            ("history.call_timeout_secs", self.history.call_timeout_secs),
            ("fyers.request_timeout_secs", self.fyers.request_timeout_secs),
            ("fyers.master_timeout_secs", self.fyers.master_timeout_secs),
            ("funds.request_timeout_secs", self.funds.request_timeout_secs),
        ];
        if let Some(&(key, _)) = timeouts.iter().find(|(_, secs)| *secs == 0) {
            return Err(ConfigError::Invalid {
                key,
                reason: "must be at least 1 second".to_string(),
            });
        }
        if !self.funds.nav_url_template.contains("{scheme_code}") {
            return Err(ConfigError::Invalid {
                key: "funds.nav_url_template",
                reason: "missing {scheme_code} placeholder".to_string(),
            });
        }
        let mut keys: Vec<&str> = self.masters.iter().map(|m| m.key.as_str()).collect();
        keys.sort_unstable();
        if let Some(pair) = keys.windows(2).find(|w| w[0] == w[1]) {
            return Err(ConfigError::Invalid {
                key: "masters",
                reason: format!("duplicate key {}", pair[0]),
            });
        }
        Ok(())
    }
}
