use config::{Config, Environment, File};
use kura_core::config::AppConfig;
use std::path::Path;

/// 未显式指定时尝试读取的配置文件。
pub const DEFAULT_CONFIG_PATH: &str = "config/kura.toml";

/// 环境变量前缀，例如 `KURA__FYERS__ACCESS_TOKEN`。
const ENV_PREFIX: &str = "KURA";

/// # Summary
/// 按 "内置默认值 → 配置文件 → 环境变量" 的优先级加载配置。
///
/// # Arguments
/// * `path`: 显式指定的配置文件；指定时文件必须存在，否则读取可选的默认文件。
///
/// # Returns
/// 合并后的配置，任何来源解析失败均返回错误。
pub fn load(path: Option<&Path>) -> Result<AppConfig, config::ConfigError> {
    let file = match path {
        Some(p) => File::from(p).required(true),
        None => File::with_name(DEFAULT_CONFIG_PATH).required(false),
    };

    Config::builder()
        .add_source(Config::try_from(&AppConfig::default())?)
        .add_source(file)
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?
        .try_deserialize()
}
