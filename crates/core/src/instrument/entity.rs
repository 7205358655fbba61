use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// # Summary
/// 证券品种类型。
///
/// # Invariants
/// - 序列化与落库均使用 SCREAMING_SNAKE_CASE 字面量 (例如: `PREFERENCE_SHARE`)。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstrumentType {
    Equity,
    Index,
    Etf,
    Future,
    Option,
    Bond,
    Mf,
    Reit,
    Invit,
    Sgb,
    Gsec,
    PreferenceShare,
    Rights,
    Warrant,
    Unknown,
}

impl InstrumentType {
    pub const ALL: [InstrumentType; 15] = [
        InstrumentType::Equity,
        InstrumentType::Index,
        InstrumentType::Etf,
        InstrumentType::Future,
        InstrumentType::Option,
        InstrumentType::Bond,
        InstrumentType::Mf,
        InstrumentType::Reit,
        InstrumentType::Invit,
        InstrumentType::Sgb,
        InstrumentType::Gsec,
        InstrumentType::PreferenceShare,
        InstrumentType::Rights,
        InstrumentType::Warrant,
        InstrumentType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentType::Equity => "EQUITY",
            InstrumentType::Index => "INDEX",
            InstrumentType::Etf => "ETF",
            InstrumentType::Future => "FUTURE",
            InstrumentType::Option => "OPTION",
            InstrumentType::Bond => "BOND",
            InstrumentType::Mf => "MF",
            InstrumentType::Reit => "REIT",
            InstrumentType::Invit => "INVIT",
            InstrumentType::Sgb => "SGB",
            InstrumentType::Gsec => "GSEC",
            InstrumentType::PreferenceShare => "PREFERENCE_SHARE",
            InstrumentType::Rights => "RIGHTS",
            InstrumentType::Warrant => "WARRANT",
            InstrumentType::Unknown => "UNKNOWN",
        }
    }

    /// 是否为衍生品 (期货或期权)。
    pub fn is_derivative(&self) -> bool {
        matches!(self, InstrumentType::Future | InstrumentType::Option)
    }
}

impl FromStr for InstrumentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InstrumentType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown InstrumentType: {}", s))
    }
}

impl std::fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// # Summary
/// 证券主表记录 (SCD2 版本行)。
///
/// # Invariants
/// - 同一 `symbol` 任意时刻最多一行 `valid_to` 为 None。
/// - `isin` 存在时，在活跃行中唯一。
/// - `valid_to` 一旦写入，该版本不可再修改。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    // 版本行号
    pub id: i64,
    // 交易代码
    pub symbol: String,
    // 展示名称
    pub name: String,
    // 品种类型
    pub instrument_type: InstrumentType,
    // 交易所 (例如: NSE)
    pub exchange: String,
    // 市场分段 (例如: CM, FO)
    pub segment: String,
    // 国际证券识别码
    pub isin: Option<String>,
    // 生效时间 (含)
    pub valid_from: DateTime<Utc>,
    // 失效时间 (不含)，None 表示当前有效
    pub valid_to: Option<DateTime<Utc>>,
}

impl Instrument {
    pub fn is_active(&self) -> bool {
        self.valid_to.is_none()
    }
}

/// # Summary
/// 股票类附属元数据，与活跃版本行一一对应。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquityMeta {
    pub lot_size: i64,
    pub tick_size: Decimal,
    pub company_name: Option<String>,
}

/// 衍生品合约类别。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractKind {
    #[serde(rename = "FUT")]
    Future,
    #[serde(rename = "OPT")]
    Option,
}

impl ContractKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractKind::Future => "FUT",
            ContractKind::Option => "OPT",
        }
    }
}

impl FromStr for ContractKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FUT" => Ok(ContractKind::Future),
            "OPT" => Ok(ContractKind::Option),
            _ => Err(format!("Unknown ContractKind: {}", s)),
        }
    }
}

/// 期权方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionRight {
    #[serde(rename = "CE")]
    Call,
    #[serde(rename = "PE")]
    Put,
}

impl OptionRight {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptionRight::Call => "CE",
            OptionRight::Put => "PE",
        }
    }
}

impl FromStr for OptionRight {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CE" => Ok(OptionRight::Call),
            "PE" => Ok(OptionRight::Put),
            _ => Err(format!("Unknown OptionRight: {}", s)),
        }
    }
}

/// # Summary
/// 期货期权附属元数据。
///
/// # Invariants
/// - `expiry_date` 解析入库后不可变。
/// - 仅期权拥有 `strike_price` 与 `option_right`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivativeMeta {
    pub underlying_symbol: String,
    pub contract: ContractKind,
    pub expiry_date: NaiveDate,
    pub strike_price: Option<Decimal>,
    pub option_right: Option<OptionRight>,
    pub lot_size: i64,
    pub tick_size: Decimal,
}

/// 附属元数据，随父版本行原子创建，创建后不再修改。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentMeta {
    Equity(EquityMeta),
    Derivative(DerivativeMeta),
}

/// # Summary
/// 数据源返回的原始主表记录，与具体数据源格式无关。
///
/// # Invariants
/// - 除 `name` 外所有字段均可能缺失，由同步逻辑按品种判定是否可用。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawInstrument {
    // 展示名称
    pub name: String,
    // 国际证券识别码
    pub isin: Option<String>,
    // 最小交易单位
    pub lot_size: Option<i64>,
    // 最小变动价位
    pub tick_size: Option<Decimal>,
    // 衍生品标的代码
    pub underlying: Option<String>,
    // 衍生品类型代码 (XX / CE / PE)
    pub option_type: Option<String>,
    // 到期时间 (epoch 秒的字符串形式)
    pub expiry: Option<String>,
    // 行权价
    pub strike: Option<Decimal>,
}

/// # Summary
/// 主表文件类别，决定新代码的分类路径以及是否执行名称修订。
///
/// # Invariants
/// - `Derivative` 不做名称修订，合约依赖到期自然退出。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MasterKind {
    CapitalMarket,
    Derivative,
    MutualFund,
}

impl MasterKind {
    /// 是否在名称变化时生成新版本。
    pub fn revises_on_rename(&self) -> bool {
        !matches!(self, MasterKind::Derivative)
    }
}

/// # Summary
/// 一次对账的作用范围。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterScope {
    pub exchange: String,
    pub segment: String,
    pub kind: MasterKind,
}

impl std::fmt::Display for MasterScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.exchange, self.segment)
    }
}

/// # Summary
/// 待写入的新版本行，连同其附属元数据。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewInstrument {
    pub symbol: String,
    pub name: String,
    pub instrument_type: InstrumentType,
    pub exchange: String,
    pub segment: String,
    pub isin: Option<String>,
    pub meta: Option<InstrumentMeta>,
}

/// # Summary
/// 一次主表对账产生的变更集，由存储层在单个事务内落地。
///
/// # Invariants
/// - 应用顺序固定为：关闭 → 修订 (先关旧行再插新行) → 新增。
/// - 所有版本行共享同一个 `effective_at` 作为 `valid_to` / `valid_from`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterChangeset {
    pub effective_at: DateTime<Utc>,
    // 需要关闭的活跃代码
    pub closures: Vec<String>,
    // 需要生成新版本的记录 (旧版本同时关闭)
    pub revisions: Vec<NewInstrument>,
    // 新上市代码
    pub additions: Vec<NewInstrument>,
}

impl MasterChangeset {
    pub fn new(effective_at: DateTime<Utc>) -> Self {
        Self {
            effective_at,
            closures: Vec::new(),
            revisions: Vec::new(),
            additions: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.closures.is_empty() && self.revisions.is_empty() && self.additions.is_empty()
    }
}
