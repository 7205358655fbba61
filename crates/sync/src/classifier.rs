use kura_core::instrument::entity::InstrumentType;

/// 公募基金 ISIN 前缀。
const FUND_ISIN_PREFIX: &str = "INF";

/// # Summary
/// 按 ISIN 与代码后缀判定品种类型，纯函数，无法识别时返回 `Unknown`。
///
/// # Logic
/// 1. ISIN 以 `INF` 开头即为基金。
/// 2. 取代码最后一个 `-` 之后的后缀，无分隔符时为空串。
/// 3. 先查精确后缀表，再按固定顺序匹配前缀规则，先到先得。
///
/// # Arguments
/// * `identifier`: 交易代码 (例如: NSE:SBIN-EQ)。
/// * `isin`: 国际证券识别码。
///
/// # Returns
/// 品种类型。
pub fn classify(identifier: &str, isin: Option<&str>) -> InstrumentType {
    if isin.is_some_and(|i| i.starts_with(FUND_ISIN_PREFIX)) {
        return InstrumentType::Mf;
    }

    let suffix = identifier
        .rsplit_once('-')
        .map(|(_, suffix)| suffix)
        .unwrap_or("");

    // 顺序敏感：前缀规则只在全部精确规则都未命中时生效
    match suffix {
        "INDEX" => InstrumentType::Index,
        "EQ" | "SM" | "ST" | "BZ" | "E1" => InstrumentType::Equity,
        "BE" => InstrumentType::Etf,
        "IV" => InstrumentType::Invit,
        "RE" => InstrumentType::Reit,
        "SG" | "GB" => InstrumentType::Sgb,
        "GS" => InstrumentType::Gsec,
        "RR" => InstrumentType::Rights,
        "MF" => InstrumentType::Mf,
        s if s.starts_with(['N', 'Y', 'Z', 'M', 'D']) => InstrumentType::Bond,
        s if s.starts_with('P') => InstrumentType::PreferenceShare,
        s if s.starts_with('W') => InstrumentType::Warrant,
        _ => InstrumentType::Unknown,
    }
}
