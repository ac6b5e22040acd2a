/// Reliability score for sources we have no prior on.
pub const DEFAULT_RELIABILITY: u8 = 50;

/// Outlets whose articles carry double weight in sentiment aggregation.
pub const TIER1_SOURCES: [&str; 6] = [
    "Bloomberg",
    "Reuters",
    "WSJ",
    "Financial Times",
    "CNBC",
    "Barron's",
];

/// Static source -> reliability lookup (0-100). Matching is
/// case-insensitive on the trimmed source name.
pub fn source_reliability(source: &str) -> u8 {
    match source.trim().to_ascii_lowercase().as_str() {
        "bloomberg" => 95,
        "reuters" => 95,
        "wsj" | "wall street journal" | "the wall street journal" => 90,
        "financial times" | "ft" => 90,
        "cnbc" => 85,
        "barron's" | "barrons" => 85,
        "marketwatch" => 80,
        "forbes" => 75,
        "business insider" => 70,
        "alpha vantage" => 70,
        "finnhub" => 65,
        "yahoo finance" | "yahoo" => 65,
        "seeking alpha" => 60,
        "benzinga" => 60,
        "motley fool" | "the motley fool" => 55,
        "zacks" | "zacks investment research" => 55,
        _ => DEFAULT_RELIABILITY,
    }
}

/// Aggregation weight multiplier for a fixed set of high-trust outlets.
pub fn tier_weight(source: &str) -> f64 {
    let s = source.trim();
    if TIER1_SOURCES
        .iter()
        .any(|t| t.eq_ignore_ascii_case(s))
    {
        2.0
    } else {
        1.0
    }
}
