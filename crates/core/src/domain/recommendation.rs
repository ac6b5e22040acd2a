use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

impl Action {
    /// Fixed confidence tier attached to each action in caller-facing output.
    pub fn confidence_tier(&self) -> u8 {
        match self {
            Action::StrongBuy => 90,
            Action::Buy => 75,
            Action::Hold => 50,
            Action::Sell => 25,
            Action::StrongSell => 10,
        }
    }

    /// Normalize a free-form advisory verdict ("STRONG_BUY - ...") into the
    /// fixed vocabulary. Unknown strings resolve to None so the caller can
    /// fall back to the deterministic path.
    pub fn from_advisory(verdict: &str) -> Option<Self> {
        let head = verdict
            .split(|c| c == '-' || c == ':' || c == '\n')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_uppercase()
            .replace(' ', "_");
        match head.as_str() {
            "STRONG_BUY" => Some(Action::StrongBuy),
            "BUY" => Some(Action::Buy),
            "HOLD" => Some(Action::Hold),
            "SELL" => Some(Action::Sell),
            "STRONG_SELL" => Some(Action::StrongSell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskProfile {
    High,
    Medium,
    Low,
}

impl Default for RiskProfile {
    fn default() -> Self {
        RiskProfile::Medium
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Horizon {
    #[serde(rename = "short-term")]
    ShortTerm,
    #[serde(rename = "medium-term")]
    MediumTerm,
    #[serde(rename = "long-term")]
    LongTerm,
}

impl Default for Horizon {
    fn default() -> Self {
        Horizon::MediumTerm
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceTargets {
    pub base: f64,
    pub bull: f64,
    pub bear: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub stop_loss: f64,
    pub take_profit: f64,
    pub risk_reward_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub symbol: String,
    pub action: Action,
    pub action_confidence: u8,
    pub horizon: Horizon,
    pub targets: PriceTargets,
    pub risk: RiskMetrics,
    pub warnings: Vec<String>,
    pub composite_confidence: f64,
    pub rationale: Vec<String>,
    pub source: String,
    pub generated_at: DateTime<Utc>,
}

/// Caller-facing envelope. Degraded technicals produce an error-shaped body
/// rather than a transport failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RecommendationResponse {
    Success {
        #[serde(flatten)]
        recommendation: Recommendation,
    },
    Error {
        symbol: String,
        message: String,
        generated_at: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_advisory_verdicts() {
        assert_eq!(
            Action::from_advisory("STRONG_BUY - momentum intact"),
            Some(Action::StrongBuy)
        );
        assert_eq!(Action::from_advisory("strong buy: cheap"), Some(Action::StrongBuy));
        assert_eq!(Action::from_advisory("Hold"), Some(Action::Hold));
        assert_eq!(Action::from_advisory("ACCUMULATE"), None);
    }

    #[test]
    fn actions_serialize_snake_case_with_tiers() {
        let json = serde_json::to_string(&Action::StrongSell).unwrap();
        assert_eq!(json, "\"strong_sell\"");
        assert_eq!(Action::StrongSell.confidence_tier(), 10);
        assert_eq!(Action::Buy.confidence_tier(), 75);
    }

    #[test]
    fn response_envelope_carries_status_tag() {
        let resp = RecommendationResponse::Error {
            symbol: "IBM".to_string(),
            message: "technical analysis failed".to_string(),
            generated_at: Utc::now(),
        };
        let v = serde_json::to_value(&resp).unwrap();
        assert_eq!(v["status"], "error");
        assert_eq!(v["symbol"], "IBM");
    }
}
