use crate::chain::ChainGateway;
use crate::error::Result;

pub const ONE_GWEI: u128 = 1_000_000_000;

/// How fee caps are derived from the node's suggestions.
///
/// Every policy pays the suggested price plus tip and adds a headroom delta proportional to
/// the suggested price so the transaction survives a few base-fee increases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GasPolicy {
    /// 1.5x price headroom, suggested tip.
    Default,
    /// 3x price headroom, suggested tip.
    HighPriority,
    /// Default headroom with the tip floored at 1 gwei.
    Min1Gwei,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasQuote {
    pub max_fee_per_gas: u128,
    pub max_priority_fee_per_gas: u128,
}

impl GasPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::HighPriority => "high_priority",
            Self::Min1Gwei => "min_1_gwei",
        }
    }

    pub fn quote(self, gas_price: u128, suggested_tip: u128) -> GasQuote {
        let delta = match self {
            Self::Default | Self::Min1Gwei => gas_price.saturating_mul(3) / 2,
            Self::HighPriority => gas_price.saturating_mul(3),
        };
        let tip = match self {
            Self::Min1Gwei => suggested_tip.max(ONE_GWEI),
            Self::Default | Self::HighPriority => suggested_tip,
        };
        GasQuote {
            max_fee_per_gas: gas_price.saturating_add(tip).saturating_add(delta),
            max_priority_fee_per_gas: tip,
        }
    }

    pub async fn resolve(self, gateway: &dyn ChainGateway) -> Result<GasQuote> {
        let tip = gateway.suggest_gas_tip_cap().await?;
        let price = gateway.suggest_gas_price().await?;
        Ok(self.quote(price, tip))
    }
}
