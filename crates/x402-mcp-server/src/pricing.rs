//! Pricing configuration and payment-requirement construction.
//!
//! [`PricedTools`] is the process-wide tool→price table, populated at
//! server-setup time and read-only afterwards. [`Recipients`] is the
//! ordered network→recipient map; its insertion order is the order of the
//! built requirements, which in turn drives default selection on the
//! client. [`build_requirements`] is a pure function of its inputs.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use x402_mcp::network::{Network, USDCDeployment};
use x402_mcp::types::{
    EvmAddress, MixedAddress, MoneyAmount, MoneyAmountParseError, PaymentRequirements, Scheme,
};

/// Validity window offered to payers, in seconds.
pub const DEFAULT_MAX_TIMEOUT_SECONDS: u64 = 300;

/// A USD price as configured: either a string (`"0.01"`, `"$1.50"`) or a
/// bare number. Untagged on the wire so both JSON forms deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Price {
    Text(String),
    Number(f64),
}

impl Price {
    /// Resolves the configured value to a positive money amount.
    pub fn as_money(&self) -> Result<MoneyAmount, MoneyAmountParseError> {
        match self {
            Price::Text(text) => MoneyAmount::parse(text),
            Price::Number(number) => MoneyAmount::try_from(*number),
        }
    }
}

impl From<&str> for Price {
    fn from(value: &str) -> Self {
        Price::Text(value.to_string())
    }
}

impl From<String> for Price {
    fn from(value: String) -> Self {
        Price::Text(value)
    }
}

impl From<f64> for Price {
    fn from(value: f64) -> Self {
        Price::Number(value)
    }
}

impl Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Price::Text(text) => write!(f, "{text}"),
            Price::Number(number) => write!(f, "{number}"),
        }
    }
}

/// The tool→price table. Owned by server configuration; the interception
/// pipeline holds a read reference and never mutates it.
#[derive(Debug, Clone, Default)]
pub struct PricedTools {
    prices: HashMap<String, Price>,
}

impl PricedTools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a tool as priced. Later entries replace earlier ones for the
    /// same tool.
    pub fn with_price(mut self, tool: impl Into<String>, price: impl Into<Price>) -> Self {
        self.prices.insert(tool.into(), price.into());
        self
    }

    pub fn price_of(&self, tool: &str) -> Option<&Price> {
        self.prices.get(tool)
    }

    pub fn is_priced(&self, tool: &str) -> bool {
        self.prices.contains_key(tool)
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

/// Ordered network→recipient map. At most one entry per network; the entry
/// order is the requirement order offered to callers.
#[derive(Debug, Clone, Default)]
pub struct Recipients {
    entries: Vec<(Network, EvmAddress)>,
}

impl Recipients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a recipient for a network, replacing any previous entry for
    /// that network while keeping its original position.
    pub fn with_recipient(mut self, network: Network, pay_to: EvmAddress) -> Self {
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == network) {
            entry.1 = pay_to;
        } else {
            self.entries.push((network, pay_to));
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Network, EvmAddress)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// No requirement could be built for any configured network: a pricing or
/// configuration bug, surfaced to the caller as `PRICE_COMPUTE_FAILED`.
#[derive(Debug, thiserror::Error)]
#[error("no payment requirements could be built for tool `{tool}`")]
pub struct PriceComputeError {
    pub tool: String,
}

/// Builds the ordered list of acceptable payment requirements for one tool
/// invocation.
///
/// Each configured network is priced independently: a network whose price
/// cannot be resolved (unparsable, non-positive, more precision than the
/// asset supports) is skipped with a warning rather than aborting the
/// build. The result preserves the recipient map's insertion order.
pub fn build_requirements(
    tool: &str,
    description: &str,
    price: &Price,
    recipients: &Recipients,
) -> Result<Vec<PaymentRequirements>, PriceComputeError> {
    let mut accepts = Vec::with_capacity(recipients.len());
    for (network, pay_to) in recipients.iter() {
        let deployment = USDCDeployment::by_network(network);
        let amount = price
            .as_money()
            .and_then(|money| money.as_token_amount(deployment.decimals as u32));
        let max_amount_required = match amount {
            Ok(amount) => amount,
            Err(err) => {
                warn!(tool = %tool, network = %network, price = %price, error = %err,
                    "skipping network: cannot resolve price");
                continue;
            }
        };
        accepts.push(PaymentRequirements {
            scheme: Scheme::Exact,
            network: *network,
            max_amount_required,
            resource: format!("mcp://{tool}"),
            description: description.to_string(),
            mime_type: "application/json".to_string(),
            output_schema: None,
            pay_to: MixedAddress::Evm(*pay_to),
            max_timeout_seconds: DEFAULT_MAX_TIMEOUT_SECONDS,
            asset: MixedAddress::Evm(deployment.address()),
            extra: Some(json!({
                "name": deployment.eip712.name,
                "version": deployment.eip712.version,
            })),
        });
    }
    if accepts.is_empty() {
        return Err(PriceComputeError {
            tool: tool.to_string(),
        });
    }
    Ok(accepts)
}
