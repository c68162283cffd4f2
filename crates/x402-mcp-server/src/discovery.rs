//! Non-authoritative payment hints on tool listings.
//!
//! When a server lists its available tools, each priced descriptor gains
//! enough metadata (price, per-network recipient/amount/asset) for a
//! caller to decide whether to proceed without first attempting a call.
//! The hints reuse the same requirement builder as the gating path, but
//! they gate nothing: the authoritative offer is always the `accepts`
//! list on a rejected call.

use serde_json::{Value, json};
use tracing::warn;

use x402_mcp::mcp::ToolDescriptor;
use x402_mcp::network::USDCDeployment;
use x402_mcp::types::X402Version;

use crate::pricing::{PricedTools, Recipients, build_requirements};

/// Attaches payment hints to every priced descriptor in place. Unpriced
/// descriptors and descriptors whose price cannot be resolved are left
/// untouched.
pub fn annotate_tools(tools: &mut [ToolDescriptor], priced: &PricedTools, recipients: &Recipients) {
    for tool in tools {
        let Some(price) = priced.price_of(&tool.name) else {
            continue;
        };
        let accepts = match build_requirements(
            &tool.name,
            tool.description.as_deref().unwrap_or_default(),
            price,
            recipients,
        ) {
            Ok(accepts) => accepts,
            Err(err) => {
                warn!(tool = %tool.name, error = %err, "skipping payment hint");
                continue;
            }
        };
        let networks: Vec<Value> = accepts
            .iter()
            .map(|requirement| {
                let deployment = USDCDeployment::by_network(requirement.network);
                json!({
                    "network": requirement.network,
                    "recipient": requirement.pay_to,
                    "maxAmountRequired": requirement.max_amount_required,
                    "asset": {
                        "address": requirement.asset,
                        "symbol": USDCDeployment::SYMBOL,
                        "decimals": deployment.decimals,
                    },
                    "type": "evm",
                })
            })
            .collect();
        tool.insert_meta("paymentHint", Value::Bool(true));
        tool.insert_meta(
            "paymentPriceUSD",
            serde_json::to_value(price).expect("Price serialization failed"),
        );
        tool.insert_meta("paymentNetworks", Value::Array(networks));
        tool.insert_meta("paymentVersion", json!(X402Version::VALUE));
    }
}
