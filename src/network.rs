//! Settlement networks and known token deployments.
//!
//! The [`Network`] enum is the closed set of networks this deployment
//! recognizes; [`USDCDeployment`] is the static per-network USDC table the
//! requirement builder reads decimals and EIP-712 signing metadata from.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt::{Display, Formatter};
use std::ops::Deref;
use std::str::FromStr;

use alloy_primitives::address;

use crate::types::{EvmAddress, TokenAsset, TokenDeployment, TokenDeploymentEip712};

/// Supported settlement networks, all EVM-compatible.
///
/// The kebab-case wire names match the network identifiers used by
/// facilitators and by clients in other languages.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Network {
    /// Base mainnet (chain ID 8453).
    #[serde(rename = "base")]
    Base,
    /// Base Sepolia testnet (chain ID 84532).
    #[serde(rename = "base-sepolia")]
    BaseSepolia,
    /// Avalanche C-Chain (chain ID 43114).
    #[serde(rename = "avalanche")]
    Avalanche,
    /// Avalanche Fuji testnet (chain ID 43113).
    #[serde(rename = "avalanche-fuji")]
    AvalancheFuji,
    /// Polygon mainnet (chain ID 137).
    #[serde(rename = "polygon")]
    Polygon,
    /// Polygon Amoy testnet (chain ID 80002).
    #[serde(rename = "polygon-amoy")]
    PolygonAmoy,
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Base => write!(f, "base"),
            Network::BaseSepolia => write!(f, "base-sepolia"),
            Network::Avalanche => write!(f, "avalanche"),
            Network::AvalancheFuji => write!(f, "avalanche-fuji"),
            Network::Polygon => write!(f, "polygon"),
            Network::PolygonAmoy => write!(f, "polygon-amoy"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown network: {0}")]
pub struct UnknownNetworkError(String);

impl FromStr for Network {
    type Err = UnknownNetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base" => Ok(Network::Base),
            "base-sepolia" => Ok(Network::BaseSepolia),
            "avalanche" => Ok(Network::Avalanche),
            "avalanche-fuji" => Ok(Network::AvalancheFuji),
            "polygon" => Ok(Network::Polygon),
            "polygon-amoy" => Ok(Network::PolygonAmoy),
            other => Err(UnknownNetworkError(other.to_string())),
        }
    }
}

impl Network {
    /// All known [`Network`] variants.
    pub fn variants() -> &'static [Network] {
        &[
            Network::Base,
            Network::BaseSepolia,
            Network::Avalanche,
            Network::AvalancheFuji,
            Network::Polygon,
            Network::PolygonAmoy,
        ]
    }

    /// EIP-155 chain id, used in EIP-712 signing domains.
    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Base => 8453,
            Network::BaseSepolia => 84532,
            Network::Avalanche => 43114,
            Network::AvalancheFuji => 43113,
            Network::Polygon => 137,
            Network::PolygonAmoy => 80002,
        }
    }
}

/// A known USDC deployment on a specific network.
///
/// Wraps [`TokenDeployment`]; dereferences to it for address, decimals,
/// and EIP-712 metadata access.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct USDCDeployment(pub TokenDeployment);

impl Deref for USDCDeployment {
    type Target = TokenDeployment;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<USDCDeployment> for TokenDeployment {
    fn from(value: USDCDeployment) -> Self {
        value.0
    }
}

impl From<&USDCDeployment> for TokenAsset {
    fn from(value: &USDCDeployment) -> Self {
        value.asset.clone()
    }
}

fn usdc(
    network: Network,
    contract: alloy_primitives::Address,
    eip712_name: &str,
) -> USDCDeployment {
    USDCDeployment(TokenDeployment {
        asset: TokenAsset {
            address: EvmAddress(contract),
            network,
        },
        decimals: 6,
        eip712: TokenDeploymentEip712 {
            name: eip712_name.to_string(),
            version: "2".to_string(),
        },
    })
}

static USDC_BASE: Lazy<USDCDeployment> = Lazy::new(|| {
    usdc(
        Network::Base,
        address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
        "USD Coin",
    )
});

static USDC_BASE_SEPOLIA: Lazy<USDCDeployment> = Lazy::new(|| {
    usdc(
        Network::BaseSepolia,
        address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e"),
        "USDC",
    )
});

static USDC_AVALANCHE: Lazy<USDCDeployment> = Lazy::new(|| {
    usdc(
        Network::Avalanche,
        address!("0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E"),
        "USD Coin",
    )
});

static USDC_AVALANCHE_FUJI: Lazy<USDCDeployment> = Lazy::new(|| {
    usdc(
        Network::AvalancheFuji,
        address!("0x5425890298aed601595a70AB815c96711a31Bc65"),
        "USD Coin",
    )
});

static USDC_POLYGON: Lazy<USDCDeployment> = Lazy::new(|| {
    usdc(
        Network::Polygon,
        address!("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359"),
        "USD Coin",
    )
});

static USDC_POLYGON_AMOY: Lazy<USDCDeployment> = Lazy::new(|| {
    usdc(
        Network::PolygonAmoy,
        address!("0x41E94Eb019C0762f9Bfcf9Fb1E58725BfB0e7582"),
        "USDC",
    )
});

impl USDCDeployment {
    /// Ticker symbol, identical across deployments.
    pub const SYMBOL: &'static str = "USDC";

    /// The USDC deployment on the given network.
    pub fn by_network<N: Borrow<Network>>(network: N) -> &'static USDCDeployment {
        match network.borrow() {
            Network::Base => &USDC_BASE,
            Network::BaseSepolia => &USDC_BASE_SEPOLIA,
            Network::Avalanche => &USDC_AVALANCHE,
            Network::AvalancheFuji => &USDC_AVALANCHE_FUJI,
            Network::Polygon => &USDC_POLYGON,
            Network::PolygonAmoy => &USDC_POLYGON_AMOY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_wire_names_round_trip() {
        for network in Network::variants() {
            let json = serde_json::to_string(network).unwrap();
            let back: Network = serde_json::from_str(&json).unwrap();
            assert_eq!(back, *network);
            assert_eq!(json, format!("\"{network}\""));
            assert_eq!(network.to_string().parse::<Network>().unwrap(), *network);
        }
        assert!("mystery-chain".parse::<Network>().is_err());
    }

    #[test]
    fn usdc_deployments_cover_every_network() {
        for network in Network::variants() {
            let deployment = USDCDeployment::by_network(network);
            assert_eq!(deployment.network(), *network);
            assert_eq!(deployment.decimals, 6);
            assert_eq!(deployment.eip712.version, "2");
        }
    }
}
