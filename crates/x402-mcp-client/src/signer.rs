//! Construction and signing of payment authorizations.
//!
//! Given a selected [`PaymentRequirements`], builds an ERC-3009
//! `TransferWithAuthorization` message with a fresh random nonce and a
//! validity window derived from the requirement's timeout, signs its
//! EIP-712 hash with the configured signer, and assembles the
//! [`PaymentPayload`] that travels base64-encoded on the retry.

use std::time::{SystemTime, SystemTimeError};

use alloy_primitives::FixedBytes;
use alloy_signer::Signer;
use alloy_sol_types::{SolStruct, eip712_domain};
use rand::{Rng, rng};

use x402_mcp::types::{
    EvmAddress, EvmSignature, ExactEvmPayload, ExactEvmPayloadAuthorization, HexEncodedNonce,
    MixedAddressError, PaymentPayload, PaymentRequirements, TransferWithAuthorization,
    UnixTimestamp, X402Version,
};

/// How far into the past `validAfter` is backdated, so moderate clock skew
/// between buyer, seller, and facilitator does not invalidate a fresh
/// authorization.
const VALID_AFTER_SKEW_SECONDS: u64 = 10 * 60;

/// Errors while constructing or signing an authorization. All terminal:
/// the wrapped call is not retried after any of these.
#[derive(Debug, thiserror::Error)]
pub enum AuthorizationError {
    #[error("requirement carries a non-EVM address")]
    InvalidEvmAddress(#[source] MixedAddressError),
    #[error("failed to read system clock")]
    Clock(#[source] SystemTimeError),
    #[error("failed to sign payment payload")]
    Signing(#[source] alloy_signer::Error),
}

/// Builds and signs a [`PaymentPayload`] satisfying `selected`.
///
/// The EIP-712 domain is assembled from the requirement's `extra` signing
/// metadata (token contract `name`/`version`), the network's chain id, and
/// the asset address as verifying contract.
pub async fn make_payment_payload(
    signer: &(dyn Signer + Send + Sync),
    selected: &PaymentRequirements,
) -> Result<PaymentPayload, AuthorizationError> {
    let (name, version) = match &selected.extra {
        None => (None, None),
        Some(extra) => {
            let name = extra
                .get("name")
                .and_then(|v| v.as_str())
                .map(ToOwned::to_owned);
            let version = extra
                .get("version")
                .and_then(|v| v.as_str())
                .map(ToOwned::to_owned);
            (name, version)
        }
    };
    let verifying_contract: EvmAddress = selected
        .asset
        .clone()
        .try_into()
        .map_err(AuthorizationError::InvalidEvmAddress)?;
    let domain = eip712_domain! {
        name: name.unwrap_or_default(),
        version: version.unwrap_or_default(),
        chain_id: selected.network.chain_id(),
        verifying_contract: verifying_contract.0,
    };

    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map_err(AuthorizationError::Clock)?
        .as_secs();
    let to: EvmAddress = selected
        .pay_to
        .clone()
        .try_into()
        .map_err(AuthorizationError::InvalidEvmAddress)?;
    let nonce: [u8; 32] = rng().random();
    let authorization = ExactEvmPayloadAuthorization {
        from: EvmAddress(signer.address()),
        to,
        value: selected.max_amount_required,
        valid_after: UnixTimestamp(now.saturating_sub(VALID_AFTER_SKEW_SECONDS)),
        valid_before: UnixTimestamp(now + selected.max_timeout_seconds),
        nonce: HexEncodedNonce(nonce),
    };

    let transfer = TransferWithAuthorization {
        from: authorization.from.into(),
        to: authorization.to.into(),
        value: authorization.value.into(),
        validAfter: authorization.valid_after.into(),
        validBefore: authorization.valid_before.into(),
        nonce: FixedBytes(nonce),
    };
    let hash = transfer.eip712_signing_hash(&domain);
    let signature = signer
        .sign_hash(&hash)
        .await
        .map_err(AuthorizationError::Signing)?;

    Ok(PaymentPayload {
        x402_version: X402Version,
        scheme: selected.scheme,
        network: selected.network,
        payload: ExactEvmPayload {
            signature: EvmSignature::from(signature.as_bytes()),
            authorization,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use alloy_signer_local::PrivateKeySigner;
    use serde_json::json;
    use x402_mcp::network::Network;
    use x402_mcp::types::{MixedAddress, Scheme, TokenAmount};

    fn requirement() -> PaymentRequirements {
        PaymentRequirements {
            scheme: Scheme::Exact,
            network: Network::BaseSepolia,
            max_amount_required: TokenAmount::from(10_000u64),
            resource: "mcp://lookup_weather".to_string(),
            description: String::new(),
            mime_type: "application/json".to_string(),
            output_schema: None,
            pay_to: MixedAddress::Evm(EvmAddress(address!(
                "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045"
            ))),
            max_timeout_seconds: 300,
            asset: MixedAddress::Evm(EvmAddress(address!(
                "0x036CbD53842c5426634e7929541eC2318f3dCF7e"
            ))),
            extra: Some(json!({"name": "USDC", "version": "2"})),
        }
    }

    #[tokio::test]
    async fn signed_payload_matches_the_requirement() {
        let signer = PrivateKeySigner::random();
        let payload = make_payment_payload(&signer, &requirement()).await.unwrap();

        assert_eq!(payload.network, Network::BaseSepolia);
        assert_eq!(payload.scheme, Scheme::Exact);
        let authorization = payload.payload.authorization;
        assert_eq!(authorization.from, EvmAddress(signer.address()));
        assert_eq!(authorization.value, TokenAmount::from(10_000u64));
        assert!(authorization.valid_after < authorization.valid_before);

        // The assembled payload survives the transport codec.
        let token = payload.to_base64().unwrap();
        assert_eq!(PaymentPayload::from_base64(&token).unwrap(), payload);
    }

    #[tokio::test]
    async fn fresh_nonce_per_authorization() {
        let signer = PrivateKeySigner::random();
        let first = make_payment_payload(&signer, &requirement()).await.unwrap();
        let second = make_payment_payload(&signer, &requirement()).await.unwrap();
        assert_ne!(
            first.payload.authorization.nonce,
            second.payload.authorization.nonce
        );
    }

    #[tokio::test]
    async fn offchain_recipient_is_rejected() {
        let signer = PrivateKeySigner::random();
        let mut requirement = requirement();
        requirement.pay_to = MixedAddress::Offchain("some-account".to_string());
        let err = make_payment_payload(&signer, &requirement).await.unwrap_err();
        assert!(matches!(err, AuthorizationError::InvalidEvmAddress(_)));
    }
}
