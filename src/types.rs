//! Wire types for the x402 pay-per-call protocol.
//!
//! The key objects are [`PaymentPayload`] (the buyer's signed authorization),
//! [`PaymentRequirements`] (one acceptable way to pay, set by the seller),
//! [`VerifyResponse`] and [`SettleResponse`] (facilitator outcomes), and
//! [`PaymentRequiredPayload`] (the structured rejection carried on a gated
//! tool call). Authorizations use ERC-3009 style `transferWithAuthorization`
//! messages signed as EIP-712 typed data.
//!
//! All wire names are camelCase; constrained scalars (signatures, nonces,
//! timestamps, amounts) carry their own validating serde implementations.

use alloy_primitives::{U256, hex};
use alloy_sol_types::sol;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as b64;
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use std::fmt::{Debug, Display};
use std::ops::Mul;
use std::str::FromStr;

use crate::network::Network;

/// Protocol version marker. Serializes as the integer `1`; any other number
/// is rejected on decode.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct X402Version;

impl X402Version {
    pub const VALUE: u8 = 1;
}

impl Serialize for X402Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(Self::VALUE)
    }
}

impl<'de> Deserialize<'de> for X402Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let num = u8::deserialize(deserializer)?;
        if num == Self::VALUE {
            Ok(X402Version)
        } else {
            Err(serde::de::Error::custom(format!(
                "unsupported x402 version: {num}"
            )))
        }
    }
}

impl Display for X402Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Self::VALUE)
    }
}

/// Payment scheme tag. Only `exact` (a fixed exact amount) is defined today;
/// the enum leaves room for other schemes without changing the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Exact,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Exact => write!(f, "exact"),
        }
    }
}

/// An EVM account or contract address.
///
/// Wrapper around [`alloy_primitives::Address`]; displays and serializes in
/// EIP-55 checksum form, which is the canonical form used on the wire.
#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct EvmAddress(pub alloy_primitives::Address);

impl Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to decode EVM address")]
pub struct EvmAddressDecodingError;

impl FromStr for EvmAddress {
    type Err = EvmAddressDecodingError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address =
            alloy_primitives::Address::from_str(s).map_err(|_| EvmAddressDecodingError)?;
        Ok(Self(address))
    }
}

impl From<alloy_primitives::Address> for EvmAddress {
    fn from(address: alloy_primitives::Address) -> Self {
        EvmAddress(address)
    }
}

impl From<EvmAddress> for alloy_primitives::Address {
    fn from(address: EvmAddress) -> Self {
        address.0
    }
}

/// A 65-byte ECDSA signature over EIP-712 typed data, hex-encoded with a
/// `0x` prefix on the wire.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct EvmSignature(pub [u8; 65]);

impl From<[u8; 65]> for EvmSignature {
    fn from(bytes: [u8; 65]) -> Self {
        EvmSignature(bytes)
    }
}

impl Debug for EvmSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EvmSignature(0x{})", hex::encode(self.0))
    }
}

impl Serialize for EvmSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for EvmSignature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let stripped = s
            .strip_prefix("0x")
            .ok_or_else(|| serde::de::Error::custom("signature must be 0x-prefixed"))?;
        let bytes = hex::decode(stripped)
            .map_err(|_| serde::de::Error::custom("signature is not valid hex"))?;
        let array: [u8; 65] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("signature must be exactly 65 bytes"))?;
        Ok(EvmSignature(array))
    }
}

/// A 32-byte anti-replay nonce, hex-encoded with a `0x` prefix.
///
/// The facilitator is the idempotency authority: this value is generated
/// fresh per authorization and never tracked locally.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct HexEncodedNonce(pub [u8; 32]);

impl Debug for HexEncodedNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HexEncodedNonce(0x{})", hex::encode(self.0))
    }
}

impl Serialize for HexEncodedNonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.0)))
    }
}

impl<'de> Deserialize<'de> for HexEncodedNonce {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let stripped = s
            .strip_prefix("0x")
            .ok_or_else(|| serde::de::Error::custom("nonce must be 0x-prefixed"))?;
        let bytes = hex::decode(stripped)
            .map_err(|_| serde::de::Error::custom("nonce is not valid hex"))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("nonce must be exactly 32 bytes"))?;
        Ok(HexEncodedNonce(array))
    }
}

/// Seconds since the Unix epoch, string-encoded in JSON to avoid precision
/// loss. Bounds the validity window of an authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct UnixTimestamp(pub u64);

impl Serialize for UnixTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let ts = s
            .parse::<u64>()
            .map_err(|_| serde::de::Error::custom("timestamp must be a non-negative integer"))?;
        Ok(UnixTimestamp(ts))
    }
}

impl Display for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<UnixTimestamp> for U256 {
    fn from(value: UnixTimestamp) -> Self {
        U256::from(value.0)
    }
}

/// An on-chain token amount in atomic base units (e.g. USDC with 6 decimals).
///
/// Always a decimal-integer string on the wire, never hex, to match what
/// clients in other languages produce and expect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount(pub U256);

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(serde::de::Error::custom(
                "amount must be a decimal-integer string",
            ));
        }
        let value = U256::from_str(&s)
            .map_err(|_| serde::de::Error::custom("amount does not fit into 256 bits"))?;
        Ok(TokenAmount(value))
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for TokenAmount {
    fn from(value: u64) -> Self {
        TokenAmount(U256::from(value))
    }
}

impl From<TokenAmount> for U256 {
    fn from(value: TokenAmount) -> Self {
        value.0
    }
}

/// Either an EVM address (`0x...`) or an off-chain account identifier.
///
/// The off-chain form is validated by shape only; routing it is the
/// facilitator's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MixedAddress {
    Evm(EvmAddress),
    Offchain(String),
}

static OFFCHAIN_ADDRESS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9-]{0,34}[A-Za-z0-9]$").expect("valid offchain regex")
});

impl From<EvmAddress> for MixedAddress {
    fn from(address: EvmAddress) -> Self {
        MixedAddress::Evm(address)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MixedAddressError {
    #[error("not an EVM address")]
    NotEvmAddress,
    #[error("invalid address format")]
    InvalidAddressFormat,
}

impl TryFrom<MixedAddress> for EvmAddress {
    type Error = MixedAddressError;

    fn try_from(value: MixedAddress) -> Result<Self, Self::Error> {
        match value {
            MixedAddress::Evm(address) => Ok(address),
            MixedAddress::Offchain(_) => Err(MixedAddressError::NotEvmAddress),
        }
    }
}

impl Display for MixedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MixedAddress::Evm(address) => write!(f, "{address}"),
            MixedAddress::Offchain(address) => write!(f, "{address}"),
        }
    }
}

impl Serialize for MixedAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MixedAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if let Ok(address) = EvmAddress::from_str(&s) {
            return Ok(MixedAddress::Evm(address));
        }
        if OFFCHAIN_ADDRESS_REGEX.is_match(&s) {
            Ok(MixedAddress::Offchain(s))
        } else {
            Err(serde::de::Error::custom("invalid address format"))
        }
    }
}

/// EIP-712 message content of an ERC-3009 authorization: who may move how
/// much, to whom, inside which validity window.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayloadAuthorization {
    pub from: EvmAddress,
    pub to: EvmAddress,
    pub value: TokenAmount,
    pub valid_after: UnixTimestamp,
    pub valid_before: UnixTimestamp,
    pub nonce: HexEncodedNonce,
}

/// Scheme-specific payload of the `exact` scheme on EVM networks: the
/// authorization plus the signature over its EIP-712 hash.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayload {
    pub signature: EvmSignature,
    pub authorization: ExactEvmPayloadAuthorization,
}

/// The buyer's signed claim that one payment requirement is satisfied.
///
/// This is what travels base64-encoded in the `x402/payment` metadata field
/// or the `X-PAYMENT` transport header.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: X402Version,
    pub scheme: Scheme,
    pub network: Network,
    pub payload: ExactEvmPayload,
}

/// Error returned when a transport token cannot be decoded into a
/// [`PaymentPayload`]. Callers classify any variant as `INVALID_PAYMENT`.
#[derive(Debug, thiserror::Error)]
pub enum PaymentPayloadB64DecodingError {
    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PaymentPayload {
    /// Encodes this payload as canonical JSON, then base64, yielding the
    /// transport token.
    pub fn to_base64(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_vec(self)?;
        Ok(Base64Bytes::encode(json).to_string())
    }

    /// Decodes a transport token. Inverse of [`PaymentPayload::to_base64`]:
    /// `from_base64(to_base64(p)) == p` field-for-field.
    pub fn from_base64(token: &str) -> Result<Self, PaymentPayloadB64DecodingError> {
        Base64Bytes::from(token.as_bytes()).try_into()
    }
}

impl TryFrom<Base64Bytes<'_>> for PaymentPayload {
    type Error = PaymentPayloadB64DecodingError;

    fn try_from(value: Base64Bytes) -> Result<Self, Self::Error> {
        let decoded = value.decode()?;
        serde_json::from_slice(&decoded).map_err(PaymentPayloadB64DecodingError::from)
    }
}

/// One acceptable way to pay for one tool invocation, set by the seller.
///
/// Constructed fresh per call, never persisted, immutable once returned.
/// `resource` identifies the gated operation, e.g. `mcp://lookup_weather`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: Scheme,
    pub network: Network,
    pub max_amount_required: TokenAmount,
    pub resource: String,
    pub description: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    pub pay_to: MixedAddress,
    pub max_timeout_seconds: u64,
    pub asset: MixedAddress,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Machine-readable failure kinds carried in the `error` field of a
/// payment-required rejection.
///
/// The first five are produced by the interception pipeline itself;
/// [`ErrorKind::Verification`] passes through whatever reason the
/// facilitator reported (e.g. `expired`, `insufficient_funds`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// No requirement could be built: a configuration or pricing bug.
    PriceComputeFailed,
    /// No token was submitted. Expected on a first, unpaid attempt.
    PaymentRequired,
    /// The token could not be decoded.
    InvalidPayment,
    /// The token's `(network, scheme)` matches none of the offered
    /// requirements.
    UnableToMatchPaymentRequirements,
    /// Settlement failed after the gated operation already executed.
    SettlementFailed,
    /// The facilitator rejected verification for the contained reason.
    Verification(String),
}

impl ErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorKind::PriceComputeFailed => "PRICE_COMPUTE_FAILED",
            ErrorKind::PaymentRequired => "PAYMENT_REQUIRED",
            ErrorKind::InvalidPayment => "INVALID_PAYMENT",
            ErrorKind::UnableToMatchPaymentRequirements => "UNABLE_TO_MATCH_PAYMENT_REQUIREMENTS",
            ErrorKind::SettlementFailed => "SETTLEMENT_FAILED",
            ErrorKind::Verification(reason) => reason,
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for ErrorKind {
    fn from(value: &str) -> Self {
        match value {
            "PRICE_COMPUTE_FAILED" => ErrorKind::PriceComputeFailed,
            "PAYMENT_REQUIRED" => ErrorKind::PaymentRequired,
            "INVALID_PAYMENT" => ErrorKind::InvalidPayment,
            "UNABLE_TO_MATCH_PAYMENT_REQUIREMENTS" => ErrorKind::UnableToMatchPaymentRequirements,
            "SETTLEMENT_FAILED" => ErrorKind::SettlementFailed,
            reason => ErrorKind::Verification(reason.to_string()),
        }
    }
}

impl Serialize for ErrorKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(ErrorKind::from(s.as_str()))
    }
}

/// Structured rejection attached to a gated call under the `x402/error`
/// metadata field.
///
/// Carries the full `accepts` list so the caller can construct a payment
/// without a second discovery round trip. The one exception is the
/// settlement-failure case, where no new options exist and `accepts` is
/// left empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredPayload {
    pub x402_version: X402Version,
    pub error: ErrorKind,
    #[serde(default)]
    pub accepts: Vec<PaymentRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<MixedAddress>,
}

/// Settlement receipt attached to a successful gated call under the
/// `x402/payment-response` metadata field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementAnnotation {
    pub success: bool,
    pub transaction: String,
    pub network: Network,
    pub payer: MixedAddress,
}

/// Facilitator verdict on a payment authorization. No side effects occur
/// during verification.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyResponse {
    /// The payload matches the requirements and passes all checks.
    Valid { payer: MixedAddress },
    /// The payload was rejected for the given reason, with the payer
    /// identified when extraction was possible.
    Invalid {
        reason: String,
        payer: Option<MixedAddress>,
    },
}

impl VerifyResponse {
    pub fn valid(payer: MixedAddress) -> Self {
        VerifyResponse::Valid { payer }
    }

    pub fn invalid(payer: Option<MixedAddress>, reason: impl Into<String>) -> Self {
        VerifyResponse::Invalid {
            reason: reason.into(),
            payer,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponseWire {
    is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    payer: Option<MixedAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invalid_reason: Option<String>,
}

impl Serialize for VerifyResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            VerifyResponse::Valid { payer } => VerifyResponseWire {
                is_valid: true,
                payer: Some(payer.clone()),
                invalid_reason: None,
            },
            VerifyResponse::Invalid { reason, payer } => VerifyResponseWire {
                is_valid: false,
                payer: payer.clone(),
                invalid_reason: Some(reason.clone()),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for VerifyResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = VerifyResponseWire::deserialize(deserializer)?;
        if wire.is_valid {
            let payer = wire
                .payer
                .ok_or_else(|| serde::de::Error::missing_field("payer"))?;
            Ok(VerifyResponse::Valid { payer })
        } else {
            let reason = wire
                .invalid_reason
                .ok_or_else(|| serde::de::Error::missing_field("invalidReason"))?;
            Ok(VerifyResponse::Invalid {
                reason,
                payer: wire.payer,
            })
        }
    }
}

/// Facilitator outcome of a settlement attempt. Settlement is effectful:
/// it is requested at most once per successfully executed call.
#[derive(Debug, Clone, PartialEq)]
pub enum SettleResponse {
    Success {
        payer: MixedAddress,
        transaction: String,
        network: Network,
    },
    Error {
        reason: String,
        network: Network,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettleResponseWire {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    payer: Option<MixedAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transaction: Option<String>,
    network: Network,
}

impl Serialize for SettleResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            SettleResponse::Success {
                payer,
                transaction,
                network,
            } => SettleResponseWire {
                success: true,
                error_reason: None,
                payer: Some(payer.clone()),
                transaction: Some(transaction.clone()),
                network: *network,
            },
            SettleResponse::Error { reason, network } => SettleResponseWire {
                success: false,
                error_reason: Some(reason.clone()),
                payer: None,
                transaction: None,
                network: *network,
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SettleResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let wire = SettleResponseWire::deserialize(deserializer)?;
        if wire.success {
            let payer = wire
                .payer
                .ok_or_else(|| serde::de::Error::missing_field("payer"))?;
            let transaction = wire
                .transaction
                .ok_or_else(|| serde::de::Error::missing_field("transaction"))?;
            Ok(SettleResponse::Success {
                payer,
                transaction,
                network: wire.network,
            })
        } else {
            let reason = wire
                .error_reason
                .ok_or_else(|| serde::de::Error::missing_field("errorReason"))?;
            Ok(SettleResponse::Error {
                reason,
                network: wire.network,
            })
        }
    }
}

/// One `(version, scheme, network)` combination a facilitator accepts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKind {
    pub x402_version: X402Version,
    pub scheme: Scheme,
    pub network: Network,
}

/// Body of the facilitator's `GET /supported` response.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedPaymentKindsResponse {
    #[serde(default)]
    pub kinds: Vec<SupportedPaymentKind>,
}

/// Bytes of base64 text encoding some other bytes. Copy-on-write so that
/// borrowed header values decode without an extra allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Bytes<'a>(pub Cow<'a, [u8]>);

impl Base64Bytes<'_> {
    /// Decodes the base64 text into the raw binary payload.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        b64.decode(&self.0)
    }

    /// Encodes raw binary input into base64 text bytes.
    pub fn encode<T: AsRef<[u8]>>(input: T) -> Base64Bytes<'static> {
        let encoded = b64.encode(input.as_ref());
        Base64Bytes(Cow::Owned(encoded.into_bytes()))
    }
}

impl AsRef<[u8]> for Base64Bytes<'_> {
    fn as_ref(&self) -> &[u8] {
        self.0.as_ref()
    }
}

impl<'a> From<&'a [u8]> for Base64Bytes<'a> {
    fn from(slice: &'a [u8]) -> Self {
        Base64Bytes(Cow::Borrowed(slice))
    }
}

impl Display for Base64Bytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.0.as_ref()))
    }
}

/// A human-readable USD amount such as `"0.01"`, `"$10.50"` or `1000`.
///
/// Preserves input precision, which matters when scaling to a token's
/// decimal places.
#[derive(Debug, Clone, PartialEq)]
pub struct MoneyAmount(pub Decimal);

#[derive(Debug, thiserror::Error)]
pub enum MoneyAmountParseError {
    #[error("invalid number format")]
    InvalidFormat,
    #[error(
        "amount must be between {} and {}",
        money_amount::MIN_STR,
        money_amount::MAX_STR
    )]
    OutOfRange,
    #[error("negative value is not allowed")]
    Negative,
    #[error("too big of a precision: {money} vs {token} on token")]
    WrongPrecision { money: u32, token: u32 },
}

mod money_amount {
    use super::*;

    pub const MIN_STR: &str = "0.000000001";
    pub const MAX_STR: &str = "999999999";

    pub static MIN: Lazy<Decimal> = Lazy::new(|| Decimal::from_str(MIN_STR).expect("valid decimal"));
    pub static MAX: Lazy<Decimal> = Lazy::new(|| Decimal::from_str(MAX_STR).expect("valid decimal"));

    /// Strips currency symbols, separators, whitespace.
    pub static CLEANUP: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"[^\d\.\-]+").expect("valid cleanup regex"));
}

impl MoneyAmount {
    /// Number of digits after the decimal point in the original input.
    pub fn scale(&self) -> u32 {
        self.0.scale()
    }

    /// Absolute mantissa as an unsigned integer: `"12.34"` gives `1234`.
    pub fn mantissa(&self) -> u128 {
        self.0.mantissa().unsigned_abs()
    }

    /// Parses a human-readable currency string. Currency symbols and
    /// thousand separators are stripped first; the result must be a
    /// non-negative number within the allowed range.
    pub fn parse(input: &str) -> Result<Self, MoneyAmountParseError> {
        let cleaned = money_amount::CLEANUP.replace_all(input, "").to_string();

        let parsed =
            Decimal::from_str(&cleaned).map_err(|_| MoneyAmountParseError::InvalidFormat)?;

        if parsed.is_sign_negative() {
            return Err(MoneyAmountParseError::Negative);
        }

        if parsed < *money_amount::MIN || parsed > *money_amount::MAX {
            return Err(MoneyAmountParseError::OutOfRange);
        }

        Ok(MoneyAmount(parsed))
    }

    /// Scales this amount to a token's decimal precision, producing an
    /// atomic-unit [`TokenAmount`]: `"0.01"` with 6 decimals gives `10000`.
    ///
    /// Errors if the input has more precision than the token supports, so
    /// sub-atomic dust is rejected rather than silently truncated.
    pub fn as_token_amount(
        &self,
        token_decimals: u32,
    ) -> Result<TokenAmount, MoneyAmountParseError> {
        let money_decimals = self.scale();
        if money_decimals > token_decimals {
            return Err(MoneyAmountParseError::WrongPrecision {
                money: money_decimals,
                token: token_decimals,
            });
        }
        let scale_diff = token_decimals - money_decimals;
        let multiplier = U256::from(10).pow(U256::from(scale_diff));
        let value = U256::from(self.mantissa()).mul(multiplier);
        Ok(TokenAmount(value))
    }
}

impl FromStr for MoneyAmount {
    type Err = MoneyAmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MoneyAmount::parse(s)
    }
}

impl TryFrom<&str> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        MoneyAmount::from_str(value)
    }
}

impl TryFrom<f64> for MoneyAmount {
    type Error = MoneyAmountParseError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        let decimal = Decimal::from_f64(value).ok_or(MoneyAmountParseError::OutOfRange)?;
        if decimal.is_sign_negative() {
            return Err(MoneyAmountParseError::Negative);
        }
        if decimal < *money_amount::MIN || decimal > *money_amount::MAX {
            return Err(MoneyAmountParseError::OutOfRange);
        }
        Ok(MoneyAmount(decimal))
    }
}

impl Display for MoneyAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

/// EIP-712 domain metadata (`name`, `version`) of a deployed token
/// contract, required for `transferWithAuthorization` signatures.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TokenDeploymentEip712 {
    pub name: String,
    pub version: String,
}

/// A fungible token identified by contract address and network.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TokenAsset {
    pub address: EvmAddress,
    pub network: Network,
}

/// A specific deployed token instance with the metadata needed for value
/// formatting and EIP-712 signing.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct TokenDeployment {
    pub asset: TokenAsset,
    pub decimals: u8,
    pub eip712: TokenDeploymentEip712,
}

impl TokenDeployment {
    pub fn address(&self) -> EvmAddress {
        self.asset.address
    }

    pub fn network(&self) -> Network {
        self.asset.network
    }
}

sol!(
    /// ERC-3009 `transferWithAuthorization` message, as EIP-712 typed data.
    /// Field names and order must match the token contract exactly.
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
);

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    fn sample_payload() -> PaymentPayload {
        PaymentPayload {
            x402_version: X402Version,
            scheme: Scheme::Exact,
            network: Network::BaseSepolia,
            payload: ExactEvmPayload {
                signature: EvmSignature([0x42; 65]),
                authorization: ExactEvmPayloadAuthorization {
                    from: EvmAddress(address!("0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045")),
                    to: EvmAddress(address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e")),
                    value: TokenAmount::from(10_000u64),
                    valid_after: UnixTimestamp(1_700_000_000),
                    valid_before: UnixTimestamp(1_700_000_600),
                    nonce: HexEncodedNonce([7; 32]),
                },
            },
        }
    }

    #[test]
    fn payment_payload_round_trips_through_base64() {
        let payload = sample_payload();
        let token = payload.to_base64().unwrap();
        let decoded = PaymentPayload::from_base64(&token).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn payment_payload_decode_rejects_garbage() {
        assert!(matches!(
            PaymentPayload::from_base64("not-base64!!!"),
            Err(PaymentPayloadB64DecodingError::Base64Decode(_))
        ));
        let not_json = Base64Bytes::encode(b"plainly not json").to_string();
        assert!(matches!(
            PaymentPayload::from_base64(&not_json),
            Err(PaymentPayloadB64DecodingError::Json(_))
        ));
        // Well-formed JSON with the wrong version is also a decode failure.
        let wrong_version = serde_json::to_vec(&serde_json::json!({
            "x402Version": 2,
            "scheme": "exact",
            "network": "base",
            "payload": {}
        }))
        .unwrap();
        let token = Base64Bytes::encode(wrong_version).to_string();
        assert!(PaymentPayload::from_base64(&token).is_err());
    }

    #[test]
    fn token_amount_is_decimal_on_the_wire() {
        let amount = TokenAmount::from(10_000u64);
        assert_eq!(serde_json::to_string(&amount).unwrap(), "\"10000\"");
        let parsed: TokenAmount = serde_json::from_str("\"10000\"").unwrap();
        assert_eq!(parsed, amount);
        assert!(serde_json::from_str::<TokenAmount>("\"0x2710\"").is_err());
        assert!(serde_json::from_str::<TokenAmount>("\"\"").is_err());
    }

    #[test]
    fn money_amount_parses_currency_formats() {
        assert_eq!(MoneyAmount::parse("0.01").unwrap().to_string(), "0.01");
        assert_eq!(MoneyAmount::parse("$10.50").unwrap().to_string(), "10.5");
        assert_eq!(MoneyAmount::parse("1,000").unwrap().to_string(), "1000");
        assert!(matches!(
            MoneyAmount::parse("-5"),
            Err(MoneyAmountParseError::Negative)
        ));
        assert!(MoneyAmount::parse("garbage").is_err());
    }

    #[test]
    fn money_amount_scales_to_token_decimals() {
        let amount = MoneyAmount::parse("0.01").unwrap();
        assert_eq!(
            amount.as_token_amount(6).unwrap(),
            TokenAmount::from(10_000u64)
        );
        // More precision than the token supports is an error, not a floor.
        let dust = MoneyAmount::parse("0.0000001").unwrap();
        assert!(matches!(
            dust.as_token_amount(6),
            Err(MoneyAmountParseError::WrongPrecision { money: 7, token: 6 })
        ));
    }

    #[test]
    fn error_kind_wire_form() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::PaymentRequired).unwrap(),
            "\"PAYMENT_REQUIRED\""
        );
        let parsed: ErrorKind = serde_json::from_str("\"expired\"").unwrap();
        assert_eq!(parsed, ErrorKind::Verification("expired".to_string()));
        let parsed: ErrorKind =
            serde_json::from_str("\"UNABLE_TO_MATCH_PAYMENT_REQUIREMENTS\"").unwrap();
        assert_eq!(parsed, ErrorKind::UnableToMatchPaymentRequirements);
    }

    #[test]
    fn verify_response_wire_split() {
        let valid: VerifyResponse = serde_json::from_str(
            r#"{"isValid":true,"payer":"0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045"}"#,
        )
        .unwrap();
        assert!(matches!(valid, VerifyResponse::Valid { .. }));

        let invalid: VerifyResponse =
            serde_json::from_str(r#"{"isValid":false,"invalidReason":"expired"}"#).unwrap();
        assert_eq!(
            invalid,
            VerifyResponse::Invalid {
                reason: "expired".to_string(),
                payer: None
            }
        );

        // isValid=false without a reason is malformed.
        assert!(serde_json::from_str::<VerifyResponse>(r#"{"isValid":false}"#).is_err());
    }

    #[test]
    fn settle_response_wire_split() {
        let success = SettleResponse::Success {
            payer: MixedAddress::Evm(EvmAddress(address!(
                "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045"
            ))),
            transaction: "0xabc".to_string(),
            network: Network::Base,
        };
        let json = serde_json::to_value(&success).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["network"], "base");
        let back: SettleResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back, success);

        let failure: SettleResponse = serde_json::from_str(
            r#"{"success":false,"errorReason":"nope","network":"base-sepolia"}"#,
        )
        .unwrap();
        assert_eq!(
            failure,
            SettleResponse::Error {
                reason: "nope".to_string(),
                network: Network::BaseSepolia
            }
        );
    }
}
