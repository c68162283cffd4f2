//! The buyer-side retry wrapper.
//!
//! [`X402Client::call`] wraps a single call-execution function with
//! at-most-one-retry semantics: the call either succeeds on the first
//! attempt, fails for a non-payment reason, or fails/succeeds on exactly
//! one paid retry. Selection among the offered requirements is automatic
//! by default and can be overridden per call through a selection callback,
//! which may also decline outright.

use std::sync::Arc;

use alloy_signer::Signer;
use serde_json::Value;
use tracing::debug;

use x402_mcp::mcp::{CallToolRequest, CallToolResult, PAYMENT_META_KEY};
use x402_mcp::network::Network;
use x402_mcp::types::{PaymentRequirements, Scheme, TokenAmount};

use crate::signer::{AuthorizationError, make_payment_payload};

/// What a selection callback chose to do with the offered requirements.
///
/// An out-of-range index, an unoffered network, or an unoffered
/// requirement falls back to automatic selection rather than failing.
pub enum Selection {
    /// Proceed with automatic selection.
    Default,
    /// Abort: no payment, no retry.
    Decline,
    /// Pick the requirement at this position in the `accepts` list.
    Index(usize),
    /// Pick the first requirement on this network.
    Network(Network),
    /// Pick this exact requirement, matched by equality.
    Requirement(Box<PaymentRequirements>),
}

/// Callback consulted with the full `accepts` list before paying.
pub type SelectionCallback = Arc<dyn Fn(&[PaymentRequirements]) -> Selection + Send + Sync>;

/// Client-side payment failures. All terminal: none of these triggers a
/// retry.
#[derive(Debug, thiserror::Error)]
pub enum X402ClientError {
    #[error("payment declined by selection callback")]
    Declined,
    #[error("no signing capability for network {network}")]
    UnsupportedNetwork { network: Network },
    #[error("required amount {requested} exceeds configured maximum {allowed}")]
    AmountTooLarge {
        requested: TokenAmount,
        allowed: TokenAmount,
    },
    #[error("no suitable payment option among {count} offered")]
    NoSuitablePaymentMethod { count: usize },
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
    #[error("failed to encode payment token")]
    TokenEncode(#[source] serde_json::Error),
}

/// Error of one wrapped call: the transport failed, or the payment flow
/// aborted client-side.
#[derive(Debug, thiserror::Error)]
pub enum X402CallError<E> {
    #[error("call failed: {0}")]
    Transport(E),
    #[error(transparent)]
    Payment(#[from] X402ClientError),
}

/// Wraps tool calls with x402 payment negotiation.
///
/// Owns the signing key, the set of networks it can pay on, an optional
/// atomic-unit spending cap, and an optional selection callback.
#[derive(Clone)]
pub struct X402Client {
    signer: Arc<dyn Signer + Send + Sync>,
    networks: Vec<Network>,
    max_amount: Option<TokenAmount>,
    on_payment_required: Option<SelectionCallback>,
}

impl X402Client {
    /// Creates a client around a signer, payable on every known network.
    pub fn with_signer<S: Signer + Send + Sync + 'static>(signer: S) -> Self {
        Self {
            signer: Arc::new(signer),
            networks: Network::variants().to_vec(),
            max_amount: None,
            on_payment_required: None,
        }
    }

    /// Restricts the networks this client will pay on.
    pub fn with_networks<N: Into<Vec<Network>>>(&self, networks: N) -> Self {
        let mut this = self.clone();
        this.networks = networks.into();
        this
    }

    /// Caps the amount (in atomic units) this client will authorize.
    pub fn with_max_amount<A: Into<TokenAmount>>(&self, max: A) -> Self {
        let mut this = self.clone();
        this.max_amount = Some(max.into());
        this
    }

    /// Installs a selection callback consulted before any payment.
    pub fn on_payment_required<C>(&self, callback: C) -> Self
    where
        C: Fn(&[PaymentRequirements]) -> Selection + Send + Sync + 'static,
    {
        let mut this = self.clone();
        this.on_payment_required = Some(Arc::new(callback));
        this
    }

    /// Performs a tool call with at-most-one paid retry.
    ///
    /// The first attempt goes out as given. A result that is not an error,
    /// or an error without an `accepts` list, is returned unchanged. For a
    /// payment-required rejection, the client selects a requirement, signs
    /// an authorization, attaches the token under `x402/payment`, and
    /// retries exactly once, returning whatever that retry yields.
    pub async fn call<F, Fut, E>(
        &self,
        request: CallToolRequest,
        call_fn: F,
    ) -> Result<CallToolResult, X402CallError<E>>
    where
        F: Fn(CallToolRequest) -> Fut,
        Fut: Future<Output = Result<CallToolResult, E>>,
    {
        let first = call_fn(request.clone())
            .await
            .map_err(X402CallError::Transport)?;
        if !first.is_error {
            return Ok(first);
        }
        let Some(rejection) = first.payment_rejection_payload() else {
            return Ok(first);
        };
        if rejection.accepts.is_empty() {
            return Ok(first);
        }
        debug!(error = %rejection.error, options = rejection.accepts.len(), "payment required");

        let selected = self
            .select_requirement(&rejection.accepts)
            .map_err(X402CallError::Payment)?;
        if !self.networks.contains(&selected.network) {
            return Err(X402ClientError::UnsupportedNetwork {
                network: selected.network,
            }
            .into());
        }
        if let Some(allowed) = self.max_amount
            && selected.max_amount_required > allowed
        {
            return Err(X402ClientError::AmountTooLarge {
                requested: selected.max_amount_required,
                allowed,
            }
            .into());
        }

        let payload = make_payment_payload(self.signer.as_ref(), &selected)
            .await
            .map_err(X402ClientError::from)?;
        let token = payload
            .to_base64()
            .map_err(X402ClientError::TokenEncode)?;

        let mut retry = request;
        retry.insert_meta(PAYMENT_META_KEY, Value::String(token));
        debug!(tool = %retry.name, network = %selected.network, "retrying with payment");
        call_fn(retry).await.map_err(X402CallError::Transport)
    }

    /// Applies the selection callback, falling back to automatic selection
    /// when it defers or chooses something not on offer.
    fn select_requirement(
        &self,
        accepts: &[PaymentRequirements],
    ) -> Result<PaymentRequirements, X402ClientError> {
        if let Some(callback) = &self.on_payment_required {
            match callback(accepts) {
                Selection::Decline => return Err(X402ClientError::Declined),
                Selection::Index(index) => {
                    if let Some(requirement) = accepts.get(index) {
                        return Ok(requirement.clone());
                    }
                    debug!(index, "selection index out of range, using automatic");
                }
                Selection::Network(network) => {
                    if let Some(requirement) = accepts.iter().find(|r| r.network == network) {
                        return Ok(requirement.clone());
                    }
                    debug!(%network, "selected network not offered, using automatic");
                }
                Selection::Requirement(requirement) => {
                    if accepts.contains(requirement.as_ref()) {
                        return Ok(*requirement);
                    }
                    debug!("selected requirement not offered, using automatic");
                }
                Selection::Default => {}
            }
        }
        self.automatic_selection(accepts)
            .ok_or(X402ClientError::NoSuitablePaymentMethod {
                count: accepts.len(),
            })
    }

    /// Automatic order: first `exact` requirement on a payable network,
    /// else first `exact` requirement, else the first requirement of any
    /// kind. Within each band the server's list order decides.
    fn automatic_selection(&self, accepts: &[PaymentRequirements]) -> Option<PaymentRequirements> {
        accepts
            .iter()
            .find(|r| r.scheme == Scheme::Exact && self.networks.contains(&r.network))
            .or_else(|| accepts.iter().find(|r| r.scheme == Scheme::Exact))
            .or_else(|| accepts.first())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use alloy_signer_local::PrivateKeySigner;
    use serde_json::json;
    use std::convert::Infallible;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use x402_mcp::types::{
        ErrorKind, EvmAddress, MixedAddress, PaymentPayload, PaymentRequiredPayload, X402Version,
    };

    fn requirement_on(network: Network) -> PaymentRequirements {
        PaymentRequirements {
            scheme: Scheme::Exact,
            network,
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

    fn rejection_with(accepts: Vec<PaymentRequirements>) -> CallToolResult {
        CallToolResult::payment_rejection(PaymentRequiredPayload {
            x402_version: X402Version,
            error: ErrorKind::PaymentRequired,
            accepts,
            payer: None,
        })
    }

    /// Test double for the remote endpoint: rejects unpaid calls, records
    /// the token of paid ones.
    struct Endpoint {
        accepts: Vec<PaymentRequirements>,
        calls: AtomicUsize,
        paid_token: Mutex<Option<String>>,
        always_reject: bool,
    }

    impl Endpoint {
        fn new(accepts: Vec<PaymentRequirements>) -> Self {
            Self {
                accepts,
                calls: AtomicUsize::new(0),
                paid_token: Mutex::new(None),
                always_reject: false,
            }
        }

        fn always_rejecting(accepts: Vec<PaymentRequirements>) -> Self {
            Self {
                always_reject: true,
                ..Self::new(accepts)
            }
        }

        async fn handle(&self, request: CallToolRequest) -> Result<CallToolResult, Infallible> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match request.meta_value(PAYMENT_META_KEY) {
                Some(Value::String(token)) if !self.always_reject => {
                    *self.paid_token.lock().unwrap() = Some(token.clone());
                    Ok(CallToolResult::text("sunny"))
                }
                _ => Ok(rejection_with(self.accepts.clone())),
            }
        }
    }

    fn client() -> X402Client {
        X402Client::with_signer(PrivateKeySigner::random())
    }

    #[tokio::test]
    async fn non_error_results_pass_through_without_retry() {
        let calls = AtomicUsize::new(0);
        let result = client()
            .call(CallToolRequest::new("free_tool"), |_request| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, Infallible>(CallToolResult::text("hello")) }
            })
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn plain_errors_pass_through_without_retry() {
        let calls = AtomicUsize::new(0);
        let result = client()
            .call(CallToolRequest::new("tool"), |_request| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, Infallible>(CallToolResult::error("not payment related")) }
            })
            .await
            .unwrap();
        assert!(result.is_error);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn pays_and_retries_exactly_once() {
        let endpoint = Endpoint::new(vec![requirement_on(Network::BaseSepolia)]);
        let result = client()
            .call(CallToolRequest::new("lookup_weather"), |request| {
                endpoint.handle(request)
            })
            .await
            .unwrap();

        assert!(!result.is_error);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 2);
        let token = endpoint.paid_token.lock().unwrap().clone().unwrap();
        let payload = PaymentPayload::from_base64(&token).unwrap();
        assert_eq!(payload.network, Network::BaseSepolia);
        assert_eq!(
            payload.payload.authorization.value,
            TokenAmount::from(10_000u64)
        );
    }

    #[tokio::test]
    async fn a_rejected_retry_is_returned_as_is() {
        let endpoint = Endpoint::always_rejecting(vec![requirement_on(Network::BaseSepolia)]);
        let result = client()
            .call(CallToolRequest::new("lookup_weather"), |request| {
                endpoint.handle(request)
            })
            .await
            .unwrap();

        // Two calls, no third: at-most-one retry.
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 2);
        assert!(result.is_error);
        assert!(result.payment_rejection_payload().is_some());
    }

    #[tokio::test]
    async fn automatic_selection_prefers_payable_networks() {
        let endpoint = Endpoint::new(vec![
            requirement_on(Network::Avalanche),
            requirement_on(Network::BaseSepolia),
        ]);
        let negotiator = client().with_networks(vec![Network::BaseSepolia]);
        negotiator
            .call(CallToolRequest::new("lookup_weather"), |request| {
                endpoint.handle(request)
            })
            .await
            .unwrap();

        let token = endpoint.paid_token.lock().unwrap().clone().unwrap();
        let payload = PaymentPayload::from_base64(&token).unwrap();
        assert_eq!(payload.network, Network::BaseSepolia);
    }

    #[tokio::test]
    async fn decline_aborts_without_retry() {
        let endpoint = Endpoint::new(vec![requirement_on(Network::BaseSepolia)]);
        let negotiator = client().on_payment_required(|_accepts| Selection::Decline);
        let err = negotiator
            .call(CallToolRequest::new("lookup_weather"), |request| {
                endpoint.handle(request)
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            X402CallError::Payment(X402ClientError::Declined)
        ));
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn out_of_range_selection_falls_back_to_automatic() {
        let endpoint = Endpoint::new(vec![requirement_on(Network::BaseSepolia)]);
        let negotiator = client().on_payment_required(|_accepts| Selection::Index(42));
        let result = negotiator
            .call(CallToolRequest::new("lookup_weather"), |request| {
                endpoint.handle(request)
            })
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn callback_can_pick_by_network() {
        let endpoint = Endpoint::new(vec![
            requirement_on(Network::BaseSepolia),
            requirement_on(Network::Avalanche),
        ]);
        let negotiator =
            client().on_payment_required(|_accepts| Selection::Network(Network::Avalanche));
        negotiator
            .call(CallToolRequest::new("lookup_weather"), |request| {
                endpoint.handle(request)
            })
            .await
            .unwrap();

        let token = endpoint.paid_token.lock().unwrap().clone().unwrap();
        let payload = PaymentPayload::from_base64(&token).unwrap();
        assert_eq!(payload.network, Network::Avalanche);
    }

    #[tokio::test]
    async fn unpayable_network_is_a_terminal_error() {
        let endpoint = Endpoint::new(vec![requirement_on(Network::BaseSepolia)]);
        let negotiator = client().with_networks(vec![Network::Avalanche]);
        let err = negotiator
            .call(CallToolRequest::new("lookup_weather"), |request| {
                endpoint.handle(request)
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            X402CallError::Payment(X402ClientError::UnsupportedNetwork {
                network: Network::BaseSepolia
            })
        ));
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn amount_above_cap_is_a_terminal_error() {
        let endpoint = Endpoint::new(vec![requirement_on(Network::BaseSepolia)]);
        let negotiator = client().with_max_amount(TokenAmount::from(100u64));
        let err = negotiator
            .call(CallToolRequest::new("lookup_weather"), |request| {
                endpoint.handle(request)
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            X402CallError::Payment(X402ClientError::AmountTooLarge { .. })
        ));
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
    }
}
