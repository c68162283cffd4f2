//! The payment interception hook.
//!
//! For every inbound tool call the hook decides whether payment is
//! required, builds the set of acceptable requirements, validates a
//! submitted authorization against them, verifies it with the facilitator,
//! and, once the wrapped operation has succeeded, settles and annotates
//! the result. Every terminal rejection is a structured
//! payment-required response carrying the `accepts` list, so callers can
//! recover without a discovery round trip.
//!
//! Settlement ordering is strict: it is never attempted before the
//! operation runs and never runs when the operation reported failure. If
//! settlement fails after a successful execution, the result is replaced
//! with a `SETTLEMENT_FAILED` rejection even though the operation's side
//! effects stand.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use x402_mcp::facilitator::Facilitator;
use x402_mcp::mcp::{CallToolRequest, CallToolResult, PAYMENT_HEADER_NAME, PAYMENT_META_KEY};
use x402_mcp::types::{
    ErrorKind, MixedAddress, PaymentPayload, PaymentRequiredPayload, PaymentRequirements,
    SettleResponse, SettlementAnnotation, VerifyResponse, X402Version,
};

use crate::hooks::{CallContext, CallToolHook, RequestHookOutcome};
use crate::pricing::{PricedTools, Recipients, build_requirements};

/// Selects the requirement a decoded authorization claims to satisfy.
///
/// The match key is `(network, scheme)` only. Amount, recipient, and asset
/// are deliberately not part of the key: matching picks *which* offer the
/// client is answering, verification confirms the claim is economically
/// and cryptographically valid. First match in list order wins.
pub fn match_requirement<'a>(
    accepts: &'a [PaymentRequirements],
    payload: &PaymentPayload,
) -> Option<&'a PaymentRequirements> {
    accepts
        .iter()
        .find(|requirement| {
            requirement.scheme == payload.scheme && requirement.network == payload.network
        })
}

/// Extracts the payment token for a call. A token in call metadata takes
/// precedence over one in the `X-PAYMENT` transport header.
fn extract_token(request: &CallToolRequest, context: &CallContext) -> Option<String> {
    if let Some(Value::String(token)) = request.meta_value(PAYMENT_META_KEY) {
        return Some(token.clone());
    }
    context
        .headers
        .get(PAYMENT_HEADER_NAME)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

fn rejection(
    error: ErrorKind,
    accepts: Vec<PaymentRequirements>,
    payer: Option<MixedAddress>,
) -> CallToolResult {
    CallToolResult::payment_rejection(PaymentRequiredPayload {
        x402_version: X402Version,
        error,
        accepts,
        payer,
    })
}

fn tool_description(name: &str) -> String {
    format!("Paid invocation of the `{name}` tool")
}

/// The payment gate, expressed as one hook among others in a [`HookChain`].
///
/// Holds read references to the process-wide pricing configuration and a
/// facilitator. Carries no per-call state between phases: the result
/// phase re-derives the verified `(payload, requirement)` pair from the
/// request it already validated, which is sound because requirement
/// building is deterministic.
pub struct PaymentHook<F> {
    facilitator: F,
    priced: PricedTools,
    recipients: Recipients,
}

impl<F> PaymentHook<F> {
    pub fn new(facilitator: F, priced: PricedTools, recipients: Recipients) -> Self {
        Self {
            facilitator,
            priced,
            recipients,
        }
    }

    pub fn priced(&self) -> &PricedTools {
        &self.priced
    }

    pub fn recipients(&self) -> &Recipients {
        &self.recipients
    }
}

impl<F> PaymentHook<F>
where
    F: Facilitator + Send + Sync,
{
    /// Settles a verified payment after successful execution and attaches
    /// the receipt, or replaces the result on settlement failure.
    async fn settle_and_annotate(
        &self,
        request: &CallToolRequest,
        payload: &PaymentPayload,
        requirement: &PaymentRequirements,
        mut result: CallToolResult,
    ) -> CallToolResult {
        let settlement = match self.facilitator.settle(payload, requirement).await {
            Ok(settlement) => settlement,
            Err(err) => SettleResponse::Error {
                reason: format!("{err}"),
                network: payload.network,
            },
        };
        match settlement {
            SettleResponse::Success {
                payer,
                transaction,
                network,
            } => {
                info!(tool = %request.name, transaction = %transaction, network = %network,
                    payer = %payer, "payment settled");
                result.annotate_settlement(&SettlementAnnotation {
                    success: true,
                    transaction,
                    network,
                    payer,
                });
                result
            }
            SettleResponse::Error { reason, network } => {
                warn!(tool = %request.name, network = %network, reason = %reason,
                    "settlement failed after execution");
                // No new payment options exist at this point, so the
                // rejection carries an empty accepts list.
                rejection(ErrorKind::SettlementFailed, Vec::new(), None)
            }
        }
    }
}

#[async_trait]
impl<F> CallToolHook for PaymentHook<F>
where
    F: Facilitator + Send + Sync,
{
    async fn process_request(
        &self,
        request: CallToolRequest,
        context: &CallContext,
    ) -> RequestHookOutcome {
        let Some(price) = self.priced.price_of(&request.name) else {
            return RequestHookOutcome::Continue(request);
        };

        let accepts = match build_requirements(
            &request.name,
            &tool_description(&request.name),
            price,
            &self.recipients,
        ) {
            Ok(accepts) => accepts,
            Err(err) => {
                warn!(tool = %request.name, error = %err, "cannot price tool call");
                return RequestHookOutcome::Respond(rejection(
                    ErrorKind::PriceComputeFailed,
                    Vec::new(),
                    None,
                ));
            }
        };

        let Some(token) = extract_token(&request, context) else {
            return RequestHookOutcome::Respond(rejection(
                ErrorKind::PaymentRequired,
                accepts,
                None,
            ));
        };

        let payload = match PaymentPayload::from_base64(&token) {
            Ok(payload) => payload,
            Err(err) => {
                debug!(tool = %request.name, error = %err, "undecodable payment token");
                return RequestHookOutcome::Respond(rejection(
                    ErrorKind::InvalidPayment,
                    accepts,
                    None,
                ));
            }
        };

        let Some(selected) = match_requirement(&accepts, &payload) else {
            return RequestHookOutcome::Respond(rejection(
                ErrorKind::UnableToMatchPaymentRequirements,
                accepts,
                None,
            ));
        };

        let verification = match self.facilitator.verify(&payload, selected).await {
            Ok(verification) => verification,
            Err(err) => {
                warn!(tool = %request.name, error = %err, "verification request failed");
                VerifyResponse::invalid(None, format!("{err}"))
            }
        };

        match verification {
            VerifyResponse::Valid { payer } => {
                debug!(tool = %request.name, payer = %payer, "payment verified");
                RequestHookOutcome::Continue(request)
            }
            VerifyResponse::Invalid { reason, payer } => RequestHookOutcome::Respond(rejection(
                ErrorKind::Verification(reason),
                accepts,
                payer,
            )),
        }
    }

    async fn process_result(
        &self,
        request: &CallToolRequest,
        context: &CallContext,
        result: CallToolResult,
    ) -> CallToolResult {
        let Some(price) = self.priced.price_of(&request.name) else {
            return result;
        };
        if result.is_error {
            // Failed execution: the caller gets the operation's own
            // failure untouched, and nothing is settled.
            return result;
        }
        let Some(token) = extract_token(request, context) else {
            return result;
        };
        let Ok(payload) = PaymentPayload::from_base64(&token) else {
            return result;
        };
        let accepts = match build_requirements(
            &request.name,
            &tool_description(&request.name),
            price,
            &self.recipients,
        ) {
            Ok(accepts) => accepts,
            Err(err) => {
                warn!(tool = %request.name, error = %err, "requirements vanished before settlement");
                return rejection(ErrorKind::SettlementFailed, Vec::new(), None);
            }
        };
        let Some(selected) = match_requirement(&accepts, &payload) else {
            warn!(tool = %request.name, "no matching requirement at settlement time");
            return result;
        };
        self.settle_and_annotate(request, &payload, selected, result)
            .await
    }
}
