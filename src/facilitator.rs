//! The narrow interface to the external settlement authority.
//!
//! A facilitator verifies payment authorizations against requirements
//! ([`Facilitator::verify`], no side effects) and settles them
//! ([`Facilitator::settle`], effectful: callers request it at most once
//! per successfully executed operation).

use std::fmt::{Debug, Display};
use std::sync::Arc;

use crate::types::{
    PaymentPayload, PaymentRequirements, SettleResponse, SupportedPaymentKindsResponse,
    VerifyResponse,
};

/// Asynchronous interface to a payment facilitator.
///
/// This core never deduplicates or retries: every `verify`/`settle` call is
/// a fresh request, and the facilitator is the idempotency authority (the
/// nonce inside the authorization is the replay guard).
pub trait Facilitator {
    /// The error type returned by this facilitator.
    type Error: Debug + Display;

    /// Checks a payment authorization against one requirement: payload
    /// integrity, signature validity, balance, network and scheme
    /// compatibility. Causes no settlement-side effects.
    fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send;

    /// Submits a verified authorization for execution, causing the actual
    /// value transfer on the settlement network.
    fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> impl Future<Output = Result<SettleResponse, Self::Error>> + Send;

    /// Advisory capability discovery: the `(version, scheme, network)`
    /// combinations this facilitator accepts.
    fn supported(
        &self,
    ) -> impl Future<Output = Result<SupportedPaymentKindsResponse, Self::Error>> + Send;
}

impl<T: Facilitator> Facilitator for Arc<T> {
    type Error = T::Error;

    fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> impl Future<Output = Result<VerifyResponse, Self::Error>> + Send {
        self.as_ref().verify(payload, requirements)
    }

    fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> impl Future<Output = Result<SettleResponse, Self::Error>> + Send {
        self.as_ref().settle(payload, requirements)
    }

    fn supported(
        &self,
    ) -> impl Future<Output = Result<SupportedPaymentKindsResponse, Self::Error>> + Send {
        self.as_ref().supported()
    }
}
