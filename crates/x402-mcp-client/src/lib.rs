//! Client-side x402 payment negotiation for tool-invocation RPC.
//!
//! Wraps a single call-execution function with the buyer's half of the
//! negotiation: perform the call, detect a payment-required rejection,
//! select among the offered requirements, construct a signed
//! authorization, and retry exactly once.
//!
//! ## Example
//!
//! ```no_run
//! use alloy_signer_local::PrivateKeySigner;
//! use x402_mcp::mcp::CallToolRequest;
//! use x402_mcp::types::TokenAmount;
//! use x402_mcp_client::X402Client;
//!
//! # async fn example(
//! #     send: impl Fn(CallToolRequest) -> std::pin::Pin<Box<dyn Future<
//! #         Output = Result<x402_mcp::mcp::CallToolResult, std::io::Error>>>>,
//! # ) {
//! let client = X402Client::with_signer(PrivateKeySigner::random())
//!     .with_max_amount(TokenAmount::from(100_000u64)); // at most 0.10 USDC
//! let result = client
//!     .call(CallToolRequest::new("lookup_weather"), send)
//!     .await;
//! # }
//! ```
//!
//! Selection is automatic by default (first `exact` requirement on a
//! payable network, then first `exact`, then first of any kind) and can be
//! overridden with [`X402Client::on_payment_required`].

pub mod negotiator;
pub mod signer;

pub use negotiator::{
    Selection, SelectionCallback, X402CallError, X402Client, X402ClientError,
};
pub use signer::{AuthorizationError, make_payment_payload};
