//! Core types for x402 pay-per-call negotiation over a tool-invocation
//! RPC protocol.
//!
//! A caller invokes a named remote tool; if that tool is priced, the callee
//! rejects the call with a structured description of acceptable payment
//! options, the caller retries with a signed payment authorization, and the
//! callee verifies the authorization with an external facilitator before
//! executing, and settles only after the tool itself succeeds.
//!
//! This crate holds the pieces both sides share:
//!
//! - [`types`] — wire types: payment payloads, requirements, facilitator
//!   verdicts, rejection and receipt payloads, and the base64 header codec.
//! - [`network`] — the recognized settlement networks and the static USDC
//!   deployment table.
//! - [`mcp`] — the value types at the tool-call boundary and the `_meta`
//!   field contract (`x402/payment`, `x402/error`, `x402/payment-response`).
//! - [`facilitator`] — the [`Facilitator`](facilitator::Facilitator) trait:
//!   verify (no side effects), settle (effectful), supported (advisory).
//!
//! The seller-side interception pipeline lives in `x402-mcp-server`; the
//! buyer-side retry wrapper lives in `x402-mcp-client`.

pub mod facilitator;
pub mod mcp;
pub mod network;
pub mod types;
