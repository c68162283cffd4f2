//! Server-side x402 payment interception for tool-invocation RPC.
//!
//! This crate gates tool calls behind x402 payments. The pieces compose
//! around a [`HookChain`]:
//!
//! - [`hooks`] — the ordered interceptor pipeline. Each hook can rewrite
//!   or answer a request and post-process the result; the payment gate is
//!   one hook among others (logging, auth, analytics).
//! - [`pricing`] — the tool→price table, the ordered network→recipient
//!   map, and [`build_requirements`](pricing::build_requirements), the
//!   pure function producing the `accepts` list for one call.
//! - [`payment`] — [`PaymentHook`](payment::PaymentHook), the state
//!   machine sequencing decide-if-priced → decode → match → verify →
//!   execute → settle-on-success → annotate.
//! - [`discovery`] — non-gating payment hints on tool listings.
//! - [`facilitator_client`] — the HTTP client for a remote facilitator's
//!   `verify`/`settle`/`supported` endpoints.
//!
//! ## Example
//!
//! ```no_run
//! use x402_mcp_server::{FacilitatorClient, HookChain, PaymentHook, PricedTools, Recipients};
//! use x402_mcp::network::Network;
//!
//! let facilitator = FacilitatorClient::try_from("https://facilitator.example").unwrap();
//! let priced = PricedTools::new().with_price("lookup_weather", "0.01");
//! let recipients = Recipients::new()
//!     .with_recipient(Network::Base, "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045".parse().unwrap());
//! let chain = HookChain::new().with_hook(PaymentHook::new(facilitator, priced, recipients));
//! ```

pub mod discovery;
pub mod facilitator_client;
pub mod hooks;
pub mod payment;
pub mod pricing;

pub use discovery::annotate_tools;
pub use facilitator_client::{FacilitatorClient, FacilitatorClientError, default_supported_kinds};
pub use hooks::{CallContext, CallToolHook, HookChain, RequestHookOutcome, TracingHook};
pub use payment::{PaymentHook, match_requirement};
pub use pricing::{
    DEFAULT_MAX_TIMEOUT_SECONDS, Price, PriceComputeError, PricedTools, Recipients,
    build_requirements,
};
