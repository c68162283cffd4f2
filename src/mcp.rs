//! Value types at the tool-invocation RPC boundary.
//!
//! The transport and session machinery of the tool protocol live outside
//! this crate; the negotiation layer only ever sees the request, result,
//! and descriptor values defined here, serde-compatible with the tool
//! protocol's wire form (`_meta` fields, camelCase names).
//!
//! The metadata contract is also owned here: which `_meta` keys carry the
//! payment token, the structured rejection, and the settlement receipt.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{PaymentRequiredPayload, SettlementAnnotation};

/// Request-side metadata field carrying the base64 payment token.
pub const PAYMENT_META_KEY: &str = "x402/payment";

/// Result-side metadata field carrying a [`PaymentRequiredPayload`].
pub const ERROR_META_KEY: &str = "x402/error";

/// Result-side metadata field carrying a [`SettlementAnnotation`].
pub const PAYMENT_RESPONSE_META_KEY: &str = "x402/payment-response";

/// Transport header consulted for the payment token when the metadata
/// field is absent.
pub const PAYMENT_HEADER_NAME: &str = "X-PAYMENT";

/// Open metadata map (`_meta` on the wire).
pub type Meta = serde_json::Map<String, Value>;

/// A single invocation of a named remote tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallToolRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Meta>,
    #[serde(default, rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl CallToolRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: None,
            meta: None,
        }
    }

    pub fn with_arguments(mut self, arguments: Meta) -> Self {
        self.arguments = Some(arguments);
        self
    }

    /// Looks up a metadata value by key.
    pub fn meta_value(&self, key: &str) -> Option<&Value> {
        self.meta.as_ref().and_then(|meta| meta.get(key))
    }

    /// Inserts a metadata value, creating the map if absent.
    pub fn insert_meta(&mut self, key: impl Into<String>, value: Value) {
        self.meta.get_or_insert_default().insert(key.into(), value);
    }
}

/// One piece of tool-result content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text { text: String },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }
}

/// Outcome of a tool invocation.
///
/// `is_error` distinguishes an operation-level failure from a success; the
/// negotiation layer additionally reads and writes the `_meta` fields named
/// by the constants in this module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<Content>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl CallToolResult {
    /// A successful result with a single text content item.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
            meta: None,
        }
    }

    /// A failed result with a single text content item.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: true,
            meta: None,
        }
    }

    pub fn meta_value(&self, key: &str) -> Option<&Value> {
        self.meta.as_ref().and_then(|meta| meta.get(key))
    }

    pub fn insert_meta(&mut self, key: impl Into<String>, value: Value) {
        self.meta.get_or_insert_default().insert(key.into(), value);
    }

    /// Builds the structured rejection the pipeline returns instead of
    /// executing a gated tool: `isError` set, a human-readable summary in
    /// the content, and the machine-readable payload under `x402/error`.
    pub fn payment_rejection(payload: PaymentRequiredPayload) -> Self {
        let mut result = CallToolResult::error(format!("Payment required: {}", payload.error));
        let value =
            serde_json::to_value(&payload).expect("PaymentRequiredPayload serialization failed");
        result.insert_meta(ERROR_META_KEY, value);
        result
    }

    /// Parses the `x402/error` metadata field, if present and well-formed.
    pub fn payment_rejection_payload(&self) -> Option<PaymentRequiredPayload> {
        let value = self.meta_value(ERROR_META_KEY)?;
        serde_json::from_value(value.clone()).ok()
    }

    /// Attaches a settlement receipt under `x402/payment-response`.
    pub fn annotate_settlement(&mut self, annotation: &SettlementAnnotation) {
        let value =
            serde_json::to_value(annotation).expect("SettlementAnnotation serialization failed");
        self.insert_meta(PAYMENT_RESPONSE_META_KEY, value);
    }

    /// Parses the `x402/payment-response` metadata field, if present.
    pub fn settlement_annotation(&self) -> Option<SettlementAnnotation> {
        let value = self.meta_value(PAYMENT_RESPONSE_META_KEY)?;
        serde_json::from_value(value.clone()).ok()
    }
}

/// Descriptor of an available tool, as returned when listing operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
    #[serde(default, rename = "_meta", skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: None,
            input_schema,
            meta: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn insert_meta(&mut self, key: impl Into<String>, value: Value) {
        self.meta.get_or_insert_default().insert(key.into(), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorKind, X402Version};

    #[test]
    fn request_meta_serializes_under_underscore_meta() {
        let mut request = CallToolRequest::new("lookup_weather");
        request.insert_meta(PAYMENT_META_KEY, Value::String("dG9rZW4=".to_string()));
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["_meta"][PAYMENT_META_KEY], "dG9rZW4=");
        let back: CallToolRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, request);
    }

    #[test]
    fn payment_rejection_round_trips() {
        let payload = PaymentRequiredPayload {
            x402_version: X402Version,
            error: ErrorKind::PaymentRequired,
            accepts: vec![],
            payer: None,
        };
        let result = CallToolResult::payment_rejection(payload.clone());
        assert!(result.is_error);
        assert_eq!(result.payment_rejection_payload(), Some(payload));
    }

    #[test]
    fn plain_result_has_no_rejection() {
        let result = CallToolResult::text("ok");
        assert!(result.payment_rejection_payload().is_none());
        assert!(result.settlement_annotation().is_none());
    }
}
