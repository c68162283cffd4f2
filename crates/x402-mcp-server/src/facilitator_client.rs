//! A [`Facilitator`] implementation backed by a remote facilitator over
//! HTTP.
//!
//! Speaks the facilitator contract: `POST ./verify` and `POST ./settle`
//! with `{x402Version, paymentHeader, paymentRequirements}` bodies and an
//! `X402-Version: 1` header, plus advisory `GET ./supported`.
//!
//! The [`Facilitator`] impl never surfaces a transport fault to the
//! pipeline: network errors, unexpected statuses, and body-parse failures
//! are normalized into invalid/failed results with a reason string. A
//! requirement on a network this deployment does not recognize
//! short-circuits to a failure without any remote call, and a failing
//! `supported()` falls back to the hard-coded default kind list, since it
//! is advisory.

use http::{HeaderMap, StatusCode};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::warn;
use url::Url;

use x402_mcp::facilitator::Facilitator;
use x402_mcp::network::Network;
use x402_mcp::types::{
    PaymentPayload, PaymentRequirements, Scheme, SettleResponse, SupportedPaymentKind,
    SupportedPaymentKindsResponse, VerifyResponse, X402Version,
};

/// Protocol version header attached to every facilitator request.
pub const X402_VERSION_HEADER: &str = "X402-Version";

/// Body of `POST /verify` and `POST /settle`: the token in its transport
/// (base64) form plus the requirement it claims to satisfy.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FacilitatorHttpRequest<'a> {
    x402_version: X402Version,
    payment_header: String,
    payment_requirements: &'a PaymentRequirements,
}

/// The default kind list used when the remote `supported` endpoint is
/// unreachable: version 1, `exact`, every recognized network.
pub fn default_supported_kinds() -> SupportedPaymentKindsResponse {
    SupportedPaymentKindsResponse {
        kinds: Network::variants()
            .iter()
            .map(|network| SupportedPaymentKind {
                x402_version: X402Version,
                scheme: Scheme::Exact,
                network: *network,
            })
            .collect(),
    }
}

#[derive(Clone, Debug)]
struct SupportedCacheState {
    response: SupportedPaymentKindsResponse,
    expires_at: std::time::Instant,
}

/// TTL cache for the `supported` endpoint response. Each clone starts with
/// an independent, empty state.
#[derive(Debug)]
pub struct SupportedCache {
    ttl: Duration,
    state: RwLock<Option<SupportedCacheState>>,
}

impl SupportedCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: RwLock::new(None),
        }
    }

    pub async fn get(&self) -> Option<SupportedPaymentKindsResponse> {
        let guard = self.state.read().await;
        let cache = guard.as_ref()?;
        if std::time::Instant::now() < cache.expires_at {
            Some(cache.response.clone())
        } else {
            None
        }
    }

    pub async fn set(&self, response: SupportedPaymentKindsResponse) {
        let mut guard = self.state.write().await;
        *guard = Some(SupportedCacheState {
            response,
            expires_at: std::time::Instant::now() + self.ttl,
        });
    }
}

impl Clone for SupportedCache {
    fn clone(&self) -> Self {
        Self::new(self.ttl)
    }
}

/// Errors from talking to a remote facilitator. These never cross the
/// [`Facilitator`] trait boundary; see the module docs.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorClientError {
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        context: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("failed to encode payment payload: {0}")]
    PayloadEncode(#[source] serde_json::Error),
    #[error("HTTP error: {context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        context: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("failed to read response body: {context}: {source}")]
    ResponseBodyRead {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

/// HTTP client for a remote facilitator's `verify`, `settle`, and
/// `supported` endpoints.
#[derive(Clone, Debug)]
pub struct FacilitatorClient {
    base_url: Url,
    verify_url: Url,
    settle_url: Url,
    supported_url: Url,
    client: Client,
    headers: HeaderMap,
    timeout: Option<Duration>,
    networks: Vec<Network>,
    supported_cache: SupportedCache,
}

impl FacilitatorClient {
    /// Default TTL for caching the supported endpoint response.
    pub const DEFAULT_SUPPORTED_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

    /// Constructs a client from a base URL, deriving the `./verify`,
    /// `./settle`, and `./supported` endpoints relative to it.
    pub fn try_new(base_url: Url) -> Result<Self, FacilitatorClientError> {
        let client = Client::new();
        let verify_url = base_url
            .join("./verify")
            .map_err(|e| FacilitatorClientError::UrlParse {
                context: "failed to construct ./verify URL",
                source: e,
            })?;
        let settle_url = base_url
            .join("./settle")
            .map_err(|e| FacilitatorClientError::UrlParse {
                context: "failed to construct ./settle URL",
                source: e,
            })?;
        let supported_url =
            base_url
                .join("./supported")
                .map_err(|e| FacilitatorClientError::UrlParse {
                    context: "failed to construct ./supported URL",
                    source: e,
                })?;
        Ok(Self {
            base_url,
            verify_url,
            settle_url,
            supported_url,
            client,
            headers: HeaderMap::new(),
            timeout: None,
            networks: Network::variants().to_vec(),
            supported_cache: SupportedCache::new(Self::DEFAULT_SUPPORTED_CACHE_TTL),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn verify_url(&self) -> &Url {
        &self.verify_url
    }

    pub fn settle_url(&self) -> &Url {
        &self.settle_url
    }

    pub fn supported_url(&self) -> &Url {
        &self.supported_url
    }

    /// Attaches custom headers to all future requests.
    pub fn with_headers(&self, headers: HeaderMap) -> Self {
        let mut this = self.clone();
        this.headers = headers;
        this
    }

    /// Sets a timeout for all future requests.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut this = self.clone();
        this.timeout = Some(timeout);
        this
    }

    /// Restricts the networks this deployment recognizes. Requirements on
    /// other networks fail without a remote call.
    pub fn with_networks<N: Into<Vec<Network>>>(&self, networks: N) -> Self {
        let mut this = self.clone();
        this.networks = networks.into();
        this
    }

    /// Sets the TTL for caching the supported endpoint response.
    pub fn with_supported_cache_ttl(&self, ttl: Duration) -> Self {
        let mut this = self.clone();
        this.supported_cache = SupportedCache::new(ttl);
        this
    }

    /// Disables caching for the supported endpoint.
    pub fn without_supported_cache(&self) -> Self {
        self.with_supported_cache_ttl(Duration::ZERO)
    }

    /// Sends `POST /verify`, surfacing transport faults to the caller.
    pub async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, FacilitatorClientError> {
        let body = Self::http_request(payload, requirements)?;
        self.post_json(&self.verify_url, "POST /verify", &body).await
    }

    /// Sends `POST /settle`, surfacing transport faults to the caller.
    pub async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, FacilitatorClientError> {
        let body = Self::http_request(payload, requirements)?;
        self.post_json(&self.settle_url, "POST /settle", &body).await
    }

    /// Sends `GET /supported`, bypassing the cache.
    pub async fn supported_inner(
        &self,
    ) -> Result<SupportedPaymentKindsResponse, FacilitatorClientError> {
        self.get_json(&self.supported_url, "GET /supported").await
    }

    /// Returns the facilitator's supported kinds, cached with the
    /// configured TTL.
    pub async fn supported(
        &self,
    ) -> Result<SupportedPaymentKindsResponse, FacilitatorClientError> {
        if let Some(response) = self.supported_cache.get().await {
            return Ok(response);
        }
        let response = self.supported_inner().await?;
        self.supported_cache.set(response.clone()).await;
        Ok(response)
    }

    fn http_request<'a>(
        payload: &PaymentPayload,
        requirements: &'a PaymentRequirements,
    ) -> Result<FacilitatorHttpRequest<'a>, FacilitatorClientError> {
        let payment_header = payload
            .to_base64()
            .map_err(FacilitatorClientError::PayloadEncode)?;
        Ok(FacilitatorHttpRequest {
            x402_version: X402Version,
            payment_header,
            payment_requirements: requirements,
        })
    }

    async fn post_json<T, R>(
        &self,
        url: &Url,
        context: &'static str,
        payload: &T,
    ) -> Result<R, FacilitatorClientError>
    where
        T: serde::Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let mut req = self
            .client
            .post(url.clone())
            .header(X402_VERSION_HEADER, X402Version::VALUE.to_string())
            .json(payload);
        for (key, value) in self.headers.iter() {
            req = req.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|e| FacilitatorClientError::Http { context, source: e })?;

        if http_response.status() == StatusCode::OK {
            http_response
                .json::<R>()
                .await
                .map_err(|e| FacilitatorClientError::JsonDeserialization { context, source: e })
        } else {
            let status = http_response.status();
            let body = http_response
                .text()
                .await
                .map_err(|e| FacilitatorClientError::ResponseBodyRead { context, source: e })?;
            Err(FacilitatorClientError::HttpStatus {
                context,
                status,
                body,
            })
        }
    }

    async fn get_json<R>(&self, url: &Url, context: &'static str) -> Result<R, FacilitatorClientError>
    where
        R: serde::de::DeserializeOwned,
    {
        let mut req = self
            .client
            .get(url.clone())
            .header(X402_VERSION_HEADER, X402Version::VALUE.to_string());
        for (key, value) in self.headers.iter() {
            req = req.header(key, value);
        }
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|e| FacilitatorClientError::Http { context, source: e })?;

        if http_response.status() == StatusCode::OK {
            http_response
                .json::<R>()
                .await
                .map_err(|e| FacilitatorClientError::JsonDeserialization { context, source: e })
        } else {
            let status = http_response.status();
            let body = http_response
                .text()
                .await
                .map_err(|e| FacilitatorClientError::ResponseBodyRead { context, source: e })?;
            Err(FacilitatorClientError::HttpStatus {
                context,
                status,
                body,
            })
        }
    }
}

impl Facilitator for FacilitatorClient {
    type Error = FacilitatorClientError;

    /// Verifies remotely; any transport fault becomes an invalid verdict.
    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, Self::Error> {
        if !self.networks.contains(&requirements.network) {
            return Ok(VerifyResponse::invalid(
                None,
                format!("unsupported network: {}", requirements.network),
            ));
        }
        match FacilitatorClient::verify(self, payload, requirements).await {
            Ok(response) => Ok(response),
            Err(err) => {
                warn!(error = %err, "verify request to facilitator failed");
                Ok(VerifyResponse::invalid(
                    None,
                    format!("verification unavailable: {err}"),
                ))
            }
        }
    }

    /// Settles remotely; any transport fault becomes a failed settlement.
    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, Self::Error> {
        if !self.networks.contains(&requirements.network) {
            return Ok(SettleResponse::Error {
                reason: format!("unsupported network: {}", requirements.network),
                network: requirements.network,
            });
        }
        match FacilitatorClient::settle(self, payload, requirements).await {
            Ok(response) => Ok(response),
            Err(err) => {
                warn!(error = %err, "settle request to facilitator failed");
                Ok(SettleResponse::Error {
                    reason: format!("settlement unavailable: {err}"),
                    network: requirements.network,
                })
            }
        }
    }

    /// Capability discovery is advisory: a failing remote call falls back
    /// to the default kind list instead of erroring.
    async fn supported(&self) -> Result<SupportedPaymentKindsResponse, Self::Error> {
        match FacilitatorClient::supported(self).await {
            Ok(response) => Ok(response),
            Err(err) => {
                warn!(error = %err, "supported request failed, using defaults");
                Ok(default_supported_kinds())
            }
        }
    }
}

/// Converts a string URL into a client, normalizing trailing slashes.
impl TryFrom<&str> for FacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut normalized = value.trim_end_matches('/').to_string();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| FacilitatorClientError::UrlParse {
            context: "failed to parse base url",
            source: e,
        })?;
        FacilitatorClient::try_new(url)
    }
}

impl TryFrom<String> for FacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        FacilitatorClient::try_from(value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use x402_mcp::types::{
        EvmAddress, EvmSignature, ExactEvmPayload, ExactEvmPayloadAuthorization, HexEncodedNonce,
        MixedAddress, TokenAmount, UnixTimestamp,
    };

    fn sample_payload(network: Network) -> PaymentPayload {
        PaymentPayload {
            x402_version: X402Version,
            scheme: Scheme::Exact,
            network,
            payload: ExactEvmPayload {
                signature: EvmSignature([3; 65]),
                authorization: ExactEvmPayloadAuthorization {
                    from: EvmAddress(address!("0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045")),
                    to: EvmAddress(address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e")),
                    value: TokenAmount::from(10_000u64),
                    valid_after: UnixTimestamp(0),
                    valid_before: UnixTimestamp(4_000_000_000),
                    nonce: HexEncodedNonce([5; 32]),
                },
            },
        }
    }

    fn sample_requirements(network: Network) -> PaymentRequirements {
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
            extra: None,
        }
    }

    #[tokio::test]
    async fn verify_posts_token_and_requirements() {
        let server = MockServer::start().await;
        let payload = sample_payload(Network::BaseSepolia);
        let token = payload.to_base64().unwrap();
        Mock::given(method("POST"))
            .and(path("/verify"))
            .and(header(X402_VERSION_HEADER, "1"))
            .and(body_partial_json(json!({
                "x402Version": 1,
                "paymentHeader": token,
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "isValid": true,
                "payer": "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = FacilitatorClient::try_from(server.uri().as_str()).unwrap();
        let response = Facilitator::verify(
            &client,
            &payload,
            &sample_requirements(Network::BaseSepolia),
        )
        .await
        .unwrap();
        assert!(matches!(response, VerifyResponse::Valid { .. }));
    }

    #[tokio::test]
    async fn verify_normalizes_http_faults_into_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = FacilitatorClient::try_from(server.uri().as_str()).unwrap();
        let response = Facilitator::verify(
            &client,
            &sample_payload(Network::BaseSepolia),
            &sample_requirements(Network::BaseSepolia),
        )
        .await
        .unwrap();
        match response {
            VerifyResponse::Invalid { reason, payer } => {
                assert!(reason.contains("500"));
                assert!(payer.is_none());
            }
            other => panic!("expected invalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unrecognized_network_short_circuits_without_remote_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/verify"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "isValid": true,
                "payer": "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045"
            })))
            .expect(0)
            .mount(&server)
            .await;

        let client = FacilitatorClient::try_from(server.uri().as_str())
            .unwrap()
            .with_networks(vec![Network::Base]);
        let response = Facilitator::verify(
            &client,
            &sample_payload(Network::BaseSepolia),
            &sample_requirements(Network::BaseSepolia),
        )
        .await
        .unwrap();
        match response {
            VerifyResponse::Invalid { reason, .. } => {
                assert!(reason.contains("unsupported network"));
            }
            other => panic!("expected invalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn settle_parses_success_and_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/settle"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "payer": "0xd8dA6BF26964aF9D7eEd9e03E53415D37aA96045",
                "transaction": "0xdeadbeef",
                "network": "base-sepolia"
            })))
            .mount(&server)
            .await;

        let client = FacilitatorClient::try_from(server.uri().as_str()).unwrap();
        let response = Facilitator::settle(
            &client,
            &sample_payload(Network::BaseSepolia),
            &sample_requirements(Network::BaseSepolia),
        )
        .await
        .unwrap();
        match response {
            SettleResponse::Success { transaction, .. } => {
                assert_eq!(transaction, "0xdeadbeef");
            }
            other => panic!("expected success, got {other:?}"),
        }

        // An unreachable settle endpoint is a failed settlement, not a fault.
        let dead = FacilitatorClient::try_from("http://127.0.0.1:1/").unwrap();
        let response = Facilitator::settle(
            &dead,
            &sample_payload(Network::BaseSepolia),
            &sample_requirements(Network::BaseSepolia),
        )
        .await
        .unwrap();
        assert!(matches!(response, SettleResponse::Error { .. }));
    }

    #[tokio::test]
    async fn supported_falls_back_to_defaults() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/supported"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = FacilitatorClient::try_from(server.uri().as_str()).unwrap();
        let response = Facilitator::supported(&client).await.unwrap();
        assert_eq!(response, default_supported_kinds());
        assert_eq!(response.kinds.len(), Network::variants().len());
    }

    #[tokio::test]
    async fn supported_is_cached_within_ttl() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/supported"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "kinds": [
                    {"x402Version": 1, "scheme": "exact", "network": "base"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = FacilitatorClient::try_from(server.uri().as_str()).unwrap();
        let first = FacilitatorClient::supported(&client).await.unwrap();
        let second = FacilitatorClient::supported(&client).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.kinds.len(), 1);
    }

    #[test]
    fn base_url_normalization() {
        let client = FacilitatorClient::try_from("https://facilitator.example//").unwrap();
        assert_eq!(client.verify_url().as_str(), "https://facilitator.example/verify");
        assert_eq!(client.settle_url().as_str(), "https://facilitator.example/settle");
        assert_eq!(
            client.supported_url().as_str(),
            "https://facilitator.example/supported"
        );
    }
}
