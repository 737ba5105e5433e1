//! Minimal AWS service transport: SigV4-signed JSON and Query protocol calls
//! over a retrying reqwest client.
//!
//! One [`AwsClient`] is built at startup and shared by every service client.
//! Calls that must not be repeated go through [`AwsClient::json_call_once`]
//! and [`AwsClient::query_call_once`], which skip the retry middleware.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use object_store::aws::{AmazonS3Builder, AwsCredential, AwsCredentialProvider};
use object_store::StaticCredentialProvider;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod cloudformation;
pub mod codepipeline;
pub mod s3;
pub mod sigv4;
pub mod stepfunctions;

/// Bucket name handed to the S3 builder when only its credential chain is used.
const CREDENTIALS_ONLY_BUCKET: &str = "approval-gate-credentials";

#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl Credentials {
    /// Fixed credentials as a provider.
    pub fn into_provider(self) -> AwsCredentialProvider {
        Arc::new(StaticCredentialProvider::new(AwsCredential {
            key_id: self.access_key_id,
            secret_key: self.secret_access_key,
            token: self.session_token,
        }))
    }
}

impl From<&AwsCredential> for Credentials {
    fn from(c: &AwsCredential) -> Self {
        Self {
            access_key_id: c.key_id.clone(),
            secret_access_key: c.secret_key.clone(),
            session_token: c.token.clone().filter(|t| !t.is_empty()),
        }
    }
}

/// Resolve credentials in the usual AWS order: static keys from the
/// environment, web identity, the ECS container endpoint
/// (`AWS_CONTAINER_CREDENTIALS_RELATIVE_URI`), then EC2 instance metadata.
///
/// Temporary credentials are cached and refreshed before they expire.
pub fn default_credentials(config: &AwsConfig) -> anyhow::Result<AwsCredentialProvider> {
    credential_chain(AmazonS3Builder::from_env(), config)
}

/// The credential provider `builder` would sign S3 requests with.
pub fn credential_chain(
    builder: AmazonS3Builder,
    config: &AwsConfig,
) -> anyhow::Result<AwsCredentialProvider> {
    let store = builder
        .with_region(config.region.clone())
        .with_bucket_name(CREDENTIALS_ONLY_BUCKET)
        .build()
        .context("could not set up the AWS credential chain")?;
    Ok(Arc::clone(store.credentials()))
}

#[derive(Debug, Clone)]
pub struct AwsConfig {
    pub region: String,
    /// Overrides every service endpoint (LocalStack, tests).
    pub endpoint: Option<String>,
}

/// A service spoken over the AWS JSON protocol.
#[derive(Debug, Clone, Copy)]
pub struct JsonService {
    pub signing_name: &'static str,
    pub endpoint_prefix: &'static str,
    pub target_prefix: &'static str,
    pub content_type: &'static str,
}

/// A service spoken over the AWS Query protocol (form body, XML response).
#[derive(Debug, Clone, Copy)]
pub struct QueryService {
    pub signing_name: &'static str,
    pub endpoint_prefix: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Error)]
pub enum AwsError {
    #[error("{code}: {message}")]
    Service {
        status: u16,
        code: String,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("could not sign request: {0}")]
    Signing(#[from] anyhow::Error),

    #[error("no AWS credentials available: {0}")]
    Credentials(String),
}

impl AwsError {
    pub fn code(&self) -> Option<&str> {
        match self {
            AwsError::Service { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            AwsError::Service { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// How many times a request may reach the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    /// Transient failures are retried with backoff.
    Retried,
    /// A single attempt; the outcome of a lost response is left to the caller.
    Once,
}

pub struct AwsClient {
    http: ClientWithMiddleware,
    http_once: ClientWithMiddleware,
    credentials: AwsCredentialProvider,
    config: AwsConfig,
}

impl AwsClient {
    pub fn new(credentials: Credentials, config: AwsConfig) -> anyhow::Result<Self> {
        Self::with_provider(credentials.into_provider(), config)
    }

    pub fn with_provider(
        credentials: AwsCredentialProvider,
        config: AwsConfig,
    ) -> anyhow::Result<Self> {
        let reqwest_client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("failed to build AWS HTTP client")?;

        // Transient failures (5xx, 429, connection resets) are retried here;
        // service errors surface to the caller untouched.
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let http = ClientBuilder::new(reqwest_client.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        let http_once = ClientBuilder::new(reqwest_client).build();

        Ok(Self {
            http,
            http_once,
            credentials,
            config,
        })
    }

    pub fn region(&self) -> &str {
        &self.config.region
    }

    fn endpoint(&self, prefix: &str) -> String {
        match &self.config.endpoint {
            Some(ep) => format!("{}/", ep.trim_end_matches('/')),
            None => format!("https://{}.{}.amazonaws.com/", prefix, self.config.region),
        }
    }

    async fn send(
        &self,
        url: &str,
        signing_name: &str,
        mut headers: HeaderMap,
        body: Vec<u8>,
        delivery: Delivery,
    ) -> Result<(u16, String), AwsError> {
        let credential = self
            .credentials
            .get_credential()
            .await
            .map_err(|e| AwsError::Credentials(e.to_string()))?;

        sigv4::sign_request(
            "POST",
            url,
            &mut headers,
            &body,
            &Credentials::from(credential.as_ref()),
            &self.config.region,
            signing_name,
        )?;

        let http = match delivery {
            Delivery::Retried => &self.http,
            Delivery::Once => &self.http_once,
        };
        let resp = http
            .post(url)
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(?delivery, "AWS request failed: {}", e);
                AwsError::Transport(e.to_string())
            })?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| AwsError::Transport(e.to_string()))?;
        Ok((status, text))
    }

    /// Call `operation` on a JSON-protocol service.
    pub async fn json_call<Req, Resp>(
        &self,
        service: JsonService,
        operation: &str,
        request: &Req,
    ) -> Result<Resp, AwsError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        self.json_request(service, operation, request, Delivery::Retried)
            .await
    }

    /// Call a non-idempotent `operation`: sent once, never retried.
    pub async fn json_call_once<Req, Resp>(
        &self,
        service: JsonService,
        operation: &str,
        request: &Req,
    ) -> Result<Resp, AwsError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        self.json_request(service, operation, request, Delivery::Once)
            .await
    }

    async fn json_request<Req, Resp>(
        &self,
        service: JsonService,
        operation: &str,
        request: &Req,
        delivery: Delivery,
    ) -> Result<Resp, AwsError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = self.endpoint(service.endpoint_prefix);
        let body = serde_json::to_vec(request).map_err(|e| AwsError::Decode(e.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(service.content_type));
        headers.insert(
            "x-amz-target",
            HeaderValue::from_str(&format!("{}.{}", service.target_prefix, operation))
                .map_err(|e| AwsError::Signing(e.into()))?,
        );

        tracing::debug!(service = service.signing_name, operation, "AWS JSON call");
        let (status, text) = self
            .send(&url, service.signing_name, headers, body, delivery)
            .await?;

        if !(200..300).contains(&status) {
            return Err(json_error(status, &text));
        }

        let text = if text.trim().is_empty() { "{}" } else { text.as_str() };
        serde_json::from_str(text).map_err(|e| AwsError::Decode(e.to_string()))
    }

    /// Call `action` on a Query-protocol service.
    pub async fn query_call<Resp>(
        &self,
        service: QueryService,
        action: &str,
        params: &[(String, String)],
    ) -> Result<Resp, AwsError>
    where
        Resp: DeserializeOwned,
    {
        self.query_request(service, action, params, Delivery::Retried)
            .await
    }

    /// Call a non-idempotent `action`: sent once, never retried.
    pub async fn query_call_once<Resp>(
        &self,
        service: QueryService,
        action: &str,
        params: &[(String, String)],
    ) -> Result<Resp, AwsError>
    where
        Resp: DeserializeOwned,
    {
        self.query_request(service, action, params, Delivery::Once)
            .await
    }

    async fn query_request<Resp>(
        &self,
        service: QueryService,
        action: &str,
        params: &[(String, String)],
        delivery: Delivery,
    ) -> Result<Resp, AwsError>
    where
        Resp: DeserializeOwned,
    {
        let url = self.endpoint(service.endpoint_prefix);
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("Action", action)
            .append_pair("Version", service.version)
            .extend_pairs(params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .finish();

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded; charset=utf-8"),
        );

        tracing::debug!(service = service.signing_name, action, "AWS Query call");
        let (status, text) = self
            .send(&url, service.signing_name, headers, body.into_bytes(), delivery)
            .await?;

        if !(200..300).contains(&status) {
            return Err(query_error(status, &text));
        }

        quick_xml::de::from_str(&text).map_err(|e| AwsError::Decode(e.to_string()))
    }
}

#[derive(Deserialize)]
struct JsonErrorBody {
    #[serde(rename = "__type")]
    kind: Option<String>,
    #[serde(alias = "Message")]
    message: Option<String>,
}

fn json_error(status: u16, body: &str) -> AwsError {
    let parsed: Option<JsonErrorBody> = serde_json::from_str(body).ok();
    let (code, message) = match parsed {
        Some(b) => (
            b.kind
                .as_deref()
                .map(|k| k.rsplit('#').next().unwrap_or(k).to_string())
                .unwrap_or_else(|| "Unknown".to_string()),
            b.message.unwrap_or_default(),
        ),
        None => ("Unknown".to_string(), body.to_string()),
    };
    AwsError::Service {
        status,
        code,
        message,
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueryErrorResponse {
    error: QueryErrorDetail,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QueryErrorDetail {
    code: String,
    #[serde(default)]
    message: String,
}

fn query_error(status: u16, body: &str) -> AwsError {
    match quick_xml::de::from_str::<QueryErrorResponse>(body) {
        Ok(r) => AwsError::Service {
            status,
            code: r.error.code,
            message: r.error.message,
        },
        Err(_) => AwsError::Service {
            status,
            code: "Unknown".to_string(),
            message: body.to_string(),
        },
    }
}

/// A `<member>` list as used throughout Query protocol responses.
#[derive(Debug, Deserialize)]
pub(crate) struct Members<T> {
    #[serde(rename = "member", default = "Vec::new")]
    pub member: Vec<T>,
}

impl<T> Default for Members<T> {
    fn default() -> Self {
        Self { member: Vec::new() }
    }
}
