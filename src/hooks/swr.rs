//! Huawei Cloud SWR: make a freshly pushed repository public

use super::PostPublishHook;
use crate::config::Config;
use crate::error::{PorterError, Result};
use crate::reference::ImageReference;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;
use tracing::{debug, info};

const SIGNING_ALGORITHM: &str = "SDK-HMAC-SHA256";
const DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const HOST_PATTERNS: &[&str] = &["swr.", "myhuaweicloud.com"];

/// AK/SK pair plus region of the SWR API
#[derive(Clone)]
pub struct SwrCredentials {
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

impl SwrCredentials {
    /// Complete credentials from configuration, if any.
    pub fn from_config(config: &Config) -> Option<Self> {
        let swr = config.registries.huawei_swr.as_ref()?;
        let access_key = swr.access_key.clone().filter(|k| !k.is_empty())?;
        let secret_key = swr.secret_key.clone().filter(|k| !k.is_empty())?;
        Some(Self {
            access_key,
            secret_key,
            region: config.swr_region().to_string(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("https://swr-api.{}.myhuaweicloud.com", self.region)
    }
}

pub struct SwrVisibilityHook {
    credentials: Option<SwrCredentials>,
    http: reqwest::Client,
}

impl SwrVisibilityHook {
    pub fn new(credentials: Option<SwrCredentials>) -> Self {
        Self {
            credentials,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl PostPublishHook for SwrVisibilityHook {
    fn name(&self) -> &str {
        "huawei-swr-public"
    }

    fn matches(&self, host: &str) -> bool {
        let host = host
            .trim_start_matches("https://")
            .trim_start_matches("http://");
        let domain = host.split('/').next().unwrap_or(host);
        HOST_PATTERNS.iter().any(|pattern| domain.contains(pattern))
    }

    fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    async fn apply(&self, target: &ImageReference) -> Result<()> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| PorterError::config("SWR credentials are not configured"))?;
        let (namespace, repository) = swr_repository(target)?;
        info!(
            "Setting SWR repository {}/{} to public",
            namespace, repository
        );

        let path = format!(
            "/v2/manage/namespaces/{}/repos/{}",
            encode_segment(&namespace),
            encode_segment(&repository)
        );
        let url = format!("{}{}", credentials.endpoint(), path);
        let body = serde_json::json!({ "is_public": true }).to_string();
        let host = format!("swr-api.{}.myhuaweicloud.com", credentials.region);

        let signed = sign_request(
            credentials,
            &SignableRequest {
                method: "PATCH",
                host: &host,
                path: &path,
                content_type: "application/json",
                body: &body,
            },
            Utc::now(),
        )?;
        debug!("PATCH {}", url);

        let response = self
            .http
            .patch(&url)
            .header("Content-Type", "application/json")
            .header("X-Sdk-Date", &signed.date)
            .header("Authorization", &signed.authorization)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                PorterError::registry("SWR API request failed", e).with_context("url", &url)
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(PorterError::registry(
                format!("SWR API returned {}", status),
                text,
            )
            .with_context("namespace", &namespace)
            .with_context("repository", &repository));
        }

        info!("SWR repository {}/{} is public", namespace, repository);
        Ok(())
    }
}

/// SWR namespace and repository for `target`.
///
/// SWR namespaces are one level deep; deeper paths belong to the repository
/// name, with `/` spelled `$` in the API.
pub fn swr_repository(target: &ImageReference) -> Result<(String, String)> {
    let mut segments = target.namespace().split('/').filter(|s| !s.is_empty());
    let namespace = segments.next().ok_or_else(|| {
        PorterError::registry(
            "SWR images need a namespace",
            format!("no namespace in {}", target),
        )
    })?;
    let repository = segments
        .chain(std::iter::once(target.repository()))
        .collect::<Vec<_>>()
        .join("$");
    Ok((namespace.to_string(), repository))
}

pub struct SignableRequest<'a> {
    pub method: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    pub content_type: &'a str,
    pub body: &'a str,
}

pub struct SignedHeaders {
    pub date: String,
    pub authorization: String,
}

/// Sign a request with the APIG AK/SK scheme.
pub fn sign_request(
    credentials: &SwrCredentials,
    request: &SignableRequest<'_>,
    now: DateTime<Utc>,
) -> Result<SignedHeaders> {
    let date = now.format(DATE_FORMAT).to_string();

    let mut headers = BTreeMap::new();
    headers.insert("content-type", request.content_type.to_string());
    headers.insert("host", request.host.to_string());
    headers.insert("x-sdk-date", date.clone());

    let canonical = canonical_request(request, &headers);
    let string_to_sign = format!(
        "{}\n{}\n{}",
        SIGNING_ALGORITHM,
        date,
        sha256::digest(canonical.as_str())
    );
    let signature = hmac_hex(&credentials.secret_key, &string_to_sign)?;
    let signed_headers = headers.keys().copied().collect::<Vec<_>>().join(";");

    Ok(SignedHeaders {
        authorization: format!(
            "{} Access={}, SignedHeaders={}, Signature={}",
            SIGNING_ALGORITHM, credentials.access_key, signed_headers, signature
        ),
        date,
    })
}

pub fn canonical_request(
    request: &SignableRequest<'_>,
    headers: &BTreeMap<&str, String>,
) -> String {
    let mut uri = request.path.to_string();
    if !uri.ends_with('/') {
        uri.push('/');
    }
    let canonical_headers: String = headers
        .iter()
        .map(|(name, value)| format!("{}:{}\n", name, value.trim()))
        .collect();
    let signed_headers = headers.keys().copied().collect::<Vec<_>>().join(";");

    format!(
        "{}\n{}\n\n{}\n{}\n{}",
        request.method,
        uri,
        canonical_headers,
        signed_headers,
        sha256::digest(request.body)
    )
}

fn hmac_hex(key: &str, message: &str) -> Result<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes())
        .map_err(|e| PorterError::registry("invalid SWR secret key", e.to_string()))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Percent-encode everything outside the unreserved set.
fn encode_segment(segment: &str) -> String {
    segment
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            _ => format!("%{:02X}", b),
        })
        .collect()
}
