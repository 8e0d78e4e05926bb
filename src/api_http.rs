//! HTTP fetch API for extensions.
//!
//! Extensions holding the `network.internet` entitlement can make outbound
//! HTTP requests to URLs matching their declared `allowedUrls` patterns.
//! Provides SSRF protection by blocking unsafe schemes, requiring explicit
//! declaration for localhost targets, and validating URLs against the
//! manifest's patterns.

use std::collections::HashMap;

use serde::Serialize;

use crate::api::ExtensionApi;
use crate::error::{HostError, HostResult};
use crate::manifest::Capability;

/// Maximum response body size (10 MB).
const MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Response returned to the extension.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

// ---------------------------------------------------------------------------
// URL validation
// ---------------------------------------------------------------------------

/// Validate that a URL is safe to fetch.
/// - Must be http:// or https://
/// - Localhost targets require an explicit `allowedUrls` declaration
/// - Must match at least one declared pattern, when any are declared
fn validate_url(url: &str, allowed_urls: &[String]) -> HostResult<()> {
    let parsed = url::Url::parse(url).map_err(|e| HostError::io("Invalid URL", e))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(HostError::Io(format!(
                "Scheme \"{scheme}\" is not allowed; use http or https"
            )))
        }
    }

    if let Some(host) = parsed.host_str() {
        let is_localhost = host == "localhost"
            || host == "127.0.0.1"
            || host == "::1"
            || host == "[::1]"
            || host == "0.0.0.0";
        if is_localhost {
            let localhost_allowed = allowed_urls.iter().any(|pattern| {
                pattern.contains("localhost")
                    || pattern.contains("127.0.0.1")
                    || pattern.contains("::1")
                    || pattern.contains("0.0.0.0")
            });
            if !localhost_allowed {
                return Err(HostError::Io(
                    "Localhost URLs require explicit allowedUrls declaration".into(),
                ));
            }
        }
    }

    // No declared patterns: any (non-localhost) http/https URL goes
    if allowed_urls.is_empty() {
        return Ok(());
    }

    for pattern in allowed_urls {
        if url_matches_pattern(url, pattern) {
            return Ok(());
        }
    }

    Err(HostError::Io(format!(
        "URL \"{url}\" does not match any allowed URL pattern"
    )))
}

/// Pattern format: a URL prefix, optionally ending with `*` for a
/// wildcard suffix.
fn url_matches_pattern(url: &str, pattern: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix('*') {
        url.starts_with(prefix)
    } else {
        url == pattern
    }
}

// ---------------------------------------------------------------------------
// API
// ---------------------------------------------------------------------------

pub struct HttpApi {
    pub(crate) api: ExtensionApi,
}

impl HttpApi {
    /// Make an HTTP request on behalf of the extension.
    pub async fn fetch(
        &self,
        url: &str,
        method: Option<&str>,
        headers: Option<HashMap<String, String>>,
        body: Option<String>,
    ) -> HostResult<HttpResponse> {
        self.api.check(Capability::NetworkInternet)?;

        let allowed_urls = self
            .api
            .host
            .manifest_for(&self.api.plugin)?
            .entitlements
            .network
            .allowed_urls;
        validate_url(url, &allowed_urls)?;

        let method_str = method.unwrap_or("GET");
        let http_method: reqwest::Method = method_str
            .parse()
            .map_err(|_| HostError::Io(format!("Invalid HTTP method: {method_str}")))?;

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| HostError::io("Failed to create HTTP client", e))?;

        let mut request = client.request(http_method, url);

        if let Some(ref hdrs) = headers {
            for (key, value) in hdrs {
                request = request.header(key.as_str(), value.as_str());
            }
        }
        if let Some(b) = body {
            request = request.body(b);
        }

        let response = request
            .send()
            .await
            .map_err(|e| HostError::io("HTTP request failed", e))?;

        let status = response.status().as_u16();
        let resp_headers: HashMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();

        let body_bytes = response
            .bytes()
            .await
            .map_err(|e| HostError::io("Failed to read response body", e))?;

        if body_bytes.len() > MAX_RESPONSE_BYTES {
            return Err(HostError::Io(format!(
                "Response body exceeds maximum size ({} bytes > {MAX_RESPONSE_BYTES} bytes)",
                body_bytes.len()
            )));
        }

        Ok(HttpResponse {
            status,
            headers: resp_headers,
            body: String::from_utf8_lossy(&body_bytes).to_string(),
        })
    }
}
