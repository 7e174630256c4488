// Platform HTTP client
//
// Wraps two `reqwest::Client`s (bounded request/response, unbounded
// stream) with URL construction, credential headers, and response
// classification. Endpoint groups (control, resources, stream) are
// implemented as inherent methods in their own files to keep this module
// focused on transport mechanics.

use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::auth::Credentials;
use crate::error::Error;
use crate::transport::TransportConfig;

/// Prefix every endpoint path hangs off.
const API_ROOT: [&str; 2] = ["api", "v1"];
const PREVIEW_CHARS: usize = 200;

/// Client for the platform's stream, control, and resource endpoints.
///
/// Cheap to clone: both inner `reqwest::Client`s are reference counted.
#[derive(Clone)]
pub struct ApiClient {
    pub(crate) http: reqwest::Client,
    pub(crate) stream_http: reqwest::Client,
    base_url: Url,
    organization_id: String,
    timeout: Duration,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("organization_id", &self.organization_id)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Build a client for `base_url` (e.g. `https://platform.example.com`).
    pub fn new(
        base_url: Url,
        credentials: &Credentials,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let headers = credentials.headers()?;
        Ok(Self {
            http: transport.build_client(headers.clone())?,
            stream_http: transport.build_stream_client(headers)?,
            base_url,
            organization_id: credentials.organization_id.clone(),
            timeout: transport.timeout,
        })
    }

    /// The platform base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Organization the credentials belong to.
    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// `{base}/api/v1/{segments...}` with every segment percent-encoded.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::InvalidUrl(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(API_ROOT)
            .extend(segments);
        Ok(url)
    }

    /// `{base}/api/v1/locations/{location}/{segments...}`
    pub(crate) fn location_endpoint(
        &self,
        location_id: &str,
        segments: &[&str],
    ) -> Result<Url, Error> {
        let mut all = Vec::with_capacity(segments.len() + 2);
        all.push("locations");
        all.push(location_id);
        all.extend_from_slice(segments);
        self.endpoint(&all)
    }

    // ── Request helpers ──────────────────────────────────────────────

    pub(crate) async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        self.parse_json(resp).await
    }

    pub(crate) async fn post_json<T: DeserializeOwned>(
        &self,
        url: Url,
        body: &(impl Serialize + Sync),
    ) -> Result<T, Error> {
        debug!("POST {}", url);
        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        self.parse_json(resp).await
    }

    /// POST whose response body is only inspected for an explicit
    /// `{"success": false}` rejection.
    pub(crate) async fn post_ack(
        &self,
        url: Url,
        body: &(impl Serialize + Sync),
    ) -> Result<(), Error> {
        debug!("POST {}", url);
        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.send_error(e))?;
        let body = self.checked_body(resp).await?;

        if let Ok(ack) = serde_json::from_str::<Ack>(&body) {
            if ack.success == Some(false) {
                return Err(Error::Rejected {
                    message: ack
                        .error
                        .or(ack.message)
                        .unwrap_or_else(|| "request not accepted".into()),
                });
            }
        }
        Ok(())
    }

    /// Map a send failure, surfacing our own timeout as [`Error::Timeout`].
    pub(crate) fn send_error(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }
        } else {
            Error::Transport(err)
        }
    }

    async fn parse_json<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T, Error> {
        let body = self.checked_body(resp).await?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: format!("{e} (body preview: {:?})", preview(&body)),
            body,
        })
    }

    /// Classify the status line, then read the body as text.
    async fn checked_body(&self, resp: reqwest::Response) -> Result<String, Error> {
        let resp = check_status(resp).await?;
        resp.text().await.map_err(|e| self.send_error(e))
    }
}

/// Turn 401/403 into [`Error::Authorization`] and any other non-2xx into
/// [`Error::Http`]. Successful responses are handed back untouched.
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = if body.is_empty() {
        status.canonical_reason().unwrap_or("no body").to_owned()
    } else {
        preview(&body)
    };

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(Error::Authorization {
            status: status.as_u16(),
            message,
        });
    }

    Err(Error::Http {
        status: status.as_u16(),
        message,
    })
}

fn preview(body: &str) -> String {
    body.chars().take(PREVIEW_CHARS).collect()
}

#[derive(serde::Deserialize)]
struct Ack {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn client(base: &str) -> ApiClient {
        let creds = Credentials::new(SecretString::from("key".to_string()), "org");
        ApiClient::new(base.parse().unwrap(), &creds, &TransportConfig::default()).unwrap()
    }

    #[test]
    fn endpoint_appends_api_root() {
        let c = client("https://platform.example.com");
        assert_eq!(
            c.endpoint(&["capture-service"]).unwrap().as_str(),
            "https://platform.example.com/api/v1/capture-service"
        );
    }

    #[test]
    fn endpoint_keeps_base_path_and_encodes_ids() {
        let c = client("https://example.com/platform/");
        let url = c.location_endpoint("loc 1", &["zones", "a/b"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.com/platform/api/v1/locations/loc%201/zones/a%2Fb"
        );
    }

    #[test]
    fn preview_respects_char_boundaries() {
        let body = "é".repeat(300);
        assert_eq!(preview(&body).chars().count(), PREVIEW_CHARS);
    }
}
