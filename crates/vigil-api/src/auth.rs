use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};

use crate::error::Error;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const ORGANIZATION_HEADER: &str = "x-organization-id";

/// Credentials presented on every request to the platform.
///
/// The key is held as a [`SecretString`] and only exposed while the
/// default header map is built; the resulting header value is marked
/// sensitive so it never shows up in `Debug` output.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: SecretString,
    pub organization_id: String,
}

impl Credentials {
    pub fn new(api_key: SecretString, organization_id: impl Into<String>) -> Self {
        Self {
            api_key,
            organization_id: organization_id.into(),
        }
    }

    /// Default headers carrying the credential pair.
    pub fn headers(&self) -> Result<HeaderMap, Error> {
        let mut key = HeaderValue::from_str(self.api_key.expose_secret()).map_err(|_| {
            Error::Authorization {
                status: 0,
                message: "API key contains characters not allowed in a header".into(),
            }
        })?;
        key.set_sensitive(true);

        let org = HeaderValue::from_str(&self.organization_id).map_err(|_| {
            Error::Authorization {
                status: 0,
                message: format!("invalid organization id {:?}", self.organization_id),
            }
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static(API_KEY_HEADER), key);
        headers.insert(HeaderName::from_static(ORGANIZATION_HEADER), org);
        Ok(headers)
    }
}
