//! Handshake metadata for Tether
//!
//! A connection is identified by its target URL plus the credential and the
//! client-type tag. The self-driven transport sends the latter two as request
//! headers; browser-style hosts cannot set headers on an upgrade request, so
//! there they travel as query parameters instead.

use crate::config::ClientConfig;
use crate::error::{ConfigError, Error, Result};
use http::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use std::fmt;
use url::Url;

/// Query parameter carrying the credential
pub const TOKEN_PARAM: &str = "token";

/// Query parameter carrying the client-type tag
pub const CLIENT_TYPE_PARAM: &str = "deviceType";

/// Header carrying the credential
pub const TOKEN_HEADER: HeaderName = HeaderName::from_static("token");

/// Header carrying the client-type tag
pub const CLIENT_TYPE_HEADER: HeaderName = HeaderName::from_static("devicetype");

/// Client type assumed when a host passes an empty tag
pub const DEFAULT_CLIENT_TYPE: &str = "im_app_android";

/// Authentication metadata attached to every handshake
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    token: String,
    client_type: String,
}

impl Credentials {
    /// Create credentials; an empty client type falls back to the default tag
    pub fn new(token: impl Into<String>, client_type: impl Into<String>) -> Self {
        let client_type = client_type.into();
        Self {
            token: token.into(),
            client_type: if client_type.is_empty() {
                DEFAULT_CLIENT_TYPE.to_string()
            } else {
                client_type
            },
        }
    }

    /// Opaque credential
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Device or platform tag
    pub fn client_type(&self) -> &str {
        &self.client_type
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("client_type", &self.client_type)
            .finish()
    }
}

/// Where to connect and as whom
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    url: Url,
    credentials: Credentials,
}

impl Target {
    /// Parse and check a `ws://` or `wss://` address
    pub fn parse(address: &str, credentials: Credentials) -> Result<Self> {
        let url = Url::parse(address).map_err(|e| Error::invalid_address(address, e))?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(Error::invalid_address(
                    address,
                    format!("unsupported scheme `{other}`, expected ws or wss"),
                ))
            }
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(Error::invalid_address(address, "missing host"));
        }
        Ok(Self { url, credentials })
    }

    /// Target URL as given
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Credentials for this target
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Whether the target needs TLS
    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "wss"
    }

    /// URL with the credentials encoded as query parameters.
    ///
    /// Existing `token`/`deviceType` parameters are replaced; any other
    /// parameters are kept in order.
    pub fn query_url(&self) -> Url {
        let mut url = self.url.clone();
        let retained: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != TOKEN_PARAM && key != CLIENT_TYPE_PARAM)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();

        url.query_pairs_mut()
            .clear()
            .extend_pairs(retained)
            .append_pair(TOKEN_PARAM, self.credentials.token())
            .append_pair(CLIENT_TYPE_PARAM, self.credentials.client_type());
        url
    }

    /// Upgrade request headers: configured extras, user agent, then credentials
    pub fn handshake_headers(&self, config: &ClientConfig) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();

        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ConfigError::invalid("headers", name))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| ConfigError::invalid(name.as_str(), value))?;
            headers.append(name, value);
        }

        if !config.user_agent.is_empty() {
            let agent = HeaderValue::from_str(&config.user_agent)
                .map_err(|_| ConfigError::invalid("user_agent", &config.user_agent))?;
            headers.insert(USER_AGENT, agent);
        }

        let token = HeaderValue::from_str(self.credentials.token())
            .map_err(|_| ConfigError::invalid("token", "<redacted>"))?;
        let client_type = HeaderValue::from_str(self.credentials.client_type())
            .map_err(|_| ConfigError::invalid("client_type", self.credentials.client_type()))?;
        headers.insert(TOKEN_HEADER, token);
        headers.insert(CLIENT_TYPE_HEADER, client_type);

        Ok(headers)
    }
}
