//! Outbound event transport.
//!
//! A [`Destination`] is parsed once when a subscriber registers and never
//! changes. Delivery jobs hand each event to an [`EventSender`], which performs
//! one blocking send per call.

mod http;

pub use http::HttpEventSender;

use crate::error::{CourierError, Result, TransportError};
use reqwest::Url;
use std::fmt;

/// Where a subscriber's events are posted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Destination {
    /// True for `https`.
    pub secure: bool,
    pub host: String,
    pub port: u16,
    /// Path plus query, always starting with `/`.
    pub path: String,
}

impl Destination {
    /// Parse an `http://` or `https://` URL. A missing port defaults to 80 or
    /// 443 depending on the scheme.
    pub fn parse(url: &str) -> Result<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| CourierError::config(format!("Failed to parse url '{url}': {e}")))?;

        let secure = match parsed.scheme() {
            "https" => true,
            "http" => false,
            other => {
                return Err(CourierError::config(format!(
                    "Only http and https are supported, got '{other}'"
                )))
            }
        };

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| CourierError::config(format!("Url '{url}' has no host")))?
            .to_string();

        let port = parsed.port().unwrap_or(if secure { 443 } else { 80 });

        let path = match parsed.query() {
            Some(query) => format!("{}?{}", parsed.path(), query),
            None => parsed.path().to_string(),
        };

        Ok(Self {
            secure,
            host,
            port,
            path,
        })
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }

    /// Full URL with an explicit port.
    pub fn url(&self) -> String {
        format!("{}://{}:{}{}", self.scheme(), self.host, self.port, self.path)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

/// Basic-auth credentials for a destination.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Credentials from optional parts; `None` when no username is given.
    pub fn from_parts(username: &str, password: &str) -> Option<Self> {
        if username.is_empty() {
            None
        } else {
            Some(Self::new(username, password))
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Sends one event to a remote listener, blocking until it is accepted or fails.
pub trait EventSender: Send + Sync {
    fn send_event(
        &self,
        destination: &Destination,
        credentials: Option<&Credentials>,
        kind: &str,
        payload: &serde_json::Value,
    ) -> std::result::Result<(), TransportError>;
}
