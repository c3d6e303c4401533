//! HTTP(S) event sender.

use super::{Credentials, Destination, EventSender};
use crate::config::RpcSubConfig;
use crate::error::{CourierError, Result, TransportError};
use reqwest::blocking::Client;
use serde_json::json;
use tracing::{debug, trace};

/// Posts events as JSON-RPC requests: `{"method": kind, "params": [payload]}`.
pub struct HttpEventSender {
    client: Client,
}

impl HttpEventSender {
    pub fn new(config: &RpcSubConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| CourierError::config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

impl EventSender for HttpEventSender {
    fn send_event(
        &self,
        destination: &Destination,
        credentials: Option<&Credentials>,
        kind: &str,
        payload: &serde_json::Value,
    ) -> std::result::Result<(), TransportError> {
        let url = destination.url();
        let body = json!({
            "method": kind,
            "params": [payload],
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(creds) = credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        trace!(url = %url, kind, "Posting event");
        let response = request.send()?;
        let status = response.status();
        response.error_for_status()?;

        debug!(url = %url, status = status.as_u16(), "Event accepted");
        Ok(())
    }
}
