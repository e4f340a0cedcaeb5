// ABOUTME: Notifier that POSTs the session as JSON to a URL.
// ABOUTME: Extra headers come from config; any non-2xx answer is a failed delivery.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashMap;

use super::{Message, Notifier, NotifyError};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    name: String,
    url: reqwest::Url,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(name: String, url: String, headers: HashMap<String, String>) -> Result<Self> {
        let url = reqwest::Url::parse(&url)
            .map_err(|e| Error::InvalidConfig(format!("notification channel {name}: {e}")))?;
        let mut header_map = HeaderMap::new();
        for (key, value) in headers {
            let header = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| Error::InvalidConfig(format!("header {key}: {e}")))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| Error::InvalidConfig(format!("header {key}: {e}")))?;
            header_map.insert(header, value);
        }
        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .user_agent(concat!("lookout/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("notification channel {name}: {e}")))?;
        Ok(Self { name, url, client })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    async fn notify(&self, message: &Message) -> std::result::Result<(), NotifyError> {
        let response = self
            .client
            .post(self.url.clone())
            .json(message)
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Status {
                status: status.as_u16(),
            })
        }
    }
}
