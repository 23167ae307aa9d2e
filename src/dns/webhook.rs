//! DNS provider driven through a small JSON webhook API.
//!
//! ```text
//! PUT    {url}/records/{name}/{type}   {"value": "...", "ttl": 60}
//! DELETE {url}/records/{name}/{type}   404 is treated as already deleted
//! ```

use super::*;
use reqwest::Client;
use reqwest::StatusCode;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct WebhookDnsProvider {
  client: Client,
  base_url: String,
  auth_token: Option<String>,
  ttl: u32,
}

#[derive(Debug, Serialize)]
struct UpsertRecord<'a> {
  value: &'a str,
  ttl: u32,
}

impl WebhookDnsProvider {
  pub fn new(
    base_url: &str,
    auth_token: Option<String>,
    ttl: u32,
    timeout: Duration,
  ) -> Result<Self, DnsError> {
    let client = Client::builder().timeout(timeout).build().map_err(|e| {
      DnsError::Request(format!("failed to create HTTP client: {}", e))
    })?;

    Ok(WebhookDnsProvider {
      client,
      base_url: base_url.trim_end_matches('/').to_string(),
      auth_token,
      ttl,
    })
  }

  fn record_url(&self, name: &str, record_type: RecordType) -> String {
    format!("{}/records/{}/{}", self.base_url, name, record_type)
  }

  fn authorize(
    &self,
    request: reqwest::RequestBuilder,
  ) -> reqwest::RequestBuilder {
    match &self.auth_token {
      Some(token) => request.bearer_auth(token),
      None => request,
    }
  }

  async fn send(
    &self,
    request: reqwest::RequestBuilder,
  ) -> Result<reqwest::Response, DnsError> {
    let response = self
      .authorize(request)
      .send()
      .await
      .map_err(|e| DnsError::Request(e.to_string()))?;

    if response.status() == StatusCode::UNAUTHORIZED
      || response.status() == StatusCode::FORBIDDEN
    {
      return Err(DnsError::Authentication(format!(
        "webhook returned HTTP {}",
        response.status()
      )));
    }
    Ok(response)
  }
}

async fn failure_message(response: reqwest::Response) -> String {
  let status = response.status();
  let body = response.text().await.unwrap_or_default();
  format!("webhook returned HTTP {} - {}", status, body)
}

#[async_trait]
impl DnsProvider for WebhookDnsProvider {
  async fn create_dns_record(
    &self,
    name: &str,
    record_type: RecordType,
    value: &str,
  ) -> Result<(), DnsError> {
    debug!(record = %name, %record_type, "Creating DNS record via webhook");

    let request = self
      .client
      .put(self.record_url(name, record_type))
      .json(&UpsertRecord {
        value,
        ttl: self.ttl,
      });
    let response = self.send(request).await?;

    if !response.status().is_success() {
      return Err(DnsError::Create {
        name: name.to_string(),
        record_type,
        message: failure_message(response).await,
      });
    }
    Ok(())
  }

  async fn delete_dns_record(
    &self,
    name: &str,
    record_type: RecordType,
  ) -> Result<(), DnsError> {
    debug!(record = %name, %record_type, "Deleting DNS record via webhook");

    let request = self.client.delete(self.record_url(name, record_type));
    let response = self.send(request).await?;

    if response.status() == StatusCode::NOT_FOUND {
      debug!(record = %name, "DNS record already absent");
      return Ok(());
    }
    if !response.status().is_success() {
      return Err(DnsError::Delete {
        name: name.to_string(),
        record_type,
        message: failure_message(response).await,
      });
    }
    Ok(())
  }
}
