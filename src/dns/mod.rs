//! The DNS collaborator used to publish and retract challenge records.

mod webhook;

pub use webhook::WebhookDnsProvider;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Label prepended to a domain to form its DNS-01 record name.
pub const ACME_CHALLENGE_LABEL: &str = "_acme-challenge";

/// Errors raised by a DNS provider.
#[derive(Debug, Error)]
pub enum DnsError {
  #[error("authentication with the DNS provider failed: {0}")]
  Authentication(String),

  #[error("failed to create {record_type} record {name}: {message}")]
  Create {
    name: String,
    record_type: RecordType,
    message: String,
  },

  #[error("failed to delete {record_type} record {name}: {message}")]
  Delete {
    name: String,
    record_type: RecordType,
    message: String,
  },

  #[error("DNS provider request failed: {0}")]
  Request(String),
}

/// Record types the engine and its callers publish.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum RecordType {
  A,
  Aaaa,
  Txt,
}

impl RecordType {
  pub fn as_str(self) -> &'static str {
    match self {
      RecordType::A => "A",
      RecordType::Aaaa => "AAAA",
      RecordType::Txt => "TXT",
    }
  }
}

impl fmt::Display for RecordType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A DNS zone the engine can write records into.
#[async_trait]
pub trait DnsProvider: Send + Sync {
  /// Create the record, replacing any record of the same name and type.
  async fn create_dns_record(
    &self,
    name: &str,
    record_type: RecordType,
    value: &str,
  ) -> Result<(), DnsError>;

  /// Delete the record. Deleting a record that does not exist succeeds.
  async fn delete_dns_record(
    &self,
    name: &str,
    record_type: RecordType,
  ) -> Result<(), DnsError>;
}

/// The TXT record name the CA queries for `domain`.
pub fn challenge_record_name(domain: &str) -> String {
  format!("{}.{}", ACME_CHALLENGE_LABEL, domain)
}
