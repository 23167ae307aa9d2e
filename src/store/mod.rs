//! Persistence contracts for account and certificate records.
//!
//! The engine only ever loads and saves whole records; how they are kept is
//! up to the implementation. [`MemoryStore`] keeps them in process.

mod memory;

pub use memory::MemoryStore;

use crate::domains::DomainSet;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use std::fmt;
use thiserror::Error;

/// Id of the single account record.
pub const ACCOUNT_ID: i32 = 1;

/// Errors raised by a store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
  /// An insert collided with an existing record.
  #[error("record {id} already exists")]
  Duplicate { id: String },

  /// An update targeted a record that does not exist.
  #[error("record {id} does not exist")]
  Missing { id: String },

  /// The backing store failed.
  #[error("store backend error: {0}")]
  Backend(String),
}

/// The CA account keypair, one per deployment.
#[derive(Clone, PartialEq, Eq)]
pub struct AccountRecord {
  pub id: i32,
  /// PEM encoded RSA keypair.
  pub keypair: Vec<u8>,
  pub created: DateTime<Utc>,
  pub updated: DateTime<Utc>,
}

impl AccountRecord {
  pub fn new(keypair: Vec<u8>) -> Self {
    let now = Utc::now();
    AccountRecord {
      id: ACCOUNT_ID,
      keypair,
      created: now,
      updated: now,
    }
  }
}

impl fmt::Debug for AccountRecord {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AccountRecord")
      .field("id", &self.id)
      .field("created", &self.created)
      .field("updated", &self.updated)
      .finish_non_exhaustive()
  }
}

/// A certificate for one domain-set, with the key it was issued for.
#[derive(Clone, PartialEq, Eq)]
pub struct CertificateRecord {
  /// The domain-set key, see [`DomainSet::key`].
  pub id: String,
  /// PEM encoded RSA keypair, kept across renewals.
  pub keypair: Vec<u8>,
  /// PEM encoded leaf certificate.
  pub cert: Vec<u8>,
  /// PEM encoded CA chain.
  pub chain: Vec<u8>,
  pub management_token: Option<String>,
  /// `notAfter` of `cert`.
  pub expires: DateTime<Utc>,
  pub created: DateTime<Utc>,
  pub updated: DateTime<Utc>,
}

impl CertificateRecord {
  /// A record that has a keypair but no certificate yet.
  pub fn new(domains: &DomainSet, keypair: Vec<u8>) -> Self {
    let now = Utc::now();
    CertificateRecord {
      id: domains.key(),
      keypair,
      cert: Vec::new(),
      chain: Vec::new(),
      management_token: None,
      expires: now,
      created: now,
      updated: now,
    }
  }

  /// Check a caller supplied management token in constant time.
  pub fn management_token_matches(&self, candidate: &str) -> bool {
    match &self.management_token {
      Some(token) if token.len() == candidate.len() => {
        openssl::memcmp::eq(token.as_bytes(), candidate.as_bytes())
      }
      _ => false,
    }
  }
}

impl fmt::Debug for CertificateRecord {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CertificateRecord")
      .field("id", &self.id)
      .field("expires", &self.expires)
      .field("created", &self.created)
      .field("updated", &self.updated)
      .finish_non_exhaustive()
  }
}

/// Storage for the singleton [`AccountRecord`].
#[async_trait]
pub trait AccountStore: Send + Sync {
  async fn get_by_id(
    &self,
    id: i32,
  ) -> Result<Option<AccountRecord>, StoreError>;

  async fn save(&self, record: &AccountRecord) -> Result<(), StoreError>;
}

/// Storage for [`CertificateRecord`]s, keyed by domain-set.
#[async_trait]
pub trait CertificateStore: Send + Sync {
  async fn get_by_id(
    &self,
    id: &str,
  ) -> Result<Option<CertificateRecord>, StoreError>;

  /// Insert a new record.
  async fn save(&self, record: &CertificateRecord) -> Result<(), StoreError>;

  /// Replace an existing record.
  async fn update(&self, record: &CertificateRecord) -> Result<(), StoreError>;

  /// Keys of every record expiring within `renew_days` days from now.
  async fn get_eligible_for_renewal(
    &self,
    renew_days: u32,
  ) -> Result<Vec<String>, StoreError>;
}
