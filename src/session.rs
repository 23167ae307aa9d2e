//! The CA as seen by the lifecycle engine.
//!
//! [`CertificateAuthority`] opens registrations and [`Registration`] carries
//! out everything done on behalf of one account. [`AcmeCa`] implements both
//! over ACMEv2; tests substitute their own.

use crate::account::Account;
use crate::account::AccountBuilder;
use crate::authorization::Authorization;
use crate::authorization::Challenge;
use crate::directory::resolve_directory_url;
use crate::directory::Directory;
use crate::directory::DirectoryBuilder;
use crate::error::*;
use crate::helpers::Identifier;
use crate::order::OrderStatus;
use async_trait::async_trait;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use openssl::x509::X509Req;
use openssl::x509::X509;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Opens account registrations with a CA.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
  /// Register a new account for `account_key`.
  ///
  /// Fails with [`Error::AccountExists`] when the CA already knows the key.
  async fn create_registration(
    &self,
    server_uri: &str,
    account_key: &PKey<Private>,
  ) -> Result<Arc<dyn Registration>, Error>;

  /// Bind to the existing account at `location`.
  async fn bind_registration(
    &self,
    server_uri: &str,
    account_key: &PKey<Private>,
    location: &str,
  ) -> Result<Arc<dyn Registration>, Error>;
}

/// A registered CA account.
#[async_trait]
pub trait Registration: Send + Sync + fmt::Debug {
  /// The account location on the CA.
  fn location(&self) -> &str;

  /// Accept the CA's current terms of service.
  async fn agree_to_terms(&self) -> Result<(), Error>;

  /// Request an authorization for a single domain.
  async fn authorize_domain(&self, domain: &str)
    -> Result<Authorization, Error>;

  /// The TXT record value answering a DNS-01 challenge.
  fn dns_digest(&self, challenge: &Challenge) -> Result<String, Error>;

  /// Ask the CA to start verifying the challenge.
  async fn trigger_challenge(
    &self,
    challenge: &Challenge,
  ) -> Result<Challenge, Error>;

  /// Fetch the current state of the challenge.
  async fn update_challenge(
    &self,
    challenge: &Challenge,
  ) -> Result<Challenge, Error>;

  /// Submit a CSR for already authorized `domains`, returning the location
  /// of the issued certificate.
  async fn request_certificate(
    &self,
    domains: &[String],
    csr: &X509Req,
  ) -> Result<String, Error>;

  /// Download the certificate at `location`: the leaf followed by the CA
  /// chain.
  async fn download_certificate(
    &self,
    location: &str,
  ) -> Result<Vec<X509>, Error>;
}

/// An ACMEv2 [`CertificateAuthority`] reached over HTTP.
#[derive(Debug, Clone)]
pub struct AcmeCa {
  http_client: Option<reqwest::Client>,
  contact: Option<Vec<String>>,
  order_poll_interval: Duration,
  order_poll_attempts: usize,
}

impl Default for AcmeCa {
  fn default() -> Self {
    AcmeCa {
      http_client: None,
      contact: None,
      order_poll_interval: Duration::from_secs(2),
      order_poll_attempts: 30,
    }
  }
}

impl AcmeCa {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn http_client(mut self, http_client: reqwest::Client) -> Self {
    self.http_client = Some(http_client);
    self
  }

  pub fn contact(mut self, contact: Vec<String>) -> Self {
    self.contact = Some(contact);
    self
  }

  /// How orders are polled while the CA settles authorizations and signs
  /// the certificate.
  pub fn order_polling(mut self, interval: Duration, attempts: usize) -> Self {
    self.order_poll_interval = interval;
    self.order_poll_attempts = attempts;
    self
  }

  async fn directory(&self, server_uri: &str) -> Result<Arc<Directory>, Error> {
    let mut builder = DirectoryBuilder::new(resolve_directory_url(server_uri)?);
    if let Some(http_client) = self.http_client.clone() {
      builder.http_client(http_client);
    }
    builder.build().await
  }

  fn registration(&self, account: Arc<Account>) -> Arc<dyn Registration> {
    Arc::new(AcmeRegistration {
      account,
      order_poll_interval: self.order_poll_interval,
      order_poll_attempts: self.order_poll_attempts,
    })
  }
}

#[async_trait]
impl CertificateAuthority for AcmeCa {
  async fn create_registration(
    &self,
    server_uri: &str,
    account_key: &PKey<Private>,
  ) -> Result<Arc<dyn Registration>, Error> {
    let directory = self.directory(server_uri).await?;
    let mut builder = AccountBuilder::new(directory, account_key.clone());
    if let Some(contact) = self.contact.clone() {
      builder.contact(contact);
    }
    let account = builder.terms_of_service_agreed(true).build().await?;
    info!(account = %account.id, "Created ACME account");
    Ok(self.registration(account))
  }

  async fn bind_registration(
    &self,
    server_uri: &str,
    account_key: &PKey<Private>,
    location: &str,
  ) -> Result<Arc<dyn Registration>, Error> {
    let directory = self.directory(server_uri).await?;
    let account =
      Account::bind(directory, account_key.clone(), location).await?;
    info!(account = %account.id, "Bound to existing ACME account");
    Ok(self.registration(account))
  }
}

/// A [`Registration`] backed by an ACMEv2 [`Account`].
#[derive(Debug)]
pub struct AcmeRegistration {
  account: Arc<Account>,
  order_poll_interval: Duration,
  order_poll_attempts: usize,
}

fn order_failed(
  error: Option<ServerError>,
  fallback: &'static str,
) -> Error {
  match error {
    Some(err) => Error::Server(err),
    None => Error::Validation(fallback),
  }
}

#[async_trait]
impl Registration for AcmeRegistration {
  fn location(&self) -> &str {
    &self.account.id
  }

  async fn agree_to_terms(&self) -> Result<(), Error> {
    self.account.agree_to_terms().await?;
    Ok(())
  }

  async fn authorize_domain(
    &self,
    domain: &str,
  ) -> Result<Authorization, Error> {
    self.account.authorize_domain(domain).await
  }

  fn dns_digest(&self, challenge: &Challenge) -> Result<String, Error> {
    self.account.dns01_digest(challenge)
  }

  async fn trigger_challenge(
    &self,
    challenge: &Challenge,
  ) -> Result<Challenge, Error> {
    self.account.trigger_challenge(challenge).await
  }

  async fn update_challenge(
    &self,
    challenge: &Challenge,
  ) -> Result<Challenge, Error> {
    self.account.update_challenge(challenge).await
  }

  async fn request_certificate(
    &self,
    domains: &[String],
    csr: &X509Req,
  ) -> Result<String, Error> {
    let identifiers = domains.iter().map(Identifier::dns).collect();
    let order = self.account.new_order(identifiers).await?;

    let order = self
      .account
      .wait_ready(order, self.order_poll_interval, self.order_poll_attempts)
      .await?;
    if order.status != OrderStatus::Ready {
      return Err(order_failed(order.error, "order did not become ready"));
    }

    let order = self.account.finalize(&order, csr).await?;
    let order = self
      .account
      .wait_done(order, self.order_poll_interval, self.order_poll_attempts)
      .await?;
    if order.status != OrderStatus::Valid {
      return Err(order_failed(order.error, "order did not become valid"));
    }

    let location = order
      .certificate_url()
      .ok_or_else(|| transport_err("valid order carries no certificate url"))?
      .to_string();
    info!(certificate = %location, "Certificate issued");
    Ok(location)
  }

  async fn download_certificate(
    &self,
    location: &str,
  ) -> Result<Vec<X509>, Error> {
    self.account.certificate(location).await
  }
}
