use crate::codec;
use crate::domains::DomainSet;
use crate::error::*;
use crate::helpers::gen_alphanumeric_token;
use crate::helpers::gen_rsa_private_key;
use crate::helpers::DOMAIN_KEY_BITS;
use crate::helpers::MANAGEMENT_TOKEN_LEN;
use crate::manager::AccountManager;
use crate::order::gen_csr;
use crate::prover::OwnershipProver;
use crate::store::CertificateRecord;
use crate::store::CertificateStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use tracing::instrument;
use tracing::Level;

/// Wraps a failure in [`Error::Issuance`] naming the domain-set and stage.
/// Cancellation and already wrapped failures pass through unchanged.
fn failed_at<'a>(
  domains: &'a DomainSet,
  stage: IssueStage,
) -> impl FnOnce(Error) -> Error + 'a {
  move |err| match err {
    passthrough @ (Error::Cancelled | Error::Issuance { .. }) => passthrough,
    err => Error::Issuance {
      domains: domains.key(),
      stage,
      source: Box::new(err),
    },
  }
}

/// Issues and renews certificates for domain-sets, keeping one
/// [`CertificateRecord`] per set.
pub struct CertificateIssuer {
  accounts: Arc<AccountManager>,
  prover: Arc<OwnershipProver>,
  store: Arc<dyn CertificateStore>,
}

impl CertificateIssuer {
  pub fn new(
    accounts: Arc<AccountManager>,
    prover: Arc<OwnershipProver>,
    store: Arc<dyn CertificateStore>,
  ) -> Self {
    CertificateIssuer {
      accounts,
      prover,
      store,
    }
  }

  /// Prove ownership of every domain in the set, then issue. Nothing is
  /// requested from the CA unless every proof succeeded.
  #[instrument(level = Level::INFO, name = "acme2_lifecycle::CertificateIssuer::issue", err, skip(self, domains), fields(domains = %domains))]
  pub async fn issue(
    &self,
    domains: &DomainSet,
  ) -> Result<CertificateRecord, Error> {
    for domain in domains.iter() {
      self
        .prover
        .prove_ownership_with_retry(domain)
        .await
        .map_err(failed_at(domains, IssueStage::Ownership))?;
    }

    self.generate_or_renew_certificate(domains).await
  }

  /// Re-issue an existing certificate with its stored keypair. Fails with
  /// [`Error::NoSuchCertificate`] before contacting anything if the set has
  /// never been issued.
  pub async fn renew(
    &self,
    domains: &DomainSet,
  ) -> Result<CertificateRecord, Error> {
    if self.get_certificate(domains).await?.is_none() {
      return Err(Error::NoSuchCertificate(domains.key()));
    }
    self.issue(domains).await
  }

  pub async fn get_certificate(
    &self,
    domains: &DomainSet,
  ) -> Result<Option<CertificateRecord>, Error> {
    self
      .store
      .get_by_id(&domains.key())
      .await
      .map_err(|e| failed_at(domains, IssueStage::Lookup)(e.into()))
  }

  /// Request a certificate for already proven `domains` and persist it.
  ///
  /// An existing record keeps its keypair and management token, a missing
  /// one is created with a fresh keypair. The store is only written once the
  /// certificate has been downloaded and encoded.
  #[instrument(level = Level::INFO, name = "acme2_lifecycle::CertificateIssuer::generate_or_renew_certificate", err, skip(self, domains), fields(domains = %domains))]
  pub async fn generate_or_renew_certificate(
    &self,
    domains: &DomainSet,
  ) -> Result<CertificateRecord, Error> {
    let existing = self.get_certificate(domains).await?;
    let (mut record, key, is_new) = match existing {
      Some(record) => {
        let key = codec::decode_keypair(&record.keypair)
          .map_err(failed_at(domains, IssueStage::Keypair))?;
        (record, key, false)
      }
      None => {
        let key = gen_rsa_private_key(DOMAIN_KEY_BITS)
          .map_err(failed_at(domains, IssueStage::Keypair))?;
        let keypair = codec::encode_keypair(&key)
          .map_err(failed_at(domains, IssueStage::Keypair))?;
        (CertificateRecord::new(domains, keypair), key, true)
      }
    };

    let registration = self
      .accounts
      .registration()
      .await
      .map_err(failed_at(domains, IssueStage::Registration))?;

    let csr = gen_csr(&key, domains.as_slice())
      .map_err(failed_at(domains, IssueStage::Csr))?;

    let location = registration
      .request_certificate(domains.as_slice(), &csr)
      .await
      .map_err(failed_at(domains, IssueStage::Request))?;

    let mut certs = registration
      .download_certificate(&location)
      .await
      .and_then(|certs| {
        if certs.is_empty() {
          Err(transport_err("CA returned an empty certificate chain"))
        } else {
          Ok(certs)
        }
      })
      .map_err(failed_at(domains, IssueStage::Download))?;
    let leaf = certs.remove(0);

    let encoded = codec::encode_certificate(&leaf).and_then(|cert| {
      Ok((cert, codec::encode_chain(&certs)?, codec::not_after(&leaf)?))
    });
    let (cert, chain, expires) =
      encoded.map_err(failed_at(domains, IssueStage::Encoding))?;

    record.cert = cert;
    record.chain = chain;
    record.expires = expires;
    if record.management_token.is_none() {
      record.management_token =
        Some(gen_alphanumeric_token(MANAGEMENT_TOKEN_LEN));
    }
    record.updated = Utc::now();

    let persisted = if is_new {
      self.store.save(&record).await
    } else {
      self.store.update(&record).await
    };
    persisted.map_err(|e| failed_at(domains, IssueStage::Persist)(e.into()))?;

    info!(%expires, new = is_new, "Stored certificate");
    Ok(record)
  }
}
