use crate::config::Config;
use crate::config::RENEWAL_DAEMON_NAME;
use crate::dns::DnsProvider;
use crate::dns::WebhookDnsProvider;
use crate::domains::DomainSet;
use crate::error::Error;
use crate::issuer::CertificateIssuer;
use crate::manager::AccountManager;
use crate::prover::OwnershipProver;
use crate::scanner::RenewalScanner;
use crate::session::AcmeCa;
use crate::session::CertificateAuthority;
use crate::shutdown::Shutdown;
use crate::store::AccountStore;
use crate::store::CertificateRecord;
use crate::store::CertificateStore;
use crate::store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;

/// Assembles a [`CertificateService`] from a [`Config`]. The CA and DNS
/// provider not set explicitly are derived from the config. Stores are never
/// defaulted: set both, or opt into
/// [`in_memory_store`](Self::in_memory_store).
pub struct CertificateServiceBuilder {
  config: Config,
  ca: Option<Arc<dyn CertificateAuthority>>,
  dns: Option<Arc<dyn DnsProvider>>,
  account_store: Option<Arc<dyn AccountStore>>,
  certificate_store: Option<Arc<dyn CertificateStore>>,
  shutdown: Option<Shutdown>,
}

impl CertificateServiceBuilder {
  pub fn new(config: Config) -> Self {
    CertificateServiceBuilder {
      config,
      ca: None,
      dns: None,
      account_store: None,
      certificate_store: None,
      shutdown: None,
    }
  }

  /// Defaults to [`AcmeCa`] with the configured contacts.
  pub fn ca(&mut self, ca: Arc<dyn CertificateAuthority>) -> &mut Self {
    self.ca = Some(ca);
    self
  }

  /// Defaults to a [`WebhookDnsProvider`] for `dns.webhook-url`.
  pub fn dns(&mut self, dns: Arc<dyn DnsProvider>) -> &mut Self {
    self.dns = Some(dns);
    self
  }

  pub fn account_store(&mut self, store: Arc<dyn AccountStore>) -> &mut Self {
    self.account_store = Some(store);
    self
  }

  pub fn certificate_store(
    &mut self,
    store: Arc<dyn CertificateStore>,
  ) -> &mut Self {
    self.certificate_store = Some(store);
    self
  }

  /// Keep accounts and certificates in one [`MemoryStore`]. Nothing
  /// survives the process, so every start registers a new CA account.
  pub fn in_memory_store(&mut self) -> &mut Self {
    let memory = Arc::new(MemoryStore::new());
    self.account_store = Some(memory.clone() as Arc<dyn AccountStore>);
    self.certificate_store = Some(memory as Arc<dyn CertificateStore>);
    self
  }

  pub fn shutdown(&mut self, shutdown: Shutdown) -> &mut Self {
    self.shutdown = Some(shutdown);
    self
  }

  fn webhook_dns(&self) -> Result<Arc<dyn DnsProvider>, Error> {
    let dns = &self.config.dns;
    let url = dns.webhook_url.as_deref().ok_or_else(|| {
      let msg = "dns.webhook-url is required without a DNS provider";
      Error::Config(msg.into())
    })?;
    let provider = WebhookDnsProvider::new(
      url,
      dns.auth_token.clone(),
      dns.ttl,
      Duration::from_secs(dns.timeout_secs),
    )?;
    Ok(Arc::new(provider))
  }

  pub fn build(&mut self) -> Result<CertificateService, Error> {
    let acmeca = &self.config.acmeca;

    let ca = match self.ca.clone() {
      Some(ca) => ca,
      None => {
        let mut ca = AcmeCa::new();
        if !acmeca.contact.is_empty() {
          ca = ca.contact(acmeca.contact.clone());
        }
        Arc::new(ca)
      }
    };
    let dns = match self.dns.clone() {
      Some(dns) => dns,
      None => self.webhook_dns()?,
    };
    let account_store = self.account_store.clone().ok_or_else(|| {
      Error::Config("an account store is required".into())
    })?;
    let certificate_store = self.certificate_store.clone().ok_or_else(|| {
      Error::Config("a certificate store is required".into())
    })?;
    let shutdown = self.shutdown.clone().unwrap_or_else(Shutdown::never);

    let accounts = Arc::new(AccountManager::new(
      account_store,
      ca,
      acmeca.server_uri.clone(),
    ));
    let prover = Arc::new(OwnershipProver::new(
      accounts.clone(),
      dns,
      acmeca.challenge_timing(),
      acmeca.retry.clone(),
      shutdown.clone(),
    ));
    let issuer = Arc::new(CertificateIssuer::new(
      accounts.clone(),
      prover.clone(),
      certificate_store.clone(),
    ));
    let scanner = Arc::new(RenewalScanner::new(
      issuer.clone(),
      certificate_store,
      acmeca.renew_days,
      acmeca.renew_interval(),
      self.config.daemon_enabled(RENEWAL_DAEMON_NAME).into(),
      shutdown,
    ));

    Ok(CertificateService {
      accounts,
      prover,
      issuer,
      scanner,
    })
  }
}

/// The certificate lifecycle engine with all of its parts wired together.
#[derive(Clone)]
pub struct CertificateService {
  accounts: Arc<AccountManager>,
  prover: Arc<OwnershipProver>,
  issuer: Arc<CertificateIssuer>,
  scanner: Arc<RenewalScanner>,
}

impl CertificateService {
  pub fn builder(config: Config) -> CertificateServiceBuilder {
    CertificateServiceBuilder::new(config)
  }

  pub fn accounts(&self) -> &Arc<AccountManager> {
    &self.accounts
  }

  pub fn prover(&self) -> &Arc<OwnershipProver> {
    &self.prover
  }

  pub fn issuer(&self) -> &Arc<CertificateIssuer> {
    &self.issuer
  }

  pub fn scanner(&self) -> &Arc<RenewalScanner> {
    &self.scanner
  }

  pub async fn issue(
    &self,
    domains: &DomainSet,
  ) -> Result<CertificateRecord, Error> {
    self.issuer.issue(domains).await
  }

  pub async fn renew(
    &self,
    domains: &DomainSet,
  ) -> Result<CertificateRecord, Error> {
    self.issuer.renew(domains).await
  }

  pub async fn get_certificate(
    &self,
    domains: &DomainSet,
  ) -> Result<Option<CertificateRecord>, Error> {
    self.issuer.get_certificate(domains).await
  }
}
