#![allow(dead_code)]

use acme2_lifecycle::store::AccountRecord;
use acme2_lifecycle::store::AccountStore;
use acme2_lifecycle::store::MemoryStore;
use acme2_lifecycle::*;
use async_trait::async_trait;
use openssl::asn1::Asn1Integer;
use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use openssl::x509::X509Name;
use openssl::x509::X509Req;
use openssl::x509::X509;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Ordered log of every CA and DNS interaction.
#[derive(Debug, Clone, Default)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
  pub fn push(&self, event: impl Into<String>) {
    self.0.lock().push(event.into());
  }

  pub fn all(&self) -> Vec<String> {
    self.0.lock().clone()
  }

  pub fn count(&self, prefix: &str) -> usize {
    self.0.lock().iter().filter(|e| e.starts_with(prefix)).count()
  }

  pub fn contains(&self, event: &str) -> bool {
    self.0.lock().iter().any(|e| e == event)
  }
}

fn name(cn: &str) -> openssl::x509::X509Name {
  let mut name = X509Name::builder().unwrap();
  name.append_entry_by_text("CN", cn).unwrap();
  name.build()
}

/// Scripted CA state shared by every registration handed out by
/// [`StubCa`].
#[derive(Debug)]
pub struct CaState {
  pub events: Events,
  /// Status a challenge settles on after the first poll. Defaults to valid.
  pub outcomes: Mutex<HashMap<String, ChallengeStatus>>,
  /// Domains whose authorization request fails.
  pub failing: Mutex<HashSet<String>>,
  /// Domains whose authorization offers no dns-01 challenge.
  pub without_dns: Mutex<HashSet<String>>,
  /// Remaining failing polls per domain.
  pub poll_failures: Mutex<HashMap<String, usize>>,
  /// Public keys of every CSR submitted, in DER.
  pub csr_keys: Mutex<Vec<Vec<u8>>>,
  pub validity_days: u32,
  issued: Mutex<HashMap<String, Vec<u8>>>,
  serial: AtomicUsize,
  ca_key: PKey<Private>,
  ca_cert: X509,
}

impl CaState {
  pub fn new(events: Events) -> Self {
    let ca_key = gen_rsa_private_key(2048).unwrap();
    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    let serial = Asn1Integer::from_bn(&BigNum::from_u32(1).unwrap()).unwrap();
    builder.set_serial_number(&serial).unwrap();
    builder.set_subject_name(&name("Stub CA")).unwrap();
    builder.set_issuer_name(&name("Stub CA")).unwrap();
    builder.set_pubkey(&ca_key).unwrap();
    builder
      .set_not_before(&Asn1Time::days_from_now(0).unwrap())
      .unwrap();
    builder
      .set_not_after(&Asn1Time::days_from_now(3650).unwrap())
      .unwrap();
    builder.sign(&ca_key, MessageDigest::sha256()).unwrap();

    CaState {
      events,
      outcomes: Mutex::new(HashMap::new()),
      failing: Mutex::new(HashSet::new()),
      without_dns: Mutex::new(HashSet::new()),
      poll_failures: Mutex::new(HashMap::new()),
      csr_keys: Mutex::new(Vec::new()),
      validity_days: 90,
      issued: Mutex::new(HashMap::new()),
      serial: AtomicUsize::new(100),
      ca_key,
      ca_cert: builder.build(),
    }
  }

  pub fn set_outcome(&self, domain: &str, status: ChallengeStatus) {
    self.outcomes.lock().insert(domain.to_string(), status);
  }

  pub fn fail_domain(&self, domain: &str) {
    self.failing.lock().insert(domain.to_string());
  }

  pub fn ca_cert(&self) -> &X509 {
    &self.ca_cert
  }

  fn challenge(&self, domain: &str, status: ChallengeStatus) -> Challenge {
    Challenge {
      typ: DNS_01.to_string(),
      url: format!("https://ca.test/chall/{}", domain),
      status,
      validated: None,
      error: None,
      token: Some(format!("token-{}", domain)),
    }
  }

  fn sign(&self, csr: &X509Req) -> X509 {
    let cn = csr
      .subject_name()
      .entries_by_nid(Nid::COMMONNAME)
      .next()
      .unwrap()
      .data()
      .as_utf8()
      .unwrap()
      .to_string();
    let serial = self.serial.fetch_add(1, Ordering::SeqCst) as u32;

    let mut builder = X509::builder().unwrap();
    builder.set_version(2).unwrap();
    builder
      .set_serial_number(
        &Asn1Integer::from_bn(&BigNum::from_u32(serial).unwrap()).unwrap(),
      )
      .unwrap();
    builder.set_subject_name(&name(&cn)).unwrap();
    builder
      .set_issuer_name(self.ca_cert.subject_name())
      .unwrap();
    builder.set_pubkey(&csr.public_key().unwrap()).unwrap();
    builder
      .set_not_before(&Asn1Time::days_from_now(0).unwrap())
      .unwrap();
    builder
      .set_not_after(&Asn1Time::days_from_now(self.validity_days).unwrap())
      .unwrap();
    builder.sign(&self.ca_key, MessageDigest::sha256()).unwrap();
    builder.build()
  }
}

fn domain_of(challenge: &Challenge) -> String {
  challenge
    .url
    .rsplit('/')
    .next()
    .unwrap_or_default()
    .to_string()
}

#[derive(Debug)]
pub struct StubRegistration {
  location: String,
  state: Arc<CaState>,
}

#[async_trait]
impl Registration for StubRegistration {
  fn location(&self) -> &str {
    &self.location
  }

  async fn agree_to_terms(&self) -> Result<(), Error> {
    self.state.events.push(format!("agree {}", self.location));
    Ok(())
  }

  async fn authorize_domain(
    &self,
    domain: &str,
  ) -> Result<Authorization, Error> {
    self.state.events.push(format!("authorize {}", domain));
    if self.state.failing.lock().contains(domain) {
      return Err(transport_err("authorization refused"));
    }

    let mut challenge = self.state.challenge(domain, ChallengeStatus::Pending);
    if self.state.without_dns.lock().contains(domain) {
      challenge.typ = "http-01".to_string();
    }
    Ok(Authorization {
      url: format!("https://ca.test/authz/{}", domain),
      identifier: Identifier::dns(domain),
      status: AuthorizationStatus::Pending,
      expires: None,
      challenges: vec![challenge],
      wildcard: None,
    })
  }

  fn dns_digest(&self, challenge: &Challenge) -> Result<String, Error> {
    Ok(format!("digest-{}", challenge.token.clone().unwrap_or_default()))
  }

  async fn trigger_challenge(
    &self,
    challenge: &Challenge,
  ) -> Result<Challenge, Error> {
    let domain = domain_of(challenge);
    self.state.events.push(format!("trigger {}", domain));
    Ok(self.state.challenge(&domain, ChallengeStatus::Processing))
  }

  async fn update_challenge(
    &self,
    challenge: &Challenge,
  ) -> Result<Challenge, Error> {
    let domain = domain_of(challenge);
    self.state.events.push(format!("update {}", domain));

    if let Some(remaining) = self.state.poll_failures.lock().get_mut(&domain) {
      if *remaining > 0 {
        *remaining -= 1;
        return Err(transport_err("poll timed out"));
      }
    }

    let status = self
      .state
      .outcomes
      .lock()
      .get(&domain)
      .copied()
      .unwrap_or(ChallengeStatus::Valid);
    Ok(self.state.challenge(&domain, status))
  }

  async fn request_certificate(
    &self,
    domains: &[String],
    csr: &X509Req,
  ) -> Result<String, Error> {
    self
      .state
      .events
      .push(format!("request {}", domains.join(",")));
    let key = csr.public_key().unwrap().public_key_to_der().unwrap();
    self.state.csr_keys.lock().push(key);

    let mut issued = self.state.issued.lock();
    let location = format!("https://ca.test/cert/{}", issued.len() + 1);
    issued.insert(location.clone(), csr.to_der().unwrap());
    Ok(location)
  }

  async fn download_certificate(
    &self,
    location: &str,
  ) -> Result<Vec<X509>, Error> {
    self.state.events.push(format!("download {}", location));
    let der = self
      .state
      .issued
      .lock()
      .get(location)
      .cloned()
      .ok_or(Error::Validation("unknown certificate location"))?;
    let csr = X509Req::from_der(&der).unwrap();
    Ok(vec![self.state.sign(&csr), self.state.ca_cert.clone()])
  }
}

/// A CA that hands out [`StubRegistration`]s.
#[derive(Debug)]
pub struct StubCa {
  pub state: Arc<CaState>,
  /// When set, account creation reports an existing account here.
  pub existing_account: Mutex<Option<String>>,
  pub refuse_registration: AtomicBool,
  pub created: AtomicUsize,
  pub bound: Mutex<Vec<String>>,
  /// Public keys of every account key presented, in DER.
  pub account_keys: Mutex<Vec<Vec<u8>>>,
}

impl StubCa {
  pub fn new(state: Arc<CaState>) -> Self {
    StubCa {
      state,
      existing_account: Mutex::new(None),
      refuse_registration: AtomicBool::new(false),
      created: AtomicUsize::new(0),
      bound: Mutex::new(Vec::new()),
      account_keys: Mutex::new(Vec::new()),
    }
  }

  fn record_key(&self, key: &PKey<Private>) {
    self
      .account_keys
      .lock()
      .push(key.public_key_to_der().unwrap());
  }
}

#[async_trait]
impl CertificateAuthority for StubCa {
  async fn create_registration(
    &self,
    _server_uri: &str,
    account_key: &PKey<Private>,
  ) -> Result<Arc<dyn Registration>, Error> {
    self.created.fetch_add(1, Ordering::SeqCst);
    self.record_key(account_key);

    if self.refuse_registration.load(Ordering::SeqCst) {
      return Err(transport_err("registration refused"));
    }
    if let Some(location) = self.existing_account.lock().clone() {
      return Err(Error::AccountExists { location });
    }
    Ok(Arc::new(StubRegistration {
      location: "https://ca.test/acct/new".to_string(),
      state: self.state.clone(),
    }))
  }

  async fn bind_registration(
    &self,
    _server_uri: &str,
    account_key: &PKey<Private>,
    location: &str,
  ) -> Result<Arc<dyn Registration>, Error> {
    self.bound.lock().push(location.to_string());
    self.record_key(account_key);
    Ok(Arc::new(StubRegistration {
      location: location.to_string(),
      state: self.state.clone(),
    }))
  }
}

/// A DNS zone that remembers every change.
#[derive(Debug, Default)]
pub struct RecordingDns {
  pub events: Events,
  pub records: Mutex<HashMap<(String, RecordType), String>>,
  pub created: Mutex<Vec<(String, String)>>,
  pub deleted: Mutex<Vec<String>>,
}

impl RecordingDns {
  pub fn new(events: Events) -> Self {
    RecordingDns {
      events,
      ..Default::default()
    }
  }
}

#[async_trait]
impl DnsProvider for RecordingDns {
  async fn create_dns_record(
    &self,
    name: &str,
    record_type: RecordType,
    value: &str,
  ) -> Result<(), dns::DnsError> {
    self.events.push(format!("create {}", name));
    self
      .records
      .lock()
      .insert((name.to_string(), record_type), value.to_string());
    self
      .created
      .lock()
      .push((name.to_string(), value.to_string()));
    Ok(())
  }

  async fn delete_dns_record(
    &self,
    name: &str,
    record_type: RecordType,
  ) -> Result<(), dns::DnsError> {
    self.events.push(format!("delete {}", name));
    self.records.lock().remove(&(name.to_string(), record_type));
    self.deleted.lock().push(name.to_string());
    Ok(())
  }
}

/// Config with every wait set to zero and no retries.
pub fn fast_config() -> Config {
  let mut config = Config::default();
  config.acmeca.propagation_delay_secs = 0;
  config.acmeca.poll_interval_secs = 0;
  config.acmeca.poll_attempts = 3;
  config.acmeca.retry = RetryPolicy {
    max_attempts: 1,
    backoff_millis: 0,
    backoff_exponent: 2.0,
  };
  config
}

/// The whole engine wired to stubs.
pub struct Harness {
  pub events: Events,
  pub state: Arc<CaState>,
  pub ca: Arc<StubCa>,
  pub dns: Arc<RecordingDns>,
  pub store: Arc<MemoryStore>,
  pub service: CertificateService,
}

impl Harness {
  pub async fn new() -> Self {
    Self::with_config(fast_config(), Shutdown::never()).await
  }

  /// A harness whose account keypair is already stored, so no 4096 bit key
  /// is generated.
  pub async fn with_config(config: Config, shutdown: Shutdown) -> Self {
    let harness = Self::unseeded(config, shutdown);
    seed_account(&harness.store).await;
    harness
  }

  pub fn unseeded(config: Config, shutdown: Shutdown) -> Self {
    let events = Events::default();
    let state = Arc::new(CaState::new(events.clone()));
    let ca = Arc::new(StubCa::new(state.clone()));
    let dns = Arc::new(RecordingDns::new(events.clone()));
    let store = Arc::new(MemoryStore::new());

    let service = CertificateService::builder(config)
      .ca(ca.clone())
      .dns(dns.clone())
      .account_store(store.clone())
      .certificate_store(store.clone())
      .shutdown(shutdown)
      .build()
      .unwrap();

    Harness {
      events,
      state,
      ca,
      dns,
      store,
      service,
    }
  }

  pub async fn certificate(&self, domains: &DomainSet) -> CertificateRecord {
    CertificateStore::get_by_id(&*self.store, &domains.key())
      .await
      .unwrap()
      .unwrap()
  }

  pub async fn put_certificate(&self, record: &CertificateRecord) {
    CertificateStore::update(&*self.store, record).await.unwrap();
  }
}

/// Store a 2048 bit account keypair and return its PEM.
pub async fn seed_account(store: &MemoryStore) -> Vec<u8> {
  let key = gen_rsa_private_key(2048).unwrap();
  let pem = codec::encode_keypair(&key).unwrap();
  AccountStore::save(store, &AccountRecord::new(pem.clone()))
    .await
    .unwrap();
  pem
}

pub fn domains(list: &str) -> DomainSet {
  DomainSet::parse(list).unwrap()
}
