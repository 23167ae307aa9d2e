use crate::codec;
use crate::error::*;
use crate::helpers::gen_rsa_private_key;
use crate::helpers::ACCOUNT_KEY_BITS;
use crate::session::CertificateAuthority;
use crate::session::Registration;
use crate::store::AccountRecord;
use crate::store::AccountStore;
use crate::store::ACCOUNT_ID;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;
use tracing::instrument;
use tracing::Level;

/// Owns the CA account: its persisted keypair and the registration handle
/// shared by every issuance in the process.
pub struct AccountManager {
  store: Arc<dyn AccountStore>,
  ca: Arc<dyn CertificateAuthority>,
  server_uri: String,
  registration: OnceCell<Arc<dyn Registration>>,
}

impl AccountManager {
  pub fn new(
    store: Arc<dyn AccountStore>,
    ca: Arc<dyn CertificateAuthority>,
    server_uri: impl Into<String>,
  ) -> Self {
    AccountManager {
      store,
      ca,
      server_uri: server_uri.into(),
      registration: OnceCell::new(),
    }
  }

  pub fn server_uri(&self) -> &str {
    &self.server_uri
  }

  /// The registration handle, created on first use and cached for the life
  /// of the manager. Concurrent first callers share a single registration.
  ///
  /// Failures are wrapped in [`Error::Account`] and are not cached, so a
  /// later call tries again.
  pub async fn registration(&self) -> Result<Arc<dyn Registration>, Error> {
    self
      .registration
      .get_or_try_init(|| async {
        self.register().await.map_err(|e| Error::Account(Box::new(e)))
      })
      .await
      .cloned()
  }

  #[instrument(
    level = Level::INFO,
    name = "acme2_lifecycle::AccountManager::register",
    err,
    skip(self),
    fields(server_uri = %self.server_uri)
  )]
  async fn register(&self) -> Result<Arc<dyn Registration>, Error> {
    let account_key = self.account_key().await?;

    let registration = match self
      .ca
      .create_registration(&self.server_uri, &account_key)
      .await
    {
      Ok(registration) => registration,
      Err(Error::AccountExists { location }) => {
        info!(%location, "ACME account already exists, binding to it");
        self
          .ca
          .bind_registration(&self.server_uri, &account_key, &location)
          .await?
      }
      Err(err) => return Err(err),
    };

    registration.agree_to_terms().await?;
    info!(account = %registration.location(), "ACME registration ready");
    Ok(registration)
  }

  /// Load the account keypair, generating and persisting it on first run.
  async fn account_key(&self) -> Result<PKey<Private>, Error> {
    if let Some(record) = self.store.get_by_id(ACCOUNT_ID).await? {
      return codec::decode_keypair(&record.keypair);
    }

    info!(bits = ACCOUNT_KEY_BITS, "Generating ACME account keypair");
    let key = gen_rsa_private_key(ACCOUNT_KEY_BITS)?;
    let record = AccountRecord::new(codec::encode_keypair(&key)?);
    self.store.save(&record).await?;
    Ok(key)
  }
}
