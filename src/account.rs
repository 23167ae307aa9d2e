use crate::directory::Directory;
use crate::directory::SignedResponse;
use crate::error::*;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::field;
use tracing::info;
use tracing::instrument;
use tracing::Level;
use tracing::Span;

/// The status of an [`Account`].
///
/// Possible values are "valid", "deactivated",
/// and "revoked". The value "deactivated" should be used to indicate client-
/// initiated deactivation whereas "revoked" should be used to indicate server-
/// initiated deactivation.
#[derive(Deserialize, Eq, PartialEq, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub enum AccountStatus {
  Valid,
  Deactivated,
  Revoked,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct AccountResource {
  status: AccountStatus,
  contact: Option<Vec<String>>,
  terms_of_service_agreed: Option<bool>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NewAccount<'a> {
  #[serde(skip_serializing_if = "Option::is_none")]
  contact: Option<&'a [String]>,
  #[serde(skip_serializing_if = "Option::is_none")]
  terms_of_service_agreed: Option<bool>,
}

/// An ACME account. This is used to identify a subscriber to an ACME server.
///
/// Accounts are created through an [`AccountBuilder`], or rebound to an
/// existing location with [`Account::bind`].
#[derive(Debug, Clone)]
pub struct Account {
  pub(crate) directory: Arc<Directory>,
  pub(crate) private_key: PKey<Private>,

  /// The account URL of this account, used as the JWS `kid`.
  pub id: String,
  /// The status of this account.
  pub status: AccountStatus,
  /// An array of URLs that the server can use to contact the client for
  /// issues related to this account.
  pub contact: Option<Vec<String>>,
  /// Whether the account has agreed to the server's terms of service.
  pub terms_of_service_agreed: Option<bool>,
}

/// An builder that is used to create a new [`Account`] on the ACME server.
#[derive(Debug)]
pub struct AccountBuilder {
  directory: Arc<Directory>,
  private_key: PKey<Private>,

  contact: Option<Vec<String>>,
  terms_of_service_agreed: Option<bool>,
}

impl AccountBuilder {
  /// This creates a new [`AccountBuilder`] for the given account key. The
  /// key signs every request made for the account and must be kept, it is
  /// what identifies the account to the CA.
  pub fn new(directory: Arc<Directory>, private_key: PKey<Private>) -> Self {
    AccountBuilder {
      directory,
      private_key,
      contact: None,
      terms_of_service_agreed: None,
    }
  }

  /// The contact information for the account. For example this could be a
  /// `vec!["mailto:hostmaster@example.com".to_string()]`.
  pub fn contact(&mut self, contact: Vec<String>) -> &mut Self {
    self.contact = Some(contact);
    self
  }

  /// If you agree to the ACME server terms of service.
  pub fn terms_of_service_agreed(
    &mut self,
    terms_of_service_agreed: bool,
  ) -> &mut Self {
    self.terms_of_service_agreed = Some(terms_of_service_agreed);
    self
  }

  /// This will create a new [`Account`] on the ACME server.
  ///
  /// If the server already has an account for the private key it answers
  /// with that account's location instead of creating one. That is reported
  /// as [`Error::AccountExists`] so the caller can decide to bind to it.
  #[instrument(level = Level::INFO, name = "acme2_lifecycle::AccountBuilder::build", err, skip(self), fields(contact = ?self.contact, terms_of_service_agreed = ?self.terms_of_service_agreed, account_id = field::Empty))]
  pub async fn build(&mut self) -> Result<Arc<Account>, Error> {
    let url = self.directory.new_account_url.clone();

    let payload = NewAccount {
      contact: self.contact.as_deref(),
      terms_of_service_agreed: self.terms_of_service_agreed,
    };

    let resp = self
      .directory
      .authenticated_request::<_, AccountResource>(
        &url,
        payload,
        &self.private_key,
        None,
      )
      .await?;

    if resp.status == reqwest::StatusCode::CONFLICT
      || resp.status == reqwest::StatusCode::OK
    {
      let location = resp.location("account conflict carries no location")?;
      Span::current().record("account_id", field::display(&location));
      return Err(Error::AccountExists { location });
    }

    let account_id =
      resp.location("mandatory location header in newAccount not present");
    let res: Result<AccountResource, Error> = resp.result.into();
    let resource = res?;
    let account_id = account_id?;
    Span::current().record("account_id", field::display(&account_id));

    Ok(Arc::new(Account::from_resource(
      self.directory.clone(),
      self.private_key.clone(),
      account_id,
      resource,
    )))
  }
}

impl Account {
  fn from_resource(
    directory: Arc<Directory>,
    private_key: PKey<Private>,
    id: String,
    resource: AccountResource,
  ) -> Account {
    Account {
      directory,
      private_key,
      id,
      status: resource.status,
      contact: resource.contact,
      terms_of_service_agreed: resource.terms_of_service_agreed,
    }
  }

  /// Bind to an account that already exists on the server at `location`.
  #[instrument(level = Level::INFO, name = "acme2_lifecycle::Account::bind", err, skip(directory, private_key))]
  pub async fn bind(
    directory: Arc<Directory>,
    private_key: PKey<Private>,
    location: &str,
  ) -> Result<Arc<Account>, Error> {
    let resp = directory
      .authenticated_request::<_, AccountResource>(
        location,
        json!({}),
        &private_key,
        Some(location.to_string()),
      )
      .await?;
    let res: Result<AccountResource, Error> = resp.result.into();
    let resource = res?;

    Ok(Arc::new(Account::from_resource(
      directory,
      private_key,
      location.to_string(),
      resource,
    )))
  }

  /// Retrieve the private key for this account.
  pub fn private_key(&self) -> PKey<Private> {
    self.private_key.clone()
  }

  /// Record agreement to the server's current terms of service.
  #[instrument(level = Level::INFO, name = "acme2_lifecycle::Account::agree_to_terms", err, skip(self), fields(account_id = %self.id))]
  pub async fn agree_to_terms(&self) -> Result<Account, Error> {
    let resp = self
      .signed::<_, AccountResource>(
        &self.id,
        json!({ "termsOfServiceAgreed": true }),
      )
      .await?;
    let res: Result<AccountResource, Error> = resp.result.into();
    let resource = res?;

    if let Some(meta) = &self.directory.meta {
      info!(
        terms_of_service = ?meta.terms_of_service,
        "Accepted CA terms of service"
      );
    }

    Ok(Account::from_resource(
      self.directory.clone(),
      self.private_key.clone(),
      self.id.clone(),
      resource,
    ))
  }

  /// Make a request signed with this account's key and `kid`.
  pub(crate) async fn signed<T, R>(
    &self,
    url: &str,
    payload: T,
  ) -> Result<SignedResponse<R>, Error>
  where
    T: Serialize,
    R: DeserializeOwned,
  {
    self
      .directory
      .authenticated_request(
        url,
        payload,
        &self.private_key,
        Some(self.id.clone()),
      )
      .await
  }
}
