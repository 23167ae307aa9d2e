use crate::account::Account;
use crate::error::*;
use crate::helpers::*;
use crate::jws::Jwk;
use openssl::hash::hash;
use openssl::hash::MessageDigest;
use serde::Deserialize;
use serde_json::json;
use std::fmt;
use tracing::field;
use tracing::instrument;
use tracing::Level;
use tracing::Span;

/// Challenge type proving control of a domain through a TXT record.
pub const DNS_01: &str = "dns-01";

#[derive(Deserialize, Debug, Eq, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
/// The status of this authorization. Possible values are "pending",
/// "valid", "invalid", "deactivated", "expired", and "revoked".
pub enum AuthorizationStatus {
  Pending,
  Valid,
  Invalid,
  Deactivated,
  Expired,
  Revoked,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
/// An ACME authorization object represents a server's authorization
/// for an account to represent an identifier.
pub struct Authorization {
  #[serde(skip)]
  pub url: String,

  /// The identifier that the account is authorized to represent.
  pub identifier: Identifier,
  /// The status of this authorization.
  pub status: AuthorizationStatus,
  /// The timestamp after which the server will consider this
  /// authorization invalid.
  pub expires: Option<String>,
  /// For pending authorizations, the challenges that the client can
  /// fulfill in order to prove possession of the identifier. For
  /// valid authorizations, the challenge that was validated. For
  /// invalid authorizations, the challenge that was attempted and
  /// failed.
  pub challenges: Vec<Challenge>,
  pub wildcard: Option<bool>,
}

#[derive(Deserialize, Debug, Eq, PartialEq, Clone, Copy)]
#[serde(rename_all = "camelCase")]
/// The status of this challenge. Possible values are "pending",
/// "processing", "valid", and "invalid".
pub enum ChallengeStatus {
  Pending,
  Processing,
  Valid,
  Invalid,
}

impl ChallengeStatus {
  /// Valid and invalid are final, the CA will not move the challenge on.
  pub fn is_final(self) -> bool {
    matches!(self, ChallengeStatus::Valid | ChallengeStatus::Invalid)
  }
}

impl fmt::Display for ChallengeStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let status = match self {
      ChallengeStatus::Pending => "pending",
      ChallengeStatus::Processing => "processing",
      ChallengeStatus::Valid => "valid",
      ChallengeStatus::Invalid => "invalid",
    };
    f.write_str(status)
  }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
  #[serde(rename = "type")]
  /// The type of challenge encoded in the object.
  pub typ: String,
  /// The URL to which a response can be posted.
  pub url: String,
  /// The status of this challenge.
  pub status: ChallengeStatus,
  /// The time at which the server validated this challenge.
  pub validated: Option<String>,

  /// Error that occurred while the server was validating the
  /// challenge, if any.
  pub error: Option<ServerError>,

  /// A random value that uniquely identifies the challenge.
  pub token: Option<String>,
}

impl Authorization {
  pub fn get_challenge(&self, typ: &str) -> Option<Challenge> {
    self
      .challenges
      .iter()
      .find(|challenge| challenge.typ == typ)
      .cloned()
  }
}

/// The TXT record value for a DNS-01 challenge: the base64url SHA-256 digest
/// of `token.thumbprint`.
pub(crate) fn dns01_digest(
  token: &str,
  account_key: &Jwk,
) -> Result<String, Error> {
  let key_authorization = format!("{}.{}", token, account_key.thumbprint()?);
  let digest = hash(MessageDigest::sha256(), key_authorization.as_bytes())?;
  Ok(b64(&digest))
}

impl Account {
  /// Ask the server to authorize this account for `domain`.
  ///
  /// Uses pre-authorization when the directory offers `newAuthz`, otherwise
  /// opens a single-identifier order and returns its authorization.
  #[instrument(level = Level::INFO, name = "acme2_lifecycle::Account::authorize_domain", err, skip(self), fields(status = field::Empty))]
  pub async fn authorize_domain(
    &self,
    domain: &str,
  ) -> Result<Authorization, Error> {
    let authorization = match self.directory.new_authz_url.clone() {
      Some(new_authz_url) => {
        let resp = self
          .signed::<_, Authorization>(
            &new_authz_url,
            json!({ "identifier": Identifier::dns(domain) }),
          )
          .await?;
        let url =
          resp.location("mandatory location header in newAuthz not present")?;
        let res: Result<Authorization, Error> = resp.result.into();
        let mut authorization = res?;
        authorization.url = url;
        authorization
      }
      None => {
        let order = self.new_order(vec![Identifier::dns(domain)]).await?;
        let url = order
          .authorization_urls
          .first()
          .cloned()
          .ok_or_else(|| transport_err("order carries no authorizations"))?;
        self.authorization(&url).await?
      }
    };

    Span::current().record("status", field::debug(&authorization.status));
    Ok(authorization)
  }

  #[instrument(level = Level::DEBUG, name = "acme2_lifecycle::Account::authorization", err, skip(self))]
  pub async fn authorization(&self, url: &str) -> Result<Authorization, Error> {
    let resp = self.signed::<_, Authorization>(url, "").await?;
    let res: Result<Authorization, Error> = resp.result.into();
    let mut authorization = res?;
    authorization.url = url.to_string();
    Ok(authorization)
  }

  /// The TXT record value that satisfies `challenge` for this account.
  pub fn dns01_digest(&self, challenge: &Challenge) -> Result<String, Error> {
    let token = challenge
      .token
      .as_deref()
      .ok_or(Error::Validation("dns-01 challenge carries no token"))?;
    dns01_digest(token, &Jwk::new(&self.private_key)?)
  }

  /// Tell the server the challenge response is in place.
  #[instrument(level = Level::INFO, name = "acme2_lifecycle::Account::trigger_challenge", err, skip(self, challenge), fields(url = %challenge.url, status = field::Empty))]
  pub async fn trigger_challenge(
    &self,
    challenge: &Challenge,
  ) -> Result<Challenge, Error> {
    let resp = self.signed::<_, Challenge>(&challenge.url, json!({})).await?;
    let res: Result<Challenge, Error> = resp.result.into();
    let challenge = res?;
    Span::current().record("status", field::display(challenge.status));
    Ok(challenge)
  }

  #[instrument(level = Level::DEBUG, name = "acme2_lifecycle::Account::update_challenge", err, skip(self, challenge), fields(url = %challenge.url, status = field::Empty))]
  pub async fn update_challenge(
    &self,
    challenge: &Challenge,
  ) -> Result<Challenge, Error> {
    let resp = self.signed::<_, Challenge>(&challenge.url, "").await?;
    let res: Result<Challenge, Error> = resp.result.into();
    let challenge = res?;
    Span::current().record("status", field::display(challenge.status));
    Ok(challenge)
  }
}
