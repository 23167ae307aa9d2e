use crate::authorization::ChallengeStatus;
use crate::dns::DnsError;
use crate::store::StoreError;
use serde::Deserialize;
use std::fmt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("the maximum poll attempts have been exceeded")]
  MaxAttemptsExceeded,

  #[error("validation error: {0}")]
  Validation(&'static str),

  #[error("invalid configuration: {0}")]
  Config(String),

  #[error(transparent)]
  Server(#[from] ServerError),

  /// The CA already holds an account for the key. Carries the location of
  /// that account so the caller can bind to it.
  #[error("an account already exists for this key at {location}")]
  AccountExists { location: String },

  #[error("unexpected error registering with ACME CA: {0}")]
  Account(#[source] Box<Error>),

  #[error("DNS challenge is not available, cannot prove we own {domain}")]
  NoDnsChallenge { domain: String },

  #[error("error during {stage} of the challenge for {domain}: {source}")]
  Challenge {
    domain: String,
    stage: &'static str,
    #[source]
    source: Box<Error>,
  },

  #[error("challenge failed for {record} with state {status}")]
  ChallengeFailed {
    domain: String,
    record: String,
    status: ChallengeStatus,
  },

  #[error(transparent)]
  Dns(#[from] DnsError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("error encoding or decoding {what}: {source}")]
  Codec {
    what: &'static str,
    #[source]
    source: openssl::error::ErrorStack,
  },

  #[error("cannot renew certs for {0}: no such cert exists currently")]
  NoSuchCertificate(String),

  /// A stored certificate id that is not the key of its own domain-set,
  /// e.g. written by another tool with different case or ordering.
  #[error("stored certificate id {id} is not normalized, expected {expected}")]
  UnnormalizedRecordId { id: String, expected: String },

  #[error("failed to issue certificate for {domains} during {stage}: {source}")]
  Issuance {
    domains: String,
    stage: IssueStage,
    #[source]
    source: Box<Error>,
  },

  #[error("operation cancelled by shutdown")]
  Cancelled,

  #[error(transparent)]
  Transport(BoxError),

  #[error(transparent)]
  Other(BoxError),
}

impl Error {
  /// Whether a whole-operation retry has a chance of succeeding.
  pub fn is_retryable(&self) -> bool {
    match self {
      Error::Server(_)
      | Error::Transport(_)
      | Error::Dns(_)
      | Error::NoDnsChallenge { .. }
      | Error::Challenge { .. }
      | Error::ChallengeFailed { .. }
      | Error::MaxAttemptsExceeded => true,
      Error::Issuance { source, .. } => source.is_retryable(),
      _ => false,
    }
  }

  pub(crate) fn challenge<'a>(
    domain: &'a str,
    stage: &'static str,
  ) -> impl FnOnce(Error) -> Error + 'a {
    move |err| match err {
      err @ (Error::Account(_) | Error::Cancelled) => err,
      err => Error::Challenge {
        domain: domain.to_string(),
        stage,
        source: Box::new(err),
      },
    }
  }

  pub(crate) fn codec(
    what: &'static str,
  ) -> impl FnOnce(openssl::error::ErrorStack) -> Error {
    move |source| Error::Codec { what, source }
  }
}

/// The step of an issuance that failed.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum IssueStage {
  Ownership,
  Lookup,
  Keypair,
  Registration,
  Csr,
  Request,
  Download,
  Encoding,
  Persist,
}

impl fmt::Display for IssueStage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let stage = match self {
      IssueStage::Ownership => "ownership proof",
      IssueStage::Lookup => "record lookup",
      IssueStage::Keypair => "keypair preparation",
      IssueStage::Registration => "registration",
      IssueStage::Csr => "CSR signing",
      IssueStage::Request => "certificate request",
      IssueStage::Download => "certificate download",
      IssueStage::Encoding => "certificate encoding",
      IssueStage::Persist => "persist",
    };
    f.write_str(stage)
  }
}

#[derive(Debug, thiserror::Error)]
#[error("transport error: {0}")]
pub struct TransportError(&'static str);

pub fn transport_err(msg: &'static str) -> Error {
  Error::Transport(Box::new(TransportError(msg)))
}

pub fn map_transport_err<T, E: std::error::Error + Send + Sync + 'static>(
  res: Result<T, E>,
) -> Result<T, Error> {
  res.map_err(|err| Error::Transport(Box::new(err)))
}

impl From<reqwest::Error> for Error {
  fn from(err: reqwest::Error) -> Self {
    Self::Transport(Box::new(err))
  }
}

impl From<serde_json::Error> for Error {
  fn from(err: serde_json::Error) -> Self {
    Self::Transport(Box::new(err))
  }
}

impl From<openssl::error::ErrorStack> for Error {
  fn from(err: openssl::error::ErrorStack) -> Self {
    Self::Other(Box::new(err))
  }
}

/// The result of an operation that can return a [`ServerError`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase", untagged)]
pub enum ServerResult<T> {
  Ok(T),
  Err(ServerError),
}

impl<T> From<ServerResult<T>> for Result<T, Error> {
  fn from(res: ServerResult<T>) -> Self {
    match res {
      ServerResult::Ok(t) => Ok(t),
      ServerResult::Err(err) => Err(err.into()),
    }
  }
}

/// This is an error as returned by the ACME server.
#[derive(Deserialize, Debug, Clone, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("ServerError({}): {}: {}", r#type.clone().unwrap_or_default(), title.clone().unwrap_or_default(), detail.clone().unwrap_or_default())]
pub struct ServerError {
  /// The type of this error.
  pub r#type: Option<String>,
  /// The human readable title of this error.
  pub title: Option<String>,
  /// The status code of this error.
  pub status: Option<u16>,
  /// The human readable extra description for this error.
  pub detail: Option<String>,
}

impl ServerError {
  pub(crate) fn is_bad_nonce(&self) -> bool {
    self.r#type.as_deref() == Some("urn:ietf:params:acme:error:badNonce")
  }
}
