use crate::error::*;
use crate::helpers::*;
use openssl::hash::hash;
use openssl::hash::MessageDigest;
use openssl::pkey::Id;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use openssl::sign::Signer;
use serde::Serialize;
use serde_json::json;

#[derive(Serialize, Clone, Default)]
struct JwsHeader {
  #[serde(skip_serializing_if = "Option::is_none")]
  nonce: Option<String>,
  alg: String,
  url: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  kid: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  jwk: Option<Jwk>,
}

/// Public half of an RSA account key. Members are declared in lexicographic
/// order so the serialization is also the RFC 7638 thumbprint input.
#[derive(Serialize, Clone, Default)]
pub(crate) struct Jwk {
  e: String,
  kty: String,
  n: String,
}

impl Jwk {
  pub fn new(pkey: &PKey<Private>) -> Result<Jwk, Error> {
    let rsa = pkey
      .rsa()
      .map_err(|_| Error::Validation("account keys must be RSA keys"))?;
    Ok(Jwk {
      e: b64(&rsa.e().to_vec()),
      kty: "RSA".to_string(),
      n: b64(&rsa.n().to_vec()),
    })
  }

  pub fn thumbprint(&self) -> Result<String, Error> {
    let digest = hash(
      MessageDigest::sha256(),
      &serde_json::to_string(self)?.into_bytes(),
    )?;
    Ok(b64(&digest))
  }
}

pub(crate) fn jws(
  url: &str,
  nonce: Option<String>,
  payload: &str,
  pkey: &PKey<Private>,
  account_id: Option<String>,
) -> Result<String, Error> {
  let payload_b64 = b64(payload.as_bytes());

  let alg: String = match pkey.id() {
    Id::RSA => "RS256".into(),
    _ => return Err(Error::Validation("only RSA keys can sign requests")),
  };

  let mut header = JwsHeader {
    nonce,
    alg,
    url: url.to_string(),
    ..Default::default()
  };

  if let Some(kid) = account_id {
    header.kid = Some(kid);
  } else {
    header.jwk = Some(Jwk::new(pkey)?);
  }

  let protected_b64 = b64(&serde_json::to_string(&header)?.into_bytes());

  let signature_b64 = {
    let mut signer = Signer::new(MessageDigest::sha256(), pkey)?;
    signer
      .update(&format!("{}.{}", protected_b64, payload_b64).into_bytes())?;
    b64(&signer.sign_to_vec()?)
  };

  Ok(serde_json::to_string(&json!({
    "protected": protected_b64,
    "payload": payload_b64,
    "signature": signature_b64
  }))?)
}
