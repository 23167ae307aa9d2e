use crate::error::*;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use openssl::rsa::Rsa;
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use serde::Serialize;

/// Size of the RSA keypair generated for the CA account.
pub const ACCOUNT_KEY_BITS: u32 = 4096;

/// Size of the RSA keypair generated for each domain-set.
pub const DOMAIN_KEY_BITS: u32 = 2048;

/// Length of a certificate's management token.
pub const MANAGEMENT_TOKEN_LEN: usize = 32;

/// This is a identifier for a resource that the ACME server
/// can provision certificates for (a domain).
#[derive(Deserialize, Serialize, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Identifier {
  /// The type of identifier.
  pub r#type: String,
  /// The identifier itself.
  pub value: String,
}

impl Identifier {
  pub fn dns(value: impl Into<String>) -> Self {
    Identifier {
      r#type: "dns".to_string(),
      value: value.into(),
    }
  }
}

pub(crate) fn b64(data: &[u8]) -> String {
  data_encoding::BASE64URL_NOPAD.encode(data)
}

/// Generate a new RSA private key using the specified size,
/// using the system random.
pub fn gen_rsa_private_key(bits: u32) -> Result<PKey<Private>, Error> {
  let rsa = Rsa::generate(bits).map_err(Error::codec("RSA keypair"))?;
  let key = PKey::from_rsa(rsa).map_err(Error::codec("RSA keypair"))?;
  Ok(key)
}

/// Generate a random alphanumeric token, as used for management tokens.
pub fn gen_alphanumeric_token(len: usize) -> String {
  rand::rng()
    .sample_iter(&Alphanumeric)
    .take(len)
    .map(char::from)
    .collect()
}
