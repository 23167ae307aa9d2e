//! PEM encodings for the key material kept in account and certificate
//! records.

use crate::error::*;
use chrono::DateTime;
use chrono::Utc;
use openssl::asn1::Asn1Time;
use openssl::pkey::Id;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use openssl::x509::X509;

/// Encode an RSA keypair as a PEM `RSA PRIVATE KEY` block.
pub fn encode_keypair(key: &PKey<Private>) -> Result<Vec<u8>, Error> {
  let rsa = key.rsa().map_err(Error::codec("keypair"))?;
  rsa.private_key_to_pem().map_err(Error::codec("keypair"))
}

/// Decode a PEM keypair. Both PKCS#1 and PKCS#8 blocks are accepted, but the
/// key must be RSA.
pub fn decode_keypair(pem: &[u8]) -> Result<PKey<Private>, Error> {
  let key =
    PKey::private_key_from_pem(pem).map_err(Error::codec("keypair"))?;
  if key.id() != Id::RSA {
    return Err(Error::Validation("stored keypair is not an RSA key"));
  }
  Ok(key)
}

pub fn encode_certificate(cert: &X509) -> Result<Vec<u8>, Error> {
  cert.to_pem().map_err(Error::codec("certificate"))
}

pub fn decode_certificate(pem: &[u8]) -> Result<X509, Error> {
  X509::from_pem(pem).map_err(Error::codec("certificate"))
}

/// Encode a chain as concatenated PEM blocks, in order.
pub fn encode_chain(chain: &[X509]) -> Result<Vec<u8>, Error> {
  let mut out = Vec::new();
  for cert in chain {
    out.extend(encode_certificate(cert)?);
  }
  Ok(out)
}

pub fn decode_chain(pem: &[u8]) -> Result<Vec<X509>, Error> {
  if pem.iter().all(u8::is_ascii_whitespace) {
    return Ok(Vec::new());
  }
  X509::stack_from_pem(pem).map_err(Error::codec("certificate chain"))
}

/// The certificate's `notAfter` as a UTC timestamp.
pub fn not_after(cert: &X509) -> Result<DateTime<Utc>, Error> {
  let epoch = Asn1Time::from_unix(0).map_err(Error::codec("notAfter"))?;
  let diff = epoch.diff(cert.not_after()).map_err(Error::codec("notAfter"))?;
  let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
  DateTime::from_timestamp(secs, 0)
    .ok_or(Error::Validation("certificate notAfter is out of range"))
}
