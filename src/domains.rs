use crate::error::Error;
use std::fmt;

/// One or more domain names covered by a single certificate.
///
/// Names are trimmed, lowercased, deduplicated and sorted, so every spelling
/// of the same set maps to the same [`key`](DomainSet::key).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainSet {
  domains: Vec<String>,
}

impl DomainSet {
  pub fn new<I, S>(domains: I) -> Result<Self, Error>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let mut normalized = Vec::new();
    for domain in domains {
      let domain = domain.as_ref().trim().to_ascii_lowercase();
      if domain.is_empty() {
        return Err(Error::Validation("domain names must not be empty"));
      }
      if domain.contains(',') || domain.contains(char::is_whitespace) {
        return Err(Error::Validation(
          "domain names must not contain commas or whitespace",
        ));
      }
      normalized.push(domain);
    }

    normalized.sort();
    normalized.dedup();

    if normalized.is_empty() {
      return Err(Error::Validation("a domain set needs at least one domain"));
    }

    Ok(DomainSet {
      domains: normalized,
    })
  }

  /// Parse a comma separated list, such as a stored record id.
  pub fn parse(list: &str) -> Result<Self, Error> {
    Self::new(list.split(','))
  }

  /// The record id for this set: the sorted names joined by commas.
  pub fn key(&self) -> String {
    self.domains.join(",")
  }

  /// The name used as the certificate subject.
  pub fn primary(&self) -> &str {
    &self.domains[0]
  }

  pub fn alternates(&self) -> &[String] {
    &self.domains[1..]
  }

  pub fn as_slice(&self) -> &[String] {
    &self.domains
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.domains.iter().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.domains.len()
  }

  pub fn is_empty(&self) -> bool {
    self.domains.is_empty()
  }
}

impl fmt::Display for DomainSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.key())
  }
}

impl std::str::FromStr for DomainSet {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}
