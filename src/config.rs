//! Engine configuration.
//!
//! Every field has a default, so an empty document is a valid config. Keys
//! are kebab-case and may be given either as a nested document (JSON, TOML,
//! YAML) or as flat dotted properties:
//!
//! ```text
//! acmeca.server-uri=acme://letsencrypt.org/staging
//! acmeca.renew-days=14
//! service.RenewalScanner.enabled=false
//! ```

use crate::error::Error;
use crate::prover::ChallengeTiming;
use crate::retry::RetryPolicy;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Name the renewal daemon is configured under in `service.<name>.enabled`.
pub const RENEWAL_DAEMON_NAME: &str = "RenewalScanner";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
  pub acmeca: AcmeCaConfig,
  pub service: HashMap<String, ServiceConfig>,
  pub dns: DnsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AcmeCaConfig {
  /// `acme://letsencrypt.org`, `acme://letsencrypt.org/staging` or a
  /// directory URL.
  pub server_uri: String,
  /// Contact URLs registered with a new account, e.g. `mailto:` addresses.
  /// A single comma separated string is accepted too.
  #[serde(deserialize_with = "string_or_list")]
  pub contact: Vec<String>,
  pub renew_days: u32,
  pub renew_interval_secs: u64,
  pub propagation_delay_secs: u64,
  pub poll_interval_secs: u64,
  pub poll_attempts: u32,
  pub retry: RetryPolicy,
}

impl Default for AcmeCaConfig {
  fn default() -> Self {
    AcmeCaConfig {
      server_uri: "acme://letsencrypt.org".to_string(),
      contact: Vec::new(),
      renew_days: 30,
      renew_interval_secs: 86_400,
      propagation_delay_secs: 5,
      poll_interval_secs: 10,
      poll_attempts: 10,
      retry: RetryPolicy::default(),
    }
  }
}

impl AcmeCaConfig {
  pub fn renew_interval(&self) -> Duration {
    Duration::from_secs(self.renew_interval_secs)
  }

  pub fn challenge_timing(&self) -> ChallengeTiming {
    ChallengeTiming {
      propagation_delay: Duration::from_secs(self.propagation_delay_secs),
      poll_interval: Duration::from_secs(self.poll_interval_secs),
      poll_attempts: self.poll_attempts,
    }
  }
}

fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum StringOrList {
    String(String),
    List(Vec<String>),
  }

  Ok(match StringOrList::deserialize(deserializer)? {
    StringOrList::List(list) => list,
    StringOrList::String(s) => s
      .split(',')
      .map(str::trim)
      .filter(|s| !s.is_empty())
      .map(str::to_string)
      .collect(),
  })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ServiceConfig {
  pub enabled: bool,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    ServiceConfig { enabled: true }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DnsConfig {
  pub webhook_url: Option<String>,
  pub auth_token: Option<String>,
  pub ttl: u32,
  pub timeout_secs: u64,
}

impl Default for DnsConfig {
  fn default() -> Self {
    DnsConfig {
      webhook_url: None,
      auth_token: None,
      ttl: 60,
      timeout_secs: 30,
    }
  }
}

impl Config {
  pub fn from_json(json: &str) -> Result<Self, Error> {
    let source = config::File::from_str(json, config::FileFormat::Json);
    Self::load(config::Config::builder().add_source(source), "JSON")
  }

  /// Parse `key=value` lines. Blank lines and lines starting with `#` are
  /// skipped. Values are kept as strings and converted to the field's type
  /// on deserialization.
  pub fn from_properties(properties: &str) -> Result<Self, Error> {
    let mut builder = config::Config::builder();
    let mut seen: Vec<&str> = Vec::new();
    for (n, line) in properties.lines().enumerate() {
      let line = line.trim();
      if line.is_empty() || line.starts_with('#') {
        continue;
      }
      let (key, value) = line.split_once('=').ok_or_else(|| {
        Error::Config(format!("line {}: expected key=value", n + 1))
      })?;
      let key = key.trim();
      if key.is_empty() || key.split('.').any(str::is_empty) {
        return Err(Error::Config(format!("malformed property key {}", key)));
      }
      if seen.iter().any(|other| keys_overlap(key, other)) {
        return Err(Error::Config(format!("conflicting property {}", key)));
      }
      seen.push(key);
      builder = builder
        .set_override(key, value.trim())
        .map_err(|e| Error::Config(format!("property {}: {}", key, e)))?;
    }
    Self::load(builder, "properties")
  }

  /// Load a `.properties` file, or any format the `config` crate knows by
  /// its extension (JSON, TOML, YAML, ...).
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
    let path = path.as_ref();
    if path.extension().and_then(|ext| ext.to_str()) == Some("properties") {
      let text = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("cannot read {}: {}", path.display(), e))
      })?;
      return Self::from_properties(&text);
    }
    let source = config::File::from(path);
    Self::load(config::Config::builder().add_source(source), "file")
  }

  fn load(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
    what: &str,
  ) -> Result<Self, Error> {
    builder
      .build()
      .and_then(|loaded| loaded.try_deserialize::<Config>())
      .map_err(|e| Error::Config(format!("invalid {} config: {}", what, e)))
  }

  /// Whether the named daemon should run. Daemons are enabled unless
  /// configured otherwise. Names match case-insensitively.
  pub fn daemon_enabled(&self, name: &str) -> bool {
    self
      .service
      .iter()
      .find(|(configured, _)| configured.eq_ignore_ascii_case(name))
      .map(|(_, service)| service.enabled)
      .unwrap_or(true)
  }
}

/// Whether two dotted keys name the same node or one contains the other.
fn keys_overlap(a: &str, b: &str) -> bool {
  let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
  long == short
    || (long.starts_with(short) && long.as_bytes()[short.len()] == b'.')
}
