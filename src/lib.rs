//! Certificate lifecycle engine for ACMEv2 certificate authorities.
//!
//! Domains are proven over DNS-01 through a [`DnsProvider`], certificates
//! and their keys are kept in a [`CertificateStore`], and a
//! [`RenewalScanner`] renews whatever is about to expire.
//!
//! ```no_run
//! # async fn run() -> Result<(), acme2_lifecycle::Error> {
//! use acme2_lifecycle::CertificateService;
//! use acme2_lifecycle::Config;
//! use acme2_lifecycle::DomainSet;
//!
//! let config = Config::from_file("acme.properties")?;
//! let service = CertificateService::builder(config)
//!   .in_memory_store()
//!   .build()?;
//!
//! let domains = DomainSet::parse("example.com,www.example.com")?;
//! let record = service.issue(&domains).await?;
//! println!("valid until {}", record.expires);
//! # Ok(())
//! # }
//! ```

mod account;
mod authorization;
pub mod codec;
mod config;
mod directory;
pub mod dns;
mod domains;
mod error;
mod helpers;
mod issuer;
mod jws;
mod manager;
mod order;
mod prover;
mod retry;
mod scanner;
mod service;
mod session;
pub mod shutdown;
pub mod store;

pub use account::*;
pub use authorization::*;
pub use crate::config::*;
pub use directory::*;
pub use dns::DnsProvider;
pub use dns::RecordType;
pub use domains::DomainSet;
pub use error::*;
pub use helpers::gen_alphanumeric_token;
pub use helpers::gen_rsa_private_key;
pub use helpers::Identifier;
pub use helpers::ACCOUNT_KEY_BITS;
pub use helpers::DOMAIN_KEY_BITS;
pub use helpers::MANAGEMENT_TOKEN_LEN;
pub use issuer::CertificateIssuer;
pub use manager::AccountManager;
pub use order::*;
pub use prover::ChallengeTiming;
pub use prover::OwnershipProver;
pub use retry::RetryPolicy;
pub use scanner::*;
pub use service::*;
pub use session::*;
pub use shutdown::Shutdown;
pub use store::CertificateRecord;
pub use store::CertificateStore;
