//! Runs the renewal scanner against an in-memory store until Ctrl-C.
//!
//! ```text
//! RUST_LOG=acme2_lifecycle=debug cargo run --example renewal_daemon -- acme.properties a.example.com
//! ```
//!
//! Any domains given after the config path are issued once before the
//! scanner starts. Nothing is persisted, so each run registers a new CA
//! account.

use acme2_lifecycle::shutdown;
use acme2_lifecycle::CertificateService;
use acme2_lifecycle::Config;
use acme2_lifecycle::DomainSet;
use anyhow::Context;
use anyhow::Result;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
  let filter = tracing_subscriber::EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(true)
    .init();

  let mut args = std::env::args().skip(1);
  let config = match args.next() {
    Some(path) => Config::from_file(&path)
      .with_context(|| format!("Failed to load config file {}", path))?,
    None => Config::default(),
  };

  let (trigger, shutdown) = shutdown::channel();
  let service = CertificateService::builder(config)
    .in_memory_store()
    .shutdown(shutdown)
    .build()
    .context("Failed to assemble certificate service")?;

  let domains: Vec<String> = args.collect();
  if !domains.is_empty() {
    let domains = DomainSet::new(&domains)?;
    let record = service
      .issue(&domains)
      .await
      .with_context(|| format!("Failed to issue certificate for {}", domains))?;
    info!(
      domains = %record.id,
      expires = %record.expires,
      "Issued certificate"
    );
  }

  let scanner = service.scanner().clone().spawn();

  tokio::signal::ctrl_c().await?;
  info!("Shutting down");
  trigger.trigger();
  scanner.await?;

  Ok(())
}
