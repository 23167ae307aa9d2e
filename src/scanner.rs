use crate::domains::DomainSet;
use crate::error::Error;
use crate::issuer::CertificateIssuer;
use crate::shutdown::Shutdown;
use crate::store::CertificateStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::error;
use tracing::info;
use tracing::warn;

/// Whether the scanner acts on its ticks. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
  Enabled,
  Disabled,
}

impl From<bool> for DaemonState {
  fn from(enabled: bool) -> Self {
    if enabled {
      DaemonState::Enabled
    } else {
      DaemonState::Disabled
    }
  }
}

/// Outcome of one renewal scan.
#[derive(Debug, Default)]
pub struct ScanReport {
  /// Keys of the domain-sets renewed, in scan order.
  pub renewed: Vec<String>,
  /// Keys of the domain-sets that failed, with their error.
  pub failed: Vec<(String, Error)>,
}

/// Periodically renews every certificate close to expiry.
pub struct RenewalScanner {
  issuer: Arc<CertificateIssuer>,
  store: Arc<dyn CertificateStore>,
  renew_days: u32,
  interval: Duration,
  state: DaemonState,
  shutdown: Shutdown,
}

impl RenewalScanner {
  pub fn new(
    issuer: Arc<CertificateIssuer>,
    store: Arc<dyn CertificateStore>,
    renew_days: u32,
    interval: Duration,
    state: DaemonState,
    shutdown: Shutdown,
  ) -> Self {
    RenewalScanner {
      issuer,
      store,
      renew_days,
      interval,
      state,
      shutdown,
    }
  }

  pub fn state(&self) -> DaemonState {
    self.state
  }

  /// Renew every domain-set expiring within the renewal horizon, one after
  /// another. A failed renewal is logged and recorded in the report and the
  /// scan moves on to the next set.
  ///
  /// Only a failure to list the candidates fails the scan itself.
  pub async fn scan(&self) -> Result<ScanReport, Error> {
    let eligible = self.store.get_eligible_for_renewal(self.renew_days).await?;
    info!(
      count = eligible.len(),
      renew_days = self.renew_days,
      "Starting renewal scan"
    );

    let mut report = ScanReport::default();
    for key in eligible {
      if self.shutdown.is_shutdown() {
        break;
      }

      let result = match DomainSet::parse(&key) {
        Ok(domains) if domains.key() == key => {
          self.issuer.renew(&domains).await
        }
        Ok(domains) => {
          warn!(
            domains = %key,
            expected = %domains.key(),
            "Skipping certificate stored under an unnormalized id"
          );
          Err(Error::UnnormalizedRecordId {
            id: key.clone(),
            expected: domains.key(),
          })
        }
        Err(err) => Err(err),
      };
      match result {
        Ok(record) => {
          info!(
            domains = %key,
            expires = %record.expires,
            "Renewed certificate"
          );
          report.renewed.push(key);
        }
        Err(err) => {
          error!(domains = %key, error = %err, "Failed to renew certificate");
          let cancelled = matches!(err, Error::Cancelled);
          report.failed.push((key, err));
          if cancelled {
            break;
          }
        }
      }
    }

    info!(
      renewed = report.renewed.len(),
      failed = report.failed.len(),
      "Renewal scan finished"
    );
    Ok(report)
  }

  /// One daemon tick: a scan when enabled, nothing otherwise.
  pub async fn tick(&self) -> Result<Option<ScanReport>, Error> {
    match self.state {
      DaemonState::Enabled => self.scan().await.map(Some),
      DaemonState::Disabled => Ok(None),
    }
  }

  /// Tick every interval, starting immediately, until shutdown.
  pub async fn run(&self) {
    info!(
      state = ?self.state,
      interval = ?self.interval,
      "Renewal scanner started"
    );
    let mut interval =
      tokio::time::interval(self.interval.max(Duration::from_secs(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        _ = interval.tick() => {}
        _ = self.shutdown.cancelled() => break,
      }
      if let Err(err) = self.tick().await {
        error!(error = %err, "Renewal scan failed");
      }
    }
    info!("Renewal scanner stopped");
  }

  /// Run the scanner on the current runtime.
  pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
    tokio::spawn(async move { self.run().await })
  }
}
