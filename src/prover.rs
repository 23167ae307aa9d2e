use crate::authorization::Challenge;
use crate::authorization::ChallengeStatus;
use crate::authorization::DNS_01;
use crate::dns::challenge_record_name;
use crate::dns::DnsProvider;
use crate::dns::RecordType;
use crate::error::*;
use crate::manager::AccountManager;
use crate::retry::RetryPolicy;
use crate::session::Registration;
use crate::shutdown::Shutdown;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing::field;
use tracing::instrument;
use tracing::trace;
use tracing::warn;
use tracing::Level;
use tracing::Span;

/// How long to wait around a DNS-01 challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengeTiming {
  /// Pause between publishing the TXT record and triggering verification.
  pub propagation_delay: Duration,
  pub poll_interval: Duration,
  pub poll_attempts: u32,
}

impl Default for ChallengeTiming {
  fn default() -> Self {
    ChallengeTiming {
      propagation_delay: Duration::from_secs(5),
      poll_interval: Duration::from_secs(10),
      poll_attempts: 10,
    }
  }
}

/// Proves control of single domains to the CA through DNS-01.
pub struct OwnershipProver {
  accounts: Arc<AccountManager>,
  dns: Arc<dyn DnsProvider>,
  timing: ChallengeTiming,
  retry: RetryPolicy,
  shutdown: Shutdown,
}

impl OwnershipProver {
  pub fn new(
    accounts: Arc<AccountManager>,
    dns: Arc<dyn DnsProvider>,
    timing: ChallengeTiming,
    retry: RetryPolicy,
    shutdown: Shutdown,
  ) -> Self {
    OwnershipProver {
      accounts,
      dns,
      timing,
      retry,
      shutdown,
    }
  }

  /// [`prove_ownership`](Self::prove_ownership) under the retry policy.
  /// Each retry runs the whole challenge again, DNS record included.
  pub async fn prove_ownership_with_retry(
    &self,
    domain: &str,
  ) -> Result<(), Error> {
    self
      .retry
      .run("prove ownership", &self.shutdown, || self.prove_ownership(domain))
      .await
  }

  /// Answer a DNS-01 challenge for `domain`.
  ///
  /// Once the TXT record has been created it is deleted before this returns,
  /// whatever the challenge outcome, including when shutdown interrupts the
  /// wait.
  #[instrument(level = Level::INFO, name = "acme2_lifecycle::OwnershipProver::prove_ownership", err, skip(self), fields(status = field::Empty))]
  pub async fn prove_ownership(&self, domain: &str) -> Result<(), Error> {
    let registration = self.accounts.registration().await?;

    let authorization = registration
      .authorize_domain(domain)
      .await
      .map_err(Error::challenge(domain, "authorization"))?;
    let challenge =
      authorization
        .get_challenge(DNS_01)
        .ok_or_else(|| Error::NoDnsChallenge {
          domain: domain.to_string(),
        })?;
    let digest = registration
      .dns_digest(&challenge)
      .map_err(Error::challenge(domain, "digest"))?;

    let record = challenge_record_name(domain);
    debug!(%record, value = %digest, "Creating challenge TXT record");
    self
      .dns
      .create_dns_record(&record, RecordType::Txt, &digest)
      .await?;

    let outcome = self.verify(&*registration, domain, challenge).await;

    debug!(%record, "Deleting challenge TXT record");
    if let Err(err) = self.dns.delete_dns_record(&record, RecordType::Txt).await
    {
      warn!(%record, error = %err, "Failed to delete challenge TXT record");
    }

    let challenge = outcome?;
    Span::current().record("status", field::display(challenge.status));
    if challenge.status != ChallengeStatus::Valid {
      if let Some(err) = &challenge.error {
        debug!(%record, error = %err, "CA rejected challenge");
      }
      return Err(Error::ChallengeFailed {
        domain: domain.to_string(),
        record,
        status: challenge.status,
      });
    }

    debug!(%record, "Challenge passed");
    Ok(())
  }

  /// Trigger verification and poll until the challenge settles or the
  /// attempts run out. Poll failures are tolerated.
  async fn verify(
    &self,
    registration: &dyn Registration,
    domain: &str,
    challenge: Challenge,
  ) -> Result<Challenge, Error> {
    self.shutdown.sleep(self.timing.propagation_delay).await?;

    trace!(status = %challenge.status, "Triggering challenge");
    let mut challenge = registration
      .trigger_challenge(&challenge)
      .await
      .map_err(Error::challenge(domain, "trigger"))?;

    for attempt in 0..self.timing.poll_attempts {
      trace!(attempt, status = %challenge.status, "Challenge status");
      if challenge.status.is_final() {
        break;
      }

      self.shutdown.sleep(self.timing.poll_interval).await?;

      match registration.update_challenge(&challenge).await {
        Ok(updated) => challenge = updated,
        Err(err) => warn!(error = %err, "Error updating challenge"),
      }
    }

    trace!(status = %challenge.status, "Challenge polling finished");
    Ok(challenge)
  }
}
