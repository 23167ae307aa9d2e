use super::*;
use chrono::Duration;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Keeps both record kinds in memory. Writes to a record are serialized by
/// the lock, last writer wins.
#[derive(Debug, Default)]
pub struct MemoryStore {
  accounts: Mutex<HashMap<i32, AccountRecord>>,
  certificates: Mutex<HashMap<String, CertificateRecord>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn certificate_count(&self) -> usize {
    self.certificates.lock().len()
  }
}

#[async_trait]
impl AccountStore for MemoryStore {
  async fn get_by_id(
    &self,
    id: i32,
  ) -> Result<Option<AccountRecord>, StoreError> {
    Ok(self.accounts.lock().get(&id).cloned())
  }

  async fn save(&self, record: &AccountRecord) -> Result<(), StoreError> {
    let mut accounts = self.accounts.lock();
    if accounts.contains_key(&record.id) {
      return Err(StoreError::Duplicate {
        id: record.id.to_string(),
      });
    }
    accounts.insert(record.id, record.clone());
    Ok(())
  }
}

#[async_trait]
impl CertificateStore for MemoryStore {
  async fn get_by_id(
    &self,
    id: &str,
  ) -> Result<Option<CertificateRecord>, StoreError> {
    Ok(self.certificates.lock().get(id).cloned())
  }

  async fn save(&self, record: &CertificateRecord) -> Result<(), StoreError> {
    let mut certificates = self.certificates.lock();
    if certificates.contains_key(&record.id) {
      return Err(StoreError::Duplicate {
        id: record.id.clone(),
      });
    }
    certificates.insert(record.id.clone(), record.clone());
    Ok(())
  }

  async fn update(&self, record: &CertificateRecord) -> Result<(), StoreError> {
    let mut certificates = self.certificates.lock();
    match certificates.get_mut(&record.id) {
      Some(existing) => {
        *existing = record.clone();
        Ok(())
      }
      None => Err(StoreError::Missing {
        id: record.id.clone(),
      }),
    }
  }

  async fn get_eligible_for_renewal(
    &self,
    renew_days: u32,
  ) -> Result<Vec<String>, StoreError> {
    let horizon = Utc::now() + Duration::days(i64::from(renew_days));
    let certificates = self.certificates.lock();

    let mut eligible: Vec<_> = certificates
      .values()
      .filter(|record| record.expires <= horizon)
      .map(|record| (record.expires, record.id.clone()))
      .collect();
    eligible.sort();

    Ok(eligible.into_iter().map(|(_, id)| id).collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domains::DomainSet;

  fn record(domains: &str, expires_in_days: i64) -> CertificateRecord {
    let domains = DomainSet::parse(domains).unwrap();
    let mut record = CertificateRecord::new(&domains, Vec::new());
    record.expires = Utc::now() + Duration::days(expires_in_days);
    record
  }

  #[tokio::test]
  async fn test_renewal_horizon() {
    let store = MemoryStore::new();
    let certs =
      [record("soon.example.com", 10), record("later.example.com", 40)];
    for cert in certs {
      CertificateStore::save(&store, &cert).await.unwrap();
    }

    let eligible = store.get_eligible_for_renewal(30).await.unwrap();
    assert_eq!(eligible, vec!["soon.example.com".to_string()]);
  }

  #[tokio::test]
  async fn test_eligible_sorted_by_expiry() {
    let store = MemoryStore::new();
    for cert in [
      record("c.example.com", 5),
      record("a.example.com", -1),
      record("b.example.com", 20),
    ] {
      CertificateStore::save(&store, &cert).await.unwrap();
    }

    let eligible = store.get_eligible_for_renewal(30).await.unwrap();
    assert_eq!(
      eligible,
      vec!["a.example.com", "c.example.com", "b.example.com"]
    );
  }

  #[tokio::test]
  async fn test_insert_and_update_contracts() {
    let store = MemoryStore::new();
    let first = record("a.example.com", 10);

    let err = CertificateStore::update(&store, &first).await.unwrap_err();
    assert!(matches!(err, StoreError::Missing { .. }));

    CertificateStore::save(&store, &first).await.unwrap();
    let err = CertificateStore::save(&store, &first).await.unwrap_err();
    assert!(matches!(err, StoreError::Duplicate { .. }));

    let mut changed = first.clone();
    changed.cert = b"cert".to_vec();
    CertificateStore::update(&store, &changed).await.unwrap();
    let stored = CertificateStore::get_by_id(&store, "a.example.com")
      .await
      .unwrap()
      .unwrap();
    assert_eq!(stored.cert, b"cert".to_vec());
    assert_eq!(store.certificate_count(), 1);
  }

  #[tokio::test]
  async fn test_account_saved_once() {
    let store = MemoryStore::new();
    assert!(AccountStore::get_by_id(&store, ACCOUNT_ID)
      .await
      .unwrap()
      .is_none());

    let account = AccountRecord::new(b"key".to_vec());
    AccountStore::save(&store, &account).await.unwrap();
    assert!(AccountStore::save(&store, &account).await.is_err());
    assert_eq!(
      AccountStore::get_by_id(&store, ACCOUNT_ID).await.unwrap(),
      Some(account)
    );
  }
}
