use crate::account::Account;
use crate::error::*;
use crate::helpers::*;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use openssl::stack::Stack;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::X509Name;
use openssl::x509::X509Req;
use openssl::x509::X509;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;
use tracing::instrument;
use tracing::Level;

#[derive(Deserialize, Debug, Eq, PartialEq, Clone, Copy)]
#[serde(rename_all = "camelCase")]
/// The status of this order.  Possible values are "pending", "ready",
/// processing", "valid", and "invalid".
pub enum OrderStatus {
  Pending,
  Ready,
  Processing,
  Valid,
  Invalid,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
/// An ACME order object represents a client's request for a certificate
/// and is used to track the progress of that order through to issuance.
pub struct Order {
  #[serde(skip)]
  pub(crate) url: String,

  /// The status of this order.
  pub status: OrderStatus,
  /// The timestamp after which the server will consider this order
  /// invalid.
  pub expires: Option<String>,
  /// An array of identifier objects that the order pertains to.
  pub identifiers: Vec<Identifier>,

  /// The error that occurred while processing the order, if any.
  pub error: Option<ServerError>,

  #[serde(rename = "authorizations")]
  /// For pending orders, the authorizations that the client needs to
  /// complete before the requested certificate can be issued.
  pub(crate) authorization_urls: Vec<String>,
  #[serde(rename = "finalize")]
  /// A URL that a CSR must be POSTed to once all of the order's
  /// authorizations are satisfied to finalize the order.
  pub(crate) finalize_url: String,
  #[serde(rename = "certificate")]
  /// A URL for the certificate that has been issued in response to
  /// this order.
  pub(crate) certificate_url: Option<String>,
}

impl Order {
  /// The order URL, as returned in the newOrder location header.
  pub fn url(&self) -> &str {
    &self.url
  }

  /// Where the issued certificate chain can be downloaded from, once the
  /// order is valid.
  pub fn certificate_url(&self) -> Option<&str> {
    self.certificate_url.as_deref()
  }
}

/// Build a CSR for `domains`, signed with `pkey`. The first domain becomes
/// the subject common name and every domain is listed as a SAN.
pub fn gen_csr(
  pkey: &PKey<Private>,
  domains: &[String],
) -> Result<X509Req, Error> {
  let first = domains
    .first()
    .ok_or(Error::Validation("You need to supply at least one domain name"))?;

  let mut builder = X509Req::builder()?;
  let name = {
    let mut name = X509Name::builder()?;
    name.append_entry_by_text("CN", first)?;
    name.build()
  };
  builder.set_subject_name(&name)?;

  let san_extension = {
    let mut san = SubjectAlternativeName::new();
    for domain in domains.iter() {
      san.dns(domain);
    }
    san.build(&builder.x509v3_context(None))?
  };
  let mut stack = Stack::new()?;
  stack.push(san_extension)?;
  builder.add_extensions(&stack)?;

  builder.set_pubkey(pkey)?;
  builder.sign(pkey, MessageDigest::sha256())?;

  Ok(builder.build())
}

impl Account {
  #[instrument(level = Level::INFO, name = "acme2_lifecycle::Account::new_order", err, skip(self), fields(identifiers = ?identifiers))]
  pub async fn new_order(
    &self,
    identifiers: Vec<Identifier>,
  ) -> Result<Order, Error> {
    let new_order_url = self.directory.new_order_url.clone();
    let resp = self
      .signed::<_, Order>(
        &new_order_url,
        json!({
          "identifiers": identifiers,
        }),
      )
      .await?;

    let order_url =
      resp.location("mandatory location header in newOrder not present")?;
    let res: Result<Order, Error> = resp.result.into();
    let mut order = res?;
    order.url = order_url;
    Ok(order)
  }

  #[instrument(level = Level::DEBUG, name = "acme2_lifecycle::Account::poll_order", err, skip(self, order), fields(order = %order.url))]
  pub async fn poll_order(&self, order: &Order) -> Result<Order, Error> {
    let resp = self.signed::<_, Order>(&order.url, "").await?;
    let res: Result<Order, Error> = resp.result.into();
    let mut polled = res?;
    polled.url = order.url.clone();
    Ok(polled)
  }

  /// Poll until the order leaves `pending`, i.e. every authorization has
  /// been settled.
  pub async fn wait_ready(
    &self,
    order: Order,
    poll_interval: Duration,
    attempts: usize,
  ) -> Result<Order, Error> {
    self
      .wait_while(order, poll_interval, attempts, |status| {
        status == OrderStatus::Pending
      })
      .await
  }

  /// Poll until the order is `valid` or `invalid`.
  pub async fn wait_done(
    &self,
    order: Order,
    poll_interval: Duration,
    attempts: usize,
  ) -> Result<Order, Error> {
    self
      .wait_while(order, poll_interval, attempts, |status| {
        matches!(
          status,
          OrderStatus::Pending | OrderStatus::Ready | OrderStatus::Processing
        )
      })
      .await
  }

  async fn wait_while(
    &self,
    order: Order,
    poll_interval: Duration,
    attempts: usize,
    unsettled: impl Fn(OrderStatus) -> bool,
  ) -> Result<Order, Error> {
    let mut order = order;
    let mut attempt = 0;

    while unsettled(order.status) {
      if attempt >= attempts {
        return Err(Error::MaxAttemptsExceeded);
      }
      attempt += 1;

      debug!(
        { delay = ?poll_interval, status = ?order.status },
        "Order not settled. Waiting to poll."
      );
      tokio::time::sleep(poll_interval).await;
      order = self.poll_order(&order).await?;
    }

    Ok(order)
  }

  #[instrument(level = Level::INFO, name = "acme2_lifecycle::Account::finalize", err, skip(self, order, csr), fields(order = %order.url))]
  pub async fn finalize(
    &self,
    order: &Order,
    csr: &X509Req,
  ) -> Result<Order, Error> {
    let csr_b64 = b64(&csr.to_der()?);

    let resp = self
      .signed::<_, Order>(&order.finalize_url, json!({ "csr": csr_b64 }))
      .await?;
    let res: Result<Order, Error> = resp.result.into();
    let mut finalized = res?;
    finalized.url = order.url.clone();
    Ok(finalized)
  }

  /// Download a certificate chain, leaf first.
  #[instrument(level = Level::INFO, name = "acme2_lifecycle::Account::certificate", err, skip(self))]
  pub async fn certificate(
    &self,
    certificate_url: &str,
  ) -> Result<Vec<X509>, Error> {
    let res = self
      .directory
      .authenticated_request_raw(
        certificate_url,
        "",
        &self.private_key,
        &Some(self.id.clone()),
      )
      .await?;

    if !res.status().is_success() {
      let err: ServerError = res.json().await?;
      return Err(err.into());
    }

    let bytes = res.bytes().await?;

    Ok(X509::stack_from_pem(&bytes)?)
  }
}
