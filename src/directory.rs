use crate::error::*;
use crate::jws::jws;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;
use tracing::Level;

/// Let's Encrypt production directory URL.
pub const LETSENCRYPT_PRODUCTION: &str =
  "https://acme-v02.api.letsencrypt.org/directory";
/// Let's Encrypt staging directory URL.
pub const LETSENCRYPT_STAGING: &str =
  "https://acme-staging-v02.api.letsencrypt.org/directory";

const BAD_NONCE_RETRIES: usize = 3;

/// Resolve a configured CA server URI into an ACME directory URL.
///
/// `acme://letsencrypt.org` selects the production CA and
/// `acme://letsencrypt.org/staging` the staging CA. Plain `http(s)://` URIs
/// are taken to be directory URLs already.
pub fn resolve_directory_url(server_uri: &str) -> Result<String, Error> {
  let uri = server_uri.trim();
  if uri.starts_with("https://") || uri.starts_with("http://") {
    return Ok(uri.to_string());
  }

  match uri.strip_prefix("acme://").map(|s| s.trim_end_matches('/')) {
    Some("letsencrypt.org") | Some("letsencrypt.org/v02") => {
      Ok(LETSENCRYPT_PRODUCTION.to_string())
    }
    Some("letsencrypt.org/staging") => Ok(LETSENCRYPT_STAGING.to_string()),
    _ => Err(Error::Config(format!(
      "unsupported ACME server URI: {}",
      server_uri
    ))),
  }
}

pub struct DirectoryBuilder {
  url: String,
  http_client: Option<reqwest::Client>,
}

impl DirectoryBuilder {
  pub fn new(url: String) -> Self {
    DirectoryBuilder {
      url,
      http_client: None,
    }
  }

  pub fn http_client(&mut self, http_client: reqwest::Client) -> &mut Self {
    self.http_client = Some(http_client);
    self
  }

  #[instrument(level = Level::INFO, name = "acme2_lifecycle::DirectoryBuilder::build", err, skip(self), fields(url = %self.url))]
  pub async fn build(&mut self) -> Result<Arc<Directory>, Error> {
    let http_client = self.http_client.clone().unwrap_or_default();

    let resp = http_client.get(&self.url).send().await?;

    let res: Result<Directory, Error> =
      resp.json::<ServerResult<Directory>>().await?.into();
    let mut dir = res?;

    dir.http_client = http_client;
    dir.nonce = Mutex::new(None);

    Ok(Arc::new(dir))
  }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
  #[serde(skip)]
  pub(crate) http_client: reqwest::Client,
  #[serde(skip)]
  pub(crate) nonce: Mutex<Option<String>>,
  #[serde(rename = "newNonce")]
  pub(crate) new_nonce_url: String,
  #[serde(rename = "newAccount")]
  pub(crate) new_account_url: String,
  #[serde(rename = "newOrder")]
  pub(crate) new_order_url: String,
  #[serde(rename = "newAuthz")]
  pub(crate) new_authz_url: Option<String>,
  pub meta: Option<DirectoryMeta>,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryMeta {
  pub terms_of_service: Option<String>,
  pub website: Option<String>,
  pub caa_identities: Option<Vec<String>>,
  pub external_account_required: Option<bool>,
}

/// A decoded response to an authenticated request.
pub(crate) struct SignedResponse<R> {
  pub result: ServerResult<R>,
  pub headers: reqwest::header::HeaderMap,
  pub status: reqwest::StatusCode,
}

impl<R> SignedResponse<R> {
  pub fn location(&self, what: &'static str) -> Result<String, Error> {
    let value = self
      .headers
      .get(reqwest::header::LOCATION)
      .ok_or_else(|| transport_err(what))?;
    Ok(map_transport_err(value.to_str())?.to_string())
  }
}

fn extract_nonce_from_response(
  resp: &reqwest::Response,
) -> Result<Option<String>, Error> {
  match resp.headers().get("replay-nonce") {
    Some(hv) => Ok(Some(map_transport_err(hv.to_str())?.to_string())),
    None => Ok(None),
  }
}

impl Directory {
  pub(crate) async fn get_nonce(&self) -> Result<String, Error> {
    let maybe_nonce = self.nonce.lock().take();
    if let Some(nonce) = maybe_nonce {
      return Ok(nonce);
    }

    let resp = self.http_client.head(&self.new_nonce_url).send().await?;
    match extract_nonce_from_response(&resp)? {
      Some(nonce) => Ok(nonce),
      None => Err(transport_err("newNonce request must return a nonce")),
    }
  }

  pub(crate) async fn authenticated_request_raw(
    &self,
    url: &str,
    payload: &str,
    pkey: &PKey<Private>,
    pkey_id: &Option<String>,
  ) -> Result<reqwest::Response, Error> {
    let nonce = self.get_nonce().await?;
    let body = jws(url, Some(nonce), payload, pkey, pkey_id.clone())?;
    let resp = self
      .http_client
      .post(url)
      .header(reqwest::header::CONTENT_TYPE, "application/jose+json")
      .body(body)
      .send()
      .await?;

    if let Some(nonce) = extract_nonce_from_response(&resp)? {
      *self.nonce.lock() = Some(nonce);
    }

    Ok(resp)
  }

  pub(crate) async fn authenticated_request<T, R>(
    &self,
    url: &str,
    payload: T,
    pkey: &PKey<Private>,
    pkey_id: Option<String>,
  ) -> Result<SignedResponse<R>, Error>
  where
    T: Serialize,
    R: DeserializeOwned,
  {
    let mut attempt = 0;
    let payload = serde_json::to_string(&payload)?;
    // POST-as-GET carries an empty payload rather than an empty JSON string.
    let payload = if payload == "\"\"" {
      "".to_string()
    } else {
      payload
    };

    loop {
      attempt += 1;

      let resp = self
        .authenticated_request_raw(url, &payload, pkey, &pkey_id)
        .await?;

      let headers = resp.headers().clone();
      let status = resp.status();

      let result: ServerResult<R> = resp.json().await?;

      if let ServerResult::Err(err) = &result {
        if err.is_bad_nonce() && attempt <= BAD_NONCE_RETRIES {
          continue;
        }
      }

      return Ok(SignedResponse {
        result,
        headers,
        status,
      });
    }
  }
}
