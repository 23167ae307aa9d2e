use crate::common::*;
use acme2_lifecycle::store::MemoryStore;
use acme2_lifecycle::*;
use data_encoding::BASE64URL_NOPAD;
use openssl::asn1::Asn1Time;
use openssl::hash::hash;
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::pkey::Private;
use openssl::x509::X509Name;
use openssl::x509::X509;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;

mod common;

async fn mount(
  server: &MockServer,
  verb: &str,
  at: &str,
  resp: ResponseTemplate,
) {
  Mock::given(method(verb))
    .and(path(at))
    .respond_with(resp)
    .mount(server)
    .await;
}

/// A CA directory with nonces, offering pre-authorization when `new_authz`.
async fn acme_server_with(new_authz: bool) -> MockServer {
  let server = MockServer::start().await;
  let uri = server.uri();

  let mut directory = json!({
    "newNonce": format!("{}/nonce", uri),
    "newAccount": format!("{}/new-acct", uri),
    "newOrder": format!("{}/new-order", uri),
    "meta": { "termsOfService": format!("{}/terms", uri) }
  });
  if new_authz {
    directory["newAuthz"] = json!(format!("{}/new-authz", uri));
  }

  mount(
    &server,
    "GET",
    "/dir",
    ResponseTemplate::new(200).set_body_json(directory),
  )
  .await;
  mount(
    &server,
    "HEAD",
    "/nonce",
    ResponseTemplate::new(200).insert_header("replay-nonce", "nonce-1"),
  )
  .await;

  server
}

async fn acme_server() -> MockServer {
  acme_server_with(true).await
}

fn account_response(status: u16, location: String) -> ResponseTemplate {
  ResponseTemplate::new(status)
    .insert_header("location", location.as_str())
    .insert_header("replay-nonce", "nonce-2")
    .set_body_json(json!({ "status": "valid" }))
}

fn thumbprint(key: &PKey<Private>) -> String {
  let rsa = key.rsa().unwrap();
  let jwk = format!(
    r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#,
    BASE64URL_NOPAD.encode(&rsa.e().to_vec()),
    BASE64URL_NOPAD.encode(&rsa.n().to_vec())
  );
  let digest = hash(MessageDigest::sha256(), jwk.as_bytes()).unwrap();
  BASE64URL_NOPAD.encode(&digest)
}

fn self_signed(cn: &str) -> X509 {
  let key = gen_rsa_private_key(2048).unwrap();
  let mut name = X509Name::builder().unwrap();
  name.append_entry_by_text("CN", cn).unwrap();
  let name = name.build();

  let mut builder = X509::builder().unwrap();
  builder.set_version(2).unwrap();
  builder.set_subject_name(&name).unwrap();
  builder.set_issuer_name(&name).unwrap();
  builder.set_pubkey(&key).unwrap();
  builder
    .set_not_before(&Asn1Time::days_from_now(0).unwrap())
    .unwrap();
  builder
    .set_not_after(&Asn1Time::days_from_now(90).unwrap())
    .unwrap();
  builder.sign(&key, MessageDigest::sha256()).unwrap();
  builder.build()
}

#[tokio::test]
async fn test_directory_discovery() {
  let server = acme_server().await;

  let directory = DirectoryBuilder::new(format!("{}/dir", server.uri()))
    .build()
    .await
    .unwrap();

  let meta = directory.meta.clone().unwrap();
  assert_eq!(
    meta.terms_of_service,
    Some(format!("{}/terms", server.uri()))
  );
}

#[tokio::test]
async fn test_existing_account_is_rebound() {
  let server = acme_server().await;
  let location = format!("{}/acct/7", server.uri());
  mount(&server, "POST", "/new-acct", account_response(200, location.clone()))
    .await;
  mount(&server, "POST", "/acct/7", account_response(200, location.clone()))
    .await;

  let store = Arc::new(MemoryStore::new());
  seed_account(&store).await;
  let accounts = AccountManager::new(
    store.clone(),
    Arc::new(AcmeCa::new()),
    format!("{}/dir", server.uri()),
  );

  let registration = accounts.registration().await.unwrap();
  assert_eq!(registration.location(), location);

  let requests = server.received_requests().await.unwrap();
  assert_eq!(
    posted_payload(&requests, "/new-acct"),
    json!({ "termsOfServiceAgreed": true })
  );
  let posts = posted_paths(&requests);
  // Bind, then agree to the terms.
  assert_eq!(posts, vec!["/new-acct", "/acct/7", "/acct/7"]);
}

#[tokio::test]
async fn test_conflict_rebinds_existing_account() {
  let server = acme_server().await;
  let location = format!("{}/acct/9", server.uri());
  mount(
    &server,
    "POST",
    "/new-acct",
    ResponseTemplate::new(409)
      .insert_header("location", location.as_str())
      .set_body_json(json!({
        "type": "urn:ietf:params:acme:error:malformed",
        "detail": "key already in use"
      })),
  )
  .await;
  mount(&server, "POST", "/acct/9", account_response(200, location.clone()))
    .await;

  let store = Arc::new(MemoryStore::new());
  seed_account(&store).await;
  let accounts = AccountManager::new(
    store,
    Arc::new(AcmeCa::new()),
    format!("{}/dir", server.uri()),
  );

  let registration = accounts.registration().await.unwrap();
  assert_eq!(registration.location(), location);
  let posts = posted_paths(&server.received_requests().await.unwrap());
  assert_eq!(posts, vec!["/new-acct", "/acct/9", "/acct/9"]);
}

#[tokio::test]
async fn test_rejected_registration_is_an_account_error() {
  let server = acme_server().await;
  mount(
    &server,
    "POST",
    "/new-acct",
    ResponseTemplate::new(400).set_body_json(json!({
      "type": "urn:ietf:params:acme:error:malformed",
      "detail": "contact is invalid"
    })),
  )
  .await;

  let store = Arc::new(MemoryStore::new());
  seed_account(&store).await;
  let accounts = AccountManager::new(
    store,
    Arc::new(AcmeCa::new()),
    format!("{}/dir", server.uri()),
  );

  let err = accounts.registration().await.unwrap_err();
  let Error::Account(source) = err else {
    panic!("unexpected error {:?}", err);
  };
  assert!(source.to_string().contains("contact is invalid"));
}

fn posted_paths(requests: &[wiremock::Request]) -> Vec<String> {
  requests
    .iter()
    .filter(|r| r.method.as_str() == "POST")
    .map(|r| r.url.path().to_string())
    .collect()
}

/// The decoded JWS payload of the first POST to `at`.
fn posted_payload(
  requests: &[wiremock::Request],
  at: &str,
) -> serde_json::Value {
  let request = requests
    .iter()
    .find(|r| r.method.as_str() == "POST" && r.url.path() == at)
    .unwrap();
  let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
  let payload = BASE64URL_NOPAD
    .decode(body["payload"].as_str().unwrap().as_bytes())
    .unwrap();
  serde_json::from_slice(&payload).unwrap()
}

fn order_body(uri: &str, status: &str) -> serde_json::Value {
  json!({
    "status": status,
    "identifiers": [{ "type": "dns", "value": "a.example.com" }],
    "authorizations": [format!("{}/authz/1", uri)],
    "finalize": format!("{}/order/1/finalize", uri)
  })
}

/// Mount everything needed to issue `a.example.com`. The order starts out in
/// `order_status` and reads as ready when polled. Returns the leaf and the
/// intermediate served by the CA.
async fn mount_issuance(
  server: &MockServer,
  order_status: &str,
) -> (X509, X509) {
  let uri = server.uri();
  let leaf = self_signed("a.example.com");
  let issuer = self_signed("Stub Intermediate");

  mount(
    server,
    "POST",
    "/new-acct",
    account_response(201, format!("{}/acct/1", uri)),
  )
  .await;
  mount(
    server,
    "POST",
    "/acct/1",
    account_response(200, format!("{}/acct/1", uri)),
  )
  .await;

  let authorization = json!({
    "identifier": { "type": "dns", "value": "a.example.com" },
    "status": "pending",
    "challenges": [
      { "type": "http-01", "url": format!("{}/chall/0", uri), "status": "pending", "token": "http-token" },
      { "type": "dns-01", "url": format!("{}/chall/1", uri), "status": "pending", "token": "dns-token" }
    ]
  });
  mount(
    server,
    "POST",
    "/new-authz",
    ResponseTemplate::new(201)
      .insert_header("location", format!("{}/authz/1", uri).as_str())
      .set_body_json(authorization.clone()),
  )
  .await;
  mount(
    server,
    "POST",
    "/authz/1",
    ResponseTemplate::new(200).set_body_json(authorization),
  )
  .await;
  mount(
    server,
    "POST",
    "/chall/1",
    ResponseTemplate::new(200).set_body_json(json!({
      "type": "dns-01",
      "url": format!("{}/chall/1", uri),
      "status": "valid",
      "token": "dns-token"
    })),
  )
  .await;

  mount(
    server,
    "POST",
    "/new-order",
    ResponseTemplate::new(201)
      .insert_header("location", format!("{}/order/1", uri).as_str())
      .set_body_json(order_body(&uri, order_status)),
  )
  .await;
  mount(
    server,
    "POST",
    "/order/1",
    ResponseTemplate::new(200).set_body_json(order_body(&uri, "ready")),
  )
  .await;
  let mut finalized = order_body(&uri, "valid");
  finalized["certificate"] = json!(format!("{}/cert/1", uri));
  mount(
    server,
    "POST",
    "/order/1/finalize",
    ResponseTemplate::new(200).set_body_json(finalized),
  )
  .await;

  let mut chain = leaf.to_pem().unwrap();
  chain.extend(issuer.to_pem().unwrap());
  mount(
    server,
    "POST",
    "/cert/1",
    ResponseTemplate::new(200)
      .insert_header("content-type", "application/pem-certificate-chain")
      .set_body_bytes(chain),
  )
  .await;

  (leaf, issuer)
}

/// A service speaking ACME to `server`, recording DNS changes.
async fn acme_service(
  server: &MockServer,
) -> (CertificateService, Arc<RecordingDns>, Vec<u8>) {
  let mut config = fast_config();
  config.acmeca.server_uri = format!("{}/dir", server.uri());
  let dns = Arc::new(RecordingDns::new(Events::default()));
  let store = Arc::new(MemoryStore::new());
  let account_pem = seed_account(&store).await;

  let ca = AcmeCa::new().order_polling(Duration::from_millis(1), 5);
  let service = CertificateService::builder(config)
    .ca(Arc::new(ca))
    .dns(dns.clone())
    .account_store(store.clone())
    .certificate_store(store)
    .build()
    .unwrap();
  (service, dns, account_pem)
}

#[tokio::test]
async fn test_issue_over_acme() {
  let server = acme_server().await;
  let (leaf, issuer) = mount_issuance(&server, "ready").await;
  let (service, dns, account_pem) = acme_service(&server).await;

  let record = service.issue(&domains("a.example.com")).await.unwrap();

  assert_eq!(record.cert, leaf.to_pem().unwrap());
  assert_eq!(record.chain, issuer.to_pem().unwrap());

  let account_key = codec::decode_keypair(&account_pem).unwrap();
  let key_authorization = format!("dns-token.{}", thumbprint(&account_key));
  let digest = BASE64URL_NOPAD.encode(
    &hash(MessageDigest::sha256(), key_authorization.as_bytes()).unwrap(),
  );
  assert_eq!(
    *dns.created.lock(),
    vec![("_acme-challenge.a.example.com".to_string(), digest)]
  );
  assert_eq!(
    *dns.deleted.lock(),
    vec!["_acme-challenge.a.example.com".to_string()]
  );
}

#[tokio::test]
async fn test_issue_without_new_authz() {
  let server = acme_server_with(false).await;
  let (leaf, _) = mount_issuance(&server, "ready").await;
  let (service, _, _) = acme_service(&server).await;

  let record = service.issue(&domains("a.example.com")).await.unwrap();
  assert_eq!(record.cert, leaf.to_pem().unwrap());

  let posts = posted_paths(&server.received_requests().await.unwrap());
  assert!(!posts.contains(&"/new-authz".to_string()));
  // One order to reach the authorization, one for the certificate.
  assert_eq!(posts.iter().filter(|p| *p == "/new-order").count(), 2);
  let authz = posts.iter().position(|p| p == "/authz/1").unwrap();
  let trigger = posts.iter().position(|p| p == "/chall/1").unwrap();
  assert!(authz < trigger);
}

#[tokio::test]
async fn test_pending_order_is_polled() {
  let server = acme_server().await;
  let (leaf, _) = mount_issuance(&server, "pending").await;
  let (service, _, _) = acme_service(&server).await;

  let record = service.issue(&domains("a.example.com")).await.unwrap();
  assert_eq!(record.cert, leaf.to_pem().unwrap());

  let posts = posted_paths(&server.received_requests().await.unwrap());
  let polled = posts.iter().position(|p| p == "/order/1").unwrap();
  let finalized =
    posts.iter().position(|p| p == "/order/1/finalize").unwrap();
  assert!(polled < finalized);
}
