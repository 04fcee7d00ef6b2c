use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{json, Value};

use scf_api::app::services::{self, AppServices};
use scf_auth::JwtClaims;
use scf_core::{EntityId, Role, UserId};
use scf_financing::PartyProfile;
use scf_infra::ports::KycStatus;
use scf_infra::WorkflowConfig;

const SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, in-memory services, ephemeral port.
        let services = Arc::new(services::build_services(WorkflowConfig::default()));
        let app = scf_api::app::build_app(SECRET.to_string(), services.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// A party known to the directory, with a token to act as it.
    fn party(&self, role: Role, name: &str) -> Party {
        let entity_id = EntityId::new();
        self.services.adapters.parties.register(PartyProfile {
            entity_id,
            legal_name: name.to_string(),
            registration_number: format!("REG-{name}"),
            address: "Plot 4, MIDC, Nashik".to_string(),
            contact_email: "ops@example.test".to_string(),
        });
        Party {
            entity_id,
            token: mint_jwt(role, Some(entity_id)),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct Party {
    entity_id: EntityId,
    token: String,
}

fn mint_jwt(role: Role, entity_id: Option<EntityId>) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: UserId::new(),
        role,
        entity_id,
        issued_at: now - ChronoDuration::seconds(5),
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

fn invoice_body(product_type: &str, counterparty: Option<EntityId>) -> Value {
    let now = Utc::now();
    json!({
        "product_type": product_type,
        "invoice_number": "INV-2026-0042",
        "issue_date": (now - ChronoDuration::days(1)).to_rfc3339(),
        "due_date": (now + ChronoDuration::days(60)).to_rfc3339(),
        "subtotal": "90000.00",
        "tax_amount": "10000.00",
        "currency": "INR",
        "counterparty_entity_id": counterparty,
    })
}

fn bid_body(rate: &str) -> Value {
    json!({
        "discount_rate": rate,
        "haircut_percentage": "1",
        "processing_fee": "500",
        "valid_until": (Utc::now() + ChronoDuration::days(7)).to_rfc3339(),
    })
}

async fn post(client: &reqwest::Client, url: String, token: &str, body: Value) -> (StatusCode, Value) {
    let res = client.post(url).bearer_auth(token).json(&body).send().await.unwrap();
    let status = res.status();
    let body = res.json().await.unwrap_or(Value::Null);
    (status, body)
}

async fn get(client: &reqwest::Client, url: String, token: &str) -> (StatusCode, Value) {
    let res = client.get(url).bearer_auth(token).send().await.unwrap();
    let status = res.status();
    let body = res.json().await.unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client.get(srv.url("/invoices")).bearer_auth("not-a-jwt").send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // A party role without an entity is not a usable token.
    let res = client
        .get(srv.url("/whoami"))
        .bearer_auth(mint_jwt(Role::Seller, None))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn caller_identity_is_derived_from_token() {
    let srv = TestServer::spawn().await;
    let financier = srv.party(Role::Financier, "Northwind Capital");

    let (status, body) = get(&reqwest::Client::new(), srv.url("/whoami"), &financier.token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "FINANCIER");
    assert_eq!(body["entity_id"].as_str().unwrap(), financier.entity_id.to_string());
}

#[tokio::test]
async fn role_policy_blocks_foreign_actions() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let financier = srv.party(Role::Financier, "Northwind Capital");
    let seller = srv.party(Role::Seller, "Shakti Steel Works");

    let (status, body) = post(&client, srv.url("/invoices"), &financier.token, invoice_body("GST_BACKED", None)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, _) = post(&client, srv.url("/admin/sweeps/offers"), &seller.token, json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn errors_use_the_shared_body_shape() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let seller = srv.party(Role::Seller, "Shakti Steel Works");
    let stranger = srv.party(Role::Seller, "Other Traders");

    let (status, body) = get(&client, srv.url("/invoices/not-a-uuid"), &seller.token).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, created) = post(&client, srv.url("/invoices"), &seller.token, invoice_body("GST_BACKED", None)).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = created["id"].as_str().unwrap().to_string();

    // Invisible to an unrelated seller.
    let (status, body) = get(&client, srv.url(&format!("/invoices/{id}")), &stranger.token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let financier = srv.party(Role::Financier, "Northwind Capital");
    let (status, _) = post(&client, srv.url(&format!("/invoices/{id}/bids")), &financier.token, bid_body("18")).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = post(&client, srv.url(&format!("/invoices/{id}/bids")), &financier.token, bid_body("17")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn financier_funded_discounting_over_http() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let buyer = srv.party(Role::Buyer, "Apex Motors");
    let seller = srv.party(Role::Seller, "Shakti Steel Works");
    let winner = srv.party(Role::Financier, "Northwind Capital");
    let loser = srv.party(Role::Financier, "Meridian Finance");
    srv.services.adapters.kyc.set_status(seller.entity_id, KycStatus::Verified);

    let (status, invoice) = post(
        &client,
        srv.url("/invoices"),
        &seller.token,
        invoice_body("DYNAMIC_DISCOUNTING", Some(buyer.entity_id)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(invoice["status"], "DRAFT");
    let invoice_id = invoice["id"].as_str().unwrap().to_string();

    let (status, created) = post(
        &client,
        srv.url(&format!("/invoices/{invoice_id}/offers")),
        &buyer.token,
        json!({
            "discount_percentage": "2",
            "early_payment_date": (Utc::now() + ChronoDuration::days(10)).to_rfc3339(),
        }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{created}");
    assert_eq!(created["invoice"]["status"], "PENDING_ACCEPTANCE");
    let offer_id = created["offer"]["id"].as_str().unwrap().to_string();

    let (status, accepted) = post(
        &client,
        srv.url(&format!("/offers/{offer_id}/respond")),
        &seller.token,
        json!({ "response": "ACCEPT" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{accepted}");
    assert_eq!(accepted["offer"]["status"], "ACCEPTED");

    // The offer is resolved; answering again loses.
    let (status, _) = post(
        &client,
        srv.url(&format!("/offers/{offer_id}/respond")),
        &seller.token,
        json!({ "response": "REJECT" }),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, funded) = post(
        &client,
        srv.url(&format!("/offers/{offer_id}/funding-type")),
        &seller.token,
        json!({ "funding_type": "FINANCIER_FUNDED" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{funded}");
    assert_eq!(funded["invoice"]["status"], "OPEN_FOR_BIDDING");

    let (status, market) = get(&client, srv.url("/marketplace"), &winner.token).await;
    assert_eq!(status, StatusCode::OK);
    assert!(market["items"]
        .as_array()
        .unwrap()
        .iter()
        .any(|i| i["id"] == invoice_id.as_str()));

    let (_, best) = post(&client, srv.url(&format!("/invoices/{invoice_id}/bids")), &winner.token, bid_body("12")).await;
    let (_, other) = post(&client, srv.url(&format!("/invoices/{invoice_id}/bids")), &loser.token, bid_body("20")).await;
    let bid_id = best["id"].as_str().unwrap().to_string();

    let (status, acceptance) = post(&client, srv.url(&format!("/bids/{bid_id}/accept")), &buyer.token, json!({})).await;
    assert_eq!(status, StatusCode::OK, "{acceptance}");
    assert_eq!(acceptance["invoice"]["status"], "BID_SELECTED");
    assert_eq!(acceptance["rejected"][0], other["id"]);
    assert_eq!(acceptance["contract"]["status"], "generated");
    let contract_id = acceptance["contract"]["contract_id"].as_str().unwrap().to_string();
    assert!(acceptance["contract"]["contract_number"]
        .as_str()
        .unwrap()
        .starts_with("SCF/3P/"));

    let (status, contract) = get(&client, srv.url(&format!("/contracts/{contract_id}")), &winner.token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(contract["bid_id"].as_str().unwrap(), bid_id);
    let (status, _) = get(&client, srv.url(&format!("/contracts/{contract_id}")), &loser.token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let res = client
        .get(srv.url(&format!("/contracts/{contract_id}/document")))
        .bearer_auth(&seller.token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers()["content-type"].to_str().unwrap().starts_with("text/plain"));
    let text = res.text().await.unwrap();
    assert!(text.contains("Northwind Capital"));

    let (status, financed) = post(&client, srv.url(&format!("/bids/{bid_id}/disburse")), &winner.token, json!({})).await;
    assert_eq!(status, StatusCode::CREATED, "{financed}");
    assert_eq!(
        financed["repayment"]["payer"].as_str().unwrap(),
        buyer.entity_id.to_string()
    );
    let repayment_id = financed["repayment"]["id"].as_str().unwrap().to_string();

    let (status, _) = post(
        &client,
        srv.url(&format!("/repayments/{repayment_id}/paid")),
        &winner.token,
        json!({}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, settled) = get(&client, srv.url(&format!("/invoices/{invoice_id}")), &buyer.token).await;
    assert_eq!(settled["status"], "SETTLED");
}
