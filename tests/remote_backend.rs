//! End-to-end tests for remote mode.
//!
//! These tests start the real API server on a random port over an in-memory
//! store and drive it through the remote repositories:
//! - CRUD round trips for leads, tasks and quotes
//! - status updates and task toggles
//! - owner stamping from `/api/auth/me`
//! - error mapping (404, 401, 400) and idempotent deletes

use std::net::SocketAddr;
use std::sync::Arc;

use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde_json::json;

use leadpipe::RepositoryError;
use leadpipe::db::local::LocalStore;
use leadpipe::db::remote::RemoteClient;
use leadpipe::db::{
    CreateLeadParams, CreateQuoteParams, CreateTaskParams, EntityRepository, Identity,
    LeadRepository, LeadStatus, QuoteItem, QuoteRepository, Repositories, TaskRepository,
    TaskType, UpdateLeadParams, UpdateQuoteParams,
};
use leadpipe::web::{ApiState, start_server};

const AUTH_TOKEN: &str = "test-token-12345";
const SERVER_USER: &str = "remote-user";

/// Start an API server on a random port and return its bound address.
async fn start_test_server() -> (SocketAddr, Arc<ApiState>) {
    let identity = Identity {
        id: SERVER_USER.to_string(),
        email: Some("remote@example.com".to_string()),
    };
    let store = Arc::new(LocalStore::in_memory().with_identity(identity.clone()));

    let state = Arc::new(ApiState::new(Repositories::local(store), None, identity));
    let addr: SocketAddr = "127.0.0.1:0".parse().expect("addr");
    let bound_addr = start_server(
        addr,
        state.clone(),
        SecretString::from(AUTH_TOKEN.to_string()),
    )
    .await
    .expect("Failed to start test server");
    (bound_addr, state)
}

fn remote_repos(addr: SocketAddr, token: &str) -> Repositories {
    let client = RemoteClient::new(
        &format!("http://{addr}/api"),
        &SecretString::from(token.to_string()),
    )
    .expect("client");
    Repositories::remote(Arc::new(client))
}

async fn connected() -> (Repositories, Arc<ApiState>) {
    let (addr, state) = start_test_server().await;
    (remote_repos(addr, AUTH_TOKEN), state)
}

#[tokio::test]
async fn test_identity_comes_from_the_server() {
    let (addr, _state) = start_test_server().await;
    let client = RemoteClient::new(
        &format!("http://{addr}/api/"),
        &SecretString::from(AUTH_TOKEN.to_string()),
    )
    .expect("client");
    let identity = client.current_identity().await.expect("identity");
    assert_eq!(identity.id, SERVER_USER);
    assert_eq!(identity.email.as_deref(), Some("remote@example.com"));
}

#[tokio::test]
async fn test_lead_crud_round_trip() {
    let (repos, _state) = connected().await;

    let seeded = repos.leads.get_all().await.expect("list");
    assert_eq!(seeded.len(), 5);

    let mut input = CreateLeadParams::new("Nora", "Blanc");
    input.email = "nora@blanc.io".to_string();
    input.value = dec!(3200.50);
    let created = repos.leads.create(input).await.expect("create");
    assert_eq!(created.status, LeadStatus::New);
    assert_eq!(created.user_id.as_deref(), Some(SERVER_USER));
    assert_eq!(created.value, dec!(3200.50));

    let fetched = repos.leads.get_one(&created.id).await.expect("get");
    assert_eq!(fetched.full_name(), "Nora Blanc");

    let patch = UpdateLeadParams {
        company: Some("Blanc SARL".to_string()),
        ..Default::default()
    };
    let updated = repos.leads.update(&created.id, patch).await.expect("update");
    assert_eq!(updated.company, "Blanc SARL");
    assert_eq!(updated.first_name, "Nora");
    assert_eq!(updated.created_at, created.created_at);

    let moved = repos
        .leads
        .update_status(&created.id, LeadStatus::Qualified)
        .await
        .expect("status");
    assert_eq!(moved.status, LeadStatus::Qualified);

    repos.leads.delete(&created.id).await.expect("delete");
    let err = repos.leads.get_one(&created.id).await.unwrap_err();
    assert!(err.is_not_found(), "expected NotFound, got {err:?}");

    // Deleting again is not an error.
    repos.leads.delete(&created.id).await.expect("second delete");
}

#[tokio::test]
async fn test_task_toggle_flips_completion() {
    let (repos, _state) = connected().await;

    let date = chrono::NaiveDate::from_ymd_opt(2026, 3, 2).expect("date");
    let mut input = CreateTaskParams::new("Send proposal", TaskType::Email, date);
    input.priority = true;
    let task = repos.tasks.create(input).await.expect("create");
    assert!(!task.completed);
    assert_eq!(task.user_id.as_deref(), Some(SERVER_USER));

    let toggled = repos.tasks.toggle(&task.id).await.expect("toggle");
    assert!(toggled.completed);
    let back = repos.tasks.toggle(&task.id).await.expect("toggle back");
    assert!(!back.completed);

    let err = repos.tasks.toggle("missing-task").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_quotes_are_priced_and_listed_per_lead() {
    let (repos, _state) = connected().await;

    let items = vec![
        QuoteItem::new("Landing page", dec!(1), dec!(1800)),
        QuoteItem::new("Copywriting", dec!(3), dec!(150.25)),
    ];
    let quote = repos
        .quotes
        .create(CreateQuoteParams::new("l-2", items))
        .await
        .expect("create");
    assert_eq!(quote.items[1].total, dec!(450.75));
    assert_eq!(quote.total_amount, dec!(2250.75));

    let for_lead = repos.quotes.list_for_lead("l-2").await.expect("list");
    assert_eq!(for_lead.len(), 1);
    assert_eq!(for_lead[0].id, quote.id);

    let patch = UpdateQuoteParams {
        items: Some(vec![QuoteItem::new("Landing page", dec!(2), dec!(1800))]),
        ..Default::default()
    };
    let repriced = repos.quotes.update(&quote.id, patch).await.expect("update");
    assert_eq!(repriced.total_amount, dec!(3600));
    assert_eq!(repriced.lead_id, "l-2");
}

#[tokio::test]
async fn test_quote_for_unknown_lead_is_not_found() {
    let (repos, _state) = connected().await;
    let items = vec![QuoteItem::new("Audit", dec!(1), dec!(100))];
    let err = repos
        .quotes
        .create(CreateQuoteParams::new("no-such-lead", items))
        .await
        .unwrap_err();
    assert!(err.is_not_found(), "expected NotFound, got {err:?}");
    assert_eq!(err.to_string(), "lead 'no-such-lead' not found");
}

#[tokio::test]
async fn test_deleting_a_lead_removes_its_quotes() {
    let (repos, _state) = connected().await;
    assert_eq!(repos.quotes.list_for_lead("l-1").await.expect("list").len(), 1);
    repos.leads.delete("l-1").await.expect("delete");
    assert!(repos.quotes.list_for_lead("l-1").await.expect("list").is_empty());
}

#[tokio::test]
async fn test_wrong_token_is_unauthenticated() {
    let (addr, _state) = start_test_server().await;
    let repos = remote_repos(addr, "wrong-token");

    let err = repos.leads.get_all().await.unwrap_err();
    assert!(
        matches!(err, RepositoryError::Unauthenticated(_)),
        "expected Unauthenticated, got {err:?}"
    );

    let err = repos
        .leads
        .create(CreateLeadParams::new("A", "B"))
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::Unauthenticated(_)));
}

#[tokio::test]
async fn test_non_numeric_value_is_rejected() {
    let (addr, _state) = start_test_server().await;
    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/leads"))
        .bearer_auth(AUTH_TOKEN)
        .json(&json!({"first_name": "A", "last_name": "B", "value": "a lot"}))
        .send()
        .await
        .expect("send");
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.expect("json");
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_unreachable_server_is_a_transport_error() {
    let (addr, state) = start_test_server().await;
    leadpipe::web::shutdown(&state).await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let repos = remote_repos(addr, AUTH_TOKEN);
    let err = repos.tasks.get_all().await.unwrap_err();
    assert!(
        matches!(err, RepositoryError::Transport(_)),
        "expected Transport, got {err:?}"
    );
}
