//! HTTP repositories backed by the pipeline API.
//!
//! Rows travel in snake_case and are transcoded on the way in and out.
//! Writes that carry an owner resolve the caller through `GET /auth/me`
//! first and never go out without one.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use url::Url;

use crate::db::{
    EntityRepository, IMMUTABLE_FIELDS, Identity, Lead, LeadRepository, LeadStatus, Quote,
    QuoteRepository, Record, Task, TaskRepository,
};
use crate::error::RepositoryError;
use crate::transcode::{decode, encode, strip_keys};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ERROR_CHARS: usize = 200;

/// What a request is about, for `NotFound` reporting.
#[derive(Debug, Clone, Copy)]
struct Subject<'a> {
    kind: &'static str,
    id: &'a str,
}

pub struct RemoteClient {
    http: reqwest::Client,
    base_url: Url,
}

impl std::fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

impl RemoteClient {
    pub fn new(api_url: &str, token: &SecretString) -> Result<Self, RepositoryError> {
        Self::with_timeout(api_url, token, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        api_url: &str,
        token: &SecretString,
        timeout: Duration,
    ) -> Result<Self, RepositoryError> {
        let base_url = Url::parse(api_url.trim_end_matches('/'))
            .map_err(|e| RepositoryError::Validation(format!("invalid API URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(RepositoryError::Validation(format!(
                "API URL '{api_url}' cannot carry a path"
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut auth_value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|_| RepositoryError::Validation("invalid API token format".to_string()))?;
        auth_value.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth_value);

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| RepositoryError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { http, base_url })
    }

    fn url(&self, segments: &[&str]) -> Result<Url, RepositoryError> {
        let mut url = self.base_url.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                RepositoryError::Validation("API URL cannot carry a path".to_string())
            })?;
            path.pop_if_empty().extend(segments);
        }
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<&Value>,
        subject: Subject<'_>,
    ) -> Result<Value, RepositoryError> {
        let url = self.url(segments)?;
        tracing::debug!(method = %method, url = %url, "Remote request");

        let mut request = self.http.request(method.clone(), url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text)
                .map_err(|e| RepositoryError::Serialization(format!("response body: {e}")));
        }

        let err = map_status(status, &text, subject);
        tracing::debug!(method = %method, status = status.as_u16(), error = %err, "Remote request failed");
        Err(err)
    }

    /// The authenticated caller. Any failure is reported as `Unauthenticated`.
    pub async fn current_identity(&self) -> Result<Identity, RepositoryError> {
        let subject = Subject {
            kind: "identity",
            id: "me",
        };
        let row = self
            .send(Method::GET, &["auth", "me"], None, subject)
            .await
            .map_err(|e| RepositoryError::Unauthenticated(e.to_string()))?;
        let identity: Identity = decode(row)
            .map_err(|e| RepositoryError::Unauthenticated(format!("unreadable identity: {e}")))?;
        if identity.id.trim().is_empty() {
            return Err(RepositoryError::Unauthenticated(
                "identity has an empty id".to_string(),
            ));
        }
        Ok(identity)
    }
}

fn error_message(body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        v.get("error")
            .or_else(|| v.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    match from_json {
        Some(message) => message,
        None if body.trim().is_empty() => "no response body".to_string(),
        None => body.trim().chars().take(MAX_ERROR_CHARS).collect(),
    }
}

fn map_status(status: StatusCode, body: &str, subject: Subject<'_>) -> RepositoryError {
    let message = error_message(body);
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RepositoryError::Unauthenticated(message),
        StatusCode::NOT_FOUND => RepositoryError::not_found(subject.kind, subject.id),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            RepositoryError::Validation(message)
        }
        other => RepositoryError::Upstream {
            status: other.as_u16(),
            message,
        },
    }
}

fn decode_row<E: Record>(row: Value) -> Result<E, RepositoryError> {
    decode(row).map_err(|e| RepositoryError::Serialization(format!("{}: {e}", E::KIND)))
}

fn decode_rows<E: Record>(rows: Value) -> Result<Vec<E>, RepositoryError> {
    match rows {
        Value::Array(items) => items.into_iter().map(decode_row).collect(),
        Value::Null => Ok(Vec::new()),
        other => Err(RepositoryError::Serialization(format!(
            "expected a list of {}, got {}",
            E::COLLECTION,
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

fn encode_body<T: serde::Serialize>(value: &T) -> Result<Value, RepositoryError> {
    encode(value).map_err(|e| RepositoryError::Serialization(e.to_string()))
}

/// Generic repository over one API collection.
pub struct RemoteRepository<E> {
    client: Arc<RemoteClient>,
    _entity: PhantomData<fn() -> E>,
}

impl<E> RemoteRepository<E> {
    pub fn new(client: Arc<RemoteClient>) -> Self {
        Self {
            client,
            _entity: PhantomData,
        }
    }
}

#[async_trait]
impl<E: Record> EntityRepository<E> for RemoteRepository<E> {
    async fn get_all(&self) -> Result<Vec<E>, RepositoryError> {
        let subject = Subject {
            kind: E::COLLECTION,
            id: "",
        };
        let rows = self
            .client
            .send(Method::GET, &[E::COLLECTION], None, subject)
            .await?;
        decode_rows(rows)
    }

    async fn get_one(&self, id: &str) -> Result<E, RepositoryError> {
        let subject = Subject { kind: E::KIND, id };
        let row = self
            .client
            .send(Method::GET, &[E::COLLECTION, id], None, subject)
            .await?;
        decode_row(row)
    }

    async fn create(&self, mut input: E::Create) -> Result<E, RepositoryError> {
        E::prepare_create(&mut input)?;
        let identity = self.client.current_identity().await?;
        let mut body = encode_body(&input)?;
        if let Value::Object(map) = &mut body {
            map.insert("user_id".to_string(), Value::String(identity.id));
        }
        let subject = match E::create_parent(&input) {
            Some((kind, id)) => Subject { kind, id },
            None => Subject {
                kind: E::KIND,
                id: E::requested_id(&input).unwrap_or_default(),
            },
        };
        let row = self
            .client
            .send(Method::POST, &[E::COLLECTION], Some(&body), subject)
            .await?;
        decode_row(row)
    }

    async fn update(&self, id: &str, mut patch: E::Patch) -> Result<E, RepositoryError> {
        E::prepare_patch(&mut patch)?;
        let mut body = encode_body(&patch)?;
        strip_keys(&mut body, IMMUTABLE_FIELDS);
        strip_keys(&mut body, E::EXTRA_IMMUTABLE);
        let subject = Subject { kind: E::KIND, id };
        let row = self
            .client
            .send(Method::PUT, &[E::COLLECTION, id], Some(&body), subject)
            .await?;
        decode_row(row)
    }

    async fn delete(&self, id: &str) -> Result<(), RepositoryError> {
        let subject = Subject { kind: E::KIND, id };
        match self
            .client
            .send(Method::DELETE, &[E::COLLECTION, id], None, subject)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                tracing::debug!(kind = E::KIND, id = %id, "Delete of absent remote record");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl LeadRepository for RemoteRepository<Lead> {
    async fn update_status(&self, id: &str, status: LeadStatus) -> Result<Lead, RepositoryError> {
        let body = json!({ "status": status });
        let subject = Subject {
            kind: Lead::KIND,
            id,
        };
        let row = self
            .client
            .send(
                Method::PATCH,
                &[Lead::COLLECTION, id, "status"],
                Some(&body),
                subject,
            )
            .await?;
        decode_row(row)
    }
}

#[async_trait]
impl TaskRepository for RemoteRepository<Task> {
    async fn toggle(&self, id: &str) -> Result<Task, RepositoryError> {
        let identity = self.client.current_identity().await?;
        let body = json!({ "user_id": identity.id });
        let subject = Subject {
            kind: Task::KIND,
            id,
        };
        let row = self
            .client
            .send(
                Method::PATCH,
                &[Task::COLLECTION, id, "toggle"],
                Some(&body),
                subject,
            )
            .await?;
        decode_row(row)
    }
}

#[async_trait]
impl QuoteRepository for RemoteRepository<Quote> {
    async fn list_for_lead(&self, lead_id: &str) -> Result<Vec<Quote>, RepositoryError> {
        let subject = Subject {
            kind: Lead::KIND,
            id: lead_id,
        };
        let rows = self
            .client
            .send(
                Method::GET,
                &[Quote::COLLECTION, "lead", lead_id],
                None,
                subject,
            )
            .await?;
        decode_rows(rows)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::db::{CreateTaskParams, TaskType, UpdateLeadParams};

    fn client(server: &MockServer) -> Arc<RemoteClient> {
        let token = SecretString::from("test-token".to_string());
        Arc::new(RemoteClient::new(&format!("{}/api", server.uri()), &token).expect("client"))
    }

    fn task_row(id: &str, completed: bool) -> Value {
        json!({
            "id": id,
            "user_id": "u-1",
            "title": "Call back",
            "type": "call",
            "date": "2026-03-02",
            "completed": completed,
            "priority": false,
            "created_at": "2026-03-01T10:00:00Z",
            "updated_at": "2026-03-01T10:00:00Z"
        })
    }

    #[test]
    fn url_escapes_ids() {
        let token = SecretString::from("t".to_string());
        let client = RemoteClient::new("https://crm.example.com/api/", &token).expect("client");
        let url = client.url(&["leads", "a/b c"]).expect("url");
        assert_eq!(url.as_str(), "https://crm.example.com/api/leads/a%2Fb%20c");
    }

    #[test]
    fn status_mapping_is_distinct_per_class() {
        let subject = Subject {
            kind: "lead",
            id: "l-9",
        };
        assert!(matches!(
            map_status(StatusCode::UNAUTHORIZED, r#"{"error":"expired"}"#, subject),
            RepositoryError::Unauthenticated(m) if m == "expired"
        ));
        assert!(map_status(StatusCode::NOT_FOUND, "", subject).is_not_found());
        assert!(matches!(
            map_status(StatusCode::UNPROCESSABLE_ENTITY, "bad value", subject),
            RepositoryError::Validation(m) if m == "bad value"
        ));
        assert!(matches!(
            map_status(StatusCode::BAD_GATEWAY, "", subject),
            RepositoryError::Upstream { status: 502, .. }
        ));
    }

    #[tokio::test]
    async fn get_all_sends_bearer_and_transcodes_rows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tasks"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([task_row("t-1", false)])))
            .mount(&server)
            .await;

        let repo = RemoteRepository::<Task>::new(client(&server));
        let tasks = repo.get_all().await.expect("get_all");
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].user_id.as_deref(), Some("u-1"));
        assert_eq!(tasks[0].kind, TaskType::Call);
    }

    #[tokio::test]
    async fn create_without_identity_never_writes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "no session"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/tasks"))
            .respond_with(ResponseTemplate::new(201).set_body_json(task_row("t-2", false)))
            .expect(0)
            .mount(&server)
            .await;

        let repo = RemoteRepository::<Task>::new(client(&server));
        let date = chrono::NaiveDate::from_ymd_opt(2026, 3, 2).expect("date");
        let err = repo
            .create(CreateTaskParams::new("Call back", TaskType::Call, date))
            .await
            .expect_err("must fail");
        assert!(matches!(err, RepositoryError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn toggle_attaches_owner() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "u-1"})))
            .mount(&server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/api/tasks/t-1/toggle"))
            .and(body_partial_json(json!({"user_id": "u-1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(task_row("t-1", true)))
            .expect(1)
            .mount(&server)
            .await;

        let repo = RemoteRepository::<Task>::new(client(&server));
        let task = repo.toggle("t-1").await.expect("toggle");
        assert!(task.completed);
    }

    #[tokio::test]
    async fn update_strips_immutable_fields() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/leads/l-1"))
            .respond_with(|req: &wiremock::Request| {
                let body: Value = serde_json::from_slice(&req.body).expect("json body");
                assert!(body.get("id").is_none());
                assert!(body.get("user_id").is_none());
                assert!(body.get("created_at").is_none());
                assert_eq!(body["company"], json!("Acme"));
                ResponseTemplate::new(200).set_body_json(json!({
                    "id": "l-1",
                    "first_name": "Alice",
                    "last_name": "Dubois",
                    "company": "Acme",
                    "status": "NEW",
                    "value": 10,
                    "created_at": "2026-03-01T10:00:00Z",
                    "updated_at": "2026-03-02T10:00:00Z"
                }))
            })
            .mount(&server)
            .await;

        let repo = RemoteRepository::<Lead>::new(client(&server));
        let lead = repo
            .update(
                "l-1",
                UpdateLeadParams {
                    company: Some("Acme".to_string()),
                    ..Default::default()
                },
            )
            .await
            .expect("update");
        assert_eq!(lead.company, "Acme");
    }

    #[tokio::test]
    async fn delete_treats_missing_as_success() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/quotes/q-404"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "Quote not found"})))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/quotes/q-500"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let repo = RemoteRepository::<Quote>::new(client(&server));
        repo.delete("q-404").await.expect("absent delete is fine");
        assert!(matches!(
            repo.delete("q-500").await,
            Err(RepositoryError::Upstream { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn get_one_reports_not_found_with_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/leads/l-9"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let repo = RemoteRepository::<Lead>::new(client(&server));
        match repo.get_one("l-9").await {
            Err(RepositoryError::NotFound { entity, id }) => {
                assert_eq!(entity, "lead");
                assert_eq!(id, "l-9");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
