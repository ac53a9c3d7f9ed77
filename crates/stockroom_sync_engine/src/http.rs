//! REST remote over an abstract HTTP client.
//!
//! Maps the [`RemoteStore`] contract onto a PostgREST-style API:
//!
//! | call         | request                                                        |
//! |--------------|----------------------------------------------------------------|
//! | upsert       | `POST /rest/v1/{table}?on_conflict=id`                          |
//! | soft delete  | `PATCH /rest/v1/{table}?id=eq.{id}`                             |
//! | fetch since  | `GET /rest/v1/{table}?select=*&workspace_id=eq.{w}&updated_at=gt.{t}` |
//!
//! The HTTP library itself is abstracted behind [`HttpClient`] so the
//! engine does not depend on a particular one.

use crate::error::RemoteError;
use crate::remote::{RemoteResult, RemoteStore};
use async_trait::async_trait;
use chrono::SecondsFormat;
use serde_json::Value;
use stockroom_sync_protocol::{Document, EntityKind, Identity, PullQuery, SoftDelete};

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PATCH`
    Patch,
}

/// An outgoing HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method.
    pub method: HttpMethod,
    /// Absolute URL including the query string.
    pub url: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// JSON body, if any.
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Returns the value of header `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A received HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

/// HTTP client abstraction.
///
/// Implement this trait with the HTTP library of your choice. An `Err`
/// means no response was received (DNS, connect, TLS or read failure).
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request and waits for the response.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

/// A [`RemoteStore`] speaking PostgREST over an [`HttpClient`].
pub struct RestRemote<C: HttpClient> {
    /// Base URL of the backend (e.g., "https://project.example.co").
    base_url: String,
    /// Public API key sent with every request.
    api_key: String,
    client: C,
}

impl<C: HttpClient> RestRemote<C> {
    /// Creates a REST remote.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn table_url(&self, kind: EntityKind) -> String {
        format!("{}/rest/v1/{}", self.base_url, kind.table_name())
    }

    fn request(
        &self,
        identity: &Identity,
        method: HttpMethod,
        url: String,
        body: Option<&Value>,
    ) -> RemoteResult<HttpRequest> {
        let mut headers = vec![
            ("apikey".to_string(), self.api_key.clone()),
            (
                "Authorization".to_string(),
                format!("Bearer {}", identity.access_token),
            ),
        ];
        let body = match body {
            Some(body) => {
                headers.push(("Content-Type".into(), "application/json".into()));
                Some(
                    serde_json::to_vec(body)
                        .map_err(|e| RemoteError::Transient(format!("encode body: {e}")))?,
                )
            }
            None => None,
        };
        Ok(HttpRequest {
            method,
            url,
            headers,
            body,
        })
    }

    async fn execute(&self, request: HttpRequest) -> RemoteResult<HttpResponse> {
        let method = request.method;
        let response = self.client.send(request).await.map_err(|e| {
            tracing::debug!(?method, error = %e, "request failed before a response");
            RemoteError::Transient(e)
        })?;
        check_status(&response)?;
        Ok(response)
    }
}

/// Maps a response status onto the remote error taxonomy.
fn check_status(response: &HttpResponse) -> RemoteResult<()> {
    let status = response.status;
    if (200..300).contains(&status) {
        return Ok(());
    }

    let message = String::from_utf8_lossy(&response.body).into_owned();
    match status {
        408 | 429 | 500..=599 => Err(RemoteError::Transient(format!("status {status}: {message}"))),
        _ => Err(RemoteError::Rejected { status, message }),
    }
}

#[async_trait]
impl<C: HttpClient> RemoteStore for RestRemote<C> {
    async fn upsert(&self, identity: &Identity, kind: EntityKind, row: Document) -> RemoteResult<()> {
        let url = format!("{}?on_conflict=id", self.table_url(kind));
        let mut request =
            self.request(identity, HttpMethod::Post, url, Some(&Value::Object(row)))?;
        request.headers.push((
            "Prefer".into(),
            "resolution=merge-duplicates,return=minimal".into(),
        ));
        self.execute(request).await?;
        Ok(())
    }

    async fn soft_delete(
        &self,
        identity: &Identity,
        kind: EntityKind,
        patch: &SoftDelete,
    ) -> RemoteResult<()> {
        let url = format!(
            "{}?id=eq.{}",
            self.table_url(kind),
            urlencoding::encode(&patch.id)
        );
        let body = Value::Object(patch.to_row());
        let mut request = self.request(identity, HttpMethod::Patch, url, Some(&body))?;
        request
            .headers
            .push(("Prefer".into(), "return=minimal".into()));
        self.execute(request).await?;
        Ok(())
    }

    async fn fetch_since(&self, identity: &Identity, query: &PullQuery) -> RemoteResult<Vec<Document>> {
        let since = query.since.to_rfc3339_opts(SecondsFormat::Micros, true);
        let url = format!(
            "{}?select=*&workspace_id=eq.{}&updated_at=gt.{}",
            self.table_url(query.kind),
            urlencoding::encode(&query.workspace_id),
            urlencoding::encode(&since)
        );
        let request = self.request(identity, HttpMethod::Get, url, None)?;
        let response = self.execute(request).await?;

        serde_json::from_slice(&response.body)
            .map_err(|e| RemoteError::Transient(format!("malformed response body: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use parking_lot::Mutex;
    use serde_json::json;

    struct TestClient {
        requests: Mutex<Vec<HttpRequest>>,
        response: Mutex<Result<HttpResponse, String>>,
    }

    impl TestClient {
        fn replying(status: u16, body: &str) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                response: Mutex::new(Ok(HttpResponse {
                    status,
                    body: body.as_bytes().to_vec(),
                })),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                requests: Mutex::new(Vec::new()),
                response: Mutex::new(Err(message.to_string())),
            }
        }

        fn last(&self) -> HttpRequest {
            self.requests.lock().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl HttpClient for TestClient {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
            self.requests.lock().push(request);
            self.response.lock().clone()
        }
    }

    fn identity() -> Identity {
        Identity::new("u1", "w 1", "tok")
    }

    #[tokio::test]
    async fn upsert_request_shape() {
        let remote = RestRemote::new("https://db.example.co/", "anon", TestClient::replying(201, ""));
        let row = json!({ "id": "p1", "name": "Widget" }).as_object().cloned().unwrap();
        remote
            .upsert(&identity(), EntityKind::Products, row)
            .await
            .unwrap();

        let request = remote.client.last();
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(
            request.url,
            "https://db.example.co/rest/v1/products?on_conflict=id"
        );
        assert_eq!(request.header("apikey"), Some("anon"));
        assert_eq!(request.header("authorization"), Some("Bearer tok"));
        assert_eq!(
            request.header("Prefer"),
            Some("resolution=merge-duplicates,return=minimal")
        );
        let body: Value = serde_json::from_slice(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["name"], "Widget");
    }

    #[tokio::test]
    async fn soft_delete_request_shape() {
        let remote = RestRemote::new("https://db.example.co", "anon", TestClient::replying(204, ""));
        let patch = SoftDelete {
            id: "c/1".into(),
            updated_at: Utc::now(),
            version: 4,
        };
        remote
            .soft_delete(&identity(), EntityKind::Customers, &patch)
            .await
            .unwrap();

        let request = remote.client.last();
        assert_eq!(request.method, HttpMethod::Patch);
        assert_eq!(request.url, "https://db.example.co/rest/v1/customers?id=eq.c%2F1");
        let body: Value = serde_json::from_slice(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(body["is_deleted"], true);
        assert_eq!(body["version"], 4);
    }

    #[tokio::test]
    async fn fetch_since_request_and_rows() {
        let client = TestClient::replying(200, r#"[{"id":"p1","version":2}]"#);
        let remote = RestRemote::new("https://db.example.co", "anon", client);
        let since = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let rows = remote
            .fetch_since(
                &identity(),
                &PullQuery {
                    kind: EntityKind::SalesOrders,
                    workspace_id: "w 1".into(),
                    since,
                },
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["version"], 2);

        let request = remote.client.last();
        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(
            request.url,
            "https://db.example.co/rest/v1/sales_orders?select=*&workspace_id=eq.w%201\
             &updated_at=gt.2024-05-01T10%3A00%3A00.000000Z"
        );
        assert!(request.body.is_none());
    }

    #[tokio::test]
    async fn status_classification() {
        for (status, retryable) in [(408, true), (429, true), (503, true), (400, false), (409, false)] {
            let remote = RestRemote::new("https://db.example.co", "anon", TestClient::replying(status, "nope"));
            let row = json!({ "id": "p1" }).as_object().cloned().unwrap();
            let err = remote
                .upsert(&identity(), EntityKind::Products, row)
                .await
                .unwrap_err();
            assert_eq!(err.is_retryable(), retryable, "status {status}");
        }

        let remote = RestRemote::new("https://db.example.co", "anon", TestClient::failing("dns"));
        let row = json!({ "id": "p1" }).as_object().cloned().unwrap();
        let err = remote
            .upsert(&identity(), EntityKind::Products, row)
            .await
            .unwrap_err();
        assert_eq!(err, RemoteError::Transient("dns".into()));
    }

    #[tokio::test]
    async fn rejection_carries_status_and_body() {
        let remote = RestRemote::new(
            "https://db.example.co",
            "anon",
            TestClient::replying(422, "price must be positive"),
        );
        let row = json!({ "id": "p1" }).as_object().cloned().unwrap();
        let err = remote
            .upsert(&identity(), EntityKind::Products, row)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RemoteError::Rejected {
                status: 422,
                message: "price must be positive".into()
            }
        );
    }
}
