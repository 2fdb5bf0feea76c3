use std::cell::RefCell;
use std::rc::Rc;

use serde_json::{Value, json};
use tracing::info;

use super::{Method, RetryingClient};
use crate::error::RemoteError;

/// Whole-document read/write against the remote store.
pub trait RemoteStore {
    /// Fetch the state document.
    ///
    /// # Errors
    ///
    /// [`RemoteError::NotFound`] when the document or its state file does not
    /// exist; any other [`RemoteError`] after retries.
    fn fetch(&self) -> Result<Value, RemoteError>;

    /// Replace the state document.
    ///
    /// # Errors
    ///
    /// Any [`RemoteError`] after retries.
    fn store(&self, document: &Value) -> Result<(), RemoteError>;

    /// Short human label for logs (`gist abc123`).
    fn describe(&self) -> String;
}

/// One state file inside one gist-style document.
#[derive(Debug)]
pub struct DocumentClient {
    client: RetryingClient,
    document_id: String,
    file_name: String,
}

impl DocumentClient {
    pub fn new(
        client: RetryingClient,
        document_id: impl Into<String>,
        file_name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            document_id: document_id.into(),
            file_name: file_name.into(),
        }
    }

    #[must_use]
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    fn resource(&self) -> String {
        format!("/gists/{}", self.document_id)
    }
}

impl RemoteStore for DocumentClient {
    fn fetch(&self) -> Result<Value, RemoteError> {
        let response = self.client.call(Method::Get, &self.resource(), None)?;
        let body = response.json()?;

        let Some(content) = body
            .get("files")
            .and_then(|files| files.get(&self.file_name))
            .and_then(|file| file.get("content"))
            .and_then(Value::as_str)
        else {
            return Err(RemoteError::NotFound);
        };

        serde_json::from_str(content).map_err(|e| {
            RemoteError::api(
                response.status,
                format!("{} does not hold valid JSON: {e}", self.file_name),
            )
        })
    }

    fn store(&self, document: &Value) -> Result<(), RemoteError> {
        let payload = files_payload(&self.file_name, document)?;
        self.client
            .call(Method::Patch, &self.resource(), Some(&payload))?;
        info!(document = %self.document_id, file = %self.file_name, "remote state written");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("gist {}", self.document_id)
    }
}

/// In-process [`RemoteStore`] for tests and offline tooling.
///
/// Clones share the same document, so a test can keep a handle after moving
/// one clone into a repository.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    document: Rc<RefCell<Option<Value>>>,
    failure: Rc<RefCell<Option<RemoteError>>>,
    writes: Rc<RefCell<usize>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(document: Option<Value>) -> Self {
        Self {
            document: Rc::new(RefCell::new(document)),
            ..Self::default()
        }
    }

    /// Make every subsequent call fail with `error`; `None` heals the store.
    pub fn fail_with(&self, error: Option<RemoteError>) {
        *self.failure.borrow_mut() = error;
    }

    #[must_use]
    pub fn document(&self) -> Option<Value> {
        self.document.borrow().clone()
    }

    #[must_use]
    pub fn writes(&self) -> usize {
        *self.writes.borrow()
    }

    fn check(&self) -> Result<(), RemoteError> {
        self.failure.borrow().clone().map_or(Ok(()), Err)
    }
}

impl RemoteStore for MemoryStore {
    fn fetch(&self) -> Result<Value, RemoteError> {
        self.check()?;
        self.document.borrow().clone().ok_or(RemoteError::NotFound)
    }

    fn store(&self, document: &Value) -> Result<(), RemoteError> {
        self.check()?;
        *self.document.borrow_mut() = Some(document.clone());
        *self.writes.borrow_mut() += 1;
        Ok(())
    }

    fn describe(&self) -> String {
        "memory store".to_string()
    }
}

/// Id and browser URL of a newly created document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedDocument {
    pub id: String,
    pub url: Option<String>,
}

/// Create a private document holding `document` under `file_name`.
///
/// # Errors
///
/// Any [`RemoteError`] from the call, or [`RemoteError::Api`] when the store
/// answers without an id.
pub fn create_document(
    client: &RetryingClient,
    file_name: &str,
    description: &str,
    document: &Value,
) -> Result<CreatedDocument, RemoteError> {
    let mut payload = files_payload(file_name, document)?;
    if let Value::Object(map) = &mut payload {
        map.insert("description".into(), Value::String(description.to_string()));
        map.insert("public".into(), Value::Bool(false));
    }

    let response = client.call(Method::Post, "/gists", Some(&payload))?;
    let body = response.json()?;
    let id = body
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| RemoteError::api(response.status, "response has no document id"))?
        .to_string();
    let url = body
        .get("html_url")
        .and_then(Value::as_str)
        .map(str::to_string);

    info!(document = %id, "remote document created");
    Ok(CreatedDocument { id, url })
}

fn files_payload(file_name: &str, document: &Value) -> Result<Value, RemoteError> {
    let content = serde_json::to_string_pretty(document)
        .map_err(|e| RemoteError::api(0, format!("failed to encode state: {e}")))?;
    Ok(json!({ "files": { file_name: { "content": content } } }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteResponse;
    use crate::remote::retry::testing::client;

    fn gist_body(file: &str, content: &str) -> String {
        json!({"id": "abc", "files": {file: {"content": content}}}).to_string()
    }

    #[test]
    fn fetch_reads_named_file_content() {
        let (rc, transport, _) = client(vec![Ok(RemoteResponse::new(
            200,
            gist_body("state.json", r#"{"last_updated":"2025-01-01T00:00:00Z"}"#),
        ))]);
        let doc = DocumentClient::new(rc, "abc", "state.json");

        let value = doc.fetch().expect("fetch");
        assert_eq!(value["last_updated"], "2025-01-01T00:00:00Z");
        assert_eq!(transport.requests.borrow()[0].method, Method::Get);
        assert!(transport.requests.borrow()[0].url.ends_with("/gists/abc"));
    }

    #[test]
    fn fetch_missing_file_is_not_found() {
        let (rc, _, _) = client(vec![Ok(RemoteResponse::new(200, gist_body("other.json", "{}")))]);
        let doc = DocumentClient::new(rc, "abc", "state.json");
        assert_eq!(doc.fetch().expect_err("missing"), RemoteError::NotFound);
    }

    #[test]
    fn fetch_garbage_content_is_api_error() {
        let (rc, _, _) = client(vec![Ok(RemoteResponse::new(200, gist_body("state.json", "{oops")))]);
        let doc = DocumentClient::new(rc, "abc", "state.json");
        assert!(matches!(doc.fetch(), Err(RemoteError::Api { status: 200, .. })));
    }

    #[test]
    fn store_patches_pretty_content() {
        let (rc, transport, _) = client(vec![Ok(RemoteResponse::new(200, "{}"))]);
        let doc = DocumentClient::new(rc, "abc", "state.json");
        doc.store(&json!({"cycle_count": {}})).expect("store");

        let sent = transport.requests.borrow();
        assert_eq!(sent[0].method, Method::Patch);
        let content = sent[0].body.as_ref().expect("body")["files"]["state.json"]["content"]
            .as_str()
            .expect("content string")
            .to_string();
        assert!(content.contains("\n  \"cycle_count\""));
    }

    #[test]
    fn create_posts_private_document() {
        let (rc, transport, _) = client(vec![Ok(RemoteResponse::new(
            201,
            json!({"id": "new123", "html_url": "https://gist.example/new123"}).to_string(),
        ))]);

        let created = create_document(&rc, "state.json", "rota state", &json!({})).expect("create");
        assert_eq!(created.id, "new123");
        assert_eq!(created.url.as_deref(), Some("https://gist.example/new123"));

        let sent = transport.requests.borrow();
        let body = sent[0].body.as_ref().expect("body");
        assert_eq!(sent[0].method, Method::Post);
        assert_eq!(body["public"], false);
        assert_eq!(body["description"], "rota state");
        assert!(body["files"]["state.json"]["content"].is_string());
    }

    #[test]
    fn memory_store_shares_state_and_injects_failures() {
        let store = MemoryStore::new(None);
        let handle = store.clone();
        assert_eq!(store.fetch(), Err(RemoteError::NotFound));

        store.store(&json!({"a": 1})).expect("store");
        assert_eq!(handle.document(), Some(json!({"a": 1})));
        assert_eq!(handle.writes(), 1);

        handle.fail_with(Some(RemoteError::Server { status: 502 }));
        assert_eq!(store.fetch(), Err(RemoteError::Server { status: 502 }));
        handle.fail_with(None);
        assert!(store.fetch().is_ok());
    }

    #[test]
    fn create_without_id_fails() {
        let (rc, _, _) = client(vec![Ok(RemoteResponse::new(201, "{}"))]);
        let err = create_document(&rc, "s.json", "d", &json!({})).expect_err("no id");
        assert!(matches!(err, RemoteError::Api { status: 201, .. }));
    }
}
