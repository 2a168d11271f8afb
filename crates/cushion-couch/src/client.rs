//! CouchDB HTTP client implementing [`DocumentDatabase`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cushion_session::{
    BulkItemResult, BulkOp, DatabaseError, DbResult, Document, DocumentDatabase, IndexPage,
    Revision,
};
use reqwest::header::{ACCEPT, ETAG, HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::{CouchError, Result, status_error, transport_error};
use crate::types::{BulkDocsRequest, ViewQuery, WriteResponse};

/// Default timeout for requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Database used when none is configured.
pub const DEFAULT_DATABASE: &str = "sessions";

/// Prefix of design document ids.
const DESIGN_PREFIX: &str = "_design/";

/// A single CouchDB (or Cloudant) database reached over HTTP.
///
/// Cheap to clone; clones share the connection pool.
///
/// # Example
///
/// ```no_run
/// use cushion_couch::CouchDatabase;
///
/// # fn example() -> cushion_couch::Result<()> {
/// let db = CouchDatabase::builder()
///     .url("http://127.0.0.1:5984")
///     .database("sessions")
///     .username("admin")
///     .password("secret")
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CouchDatabase {
    inner: Arc<CouchInner>,
}

struct CouchInner {
    http: reqwest::Client,
    /// Server URL without credentials.
    base_url: Url,
    database: String,
    credentials: Option<Credentials>,
    timeout: Duration,
}

#[derive(Clone)]
struct Credentials {
    username: String,
    password: Option<String>,
}

impl std::fmt::Debug for CouchDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CouchDatabase")
            .field("base_url", &self.inner.base_url.as_str())
            .field("database", &self.inner.database)
            .field("authenticated", &self.inner.credentials.is_some())
            .finish()
    }
}

impl CouchDatabase {
    /// Create a new builder.
    pub fn builder() -> CouchBuilder {
        CouchBuilder::new()
    }

    /// Server URL, with any credentials removed.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// Name of the database.
    pub fn database(&self) -> &str {
        &self.inner.database
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal HTTP helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// URL of the database, optionally followed by a document id.
    ///
    /// Design document ids keep their `/` separator; everything else is
    /// encoded as a single path segment.
    fn url_for(&self, id: Option<&str>) -> Url {
        let mut url = self.inner.base_url.clone();
        // The builder only accepts base URLs that can carry a path.
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&self.inner.database);
            if let Some(id) = id {
                match id.strip_prefix(DESIGN_PREFIX) {
                    Some(name) => segments.push("_design").push(name),
                    None => segments.push(id),
                };
            }
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self
            .inner
            .http
            .request(method, url)
            .timeout(self.inner.timeout);
        match &self.inner.credentials {
            Some(creds) => builder.basic_auth(&creds.username, creds.password.as_deref()),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder, subject: &str) -> DbResult<Response> {
        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        debug!(subject, status = status.as_u16(), "couch response");

        if status.is_success() {
            Ok(response)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(status_error(status, &body, subject))
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        subject: &str,
    ) -> DbResult<T> {
        let response = self.send(builder, subject).await?;
        response.json().await.map_err(|e| {
            DatabaseError::Malformed(format!("unexpected response for '{subject}': {e}"))
        })
    }
}

#[async_trait]
impl DocumentDatabase for CouchDatabase {
    async fn info(&self) -> DbResult<()> {
        let url = self.url_for(None);
        self.send(self.request(Method::GET, url), &self.inner.database)
            .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> DbResult<Document> {
        let url = self.url_for(Some(id));
        let value: Value = self.send_json(self.request(Method::GET, url), id).await?;
        Document::from_json(value)
    }

    async fn head(&self, id: &str) -> DbResult<Revision> {
        let url = self.url_for(Some(id));
        let response = self.send(self.request(Method::HEAD, url), id).await?;
        etag_revision(response.headers())
            .ok_or_else(|| DatabaseError::Malformed(format!("no ETag returned for '{id}'")))
    }

    async fn insert(&self, doc: &Document, rev: Option<&Revision>) -> DbResult<Revision> {
        let mut body = doc.to_json();
        if let Value::Object(obj) = &mut body {
            match rev {
                Some(rev) => {
                    obj.insert("_rev".to_string(), Value::String(rev.to_string()));
                }
                None => {
                    obj.remove("_rev");
                }
            }
        }

        let url = self.url_for(Some(&doc.id));
        let written: WriteResponse = self
            .send_json(self.request(Method::PUT, url).json(&body), &doc.id)
            .await?;
        Ok(written.rev)
    }

    async fn delete(&self, id: &str, rev: &Revision) -> DbResult<()> {
        let url = self.url_for(Some(id));
        self.send(
            self.request(Method::DELETE, url)
                .query(&[("rev", rev.as_str())]),
            id,
        )
        .await?;
        Ok(())
    }

    async fn bulk_write(&self, ops: &[BulkOp]) -> DbResult<Vec<BulkItemResult>> {
        let url = self.url_for(Some("_bulk_docs"));
        self.send_json(
            self.request(Method::POST, url)
                .json(&BulkDocsRequest { docs: ops }),
            "_bulk_docs",
        )
        .await
    }

    async fn query_index(&self, design: &str, index: &str, limit: usize) -> DbResult<IndexPage> {
        let mut url = self.url_for(None);
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.extend(["_design", design, "_view", index]);
        }
        let subject = format!("{DESIGN_PREFIX}{design}/_view/{index}");
        self.send_json(
            self.request(Method::GET, url).query(&ViewQuery { limit }),
            &subject,
        )
        .await
    }
}

/// Read a revision from an `ETag` header (`"1-abc"`).
fn etag_revision(headers: &HeaderMap) -> Option<Revision> {
    let raw = headers.get(ETAG)?.to_str().ok()?;
    let rev = raw.trim().trim_start_matches("W/").trim_matches('"');
    (!rev.is_empty()).then(|| Revision::new(rev))
}

/// Whether `name` is a legal CouchDB database name.
fn is_valid_database_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {}
        _ => return false,
    }
    chars.all(|c| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '$' | '(' | ')' | '+' | '-' | '/')
    })
}

/// Builder for [`CouchDatabase`].
#[derive(Debug)]
pub struct CouchBuilder {
    url: Option<String>,
    database: String,
    username: Option<String>,
    password: Option<String>,
    timeout: Duration,
    user_agent: Option<String>,
}

impl Default for CouchBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CouchBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            url: None,
            database: DEFAULT_DATABASE.to_string(),
            username: None,
            password: None,
            timeout: DEFAULT_TIMEOUT,
            user_agent: None,
        }
    }

    /// Set the server URL. Credentials may be embedded as userinfo.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Set the database name.
    pub fn database(mut self, name: impl Into<String>) -> Self {
        self.database = name.into();
        self
    }

    /// Set the username, overriding any in the URL.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the password, overriding any in the URL.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Build the client. No request is made.
    pub fn build(self) -> Result<CouchDatabase> {
        let raw = self
            .url
            .ok_or_else(|| CouchError::Config("url is required".to_string()))?;
        let mut base_url = Url::parse(&raw)?;

        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(CouchError::Config(format!(
                "unsupported URL scheme '{}'",
                base_url.scheme()
            )));
        }
        if base_url.cannot_be_a_base() {
            return Err(CouchError::Config(format!("'{raw}' cannot be a base URL")));
        }
        if !is_valid_database_name(&self.database) {
            return Err(CouchError::Config(format!(
                "invalid database name '{}'",
                self.database
            )));
        }

        let url_username = base_url.username().to_string();
        let url_password = base_url.password().map(str::to_string);
        // Scheme is http(s), so clearing userinfo cannot fail.
        let _ = base_url.set_username("");
        let _ = base_url.set_password(None);
        base_url.set_query(None);
        base_url.set_fragment(None);

        let username = self
            .username
            .or_else(|| (!url_username.is_empty()).then_some(url_username));
        let password = self.password.or(url_password);
        let credentials = match (username, password) {
            (Some(username), password) => Some(Credentials { username, password }),
            (None, Some(_)) => {
                return Err(CouchError::Config(
                    "password given without a username".to_string(),
                ));
            }
            (None, None) => None,
        };

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("cushion-couch/{}", env!("CARGO_PKG_VERSION")));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(user_agent)
            .build()?;

        debug!(url = %base_url, database = %self.database, "couch client configured");

        Ok(CouchDatabase {
            inner: Arc::new(CouchInner {
                http,
                base_url,
                database: self.database,
                credentials,
                timeout: self.timeout,
            }),
        })
    }
}
