//! reqwest-backed VI/JSON client

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, Response, StatusCode, Url};
use serde_json::{json, Value};

use super::types::ServiceContent;
use super::{ManagedObjectRef, Vim};
use crate::config::ConnectionConfig;
use crate::{Error, Result};

/// Header carrying the session token in both directions
pub const SESSION_HEADER: &str = "vmware-api-session-id";

/// An authenticated session against one vCenter endpoint
pub struct VimClient {
    http: Client,
    base: Url,
    content: ServiceContent,
    session: RwLock<Option<String>>,
}

impl VimClient {
    /// Fetch the service content and log in with the configured credentials
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        config.validate()?;

        let http = Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .timeout(config.request_timeout)
            .build()?;
        let base = config.base_url()?;

        tracing::info!(host = %config.host, port = config.port, release = %config.api_release, "Connecting to vCenter");
        Self::open(http, base, &config.user, &config.password).await
    }

    /// Read the service content below `base`, then log in
    async fn open(http: Client, base: Url, user: &str, password: &str) -> Result<Self> {
        let instance = ManagedObjectRef::new("ServiceInstance", "ServiceInstance");
        let url = endpoint(&base, &instance, "content")?;
        let content: ServiceContent = serde_json::from_value(read_body(http.get(url).send().await?).await?)?;

        tracing::info!(product = %content.about.full_name, api = %content.about.api_version, "Service content retrieved");

        let client = Self {
            http,
            base,
            content,
            session: RwLock::new(None),
        };
        client.login(user, password).await?;
        Ok(client)
    }

    async fn login(&self, user: &str, password: &str) -> Result<()> {
        let manager = self.session_manager()?;
        let url = endpoint(&self.base, manager, "Login")?;

        let resp = self
            .http
            .post(url)
            .json(&json!({"userName": user, "password": password}))
            .send()
            .await?;

        let token = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        read_body(resp).await?;

        let token = token.ok_or_else(|| Error::Login(format!("no {SESSION_HEADER} header in login response")))?;
        *self.session.write() = Some(token);
        tracing::info!(user, "Logged in");
        Ok(())
    }

    /// End the session; further calls fail with [`Error::NotAuthenticated`]
    pub async fn logout(&self) -> Result<()> {
        if self.session.read().is_none() {
            return Ok(());
        }
        let manager = self.session_manager()?.clone();
        let result = self.invoke(&manager, "Logout", json!({})).await;
        *self.session.write() = None;
        result?;
        tracing::info!("Logged out");
        Ok(())
    }

    /// Log out and hand back `result`; a failed logout is only logged
    pub async fn finish<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = self.logout().await {
            tracing::warn!(error = %e, "Logout failed");
        }
        result
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.read().is_some()
    }

    fn session_manager(&self) -> Result<&ManagedObjectRef> {
        self.content
            .session_manager
            .as_ref()
            .ok_or_else(|| Error::Unsupported("endpoint has no SessionManager".into()))
    }

    fn token(&self) -> Result<String> {
        self.session.read().clone().ok_or(Error::NotAuthenticated)
    }
}

#[async_trait]
impl Vim for VimClient {
    fn content(&self) -> &ServiceContent {
        &self.content
    }

    async fn invoke(&self, obj: &ManagedObjectRef, method: &str, args: Value) -> Result<Value> {
        let url = endpoint(&self.base, obj, method)?;
        tracing::trace!(object = %obj, method, "Invoking method");
        let resp = self
            .http
            .post(url)
            .header(SESSION_HEADER, self.token()?)
            .json(&args)
            .send()
            .await?;
        read_body(resp).await
    }

    async fn property(&self, obj: &ManagedObjectRef, name: &str) -> Result<Value> {
        let url = endpoint(&self.base, obj, name)?;
        tracing::trace!(object = %obj, property = name, "Reading property");
        let resp = self
            .http
            .get(url)
            .header(SESSION_HEADER, self.token()?)
            .send()
            .await?;
        read_body(resp).await
    }
}

/// `{base}/{type}/{id}/{tail}` with each segment percent-encoded
fn endpoint(base: &Url, obj: &ManagedObjectRef, tail: &str) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| Error::Config(format!("{base} cannot carry a path")))?
        .pop_if_empty()
        .push(&obj.kind)
        .push(&obj.value)
        .push(tail);
    Ok(url)
}

async fn read_body(resp: Response) -> Result<Value> {
    let status = resp.status();
    if status == StatusCode::NO_CONTENT {
        return Ok(Value::Null);
    }

    let body = resp.text().await?;
    if !status.is_success() {
        return Err(Error::from_response(status.as_u16(), &body));
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&body)?)
}
