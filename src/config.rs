//! Connection configuration with builder pattern

use std::fmt;
use std::time::Duration;

use reqwest::Url;

/// Default HTTPS port of a vCenter endpoint
pub const DEFAULT_PORT: u16 = 443;

/// VI/JSON release used in request paths (`/sdk/vim25/{release}`)
pub const DEFAULT_API_RELEASE: &str = "8.0.1.0";

#[derive(Clone)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Skip TLS certificate verification (self-signed vCenter certificates)
    pub insecure: bool,
    pub api_release: String,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    /// `None` waits on a task forever
    pub task_timeout: Option<Duration>,
}

/// How long-running tasks are polled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskPolicy {
    pub poll_interval: Duration,
    pub timeout: Option<Duration>,
}

impl Default for TaskPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: Some(Duration::from_secs(3600)),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let policy = TaskPolicy::default();
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            user: String::new(),
            password: String::new(),
            insecure: false,
            api_release: DEFAULT_API_RELEASE.to_string(),
            request_timeout: Duration::from_secs(60),
            poll_interval: policy.poll_interval,
            task_timeout: policy.timeout,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("insecure", &self.insecure)
            .field("api_release", &self.api_release)
            .field("request_timeout", &self.request_timeout)
            .field("poll_interval", &self.poll_interval)
            .field("task_timeout", &self.task_timeout)
            .finish()
    }
}

impl ConnectionConfig {
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::default()
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.host.trim().is_empty() {
            return Err(crate::Error::Config("host cannot be empty".into()));
        }
        if self.user.trim().is_empty() {
            return Err(crate::Error::Config("user cannot be empty".into()));
        }
        if self.password.is_empty() {
            return Err(crate::Error::Config("password cannot be empty".into()));
        }
        if self.port == 0 {
            return Err(crate::Error::Config("port must be non-zero".into()));
        }
        if self.api_release.trim().is_empty() {
            return Err(crate::Error::Config("api release cannot be empty".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(crate::Error::Config("poll interval must be non-zero".into()));
        }
        Ok(())
    }

    /// VI/JSON base URL, e.g. `https://vc.example.com:443/sdk/vim25/8.0.1.0`
    pub fn base_url(&self) -> crate::Result<Url> {
        let raw = format!(
            "https://{}:{}/sdk/vim25/{}",
            self.host.trim(),
            self.port,
            self.api_release.trim()
        );
        Url::parse(&raw).map_err(|e| crate::Error::Config(format!("invalid endpoint {raw}: {e}")))
    }

    pub fn task_policy(&self) -> TaskPolicy {
        TaskPolicy {
            poll_interval: self.poll_interval,
            timeout: self.task_timeout,
        }
    }
}

#[derive(Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.config.user = user.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.config.password = password.into();
        self
    }

    pub fn insecure(mut self, insecure: bool) -> Self {
        self.config.insecure = insecure;
        self
    }

    pub fn api_release(mut self, release: impl Into<String>) -> Self {
        self.config.api_release = release.into();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.task_timeout = timeout;
        self
    }

    pub fn build(self) -> ConnectionConfig {
        self.config
    }

    pub fn build_validated(self) -> crate::Result<ConnectionConfig> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}
