//! Endpoint configuration.
//!
//! One [`EndpointConfig`] per cluster target; a [`RouterConfig`] groups them
//! and names the primary. Both can be built in code or loaded from JSON,
//! TOML, or environment variables.

use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Connection settings for one named cluster endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Logical endpoint name.
    pub name: String,
    /// Host name or address.
    pub host: String,
    /// Port. Required; `0` means unset.
    pub port: u16,
    /// `http` or `https`.
    pub scheme: Scheme,
    /// Basic auth username.
    pub username: Option<String>,
    /// Basic auth password.
    pub password: Option<String>,
    /// Time allowed to establish a connection.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// Time allowed for sending and receiving once connected.
    #[serde(with = "millis")]
    pub socket_timeout: Duration,
    /// Time allowed to wait for a free connection slot.
    #[serde(with = "millis", alias = "connection_request_timeout")]
    pub request_queue_timeout: Duration,
    /// Maximum concurrent calls on this endpoint.
    pub max_connections: usize,
    /// Skip certificate verification (development clusters only).
    pub accept_invalid_certs: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            host: String::new(),
            port: 0,
            scheme: Scheme::Http,
            username: None,
            password: None,
            connect_timeout: Duration::from_secs(5),
            socket_timeout: Duration::from_secs(30),
            request_queue_timeout: Duration::from_secs(5),
            max_connections: 30,
            accept_invalid_certs: false,
        }
    }
}

impl EndpointConfig {
    /// Create a new endpoint configuration.
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Set basic authentication credentials.
    pub fn with_basic_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Set the URL scheme.
    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Set connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set socket (read/write) timeout.
    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    /// Set the timeout for waiting on a connection slot.
    pub fn with_request_queue_timeout(mut self, timeout: Duration) -> Self {
        self.request_queue_timeout = timeout;
        self
    }

    /// Set the maximum number of concurrent calls.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Skip certificate verification (DANGER: only for development).
    pub fn danger_accept_invalid_certs(mut self) -> Self {
        self.accept_invalid_certs = true;
        self
    }

    /// Base URL of the endpoint.
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.scheme.as_str(), self.host, self.port)
    }

    /// Credentials, present only when both parts are non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.trim().is_empty() && !pass.trim().is_empty() => {
                Some((user, pass))
            }
            _ => None,
        }
    }

    /// Upper bound for one call once a slot is held.
    pub fn call_timeout(&self) -> Duration {
        self.connect_timeout + self.socket_timeout
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SearchError::Configuration(
                "endpoint name must not be empty".to_string(),
            ));
        }
        if self.host.trim().is_empty() {
            return Err(SearchError::Configuration(format!(
                "endpoint '{}' has no host",
                self.name
            )));
        }
        if self.port == 0 {
            return Err(SearchError::Configuration(format!(
                "endpoint '{}' has no port",
                self.name
            )));
        }
        if self.max_connections == 0 {
            return Err(SearchError::Configuration(format!(
                "endpoint '{}' allows no connections",
                self.name
            )));
        }
        Ok(())
    }
}

/// URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Plain HTTP.
    #[default]
    Http,
    /// HTTP over TLS.
    Https,
}

impl Scheme {
    /// Scheme as it appears in a URL.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" => Some(Scheme::Http),
            "https" => Some(Scheme::Https),
            _ => None,
        }
    }
}

/// All endpoints known to a router.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Name of the default endpoint. The first endpoint when unset.
    pub primary: Option<String>,
    /// Registered endpoints.
    pub endpoints: Vec<EndpointConfig>,
}

impl RouterConfig {
    /// Create an empty router configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an endpoint.
    pub fn endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Name the primary endpoint.
    pub fn primary(mut self, name: impl Into<String>) -> Self {
        self.primary = Some(name.into());
        self
    }

    /// Parse from a JSON document.
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| SearchError::Configuration(format!("JSON parse error: {}", e)))
    }

    /// Parse from a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| SearchError::Configuration(format!("TOML parse error: {}", e)))
    }

    /// Load from a `.json` or `.toml` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| SearchError::Configuration("No file extension found".to_string()))?;

        let content = fs::read_to_string(path)
            .map_err(|e| SearchError::Configuration(format!("Failed to read file: {}", e)))?;

        match ext.to_lowercase().as_str() {
            "json" => Self::from_json_str(&content),
            "toml" => Self::from_toml_str(&content),
            other => Err(SearchError::Configuration(format!(
                "Unsupported format: {}",
                other
            ))),
        }
    }

    /// Load from the process environment.
    pub fn from_env(prefix: &str) -> Result<Self> {
        Self::from_env_vars(prefix, std::env::vars())
    }

    /// Load from `PREFIX_*` variables.
    ///
    /// `PREFIX_ENDPOINTS` lists endpoint names separated by commas. Each
    /// endpoint reads `PREFIX_<NAME>_HOST`, `_PORT`, `_SCHEME`, `_USERNAME`,
    /// `_PASSWORD`, `_CONNECT_TIMEOUT`, `_SOCKET_TIMEOUT`,
    /// `_REQUEST_QUEUE_TIMEOUT` (milliseconds) and `_MAX_CONNECTIONS`.
    /// `PREFIX_PRIMARY` names the primary.
    pub fn from_env_vars<I, K, V>(prefix: &str, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let prefix = prefix.trim_end_matches('_').to_uppercase();
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| k.starts_with(&prefix))
            .collect();
        let lookup = |suffix: &str| vars.get(&format!("{}_{}", prefix, suffix)).cloned();

        let names = lookup("ENDPOINTS").ok_or_else(|| {
            SearchError::Configuration(format!("{}_ENDPOINTS is not set", prefix))
        })?;

        let mut config = RouterConfig {
            primary: lookup("PRIMARY"),
            endpoints: Vec::new(),
        };

        for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            let key = name.to_uppercase().replace('-', "_");
            let field = |f: &str| lookup(&format!("{}_{}", key, f));

            let host = field("HOST").ok_or_else(|| {
                SearchError::Configuration(format!("{}_{}_HOST is not set", prefix, key))
            })?;
            let mut endpoint = EndpointConfig {
                name: name.to_string(),
                host,
                username: field("USERNAME"),
                password: field("PASSWORD"),
                ..Default::default()
            };

            let port = field("PORT").ok_or_else(|| {
                SearchError::Configuration(format!("{}_{}_PORT is not set", prefix, key))
            })?;
            endpoint.port = parse_number(&port, "PORT")?;
            if let Some(scheme) = field("SCHEME") {
                endpoint.scheme = Scheme::parse(&scheme).ok_or_else(|| {
                    SearchError::Configuration(format!("unknown scheme '{}'", scheme))
                })?;
            }
            if let Some(ms) = field("CONNECT_TIMEOUT") {
                endpoint.connect_timeout =
                    Duration::from_millis(parse_number(&ms, "CONNECT_TIMEOUT")?);
            }
            if let Some(ms) = field("SOCKET_TIMEOUT") {
                endpoint.socket_timeout =
                    Duration::from_millis(parse_number(&ms, "SOCKET_TIMEOUT")?);
            }
            if let Some(ms) = field("REQUEST_QUEUE_TIMEOUT") {
                endpoint.request_queue_timeout =
                    Duration::from_millis(parse_number(&ms, "REQUEST_QUEUE_TIMEOUT")?);
            }
            if let Some(max) = field("MAX_CONNECTIONS") {
                endpoint.max_connections = parse_number(&max, "MAX_CONNECTIONS")?;
            }

            config.endpoints.push(endpoint);
        }

        Ok(config)
    }

    /// Check the configuration and return the primary endpoint name.
    pub fn validate(&self) -> Result<String> {
        let first = self.endpoints.first().ok_or_else(|| {
            SearchError::Configuration("at least one endpoint is required".to_string())
        })?;

        let mut seen = HashSet::new();
        for endpoint in &self.endpoints {
            endpoint.validate()?;
            if !seen.insert(endpoint.name.as_str()) {
                return Err(SearchError::Configuration(format!(
                    "duplicate endpoint name '{}'",
                    endpoint.name
                )));
            }
        }

        match &self.primary {
            Some(primary) if !seen.contains(primary.as_str()) => Err(SearchError::Configuration(
                format!("primary endpoint '{}' is not configured", primary),
            )),
            Some(primary) => Ok(primary.clone()),
            None => Ok(first.name.clone()),
        }
    }
}

fn parse_number<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| SearchError::Configuration(format!("invalid {} value '{}'", what, raw)))
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
