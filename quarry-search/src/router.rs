//! Endpoint router.
//!
//! Holds one [`SearchClient`] (and so one connection pool) per configured
//! endpoint and hands out handles by name.

use crate::{
    client::SearchClient,
    config::RouterConfig,
    error::{Result, SearchError},
};
use std::collections::HashMap;

/// Resolves logical endpoint names to live handles.
#[derive(Clone)]
pub struct EndpointRouter {
    clients: HashMap<String, SearchClient>,
    order: Vec<String>,
    primary: SearchClient,
}

impl EndpointRouter {
    /// Validate the configuration and build one pool per endpoint.
    pub fn new(config: RouterConfig) -> Result<Self> {
        let primary_name = config.validate()?;

        let mut clients = HashMap::with_capacity(config.endpoints.len());
        let mut order = Vec::with_capacity(config.endpoints.len());
        for endpoint in config.endpoints {
            let name = endpoint.name.clone();
            clients.insert(name.clone(), SearchClient::connect(endpoint)?);
            order.push(name);
        }

        let primary = clients
            .get(&primary_name)
            .cloned()
            .ok_or_else(|| SearchError::UnknownEndpoint(primary_name.clone()))?;

        Ok(Self {
            clients,
            order,
            primary,
        })
    }

    /// Handle for `name`.
    pub fn resolve(&self, name: &str) -> Result<SearchClient> {
        self.clients
            .get(name)
            .cloned()
            .ok_or_else(|| SearchError::UnknownEndpoint(name.to_string()))
    }

    /// Handle for `name`, or the primary when `None`.
    pub fn resolve_or_primary(&self, name: Option<&str>) -> Result<SearchClient> {
        match name {
            Some(name) => self.resolve(name),
            None => Ok(self.primary()),
        }
    }

    /// Handle for the primary endpoint.
    pub fn primary(&self) -> SearchClient {
        self.primary.clone()
    }

    /// Name of the primary endpoint.
    pub fn primary_name(&self) -> &str {
        self.primary.name()
    }

    /// Endpoint names in configuration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

impl std::fmt::Debug for EndpointRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointRouter")
            .field("endpoints", &self.order)
            .field("primary", &self.primary.name())
            .finish()
    }
}
