//! Live connection handle for one endpoint.

use crate::{
    codec,
    config::EndpointConfig,
    document::Document,
    error::{Result, SearchError},
    index::IndexManager,
    mutation::MutationController,
    query::Query,
    scroll::ScrollCursor,
    search::{QueryExplanation, QueryValidation, SearchRequest, SearchResponse},
};
use opensearch::{
    OpenSearch,
    http::{
        response::Response,
        transport::{SingleNodeConnectionPool, TransportBuilder},
    },
};
use quarry_log::{debug, info, warn};
use serde_json::{Value, json};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// A cheap, cloneable handle to one endpoint's connection pool.
///
/// Every call first takes one of the endpoint's `max_connections` slots,
/// waiting at most `request_queue_timeout`, then runs under
/// `connect_timeout + socket_timeout`. Calls are never retried. Dropping a
/// call's future releases its slot; the pool decides whether the socket
/// is reused.
#[derive(Clone)]
pub struct SearchClient {
    transport: Arc<OpenSearch>,
    config: Arc<EndpointConfig>,
    slots: Arc<Semaphore>,
}

/// Status and parsed body of one exchange.
#[derive(Debug, Clone)]
pub(crate) struct Reply {
    pub status: u16,
    pub body: Value,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body of a successful reply, or the mapped error.
    pub fn into_success(self) -> Result<Value> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(codec::rejection(self.status, &self.body))
        }
    }
}

impl SearchClient {
    /// Build a client for one endpoint.
    pub fn connect(config: EndpointConfig) -> Result<Self> {
        let url = opensearch::http::Url::parse(&config.url())
            .map_err(|e| SearchError::Configuration(format!("Invalid URL: {}", e)))?;

        let conn_pool = SingleNodeConnectionPool::new(url);
        let mut builder = TransportBuilder::new(conn_pool)
            .timeout(config.call_timeout())
            .disable_proxy();

        if let Some((user, pass)) = config.credentials() {
            builder = builder.auth(opensearch::auth::Credentials::Basic(
                user.to_string(),
                pass.to_string(),
            ));
        }

        #[cfg(any(feature = "rustls", feature = "native-tls"))]
        if config.accept_invalid_certs {
            builder = builder.cert_validation(opensearch::cert::CertificateValidation::None);
        }

        let transport = builder
            .build()
            .map_err(|e| SearchError::Configuration(e.to_string()))?;

        info!(endpoint = config.name, url = config.url(); "endpoint registered");

        Ok(Self {
            transport: Arc::new(OpenSearch::new(transport)),
            slots: Arc::new(Semaphore::new(config.max_connections)),
            config: Arc::new(config),
        })
    }

    /// Endpoint name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Endpoint configuration.
    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    /// Get the underlying cluster client.
    pub fn inner(&self) -> &OpenSearch {
        &self.transport
    }

    /// Get an index manager for index operations.
    pub fn indices(&self) -> IndexManager {
        IndexManager::new(self.clone())
    }

    /// Get a mutation controller for document writes.
    pub fn documents(&self) -> MutationController {
        MutationController::new(self.clone())
    }

    /// Run one exchange under the endpoint's slot and timeout policy.
    pub(crate) async fn execute<F>(&self, operation: &str, target: &str, send: F) -> Result<Reply>
    where
        F: Future<Output = std::result::Result<Response, opensearch::Error>>,
    {
        debug!(endpoint = self.name(), operation = operation, target = target; "sending request");

        let queue_timeout = self.config.request_queue_timeout;
        let _slot = match tokio::time::timeout(queue_timeout, self.slots.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(SearchError::Transport("connection pool closed".to_string())),
            Err(_) => {
                warn!(endpoint = self.name(), operation = operation; "no free connection slot");
                return Err(SearchError::Timeout(queue_timeout));
            }
        };

        let call_timeout = self.config.call_timeout();
        let exchange = async {
            let response = send.await?;
            let status = response.status_code().as_u16();
            let text = response.text().await?;
            Ok::<_, opensearch::Error>((status, text))
        };

        let (status, text) = match tokio::time::timeout(call_timeout, exchange).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) if e.is_timeout() => {
                warn!(endpoint = self.name(), operation = operation; "request timed out");
                return Err(SearchError::Timeout(call_timeout));
            }
            Ok(Err(e)) => {
                warn!(endpoint = self.name(), operation = operation; "transport failure: {}", e);
                return Err(e.into());
            }
            Err(_) => {
                warn!(endpoint = self.name(), operation = operation; "request timed out");
                return Err(SearchError::Timeout(call_timeout));
            }
        };

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        if !(200..300).contains(&status) && status != 404 {
            warn!(endpoint = self.name(), operation = operation, status = status; "request rejected");
        }

        Ok(Reply { status, body })
    }

    // =========================================================================
    // Search Operations
    // =========================================================================

    /// Run a search and decode hits and aggregations.
    pub async fn search<T: Document>(&self, request: &SearchRequest) -> Result<SearchResponse<T>> {
        let body = codec::encode_search(request)?;
        let index_refs: Vec<&str> = request.indices.iter().map(String::as_str).collect();
        let keep_alive = request.scroll.map(codec::time_value);

        let mut search = self
            .transport
            .search(opensearch::SearchParts::Index(&index_refs))
            .body(body);
        if let Some(keep_alive) = keep_alive.as_deref() {
            search = search.scroll(keep_alive);
        }

        let reply = self
            .execute("search", &index_refs.join(","), search.send())
            .await?;
        let body = reply.into_success()?;

        let response = codec::decode_search(&body, &request.aggregations)?;
        debug!(endpoint = self.name(), hits = response.hits.len(), took_ms = response.took_ms; "search finished");
        Ok(response)
    }

    /// Prepare a scroll over `request`. Nothing is sent until the cursor opens.
    pub fn scroll<T: Document>(&self, request: SearchRequest) -> Result<ScrollCursor<T>> {
        request.validate()?;
        if request.scroll.is_none() {
            return Err(SearchError::invalid("scroll requires a keep-alive duration"));
        }
        Ok(ScrollCursor::new(self.clone(), request))
    }

    /// Count documents matching `query` (all documents when `None`).
    pub async fn count(&self, index: &str, query: Option<&Query>) -> Result<u64> {
        let body = match query {
            Some(query) => json!({ "query": query.to_json() }),
            None => json!({}),
        };

        let indices = [index];
        let send = self
            .transport
            .count(opensearch::CountParts::Index(&indices))
            .body(body)
            .send();
        let result = self.execute("count", index, send).await?.into_success()?;

        result["count"]
            .as_u64()
            .ok_or_else(|| SearchError::malformed("count reply without count"))
    }

    /// Ask the cluster whether `query` is valid for `index`, with explanations.
    pub async fn validate_query(&self, index: &str, query: &Query) -> Result<QueryValidation> {
        let indices = [index];
        let namespace = self.transport.indices();
        let send = namespace
            .validate_query(opensearch::indices::IndicesValidateQueryParts::Index(&indices))
            .explain(true)
            .body(json!({ "query": query.to_json() }))
            .send();
        let result = self
            .execute("validate_query", index, send)
            .await?
            .into_success()?;

        let valid = result["valid"]
            .as_bool()
            .ok_or_else(|| SearchError::malformed("validation reply without valid flag"))?;
        let explanations = result["explanations"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .map(|e| QueryExplanation {
                        index: e["index"].as_str().map(String::from),
                        valid: e["valid"].as_bool().unwrap_or(valid),
                        explanation: e["explanation"].as_str().map(String::from),
                        error: e["error"].as_str().map(String::from),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(QueryValidation {
            valid,
            explanations,
        })
    }

    // =========================================================================
    // Cluster Operations
    // =========================================================================

    /// Get cluster health.
    pub async fn health(&self) -> Result<ClusterHealth> {
        let cluster = self.transport.cluster();
        let send = cluster
            .health(opensearch::cluster::ClusterHealthParts::None)
            .send();
        let body = self.execute("health", "_cluster", send).await?.into_success()?;

        let status = body["status"]
            .as_str()
            .and_then(HealthStatus::parse)
            .ok_or_else(|| SearchError::malformed("health reply without status"))?;

        Ok(ClusterHealth {
            cluster_name: body["cluster_name"].as_str().unwrap_or_default().to_string(),
            status,
            number_of_nodes: body["number_of_nodes"].as_u64().unwrap_or(0),
            active_shards: body["active_shards"].as_u64().unwrap_or(0),
            unassigned_shards: body["unassigned_shards"].as_u64().unwrap_or(0),
        })
    }

    /// Ping the cluster.
    pub async fn ping(&self) -> Result<bool> {
        let send = self.transport.ping().send();
        match self.execute("ping", "/", send).await {
            Ok(reply) => Ok(reply.is_success()),
            Err(SearchError::Transport(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl std::fmt::Debug for SearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchClient")
            .field("name", &self.config.name)
            .field("url", &self.config.url())
            .finish()
    }
}

/// Cluster health colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// All shards allocated.
    Green,
    /// Primaries allocated, some replicas not.
    Yellow,
    /// Some primaries unallocated.
    Red,
}

impl HealthStatus {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "green" => Some(HealthStatus::Green),
            "yellow" => Some(HealthStatus::Yellow),
            "red" => Some(HealthStatus::Red),
            _ => None,
        }
    }
}

/// Cluster health summary.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterHealth {
    /// Cluster name.
    pub cluster_name: String,
    /// Health colour.
    pub status: HealthStatus,
    /// Number of nodes.
    pub number_of_nodes: u64,
    /// Active shards.
    pub active_shards: u64,
    /// Unassigned shards.
    pub unassigned_shards: u64,
}
