//! Index and alias administration.

use crate::{
    client::SearchClient,
    error::{Result, SearchError},
    mutation::failure_reasons,
};
use quarry_log::{debug, info, warn};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// Index administration through one endpoint.
#[derive(Debug, Clone)]
pub struct IndexManager {
    client: SearchClient,
}

impl IndexManager {
    pub(crate) fn new(client: SearchClient) -> Self {
        Self { client }
    }

    /// Create an index.
    pub async fn create(&self, name: &str, settings: IndexSettings) -> Result<()> {
        info!(endpoint = self.client.name(), index = name; "creating index");

        let namespace = self.client.inner().indices();
        let send = namespace
            .create(opensearch::indices::IndicesCreateParts::Index(name))
            .body(settings.to_json())
            .send();
        self.client.execute("create_index", name, send).await?.into_success()?;
        Ok(())
    }

    /// Delete an index.
    pub async fn delete(&self, name: &str) -> Result<()> {
        info!(endpoint = self.client.name(), index = name; "deleting index");

        let indices = [name];
        let namespace = self.client.inner().indices();
        let send = namespace
            .delete(opensearch::indices::IndicesDeleteParts::Index(&indices))
            .send();
        self.client.execute("delete_index", name, send).await?.into_success()?;
        Ok(())
    }

    /// Check if an index exists.
    pub async fn exists(&self, name: &str) -> Result<bool> {
        let indices = [name];
        let namespace = self.client.inner().indices();
        let send = namespace
            .exists(opensearch::indices::IndicesExistsParts::Index(&indices))
            .send();
        let reply = self.client.execute("index_exists", name, send).await?;
        match reply.status {
            404 => Ok(false),
            _ => reply.into_success().map(|_| true),
        }
    }

    /// Make recent writes to `name` visible to search.
    pub async fn refresh(&self, name: &str) -> Result<()> {
        debug!(index = name; "refreshing index");

        let indices = [name];
        let namespace = self.client.inner().indices();
        let send = namespace
            .refresh(opensearch::indices::IndicesRefreshParts::Index(&indices))
            .send();
        self.client.execute("refresh", name, send).await?.into_success()?;
        Ok(())
    }

    /// List indices with their health and document counts.
    pub async fn list(&self) -> Result<Vec<IndexInfo>> {
        let namespace = self.client.inner().cat();
        let send = namespace
            .indices(opensearch::cat::CatIndicesParts::None)
            .format("json")
            .send();
        let body = self.client.execute("cat_indices", "_cat", send).await?.into_success()?;

        let rows = body
            .as_array()
            .ok_or_else(|| SearchError::malformed("cat indices reply is not an array"))?;
        Ok(rows.iter().map(IndexInfo::from_json).collect())
    }

    /// List cluster nodes.
    pub async fn nodes(&self) -> Result<Vec<NodeInfo>> {
        let namespace = self.client.inner().cat();
        let send = namespace.nodes().format("json").send();
        let body = self.client.execute("cat_nodes", "_cat", send).await?.into_success()?;

        let rows = body
            .as_array()
            .ok_or_else(|| SearchError::malformed("cat nodes reply is not an array"))?;
        Ok(rows.iter().map(NodeInfo::from_json).collect())
    }

    /// List every alias and the index it points at.
    pub async fn list_aliases(&self) -> Result<Vec<AliasInfo>> {
        let namespace = self.client.inner().cat();
        let send = namespace
            .aliases(opensearch::cat::CatAliasesParts::None)
            .format("json")
            .send();
        let body = self.client.execute("cat_aliases", "_cat", send).await?.into_success()?;

        let rows = body
            .as_array()
            .ok_or_else(|| SearchError::malformed("cat aliases reply is not an array"))?;
        Ok(rows
            .iter()
            .map(|row| AliasInfo {
                alias: row["alias"].as_str().unwrap_or_default().to_string(),
                index: row["index"].as_str().unwrap_or_default().to_string(),
            })
            .collect())
    }

    /// Copy every document of `source` into `dest` and wait for it to finish.
    ///
    /// Usually followed by [`update_aliases`](Self::update_aliases) to move
    /// readers onto `dest`.
    pub async fn reindex(&self, source: &str, dest: &str) -> Result<ReindexReport> {
        info!(source = source, dest = dest; "reindexing");

        let send = self
            .client
            .inner()
            .reindex()
            .refresh(true)
            .wait_for_completion(true)
            .body(json!({ "source": { "index": source }, "dest": { "index": dest } }))
            .send();
        let body = self.client.execute("reindex", dest, send).await?.into_success()?;

        let report = ReindexReport::from_json(&body)?;
        if !report.failures.is_empty() {
            warn!(source = source, dest = dest, failures = report.failures.len(); "reindex had failures");
        }
        Ok(report)
    }

    // =========================================================================
    // Aliases
    // =========================================================================

    /// Point `alias` at `index`.
    pub async fn put_alias(&self, index: &str, alias: &str) -> Result<()> {
        info!(index = index, alias = alias; "adding alias");

        let indices = [index];
        let namespace = self.client.inner().indices();
        let send = namespace
            .put_alias(opensearch::indices::IndicesPutAliasParts::IndexName(&indices, alias))
            .send();
        self.client.execute("put_alias", index, send).await?.into_success()?;
        Ok(())
    }

    /// Remove `alias` from `index`.
    pub async fn delete_alias(&self, index: &str, alias: &str) -> Result<()> {
        info!(index = index, alias = alias; "removing alias");

        let indices = [index];
        let aliases = [alias];
        let namespace = self.client.inner().indices();
        let send = namespace
            .delete_alias(opensearch::indices::IndicesDeleteAliasParts::IndexName(
                &indices, &aliases,
            ))
            .send();
        self.client.execute("delete_alias", index, send).await?.into_success()?;
        Ok(())
    }

    /// Apply alias actions atomically.
    ///
    /// Moving an alias from one index to another in a single call means
    /// readers never see it missing or doubled.
    pub async fn update_aliases(&self, actions: &[AliasAction]) -> Result<()> {
        if actions.is_empty() {
            return Err(SearchError::invalid("alias update needs at least one action"));
        }
        info!(actions = actions.len(); "updating aliases");

        let body = json!({ "actions": actions.iter().map(AliasAction::to_json).collect::<Vec<_>>() });
        let namespace = self.client.inner().indices();
        let send = namespace
            .update_aliases()
            .body(body)
            .send();
        self.client.execute("update_aliases", "_aliases", send).await?.into_success()?;
        Ok(())
    }

    /// Aliases of each given index, keyed by index name.
    pub async fn get_aliases(&self, indices: &[&str]) -> Result<BTreeMap<String, Vec<String>>> {
        let namespace = self.client.inner().indices();
        let send = namespace
            .get_alias(opensearch::indices::IndicesGetAliasParts::Index(indices))
            .send();
        let body = self
            .client
            .execute("get_alias", &indices.join(","), send)
            .await?
            .into_success()?;

        let by_index = body
            .as_object()
            .ok_or_else(|| SearchError::malformed("alias reply is not an object"))?;
        Ok(by_index
            .iter()
            .map(|(index, entry)| {
                let aliases = entry["aliases"]
                    .as_object()
                    .map(|a| a.keys().cloned().collect())
                    .unwrap_or_default();
                (index.clone(), aliases)
            })
            .collect())
    }
}

/// One step of an atomic alias update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasAction {
    /// Point `alias` at `index`.
    Add {
        /// Index name.
        index: String,
        /// Alias name.
        alias: String,
    },
    /// Remove `alias` from `index`.
    Remove {
        /// Index name.
        index: String,
        /// Alias name.
        alias: String,
    },
}

impl AliasAction {
    /// Add action.
    pub fn add(index: impl Into<String>, alias: impl Into<String>) -> Self {
        AliasAction::Add {
            index: index.into(),
            alias: alias.into(),
        }
    }

    /// Remove action.
    pub fn remove(index: impl Into<String>, alias: impl Into<String>) -> Self {
        AliasAction::Remove {
            index: index.into(),
            alias: alias.into(),
        }
    }

    fn to_json(&self) -> Value {
        match self {
            AliasAction::Add { index, alias } => {
                json!({ "add": { "index": index, "alias": alias } })
            }
            AliasAction::Remove { index, alias } => {
                json!({ "remove": { "index": index, "alias": alias } })
            }
        }
    }
}

/// Settings, mappings and aliases for a new index.
#[derive(Debug, Clone, Default)]
pub struct IndexSettings {
    /// Number of shards.
    pub number_of_shards: Option<u32>,
    /// Number of replicas.
    pub number_of_replicas: Option<u32>,
    /// Refresh interval, e.g. `1s` or `-1`.
    pub refresh_interval: Option<String>,
    /// Field mappings.
    pub mappings: Option<Mapping>,
    /// Aliases created with the index.
    pub aliases: Vec<String>,
}

impl IndexSettings {
    /// Empty settings; the cluster defaults apply.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set number of shards.
    pub fn shards(mut self, shards: u32) -> Self {
        self.number_of_shards = Some(shards);
        self
    }

    /// Set number of replicas.
    pub fn replicas(mut self, replicas: u32) -> Self {
        self.number_of_replicas = Some(replicas);
        self
    }

    /// Set refresh interval.
    pub fn refresh_interval(mut self, interval: impl Into<String>) -> Self {
        self.refresh_interval = Some(interval.into());
        self
    }

    /// Set mappings.
    pub fn mappings(mut self, mappings: Mapping) -> Self {
        self.mappings = Some(mappings);
        self
    }

    /// Add an alias.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    fn to_json(&self) -> Value {
        let mut body = Map::new();
        let mut settings = Map::new();

        if let Some(shards) = self.number_of_shards {
            settings.insert("number_of_shards".to_string(), json!(shards));
        }
        if let Some(replicas) = self.number_of_replicas {
            settings.insert("number_of_replicas".to_string(), json!(replicas));
        }
        if let Some(interval) = &self.refresh_interval {
            settings.insert("refresh_interval".to_string(), json!(interval));
        }
        if !settings.is_empty() {
            body.insert("settings".to_string(), Value::Object(settings));
        }

        if let Some(mappings) = &self.mappings {
            body.insert("mappings".to_string(), mappings.to_json());
        }

        if !self.aliases.is_empty() {
            let aliases: Map<String, Value> = self
                .aliases
                .iter()
                .map(|a| (a.clone(), json!({})))
                .collect();
            body.insert("aliases".to_string(), Value::Object(aliases));
        }

        Value::Object(body)
    }
}

/// Field mappings of an index.
#[derive(Debug, Clone, Default)]
pub struct Mapping {
    properties: BTreeMap<String, MappingField>,
}

impl Mapping {
    /// Create an empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field.
    pub fn field(mut self, name: impl Into<String>, field: MappingField) -> Self {
        self.properties.insert(name.into(), field);
        self
    }

    fn to_json(&self) -> Value {
        let properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|(name, field)| (name.clone(), field.to_json()))
            .collect();
        json!({ "properties": properties })
    }
}

/// A single field mapping.
#[derive(Debug, Clone)]
pub struct MappingField {
    field_type: FieldType,
    analyzer: Option<String>,
    format: Option<String>,
    fields: BTreeMap<String, MappingField>,
}

impl MappingField {
    /// Field of the given type.
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            analyzer: None,
            format: None,
            fields: BTreeMap::new(),
        }
    }

    /// Analysed text.
    pub fn text() -> Self {
        Self::new(FieldType::Text)
    }

    /// Exact-match keyword.
    pub fn keyword() -> Self {
        Self::new(FieldType::Keyword)
    }

    /// Date.
    pub fn date() -> Self {
        Self::new(FieldType::Date)
    }

    /// Geo point.
    pub fn geo_point() -> Self {
        Self::new(FieldType::GeoPoint)
    }

    /// Geo shape.
    pub fn geo_shape() -> Self {
        Self::new(FieldType::GeoShape)
    }

    /// Set analyzer.
    pub fn analyzer(mut self, analyzer: impl Into<String>) -> Self {
        self.analyzer = Some(analyzer.into());
        self
    }

    /// Set the date format.
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Add a multi-field, e.g. a `keyword` sub-field of a text field.
    pub fn sub_field(mut self, name: impl Into<String>, field: MappingField) -> Self {
        self.fields.insert(name.into(), field);
        self
    }

    fn to_json(&self) -> Value {
        let mut field = Map::new();
        field.insert("type".to_string(), json!(self.field_type.as_str()));
        if let Some(analyzer) = &self.analyzer {
            field.insert("analyzer".to_string(), json!(analyzer));
        }
        if let Some(format) = &self.format {
            field.insert("format".to_string(), json!(format));
        }
        if !self.fields.is_empty() {
            let fields: Map<String, Value> = self
                .fields
                .iter()
                .map(|(name, f)| (name.clone(), f.to_json()))
                .collect();
            field.insert("fields".to_string(), Value::Object(fields));
        }
        Value::Object(field)
    }
}

/// Field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Full-text searchable field.
    Text,
    /// Exact match keyword field.
    Keyword,
    /// 64-bit integer.
    Long,
    /// 32-bit integer.
    Integer,
    /// Double precision float.
    Double,
    /// Single precision float.
    Float,
    /// Boolean.
    Boolean,
    /// Date.
    Date,
    /// Geo point.
    GeoPoint,
    /// Geo shape.
    GeoShape,
    /// Nested object.
    Nested,
    /// Object.
    Object,
}

impl FieldType {
    fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Keyword => "keyword",
            FieldType::Long => "long",
            FieldType::Integer => "integer",
            FieldType::Double => "double",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::GeoPoint => "geo_point",
            FieldType::GeoShape => "geo_shape",
            FieldType::Nested => "nested",
            FieldType::Object => "object",
        }
    }
}

/// One row of the index listing.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexInfo {
    /// Index name.
    pub name: String,
    /// Health colour.
    pub health: String,
    /// `open` or `close`.
    pub status: String,
    /// Document count.
    pub docs_count: u64,
    /// Store size, human readable.
    pub store_size: String,
}

impl IndexInfo {
    fn from_json(row: &Value) -> Self {
        let text = |key: &str| row[key].as_str().unwrap_or_default().to_string();
        Self {
            name: text("index"),
            health: text("health"),
            status: text("status"),
            docs_count: row["docs.count"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .or_else(|| row["docs.count"].as_u64())
                .unwrap_or(0),
            store_size: text("store.size"),
        }
    }
}

/// One row of the node listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Node name.
    pub name: String,
    /// Node address.
    pub ip: String,
    /// Role letters, e.g. `dimr`.
    pub roles: String,
    /// Whether this node is the elected cluster manager.
    pub is_manager: bool,
}

impl NodeInfo {
    fn from_json(row: &Value) -> Self {
        let text = |key: &str| row[key].as_str().unwrap_or_default().to_string();
        // Older clusters call the column `master`.
        let elected = row["cluster_manager"].as_str().or_else(|| row["master"].as_str());
        Self {
            name: text("name"),
            ip: text("ip"),
            roles: text("node.role"),
            is_manager: elected == Some("*"),
        }
    }
}

/// An alias and the index behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasInfo {
    /// Alias name.
    pub alias: String,
    /// Index name.
    pub index: String,
}

/// Outcome of a reindex.
#[derive(Debug, Clone, PartialEq)]
pub struct ReindexReport {
    /// Documents read from the source.
    pub total: u64,
    /// Documents created in the destination.
    pub created: u64,
    /// Documents overwritten in the destination.
    pub updated: u64,
    /// Scroll batches pulled from the source.
    pub batches: u64,
    /// Documents skipped on version conflicts.
    pub version_conflicts: u64,
    /// Per-document failure reasons.
    pub failures: Vec<String>,
    /// Time taken in milliseconds.
    pub took_ms: u64,
}

impl ReindexReport {
    fn from_json(body: &Value) -> Result<Self> {
        let total = body["total"]
            .as_u64()
            .ok_or_else(|| SearchError::malformed("reindex reply without total"))?;
        Ok(Self {
            total,
            created: body["created"].as_u64().unwrap_or(0),
            updated: body["updated"].as_u64().unwrap_or(0),
            batches: body["batches"].as_u64().unwrap_or(0),
            version_conflicts: body["version_conflicts"].as_u64().unwrap_or(0),
            failures: failure_reasons(body),
            took_ms: body["took"].as_u64().unwrap_or(0),
        })
    }
}
