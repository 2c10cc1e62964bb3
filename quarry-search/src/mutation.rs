//! Document writes with optimistic concurrency.
//!
//! Version checks happen on the cluster: when a write carries an expected
//! [`VersionToken`] it is sent as `if_seq_no`/`if_primary_term`, and a stale
//! token comes back as [`SearchError::VersionConflict`] with nothing
//! written. Bulk writes report one [`BulkOutcome`] per operation instead of
//! failing as a whole.

use crate::{
    client::{Reply, SearchClient},
    codec,
    document::{Document, DocumentMeta, Fields, Hit, MutationRecord, VersionToken, decode_source},
    error::{Result, SearchError},
    query::Query,
};
use opensearch::http::request::JsonBody;
use opensearch::params::{Conflicts, Refresh};
use quarry_log::{debug, warn};
use serde_json::{Value, json};

/// When writes become visible to search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPolicy {
    /// Refresh the affected shards immediately.
    Immediate,
    /// Wait for the next scheduled refresh.
    WaitFor,
    /// Do not refresh.
    None,
}

impl RefreshPolicy {
    fn to_param(self) -> Refresh {
        match self {
            RefreshPolicy::Immediate => Refresh::True,
            RefreshPolicy::WaitFor => Refresh::WaitFor,
            RefreshPolicy::None => Refresh::False,
        }
    }
}

/// How `create` treats an existing id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreateMode {
    /// Fail with a version conflict if the id exists.
    #[default]
    CreateOnly,
    /// Replace any existing document.
    Upsert,
}

/// Outcome of a single write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    /// A new document was stored.
    Created,
    /// An existing document was replaced or changed.
    Updated,
    /// The document was removed.
    Deleted,
    /// The write changed nothing.
    Noop,
}

impl WriteResult {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(WriteResult::Created),
            "updated" => Some(WriteResult::Updated),
            "deleted" => Some(WriteResult::Deleted),
            "noop" => Some(WriteResult::Noop),
            _ => None,
        }
    }
}

/// Acknowledgement of a successful write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteAck {
    /// Index written to.
    pub index: String,
    /// Document id (assigned by the cluster when none was given).
    pub id: String,
    /// Revision after the write.
    pub version: VersionToken,
    /// What the write did.
    pub result: WriteResult,
}

impl WriteAck {
    fn from_json(body: &Value) -> Result<Self> {
        let id = body["_id"]
            .as_str()
            .ok_or_else(|| SearchError::malformed("write reply without _id"))?;
        let version = VersionToken::from_json(body)
            .ok_or_else(|| SearchError::malformed("write reply without version token"))?;
        let result = body["result"]
            .as_str()
            .and_then(WriteResult::parse)
            .ok_or_else(|| SearchError::malformed("write reply without result"))?;

        Ok(Self {
            index: body["_index"].as_str().unwrap_or_default().to_string(),
            id: id.to_string(),
            version,
            result,
        })
    }
}

/// One operation in a bulk batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOperation {
    /// Store a document, replacing any existing one.
    Index {
        /// Target index.
        index: String,
        /// Document id; assigned by the cluster when absent.
        id: Option<String>,
        /// Document body.
        doc: Fields,
        /// Expected current revision.
        expected: Option<VersionToken>,
    },
    /// Store a document, failing if the id exists.
    Create {
        /// Target index.
        index: String,
        /// Document id; assigned by the cluster when absent.
        id: Option<String>,
        /// Document body.
        doc: Fields,
    },
    /// Merge fields into an existing document.
    Update {
        /// Target index.
        index: String,
        /// Document id.
        id: String,
        /// Fields to overwrite.
        partial: Fields,
        /// Expected current revision.
        expected: Option<VersionToken>,
    },
    /// Remove a document.
    Delete {
        /// Target index.
        index: String,
        /// Document id.
        id: String,
        /// Expected current revision.
        expected: Option<VersionToken>,
    },
}

impl BulkOperation {
    /// Build an operation from a record.
    pub fn from_record<T: Document>(record: MutationRecord<T>, mode: CreateMode) -> Result<Self> {
        let doc = record.body.to_fields()?;
        match mode {
            CreateMode::CreateOnly => {
                if record.expected_version.is_some() {
                    return Err(SearchError::invalid(
                        "create-only writes cannot carry an expected version",
                    ));
                }
                Ok(BulkOperation::Create {
                    index: record.index,
                    id: record.id,
                    doc,
                })
            }
            CreateMode::Upsert => Ok(BulkOperation::Index {
                index: record.index,
                id: record.id,
                doc,
                expected: record.expected_version,
            }),
        }
    }

    /// Merge `partial` into document `id`.
    pub fn update(index: impl Into<String>, id: impl Into<String>, partial: Fields) -> Self {
        BulkOperation::Update {
            index: index.into(),
            id: id.into(),
            partial,
            expected: None,
        }
    }

    /// Remove document `id`.
    pub fn delete(index: impl Into<String>, id: impl Into<String>) -> Self {
        BulkOperation::Delete {
            index: index.into(),
            id: id.into(),
            expected: None,
        }
    }

    /// Only apply if the stored document is at `token`.
    pub fn with_expected(mut self, token: VersionToken) -> Self {
        match &mut self {
            BulkOperation::Index { expected, .. }
            | BulkOperation::Update { expected, .. }
            | BulkOperation::Delete { expected, .. } => *expected = Some(token),
            BulkOperation::Create { .. } => {}
        }
        self
    }

    fn target(&self) -> (&str, Option<&str>) {
        match self {
            BulkOperation::Index { index, id, .. } | BulkOperation::Create { index, id, .. } => {
                (index, id.as_deref())
            }
            BulkOperation::Update { index, id, .. } | BulkOperation::Delete { index, id, .. } => {
                (index, Some(id))
            }
        }
    }

    /// Convert to bulk request lines.
    fn to_bulk_lines(&self) -> Vec<Value> {
        let (index, id) = self.target();
        let mut action = json!({ "_index": index });
        if let Some(id) = id {
            action["_id"] = json!(id);
        }
        let expected = match self {
            BulkOperation::Index { expected, .. }
            | BulkOperation::Update { expected, .. }
            | BulkOperation::Delete { expected, .. } => *expected,
            BulkOperation::Create { .. } => None,
        };
        if let Some(token) = expected {
            action["if_seq_no"] = json!(token.seq_no);
            action["if_primary_term"] = json!(token.primary_term);
        }

        match self {
            BulkOperation::Index { doc, .. } => {
                vec![json!({ "index": action }), Value::Object(doc.clone())]
            }
            BulkOperation::Create { doc, .. } => {
                vec![json!({ "create": action }), Value::Object(doc.clone())]
            }
            BulkOperation::Update { partial, .. } => {
                vec![json!({ "update": action }), json!({ "doc": partial })]
            }
            BulkOperation::Delete { .. } => vec![json!({ "delete": action })],
        }
    }
}

/// Per-operation result of a bulk batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOutcome {
    /// The operation was applied.
    Success(WriteAck),
    /// The expected version did not match, or a create hit an existing id.
    VersionConflict {
        /// Document id.
        id: Option<String>,
        /// Cluster reason text.
        reason: String,
    },
    /// The document did not exist.
    NotFound {
        /// Index name.
        index: String,
        /// Document id.
        id: String,
    },
    /// Any other per-item failure.
    Failed {
        /// Item status code.
        status: u16,
        /// Cluster error type.
        error_type: String,
        /// Cluster reason text.
        reason: String,
    },
}

impl BulkOutcome {
    /// Whether the operation was applied.
    pub fn is_success(&self) -> bool {
        matches!(self, BulkOutcome::Success(_))
    }

    fn from_item(item: &Value, op: &BulkOperation) -> Result<Self> {
        let result = item
            .as_object()
            .and_then(|o| o.values().next())
            .ok_or_else(|| SearchError::malformed("bulk item without an action"))?;
        let status = result["status"]
            .as_u64()
            .ok_or_else(|| SearchError::malformed("bulk item without status"))? as u16;
        let (index, id) = op.target();

        if (200..300).contains(&status) {
            return WriteAck::from_json(result).map(BulkOutcome::Success);
        }

        match codec::rejection(status, result) {
            SearchError::VersionConflict(reason) => Ok(BulkOutcome::VersionConflict {
                id: id.map(String::from),
                reason,
            }),
            SearchError::RemoteRejected { error_type, .. }
                if status == 404 && error_type != "index_not_found_exception" =>
            {
                Ok(BulkOutcome::NotFound {
                    index: index.to_string(),
                    id: id.unwrap_or_default().to_string(),
                })
            }
            SearchError::RemoteRejected {
                status,
                error_type,
                reason,
            } => Ok(BulkOutcome::Failed {
                status,
                error_type,
                reason,
            }),
            other => Ok(BulkOutcome::Failed {
                status,
                error_type: "unknown".to_string(),
                reason: other.to_string(),
            }),
        }
    }
}

/// Server-side script applied by [`MutationController::update_by_query`].
///
/// The script is passed through to the cluster unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMutation {
    script: ScriptSource,
    params: Fields,
    conflicts: ConflictPolicy,
}

/// Where a script comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptSource {
    /// Source sent with the request.
    Inline {
        /// Script text.
        source: String,
        /// Script language; the cluster default when `None`.
        lang: Option<String>,
    },
    /// Script stored on the cluster under an id.
    Stored(String),
}

/// What update-by-query does when a document changes underneath it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Stop at the first conflict.
    #[default]
    Abort,
    /// Count conflicts and continue.
    Proceed,
}

impl FieldMutation {
    /// Inline script.
    pub fn inline(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        if source.trim().is_empty() {
            return Err(SearchError::invalid("script source must not be empty"));
        }
        Ok(Self {
            script: ScriptSource::Inline { source, lang: None },
            params: Fields::new(),
            conflicts: ConflictPolicy::Abort,
        })
    }

    /// Stored script by id.
    pub fn stored(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(SearchError::invalid("stored script id must not be empty"));
        }
        Ok(Self {
            script: ScriptSource::Stored(id),
            params: Fields::new(),
            conflicts: ConflictPolicy::Abort,
        })
    }

    /// Set the script language of an inline script.
    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        if let ScriptSource::Inline { lang: l, .. } = &mut self.script {
            *l = Some(lang.into());
        }
        self
    }

    /// Add a script parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Set the conflict policy.
    pub fn conflicts(mut self, policy: ConflictPolicy) -> Self {
        self.conflicts = policy;
        self
    }

    fn to_json(&self) -> Value {
        let mut script = match &self.script {
            ScriptSource::Inline { source, lang } => {
                let mut s = json!({ "source": source });
                if let Some(lang) = lang {
                    s["lang"] = json!(lang);
                }
                s
            }
            ScriptSource::Stored(id) => json!({ "id": id }),
        };
        if !self.params.is_empty() {
            script["params"] = Value::Object(self.params.clone());
        }
        script
    }
}

/// Counts reported by update-by-query.
///
/// The operation is not atomic; compare `updated` against `total` to see
/// how much of the match set was changed.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateByQueryReport {
    /// Documents matched.
    pub total: u64,
    /// Documents changed.
    pub updated: u64,
    /// Documents the script left unchanged.
    pub noops: u64,
    /// Documents skipped because they changed concurrently.
    pub version_conflicts: u64,
    /// Per-document failure reasons.
    pub failures: Vec<String>,
    /// Time taken in milliseconds.
    pub took_ms: u64,
}

impl UpdateByQueryReport {
    /// Whether every matched document was processed.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
            && self.version_conflicts == 0
            && self.updated + self.noops == self.total
    }

    fn from_json(body: &Value) -> Result<Self> {
        let count = |key: &str| {
            body[key]
                .as_u64()
                .ok_or_else(|| SearchError::malformed(format!("update_by_query reply without {}", key)))
        };
        Ok(Self {
            total: count("total")?,
            updated: count("updated")?,
            noops: body["noops"].as_u64().unwrap_or(0),
            version_conflicts: body["version_conflicts"].as_u64().unwrap_or(0),
            failures: failure_reasons(body),
            took_ms: body["took"].as_u64().unwrap_or(0),
        })
    }
}

pub(crate) fn failure_reasons(body: &Value) -> Vec<String> {
    body["failures"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .map(|f| {
                    f["cause"]["reason"]
                        .as_str()
                        .or_else(|| f["reason"]["reason"].as_str())
                        .unwrap_or("unknown failure")
                        .to_string()
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Performs document writes and reads through one endpoint.
#[derive(Debug, Clone)]
pub struct MutationController {
    client: SearchClient,
    refresh: Option<RefreshPolicy>,
}

impl MutationController {
    pub(crate) fn new(client: SearchClient) -> Self {
        Self {
            client,
            refresh: None,
        }
    }

    /// Apply `policy` to every write made through this controller.
    pub fn with_refresh(mut self, policy: RefreshPolicy) -> Self {
        self.refresh = Some(policy);
        self
    }

    // =========================================================================
    // Single-document writes
    // =========================================================================

    /// Store a record.
    ///
    /// In [`CreateMode::CreateOnly`] an existing id fails with
    /// [`SearchError::VersionConflict`]. In [`CreateMode::Upsert`] an
    /// expected version, if present, must match the stored document.
    pub async fn create<T: Document>(
        &self,
        record: MutationRecord<T>,
        mode: CreateMode,
    ) -> Result<WriteAck> {
        let fields = record.body.to_fields()?;
        let index = record.index.as_str();
        let transport = self.client.inner();

        let reply = match (mode, record.id.as_deref()) {
            (CreateMode::CreateOnly, _) if record.expected_version.is_some() => {
                return Err(SearchError::invalid(
                    "create-only writes cannot carry an expected version",
                ));
            }
            (CreateMode::CreateOnly, Some(id)) => {
                debug!(index = index, id = id; "creating document");
                let mut req = transport
                    .create(opensearch::CreateParts::IndexId(index, id))
                    .body(fields);
                if let Some(policy) = self.refresh {
                    req = req.refresh(policy.to_param());
                }
                self.client.execute("create", index, req.send()).await?
            }
            (_, Some(id)) => {
                debug!(index = index, id = id; "indexing document");
                let mut req = transport
                    .index(opensearch::IndexParts::IndexId(index, id))
                    .body(fields);
                if let Some(token) = record.expected_version {
                    req = req
                        .if_seq_no(token.seq_no)
                        .if_primary_term(token.primary_term);
                }
                if let Some(policy) = self.refresh {
                    req = req.refresh(policy.to_param());
                }
                self.client.execute("index", index, req.send()).await?
            }
            (_, None) => {
                if record.expected_version.is_some() {
                    return Err(SearchError::invalid(
                        "an expected version requires a document id",
                    ));
                }
                debug!(index = index; "indexing document with generated id");
                let mut req = transport
                    .index(opensearch::IndexParts::Index(index))
                    .body(fields);
                if let Some(policy) = self.refresh {
                    req = req.refresh(policy.to_param());
                }
                self.client.execute("index", index, req.send()).await?
            }
        };

        WriteAck::from_json(&reply.into_success()?)
    }

    /// Overwrite the given top-level fields of document `id`.
    ///
    /// Fields not named in `partial` are kept. With `expected`, the write
    /// only happens if the stored document is still at that revision.
    pub async fn update(
        &self,
        index: &str,
        id: &str,
        partial: Fields,
        expected: Option<VersionToken>,
    ) -> Result<WriteAck> {
        debug!(index = index, id = id; "updating document");

        let mut req = self
            .client
            .inner()
            .update(opensearch::UpdateParts::IndexId(index, id))
            .body(json!({ "doc": partial }));
        if let Some(token) = expected {
            req = req
                .if_seq_no(token.seq_no)
                .if_primary_term(token.primary_term);
        }
        if let Some(policy) = self.refresh {
            req = req.refresh(policy.to_param());
        }

        let reply = self.client.execute("update", index, req.send()).await?;
        WriteAck::from_json(&not_found_or(reply, index, id)?)
    }

    /// Remove document `id`.
    pub async fn delete(
        &self,
        index: &str,
        id: &str,
        expected: Option<VersionToken>,
    ) -> Result<WriteAck> {
        debug!(index = index, id = id; "deleting document");

        let mut req = self
            .client
            .inner()
            .delete(opensearch::DeleteParts::IndexId(index, id));
        if let Some(token) = expected {
            req = req
                .if_seq_no(token.seq_no)
                .if_primary_term(token.primary_term);
        }
        if let Some(policy) = self.refresh {
            req = req.refresh(policy.to_param());
        }

        let reply = self.client.execute("delete", index, req.send()).await?;
        WriteAck::from_json(&not_found_or(reply, index, id)?)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Get a document with its version token.
    pub async fn get<T: Document>(&self, index: &str, id: &str) -> Result<Option<Hit<T>>> {
        debug!(index = index, id = id; "getting document");

        let send = self
            .client
            .inner()
            .get(opensearch::GetParts::IndexId(index, id))
            .send();
        let reply = self.client.execute("get", index, send).await?;

        if reply.status == 404 && reply.body["found"] == json!(false) {
            return Ok(None);
        }
        let body = reply.into_success()?;
        found_hit(&body)
    }

    /// Check if a document exists.
    pub async fn exists(&self, index: &str, id: &str) -> Result<bool> {
        let send = self
            .client
            .inner()
            .exists(opensearch::ExistsParts::IndexId(index, id))
            .send();
        let reply = self.client.execute("exists", index, send).await?;

        match reply.status {
            200..=299 => Ok(true),
            404 => Ok(false),
            status => Err(codec::rejection(status, &reply.body)),
        }
    }

    /// Get several documents. Results follow `ids`, `None` for missing ones.
    pub async fn multi_get<T: Document>(
        &self,
        index: &str,
        ids: &[&str],
    ) -> Result<Vec<Option<Hit<T>>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        debug!(index = index, count = ids.len(); "getting documents");

        let send = self
            .client
            .inner()
            .mget(opensearch::MgetParts::Index(index))
            .body(json!({ "ids": ids }))
            .send();
        let body = self
            .client
            .execute("mget", index, send)
            .await?
            .into_success()?;

        let docs = body["docs"]
            .as_array()
            .ok_or_else(|| SearchError::malformed("mget reply without docs"))?;
        if docs.len() != ids.len() {
            return Err(SearchError::malformed(format!(
                "mget returned {} docs for {} ids",
                docs.len(),
                ids.len()
            )));
        }
        docs.iter().map(found_hit).collect()
    }

    // =========================================================================
    // Bulk Operations
    // =========================================================================

    /// Submit all operations in one call. Outcomes follow input order.
    pub async fn bulk_apply(&self, operations: Vec<BulkOperation>) -> Result<Vec<BulkOutcome>> {
        if operations.is_empty() {
            return Ok(Vec::new());
        }
        debug!(operations = operations.len(); "bulk apply");

        let mut body: Vec<JsonBody<Value>> = Vec::with_capacity(operations.len() * 2);
        for op in &operations {
            body.extend(op.to_bulk_lines().into_iter().map(JsonBody::from));
        }

        let mut req = self
            .client
            .inner()
            .bulk(opensearch::BulkParts::None)
            .body(body);
        if let Some(policy) = self.refresh {
            req = req.refresh(policy.to_param());
        }

        let result = self
            .client
            .execute("bulk", "_bulk", req.send())
            .await?
            .into_success()?;

        let items = result["items"]
            .as_array()
            .ok_or_else(|| SearchError::malformed("bulk reply without items"))?;
        if items.len() != operations.len() {
            return Err(SearchError::malformed(format!(
                "bulk returned {} items for {} operations",
                items.len(),
                operations.len()
            )));
        }

        let outcomes = items
            .iter()
            .zip(&operations)
            .map(|(item, op)| BulkOutcome::from_item(item, op))
            .collect::<Result<Vec<_>>>()?;

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        if failed > 0 {
            warn!(failed = failed, total = outcomes.len(); "bulk apply partially failed");
        }
        Ok(outcomes)
    }

    // =========================================================================
    // By-query Operations
    // =========================================================================

    /// Run `mutation` on every document matching `query`.
    pub async fn update_by_query(
        &self,
        index: &str,
        query: &Query,
        mutation: FieldMutation,
    ) -> Result<UpdateByQueryReport> {
        debug!(index = index, query = query.kind(); "update by query");

        let conflicts = match mutation.conflicts {
            ConflictPolicy::Abort => Conflicts::Abort,
            ConflictPolicy::Proceed => Conflicts::Proceed,
        };
        let indices = [index];
        let mut req = self
            .client
            .inner()
            .update_by_query(opensearch::UpdateByQueryParts::Index(&indices))
            .conflicts(conflicts)
            .body(json!({ "query": query.to_json(), "script": mutation.to_json() }));
        if let Some(policy) = self.refresh {
            req = req.refresh(policy != RefreshPolicy::None);
        }

        let body = self
            .client
            .execute("update_by_query", index, req.send())
            .await?
            .into_success()?;
        let report = UpdateByQueryReport::from_json(&body)?;
        if !report.is_complete() {
            warn!(
                index = index,
                total = report.total,
                updated = report.updated,
                conflicts = report.version_conflicts;
                "update by query did not process every match"
            );
        }
        Ok(report)
    }

    /// Delete every document matching `query`. Returns the deleted count.
    pub async fn delete_by_query(&self, index: &str, query: &Query) -> Result<u64> {
        debug!(index = index, query = query.kind(); "delete by query");

        let indices = [index];
        let mut req = self
            .client
            .inner()
            .delete_by_query(opensearch::DeleteByQueryParts::Index(&indices))
            .body(json!({ "query": query.to_json() }));
        if let Some(policy) = self.refresh {
            req = req.refresh(policy != RefreshPolicy::None);
        }

        let body = self
            .client
            .execute("delete_by_query", index, req.send())
            .await?
            .into_success()?;
        body["deleted"]
            .as_u64()
            .ok_or_else(|| SearchError::malformed("delete_by_query reply without deleted"))
    }
}

/// A 404 about the document (not the index) becomes `NotFound`.
fn not_found_or(reply: Reply, index: &str, id: &str) -> Result<Value> {
    if reply.status == 404 {
        let error_type = reply.body["error"]["type"].as_str().unwrap_or_default();
        if error_type != "index_not_found_exception" {
            return Err(SearchError::NotFound {
                index: index.to_string(),
                id: id.to_string(),
            });
        }
    }
    reply.into_success()
}

fn found_hit<T: Document>(doc: &Value) -> Result<Option<Hit<T>>> {
    if !doc["found"].as_bool().unwrap_or(false) {
        return Ok(None);
    }
    let meta = DocumentMeta::from_json(doc)?;
    let source = doc
        .get("_source")
        .ok_or_else(|| SearchError::malformed(format!("document {} has no _source", meta.id)))?;
    Ok(Some(Hit {
        doc: decode_source(source)?,
        meta,
    }))
}
