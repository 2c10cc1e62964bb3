//! In-process fake search cluster for integration tests.
//!
//! Answers the REST calls the client makes with an in-memory store. It
//! understands enough of the query and aggregation language for the tests:
//! match_all, term, terms, prefix, range, exists, bool and constant_score
//! queries, terms/sum/avg/min/max/filter/global aggregations, index
//! aliases, and reindexing.

#![allow(dead_code)]

use quarry_search::{EndpointConfig, EndpointRouter, RouterConfig, SearchClient};
use serde_json::{Map, Value, json};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate, matchers::any};

const PRIMARY_TERM: i64 = 1;

type Reply = (u16, Value);

#[derive(Debug, Clone)]
struct StoredDoc {
    source: Value,
    seq_no: i64,
    version: i64,
}

#[derive(Debug)]
struct Snapshot {
    hits: Vec<Value>,
    position: usize,
    size: usize,
}

#[derive(Debug, Default)]
struct State {
    indices: BTreeMap<String, BTreeMap<String, StoredDoc>>,
    aliases: BTreeMap<String, BTreeSet<String>>,
    seq_no: i64,
    next_id: u64,
    scrolls: HashMap<String, Snapshot>,
    next_scroll: u64,
    failing_clears: usize,
    clear_requests: usize,
}

/// Shared handle to the fake cluster's state.
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    /// Store documents directly, bypassing HTTP.
    pub fn seed<I: AsRef<str>>(&self, index: &str, docs: Vec<(I, Value)>) {
        let mut state = self.state.lock().expect("fake cluster lock");
        state.indices.entry(index.to_string()).or_default();
        for (id, source) in docs {
            state.write(index, Some(id.as_ref()), source, false, &HashMap::new());
        }
    }

    /// Stored source of a document.
    pub fn source(&self, index: &str, id: &str) -> Option<Value> {
        let state = self.state.lock().expect("fake cluster lock");
        state
            .indices
            .get(index)
            .and_then(|docs| docs.get(id))
            .map(|doc| doc.source.clone())
    }

    /// Number of documents in an index.
    pub fn doc_count(&self, index: &str) -> usize {
        let state = self.state.lock().expect("fake cluster lock");
        state.indices.get(index).map(BTreeMap::len).unwrap_or(0)
    }

    /// Number of scroll snapshots still held.
    pub fn open_scrolls(&self) -> usize {
        self.state.lock().expect("fake cluster lock").scrolls.len()
    }

    /// Drop every scroll snapshot, as if their keep-alive lapsed.
    pub fn expire_scrolls(&self) {
        self.state.lock().expect("fake cluster lock").scrolls.clear();
    }

    /// Answer the next `n` clear-scroll calls with a 500.
    pub fn fail_next_clears(&self, n: usize) {
        self.state.lock().expect("fake cluster lock").failing_clears = n;
    }

    /// Clear-scroll calls received so far.
    pub fn clear_requests(&self) -> usize {
        self.state.lock().expect("fake cluster lock").clear_requests
    }

    /// Point `alias` at `index`, bypassing HTTP.
    pub fn alias(&self, index: &str, alias: &str) {
        let mut state = self.state.lock().expect("fake cluster lock");
        state
            .aliases
            .entry(index.to_string())
            .or_default()
            .insert(alias.to_string());
    }
}

impl Respond for FakeCluster {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut state = self.state.lock().expect("fake cluster lock");

        let segments: Vec<String> = request
            .url
            .path_segments()
            .map(|parts| parts.filter(|p| !p.is_empty()).map(String::from).collect())
            .unwrap_or_default();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
        let params: HashMap<String, String> = request
            .url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        let method = request.method.as_str();

        let (status, reply) = match (method, segments.as_slice()) {
            ("GET", ["_cluster", "health"]) => (
                200,
                json!({
                    "cluster_name": "fake",
                    "status": "green",
                    "number_of_nodes": 1,
                    "active_shards": state.indices.len(),
                    "unassigned_shards": 0
                }),
            ),
            ("HEAD", []) => (200, Value::Null),
            ("GET", []) => (200, json!({ "cluster_name": "fake", "tagline": "You Know, for Search" })),
            ("GET", ["_cat", "indices"]) => state.cat_indices(),
            ("GET", ["_cat", "nodes"]) => (
                200,
                json!([{
                    "ip": "127.0.0.1",
                    "heap.percent": "12",
                    "node.role": "dimr",
                    "cluster_manager": "*",
                    "name": "fake-node-1"
                }]),
            ),
            ("GET", ["_cat", "aliases"]) => state.cat_aliases(),
            ("POST", ["_reindex"]) => state.reindex(&body),
            ("POST", ["_aliases"]) => state.update_aliases(&body),
            ("POST", ["_bulk"]) => state.bulk(&request.body),
            ("POST" | "GET", ["_search", "scroll"]) => state.scroll(&body),
            ("DELETE", ["_search", "scroll"]) => state.clear_scroll(&body),
            ("PUT", [index]) => state.create_index(index, &body),
            ("HEAD", [index]) => match state.indices.contains_key(*index) {
                true => (200, Value::Null),
                false => (404, Value::Null),
            },
            ("DELETE", [index]) => match state.indices.remove(*index) {
                Some(_) => {
                    state.aliases.remove(*index);
                    (200, json!({ "acknowledged": true }))
                }
                None => index_missing(index),
            },
            ("PUT" | "POST", [index, "_alias", alias]) => {
                state.apply_alias(&json!({ "add": { "index": index, "alias": alias } }))
            }
            ("DELETE", [index, "_alias", alias]) => {
                state.apply_alias(&json!({ "remove": { "index": index, "alias": alias } }))
            }
            ("GET", [indices, "_alias"]) => state.get_aliases(indices),
            ("POST" | "GET", [_, "_refresh"]) => (200, json!({ "_shards": { "failed": 0 } })),
            ("POST" | "GET", [index, "_search"]) => state.search(index, &params, &body),
            ("POST" | "GET", [index, "_count"]) => state.count(index, &body),
            ("POST" | "GET", [index, "_validate", "query"]) => state.validate_query(index, &body),
            ("POST" | "GET", [index, "_mget"]) => state.mget(index, &body),
            ("POST", [index, "_update_by_query"]) => state.update_by_query(index, &body),
            ("POST", [index, "_delete_by_query"]) => state.delete_by_query(index, &body),
            ("PUT" | "POST", [index, "_create", id]) => {
                state.write(index, Some(*id), body, true, &params)
            }
            ("PUT" | "POST", [index, "_doc", id]) => state.write(index, Some(*id), body, false, &params),
            ("POST", [index, "_doc"]) => state.write(index, None, body, false, &params),
            ("POST", [index, "_update", id]) => state.update(index, id, &body, &params),
            ("DELETE", [index, "_doc", id]) => state.delete(index, id, &params),
            ("GET", [index, "_doc", id]) => state.get(index, id),
            ("HEAD", [index, "_doc", id]) => {
                let (status, _) = state.get(index, id);
                (status, Value::Null)
            }
            _ => error(
                400,
                "illegal_argument_exception",
                &format!("no handler for {} /{}", method, segments.join("/")),
            ),
        };

        let template = ResponseTemplate::new(status);
        if reply.is_null() {
            template
        } else {
            template.set_body_json(reply)
        }
    }
}

impl State {
    fn create_index(&mut self, index: &str, body: &Value) -> Reply {
        if self.indices.contains_key(index) {
            return error(
                400,
                "resource_already_exists_exception",
                &format!("index [{}] already exists", index),
            );
        }
        self.indices.insert(index.to_string(), BTreeMap::new());
        if let Some(aliases) = body["aliases"].as_object() {
            self.aliases
                .entry(index.to_string())
                .or_default()
                .extend(aliases.keys().cloned());
        }
        (200, json!({ "acknowledged": true, "index": index }))
    }

    fn cat_indices(&self) -> Reply {
        let rows: Vec<Value> = self
            .indices
            .iter()
            .map(|(name, docs)| {
                json!({
                    "health": "green",
                    "status": "open",
                    "index": name,
                    "docs.count": docs.len().to_string(),
                    "store.size": "1kb"
                })
            })
            .collect();
        (200, Value::Array(rows))
    }

    fn apply_alias(&mut self, action: &Value) -> Reply {
        let (add, step) = match (action.get("add"), action.get("remove")) {
            (Some(step), _) => (true, step),
            (None, Some(step)) => (false, step),
            _ => return error(400, "illegal_argument_exception", "unknown alias action"),
        };
        let index = step["index"].as_str().unwrap_or_default();
        let alias = step["alias"].as_str().unwrap_or_default();
        if !self.indices.contains_key(index) {
            return index_missing(index);
        }
        let aliases = self.aliases.entry(index.to_string()).or_default();
        if add {
            aliases.insert(alias.to_string());
        } else if !aliases.remove(alias) {
            return error(
                404,
                "aliases_not_found_exception",
                &format!("aliases [{}] missing", alias),
            );
        }
        (200, json!({ "acknowledged": true }))
    }

    fn update_aliases(&mut self, body: &Value) -> Reply {
        let actions = body["actions"].as_array().cloned().unwrap_or_default();
        // Actions apply atomically.
        let before = self.aliases.clone();
        for action in &actions {
            let (status, reply) = self.apply_alias(action);
            if status != 200 {
                self.aliases = before;
                return (status, reply);
            }
        }
        (200, json!({ "acknowledged": true }))
    }

    fn get_aliases(&self, indices: &str) -> Reply {
        let mut reply = Map::new();
        for index in indices.split(',') {
            if !self.indices.contains_key(index) {
                return index_missing(index);
            }
            let aliases: Map<String, Value> = self
                .aliases
                .get(index)
                .map(|set| set.iter().map(|a| (a.clone(), json!({}))).collect())
                .unwrap_or_default();
            reply.insert(index.to_string(), json!({ "aliases": aliases }));
        }
        (200, Value::Object(reply))
    }

    fn write(
        &mut self,
        index: &str,
        id: Option<&str>,
        source: Value,
        create_only: bool,
        params: &HashMap<String, String>,
    ) -> Reply {
        let id = match id {
            Some(id) => id.to_string(),
            None => {
                self.next_id += 1;
                format!("auto-{}", self.next_id)
            }
        };
        let docs = self.indices.entry(index.to_string()).or_default();
        let existing = docs.get(&id).cloned();

        if create_only && existing.is_some() {
            return conflict(&id, "document already exists");
        }
        if let Some((seq_no, term)) = expected_token(params) {
            match &existing {
                Some(doc) if doc.seq_no == seq_no && term == PRIMARY_TERM => {}
                _ => return conflict(&id, "required seqNo/primaryTerm do not match"),
            }
        }

        let seq_no = self.seq_no;
        self.seq_no += 1;
        let doc = StoredDoc {
            source,
            seq_no,
            version: existing.as_ref().map(|d| d.version + 1).unwrap_or(1),
        };
        let reply = ack(index, &id, &doc, if existing.is_some() { "updated" } else { "created" });
        docs.insert(id, doc);
        (if existing.is_some() { 200 } else { 201 }, reply)
    }

    fn update(
        &mut self,
        index: &str,
        id: &str,
        body: &Value,
        params: &HashMap<String, String>,
    ) -> Reply {
        let Some(docs) = self.indices.get_mut(index) else {
            return index_missing(index);
        };
        let Some(doc) = docs.get_mut(id) else {
            return error(404, "document_missing_exception", &format!("[{}]: document missing", id));
        };
        if let Some((seq_no, term)) = expected_token(params) {
            if doc.seq_no != seq_no || term != PRIMARY_TERM {
                return conflict(id, "required seqNo/primaryTerm do not match");
            }
        }

        let mut merged = doc.source.clone();
        if let (Some(target), Some(partial)) = (merged.as_object_mut(), body["doc"].as_object()) {
            for (k, v) in partial {
                target.insert(k.clone(), v.clone());
            }
        }
        if merged == doc.source {
            return (200, ack(index, id, doc, "noop"));
        }

        doc.source = merged;
        doc.seq_no = self.seq_no;
        doc.version += 1;
        self.seq_no += 1;
        (200, ack(index, id, doc, "updated"))
    }

    fn delete(&mut self, index: &str, id: &str, params: &HashMap<String, String>) -> Reply {
        let Some(docs) = self.indices.get_mut(index) else {
            return index_missing(index);
        };
        let Some(doc) = docs.get(id) else {
            return (
                404,
                json!({
                    "_index": index, "_id": id, "_version": 1, "result": "not_found",
                    "_seq_no": self.seq_no, "_primary_term": PRIMARY_TERM
                }),
            );
        };
        if let Some((seq_no, term)) = expected_token(params) {
            if doc.seq_no != seq_no || term != PRIMARY_TERM {
                return conflict(id, "required seqNo/primaryTerm do not match");
            }
        }

        let mut removed = doc.clone();
        docs.remove(id);
        removed.seq_no = self.seq_no;
        removed.version += 1;
        self.seq_no += 1;
        (200, ack(index, id, &removed, "deleted"))
    }

    fn get(&self, index: &str, id: &str) -> Reply {
        let Some(docs) = self.indices.get(index) else {
            return index_missing(index);
        };
        match docs.get(id) {
            Some(doc) => (200, found(index, id, doc)),
            None => (404, json!({ "_index": index, "_id": id, "found": false })),
        }
    }

    fn mget(&self, index: &str, body: &Value) -> Reply {
        let Some(docs) = self.indices.get(index) else {
            return index_missing(index);
        };
        let ids = body["ids"].as_array().cloned().unwrap_or_default();
        let out: Vec<Value> = ids
            .iter()
            .filter_map(Value::as_str)
            .map(|id| match docs.get(id) {
                Some(doc) => found(index, id, doc),
                None => json!({ "_index": index, "_id": id, "found": false }),
            })
            .collect();
        (200, json!({ "docs": out }))
    }

    fn bulk(&mut self, raw: &[u8]) -> Reply {
        let text = String::from_utf8_lossy(raw).into_owned();
        let mut lines = text
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str::<Value>(l).unwrap_or(Value::Null));

        let mut items = Vec::new();
        let mut errors = false;
        while let Some(action) = lines.next() {
            let Some((op, meta)) = action
                .as_object()
                .and_then(|o| o.iter().next())
                .map(|(k, v)| (k.clone(), v.clone()))
            else {
                break;
            };
            let index = meta["_index"].as_str().unwrap_or_default().to_string();
            let id = meta["_id"].as_str().map(String::from);
            let mut params = HashMap::new();
            if let Some(seq_no) = meta["if_seq_no"].as_i64() {
                params.insert("if_seq_no".to_string(), seq_no.to_string());
            }
            if let Some(term) = meta["if_primary_term"].as_i64() {
                params.insert("if_primary_term".to_string(), term.to_string());
            }

            let (status, reply) = match op.as_str() {
                "index" | "create" => {
                    let source = lines.next().unwrap_or(Value::Null);
                    self.write(&index, id.as_deref(), source, op == "create", &params)
                }
                "update" => {
                    let body = lines.next().unwrap_or(Value::Null);
                    self.update(&index, id.as_deref().unwrap_or_default(), &body, &params)
                }
                "delete" => self.delete(&index, id.as_deref().unwrap_or_default(), &params),
                _ => error(400, "illegal_argument_exception", "unknown bulk action"),
            };
            errors |= status >= 300;

            let mut result = match reply.get("error") {
                Some(err) => json!({ "_index": index, "_id": id, "error": err }),
                None => reply,
            };
            result["status"] = json!(status);
            let mut item = Map::new();
            item.insert(op, result);
            items.push(Value::Object(item));
        }

        (200, json!({ "took": 1, "errors": errors, "items": items }))
    }

    fn search(&mut self, target: &str, params: &HashMap<String, String>, body: &Value) -> Reply {
        let query = body.get("query").cloned().unwrap_or(json!({ "match_all": {} }));
        let with_version = body["seq_no_primary_term"].as_bool().unwrap_or(false);

        let mut matched = Vec::new();
        let mut all = Vec::new();
        for index in target.split(',') {
            let Some(docs) = self.indices.get(index) else {
                return index_missing(index);
            };
            for (id, doc) in docs {
                all.push(doc.source.clone());
                if matches(&query, &doc.source) {
                    matched.push(hit(index, id, doc, with_version));
                }
            }
        }

        if let Some(specs) = body["sort"].as_array() {
            for spec in specs.iter().rev() {
                sort_hits(&mut matched, spec);
            }
        }

        let aggregations = body.get("aggs").or_else(|| body.get("aggregations")).map(|aggs| {
            let sources: Vec<&Value> = matched.iter().map(|h| &h["_source"]).collect();
            let everything: Vec<&Value> = all.iter().collect();
            aggregate(aggs, &sources, &everything)
        });

        if let Some(filter) = body.get("post_filter") {
            matched.retain(|h| matches(filter, &h["_source"]));
        }

        let total = matched.len();
        let size = body["size"].as_u64().unwrap_or(10) as usize;

        if params.contains_key("scroll") {
            self.next_scroll += 1;
            let scroll_id = format!("scroll-{}", self.next_scroll);
            let first: Vec<Value> = matched.iter().take(size).cloned().collect();
            self.scrolls.insert(
                scroll_id.clone(),
                Snapshot {
                    position: first.len(),
                    hits: matched,
                    size,
                },
            );
            return (200, search_body(first, total, aggregations, Some(&scroll_id)));
        }

        let from = body["from"].as_u64().unwrap_or(0) as usize;
        let page: Vec<Value> = matched.into_iter().skip(from).take(size).collect();
        (200, search_body(page, total, aggregations, None))
    }

    fn scroll(&mut self, body: &Value) -> Reply {
        let scroll_id = body["scroll_id"].as_str().unwrap_or_default().to_string();
        let Some(snapshot) = self.scrolls.get_mut(&scroll_id) else {
            return context_missing(&scroll_id);
        };
        let page: Vec<Value> = snapshot
            .hits
            .iter()
            .skip(snapshot.position)
            .take(snapshot.size)
            .cloned()
            .collect();
        snapshot.position += page.len();
        let total = snapshot.hits.len();
        (200, search_body(page, total, None, Some(&scroll_id)))
    }

    fn clear_scroll(&mut self, body: &Value) -> Reply {
        self.clear_requests += 1;
        if self.failing_clears > 0 {
            self.failing_clears -= 1;
            return error(500, "node_disconnected_exception", "node left the cluster");
        }
        let ids: Vec<String> = match &body["scroll_id"] {
            Value::Array(ids) => ids.iter().filter_map(Value::as_str).map(String::from).collect(),
            Value::String(id) => vec![id.clone()],
            _ => Vec::new(),
        };
        let freed = ids.iter().filter(|id| self.scrolls.remove(*id).is_some()).count();
        let status = if freed > 0 { 200 } else { 404 };
        (status, json!({ "succeeded": true, "num_freed": freed }))
    }

    /// Accepts every query it can evaluate and echoes it back as the
    /// explanation.
    fn validate_query(&self, index: &str, body: &Value) -> Reply {
        if !self.indices.contains_key(index) {
            return index_missing(index);
        }
        let query = body.get("query").cloned().unwrap_or(json!({ "match_all": {} }));
        (
            200,
            json!({
                "_shards": { "total": 1, "successful": 1, "failed": 0 },
                "valid": true,
                "explanations": [{
                    "index": index,
                    "valid": true,
                    "explanation": query.to_string()
                }]
            }),
        )
    }

    fn reindex(&mut self, body: &Value) -> Reply {
        let source = body["source"]["index"].as_str().unwrap_or_default().to_string();
        let dest = body["dest"]["index"].as_str().unwrap_or_default().to_string();
        let Some(docs) = self.indices.get(&source).cloned() else {
            return index_missing(&source);
        };

        let (mut created, mut updated) = (0, 0);
        for (id, doc) in &docs {
            let no_params = HashMap::new();
            let (_, reply) = self.write(&dest, Some(id.as_str()), doc.source.clone(), false, &no_params);
            match reply["result"].as_str() {
                Some("created") => created += 1,
                _ => updated += 1,
            }
        }
        (
            200,
            json!({
                "took": 5,
                "timed_out": false,
                "total": docs.len(),
                "created": created,
                "updated": updated,
                "deleted": 0,
                "batches": if docs.is_empty() { 0 } else { 1 },
                "version_conflicts": 0,
                "noops": 0,
                "failures": []
            }),
        )
    }

    fn cat_aliases(&self) -> Reply {
        let rows: Vec<Value> = self
            .aliases
            .iter()
            .flat_map(|(index, aliases)| {
                aliases.iter().map(move |alias| {
                    json!({ "alias": alias, "index": index, "filter": "-", "is_write_index": "-" })
                })
            })
            .collect();
        (200, Value::Array(rows))
    }

    fn count(&self, index: &str, body: &Value) -> Reply {
        let Some(docs) = self.indices.get(index) else {
            return index_missing(index);
        };
        let query = body.get("query").cloned().unwrap_or(json!({ "match_all": {} }));
        let count = docs.values().filter(|d| matches(&query, &d.source)).count();
        (200, json!({ "count": count }))
    }

    fn update_by_query(&mut self, index: &str, body: &Value) -> Reply {
        let query = body.get("query").cloned().unwrap_or(json!({ "match_all": {} }));
        let script = &body["script"];
        let Some(source) = script["source"].as_str() else {
            return error(400, "script_exception", "only inline scripts are supported");
        };
        let Some(docs) = self.indices.get_mut(index) else {
            return index_missing(index);
        };

        let (mut total, mut updated, mut noops) = (0, 0, 0);
        for doc in docs.values_mut() {
            if !matches(&query, &doc.source) {
                continue;
            }
            total += 1;
            let mut changed = doc.source.clone();
            if let Err(reason) = run_script(source, &script["params"], &mut changed) {
                return error(400, "script_exception", &reason);
            }
            if changed == doc.source {
                noops += 1;
                continue;
            }
            doc.source = changed;
            doc.seq_no = self.seq_no;
            doc.version += 1;
            self.seq_no += 1;
            updated += 1;
        }

        (
            200,
            json!({
                "took": 1, "timed_out": false, "total": total, "updated": updated,
                "deleted": 0, "batches": 1, "version_conflicts": 0, "noops": noops,
                "failures": []
            }),
        )
    }

    fn delete_by_query(&mut self, index: &str, body: &Value) -> Reply {
        let query = body.get("query").cloned().unwrap_or(json!({ "match_all": {} }));
        let Some(docs) = self.indices.get_mut(index) else {
            return index_missing(index);
        };
        let before = docs.len();
        docs.retain(|_, doc| !matches(&query, &doc.source));
        let deleted = before - docs.len();
        self.seq_no += deleted as i64;
        (
            200,
            json!({ "took": 1, "total": deleted, "deleted": deleted, "failures": [] }),
        )
    }
}

// =============================================================================
// Query evaluation
// =============================================================================

fn matches(query: &Value, doc: &Value) -> bool {
    let Some((kind, body)) = query.as_object().and_then(|o| o.iter().next()) else {
        return false;
    };
    match kind.as_str() {
        "match_all" => true,
        "term" => single(body).is_some_and(|(f, v)| {
            let v = v.get("value").unwrap_or(v);
            field(doc, f).is_some_and(|d| equal(d, v))
        }),
        "terms" => single(body).is_some_and(|(f, values)| {
            let values = values.as_array().map(Vec::as_slice).unwrap_or(&[]);
            field(doc, f).is_some_and(|d| values.iter().any(|v| equal(d, v)))
        }),
        "prefix" => single(body).is_some_and(|(f, v)| {
            let v = v.get("value").unwrap_or(v);
            match (field(doc, f).and_then(Value::as_str), v.as_str()) {
                (Some(d), Some(p)) => d.starts_with(p),
                _ => false,
            }
        }),
        "exists" => body["field"].as_str().is_some_and(|f| field(doc, f).is_some()),
        "range" => single(body).is_some_and(|(f, bounds)| {
            field(doc, f).is_some_and(|d| in_range(d, bounds))
        }),
        "bool" => bool_matches(body, doc),
        "constant_score" => matches(&body["filter"], doc),
        _ => false,
    }
}

fn bool_matches(body: &Value, doc: &Value) -> bool {
    let required = clauses(body, "must")
        .iter()
        .chain(clauses(body, "filter"))
        .all(|q| matches(q, doc));
    let excluded = clauses(body, "must_not").iter().any(|q| matches(q, doc));

    let should = clauses(body, "should");
    let has_required = !clauses(body, "must").is_empty() || !clauses(body, "filter").is_empty();
    let minimum = body["minimum_should_match"]
        .as_u64()
        .map(|m| m as usize)
        .unwrap_or(if !should.is_empty() && !has_required { 1 } else { 0 });
    let should_hits = should.iter().filter(|q| matches(q, doc)).count();

    required && !excluded && should_hits >= minimum
}

fn clauses<'a>(body: &'a Value, key: &str) -> &'a [Value] {
    body.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn in_range(value: &Value, bounds: &Value) -> bool {
    let check = |key: &str, ok: fn(Ordering) -> bool| {
        bounds
            .get(key)
            .is_none_or(|bound| compare(value, bound).is_some_and(ok))
    };
    check("gt", |o| o == Ordering::Greater)
        && check("gte", |o| o != Ordering::Less)
        && check("lt", |o| o == Ordering::Less)
        && check("lte", |o| o != Ordering::Greater)
}

fn single(body: &Value) -> Option<(&str, &Value)> {
    body.as_object()?
        .iter()
        .next()
        .map(|(k, v)| (k.as_str(), v))
}

fn field<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.strip_suffix(".keyword").unwrap_or(path);
    path.split('.')
        .try_fold(doc, |value, key| value.get(key))
        .filter(|v| !v.is_null())
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => Some(x.cmp(y)),
            _ => None,
        },
    }
}

fn equal(a: &Value, b: &Value) -> bool {
    a == b || compare(a, b) == Some(Ordering::Equal)
}

fn sort_hits(hits: &mut [Value], spec: &Value) {
    let (name, order) = match spec {
        Value::String(name) => (name.as_str(), "asc"),
        Value::Object(o) => match o.iter().next() {
            Some((name, Value::String(order))) => (name.as_str(), order.as_str()),
            Some((name, options)) => (name.as_str(), options["order"].as_str().unwrap_or("asc")),
            None => return,
        },
        _ => return,
    };
    if name == "_score" {
        return;
    }
    hits.sort_by(|a, b| {
        let ordering = match (field(&a["_source"], name), field(&b["_source"], name)) {
            (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if order == "desc" { ordering.reverse() } else { ordering }
    });
}

fn run_script(source: &str, params: &Value, doc: &mut Value) -> Result<(), String> {
    let (lhs, rhs, add) = if let Some((l, r)) = source.split_once("+=") {
        (l, r, true)
    } else if let Some((l, r)) = source.split_once('=') {
        (l, r, false)
    } else {
        return Err(format!("unsupported script [{}]", source));
    };
    let target = lhs
        .trim()
        .strip_prefix("ctx._source.")
        .ok_or_else(|| format!("unsupported script target [{}]", lhs.trim()))?;
    let rhs = rhs.trim().trim_end_matches(';').trim();
    let value = match rhs.strip_prefix("params.") {
        Some(name) => params
            .get(name)
            .cloned()
            .ok_or_else(|| format!("missing script param [{}]", name))?,
        None => serde_json::from_str(rhs).map_err(|_| format!("unsupported script value [{}]", rhs))?,
    };

    let new_value = if add {
        match (doc[target].as_i64(), value.as_i64()) {
            (Some(a), Some(b)) => json!(a + b),
            _ => json!(doc[target].as_f64().unwrap_or(0.0) + value.as_f64().unwrap_or(0.0)),
        }
    } else {
        value
    };
    doc[target] = new_value;
    Ok(())
}

// =============================================================================
// Aggregations
// =============================================================================

fn aggregate(aggs: &Value, docs: &[&Value], all: &[&Value]) -> Value {
    let mut out = Map::new();
    let Some(aggs) = aggs.as_object() else {
        return Value::Object(out);
    };

    for (name, spec) in aggs {
        let subs = spec.get("aggs").or_else(|| spec.get("aggregations"));
        let Some((kind, body)) = spec
            .as_object()
            .and_then(|o| o.iter().find(|(k, _)| *k != "aggs" && *k != "aggregations"))
        else {
            continue;
        };
        let field_name = body["field"].as_str().unwrap_or_default();

        let result = match kind.as_str() {
            "terms" => {
                let size = body["size"].as_u64().unwrap_or(10) as usize;
                let mut groups: Vec<(Value, Vec<&Value>)> = Vec::new();
                for &doc in docs {
                    let Some(key) = field(doc, field_name) else {
                        continue;
                    };
                    match groups.iter_mut().find(|(k, _)| k == key) {
                        Some((_, group)) => group.push(doc),
                        None => groups.push((key.clone(), vec![doc])),
                    }
                }
                groups.sort_by(|a, b| {
                    b.1.len()
                        .cmp(&a.1.len())
                        .then_with(|| compare(&a.0, &b.0).unwrap_or(Ordering::Equal))
                });
                groups.truncate(size);
                let buckets: Vec<Value> = groups
                    .iter()
                    .map(|(key, group)| {
                        with_subs(json!({ "key": key, "doc_count": group.len() }), subs, group, all)
                    })
                    .collect();
                json!({ "doc_count_error_upper_bound": 0, "sum_other_doc_count": 0, "buckets": buckets })
            }
            "sum" | "avg" | "min" | "max" => {
                let values: Vec<f64> = docs
                    .iter()
                    .filter_map(|d| field(d, field_name).and_then(Value::as_f64))
                    .collect();
                let value = match kind.as_str() {
                    "sum" => Some(values.iter().sum::<f64>()),
                    "avg" => (!values.is_empty())
                        .then(|| values.iter().sum::<f64>() / values.len() as f64),
                    "min" => values.iter().copied().reduce(f64::min),
                    _ => values.iter().copied().reduce(f64::max),
                };
                json!({ "value": value })
            }
            "filter" => {
                let group: Vec<&Value> = docs.iter().copied().filter(|d| matches(body, d)).collect();
                with_subs(json!({ "doc_count": group.len() }), subs, &group, all)
            }
            "global" => with_subs(json!({ "doc_count": all.len() }), subs, all, all),
            _ => json!({}),
        };
        out.insert(name.clone(), result);
    }
    Value::Object(out)
}

fn with_subs(mut node: Value, subs: Option<&Value>, docs: &[&Value], all: &[&Value]) -> Value {
    if let (Some(subs), Some(target)) = (subs, node.as_object_mut()) {
        if let Value::Object(results) = aggregate(subs, docs, all) {
            target.extend(results);
        }
    }
    node
}

// =============================================================================
// Reply shapes
// =============================================================================

fn expected_token(params: &HashMap<String, String>) -> Option<(i64, i64)> {
    let seq_no = params.get("if_seq_no")?.parse().ok()?;
    let term = params.get("if_primary_term")?.parse().ok()?;
    Some((seq_no, term))
}

fn ack(index: &str, id: &str, doc: &StoredDoc, result: &str) -> Value {
    json!({
        "_index": index,
        "_id": id,
        "_version": doc.version,
        "result": result,
        "_seq_no": doc.seq_no,
        "_primary_term": PRIMARY_TERM,
        "_shards": { "total": 1, "successful": 1, "failed": 0 }
    })
}

fn found(index: &str, id: &str, doc: &StoredDoc) -> Value {
    json!({
        "_index": index,
        "_id": id,
        "_version": doc.version,
        "_seq_no": doc.seq_no,
        "_primary_term": PRIMARY_TERM,
        "found": true,
        "_source": doc.source
    })
}

fn hit(index: &str, id: &str, doc: &StoredDoc, with_version: bool) -> Value {
    let mut hit = json!({ "_index": index, "_id": id, "_score": 1.0, "_source": doc.source });
    if with_version {
        hit["_seq_no"] = json!(doc.seq_no);
        hit["_primary_term"] = json!(PRIMARY_TERM);
    }
    hit
}

fn search_body(
    hits: Vec<Value>,
    total: usize,
    aggregations: Option<Value>,
    scroll_id: Option<&str>,
) -> Value {
    let max_score = if hits.is_empty() { Value::Null } else { json!(1.0) };
    let mut body = json!({
        "took": 1,
        "timed_out": false,
        "_shards": { "total": 1, "successful": 1, "skipped": 0, "failed": 0 },
        "hits": {
            "total": { "value": total, "relation": "eq" },
            "max_score": max_score,
            "hits": hits
        }
    });
    if let Some(aggregations) = aggregations {
        body["aggregations"] = aggregations;
    }
    if let Some(scroll_id) = scroll_id {
        body["_scroll_id"] = json!(scroll_id);
    }
    body
}

fn error(status: u16, error_type: &str, reason: &str) -> Reply {
    (
        status,
        json!({
            "error": {
                "root_cause": [{ "type": error_type, "reason": reason }],
                "type": error_type,
                "reason": reason
            },
            "status": status
        }),
    )
}

fn conflict(id: &str, detail: &str) -> Reply {
    error(
        409,
        "version_conflict_engine_exception",
        &format!("[{}]: version conflict, {}", id, detail),
    )
}

fn index_missing(index: &str) -> Reply {
    error(404, "index_not_found_exception", &format!("no such index [{}]", index))
}

fn context_missing(scroll_id: &str) -> Reply {
    let reason = format!("No search context found for id [{}]", scroll_id);
    (
        404,
        json!({
            "error": {
                "root_cause": [{ "type": "search_context_missing_exception", "reason": reason }],
                "type": "search_phase_execution_exception",
                "reason": "all shards failed"
            },
            "status": 404
        }),
    )
}

// =============================================================================
// Fixtures
// =============================================================================

/// Start a fake cluster on a random local port.
pub async fn start() -> (MockServer, FakeCluster) {
    let server = MockServer::start().await;
    let cluster = FakeCluster::default();
    Mock::given(any())
        .respond_with(cluster.clone())
        .mount(&server)
        .await;
    (server, cluster)
}

/// Endpoint configuration pointing at `server`.
pub fn endpoint(name: &str, server: &MockServer) -> EndpointConfig {
    EndpointConfig::new(name, "127.0.0.1", server.address().port())
}

/// Router with a single `primary` endpoint pointing at `server`.
pub fn router(server: &MockServer) -> EndpointRouter {
    EndpointRouter::new(RouterConfig::new().endpoint(endpoint("primary", server)))
        .expect("router for fake cluster")
}

/// Fake cluster plus a client connected to it.
pub async fn connect() -> (MockServer, FakeCluster, SearchClient) {
    let (server, cluster) = start().await;
    let client = router(&server).primary();
    (server, cluster, client)
}

/// Seven students; only one has a name starting with 王 and age 18.
pub fn students() -> Vec<(&'static str, Value)> {
    vec![
        ("1", json!({ "name": "王五", "age": 18, "city": "北京" })),
        ("2", json!({ "name": "王小明", "age": 20, "city": "上海" })),
        ("3", json!({ "name": "张三", "age": 18, "city": "北京" })),
        ("4", json!({ "name": "李四", "age": 22 })),
        ("5", json!({ "name": "赵六", "age": 25, "city": "广州" })),
        ("6", json!({ "name": "王芳", "age": 21, "city": "上海" })),
        ("7", json!({ "name": "孙七", "age": 18, "city": "深圳" })),
    ]
}

/// Nine car orders. Yellow Fords total 210000.
pub fn orders() -> Vec<(&'static str, Value)> {
    vec![
        ("1", json!({ "color": "red", "brand": "honda", "price": 10000 })),
        ("2", json!({ "color": "red", "brand": "honda", "price": 20000 })),
        ("3", json!({ "color": "green", "brand": "ford", "price": 30000 })),
        ("4", json!({ "color": "blue", "brand": "toyota", "price": 15000 })),
        ("5", json!({ "color": "green", "brand": "toyota", "price": 12000 })),
        ("6", json!({ "color": "red", "brand": "bmw", "price": 80000 })),
        ("7", json!({ "color": "yellow", "brand": "ford", "price": 100000 })),
        ("8", json!({ "color": "yellow", "brand": "ford", "price": 110000 })),
        ("9", json!({ "color": "blue", "brand": "bmw", "price": 25000 })),
    ]
}

/// `n` numbered events.
pub fn events(n: usize) -> Vec<(String, Value)> {
    (1..=n)
        .map(|i| (format!("e{}", i), json!({ "seq": i, "kind": "click" })))
        .collect()
}
