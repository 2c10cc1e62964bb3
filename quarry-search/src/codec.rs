//! Wire codec.
//!
//! Encoding turns a [`SearchRequest`] into the cluster's search body.
//! Decoding turns a reply back into hits and an [`AggregationResults`]
//! tree. The reply alone does not say which aggregation kind produced a
//! given name, so decoding walks the request's aggregation map and the
//! reply's map side by side and parses each entry by the kind that was
//! requested under that name.

use crate::{
    aggregation::{Aggregation, ResultShape},
    document::{Document, DocumentMeta, Hit, decode_source},
    error::{Result, SearchError},
    geo::{GeoBox, GeoPoint},
    result::{AggregationNode, AggregationResults, Bucket, BucketKey, Percentile},
    search::{SearchRequest, SearchResponse},
};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::time::Duration;

// ============================================================================
// Encoding
// ============================================================================

/// Build the search body for a request. The request is validated first.
pub fn encode_search(request: &SearchRequest) -> Result<Value> {
    request.validate()?;

    let mut body = Map::new();

    if let Some(query) = &request.query {
        body.insert("query".to_string(), query.to_json());
    }

    if let Some(filter) = &request.post_filter {
        body.insert("post_filter".to_string(), filter.to_json());
    }

    if let Some(from) = request.from {
        body.insert("from".to_string(), json!(from));
    }

    if let Some(size) = request.size {
        body.insert("size".to_string(), json!(size));
    }

    if !request.sort.is_empty() {
        body.insert(
            "sort".to_string(),
            Value::Array(request.sort.iter().map(|s| s.to_json()).collect()),
        );
    }

    let mut source = Map::new();
    if !request.source_includes.is_empty() {
        source.insert("includes".to_string(), json!(request.source_includes));
    }
    if !request.source_excludes.is_empty() {
        source.insert("excludes".to_string(), json!(request.source_excludes));
    }
    if !source.is_empty() {
        body.insert("_source".to_string(), Value::Object(source));
    }

    if !request.aggregations.is_empty() {
        body.insert("aggs".to_string(), encode_aggregations(&request.aggregations));
    }

    if let Some(track) = request.track_total_hits {
        body.insert("track_total_hits".to_string(), json!(track));
    }

    if request.seq_no_primary_term {
        body.insert("seq_no_primary_term".to_string(), json!(true));
    }

    Ok(Value::Object(body))
}

/// Encode a name-keyed aggregation map.
pub fn encode_aggregations(aggregations: &BTreeMap<String, Aggregation>) -> Value {
    Value::Object(
        aggregations
            .iter()
            .map(|(name, agg)| (name.clone(), agg.to_json()))
            .collect(),
    )
}

/// Render a duration as a cluster time value: `10m`, `30s`, `500ms`.
pub fn time_value(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis == 0 {
        return "0ms".to_string();
    }
    if millis % 1000 != 0 {
        return format!("{}ms", millis);
    }
    let secs = duration.as_secs();
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60)] {
        if secs % size == 0 {
            return format!("{}{}", secs / size, unit);
        }
    }
    format!("{}s", secs)
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode a search reply, guided by the aggregations that were requested.
pub fn decode_search<T: Document>(
    body: &Value,
    requested: &BTreeMap<String, Aggregation>,
) -> Result<SearchResponse<T>> {
    let hits_obj = body
        .get("hits")
        .ok_or_else(|| SearchError::malformed("search reply without hits"))?;

    let raw_hits = hits_obj
        .get("hits")
        .and_then(Value::as_array)
        .ok_or_else(|| SearchError::malformed("hits.hits is not an array"))?;

    let mut hits = Vec::with_capacity(raw_hits.len());
    for hit in raw_hits {
        let meta = DocumentMeta::from_json(hit)?;
        let source = hit
            .get("_source")
            .ok_or_else(|| SearchError::malformed(format!("hit {} has no _source", meta.id)))?;
        let doc: T = decode_source(source)?;
        hits.push(Hit { doc, meta });
    }

    // Clusters before 7.0 report the total as a bare number.
    let (total, total_relation) = match hits_obj.get("total") {
        Some(Value::Number(n)) => (n.as_u64().unwrap_or(0), "eq".to_string()),
        Some(total) => (
            total["value"].as_u64().unwrap_or(0),
            total["relation"].as_str().unwrap_or("eq").to_string(),
        ),
        None => (hits.len() as u64, "eq".to_string()),
    };

    let aggregations = if requested.is_empty() {
        AggregationResults::new()
    } else {
        let reply = body
            .get("aggregations")
            .ok_or_else(|| SearchError::malformed("reply has no aggregations"))?;
        decode_aggregations(requested, reply, "")?
    };

    Ok(SearchResponse {
        total,
        total_relation,
        max_score: hits_obj["max_score"].as_f64(),
        hits,
        aggregations,
        took_ms: body["took"].as_u64().unwrap_or(0),
        timed_out: body["timed_out"].as_bool().unwrap_or(false),
        scroll_id: body["_scroll_id"].as_str().map(String::from),
    })
}

/// Decode a name-keyed aggregation reply against the request's map.
pub fn decode_aggregations(
    requested: &BTreeMap<String, Aggregation>,
    reply: &Value,
    path: &str,
) -> Result<AggregationResults> {
    let reply = reply
        .as_object()
        .ok_or_else(|| SearchError::malformed(format!("aggregations at '{}' are not an object", path)))?;

    let mut results = AggregationResults::new();
    for (name, agg) in requested {
        let here = if path.is_empty() {
            name.clone()
        } else {
            format!("{}>{}", path, name)
        };
        let value = reply
            .get(name)
            .ok_or_else(|| SearchError::malformed(format!("aggregation '{}' missing from reply", here)))?;
        results.insert(name.clone(), decode_node(agg, value, &here)?);
    }
    Ok(results)
}

fn decode_node(agg: &Aggregation, value: &Value, path: &str) -> Result<AggregationNode> {
    let agg_type = agg.agg_type();
    let object = value
        .as_object()
        .ok_or_else(|| SearchError::malformed(format!("'{}' is not an object", path)))?;
    let mismatch = |expected: &str| {
        SearchError::malformed(format!(
            "'{}' was requested as {} but the reply has no {}",
            path, agg_type, expected
        ))
    };

    match agg_type.shape() {
        ResultShape::MultiBucket => {
            let buckets = match object.get("buckets") {
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|b| decode_bucket(agg, b, path))
                    .collect::<Result<Vec<_>>>()?,
                _ => return Err(mismatch("bucket list")),
            };
            Ok(AggregationNode::Buckets { agg_type, buckets })
        }
        ResultShape::SingleBucket => {
            let doc_count = object
                .get("doc_count")
                .and_then(Value::as_u64)
                .ok_or_else(|| mismatch("doc_count"))?;
            Ok(AggregationNode::SingleBucket {
                agg_type,
                doc_count,
                aggregations: decode_aggregations(agg.sub_aggregations(), value, path)?,
            })
        }
        ResultShape::Value => {
            let raw = object.get("value").ok_or_else(|| mismatch("value"))?;
            let value = match raw {
                Value::Null => None,
                Value::Number(n) => n.as_f64(),
                _ => return Err(mismatch("numeric value")),
            };
            Ok(AggregationNode::Value { agg_type, value })
        }
        ResultShape::Percentiles => {
            let values = match object.get("values") {
                Some(Value::Object(map)) => map
                    .iter()
                    .filter(|(k, _)| !k.ends_with("_as_string"))
                    .map(|(k, v)| -> Result<Percentile> {
                        let key = k.parse::<f64>().map_err(|_| mismatch("numeric percent keys"))?;
                        Ok(Percentile {
                            key,
                            value: v.as_f64(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|item| -> Result<Percentile> {
                        Ok(Percentile {
                            key: item["key"].as_f64().ok_or_else(|| mismatch("percent keys"))?,
                            value: item["value"].as_f64(),
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
                _ => return Err(mismatch("values")),
            };
            let mut values = values;
            values.sort_by(|a, b| a.key.total_cmp(&b.key));
            Ok(AggregationNode::Percentiles { agg_type, values })
        }
        ResultShape::Bounds => match object.get("bounds") {
            None => Ok(AggregationNode::GeoBounds(None)),
            Some(bounds) => {
                let corner = |name: &str| {
                    bounds
                        .get(name)
                        .and_then(GeoPoint::from_json)
                        .ok_or_else(|| mismatch("bounds corners"))
                };
                Ok(AggregationNode::GeoBounds(Some(GeoBox {
                    top_left: corner("top_left")?,
                    bottom_right: corner("bottom_right")?,
                })))
            }
        },
    }
}

fn decode_bucket(agg: &Aggregation, bucket: &Value, path: &str) -> Result<Bucket> {
    let key = match bucket.get("key") {
        Some(Value::String(s)) => BucketKey::Text(s.clone()),
        Some(Value::Number(n)) => BucketKey::Number(n.as_f64().unwrap_or_default()),
        Some(Value::Bool(b)) => BucketKey::Text(b.to_string()),
        _ => {
            return Err(SearchError::malformed(format!(
                "bucket of '{}' has no usable key",
                path
            )));
        }
    };
    let doc_count = bucket
        .get("doc_count")
        .and_then(Value::as_u64)
        .ok_or_else(|| SearchError::malformed(format!("bucket of '{}' has no doc_count", path)))?;

    let here = format!("{}[{}]", path, key);
    Ok(Bucket {
        key_as_string: bucket["key_as_string"].as_str().map(String::from),
        doc_count,
        from: bucket["from"].as_f64(),
        to: bucket["to"].as_f64(),
        aggregations: decode_aggregations(agg.sub_aggregations(), bucket, &here)?,
        key,
    })
}

/// Map an error reply to the error taxonomy.
pub fn rejection(status: u16, body: &Value) -> SearchError {
    let error = body.get("error");
    let root = error
        .and_then(|e| e.get("root_cause"))
        .and_then(Value::as_array)
        .and_then(|causes| causes.first());
    let error_type = error
        .and_then(|e| e.get("type"))
        .or_else(|| root.and_then(|r| r.get("type")))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let reason = error
        .and_then(|e| e.get("reason"))
        .and_then(Value::as_str)
        .map(String::from)
        .or_else(|| error.and_then(Value::as_str).map(String::from))
        // Proxies and recovering nodes answer in plain text.
        .or_else(|| body.as_str().map(|text| text.trim().to_string()))
        .filter(|reason| !reason.is_empty())
        .unwrap_or_else(|| format!("HTTP {}", status));

    let root_type = root.and_then(|r| r["type"].as_str()).unwrap_or_default();
    if error_type == "search_context_missing_exception"
        || root_type == "search_context_missing_exception"
    {
        return SearchError::CursorExpired(reason);
    }
    if status == 409 || error_type == "version_conflict_engine_exception" {
        return SearchError::VersionConflict(reason);
    }

    SearchError::RemoteRejected {
        status,
        error_type,
        reason,
    }
}
