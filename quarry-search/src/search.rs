//! Search requests and responses.

use crate::{
    aggregation::{Aggregation, validate_name},
    document::Hit,
    error::{Result, SearchError},
    geo::{DistanceUnit, GeoPoint},
    query::Query,
    result::AggregationResults,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;

/// A search against one or more indices.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub(crate) indices: Vec<String>,
    pub(crate) query: Option<Query>,
    pub(crate) post_filter: Option<Query>,
    pub(crate) sort: Vec<SortSpec>,
    pub(crate) from: Option<u64>,
    pub(crate) size: Option<u64>,
    pub(crate) scroll: Option<Duration>,
    pub(crate) aggregations: BTreeMap<String, Aggregation>,
    pub(crate) track_total_hits: Option<bool>,
    pub(crate) source_includes: Vec<String>,
    pub(crate) source_excludes: Vec<String>,
    pub(crate) seq_no_primary_term: bool,
}

impl SearchRequest {
    /// Create a search against one index.
    pub fn new(index: impl Into<String>) -> Self {
        Self::indices([index.into()])
    }

    /// Create a search against several indices.
    pub fn indices<I: Into<String>>(indices: impl IntoIterator<Item = I>) -> Self {
        Self {
            indices: indices.into_iter().map(Into::into).collect(),
            query: None,
            post_filter: None,
            sort: Vec::new(),
            from: None,
            size: None,
            scroll: None,
            aggregations: BTreeMap::new(),
            track_total_hits: None,
            source_includes: Vec::new(),
            source_excludes: Vec::new(),
            seq_no_primary_term: false,
        }
    }

    /// Set the query.
    pub fn query(mut self, query: Query) -> Self {
        self.query = Some(query);
        self
    }

    /// Filter hits after aggregations are computed.
    pub fn post_filter(mut self, query: Query) -> Self {
        self.post_filter = Some(query);
        self
    }

    /// Add a sort spec. Specs apply in the order they are added.
    pub fn sort(mut self, spec: SortSpec) -> Self {
        self.sort.push(spec);
        self
    }

    /// Set pagination offset.
    pub fn from(mut self, from: u64) -> Self {
        self.from = Some(from);
        self
    }

    /// Set result size limit (page size when scrolling).
    pub fn size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Keep a scroll snapshot alive for `keep_alive` between pages.
    pub fn scroll(mut self, keep_alive: Duration) -> Self {
        self.scroll = Some(keep_alive);
        self
    }

    /// Add a top-level aggregation.
    pub fn aggregation(mut self, name: impl Into<String>, agg: Aggregation) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        if self.aggregations.contains_key(&name) {
            return Err(SearchError::invalid(format!(
                "duplicate aggregation name '{}'",
                name
            )));
        }
        self.aggregations.insert(name, agg);
        Ok(self)
    }

    /// Track total hits accurately (for counts > 10000).
    pub fn track_total_hits(mut self, track: bool) -> Self {
        self.track_total_hits = Some(track);
        self
    }

    /// Include only specific fields in the response.
    pub fn source_includes<F: Into<String>>(mut self, fields: impl IntoIterator<Item = F>) -> Self {
        self.source_includes = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Exclude specific fields from the response.
    pub fn source_excludes<F: Into<String>>(mut self, fields: impl IntoIterator<Item = F>) -> Self {
        self.source_excludes = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Return version tokens with every hit.
    pub fn seq_no_primary_term(mut self, enabled: bool) -> Self {
        self.seq_no_primary_term = enabled;
        self
    }

    /// Searched indices.
    pub fn index_names(&self) -> &[String] {
        &self.indices
    }

    /// Requested top-level aggregations.
    pub fn aggregations(&self) -> &BTreeMap<String, Aggregation> {
        &self.aggregations
    }

    /// Scroll keep-alive, if this is a scroll search.
    pub fn scroll_keep_alive(&self) -> Option<Duration> {
        self.scroll
    }

    /// Check cross-option constraints.
    pub fn validate(&self) -> Result<()> {
        if self.indices.is_empty() || self.indices.iter().any(|i| i.trim().is_empty()) {
            return Err(SearchError::invalid("search requires at least one index"));
        }
        if self.scroll.is_some() && self.from.is_some_and(|f| f > 0) {
            return Err(SearchError::invalid("from cannot be combined with scroll"));
        }
        if self.scroll.is_some_and(|d| d.is_zero()) {
            return Err(SearchError::invalid("scroll keep-alive must be positive"));
        }
        Ok(())
    }
}

/// Sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl SortOrder {
    /// Wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// One sort criterion.
#[derive(Debug, Clone, PartialEq)]
pub enum SortSpec {
    /// By a document field.
    Field {
        /// Field name.
        field: String,
        /// Direction.
        order: SortOrder,
    },
    /// By relevance.
    Score(SortOrder),
    /// By distance from an origin.
    GeoDistance {
        /// Geo-point field.
        field: String,
        /// Origin point.
        origin: GeoPoint,
        /// Unit of the reported sort value.
        unit: DistanceUnit,
        /// Direction.
        order: SortOrder,
    },
}

impl SortSpec {
    /// Sort by a field.
    pub fn field(field: impl Into<String>, order: SortOrder) -> Self {
        SortSpec::Field {
            field: field.into(),
            order,
        }
    }

    /// Sort by score (relevance).
    pub fn score(order: SortOrder) -> Self {
        SortSpec::Score(order)
    }

    /// Sort by distance from `origin`.
    pub fn geo_distance(
        field: impl Into<String>,
        origin: GeoPoint,
        unit: DistanceUnit,
        order: SortOrder,
    ) -> Self {
        SortSpec::GeoDistance {
            field: field.into(),
            origin,
            unit,
            order,
        }
    }

    pub(crate) fn to_json(&self) -> Value {
        match self {
            SortSpec::Field { field, order } => json!({ field: { "order": order.as_str() } }),
            SortSpec::Score(order) => json!({ "_score": { "order": order.as_str() } }),
            SortSpec::GeoDistance {
                field,
                origin,
                unit,
                order,
            } => json!({
                "_geo_distance": {
                    field: origin.to_json(),
                    "order": order.as_str(),
                    "unit": unit.as_str(),
                }
            }),
        }
    }
}

/// Search result.
#[derive(Debug, Clone)]
pub struct SearchResponse<T> {
    /// Total matching documents.
    pub total: u64,
    /// Total relation ("eq" or "gte").
    pub total_relation: String,
    /// Maximum score.
    pub max_score: Option<f64>,
    /// Matching documents with metadata, in cluster order.
    pub hits: Vec<Hit<T>>,
    /// Aggregation results, shaped like the request.
    pub aggregations: AggregationResults,
    /// Time taken in milliseconds.
    pub took_ms: u64,
    /// Whether the cluster stopped early.
    pub timed_out: bool,
    /// Scroll token for the next page.
    pub scroll_id: Option<String>,
}

impl<T> SearchResponse<T> {
    /// Documents without metadata.
    pub fn documents(self) -> Vec<T> {
        self.hits.into_iter().map(|h| h.doc).collect()
    }

    /// Ids of the returned hits, in order.
    pub fn ids(&self) -> Vec<&str> {
        self.hits.iter().map(|h| h.meta.id.as_str()).collect()
    }
}

/// Per-shard explanation from query validation.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryExplanation {
    /// Index the explanation is for.
    pub index: Option<String>,
    /// Whether the query is valid there.
    pub valid: bool,
    /// Rewritten query text.
    pub explanation: Option<String>,
    /// Error text, when invalid.
    pub error: Option<String>,
}

/// Result of validating a query without running it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryValidation {
    /// Whether the query is valid on every shard.
    pub valid: bool,
    /// Per-index explanations.
    pub explanations: Vec<QueryExplanation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_and_scroll_rejected() {
        let request = SearchRequest::new("students")
            .from(10)
            .scroll(Duration::from_secs(600));
        assert!(matches!(
            request.validate(),
            Err(SearchError::InvalidExpression(_))
        ));

        let request = SearchRequest::new("students")
            .size(2)
            .scroll(Duration::from_secs(600));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_requires_index() {
        let none: Vec<String> = Vec::new();
        assert!(SearchRequest::indices(none).validate().is_err());
    }

    #[test]
    fn test_duplicate_top_level_aggregation() {
        let request = SearchRequest::new("cars")
            .aggregation("total", Aggregation::sum("price").unwrap())
            .unwrap()
            .aggregation("total", Aggregation::avg("price").unwrap());
        assert!(request.is_err());
    }

    #[test]
    fn test_sort_spec_encoding() {
        assert_eq!(
            SortSpec::field("age", SortOrder::Desc).to_json(),
            json!({ "age": { "order": "desc" } })
        );
        let origin = GeoPoint::new(40.0, 116.0).unwrap();
        assert_eq!(
            SortSpec::geo_distance("location", origin, DistanceUnit::Kilometers, SortOrder::Asc)
                .to_json(),
            json!({ "_geo_distance": {
                "location": { "lat": 40.0, "lon": 116.0 },
                "order": "asc",
                "unit": "km"
            } })
        );
    }
}
