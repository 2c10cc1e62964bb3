//! Aggregation result tree.
//!
//! Results are keyed exactly like the request that produced them, so a
//! caller walks them with the names used to build the request. A path
//! segment is either `name` or, for multi-bucket aggregations, `name[key]`
//! (also `name['key']`) selecting one bucket:
//!
//! ```text
//! colors['yellow'] > makes['ford'] > totalPrice
//! ```

use crate::aggregation::AggregationType;
use crate::error::{Result, SearchError};
use crate::geo::GeoBox;
use std::collections::BTreeMap;
use std::fmt;

/// Name-keyed aggregation results at one level of the tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationResults(BTreeMap<String, AggregationNode>);

/// One decoded aggregation.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationNode {
    /// Ordered buckets from a multi-bucket aggregation.
    Buckets {
        /// Requested kind.
        agg_type: AggregationType,
        /// Buckets in cluster order.
        buckets: Vec<Bucket>,
    },
    /// A `filter` or `global` bucket.
    SingleBucket {
        /// Requested kind.
        agg_type: AggregationType,
        /// Documents in the bucket.
        doc_count: u64,
        /// Sub-aggregation results.
        aggregations: AggregationResults,
    },
    /// A single metric value. `None` when no document had the field.
    Value {
        /// Requested kind.
        agg_type: AggregationType,
        /// Metric value.
        value: Option<f64>,
    },
    /// Percentiles or percentile ranks, ordered by key.
    Percentiles {
        /// Requested kind.
        agg_type: AggregationType,
        /// Key/value pairs.
        values: Vec<Percentile>,
    },
    /// Bounding box of a `geo_bounds` aggregation.
    GeoBounds(Option<GeoBox>),
}

/// One bucket of a multi-bucket aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    /// Bucket key.
    pub key: BucketKey,
    /// Formatted key (dates, ranges).
    pub key_as_string: Option<String>,
    /// Documents in the bucket.
    pub doc_count: u64,
    /// Lower bound of a range bucket.
    pub from: Option<f64>,
    /// Upper bound of a range bucket.
    pub to: Option<f64>,
    /// Sub-aggregation results.
    pub aggregations: AggregationResults,
}

/// A bucket key.
#[derive(Debug, Clone, PartialEq)]
pub enum BucketKey {
    /// Keyword, geohash, or range key.
    Text(String),
    /// Numeric or date key.
    Number(f64),
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketKey::Text(s) => f.write_str(s),
            BucketKey::Number(n) => write!(f, "{}", n),
        }
    }
}

/// A percentile (or rank) and its value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Percentile {
    /// Percent, or the ranked value for percentile ranks.
    pub key: f64,
    /// Value at that percent, or the rank of that value.
    pub value: Option<f64>,
}

impl Bucket {
    /// Whether `selector` names this bucket.
    pub fn matches(&self, selector: &str) -> bool {
        if self.key_as_string.as_deref() == Some(selector) {
            return true;
        }
        match &self.key {
            BucketKey::Text(text) => text == selector,
            BucketKey::Number(n) => selector.parse::<f64>().is_ok_and(|s| s == *n),
        }
    }

    /// A sub-aggregation of this bucket.
    pub fn get(&self, name: &str) -> Option<&AggregationNode> {
        self.aggregations.0.get(name)
    }

    fn selector(&self) -> String {
        match &self.key {
            BucketKey::Text(text) => format!("'{}'", text),
            BucketKey::Number(n) => n.to_string(),
        }
    }
}

impl AggregationNode {
    /// Kind that produced this node.
    pub fn agg_type(&self) -> AggregationType {
        match self {
            AggregationNode::Buckets { agg_type, .. }
            | AggregationNode::SingleBucket { agg_type, .. }
            | AggregationNode::Value { agg_type, .. }
            | AggregationNode::Percentiles { agg_type, .. } => *agg_type,
            AggregationNode::GeoBounds(_) => AggregationType::GeoBounds,
        }
    }

    /// Whether this node holds buckets.
    pub fn is_bucketing(&self) -> bool {
        matches!(
            self,
            AggregationNode::Buckets { .. } | AggregationNode::SingleBucket { .. }
        )
    }

    /// Buckets of a multi-bucket node.
    pub fn buckets(&self) -> Option<&[Bucket]> {
        match self {
            AggregationNode::Buckets { buckets, .. } => Some(buckets),
            _ => None,
        }
    }

    /// Metric value of a single-value node.
    pub fn value(&self) -> Option<f64> {
        match self {
            AggregationNode::Value { value, .. } => *value,
            _ => None,
        }
    }

    /// Document count of a single-bucket node.
    pub fn doc_count(&self) -> Option<u64> {
        match self {
            AggregationNode::SingleBucket { doc_count, .. } => Some(*doc_count),
            _ => None,
        }
    }

    /// Sub-results of a single-bucket node.
    pub fn aggregations(&self) -> Option<&AggregationResults> {
        match self {
            AggregationNode::SingleBucket { aggregations, .. } => Some(aggregations),
            _ => None,
        }
    }

    /// All percentile pairs.
    pub fn percentiles(&self) -> Option<&[Percentile]> {
        match self {
            AggregationNode::Percentiles { values, .. } => Some(values),
            _ => None,
        }
    }

    /// Value at `key` of a percentiles node.
    pub fn percentile(&self, key: f64) -> Option<f64> {
        self.percentiles()?
            .iter()
            .find(|p| (p.key - key).abs() < 1e-9)
            .and_then(|p| p.value)
    }

    /// Bounding box of a geo_bounds node.
    pub fn bounds(&self) -> Option<GeoBox> {
        match self {
            AggregationNode::GeoBounds(bounds) => *bounds,
            _ => None,
        }
    }
}

struct Segment<'a> {
    name: &'a str,
    selector: Option<&'a str>,
}

fn parse_segment(raw: &str) -> Result<Segment<'_>> {
    let raw = raw.trim();
    let Some(open) = raw.find('[') else {
        return Ok(Segment {
            name: raw,
            selector: None,
        });
    };
    let inner = raw[open + 1..]
        .strip_suffix(']')
        .ok_or_else(|| SearchError::NameNotFound(format!("unbalanced selector in '{}'", raw)))?;
    let inner = inner
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
        .unwrap_or(inner);
    Ok(Segment {
        name: &raw[..open],
        selector: Some(inner),
    })
}

impl AggregationResults {
    /// Create an empty result set.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, name: String, node: AggregationNode) {
        self.0.insert(name, node);
    }

    /// Resolve a name path to a node.
    ///
    /// Every segment but the last must lead into buckets: a single-bucket
    /// node by name, a multi-bucket node by `name[key]`.
    pub fn get<P: AsRef<str>>(&self, path: &[P]) -> Result<&AggregationNode> {
        let (last, parents) = path
            .split_last()
            .ok_or_else(|| SearchError::NameNotFound("empty path".to_string()))?;

        let mut level = self;
        for (depth, raw) in parents.iter().enumerate() {
            level = level.descend(raw.as_ref(), &path[..=depth])?;
        }

        let segment = parse_segment(last.as_ref())?;
        if segment.selector.is_some() {
            return Err(SearchError::NameNotFound(format!(
                "'{}' selects a bucket, not an aggregation; use bucket()",
                join(path)
            )));
        }
        level
            .0
            .get(segment.name)
            .ok_or_else(|| SearchError::NameNotFound(join(path)))
    }

    /// Resolve a path whose last segment selects a bucket.
    pub fn bucket<P: AsRef<str>>(&self, path: &[P]) -> Result<&Bucket> {
        let (last, parents) = path
            .split_last()
            .ok_or_else(|| SearchError::NameNotFound("empty path".to_string()))?;

        let mut level = self;
        for (depth, raw) in parents.iter().enumerate() {
            level = level.descend(raw.as_ref(), &path[..=depth])?;
        }

        let segment = parse_segment(last.as_ref())?;
        let selector = segment.selector.ok_or_else(|| {
            SearchError::NameNotFound(format!("'{}' does not select a bucket", join(path)))
        })?;
        level.select(segment.name, selector, path)
    }

    /// Resolve a plain name path, fanning out over every bucket of each
    /// multi-bucket node on the way. Nodes come back in bucket order.
    pub fn collect<P: AsRef<str>>(&self, path: &[P]) -> Result<Vec<&AggregationNode>> {
        let (first, rest) = path
            .split_first()
            .ok_or_else(|| SearchError::NameNotFound("empty path".to_string()))?;
        let node = self
            .0
            .get(first.as_ref())
            .ok_or_else(|| SearchError::NameNotFound(first.as_ref().to_string()))?;
        if rest.is_empty() {
            return Ok(vec![node]);
        }

        match node {
            AggregationNode::SingleBucket { aggregations, .. } => aggregations
                .collect(rest)
                .map_err(|e| prefix_error(first.as_ref(), e)),
            AggregationNode::Buckets { buckets, .. } => {
                let mut nodes = Vec::new();
                for bucket in buckets {
                    nodes.extend(
                        bucket
                            .aggregations
                            .collect(rest)
                            .map_err(|e| prefix_error(first.as_ref(), e))?,
                    );
                }
                Ok(nodes)
            }
            _ => Err(SearchError::NameNotFound(format!(
                "'{}' is a metric and has no sub-aggregations",
                first.as_ref()
            ))),
        }
    }

    fn descend<P: AsRef<str>>(&self, raw: &str, path: &[P]) -> Result<&AggregationResults> {
        let segment = parse_segment(raw)?;
        match segment.selector {
            Some(selector) => Ok(&self.select(segment.name, selector, path)?.aggregations),
            None => match self.0.get(segment.name) {
                Some(AggregationNode::SingleBucket { aggregations, .. }) => Ok(aggregations),
                Some(AggregationNode::Buckets { .. }) => Err(SearchError::NameNotFound(format!(
                    "'{}' has multiple buckets; select one with {}[key]",
                    join(path),
                    segment.name
                ))),
                Some(_) => Err(SearchError::NameNotFound(format!(
                    "'{}' is a metric and has no sub-aggregations",
                    join(path)
                ))),
                None => Err(SearchError::NameNotFound(join(path))),
            },
        }
    }

    fn select<P: AsRef<str>>(&self, name: &str, selector: &str, path: &[P]) -> Result<&Bucket> {
        let buckets = match self.0.get(name) {
            Some(AggregationNode::Buckets { buckets, .. }) => buckets,
            Some(_) => {
                return Err(SearchError::NameNotFound(format!(
                    "'{}' has no buckets to select from",
                    join(path)
                )));
            }
            None => return Err(SearchError::NameNotFound(join(path))),
        };
        buckets
            .iter()
            .find(|b| b.matches(selector))
            .ok_or_else(|| SearchError::NameNotFound(join(path)))
    }

    /// A top-level node by name.
    pub fn node(&self, name: &str) -> Option<&AggregationNode> {
        self.0.get(name)
    }

    /// Top-level names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Iterate top-level nodes.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AggregationNode)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of top-level nodes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no results.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Every concrete path in the tree, each usable with [`get`](Self::get).
    pub fn paths(&self) -> Vec<Vec<String>> {
        let mut out = Vec::new();
        self.walk(&mut Vec::new(), &mut out);
        out
    }

    fn walk(&self, prefix: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
        for (name, node) in &self.0 {
            prefix.push(name.clone());
            out.push(prefix.clone());
            prefix.pop();

            match node {
                AggregationNode::SingleBucket { aggregations, .. } => {
                    prefix.push(name.clone());
                    aggregations.walk(prefix, out);
                    prefix.pop();
                }
                AggregationNode::Buckets { buckets, .. } => {
                    for bucket in buckets {
                        prefix.push(format!("{}[{}]", name, bucket.selector()));
                        bucket.aggregations.walk(prefix, out);
                        prefix.pop();
                    }
                }
                _ => {}
            }
        }
    }
}

fn join<P: AsRef<str>>(path: &[P]) -> String {
    path.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(">")
}

fn prefix_error(name: &str, err: SearchError) -> SearchError {
    match err {
        SearchError::NameNotFound(rest) => SearchError::NameNotFound(format!("{}>{}", name, rest)),
        other => other,
    }
}
