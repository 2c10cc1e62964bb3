//! Aggregation expressions.
//!
//! An [`Aggregation`] is one aggregation kind plus a name-keyed set of
//! child aggregations. Structural rules are checked while the tree is
//! assembled, so a tree that exists is a tree the cluster will accept:
//! sibling names are unique and path-safe, metric aggregations are leaves,
//! and `global` only appears at the top level.

use crate::error::{Result, SearchError};
use crate::geo::{DistanceUnit, GeoDistanceType, GeoPoint};
use crate::query::Query;
use crate::search::SortOrder;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;

/// A named-children aggregation tree node.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    kind: AggregationKind,
    sub_aggregations: BTreeMap<String, Aggregation>,
}

/// Aggregation kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationKind {
    /// One bucket per distinct value.
    Terms {
        /// Field to aggregate on.
        field: String,
        /// Maximum number of buckets.
        size: Option<u32>,
        /// Bucket ordering.
        order: Option<TermsOrder>,
    },
    /// Fixed-width numeric buckets.
    Histogram {
        /// Field to aggregate on.
        field: String,
        /// Bucket width.
        interval: f64,
    },
    /// Date buckets.
    DateHistogram {
        /// Field containing dates.
        field: String,
        /// Bucket interval.
        interval: DateInterval,
        /// Format for `key_as_string`.
        format: Option<String>,
    },
    /// Caller-defined numeric ranges.
    Range {
        /// Field to aggregate on.
        field: String,
        /// Range definitions.
        ranges: Vec<RangeBucket>,
    },
    /// Distance rings around an origin.
    GeoDistance {
        /// Geo-point field.
        field: String,
        /// Origin point.
        origin: GeoPoint,
        /// Ring definitions, in `unit`.
        ranges: Vec<RangeBucket>,
        /// Unit of the ring bounds.
        unit: Option<DistanceUnit>,
        /// How distances are computed.
        distance_type: Option<GeoDistanceType>,
    },
    /// Geohash cells.
    GeohashGrid {
        /// Geo-point field.
        field: String,
        /// Geohash length, 1 to 12.
        precision: u8,
    },
    /// Bounding box of all points.
    GeoBounds {
        /// Geo-point field.
        field: String,
    },
    /// Approximate distinct count.
    Cardinality {
        /// Field to count unique values.
        field: String,
        /// Counts below this are close to exact.
        precision_threshold: Option<u32>,
    },
    /// Sum of values.
    Sum {
        /// Field to sum.
        field: String,
    },
    /// Average of values.
    Avg {
        /// Field to average.
        field: String,
    },
    /// Minimum value.
    Min {
        /// Field to find minimum.
        field: String,
    },
    /// Maximum value.
    Max {
        /// Field to find maximum.
        field: String,
    },
    /// Values at the given percents.
    Percentiles {
        /// Field to measure.
        field: String,
        /// Percents within [0, 100]. Empty uses the cluster defaults.
        percents: Vec<f64>,
    },
    /// Percent of values below each given value.
    PercentileRanks {
        /// Field to measure.
        field: String,
        /// Values to rank.
        values: Vec<f64>,
    },
    /// Single bucket of documents matching a query.
    Filter {
        /// Bucket membership query.
        query: Box<Query>,
    },
    /// Single bucket of every document, ignoring the search query.
    Global,
}

/// Discriminant of an [`AggregationKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregationType {
    /// `terms`
    Terms,
    /// `histogram`
    Histogram,
    /// `date_histogram`
    DateHistogram,
    /// `range`
    Range,
    /// `geo_distance`
    GeoDistance,
    /// `geohash_grid`
    GeohashGrid,
    /// `geo_bounds`
    GeoBounds,
    /// `cardinality`
    Cardinality,
    /// `sum`
    Sum,
    /// `avg`
    Avg,
    /// `min`
    Min,
    /// `max`
    Max,
    /// `percentiles`
    Percentiles,
    /// `percentile_ranks`
    PercentileRanks,
    /// `filter`
    Filter,
    /// `global`
    Global,
}

/// The shape a kind's result takes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultShape {
    /// `{"buckets": [...]}`
    MultiBucket,
    /// `{"doc_count": n, <sub-aggregations>}`
    SingleBucket,
    /// `{"value": x}`
    Value,
    /// `{"values": {...}}`
    Percentiles,
    /// `{"bounds": {...}}`
    Bounds,
}

impl AggregationType {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationType::Terms => "terms",
            AggregationType::Histogram => "histogram",
            AggregationType::DateHistogram => "date_histogram",
            AggregationType::Range => "range",
            AggregationType::GeoDistance => "geo_distance",
            AggregationType::GeohashGrid => "geohash_grid",
            AggregationType::GeoBounds => "geo_bounds",
            AggregationType::Cardinality => "cardinality",
            AggregationType::Sum => "sum",
            AggregationType::Avg => "avg",
            AggregationType::Min => "min",
            AggregationType::Max => "max",
            AggregationType::Percentiles => "percentiles",
            AggregationType::PercentileRanks => "percentile_ranks",
            AggregationType::Filter => "filter",
            AggregationType::Global => "global",
        }
    }

    /// Result shape for this kind.
    pub fn shape(&self) -> ResultShape {
        match self {
            AggregationType::Terms
            | AggregationType::Histogram
            | AggregationType::DateHistogram
            | AggregationType::Range
            | AggregationType::GeoDistance
            | AggregationType::GeohashGrid => ResultShape::MultiBucket,
            AggregationType::Filter | AggregationType::Global => ResultShape::SingleBucket,
            AggregationType::Cardinality
            | AggregationType::Sum
            | AggregationType::Avg
            | AggregationType::Min
            | AggregationType::Max => ResultShape::Value,
            AggregationType::Percentiles | AggregationType::PercentileRanks => {
                ResultShape::Percentiles
            }
            AggregationType::GeoBounds => ResultShape::Bounds,
        }
    }

    /// Whether results are bucketed and may carry sub-aggregations.
    pub fn is_bucketing(&self) -> bool {
        matches!(
            self.shape(),
            ResultShape::MultiBucket | ResultShape::SingleBucket
        )
    }
}

impl std::fmt::Display for AggregationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AggregationKind {
    /// Discriminant.
    pub fn agg_type(&self) -> AggregationType {
        match self {
            AggregationKind::Terms { .. } => AggregationType::Terms,
            AggregationKind::Histogram { .. } => AggregationType::Histogram,
            AggregationKind::DateHistogram { .. } => AggregationType::DateHistogram,
            AggregationKind::Range { .. } => AggregationType::Range,
            AggregationKind::GeoDistance { .. } => AggregationType::GeoDistance,
            AggregationKind::GeohashGrid { .. } => AggregationType::GeohashGrid,
            AggregationKind::GeoBounds { .. } => AggregationType::GeoBounds,
            AggregationKind::Cardinality { .. } => AggregationType::Cardinality,
            AggregationKind::Sum { .. } => AggregationType::Sum,
            AggregationKind::Avg { .. } => AggregationType::Avg,
            AggregationKind::Min { .. } => AggregationType::Min,
            AggregationKind::Max { .. } => AggregationType::Max,
            AggregationKind::Percentiles { .. } => AggregationType::Percentiles,
            AggregationKind::PercentileRanks { .. } => AggregationType::PercentileRanks,
            AggregationKind::Filter { .. } => AggregationType::Filter,
            AggregationKind::Global => AggregationType::Global,
        }
    }

    /// Whether results are bucketed and may carry sub-aggregations.
    pub fn is_bucketing(&self) -> bool {
        self.agg_type().is_bucketing()
    }

    fn body(&self) -> Value {
        match self {
            AggregationKind::Terms { field, size, order } => {
                let mut terms = json!({ "field": field });
                if let Some(s) = size {
                    terms["size"] = json!(s);
                }
                if let Some(order) = order {
                    terms["order"] = order.to_json();
                }
                terms
            }
            AggregationKind::Histogram { field, interval } => {
                json!({ "field": field, "interval": interval })
            }
            AggregationKind::DateHistogram {
                field,
                interval,
                format,
            } => {
                let mut dh = json!({ "field": field });
                match interval {
                    DateInterval::Calendar(unit) => dh["calendar_interval"] = json!(unit.as_str()),
                    DateInterval::Fixed(fixed) => dh["fixed_interval"] = json!(fixed),
                }
                if let Some(f) = format {
                    dh["format"] = json!(f);
                }
                dh
            }
            AggregationKind::Range { field, ranges } => json!({
                "field": field,
                "ranges": ranges.iter().map(RangeBucket::to_json).collect::<Vec<_>>(),
            }),
            AggregationKind::GeoDistance {
                field,
                origin,
                ranges,
                unit,
                distance_type,
            } => {
                let mut gd = json!({
                    "field": field,
                    "origin": origin.to_json(),
                    "ranges": ranges.iter().map(RangeBucket::to_json).collect::<Vec<_>>(),
                });
                if let Some(u) = unit {
                    gd["unit"] = json!(u.as_str());
                }
                if let Some(t) = distance_type {
                    gd["distance_type"] = json!(t.as_str());
                }
                gd
            }
            AggregationKind::GeohashGrid { field, precision } => {
                json!({ "field": field, "precision": precision })
            }
            AggregationKind::Cardinality {
                field,
                precision_threshold,
            } => {
                let mut card = json!({ "field": field });
                if let Some(t) = precision_threshold {
                    card["precision_threshold"] = json!(t);
                }
                card
            }
            AggregationKind::GeoBounds { field }
            | AggregationKind::Sum { field }
            | AggregationKind::Avg { field }
            | AggregationKind::Min { field }
            | AggregationKind::Max { field } => json!({ "field": field }),
            AggregationKind::Percentiles { field, percents } => {
                let mut p = json!({ "field": field });
                if !percents.is_empty() {
                    p["percents"] = json!(percents);
                }
                p
            }
            AggregationKind::PercentileRanks { field, values } => {
                json!({ "field": field, "values": values })
            }
            AggregationKind::Filter { query } => query.to_json(),
            AggregationKind::Global => json!({}),
        }
    }
}

impl Aggregation {
    fn leaf(kind: AggregationKind) -> Self {
        Self {
            kind,
            sub_aggregations: BTreeMap::new(),
        }
    }

    /// Start a terms aggregation. Finish with [`TermsAggregation::build`].
    pub fn terms(field: impl Into<String>) -> TermsAggregation {
        TermsAggregation::new(field)
    }

    /// Create a histogram aggregation; `interval` must be positive.
    pub fn histogram(field: impl Into<String>, interval: f64) -> Result<Self> {
        let field = field_name(field, "histogram")?;
        if !interval.is_finite() || interval <= 0.0 {
            return Err(SearchError::invalid(format!(
                "histogram interval {} must be positive",
                interval
            )));
        }
        Ok(Self::leaf(AggregationKind::Histogram { field, interval }))
    }

    /// Create a date_histogram aggregation.
    pub fn date_histogram(
        field: impl Into<String>,
        interval: DateInterval,
        format: Option<&str>,
    ) -> Result<Self> {
        let field = field_name(field, "date_histogram")?;
        if let DateInterval::Fixed(fixed) = &interval {
            validate_fixed_interval(fixed)?;
        }
        Ok(Self::leaf(AggregationKind::DateHistogram {
            field,
            interval,
            format: format.map(String::from),
        }))
    }

    /// Create a range aggregation.
    pub fn range(field: impl Into<String>, ranges: Vec<RangeBucket>) -> Result<Self> {
        let field = field_name(field, "range")?;
        validate_ranges(&ranges, "range")?;
        Ok(Self::leaf(AggregationKind::Range { field, ranges }))
    }

    /// Create a geo_distance aggregation with ring bounds in `unit`.
    pub fn geo_distance(
        field: impl Into<String>,
        origin: GeoPoint,
        ranges: Vec<RangeBucket>,
        unit: Option<DistanceUnit>,
        distance_type: Option<GeoDistanceType>,
    ) -> Result<Self> {
        let field = field_name(field, "geo_distance")?;
        validate_ranges(&ranges, "geo_distance")?;
        if ranges.iter().any(|r| r.from.unwrap_or(0.0) < 0.0) {
            return Err(SearchError::invalid("geo_distance ranges must be non-negative"));
        }
        Ok(Self::leaf(AggregationKind::GeoDistance {
            field,
            origin,
            ranges,
            unit,
            distance_type,
        }))
    }

    /// Create a geohash_grid aggregation; precision is 1 to 12.
    pub fn geohash_grid(field: impl Into<String>, precision: u8) -> Result<Self> {
        let field = field_name(field, "geohash_grid")?;
        if !(1..=12).contains(&precision) {
            return Err(SearchError::invalid(format!(
                "geohash precision {} is outside 1..=12",
                precision
            )));
        }
        Ok(Self::leaf(AggregationKind::GeohashGrid { field, precision }))
    }

    /// Create a geo_bounds aggregation.
    pub fn geo_bounds(field: impl Into<String>) -> Result<Self> {
        Ok(Self::leaf(AggregationKind::GeoBounds {
            field: field_name(field, "geo_bounds")?,
        }))
    }

    /// Create a cardinality aggregation.
    pub fn cardinality(field: impl Into<String>, precision_threshold: Option<u32>) -> Result<Self> {
        Ok(Self::leaf(AggregationKind::Cardinality {
            field: field_name(field, "cardinality")?,
            precision_threshold,
        }))
    }

    /// Create a sum aggregation.
    pub fn sum(field: impl Into<String>) -> Result<Self> {
        Ok(Self::leaf(AggregationKind::Sum {
            field: field_name(field, "sum")?,
        }))
    }

    /// Create an average aggregation.
    pub fn avg(field: impl Into<String>) -> Result<Self> {
        Ok(Self::leaf(AggregationKind::Avg {
            field: field_name(field, "avg")?,
        }))
    }

    /// Create a min aggregation.
    pub fn min(field: impl Into<String>) -> Result<Self> {
        Ok(Self::leaf(AggregationKind::Min {
            field: field_name(field, "min")?,
        }))
    }

    /// Create a max aggregation.
    pub fn max(field: impl Into<String>) -> Result<Self> {
        Ok(Self::leaf(AggregationKind::Max {
            field: field_name(field, "max")?,
        }))
    }

    /// Create a percentiles aggregation. An empty list uses the cluster defaults.
    pub fn percentiles(
        field: impl Into<String>,
        percents: impl IntoIterator<Item = f64>,
    ) -> Result<Self> {
        let field = field_name(field, "percentiles")?;
        let percents: Vec<f64> = percents.into_iter().collect();
        if let Some(bad) = percents.iter().find(|p| !(0.0..=100.0).contains(*p)) {
            return Err(SearchError::invalid(format!(
                "percent {} is outside [0, 100]",
                bad
            )));
        }
        Ok(Self::leaf(AggregationKind::Percentiles { field, percents }))
    }

    /// Create a percentile_ranks aggregation.
    pub fn percentile_ranks(
        field: impl Into<String>,
        values: impl IntoIterator<Item = f64>,
    ) -> Result<Self> {
        let field = field_name(field, "percentile_ranks")?;
        let values: Vec<f64> = values.into_iter().collect();
        if values.is_empty() {
            return Err(SearchError::invalid(
                "percentile_ranks requires at least one value",
            ));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(SearchError::invalid("percentile_ranks values must be finite"));
        }
        Ok(Self::leaf(AggregationKind::PercentileRanks { field, values }))
    }

    /// Single bucket of documents matching `query`.
    pub fn filter(query: Query) -> Self {
        Self::leaf(AggregationKind::Filter {
            query: Box::new(query),
        })
    }

    /// Single bucket of every document in the searched indices.
    pub fn global() -> Self {
        Self::leaf(AggregationKind::Global)
    }

    /// Attach a named child aggregation.
    pub fn with_sub_aggregation(mut self, name: impl Into<String>, child: Aggregation) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;

        if !self.kind.is_bucketing() {
            return Err(SearchError::invalid(format!(
                "{} aggregation cannot have sub-aggregations (adding '{}')",
                self.kind.agg_type(),
                name
            )));
        }
        if child.kind == AggregationKind::Global {
            return Err(SearchError::invalid(format!(
                "global aggregation '{}' must be at the top level",
                name
            )));
        }
        if self.sub_aggregations.contains_key(&name) {
            return Err(SearchError::invalid(format!(
                "duplicate aggregation name '{}'",
                name
            )));
        }

        self.sub_aggregations.insert(name, child);
        Ok(self)
    }

    /// Kind of this node.
    pub fn kind(&self) -> &AggregationKind {
        &self.kind
    }

    /// Discriminant of this node's kind.
    pub fn agg_type(&self) -> AggregationType {
        self.kind.agg_type()
    }

    /// Child aggregations by name.
    pub fn sub_aggregations(&self) -> &BTreeMap<String, Aggregation> {
        &self.sub_aggregations
    }

    /// Convert to JSON.
    pub fn to_json(&self) -> Value {
        let mut agg = Map::new();
        agg.insert(self.agg_type().as_str().to_string(), self.kind.body());
        if !self.sub_aggregations.is_empty() {
            agg.insert(
                "aggs".to_string(),
                Value::Object(
                    self.sub_aggregations
                        .iter()
                        .map(|(name, child)| (name.clone(), child.to_json()))
                        .collect(),
                ),
            );
        }
        Value::Object(agg)
    }
}

/// Builder for terms aggregations.
#[derive(Debug, Clone)]
pub struct TermsAggregation {
    field: String,
    size: Option<u32>,
    order: Option<TermsOrder>,
}

impl TermsAggregation {
    /// Create a new terms aggregation builder.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            size: None,
            order: None,
        }
    }

    /// Set the maximum number of buckets.
    pub fn size(mut self, size: u32) -> Self {
        self.size = Some(size);
        self
    }

    /// Set bucket ordering.
    pub fn order(mut self, order: TermsOrder) -> Self {
        self.order = Some(order);
        self
    }

    /// Validate and finish.
    pub fn build(self) -> Result<Aggregation> {
        let field = field_name(self.field, "terms")?;
        if self.size == Some(0) {
            return Err(SearchError::invalid("terms size must be positive"));
        }
        if let Some(TermsOrder::Path(path, _)) = &self.order {
            if path.is_empty() || path.split('>').any(str::is_empty) {
                return Err(SearchError::invalid(format!(
                    "invalid terms order path '{}'",
                    path
                )));
            }
        }
        Ok(Aggregation::leaf(AggregationKind::Terms {
            field,
            size: self.size,
            order: self.order,
        }))
    }
}

/// Ordering of terms buckets.
#[derive(Debug, Clone, PartialEq)]
pub enum TermsOrder {
    /// By document count.
    Count(SortOrder),
    /// By bucket key.
    Key(SortOrder),
    /// By a sub-aggregation value, e.g. `totalPrice>yellowTotalPrice`.
    Path(String, SortOrder),
}

impl TermsOrder {
    fn to_json(&self) -> Value {
        let (key, order) = match self {
            TermsOrder::Count(o) => ("_count", o),
            TermsOrder::Key(o) => ("_key", o),
            TermsOrder::Path(path, o) => (path.as_str(), o),
        };
        json!({ key: order.as_str() })
    }
}

/// Calendar-aware date histogram units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarInterval {
    /// Minute.
    Minute,
    /// Hour.
    Hour,
    /// Day.
    Day,
    /// Week.
    Week,
    /// Month.
    Month,
    /// Quarter.
    Quarter,
    /// Year.
    Year,
}

impl CalendarInterval {
    /// Wire spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarInterval::Minute => "minute",
            CalendarInterval::Hour => "hour",
            CalendarInterval::Day => "day",
            CalendarInterval::Week => "week",
            CalendarInterval::Month => "month",
            CalendarInterval::Quarter => "quarter",
            CalendarInterval::Year => "year",
        }
    }
}

/// Date histogram bucket interval.
#[derive(Debug, Clone, PartialEq)]
pub enum DateInterval {
    /// Calendar unit.
    Calendar(CalendarInterval),
    /// Fixed duration such as `"90m"` or `"30d"`.
    Fixed(String),
}

/// Range bucket definition.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RangeBucket {
    /// Optional key.
    pub key: Option<String>,
    /// From value (inclusive).
    pub from: Option<f64>,
    /// To value (exclusive).
    pub to: Option<f64>,
}

impl RangeBucket {
    /// Create an unbounded range bucket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lower bound.
    pub fn from(mut self, from: f64) -> Self {
        self.from = Some(from);
        self
    }

    /// Set the upper bound.
    pub fn to(mut self, to: f64) -> Self {
        self.to = Some(to);
        self
    }

    /// Set the bucket key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    fn to_json(&self) -> Value {
        let mut bucket = Map::new();
        if let Some(k) = &self.key {
            bucket.insert("key".to_string(), json!(k));
        }
        if let Some(f) = self.from {
            bucket.insert("from".to_string(), json!(f));
        }
        if let Some(t) = self.to {
            bucket.insert("to".to_string(), json!(t));
        }
        Value::Object(bucket)
    }
}

/// Check an aggregation name for use in a sibling set and a name path.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SearchError::invalid("aggregation name must not be empty"));
    }
    if name.contains(['[', ']', '>']) {
        return Err(SearchError::invalid(format!(
            "aggregation name '{}' contains a reserved character",
            name
        )));
    }
    Ok(())
}

fn field_name(field: impl Into<String>, kind: &str) -> Result<String> {
    let field = field.into();
    if field.trim().is_empty() {
        return Err(SearchError::invalid(format!(
            "{} aggregation requires a field",
            kind
        )));
    }
    Ok(field)
}

fn validate_ranges(ranges: &[RangeBucket], kind: &str) -> Result<()> {
    if ranges.is_empty() {
        return Err(SearchError::invalid(format!(
            "{} aggregation requires at least one range",
            kind
        )));
    }
    for range in ranges {
        match (range.from, range.to) {
            (None, None) => {
                return Err(SearchError::invalid(format!(
                    "{} range needs a from or to bound",
                    kind
                )));
            }
            (Some(from), Some(to)) if from >= to => {
                return Err(SearchError::invalid(format!(
                    "{} range from {} is not below to {}",
                    kind, from, to
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

fn validate_fixed_interval(fixed: &str) -> Result<()> {
    let unit_start = fixed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(fixed.len());
    let (amount, unit) = fixed.split_at(unit_start);
    let amount_ok = amount.parse::<u64>().map(|n| n > 0).unwrap_or(false);
    if !amount_ok || !matches!(unit, "ms" | "s" | "m" | "h" | "d") {
        return Err(SearchError::invalid(format!(
            "fixed interval '{}' must look like 30d, 12h, or 90m",
            fixed
        )));
    }
    Ok(())
}
