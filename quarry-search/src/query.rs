//! Query expressions.
//!
//! Every constructor validates its own arguments and returns an owned
//! [`Query`]. Composite queries take their children by value. Expressions
//! are converted to the cluster's query DSL with [`Query::to_json`] and back
//! with [`Query::from_json`].

use crate::error::{Result, SearchError};
use crate::geo::{Distance, GeoDistanceType, GeoPoint, GeoShapeRelation, IndexedShape, Shape};
use serde_json::{Map, Value, json};

/// A query expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Match all documents.
    MatchAll,
    /// Exact value match.
    Term(TermQuery),
    /// Match any of several exact values.
    Terms(TermsQuery),
    /// Range query.
    Range(RangeQuery),
    /// Field has a value.
    Exists(ExistsQuery),
    /// Prefix query.
    Prefix(PrefixQuery),
    /// Wildcard query.
    Wildcard(WildcardQuery),
    /// Full-text match query.
    Match(MatchQuery),
    /// Phrase match query.
    MatchPhrase(MatchPhraseQuery),
    /// Full-text match over several fields.
    MultiMatch(MultiMatchQuery),
    /// Points within a distance of an origin.
    GeoDistance(GeoDistanceQuery),
    /// Points within a rectangle.
    GeoBoundingBox(GeoBoundingBoxQuery),
    /// Shapes related to a query shape.
    GeoShape(GeoShapeQuery),
    /// Bool query for combining queries.
    Bool(BoolQuery),
    /// Non-scoring wrapper around a filter.
    ConstantScore(ConstantScoreQuery),
}

impl Query {
    /// Match all documents.
    pub fn match_all() -> Self {
        Query::MatchAll
    }

    /// Build a term query.
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Result<Self> {
        Ok(Query::Term(TermQuery {
            field: field_name(field, "term")?,
            value: scalar(value.into(), "term")?,
        }))
    }

    /// Build a terms query; at least one value is required.
    pub fn terms<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Result<Self> {
        let field = field_name(field, "terms")?;
        let values = values
            .into_iter()
            .map(|v| scalar(v.into(), "terms"))
            .collect::<Result<Vec<_>>>()?;
        if values.is_empty() {
            return Err(SearchError::invalid(format!(
                "terms on '{}' requires at least one value",
                field
            )));
        }
        Ok(Query::Terms(TermsQuery { field, values }))
    }

    /// Start a range query. Finish with [`RangeQuery::build`].
    pub fn range(field: impl Into<String>) -> RangeQuery {
        RangeQuery::new(field)
    }

    /// Build an exists query.
    pub fn exists(field: impl Into<String>) -> Result<Self> {
        Ok(Query::Exists(ExistsQuery {
            field: field_name(field, "exists")?,
        }))
    }

    /// Build a prefix query.
    pub fn prefix(field: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        Ok(Query::Prefix(PrefixQuery {
            field: field_name(field, "prefix")?,
            value: value.into(),
        }))
    }

    /// Build a wildcard query (`*` and `?` patterns).
    pub fn wildcard(field: impl Into<String>, pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return Err(SearchError::invalid("wildcard pattern must not be empty"));
        }
        Ok(Query::Wildcard(WildcardQuery {
            field: field_name(field, "wildcard")?,
            value: pattern,
        }))
    }

    /// Start a match query. Finish with [`MatchQuery::build`].
    pub fn match_text(field: impl Into<String>, text: impl Into<String>) -> MatchQuery {
        MatchQuery::new(field, text)
    }

    /// Build a phrase query with an optional slop.
    pub fn match_phrase(
        field: impl Into<String>,
        text: impl Into<String>,
        slop: Option<u32>,
    ) -> Result<Self> {
        let text = text.into();
        if text.is_empty() {
            return Err(SearchError::invalid("match_phrase text must not be empty"));
        }
        Ok(Query::MatchPhrase(MatchPhraseQuery {
            field: field_name(field, "match_phrase")?,
            query: text,
            slop,
        }))
    }

    /// Start a multi_match query. Finish with [`MultiMatchQuery::build`].
    pub fn multi_match<F: Into<String>>(
        text: impl Into<String>,
        fields: impl IntoIterator<Item = F>,
    ) -> MultiMatchQuery {
        MultiMatchQuery::new(text, fields)
    }

    /// Start a geo_distance query. Finish with [`GeoDistanceQuery::build`].
    pub fn geo_distance(
        field: impl Into<String>,
        origin: GeoPoint,
        distance: Distance,
    ) -> GeoDistanceQuery {
        GeoDistanceQuery::new(field, origin, distance)
    }

    /// Build a geo_bounding_box query.
    pub fn geo_bounding_box(
        field: impl Into<String>,
        top_left: GeoPoint,
        bottom_right: GeoPoint,
    ) -> Result<Self> {
        if top_left.lat < bottom_right.lat {
            return Err(SearchError::invalid(
                "bounding box top-left latitude is below bottom-right latitude",
            ));
        }
        Ok(Query::GeoBoundingBox(GeoBoundingBoxQuery {
            field: field_name(field, "geo_bounding_box")?,
            top_left,
            bottom_right,
        }))
    }

    /// Build a geo_shape query against an inline or stored shape.
    pub fn geo_shape(
        field: impl Into<String>,
        shape: impl Into<ShapeSource>,
        relation: GeoShapeRelation,
    ) -> Result<Self> {
        Ok(Query::GeoShape(GeoShapeQuery {
            field: field_name(field, "geo_shape")?,
            shape: shape.into(),
            relation,
        }))
    }

    /// Start a bool query. Finish with [`BoolQuery::build`].
    pub fn bool() -> BoolQuery {
        BoolQuery::new()
    }

    /// Wrap a filter so every match scores the same.
    pub fn constant_score(filter: Query) -> Self {
        Query::ConstantScore(ConstantScoreQuery {
            filter: Box::new(filter),
            boost: None,
        })
    }

    /// Query kind as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Query::MatchAll => "match_all",
            Query::Term(_) => "term",
            Query::Terms(_) => "terms",
            Query::Range(_) => "range",
            Query::Exists(_) => "exists",
            Query::Prefix(_) => "prefix",
            Query::Wildcard(_) => "wildcard",
            Query::Match(_) => "match",
            Query::MatchPhrase(_) => "match_phrase",
            Query::MultiMatch(_) => "multi_match",
            Query::GeoDistance(_) => "geo_distance",
            Query::GeoBoundingBox(_) => "geo_bounding_box",
            Query::GeoShape(_) => "geo_shape",
            Query::Bool(_) => "bool",
            Query::ConstantScore(_) => "constant_score",
        }
    }

    /// Convert query to JSON.
    pub fn to_json(&self) -> Value {
        match self {
            Query::MatchAll => json!({ "match_all": {} }),
            Query::Term(q) => json!({ "term": { &q.field: q.value } }),
            Query::Terms(q) => json!({ "terms": { &q.field: q.values } }),
            Query::Range(q) => q.to_json(),
            Query::Exists(q) => json!({ "exists": { "field": q.field } }),
            Query::Prefix(q) => json!({ "prefix": { &q.field: q.value } }),
            Query::Wildcard(q) => json!({ "wildcard": { &q.field: q.value } }),
            Query::Match(q) => q.to_json(),
            Query::MatchPhrase(q) => {
                let mut body = json!({ "query": q.query });
                if let Some(slop) = q.slop {
                    body["slop"] = json!(slop);
                }
                json!({ "match_phrase": { &q.field: body } })
            }
            Query::MultiMatch(q) => q.to_json(),
            Query::GeoDistance(q) => q.to_json(),
            Query::GeoBoundingBox(q) => json!({
                "geo_bounding_box": {
                    &q.field: {
                        "top_left": q.top_left.to_json(),
                        "bottom_right": q.bottom_right.to_json(),
                    }
                }
            }),
            Query::GeoShape(q) => q.to_json(),
            Query::Bool(q) => q.to_json(),
            Query::ConstantScore(q) => {
                let mut body = json!({ "filter": q.filter.to_json() });
                if let Some(boost) = q.boost {
                    body["boost"] = json!(boost);
                }
                json!({ "constant_score": body })
            }
        }
    }

    /// Parse the query DSL back into an expression.
    ///
    /// Leaf queries are accepted in both their short (`{"term": {"f": v}}`)
    /// and long (`{"term": {"f": {"value": v}}}`) forms.
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .filter(|o| o.len() == 1)
            .ok_or_else(|| SearchError::invalid(format!("not a query clause: {}", value)))?;
        let (kind, body) = object
            .iter()
            .next()
            .ok_or_else(|| SearchError::invalid("empty query clause"))?;

        match kind.as_str() {
            "match_all" => Ok(Query::MatchAll),
            "term" => {
                let (field, inner) = single_field(kind, body)?;
                Query::term(field, unwrap_long_form(inner, "value").clone())
            }
            "terms" => {
                let (field, inner) = single_field(kind, body)?;
                let values = inner
                    .as_array()
                    .ok_or_else(|| SearchError::invalid("terms values must be an array"))?;
                Query::terms(field, values.iter().cloned())
            }
            "range" => {
                let (field, inner) = single_field(kind, body)?;
                let mut range = RangeQuery::new(field);
                range.gt = inner.get("gt").cloned();
                range.gte = inner.get("gte").cloned();
                range.lt = inner.get("lt").cloned();
                range.lte = inner.get("lte").cloned();
                range.format = inner.get("format").and_then(Value::as_str).map(String::from);
                range.build()
            }
            "exists" => Query::exists(str_field(body, "field")?),
            "prefix" => {
                let (field, inner) = single_field(kind, body)?;
                Query::prefix(field, as_text(unwrap_long_form(inner, "value"))?)
            }
            "wildcard" => {
                let (field, inner) = single_field(kind, body)?;
                Query::wildcard(field, as_text(unwrap_long_form(inner, "value"))?)
            }
            "match" => {
                let (field, inner) = single_field(kind, body)?;
                let mut query = MatchQuery::new(field, as_text(unwrap_long_form(inner, "query"))?);
                if let Some(op) = inner.get("operator").and_then(Value::as_str) {
                    query.operator = Some(MatchOperator::parse(op)?);
                }
                query.minimum_should_match = inner
                    .get("minimum_should_match")
                    .map(|v| v.as_str().map(String::from).unwrap_or_else(|| v.to_string()));
                query.fuzziness = inner
                    .get("fuzziness")
                    .map(|v| v.as_str().map(String::from).unwrap_or_else(|| v.to_string()));
                query.build()
            }
            "match_phrase" => {
                let (field, inner) = single_field(kind, body)?;
                let slop = inner.get("slop").and_then(Value::as_u64).map(|s| s as u32);
                Query::match_phrase(field, as_text(unwrap_long_form(inner, "query"))?, slop)
            }
            "multi_match" => {
                let fields = body
                    .get("fields")
                    .and_then(Value::as_array)
                    .ok_or_else(|| SearchError::invalid("multi_match requires fields"))?
                    .iter()
                    .map(as_text)
                    .collect::<Result<Vec<_>>>()?;
                let mut query = MultiMatchQuery::new(str_field(body, "query")?, fields);
                if let Some(t) = body.get("type").and_then(Value::as_str) {
                    query.match_type = Some(MultiMatchType::parse(t)?);
                }
                query.build()
            }
            "geo_distance" => GeoDistanceQuery::from_json(body),
            "geo_bounding_box" => {
                let (field, inner) = single_field(kind, body)?;
                Query::geo_bounding_box(
                    field,
                    point_field(inner, "top_left")?,
                    point_field(inner, "bottom_right")?,
                )
            }
            "geo_shape" => {
                let (field, inner) = single_field(kind, body)?;
                let relation = match inner.get("relation").and_then(Value::as_str) {
                    Some(r) => GeoShapeRelation::parse(r).ok_or_else(|| {
                        SearchError::invalid(format!("unknown shape relation '{}'", r))
                    })?,
                    None => GeoShapeRelation::default(),
                };
                let shape = if let Some(shape) = inner.get("shape") {
                    ShapeSource::Inline(
                        Shape::from_json(shape)
                            .ok_or_else(|| SearchError::invalid("unreadable geo shape"))?,
                    )
                } else if let Some(indexed) = inner.get("indexed_shape") {
                    ShapeSource::Indexed(IndexedShape::new(
                        str_field(indexed, "index")?,
                        str_field(indexed, "id")?,
                        str_field(indexed, "path")?,
                    )?)
                } else {
                    return Err(SearchError::invalid("geo_shape requires a shape"));
                };
                Query::geo_shape(field, shape, relation)
            }
            "bool" => {
                let mut query = BoolQuery::new();
                query.must = clause_list(body.get("must"))?;
                query.must_not = clause_list(body.get("must_not"))?;
                query.should = clause_list(body.get("should"))?;
                query.filter = clause_list(body.get("filter"))?;
                query.minimum_should_match = body
                    .get("minimum_should_match")
                    .and_then(Value::as_u64)
                    .map(|m| m as u32);
                query.build()
            }
            "constant_score" => {
                let filter = body
                    .get("filter")
                    .ok_or_else(|| SearchError::invalid("constant_score requires a filter"))?;
                let mut query = ConstantScoreQuery::new(Query::from_json(filter)?);
                query.boost = body.get("boost").and_then(Value::as_f64);
                query.build()
            }
            other => Err(SearchError::invalid(format!("unknown query kind '{}'", other))),
        }
    }
}

/// Term query for exact matching.
#[derive(Debug, Clone, PartialEq)]
pub struct TermQuery {
    field: String,
    value: Value,
}

impl TermQuery {
    /// Field name.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Value to match.
    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// Terms query for matching multiple values.
#[derive(Debug, Clone, PartialEq)]
pub struct TermsQuery {
    field: String,
    values: Vec<Value>,
}

impl TermsQuery {
    /// Field name.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Values to match.
    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// Range query for numeric/date ranges.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    field: String,
    gt: Option<Value>,
    gte: Option<Value>,
    lt: Option<Value>,
    lte: Option<Value>,
    format: Option<String>,
}

impl RangeQuery {
    /// Create a new range query.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            gt: None,
            gte: None,
            lt: None,
            lte: None,
            format: None,
        }
    }

    /// Set greater than.
    pub fn gt(mut self, value: impl Into<Value>) -> Self {
        self.gt = Some(value.into());
        self
    }

    /// Set greater than or equal.
    pub fn gte(mut self, value: impl Into<Value>) -> Self {
        self.gte = Some(value.into());
        self
    }

    /// Set less than.
    pub fn lt(mut self, value: impl Into<Value>) -> Self {
        self.lt = Some(value.into());
        self
    }

    /// Set less than or equal.
    pub fn lte(mut self, value: impl Into<Value>) -> Self {
        self.lte = Some(value.into());
        self
    }

    /// Set date format (for date fields).
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    /// Validate and finish. At least one bound is required.
    pub fn build(mut self) -> Result<Query> {
        self.field = field_name(self.field, "range")?;
        if self.gt.is_none() && self.gte.is_none() && self.lt.is_none() && self.lte.is_none() {
            return Err(SearchError::invalid(format!(
                "range on '{}' requires at least one bound",
                self.field
            )));
        }
        for bound in [&self.gt, &self.gte, &self.lt, &self.lte].into_iter().flatten() {
            scalar(bound.clone(), "range")?;
        }
        Ok(Query::Range(self))
    }

    /// Field name.
    pub fn field(&self) -> &str {
        &self.field
    }

    fn to_json(&self) -> Value {
        let mut range = Map::new();

        if let Some(v) = &self.gt {
            range.insert("gt".to_string(), v.clone());
        }
        if let Some(v) = &self.gte {
            range.insert("gte".to_string(), v.clone());
        }
        if let Some(v) = &self.lt {
            range.insert("lt".to_string(), v.clone());
        }
        if let Some(v) = &self.lte {
            range.insert("lte".to_string(), v.clone());
        }
        if let Some(v) = &self.format {
            range.insert("format".to_string(), json!(v));
        }

        json!({ "range": { &self.field: range } })
    }
}

/// Exists query.
#[derive(Debug, Clone, PartialEq)]
pub struct ExistsQuery {
    field: String,
}

/// Prefix query.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefixQuery {
    field: String,
    value: String,
}

/// Wildcard query.
#[derive(Debug, Clone, PartialEq)]
pub struct WildcardQuery {
    field: String,
    value: String,
}

/// Boolean operator joining the terms of a match query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOperator {
    /// Every term must match.
    And,
    /// Any term may match.
    Or,
}

impl MatchOperator {
    fn as_str(&self) -> &'static str {
        match self {
            MatchOperator::And => "and",
            MatchOperator::Or => "or",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "and" => Ok(MatchOperator::And),
            "or" => Ok(MatchOperator::Or),
            other => Err(SearchError::invalid(format!("unknown operator '{}'", other))),
        }
    }
}

/// Match query for full-text search.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchQuery {
    field: String,
    query: String,
    operator: Option<MatchOperator>,
    minimum_should_match: Option<String>,
    fuzziness: Option<String>,
}

impl MatchQuery {
    /// Create a new match query.
    pub fn new(field: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            query: query.into(),
            operator: None,
            minimum_should_match: None,
            fuzziness: None,
        }
    }

    /// Set the operator.
    pub fn operator(mut self, op: MatchOperator) -> Self {
        self.operator = Some(op);
        self
    }

    /// Set minimum should match, e.g. `"100%"` or `"2"`.
    pub fn minimum_should_match(mut self, value: impl Into<String>) -> Self {
        self.minimum_should_match = Some(value.into());
        self
    }

    /// Set fuzziness for typo tolerance.
    pub fn fuzziness(mut self, fuzz: impl Into<String>) -> Self {
        self.fuzziness = Some(fuzz.into());
        self
    }

    /// Validate and finish.
    pub fn build(mut self) -> Result<Query> {
        self.field = field_name(self.field, "match")?;
        if self.query.is_empty() {
            return Err(SearchError::invalid("match text must not be empty"));
        }
        Ok(Query::Match(self))
    }

    fn to_json(&self) -> Value {
        let mut query = json!({ "query": self.query });

        if let Some(op) = &self.operator {
            query["operator"] = json!(op.as_str());
        }
        if let Some(msm) = &self.minimum_should_match {
            query["minimum_should_match"] = json!(msm);
        }
        if let Some(fuzz) = &self.fuzziness {
            query["fuzziness"] = json!(fuzz);
        }

        json!({ "match": { &self.field: query } })
    }
}

/// Phrase match query.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchPhraseQuery {
    field: String,
    query: String,
    slop: Option<u32>,
}

/// How a multi_match query combines per-field scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiMatchType {
    /// Score of the best field.
    BestFields,
    /// Sum of field scores.
    MostFields,
    /// Treat fields as one big field.
    CrossFields,
    /// Phrase match on each field.
    Phrase,
    /// Phrase prefix match on each field.
    PhrasePrefix,
}

impl MultiMatchType {
    fn as_str(&self) -> &'static str {
        match self {
            MultiMatchType::BestFields => "best_fields",
            MultiMatchType::MostFields => "most_fields",
            MultiMatchType::CrossFields => "cross_fields",
            MultiMatchType::Phrase => "phrase",
            MultiMatchType::PhrasePrefix => "phrase_prefix",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "best_fields" => MultiMatchType::BestFields,
            "most_fields" => MultiMatchType::MostFields,
            "cross_fields" => MultiMatchType::CrossFields,
            "phrase" => MultiMatchType::Phrase,
            "phrase_prefix" => MultiMatchType::PhrasePrefix,
            other => {
                return Err(SearchError::invalid(format!(
                    "unknown multi_match type '{}'",
                    other
                )));
            }
        })
    }
}

/// Full-text match over several fields.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiMatchQuery {
    query: String,
    fields: Vec<String>,
    match_type: Option<MultiMatchType>,
}

impl MultiMatchQuery {
    /// Create a new multi_match query.
    pub fn new<F: Into<String>>(
        query: impl Into<String>,
        fields: impl IntoIterator<Item = F>,
    ) -> Self {
        Self {
            query: query.into(),
            fields: fields.into_iter().map(Into::into).collect(),
            match_type: None,
        }
    }

    /// Set the scoring type.
    pub fn match_type(mut self, match_type: MultiMatchType) -> Self {
        self.match_type = Some(match_type);
        self
    }

    /// Validate and finish. At least one field is required.
    pub fn build(self) -> Result<Query> {
        if self.fields.is_empty() {
            return Err(SearchError::invalid("multi_match requires at least one field"));
        }
        if self.fields.iter().any(|f| f.is_empty()) {
            return Err(SearchError::invalid("multi_match field names must not be empty"));
        }
        if self.query.is_empty() {
            return Err(SearchError::invalid("multi_match text must not be empty"));
        }
        Ok(Query::MultiMatch(self))
    }

    fn to_json(&self) -> Value {
        let mut body = json!({ "query": self.query, "fields": self.fields });
        if let Some(t) = &self.match_type {
            body["type"] = json!(t.as_str());
        }
        json!({ "multi_match": body })
    }
}

/// Points within a distance of an origin.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoDistanceQuery {
    field: String,
    origin: GeoPoint,
    distance: Distance,
    distance_type: Option<GeoDistanceType>,
}

impl GeoDistanceQuery {
    /// Create a new geo_distance query.
    pub fn new(field: impl Into<String>, origin: GeoPoint, distance: Distance) -> Self {
        Self {
            field: field.into(),
            origin,
            distance,
            distance_type: None,
        }
    }

    /// Set how distances are computed.
    pub fn distance_type(mut self, distance_type: GeoDistanceType) -> Self {
        self.distance_type = Some(distance_type);
        self
    }

    /// Validate and finish.
    pub fn build(mut self) -> Result<Query> {
        self.field = field_name(self.field, "geo_distance")?;
        Ok(Query::GeoDistance(self))
    }

    fn to_json(&self) -> Value {
        let mut body = Map::new();
        body.insert("distance".to_string(), json!(self.distance.to_string()));
        if let Some(t) = &self.distance_type {
            body.insert("distance_type".to_string(), json!(t.as_str()));
        }
        body.insert(self.field.clone(), self.origin.to_json());
        json!({ "geo_distance": body })
    }

    fn from_json(body: &Value) -> Result<Query> {
        let object = body
            .as_object()
            .ok_or_else(|| SearchError::invalid("geo_distance body must be an object"))?;
        let distance = object
            .get("distance")
            .and_then(Value::as_str)
            .and_then(Distance::parse)
            .ok_or_else(|| SearchError::invalid("geo_distance requires a distance"))?;
        let (field, origin) = object
            .iter()
            .find(|(k, _)| !matches!(k.as_str(), "distance" | "distance_type"))
            .ok_or_else(|| SearchError::invalid("geo_distance requires a field"))?;
        let origin = GeoPoint::from_json(origin)
            .ok_or_else(|| SearchError::invalid("unreadable geo_distance origin"))?;

        let mut query = GeoDistanceQuery::new(field.clone(), origin, distance);
        if let Some(t) = object.get("distance_type").and_then(Value::as_str) {
            query.distance_type = Some(GeoDistanceType::parse(t).ok_or_else(|| {
                SearchError::invalid(format!("unknown distance type '{}'", t))
            })?);
        }
        query.build()
    }
}

/// Points within a rectangle.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoBoundingBoxQuery {
    field: String,
    top_left: GeoPoint,
    bottom_right: GeoPoint,
}

/// Query shape for a geo_shape query.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeSource {
    /// GeoJSON supplied with the query.
    Inline(Shape),
    /// Shape stored in another document.
    Indexed(IndexedShape),
}

impl From<Shape> for ShapeSource {
    fn from(shape: Shape) -> Self {
        ShapeSource::Inline(shape)
    }
}

impl From<IndexedShape> for ShapeSource {
    fn from(shape: IndexedShape) -> Self {
        ShapeSource::Indexed(shape)
    }
}

/// Shapes related to a query shape.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoShapeQuery {
    field: String,
    shape: ShapeSource,
    relation: GeoShapeRelation,
}

impl GeoShapeQuery {
    fn to_json(&self) -> Value {
        let mut body = json!({ "relation": self.relation.as_str() });
        match &self.shape {
            ShapeSource::Inline(shape) => body["shape"] = shape.to_json(),
            ShapeSource::Indexed(indexed) => {
                body["indexed_shape"] = json!({
                    "index": indexed.index,
                    "id": indexed.id,
                    "path": indexed.path,
                })
            }
        }
        json!({ "geo_shape": { &self.field: body } })
    }
}

/// Bool query for combining multiple queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolQuery {
    must: Vec<Query>,
    must_not: Vec<Query>,
    should: Vec<Query>,
    filter: Vec<Query>,
    minimum_should_match: Option<u32>,
}

impl BoolQuery {
    /// Create a new bool query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a must clause.
    pub fn must(mut self, query: Query) -> Self {
        self.must.push(query);
        self
    }

    /// Add a must_not clause.
    pub fn must_not(mut self, query: Query) -> Self {
        self.must_not.push(query);
        self
    }

    /// Add a should clause.
    pub fn should(mut self, query: Query) -> Self {
        self.should.push(query);
        self
    }

    /// Add a filter clause.
    pub fn filter(mut self, query: Query) -> Self {
        self.filter.push(query);
        self
    }

    /// Set minimum should match.
    pub fn minimum_should_match(mut self, min: u32) -> Self {
        self.minimum_should_match = Some(min);
        self
    }

    /// Validate and finish.
    ///
    /// Empty clause lists are valid. `minimum_should_match` may not exceed
    /// the number of should clauses.
    pub fn build(self) -> Result<Query> {
        if let Some(min) = self.minimum_should_match {
            if min as usize > self.should.len() {
                return Err(SearchError::invalid(format!(
                    "minimum_should_match {} exceeds {} should clauses",
                    min,
                    self.should.len()
                )));
            }
        }
        Ok(Query::Bool(self))
    }

    /// Must clauses.
    pub fn must_clauses(&self) -> &[Query] {
        &self.must
    }

    /// Should clauses.
    pub fn should_clauses(&self) -> &[Query] {
        &self.should
    }

    fn to_json(&self) -> Value {
        let mut bool_query = Map::new();

        for (name, clauses) in [
            ("must", &self.must),
            ("must_not", &self.must_not),
            ("should", &self.should),
            ("filter", &self.filter),
        ] {
            if !clauses.is_empty() {
                bool_query.insert(
                    name.to_string(),
                    Value::Array(clauses.iter().map(Query::to_json).collect()),
                );
            }
        }
        if let Some(min) = self.minimum_should_match {
            bool_query.insert("minimum_should_match".to_string(), json!(min));
        }

        json!({ "bool": bool_query })
    }
}

/// Non-scoring wrapper around a filter.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantScoreQuery {
    filter: Box<Query>,
    boost: Option<f64>,
}

impl ConstantScoreQuery {
    /// Create a new constant_score query.
    pub fn new(filter: Query) -> Self {
        Self {
            filter: Box::new(filter),
            boost: None,
        }
    }

    /// Set the constant score.
    pub fn boost(mut self, boost: f64) -> Self {
        self.boost = Some(boost);
        self
    }

    /// Validate and finish.
    pub fn build(self) -> Result<Query> {
        if let Some(boost) = self.boost {
            if !boost.is_finite() || boost < 0.0 {
                return Err(SearchError::invalid(format!(
                    "constant_score boost {} must be non-negative",
                    boost
                )));
            }
        }
        Ok(Query::ConstantScore(self))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn field_name(field: impl Into<String>, kind: &str) -> Result<String> {
    let field = field.into();
    if field.trim().is_empty() {
        return Err(SearchError::invalid(format!("{} requires a field", kind)));
    }
    Ok(field)
}

fn scalar(value: Value, kind: &str) -> Result<Value> {
    match value {
        Value::Null | Value::Array(_) | Value::Object(_) => Err(SearchError::invalid(format!(
            "{} value must be a string, number, or boolean",
            kind
        ))),
        value => Ok(value),
    }
}

fn single_field<'a>(kind: &str, body: &'a Value) -> Result<(String, &'a Value)> {
    let object = body
        .as_object()
        .ok_or_else(|| SearchError::invalid(format!("{} body must be an object", kind)))?;
    let mut fields = object
        .iter()
        .filter(|(k, _)| !matches!(k.as_str(), "boost" | "_name"));
    match (fields.next(), fields.next()) {
        (Some((field, inner)), None) => Ok((field.clone(), inner)),
        _ => Err(SearchError::invalid(format!(
            "{} must name exactly one field",
            kind
        ))),
    }
}

fn unwrap_long_form<'a>(inner: &'a Value, key: &str) -> &'a Value {
    inner.get(key).unwrap_or(inner)
}

fn as_text(value: &Value) -> Result<String> {
    value
        .as_str()
        .map(String::from)
        .ok_or_else(|| SearchError::invalid(format!("expected a string, found {}", value)))
}

fn str_field(body: &Value, key: &str) -> Result<String> {
    body.get(key)
        .ok_or_else(|| SearchError::invalid(format!("missing '{}'", key)))
        .and_then(as_text)
}

fn point_field(body: &Value, key: &str) -> Result<GeoPoint> {
    body.get(key)
        .and_then(GeoPoint::from_json)
        .ok_or_else(|| SearchError::invalid(format!("missing or unreadable '{}'", key)))
}

fn clause_list(value: Option<&Value>) -> Result<Vec<Query>> {
    match value {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => items.iter().map(Query::from_json).collect(),
        Some(single) => Ok(vec![Query::from_json(single)?]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::DistanceUnit;

    #[test]
    fn test_term_encoding() {
        let query = Query::term("age", 18).unwrap();
        assert_eq!(query.to_json(), json!({ "term": { "age": 18 } }));
    }

    #[test]
    fn test_terms_requires_values() {
        let empty: Vec<Value> = Vec::new();
        assert!(matches!(
            Query::terms("tags", empty),
            Err(SearchError::InvalidExpression(_))
        ));
        let query = Query::terms("tags", ["java", "rust"]).unwrap();
        assert_eq!(query.to_json(), json!({ "terms": { "tags": ["java", "rust"] } }));
    }

    #[test]
    fn test_leaf_requires_field() {
        assert!(Query::term("", 1).is_err());
        assert!(Query::exists("  ").is_err());
        assert!(Query::prefix("", "王").is_err());
    }

    #[test]
    fn test_term_rejects_structured_value() {
        assert!(Query::term("age", Value::Null).is_err());
        assert!(Query::term("age", json!([1, 2])).is_err());
    }

    #[test]
    fn test_range_requires_bound() {
        assert!(Query::range("age").build().is_err());

        let query = Query::range("age").gte(10).lt(20).build().unwrap();
        assert_eq!(
            query.to_json(),
            json!({ "range": { "age": { "gte": 10, "lt": 20 } } })
        );
    }

    #[test]
    fn test_match_options() {
        let query = Query::match_text("des", "java developer")
            .operator(MatchOperator::And)
            .minimum_should_match("100%")
            .build()
            .unwrap();
        assert_eq!(
            query.to_json(),
            json!({ "match": { "des": {
                "query": "java developer",
                "operator": "and",
                "minimum_should_match": "100%"
            } } })
        );
    }

    #[test]
    fn test_match_phrase_slop() {
        let query = Query::match_phrase("des", "java spring", Some(2)).unwrap();
        assert_eq!(
            query.to_json(),
            json!({ "match_phrase": { "des": { "query": "java spring", "slop": 2 } } })
        );
    }

    #[test]
    fn test_multi_match_requires_fields() {
        let none: Vec<String> = Vec::new();
        assert!(Query::multi_match("java", none).build().is_err());

        let query = Query::multi_match("java", ["name", "des"])
            .match_type(MultiMatchType::BestFields)
            .build()
            .unwrap();
        assert_eq!(query.to_json()["multi_match"]["type"], "best_fields");
    }

    #[test]
    fn test_bool_minimum_should_match() {
        let over = Query::bool()
            .should(Query::term("grade", "A").unwrap())
            .minimum_should_match(2)
            .build();
        assert!(over.is_err());

        let empty = Query::bool().build().unwrap();
        assert_eq!(empty.to_json(), json!({ "bool": {} }));
    }

    #[test]
    fn test_bool_encoding_keeps_order() {
        let query = Query::bool()
            .must(Query::prefix("name", "王").unwrap())
            .must(Query::term("age", 18).unwrap())
            .must_not(Query::exists("deleted").unwrap())
            .build()
            .unwrap();
        assert_eq!(
            query.to_json(),
            json!({ "bool": {
                "must": [
                    { "prefix": { "name": "王" } },
                    { "term": { "age": 18 } }
                ],
                "must_not": [ { "exists": { "field": "deleted" } } ]
            } })
        );
    }

    #[test]
    fn test_builders_are_pure() {
        let a = Query::terms("color", ["red", "green"]).unwrap();
        let b = Query::terms("color", ["red", "green"]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_geo_distance_encoding() {
        let query = Query::geo_distance(
            "location",
            GeoPoint::new(40.0, 116.0).unwrap(),
            Distance::new(3.0, DistanceUnit::Kilometers).unwrap(),
        )
        .distance_type(GeoDistanceType::Arc)
        .build()
        .unwrap();
        assert_eq!(
            query.to_json(),
            json!({ "geo_distance": {
                "distance": "3km",
                "distance_type": "arc",
                "location": { "lat": 40.0, "lon": 116.0 }
            } })
        );
    }

    #[test]
    fn test_geo_bounding_box_orientation() {
        let north = GeoPoint::new(40.0, 116.0).unwrap();
        let south = GeoPoint::new(39.0, 117.0).unwrap();
        assert!(Query::geo_bounding_box("location", north, south).is_ok());
        assert!(Query::geo_bounding_box("location", south, north).is_err());
    }

    #[test]
    fn test_geo_shape_indexed() {
        let shape = IndexedShape::new("shapes", "beijing", "location").unwrap();
        let query = Query::geo_shape("location", shape, GeoShapeRelation::Within).unwrap();
        assert_eq!(
            query.to_json(),
            json!({ "geo_shape": { "location": {
                "relation": "within",
                "indexed_shape": { "index": "shapes", "id": "beijing", "path": "location" }
            } } })
        );
    }

    #[test]
    fn test_from_json_inverts_encoding() {
        let polygon = Shape::polygon(vec![vec![
            GeoPoint::new(0.0, 0.0).unwrap(),
            GeoPoint::new(0.0, 1.0).unwrap(),
            GeoPoint::new(1.0, 1.0).unwrap(),
            GeoPoint::new(0.0, 0.0).unwrap(),
        ]])
        .unwrap();

        let queries = vec![
            Query::match_all(),
            Query::term("age", 18).unwrap(),
            Query::range("price").gt(10000).format("yyyy").build().unwrap(),
            Query::wildcard("name", "张*").unwrap(),
            Query::match_text("des", "java").fuzziness("AUTO").build().unwrap(),
            Query::multi_match("java", ["name", "des"]).build().unwrap(),
            Query::geo_shape("area", polygon, GeoShapeRelation::Intersects).unwrap(),
            Query::bool()
                .should(Query::term("grade", "A").unwrap())
                .should(Query::term("grade", "B").unwrap())
                .filter(Query::constant_score(Query::exists("tags").unwrap()))
                .minimum_should_match(1)
                .build()
                .unwrap(),
        ];

        for query in queries {
            assert_eq!(Query::from_json(&query.to_json()).unwrap(), query);
        }
    }

    #[test]
    fn test_from_json_accepts_long_form() {
        let short = Query::from_json(&json!({ "term": { "grade": "A" } })).unwrap();
        let long = Query::from_json(&json!({ "term": { "grade": { "value": "A" } } })).unwrap();
        assert_eq!(short, long);
    }

    #[test]
    fn test_from_json_rejects_unknown_kind() {
        assert!(Query::from_json(&json!({ "fuzzy_magic": {} })).is_err());
        assert!(Query::from_json(&json!({ "term": {}, "terms": {} })).is_err());
    }
}
