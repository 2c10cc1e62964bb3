//! Typed document-search client core.
//!
//! This crate talks to OpenSearch/Elasticsearch-compatible clusters:
//! - Named endpoints, each with its own connection pool and timeouts
//! - Validated query and aggregation expressions, including geo predicates
//! - Aggregation results navigable by name path
//! - Document writes with server-side version checks, bulk and by-query
//! - Scroll cursors over large result sets
//!
//! # Example
//!
//! ```rust,no_run
//! use quarry_search::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Order {
//!     color: String,
//!     brand: String,
//!     price: f64,
//! }
//!
//! impl Document for Order {}
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let router = EndpointRouter::new(
//!         RouterConfig::new().endpoint(EndpointConfig::new("primary", "localhost", 9200)),
//!     )?;
//!     let client = router.resolve("primary")?;
//!
//!     let request = SearchRequest::new("orders")
//!         .size(0)
//!         .aggregation(
//!             "colors",
//!             Aggregation::terms("color")
//!                 .build()?
//!                 .with_sub_aggregation("revenue", Aggregation::sum("price")?)?,
//!         )?;
//!     let response = client.search::<Order>(&request).await?;
//!
//!     for path in response.aggregations.paths() {
//!         println!("{}", path.join(" > "));
//!     }
//!     let yellow = response.aggregations.get(&["colors['yellow']", "revenue"])?;
//!     println!("yellow revenue: {:?}", yellow.value());
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod aggregation;
mod client;
pub mod codec;
mod config;
mod document;
mod error;
mod geo;
mod index;
mod mutation;
mod query;
mod result;
mod router;
mod scroll;
mod search;

pub use aggregation::{
    Aggregation, AggregationKind, AggregationType, CalendarInterval, DateInterval, RangeBucket,
    ResultShape, TermsAggregation, TermsOrder,
};
pub use client::{ClusterHealth, HealthStatus, SearchClient};
pub use config::{EndpointConfig, RouterConfig, Scheme};
pub use document::{DocumentMeta, Fields, Hit, MutationRecord, VersionToken};
pub use document::Document;
pub use error::{Result, SearchError};
pub use geo::{
    Distance, DistanceUnit, GeoBox, GeoDistanceType, GeoPoint, GeoShapeRelation, IndexedShape,
    Shape,
};
pub use index::{
    AliasAction, AliasInfo, FieldType, IndexInfo, IndexManager, IndexSettings, Mapping,
    MappingField, NodeInfo, ReindexReport,
};
pub use mutation::{
    BulkOperation, BulkOutcome, ConflictPolicy, CreateMode, FieldMutation, MutationController,
    RefreshPolicy, ScriptSource, UpdateByQueryReport, WriteAck, WriteResult,
};
pub use query::{
    BoolQuery, ConstantScoreQuery, ExistsQuery, GeoBoundingBoxQuery, GeoDistanceQuery,
    GeoShapeQuery, MatchOperator, MatchPhraseQuery, MatchQuery, MultiMatchQuery, MultiMatchType,
    PrefixQuery, Query, RangeQuery, ShapeSource, TermQuery, TermsQuery, WildcardQuery,
};
pub use result::{AggregationNode, AggregationResults, Bucket, BucketKey, Percentile};
pub use router::EndpointRouter;
pub use scroll::{CursorState, ScrollCursor};
pub use search::{
    QueryExplanation, QueryValidation, SearchRequest, SearchResponse, SortOrder, SortSpec,
};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{
        Aggregation, BulkOperation, BulkOutcome, CreateMode, Document, EndpointConfig,
        EndpointRouter, Fields, MutationRecord, Query, Result, RouterConfig, SearchClient,
        SearchError, SearchRequest, SearchResponse, SortOrder, SortSpec, VersionToken,
    };
}
