// Quarry - a typed client core for document-search clusters
//
// Named endpoints, validated query and aggregation expressions, name-path
// navigation of aggregation results, versioned document writes, and scroll
// cursors.

// Re-export the client core
pub use quarry_search::*;

// Re-export logging setup
pub use quarry_log as log;

/// Initialize logging from `QUARRY_*` environment variables.
pub fn init_logging() {
    quarry_log::init();
}

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        Aggregation,
        BulkOperation,
        BulkOutcome,
        CreateMode,
        Document,
        EndpointConfig,
        EndpointRouter,
        Fields,
        MutationRecord,
        Query,
        Result,
        RouterConfig,
        SearchClient,
        SearchError,
        SearchRequest,
        SearchResponse,
        SortOrder,
        SortSpec,
        VersionToken,
    };
}
