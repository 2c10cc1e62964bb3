//! Forward-only paging over a server-side result snapshot.
//!
//! ```text
//! Unopened --open--> Open --next (empty page)--> Exhausted
//!                     |  \--cancel-------------> Cancelled
//!                     \--keep-alive lapsed-----> Expired
//! ```
//!
//! A cursor reads its snapshot once. To start over, open a new cursor.

use crate::{
    client::SearchClient,
    codec,
    document::Document,
    error::{Result, SearchError},
    search::{SearchRequest, SearchResponse},
};
use quarry_log::debug;
use serde_json::json;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use tokio::sync::Mutex;

/// Where a cursor is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// No request sent yet.
    Unopened,
    /// Snapshot held on the cluster.
    Open,
    /// The last page was empty; the snapshot was released.
    Exhausted,
    /// Closed by the caller.
    Cancelled,
    /// The cluster dropped the snapshot.
    Expired,
}

#[derive(Debug)]
struct ScrollState {
    state: CursorState,
    token: Option<String>,
    last_page_size: usize,
}

/// Pages through every hit of a search.
///
/// The keep-alive is renewed by every page fetch. Only one caller advances
/// the cursor at a time; concurrent calls wait on the cursor's own lock.
pub struct ScrollCursor<T> {
    client: SearchClient,
    request: SearchRequest,
    keep_alive: String,
    state: Mutex<ScrollState>,
    _doc: PhantomData<fn() -> T>,
}

impl<T: Document> ScrollCursor<T> {
    pub(crate) fn new(client: SearchClient, request: SearchRequest) -> Self {
        let keep_alive = request
            .scroll_keep_alive()
            .map(codec::time_value)
            .unwrap_or_default();
        Self {
            client,
            request,
            keep_alive,
            state: Mutex::new(ScrollState {
                state: CursorState::Unopened,
                token: None,
                last_page_size: 0,
            }),
            _doc: PhantomData,
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> CursorState {
        self.state.lock().await.state
    }

    /// Number of hits in the most recent page.
    pub async fn last_page_size(&self) -> usize {
        self.state.lock().await.last_page_size
    }

    /// Keep-alive sent with each page request, in the cluster's time format.
    pub fn keep_alive(&self) -> &str {
        &self.keep_alive
    }

    /// Run the search and return the first page.
    ///
    /// Aggregations, if requested, are only present on this page.
    pub async fn open(&self) -> Result<SearchResponse<T>> {
        let mut guard = self.state.lock().await;
        if guard.state != CursorState::Unopened {
            return Err(SearchError::CursorClosed);
        }

        let page: SearchResponse<T> = self.client.search(&self.request).await?;
        let token = page
            .scroll_id
            .clone()
            .ok_or_else(|| SearchError::malformed("scroll search reply without _scroll_id"))?;

        debug!(
            endpoint = self.client.name(),
            hits = page.hits.len(),
            total = page.total;
            "scroll opened"
        );
        self.advance(&mut guard, token, page.hits.len()).await;
        Ok(page)
    }

    /// Fetch the next page.
    ///
    /// An empty page means the snapshot is exhausted; the cursor releases it
    /// and further calls fail with [`SearchError::CursorClosed`].
    pub async fn next(&self) -> Result<SearchResponse<T>> {
        let mut guard = self.state.lock().await;
        match guard.state {
            CursorState::Open => {}
            CursorState::Expired => {
                return Err(SearchError::CursorExpired(
                    "scroll snapshot is no longer available".to_string(),
                ));
            }
            _ => return Err(SearchError::CursorClosed),
        }
        let token = guard.token.clone().ok_or(SearchError::CursorClosed)?;

        let send = self
            .client
            .inner()
            .scroll(opensearch::ScrollParts::None)
            .body(json!({ "scroll": self.keep_alive, "scroll_id": token }))
            .send();
        let reply = self.client.execute("scroll", "_search/scroll", send).await?;

        let body = match reply.into_success() {
            Ok(body) => body,
            Err(e @ SearchError::CursorExpired(_)) => {
                debug!(endpoint = self.client.name(); "scroll expired");
                guard.state = CursorState::Expired;
                guard.token = None;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let page: SearchResponse<T> = codec::decode_search(&body, &BTreeMap::new())?;
        let next_token = page.scroll_id.clone().unwrap_or(token);
        self.advance(&mut guard, next_token, page.hits.len()).await;
        Ok(page)
    }

    /// Close the cursor and release the snapshot.
    ///
    /// Cancelling a cursor that is already closed does nothing. If the
    /// release fails the cursor stays open and the error is returned.
    pub async fn cancel(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        match guard.state {
            CursorState::Unopened | CursorState::Open => {
                // The token is dropped only once the release succeeds.
                if let Some(token) = guard.token.clone() {
                    clear(&self.client, token).await?;
                }
                guard.token = None;
                guard.state = CursorState::Cancelled;
                debug!(endpoint = self.client.name(); "scroll cancelled");
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Record a fetched page; an empty one ends the scroll.
    async fn advance(&self, state: &mut ScrollState, token: String, hits: usize) {
        state.last_page_size = hits;
        if hits > 0 {
            state.token = Some(token);
            state.state = CursorState::Open;
            return;
        }

        state.token = None;
        state.state = CursorState::Exhausted;
        debug!(endpoint = self.client.name(); "scroll exhausted");
        if let Err(e) = clear(&self.client, token).await {
            debug!(endpoint = self.client.name(); "clear scroll failed: {}", e);
        }
    }

    /// Turn the cursor into a stream of non-empty pages.
    #[cfg(feature = "stream")]
    pub fn into_pages(self) -> impl futures::Stream<Item = Result<SearchResponse<T>>> {
        futures::stream::unfold(Some(self), |cursor| async move {
            let cursor = cursor?;
            let page = match cursor.state().await {
                CursorState::Unopened => cursor.open().await,
                _ => cursor.next().await,
            };
            match page {
                Ok(page) if page.hits.is_empty() => None,
                Ok(page) => Some((Ok(page), Some(cursor))),
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

async fn clear(client: &SearchClient, token: String) -> Result<()> {
    let send = client
        .inner()
        .clear_scroll(opensearch::ClearScrollParts::None)
        .body(json!({ "scroll_id": [token] }))
        .send();
    let reply = client.execute("clear_scroll", "_search/scroll", send).await?;
    // A snapshot the cluster already dropped is gone either way.
    if reply.status == 404 {
        return Ok(());
    }
    reply.into_success().map(|_| ())
}

impl<T> Drop for ScrollCursor<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if state.state != CursorState::Open {
            return;
        }
        let Some(token) = state.token.take() else {
            return;
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let client = self.client.clone();
            debug!(endpoint = client.name(); "releasing dropped scroll");
            handle.spawn(async move {
                let _ = clear(&client, token).await;
            });
        }
    }
}

impl<T> std::fmt::Debug for ScrollCursor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrollCursor")
            .field("endpoint", &self.client.name())
            .field("indices", &self.request.index_names())
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}
