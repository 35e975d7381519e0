//! Search backend abstraction.
//!
//! The retriever only talks to a [`SearchBackend`]; the X API client in
//! [`crate::connector_x`] is the production implementation and tests plug
//! in scripted fakes.
//!
//! Request-rate compliance (waiting out rate limits, retrying) belongs to
//! the backend. The retriever treats any error returned from
//! [`SearchBackend::search`] as final for the session.

use crate::error::Result;
use crate::models::{CountEstimate, SearchPage, SearchRequest};

/// A paginated keyword search capability.
pub trait SearchBackend {
    /// Short identifier used in logs and reports (e.g. `"x"`).
    fn name(&self) -> &str;

    /// Fetch one page of hits.
    ///
    /// `request.page_size` has already been clamped to the ceiling by the
    /// caller. A page with zero posts means the window is exhausted.
    fn search(&self, request: &SearchRequest) -> Result<SearchPage>;

    /// Best-effort estimate of how many posts match `query` over the
    /// backend's recent window.
    ///
    /// Must not fail: backends that cannot estimate return
    /// [`CountEstimate::Unsupported`].
    fn estimate_count(&self, _query: &str) -> CountEstimate {
        CountEstimate::unsupported("count estimation not implemented by this backend")
    }
}
