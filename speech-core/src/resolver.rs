//! The response rule engine, seen from the speech core.

use crate::criteria::CriteriaSet;
use crate::response::Response;

/// Maps a criteria set to the best matching response.
///
/// Implementations may weight their choice randomly, so two calls with the
/// same criteria are not guaranteed to agree. Nested response groups must
/// be expanded before returning; a [`crate::ResponseKind::Response`] never
/// reaches the core legitimately.
pub trait Resolver {
    fn find_best_response(&mut self, criteria: &CriteriaSet) -> Option<Response>;

    /// Every response the resolver knows, for diagnostics.
    fn all_responses(&self) -> Vec<Response> {
        Vec::new()
    }
}
