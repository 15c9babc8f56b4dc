// crates/core/src/resolver.rs
//! Owner-checked snapshot lookup for reconnecting clients.
//!
//! The batch id embeds the owning user as a prefix, so a foreign id is
//! rejected before the store is consulted - a guessed id leaks nothing,
//! not even whether the batch exists.

use std::sync::Arc;

use tickerflow_types::{BatchId, ProgressSnapshot};

use crate::error::ResolveError;
use crate::store::ProgressStore;

pub struct IdentityResolver {
    store: Arc<ProgressStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<ProgressStore>) -> Self {
        Self { store }
    }

    /// Resolve an opaque batch id for a user.
    ///
    /// `Forbidden` when the id is not prefixed with this user's identity;
    /// `NotFound` when no in-memory record exists (never created, or
    /// evicted by retention) - callers treat that as "assume not running".
    pub fn resolve(
        &self,
        user_id: &str,
        batch_id: &BatchId,
    ) -> Result<ProgressSnapshot, ResolveError> {
        if !batch_id.is_owned_by(user_id) {
            tracing::warn!(
                user_id = %user_id,
                batch_id = %batch_id,
                "cross-user batch resolution refused"
            );
            return Err(ResolveError::Forbidden);
        }
        self.store.snapshot(batch_id).ok_or(ResolveError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn resolver_with_batch(user: &str) -> (IdentityResolver, BatchId) {
        let store = Arc::new(ProgressStore::new());
        let batch_id = BatchId::generate(user);
        store.init(&batch_id, 2).unwrap();
        (IdentityResolver::new(store), batch_id)
    }

    #[test]
    fn test_resolve_own_batch() {
        let (resolver, batch_id) = resolver_with_batch("alice");
        let snap = resolver.resolve("alice", &batch_id).unwrap();
        assert_eq!(snap.total_jobs, 2);
    }

    // Cross-user resolution is always Forbidden, never a snapshot.
    #[test]
    fn test_resolve_foreign_batch_is_forbidden() {
        let (resolver, batch_id) = resolver_with_batch("alice");
        assert_eq!(
            resolver.resolve("bob", &batch_id).unwrap_err(),
            ResolveError::Forbidden
        );
    }

    #[test]
    fn test_forbidden_takes_priority_over_not_found() {
        let store = Arc::new(ProgressStore::new());
        let resolver = IdentityResolver::new(store);
        // Foreign id that also does not exist: Forbidden, not NotFound, so
        // existence is not leaked.
        let foreign = BatchId::generate("alice");
        assert_eq!(
            resolver.resolve("bob", &foreign).unwrap_err(),
            ResolveError::Forbidden
        );
    }

    #[test]
    fn test_resolve_missing_batch_is_not_found() {
        let store = Arc::new(ProgressStore::new());
        let resolver = IdentityResolver::new(store);
        let gone = BatchId::generate("alice");
        assert_eq!(
            resolver.resolve("alice", &gone).unwrap_err(),
            ResolveError::NotFound
        );
    }

    #[test]
    fn test_resolve_garbage_id() {
        let store = Arc::new(ProgressStore::new());
        let resolver = IdentityResolver::new(store);
        let garbage = BatchId::from_string("../../etc/passwd");
        assert_eq!(
            resolver.resolve("alice", &garbage).unwrap_err(),
            ResolveError::Forbidden
        );
    }
}
