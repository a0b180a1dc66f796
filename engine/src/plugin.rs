//! The plugin surface: lifecycle hooks for persistence and sync collaborators.
//!
//! Plugins see the core only through the database handle: collections,
//! subscriptions and document export. A persistence plugin typically
//! subscribes via [`Database::on_mutation`] during `init`, snapshots with
//! [`Database::to_documents`] on mutation, and delivers externally received
//! documents through `collection.merge`. Plugins never touch the clock;
//! every clock advancement is a consequence of CRDT operations.

use async_trait::async_trait;

use crate::database::Database;
use crate::error::Result;

/// Lifecycle hooks for a database collaborator.
///
/// `init` handlers run in registration order, `dispose` handlers in reverse
/// registration order; both are awaited sequentially. An `init` failure
/// propagates immediately and leaves the database partially initialized.
/// `dispose` is best-effort: every handler runs, the first error is returned
/// after all attempts.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Name used in lifecycle logs and errors.
    fn name(&self) -> &str;

    /// Called by [`Database::init`].
    async fn init(&self, _db: &mut Database) -> Result<()> {
        Ok(())
    }

    /// Called by [`Database::dispose`].
    async fn dispose(&self, _db: &mut Database) -> Result<()> {
        Ok(())
    }
}
