//! # Transactional Entity Store
//!
//! Repository abstraction over drafts, published stories, progress nodes,
//! scenes, save slots and the task ledger.
//!
//! - [`store`]: the repository traits, [`UnitOfWork`] and [`EntityStore`]
//! - [`transaction`]: [`with_transaction`], commit-or-rollback around a closure
//! - [`postgres`]: `sqlx` implementation used in production
//! - [`in_memory`]: serialized in-memory implementation with fault injection

pub mod errors;
pub mod in_memory;
pub mod postgres;
pub mod store;
pub mod transaction;

pub use errors::{StoreError, StoreResult};
pub use in_memory::{InMemoryEntityStore, TableCounts};
pub use postgres::{PgEntityStore, MIGRATOR};
pub use store::{
    EntityStore, GameStateRepository, ImageReferenceRepository, ProgressRepository, PublishedStoryRepository,
    SceneRepository, StoryConfigRepository, TaskLedgerRepository, UnitOfWork,
};
pub use transaction::with_transaction;
