//! # Generation Orchestration
//!
//! Drives drafts, published stories and game states through their generation
//! lifecycles.
//!
//! ## Flow
//!
//! 1. A caller request ([`GenerationService`], [`GameStateService`]) writes the
//!    entity and its task in one unit of work.
//! 2. After commit, [`TaskPublisher`] hands the task to the broker. A failed
//!    publish moves the entity to error.
//! 3. Workers answer on the results queue; [`ResultProcessor`] applies each
//!    answer at most once, conditional on the task still being active.
//! 4. Tasks the broker gives up on land in a dead-letter queue, where
//!    [`DeadLetterRecovery`] moves their entities to error.
//!
//! A stored setup also fans out image tasks (character portraits and a
//! cover) that run alongside the story without gating it.
//!
//! Stored scenes are keyed by a canonical state hash, so a state reached
//! before is served without generating again.

pub mod bootstrap;
pub mod dead_letter_consumer;
pub mod game_state_service;
pub mod generation_service;
pub mod image_batch;
pub mod result_processor;
pub mod task_publisher;
pub(crate) mod transitions;
pub mod types;

pub use bootstrap::{SystemContext, SystemHealth};
pub use dead_letter_consumer::{DeadLetterRecovery, ResultDeadLetterRecovery};
pub use game_state_service::GameStateService;
pub use generation_service::GenerationService;
pub use image_batch::ImageRequest;
pub use result_processor::{HandleOutcome, ResultProcessor, MISSING_ARTIFACT, MISSING_IMAGE_URL};
pub use task_publisher::TaskPublisher;
pub use types::{EntityRef, EntitySnapshot, GenerationIntent, GenerationOutcome};
