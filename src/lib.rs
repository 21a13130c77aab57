#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, RabbitMQ in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Storyloom Core
//!
//! Generation orchestration for AI-driven interactive fiction.
//!
//! ## Overview
//!
//! Story content is produced by external generation workers. This crate
//! decides when to ask them, keeps the entities that wait on them consistent,
//! and reuses content that was already generated:
//!
//! - A **story config** (draft) is generated from a free-form prompt.
//! - A **published story** is generated from a ready draft in two stages:
//!   setup, then the opening scene.
//! - A **game state** (save slot) advances scene by scene as the player makes
//!   choices. Scenes are stored under a canonical hash of the game state, so
//!   any player reaching a known state gets the stored scene immediately.
//!
//! ## Module Organization
//!
//! - [`hashing`] - Canonical state hashing used as the scene cache key
//! - [`models`] - Entities, statuses and the task ledger record
//! - [`database`] - Transactional entity store (Postgres and in-memory)
//! - [`messaging`] - Task and result channel (RabbitMQ and in-memory)
//! - [`orchestration`] - Request, result and dead-letter processing
//! - [`config`] - Layered TOML configuration with environment overrides
//! - [`error`] - Caller-facing error taxonomy
//! - [`events`] - In-process lifecycle events
//! - [`logging`] / [`metrics`] - Structured logging and OpenTelemetry counters
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use storyloom_core::config::StoryloomConfig;
//! use storyloom_core::orchestration::{GenerationIntent, SystemContext};
//! use uuid::Uuid;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let context = SystemContext::in_memory(StoryloomConfig::default()).await?;
//! let outcome = context
//!     .generation_service()
//!     .request_generation(
//!         Uuid::new_v4(),
//!         GenerationIntent::Draft {
//!             prompt: "a heist on a generation ship".into(),
//!             language: "en".into(),
//!         },
//!     )
//!     .await?;
//! println!("draft {} is {}", outcome.snapshot.id, outcome.snapshot.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test                                  # unit and in-memory integration tests
//! TEST_DATABASE_URL=postgres://... cargo test # include Postgres store tests
//! cargo test -- --ignored                     # RabbitMQ tests (broker required)
//! ```

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod events;
pub mod hashing;
pub mod logging;
pub mod messaging;
pub mod metrics;
pub mod models;
pub mod orchestration;

pub use config::{ConfigLoader, StoryloomConfig};
pub use error::{ConflictKind, OrchestrationError, OrchestrationResult};
pub use orchestration::{
    EntityRef, EntitySnapshot, GameStateService, GenerationIntent, GenerationOutcome, GenerationService,
    SystemContext,
};
