//! # Canonical State Hashing
//!
//! Content-addressable keys for generated story content.
//!
//! Game and story state is semi-structured: maps whose key order is arbitrary,
//! flag lists whose order carries no meaning, numbers that may arrive as
//! integers or floats depending on who wrote them. [`canonical`] rewrites any
//! such value into a single canonical form and digests it; [`state_hash`]
//! defines the two field sets that are hashed in practice.
//!
//! The resulting lowercase hex SHA-256 strings are stable across process
//! restarts and are used as the scene cache key `(published_story_id, hash)`.

pub mod canonical;
pub mod state_hash;

pub use canonical::{canonical_bytes, hash_serializable, hash_value, normalize};
pub use state_hash::{first_scene_hash, progress_state_hash, FIRST_SCENE_CONFIG_FIELDS, FIRST_SCENE_SETUP_FIELDS};

use thiserror::Error;

/// Hashing only fails when the input cannot be turned into JSON.
///
/// For the domain structs in this crate that never happens; callers surface it
/// as an internal error and do not retry.
#[derive(Debug, Error)]
pub enum HashingError {
    #[error("state could not be serialized for hashing: {0}")]
    Serialization(#[from] serde_json::Error),
}
