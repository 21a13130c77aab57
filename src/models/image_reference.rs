use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A generated image, shared by every story that names the same reference
/// Maps to `image_references` table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ImageReference {
    pub image_ref: String,
    pub image_url: String,
    pub created_at: DateTime<Utc>,
}

impl ImageReference {
    pub fn new(image_ref: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            image_ref: image_ref.into(),
            image_url: image_url.into(),
            created_at: Utc::now(),
        }
    }
}
