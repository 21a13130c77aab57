//! # Task and Result Messages
//!
//! Wire contracts between the orchestrator and the generation workers. Both
//! are plain JSON objects; the field names below are the wire names.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::models::{GenerationTaskRecord, PromptType};

/// A unit of generation work, immutable once published
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationTask {
    pub task_id: Uuid,
    /// Entity whose status the result drives
    pub entity_id: Uuid,
    pub prompt_type: PromptType,
    pub correlation_id: Uuid,
    /// Prompt inputs for the worker; shape depends on `prompt_type`
    pub payload: Value,
}

impl From<&GenerationTaskRecord> for GenerationTask {
    fn from(record: &GenerationTaskRecord) -> Self {
        Self {
            task_id: record.task_id,
            entity_id: record.entity_id,
            prompt_type: record.prompt_type,
            correlation_id: record.correlation_id,
            payload: record.payload.clone(),
        }
    }
}

/// Outcome of a generation task, produced by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub task_id: Uuid,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl GenerationResult {
    pub fn success(task_id: Uuid, artifact: Value) -> Self {
        Self {
            task_id,
            success: true,
            artifact: Some(artifact),
            error_message: None,
        }
    }

    pub fn failure(task_id: Uuid, error_message: impl Into<String>) -> Self {
        Self {
            task_id,
            success: false,
            artifact: None,
            error_message: Some(error_message.into()),
        }
    }
}
