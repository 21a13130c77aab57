//! # System Constants
//!
//! Human-readable reasons stored in `error_details`. Callers surface these
//! verbatim, so changing one is a user-visible change.

/// Stored when a worker reports failure without a message
pub const DEFAULT_GENERATION_FAILURE: &str = "generation failed";

/// Stored when a task was committed but could not be handed to the broker
pub const DISPATCH_FAILURE: &str = "failed to dispatch generation task";

/// A stat flagged `game_over.min` ends the game at or below this value
pub const GAME_OVER_MIN_THRESHOLD: i64 = 0;

/// A stat flagged `game_over.max` ends the game at or above this value
pub const GAME_OVER_MAX_THRESHOLD: i64 = 100;

/// Stored when an ending result carries no ending text
pub const MISSING_ENDING_TEXT: &str = "game over result missing ending_text";

/// Stored by dead-letter recovery when the broker gave no reason
pub const DEAD_LETTER_FAILURE: &str = "Generation task failed. See generator logs for details.";

/// Reason stored by dead-letter recovery
pub fn dead_letter_reason(death_reason: Option<&str>) -> String {
    match death_reason.map(str::trim).filter(|r| !r.is_empty()) {
        Some(reason) => format!("Generation task failed (reason: {reason}). See generator logs for details."),
        None => DEAD_LETTER_FAILURE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_reason() {
        assert_eq!(dead_letter_reason(None), DEAD_LETTER_FAILURE);
        assert_eq!(dead_letter_reason(Some("  ")), DEAD_LETTER_FAILURE);
        assert_eq!(
            dead_letter_reason(Some("delivery_limit")),
            "Generation task failed (reason: delivery_limit). See generator logs for details."
        );
    }
}
