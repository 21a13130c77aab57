//! The two hashed field sets.
//!
//! * **Progress state**: the mutable part of a player's position in a story
//!   (`core_stats`, `scene_index`, `global_flags`, `story_variables`). Used for
//!   every scene after the first.
//! * **First scene**: immutable story config and generated setup fields. Used
//!   once per published story, to key the opening scene.
//!
//! The two must never be mixed: a progress node created from a first-scene
//! hash is only ever the root node of its story.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use super::canonical::hash_value;
use super::HashingError;

/// Story config fields that determine the opening scene.
pub const FIRST_SCENE_CONFIG_FIELDS: [&str; 9] = [
    "title",
    "short_description",
    "language",
    "is_adult_content",
    "player_name",
    "player_gender",
    "player_description",
    "world_context",
    "themes",
];

/// Generated setup fields that determine the opening scene.
pub const FIRST_SCENE_SETUP_FIELDS: [&str; 2] = ["core_stats_definition", "characters"];

/// Hash of a player's mutable progress.
pub fn progress_state_hash(
    core_stats: &BTreeMap<String, i64>,
    scene_index: u32,
    global_flags: &[String],
    story_variables: &Map<String, Value>,
) -> Result<String, HashingError> {
    let state = json!({
        "core_stats": serde_json::to_value(core_stats)?,
        "scene_index": scene_index,
        "global_flags": global_flags,
        "story_variables": story_variables,
    });
    Ok(hash_value(&state))
}

/// Hash keying the first scene of a published story.
///
/// Absent fields hash as `null`, so a config missing `themes` and one with
/// `"themes": null` share a hash.
pub fn first_scene_hash(config: &Value, setup: &Value) -> Result<String, HashingError> {
    let pick = |source: &Value, field: &str| source.get(field).cloned().unwrap_or(Value::Null);

    let mut fields = Map::new();
    for field in FIRST_SCENE_CONFIG_FIELDS {
        fields.insert(field.to_string(), pick(config, field));
    }
    for field in FIRST_SCENE_SETUP_FIELDS {
        fields.insert(field.to_string(), pick(setup, field));
    }

    Ok(hash_value(&Value::Object(fields)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(pairs: &[(&str, i64)]) -> BTreeMap<String, i64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_progress_hash_ignores_flag_order() {
        let vars = Map::new();
        let a = progress_state_hash(
            &stats(&[("courage", 3)]),
            2,
            &["met_king".into(), "has_key".into()],
            &vars,
        )
        .unwrap();
        let b = progress_state_hash(
            &stats(&[("courage", 3)]),
            2,
            &["has_key".into(), "met_king".into()],
            &vars,
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_progress_hash_tracks_scene_index() {
        let vars = Map::new();
        let a = progress_state_hash(&stats(&[]), 1, &[], &vars).unwrap();
        let b = progress_state_hash(&stats(&[]), 2, &[], &vars).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_progress_hash_coerces_variable_numbers() {
        let mut ints = Map::new();
        ints.insert("gold".into(), json!(10));
        let mut floats = Map::new();
        floats.insert("gold".into(), json!(10.0));

        assert_eq!(
            progress_state_hash(&stats(&[]), 0, &[], &ints).unwrap(),
            progress_state_hash(&stats(&[]), 0, &[], &floats).unwrap()
        );
    }

    #[test]
    fn test_first_scene_hash_ignores_unrelated_fields() {
        let config = json!({"title": "Night Train", "language": "en", "themes": ["noir", "rail"]});
        let with_noise = json!({"themes": ["rail", "noir"], "language": "en", "title": "Night Train", "draft_notes": "x"});
        let setup = json!({"characters": [{"name": "Ada"}], "core_stats_definition": {"nerve": {"initial": 5}}});

        assert_eq!(
            first_scene_hash(&config, &setup).unwrap(),
            first_scene_hash(&with_noise, &setup).unwrap()
        );
    }

    #[test]
    fn test_first_scene_hash_tracks_setup() {
        let config = json!({"title": "Night Train"});
        let a = first_scene_hash(&config, &json!({"core_stats_definition": {"nerve": {"initial": 5}}})).unwrap();
        let b = first_scene_hash(&config, &json!({"core_stats_definition": {"nerve": {"initial": 6}}})).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_variants_do_not_collide_on_empty_input() {
        let progress = progress_state_hash(&BTreeMap::new(), 0, &[], &Map::new()).unwrap();
        let first = first_scene_hash(&Value::Null, &Value::Null).unwrap();
        assert_ne!(progress, first);
    }
}
