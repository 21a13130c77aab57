use std::collections::BTreeMap;

use proptest::prelude::*;
use serde_json::{Map, Value};
use storyloom_core::models::{ProgressState, SceneChoice};

/// Stat and flag names as stories use them
pub fn identifier_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,15}"
}

pub fn core_stats_strategy() -> impl Strategy<Value = BTreeMap<String, i64>> {
    prop::collection::btree_map(identifier_strategy(), -100i64..100, 0..6)
}

pub fn flags_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(identifier_strategy(), 0..6)
}

/// Scalar story variables; floats are whole so they coerce to integers
pub fn variable_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        (-1000i64..1000).prop_map(Value::from),
        "[a-z ]{0,12}".prop_map(Value::from),
    ]
}

pub fn variables_strategy() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map(identifier_strategy(), variable_value_strategy(), 0..5)
        .prop_map(|vars| vars.into_iter().collect())
}

pub fn progress_state_strategy() -> impl Strategy<Value = ProgressState> {
    (core_stats_strategy(), 0u32..50, flags_strategy(), variables_strategy()).prop_map(
        |(core_stats, scene_index, global_flags, story_variables)| ProgressState {
            core_stats,
            scene_index,
            global_flags,
            story_variables,
        },
    )
}

pub fn scene_choice_strategy() -> impl Strategy<Value = SceneChoice> {
    (
        prop::collection::btree_map(identifier_strategy(), -5i64..5, 0..3),
        flags_strategy(),
        flags_strategy(),
        variables_strategy(),
    )
        .prop_map(|(stat_changes, set_flags, clear_flags, set_variables)| SceneChoice {
            stat_changes,
            set_flags,
            clear_flags,
            set_variables,
            remove_variables: Vec::new(),
        })
}
