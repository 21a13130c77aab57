//! # Orchestration Metrics
//!
//! OpenTelemetry counters for the generation pipeline. The meter comes from
//! the global provider, so nothing is exported until the embedding process
//! installs one.
//!
//! Each counter has a process-local mirror readable through [`snapshot`] for
//! health output and tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;
use serde::Serialize;

use crate::models::{EntityKind, PromptType};

static STORYLOOM_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    STORYLOOM_METER.get_or_init(|| opentelemetry::global::meter_provider().meter("storyloom"))
}

static TASKS_PUBLISHED: AtomicU64 = AtomicU64::new(0);
static RESULTS_APPLIED: AtomicU64 = AtomicU64::new(0);
static RESULTS_STALE: AtomicU64 = AtomicU64::new(0);
static MESSAGES_DROPPED: AtomicU64 = AtomicU64::new(0);
static DEAD_LETTERS_RECOVERED: AtomicU64 = AtomicU64::new(0);
static DEAD_LETTERS_FAILED: AtomicU64 = AtomicU64::new(0);
static CACHE_HITS: AtomicU64 = AtomicU64::new(0);

/// Total generation tasks published
///
/// Labels:
/// - prompt_type: narrator, novel_setup, novel_first_scene_creator, novel_creator
pub fn tasks_published_total() -> Counter<u64> {
    meter()
        .u64_counter("storyloom.tasks.published")
        .with_description("Total generation tasks published")
        .build()
}

/// Results that transitioned an entity
///
/// Labels:
/// - prompt_type
/// - outcome: success, failure
pub fn results_applied_total() -> Counter<u64> {
    meter()
        .u64_counter("storyloom.results.applied")
        .with_description("Generation results that transitioned an entity")
        .build()
}

/// Results ignored because the entity had moved on
pub fn results_stale_total() -> Counter<u64> {
    meter()
        .u64_counter("storyloom.results.stale")
        .with_description("Duplicate or late generation results ignored")
        .build()
}

/// Deliveries acked without processing because they could not be decoded
///
/// Labels:
/// - queue
pub fn messages_dropped_total() -> Counter<u64> {
    meter()
        .u64_counter("storyloom.messages.dropped")
        .with_description("Undecodable messages dropped")
        .build()
}

pub fn dead_letters_recovered_total() -> Counter<u64> {
    meter()
        .u64_counter("storyloom.dead_letters.recovered")
        .with_description("Dead-lettered tasks whose entity was moved to error")
        .build()
}

pub fn dead_letters_failed_total() -> Counter<u64> {
    meter()
        .u64_counter("storyloom.dead_letters.failed")
        .with_description("Dead-lettered tasks whose entity could not be updated")
        .build()
}

/// Requests answered from existing content without publishing
///
/// Labels:
/// - entity_kind
pub fn cache_hits_total() -> Counter<u64> {
    meter()
        .u64_counter("storyloom.cache.hits")
        .with_description("Generation requests served from stored content")
        .build()
}

pub fn record_task_published(prompt_type: PromptType) {
    TASKS_PUBLISHED.fetch_add(1, Ordering::Relaxed);
    tasks_published_total().add(1, &[KeyValue::new("prompt_type", prompt_type.as_str())]);
}

pub fn record_result_applied(prompt_type: PromptType, success: bool) {
    RESULTS_APPLIED.fetch_add(1, Ordering::Relaxed);
    results_applied_total().add(
        1,
        &[
            KeyValue::new("prompt_type", prompt_type.as_str()),
            KeyValue::new("outcome", if success { "success" } else { "failure" }),
        ],
    );
}

pub fn record_result_stale() {
    RESULTS_STALE.fetch_add(1, Ordering::Relaxed);
    results_stale_total().add(1, &[]);
}

pub fn record_message_dropped(queue: &str) {
    MESSAGES_DROPPED.fetch_add(1, Ordering::Relaxed);
    messages_dropped_total().add(1, &[KeyValue::new("queue", queue.to_string())]);
}

pub fn record_dead_letter_recovered() {
    DEAD_LETTERS_RECOVERED.fetch_add(1, Ordering::Relaxed);
    dead_letters_recovered_total().add(1, &[]);
}

pub fn record_dead_letter_failed() {
    DEAD_LETTERS_FAILED.fetch_add(1, Ordering::Relaxed);
    dead_letters_failed_total().add(1, &[]);
}

pub fn record_cache_hit(entity_kind: EntityKind) {
    CACHE_HITS.fetch_add(1, Ordering::Relaxed);
    cache_hits_total().add(1, &[KeyValue::new("entity_kind", entity_kind.as_str())]);
}

/// Point-in-time copy of the process-local counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub tasks_published: u64,
    pub results_applied: u64,
    pub results_stale: u64,
    pub messages_dropped: u64,
    pub dead_letters_recovered: u64,
    pub dead_letters_failed: u64,
    pub cache_hits: u64,
}

pub fn snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        tasks_published: TASKS_PUBLISHED.load(Ordering::Relaxed),
        results_applied: RESULTS_APPLIED.load(Ordering::Relaxed),
        results_stale: RESULTS_STALE.load(Ordering::Relaxed),
        messages_dropped: MESSAGES_DROPPED.load(Ordering::Relaxed),
        dead_letters_recovered: DEAD_LETTERS_RECOVERED.load(Ordering::Relaxed),
        dead_letters_failed: DEAD_LETTERS_FAILED.load(Ordering::Relaxed),
        cache_hits: CACHE_HITS.load(Ordering::Relaxed),
    }
}
