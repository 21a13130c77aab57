//! # Generation Events
//!
//! Broadcast of lifecycle transitions for in-process listeners such as
//! notification fan-out.

pub mod publisher;
pub mod types;

pub use publisher::EventPublisher;
pub use types::GenerationEvent;
