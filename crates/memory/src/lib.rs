//! Cloud memory client and online-learning write path.
//!
//! The daemon reads proven workflows (cognitive phrases, navigation
//! paths, page operations) and writes back recorded in-browser behavior.
//! It never mutates the shapes the service returns — only formats them
//! into prompt context blocks.

pub mod client;
pub mod format;
pub mod page_ops;
pub mod types;

pub use client::{MemoryProvider, NullMemory, RestMemoryClient};
pub use types::{
    CognitivePhrase, IntentSequence, MemoryAction, MemoryAddRequest, MemoryPlanResponse,
    MemoryQueryResponse, MemoryState, RecordedOperation,
};
