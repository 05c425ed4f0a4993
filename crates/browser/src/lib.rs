//! Browser session management over a CDP-style driver contract.
//!
//! The driver itself (the remote-controlled Chromium engine) is an
//! external collaborator; this crate owns everything above it: the
//! pooled pages, per-task tab groups, snapshot/action contracts, the
//! behavior recorder for online learning, and the browser tools the
//! agents call.

pub mod driver;
pub mod locator;
pub mod recorder;
pub mod session;
pub mod snapshot;
pub mod tools;

pub use driver::{ActionOutcome, BrowserDriver, DisconnectedDriver, MouseAction, PageId};
pub use recorder::BehaviorRecorder;
pub use session::{ActionResult, BrowserSession};
pub use snapshot::{PageSnapshot, SnapshotElement};
