//! Goods receiving against a supplier invoice.

pub mod controller;
pub mod model;
pub mod queue;
pub mod workspace;

#[cfg(test)]
pub(crate) mod fake;

pub use controller::{FinalizeGate, ReceivingController};
pub use queue::{PendingScan, QueueStatus, ScanOutcome};
pub use workspace::{Confirmation, Phase, ReceivingWorkspace};
