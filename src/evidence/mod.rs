//! Evidence sessions and their persistence.

pub mod session;
pub mod store;

pub use session::{device_info, generate_session_id, EvidenceSession, FileTypeSummary, PendingSession};
pub use store::{EvidenceError, EvidenceStats, EvidenceStore, SweepReport};
