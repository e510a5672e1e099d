//! Proactive insight escalation
//!
//! Escalation is cumulative: an insight at level N has had the level 1..N
//! actions run for it.
//!
//! | Level | Action |
//! |-------|--------|
//! | 1 | Direct message to the owner |
//! | 2 | Post to an allow-listed internal channel |
//! | 3 | Comment on the external item (pull request, issue) |

pub mod coordinator;
pub mod executor;
pub mod message;
pub mod policy;

pub use coordinator::{EscalationCoordinator, EscalationPreview, EscalationRunStats};
pub use executor::{EscalationExecutor, ExecutionCounts};
pub use message::{escalation_message, MessageFormat};
pub use policy::{determine_level, should_escalate, Decision, SkipReason, RATE_LIMIT_HOURS};
