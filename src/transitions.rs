//! The contract status transition table
//!
//! One lookup owns every legal move of the contract machine. Anything the
//! table does not list is denied, which covers state skips, transitions out
//! of terminal states, and requests made by the wrong party.
use crate::contract::ContractStatus;
use crate::types::Role;

/// What applying an allowed transition does to the contract besides the
/// status flip itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    None,
    /// Stamp `service_started_at` if it is still unset.
    MarkServiceStarted,
    /// Stamp `service_ended_at` unconditionally.
    MarkServiceEnded,
}

/// Look up (current, requested, actor role). `None` means denied.
pub fn allowed_transition(
    current: ContractStatus,
    requested: ContractStatus,
    actor: Role,
) -> Option<SideEffect> {
    use ContractStatus::*;

    match (current, requested, actor) {
        // only the provider walks the happy path forward
        (Pending, Accepted, Role::Provider) => Some(SideEffect::None),
        (Accepted, InProgress, Role::Provider) => Some(SideEffect::MarkServiceStarted),
        (InProgress, Completed, Role::Provider) => Some(SideEffect::MarkServiceEnded),
        // each party can only pull their own cancellation lever
        (Pending | Accepted | InProgress, CancelledByBuyer, Role::Buyer) => Some(SideEffect::None),
        (Pending | Accepted | InProgress, CancelledByProvider, Role::Provider) => {
            Some(SideEffect::None)
        }
        // either party may escalate any non-terminal contract
        (from, Disputed, _) if !from.is_terminal() => Some(SideEffect::None),
        _ => None,
    }
}
