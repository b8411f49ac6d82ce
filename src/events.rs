//! Domain events emitted after successful commits
//!
//! A notification dispatcher can subscribe through [`EventSink`]; delivery is
//! its problem, the core only announces what changed.
use crate::contract::ContractStatus;
use crate::negotiation::EntryType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngagementEvent {
    ContractCreated {
        contract_id: String,
    },
    ContractStatusChanged {
        contract_id: String,
        from: ContractStatus,
        to: ContractStatus,
    },
    NegotiationOpened {
        negotiation_id: String,
        contract_id: String,
    },
    NegotiationEntryAdded {
        negotiation_id: String,
        entry_type: EntryType,
    },
    NegotiationCancelled {
        negotiation_id: String,
    },
    NegotiationFinalized {
        negotiation_id: String,
        contract_id: String,
        accepted: bool,
    },
}

pub trait EventSink {
    fn publish(&self, event: EngagementEvent);
}

/// Drops everything. The service defaults to this so nothing depends on a
/// subscriber being wired up.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: EngagementEvent) {}
}
