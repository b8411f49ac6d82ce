//! Negotiation aggregate and its append-only history log
use crate::contract::Contract;
use crate::error::EngagementError;
use crate::types::{Role, TimeStamp};
use chrono::Utc;
use std::fmt;
use std::str::FromStr;

/// Notes longer than this are rejected at the boundary.
pub const MAX_NOTES_LEN: usize = 1000;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStatus {
    #[n(0)]
    Started,
    #[n(1)]
    AwaitingProvider,
    #[n(2)]
    AwaitingBuyer,
    #[n(3)]
    Accepted,
    #[n(4)]
    Rejected,
    #[n(5)]
    Cancelled,
}

impl NegotiationStatus {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Accepted | Self::Rejected | Self::Cancelled)
    }
}

impl fmt::Display for NegotiationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Started => "started",
            Self::AwaitingProvider => "awaiting-provider",
            Self::AwaitingBuyer => "awaiting-buyer",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Discriminant for history entries. All three carry the same payload shape.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    #[n(0)]
    BuyerProposal,
    #[n(1)]
    ProviderResponse,
    #[n(2)]
    PlainMessage,
}

impl EntryType {
    /// Which side may author this kind of entry. Plain messages are open to
    /// both, but still consume the author's turn.
    pub const fn allowed_for(&self, role: Role) -> bool {
        matches!(
            (self, role),
            (Self::BuyerProposal, Role::Buyer)
                | (Self::ProviderResponse, Role::Provider)
                | (Self::PlainMessage, _)
        )
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BuyerProposal => "buyer-proposal",
            Self::ProviderResponse => "provider-response",
            Self::PlainMessage => "plain-message",
        };
        write!(f, "{s}")
    }
}

impl FromStr for EntryType {
    type Err = EngagementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buyer-proposal" => Ok(Self::BuyerProposal),
            "provider-response" => Ok(Self::ProviderResponse),
            "plain-message" => Ok(Self::PlainMessage),
            other => Err(EngagementError::InvalidInput(format!(
                "unrecognised entry type: {other}"
            ))),
        }
    }
}

/// The payload every history entry carries. Price and deadline are optional
/// counter-terms; the notes are what the author actually said.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    #[n(0)]
    pub proposed_price: Option<u64>,
    #[n(1)]
    pub proposed_deadline: Option<TimeStamp<Utc>>,
    #[n(2)]
    pub notes: String,
}

impl Proposal {
    pub fn validate(&self) -> Result<(), EngagementError> {
        if self.notes.trim().is_empty() {
            return Err(EngagementError::InvalidInput(
                "proposal notes must not be empty".into(),
            ));
        }
        if self.notes.chars().count() > MAX_NOTES_LEN {
            return Err(EngagementError::InvalidInput(format!(
                "proposal notes exceed {MAX_NOTES_LEN} characters"
            )));
        }
        Ok(())
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    #[n(0)]
    pub author_id: String,
    #[n(1)]
    pub entry_type: EntryType,
    #[n(2)]
    pub payload: Proposal,
    #[n(3)]
    pub recorded_at: TimeStamp<Utc>, // server assigned
}

/// Populated exactly once, on acceptance.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct FinalTerms {
    #[n(0)]
    pub final_price: Option<u64>,
    #[n(1)]
    pub final_deadline: Option<TimeStamp<Utc>>,
}

/// One renegotiation thread tied to exactly one contract. Buyer and provider
/// ids are denormalized from the contract at creation so authorization checks
/// do not need a second load.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Negotiation {
    #[n(0)]
    pub id: String, // uuid7, bech32 encoded
    #[n(1)]
    pub contract_id: String,
    #[n(2)]
    pub buyer_id: String,
    #[n(3)]
    pub provider_id: String,
    #[n(4)]
    pub history: Vec<HistoryEntry>, // append-only, never reordered
    #[n(5)]
    pub status: NegotiationStatus,
    #[n(6)]
    pub final_terms: Option<FinalTerms>,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
    #[n(8)]
    pub updated_at: TimeStamp<Utc>,
    #[n(9)]
    pub version: u64,
}

impl Negotiation {
    /// Open a thread on `contract`, seeded with the buyer's opening proposal.
    /// The thread is never observable in `Started`; seeding hands the turn to
    /// the provider before the first persist.
    pub fn open(id: String, contract: &Contract, proposal: Proposal) -> Self {
        let now = TimeStamp::new();
        let mut negotiation = Self {
            id,
            contract_id: contract.id.clone(),
            buyer_id: contract.buyer_id.clone(),
            provider_id: contract.provider_id.clone(),
            history: vec![],
            status: NegotiationStatus::Started,
            final_terms: None,
            created_at: now.clone(),
            updated_at: now,
            version: 0,
        };
        negotiation.append(contract.buyer_id.clone(), Role::Buyer, EntryType::BuyerProposal, proposal);
        negotiation
    }

    pub fn is_participant(&self, actor_id: &str) -> bool {
        self.role_of(actor_id).is_some()
    }

    pub fn role_of(&self, actor_id: &str) -> Option<Role> {
        if actor_id == self.buyer_id {
            Some(Role::Buyer)
        } else if actor_id == self.provider_id {
            Some(Role::Provider)
        } else {
            None
        }
    }

    /// Whether it is currently `role`'s move. The same rule gates responding
    /// and finalizing, so the party who made the last move can never close
    /// their own proposal.
    pub const fn turn_allows(&self, role: Role) -> bool {
        matches!(
            (self.status, role),
            (NegotiationStatus::AwaitingProvider, Role::Provider)
                | (NegotiationStatus::AwaitingBuyer, Role::Buyer)
        )
    }

    /// Append an entry with a server timestamp and hand the turn to the other
    /// party. A plain message flips the turn the same way a substantive
    /// response does; the protocol has no no-op move.
    pub fn append(
        &mut self,
        author_id: String,
        author_role: Role,
        entry_type: EntryType,
        payload: Proposal,
    ) {
        self.history.push(HistoryEntry {
            author_id,
            entry_type,
            payload,
            recorded_at: TimeStamp::new(),
        });
        self.status = match author_role {
            Role::Buyer => NegotiationStatus::AwaitingProvider,
            Role::Provider => NegotiationStatus::AwaitingBuyer,
        };
        self.updated_at = TimeStamp::new();
    }

    /// Resolve the terms an acceptance locks in: price and deadline each come
    /// from the most recent entry carrying one, so a counter that only moved
    /// the price still inherits the deadline proposed earlier.
    pub fn resolve_final_terms(&self) -> FinalTerms {
        let final_price = self
            .history
            .iter()
            .rev()
            .find_map(|entry| entry.payload.proposed_price);
        let final_deadline = self
            .history
            .iter()
            .rev()
            .find_map(|entry| entry.payload.proposed_deadline.clone());
        FinalTerms {
            final_price,
            final_deadline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::Contract;
    use crate::utils;

    fn proposal(price: Option<u64>, notes: &str) -> Proposal {
        Proposal {
            proposed_price: price,
            proposed_deadline: None,
            notes: notes.into(),
        }
    }

    fn open_thread() -> Negotiation {
        let contract = Contract::new(
            utils::new_uuid_to_bech32("contract_").unwrap(),
            "user_buyer".into(),
            "user_provider".into(),
            "offer_a".into(),
            5_000,
        );
        Negotiation::open(
            utils::new_uuid_to_bech32("negotiation_").unwrap(),
            &contract,
            proposal(Some(100), "opening offer"),
        )
    }

    #[test]
    fn negotiation_encoding() {
        let original = open_thread();

        let encoding = minicbor::to_vec(&original).unwrap();
        let decode: Negotiation = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn open_seeds_history_and_hands_turn_to_provider() {
        let negotiation = open_thread();

        assert_eq!(negotiation.history.len(), 1);
        assert_eq!(negotiation.history[0].entry_type, EntryType::BuyerProposal);
        assert_eq!(negotiation.status, NegotiationStatus::AwaitingProvider);
        assert!(negotiation.turn_allows(Role::Provider));
        assert!(!negotiation.turn_allows(Role::Buyer));
    }

    #[test]
    fn plain_message_consumes_the_turn() {
        let mut negotiation = open_thread();

        negotiation.append(
            "user_provider".into(),
            Role::Provider,
            EntryType::PlainMessage,
            proposal(None, "let me check my calendar"),
        );

        assert_eq!(negotiation.status, NegotiationStatus::AwaitingBuyer);
    }

    #[test]
    fn final_terms_pick_newest_price_and_fall_back_for_deadline() {
        let mut negotiation = open_thread();
        let deadline = TimeStamp::new_with(2026, 9, 1, 12, 0, 0);

        negotiation.append(
            "user_provider".into(),
            Role::Provider,
            EntryType::ProviderResponse,
            Proposal {
                proposed_price: Some(150),
                proposed_deadline: Some(deadline.clone()),
                notes: "can do it for 150 by september".into(),
            },
        );
        negotiation.append(
            "user_buyer".into(),
            Role::Buyer,
            EntryType::BuyerProposal,
            proposal(Some(130), "meet me at 130"),
        );

        let terms = negotiation.resolve_final_terms();
        assert_eq!(terms.final_price, Some(130));
        assert_eq!(terms.final_deadline, Some(deadline));
    }

    #[test]
    fn notes_validation() {
        assert!(proposal(None, "fine").validate().is_ok());
        assert!(proposal(None, "").validate().is_err());
        assert!(proposal(None, "   ").validate().is_err());
        assert!(proposal(None, &"x".repeat(MAX_NOTES_LEN)).validate().is_ok());
        assert!(proposal(None, &"x".repeat(MAX_NOTES_LEN + 1)).validate().is_err());
    }
}
