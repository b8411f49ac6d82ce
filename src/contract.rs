//! Contract aggregate and its status machine states
use crate::error::EngagementError;
use crate::transitions::SideEffect;
use crate::types::{Role, TimeStamp};
use chrono::Utc;
use std::fmt;
use std::str::FromStr;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Accepted,
    #[n(2)]
    InProgress,
    #[n(3)]
    Completed,
    #[n(4)]
    CancelledByBuyer,
    #[n(5)]
    CancelledByProvider,
    #[n(6)]
    Disputed,
}

impl ContractStatus {
    /// Terminal states are retained for audit and have no outgoing transitions.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::CancelledByBuyer | Self::CancelledByProvider | Self::Disputed
        )
    }

    /// The live-engagement set: contracts in these states block a second
    /// engagement between the same buyer and offer.
    pub const fn is_live(&self) -> bool {
        !self.is_terminal()
    }

    /// A negotiation can only be opened while the contract sits here.
    pub const fn is_negotiable(&self) -> bool {
        matches!(self, Self::Pending | Self::Accepted)
    }
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::CancelledByBuyer => "cancelled-by-buyer",
            Self::CancelledByProvider => "cancelled-by-provider",
            Self::Disputed => "disputed",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ContractStatus {
    type Err = EngagementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "in-progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "cancelled-by-buyer" => Ok(Self::CancelledByBuyer),
            "cancelled-by-provider" => Ok(Self::CancelledByProvider),
            "disputed" => Ok(Self::Disputed),
            other => Err(EngagementError::InvalidInput(format!(
                "unrecognised contract status: {other}"
            ))),
        }
    }
}

/// One engagement between a buyer and a provider against a specific offer.
/// Never deleted; terminal contracts stay in the store for audit.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Contract {
    #[n(0)]
    pub id: String, // uuid7, bech32 encoded
    #[n(1)]
    pub buyer_id: String,
    #[n(2)]
    pub provider_id: String,
    #[n(3)]
    pub offer_id: String,
    #[n(4)]
    pub status: ContractStatus,
    #[n(5)]
    pub service_started_at: Option<TimeStamp<Utc>>,
    #[n(6)]
    pub service_ended_at: Option<TimeStamp<Utc>>,
    #[n(7)]
    pub service_deadline: Option<TimeStamp<Utc>>,
    #[n(8)]
    pub total_value: u64, // integers for currency
    #[n(9)]
    pub created_at: TimeStamp<Utc>,
    #[n(10)]
    pub updated_at: TimeStamp<Utc>,
    #[n(11)]
    pub version: u64, // bumped on every persisted mutation
}

impl Contract {
    pub fn new(
        id: String,
        buyer_id: String,
        provider_id: String,
        offer_id: String,
        total_value: u64,
    ) -> Self {
        let now = TimeStamp::new();
        Self {
            id,
            buyer_id,
            provider_id,
            offer_id,
            status: ContractStatus::Pending,
            service_started_at: None,
            service_ended_at: None,
            service_deadline: None,
            total_value,
            created_at: now.clone(),
            updated_at: now,
            version: 0,
        }
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

    /// Move to the requested status and run the table's side effect.
    /// MarkServiceStarted is write-once so retries never clobber the
    /// original start time.
    pub fn apply_transition(&mut self, requested: ContractStatus, effect: SideEffect) {
        match effect {
            SideEffect::None => {}
            SideEffect::MarkServiceStarted => {
                if self.service_started_at.is_none() {
                    self.service_started_at = Some(TimeStamp::new());
                }
            }
            SideEffect::MarkServiceEnded => {
                self.service_ended_at = Some(TimeStamp::new());
            }
        }
        self.status = requested;
        self.updated_at = TimeStamp::new();
    }
}
