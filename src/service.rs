//! Service layer API for engagement workflow operations
use crate::contract::{Contract, ContractStatus};
use crate::error::EngagementError;
use crate::events::{EngagementEvent, EventSink, NullSink};
use crate::negotiation::{EntryType, Negotiation, NegotiationStatus, Proposal};
use crate::offer::{OfferAvailability, OfferDirectory};
use crate::store::EngagementStore;
use crate::transitions::allowed_transition;
use crate::types::{Role, TimeStamp};
use crate::utils;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// How a negotiation gets closed by the responding party.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeAction {
    Accept,
    Reject,
}

impl fmt::Display for FinalizeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accept => write!(f, "accept"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

impl FromStr for FinalizeAction {
    type Err = EngagementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept" => Ok(Self::Accept),
            "reject" => Ok(Self::Reject),
            other => Err(EngagementError::InvalidInput(format!(
                "unrecognised finalize action: {other}"
            ))),
        }
    }
}

pub struct EngagementService {
    store: EngagementStore,
    offers: Arc<dyn OfferDirectory + Send + Sync>,
    events: Arc<dyn EventSink + Send + Sync>,
}

/// Callers arrive with an already-resolved identity; a blank one means the
/// resolver upstream never ran.
fn require_identity(actor_id: &str) -> Result<(), EngagementError> {
    if actor_id.trim().is_empty() {
        return Err(EngagementError::Unauthenticated);
    }
    Ok(())
}

impl EngagementService {
    pub fn new(
        db: Arc<sled::Db>,
        offers: Arc<dyn OfferDirectory + Send + Sync>,
    ) -> Result<Self, EngagementError> {
        Ok(Self {
            store: EngagementStore::open(&db)?,
            offers,
            events: Arc::new(NullSink),
        })
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink + Send + Sync>) -> Self {
        self.events = events;
        self
    }

    /// Create a contract on an offer, guarded against duplicate live
    /// engagements for the same (buyer, offer) pair.
    pub fn create_contract(
        &self,
        buyer_id: &str,
        offer_id: &str,
    ) -> Result<Contract, EngagementError> {
        require_identity(buyer_id)?;

        let offer = self
            .offers
            .lookup(offer_id)?
            .ok_or_else(|| EngagementError::NotFound(format!("offer {offer_id}")))?;

        if offer.availability != OfferAvailability::Available {
            return Err(EngagementError::InvalidInput(format!(
                "offer {offer_id} is not available"
            )));
        }
        if offer.owner_id == buyer_id {
            return Err(EngagementError::InvalidInput(
                "a party cannot engage their own offer".into(),
            ));
        }

        let contract = Contract::new(
            utils::new_uuid_to_bech32("contract_")?,
            buyer_id.to_string(),
            offer.owner_id,
            offer.id,
            offer.price,
        );
        self.store.create_contract(&contract)?;

        info!(contract_id = %contract.id, offer_id, "contract created");
        self.events.publish(EngagementEvent::ContractCreated {
            contract_id: contract.id.clone(),
        });
        Ok(contract)
    }

    pub fn get_contract(
        &self,
        contract_id: &str,
        caller_id: &str,
    ) -> Result<Contract, EngagementError> {
        require_identity(caller_id)?;

        let contract = self.load_contract(contract_id)?;
        if !contract.is_participant(caller_id) {
            return Err(EngagementError::Forbidden(
                "caller is not a participant of this contract".into(),
            ));
        }
        Ok(contract)
    }

    /// All contracts the caller participates in, optionally narrowed to one
    /// status.
    pub fn list_contracts(
        &self,
        caller_id: &str,
        status: Option<ContractStatus>,
    ) -> Result<Vec<Contract>, EngagementError> {
        require_identity(caller_id)?;
        self.store.contracts_for(caller_id, status)
    }

    /// Move a contract through its status machine on behalf of `actor_id`.
    pub fn change_status(
        &self,
        contract_id: &str,
        requested: ContractStatus,
        actor_id: &str,
        actor_role: Role,
    ) -> Result<Contract, EngagementError> {
        require_identity(actor_id)?;

        let mut contract = self.load_contract(contract_id)?;
        self.check_contract_actor(&contract, actor_id, actor_role)?;

        let Some(effect) = allowed_transition(contract.status, requested, actor_role) else {
            return Err(EngagementError::not_allowed(contract.status, requested));
        };

        let from = contract.status;
        contract.apply_transition(requested, effect);
        let contract = self.store.save_contract(&contract)?;

        info!(contract_id = %contract.id, %from, to = %requested, "contract status changed");
        self.events.publish(EngagementEvent::ContractStatusChanged {
            contract_id: contract.id.clone(),
            from,
            to: requested,
        });
        Ok(contract)
    }

    /// Open a renegotiation thread on a contract the buyer owns.
    pub fn open_negotiation(
        &self,
        contract_id: &str,
        buyer_id: &str,
        proposal: Proposal,
    ) -> Result<Negotiation, EngagementError> {
        require_identity(buyer_id)?;
        proposal.validate()?;

        let contract = self.load_contract(contract_id)?;
        if contract.buyer_id != buyer_id {
            return Err(EngagementError::Forbidden(
                "only the contract's buyer may open a negotiation".into(),
            ));
        }
        if !contract.status.is_negotiable() {
            return Err(EngagementError::not_allowed(contract.status, "open-negotiation"));
        }

        let negotiation = Negotiation::open(
            utils::new_uuid_to_bech32("negotiation_")?,
            &contract,
            proposal,
        );
        self.store.create_negotiation(&negotiation)?;

        info!(negotiation_id = %negotiation.id, contract_id, "negotiation opened");
        self.events.publish(EngagementEvent::NegotiationOpened {
            negotiation_id: negotiation.id.clone(),
            contract_id: contract.id,
        });
        Ok(negotiation)
    }

    /// Append a response, counter-proposal, or message to a live negotiation.
    /// Turn-taking is strict: the entry is only accepted while the thread is
    /// waiting on the author's side.
    pub fn respond(
        &self,
        negotiation_id: &str,
        actor_id: &str,
        actor_role: Role,
        entry_type: EntryType,
        payload: Proposal,
    ) -> Result<Negotiation, EngagementError> {
        require_identity(actor_id)?;
        payload.validate()?;

        let mut negotiation = self.load_negotiation(negotiation_id)?;
        self.check_negotiation_actor(&negotiation, actor_id, actor_role)?;

        if negotiation.status.is_terminal() {
            return Err(EngagementError::not_allowed(negotiation.status, entry_type));
        }
        if !entry_type.allowed_for(actor_role) {
            return Err(EngagementError::InvalidInput(format!(
                "a {actor_role} cannot author a {entry_type} entry"
            )));
        }
        if !negotiation.turn_allows(actor_role) {
            return Err(EngagementError::not_allowed(negotiation.status, entry_type));
        }

        negotiation.append(actor_id.to_string(), actor_role, entry_type, payload);
        let negotiation = self.store.save_negotiation(&negotiation)?;

        info!(negotiation_id = %negotiation.id, %entry_type, "negotiation entry added");
        self.events.publish(EngagementEvent::NegotiationEntryAdded {
            negotiation_id: negotiation.id.clone(),
            entry_type,
        });
        Ok(negotiation)
    }

    /// Close a negotiation with accept or reject. Only the party the thread
    /// is currently waiting on may do this; accepting rewrites the parent
    /// contract's terms atomically with the status flip.
    pub fn finalize(
        &self,
        negotiation_id: &str,
        actor_id: &str,
        actor_role: Role,
        action: FinalizeAction,
    ) -> Result<(Negotiation, Contract), EngagementError> {
        require_identity(actor_id)?;

        let mut negotiation = self.load_negotiation(negotiation_id)?;
        self.check_negotiation_actor(&negotiation, actor_id, actor_role)?;

        if negotiation.status.is_terminal() {
            return Err(EngagementError::not_allowed(negotiation.status, action));
        }
        if !negotiation.turn_allows(actor_role) {
            return Err(EngagementError::not_allowed(negotiation.status, action));
        }

        let (negotiation, contract) = match action {
            FinalizeAction::Reject => {
                negotiation.status = NegotiationStatus::Rejected;
                negotiation.updated_at = TimeStamp::new();
                let negotiation = self.store.save_negotiation(&negotiation)?;
                // the contract is untouched on reject
                let contract = self.load_contract(&negotiation.contract_id)?;
                (negotiation, contract)
            }
            FinalizeAction::Accept => {
                negotiation.final_terms = Some(negotiation.resolve_final_terms());
                negotiation.status = NegotiationStatus::Accepted;
                negotiation.updated_at = TimeStamp::new();
                self.store.commit_acceptance(&negotiation)?
            }
        };

        info!(
            negotiation_id = %negotiation.id,
            contract_id = %contract.id,
            %action,
            "negotiation finalized"
        );
        self.events.publish(EngagementEvent::NegotiationFinalized {
            negotiation_id: negotiation.id.clone(),
            contract_id: contract.id.clone(),
            accepted: action == FinalizeAction::Accept,
        });
        Ok((negotiation, contract))
    }

    /// Either participant may close a thread that has gone nowhere. The
    /// contract is untouched.
    pub fn cancel_negotiation(
        &self,
        negotiation_id: &str,
        actor_id: &str,
    ) -> Result<Negotiation, EngagementError> {
        require_identity(actor_id)?;

        let mut negotiation = self.load_negotiation(negotiation_id)?;
        if !negotiation.is_participant(actor_id) {
            return Err(EngagementError::Forbidden(
                "caller is not a participant of this negotiation".into(),
            ));
        }
        if negotiation.status.is_terminal() {
            return Err(EngagementError::not_allowed(negotiation.status, "cancel"));
        }

        negotiation.status = NegotiationStatus::Cancelled;
        negotiation.updated_at = TimeStamp::new();
        let negotiation = self.store.save_negotiation(&negotiation)?;

        info!(negotiation_id = %negotiation.id, "negotiation cancelled");
        self.events.publish(EngagementEvent::NegotiationCancelled {
            negotiation_id: negotiation.id.clone(),
        });
        Ok(negotiation)
    }

    pub fn list_negotiations(
        &self,
        contract_id: &str,
        caller_id: &str,
    ) -> Result<Vec<Negotiation>, EngagementError> {
        require_identity(caller_id)?;

        let contract = self.load_contract(contract_id)?;
        if !contract.is_participant(caller_id) {
            return Err(EngagementError::Forbidden(
                "caller is not a participant of this contract".into(),
            ));
        }
        self.store.negotiations_for(contract_id)
    }

    fn load_contract(&self, contract_id: &str) -> Result<Contract, EngagementError> {
        self.store
            .load_contract(contract_id)?
            .ok_or_else(|| EngagementError::NotFound(format!("contract {contract_id}")))
    }

    fn load_negotiation(&self, negotiation_id: &str) -> Result<Negotiation, EngagementError> {
        self.store
            .load_negotiation(negotiation_id)?
            .ok_or_else(|| EngagementError::NotFound(format!("negotiation {negotiation_id}")))
    }

    /// The actor must be one of the contract's two parties, under the role
    /// they actually hold on it.
    fn check_contract_actor(
        &self,
        contract: &Contract,
        actor_id: &str,
        actor_role: Role,
    ) -> Result<(), EngagementError> {
        match contract.role_of(actor_id) {
            None => Err(EngagementError::Forbidden(
                "caller is not a participant of this contract".into(),
            )),
            Some(held) if held != actor_role => Err(EngagementError::Forbidden(format!(
                "caller is the contract's {held}, not its {actor_role}"
            ))),
            Some(_) => Ok(()),
        }
    }

    fn check_negotiation_actor(
        &self,
        negotiation: &Negotiation,
        actor_id: &str,
        actor_role: Role,
    ) -> Result<(), EngagementError> {
        match negotiation.role_of(actor_id) {
            None => Err(EngagementError::Forbidden(
                "caller is not a participant of this negotiation".into(),
            )),
            Some(held) if held != actor_role => Err(EngagementError::Forbidden(format!(
                "caller is the negotiation's {held}, not its {actor_role}"
            ))),
            Some(_) => Ok(()),
        }
    }
}
