//! Sled-backed persistence for contracts and negotiations
//!
//! Three trees: one per aggregate family plus the live-engagement index,
//! which maps (buyer, offer) to the contract currently occupying that pair.
//! The two writes that touch more than one record (guarded create, accepted
//! finalize) run as multi-tree transactions so they commit all-or-nothing.
//! Every other mutation is a versioned save: the stored record must still be
//! at the version the caller loaded, otherwise the save fails with Conflict.
use crate::contract::Contract;
use crate::error::EngagementError;
use crate::negotiation::Negotiation;
use crate::types::TimeStamp;
use sled::Transactional;
use sled::transaction::{ConflictableTransactionError, TransactionError};

pub struct EngagementStore {
    contracts: sled::Tree,
    negotiations: sled::Tree,
    engagements: sled::Tree, // (buyer, offer) -> live contract id
}

fn encode<T>(value: &T) -> Result<Vec<u8>, EngagementError>
where
    T: minicbor::Encode<()>,
{
    minicbor::to_vec(value).map_err(|e| EngagementError::Codec(e.to_string()))
}

fn decode<T>(bytes: &[u8]) -> Result<T, EngagementError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(bytes).map_err(|e| EngagementError::Codec(e.to_string()))
}

fn abort(e: EngagementError) -> ConflictableTransactionError<EngagementError> {
    ConflictableTransactionError::Abort(e)
}

fn map_tx<T>(res: Result<T, TransactionError<EngagementError>>) -> Result<T, EngagementError> {
    match res {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(EngagementError::Storage(e)),
    }
}

impl EngagementStore {
    pub fn open(db: &sled::Db) -> Result<Self, EngagementError> {
        Ok(Self {
            contracts: db.open_tree("contracts")?,
            negotiations: db.open_tree("negotiations")?,
            engagements: db.open_tree("live_engagements")?,
        })
    }

    fn engagement_key(buyer_id: &str, offer_id: &str) -> Vec<u8> {
        format!("{buyer_id}/{offer_id}").into_bytes()
    }

    /// Insert a fresh contract, enforcing at most one live contract per
    /// (buyer, offer). The index probe and the insert share one transaction,
    /// so two concurrent creates serialize on the index key and the loser
    /// sees the winner's entry.
    pub fn create_contract(&self, contract: &Contract) -> Result<(), EngagementError> {
        let key = Self::engagement_key(&contract.buyer_id, &contract.offer_id);
        let bytes = encode(contract)?;

        let res: Result<(), TransactionError<EngagementError>> =
            (&self.contracts, &self.engagements).transaction(|(contracts, engagements)| {
                if let Some(existing_id) = engagements.get(&key)? {
                    // the entry is stale once the contract it points at left
                    // the live set; only a live one blocks the create
                    if let Some(raw) = contracts.get(&existing_id)? {
                        let existing: Contract = decode(raw.as_ref()).map_err(abort)?;
                        if existing.status.is_live() {
                            return Err(abort(EngagementError::InvalidInput(format!(
                                "an active engagement already exists for this offer ({})",
                                existing.id
                            ))));
                        }
                    }
                }
                contracts.insert(contract.id.as_bytes(), bytes.as_slice())?;
                engagements.insert(key.as_slice(), contract.id.as_bytes())?;
                Ok(())
            });
        map_tx(res)
    }

    pub fn load_contract(&self, id: &str) -> Result<Option<Contract>, EngagementError> {
        match self.contracts.get(id.as_bytes())? {
            Some(raw) => Ok(Some(decode(raw.as_ref())?)),
            None => Ok(None),
        }
    }

    /// Versioned save. Also keeps the live-engagement index honest: a
    /// contract leaving the live set releases its (buyer, offer) slot in the
    /// same transaction.
    pub fn save_contract(&self, contract: &Contract) -> Result<Contract, EngagementError> {
        let expected = contract.version;
        let mut updated = contract.clone();
        updated.version = expected + 1;

        let bytes = encode(&updated)?;
        let key = Self::engagement_key(&updated.buyer_id, &updated.offer_id);

        let res: Result<(), TransactionError<EngagementError>> =
            (&self.contracts, &self.engagements).transaction(|(contracts, engagements)| {
                let raw = contracts.get(updated.id.as_bytes())?.ok_or_else(|| {
                    abort(EngagementError::NotFound(format!("contract {}", updated.id)))
                })?;
                let stored: Contract = decode(raw.as_ref()).map_err(abort)?;
                if stored.version != expected {
                    return Err(abort(EngagementError::Conflict(format!(
                        "contract {} was modified concurrently",
                        updated.id
                    ))));
                }

                contracts.insert(updated.id.as_bytes(), bytes.as_slice())?;
                if updated.status.is_live() {
                    engagements.insert(key.as_slice(), updated.id.as_bytes())?;
                } else if let Some(current) = engagements.get(&key)? {
                    if current.as_ref() == updated.id.as_bytes() {
                        engagements.remove(key.as_slice())?;
                    }
                }
                Ok(())
            });
        map_tx(res)?;
        Ok(updated)
    }

    pub fn contracts_for(
        &self,
        participant_id: &str,
        status: Option<crate::contract::ContractStatus>,
    ) -> Result<Vec<Contract>, EngagementError> {
        let mut out = vec![];
        for item in self.contracts.iter() {
            let (_, raw) = item?;
            let contract: Contract = decode(raw.as_ref())?;
            if contract.is_participant(participant_id)
                && status.is_none_or(|s| contract.status == s)
            {
                out.push(contract);
            }
        }
        Ok(out)
    }

    pub fn create_negotiation(&self, negotiation: &Negotiation) -> Result<(), EngagementError> {
        let bytes = encode(negotiation)?;
        self.negotiations
            .insert(negotiation.id.as_bytes(), bytes)?;
        Ok(())
    }

    pub fn load_negotiation(&self, id: &str) -> Result<Option<Negotiation>, EngagementError> {
        match self.negotiations.get(id.as_bytes())? {
            Some(raw) => Ok(Some(decode(raw.as_ref())?)),
            None => Ok(None),
        }
    }

    /// Versioned save for the single-record negotiation mutations (responses,
    /// rejection, cancellation).
    pub fn save_negotiation(
        &self,
        negotiation: &Negotiation,
    ) -> Result<Negotiation, EngagementError> {
        let expected = negotiation.version;
        let mut updated = negotiation.clone();
        updated.version = expected + 1;

        let bytes = encode(&updated)?;

        let res: Result<(), TransactionError<EngagementError>> =
            self.negotiations.transaction(|tree| {
                let raw = tree.get(updated.id.as_bytes())?.ok_or_else(|| {
                    abort(EngagementError::NotFound(format!(
                        "negotiation {}",
                        updated.id
                    )))
                })?;
                let stored: Negotiation = decode(raw.as_ref()).map_err(abort)?;
                if stored.version != expected {
                    return Err(abort(EngagementError::Conflict(format!(
                        "negotiation {} was modified concurrently",
                        updated.id
                    ))));
                }
                tree.insert(updated.id.as_bytes(), bytes.as_slice())?;
                Ok(())
            });
        map_tx(res)?;
        Ok(updated)
    }

    pub fn negotiations_for(&self, contract_id: &str) -> Result<Vec<Negotiation>, EngagementError> {
        let mut out = vec![];
        for item in self.negotiations.iter() {
            let (_, raw) = item?;
            let negotiation: Negotiation = decode(raw.as_ref())?;
            if negotiation.contract_id == contract_id {
                out.push(negotiation);
            }
        }
        Ok(out)
    }

    /// Commit an acceptance: the negotiation flips to Accepted and the parent
    /// contract takes on the final terms, in one transaction. The contract is
    /// re-read and re-validated inside the atomic scope; if it was cancelled,
    /// completed, or reassigned in the meantime the whole operation aborts
    /// with Conflict and neither record changes.
    pub fn commit_acceptance(
        &self,
        accepted: &Negotiation,
    ) -> Result<(Negotiation, Contract), EngagementError> {
        let expected = accepted.version;
        let mut updated = accepted.clone();
        updated.version = expected + 1;

        let terms = updated.final_terms.clone().ok_or_else(|| {
            EngagementError::Conflict(format!(
                "negotiation {} has no final terms to commit",
                updated.id
            ))
        })?;
        let neg_bytes = encode(&updated)?;

        let res: Result<Contract, TransactionError<EngagementError>> =
            (&self.negotiations, &self.contracts).transaction(|(negotiations, contracts)| {
                let raw = negotiations.get(updated.id.as_bytes())?.ok_or_else(|| {
                    abort(EngagementError::NotFound(format!(
                        "negotiation {}",
                        updated.id
                    )))
                })?;
                let stored: Negotiation = decode(raw.as_ref()).map_err(abort)?;
                if stored.version != expected {
                    return Err(abort(EngagementError::Conflict(format!(
                        "negotiation {} was modified concurrently",
                        updated.id
                    ))));
                }

                let raw = contracts
                    .get(updated.contract_id.as_bytes())?
                    .ok_or_else(|| {
                        abort(EngagementError::Conflict(format!(
                            "contract {} no longer exists",
                            updated.contract_id
                        )))
                    })?;
                let mut contract: Contract = decode(raw.as_ref()).map_err(abort)?;
                if contract.buyer_id != updated.buyer_id
                    || contract.provider_id != updated.provider_id
                {
                    return Err(abort(EngagementError::Conflict(format!(
                        "contract {} participants changed since the negotiation opened",
                        contract.id
                    ))));
                }
                if !contract.status.is_negotiable() {
                    return Err(abort(EngagementError::Conflict(format!(
                        "contract {} is no longer negotiable ({})",
                        contract.id, contract.status
                    ))));
                }

                if let Some(price) = terms.final_price {
                    contract.total_value = price;
                }
                if let Some(deadline) = terms.final_deadline.clone() {
                    contract.service_deadline = Some(deadline);
                }
                contract.updated_at = TimeStamp::new();
                contract.version += 1;
                let contract_bytes = encode(&contract).map_err(abort)?;

                negotiations.insert(updated.id.as_bytes(), neg_bytes.as_slice())?;
                contracts.insert(contract.id.as_bytes(), contract_bytes)?;
                Ok(contract)
            });
        let contract = map_tx(res)?;
        Ok((updated, contract))
    }
}
