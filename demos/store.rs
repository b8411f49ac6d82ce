//! Walks one engagement end to end against a throwaway local db:
//! create a contract, renegotiate the price, accept, then complete.

use engagement::contract::ContractStatus;
use engagement::negotiation::{EntryType, Proposal};
use engagement::offer::{Offer, OfferAvailability, StaticOffers};
use engagement::service::{EngagementService, FinalizeAction};
use engagement::types::Role;
use engagement::utils;
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    let db = sled::open("demo-db")?;

    if !db.is_empty() {
        db.clear()?;
    }

    let buyer_id = utils::new_uuid_to_bech32("user_")?;
    let provider_id = utils::new_uuid_to_bech32("user_")?;
    let offer_id = utils::new_uuid_to_bech32("offer_")?;

    let offers = StaticOffers::new().with(Offer {
        id: offer_id.clone(),
        owner_id: provider_id.clone(),
        price: 20_000,
        availability: OfferAvailability::Available,
    });

    let service = EngagementService::new(Arc::new(db), Arc::new(offers))?;

    let contract = service.create_contract(&buyer_id, &offer_id)?;
    println!("created: {:#?}", contract);

    // buyer opens a renegotiation before the provider accepts
    let negotiation = service.open_negotiation(
        &contract.id,
        &buyer_id,
        Proposal {
            proposed_price: Some(15_000),
            proposed_deadline: None,
            notes: "could you do it for 15k?".into(),
        },
    )?;

    let negotiation = service.respond(
        &negotiation.id,
        &provider_id,
        Role::Provider,
        EntryType::ProviderResponse,
        Proposal {
            proposed_price: Some(17_500),
            proposed_deadline: None,
            notes: "meet me halfway".into(),
        },
    )?;

    let (negotiation, contract) = service.finalize(
        &negotiation.id,
        &buyer_id,
        Role::Buyer,
        FinalizeAction::Accept,
    )?;
    println!(
        "negotiation {} accepted, contract value is now {}",
        negotiation.id, contract.total_value
    );

    let contract = service.change_status(
        &contract.id,
        ContractStatus::Accepted,
        &provider_id,
        Role::Provider,
    )?;
    let contract = service.change_status(
        &contract.id,
        ContractStatus::InProgress,
        &provider_id,
        Role::Provider,
    )?;
    let contract = service.change_status(
        &contract.id,
        ContractStatus::Completed,
        &provider_id,
        Role::Provider,
    )?;
    println!("final: {:#?}", contract);

    Ok(())
}
