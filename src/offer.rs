//! Offer lookup seam
//!
//! The offer catalog lives outside this crate. The duplicate-engagement guard
//! only needs to resolve an offer id to its owner, price, and availability,
//! so that is the whole interface.
use crate::error::EngagementError;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferAvailability {
    Available,
    Paused,
    Withdrawn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    pub id: String,
    pub owner_id: String, // the provider publishing the offer
    pub price: u64,
    pub availability: OfferAvailability,
}

pub trait OfferDirectory {
    fn lookup(&self, offer_id: &str) -> Result<Option<Offer>, EngagementError>;
}

/// Fixed in-memory catalog, enough for tests and demos.
#[derive(Debug, Default)]
pub struct StaticOffers {
    offers: HashMap<String, Offer>,
}

impl StaticOffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, offer: Offer) -> Self {
        self.offers.insert(offer.id.clone(), offer);
        self
    }
}

impl OfferDirectory for StaticOffers {
    fn lookup(&self, offer_id: &str) -> Result<Option<Offer>, EngagementError> {
        Ok(self.offers.get(offer_id).cloned())
    }
}
