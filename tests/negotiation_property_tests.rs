//! Property-based tests for negotiation history and turn invariants
//!
//! The negotiation log is append-only and strictly turn-alternating; these
//! properties exercise those invariants over randomly generated exchanges
//! rather than hand-picked sequences.

use engagement::contract::Contract;
use engagement::negotiation::{
    EntryType, MAX_NOTES_LEN, Negotiation, NegotiationStatus, Proposal,
};
use engagement::types::Role;
use engagement::utils::new_uuid_to_bech32;
use proptest::prelude::*;

// PROPERTY TEST STRATEGIES

/// Strategy to generate an optional price (0 allowed, prices are unsigned)
fn price_strategy() -> impl Strategy<Value = Option<u64>> {
    prop::option::of(0u64..=100_000_000u64)
}

/// Strategy to generate valid, non-empty notes
fn notes_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9 ]{1,40}".prop_map(|s| if s.trim().is_empty() { "hm".to_string() } else { s })
}

/// Strategy to generate one exchange: who moves plus what they carry.
/// The sequence alternates by construction because the engine enforces it;
/// here we generate the payloads and derive the mover from the turn.
fn exchange_strategy() -> impl Strategy<Value = Vec<(Option<u64>, String, bool)>> {
    // bool: whether the entry is a plain message instead of a counter
    prop::collection::vec(
        (price_strategy(), notes_strategy(), prop::bool::ANY),
        0..12,
    )
}

fn contract_pair() -> Contract {
    Contract::new(
        new_uuid_to_bech32("contract_").unwrap(),
        "user_buyer".into(),
        "user_provider".into(),
        "offer_a".into(),
        1_000,
    )
}

fn run_exchange(
    opening_price: Option<u64>,
    opening_notes: &str,
    entries: &[(Option<u64>, String, bool)],
) -> Negotiation {
    let contract = contract_pair();
    let mut negotiation = Negotiation::open(
        new_uuid_to_bech32("negotiation_").unwrap(),
        &contract,
        Proposal {
            proposed_price: opening_price,
            proposed_deadline: None,
            notes: opening_notes.into(),
        },
    );

    for (price, notes, plain) in entries {
        // whoever the thread waits on makes the next move
        let (author, role) = match negotiation.status {
            NegotiationStatus::AwaitingProvider => ("user_provider", Role::Provider),
            NegotiationStatus::AwaitingBuyer => ("user_buyer", Role::Buyer),
            other => panic!("exchange reached unexpected status {other}"),
        };
        let entry_type = if *plain {
            EntryType::PlainMessage
        } else if role == Role::Buyer {
            EntryType::BuyerProposal
        } else {
            EntryType::ProviderResponse
        };
        negotiation.append(
            author.into(),
            role,
            entry_type,
            Proposal {
                proposed_price: *price,
                proposed_deadline: None,
                notes: notes.clone(),
            },
        );
    }
    negotiation
}

// PROPERTY TESTS
proptest! {
    /// Property: The turn strictly alternates across appends
    ///
    /// After any exchange, walking the history must show the status flipping
    /// between AwaitingProvider and AwaitingBuyer on every single entry; two
    /// consecutive entries never leave the thread waiting on the same side.
    #[test]
    fn prop_turn_strictly_alternates(
        opening_price in price_strategy(),
        opening_notes in notes_strategy(),
        entries in exchange_strategy(),
    ) {
        let negotiation = run_exchange(opening_price, &opening_notes, &entries);

        // replay the log and track whose turn follows each entry
        let mut expected = NegotiationStatus::AwaitingProvider; // after the opening proposal
        for entry in &negotiation.history[1..] {
            // the entry was only legal on the awaited side's turn
            match expected {
                NegotiationStatus::AwaitingProvider => {
                    prop_assert_eq!(entry.author_id.as_str(), "user_provider")
                }
                NegotiationStatus::AwaitingBuyer => {
                    prop_assert_eq!(entry.author_id.as_str(), "user_buyer")
                }
                other => prop_assert!(false, "unexpected turn state {}", other),
            }
            expected = match expected {
                NegotiationStatus::AwaitingProvider => NegotiationStatus::AwaitingBuyer,
                _ => NegotiationStatus::AwaitingProvider,
            };
        }
        prop_assert_eq!(negotiation.status, expected);
    }

    /// Property: History only grows and is never reordered
    #[test]
    fn prop_history_is_append_only(
        opening_price in price_strategy(),
        opening_notes in notes_strategy(),
        entries in exchange_strategy(),
    ) {
        let negotiation = run_exchange(opening_price, &opening_notes, &entries);

        prop_assert_eq!(negotiation.history.len(), entries.len() + 1);
        prop_assert_eq!(negotiation.history[0].entry_type, EntryType::BuyerProposal);

        // server-assigned timestamps never run backwards
        for pair in negotiation.history.windows(2) {
            prop_assert!(pair[1].recorded_at >= pair[0].recorded_at);
        }
    }

    /// Property: Resolved final terms equal the newest price in the log
    ///
    /// Whatever the exchange looked like, accepting locks in the price from
    /// the most recent entry that carried one, which may be the opening
    /// proposal if nobody countered with a number.
    #[test]
    fn prop_final_terms_take_newest_price(
        opening_price in price_strategy(),
        opening_notes in notes_strategy(),
        entries in exchange_strategy(),
    ) {
        let negotiation = run_exchange(opening_price, &opening_notes, &entries);

        let newest_price = entries
            .iter()
            .rev()
            .find_map(|(price, _, _)| *price)
            .or(opening_price);

        let terms = negotiation.resolve_final_terms();
        prop_assert_eq!(terms.final_price, newest_price);
        prop_assert_eq!(terms.final_deadline, None);
    }

    /// Property: Notes validation accepts exactly non-blank notes within the cap
    #[test]
    fn prop_notes_validation_is_total(notes in "[a-zA-Z0-9 ]{0,1100}") {
        let proposal = Proposal {
            proposed_price: None,
            proposed_deadline: None,
            notes: notes.clone(),
        };

        let should_pass = !notes.trim().is_empty() && notes.chars().count() <= MAX_NOTES_LEN;
        prop_assert_eq!(proposal.validate().is_ok(), should_pass);
    }

    /// Property: Negotiation records survive a CBOR round trip
    #[test]
    fn prop_negotiation_cbor_roundtrip(
        opening_price in price_strategy(),
        opening_notes in notes_strategy(),
        entries in exchange_strategy(),
    ) {
        let original = run_exchange(opening_price, &opening_notes, &entries);

        let encoded = minicbor::to_vec(&original).unwrap();
        let decoded: Negotiation = minicbor::decode(&encoded).unwrap();

        prop_assert_eq!(original, decoded);
    }
}
