//! Utility functions for id minting
use crate::error::EngagementError;
use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> Result<String, EngagementError> {
    let hrp = bech32::Hrp::parse(hrp)
        .map_err(|e| EngagementError::InvalidInput(format!("invalid id prefix: {e}")))?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())
        .map_err(|e| EngagementError::Codec(e.to_string()))?;
    Ok(encode)
}
