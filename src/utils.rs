//! Identifier helpers

use bech32::Bech32m;
use uuid7::uuid7;

pub const ABSENCE_HRP: &str = "absence_";

// construct a unique id then encode using bech32m, e.g. "absence_1..."
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// uuid7 ids sort by creation time, so the requester index lists oldest first.
pub fn new_absence_id() -> anyhow::Result<String> {
    new_uuid_to_bech32(ABSENCE_HRP)
}
