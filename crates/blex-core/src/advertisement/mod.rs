//! Advertising payload codec
//!
//! Legacy advertising data is a sequence of `[length][type][value]` records.
//! The parser is total over arbitrary input: it stops at the first truncated
//! record and only fails on records whose body cannot be interpreted.

mod builder;
mod company;
mod parser;

pub use builder::AdvertisementBuilder;
pub use company::company_name;
pub use parser::{decode_advertisement, AdvertisementPayload};

// ----------------------------------------------------------------------------
// AD Types
// ----------------------------------------------------------------------------

pub const AD_TYPE_FLAGS: u8 = 0x01;
pub const AD_TYPE_SERVICE_UUIDS_16_COMPLETE: u8 = 0x03;
pub const AD_TYPE_SERVICE_UUIDS_128_COMPLETE: u8 = 0x07;
pub const AD_TYPE_LOCAL_NAME_SHORT: u8 = 0x08;
pub const AD_TYPE_LOCAL_NAME_COMPLETE: u8 = 0x09;
pub const AD_TYPE_TX_POWER_LEVEL: u8 = 0x0A;
pub const AD_TYPE_SERVICE_DATA_16: u8 = 0x16;
pub const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// Maximum size of a legacy advertising payload.
pub const LEGACY_ADVERTISEMENT_MAX_LEN: usize = 31;

/// LE General Discoverable Mode, BR/EDR not supported.
pub const FLAGS_LE_GENERAL_DISCOVERABLE: u8 = 0x06;

/// Lowercase hex form of a 16-bit UUID, as used for map keys.
pub(crate) fn format_uuid16(uuid: u16) -> String {
    format!("{:04x}", uuid)
}
