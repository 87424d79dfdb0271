use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{
    format_uuid16, AD_TYPE_FLAGS, AD_TYPE_LOCAL_NAME_COMPLETE, AD_TYPE_LOCAL_NAME_SHORT,
    AD_TYPE_MANUFACTURER_DATA, AD_TYPE_SERVICE_DATA_16, AD_TYPE_SERVICE_UUIDS_16_COMPLETE,
    AD_TYPE_TX_POWER_LEVEL,
};
use crate::errors::AdvertisementError;

/// Structured view of an advertising payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisementPayload {
    /// Bytes consumed by complete records before the terminator.
    pub payload_size: usize,
    pub flags: Option<u8>,
    /// 16-bit service UUIDs as lowercase big-endian hex, in record order.
    pub service_uuids: Vec<String>,
    pub local_name_short: Option<String>,
    pub device_name: Option<String>,
    pub tx_power_level: Option<i8>,
    /// Service data keyed by 16-bit UUID hex.
    pub service_data: BTreeMap<String, String>,
    /// Manufacturer data keyed by company identifier.
    pub manufacturer_data: BTreeMap<u16, String>,
}

/// Decode a raw advertising payload.
///
/// Parsing stops at the first zero-length record, at the end of the buffer,
/// or at a record whose declared length runs past the buffer. Unknown record
/// types are skipped. Fixed-size records with the wrong length fail with
/// [`AdvertisementError::MalformedRecord`].
pub fn decode_advertisement(data: &[u8]) -> Result<AdvertisementPayload, AdvertisementError> {
    let mut payload = AdvertisementPayload::default();
    let mut index = 0;

    while index < data.len() {
        let len = data[index] as usize;
        if len == 0 {
            break;
        }

        let end = index + 1 + len;
        if end > data.len() {
            trace!(
                "AD record at offset {} declares {} bytes, only {} left",
                index,
                len,
                data.len() - index - 1
            );
            break;
        }

        let record_type = data[index + 1];
        apply_record(&mut payload, record_type, &data[index + 2..end])?;

        index = end;
        payload.payload_size = index;
    }

    Ok(payload)
}

fn apply_record(
    payload: &mut AdvertisementPayload,
    record_type: u8,
    body: &[u8],
) -> Result<(), AdvertisementError> {
    match record_type {
        AD_TYPE_FLAGS => {
            expect_exact(record_type, body, "flags")?;
            payload.flags = Some(body[0]);
        }
        AD_TYPE_SERVICE_UUIDS_16_COMPLETE => {
            if !body.is_empty() {
                let reversed: Vec<u8> = body.iter().rev().copied().collect();
                payload.service_uuids.push(hex::encode(reversed));
            }
        }
        AD_TYPE_LOCAL_NAME_SHORT => {
            payload.local_name_short = Some(String::from_utf8_lossy(body).into_owned());
        }
        AD_TYPE_LOCAL_NAME_COMPLETE => {
            payload.device_name = Some(String::from_utf8_lossy(body).into_owned());
        }
        AD_TYPE_TX_POWER_LEVEL => {
            expect_exact(record_type, body, "TX power level")?;
            payload.tx_power_level = Some(body[0] as i8);
        }
        AD_TYPE_SERVICE_DATA_16 => {
            expect_longer_than_uuid(record_type, body, "service data")?;
            let uuid = u16::from_le_bytes([body[0], body[1]]);
            payload
                .service_data
                .insert(format_uuid16(uuid), hex::encode(&body[2..]));
        }
        AD_TYPE_MANUFACTURER_DATA => {
            expect_longer_than_uuid(record_type, body, "manufacturer data")?;
            let company = u16::from_le_bytes([body[0], body[1]]);
            payload
                .manufacturer_data
                .insert(company, hex::encode(&body[2..]));
        }
        other => {
            trace!("Skipping AD record type 0x{:02x} ({} bytes)", other, body.len());
        }
    }
    Ok(())
}

fn expect_exact(record_type: u8, body: &[u8], what: &str) -> Result<(), AdvertisementError> {
    if body.len() != 1 {
        return Err(AdvertisementError::MalformedRecord {
            record_type,
            reason: format!("{} record must be 1 byte, got {}", what, body.len()),
        });
    }
    Ok(())
}

fn expect_longer_than_uuid(
    record_type: u8,
    body: &[u8],
    what: &str,
) -> Result<(), AdvertisementError> {
    if body.len() <= 2 {
        return Err(AdvertisementError::MalformedRecord {
            record_type,
            reason: format!("{} record must exceed 2 bytes, got {}", what, body.len()),
        });
    }
    Ok(())
}
