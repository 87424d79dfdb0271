use uuid::Uuid;

use super::{
    AD_TYPE_FLAGS, AD_TYPE_LOCAL_NAME_COMPLETE, AD_TYPE_LOCAL_NAME_SHORT,
    AD_TYPE_MANUFACTURER_DATA, AD_TYPE_SERVICE_DATA_16, AD_TYPE_SERVICE_UUIDS_128_COMPLETE,
    AD_TYPE_SERVICE_UUIDS_16_COMPLETE, AD_TYPE_TX_POWER_LEVEL, LEGACY_ADVERTISEMENT_MAX_LEN,
};
use crate::errors::AdvertisementError;

/// Assembles an advertising payload record by record.
///
/// Records are emitted in insertion order. Multi-byte identifiers are written
/// little-endian, the way they appear on air.
#[derive(Debug, Clone)]
pub struct AdvertisementBuilder {
    records: Vec<(u8, Vec<u8>)>,
    max_len: usize,
}

impl Default for AdvertisementBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AdvertisementBuilder {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            max_len: LEGACY_ADVERTISEMENT_MAX_LEN,
        }
    }

    /// Override the payload limit (extended advertising allows more).
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    pub fn with_flags(self, flags: u8) -> Self {
        self.record(AD_TYPE_FLAGS, vec![flags])
    }

    pub fn with_service_uuid16(self, uuid: u16) -> Self {
        self.record(AD_TYPE_SERVICE_UUIDS_16_COMPLETE, uuid.to_le_bytes().to_vec())
    }

    pub fn with_service_uuid128(self, uuid: Uuid) -> Self {
        self.record(
            AD_TYPE_SERVICE_UUIDS_128_COMPLETE,
            uuid.as_u128().to_le_bytes().to_vec(),
        )
    }

    pub fn with_local_name_short(self, name: &str) -> Self {
        self.record(AD_TYPE_LOCAL_NAME_SHORT, name.as_bytes().to_vec())
    }

    pub fn with_device_name(self, name: &str) -> Self {
        self.record(AD_TYPE_LOCAL_NAME_COMPLETE, name.as_bytes().to_vec())
    }

    pub fn with_tx_power_level(self, level: i8) -> Self {
        self.record(AD_TYPE_TX_POWER_LEVEL, vec![level as u8])
    }

    pub fn with_service_data(self, uuid: u16, data: &[u8]) -> Self {
        let mut body = uuid.to_le_bytes().to_vec();
        body.extend_from_slice(data);
        self.record(AD_TYPE_SERVICE_DATA_16, body)
    }

    pub fn with_manufacturer_data(self, company_id: u16, data: &[u8]) -> Self {
        let mut body = company_id.to_le_bytes().to_vec();
        body.extend_from_slice(data);
        self.record(AD_TYPE_MANUFACTURER_DATA, body)
    }

    fn record(mut self, record_type: u8, body: Vec<u8>) -> Self {
        self.records.push((record_type, body));
        self
    }

    /// Encoded size of the records added so far.
    pub fn encoded_len(&self) -> usize {
        self.records.iter().map(|(_, body)| body.len() + 2).sum()
    }

    pub fn build(&self) -> Result<Vec<u8>, AdvertisementError> {
        let size = self.encoded_len();
        if size > self.max_len {
            return Err(AdvertisementError::PayloadTooLarge {
                size,
                max_size: self.max_len,
            });
        }

        let mut out = Vec::with_capacity(size);
        for (record_type, body) in &self.records {
            // The length byte covers the type byte plus the body.
            if body.len() > u8::MAX as usize - 1 {
                return Err(AdvertisementError::RecordTooLong {
                    record_type: *record_type,
                    size: body.len(),
                });
            }
            out.push(body.len() as u8 + 1);
            out.push(*record_type);
            out.extend_from_slice(body);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertisement::decode_advertisement;

    #[test]
    fn test_build_matches_wire_layout() {
        let bytes = AdvertisementBuilder::new()
            .with_flags(0x02)
            .with_tx_power_level(-21)
            .with_service_data(0xFE2C, &[0x01, 0x30, 0x00])
            .build()
            .unwrap();
        assert_eq!(hex::encode(bytes), "020102020aeb06162cfe013000");
    }

    #[test]
    fn test_build_then_decode() {
        let bytes = AdvertisementBuilder::new()
            .with_flags(0x06)
            .with_service_uuid16(0x180F)
            .with_device_name("blex")
            .with_manufacturer_data(0x0079, &[0x1F, 0x2E])
            .build()
            .unwrap();

        let data = decode_advertisement(&bytes).unwrap();
        assert_eq!(data.payload_size, bytes.len());
        assert_eq!(data.flags, Some(0x06));
        assert_eq!(data.service_uuids, vec!["180f".to_string()]);
        assert_eq!(data.device_name.as_deref(), Some("blex"));
        assert_eq!(data.manufacturer_data[&0x0079], "1f2e");
    }

    #[test]
    fn test_128_bit_uuid_is_skipped_by_decoder() {
        let uuid = Uuid::from_u128(0x0000a001_0000_4080_973d_fe81d6397f29);
        let bytes = AdvertisementBuilder::new()
            .with_service_uuid128(uuid)
            .build()
            .unwrap();
        assert_eq!(bytes.len(), 18);
        assert_eq!(bytes[..2], [0x11, 0x07]);
        assert_eq!(bytes[2], 0x29);

        let data = decode_advertisement(&bytes).unwrap();
        assert_eq!(data.payload_size, 18);
        assert!(data.service_uuids.is_empty());
    }

    #[test]
    fn test_payload_limit() {
        let builder = AdvertisementBuilder::new().with_device_name(&"x".repeat(30));
        assert_eq!(
            builder.build(),
            Err(AdvertisementError::PayloadTooLarge {
                size: 32,
                max_size: 31
            })
        );
        assert!(builder.with_max_len(255).build().is_ok());
    }
}
