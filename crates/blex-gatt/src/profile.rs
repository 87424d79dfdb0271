//! Service profiles
//!
//! A profile bundles what both ends of a link must agree on: the service
//! layout, the packet framing, timing and advertising parameters, and which
//! characteristics a client subscribes to after discovery.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use blex_core::advertisement::FLAGS_LE_GENERAL_DISCOVERABLE;
use blex_core::types::{short_uuid, CLIENT_CHARACTERISTIC_CONFIG};
use blex_core::{AdvertisementBuilder, CodecKind, GattService};

use crate::advertising::{AdvertiseMode, AdvertiseSettings};
use crate::profiles::{battery, ping, radio, time};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    MagicPing,
    MagicRadio,
    BatteryService,
    TimeService,
}

impl Profile {
    pub fn name(&self) -> &'static str {
        match self {
            Profile::MagicPing => "magic-ping",
            Profile::MagicRadio => "magic-radio",
            Profile::BatteryService => "battery-service",
            Profile::TimeService => "time-service",
        }
    }

    pub fn primary_service(&self) -> Uuid {
        match self {
            Profile::MagicPing => ping::PING_SERVICE,
            Profile::MagicRadio => radio::RADIO_SERVICE,
            Profile::BatteryService => battery::BATTERY_SERVICE,
            Profile::TimeService => time::TIME_SERVICE,
        }
    }

    /// Services a peripheral registers, in registration order.
    pub fn services(&self) -> Vec<GattService> {
        match self {
            Profile::MagicPing => vec![ping::create_service()],
            Profile::MagicRadio => vec![radio::create_service()],
            Profile::BatteryService => battery::create_services(),
            Profile::TimeService => vec![time::create_service()],
        }
    }

    pub fn codec(&self) -> CodecKind {
        match self {
            Profile::MagicPing => CodecKind::Tiny,
            _ => CodecKind::Raw,
        }
    }

    /// Operation timeout override, if the profile needs one.
    pub fn operation_timeout(&self) -> Option<Duration> {
        match self {
            Profile::MagicPing => Some(ping::OPERATION_TIMEOUT),
            _ => None,
        }
    }

    /// ATT MTU a client requests right after discovery.
    pub fn preferred_mtu(&self) -> Option<usize> {
        match self {
            Profile::MagicPing => Some(ping::MTU_REQUEST),
            _ => None,
        }
    }

    /// Characteristics a client subscribes to after discovery.
    pub fn notify_characteristics(&self) -> Vec<Uuid> {
        match self {
            Profile::MagicPing => vec![ping::PING_CHARACTERISTIC],
            Profile::MagicRadio => vec![radio::FM_ONE_CHARACTERISTIC, radio::FM_TWO_CHARACTERISTIC],
            Profile::BatteryService => Vec::new(),
            Profile::TimeService => vec![time::CURRENT_TIME],
        }
    }

    /// Descriptor through which clients register for notifications.
    pub fn client_config_descriptor(&self) -> Option<Uuid> {
        match self {
            Profile::TimeService => Some(CLIENT_CHARACTERISTIC_CONFIG),
            _ => None,
        }
    }

    /// Register every connecting peer for notifications without waiting
    /// for a descriptor write.
    pub fn notify_all_connected(&self) -> bool {
        matches!(self, Profile::MagicRadio)
    }

    pub fn advertise_settings(&self) -> AdvertiseSettings {
        match self {
            Profile::MagicPing => AdvertiseSettings::default().with_mode(AdvertiseMode::LowPower),
            _ => AdvertiseSettings::default(),
        }
    }

    /// Advertising payload: flags, device name and the primary service.
    pub fn advertisement(&self, device_name: &str) -> AdvertisementBuilder {
        let builder = AdvertisementBuilder::new()
            .with_flags(FLAGS_LE_GENERAL_DISCOVERABLE)
            .with_device_name(device_name);
        let service = self.primary_service();
        match short_uuid(&service) {
            Some(short) => builder.with_service_uuid16(short),
            None => builder.with_service_uuid128(service),
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blex_core::decode_advertisement;

    #[test]
    fn test_advertisements_fit_legacy_payload() {
        for profile in [
            Profile::MagicPing,
            Profile::MagicRadio,
            Profile::BatteryService,
            Profile::TimeService,
        ] {
            let bytes = profile.advertisement("blex").build().unwrap();
            let decoded = decode_advertisement(&bytes).unwrap();
            assert_eq!(decoded.device_name.as_deref(), Some("blex"));
            assert_eq!(decoded.flags, Some(FLAGS_LE_GENERAL_DISCOVERABLE));
        }
    }

    #[test]
    fn test_sig_profiles_advertise_short_uuid() {
        let bytes = Profile::BatteryService.advertisement("blex").build().unwrap();
        let decoded = decode_advertisement(&bytes).unwrap();
        assert_eq!(decoded.service_uuids, vec!["180f".to_string()]);
    }

    #[test]
    fn test_profile_framing() {
        assert_eq!(Profile::MagicPing.codec(), CodecKind::Tiny);
        assert_eq!(Profile::MagicRadio.codec(), CodecKind::Raw);
        assert_eq!(Profile::MagicPing.preferred_mtu(), Some(512));
        assert!(Profile::MagicRadio.notify_all_connected());
        assert_eq!(
            Profile::TimeService.client_config_descriptor(),
            Some(CLIENT_CHARACTERISTIC_CONFIG)
        );
    }
}
