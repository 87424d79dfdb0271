//! Current Time Service (SIG 0x1805)
//!
//! The Current Time characteristic carries an Exact Time 256 value:
//!
//! | bytes | field |
//! |---|---|
//! | 0..2 | year, little endian |
//! | 2 | month (1..=12) |
//! | 3 | day (1..=31) |
//! | 4..7 | hours, minutes, seconds |
//! | 7 | day of week, 1 = Monday .. 7 = Sunday |
//! | 8 | fractions of a second in 1/256 units |
//! | 9 | adjust reason bit mask |

use std::sync::Arc;

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, Offset, TimeZone, Timelike};
use tracing::debug;
use uuid::Uuid;

use blex_core::types::CLIENT_CHARACTERISTIC_CONFIG;
use blex_core::{
    sig_uuid, CharacteristicProperties, CharacteristicRef, GattCharacteristic, GattError,
    GattResult, GattService, PeerAddress,
};

use crate::central::{CentralCallback, CentralSession};
use crate::config::GattConfig;
use crate::peripheral::{PeripheralHandler, PeripheralSession};
use crate::profile::Profile;
use crate::transport::{GattServerTransport, GattTransport};

pub const TIME_SERVICE: Uuid = sig_uuid(0x1805);
pub const CURRENT_TIME: Uuid = sig_uuid(0x2A2B);
pub const LOCAL_TIME_INFO: Uuid = sig_uuid(0x2A0F);

pub const ADJUST_NONE: u8 = 0x00;
pub const ADJUST_MANUAL: u8 = 0x01;
pub const ADJUST_EXTERNAL_REFERENCE: u8 = 0x02;
pub const ADJUST_TIMEZONE: u8 = 0x04;
pub const ADJUST_DST: u8 = 0x08;

/// DST offset value meaning "not known".
pub const DST_OFFSET_UNKNOWN: u8 = 0xFF;

pub fn create_service() -> GattService {
    let current_time = GattCharacteristic::new(
        CURRENT_TIME,
        CharacteristicProperties::READ.union(CharacteristicProperties::NOTIFY),
    )
    .with_descriptor(CLIENT_CHARACTERISTIC_CONFIG);
    let local_time = GattCharacteristic::new(LOCAL_TIME_INFO, CharacteristicProperties::READ);

    GattService::new(TIME_SERVICE, 0)
        .with_characteristic(current_time)
        .with_characteristic(local_time)
}

// ----------------------------------------------------------------------------
// Exact Time 256
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExactTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub day_of_week: u8,
    pub fractions256: u8,
    pub adjust_reason: u8,
}

impl ExactTime {
    pub const LEN: usize = 10;

    pub fn from_datetime<Tz: TimeZone>(time: &DateTime<Tz>, adjust_reason: u8) -> Self {
        let millis = (time.nanosecond() / 1_000_000) % 1000;
        Self {
            year: time.year() as u16,
            month: time.month() as u8,
            day: time.day() as u8,
            hours: time.hour() as u8,
            minutes: time.minute() as u8,
            seconds: time.second() as u8,
            day_of_week: time.weekday().number_from_monday() as u8,
            fractions256: (millis * 256 / 1000) as u8,
            adjust_reason,
        }
    }

    pub fn now(adjust_reason: u8) -> Self {
        Self::from_datetime(&Local::now(), adjust_reason)
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let year = self.year.to_le_bytes();
        [
            year[0],
            year[1],
            self.month,
            self.day,
            self.hours,
            self.minutes,
            self.seconds,
            self.day_of_week,
            self.fractions256,
            self.adjust_reason,
        ]
    }

    /// Parse the first ten bytes; `None` if the value is shorter.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: &[u8; Self::LEN] = bytes.get(..Self::LEN)?.try_into().ok()?;
        Some(Self {
            year: u16::from_le_bytes([bytes[0], bytes[1]]),
            month: bytes[2],
            day: bytes[3],
            hours: bytes[4],
            minutes: bytes[5],
            seconds: bytes[6],
            day_of_week: bytes[7],
            fractions256: bytes[8],
            adjust_reason: bytes[9],
        })
    }

    /// Calendar value, if the fields form a valid date and time.
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        let millis = u32::from(self.fractions256) * 1000 / 256;
        NaiveDate::from_ymd_opt(i32::from(self.year), u32::from(self.month), u32::from(self.day))?
            .and_hms_milli_opt(
                u32::from(self.hours),
                u32::from(self.minutes),
                u32::from(self.seconds),
                millis,
            )
    }
}

/// Local Time Information: time zone in 15 minute steps and DST offset.
pub fn local_time_info<Tz: TimeZone>(time: &DateTime<Tz>) -> [u8; 2] {
    let offset_seconds = time.offset().fix().local_minus_utc();
    let quarters = (offset_seconds / 900) as i8;
    [quarters as u8, DST_OFFSET_UNKNOWN]
}

// ----------------------------------------------------------------------------
// Client
// ----------------------------------------------------------------------------

pub struct TimeClient {
    session: CentralSession,
}

impl TimeClient {
    pub fn new(transport: Arc<dyn GattTransport>, callback: Arc<dyn CentralCallback>) -> Self {
        Self::with_config(GattConfig::for_profile(Profile::TimeService), transport, callback)
    }

    pub fn with_config(
        config: GattConfig,
        transport: Arc<dyn GattTransport>,
        callback: Arc<dyn CentralCallback>,
    ) -> Self {
        Self {
            session: CentralSession::new(Profile::TimeService, config, transport, callback),
        }
    }

    pub fn session(&self) -> &CentralSession {
        &self.session
    }

    pub async fn read_current_time(&self) -> GattResult<ExactTime> {
        let value = self.session.read(TIME_SERVICE, CURRENT_TIME).await?;
        ExactTime::from_bytes(&value).ok_or(GattError::EmptyReadResponse {
            characteristic: CURRENT_TIME,
        })
    }
}

// ----------------------------------------------------------------------------
// Server
// ----------------------------------------------------------------------------

/// Serves the local clock.
#[derive(Debug, Default)]
pub struct TimeServer;

impl TimeServer {
    pub fn session(config: GattConfig, transport: Arc<dyn GattServerTransport>) -> PeripheralSession {
        PeripheralSession::new(Profile::TimeService, config, transport, Arc::new(TimeServer))
    }

    /// Push the current time to every subscriber.
    pub async fn notify_time_change(session: &PeripheralSession, adjust_reason: u8) -> GattResult<usize> {
        let time = ExactTime::now(adjust_reason);
        debug!("Notify time change {:?}", time);
        session
            .notify_registered(TIME_SERVICE, CURRENT_TIME, time.to_bytes().to_vec())
            .await
    }
}

impl PeripheralHandler for TimeServer {
    fn on_read_request(
        &self,
        _peer: &PeerAddress,
        characteristic: &CharacteristicRef,
    ) -> Option<Vec<u8>> {
        match characteristic.characteristic {
            CURRENT_TIME => Some(ExactTime::now(ADJUST_NONE).to_bytes().to_vec()),
            LOCAL_TIME_INFO => Some(local_time_info(&Local::now()).to_vec()),
            _ => None,
        }
    }

    fn on_subscription_changed(&self, peer: &PeerAddress, subscribed: bool) {
        debug!("Time notifications for {}: {}", peer, subscribed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    #[test]
    fn test_exact_time_layout() {
        let time = Utc.with_ymd_and_hms(2024, 3, 17, 13, 45, 30).unwrap()
            + chrono::Duration::milliseconds(500);
        let exact = ExactTime::from_datetime(&time, ADJUST_MANUAL);

        // 2024 = 0x07E8; 17 March 2024 was a Sunday.
        assert_eq!(
            exact.to_bytes(),
            [0xE8, 0x07, 3, 17, 13, 45, 30, 7, 128, ADJUST_MANUAL]
        );
        assert_eq!(ExactTime::from_bytes(&exact.to_bytes()), Some(exact));
        assert_eq!(exact.to_naive(), Some(time.naive_utc()));
    }

    #[test]
    fn test_short_value_rejected() {
        assert_eq!(ExactTime::from_bytes(&[0xE8, 0x07, 3]), None);
    }

    #[test]
    fn test_local_time_info() {
        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let time = offset.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(local_time_info(&time), [8, DST_OFFSET_UNKNOWN]);

        let offset = FixedOffset::west_opt(5 * 3600 + 1800).unwrap();
        let time = offset.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(local_time_info(&time), [(-22i8) as u8, DST_OFFSET_UNKNOWN]);
    }

    #[test]
    fn test_service_has_client_config() {
        let service = create_service();
        assert!(service
            .characteristic(&CURRENT_TIME)
            .unwrap()
            .has_descriptor(&CLIENT_CHARACTERISTIC_CONFIG));
    }
}
