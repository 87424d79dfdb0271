//! Profile-specific clients and servers built on the sessions

pub mod battery;
pub mod ping;
pub mod radio;
pub mod time;

pub use battery::{BatteryClient, BatteryServer};
pub use ping::{PingClient, PingServer};
pub use radio::{RadioClient, RadioServer};
pub use time::{ExactTime, TimeClient, TimeServer};
