//! Port traits decoupling the control loops from the USB and ANT
//! transports.
//!
//! The loops own their transport exclusively and never share it; the only
//! cross-owned resource is the state record. Implementations live in the
//! service crate (real hardware) and in [`crate::testing`] (scripted
//! doubles).

use std::time::Duration;
use thiserror::Error;

/// Transport-level failures surfaced to the loops.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PortError {
    #[error("device not found")]
    NotFound,

    #[error("transfer timed out")]
    Timeout,

    #[error("port is closed")]
    Closed,

    #[error("transport error: {0}")]
    Io(String),
}

/// Blocking bulk access to the Fortius head unit.
///
/// `open` must be re-invocable after `close`: the controller bounces the
/// port once on a transient I/O error and closes it across pauses.
pub trait TrainerPort: Send {
    fn open(&mut self) -> Result<(), PortError>;
    fn close(&mut self);
    fn is_open(&self) -> bool;

    /// Write one command frame. Blocks up to the transport's fixed timeout.
    fn write(&mut self, frame: &[u8]) -> Result<usize, PortError>;

    /// Read one telemetry transfer into `buf`, returning the actual length.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PortError>;
}

/// ANT message ids echoed back by the dongle's channel-response events.
/// The scheduler's open-sequence state machine advances on these.
pub mod ant_message_id {
    pub const UNASSIGN_CHANNEL: u8 = 0x41;
    pub const ASSIGN_CHANNEL: u8 = 0x42;
    pub const CHANNEL_PERIOD: u8 = 0x43;
    pub const CHANNEL_RF_FREQUENCY: u8 = 0x45;
    pub const NETWORK_KEY: u8 = 0x46;
    pub const RESET_SYSTEM: u8 = 0x4A;
    pub const OPEN_CHANNEL: u8 = 0x4B;
    pub const CLOSE_CHANNEL: u8 = 0x4C;
    pub const BROADCAST_DATA: u8 = 0x4E;
    pub const CHANNEL_RESPONSE: u8 = 0x40;
    pub const CHANNEL_ID: u8 = 0x51;
}

/// Channel type for a transmit (master) channel.
pub const CHANNEL_TYPE_MASTER: u8 = 0x10;

/// Events delivered by the ANT transport's receive thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AntEvent {
    /// The dongle acknowledged (or refused) a control message.
    Response { message_id: u8, ok: bool },
    /// An 8-byte data page arrived on the channel.
    Broadcast { payload: [u8; 8] },
    /// The channel left the open state.
    ChannelClosed,
}

/// Control access to the ANT dongle plus its inbound event stream.
///
/// Control writes are fire-and-forget at this layer; outcomes arrive as
/// [`AntEvent::Response`] events carrying the echoed message id, mirroring
/// the dongle's own protocol.
pub trait AntPort: Send {
    fn set_network_key(&mut self, network: u8, key: &[u8; 8]) -> Result<(), PortError>;
    fn assign_channel(&mut self, channel: u8, channel_type: u8, network: u8)
        -> Result<(), PortError>;
    fn set_channel_id(
        &mut self,
        channel: u8,
        device_number: u16,
        device_type: u8,
        transmission_type: u8,
    ) -> Result<(), PortError>;
    fn set_rf_frequency(&mut self, channel: u8, frequency: u8) -> Result<(), PortError>;
    fn set_channel_period(&mut self, channel: u8, period: u16) -> Result<(), PortError>;
    fn open_channel(&mut self, channel: u8) -> Result<(), PortError>;
    fn close_channel(&mut self, channel: u8) -> Result<(), PortError>;
    fn unassign_channel(&mut self, channel: u8) -> Result<(), PortError>;

    /// Broadcast one 8-byte payload on the channel.
    fn send_broadcast(&mut self, channel: u8, payload: &[u8; 8]) -> Result<(), PortError>;

    /// Drain one pending event without blocking.
    fn try_recv_event(&mut self) -> Option<AntEvent>;

    /// Wait up to `timeout` for the next event.
    fn recv_event_timeout(&mut self, timeout: Duration) -> Option<AntEvent>;
}
