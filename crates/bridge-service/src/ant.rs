//! rusb-backed ANT dongle driver.
//!
//! The dongle speaks the ANT serial framing over bulk endpoints: sync byte
//! `0xA4`, payload length, message id, payload, then an XOR checksum over
//! everything before it. Control messages are fire-and-forget writes; the
//! dongle answers with channel-response messages (id 0x40) that a dedicated
//! reader thread turns into typed [`AntEvent`]s.

use bridge_core::ports::{AntEvent, AntPort, PortError, ant_message_id};
use rusb::{Context, DeviceHandle, UsbContext};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::JoinHandle;
use std::time::Duration;

/// Known ANT+ stick identities (all Dynastream/Garmin).
pub const KNOWN_DONGLES: &[(u16, u16, &str)] = &[
    (0x0FCF, 0x1008, "Garmin USB ANT Stick"),
    (0x0FCF, 0x1009, "Garmin USB2 ANT Stick"),
    (0x0FCF, 0x1004, "Dynastream USB ANT Stick"),
    (0x0FCF, 0x1006, "Dynastream USB ANT Stick 2"),
];

const SYNC_BYTE: u8 = 0xA4;
const ENDPOINT_OUT: u8 = 0x01;
const ENDPOINT_IN: u8 = 0x81;
const INTERFACE: u8 = 0;

/// Channel-response payload: the "message id" slot carries 1 when the
/// response is an RF event rather than a command echo.
const RESPONSE_IS_RF_EVENT: u8 = 1;
const RESPONSE_NO_ERROR: u8 = 0;
const EVENT_CHANNEL_CLOSED: u8 = 0x07;

const WRITE_TIMEOUT: Duration = Duration::from_millis(500);
const READ_TIMEOUT: Duration = Duration::from_millis(100);
/// Settle time after a system reset before the dongle accepts commands.
const RESET_SETTLE: Duration = Duration::from_millis(500);

fn usb_error(err: rusb::Error) -> PortError {
    match err {
        rusb::Error::Timeout => PortError::Timeout,
        rusb::Error::NoDevice | rusb::Error::NotFound => PortError::NotFound,
        other => PortError::Io(other.to_string()),
    }
}

/// Frame one ANT message for the wire.
fn encode_frame(message_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 4);
    frame.push(SYNC_BYTE);
    frame.push(payload.len() as u8);
    frame.push(message_id);
    frame.extend_from_slice(payload);
    let checksum = frame.iter().fold(0u8, |acc, b| acc ^ b);
    frame.push(checksum);
    frame
}

/// Scan a bulk transfer for complete, checksum-valid frames and return
/// `(message_id, payload)` pairs. Garbage between frames is skipped.
fn parse_frames(buf: &[u8]) -> Vec<(u8, Vec<u8>)> {
    let mut frames = Vec::new();
    let mut index = 0;
    while index + 4 <= buf.len() {
        if buf[index] != SYNC_BYTE {
            index += 1;
            continue;
        }
        let payload_len = buf[index + 1] as usize;
        let frame_len = payload_len + 4;
        if index + frame_len > buf.len() {
            break;
        }
        let frame = &buf[index..index + frame_len];
        let checksum = frame[..frame_len - 1].iter().fold(0u8, |acc, b| acc ^ b);
        if checksum != frame[frame_len - 1] {
            tracing::warn!("discarding ANT frame with bad checksum");
            index += 1;
            continue;
        }
        frames.push((frame[2], frame[3..frame_len - 1].to_vec()));
        index += frame_len;
    }
    frames
}

/// Turn one decoded dongle message into an event, if it maps to one.
fn event_for(message_id: u8, payload: &[u8]) -> Option<AntEvent> {
    match message_id {
        ant_message_id::CHANNEL_RESPONSE => {
            if payload.len() < 3 {
                return None;
            }
            let responded_to = payload[1];
            let code = payload[2];
            if responded_to == RESPONSE_IS_RF_EVENT {
                if code == EVENT_CHANNEL_CLOSED {
                    return Some(AntEvent::ChannelClosed);
                }
                // TX-complete and friends carry no information we act on.
                return None;
            }
            Some(AntEvent::Response {
                message_id: responded_to,
                ok: code == RESPONSE_NO_ERROR,
            })
        }
        ant_message_id::BROADCAST_DATA => {
            if payload.len() < 9 {
                return None;
            }
            let mut page = [0u8; 8];
            page.copy_from_slice(&payload[1..9]);
            Some(AntEvent::Broadcast { payload: page })
        }
        _ => None,
    }
}

/// Exclusive access to one ANT+ stick plus its reader thread.
pub struct AntUsbDongle {
    handle: Arc<DeviceHandle<Context>>,
    events: Receiver<AntEvent>,
    reader: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl AntUsbDongle {
    /// Find a dongle, reset it, and start the reader thread.
    pub fn open() -> Result<Self, PortError> {
        let context = Context::new().map_err(usb_error)?;
        let (mut handle, name) = KNOWN_DONGLES
            .iter()
            .find_map(|&(vid, pid, name)| {
                context.open_device_with_vid_pid(vid, pid).map(|h| (h, name))
            })
            .ok_or(PortError::NotFound)?;

        let _ = handle.set_auto_detach_kernel_driver(true);
        handle.claim_interface(INTERFACE).map_err(usb_error)?;
        tracing::info!("ANT dongle opened: {name}");

        let handle = Arc::new(handle);
        write_message(&handle, ant_message_id::RESET_SYSTEM, &[0])?;
        std::thread::sleep(RESET_SETTLE);

        let (tx, events) = channel();
        let stop = Arc::new(AtomicBool::new(false));
        let reader = spawn_reader(Arc::clone(&handle), tx, Arc::clone(&stop))?;

        Ok(Self {
            handle,
            events,
            reader: Some(reader),
            stop,
        })
    }

    fn send(&self, message_id: u8, payload: &[u8]) -> Result<(), PortError> {
        write_message(&self.handle, message_id, payload)
    }
}

fn write_message(
    handle: &DeviceHandle<Context>,
    message_id: u8,
    payload: &[u8],
) -> Result<(), PortError> {
    let frame = encode_frame(message_id, payload);
    handle
        .write_bulk(ENDPOINT_OUT, &frame, WRITE_TIMEOUT)
        .map_err(usb_error)?;
    Ok(())
}

fn spawn_reader(
    handle: Arc<DeviceHandle<Context>>,
    tx: Sender<AntEvent>,
    stop: Arc<AtomicBool>,
) -> Result<JoinHandle<()>, PortError> {
    std::thread::Builder::new()
        .name("ant-reader".into())
        .spawn(move || {
            let mut buf = [0u8; 64];
            while !stop.load(Ordering::Relaxed) {
                match handle.read_bulk(ENDPOINT_IN, &mut buf, READ_TIMEOUT) {
                    Ok(len) => {
                        for (message_id, payload) in parse_frames(&buf[..len]) {
                            if let Some(event) = event_for(message_id, &payload) {
                                if tx.send(event).is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(rusb::Error::Timeout) => {}
                    Err(err) => {
                        tracing::error!("ANT read failed: {err}; reader exiting");
                        let _ = tx.send(AntEvent::ChannelClosed);
                        return;
                    }
                }
            }
        })
        .map_err(|err| PortError::Io(err.to_string()))
}

impl Drop for AntUsbDongle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl AntPort for AntUsbDongle {
    fn set_network_key(&mut self, network: u8, key: &[u8; 8]) -> Result<(), PortError> {
        let mut payload = [0u8; 9];
        payload[0] = network;
        payload[1..9].copy_from_slice(key);
        self.send(ant_message_id::NETWORK_KEY, &payload)
    }

    fn assign_channel(
        &mut self,
        channel: u8,
        channel_type: u8,
        network: u8,
    ) -> Result<(), PortError> {
        self.send(
            ant_message_id::ASSIGN_CHANNEL,
            &[channel, channel_type, network],
        )
    }

    fn set_channel_id(
        &mut self,
        channel: u8,
        device_number: u16,
        device_type: u8,
        transmission_type: u8,
    ) -> Result<(), PortError> {
        let device = device_number.to_le_bytes();
        self.send(
            ant_message_id::CHANNEL_ID,
            &[channel, device[0], device[1], device_type, transmission_type],
        )
    }

    fn set_rf_frequency(&mut self, channel: u8, frequency: u8) -> Result<(), PortError> {
        self.send(ant_message_id::CHANNEL_RF_FREQUENCY, &[channel, frequency])
    }

    fn set_channel_period(&mut self, channel: u8, period: u16) -> Result<(), PortError> {
        let period = period.to_le_bytes();
        self.send(ant_message_id::CHANNEL_PERIOD, &[channel, period[0], period[1]])
    }

    fn open_channel(&mut self, channel: u8) -> Result<(), PortError> {
        self.send(ant_message_id::OPEN_CHANNEL, &[channel])
    }

    fn close_channel(&mut self, channel: u8) -> Result<(), PortError> {
        self.send(ant_message_id::CLOSE_CHANNEL, &[channel])
    }

    fn unassign_channel(&mut self, channel: u8) -> Result<(), PortError> {
        self.send(ant_message_id::UNASSIGN_CHANNEL, &[channel])
    }

    fn send_broadcast(&mut self, channel: u8, payload: &[u8; 8]) -> Result<(), PortError> {
        let mut data = [0u8; 9];
        data[0] = channel;
        data[1..9].copy_from_slice(payload);
        self.send(ant_message_id::BROADCAST_DATA, &data)
    }

    fn try_recv_event(&mut self) -> Option<AntEvent> {
        self.events.try_recv().ok()
    }

    fn recv_event_timeout(&mut self, timeout: Duration) -> Option<AntEvent> {
        self.events.recv_timeout(timeout).ok()
    }
}
