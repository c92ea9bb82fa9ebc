//! Scripted transport doubles for exercising the control loops without
//! hardware.
//!
//! [`ScriptedTrainerPort`] replays a queue of telemetry reads and records
//! every write; [`MockAntPort`] records every dongle command and can
//! acknowledge the channel-open sequence automatically, refuse it, or relay
//! events injected by a test.

use crate::ports::{AntEvent, AntPort, PortError, TrainerPort, ant_message_id};
use std::collections::VecDeque;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Everything a scripted trainer port observed.
#[derive(Debug, Default)]
pub struct TrainerPortLog {
    pub writes: Vec<Vec<u8>>,
    pub opens: u32,
    pub closes: u32,
}

/// Trainer port double: reads come from a script, writes go to a log.
pub struct ScriptedTrainerPort {
    log: Arc<Mutex<TrainerPortLog>>,
    reads: VecDeque<Result<Vec<u8>, PortError>>,
    write_results: VecDeque<Result<(), PortError>>,
    open_results: VecDeque<Result<(), PortError>>,
    open: bool,
}

impl ScriptedTrainerPort {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(TrainerPortLog::default())),
            reads: VecDeque::new(),
            write_results: VecDeque::new(),
            open_results: VecDeque::new(),
            open: false,
        }
    }

    /// Handle for inspecting interactions after the port moves into a loop.
    pub fn log_handle(&self) -> Arc<Mutex<TrainerPortLog>> {
        Arc::clone(&self.log)
    }

    /// Queue one successful read.
    pub fn push_read(&mut self, frame: Vec<u8>) {
        self.reads.push_back(Ok(frame));
    }

    /// Queue one failing read.
    pub fn push_read_error(&mut self, error: PortError) {
        self.reads.push_back(Err(error));
    }

    /// Script the outcome of the next write; unscripted writes succeed.
    pub fn script_write(&mut self, result: Result<(), PortError>) {
        self.write_results.push_back(result);
    }

    /// Script the outcome of the next open; unscripted opens succeed.
    pub fn script_open(&mut self, result: Result<(), PortError>) {
        self.open_results.push_back(result);
    }
}

impl Default for ScriptedTrainerPort {
    fn default() -> Self {
        Self::new()
    }
}

impl TrainerPort for ScriptedTrainerPort {
    fn open(&mut self) -> Result<(), PortError> {
        if let Some(guard) = self.log.lock().ok().as_mut() {
            guard.opens += 1;
        }
        if let Some(result) = self.open_results.pop_front() {
            result?;
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        if let Some(guard) = self.log.lock().ok().as_mut() {
            guard.closes += 1;
        }
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write(&mut self, frame: &[u8]) -> Result<usize, PortError> {
        if !self.open {
            return Err(PortError::Closed);
        }
        if let Some(result) = self.write_results.pop_front() {
            result?;
        }
        if let Some(guard) = self.log.lock().ok().as_mut() {
            guard.writes.push(frame.to_vec());
        }
        Ok(frame.len())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, PortError> {
        if !self.open {
            return Err(PortError::Closed);
        }
        match self.reads.pop_front() {
            Some(Ok(frame)) => {
                let len = frame.len().min(buf.len());
                buf[..len].copy_from_slice(&frame[..len]);
                Ok(len)
            }
            Some(Err(error)) => Err(error),
            None => Err(PortError::Timeout),
        }
    }
}

/// Build a 48-byte full telemetry frame for scripting reads.
pub fn full_telemetry_frame(
    heart_rate: u8,
    buttons: u8,
    steering: i16,
    double_revolutions: u32,
    raw_speed: u16,
    raw_power: i16,
    cadence: u8,
    pedal_sensor: u8,
) -> Vec<u8> {
    let mut buf = vec![0u8; 48];
    buf[12] = heart_rate;
    buf[13] = buttons;
    buf[18..20].copy_from_slice(&steering.to_le_bytes());
    buf[28..32].copy_from_slice(&double_revolutions.to_le_bytes());
    buf[32..34].copy_from_slice(&raw_speed.to_le_bytes());
    buf[38..40].copy_from_slice(&raw_power.to_le_bytes());
    buf[44] = cadence;
    buf[46] = pedal_sensor;
    buf
}

/// Build a 24-byte head-unit-only frame for scripting reads.
pub fn controller_frame(buttons: u8, steering: i16) -> Vec<u8> {
    let mut buf = vec![0u8; 24];
    buf[13] = buttons;
    buf[18..20].copy_from_slice(&steering.to_le_bytes());
    buf
}

/// A dongle command observed by [`MockAntPort`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AntCommand {
    SetNetworkKey {
        network: u8,
        key: [u8; 8],
    },
    AssignChannel {
        channel: u8,
        channel_type: u8,
        network: u8,
    },
    SetChannelId {
        channel: u8,
        device_number: u16,
        device_type: u8,
        transmission_type: u8,
    },
    SetRfFrequency {
        channel: u8,
        frequency: u8,
    },
    SetChannelPeriod {
        channel: u8,
        period: u16,
    },
    OpenChannel(u8),
    CloseChannel(u8),
    UnassignChannel(u8),
    Broadcast {
        channel: u8,
        payload: [u8; 8],
    },
}

/// ANT port double.
pub struct MockAntPort {
    commands: Arc<Mutex<Vec<AntCommand>>>,
    queue: VecDeque<AntEvent>,
    external: Option<Receiver<AntEvent>>,
    ack: Option<bool>,
}

impl MockAntPort {
    /// Acknowledge every control command successfully.
    pub fn auto_ack() -> Self {
        Self {
            commands: Arc::new(Mutex::new(Vec::new())),
            queue: VecDeque::new(),
            external: None,
            ack: Some(true),
        }
    }

    /// Refuse every control command (channel-response error).
    pub fn refusing() -> Self {
        Self {
            ack: Some(false),
            ..Self::auto_ack()
        }
    }

    /// Auto-acking port plus a sender tests use to inject broadcasts.
    pub fn with_injector() -> (Self, Sender<AntEvent>) {
        let (tx, rx) = channel();
        let port = Self {
            external: Some(rx),
            ..Self::auto_ack()
        };
        (port, tx)
    }

    /// Handle for inspecting recorded commands.
    pub fn commands_handle(&self) -> Arc<Mutex<Vec<AntCommand>>> {
        Arc::clone(&self.commands)
    }

    /// Push an event directly into the internal queue.
    pub fn push_event(&mut self, event: AntEvent) {
        self.queue.push_back(event);
    }

    /// Broadcast payloads sent so far.
    pub fn sent_pages(&self) -> Vec<[u8; 8]> {
        match self.commands.lock() {
            Ok(commands) => commands
                .iter()
                .filter_map(|command| match command {
                    AntCommand::Broadcast { payload, .. } => Some(*payload),
                    _ => None,
                })
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    fn record(&mut self, command: AntCommand, response_id: u8) -> Result<(), PortError> {
        if let Some(guard) = self.commands.lock().ok().as_mut() {
            guard.push(command);
        }
        if let Some(ok) = self.ack {
            self.queue.push_back(AntEvent::Response {
                message_id: response_id,
                ok,
            });
        }
        Ok(())
    }
}

impl AntPort for MockAntPort {
    fn set_network_key(&mut self, network: u8, key: &[u8; 8]) -> Result<(), PortError> {
        self.record(
            AntCommand::SetNetworkKey { network, key: *key },
            ant_message_id::NETWORK_KEY,
        )
    }

    fn assign_channel(
        &mut self,
        channel: u8,
        channel_type: u8,
        network: u8,
    ) -> Result<(), PortError> {
        self.record(
            AntCommand::AssignChannel {
                channel,
                channel_type,
                network,
            },
            ant_message_id::ASSIGN_CHANNEL,
        )
    }

    fn set_channel_id(
        &mut self,
        channel: u8,
        device_number: u16,
        device_type: u8,
        transmission_type: u8,
    ) -> Result<(), PortError> {
        self.record(
            AntCommand::SetChannelId {
                channel,
                device_number,
                device_type,
                transmission_type,
            },
            ant_message_id::CHANNEL_ID,
        )
    }

    fn set_rf_frequency(&mut self, channel: u8, frequency: u8) -> Result<(), PortError> {
        self.record(
            AntCommand::SetRfFrequency { channel, frequency },
            ant_message_id::CHANNEL_RF_FREQUENCY,
        )
    }

    fn set_channel_period(&mut self, channel: u8, period: u16) -> Result<(), PortError> {
        self.record(
            AntCommand::SetChannelPeriod { channel, period },
            ant_message_id::CHANNEL_PERIOD,
        )
    }

    fn open_channel(&mut self, channel: u8) -> Result<(), PortError> {
        self.record(AntCommand::OpenChannel(channel), ant_message_id::OPEN_CHANNEL)
    }

    fn close_channel(&mut self, channel: u8) -> Result<(), PortError> {
        self.record(
            AntCommand::CloseChannel(channel),
            ant_message_id::CLOSE_CHANNEL,
        )
    }

    fn unassign_channel(&mut self, channel: u8) -> Result<(), PortError> {
        self.record(
            AntCommand::UnassignChannel(channel),
            ant_message_id::UNASSIGN_CHANNEL,
        )
    }

    fn send_broadcast(&mut self, channel: u8, payload: &[u8; 8]) -> Result<(), PortError> {
        if let Some(guard) = self.commands.lock().ok().as_mut() {
            guard.push(AntCommand::Broadcast {
                channel,
                payload: *payload,
            });
        }
        Ok(())
    }

    fn try_recv_event(&mut self) -> Option<AntEvent> {
        if let Some(event) = self.queue.pop_front() {
            return Some(event);
        }
        self.external.as_ref().and_then(|rx| rx.try_recv().ok())
    }

    fn recv_event_timeout(&mut self, timeout: Duration) -> Option<AntEvent> {
        if let Some(event) = self.queue.pop_front() {
            return Some(event);
        }
        self.external.as_ref().and_then(|rx| rx.recv_timeout(timeout).ok())
    }
}
