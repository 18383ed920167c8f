//! Portal command processing
//!
//! Turns one OUT-endpoint frame into at most one 32-byte IN-endpoint frame,
//! reading and writing the [`SlotStore`] as needed. Malformed frames,
//! unknown opcodes and side-LED commands produce no reply.

use crate::slots::SlotStore;
use protocol::{Command, Opcode, ResponseFrame};
use tracing::{debug, trace};

/// Cosmetic portal state kept only for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortalLights {
    pub color: (u8, u8, u8),
    pub side: Option<u8>,
    pub speaker: bool,
}

/// Stateful command dispatcher
#[derive(Debug, Default)]
pub struct CommandProcessor {
    lights: PortalLights,
    commands_handled: u64,
}

impl CommandProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lights(&self) -> PortalLights {
        self.lights
    }

    /// Number of frames that decoded to a known command
    pub fn commands_handled(&self) -> u64 {
        self.commands_handled
    }

    /// Process one request frame
    pub fn process(&mut self, slots: &mut SlotStore, frame: &[u8]) -> Option<ResponseFrame> {
        let Some(command) = Command::parse(frame) else {
            trace!(len = frame.len(), first = ?frame.first(), "Ignoring frame");
            return None;
        };
        self.commands_handled += 1;
        trace!(?command, "Portal command");

        match command {
            Command::Activate => {
                debug!("Portal activated");
                Some(ResponseFrame::activate())
            }
            Command::SetLed { red, green, blue } => {
                self.lights.color = (red, green, blue);
                Some(ResponseFrame::with_payload(
                    Opcode::SetLed,
                    &[red, green, blue],
                ))
            }
            Command::Query => Some(ResponseFrame::empty(Opcode::Query)),
            Command::SideLed { side } => {
                self.lights.side = Some(side);
                None
            }
            Command::Speaker { enable } => {
                self.lights.speaker = enable;
                Some(ResponseFrame::with_payload(
                    Opcode::Speaker,
                    &[enable as u8],
                ))
            }
            Command::ReadBlock { slot, block } => {
                let data = slots.read_block(slot, block)?;
                trace!(slot, block, "Read block");
                Some(ResponseFrame::block(Opcode::Read, slot, block, &data))
            }
            Command::Restart => {
                debug!("Portal restart requested");
                Some(ResponseFrame::restart())
            }
            Command::Sense => Some(sense_frame(slots)),
            Command::V => Some(ResponseFrame::empty(Opcode::V)),
            Command::WriteBlock { slot, block, data } => {
                if !slots.slot(slot).is_some_and(|s| s.is_present()) {
                    return None;
                }
                if slots.write_block(slot, block, &data) {
                    debug!(slot, block, "Wrote block");
                } else {
                    debug!(slot, block, "Write beyond tag size dropped");
                }
                Some(ResponseFrame::block(Opcode::Write, slot, block, &data))
            }
        }
    }
}

/// Sense report for the current slot presence
pub fn sense_frame(slots: &SlotStore) -> ResponseFrame {
    ResponseFrame::sense(slots.presence_mask())
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::RESPONSE_LEN;

    fn present_store(slot: usize, size: usize) -> SlotStore {
        let mut store = SlotStore::new();
        store.set_content(slot, &vec![0u8; size]).unwrap();
        store.mark_present(slot).unwrap();
        store
    }

    #[test]
    fn test_activate() {
        let mut processor = CommandProcessor::new();
        let mut store = SlotStore::new();

        let reply = processor.process(&mut store, &[0x41]).unwrap();
        let mut expected = [0u8; RESPONSE_LEN];
        expected[..4].copy_from_slice(&[0x41, 0x01, 0xFF, 0x77]);
        assert_eq!(reply.as_bytes(), &expected);
    }

    #[test]
    fn test_sense_slot0_present() {
        let mut processor = CommandProcessor::new();
        let mut store = present_store(0, 32);

        let reply = processor.process(&mut store, &[0x53]).unwrap();
        assert_eq!(
            &reply.as_bytes()[..7],
            &[0x53, 0x01, 0x00, 0x00, 0x00, 0x00, 0x01]
        );
        assert!(reply.as_bytes()[7..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_set_led_echo() {
        let mut processor = CommandProcessor::new();
        let mut store = SlotStore::new();

        let reply = processor.process(&mut store, &[0x43, 10, 20, 30]).unwrap();
        assert_eq!(&reply.as_bytes()[..5], &[0x43, 10, 20, 30, 0]);
        assert_eq!(processor.lights().color, (10, 20, 30));
    }

    #[test]
    fn test_write_then_read() {
        let mut processor = CommandProcessor::new();
        let mut store = present_store(0, 32);
        let data: [u8; 16] = std::array::from_fn(|i| 0xA0 + i as u8);

        let mut write = vec![0x57, 0x20, 1];
        write.extend_from_slice(&data);
        let reply = processor.process(&mut store, &write).unwrap();
        assert_eq!(&reply.as_bytes()[..3], &[0x57, 0x10, 1]);
        assert_eq!(&reply.as_bytes()[3..19], &data);

        let reply = processor.process(&mut store, &[0x51, 0x20, 1]).unwrap();
        assert_eq!(&reply.as_bytes()[..3], &[0x51, 0x10, 1]);
        assert_eq!(&reply.as_bytes()[3..19], &data);
    }

    #[test]
    fn test_read_absent_slot_is_silent() {
        let mut processor = CommandProcessor::new();
        let mut store = SlotStore::new();
        assert_eq!(processor.process(&mut store, &[0x51, 0x20, 0]), None);
    }

    #[test]
    fn test_read_beyond_size_is_zero() {
        let mut processor = CommandProcessor::new();
        let mut store = present_store(1, 16);

        let reply = processor.process(&mut store, &[0x51, 0x21, 9]).unwrap();
        assert_eq!(&reply.as_bytes()[..3], &[0x51, 0x11, 9]);
        assert!(reply.as_bytes()[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_beyond_size_still_echoes() {
        let mut processor = CommandProcessor::new();
        let mut store = present_store(0, 16);

        let mut write = vec![0x57, 0x20, 4];
        write.extend_from_slice(&[0x77; 16]);
        let reply = processor.process(&mut store, &write).unwrap();
        assert_eq!(&reply.as_bytes()[3..19], &[0x77; 16]);
        assert!(store.slot(0).unwrap().data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_absent_slot_is_silent() {
        let mut processor = CommandProcessor::new();
        let mut store = present_store(0, 64);

        let mut write = vec![0x57, 0x21, 0];
        write.extend_from_slice(&[0x77; 16]);
        assert_eq!(processor.process(&mut store, &write), None);
    }

    #[test]
    fn test_silent_commands() {
        let mut processor = CommandProcessor::new();
        let mut store = present_store(0, 64);

        assert_eq!(processor.process(&mut store, &[0x4C, 1, 0, 0, 0]), None);
        assert_eq!(processor.lights().side, Some(1));
        assert_eq!(processor.process(&mut store, &[0x00]), None);
        assert_eq!(processor.process(&mut store, &[0x7A, 1, 2]), None);
        assert_eq!(processor.process(&mut store, &[]), None);
        assert_eq!(processor.process(&mut store, &[0x43, 1]), None);
        assert_eq!(processor.commands_handled(), 1);
    }

    #[test]
    fn test_speaker_and_empty_replies() {
        let mut processor = CommandProcessor::new();
        let mut store = SlotStore::new();

        let reply = processor.process(&mut store, &[0x4D, 5]).unwrap();
        assert_eq!(&reply.as_bytes()[..2], &[0x4D, 1]);
        assert!(processor.lights().speaker);
        let reply = processor.process(&mut store, &[0x4D, 0]).unwrap();
        assert_eq!(&reply.as_bytes()[..2], &[0x4D, 0]);

        for opcode in [0x4A, 0x56] {
            let reply = processor.process(&mut store, &[opcode]).unwrap();
            assert_eq!(reply.opcode_byte(), opcode);
            assert!(reply.as_bytes()[1..].iter().all(|&b| b == 0));
        }
    }

    #[test]
    fn test_commands_never_change_presence() {
        let mut processor = CommandProcessor::new();
        let mut store = present_store(0, 64);

        for frame in [&[0x52][..], &[0x41], &[0x53], &[0x51, 0x20, 0]] {
            processor.process(&mut store, frame);
        }
        assert_eq!(store.presence_mask(), 0b01);
    }
}
