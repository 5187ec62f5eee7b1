// Frame header for messages sent over the ring

/// Encoded size of a [`MessageHead`]
pub const MESSAGE_HEAD_LEN: usize = 16;

/// Commands a producer can send to its writer. Wire value 0 is reserved so a
/// zeroed region never decodes as a valid frame.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Close = 1,
    LogMsg = 2,
}

/// Fixed-size frame header: a command, 4 bytes of padding so the length
/// starts at byte 8, and the payload length. Producer and writer live on the
/// same machine, so fields travel in native byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHead {
    pub cmd: Command,
    pub payload_len: usize,
}

impl MessageHead {
    pub fn new(cmd: Command, payload_len: usize) -> Self {
        Self { cmd, payload_len }
    }

    pub fn encode(&self) -> [u8; MESSAGE_HEAD_LEN] {
        let mut buf = [0u8; MESSAGE_HEAD_LEN];
        buf[0..4].copy_from_slice(&(self.cmd as u32).to_ne_bytes());
        buf[8..16].copy_from_slice(&(self.payload_len as u64).to_ne_bytes());
        buf
    }

    /// Returns `None` for the reserved or any unknown command value.
    pub fn decode(buf: &[u8; MESSAGE_HEAD_LEN]) -> Option<Self> {
        let cmd = match u32::from_ne_bytes(buf[0..4].try_into().unwrap()) {
            1 => Command::Close,
            2 => Command::LogMsg,
            _ => return None,
        };
        let payload_len = u64::from_ne_bytes(buf[8..16].try_into().unwrap()) as usize;
        Some(Self { cmd, payload_len })
    }
}

/// Largest payload a ring of `ring_size` bytes can carry in one frame: the
/// ring's usable capacity minus the frame header.
pub fn max_payload(ring_size: usize) -> usize {
    ring_size - 1 - MESSAGE_HEAD_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_roundtrip() {
        for (cmd, len) in [(Command::Close, 0usize), (Command::LogMsg, 5297)] {
            let head = MessageHead::new(cmd, len);
            let decoded = MessageHead::decode(&head.encode()).unwrap();
            assert_eq!(decoded, head);
        }
    }

    #[test]
    fn test_reserved_command_rejected() {
        let buf = [0u8; MESSAGE_HEAD_LEN];
        assert!(MessageHead::decode(&buf).is_none());
    }

    #[test]
    fn test_unknown_command_rejected() {
        let mut buf = MessageHead::new(Command::LogMsg, 1).encode();
        buf[0..4].copy_from_slice(&99u32.to_ne_bytes());
        assert!(MessageHead::decode(&buf).is_none());
    }

    #[test]
    fn test_max_payload() {
        assert_eq!(max_payload(512), 495);
        assert_eq!(max_payload(8192), 8175);
    }
}
