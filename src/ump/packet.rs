//! Splitting UMP byte streams into packets.
//!
//! The kernel delivers UMP words in host byte order; a packet is 1 to 4 words, its length given
//! by the message type in the top nibble of the first word.

/// Packet length in 32-bit words for a UMP message type.
pub fn packet_words(message_type: u8) -> usize {
    match message_type & 0x0f {
        0x0 | 0x1 | 0x2 | 0x6 | 0x7 => 1,
        0x3 | 0x4 | 0x8 | 0x9 | 0xa => 2,
        0xb | 0xc => 3,
        _ => 4,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UmpPacket {
    words: [u32; 4],
    len: usize,
}

impl UmpPacket {
    pub fn new(words: &[u32]) -> Option<Self> {
        let first = *words.first()?;
        let len = packet_words((first >> 28) as u8);
        if words.len() < len {
            return None;
        }
        let mut packet = UmpPacket { words: [0; 4], len };
        packet.words[..len].copy_from_slice(&words[..len]);
        Some(packet)
    }

    pub fn words(&self) -> &[u32] {
        &self.words[..self.len]
    }

    pub fn message_type(&self) -> u8 {
        (self.words[0] >> 28) as u8
    }

    pub fn group(&self) -> u8 {
        ((self.words[0] >> 24) & 0x0f) as u8
    }

    /// Status and data bytes of a MIDI 1.0 channel voice packet (message type 2).
    pub fn midi1_bytes(&self) -> Option<([u8; 3], usize)> {
        if self.message_type() != 0x2 {
            return None;
        }
        let w = self.words[0];
        let status = (w >> 16) as u8;
        let bytes = [status, ((w >> 8) & 0x7f) as u8, (w & 0x7f) as u8];
        let len = match status & 0xf0 {
            0xc0 | 0xd0 => 2,
            0x80..=0xe0 => 3,
            _ => return None,
        };
        Some((bytes, len))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.words().iter().flat_map(|w| w.to_ne_bytes().to_vec()).collect()
    }
}

/// Accumulates bytes from successive reads and yields complete packets.
#[derive(Debug, Default)]
pub struct PacketReader {
    pending: Vec<u8>,
    words: Vec<u32>,
}

impl PacketReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        let whole = self.pending.len() / 4 * 4;
        for chunk in self.pending[..whole].chunks(4) {
            let mut word = [0u8; 4];
            word.copy_from_slice(chunk);
            self.words.push(u32::from_ne_bytes(word));
        }
        self.pending.drain(..whole);
    }

    /// Pops the next complete packet, if any.
    pub fn next_packet(&mut self) -> Option<UmpPacket> {
        let packet = UmpPacket::new(&self.words)?;
        self.words.drain(..packet.len);
        Some(packet)
    }
}
