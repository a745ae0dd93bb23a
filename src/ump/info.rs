/// Max number of UMP groups.
pub const MAX_GROUPS: u32 = 16;
/// Max number of UMP blocks.
pub const MAX_BLOCKS: u32 = 32;

pub const PROTO_MIDI_MASK: u32 = 0x0300;
pub const PROTO_MIDI1: u32 = 0x0100;
pub const PROTO_MIDI2: u32 = 0x0200;
/// Jitter-reduction timestamp bits.
pub const PROTO_JRTS_MASK: u32 = 0x0003;
pub const PROTO_JRTS_TX: u32 = 0x0001;
pub const PROTO_JRTS_RX: u32 = 0x0002;

/// MIDI 1.0 port without restriction.
pub const BLOCK_IS_MIDI1: u32 = 1 << 0;
/// 31.25Kbps MIDI 1.0 port.
pub const BLOCK_IS_LOWSPEED: u32 = 1 << 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum UmpDirection {
    Input = 0x01,
    Output = 0x02,
    Bidirection = 0x03,
}

impl UmpDirection {
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0x01 => Some(UmpDirection::Input),
            0x02 => Some(UmpDirection::Output),
            0x03 => Some(UmpDirection::Bidirection),
            _ => None,
        }
    }
}

/// Endpoint description filled by a single query on a UMP handle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UmpEndpointInfo {
    pub(crate) card: i32,
    pub(crate) device: i32,
    pub(crate) flags: u32,
    pub(crate) protocol_caps: u32,
    pub(crate) protocol: u32,
    pub(crate) num_blocks: u32,
    pub(crate) version: u32,
    pub(crate) name: String,
    pub(crate) product_id: String,
}

impl UmpEndpointInfo {
    pub fn new(card: i32, device: i32, name: impl Into<String>) -> Self {
        UmpEndpointInfo {
            card,
            device,
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_protocol(mut self, protocol_caps: u32, protocol: u32) -> Self {
        self.protocol_caps = protocol_caps;
        self.protocol = protocol;
        self
    }

    pub fn with_num_blocks(mut self, num_blocks: u32) -> Self {
        self.num_blocks = num_blocks.min(MAX_BLOCKS);
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_product_id(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = product_id.into();
        self
    }

    pub fn card(&self) -> i32 {
        self.card
    }

    pub fn device(&self) -> i32 {
        self.device
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn protocol_caps(&self) -> u32 {
        self.protocol_caps
    }

    /// The protocol currently in use; see the `PROTO_*` bits.
    pub fn protocol(&self) -> u32 {
        self.protocol
    }

    pub fn num_blocks(&self) -> u32 {
        self.num_blocks
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn product_id(&self) -> &str {
        &self.product_id
    }
}

/// Function block description. Set the block id before querying.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UmpBlockInfo {
    pub(crate) card: i32,
    pub(crate) device: i32,
    pub(crate) block_id: u32,
    pub(crate) active: bool,
    pub(crate) flags: u32,
    pub(crate) direction: u32,
    pub(crate) first_group: u32,
    pub(crate) num_groups: u32,
    pub(crate) name: String,
}

impl UmpBlockInfo {
    pub fn new(block_id: u32, name: impl Into<String>) -> Self {
        UmpBlockInfo {
            block_id,
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_groups(mut self, first_group: u32, num_groups: u32) -> Self {
        self.first_group = first_group.min(MAX_GROUPS - 1);
        self.num_groups = num_groups.min(MAX_GROUPS - self.first_group);
        self
    }

    pub fn with_direction(mut self, direction: UmpDirection) -> Self {
        self.direction = direction as u32;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn card(&self) -> i32 {
        self.card
    }

    pub fn device(&self) -> i32 {
        self.device
    }

    pub fn block_id(&self) -> u32 {
        self.block_id
    }

    pub fn set_block_id(&mut self, id: u32) {
        self.block_id = id;
    }

    /// 1 if the block is active, 0 otherwise.
    pub fn active(&self) -> u32 {
        self.active as u32
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn direction(&self) -> u32 {
        self.direction
    }

    pub fn first_group(&self) -> u32 {
        self.first_group
    }

    pub fn num_groups(&self) -> u32 {
        self.num_groups
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Copy the fields a device reports into `self`, keeping the queried block id.
    pub(crate) fn fill_from(&mut self, card: i32, device: i32, other: &UmpBlockInfo) {
        *self = UmpBlockInfo {
            card,
            device,
            block_id: self.block_id,
            ..other.clone()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_groups_are_clamped() {
        let block = UmpBlockInfo::new(0, "Main").with_groups(14, 8);
        assert_eq!(block.first_group(), 14);
        assert_eq!(block.num_groups(), 2);
    }

    #[test]
    fn test_fill_keeps_block_id() {
        let reported = UmpBlockInfo::new(7, "Synth")
            .with_direction(UmpDirection::Output)
            .with_active(true);
        let mut query = UmpBlockInfo::default();
        query.set_block_id(3);
        query.fill_from(1, 2, &reported);
        assert_eq!(query.block_id(), 3);
        assert_eq!(query.card(), 1);
        assert_eq!(query.device(), 2);
        assert_eq!(query.name(), "Synth");
        assert_eq!(query.active(), 1);
        assert_eq!(query.direction(), UmpDirection::Output as u32);
    }
}
