//! Parsing of the kernel's `/proc/asound/cardN/midiD` text.
//!
//! The first line is the rawmidi device name. UMP endpoints add `Key: Value` lines describing
//! the endpoint followed by one `Block N (name)` section per function block.

use crate::ump::info::{UmpBlockInfo, UmpDirection, UmpEndpointInfo, BLOCK_IS_LOWSPEED, BLOCK_IS_MIDI1};

use log::trace;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcInfo {
    pub name: String,
    /// `None` when the text carries no UMP endpoint description.
    pub endpoint: Option<UmpEndpointInfo>,
    pub blocks: Vec<UmpBlockInfo>,
}

fn parse_number(value: &str) -> Option<u32> {
    let value = value.trim();
    if let Some(hex) = value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        value.parse().ok()
    }
}

fn parse_direction(value: &str) -> u32 {
    let value = value.trim().to_ascii_lowercase();
    let direction = if value.starts_with("bidir") || value == "in/out" {
        UmpDirection::Bidirection
    } else if value.starts_with("in") {
        UmpDirection::Input
    } else if value.starts_with("out") {
        UmpDirection::Output
    } else {
        return 0;
    };
    direction as u32
}

/// Parses `Block 3 (Name)` headers.
fn parse_block_header(line: &str) -> Option<UmpBlockInfo> {
    let rest = line.strip_prefix("Block ")?;
    let (id, name) = match rest.find(' ') {
        Some(i) => (&rest[..i], rest[i..].trim()),
        None => (rest, ""),
    };
    let id = parse_number(id)?;
    let name = name.trim_start_matches('(').trim_end_matches(')');
    Some(UmpBlockInfo::new(id, name))
}

/// Parses `Groups: 1-4`, 1-based and inclusive.
fn parse_groups(value: &str) -> Option<(u32, u32)> {
    let mut parts = value.trim().splitn(2, '-');
    let first = parse_number(parts.next()?)?;
    let last = match parts.next() {
        Some(last) => parse_number(last)?,
        None => first,
    };
    if first == 0 || last < first {
        return None;
    }
    Some((first - 1, last - first + 1))
}

pub fn parse(card: i32, device: i32, text: &str) -> ProcInfo {
    let mut lines = text.lines();
    let mut info = ProcInfo {
        name: lines.next().unwrap_or("").trim().to_string(),
        ..Default::default()
    };
    let mut block: Option<UmpBlockInfo> = None;

    for line in lines {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(new_block) = parse_block_header(trimmed) {
            if let Some(done) = block.take() {
                info.blocks.push(done);
            }
            block = Some(UmpBlockInfo {
                card,
                device,
                ..new_block
            });
            continue;
        }
        let (key, value) = match trimmed.find(':') {
            Some(i) => (&trimmed[..i], trimmed[i + 1..].trim()),
            None => continue,
        };

        // Non-indented lines end the current block section.
        if !line.starts_with(char::is_whitespace) {
            if let Some(done) = block.take() {
                info.blocks.push(done);
            }
        }

        if let Some(b) = block.as_mut() {
            match key {
                "Direction" => b.direction = parse_direction(value),
                "Active" => b.active = value.eq_ignore_ascii_case("yes"),
                "Groups" => {
                    if let Some((first, num)) = parse_groups(value) {
                        b.first_group = first;
                        b.num_groups = num;
                    }
                }
                "Is MIDI1" => {
                    if value.starts_with("Yes") {
                        b.flags |= BLOCK_IS_MIDI1;
                    }
                    if value.contains("Low Speed") {
                        b.flags |= BLOCK_IS_LOWSPEED;
                    }
                }
                _ => trace!("ignoring block line {:?}", trimmed),
            }
            continue;
        }

        let ep = info
            .endpoint
            .get_or_insert_with(|| UmpEndpointInfo::new(card, device, ""));
        match key {
            "EP Name" => ep.name = value.to_string(),
            "EP Product ID" => ep.product_id = value.to_string(),
            "UMP Version" => ep.version = parse_number(value).unwrap_or(0),
            "Protocol Caps" => ep.protocol_caps = parse_number(value).unwrap_or(0),
            "Protocol" => ep.protocol = parse_number(value).unwrap_or(0),
            "Num Blocks" => ep.num_blocks = parse_number(value).unwrap_or(0),
            _ => trace!("ignoring endpoint line {:?}", trimmed),
        }
    }
    if let Some(done) = block.take() {
        info.blocks.push(done);
    }

    // Only the recognized endpoint keys make this a UMP description.
    if let Some(ep) = &info.endpoint {
        if *ep == UmpEndpointInfo::new(card, device, "") {
            info.endpoint = None;
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ump::info::{PROTO_JRTS_MASK, PROTO_MIDI2};

    const SAMPLE: &str = "\
MIDI 2.0 Gadget

EP Name: Gadget EP
EP Product ID: G-1234
UMP Version: 0x0101
Protocol Caps: 0x00000300
Protocol: 0x00000200
Num Blocks: 2

Block 0 (Monosynth)
  Direction: bidirection
  Active: Yes
  Groups: 1-1
  Is MIDI1: No

Block 1 (Legacy Port)
  Direction: output
  Active: No
  Groups: 2-4
  Is MIDI1: Yes (Low Speed)

Output 0
  Tx bytes     : 0
";

    #[test]
    fn test_endpoint_fields() {
        let info = parse(1, 0, SAMPLE);
        assert_eq!(info.name, "MIDI 2.0 Gadget");
        let ep = info.endpoint.expect("endpoint");
        assert_eq!(ep.card(), 1);
        assert_eq!(ep.name(), "Gadget EP");
        assert_eq!(ep.product_id(), "G-1234");
        assert_eq!(ep.version(), 0x0101);
        assert_eq!(ep.protocol_caps(), 0x0300);
        assert_eq!(ep.protocol(), PROTO_MIDI2);
        assert_eq!(ep.protocol() & PROTO_JRTS_MASK, 0);
        assert_eq!(ep.num_blocks(), 2);
    }

    #[test]
    fn test_block_sections() {
        let info = parse(1, 0, SAMPLE);
        assert_eq!(info.blocks.len(), 2);

        let synth = &info.blocks[0];
        assert_eq!(synth.block_id(), 0);
        assert_eq!(synth.name(), "Monosynth");
        assert_eq!(synth.direction(), UmpDirection::Bidirection as u32);
        assert_eq!(synth.active(), 1);
        assert_eq!((synth.first_group(), synth.num_groups()), (0, 1));
        assert_eq!(synth.flags(), 0);

        let legacy = &info.blocks[1];
        assert_eq!(legacy.name(), "Legacy Port");
        assert_eq!(legacy.direction(), UmpDirection::Output as u32);
        assert_eq!(legacy.active(), 0);
        assert_eq!((legacy.first_group(), legacy.num_groups()), (1, 3));
        assert_eq!(legacy.flags(), BLOCK_IS_MIDI1 | BLOCK_IS_LOWSPEED);
    }

    #[test]
    fn test_plain_rawmidi_has_no_endpoint() {
        let info = parse(0, 0, "USB MIDI Interface\n\nOutput 0\n  Tx bytes     : 12\n");
        assert_eq!(info.name, "USB MIDI Interface");
        assert!(info.endpoint.is_none());
        assert!(info.blocks.is_empty());
    }
}
