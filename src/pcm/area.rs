//! Channel areas: where each channel's samples live inside a ring buffer.

use super::PcmSetup;

/// Offsets are in bits from the start of the buffer, matching how sample positions are counted
/// for packed formats. Only byte-aligned layouts are produced here.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelArea {
    /// Position of the first sample of this channel.
    pub first: usize,
    /// Distance between consecutive samples of this channel.
    pub step: usize,
}

impl ChannelArea {
    pub(crate) fn byte_offset(&self, frame: usize) -> usize {
        (self.first + frame * self.step) / 8
    }
}

/// Areas describing a ring buffer laid out according to `setup.access`.
pub fn areas_for(setup: &PcmSetup) -> Vec<ChannelArea> {
    let bits = setup.format.physical_bits();
    (0..setup.channels)
        .map(|channel| {
            if setup.access.is_interleaved() {
                ChannelArea {
                    first: channel * bits,
                    step: bits * setup.channels,
                }
            } else {
                ChannelArea {
                    first: channel * bits * setup.buffer_size,
                    step: bits,
                }
            }
        })
        .collect()
}

/// Appends `frames` frames starting at `offset` to `out`, interleaved.
pub fn copy_areas_interleaved(
    data: &[u8],
    areas: &[ChannelArea],
    offset: usize,
    frames: usize,
    sample_bytes: usize,
    out: &mut Vec<u8>,
) {
    out.reserve(frames * areas.len() * sample_bytes);
    for frame in offset..offset + frames {
        for area in areas {
            let start = area.byte_offset(frame);
            out.extend_from_slice(&data[start..start + sample_bytes]);
        }
    }
}

/// Appends the first `frames` frames of per-channel buffers to `out`, interleaved.
pub fn interleave(buffers: &[&[u8]], frames: usize, sample_bytes: usize, out: &mut Vec<u8>) {
    out.reserve(frames * buffers.len() * sample_bytes);
    for frame in 0..frames {
        let start = frame * sample_bytes;
        for buffer in buffers {
            out.extend_from_slice(&buffer[start..start + sample_bytes]);
        }
    }
}
