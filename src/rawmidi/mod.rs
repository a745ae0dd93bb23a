//! Generic raw-MIDI byte stream handles.

pub mod hw;
pub mod proc_info;
pub mod virt;

use crate::ump::info::{UmpBlockInfo, UmpEndpointInfo};
use crate::{Error, Result};

use std::time::Duration;

pub use hw::{list_ump_devices, HwRawMidi};
pub use virt::VirtualPort;

pub const INFO_OUTPUT: u32 = 0x0000_0001;
pub const INFO_INPUT: u32 = 0x0000_0002;
pub const INFO_DUPLEX: u32 = 0x0000_0004;
pub const INFO_UMP: u32 = 0x0000_0008;

pub const POLLIN: i16 = libc::POLLIN;
pub const POLLOUT: i16 = libc::POLLOUT;
pub const POLLERR: i16 = libc::POLLERR;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
    Input,
    Output,
}

impl Stream {
    pub fn as_str(self) -> &'static str {
        match self {
            Stream::Input => "input",
            Stream::Output => "output",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpenMode {
    pub nonblock: bool,
    pub append: bool,
    pub sync: bool,
    /// Open the UMP flavor of the device rather than the legacy byte stream.
    pub ump: bool,
}

impl OpenMode {
    pub fn nonblocking() -> Self {
        OpenMode {
            nonblock: true,
            ..Default::default()
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PollFd {
    pub fd: i32,
    pub events: i16,
    pub revents: i16,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawMidiInfo {
    pub card: i32,
    pub device: i32,
    pub subdevice: i32,
    pub flags: u32,
    pub id: String,
    pub name: String,
    pub subname: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockType {
    None,
    Realtime,
    Monotonic,
    MonotonicRaw,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawMidiParams {
    pub buffer_size: usize,
    pub avail_min: usize,
    pub no_active_sensing: bool,
    pub clock_type: ClockType,
}

impl Default for RawMidiParams {
    fn default() -> Self {
        RawMidiParams {
            buffer_size: 4096,
            avail_min: 1,
            no_active_sensing: true,
            clock_type: ClockType::None,
        }
    }
}

impl RawMidiParams {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.buffer_size < 32 || self.avail_min == 0 || self.avail_min > self.buffer_size {
            return Err(Error::invalid(format!("bad rawmidi params {:?}", self)));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawMidiStatus {
    pub timestamp: Duration,
    pub avail: usize,
    pub xruns: usize,
}

/// A raw-MIDI handle for one direction of a device.
///
/// The underlying device is released exactly once, either by `close` or when the handle is
/// dropped.
pub trait RawMidi {
    fn name(&self) -> &str;

    fn stream(&self) -> Stream;

    fn poll_descriptors_count(&self) -> usize;

    /// Fills `pfds` and returns how many entries were written.
    fn poll_descriptors(&self, pfds: &mut [PollFd]) -> usize;

    fn poll_descriptors_revents(&self, pfds: &[PollFd]) -> Result<u16>;

    fn nonblock(&mut self, nonblock: bool) -> Result<()>;

    fn info(&self) -> Result<RawMidiInfo>;

    fn params(&mut self, params: &RawMidiParams) -> Result<()>;

    fn params_current(&self) -> Result<RawMidiParams>;

    fn status(&self) -> Result<RawMidiStatus>;

    /// Discards everything queued in the ring buffer.
    fn drop_pending(&mut self) -> Result<()>;

    fn drain(&mut self) -> Result<()>;

    fn write(&mut self, buffer: &[u8]) -> Result<usize>;

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Like `read`, also returning the timestamp of the returned bytes.
    fn tread(&mut self, buffer: &mut [u8]) -> Result<(usize, Duration)>;

    fn ump_endpoint_info(&self) -> Result<UmpEndpointInfo>;

    /// Fills `info` for the block id already set on it.
    fn ump_block_info(&self, info: &mut UmpBlockInfo) -> Result<()>;

    fn close(self: Box<Self>) -> Result<()>;
}

/// The handles produced by one open call.
pub struct RawMidiPair {
    pub input: Option<Box<dyn RawMidi>>,
    pub output: Option<Box<dyn RawMidi>>,
}

/// Something that can open raw-MIDI devices by name.
pub trait RawMidiOpen {
    fn open(&self, name: &str, input: bool, output: bool, mode: OpenMode) -> Result<RawMidiPair>;
}

/// Opens devices under `/dev/snd`.
#[derive(Clone, Copy, Debug, Default)]
pub struct HwOpener;

impl RawMidiOpen for HwOpener {
    fn open(&self, name: &str, input: bool, output: bool, mode: OpenMode) -> Result<RawMidiPair> {
        if !input && !output {
            return Err(Error::invalid("neither input nor output requested"));
        }
        let input = if input {
            Some(Box::new(HwRawMidi::open(name, Stream::Input, mode)?) as Box<dyn RawMidi>)
        } else {
            None
        };
        let output = if output {
            Some(Box::new(HwRawMidi::open(name, Stream::Output, mode)?) as Box<dyn RawMidi>)
        } else {
            None
        };
        Ok(RawMidiPair { input, output })
    }
}

/// Opens a raw-MIDI device node by its `hw:` name.
pub fn open(name: &str, input: bool, output: bool, mode: OpenMode) -> Result<RawMidiPair> {
    HwOpener.open(name, input, output, mode)
}
