//! Generic PCM handles and the plugins built on them.

pub mod area;
pub mod config;
pub mod file;
pub mod memory;

use crate::rawmidi::PollFd;
use crate::{Error, Result};

use std::fmt;

pub use area::ChannelArea;
pub use config::PcmConfig;
pub use file::{FilePcm, MirrorFormat, MirrorTarget};
pub use memory::MemoryPcm;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PcmStream {
    Playback,
    Capture,
}

impl PcmStream {
    pub fn as_str(self) -> &'static str {
        match self {
            PcmStream::Playback => "playback",
            PcmStream::Capture => "capture",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PcmMode {
    pub nonblock: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PcmState {
    Open,
    Setup,
    Prepared,
    Running,
    Xrun,
    Draining,
    Paused,
}

impl PcmState {
    pub fn as_str(self) -> &'static str {
        match self {
            PcmState::Open => "OPEN",
            PcmState::Setup => "SETUP",
            PcmState::Prepared => "PREPARED",
            PcmState::Running => "RUNNING",
            PcmState::Xrun => "XRUN",
            PcmState::Draining => "DRAINING",
            PcmState::Paused => "PAUSED",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    MmapInterleaved,
    MmapNonInterleaved,
    RwInterleaved,
    RwNonInterleaved,
}

impl Access {
    pub fn is_interleaved(self) -> bool {
        match self {
            Access::MmapInterleaved | Access::RwInterleaved => true,
            Access::MmapNonInterleaved | Access::RwNonInterleaved => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    S8,
    U8,
    S16Le,
    S16Be,
    U16Le,
    U16Be,
    S32Le,
    S32Be,
    FloatLe,
    FloatBe,
    Float64Le,
    Float64Be,
    MuLaw,
    ALaw,
}

impl Format {
    pub fn physical_bits(self) -> usize {
        match self {
            Format::S8 | Format::U8 | Format::MuLaw | Format::ALaw => 8,
            Format::S16Le | Format::S16Be | Format::U16Le | Format::U16Be => 16,
            Format::S32Le | Format::S32Be | Format::FloatLe | Format::FloatBe => 32,
            Format::Float64Le | Format::Float64Be => 64,
        }
    }

    pub fn sample_bytes(self) -> usize {
        self.physical_bits() / 8
    }

    /// One sample of silence in this format.
    pub fn silence(self) -> Vec<u8> {
        match self {
            Format::U8 => vec![0x80],
            Format::U16Le => vec![0x00, 0x80],
            Format::U16Be => vec![0x80, 0x00],
            Format::MuLaw => vec![0x7f],
            Format::ALaw => vec![0x55],
            other => vec![0; other.sample_bytes()],
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Format::S8 => "S8",
            Format::U8 => "U8",
            Format::S16Le => "S16_LE",
            Format::S16Be => "S16_BE",
            Format::U16Le => "U16_LE",
            Format::U16Be => "U16_BE",
            Format::S32Le => "S32_LE",
            Format::S32Be => "S32_BE",
            Format::FloatLe => "FLOAT_LE",
            Format::FloatBe => "FLOAT_BE",
            Format::Float64Le => "FLOAT64_LE",
            Format::Float64Be => "FLOAT64_BE",
            Format::MuLaw => "MU_LAW",
            Format::ALaw => "A_LAW",
        }
    }
}

/// Requested hardware parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HwParams {
    pub access: Access,
    pub format: Format,
    pub channels: usize,
    pub rate: u32,
    pub buffer_size: usize,
    pub period_size: usize,
}

impl Default for HwParams {
    fn default() -> Self {
        HwParams {
            access: Access::RwInterleaved,
            format: Format::S16Le,
            channels: 2,
            rate: 48_000,
            buffer_size: 4096,
            period_size: 1024,
        }
    }
}

/// The parameters a PCM settled on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PcmSetup {
    pub access: Access,
    pub format: Format,
    pub channels: usize,
    pub rate: u32,
    pub buffer_size: usize,
    pub period_size: usize,
}

impl PcmSetup {
    pub fn from_params(params: &HwParams) -> Result<Self> {
        if params.channels == 0 || params.rate == 0 || params.buffer_size == 0 {
            return Err(Error::invalid(format!("bad hw params {:?}", params)));
        }
        let period_size = params.period_size.max(1).min(params.buffer_size);
        Ok(PcmSetup {
            access: params.access,
            format: params.format,
            channels: params.channels,
            rate: params.rate,
            buffer_size: params.buffer_size,
            period_size,
        })
    }

    pub fn frame_bytes(&self) -> usize {
        self.format.sample_bytes() * self.channels
    }

    pub fn frames_to_bytes(&self, frames: usize) -> usize {
        frames * self.frame_bytes()
    }

    pub fn bytes_to_frames(&self, bytes: usize) -> usize {
        bytes / self.frame_bytes()
    }
}

impl fmt::Display for PcmSetup {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "  access      : {:?}", self.access)?;
        writeln!(f, "  format      : {}", self.format.name())?;
        writeln!(f, "  channels    : {}", self.channels)?;
        writeln!(f, "  rate        : {}", self.rate)?;
        writeln!(f, "  buffer_size : {}", self.buffer_size)?;
        writeln!(f, "  period_size : {}", self.period_size)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PcmInfo {
    pub name: String,
    pub stream: PcmStream,
    pub kind: &'static str,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PcmStatus {
    pub state: PcmState,
    pub avail: usize,
    pub delay: isize,
    pub hw_ptr: usize,
    pub appl_ptr: usize,
}

/// Read-only view of a PCM's mapped ring buffer.
pub struct MmapAreas<'a> {
    pub data: &'a [u8],
    pub areas: &'a [ChannelArea],
}

/// A PCM stream handle.
///
/// Transfer sizes are in frames; buffers are raw sample bytes in the negotiated format.
pub trait Pcm {
    fn name(&self) -> &str;

    fn stream(&self) -> PcmStream;

    fn info(&self) -> Result<PcmInfo>;

    fn hw_params(&mut self, params: &HwParams) -> Result<()>;

    /// `None` until `hw_params` succeeds.
    fn setup(&self) -> Option<PcmSetup>;

    fn nonblock(&mut self, nonblock: bool) -> Result<()>;

    fn status(&self) -> Result<PcmStatus>;

    fn state(&self) -> PcmState;

    fn delay(&self) -> Result<isize>;

    fn prepare(&mut self) -> Result<()>;

    fn start(&mut self) -> Result<()>;

    /// Stops immediately, dropping pending frames.
    fn stop(&mut self) -> Result<()>;

    fn drain(&mut self) -> Result<()>;

    fn pause(&mut self, enable: bool) -> Result<()>;

    /// Moves the application pointer back; returns the frames actually rewound.
    fn rewind(&mut self, frames: usize) -> Result<usize>;

    fn writei(&mut self, buffer: &[u8]) -> Result<usize>;

    fn writen(&mut self, buffers: &[&[u8]]) -> Result<usize>;

    fn readi(&mut self, buffer: &mut [u8]) -> Result<usize>;

    fn readn(&mut self, buffers: &mut [&mut [u8]]) -> Result<usize>;

    fn avail_update(&mut self) -> Result<usize>;

    /// Application position in frames; not wrapped to the buffer size.
    fn appl_ptr(&self) -> usize;

    fn mmap_areas(&self) -> Result<MmapAreas<'_>>;

    fn mmap_buffer_mut(&mut self) -> Result<&mut [u8]>;

    /// Commits `frames` frames written to (or read from) the mapped buffer.
    fn mmap_forward(&mut self, frames: usize) -> Result<usize>;

    fn poll_descriptors(&self) -> Vec<PollFd>;

    fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result;

    fn close(self: Box<Self>) -> Result<()>;
}

impl Pcm for Box<dyn Pcm> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn stream(&self) -> PcmStream {
        (**self).stream()
    }

    fn info(&self) -> Result<PcmInfo> {
        (**self).info()
    }

    fn hw_params(&mut self, params: &HwParams) -> Result<()> {
        (**self).hw_params(params)
    }

    fn setup(&self) -> Option<PcmSetup> {
        (**self).setup()
    }

    fn nonblock(&mut self, nonblock: bool) -> Result<()> {
        (**self).nonblock(nonblock)
    }

    fn status(&self) -> Result<PcmStatus> {
        (**self).status()
    }

    fn state(&self) -> PcmState {
        (**self).state()
    }

    fn delay(&self) -> Result<isize> {
        (**self).delay()
    }

    fn prepare(&mut self) -> Result<()> {
        (**self).prepare()
    }

    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn drain(&mut self) -> Result<()> {
        (**self).drain()
    }

    fn pause(&mut self, enable: bool) -> Result<()> {
        (**self).pause(enable)
    }

    fn rewind(&mut self, frames: usize) -> Result<usize> {
        (**self).rewind(frames)
    }

    fn writei(&mut self, buffer: &[u8]) -> Result<usize> {
        (**self).writei(buffer)
    }

    fn writen(&mut self, buffers: &[&[u8]]) -> Result<usize> {
        (**self).writen(buffers)
    }

    fn readi(&mut self, buffer: &mut [u8]) -> Result<usize> {
        (**self).readi(buffer)
    }

    fn readn(&mut self, buffers: &mut [&mut [u8]]) -> Result<usize> {
        (**self).readn(buffers)
    }

    fn avail_update(&mut self) -> Result<usize> {
        (**self).avail_update()
    }

    fn appl_ptr(&self) -> usize {
        (**self).appl_ptr()
    }

    fn mmap_areas(&self) -> Result<MmapAreas<'_>> {
        (**self).mmap_areas()
    }

    fn mmap_buffer_mut(&mut self) -> Result<&mut [u8]> {
        (**self).mmap_buffer_mut()
    }

    fn mmap_forward(&mut self, frames: usize) -> Result<usize> {
        (**self).mmap_forward(frames)
    }

    fn poll_descriptors(&self) -> Vec<PollFd> {
        (**self).poll_descriptors()
    }

    fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        (**self).dump(out)
    }

    fn close(self: Box<Self>) -> Result<()> {
        <dyn Pcm as Pcm>::close(*self)
    }
}
