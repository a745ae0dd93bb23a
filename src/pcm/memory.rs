//! Software PCMs with no hardware behind them.
//!
//! `null` consumes playback frames as soon as they are written and captures endless silence.
//! `memory` keeps frames in its ring until the simulated hardware side moves: `consume` plays
//! them out, `feed` captures new ones.

use super::area::{self, ChannelArea};
use super::{
    HwParams, MmapAreas, Pcm, PcmInfo, PcmSetup, PcmState, PcmStatus, PcmStream,
};
use crate::rawmidi::PollFd;
use crate::{Error, Result};

use log::{debug, trace};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Null,
    Memory,
}

pub struct MemoryPcm {
    name: String,
    kind: Kind,
    stream: PcmStream,
    nonblock: bool,
    state: PcmState,
    setup: Option<PcmSetup>,
    areas: Vec<ChannelArea>,
    buffer: Vec<u8>,
    hw_ptr: usize,
    appl_ptr: usize,
}

impl MemoryPcm {
    pub fn null(stream: PcmStream) -> Self {
        Self::new("null", Kind::Null, stream)
    }

    pub fn memory(stream: PcmStream) -> Self {
        Self::new("memory", Kind::Memory, stream)
    }

    fn new(name: &str, kind: Kind, stream: PcmStream) -> Self {
        MemoryPcm {
            name: name.to_string(),
            kind,
            stream,
            nonblock: false,
            state: PcmState::Open,
            setup: None,
            areas: Vec::new(),
            buffer: Vec::new(),
            hw_ptr: 0,
            appl_ptr: 0,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn require_setup(&self, op: &'static str) -> Result<PcmSetup> {
        self.setup.ok_or(Error::BadState {
            op,
            state: self.state.as_str(),
        })
    }

    fn bad_state(&self, op: &'static str) -> Error {
        Error::BadState {
            op,
            state: self.state.as_str(),
        }
    }

    fn avail(&self, setup: &PcmSetup) -> usize {
        match self.stream {
            PcmStream::Playback => setup.buffer_size - (self.appl_ptr - self.hw_ptr),
            PcmStream::Capture => self.hw_ptr - self.appl_ptr,
        }
    }

    fn reset_ring(&mut self, setup: &PcmSetup) {
        let silence = setup.format.silence();
        self.buffer = silence
            .iter()
            .cycle()
            .take(setup.buffer_size * setup.frame_bytes())
            .copied()
            .collect();
        self.appl_ptr = 0;
        self.hw_ptr = match (self.kind, self.stream) {
            (Kind::Null, PcmStream::Capture) => setup.buffer_size,
            _ => 0,
        };
    }

    /// Validates a transfer of up to `frames` frames and returns how many can move now.
    fn begin_transfer(
        &mut self,
        op: &'static str,
        stream: PcmStream,
        interleaved: bool,
        frames: usize,
    ) -> Result<(PcmSetup, usize)> {
        if self.stream != stream {
            return Err(Error::WrongDirection {
                op,
                stream: self.stream.as_str(),
            });
        }
        let setup = self.require_setup(op)?;
        if interleaved != setup.access.is_interleaved() {
            return Err(Error::invalid(format!(
                "{} does not match access {:?}",
                op, setup.access
            )));
        }
        match self.state {
            PcmState::Prepared | PcmState::Running => {}
            _ => return Err(self.bad_state(op)),
        }
        if frames == 0 {
            return Ok((setup, 0));
        }
        let avail = self.avail(&setup);
        if avail == 0 {
            trace!("{}: {} found no room (nonblock={})", self.name, op, self.nonblock);
            return Err(Error::WouldBlock);
        }
        if self.state == PcmState::Prepared {
            debug!("{}: {} starts the stream", self.name, op);
            self.state = PcmState::Running;
        }
        Ok((setup, frames.min(avail)))
    }

    fn commit(&mut self, setup: &PcmSetup, frames: usize) {
        self.appl_ptr += frames;
        if self.kind == Kind::Null {
            self.hw_ptr = match self.stream {
                PcmStream::Playback => self.appl_ptr,
                PcmStream::Capture => self.appl_ptr + setup.buffer_size,
            };
        }
    }

    fn sample_offset(&self, setup: &PcmSetup, frame: usize, channel: usize) -> usize {
        self.areas[channel].byte_offset(frame % setup.buffer_size)
    }

    /// Plays out up to `frames` frames, returning their bytes interleaved.
    pub fn consume(&mut self, frames: usize) -> Result<Vec<u8>> {
        if self.stream != PcmStream::Playback {
            return Err(Error::WrongDirection {
                op: "consume",
                stream: self.stream.as_str(),
            });
        }
        let setup = self.require_setup("consume")?;
        if self.state != PcmState::Running {
            return Err(self.bad_state("consume"));
        }
        let n = frames.min(self.appl_ptr - self.hw_ptr);
        let sample_bytes = setup.format.sample_bytes();
        let mut out = Vec::with_capacity(setup.frames_to_bytes(n));
        for frame in self.hw_ptr..self.hw_ptr + n {
            for channel in 0..setup.channels {
                let start = self.sample_offset(&setup, frame, channel);
                out.extend_from_slice(&self.buffer[start..start + sample_bytes]);
            }
        }
        self.hw_ptr += n;
        Ok(out)
    }

    /// Captures interleaved frames as if the hardware had recorded them.
    /// Returns the number of frames that fit.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<usize> {
        if self.stream != PcmStream::Capture {
            return Err(Error::WrongDirection {
                op: "feed",
                stream: self.stream.as_str(),
            });
        }
        let setup = self.require_setup("feed")?;
        if self.state != PcmState::Running {
            return Err(self.bad_state("feed"));
        }
        if self.kind == Kind::Null {
            return Ok(0);
        }
        let room = setup.buffer_size - (self.hw_ptr - self.appl_ptr);
        let n = setup.bytes_to_frames(bytes.len()).min(room);
        let sample_bytes = setup.format.sample_bytes();
        for i in 0..n {
            for channel in 0..setup.channels {
                let src = (i * setup.channels + channel) * sample_bytes;
                let dst = self.sample_offset(&setup, self.hw_ptr + i, channel);
                self.buffer[dst..dst + sample_bytes].copy_from_slice(&bytes[src..src + sample_bytes]);
            }
        }
        self.hw_ptr += n;
        Ok(n)
    }
}

impl Pcm for MemoryPcm {
    fn name(&self) -> &str {
        &self.name
    }

    fn stream(&self) -> PcmStream {
        self.stream
    }

    fn info(&self) -> Result<PcmInfo> {
        Ok(PcmInfo {
            name: self.name.clone(),
            stream: self.stream,
            kind: match self.kind {
                Kind::Null => "null",
                Kind::Memory => "memory",
            },
        })
    }

    fn hw_params(&mut self, params: &HwParams) -> Result<()> {
        match self.state {
            PcmState::Open | PcmState::Setup | PcmState::Prepared => {}
            _ => return Err(self.bad_state("hw_params")),
        }
        let setup = PcmSetup::from_params(params)?;
        self.areas = area::areas_for(&setup);
        self.reset_ring(&setup);
        self.setup = Some(setup);
        self.state = PcmState::Setup;
        debug!("{}: hw_params {:?}", self.name, setup);
        Ok(())
    }

    fn setup(&self) -> Option<PcmSetup> {
        self.setup
    }

    fn nonblock(&mut self, nonblock: bool) -> Result<()> {
        self.nonblock = nonblock;
        Ok(())
    }

    fn status(&self) -> Result<PcmStatus> {
        let setup = self.require_setup("status")?;
        Ok(PcmStatus {
            state: self.state,
            avail: self.avail(&setup),
            delay: self.delay()?,
            hw_ptr: self.hw_ptr,
            appl_ptr: self.appl_ptr,
        })
    }

    fn state(&self) -> PcmState {
        self.state
    }

    fn delay(&self) -> Result<isize> {
        self.require_setup("delay")?;
        Ok(match self.stream {
            PcmStream::Playback => self.appl_ptr as isize - self.hw_ptr as isize,
            PcmStream::Capture => self.hw_ptr as isize - self.appl_ptr as isize,
        })
    }

    fn prepare(&mut self) -> Result<()> {
        match self.state {
            PcmState::Setup | PcmState::Prepared | PcmState::Xrun => {}
            _ => return Err(self.bad_state("prepare")),
        }
        let setup = self.require_setup("prepare")?;
        self.reset_ring(&setup);
        self.state = PcmState::Prepared;
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.state != PcmState::Prepared {
            return Err(self.bad_state("start"));
        }
        self.state = PcmState::Running;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        match self.state {
            PcmState::Open => Err(self.bad_state("stop")),
            _ => {
                self.state = PcmState::Setup;
                Ok(())
            }
        }
    }

    fn drain(&mut self) -> Result<()> {
        match self.state {
            PcmState::Open => return Err(self.bad_state("drain")),
            PcmState::Setup => return Ok(()),
            _ => {}
        }
        if self.stream == PcmStream::Playback {
            // Everything queued is played out.
            self.hw_ptr = self.appl_ptr;
        }
        self.state = PcmState::Setup;
        Ok(())
    }

    fn pause(&mut self, enable: bool) -> Result<()> {
        self.state = match (self.state, enable) {
            (PcmState::Running, true) => PcmState::Paused,
            (PcmState::Paused, false) => PcmState::Running,
            _ => return Err(self.bad_state("pause")),
        };
        Ok(())
    }

    fn rewind(&mut self, frames: usize) -> Result<usize> {
        let setup = self.require_setup("rewind")?;
        match self.state {
            PcmState::Prepared | PcmState::Running | PcmState::Paused => {}
            _ => return Err(self.bad_state("rewind")),
        }
        let rewindable = match self.stream {
            PcmStream::Playback => self.appl_ptr - self.hw_ptr,
            PcmStream::Capture => {
                (setup.buffer_size - (self.hw_ptr - self.appl_ptr)).min(self.appl_ptr)
            }
        };
        let n = frames.min(rewindable);
        self.appl_ptr -= n;
        Ok(n)
    }

    fn writei(&mut self, buffer: &[u8]) -> Result<usize> {
        let frames = match self.setup {
            Some(setup) => setup.bytes_to_frames(buffer.len()),
            None => 0,
        };
        let (setup, n) = self.begin_transfer("writei", PcmStream::Playback, true, frames)?;
        let sample_bytes = setup.format.sample_bytes();
        for i in 0..n {
            for channel in 0..setup.channels {
                let src = (i * setup.channels + channel) * sample_bytes;
                let dst = self.sample_offset(&setup, self.appl_ptr + i, channel);
                self.buffer[dst..dst + sample_bytes].copy_from_slice(&buffer[src..src + sample_bytes]);
            }
        }
        self.commit(&setup, n);
        Ok(n)
    }

    fn writen(&mut self, buffers: &[&[u8]]) -> Result<usize> {
        let setup = self.require_setup("writen")?;
        if buffers.len() != setup.channels {
            return Err(Error::invalid("one buffer per channel is required"));
        }
        let sample_bytes = setup.format.sample_bytes();
        let frames = buffers.iter().map(|b| b.len() / sample_bytes).min().unwrap_or(0);
        let (setup, n) = self.begin_transfer("writen", PcmStream::Playback, false, frames)?;
        for i in 0..n {
            for (channel, src) in buffers.iter().enumerate() {
                let dst = self.sample_offset(&setup, self.appl_ptr + i, channel);
                self.buffer[dst..dst + sample_bytes]
                    .copy_from_slice(&src[i * sample_bytes..(i + 1) * sample_bytes]);
            }
        }
        self.commit(&setup, n);
        Ok(n)
    }

    fn readi(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let frames = match self.setup {
            Some(setup) => setup.bytes_to_frames(buffer.len()),
            None => 0,
        };
        let (setup, n) = self.begin_transfer("readi", PcmStream::Capture, true, frames)?;
        let sample_bytes = setup.format.sample_bytes();
        for i in 0..n {
            for channel in 0..setup.channels {
                let src = self.sample_offset(&setup, self.appl_ptr + i, channel);
                let dst = (i * setup.channels + channel) * sample_bytes;
                buffer[dst..dst + sample_bytes].copy_from_slice(&self.buffer[src..src + sample_bytes]);
            }
        }
        self.commit(&setup, n);
        Ok(n)
    }

    fn readn(&mut self, buffers: &mut [&mut [u8]]) -> Result<usize> {
        let setup = self.require_setup("readn")?;
        if buffers.len() != setup.channels {
            return Err(Error::invalid("one buffer per channel is required"));
        }
        let sample_bytes = setup.format.sample_bytes();
        let frames = buffers.iter().map(|b| b.len() / sample_bytes).min().unwrap_or(0);
        let (setup, n) = self.begin_transfer("readn", PcmStream::Capture, false, frames)?;
        for i in 0..n {
            for (channel, dst) in buffers.iter_mut().enumerate() {
                let src = self.sample_offset(&setup, self.appl_ptr + i, channel);
                dst[i * sample_bytes..(i + 1) * sample_bytes]
                    .copy_from_slice(&self.buffer[src..src + sample_bytes]);
            }
        }
        self.commit(&setup, n);
        Ok(n)
    }

    fn avail_update(&mut self) -> Result<usize> {
        let setup = self.require_setup("avail_update")?;
        Ok(self.avail(&setup))
    }

    fn appl_ptr(&self) -> usize {
        self.appl_ptr
    }

    fn mmap_areas(&self) -> Result<MmapAreas<'_>> {
        self.require_setup("mmap_areas")?;
        Ok(MmapAreas {
            data: &self.buffer,
            areas: &self.areas,
        })
    }

    fn mmap_buffer_mut(&mut self) -> Result<&mut [u8]> {
        self.require_setup("mmap_buffer_mut")?;
        Ok(&mut self.buffer)
    }

    fn mmap_forward(&mut self, frames: usize) -> Result<usize> {
        let interleaved = self
            .require_setup("mmap_forward")?
            .access
            .is_interleaved();
        let stream = self.stream;
        let (setup, n) = self.begin_transfer("mmap_forward", stream, interleaved, frames)?;
        self.commit(&setup, n);
        Ok(n)
    }

    fn poll_descriptors(&self) -> Vec<PollFd> {
        Vec::new()
    }

    fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        let kind = match self.kind {
            Kind::Null => "Null",
            Kind::Memory => "Memory",
        };
        writeln!(out, "{} PCM ({}, {})", kind, self.name, self.stream.as_str())?;
        if let Some(setup) = &self.setup {
            writeln!(out, "Its setup is:")?;
            write!(out, "{}", setup)?;
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        debug!("closing {} PCM {}", self.stream.as_str(), self.name);
        Ok(())
    }
}
