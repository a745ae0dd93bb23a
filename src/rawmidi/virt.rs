//! In-process virtual raw-MIDI ports.
//!
//! A `VirtualPort` plays the device side: bytes injected into it show up on input handles, and
//! bytes written to output handles are collected until taken.

use super::{
    OpenMode, PollFd, RawMidi, RawMidiInfo, RawMidiOpen, RawMidiPair, RawMidiParams,
    RawMidiStatus, Stream, INFO_DUPLEX, INFO_INPUT, INFO_OUTPUT, INFO_UMP,
};
use crate::ump::info::{UmpBlockInfo, UmpEndpointInfo};
use crate::{Error, Result};

use log::debug;
use std::collections::VecDeque;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct PortState {
    inbound: VecDeque<(Duration, u8)>,
    outbound: Vec<u8>,
    opened: usize,
    released: usize,
}

struct Shared {
    name: String,
    card: i32,
    device: i32,
    flags: u32,
    endpoint: Option<UmpEndpointInfo>,
    blocks: Vec<UmpBlockInfo>,
    created_at: Instant,
    state: Mutex<PortState>,
    readable: Condvar,
}


#[derive(Clone)]
pub struct VirtualPort {
    shared: Arc<Shared>,
}

pub struct VirtualPortBuilder {
    name: String,
    card: i32,
    device: i32,
    flags: u32,
    endpoint: Option<UmpEndpointInfo>,
    blocks: Vec<UmpBlockInfo>,
}

impl VirtualPortBuilder {
    pub fn card(mut self, card: i32, device: i32) -> Self {
        self.card = card;
        self.device = device;
        self
    }

    /// Removes the UMP capability bit, making the port look like a legacy MIDI 1.0 device.
    pub fn legacy(mut self) -> Self {
        self.flags &= !INFO_UMP;
        self
    }

    pub fn endpoint(mut self, endpoint: UmpEndpointInfo) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn block(mut self, block: UmpBlockInfo) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn build(self) -> VirtualPort {
        let card = self.card;
        let device = self.device;
        let endpoint = self.endpoint.map(|mut ep| {
            ep.card = card;
            ep.device = device;
            ep
        });
        VirtualPort {
            shared: Arc::new(Shared {
                name: self.name,
                card,
                device,
                flags: self.flags,
                endpoint,
                blocks: self.blocks,
                created_at: Instant::now(),
                state: Mutex::new(PortState {
                    inbound: VecDeque::new(),
                    outbound: Vec::new(),
                    opened: 0,
                    released: 0,
                }),
                readable: Condvar::new(),
            }),
        }
    }
}

impl VirtualPort {
    pub fn builder(name: impl Into<String>) -> VirtualPortBuilder {
        VirtualPortBuilder {
            name: name.into(),
            card: 0,
            device: 0,
            flags: INFO_INPUT | INFO_OUTPUT | INFO_DUPLEX | INFO_UMP,
            endpoint: None,
            blocks: Vec::new(),
        }
    }

    /// Queues bytes as if the device had sent them.
    pub fn inject(&self, bytes: &[u8]) {
        let stamp = self.shared.created_at.elapsed();
        let mut state = self.shared.state.lock();
        state.inbound.extend(bytes.iter().map(|b| (stamp, *b)));
        self.shared.readable.notify_all();
    }

    /// Takes everything written to the port so far.
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut self.shared.state.lock().outbound)
    }

    pub fn opened(&self) -> usize {
        self.shared.state.lock().opened
    }

    pub fn released(&self) -> usize {
        self.shared.state.lock().released
    }

    fn handle(&self, stream: Stream, mode: OpenMode) -> VirtualRawMidi {
        self.shared.state.lock().opened += 1;
        VirtualRawMidi {
            shared: Arc::clone(&self.shared),
            stream,
            nonblock: mode.nonblock,
            params: RawMidiParams::default(),
        }
    }
}

impl RawMidiOpen for VirtualPort {
    fn open(&self, name: &str, input: bool, output: bool, mode: OpenMode) -> Result<RawMidiPair> {
        if !input && !output {
            return Err(Error::invalid("neither input nor output requested"));
        }
        if name != self.shared.name {
            return Err(Error::invalid(format!("no virtual port named {:?}", name)));
        }
        debug!("opening virtual port {} (input={}, output={})", name, input, output);
        Ok(RawMidiPair {
            input: if input {
                Some(Box::new(self.handle(Stream::Input, mode)) as Box<dyn RawMidi>)
            } else {
                None
            },
            output: if output {
                Some(Box::new(self.handle(Stream::Output, mode)) as Box<dyn RawMidi>)
            } else {
                None
            },
        })
    }
}

pub struct VirtualRawMidi {
    shared: Arc<Shared>,
    stream: Stream,
    nonblock: bool,
    params: RawMidiParams,
}

impl VirtualRawMidi {
    fn require(&self, stream: Stream, op: &'static str) -> Result<()> {
        if self.stream != stream {
            return Err(Error::WrongDirection {
                op,
                stream: self.stream.as_str(),
            });
        }
        Ok(())
    }
}

impl Drop for VirtualRawMidi {
    fn drop(&mut self) {
        self.shared.state.lock().released += 1;
    }
}

impl RawMidi for VirtualRawMidi {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn stream(&self) -> Stream {
        self.stream
    }

    fn poll_descriptors_count(&self) -> usize {
        0
    }

    fn poll_descriptors(&self, _pfds: &mut [PollFd]) -> usize {
        0
    }

    fn poll_descriptors_revents(&self, _pfds: &[PollFd]) -> Result<u16> {
        Ok(0)
    }

    fn nonblock(&mut self, nonblock: bool) -> Result<()> {
        self.nonblock = nonblock;
        Ok(())
    }

    fn info(&self) -> Result<RawMidiInfo> {
        Ok(RawMidiInfo {
            card: self.shared.card,
            device: self.shared.device,
            subdevice: 0,
            flags: self.shared.flags,
            id: format!("virtual-{}", self.shared.device),
            name: self.shared.name.clone(),
            subname: String::new(),
        })
    }

    fn params(&mut self, params: &RawMidiParams) -> Result<()> {
        params.validate()?;
        self.params = *params;
        Ok(())
    }

    fn params_current(&self) -> Result<RawMidiParams> {
        Ok(self.params)
    }

    fn status(&self) -> Result<RawMidiStatus> {
        let state = self.shared.state.lock();
        let avail = match self.stream {
            Stream::Input => state.inbound.len(),
            Stream::Output => self.params.buffer_size,
        };
        Ok(RawMidiStatus {
            timestamp: self.shared.created_at.elapsed(),
            avail,
            xruns: 0,
        })
    }

    fn drop_pending(&mut self) -> Result<()> {
        if self.stream == Stream::Input {
            self.shared.state.lock().inbound.clear();
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        Ok(())
    }

    fn write(&mut self, buffer: &[u8]) -> Result<usize> {
        self.require(Stream::Output, "write")?;
        self.shared.state.lock().outbound.extend_from_slice(buffer);
        Ok(buffer.len())
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        self.tread(buffer).map(|(n, _)| n)
    }

    fn tread(&mut self, buffer: &mut [u8]) -> Result<(usize, Duration)> {
        self.require(Stream::Input, "read")?;
        if buffer.is_empty() {
            return Ok((0, Duration::default()));
        }
        let mut state = self.shared.state.lock();
        while state.inbound.is_empty() {
            if self.nonblock {
                return Err(Error::WouldBlock);
            }
            self.shared.readable.wait(&mut state);
        }
        let stamp = state.inbound.front().map(|(t, _)| *t).unwrap_or_default();
        let mut n = 0;
        while n < buffer.len() {
            match state.inbound.pop_front() {
                Some((_, byte)) => {
                    buffer[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok((n, stamp))
    }

    fn ump_endpoint_info(&self) -> Result<UmpEndpointInfo> {
        self.shared
            .endpoint
            .clone()
            .ok_or(Error::Unsupported("UMP endpoint info"))
    }

    fn ump_block_info(&self, info: &mut UmpBlockInfo) -> Result<()> {
        let block = self
            .shared
            .blocks
            .iter()
            .find(|b| b.block_id == info.block_id)
            .ok_or_else(|| Error::invalid(format!("no UMP block {}", info.block_id)))?;
        info.fill_from(self.shared.card, self.shared.device, block);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        debug!("closing virtual {} handle on {}", self.stream.as_str(), self.shared.name);
        Ok(())
    }
}
