//! UMP (Universal MIDI Packet) handles on top of raw-MIDI handles.

pub mod info;
pub mod packet;

use crate::rawmidi::{
    self, HwOpener, OpenMode, PollFd, RawMidi, RawMidiInfo, RawMidiOpen, RawMidiParams,
    RawMidiStatus, Stream, INFO_UMP,
};
use crate::{Error, Result};

use info::{UmpBlockInfo, UmpEndpointInfo};
use log::{debug, info};
use std::time::Duration;

/// One direction of an opened UMP endpoint.
pub struct Ump {
    rawmidi: Box<dyn RawMidi>,
    is_input: bool,
    flags: u32,
}

/// The handles returned by [`Ump::open`]; only the requested directions are present.
pub struct UmpPair {
    pub input: Option<Ump>,
    pub output: Option<Ump>,
}

impl Ump {
    /// Opens a UMP device node such as `hw:1,0`.
    pub fn open(name: &str, mode: OpenMode, input: bool, output: bool) -> Result<UmpPair> {
        Ump::open_with(&HwOpener, name, mode, input, output)
    }

    /// Opens through any raw-MIDI opener. Handles acquired before a failure are released.
    pub fn open_with<O: RawMidiOpen + ?Sized>(
        opener: &O,
        name: &str,
        mode: OpenMode,
        input: bool,
        output: bool,
    ) -> Result<UmpPair> {
        if !input && !output {
            return Err(Error::invalid("neither input nor output requested"));
        }

        let pair = opener.open(
            name,
            input,
            output,
            OpenMode {
                ump: true,
                ..mode
            },
        )?;

        // Wrap first so that an early return below drops (and so releases) both handles.
        let input = pair.input.map(|rawmidi| Ump {
            rawmidi,
            is_input: true,
            flags: 0,
        });
        let output = pair.output.map(|rawmidi| Ump {
            rawmidi,
            is_input: false,
            flags: 0,
        });
        let mut pair = UmpPair { input, output };

        if let Some(ump) = pair.input.as_mut() {
            ump.load_flags()?;
        }
        if let Some(ump) = pair.output.as_mut() {
            ump.load_flags()?;
        }

        info!("opened UMP endpoint {}", name);
        Ok(pair)
    }

    fn load_flags(&mut self) -> Result<()> {
        let info = self.rawmidi.info()?;
        if info.flags & INFO_UMP == 0 {
            debug!("{} lacks UMP capability (flags {:#x})", info.name, info.flags);
            return Err(Error::NotUmp(self.rawmidi.name().to_string()));
        }
        self.flags = info.flags;
        Ok(())
    }

    /// Closes the handle, releasing the wrapped raw-MIDI handle.
    pub fn close(self) -> Result<()> {
        self.rawmidi.close()
    }

    pub fn rawmidi(&self) -> &dyn RawMidi {
        self.rawmidi.as_ref()
    }

    pub fn rawmidi_mut(&mut self) -> &mut dyn RawMidi {
        self.rawmidi.as_mut()
    }

    pub fn is_input(&self) -> bool {
        self.is_input
    }

    /// Capability flags read from the device when it was opened.
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// The identifier given to `open`.
    pub fn name(&self) -> &str {
        self.rawmidi.name()
    }

    pub fn poll_descriptors_count(&self) -> usize {
        self.rawmidi.poll_descriptors_count()
    }

    pub fn poll_descriptors(&self, pfds: &mut [PollFd]) -> usize {
        self.rawmidi.poll_descriptors(pfds)
    }

    pub fn poll_descriptors_revents(&self, pfds: &[PollFd]) -> Result<u16> {
        self.rawmidi.poll_descriptors_revents(pfds)
    }

    pub fn nonblock(&mut self, nonblock: bool) -> Result<()> {
        self.rawmidi.nonblock(nonblock)
    }

    pub fn rawmidi_info(&self) -> Result<RawMidiInfo> {
        self.rawmidi.info()
    }

    pub fn rawmidi_params(&mut self, params: &RawMidiParams) -> Result<()> {
        self.rawmidi.params(params)
    }

    pub fn rawmidi_params_current(&self) -> Result<RawMidiParams> {
        self.rawmidi.params_current()
    }

    pub fn rawmidi_status(&self) -> Result<RawMidiStatus> {
        self.rawmidi.status()
    }

    /// Drops all packets in the I/O ring buffer immediately.
    pub fn drop_pending(&mut self) -> Result<()> {
        self.rawmidi.drop_pending()
    }

    /// Waits until all packets are sent to the device.
    pub fn drain(&mut self) -> Result<()> {
        self.rawmidi.drain()
    }

    pub fn write(&mut self, buffer: &[u8]) -> Result<usize> {
        if self.is_input {
            return Err(Error::WrongDirection {
                op: "write",
                stream: Stream::Input.as_str(),
            });
        }
        self.rawmidi.write(buffer)
    }

    pub fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        self.require_input("read")?;
        self.rawmidi.read(buffer)
    }

    /// Reads packets along with their timestamp.
    pub fn tread(&mut self, buffer: &mut [u8]) -> Result<(usize, Duration)> {
        self.require_input("tread")?;
        self.rawmidi.tread(buffer)
    }

    fn require_input(&self, op: &'static str) -> Result<()> {
        if !self.is_input {
            return Err(Error::WrongDirection {
                op,
                stream: Stream::Output.as_str(),
            });
        }
        Ok(())
    }

    pub fn endpoint_info(&self) -> Result<UmpEndpointInfo> {
        self.rawmidi.ump_endpoint_info()
    }

    /// Fills `info` for the block id set with [`UmpBlockInfo::set_block_id`].
    pub fn block_info(&self, info: &mut UmpBlockInfo) -> Result<()> {
        self.rawmidi.ump_block_info(info)
    }
}

impl UmpPair {
    /// Closes whichever handles are present, returning the first error.
    pub fn close(self) -> Result<()> {
        let input = self.input.map(Ump::close).unwrap_or(Ok(()));
        let output = self.output.map(Ump::close).unwrap_or(Ok(()));
        input.and(output)
    }
}

/// Lists UMP devices that can be passed to [`Ump::open`].
pub fn list_devices() -> Result<Vec<String>> {
    rawmidi::list_ump_devices()
}
