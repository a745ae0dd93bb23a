//! Raw-MIDI handles backed by the kernel's device nodes.
//!
//! Only plain reads and writes touch the device; everything that would need an ioctl is either
//! derived from `/proc/asound` or reported as unsupported.

use super::{
    proc_info, OpenMode, PollFd, RawMidi, RawMidiInfo, RawMidiParams, RawMidiStatus, Stream,
    INFO_INPUT, INFO_OUTPUT, INFO_UMP, POLLERR, POLLIN, POLLOUT,
};
use crate::ump::info::{UmpBlockInfo, UmpEndpointInfo};
use crate::{Error, Result};

use log::{debug, trace};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const DEV_SND: &str = "/dev/snd";
const PROC_ASOUND: &str = "/proc/asound";

/// Card and device numbers parsed from `hw:C` or `hw:C,D[,S]`.
pub fn parse_hw_name(name: &str) -> Result<(i32, i32)> {
    let spec = name
        .strip_prefix("hw:")
        .ok_or_else(|| Error::invalid(format!("unknown rawmidi name {:?}", name)))?;
    let mut parts = spec.split(',');
    let parse = |s: Option<&str>| -> Result<Option<i32>> {
        match s {
            None => Ok(None),
            Some(s) => s
                .trim()
                .parse::<i32>()
                .ok()
                .filter(|n| *n >= 0)
                .map(Some)
                .ok_or_else(|| Error::invalid(format!("bad rawmidi name {:?}", name))),
        }
    };
    let card = parse(parts.next())?.ok_or_else(|| Error::invalid("missing card number"))?;
    let device = parse(parts.next())?.unwrap_or(0);
    Ok((card, device))
}

fn node_path(card: i32, device: i32, ump: bool) -> PathBuf {
    let kind = if ump { "ump" } else { "midi" };
    Path::new(DEV_SND).join(format!("{}C{}D{}", kind, card, device))
}

fn proc_path(card: i32, device: i32) -> PathBuf {
    Path::new(PROC_ASOUND).join(format!("card{}/midi{}", card, device))
}

/// Lists the `hw:C,D` names of UMP device nodes present under `/dev/snd`.
pub fn list_ump_devices() -> Result<Vec<String>> {
    let mut devices: Vec<(i32, i32)> = Vec::new();
    let entries = match fs::read_dir(DEV_SND) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let file_name = entry?.file_name();
        let file_name = file_name.to_string_lossy();
        if let Some(rest) = file_name.strip_prefix("umpC") {
            let mut parts = rest.splitn(2, 'D');
            let card = parts.next().and_then(|c| c.parse::<i32>().ok());
            let device = parts.next().and_then(|d| d.parse::<i32>().ok());
            if let (Some(card), Some(device)) = (card, device) {
                devices.push((card, device));
            }
        }
    }
    devices.sort_unstable();
    Ok(devices
        .into_iter()
        .map(|(card, device)| format!("hw:{},{}", card, device))
        .collect())
}

pub struct HwRawMidi {
    name: String,
    stream: Stream,
    card: i32,
    device: i32,
    ump: bool,
    file: File,
    params: RawMidiParams,
    opened_at: Instant,
}

impl HwRawMidi {
    pub fn open(name: &str, stream: Stream, mode: OpenMode) -> Result<Self> {
        let (card, device) = parse_hw_name(name)?;
        let path = node_path(card, device, mode.ump);
        let mut options = OpenOptions::new();
        match stream {
            Stream::Input => options.read(true),
            Stream::Output => options.write(true).append(mode.append),
        };
        let mut flags = 0;
        if mode.nonblock {
            flags |= libc::O_NONBLOCK;
        }
        if mode.sync {
            flags |= libc::O_SYNC;
        }
        let file = options.custom_flags(flags).open(&path)?;
        debug!("opened {} ({}) as {}", name, stream.as_str(), path.display());

        Ok(HwRawMidi {
            name: name.to_string(),
            stream,
            card,
            device,
            ump: mode.ump,
            file,
            params: RawMidiParams::default(),
            opened_at: Instant::now(),
        })
    }

    fn proc_info(&self) -> Result<proc_info::ProcInfo> {
        let text = fs::read_to_string(proc_path(self.card, self.device))?;
        Ok(proc_info::parse(self.card, self.device, &text))
    }

    fn poll_events(&self) -> i16 {
        match self.stream {
            Stream::Input => POLLIN,
            Stream::Output => POLLOUT | POLLERR,
        }
    }
}

impl RawMidi for HwRawMidi {
    fn name(&self) -> &str {
        &self.name
    }

    fn stream(&self) -> Stream {
        self.stream
    }

    fn poll_descriptors_count(&self) -> usize {
        1
    }

    fn poll_descriptors(&self, pfds: &mut [PollFd]) -> usize {
        match pfds.first_mut() {
            Some(pfd) => {
                *pfd = PollFd {
                    fd: self.file.as_raw_fd(),
                    events: self.poll_events(),
                    revents: 0,
                };
                1
            }
            None => 0,
        }
    }

    fn poll_descriptors_revents(&self, pfds: &[PollFd]) -> Result<u16> {
        let pfd = pfds
            .first()
            .ok_or_else(|| Error::invalid("no poll descriptors"))?;
        Ok((pfd.revents & (self.poll_events() | POLLERR)) as u16)
    }

    fn nonblock(&mut self, nonblock: bool) -> Result<()> {
        let fd = self.file.as_raw_fd();
        // SAFETY: `fd` is owned by `self.file` and stays open for the duration of the calls.
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error().into());
        }
        let flags = if nonblock {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        // SAFETY: as above.
        if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(())
    }

    fn info(&self) -> Result<RawMidiInfo> {
        let mut flags = match self.stream {
            Stream::Input => INFO_INPUT,
            Stream::Output => INFO_OUTPUT,
        };
        if self.ump {
            flags |= INFO_UMP;
        }
        let name = match self.proc_info() {
            Ok(info) if !info.name.is_empty() => info.name,
            _ => node_path(self.card, self.device, self.ump)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        Ok(RawMidiInfo {
            card: self.card,
            device: self.device,
            subdevice: 0,
            flags,
            id: format!("{}C{}D{}", if self.ump { "ump" } else { "midi" }, self.card, self.device),
            name,
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
        Err(Error::Unsupported("status"))
    }

    fn drop_pending(&mut self) -> Result<()> {
        Err(Error::Unsupported("drop"))
    }

    fn drain(&mut self) -> Result<()> {
        match self.stream {
            // Nothing is queued on the host side of an input handle.
            Stream::Input => Ok(()),
            Stream::Output => Err(Error::Unsupported("drain")),
        }
    }

    fn write(&mut self, buffer: &[u8]) -> Result<usize> {
        let n = self.file.write(buffer).map_err(Error::from_io)?;
        trace!("{}: wrote {} bytes", self.name, n);
        Ok(n)
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let n = self.file.read(buffer).map_err(Error::from_io)?;
        trace!("{}: read {} bytes", self.name, n);
        Ok(n)
    }

    fn tread(&mut self, buffer: &mut [u8]) -> Result<(usize, Duration)> {
        let n = self.read(buffer)?;
        Ok((n, self.opened_at.elapsed()))
    }

    fn ump_endpoint_info(&self) -> Result<UmpEndpointInfo> {
        if !self.ump {
            return Err(Error::Unsupported("UMP endpoint info"));
        }
        self.proc_info()?
            .endpoint
            .ok_or(Error::Unsupported("UMP endpoint info"))
    }

    fn ump_block_info(&self, info: &mut UmpBlockInfo) -> Result<()> {
        if !self.ump {
            return Err(Error::Unsupported("UMP block info"));
        }
        let proc_info = self.proc_info()?;
        let block = proc_info
            .blocks
            .iter()
            .find(|b| b.block_id == info.block_id)
            .ok_or_else(|| Error::invalid(format!("no UMP block {}", info.block_id)))?;
        info.fill_from(self.card, self.device, block);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        debug!("closing {} ({})", self.name, self.stream.as_str());
        Ok(())
    }
}
