//! The file plugin: a PCM that forwards everything to a slave PCM and mirrors every frame the
//! slave transfers into a file.

use super::area;
use super::{
    Format, HwParams, MmapAreas, Pcm, PcmInfo, PcmSetup, PcmState, PcmStatus, PcmStream,
};
use crate::rawmidi::PollFd;
use crate::{Error, Result};

use log::{debug, info, warn};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::path::PathBuf;

/// Where mirrored frames go.
pub enum MirrorTarget {
    /// Created, or truncated if it exists.
    Path(PathBuf),
    /// A descriptor owned by the caller. It is duplicated, so the caller's copy stays open.
    Fd(RawFd),
    File(File),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MirrorFormat {
    /// Frames exactly as transferred.
    Raw,
    /// A WAV file whose header follows the slave's setup.
    Wav,
}

type WavFileWriter = hound::WavWriter<BufWriter<File>>;

enum Sink {
    Raw(File),
    Wav {
        pending: Option<File>,
        writer: Option<WavFileWriter>,
    },
}

pub struct FilePcm<S: Pcm = Box<dyn Pcm>> {
    slave: S,
    close_slave: bool,
    description: String,
    sink: Sink,
    position: u64,
}

fn open_target(target: MirrorTarget) -> Result<(File, String)> {
    match target {
        MirrorTarget::Path(path) => {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            Ok((file, format!("file={}", path.display())))
        }
        MirrorTarget::Fd(fd) => {
            if fd < 0 {
                return Err(Error::invalid(format!("bad file descriptor {}", fd)));
            }
            // SAFETY: dup only reads the descriptor table; an invalid fd makes it fail.
            let owned = unsafe { libc::dup(fd) };
            if owned < 0 {
                return Err(io::Error::last_os_error().into());
            }
            // SAFETY: `owned` is a fresh descriptor nothing else refers to.
            let file = unsafe { File::from_raw_fd(owned) };
            Ok((file, format!("fd={}", fd)))
        }
        MirrorTarget::File(file) => {
            let description = format!("fd={}", file.as_raw_fd());
            Ok((file, description))
        }
    }
}

fn wav_spec(setup: &PcmSetup) -> io::Result<hound::WavSpec> {
    let (bits_per_sample, sample_format) = match setup.format {
        Format::S8 | Format::U8 => (8, hound::SampleFormat::Int),
        Format::S16Le | Format::S16Be | Format::U16Le | Format::U16Be => {
            (16, hound::SampleFormat::Int)
        }
        Format::S32Le | Format::S32Be => (32, hound::SampleFormat::Int),
        Format::FloatLe | Format::FloatBe => (32, hound::SampleFormat::Float),
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} cannot be stored in a WAV mirror", other.name()),
            ))
        }
    };
    Ok(hound::WavSpec {
        channels: setup.channels as u16,
        sample_rate: setup.rate,
        bits_per_sample,
        sample_format,
    })
}

fn wav_error(e: hound::Error) -> io::Error {
    match e {
        hound::Error::IoError(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other.to_string()),
    }
}

fn write_wav_samples(writer: &mut WavFileWriter, format: Format, bytes: &[u8]) -> io::Result<()> {
    let sample_bytes = format.sample_bytes();
    for s in bytes.chunks_exact(sample_bytes) {
        let written = match format {
            Format::S8 => writer.write_sample(s[0] as i8),
            Format::U8 => writer.write_sample((s[0] ^ 0x80) as i8),
            Format::S16Le => writer.write_sample(i16::from_le_bytes([s[0], s[1]])),
            Format::S16Be => writer.write_sample(i16::from_be_bytes([s[0], s[1]])),
            Format::U16Le => writer.write_sample((u16::from_le_bytes([s[0], s[1]]) ^ 0x8000) as i16),
            Format::U16Be => writer.write_sample((u16::from_be_bytes([s[0], s[1]]) ^ 0x8000) as i16),
            Format::S32Le => writer.write_sample(i32::from_le_bytes([s[0], s[1], s[2], s[3]])),
            Format::S32Be => writer.write_sample(i32::from_be_bytes([s[0], s[1], s[2], s[3]])),
            Format::FloatLe => {
                writer.write_sample(f32::from_bits(u32::from_le_bytes([s[0], s[1], s[2], s[3]])))
            }
            Format::FloatBe => {
                writer.write_sample(f32::from_bits(u32::from_be_bytes([s[0], s[1], s[2], s[3]])))
            }
            _ => unreachable!("rejected by wav_spec"),
        };
        written.map_err(wav_error)?;
    }
    Ok(())
}

impl<S: Pcm> FilePcm<S> {
    /// Wraps `slave`. With `close_slave` unset, [`FilePcm::close`] hands the slave back instead
    /// of closing it. If the mirror cannot be opened an owned slave is closed before returning.
    pub fn open(
        slave: S,
        target: MirrorTarget,
        format: MirrorFormat,
        close_slave: bool,
    ) -> Result<Self> {
        let (file, description) = match open_target(target) {
            Ok(opened) => opened,
            Err(e) => {
                if close_slave {
                    if let Err(close_err) = Box::new(slave).close() {
                        warn!("closing slave after failed open: {}", close_err);
                    }
                }
                return Err(e);
            }
        };
        info!("mirroring {} PCM {} to {}", slave.stream().as_str(), slave.name(), description);
        let sink = match format {
            MirrorFormat::Raw => Sink::Raw(file),
            MirrorFormat::Wav => Sink::Wav {
                pending: Some(file),
                writer: None,
            },
        };
        Ok(FilePcm {
            slave,
            close_slave,
            description,
            sink,
            position: 0,
        })
    }

    pub fn slave(&self) -> &S {
        &self.slave
    }

    pub fn slave_mut(&mut self) -> &mut S {
        &mut self.slave
    }

    /// Bytes of audio in the mirror up to its current write position.
    pub fn mirrored_bytes(&self) -> u64 {
        self.position
    }

    fn slave_setup(&self, op: &'static str) -> Result<PcmSetup> {
        self.slave.setup().ok_or(Error::BadState {
            op,
            state: self.slave.state().as_str(),
        })
    }

    fn write_mirror(&mut self, setup: &PcmSetup, bytes: &[u8]) -> io::Result<()> {
        match &mut self.sink {
            Sink::Raw(file) => file.write_all(bytes)?,
            Sink::Wav { pending, writer } => {
                if writer.is_none() {
                    let spec = wav_spec(setup)?;
                    let file = pending.take().ok_or_else(|| {
                        io::Error::new(io::ErrorKind::Other, "WAV mirror already finalized")
                    })?;
                    debug!("starting WAV mirror {:?}", spec);
                    *writer = Some(hound::WavWriter::new(BufWriter::new(file), spec).map_err(wav_error)?);
                }
                if let Some(writer) = writer.as_mut() {
                    write_wav_samples(writer, setup.format, bytes)?;
                }
            }
        }
        self.position += bytes.len() as u64;
        Ok(())
    }

    /// Mirrors the bytes of `frames` frames the slave already transferred.
    fn mirror(&mut self, setup: &PcmSetup, frames: usize, bytes: &[u8]) -> Result<()> {
        self.write_mirror(setup, bytes)
            .map_err(|source| Error::Mirror { frames, source })
    }

    /// Copies `frames` frames of the slave's ring starting at `offset`, splitting at the ring end.
    fn mirror_ring(&mut self, setup: &PcmSetup, mut offset: usize, frames: usize) -> Result<()> {
        let sample_bytes = setup.format.sample_bytes();
        let mut xfer = 0;
        while xfer < frames {
            let chunk = (frames - xfer).min(setup.buffer_size - offset);
            let mut bytes = Vec::with_capacity(setup.frames_to_bytes(chunk));
            {
                let mapped = self.slave.mmap_areas()?;
                area::copy_areas_interleaved(
                    mapped.data,
                    mapped.areas,
                    offset,
                    chunk,
                    sample_bytes,
                    &mut bytes,
                );
            }
            self.mirror(setup, frames, &bytes)?;
            offset += chunk;
            if offset == setup.buffer_size {
                offset = 0;
            }
            xfer += chunk;
        }
        Ok(())
    }

    /// Finishes the mirror. Returns the slave if it was not ours to close.
    pub fn close(self) -> Result<Option<S>> {
        let FilePcm {
            slave,
            close_slave,
            description,
            sink,
            position,
        } = self;

        let finished = match sink {
            Sink::Raw(mut file) => file.flush().map_err(Error::from),
            Sink::Wav { writer, .. } => match writer {
                Some(writer) => writer.finalize().map_err(Error::from),
                None => Ok(()),
            },
        };

        // The slave is closed even when the mirror failed; the mirror error wins.
        let slave = if close_slave {
            let closed = Box::new(slave).close();
            finished?;
            closed?;
            None
        } else {
            finished?;
            Some(slave)
        };
        info!("closed mirror {} after {} bytes", description, position);
        Ok(slave)
    }
}

impl<S: Pcm> Pcm for FilePcm<S> {
    fn name(&self) -> &str {
        self.slave.name()
    }

    fn stream(&self) -> PcmStream {
        self.slave.stream()
    }

    fn info(&self) -> Result<PcmInfo> {
        self.slave.info()
    }

    fn hw_params(&mut self, params: &HwParams) -> Result<()> {
        self.slave.hw_params(params)
    }

    fn setup(&self) -> Option<PcmSetup> {
        self.slave.setup()
    }

    fn nonblock(&mut self, nonblock: bool) -> Result<()> {
        self.slave.nonblock(nonblock)
    }

    fn status(&self) -> Result<PcmStatus> {
        self.slave.status()
    }

    fn state(&self) -> PcmState {
        self.slave.state()
    }

    fn delay(&self) -> Result<isize> {
        self.slave.delay()
    }

    fn prepare(&mut self) -> Result<()> {
        self.slave.prepare()
    }

    fn start(&mut self) -> Result<()> {
        self.slave.start()
    }

    fn stop(&mut self) -> Result<()> {
        self.slave.stop()
    }

    fn drain(&mut self) -> Result<()> {
        self.slave.drain()
    }

    fn pause(&mut self, enable: bool) -> Result<()> {
        self.slave.pause(enable)
    }

    fn rewind(&mut self, frames: usize) -> Result<usize> {
        let rewound = self.slave.rewind(frames)?;
        if rewound == 0 {
            return Ok(0);
        }
        let bytes = self.slave_setup("rewind")?.frames_to_bytes(rewound) as i64;
        match &mut self.sink {
            Sink::Raw(file) => {
                file.seek(SeekFrom::Current(-bytes))
                    .map_err(|source| Error::Mirror {
                        frames: rewound,
                        source,
                    })?;
                self.position = self.position.saturating_sub(bytes as u64);
            }
            Sink::Wav { .. } => {
                warn!("WAV mirror cannot unwind {} rewound frames", rewound);
            }
        }
        Ok(rewound)
    }

    fn writei(&mut self, buffer: &[u8]) -> Result<usize> {
        let n = self.slave.writei(buffer)?;
        if n > 0 {
            let setup = self.slave_setup("writei")?;
            let bytes = setup.frames_to_bytes(n);
            self.mirror(&setup, n, &buffer[..bytes])?;
        }
        Ok(n)
    }

    fn writen(&mut self, buffers: &[&[u8]]) -> Result<usize> {
        let n = self.slave.writen(buffers)?;
        if n > 0 {
            let setup = self.slave_setup("writen")?;
            let mut bytes = Vec::with_capacity(setup.frames_to_bytes(n));
            area::interleave(buffers, n, setup.format.sample_bytes(), &mut bytes);
            self.mirror(&setup, n, &bytes)?;
        }
        Ok(n)
    }

    fn readi(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let n = self.slave.readi(buffer)?;
        if n > 0 {
            let setup = self.slave_setup("readi")?;
            let bytes = setup.frames_to_bytes(n);
            self.mirror(&setup, n, &buffer[..bytes])?;
        }
        Ok(n)
    }

    fn readn(&mut self, buffers: &mut [&mut [u8]]) -> Result<usize> {
        let n = self.slave.readn(buffers)?;
        if n > 0 {
            let setup = self.slave_setup("readn")?;
            let views: Vec<&[u8]> = buffers.iter().map(|b| &**b).collect();
            let mut bytes = Vec::with_capacity(setup.frames_to_bytes(n));
            area::interleave(&views, n, setup.format.sample_bytes(), &mut bytes);
            self.mirror(&setup, n, &bytes)?;
        }
        Ok(n)
    }

    fn avail_update(&mut self) -> Result<usize> {
        self.slave.avail_update()
    }

    fn appl_ptr(&self) -> usize {
        self.slave.appl_ptr()
    }

    fn mmap_areas(&self) -> Result<MmapAreas<'_>> {
        self.slave.mmap_areas()
    }

    fn mmap_buffer_mut(&mut self) -> Result<&mut [u8]> {
        self.slave.mmap_buffer_mut()
    }

    fn mmap_forward(&mut self, frames: usize) -> Result<usize> {
        let setup = self.slave_setup("mmap_forward")?;
        let offset = self.slave.appl_ptr() % setup.buffer_size;
        let n = self.slave.mmap_forward(frames)?;
        if n > 0 {
            self.mirror_ring(&setup, offset, n)?;
        }
        Ok(n)
    }

    fn poll_descriptors(&self) -> Vec<PollFd> {
        self.slave.poll_descriptors()
    }

    fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "File PCM ({})", self.description)?;
        if let Some(setup) = self.slave.setup() {
            writeln!(out, "Its setup is:")?;
            write!(out, "{}", setup)?;
        }
        write!(out, "Slave: ")?;
        self.slave.dump(out)
    }

    fn close(self: Box<Self>) -> Result<()> {
        FilePcm::close(*self).map(|_| ())
    }
}
