use sndtap::{
    pcm::{Access, MmapAreas, PcmInfo, PcmSetup, PcmState, PcmStatus},
    rawmidi::PollFd,
    Error, FilePcm, Format, HwParams, MemoryPcm, MirrorFormat, MirrorTarget, Pcm, PcmConfig,
    PcmMode, PcmStream,
};

use std::fmt;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A memory PCM that counts how often it is closed, optionally failing the close.
struct CountingPcm {
    inner: MemoryPcm,
    closes: Arc<AtomicUsize>,
    fail_close: bool,
}

impl CountingPcm {
    fn new(inner: MemoryPcm) -> (Self, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let pcm = CountingPcm {
            inner,
            closes: Arc::clone(&closes),
            fail_close: false,
        };
        (pcm, closes)
    }
}

impl Pcm for CountingPcm {
    fn name(&self) -> &str {
        self.inner.name()
    }
    fn stream(&self) -> PcmStream {
        self.inner.stream()
    }
    fn info(&self) -> sndtap::Result<PcmInfo> {
        self.inner.info()
    }
    fn hw_params(&mut self, params: &HwParams) -> sndtap::Result<()> {
        self.inner.hw_params(params)
    }
    fn setup(&self) -> Option<PcmSetup> {
        self.inner.setup()
    }
    fn nonblock(&mut self, nonblock: bool) -> sndtap::Result<()> {
        self.inner.nonblock(nonblock)
    }
    fn status(&self) -> sndtap::Result<PcmStatus> {
        self.inner.status()
    }
    fn state(&self) -> PcmState {
        self.inner.state()
    }
    fn delay(&self) -> sndtap::Result<isize> {
        self.inner.delay()
    }
    fn prepare(&mut self) -> sndtap::Result<()> {
        self.inner.prepare()
    }
    fn start(&mut self) -> sndtap::Result<()> {
        self.inner.start()
    }
    fn stop(&mut self) -> sndtap::Result<()> {
        self.inner.stop()
    }
    fn drain(&mut self) -> sndtap::Result<()> {
        self.inner.drain()
    }
    fn pause(&mut self, enable: bool) -> sndtap::Result<()> {
        self.inner.pause(enable)
    }
    fn rewind(&mut self, frames: usize) -> sndtap::Result<usize> {
        self.inner.rewind(frames)
    }
    fn writei(&mut self, buffer: &[u8]) -> sndtap::Result<usize> {
        self.inner.writei(buffer)
    }
    fn writen(&mut self, buffers: &[&[u8]]) -> sndtap::Result<usize> {
        self.inner.writen(buffers)
    }
    fn readi(&mut self, buffer: &mut [u8]) -> sndtap::Result<usize> {
        self.inner.readi(buffer)
    }
    fn readn(&mut self, buffers: &mut [&mut [u8]]) -> sndtap::Result<usize> {
        self.inner.readn(buffers)
    }
    fn avail_update(&mut self) -> sndtap::Result<usize> {
        self.inner.avail_update()
    }
    fn appl_ptr(&self) -> usize {
        self.inner.appl_ptr()
    }
    fn mmap_areas(&self) -> sndtap::Result<MmapAreas<'_>> {
        self.inner.mmap_areas()
    }
    fn mmap_buffer_mut(&mut self) -> sndtap::Result<&mut [u8]> {
        self.inner.mmap_buffer_mut()
    }
    fn mmap_forward(&mut self, frames: usize) -> sndtap::Result<usize> {
        self.inner.mmap_forward(frames)
    }
    fn poll_descriptors(&self) -> Vec<PollFd> {
        self.inner.poll_descriptors()
    }
    fn dump(&self, out: &mut dyn fmt::Write) -> fmt::Result {
        self.inner.dump(out)
    }
    fn close(self: Box<Self>) -> sndtap::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(Error::Unsupported("close"));
        }
        Box::new(self.inner).close()
    }
}

fn params(access: Access, channels: usize, buffer_size: usize) -> HwParams {
    HwParams {
        access,
        format: Format::S16Le,
        channels,
        rate: 8000,
        buffer_size,
        period_size: 2,
    }
}

fn ramp(start: u8, len: usize) -> Vec<u8> {
    (0..len).map(|i| start.wrapping_add(i as u8)).collect()
}

fn tap(stream: PcmStream, params: &HwParams, path: &Path) -> FilePcm<MemoryPcm> {
    let mut slave = MemoryPcm::memory(stream);
    slave.hw_params(params).unwrap();
    slave.prepare().unwrap();
    FilePcm::open(
        slave,
        MirrorTarget::Path(path.to_path_buf()),
        MirrorFormat::Raw,
        false,
    )
    .unwrap()
}

#[test]
fn writei_mirrors_transferred_frames() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tap.raw");
    let mut pcm = tap(PcmStream::Playback, &params(Access::RwInterleaved, 2, 8), &path);

    // Only 8 of the 10 frames fit in the slave's ring.
    let data = ramp(0, 40);
    assert_eq!(pcm.writei(&data).unwrap(), 8);
    assert_eq!(pcm.mirrored_bytes(), 32);
    assert_eq!(pcm.state(), PcmState::Running);

    assert!(matches!(pcm.writei(&data), Err(Error::WouldBlock)));
    assert_eq!(pcm.mirrored_bytes(), 32);

    let slave = pcm.close().unwrap().expect("slave handed back");
    assert_eq!(slave.appl_ptr(), 8);
    assert_eq!(fs::read(&path).unwrap(), &data[..32]);
}

#[test]
fn writen_mirrors_interleaved() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tap.raw");
    let mut pcm = tap(PcmStream::Playback, &params(Access::RwNonInterleaved, 2, 8), &path);

    let left = [1u8, 1, 2, 2, 3, 3];
    let right = [7u8, 7, 8, 8, 9, 9];
    assert_eq!(pcm.writen(&[&left, &right]).unwrap(), 3);
    pcm.close().unwrap();
    assert_eq!(
        fs::read(&path).unwrap(),
        vec![1, 1, 7, 7, 2, 2, 8, 8, 3, 3, 9, 9]
    );
}

#[test]
fn mmap_commit_mirrors_across_ring_wrap() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tap.raw");
    let mut pcm = tap(PcmStream::Playback, &params(Access::MmapInterleaved, 1, 8), &path);

    let first = ramp(0, 12);
    pcm.mmap_buffer_mut().unwrap()[..12].copy_from_slice(&first);
    assert_eq!(pcm.mmap_forward(6).unwrap(), 6);
    assert_eq!(pcm.slave_mut().consume(6).unwrap(), first);

    // Frames 6..11 land at ring offsets 6, 7, 0, 1, 2.
    let second = ramp(100, 10);
    {
        let ring = pcm.mmap_buffer_mut().unwrap();
        ring[12..16].copy_from_slice(&second[..4]);
        ring[..6].copy_from_slice(&second[4..]);
    }
    assert_eq!(pcm.mmap_forward(5).unwrap(), 5);
    assert_eq!(pcm.mirrored_bytes(), 22);

    pcm.close().unwrap();
    let mut expected = first;
    expected.extend_from_slice(&second);
    assert_eq!(fs::read(&path).unwrap(), expected);
}

#[test]
fn rewind_moves_mirror_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tap.raw");
    let mut pcm = tap(PcmStream::Playback, &params(Access::RwInterleaved, 1, 8), &path);

    assert_eq!(pcm.writei(&ramp(0, 12)).unwrap(), 6);
    pcm.slave_mut().consume(2).unwrap();
    // Only the four unplayed frames can be taken back.
    assert_eq!(pcm.rewind(10).unwrap(), 4);
    assert_eq!(pcm.mirrored_bytes(), 4);
    assert_eq!(pcm.appl_ptr(), 2);

    assert_eq!(pcm.writei(&[0xaa; 4]).unwrap(), 2);
    assert_eq!(pcm.mirrored_bytes(), 8);
    pcm.close().unwrap();

    let mut expected = ramp(0, 12);
    expected[4..8].copy_from_slice(&[0xaa; 4]);
    assert_eq!(fs::read(&path).unwrap(), expected);
}

#[test]
fn capture_mirrors_read_frames() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cap.raw");
    let mut pcm = tap(PcmStream::Capture, &params(Access::RwInterleaved, 2, 8), &path);
    pcm.start().unwrap();
    assert_eq!(pcm.slave_mut().feed(&ramp(50, 12)).unwrap(), 3);

    let mut buf = [0u8; 32];
    assert_eq!(pcm.readi(&mut buf).unwrap(), 3);
    assert_eq!(&buf[..12], &ramp(50, 12)[..]);
    assert_eq!(pcm.mirrored_bytes(), 12);
    pcm.close().unwrap();
    assert_eq!(fs::read(&path).unwrap(), ramp(50, 12));
}

#[test]
fn wav_mirror_takes_header_from_slave() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tap.wav");
    let mut slave = MemoryPcm::null(PcmStream::Playback);
    slave.hw_params(&params(Access::RwInterleaved, 2, 64)).unwrap();
    slave.prepare().unwrap();
    let mut pcm = FilePcm::open(
        slave,
        MirrorTarget::Path(path.clone()),
        MirrorFormat::Wav,
        true,
    )
    .unwrap();

    let samples: Vec<i16> = vec![0, -1, 300, -300, i16::MAX, i16::MIN];
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes().to_vec()).collect();
    assert_eq!(pcm.writei(&bytes).unwrap(), 3);
    assert!(pcm.close().unwrap().is_none());

    let mut reader = hound::WavReader::open(&path).unwrap();
    let spec = reader.spec();
    assert_eq!(spec.channels, 2);
    assert_eq!(spec.sample_rate, 8000);
    assert_eq!(spec.bits_per_sample, 16);
    let read: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(read, samples);
}

#[test]
fn failed_mirror_write_reports_transferred_frames() {
    let mut slave = MemoryPcm::null(PcmStream::Playback);
    slave.hw_params(&params(Access::RwInterleaved, 1, 16)).unwrap();
    slave.prepare().unwrap();
    let mut pcm = FilePcm::open(
        slave,
        MirrorTarget::Path("/dev/full".into()),
        MirrorFormat::Raw,
        true,
    )
    .unwrap();

    match pcm.writei(&ramp(0, 8)) {
        Err(Error::Mirror { frames, source }) => {
            assert_eq!(frames, 4);
            assert_eq!(source.raw_os_error(), Some(libc::ENOSPC));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(pcm.appl_ptr(), 4);
}

#[test]
fn unopenable_mirror_closes_owned_slave_once() {
    let (slave, closes) = CountingPcm::new(MemoryPcm::null(PcmStream::Playback));
    let err = FilePcm::open(
        slave,
        MirrorTarget::Path("/nonexistent/dir/tap.raw".into()),
        MirrorFormat::Raw,
        true,
    )
    .err()
    .expect("must fail");
    assert_eq!(err.errno(), -libc::ENOENT);
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn close_closes_owned_slave_once() {
    let dir = tempfile::tempdir().unwrap();
    let (slave, closes) = CountingPcm::new(MemoryPcm::null(PcmStream::Playback));
    let pcm = FilePcm::open(
        slave,
        MirrorTarget::Path(dir.path().join("a.raw")),
        MirrorFormat::Raw,
        true,
    )
    .unwrap();
    assert!(pcm.close().unwrap().is_none());
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    // Through the trait object as well.
    let (slave, closes) = CountingPcm::new(MemoryPcm::null(PcmStream::Playback));
    let pcm: Box<dyn Pcm> = Box::new(
        FilePcm::open(
            slave,
            MirrorTarget::Path(dir.path().join("b.raw")),
            MirrorFormat::Raw,
            true,
        )
        .unwrap(),
    );
    pcm.close().unwrap();
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn borrowed_slave_is_handed_back_unclosed() {
    let dir = tempfile::tempdir().unwrap();
    let (slave, closes) = CountingPcm::new(MemoryPcm::null(PcmStream::Playback));
    let pcm = FilePcm::open(
        slave,
        MirrorTarget::Path(dir.path().join("tap.raw")),
        MirrorFormat::Raw,
        false,
    )
    .unwrap();
    let slave = pcm.close().unwrap().expect("slave handed back");
    assert_eq!(closes.load(Ordering::SeqCst), 0);
    Box::new(slave).close().unwrap();
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn config_closes_slave_when_mirror_cannot_open() {
    let closes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&closes);
    let config: PcmConfig =
        "[pcm.tap]\ntype = \"file\"\nsname = \"counted\"\nfile = \"/nonexistent/dir/tap.raw\"\n"
            .parse()
            .unwrap();
    let config = config.register_slave("counted", move |stream| {
        let pcm = CountingPcm {
            inner: MemoryPcm::null(stream),
            closes: Arc::clone(&counter),
            fail_close: false,
        };
        Ok(Box::new(pcm) as Box<dyn Pcm>)
    });

    let err = config
        .open("tap", PcmStream::Playback, PcmMode::default())
        .err()
        .expect("must fail");
    assert_eq!(err.errno(), -libc::ENOENT);
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    // A slave opened directly is closed exactly once with its plugin.
    let dir = tempfile::tempdir().unwrap();
    let text = format!(
        "[pcm.tap]\ntype = \"file\"\nsname = \"counted\"\nfile = {:?}\n",
        dir.path().join("tap.raw").display().to_string()
    );
    let counter = Arc::clone(&closes);
    let config = text.parse::<PcmConfig>().unwrap().register_slave("counted", move |stream| {
        let pcm = CountingPcm {
            inner: MemoryPcm::null(stream),
            closes: Arc::clone(&counter),
            fail_close: false,
        };
        Ok(Box::new(pcm) as Box<dyn Pcm>)
    });
    let pcm = config
        .open("tap", PcmStream::Playback, PcmMode::default())
        .unwrap();
    pcm.close().unwrap();
    assert_eq!(closes.load(Ordering::SeqCst), 2);
}

#[test]
fn wav_mirror_is_finalized_when_slave_close_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tap.wav");
    let mut inner = MemoryPcm::null(PcmStream::Playback);
    inner.hw_params(&params(Access::RwInterleaved, 1, 16)).unwrap();
    inner.prepare().unwrap();
    let (mut slave, closes) = CountingPcm::new(inner);
    slave.fail_close = true;
    let mut pcm = FilePcm::open(slave, MirrorTarget::Path(path.clone()), MirrorFormat::Wav, true)
        .unwrap();
    assert_eq!(pcm.writei(&ramp(0, 8)).unwrap(), 4);

    assert!(matches!(pcm.close(), Err(Error::Unsupported("close"))));
    assert_eq!(closes.load(Ordering::SeqCst), 1);
    let reader = hound::WavReader::open(&path).unwrap();
    assert_eq!(reader.len(), 4);
}

#[test]
fn unsupported_wav_format_keeps_reporting_the_format() {
    let dir = tempfile::tempdir().unwrap();
    let mut slave = MemoryPcm::null(PcmStream::Playback);
    slave
        .hw_params(&HwParams {
            format: Format::MuLaw,
            ..params(Access::RwInterleaved, 1, 16)
        })
        .unwrap();
    slave.prepare().unwrap();
    let mut pcm = FilePcm::open(
        slave,
        MirrorTarget::Path(dir.path().join("tap.wav")),
        MirrorFormat::Wav,
        true,
    )
    .unwrap();

    for _ in 0..2 {
        match pcm.writei(&[0x7f; 4]) {
            Err(Error::Mirror { frames, source }) => {
                assert_eq!(frames, 4);
                assert_eq!(source.kind(), ErrorKind::InvalidInput);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

#[test]
fn rewind_position_is_relative_to_mirror_start() {
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&[0xee; 10]).unwrap();
    let mut slave = MemoryPcm::memory(PcmStream::Playback);
    slave.hw_params(&params(Access::RwInterleaved, 1, 8)).unwrap();
    slave.prepare().unwrap();
    let mut pcm = FilePcm::open(slave, MirrorTarget::File(file), MirrorFormat::Raw, false).unwrap();

    assert_eq!(pcm.writei(&ramp(0, 8)).unwrap(), 4);
    assert_eq!(pcm.mirrored_bytes(), 8);
    assert_eq!(pcm.rewind(2).unwrap(), 2);
    assert_eq!(pcm.mirrored_bytes(), 4);
}

#[test]
fn readn_mirrors_interleaved_capture() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cap.raw");
    let mut pcm = tap(PcmStream::Capture, &params(Access::RwNonInterleaved, 2, 8), &path);
    pcm.start().unwrap();
    let captured = ramp(10, 12);
    assert_eq!(pcm.slave_mut().feed(&captured).unwrap(), 3);

    let mut left = [0u8; 6];
    let mut right = [0u8; 6];
    {
        let mut buffers: [&mut [u8]; 2] = [&mut left, &mut right];
        assert_eq!(pcm.readn(&mut buffers).unwrap(), 3);
    }
    assert_eq!(left, [10, 11, 14, 15, 18, 19]);
    assert_eq!(right, [12, 13, 16, 17, 20, 21]);
    pcm.close().unwrap();
    assert_eq!(fs::read(&path).unwrap(), captured);
}

#[test]
fn mmap_capture_mirrors_across_ring_wrap() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cap.raw");
    let mut pcm = tap(PcmStream::Capture, &params(Access::MmapInterleaved, 1, 4), &path);
    pcm.start().unwrap();

    assert_eq!(pcm.slave_mut().feed(&ramp(0, 6)).unwrap(), 3);
    assert_eq!(pcm.mmap_forward(3).unwrap(), 3);
    // The next three frames sit at ring offsets 3, 0, 1.
    assert_eq!(pcm.slave_mut().feed(&ramp(6, 6)).unwrap(), 3);
    assert_eq!(pcm.mmap_forward(3).unwrap(), 3);
    assert_eq!(pcm.mirrored_bytes(), 12);

    pcm.close().unwrap();
    assert_eq!(fs::read(&path).unwrap(), ramp(0, 12));
}

#[test]
fn control_operations_forward_to_slave() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tap.raw");
    let mut pcm = tap(PcmStream::Playback, &params(Access::RwInterleaved, 1, 8), &path);

    assert_eq!(pcm.name(), pcm.slave().name());
    assert_eq!(pcm.setup(), pcm.slave().setup());
    pcm.start().unwrap();
    pcm.writei(&ramp(0, 6)).unwrap();
    assert_eq!(pcm.delay().unwrap(), 3);
    assert_eq!(pcm.avail_update().unwrap(), 5);
    pcm.pause(true).unwrap();
    assert_eq!(pcm.status().unwrap().state, PcmState::Paused);
    pcm.pause(false).unwrap();
    pcm.stop().unwrap();
    assert_eq!(pcm.state(), PcmState::Setup);

    let mut text = String::new();
    pcm.dump(&mut text).unwrap();
    assert!(text.starts_with(&format!("File PCM (file={})", path.display())));
    assert!(text.contains("Slave: Memory PCM"));
}

#[test]
fn config_builds_tap_over_null() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tap.raw");
    let text = format!(
        "[pcm.tap]\ntype = \"file\"\nsname = \"sink\"\nfile = {:?}\n\n[pcm.sink]\ntype = \"null\"\n",
        path.display().to_string()
    );
    let config: PcmConfig = text.parse().unwrap();
    let mut names: Vec<&str> = config.names().collect();
    names.sort();
    assert_eq!(names, vec!["sink", "tap"]);

    let mut pcm = config
        .open("tap", PcmStream::Playback, PcmMode { nonblock: true })
        .unwrap();
    pcm.hw_params(&params(Access::RwInterleaved, 2, 4)).unwrap();
    pcm.prepare().unwrap();
    for _ in 0..3 {
        assert_eq!(pcm.writei(&ramp(0, 16)).unwrap(), 4);
    }
    pcm.close().unwrap();
    assert_eq!(fs::read(&path).unwrap().len(), 48);
}
