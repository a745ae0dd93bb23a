use sndtap::{
    rawmidi::OpenMode,
    ump::{
        info::{UmpBlockInfo, UmpDirection},
        packet::PacketReader,
    },
    Error, HwParams, PcmConfig, PcmMode, PcmStream, Ump,
};

use crossbeam_channel::{self as channel, Receiver};
use log::{debug, error, info, warn};
use std::convert::TryFrom;
use std::f32::consts::PI;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "sndtap")]
enum Opt {
    /// List UMP devices.
    List,
    /// Print endpoint and function block info.
    Info {
        #[structopt(short = "d", long = "device", default_value = "hw:0,0")]
        device: String,
    },
    /// Decode incoming UMP packets until interrupted.
    Dump {
        #[structopt(short = "d", long = "device", default_value = "hw:0,0")]
        device: String,
    },
    /// Play a test tone through a configured PCM.
    Tee {
        #[structopt(short = "c", long = "config", parse(from_os_str))]
        config_path: PathBuf,

        #[structopt(short = "p", long = "pcm")]
        pcm: String,

        #[structopt(short = "f", long = "frames", default_value = "48000")]
        frames: usize,

        #[structopt(short = "r", long = "rate", default_value = "48000")]
        rate: u32,
    },
}

fn list() -> sndtap::Result<()> {
    let devices = sndtap::list_ump_devices()?;
    if devices.is_empty() {
        println!("No UMP devices found");
    }
    for (i, device) in devices.iter().enumerate() {
        println!("{}: {}", i, device);
    }
    Ok(())
}

fn print_info(device: &str) -> sndtap::Result<()> {
    let pair = Ump::open(device, OpenMode::default(), true, false)?;
    let ump = match pair.input.as_ref() {
        Some(ump) => ump,
        None => return Err(Error::NotUmp(device.to_string())),
    };
    let endpoint = ump.endpoint_info()?;
    println!("{} ({})", endpoint.name(), ump.name());
    println!("  product id : {}", endpoint.product_id());
    println!("  version    : {:#06x}", endpoint.version());
    println!("  protocol   : {:#06x} (caps {:#06x})", endpoint.protocol(), endpoint.protocol_caps());
    for id in 0..endpoint.num_blocks() {
        let mut block = UmpBlockInfo::default();
        block.set_block_id(id);
        ump.block_info(&mut block)?;
        let direction = match UmpDirection::from_bits(block.direction()) {
            Some(direction) => format!("{:?}", direction),
            None => "?".to_string(),
        };
        println!(
            "  block {} \"{}\": {} groups {}-{} active {}",
            block.block_id(),
            block.name(),
            direction,
            block.first_group() + 1,
            block.first_group() + block.num_groups(),
            block.active()
        );
    }
    pair.close()
}

fn dump(device: &str, canceller: &Receiver<()>) -> sndtap::Result<()> {
    let pair = Ump::open(device, OpenMode::nonblocking(), true, false)?;
    let mut ump = match pair.input {
        Some(ump) => ump,
        None => return Err(Error::NotUmp(device.to_string())),
    };
    let mut reader = PacketReader::new();
    let mut buffer = [0u8; 256];
    loop {
        match ump.read(&mut buffer) {
            Ok(n) => reader.push(&buffer[..n]),
            Err(Error::WouldBlock) => thread::sleep(Duration::from_millis(1)),
            Err(e) => {
                let _ = ump.close();
                return Err(e);
            }
        }
        while let Some(packet) = reader.next_packet() {
            match packet.midi1_bytes() {
                Some((bytes, len)) => match wmidi::MidiMessage::try_from(&bytes[..len]) {
                    Ok(message) => info!("group {} {:?}", packet.group(), message),
                    Err(e) => warn!("undecodable MIDI 1.0 packet {:08x?}: {:?}", packet.words(), e),
                },
                None => debug!("type {:x} packet {:08x?}", packet.message_type(), packet.words()),
            }
        }

        if canceller.try_recv().is_ok() {
            debug!("Cancelling UMP dump");
            break;
        }
    }
    ump.close()
}

fn tee(
    config_path: PathBuf,
    name: &str,
    frames: usize,
    rate: u32,
    canceller: &Receiver<()>,
) -> sndtap::Result<()> {
    let config = PcmConfig::from_path(&config_path)?;
    let mut pcm = config.open(name, PcmStream::Playback, PcmMode::default())?;
    let params = HwParams {
        rate,
        ..Default::default()
    };
    pcm.hw_params(&params)?;
    pcm.prepare()?;

    let step = 2.0 * PI * 440.0 / rate as f32;
    let mut written = 0;
    let mut period = Vec::with_capacity(params.period_size * 4);
    while written < frames {
        let n = params.period_size.min(frames - written);
        period.clear();
        for i in written..written + n {
            let sample = ((i as f32 * step).sin() * 0.25 * i16::MAX as f32) as i16;
            period.extend_from_slice(&sample.to_le_bytes());
            period.extend_from_slice(&sample.to_le_bytes());
        }
        match pcm.writei(&period) {
            Ok(done) => written += done,
            Err(Error::WouldBlock) => {
                warn!("{} stopped accepting frames after {}", name, written);
                break;
            }
            Err(e) => {
                let _ = pcm.close();
                return Err(e);
            }
        }
        if canceller.try_recv().is_ok() {
            debug!("Cancelling tee after {} frames", written);
            break;
        }
    }
    info!("Wrote {} frames to {}", written, name);

    let mut text = String::new();
    if pcm.dump(&mut text).is_ok() {
        print!("{}", text);
    }
    pcm.drain()?;
    pcm.close()
}

fn main() {
    env_logger::init();

    let opt = Opt::from_args();

    // Set SIGINT handler.
    let (exit_tx, exit_rx) = channel::bounded(1);
    ctrlc::set_handler(move || {
        exit_tx.send(()).expect("Failed to send exit signal");
    })
    .expect("Error setting Ctrl-C handler");

    let result = match opt {
        Opt::List => list(),
        Opt::Info { device } => print_info(&device),
        Opt::Dump { device } => dump(&device, &exit_rx),
        Opt::Tee {
            config_path,
            pcm,
            frames,
            rate,
        } => tee(config_path, &pcm, frames, rate, &exit_rx),
    };
    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}
