mod error;
pub mod pcm;
pub mod rawmidi;
pub mod ump;

pub use error::{Error, Result};
pub use pcm::{
    FilePcm, Format, HwParams, MemoryPcm, MirrorFormat, MirrorTarget, Pcm, PcmConfig, PcmMode,
    PcmStream,
};
pub use ump::{list_devices as list_ump_devices, Ump, UmpPair};
