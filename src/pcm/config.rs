//! Named PCM definitions loaded from TOML.
//!
//! ```toml
//! [pcm.tap]
//! type = "file"
//! sname = "speaker"
//! file = "/tmp/tap.raw"
//!
//! [pcm.speaker]
//! type = "memory"
//! ```

use super::file::{FilePcm, MirrorFormat, MirrorTarget};
use super::memory::MemoryPcm;
use super::{Pcm, PcmMode, PcmStream};
use crate::{Error, Result};

use log::{debug, warn};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use toml::{Table, Value};

const MAX_NESTING: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq)]
enum MirrorSpec {
    Path(PathBuf),
    Fd(i32),
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Definition {
    File {
        slave: String,
        target: MirrorSpec,
        format: MirrorFormat,
    },
    Null,
    Memory,
}

type SlaveFactory = Arc<dyn Fn(PcmStream) -> Result<Box<dyn Pcm>> + Send + Sync>;

#[derive(Clone, Default)]
pub struct PcmConfig {
    definitions: Vec<(String, Definition)>,
    slaves: Vec<(String, SlaveFactory)>,
}

impl fmt::Debug for PcmConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PcmConfig")
            .field("definitions", &self.definitions)
            .field(
                "slaves",
                &self.slaves.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

fn expect_str<'a>(pcm: &str, key: &str, value: &'a Value) -> Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| Error::config(format!("pcm.{}: {} must be a string", pcm, key)))
}

fn parse_file_definition(pcm: &str, table: &Table) -> Result<Definition> {
    let mut slave = None;
    let mut target = None;
    let mut format = MirrorFormat::Raw;
    for (key, value) in table {
        match key.as_str() {
            "comment" | "type" | "stream" => {}
            "sname" => slave = Some(expect_str(pcm, key, value)?.to_string()),
            "file" => {
                target = Some(match value {
                    Value::String(path) => MirrorSpec::Path(PathBuf::from(path)),
                    Value::Integer(fd) if *fd >= 0 && *fd <= i64::from(i32::MAX) => {
                        MirrorSpec::Fd(*fd as i32)
                    }
                    Value::Integer(fd) => {
                        return Err(Error::config(format!("pcm.{}: invalid fd {}", pcm, fd)))
                    }
                    _ => {
                        return Err(Error::config(format!(
                            "pcm.{}: file must be a path or a file descriptor",
                            pcm
                        )))
                    }
                })
            }
            "format" => {
                format = match expect_str(pcm, key, value)? {
                    "raw" => MirrorFormat::Raw,
                    "wav" => MirrorFormat::Wav,
                    other => {
                        return Err(Error::config(format!(
                            "pcm.{}: unknown format {:?}",
                            pcm, other
                        )))
                    }
                }
            }
            other => return Err(Error::config(format!("pcm.{}: unknown field {}", pcm, other))),
        }
    }
    let slave = slave.ok_or_else(|| Error::config(format!("pcm.{}: sname is not defined", pcm)))?;
    let target = target.ok_or_else(|| Error::config(format!("pcm.{}: file is not defined", pcm)))?;
    Ok(Definition::File {
        slave,
        target,
        format,
    })
}

fn parse_plain_definition(pcm: &str, table: &Table, definition: Definition) -> Result<Definition> {
    for key in table.keys() {
        match key.as_str() {
            "comment" | "type" | "stream" => {}
            other => return Err(Error::config(format!("pcm.{}: unknown field {}", pcm, other))),
        }
    }
    Ok(definition)
}

impl FromStr for PcmConfig {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let root: Table = text.parse()?;
        let mut definitions = Vec::new();
        for (key, value) in &root {
            if key != "pcm" {
                warn!("ignoring unknown configuration section {}", key);
                continue;
            }
            let pcms = value
                .as_table()
                .ok_or_else(|| Error::config("pcm must be a table of definitions"))?;
            for (name, definition) in pcms {
                let table = definition
                    .as_table()
                    .ok_or_else(|| Error::config(format!("pcm.{} must be a table", name)))?;
                let kind = match table.get("type") {
                    Some(kind) => expect_str(name, "type", kind)?,
                    None => return Err(Error::config(format!("pcm.{}: type is not defined", name))),
                };
                let definition = match kind {
                    "file" => parse_file_definition(name, table)?,
                    "null" => parse_plain_definition(name, table, Definition::Null)?,
                    "memory" => parse_plain_definition(name, table, Definition::Memory)?,
                    other => {
                        return Err(Error::config(format!(
                            "pcm.{}: unknown type {:?}",
                            name, other
                        )))
                    }
                };
                definitions.push((name.clone(), definition));
            }
        }
        Ok(PcmConfig {
            definitions,
            slaves: Vec::new(),
        })
    }
}

impl PcmConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        text.parse()
    }

    /// Makes `name` resolvable as a slave PCM opened by `factory`. Definitions in the document
    /// take precedence over registered slaves, which take precedence over `null` and `memory`.
    pub fn register_slave<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(PcmStream) -> Result<Box<dyn Pcm>> + Send + Sync + 'static,
    {
        self.slaves.push((name.into(), Arc::new(factory)));
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.definitions.iter().map(|(name, _)| name.as_str())
    }

    fn definition(&self, name: &str) -> Option<&Definition> {
        self.definitions
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, d)| d)
    }

    /// Opens the PCM called `name`, following `sname` references down to a builtin.
    pub fn open(&self, name: &str, stream: PcmStream, mode: PcmMode) -> Result<Box<dyn Pcm>> {
        let mut pcm = self.open_nested(name, stream, 0)?;
        if mode.nonblock {
            if let Err(e) = pcm.nonblock(true) {
                let _ = pcm.close();
                return Err(e);
            }
        }
        Ok(pcm)
    }

    fn open_nested(&self, name: &str, stream: PcmStream, depth: usize) -> Result<Box<dyn Pcm>> {
        if depth > MAX_NESTING {
            return Err(Error::config(format!("pcm {} nests too deeply", name)));
        }
        let definition = match self.definition(name) {
            Some(definition) => definition.clone(),
            None => {
                if let Some((_, factory)) = self.slaves.iter().find(|(n, _)| n == name) {
                    debug!("opening registered pcm {}", name);
                    return factory(stream);
                }
                match name {
                    "null" => Definition::Null,
                    "memory" => Definition::Memory,
                    _ => return Err(Error::config(format!("unknown pcm {}", name))),
                }
            }
        };
        debug!("opening pcm {} as {:?}", name, definition);
        match definition {
            Definition::Null => Ok(Box::new(MemoryPcm::null(stream).with_name(name))),
            Definition::Memory => Ok(Box::new(MemoryPcm::memory(stream).with_name(name))),
            Definition::File {
                slave,
                target,
                format,
            } => {
                let slave = self.open_nested(&slave, stream, depth + 1)?;
                let target = match target {
                    MirrorSpec::Path(path) => MirrorTarget::Path(path),
                    MirrorSpec::Fd(fd) => MirrorTarget::Fd(fd),
                };
                // The plugin owns the slave from here, including closing it if open fails.
                let pcm = FilePcm::open(slave, target, format, true)?;
                Ok(Box::new(pcm))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_file_definition() {
        let config: PcmConfig = r#"
            [pcm.tap]
            type = "file"
            comment = "debug tap"
            sname = "null"
            file = 3
            format = "wav"
        "#
        .parse()
        .unwrap();
        assert_eq!(
            config.definition("tap"),
            Some(&Definition::File {
                slave: "null".into(),
                target: MirrorSpec::Fd(3),
                format: MirrorFormat::Wav,
            })
        );
    }

    #[test]
    fn test_rejects_bad_definitions() {
        let cases = [
            "[pcm.a]\ntype = \"file\"\nfile = \"/tmp/x\"\n",
            "[pcm.a]\ntype = \"file\"\nsname = \"null\"\n",
            "[pcm.a]\ntype = \"file\"\nsname = \"null\"\nfile = -1\n",
            "[pcm.a]\ntype = \"file\"\nsname = 5\nfile = \"/tmp/x\"\n",
            "[pcm.a]\ntype = \"file\"\nsname = \"null\"\nfile = \"/tmp/x\"\nrate = 3\n",
            "[pcm.a]\ntype = \"file\"\nsname = \"null\"\nfile = \"/tmp/x\"\nformat = \"au\"\n",
            "[pcm.a]\ntype = \"hw\"\n",
            "[pcm.a]\nsname = \"null\"\n",
        ];
        for case in &cases {
            let err = case.parse::<PcmConfig>().unwrap_err();
            assert!(matches!(err, Error::Config(_)), "{}: {}", case, err);
            assert_eq!(err.errno(), -libc::EINVAL);
        }
    }

    #[test]
    fn test_self_reference_is_bounded() {
        let config: PcmConfig = "[pcm.loop]\ntype = \"file\"\nsname = \"loop\"\nfile = \"/dev/null\"\n"
            .parse()
            .unwrap();
        let err = config
            .open("loop", PcmStream::Playback, PcmMode::default())
            .err()
            .expect("must fail");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_unknown_pcm() {
        let config = PcmConfig::default();
        assert!(config
            .open("speaker", PcmStream::Capture, PcmMode::default())
            .is_err());
        let null = config
            .open("null", PcmStream::Capture, PcmMode::default())
            .unwrap();
        assert_eq!(null.name(), "null");
        null.close().unwrap();
    }
}
