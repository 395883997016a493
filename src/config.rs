//! Build configuration read from TOML.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{de, Deserialize, Deserializer};
use serde_derive::{Deserialize, Serialize};

use crate::{linker::LinkOptions, rom::FlatRomWriter};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Extra directories searched by `INCLUDE` and `INCBIN`
    pub include: Vec<PathBuf>,

    pub optimize: OptimizeConfig,

    pub rom: RomConfig,

    pub defines: IndexMap<String, Define>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizeConfig {
    pub enabled: bool,

    #[serde(rename = "unsafe")]
    pub unsafe_jumps: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RomConfig {
    #[serde(deserialize_with = "deserialize_bases_u8")]
    pub fill: u8,

    #[serde(deserialize_with = "deserialize_bases_usize")]
    pub min_size: usize,
}

impl Default for RomConfig {
    fn default() -> Self {
        let writer = FlatRomWriter::default();
        Self {
            fill: writer.fill,
            min_size: writer.min_size,
        }
    }
}

/// A pre-defined constant. Strings are assembler source, so `"$10 * 2"`
/// is a number and `'"title"'` is text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Define {
    Number(i64),
    Source(String),
}

impl Define {
    pub fn source(&self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Source(text) => text.clone(),
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn link_options(&self) -> LinkOptions {
        LinkOptions {
            optimize: self.optimize.enabled,
            unsafe_jumps: self.optimize.unsafe_jumps,
        }
    }

    pub fn rom_writer(&self) -> FlatRomWriter {
        FlatRomWriter {
            fill: self.rom.fill,
            min_size: self.rom.min_size,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Base {
    Int(u64),
    Text(String),
}

fn parse_bases<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let buf = match Base::deserialize(deserializer)? {
        Base::Int(n) => return Ok(n),
        Base::Text(buf) => buf,
    };
    if let Some(digits) = buf.strip_prefix('$') {
        u64::from_str_radix(digits, 16)
            .map_err(|e| de::Error::custom(format!("{buf} is not a valid base 16 value: {e}")))
    } else if let Some(digits) = buf.strip_prefix('%') {
        u64::from_str_radix(digits, 2)
            .map_err(|e| de::Error::custom(format!("{buf} is not a valid base 2 value: {e}")))
    } else {
        buf.parse()
            .map_err(|e| de::Error::custom(format!("{buf} is not a valid base 10 value: {e}")))
    }
}

fn deserialize_bases_u8<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let n = parse_bases(deserializer)?;
    u8::try_from(n).map_err(|_| de::Error::custom(format!("{n} does not fit in a byte")))
}

fn deserialize_bases_usize<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let n = parse_bases(deserializer)?;
    usize::try_from(n).map_err(|_| de::Error::custom(format!("{n} is too large")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.rom.fill, 0xFF);
        assert_eq!(config.rom.min_size, 0x8000);
        assert!(!config.link_options().optimize);
    }

    #[test]
    fn full_config() {
        let config = Config::from_toml(
            r#"
include = ["inc", "gfx"]

[optimize]
enabled = true
unsafe = true

[rom]
fill = "$00"
min_size = "$10000"

[defines]
DEBUG = 1
TITLE = '"POCKET"'
LIMIT = "$10 * 2"
"#,
        )
        .unwrap();
        assert_eq!(config.include, [PathBuf::from("inc"), PathBuf::from("gfx")]);
        assert_eq!(
            config.link_options(),
            LinkOptions {
                optimize: true,
                unsafe_jumps: true
            }
        );
        assert_eq!(
            config.rom_writer(),
            FlatRomWriter {
                fill: 0,
                min_size: 0x10000
            }
        );
        let defines: Vec<_> = config
            .defines
            .iter()
            .map(|(name, value)| (name.as_str(), value.source()))
            .collect();
        assert_eq!(
            defines,
            [
                ("DEBUG", "1".to_string()),
                ("TITLE", "\"POCKET\"".to_string()),
                ("LIMIT", "$10 * 2".to_string())
            ]
        );
    }

    #[test]
    fn bad_fill() {
        let err = Config::from_toml("[rom]\nfill = \"$100\"\n").unwrap_err();
        assert!(err.to_string().contains("does not fit in a byte"), "{err}");
        let err = Config::from_toml("[rom]\nfill = \"$XY\"\n").unwrap_err();
        assert!(err.to_string().contains("not a valid base 16 value"), "{err}");
    }
}
