use std::{error::Error, str::FromStr};

pub mod config;
pub mod cpu;
pub mod encoder;
pub mod error;
pub mod expr;
pub mod grammar;
pub mod grouper;
pub mod layout;
pub mod lexer;
pub mod linker;
pub mod macros;
pub mod optimizer;
pub mod parser;
pub mod program;
pub mod resolver;
pub mod rom;
pub mod token;

pub use config::Config;
pub use error::{Pos, Result};
pub use linker::{LinkOptions, LinkReport, Linker};
pub use macros::MacroTable;
pub use parser::{MemoryLoader, SourceLoader};
pub use program::SourceFile;
pub use resolver::Value;
pub use rom::{FlatRomWriter, RomImage, RomWriter};

pub fn parse_defines<T, U>(s: &str) -> std::result::Result<(T, U), Box<dyn Error + Send + Sync + 'static>>
where
    T: FromStr,
    T::Err: Error + Send + Sync + 'static,
    U: FromStr,
    U::Err: Error + Send + Sync + 'static,
{
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid SYMBOL=value: no `=` found in `{s}`"))?;
    Ok((s[..pos].parse()?, s[pos + 1..].parse()?))
}
