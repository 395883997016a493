use std::{
    error::Error,
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::Parser;
use gbasm::{Config, Linker, MacroTable, RomWriter, SourceLoader};
use indexmap::IndexMap;
use tracing::Level;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Assembly source file
    source: PathBuf,

    /// Output ROM file (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output file for the symbol listing
    #[arg(short, long)]
    symbols: Option<PathBuf>,

    /// Config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pre-defined constants (repeatable)
    #[arg(short = 'D', long, value_name="KEY1=val", value_parser = gbasm::parse_defines::<String, String>)]
    define: Vec<(String, String)>,

    /// Search directories for included files
    #[arg(short = 'I', long)]
    include: Vec<PathBuf>,

    /// Run the peephole optimizer
    #[arg(short = 'O', long)]
    optimize: bool,

    /// Also shorten unconditional jumps (implies `-O`)
    #[arg(long = "unsafe")]
    unsafe_jumps: bool,

    /// One of `TRACE`, `DEBUG`, `INFO`, `WARN`, or `ERROR`
    #[arg(short, long, default_value_t = Level::INFO)]
    log_level: Level,
}

/// Loader reading from the file system. Paths are tried as given, then next
/// to the including file, then in each include directory.
struct FsLoader {
    include: Vec<PathBuf>,
}

impl SourceLoader for FsLoader {
    fn locate(&self, from: &str, path: &str) -> Option<String> {
        let found = fs::canonicalize(path)
            .or_else(|_| {
                let base = Path::new(from).parent().unwrap_or(Path::new(""));
                fs::canonicalize(base.join(path))
            })
            .ok()
            .or_else(|| {
                self.include
                    .iter()
                    .find_map(|dir| fs::canonicalize(dir.join(path)).ok())
            })?;
        found.to_str().map(str::to_string)
    }

    fn read_text(&self, name: &str) -> io::Result<String> {
        fs::read_to_string(name)
    }

    fn read_bytes(&self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(name)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(io::stderr)
        .init();

    if let Err(e) = main_real(args) {
        tracing::error!("{e}");
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn main_real(args: Args) -> Result<(), Box<dyn Error>> {
    let config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|e| format!("cant open file: {e}"))?;
            Config::from_toml(&text)?
        }
        None => Config::default(),
    };

    let mut include = config.include.clone();
    include.extend(args.include);
    let loader = FsLoader { include };

    // command line defines replace configured ones
    let mut defines: IndexMap<String, String> = config
        .defines
        .iter()
        .map(|(name, value)| (name.clone(), value.source()))
        .collect();
    defines.extend(args.define);

    let macros = MacroTable::builtin();
    let mut linker = Linker::new(&macros);
    for (name, value) in &defines {
        linker.define(name, value)?;
    }
    let source = args
        .source
        .to_str()
        .ok_or_else(|| format!("invalid file name: {}", args.source.display()))?;
    linker.load(&loader, source)?;

    let mut options = config.link_options();
    options.optimize |= args.optimize || args.unsafe_jumps;
    options.unsafe_jumps |= args.unsafe_jumps;
    tracing::trace!("linking with {options:?}");
    let report = linker.link(&options)?;
    tracing::info!(
        "linked {} files in {} passes ({} rewrites)",
        linker.files().len(),
        report.passes,
        report.rewrites
    );

    let image = config.rom_writer().write(linker.files())?;
    if let Some(path) = &args.symbols {
        fs::write(path, linker.symbols())?;
    }
    match &args.output {
        Some(path) => fs::write(path, &image.bytes)?,
        None => io::stdout().lock().write_all(&image.bytes)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_system_lookup_order() {
        let root = std::env::temp_dir().join(format!("gbasm-loader-{}", std::process::id()));
        let src = root.join("src");
        let inc = root.join("inc");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&inc).unwrap();
        fs::write(src.join("main.s"), "INCLUDE \"sibling.s\"\nINCLUDE \"hardware.inc\"\n").unwrap();
        fs::write(src.join("sibling.s"), "ONE EQU 1\n").unwrap();
        fs::write(inc.join("hardware.inc"), "TWO EQU 2\n").unwrap();

        let loader = FsLoader {
            include: vec![inc.clone()],
        };
        let main = src.join("main.s");
        let files = gbasm::parser::parse(&loader, main.to_str().unwrap()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|file| Path::new(&file.name).file_name().unwrap().to_owned())
            .collect();
        assert_eq!(names, ["main.s", "sibling.s", "hardware.inc"]);
        assert!(loader.locate(main.to_str().unwrap(), "missing.s").is_none());
        fs::remove_dir_all(&root).unwrap();
    }
}
