//! Link driver: section init, layout, resolution and the optimizer loop.

use crate::{
    encoder,
    error::{Error, Pos, Result},
    grammar, grouper,
    layout::layout,
    macros::MacroTable,
    optimizer,
    parser::{self, SourceLoader},
    program::{Arg, ArgKind, Constant, Entry, SourceFile, Symbol, Width},
    resolver::{Resolver, Value},
    token::TokenKind,
};

/// Pseudo file holding constants defined outside of any source.
pub const DEFINES: &str = "<command line>";

/// Upper bound on layout/resolve/optimize passes.
pub const MAX_PASSES: usize = 64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkOptions {
    pub optimize: bool,
    /// Allow rewriting unconditional `jp` into `jr`.
    pub unsafe_jumps: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkReport {
    pub passes: usize,
    pub rewrites: usize,
    pub warnings: Vec<String>,
}

pub struct Linker<'m> {
    files: Vec<SourceFile>,
    macros: &'m MacroTable,
    max_passes: usize,
}

impl<'m> Linker<'m> {
    pub fn new(macros: &'m MacroTable) -> Self {
        Self {
            files: Vec::new(),
            macros,
            max_passes: MAX_PASSES,
        }
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn into_files(self) -> Vec<SourceFile> {
        self.files
    }

    /// Adds a constant as if declared with `EQU` (or `EQUS` for strings).
    pub fn define(&mut self, name: &str, value: &str) -> Result<()> {
        let lexer = grammar::lexer()?;
        let toks = grouper::group(lexer.scan(DEFINES, value)?)?;
        let [tok] = toks.as_slice() else {
            return Err(Error::parse(
                &Pos::builtin(DEFINES),
                format!("invalid value for {name}: \"{value}\""),
            ));
        };
        let arg = parser::arg(tok)?;
        if self.files.first().map_or(true, |file| file.name != DEFINES) {
            self.files.insert(0, SourceFile::new(DEFINES));
        }
        let pos = tok.pos.clone();
        if let Some((file, symbol)) = self.find(name) {
            return Err(Error::declaration(
                &pos,
                format!("\"{name}\" is already declared"),
                self.files[file].symbol_pos(symbol),
            ));
        }
        let defines = &mut self.files[0];
        let index = defines.constants.len();
        defines.constants.push(Constant {
            name: name.to_string(),
            is_string: tok.is(TokenKind::String),
            value: arg,
            pos,
        });
        defines
            .names
            .insert(name.to_string(), Symbol::Constant(index));
        Ok(())
    }

    fn find(&self, name: &str) -> Option<(usize, Symbol)> {
        self.files
            .iter()
            .enumerate()
            .find_map(|(i, file)| file.names.get(name).map(|symbol| (i, *symbol)))
    }

    /// Parses `path` and its includes. Files already loaded are skipped.
    pub fn load(&mut self, loader: &dyn SourceLoader, path: &str) -> Result<()> {
        let start = self.files.len();
        for file in parser::parse(loader, path)? {
            if self.files.iter().any(|loaded| loaded.name == file.name) {
                continue;
            }
            tracing::debug!("loaded {}", file.name);
            self.files.push(file);
        }
        self.check_declarations(start)
    }

    fn check_declarations(&self, start: usize) -> Result<()> {
        for (f, file) in self.files.iter().enumerate().skip(start) {
            for (name, symbol) in &file.names {
                if name.starts_with('_') {
                    continue;
                }
                if let Some((g, original)) = self.files[..f]
                    .iter()
                    .enumerate()
                    .find_map(|(g, other)| other.names.get(name).map(|original| (g, *original)))
                {
                    return Err(Error::declaration(
                        file.symbol_pos(*symbol),
                        format!("\"{name}\" is already declared"),
                        self.files[g].symbol_pos(original),
                    ));
                }
            }
            for section in &file.sections {
                let original = self.files[..f]
                    .iter()
                    .flat_map(|other| &other.sections)
                    .find(|other| other.name == section.name);
                if let Some(original) = original {
                    return Err(Error::declaration(
                        &section.pos,
                        format!("section \"{}\" is already declared", section.name),
                        &original.pos,
                    ));
                }
            }
        }
        Ok(())
    }

    fn value(&self, file: usize, arg: &Arg, offset: i64, relative: bool) -> Result<Value> {
        Resolver::new(&self.files, self.macros).resolve(file, arg, offset, relative)
    }

    fn number(&self, file: usize, arg: &Arg) -> Result<i64> {
        let pos = arg.pos(&self.files[file]);
        match self.value(file, arg, 0, false)? {
            Value::Number(n) | Value::Address(n) => Ok(n),
            value => Err(Error::argument(
                pos,
                format!("expected a Number, found {}", value.type_name()),
            )),
        }
    }

    /// Runs init, layout and resolution, then the optimizer until it stops
    /// finding rewrites.
    pub fn link(&mut self, options: &LinkOptions) -> Result<LinkReport> {
        self.init()?;
        let mut report = LinkReport::default();
        for file in &self.files {
            for section in file.sections.iter().filter(|section| section.entries.is_empty()) {
                let warning = format!("{}: section \"{}\" is empty", section.pos, section.name);
                tracing::warn!("{warning}");
                report.warnings.push(warning);
            }
        }
        loop {
            report.passes += 1;
            if report.passes > self.max_passes {
                return Err(Error::Internal(format!(
                    "optimizer did not settle after {} passes",
                    self.max_passes
                )));
            }
            layout(&mut self.files)?;
            self.resolve()?;
            if !options.optimize {
                break;
            }
            let rewrites = optimizer::optimize(&mut self.files, options.unsafe_jumps);
            tracing::debug!("pass {}: {rewrites} rewrites", report.passes);
            if rewrites == 0 {
                break;
            }
            report.rewrites += rewrites;
        }
        Ok(report)
    }

    // resolves section placement and every size that depends on a value
    fn init(&mut self) -> Result<()> {
        tracing::trace!("initializing sections");
        for f in 0..self.files.len() {
            for s in 0..self.files[f].sections.len() {
                let section = &self.files[f].sections[s];
                let segment = section.segment;
                let explicit_offset = match &section.offset_arg {
                    Some(arg) => {
                        let offset = self.number(f, arg)?;
                        let offset = u32::try_from(offset).map_err(|_| {
                            Error::address(arg.pos(&self.files[f]), format!("invalid offset {offset}"))
                        })?;
                        Some(offset)
                    }
                    None => None,
                };
                let bank = match &section.bank_arg {
                    Some(arg) => {
                        let bank = self.number(f, arg)?;
                        let banks = segment.banks();
                        if !(*banks.start() as i64..=*banks.end() as i64).contains(&bank) {
                            return Err(Error::address(
                                arg.pos(&self.files[f]),
                                format!(
                                    "bank {bank} is outside {}..={} for {segment}",
                                    banks.start(),
                                    banks.end()
                                ),
                            ));
                        }
                        bank as u32
                    }
                    None => segment.default_bank(),
                };
                let section = &mut self.files[f].sections[s];
                section.explicit_offset = explicit_offset;
                section.bank = bank;
            }

            for v in 0..self.files[f].variables.len() {
                let Some(arg) = &self.files[f].variables[v].size_arg else {
                    continue;
                };
                let pos = arg.pos(&self.files[f]).clone();
                let size = encoder::fixed_size(&self.value(f, arg, 0, false)?, &pos)?;
                self.files[f].variables[v].size = size;
            }

            for d in 0..self.files[f].data.len() {
                let block = &self.files[f].data[d];
                let size = if let Some(arg) = &block.fixed_size {
                    let pos = arg.pos(&self.files[f]);
                    encoder::fixed_size(&self.value(f, arg, 0, false)?, pos)?
                } else if block.width == Width::Byte && !block.values.is_empty() {
                    // only text changes the size, numbers wait for layout
                    let resolver = Resolver::new(&self.files, self.macros);
                    let mut size = 0;
                    for arg in &block.values {
                        if !resolver.is_text(f, arg)? {
                            size += 1;
                        } else if let Value::Text(text) = resolver.resolve(f, arg, 0, false)? {
                            size += text.len() as u32;
                        }
                    }
                    size
                } else {
                    block.size
                };
                self.files[f].data[d].size = size;
            }
        }
        Ok(())
    }

    fn resolve(&mut self) -> Result<()> {
        tracing::trace!("linking");
        for f in 0..self.files.len() {
            for s in 0..self.files[f].sections.len() {
                let entries = self.files[f].sections[s].entries.clone();
                for entry in entries {
                    match entry {
                        Entry::Instruction(i) => self.resolve_instruction(f, i)?,
                        Entry::Data(d) => self.resolve_data(f, d)?,
                        Entry::Label(_) | Entry::Variable(_) | Entry::Binary(_) => {}
                    }
                }
            }
        }
        Ok(())
    }

    fn resolve_instruction(&mut self, f: usize, i: usize) -> Result<()> {
        let file = &self.files[f];
        let instr = &file.instructions[i];
        let Some(operand) = &instr.operand else {
            return Ok(());
        };
        let relative = operand.kind == ArgKind::Relative;
        let value = self.value(f, &operand.arg, instr.offset as i64, relative)?;
        let pos = operand.arg.pos(file).clone();
        encoder::encode_operand(&mut self.files[f].instructions[i], &value, &pos)
    }

    fn resolve_data(&mut self, f: usize, d: usize) -> Result<()> {
        let file = &self.files[f];
        let block = &file.data[d];
        let values = block
            .values
            .iter()
            .map(|arg| {
                let value = self.value(f, arg, block.offset as i64, false)?;
                Ok((value, arg.pos(file).clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        encoder::encode_data(&mut self.files[f].data[d], &values)
    }

    /// `BB:OOOO name` for every label and variable, by bank and offset.
    pub fn symbols(&self) -> String {
        let mut symbols = Vec::new();
        for file in &self.files {
            for (index, label) in file.labels.iter().enumerate() {
                let section = &file.sections[label.section];
                symbols.push((section.bank, label.offset, file.label_name(index)));
            }
            for variable in &file.variables {
                let section = &file.sections[variable.section];
                symbols.push((section.bank, variable.offset, variable.name.clone()));
            }
        }
        symbols.sort_by_key(|(bank, offset, _)| (*bank, *offset));
        symbols
            .iter()
            .map(|(bank, offset, name)| format!("{bank:02X}:{offset:04X} {name}\n"))
            .collect()
    }
}
