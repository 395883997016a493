//! Statement parser building [`SourceFile`] records from grouped tokens.

use std::io;

use indexmap::IndexMap;

use crate::{
    cpu::{self, Param, Reg},
    error::{Error, Pos, Result},
    expr, grammar, grouper,
    lexer::Lexer,
    program::{
        Arg, BinaryInclude, Constant, DataBlock, Entry, Instruction, Label, Section, Segment,
        SourceFile, Symbol, Variable, Width,
    },
    token::{Token, TokenKind},
};

/// Where source text and binary includes come from.
pub trait SourceLoader {
    /// The name under which `path`, referenced from the file `from`, is
    /// loaded, or `None` if it cannot be found.
    fn locate(&self, from: &str, path: &str) -> Option<String>;

    fn read_text(&self, name: &str) -> io::Result<String>;

    fn read_bytes(&self, name: &str) -> io::Result<Vec<u8>>;
}

/// Loader serving files from memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    files: IndexMap<String, Vec<u8>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, name: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(name, contents);
        self
    }

    pub fn insert(&mut self, name: &str, contents: impl Into<Vec<u8>>) {
        self.files.insert(name.to_string(), contents.into());
    }
}

impl SourceLoader for MemoryLoader {
    fn locate(&self, _from: &str, path: &str) -> Option<String> {
        self.files.contains_key(path).then(|| path.to_string())
    }

    fn read_text(&self, name: &str) -> io::Result<String> {
        let bytes = self.read_bytes(name)?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn read_bytes(&self, name: &str) -> io::Result<Vec<u8>> {
        self.files
            .get(name)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "file not found"))
    }
}

/// Parses `root` and every file it includes. Files come back in parse order,
/// each including file ahead of the files it includes.
pub fn parse(loader: &dyn SourceLoader, root: &str) -> Result<Vec<SourceFile>> {
    let lexer = grammar::lexer()?;
    let mut files = Vec::new();
    let mut stack = Vec::new();
    let pos = Pos::builtin(root);
    let name = loader
        .locate("", root)
        .ok_or_else(|| Error::include(&pos, format!("file not found: \"{root}\"")))?;
    parse_file(loader, &lexer, &name, &pos, &mut files, &mut stack)?;
    Ok(files)
}

fn parse_file(
    loader: &dyn SourceLoader,
    lexer: &Lexer,
    name: &str,
    from: &Pos,
    files: &mut Vec<SourceFile>,
    stack: &mut Vec<String>,
) -> Result<()> {
    if stack.iter().any(|open| open == name) {
        let chain = stack
            .iter()
            .map(String::as_str)
            .chain([name])
            .collect::<Vec<_>>()
            .join(" -> ");
        return Err(Error::include(from, format!("include cycle: {chain}")));
    }
    // included once
    if files.iter().any(|file| file.name == name) {
        return Ok(());
    }
    tracing::trace!("parsing {name}");
    let text = loader
        .read_text(name)
        .map_err(|e| Error::include(from, format!("failed to read \"{name}\": {e}")))?;
    let (file, includes) = parse_source(loader, lexer, name, &text)?;
    files.push(file);
    stack.push(name.to_string());
    for (path, pos) in includes {
        let included = loader
            .locate(name, &path)
            .ok_or_else(|| Error::include(&pos, format!("file not found: \"{path}\"")))?;
        parse_file(loader, lexer, &included, &pos, files, stack)?;
    }
    stack.pop();
    Ok(())
}

/// Parses one file without following its includes, which are returned
/// alongside the file.
pub fn parse_source(
    loader: &dyn SourceLoader,
    lexer: &Lexer,
    name: &str,
    text: &str,
) -> Result<(SourceFile, Vec<(String, Pos)>)> {
    let toks = grouper::group(lexer.scan(name, text)?)?;
    let mut parser = FileParser {
        loader,
        file: SourceFile::new(name),
        section: None,
        global: None,
        includes: Vec::new(),
    };
    for line in toks.split(|tok| tok.is(TokenKind::Newline)) {
        parser.statement(line)?;
    }
    let FileParser {
        mut file, includes, ..
    } = parser;
    file.toks = toks;
    Ok((file, includes))
}

/// Converts a value token to a symbolic argument.
pub fn arg(tok: &Token) -> Result<Arg> {
    match tok.kind {
        TokenKind::Expression => Ok(Arg::Expr(expr::parse(tok)?)),
        TokenKind::Number | TokenKind::String | TokenKind::Name | TokenKind::Offset => {
            Ok(Arg::Token(tok.clone()))
        }
        TokenKind::Label if tok.is_local_label_ref() => Ok(Arg::Token(tok.clone())),
        kind => Err(Error::parse(
            &tok.pos,
            format!("expected a value, found {kind} \"{}\"", tok.raw),
        )),
    }
}

fn split_commas<'t>(toks: &'t [Token], head: &Token) -> Result<Vec<&'t [Token]>> {
    if toks.is_empty() {
        return Ok(Vec::new());
    }
    let parts: Vec<&[Token]> = toks.split(|tok| tok.is(TokenKind::Comma)).collect();
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            // point at the comma that left the gap
            let comma = toks
                .iter()
                .filter(|tok| tok.is(TokenKind::Comma))
                .nth(i.saturating_sub(1))
                .unwrap_or(head);
            return Err(Error::parse(&comma.pos, "expected an operand"));
        }
    }
    Ok(parts)
}

fn single<'t>(part: &'t [Token], what: &str) -> Result<&'t Token> {
    match part {
        [tok] => Ok(tok),
        _ => Err(Error::parse(
            &part[0].pos,
            format!("expected {what}, found \"{}\"", joined(part)),
        )),
    }
}

fn joined(toks: &[Token]) -> String {
    toks.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

// `[value]` after a segment or `BANK`
fn bracketed(toks: &[Token]) -> Result<Option<Arg>> {
    match toks {
        [] => Ok(None),
        [open, value, close] if open.is(TokenKind::LBracket) && close.is(TokenKind::RBracket) => {
            Ok(Some(arg(value)?))
        }
        _ => Err(Error::parse(
            &toks[0].pos,
            format!("expected \"[value]\", found \"{}\"", joined(toks)),
        )),
    }
}

fn param(toks: &[Token]) -> Result<Param> {
    let register = |tok: &Token| {
        tok.is(TokenKind::Register)
            .then(|| Reg::from_name(&tok.raw))
            .flatten()
    };
    match toks {
        [tok] => match register(tok) {
            Some(reg) => Ok(Param::Reg(reg)),
            None => Ok(Param::Imm(arg(tok)?)),
        },
        [open, inner, close] if open.is(TokenKind::LBracket) && close.is(TokenKind::RBracket) => {
            match register(inner) {
                Some(reg) => Ok(Param::Mem(reg)),
                None => Ok(Param::Addr(arg(inner)?)),
            }
        }
        [sp, offset] if sp.is_word("sp") && offset.raw.starts_with(['+', '-']) => {
            Ok(Param::SpPlus(arg(offset)?))
        }
        _ => Err(Error::parse(
            &toks[0].pos,
            format!("invalid operand \"{}\"", joined(toks)),
        )),
    }
}

struct FileParser<'a> {
    loader: &'a dyn SourceLoader,
    file: SourceFile,
    section: Option<usize>,
    global: Option<usize>,
    includes: Vec<(String, Pos)>,
}

impl FileParser<'_> {
    fn declare(&mut self, name: &str, symbol: Symbol, pos: &Pos) -> Result<()> {
        if let Some(existing) = self.file.names.get(name) {
            return Err(Error::declaration(
                pos,
                format!("\"{name}\" is already declared"),
                self.file.symbol_pos(*existing),
            ));
        }
        self.file.names.insert(name.to_string(), symbol);
        Ok(())
    }

    fn current_section(&self, tok: &Token) -> Result<usize> {
        self.section.ok_or_else(|| {
            Error::parse(&tok.pos, format!("\"{}\" outside of a section", tok.raw))
        })
    }

    fn push_entry(&mut self, section: usize, entry: Entry) {
        self.file.sections[section].entries.push(entry);
    }

    fn statement(&mut self, line: &[Token]) -> Result<()> {
        let mut rest = line;
        let mut labels = Vec::new();
        while let Some((first, tail)) = rest.split_first() {
            match first.label() {
                Some(label) if !label.reference => {
                    labels.push(first);
                    rest = tail;
                }
                _ => break,
            }
        }
        let Some((head, args)) = rest.split_first() else {
            for label in labels {
                self.label(label)?;
            }
            return Ok(());
        };

        // `name: DS n` in RAM declares a variable
        if let [label] = labels.as_slice() {
            let global = label.label().is_some_and(|label| !label.local);
            let ram = self
                .section
                .is_some_and(|index| !self.file.sections[index].segment.is_rom());
            if global && ram && ["DB", "DW", "DS"].iter().any(|word| head.is_word(word)) {
                return self.variable(label, head, args);
            }
        }
        for label in labels {
            self.label(label)?;
        }

        match head.kind {
            TokenKind::Instruction => self.instruction(head, args),
            TokenKind::Directive => self.directive(head, args),
            TokenKind::Name
                if args
                    .first()
                    .is_some_and(|tok| tok.is_word("EQU") || tok.is_word("EQUS")) =>
            {
                self.constant(head, &args[0], &args[1..])
            }
            kind => Err(Error::parse(
                &head.pos,
                format!("unexpected {kind} \"{}\"", head.raw),
            )),
        }
    }

    fn label(&mut self, tok: &Token) -> Result<()> {
        let section = self.current_section(tok)?;
        let Some(def) = tok.label() else {
            return Ok(());
        };
        let index = self.file.labels.len();
        if def.local {
            let Some(parent) = self.global else {
                return Err(Error::parse(
                    &tok.pos,
                    format!("local label \".{}\" without a preceding global label", def.name),
                ));
            };
            let sibling = self.file.labels[parent]
                .children
                .iter()
                .find(|child| self.file.labels[**child].name == def.name);
            if let Some(sibling) = sibling {
                return Err(Error::declaration(
                    &tok.pos,
                    format!(
                        "\"{}.{}\" is already declared",
                        self.file.labels[parent].name, def.name
                    ),
                    &self.file.labels[*sibling].pos,
                ));
            }
            self.file.labels[parent].children.push(index);
        } else {
            self.declare(&def.name, Symbol::Label(index), &tok.pos)?;
            self.global = Some(index);
        }
        self.file.labels.push(Label {
            name: def.name.clone(),
            offset: 0,
            parent: if def.local { self.global } else { None },
            children: Vec::new(),
            local: def.local,
            section,
            pos: tok.pos.clone(),
        });
        self.push_entry(section, Entry::Label(index));
        Ok(())
    }

    fn variable(&mut self, label: &Token, head: &Token, args: &[Token]) -> Result<()> {
        let section = self.current_section(label)?;
        let name = label.text().to_string();
        let (size, size_arg) = if head.is_word("DS") {
            let parts = split_commas(args, head)?;
            let [size] = parts.as_slice() else {
                return Err(Error::parse(
                    &head.pos,
                    "RAM reservations take exactly one size argument",
                ));
            };
            (0, Some(arg(single(size, "a size")?)?))
        } else {
            if let Some(value) = args.first() {
                return Err(Error::parse(
                    &value.pos,
                    "data values are not allowed in RAM sections",
                ));
            }
            (if head.is_word("DW") { 2 } else { 1 }, None)
        };
        let index = self.file.variables.len();
        self.declare(&name, Symbol::Variable(index), &label.pos)?;
        self.file.variables.push(Variable {
            name,
            offset: 0,
            size,
            size_arg,
            section,
            pos: label.pos.clone(),
        });
        self.push_entry(section, Entry::Variable(index));
        Ok(())
    }

    fn constant(&mut self, name: &Token, directive: &Token, args: &[Token]) -> Result<()> {
        let value = match args {
            [value] => arg(value)?,
            [] => {
                return Err(Error::parse(
                    &directive.pos,
                    format!("{} expects a value", directive.raw.to_ascii_uppercase()),
                ))
            }
            _ => {
                return Err(Error::parse(
                    &args[1].pos,
                    format!("unexpected \"{}\" after constant value", args[1].raw),
                ))
            }
        };
        let index = self.file.constants.len();
        self.declare(name.text(), Symbol::Constant(index), &name.pos)?;
        self.file.constants.push(Constant {
            name: name.text().to_string(),
            value,
            is_string: directive.is_word("EQUS"),
            pos: name.pos.clone(),
        });
        Ok(())
    }

    fn instruction(&mut self, head: &Token, args: &[Token]) -> Result<()> {
        let section = self.current_section(head)?;
        let segment = self.file.sections[section].segment;
        if !segment.is_rom() {
            return Err(Error::parse(
                &head.pos,
                format!(
                    "instructions are not allowed in {segment} section \"{}\"",
                    self.file.sections[section].name
                ),
            ));
        }
        let params = split_commas(args, head)?
            .into_iter()
            .map(param)
            .collect::<Result<Vec<_>>>()?;
        let encoding = cpu::select(&head.raw, &params, &head.pos)?;
        let index = self.file.instructions.len();
        self.file.instructions.push(Instruction {
            mnemonic: head.raw.to_ascii_lowercase(),
            opcode: encoding.opcode,
            cycles: encoding.cycles,
            operand: encoding.operand,
            offset: 0,
            section,
            pos: head.pos.clone(),
            dirty: false,
        });
        self.push_entry(section, Entry::Instruction(index));
        Ok(())
    }

    fn directive(&mut self, head: &Token, args: &[Token]) -> Result<()> {
        match head.raw.to_ascii_uppercase().as_str() {
            "SECTION" => self.section(head, args),
            "INCLUDE" => {
                let path = self.path(head, args)?;
                self.includes.push((path, head.pos.clone()));
                Ok(())
            }
            "INCBIN" => self.incbin(head, args),
            "DB" => self.data(head, args, Width::Byte),
            "DW" => self.data(head, args, Width::Word),
            "DS" => self.reserve(head, args),
            _ => Err(Error::parse(
                &head.pos,
                format!("unexpected directive \"{}\"", head.raw),
            )),
        }
    }

    fn path(&self, head: &Token, args: &[Token]) -> Result<String> {
        match args {
            [path] if path.is(TokenKind::String) => Ok(path.text().to_string()),
            _ => Err(Error::parse(
                &head.pos,
                format!("{} expects a file name string", head.raw.to_ascii_uppercase()),
            )),
        }
    }

    fn section(&mut self, head: &Token, args: &[Token]) -> Result<()> {
        let parts = split_commas(args, head)?;
        let (name, location, bank) = match parts.as_slice() {
            [name, location] => (name, location, None),
            [name, location, bank] => (name, location, Some(bank)),
            _ => {
                return Err(Error::parse(
                    &head.pos,
                    "expected SECTION \"name\", SEGMENT[offset], BANK[n]",
                ))
            }
        };
        let name = single(name, "a section name")?;
        if !name.is(TokenKind::String) {
            return Err(Error::parse(&name.pos, "section names must be strings"));
        }
        let segment_tok = &location[0];
        let segment = Segment::from_name(&segment_tok.raw).ok_or_else(|| {
            Error::parse(
                &segment_tok.pos,
                format!("unknown segment \"{}\"", segment_tok.raw),
            )
        })?;
        let offset_arg = bracketed(&location[1..])?;
        let bank_arg = match bank {
            Some(bank) if bank[0].is_word("BANK") => bracketed(&bank[1..])?,
            Some(bank) => {
                return Err(Error::parse(
                    &bank[0].pos,
                    format!("expected BANK[n], found \"{}\"", joined(bank)),
                ))
            }
            None => None,
        };
        if let Some(existing) = self
            .file
            .sections
            .iter()
            .find(|section| section.name == name.text())
        {
            return Err(Error::declaration(
                &name.pos,
                format!("section \"{}\" is already declared", name.text()),
                &existing.pos,
            ));
        }
        self.section = Some(self.file.sections.len());
        self.file.sections.push(Section {
            name: name.text().to_string(),
            segment,
            bank: segment.default_bank(),
            offset_arg,
            bank_arg,
            explicit_offset: None,
            offset: 0,
            size: 0,
            entries: Vec::new(),
            pos: head.pos.clone(),
        });
        Ok(())
    }

    fn incbin(&mut self, head: &Token, args: &[Token]) -> Result<()> {
        let section = self.rom_section(head)?;
        let path = self.path(head, args)?;
        let name = self
            .loader
            .locate(&self.file.name, &path)
            .ok_or_else(|| Error::include(&head.pos, format!("file not found: \"{path}\"")))?;
        let bytes = self
            .loader
            .read_bytes(&name)
            .map_err(|e| Error::include(&head.pos, format!("failed to read \"{name}\": {e}")))?;
        let index = self.file.binaries.len();
        self.file.binaries.push(BinaryInclude {
            path: name,
            bytes,
            offset: 0,
            section,
            pos: head.pos.clone(),
        });
        self.push_entry(section, Entry::Binary(index));
        Ok(())
    }

    fn rom_section(&self, head: &Token) -> Result<usize> {
        let section = self.current_section(head)?;
        let segment = self.file.sections[section].segment;
        if !segment.is_rom() {
            return Err(Error::parse(
                &head.pos,
                format!("data values are not allowed in {segment} sections"),
            ));
        }
        Ok(section)
    }

    fn push_data(&mut self, section: usize, block: DataBlock) {
        let index = self.file.data.len();
        self.file.data.push(block);
        self.push_entry(section, Entry::Data(index));
    }

    fn data(&mut self, head: &Token, args: &[Token], width: Width) -> Result<()> {
        let section = self.current_section(head)?;
        if args.is_empty() {
            // bare `DB`/`DW` reserves one element
            let block = DataBlock {
                values: Vec::new(),
                width,
                fixed_size: None,
                size: width.size(),
                bytes: Vec::new(),
                offset: 0,
                section,
                pos: head.pos.clone(),
            };
            self.push_data(section, block);
            return Ok(());
        }
        let section = self.rom_section(head)?;
        let values = split_commas(args, head)?
            .into_iter()
            .map(|part| single(part, "a value").and_then(arg))
            .collect::<Result<Vec<_>>>()?;
        let size = match width {
            // strings are measured when sections are initialized
            Width::Byte => 0,
            Width::Word => 2 * values.len() as u32,
        };
        let block = DataBlock {
            values,
            width,
            fixed_size: None,
            size,
            bytes: Vec::new(),
            offset: 0,
            section,
            pos: head.pos.clone(),
        };
        self.push_data(section, block);
        Ok(())
    }

    fn reserve(&mut self, head: &Token, args: &[Token]) -> Result<()> {
        let section = self.current_section(head)?;
        let parts = split_commas(args, head)?;
        let Some((size, values)) = parts.split_first() else {
            return Err(Error::parse(&head.pos, "DS expects a size"));
        };
        if !values.is_empty() {
            self.rom_section(head)?;
        }
        let values = values
            .iter()
            .map(|part| single(part, "a value").and_then(arg))
            .collect::<Result<Vec<_>>>()?;
        let block = DataBlock {
            values,
            width: Width::Byte,
            fixed_size: Some(arg(single(size, "a size")?)?),
            size: 0,
            bytes: Vec::new(),
            offset: 0,
            section,
            pos: head.pos.clone(),
        };
        self.push_data(section, block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::ArgKind;

    fn parse_one(text: &str) -> Result<SourceFile> {
        let loader = MemoryLoader::new().with_file("main.s", text);
        parse(&loader, "main.s").map(|mut files| files.remove(0))
    }

    #[test]
    fn instructions_and_labels() {
        let file = parse_one(
            "SECTION \"main\", ROM0[$150]\nStart:\n  ld a, [$FF80]\n.loop: dec a\n  jr nz, .loop\n",
        )
        .unwrap();
        assert_eq!(file.sections.len(), 1);
        assert_eq!(file.instructions.len(), 3);
        assert_eq!(file.instructions[0].opcode, [0xFA]);
        assert_eq!(
            file.instructions[2].operand.as_ref().unwrap().kind,
            ArgKind::Relative
        );
        assert_eq!(file.labels.len(), 2);
        assert_eq!(file.labels[1].parent, Some(0));
        assert_eq!(file.label_name(1), "Start.loop");
        assert_eq!(file.sections[0].entries.len(), 5);
    }

    #[test]
    fn constants() {
        let file = parse_one("SIZE EQU 4 * 4\nNAME EQUS \"gb\"\n").unwrap();
        assert_eq!(file.constants.len(), 2);
        assert!(!file.constants[0].is_string);
        assert!(file.constants[1].is_string);
        assert!(matches!(file.names.get("SIZE"), Some(Symbol::Constant(0))));
    }

    #[test]
    fn ram_variables() {
        let file = parse_one(
            "SECTION \"vars\", WRAM0\nwCount: DB\nwPtr: DW\nwBuf: DS 16\n",
        )
        .unwrap();
        assert_eq!(file.variables.len(), 3);
        assert_eq!(file.variables[1].size, 2);
        assert!(file.variables[2].size_arg.is_some());
    }

    #[test]
    fn instructions_are_rejected_in_ram() {
        let err = parse_one("SECTION \"vars\", HRAM\nnop\n").unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert!(err.message().contains("not allowed in HRAM"));
    }

    #[test]
    fn redeclaration_reports_original() {
        let err = parse_one("SECTION \"a\", ROM0\nFoo: nop\nFoo: nop\n").unwrap_err();
        let Error::Declaration { pos, original, .. } = err else {
            panic!("expected a declaration error");
        };
        assert_eq!((pos.line, original.line), (3, 2));
    }

    #[test]
    fn local_labels_unique_per_scope() {
        let ok = parse_one("SECTION \"a\", ROM0\nFirst: .x: nop\nSecond: .x: nop\n");
        assert!(ok.is_ok());
        let err = parse_one("SECTION \"a\", ROM0\nFirst: .x: nop\n.x: nop\n").unwrap_err();
        assert!(err.message().contains("\"First.x\" is already declared"));
    }

    #[test]
    fn statements_need_a_section() {
        let err = parse_one("nop\n").unwrap_err();
        assert!(err.message().contains("outside of a section"));
    }

    #[test]
    fn includes_are_separate_files() {
        let loader = MemoryLoader::new()
            .with_file("main.s", "INCLUDE \"defs.s\"\nSECTION \"a\", ROM0\nld a, VALUE\n")
            .with_file("defs.s", "VALUE EQU 3\n");
        let files = parse(&loader, "main.s").unwrap();
        let names: Vec<&str> = files.iter().map(|file| file.name.as_str()).collect();
        assert_eq!(names, ["main.s", "defs.s"]);
    }

    #[test]
    fn include_cycles_are_errors() {
        let loader = MemoryLoader::new()
            .with_file("a.s", "INCLUDE \"b.s\"\n")
            .with_file("b.s", "INCLUDE \"a.s\"\n");
        let err = parse(&loader, "a.s").unwrap_err();
        assert!(matches!(err, Error::Include { .. }));
        assert!(err.message().contains("a.s -> b.s -> a.s"), "{err}");
    }

    #[test]
    fn missing_include_is_an_error() {
        let err = parse_one("INCLUDE \"nope.s\"\n").unwrap_err();
        assert!(matches!(err, Error::Include { .. }));
    }

    #[test]
    fn incbin_reads_bytes() {
        let loader = MemoryLoader::new()
            .with_file("main.s", "SECTION \"gfx\", ROMX\nINCBIN \"tiles.bin\"\n")
            .with_file("tiles.bin", vec![1u8, 2, 3]);
        let files = parse(&loader, "main.s").unwrap();
        assert_eq!(files[0].binaries[0].bytes, [1, 2, 3]);
        assert_eq!(files[0].sections[0].bank, 1);
    }

    #[test]
    fn sp_offsets() {
        let file = parse_one("SECTION \"a\", ROM0\nld hl, sp+4\nadd sp, -2\n").unwrap();
        assert_eq!(file.instructions[0].opcode, [0xF8]);
        assert_eq!(file.instructions[1].opcode, [0xE8]);
    }
}
