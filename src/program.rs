//! Records produced by the parser and filled in by the linker.

use std::{
    fmt::{self, Display, Formatter},
    ops::RangeInclusive,
};

use indexmap::IndexMap;

use crate::{error::Pos, expr::ExprNode, token::Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Rom0,
    Romx,
    Wram0,
    Wramx,
    Hram,
}

impl Segment {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_uppercase().as_str() {
            "ROM0" => Self::Rom0,
            "ROMX" => Self::Romx,
            "WRAM0" => Self::Wram0,
            "WRAMX" => Self::Wramx,
            "HRAM" => Self::Hram,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Rom0 => "ROM0",
            Self::Romx => "ROMX",
            Self::Wram0 => "WRAM0",
            Self::Wramx => "WRAMX",
            Self::Hram => "HRAM",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// First address of the segment's window.
    pub fn start(self) -> u32 {
        match self {
            Self::Rom0 => 0x0000,
            Self::Romx => 0x4000,
            Self::Wram0 => 0xC000,
            Self::Wramx => 0xD000,
            Self::Hram => 0xFF80,
        }
    }

    /// One past the last address of the segment's window.
    pub fn end(self) -> u32 {
        match self {
            Self::Rom0 => 0x4000,
            Self::Romx => 0x8000,
            Self::Wram0 => 0xD000,
            Self::Wramx => 0xE000,
            Self::Hram => 0xFFFF,
        }
    }

    pub fn is_rom(self) -> bool {
        matches!(self, Self::Rom0 | Self::Romx)
    }

    pub fn banks(self) -> RangeInclusive<u32> {
        match self {
            Self::Romx => 1..=511,
            Self::Wramx => 1..=7,
            _ => 0..=0,
        }
    }

    pub fn default_bank(self) -> u32 {
        *self.banks().start()
    }
}

impl Display for Segment {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Instruction(usize),
    Data(usize),
    Label(usize),
    Variable(usize),
    Binary(usize),
}

#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub segment: Segment,
    pub bank: u32,
    /// `SEGMENT[offset]` and `BANK[n]`, resolved when sections are initialized.
    pub offset_arg: Option<Arg>,
    pub bank_arg: Option<Arg>,
    pub explicit_offset: Option<u32>,
    pub offset: u32,
    pub size: u32,
    pub entries: Vec<Entry>,
    pub pos: Pos,
}

impl Section {
    pub fn end(&self) -> u32 {
        self.offset + self.size
    }
}

#[derive(Debug, Clone)]
pub struct Label {
    pub name: String,
    pub offset: u32,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub local: bool,
    pub section: usize,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub name: String,
    pub offset: u32,
    pub size: u32,
    pub size_arg: Option<Arg>,
    pub section: usize,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct Constant {
    pub name: String,
    pub value: Arg,
    pub is_string: bool,
    pub pos: Pos,
}

/// A symbolic operand or data value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Token(Token),
    Expr(ExprNode),
    /// Another instruction of the same file, used when the optimizer
    /// retargets a rewritten jump.
    Instruction(usize),
}

impl Arg {
    pub fn pos<'a>(&'a self, file: &'a SourceFile) -> &'a Pos {
        match self {
            Self::Token(tok) => &tok.pos,
            Self::Expr(node) => node.pos(),
            Self::Instruction(index) => &file.instructions[*index].pos,
        }
    }
}

impl Display for Arg {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(tok) => write!(f, "{tok}"),
            Self::Expr(node) => write!(f, "{node}"),
            Self::Instruction(index) => write!(f, "<instruction #{index}>"),
        }
    }
}

/// How an instruction operand is validated and encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Byte,
    Word,
    SignedByte,
    /// `jr` displacement, measured from the end of the instruction.
    Relative,
    /// `bit`/`res`/`set` index merged into the second opcode byte.
    BitIndex,
    /// `ldh` address, either `$00-$FF` or `$FF00-$FFFF`.
    HighPage,
    /// `rst` vector merged into the opcode.
    Vector,
}

impl ArgKind {
    pub fn size(self) -> u32 {
        match self {
            Self::Byte | Self::SignedByte | Self::Relative | Self::HighPage => 1,
            Self::Word => 2,
            Self::BitIndex | Self::Vector => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Operand {
    pub arg: Arg,
    pub kind: ArgKind,
    /// Value as returned by the resolver (relative for `jr`).
    pub resolved: Option<i64>,
    /// Unsigned encoding after validation.
    pub encoded: Option<u16>,
}

impl Operand {
    pub fn new(arg: Arg, kind: ArgKind) -> Self {
        Self {
            arg,
            kind,
            resolved: None,
            encoded: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub mnemonic: String,
    pub opcode: Vec<u8>,
    pub cycles: u8,
    pub operand: Option<Operand>,
    pub offset: u32,
    pub section: usize,
    pub pos: Pos,
    /// Set by [`Instruction::rewrite`], cleared by the next layout pass.
    pub dirty: bool,
}

impl Instruction {
    pub fn size(&self) -> u32 {
        self.opcode.len() as u32 + self.operand.as_ref().map_or(0, |op| op.kind.size())
    }

    pub fn resolved(&self) -> Option<i64> {
        self.operand.as_ref().and_then(|op| op.resolved)
    }

    pub fn rewrite(
        &mut self,
        mnemonic: &str,
        opcode: Vec<u8>,
        cycles: u8,
        operand: Option<Operand>,
    ) {
        self.mnemonic = mnemonic.to_string();
        self.opcode = opcode;
        self.cycles = cycles;
        self.operand = operand;
        self.dirty = true;
    }

    /// Final machine code. Operands must have been encoded by the linker.
    pub fn bytes(&self) -> Vec<u8> {
        let mut bytes = self.opcode.clone();
        let Some(operand) = &self.operand else {
            return bytes;
        };
        let value = operand.encoded.unwrap_or_default();
        match operand.kind {
            ArgKind::Byte | ArgKind::SignedByte | ArgKind::Relative | ArgKind::HighPage => {
                bytes.push(value as u8)
            }
            ArgKind::Word => bytes.extend_from_slice(&value.to_le_bytes()),
            ArgKind::BitIndex => {
                if let Some(last) = bytes.last_mut() {
                    *last |= (value as u8) << 3;
                }
            }
            ArgKind::Vector => {
                if let Some(first) = bytes.first_mut() {
                    *first |= value as u8;
                }
            }
        }
        bytes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Byte,
    Word,
}

impl Width {
    pub fn size(self) -> u32 {
        match self {
            Self::Byte => 1,
            Self::Word => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataBlock {
    pub values: Vec<Arg>,
    pub width: Width,
    /// `DS` blocks: a fixed size, possibly still an unresolved expression.
    pub fixed_size: Option<Arg>,
    pub size: u32,
    pub bytes: Vec<u8>,
    pub offset: u32,
    pub section: usize,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct BinaryInclude {
    pub path: String,
    pub bytes: Vec<u8>,
    pub offset: u32,
    pub section: usize,
    pub pos: Pos,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Symbol {
    Label(usize),
    Variable(usize),
    Constant(usize),
}

#[derive(Debug, Clone, Default)]
pub struct SourceFile {
    pub name: String,
    pub toks: Vec<Token>,
    pub sections: Vec<Section>,
    pub labels: Vec<Label>,
    pub variables: Vec<Variable>,
    pub constants: Vec<Constant>,
    pub instructions: Vec<Instruction>,
    pub data: Vec<DataBlock>,
    pub binaries: Vec<BinaryInclude>,
    pub names: IndexMap<String, Symbol>,
}

impl SourceFile {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn symbol_pos(&self, symbol: Symbol) -> &Pos {
        match symbol {
            Symbol::Label(index) => &self.labels[index].pos,
            Symbol::Variable(index) => &self.variables[index].pos,
            Symbol::Constant(index) => &self.constants[index].pos,
        }
    }

    /// `Parent.child` for local labels.
    pub fn label_name(&self, index: usize) -> String {
        let label = &self.labels[index];
        match label.parent {
            Some(parent) if label.local => format!("{}.{}", self.labels[parent].name, label.name),
            _ => label.name.clone(),
        }
    }

    pub fn global_labels(&self) -> impl Iterator<Item = (usize, &Label)> {
        self.labels.iter().enumerate().filter(|(_, label)| !label.local)
    }

    pub fn entry_size(&self, entry: Entry) -> u32 {
        match entry {
            Entry::Instruction(index) => self.instructions[index].size(),
            Entry::Data(index) => self.data[index].size,
            Entry::Label(_) => 0,
            Entry::Variable(index) => self.variables[index].size,
            Entry::Binary(index) => self.binaries[index].bytes.len() as u32,
        }
    }

    pub fn set_entry_offset(&mut self, entry: Entry, offset: u32) {
        match entry {
            Entry::Instruction(index) => self.instructions[index].offset = offset,
            Entry::Data(index) => self.data[index].offset = offset,
            Entry::Label(index) => self.labels[index].offset = offset,
            Entry::Variable(index) => self.variables[index].offset = offset,
            Entry::Binary(index) => self.binaries[index].offset = offset,
        }
    }
}
