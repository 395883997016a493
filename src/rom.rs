//! Flat ROM images from linked programs.

use crate::{
    error::{Error, Result},
    program::{Entry, Segment, SourceFile},
};

pub const BANK_SIZE: usize = 0x4000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RomImage {
    pub bytes: Vec<u8>,
    pub warnings: Vec<String>,
}

pub trait RomWriter {
    /// Files must be linked, every offset final and non-overlapping.
    fn write(&self, files: &[SourceFile]) -> Result<RomImage>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlatRomWriter {
    pub fill: u8,
    pub min_size: usize,
}

impl Default for FlatRomWriter {
    fn default() -> Self {
        Self {
            fill: 0xFF,
            min_size: 2 * BANK_SIZE,
        }
    }
}

impl FlatRomWriter {
    /// Position of a ROM address in the image.
    pub fn rom_offset(segment: Segment, bank: u32, address: u32) -> Option<usize> {
        match segment {
            Segment::Rom0 => Some(address as usize),
            Segment::Romx => {
                Some(bank as usize * BANK_SIZE + (address as usize).checked_sub(BANK_SIZE)?)
            }
            _ => None,
        }
    }
}

impl RomWriter for FlatRomWriter {
    fn write(&self, files: &[SourceFile]) -> Result<RomImage> {
        let mut chunks = Vec::new();
        for file in files {
            for section in file.sections.iter().filter(|section| section.segment.is_rom()) {
                for entry in &section.entries {
                    let (offset, bytes) = match *entry {
                        Entry::Instruction(i) => {
                            let instr = &file.instructions[i];
                            (instr.offset, instr.bytes())
                        }
                        Entry::Data(d) => (file.data[d].offset, file.data[d].bytes.clone()),
                        Entry::Binary(b) => (file.binaries[b].offset, file.binaries[b].bytes.clone()),
                        Entry::Label(_) | Entry::Variable(_) => continue,
                    };
                    let start = Self::rom_offset(section.segment, section.bank, offset)
                        .ok_or_else(|| {
                            Error::Internal(format!(
                                "${offset:04X} in section \"{}\" is not a ROM address",
                                section.name
                            ))
                        })?;
                    chunks.push((start, bytes));
                }
            }
        }

        let content = chunks
            .iter()
            .map(|(start, bytes)| start + bytes.len())
            .max()
            .unwrap_or(0);
        let size = content.max(self.min_size).next_power_of_two();
        let mut image = RomImage {
            bytes: vec![self.fill; size],
            warnings: Vec::new(),
        };
        for (start, bytes) in chunks {
            image.bytes[start..start + bytes.len()].copy_from_slice(&bytes);
        }
        if size > content {
            let warning = format!(
                "padded ROM from {content} to {size} bytes with ${:02X}",
                self.fill
            );
            tracing::warn!("{warning}");
            image.warnings.push(warning);
        }
        Ok(image)
    }
}
