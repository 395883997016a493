//! Section placement and entry addressing.

use std::collections::HashMap;

use crate::{
    error::{Error, Result},
    program::{Segment, SourceFile},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Placement {
    file: usize,
    section: usize,
}

/// Places every section and assigns offsets to their entries. Bank and
/// explicit offsets must already be resolved. Re-running on an unchanged
/// program yields the same addresses.
pub fn layout(files: &mut [SourceFile]) -> Result<()> {
    tracing::trace!("layout pass");
    let mut order = Vec::new();
    for (file, source) in files.iter().enumerate() {
        for section in 0..source.sections.len() {
            order.push(Placement { file, section });
        }
    }
    // declaration order breaks ties, the sort is stable
    order.sort_by_key(|placement| {
        let section = &files[placement.file].sections[placement.section];
        (
            section.segment.index(),
            section.bank,
            section.explicit_offset.map_or(u64::MAX, u64::from),
        )
    });

    let mut ends: HashMap<(Segment, u32), u32> = HashMap::new();
    for placement in &order {
        let file = &mut files[placement.file];
        let section = &file.sections[placement.section];
        let key = (section.segment, section.bank);
        let base = section
            .explicit_offset
            .or_else(|| ends.get(&key).copied())
            .unwrap_or_else(|| section.segment.start());

        let mut offset = base;
        let entries = section.entries.clone();
        for entry in entries {
            file.set_entry_offset(entry, offset);
            let size = file.entry_size(entry);
            offset = offset.checked_add(size).ok_or_else(|| {
                let section = &file.sections[placement.section];
                Error::address(
                    &section.pos,
                    format!("section \"{}\" overflows the address space", section.name),
                )
            })?;
        }
        let section = &mut file.sections[placement.section];
        section.offset = base;
        section.size = offset - base;
        ends.insert(key, offset);
        tracing::debug!(
            "placed section \"{}\" in {}:{} at ${:04X} (size ${:X})",
            section.name,
            section.segment,
            section.bank,
            section.offset,
            section.size
        );
    }
    for file in files.iter_mut() {
        for instr in &mut file.instructions {
            instr.dirty = false;
        }
    }

    check_windows(files, &order)?;
    check_overlaps(files, &order)
}

fn check_windows(files: &[SourceFile], order: &[Placement]) -> Result<()> {
    for placement in order {
        let section = &files[placement.file].sections[placement.section];
        let segment = section.segment;
        if section.offset < segment.start() || section.end() > segment.end() {
            return Err(Error::address(
                &section.pos,
                format!(
                    "section \"{}\" (${:04X}-${:04X}) does not fit in {} (${:04X}-${:04X})",
                    section.name,
                    section.offset,
                    section.end(),
                    segment,
                    segment.start(),
                    segment.end() - 1
                ),
            ));
        }
    }
    Ok(())
}

fn check_overlaps(files: &[SourceFile], order: &[Placement]) -> Result<()> {
    for (i, a) in order.iter().enumerate() {
        let a = &files[a.file].sections[a.section];
        for b in &order[i + 1..] {
            let b = &files[b.file].sections[b.section];
            if (a.segment, a.bank) != (b.segment, b.bank) || a.size == 0 || b.size == 0 {
                continue;
            }
            if a.offset < b.end() && b.offset < a.end() {
                return Err(Error::address(
                    &b.pos,
                    format!(
                        "section \"{}\" (${:04X}-${:04X}) overlaps section \"{}\" (${:04X}-${:04X})",
                        b.name,
                        b.offset,
                        b.end() - 1,
                        a.name,
                        a.offset,
                        a.end() - 1
                    ),
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        parser::{self, MemoryLoader},
        program::Arg,
    };

    // fixes explicit offsets and banks from number literals
    fn program(text: &str) -> Vec<SourceFile> {
        let loader = MemoryLoader::new().with_file("main.s", text);
        let mut files = parser::parse(&loader, "main.s").unwrap();
        for section in &mut files[0].sections {
            if let Some(Arg::Token(tok)) = &section.offset_arg {
                section.explicit_offset = tok.number().map(|n| n as u32);
            }
            if let Some(Arg::Token(tok)) = &section.bank_arg {
                section.bank = tok.number().unwrap_or_default() as u32;
            }
        }
        files
    }

    fn bases(files: &[SourceFile]) -> Vec<(String, u32, u32)> {
        files[0]
            .sections
            .iter()
            .map(|section| (section.name.clone(), section.offset, section.size))
            .collect()
    }

    #[test]
    fn implicit_sections_follow_explicit_ones() {
        let mut files = program(
            "SECTION \"b\", ROM0\nnop\nSECTION \"a\", ROM0[$150]\nDW 1, 2\nSECTION \"x\", ROMX\nnop\n",
        );
        layout(&mut files).unwrap();
        assert_eq!(
            bases(&files),
            [
                ("b".into(), 0x154, 1),
                ("a".into(), 0x150, 4),
                ("x".into(), 0x4000, 1)
            ]
        );
    }

    #[test]
    fn entries_get_offsets() {
        let mut files = program("SECTION \"a\", ROM0[$150]\nStart: ld a, 1\nNext: nop\n");
        layout(&mut files).unwrap();
        assert_eq!(files[0].labels[0].offset, 0x150);
        assert_eq!(files[0].instructions[1].offset, 0x152);
        assert_eq!(files[0].labels[1].offset, 0x152);
    }

    #[test]
    fn banks_are_separate_address_spaces() {
        let mut files = program(
            "SECTION \"one\", ROMX[$4000], BANK[1]\nnop\nSECTION \"two\", ROMX[$4000], BANK[2]\nnop\n",
        );
        layout(&mut files).unwrap();
        assert_eq!(files[0].sections[1].offset, 0x4000);
    }

    #[test]
    fn overlapping_sections() {
        let mut files = program(
            "SECTION \"first\", ROM0[$100]\nDW 0, 0, 0, 0, 0, 0, 0, 0\nSECTION \"second\", ROM0[$108]\nnop\n",
        );
        let err = layout(&mut files).unwrap_err();
        assert!(matches!(err, Error::Address { .. }));
        assert!(err.message().contains("\"second\""), "{err}");
        assert!(err.message().contains("\"first\""), "{err}");
    }

    #[test]
    fn sections_must_fit_their_segment() {
        let mut files = program("SECTION \"high\", HRAM[$FFFE]\nwA: DW\n");
        let err = layout(&mut files).unwrap_err();
        assert!(err.message().contains("does not fit in HRAM"), "{err}");
    }

    #[test]
    fn oversized_sections_are_address_errors() {
        let mut files = program("SECTION \"huge\", ROM0[$150]\nDS 1\nnop\n");
        files[0].data[0].size = u32::MAX;
        let err = layout(&mut files).unwrap_err();
        assert!(matches!(err, Error::Address { .. }));
        assert!(err.message().contains("\"huge\" overflows"), "{err}");
    }

    #[test]
    fn layout_is_idempotent() {
        let mut files = program(
            "SECTION \"a\", ROM0[$150]\nStart: nop\njp Start\nSECTION \"b\", WRAM0\nwX: DW\n",
        );
        layout(&mut files).unwrap();
        let once = bases(&files);
        layout(&mut files).unwrap();
        assert_eq!(once, bases(&files));
    }
}
