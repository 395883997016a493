//! Peephole rewrites over linked instructions.
//!
//! Rules only look at an instruction and its successor in the same section
//! and rely on the resolved operands of the previous link pass. Offsets are
//! stale after a rewrite, the linker lays the program out again and repeats
//! until nothing changes.

use std::collections::HashMap;

use crate::{
    encoder::SIGNED_BYTE,
    program::{Arg, ArgKind, Entry, Operand, Segment, SourceFile},
};

const NOP: u8 = 0x00;
const LD_A_NN: u8 = 0xFA;
const LD_NN_A: u8 = 0xEA;
const LDH_A_N: u8 = 0xF0;
const LDH_N_A: u8 = 0xE0;
const JP: u8 = 0xC3;
const JR: u8 = 0x18;
const CALL: u8 = 0xCD;
const RET: u8 = 0xC9;

#[derive(Debug, Clone, Copy)]
struct Next {
    index: usize,
    /// a label sits between the instruction and its successor
    labelled: bool,
}

// instruction start offsets per address space, for retargeting jumps
struct Targets {
    spaces: HashMap<(Segment, u32), Vec<(u32, usize)>>,
}

impl Targets {
    fn new(file: &SourceFile) -> Self {
        let mut spaces: HashMap<(Segment, u32), Vec<(u32, usize)>> = HashMap::new();
        for section in &file.sections {
            let list = spaces.entry((section.segment, section.bank)).or_default();
            for entry in &section.entries {
                if let Entry::Instruction(index) = entry {
                    list.push((file.instructions[*index].offset, *index));
                }
            }
        }
        for list in spaces.values_mut() {
            list.sort_unstable();
        }
        Self { spaces }
    }

    fn find(&self, space: (Segment, u32), offset: i64) -> Option<usize> {
        let offset = u32::try_from(offset).ok()?;
        let list = self.spaces.get(&space)?;
        let found = list.binary_search_by_key(&offset, |(start, _)| *start).ok()?;
        Some(list[found].1)
    }
}

/// Applies one pass of every rule and returns how many rewrites were made.
pub fn optimize(files: &mut [SourceFile], unsafe_jumps: bool) -> usize {
    let mut rewrites = 0;
    for file in files.iter_mut() {
        let targets = Targets::new(file);
        for section in 0..file.sections.len() {
            let entries = file.sections[section].entries.clone();
            let positions: Vec<usize> = entries
                .iter()
                .enumerate()
                .filter(|(_, entry)| matches!(entry, Entry::Instruction(_)))
                .map(|(i, _)| i)
                .collect();
            let mut k = 0;
            while k < positions.len() {
                let Entry::Instruction(index) = entries[positions[k]] else {
                    k += 1;
                    continue;
                };
                let next = positions.get(k + 1).and_then(|&j| {
                    let between = &entries[positions[k] + 1..j];
                    // data or includes in between break the pair
                    let only_labels = between.iter().all(|e| matches!(e, Entry::Label(_)));
                    let Entry::Instruction(next) = entries[j] else {
                        return None;
                    };
                    only_labels.then_some(Next {
                        index: next,
                        labelled: !between.is_empty(),
                    })
                });
                let consumed = match tail_call(file, section, index, next) {
                    0 => match high_page(file, index) {
                        0 => short_jump(file, &targets, index, next, unsafe_jumps),
                        n => n,
                    },
                    n => n,
                };
                if consumed > 0 {
                    rewrites += 1;
                }
                k += consumed.max(1);
            }
        }
    }
    rewrites
}

// `ld a,[nn]` / `ld [nn],a` on the high page become `ldh`
fn high_page(file: &mut SourceFile, index: usize) -> usize {
    let instr = &file.instructions[index];
    let opcode = match instr.opcode.as_slice() {
        [LD_A_NN] => LDH_A_N,
        [LD_NN_A] => LDH_N_A,
        _ => return 0,
    };
    let Some(operand) = &instr.operand else {
        return 0;
    };
    if !matches!(operand.resolved, Some(0xFF00..=0xFFFF)) {
        return 0;
    }
    let operand = Operand::new(operand.arg.clone(), ArgKind::HighPage);
    tracing::debug!("{}: ld -> ldh", instr.pos);
    file.instructions[index].rewrite("ldh", vec![opcode], 12, Some(operand));
    1
}

// `jp` within reach of a signed byte becomes `jr`
fn short_jump(
    file: &mut SourceFile,
    targets: &Targets,
    index: usize,
    next: Option<Next>,
    unsafe_jumps: bool,
) -> usize {
    let instr = &file.instructions[index];
    let followed_by_nop = next.is_some_and(|next| file.instructions[next.index].opcode == [NOP]);
    let opcode = match instr.opcode.as_slice() {
        [op @ (0xC2 | 0xCA | 0xD2 | 0xDA)] => 0x20 | (op & 0x18),
        [JP] if unsafe_jumps && !followed_by_nop => JR,
        _ => return 0,
    };
    let Some(target) = instr.resolved() else {
        return 0;
    };
    let displacement = target - instr.offset as i64 - 2;
    if !SIGNED_BYTE.contains(&displacement) {
        return 0;
    }
    let section = &file.sections[instr.section];
    let Some(dest) = targets.find((section.segment, section.bank), target) else {
        return 0;
    };
    tracing::debug!("{}: jp -> jr", instr.pos);
    let operand = Operand::new(Arg::Instruction(dest), ArgKind::Relative);
    file.instructions[index].rewrite("jr", vec![opcode], 12, Some(operand));
    1
}

// `call nn` directly followed by `ret` becomes `jp nn`
fn tail_call(file: &mut SourceFile, section: usize, index: usize, next: Option<Next>) -> usize {
    let Some(next) = next.filter(|next| !next.labelled) else {
        return 0;
    };
    if file.instructions[index].opcode != [CALL] || file.instructions[next.index].opcode != [RET] {
        return 0;
    }
    let targeted = file.instructions.iter().any(|instr| {
        matches!(&instr.operand, Some(Operand { arg: Arg::Instruction(dest), .. }) if *dest == next.index)
    });
    if targeted {
        return 0;
    }
    let instr = &mut file.instructions[index];
    tracing::debug!("{}: call, ret -> jp", instr.pos);
    let operand = instr.operand.take();
    instr.rewrite("jp", vec![JP], 16, operand);
    file.sections[section]
        .entries
        .retain(|entry| *entry != Entry::Instruction(next.index));
    2
}
