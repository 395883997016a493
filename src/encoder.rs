//! Operand validation and byte encoding.

use std::ops::RangeInclusive;

use crate::{
    error::{Error, Pos, Result},
    program::{ArgKind, DataBlock, Instruction, Width},
    resolver::Value,
};

pub const BYTE: RangeInclusive<i64> = -127..=255;
pub const WORD: RangeInclusive<i64> = -32767..=65535;
/// Also the reach of `jr` after the two byte correction.
pub const SIGNED_BYTE: RangeInclusive<i64> = -127..=127;

/// Unsigned encoding of `value`, negative values wrap around the width.
pub fn twos_complement(value: i64, width: Width) -> u16 {
    let modulus = 1i64 << (8 * width.size());
    (if value < 0 { modulus + value } else { value }) as u16
}

fn number(value: &Value, pos: &Pos) -> Result<i64> {
    match value {
        Value::Number(n) | Value::Address(n) => Ok(*n),
        Value::Text(_) => Err(Error::argument(pos, "expected a Number, found Text")),
        Value::Macro(m) => Err(Error::argument(
            pos,
            format!("macro \"{}\" used as a value", m.name),
        )),
    }
}

/// Validates a resolved instruction argument and stores its encoding.
/// `jr` expects the distance from the start of the instruction.
pub fn encode_operand(instr: &mut Instruction, value: &Value, pos: &Pos) -> Result<()> {
    let jump = matches!(instr.mnemonic.as_str(), "jp" | "call");
    let Some(operand) = instr.operand.as_mut() else {
        return Ok(());
    };
    let n = number(value, pos)?;
    let encoded = match operand.kind {
        ArgKind::Relative => {
            let displacement = n - 2;
            if !SIGNED_BYTE.contains(&displacement) {
                return Err(Error::address(
                    pos,
                    format!(
                        "jump target is out of range: displacement {displacement} is outside -127..=127"
                    ),
                ));
            }
            twos_complement(displacement, Width::Byte)
        }
        ArgKind::SignedByte => {
            if !SIGNED_BYTE.contains(&n) {
                return Err(Error::argument(
                    pos,
                    format!("signed byte value {n} is outside -127..=127"),
                ));
            }
            twos_complement(n, Width::Byte)
        }
        ArgKind::Byte => {
            if !BYTE.contains(&n) {
                return Err(Error::argument(
                    pos,
                    format!("byte value {n} is outside -127..=255"),
                ));
            }
            twos_complement(n, Width::Byte)
        }
        ArgKind::Word => {
            if !WORD.contains(&n) {
                return Err(if jump {
                    Error::address(pos, format!("jump target {n} is outside -32767..=65535"))
                } else {
                    Error::argument(pos, format!("word value {n} is outside -32767..=65535"))
                });
            }
            twos_complement(n, Width::Word)
        }
        ArgKind::BitIndex => {
            if !(0..=7).contains(&n) {
                return Err(Error::argument(pos, format!("bit index {n} is outside 0..=7")));
            }
            n as u16
        }
        ArgKind::HighPage => match n {
            0..=0xFF => n as u16,
            0xFF00..=0xFFFF => (n & 0xFF) as u16,
            _ => {
                return Err(Error::argument(
                    pos,
                    format!("address {n} is not in the high page ($FF00-$FFFF)"),
                ))
            }
        },
        ArgKind::Vector => {
            if !(0..=0x38).contains(&n) || n % 8 != 0 {
                return Err(Error::argument(
                    pos,
                    format!("invalid restart vector {n}"),
                ));
            }
            n as u16
        }
    };
    operand.resolved = Some(n);
    operand.encoded = Some(encoded);
    Ok(())
}

/// Resolves the size of a `DS` block, strings count their length.
pub fn fixed_size(value: &Value, pos: &Pos) -> Result<u32> {
    let size = match value {
        Value::Text(text) => text.len() as i64,
        value => number(value, pos)?,
    };
    u32::try_from(size)
        .map_err(|_| Error::argument(pos, format!("invalid reservation size {size}")))
}

/// Encodes resolved values into the block's bytes.
pub fn encode_data(block: &mut DataBlock, values: &[(Value, Pos)]) -> Result<()> {
    let mut bytes = Vec::with_capacity(block.size as usize);
    if block.fixed_size.is_some() {
        for (value, pos) in values {
            let Value::Text(text) = value else {
                return Err(Error::argument(
                    pos,
                    format!("DS only accepts Text values, found {}", value.type_name()),
                ));
            };
            bytes.extend_from_slice(text.as_bytes());
        }
        if bytes.len() > block.size as usize {
            return Err(Error::argument(
                &block.pos,
                format!(
                    "{} bytes of text do not fit in {} reserved bytes",
                    bytes.len(),
                    block.size
                ),
            ));
        }
    } else {
        for (value, pos) in values {
            match (block.width, value) {
                (Width::Byte, Value::Text(text)) => bytes.extend_from_slice(text.as_bytes()),
                (Width::Byte, value) => {
                    let n = number(value, pos)?;
                    if !BYTE.contains(&n) {
                        return Err(Error::argument(
                            pos,
                            format!("byte value {n} is outside -127..=255"),
                        ));
                    }
                    bytes.push(twos_complement(n, Width::Byte) as u8);
                }
                (Width::Word, value) => {
                    let n = number(value, pos)?;
                    if !WORD.contains(&n) {
                        return Err(Error::argument(
                            pos,
                            format!("word value {n} is outside -32767..=65535"),
                        ));
                    }
                    bytes.extend_from_slice(&twos_complement(n, Width::Word).to_le_bytes());
                }
            }
        }
        if !values.is_empty() && bytes.len() != block.size as usize {
            return Err(Error::Internal(format!(
                "data block at {} changed size from {} to {}",
                block.pos,
                block.size,
                bytes.len()
            )));
        }
    }
    bytes.resize(block.size as usize, 0);
    block.bytes = bytes;
    Ok(())
}
