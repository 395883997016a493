//! gbz80 opcode selection.
//!
//! The parser turns operands into [`Param`]s and [`select`] picks the opcode
//! template, the cycle count (branch taken) and the kind of the symbolic
//! argument, if any.

use std::fmt::{self, Display, Formatter};

use crate::{
    error::{Error, Pos, Result},
    program::{Arg, ArgKind, Operand},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
    A,
    B,
    C,
    D,
    E,
    H,
    L,
    Af,
    Bc,
    De,
    Hl,
    Sp,
    Hli,
    Hld,
    Nz,
    Z,
    Nc,
}

impl Reg {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_lowercase().as_str() {
            "a" => Self::A,
            "b" => Self::B,
            "c" => Self::C,
            "d" => Self::D,
            "e" => Self::E,
            "h" => Self::H,
            "l" => Self::L,
            "af" => Self::Af,
            "bc" => Self::Bc,
            "de" => Self::De,
            "hl" => Self::Hl,
            "sp" => Self::Sp,
            "hli" => Self::Hli,
            "hld" => Self::Hld,
            "nz" => Self::Nz,
            "z" => Self::Z,
            "nc" => Self::Nc,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
            Self::C => "c",
            Self::D => "d",
            Self::E => "e",
            Self::H => "h",
            Self::L => "l",
            Self::Af => "af",
            Self::Bc => "bc",
            Self::De => "de",
            Self::Hl => "hl",
            Self::Sp => "sp",
            Self::Hli => "hli",
            Self::Hld => "hld",
            Self::Nz => "nz",
            Self::Z => "z",
            Self::Nc => "nc",
        }
    }

    fn r8(self) -> Option<u8> {
        Some(match self {
            Self::B => 0,
            Self::C => 1,
            Self::D => 2,
            Self::E => 3,
            Self::H => 4,
            Self::L => 5,
            Self::A => 7,
            _ => return None,
        })
    }

    fn r16(self) -> Option<u8> {
        Some(match self {
            Self::Bc => 0,
            Self::De => 1,
            Self::Hl => 2,
            Self::Sp => 3,
            _ => return None,
        })
    }

    // push/pop pairs
    fn stack(self) -> Option<u8> {
        Some(match self {
            Self::Bc => 0,
            Self::De => 1,
            Self::Hl => 2,
            Self::Af => 3,
            _ => return None,
        })
    }

    fn cond(self) -> Option<u8> {
        Some(match self {
            Self::Nz => 0,
            Self::Z => 1,
            Self::Nc => 2,
            Self::C => 3,
            _ => return None,
        })
    }
}

/// A syntactic instruction operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Reg(Reg),
    /// `[reg]`
    Mem(Reg),
    Imm(Arg),
    /// `[nn]`
    Addr(Arg),
    /// `sp + e8`
    SpPlus(Arg),
}

impl Display for Param {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reg(reg) => f.write_str(reg.name()),
            Self::Mem(reg) => write!(f, "[{}]", reg.name()),
            Self::Imm(arg) => write!(f, "{arg}"),
            Self::Addr(arg) => write!(f, "[{arg}]"),
            Self::SpPlus(arg) => write!(f, "sp+{arg}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Encoding {
    pub opcode: Vec<u8>,
    pub cycles: u8,
    pub operand: Option<Operand>,
}

fn fixed(opcode: &[u8], cycles: u8) -> Option<Encoding> {
    Some(Encoding {
        opcode: opcode.to_vec(),
        cycles,
        operand: None,
    })
}

fn with_arg(opcode: &[u8], cycles: u8, arg: &Arg, kind: ArgKind) -> Option<Encoding> {
    Some(Encoding {
        opcode: opcode.to_vec(),
        cycles,
        operand: Some(Operand::new(arg.clone(), kind)),
    })
}

// 8-bit register operand including `[hl]` (6)
fn r8(param: &Param) -> Option<u8> {
    match param {
        Param::Reg(reg) => reg.r8(),
        Param::Mem(Reg::Hl) => Some(6),
        _ => None,
    }
}

fn r16(param: &Param) -> Option<u8> {
    match param {
        Param::Reg(reg) => reg.r16(),
        _ => None,
    }
}

fn cond(param: &Param) -> Option<u8> {
    match param {
        Param::Reg(reg) => reg.cond(),
        _ => None,
    }
}

fn ld(dst: &Param, src: &Param) -> Option<Encoding> {
    use Param::{Addr, Imm, Mem, SpPlus};
    match (dst, src) {
        (Param::Reg(Reg::A), Mem(Reg::Bc)) => fixed(&[0x0A], 8),
        (Param::Reg(Reg::A), Mem(Reg::De)) => fixed(&[0x1A], 8),
        (Mem(Reg::Bc), Param::Reg(Reg::A)) => fixed(&[0x02], 8),
        (Mem(Reg::De), Param::Reg(Reg::A)) => fixed(&[0x12], 8),
        (Param::Reg(Reg::A), Mem(Reg::Hli)) => fixed(&[0x2A], 8),
        (Mem(Reg::Hli), Param::Reg(Reg::A)) => fixed(&[0x22], 8),
        (Param::Reg(Reg::A), Mem(Reg::Hld)) => fixed(&[0x3A], 8),
        (Mem(Reg::Hld), Param::Reg(Reg::A)) => fixed(&[0x32], 8),
        (Param::Reg(Reg::A), Mem(Reg::C)) => fixed(&[0xF2], 8),
        (Mem(Reg::C), Param::Reg(Reg::A)) => fixed(&[0xE2], 8),
        (Param::Reg(Reg::A), Addr(arg)) => with_arg(&[0xFA], 16, arg, ArgKind::Word),
        (Addr(arg), Param::Reg(Reg::A)) => with_arg(&[0xEA], 16, arg, ArgKind::Word),
        (Addr(arg), Param::Reg(Reg::Sp)) => with_arg(&[0x08], 20, arg, ArgKind::Word),
        (Param::Reg(Reg::Sp), Param::Reg(Reg::Hl)) => fixed(&[0xF9], 8),
        (Param::Reg(Reg::Hl), SpPlus(arg)) => with_arg(&[0xF8], 12, arg, ArgKind::SignedByte),
        (dst, Imm(arg)) if r16(dst).is_some() => {
            let rr = r16(dst)?;
            with_arg(&[0x01 | rr << 4], 12, arg, ArgKind::Word)
        }
        (dst, Imm(arg)) => {
            let r = r8(dst)?;
            let cycles = if r == 6 { 12 } else { 8 };
            with_arg(&[0x06 | r << 3], cycles, arg, ArgKind::Byte)
        }
        (dst, src) => {
            let (d, s) = (r8(dst)?, r8(src)?);
            // 0x76 is halt
            if d == 6 && s == 6 {
                return None;
            }
            let cycles = if d == 6 || s == 6 { 8 } else { 4 };
            fixed(&[0x40 | d << 3 | s], cycles)
        }
    }
}

fn ld_step(params: &[Param], load: u8, store: u8) -> Option<Encoding> {
    match params {
        [Param::Reg(Reg::A), Param::Mem(Reg::Hl)] => fixed(&[load], 8),
        [Param::Mem(Reg::Hl), Param::Reg(Reg::A)] => fixed(&[store], 8),
        _ => None,
    }
}

fn ldh(params: &[Param]) -> Option<Encoding> {
    match params {
        [Param::Reg(Reg::A), Param::Addr(arg)] => with_arg(&[0xF0], 12, arg, ArgKind::HighPage),
        [Param::Addr(arg), Param::Reg(Reg::A)] => with_arg(&[0xE0], 12, arg, ArgKind::HighPage),
        [Param::Reg(Reg::A), Param::Mem(Reg::C)] => fixed(&[0xF2], 8),
        [Param::Mem(Reg::C), Param::Reg(Reg::A)] => fixed(&[0xE2], 8),
        _ => None,
    }
}

// `op a, x` and `op x` are both accepted
fn alu(params: &[Param], base: u8, immediate: u8) -> Option<Encoding> {
    let src = match params {
        [Param::Reg(Reg::A), src] | [src] => src,
        _ => return None,
    };
    match src {
        Param::Imm(arg) => with_arg(&[immediate], 8, arg, ArgKind::Byte),
        src => {
            let r = r8(src)?;
            fixed(&[base | r], if r == 6 { 8 } else { 4 })
        }
    }
}

fn add(params: &[Param]) -> Option<Encoding> {
    match params {
        [Param::Reg(Reg::Hl), src] => fixed(&[0x09 | r16(src)? << 4], 8),
        [Param::Reg(Reg::Sp), Param::Imm(arg)] => {
            with_arg(&[0xE8], 16, arg, ArgKind::SignedByte)
        }
        _ => alu(params, 0x80, 0xC6),
    }
}

fn inc_dec(params: &[Param], r8_base: u8, r16_base: u8) -> Option<Encoding> {
    let [param] = params else {
        return None;
    };
    if let Some(rr) = r16(param) {
        return fixed(&[r16_base | rr << 4], 8);
    }
    let r = r8(param)?;
    fixed(&[r8_base | r << 3], if r == 6 { 12 } else { 4 })
}

fn rotate(params: &[Param], base: u8) -> Option<Encoding> {
    let [param] = params else {
        return None;
    };
    let r = r8(param)?;
    fixed(&[0xCB, base | r], if r == 6 { 16 } else { 8 })
}

fn bit_op(params: &[Param], base: u8, hl_cycles: u8) -> Option<Encoding> {
    let [Param::Imm(arg), param] = params else {
        return None;
    };
    let r = r8(param)?;
    let cycles = if r == 6 { hl_cycles } else { 8 };
    with_arg(&[0xCB, base | r], cycles, arg, ArgKind::BitIndex)
}

fn jump(params: &[Param], base: u8, cond_base: u8, cycles: u8, kind: ArgKind) -> Option<Encoding> {
    match params {
        [Param::Imm(arg)] => with_arg(&[base], cycles, arg, kind),
        [cc, Param::Imm(arg)] => with_arg(&[cond_base | cond(cc)? << 3], cycles, arg, kind),
        _ => None,
    }
}

fn stack(params: &[Param], base: u8, cycles: u8) -> Option<Encoding> {
    match params {
        [Param::Reg(reg)] => fixed(&[base | reg.stack()? << 4], cycles),
        _ => None,
    }
}

pub fn select(mnemonic: &str, params: &[Param], pos: &Pos) -> Result<Encoding> {
    let mnemonic = mnemonic.to_ascii_lowercase();
    let encoding = match (mnemonic.as_str(), params) {
        ("nop", []) => fixed(&[0x00], 4),
        ("halt", []) => fixed(&[0x76], 4),
        ("stop", []) => fixed(&[0x10, 0x00], 4),
        ("di", []) => fixed(&[0xF3], 4),
        ("ei", []) => fixed(&[0xFB], 4),
        ("daa", []) => fixed(&[0x27], 4),
        ("cpl", []) => fixed(&[0x2F], 4),
        ("ccf", []) => fixed(&[0x3F], 4),
        ("scf", []) => fixed(&[0x37], 4),
        ("rlca", []) => fixed(&[0x07], 4),
        ("rla", []) => fixed(&[0x17], 4),
        ("rrca", []) => fixed(&[0x0F], 4),
        ("rra", []) => fixed(&[0x1F], 4),
        ("ld", [dst, src]) => ld(dst, src),
        ("ldi", params) => ld_step(params, 0x2A, 0x22),
        ("ldd", params) => ld_step(params, 0x3A, 0x32),
        ("ldh", params) => ldh(params),
        ("push", params) => stack(params, 0xC5, 16),
        ("pop", params) => stack(params, 0xC1, 12),
        ("add", params) => add(params),
        ("adc", params) => alu(params, 0x88, 0xCE),
        ("sub", params) => alu(params, 0x90, 0xD6),
        ("sbc", params) => alu(params, 0x98, 0xDE),
        ("and", params) => alu(params, 0xA0, 0xE6),
        ("xor", params) => alu(params, 0xA8, 0xEE),
        ("or", params) => alu(params, 0xB0, 0xF6),
        ("cp", params) => alu(params, 0xB8, 0xFE),
        ("inc", params) => inc_dec(params, 0x04, 0x03),
        ("dec", params) => inc_dec(params, 0x05, 0x0B),
        ("rlc", params) => rotate(params, 0x00),
        ("rrc", params) => rotate(params, 0x08),
        ("rl", params) => rotate(params, 0x10),
        ("rr", params) => rotate(params, 0x18),
        ("sla", params) => rotate(params, 0x20),
        ("sra", params) => rotate(params, 0x28),
        ("swap", params) => rotate(params, 0x30),
        ("srl", params) => rotate(params, 0x38),
        ("bit", params) => bit_op(params, 0x40, 12),
        ("res", params) => bit_op(params, 0x80, 16),
        ("set", params) => bit_op(params, 0xC0, 16),
        ("jp", [Param::Reg(Reg::Hl) | Param::Mem(Reg::Hl)]) => fixed(&[0xE9], 4),
        ("jp", params) => jump(params, 0xC3, 0xC2, 16, ArgKind::Word),
        ("jr", params) => jump(params, 0x18, 0x20, 12, ArgKind::Relative),
        ("call", params) => jump(params, 0xCD, 0xC4, 24, ArgKind::Word),
        ("ret", []) => fixed(&[0xC9], 16),
        ("ret", [cc]) => cond(cc).and_then(|cc| fixed(&[0xC0 | cc << 3], 20)),
        ("reti", []) => fixed(&[0xD9], 16),
        ("rst", [Param::Imm(arg)]) => with_arg(&[0xC7], 16, arg, ArgKind::Vector),
        _ => None,
    };
    encoding.ok_or_else(|| {
        let operands = params
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        Error::argument(pos, format!("invalid operands for {mnemonic}: \"{operands}\""))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{Token, TokenKind, TokenValue};

    fn imm(n: i64) -> Arg {
        Arg::Token(Token::new(
            TokenKind::Number,
            n.to_string(),
            TokenValue::Number(n),
            Pos::builtin("t"),
        ))
    }

    fn reg(name: &str) -> Param {
        Param::Reg(Reg::from_name(name).unwrap())
    }

    fn mem(name: &str) -> Param {
        Param::Mem(Reg::from_name(name).unwrap())
    }

    fn opcode(mnemonic: &str, params: &[Param]) -> Vec<u8> {
        select(mnemonic, params, &Pos::builtin("t")).unwrap().opcode
    }

    #[test]
    fn loads() {
        assert_eq!(opcode("ld", &[reg("b"), reg("c")]), [0x41]);
        assert_eq!(opcode("ld", &[reg("a"), mem("hl")]), [0x7E]);
        assert_eq!(opcode("ld", &[mem("hl"), Param::Imm(imm(1))]), [0x36]);
        assert_eq!(opcode("ld", &[reg("sp"), Param::Imm(imm(1))]), [0x31]);
        assert_eq!(opcode("ld", &[reg("a"), mem("hli")]), [0x2A]);
        assert_eq!(opcode("ldd", &[mem("hl"), reg("a")]), [0x32]);
        assert_eq!(opcode("ld", &[reg("a"), Param::Addr(imm(0xC000))]), [0xFA]);
        assert_eq!(opcode("ldh", &[Param::Addr(imm(0x80)), reg("a")]), [0xE0]);
        assert_eq!(opcode("ld", &[reg("hl"), Param::SpPlus(imm(2))]), [0xF8]);
    }

    #[test]
    fn hl_to_hl_is_not_a_load() {
        assert!(select("ld", &[mem("hl"), mem("hl")], &Pos::builtin("t")).is_err());
    }

    #[test]
    fn arithmetic() {
        assert_eq!(opcode("add", &[reg("a"), reg("b")]), [0x80]);
        assert_eq!(opcode("sub", &[reg("b")]), [0x90]);
        assert_eq!(opcode("cp", &[Param::Imm(imm(3))]), [0xFE]);
        assert_eq!(opcode("add", &[reg("hl"), reg("de")]), [0x19]);
        assert_eq!(opcode("inc", &[reg("sp")]), [0x33]);
        assert_eq!(opcode("dec", &[mem("hl")]), [0x35]);
    }

    #[test]
    fn prefixed() {
        assert_eq!(opcode("swap", &[reg("a")]), [0xCB, 0x37]);
        assert_eq!(opcode("bit", &[Param::Imm(imm(7)), reg("h")]), [0xCB, 0x44]);
    }

    #[test]
    fn control_flow() {
        let jp = select("jp", &[Param::Imm(imm(0x150))], &Pos::builtin("t")).unwrap();
        assert_eq!((jp.opcode.as_slice(), jp.cycles), (&[0xC3][..], 16));
        assert_eq!(jp.operand.unwrap().kind, ArgKind::Word);
        assert_eq!(opcode("jr", &[reg("c"), Param::Imm(imm(0))]), [0x38]);
        assert_eq!(opcode("call", &[reg("nz"), Param::Imm(imm(0))]), [0xC4]);
        assert_eq!(opcode("ret", &[reg("z")]), [0xC8]);
        assert_eq!(opcode("jp", &[mem("hl")]), [0xE9]);
        assert_eq!(opcode("push", &[reg("af")]), [0xF5]);
        assert_eq!(opcode("rst", &[Param::Imm(imm(0x38))]), [0xC7]);
    }

    #[test]
    fn invalid_operands_are_argument_errors() {
        let err = select("push", &[reg("sp")], &Pos::builtin("t")).unwrap_err();
        assert!(matches!(err, Error::Argument { .. }));
        assert!(err.message().contains("invalid operands for push: \"sp\""));
    }
}
