//! The gbz80 source grammar as a [`Lexer`] rule table.

use crate::{
    error::Result,
    lexer::{Lexer, Matcher, Rule, Transform},
    token::TokenKind,
};

pub const MNEMONICS: &[&str] = &[
    "adc", "add", "and", "bit", "call", "ccf", "cp", "cpl", "daa", "dec", "di", "ei", "halt",
    "inc", "jp", "jr", "ld", "ldh", "ldi", "ldd", "nop", "or", "pop", "push", "res", "ret", "reti",
    "rl", "rla", "rlc", "rlca", "rr", "rra", "rrc", "rrca", "rst", "sbc", "scf", "set", "sla",
    "sra", "srl", "stop", "sub", "swap", "xor",
];

pub const DIRECTIVES: &[&str] = &[
    "SECTION", "INCLUDE", "INCBIN", "BANK", "DB", "DW", "DS", "EQU", "EQUS",
];

pub const REGISTERS: &[&str] = &[
    "a", "b", "c", "d", "e", "h", "l", "af", "bc", "de", "hl", "sp", "hli", "hld", "nz", "z",
    "nc",
];

// longest first, the first literal that matches wins
pub const OPERATORS: &[&str] = &[
    "**", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "+", "-", "*", "/", "%", "&", "|", "^",
    "~", "!", "<", ">",
];

fn newline(c: char) -> bool {
    c == '\n'
}

fn blank(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r')
}

fn not_newline(c: char) -> bool {
    c != '\n'
}

fn semicolon(c: char) -> bool {
    c == ';'
}

fn digit(c: char) -> bool {
    c.is_ascii_digit()
}

fn hex_digit(c: char) -> bool {
    c.is_ascii_hexdigit() || c == '_'
}

fn bin_digit(c: char) -> bool {
    matches!(c, '0' | '1' | '_')
}

fn word_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn word(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn punct(kind: TokenKind, literal: &'static [&'static str]) -> Rule {
    Rule::new(kind, Matcher::Literals(literal))
}

pub fn rules() -> Result<Vec<Rule>> {
    Ok(vec![
        Rule::new(
            TokenKind::Newline,
            Matcher::Continuous {
                leading: newline,
                subsequent: None,
            },
        ),
        Rule::new(
            TokenKind::Whitespace,
            Matcher::Continuous {
                leading: blank,
                subsequent: None,
            },
        ),
        Rule::new(
            TokenKind::Comment,
            Matcher::Continuous {
                leading: semicolon,
                subsequent: Some(not_newline),
            },
        ),
        Rule::new(
            TokenKind::String,
            Matcher::Group {
                start: '"',
                end: '"',
                escape: Some('\\'),
            },
        )
        .transform(Transform::StripDelimiters)
        .transform(Transform::Unescape),
        Rule::new(
            TokenKind::Number,
            Matcher::Prefixed {
                prefix: "$",
                body: hex_digit,
            },
        )
        .transform(Transform::StripSeparators),
        Rule::new(
            TokenKind::Number,
            Matcher::Prefixed {
                prefix: "0x",
                body: hex_digit,
            },
        )
        .transform(Transform::StripSeparators),
        Rule::new(
            TokenKind::Number,
            Matcher::Prefixed {
                prefix: "%",
                body: bin_digit,
            },
        )
        .transform(Transform::StripSeparators),
        // must stay ahead of the operator rule
        Rule::new(
            TokenKind::Number,
            Matcher::Prefixed {
                prefix: "-",
                body: digit,
            },
        ),
        Rule::new(
            TokenKind::Number,
            Matcher::Continuous {
                leading: digit,
                subsequent: Some(word),
            },
        )
        .transform(Transform::StripSeparators)
        .reduce_regex(TokenKind::Number, r"^[0-9]+$")?,
        Rule::new(
            TokenKind::Name,
            Matcher::Continuous {
                leading: word_start,
                subsequent: Some(word),
            },
        )
        .reduce_words(TokenKind::Instruction, MNEMONICS)
        .reduce_words(TokenKind::Directive, DIRECTIVES)
        .reduce_words(TokenKind::Register, REGISTERS)
        .reduce_regex(TokenKind::Name, r"^[A-Za-z_][A-Za-z0-9_]*$")?,
        Rule::new(TokenKind::Operator, Matcher::Literals(OPERATORS)),
        punct(TokenKind::LParen, &["("]),
        punct(TokenKind::RParen, &[")"]),
        punct(TokenKind::LBracket, &["["]),
        punct(TokenKind::RBracket, &["]"]),
        punct(TokenKind::Comma, &[","]),
        punct(TokenKind::Colon, &[":"]),
        punct(TokenKind::Dot, &["."]),
        punct(TokenKind::At, &["@"]),
    ])
}

pub fn lexer() -> Result<Lexer> {
    Ok(Lexer::new(
        rules()?,
        vec![TokenKind::Whitespace, TokenKind::Comment],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Token;

    fn scan(text: &str) -> Vec<Token> {
        lexer().unwrap().scan("test.s", text).unwrap()
    }

    fn kinds(text: &str) -> Vec<TokenKind> {
        scan(text).iter().map(|tok| tok.kind).collect()
    }

    #[test]
    fn instruction_line() {
        assert_eq!(
            kinds("  LD a, [$FF80] ; load\n"),
            [
                TokenKind::Instruction,
                TokenKind::Register,
                TokenKind::Comma,
                TokenKind::LBracket,
                TokenKind::Number,
                TokenKind::RBracket,
                TokenKind::Newline,
            ]
        );
    }

    #[test]
    fn names_and_labels() {
        assert_eq!(
            kinds("Loop: .inner jr nz, @-2"),
            [
                TokenKind::Name,
                TokenKind::Colon,
                TokenKind::Dot,
                TokenKind::Name,
                TokenKind::Instruction,
                TokenKind::Register,
                TokenKind::Comma,
                TokenKind::At,
                TokenKind::Number,
            ]
        );
    }

    #[test]
    fn number_forms() {
        let toks = scan("$1_0 0x20 %1010_0101 -5 1_000");
        let texts: Vec<&str> = toks.iter().map(|tok| tok.text()).collect();
        assert_eq!(texts, ["$10", "0x20", "%10100101", "-5", "1000"]);
        assert!(toks.iter().all(|tok| tok.kind == TokenKind::Number));
    }

    #[test]
    fn modulo_is_not_binary() {
        assert_eq!(
            kinds("7 % 2"),
            [TokenKind::Number, TokenKind::Operator, TokenKind::Number]
        );
    }

    #[test]
    fn bad_decimal_does_not_reduce() {
        let err = lexer().unwrap().scan("test.s", "ld a, 12zz").unwrap_err();
        assert!(err.message().starts_with("Could not reduce"));
        assert_eq!(err.pos().unwrap().column, 7);
    }
}
