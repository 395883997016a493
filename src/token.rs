use std::fmt::{self, Display, Formatter};

use crate::error::Pos;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Whitespace,
    Comment,
    Newline,

    Number,
    String,
    Name,
    Instruction,
    Directive,
    Register,
    Operator,

    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Dot,
    At,

    // produced by the grouping pass
    Expression,
    Label,
    Offset,
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Whitespace => "WHITESPACE",
            Self::Comment => "COMMENT",
            Self::Newline => "NEWLINE",
            Self::Number => "NUMBER",
            Self::String => "STRING",
            Self::Name => "NAME",
            Self::Instruction => "INSTRUCTION",
            Self::Directive => "DIRECTIVE",
            Self::Register => "REGISTER",
            Self::Operator => "OPERATOR",
            Self::LParen => "LPAREN",
            Self::RParen => "RPAREN",
            Self::LBracket => "LBRACKET",
            Self::RBracket => "RBRACKET",
            Self::Comma => "COMMA",
            Self::Colon => "COLON",
            Self::Dot => "DOT",
            Self::At => "AT",
            Self::Expression => "EXPRESSION",
            Self::Label => "LABEL",
            Self::Offset => "OFFSET",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenValue {
    None,
    Number(i64),
    Text(String),
    Group(Vec<Token>),
    Label(LabelTok),
    Offset(i64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTok {
    pub name: String,
    pub local: bool,
    pub reference: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub raw: String,
    pub value: TokenValue,
    pub pos: Pos,
}

impl Token {
    pub fn new(kind: TokenKind, raw: impl Into<String>, value: TokenValue, pos: Pos) -> Self {
        Self {
            kind,
            raw: raw.into(),
            value,
            pos,
        }
    }

    /// Canonical text of word and string tokens, raw text otherwise.
    pub fn text(&self) -> &str {
        match &self.value {
            TokenValue::Text(text) => text,
            TokenValue::Label(label) => &label.name,
            _ => &self.raw,
        }
    }

    pub fn number(&self) -> Option<i64> {
        match self.value {
            TokenValue::Number(value) | TokenValue::Offset(value) => Some(value),
            _ => None,
        }
    }

    pub fn label(&self) -> Option<&LabelTok> {
        match &self.value {
            TokenValue::Label(label) => Some(label),
            _ => None,
        }
    }

    pub fn group(&self) -> Option<&[Token]> {
        match &self.value {
            TokenValue::Group(toks) => Some(toks),
            _ => None,
        }
    }

    pub fn is(&self, kind: TokenKind) -> bool {
        self.kind == kind
    }

    pub fn is_operator(&self, op: &str) -> bool {
        self.kind == TokenKind::Operator && self.raw == op
    }

    /// Words compare case-insensitively, everything else by raw text.
    pub fn is_word(&self, word: &str) -> bool {
        matches!(
            self.kind,
            TokenKind::Name | TokenKind::Instruction | TokenKind::Directive | TokenKind::Register
        ) && self.raw.eq_ignore_ascii_case(word)
    }

    pub fn is_local_label_ref(&self) -> bool {
        matches!(&self.value, TokenValue::Label(label) if label.local && label.reference)
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.value {
            TokenValue::Group(toks) => {
                for (i, tok) in toks.iter().enumerate() {
                    if i != 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{tok}")?;
                }
                Ok(())
            }
            TokenValue::Label(label) if label.local => write!(f, ".{}", label.name),
            TokenValue::Offset(delta) => write!(f, "@{delta:+}"),
            TokenValue::Text(text) if self.kind == TokenKind::String => write!(f, "\"{text}\""),
            _ => f.write_str(&self.raw),
        }
    }
}
