use std::{
    fmt::{self, Display, Formatter},
    sync::Arc,
};

/// A location in a source file.
///
/// `offset` is always tracked. `line` and `column` are 1-based and only
/// filled in when the lexer tracks positions, otherwise they are zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pos {
    pub file: Arc<str>,
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Pos {
    pub fn new(file: Arc<str>, line: usize, column: usize, offset: usize) -> Self {
        Self {
            file,
            line,
            column,
            offset,
        }
    }

    /// Position for symbols that do not come from any source text.
    pub fn builtin(file: &str) -> Self {
        Self::new(Arc::from(file), 1, 1, 0)
    }
}

impl Display for Pos {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{}@{}", self.file, self.offset)
        } else {
            write!(f, "{}:{}:{}", self.file, self.line, self.column)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("{pos}: ReferenceError: {msg}")]
    Reference { pos: Pos, msg: String },

    #[error("{pos}: AddressError: {msg}")]
    Address { pos: Pos, msg: String },

    #[error("{pos}: ArgumentError: {msg}")]
    Argument { pos: Pos, msg: String },

    #[error("{pos}: ExpressionError: {msg}")]
    Expression { pos: Pos, msg: String },

    #[error("{pos}: DeclarationError: {msg}\n\tfirst declared at {original}")]
    Declaration { pos: Pos, msg: String, original: Pos },

    #[error("{pos}: IncludeError: {msg}")]
    Include { pos: Pos, msg: String },

    #[error("{pos}: ParseError: {msg}")]
    Parse { pos: Pos, msg: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn reference(pos: &Pos, msg: impl Into<String>) -> Self {
        Self::Reference {
            pos: pos.clone(),
            msg: msg.into(),
        }
    }

    pub fn address(pos: &Pos, msg: impl Into<String>) -> Self {
        Self::Address {
            pos: pos.clone(),
            msg: msg.into(),
        }
    }

    pub fn argument(pos: &Pos, msg: impl Into<String>) -> Self {
        Self::Argument {
            pos: pos.clone(),
            msg: msg.into(),
        }
    }

    pub fn expression(pos: &Pos, msg: impl Into<String>) -> Self {
        Self::Expression {
            pos: pos.clone(),
            msg: msg.into(),
        }
    }

    pub fn include(pos: &Pos, msg: impl Into<String>) -> Self {
        Self::Include {
            pos: pos.clone(),
            msg: msg.into(),
        }
    }

    pub fn parse(pos: &Pos, msg: impl Into<String>) -> Self {
        Self::Parse {
            pos: pos.clone(),
            msg: msg.into(),
        }
    }

    pub fn declaration(pos: &Pos, msg: impl Into<String>, original: &Pos) -> Self {
        Self::Declaration {
            pos: pos.clone(),
            msg: msg.into(),
            original: original.clone(),
        }
    }

    pub fn pos(&self) -> Option<&Pos> {
        match self {
            Self::Reference { pos, .. }
            | Self::Address { pos, .. }
            | Self::Argument { pos, .. }
            | Self::Expression { pos, .. }
            | Self::Declaration { pos, .. }
            | Self::Include { pos, .. }
            | Self::Parse { pos, .. } => Some(pos),
            Self::Internal(_) => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Reference { msg, .. }
            | Self::Address { msg, .. }
            | Self::Argument { msg, .. }
            | Self::Expression { msg, .. }
            | Self::Declaration { msg, .. }
            | Self::Include { msg, .. }
            | Self::Parse { msg, .. } => msg,
            Self::Internal(msg) => msg,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
