//! Precedence climbing parser for the contents of `Expression` tokens.

use std::fmt::{self, Display, Formatter};

use crate::{
    error::{Error, Pos, Result},
    token::{Token, TokenKind},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    LogicalOr,
    LogicalAnd,
    BitOr,
    BitXor,
    BitAnd,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

impl BinOp {
    pub fn from_symbol(op: &str) -> Option<Self> {
        Some(match op {
            "||" => Self::LogicalOr,
            "&&" => Self::LogicalAnd,
            "|" => Self::BitOr,
            "^" => Self::BitXor,
            "&" => Self::BitAnd,
            "==" => Self::Eq,
            "!=" => Self::Ne,
            "<" => Self::Lt,
            ">" => Self::Gt,
            "<=" => Self::Le,
            ">=" => Self::Ge,
            "<<" => Self::Shl,
            ">>" => Self::Shr,
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            "%" => Self::Rem,
            "**" => Self::Pow,
            _ => return None,
        })
    }

    pub fn precedence(self) -> u8 {
        match self {
            Self::LogicalOr => 1,
            Self::LogicalAnd => 2,
            Self::BitOr => 3,
            Self::BitXor => 4,
            Self::BitAnd => 5,
            Self::Eq | Self::Ne => 6,
            Self::Lt | Self::Gt | Self::Le | Self::Ge => 7,
            Self::Shl | Self::Shr => 8,
            Self::Add | Self::Sub => 9,
            Self::Mul | Self::Div | Self::Rem => 11,
            Self::Pow => 12,
        }
    }

    fn right_assoc(self) -> bool {
        self == Self::Pow
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::LogicalOr => "||",
            Self::LogicalAnd => "&&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::BitAnd => "&",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Pow => "**",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Not,
    Neg,
    BitNot,
    Plus,
}

impl UnOp {
    pub fn from_symbol(op: &str) -> Option<Self> {
        Some(match op {
            "!" => Self::Not,
            "-" => Self::Neg,
            "~" => Self::BitNot,
            "+" => Self::Plus,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Not => "!",
            Self::Neg => "-",
            Self::BitNot => "~",
            Self::Plus => "+",
        }
    }
}

// same level as binary `+`/`-`
const UNARY_PRECEDENCE: u8 = 9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExprNode {
    Binary {
        op: BinOp,
        left: Box<ExprNode>,
        right: Box<ExprNode>,
        pos: Pos,
    },
    Unary {
        op: UnOp,
        operand: Box<ExprNode>,
        pos: Pos,
    },
    Leaf(Token),
    Call {
        name: String,
        args: Vec<ExprNode>,
        pos: Pos,
    },
}

impl ExprNode {
    pub fn pos(&self) -> &Pos {
        match self {
            Self::Binary { pos, .. } | Self::Unary { pos, .. } | Self::Call { pos, .. } => pos,
            Self::Leaf(tok) => &tok.pos,
        }
    }
}

impl Display for ExprNode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Binary {
                op, left, right, ..
            } => write!(f, "({left} {} {right})", op.symbol()),
            Self::Unary { op, operand, .. } => write!(f, "{}{operand}", op.symbol()),
            Self::Leaf(tok) => write!(f, "{tok}"),
            Self::Call { name, args, .. } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i != 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

/// Parses an `Expression` token into a tree. Any other token becomes a leaf.
pub fn parse(tok: &Token) -> Result<ExprNode> {
    let Some(toks) = tok.group() else {
        return Ok(ExprNode::Leaf(tok.clone()));
    };
    let mut parser = Parser {
        toks,
        index: 0,
        start: &tok.pos,
    };
    let node = parser.binary(0)?;
    if let Some(extra) = parser.peek() {
        return Err(Error::parse(
            &extra.pos,
            format!("unexpected {} \"{}\" in expression", extra.kind, extra.raw),
        ));
    }
    Ok(node)
}

struct Parser<'a> {
    toks: &'a [Token],
    index: usize,
    start: &'a Pos,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.toks.get(self.index)
    }

    fn next(&mut self) -> Result<&'a Token> {
        let tok = self.toks.get(self.index).ok_or_else(|| {
            let pos = self.toks.last().map_or(self.start, |tok| &tok.pos);
            Error::parse(pos, "unexpected end of expression")
        })?;
        self.index += 1;
        Ok(tok)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<()> {
        let tok = self.next().map_err(|e| {
            let pos = e.pos().unwrap_or(self.start);
            Error::parse(pos, format!("expected {kind}, found end of expression"))
        })?;
        if tok.kind != kind {
            return Err(Error::parse(
                &tok.pos,
                format!("expected {kind}, found {}", tok.kind),
            ));
        }
        Ok(())
    }

    fn peek_binary(&self) -> Option<BinOp> {
        self.peek()
            .filter(|tok| tok.kind == TokenKind::Operator)
            .and_then(|tok| BinOp::from_symbol(&tok.raw))
    }

    fn binary(&mut self, min_precedence: u8) -> Result<ExprNode> {
        let mut left = self.unary()?;
        while let Some(op) = self.peek_binary() {
            let precedence = op.precedence();
            if precedence <= min_precedence {
                break;
            }
            let pos = self.next()?.pos.clone();
            let bump = if op.right_assoc() { 0 } else { 1 };
            let right = self.binary(precedence + bump - 1)?;
            left = ExprNode::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
                pos,
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<ExprNode> {
        let tok = self.next()?;
        match tok.kind {
            TokenKind::Operator => {
                let Some(op) = UnOp::from_symbol(&tok.raw) else {
                    return Err(Error::parse(
                        &tok.pos,
                        format!("unexpected operator \"{}\", expected a value", tok.raw),
                    ));
                };
                let operand = self.binary(UNARY_PRECEDENCE)?;
                Ok(ExprNode::Unary {
                    op,
                    operand: Box::new(operand),
                    pos: tok.pos.clone(),
                })
            }
            TokenKind::LParen => {
                let node = self.binary(0)?;
                self.expect(TokenKind::RParen)?;
                Ok(node)
            }
            TokenKind::Name if self.peek().is_some_and(|next| next.is(TokenKind::LParen)) => {
                self.index += 1;
                let mut args = Vec::new();
                if self.peek().is_some_and(|next| next.is(TokenKind::RParen)) {
                    self.index += 1;
                } else {
                    args.push(self.binary(0)?);
                    while self.peek().is_some_and(|next| next.is(TokenKind::Comma)) {
                        self.index += 1;
                        args.push(self.binary(0)?);
                    }
                    self.expect(TokenKind::RParen)?;
                }
                Ok(ExprNode::Call {
                    name: tok.raw.clone(),
                    args,
                    pos: tok.pos.clone(),
                })
            }
            TokenKind::Number | TokenKind::String | TokenKind::Name | TokenKind::Offset => {
                Ok(ExprNode::Leaf(tok.clone()))
            }
            TokenKind::Label if tok.is_local_label_ref() => Ok(ExprNode::Leaf(tok.clone())),
            kind => Err(Error::parse(
                &tok.pos,
                format!("unexpected {kind} \"{}\", expected a value", tok.raw),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{grammar, grouper};

    fn tree(text: &str) -> Result<String> {
        let toks = grammar::lexer().unwrap().scan("test.s", text).unwrap();
        let toks = grouper::group(toks).unwrap();
        parse(&toks[0]).map(|node| node.to_string())
    }

    #[test]
    fn precedence_levels() {
        assert_eq!(tree("1 + 2 * 3").unwrap(), "(1 + (2 * 3))");
        assert_eq!(tree("1 | 2 ^ 3 & 4").unwrap(), "(1 | (2 ^ (3 & 4)))");
        assert_eq!(tree("1 << 2 + 3").unwrap(), "(1 << (2 + 3))");
        assert_eq!(tree("A == 1 || B < 2 && C").unwrap(), "((A == 1) || ((B < 2) && C))");
    }

    #[test]
    fn left_and_right_associativity() {
        assert_eq!(tree("8 - 4 - 2").unwrap(), "((8 - 4) - 2)");
        assert_eq!(tree("2 ** 3 ** 2").unwrap(), "(2 ** (3 ** 2))");
    }

    #[test]
    fn unary_operators() {
        assert_eq!(tree("-X + 1").unwrap(), "(-X + 1)");
        assert_eq!(tree("~(1 | 2)").unwrap(), "~(1 | 2)");
        assert_eq!(tree("!A == 0").unwrap(), "(!A == 0)");
    }

    #[test]
    fn parentheses() {
        assert_eq!(tree("(1 + 2) * 3").unwrap(), "((1 + 2) * 3)");
    }

    #[test]
    fn macro_calls() {
        assert_eq!(
            tree("STRLEN(STRCAT(\"a\", S)) + 1").unwrap(),
            "(STRLEN(STRCAT(\"a\", S)) + 1)"
        );
    }

    #[test]
    fn comma_outside_call_needs_close_paren() {
        let err = tree("(1, 2)").unwrap_err();
        assert!(err.message().contains("expected RPAREN, found COMMA"), "{err}");
    }
}
