//! Table driven tokenizer.
//!
//! A [`Lexer`] is compiled from an ordered list of [`Rule`]s. At every
//! position of the input the rules are tried in declaration order and the
//! first one producing a non-empty match wins, so the order of the table is
//! part of the grammar (e.g. negative number literals must come before the
//! operator rule).

use std::sync::Arc;

use regex::Regex;

use crate::{
    error::{Error, Pos, Result},
    token::{Token, TokenKind, TokenValue},
};

pub type CharClass = fn(char) -> bool;

pub enum Matcher {
    /// One `leading` char followed by any number of `subsequent` chars
    /// (`leading` again when no subsequent class is given).
    Continuous {
        leading: CharClass,
        subsequent: Option<CharClass>,
    },
    /// A fixed prefix followed by at least one `body` char.
    Prefixed {
        prefix: &'static str,
        body: CharClass,
    },
    /// The first literal the input starts with.
    Literals(&'static [&'static str]),
    /// Everything from `start` up to and including the matching `end`.
    /// Any char directly after `escape` is part of the content.
    Group {
        start: char,
        end: char,
        escape: Option<char>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    StripDelimiters,
    Unescape,
    StripSeparators,
    Lowercase,
    Uppercase,
}

pub enum Pattern {
    Regex(Regex),
    Words(&'static [&'static str]),
}

impl Pattern {
    fn matches(&self, text: &str) -> bool {
        match self {
            Self::Regex(re) => re.is_match(text),
            Self::Words(words) => words.iter().any(|word| word.eq_ignore_ascii_case(text)),
        }
    }
}

pub struct Reduction {
    pub kind: TokenKind,
    pub pattern: Pattern,
}

pub struct Rule {
    pub kind: TokenKind,
    pub matcher: Matcher,
    pub transforms: Vec<Transform>,
    pub reductions: Vec<Reduction>,
}

impl Rule {
    pub fn new(kind: TokenKind, matcher: Matcher) -> Self {
        Self {
            kind,
            matcher,
            transforms: Vec::new(),
            reductions: Vec::new(),
        }
    }

    pub fn transform(mut self, transform: Transform) -> Self {
        self.transforms.push(transform);
        self
    }

    pub fn reduce_words(mut self, kind: TokenKind, words: &'static [&'static str]) -> Self {
        self.reductions.push(Reduction {
            kind,
            pattern: Pattern::Words(words),
        });
        self
    }

    pub fn reduce_regex(mut self, kind: TokenKind, pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern)
            .map_err(|e| Error::Internal(format!("bad reduction pattern `{pattern}`: {e}")))?;
        self.reductions.push(Reduction {
            kind,
            pattern: Pattern::Regex(re),
        });
        Ok(self)
    }

    fn capture(&self, rest: &str) -> Option<usize> {
        match &self.matcher {
            Matcher::Continuous {
                leading,
                subsequent,
            } => {
                let mut chars = rest.chars();
                let first = chars.next()?;
                if !leading(first) {
                    return None;
                }
                let subsequent = subsequent.unwrap_or(*leading);
                let mut len = first.len_utf8();
                for c in chars {
                    if !subsequent(c) {
                        break;
                    }
                    len += c.len_utf8();
                }
                Some(len)
            }
            Matcher::Prefixed { prefix, body } => {
                match rest.get(..prefix.len()) {
                    Some(head) if head.eq_ignore_ascii_case(prefix) => {}
                    _ => return None,
                }
                let body_len: usize = rest[prefix.len()..]
                    .chars()
                    .take_while(|c| body(*c))
                    .map(char::len_utf8)
                    .sum();
                (body_len > 0).then_some(prefix.len() + body_len)
            }
            Matcher::Literals(literals) => literals
                .iter()
                .find(|literal| rest.starts_with(*literal))
                .map(|literal| literal.len()),
            Matcher::Group { start, end, escape } => {
                let mut chars = rest.char_indices();
                match chars.next() {
                    Some((_, c)) if c == *start => {}
                    _ => return None,
                }
                let mut escaped = false;
                for (i, c) in chars {
                    if escaped {
                        escaped = false;
                        continue;
                    }
                    if Some(c) == *escape {
                        escaped = true;
                        continue;
                    }
                    if c == *end {
                        return Some(i + c.len_utf8());
                    }
                }
                None
            }
        }
    }

    fn apply_transforms(&self, capture: &str) -> String {
        let mut text = capture.to_string();
        for transform in &self.transforms {
            text = match transform {
                Transform::StripDelimiters => {
                    let mut chars = text.chars();
                    chars.next();
                    chars.next_back();
                    chars.as_str().to_string()
                }
                Transform::Unescape => unescape(&text),
                Transform::StripSeparators => text.chars().filter(|c| *c != '_').collect(),
                Transform::Lowercase => text.to_ascii_lowercase(),
                Transform::Uppercase => text.to_ascii_uppercase(),
            };
        }
        text
    }

    fn reduce(&self, text: &str) -> Option<TokenKind> {
        if self.reductions.is_empty() {
            return Some(self.kind);
        }
        self.reductions
            .iter()
            .find(|reduction| reduction.pattern.matches(text))
            .map(|reduction| reduction.kind)
    }
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

pub struct Lexer {
    rules: Vec<Rule>,
    ignored: Vec<TokenKind>,
    track_positions: bool,
}

impl Lexer {
    pub fn new(rules: Vec<Rule>, ignored: Vec<TokenKind>) -> Self {
        Self {
            rules,
            ignored,
            track_positions: true,
        }
    }

    pub fn track_positions(mut self, track: bool) -> Self {
        self.track_positions = track;
        self
    }

    pub fn scan(&self, file: &str, text: &str) -> Result<Vec<Token>> {
        let file: Arc<str> = Arc::from(file);
        let mut toks = Vec::new();
        let mut offset = 0;
        let mut line = 1;
        let mut column = 1;
        while offset < text.len() {
            let rest = &text[offset..];
            let pos = if self.track_positions {
                Pos::new(file.clone(), line, column, offset)
            } else {
                Pos::new(file.clone(), 0, 0, offset)
            };
            let Some((rule, len)) = self
                .rules
                .iter()
                .find_map(|rule| rule.capture(rest).filter(|len| *len > 0).map(|len| (rule, len)))
            else {
                let c = rest.chars().next().unwrap_or_default();
                return Err(Error::parse(&pos, format!("Unmatched character {c:?}")));
            };
            let capture = &rest[..len];
            let value = rule.apply_transforms(capture);
            let Some(kind) = rule.reduce(&value) else {
                return Err(Error::parse(&pos, format!("Could not reduce {capture:?}")));
            };
            if !self.ignored.contains(&kind) {
                toks.push(Token::new(kind, capture, TokenValue::Text(value), pos));
            }
            for c in capture.chars() {
                if c == '\n' {
                    line += 1;
                    column = 1;
                } else {
                    column += 1;
                }
            }
            offset += len;
        }
        Ok(toks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn digit(c: char) -> bool {
        c.is_ascii_digit()
    }

    fn alnum(c: char) -> bool {
        c.is_ascii_alphanumeric()
    }

    fn space(c: char) -> bool {
        c == ' ' || c == '\n'
    }

    fn small() -> Lexer {
        let rules = vec![
            Rule::new(
                TokenKind::Whitespace,
                Matcher::Continuous {
                    leading: space,
                    subsequent: None,
                },
            ),
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
                    subsequent: Some(alnum),
                },
            )
            .reduce_regex(TokenKind::Number, r"^[0-9]+$")
            .unwrap(),
            Rule::new(TokenKind::Operator, Matcher::Literals(&["**", "*", "-", "+"])),
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
        ];
        Lexer::new(rules, vec![TokenKind::Whitespace])
    }

    fn kinds(toks: &[Token]) -> Vec<TokenKind> {
        toks.iter().map(|tok| tok.kind).collect()
    }

    #[test]
    fn negative_literal_rule_wins_over_operator() {
        let toks = small().scan("t", "-12 - 3").unwrap();
        assert_eq!(
            kinds(&toks),
            [TokenKind::Number, TokenKind::Operator, TokenKind::Number]
        );
        assert_eq!(toks[0].text(), "-12");
        assert_eq!(toks[1].text(), "-");
    }

    #[test]
    fn literal_order_prefers_longer_operator() {
        let toks = small().scan("t", "2**3*4").unwrap();
        assert_eq!(toks[1].text(), "**");
        assert_eq!(toks[3].text(), "*");
    }

    #[test]
    fn group_keeps_escaped_delimiter() {
        let toks = small().scan("t", r#""a\"b\n""#).unwrap();
        assert_eq!(toks.len(), 1);
        assert_eq!(toks[0].text(), "a\"b\n");
    }

    #[test]
    fn unmatched_character_reports_line_and_column() {
        let err = small().scan("t", "1\n 2 ?").unwrap_err();
        let pos = err.pos().unwrap();
        assert_eq!((pos.line, pos.column), (2, 4));
        assert!(err.message().contains("Unmatched character"));
    }

    #[test]
    fn unmatched_character_reports_offset_without_tracking() {
        let err = small()
            .track_positions(false)
            .scan("t", "1 ?")
            .unwrap_err();
        let pos = err.pos().unwrap();
        assert_eq!((pos.line, pos.offset), (0, 2));
        assert_eq!(err.to_string(), "t@2: ParseError: Unmatched character '?'");
    }

    #[test]
    fn failed_reduction_is_an_error() {
        let err = small().scan("t", "12ab").unwrap_err();
        assert!(err.message().contains("Could not reduce"));
    }
}
