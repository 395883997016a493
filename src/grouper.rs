//! Second pass over the flat token list.
//!
//! Decodes number literals, fuses label and relative offset sequences into
//! single tokens and collapses runs of value/operator tokens into
//! `Expression` tokens. Running the pass on its own output is a no-op.

use crate::{
    error::{Error, Pos, Result},
    token::{LabelTok, Token, TokenKind, TokenValue},
};

pub fn group(toks: Vec<Token>) -> Result<Vec<Token>> {
    let toks = convert_literals(toks)?;
    let toks = fuse_labels(toks)?;
    let toks = split_negative_literals(toks);
    group_expressions(toks)
}

pub fn parse_number(text: &str, pos: &Pos) -> Result<i64> {
    let (digits, radix, negative) = if let Some(hex) = text.strip_prefix('$') {
        (hex, 16, false)
    } else if let Some(hex) = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        (hex, 16, false)
    } else if let Some(bin) = text.strip_prefix('%') {
        (bin, 2, false)
    } else if let Some(dec) = text.strip_prefix('-') {
        (dec, 10, true)
    } else {
        (text, 10, false)
    };
    let digits: String = digits.chars().filter(|c| *c != '_').collect();
    let value = i64::from_str_radix(&digits, radix)
        .map_err(|e| Error::parse(pos, format!("invalid number literal \"{text}\": {e}")))?;
    if value > u32::MAX as i64 {
        return Err(Error::parse(pos, format!("number literal \"{text}\" is too large")));
    }
    Ok(if negative { -value } else { value })
}

fn convert_literals(mut toks: Vec<Token>) -> Result<Vec<Token>> {
    for tok in toks.iter_mut().filter(|tok| tok.kind == TokenKind::Number) {
        if let TokenValue::Text(text) = &tok.value {
            let value = parse_number(text, &tok.pos)?;
            tok.value = TokenValue::Number(value);
        }
    }
    Ok(toks)
}

fn label(name: &Token, pos: Pos, local: bool, reference: bool, raw: String) -> Token {
    Token::new(
        TokenKind::Label,
        raw,
        TokenValue::Label(LabelTok {
            name: name.raw.clone(),
            local,
            reference,
        }),
        pos,
    )
}

fn fuse_labels(toks: Vec<Token>) -> Result<Vec<Token>> {
    let mut out = Vec::with_capacity(toks.len());
    let mut i = 0;
    while i < toks.len() {
        let tok = &toks[i];
        let next = toks.get(i + 1);
        match tok.kind {
            TokenKind::Name if next.is_some_and(|next| next.is(TokenKind::Colon)) => {
                out.push(label(
                    tok,
                    tok.pos.clone(),
                    false,
                    false,
                    format!("{}:", tok.raw),
                ));
                i += 2;
            }
            TokenKind::Dot => {
                let Some(name) = next.filter(|next| next.is(TokenKind::Name)) else {
                    return Err(Error::parse(&tok.pos, "expected label name after '.'"));
                };
                if toks.get(i + 2).is_some_and(|colon| colon.is(TokenKind::Colon)) {
                    out.push(label(
                        name,
                        tok.pos.clone(),
                        true,
                        false,
                        format!(".{}:", name.raw),
                    ));
                    i += 3;
                } else {
                    out.push(label(
                        name,
                        tok.pos.clone(),
                        true,
                        true,
                        format!(".{}", name.raw),
                    ));
                    i += 2;
                }
            }
            TokenKind::At => {
                let (delta, used) = match (next, toks.get(i + 2)) {
                    (Some(sign), Some(num))
                        if (sign.is_operator("+") || sign.is_operator("-"))
                            && num.is(TokenKind::Number) =>
                    {
                        let value = num.number().unwrap_or_default();
                        (if sign.is_operator("-") { -value } else { value }, 3)
                    }
                    (Some(num), _) if num.is(TokenKind::Number) && num.raw.starts_with('-') => {
                        (num.number().unwrap_or_default(), 2)
                    }
                    _ => {
                        return Err(Error::parse(
                            &tok.pos,
                            "expected `+` or `-` and a number after '@'",
                        ))
                    }
                };
                let raw: String = toks[i..i + used].iter().map(|tok| tok.raw.as_str()).collect();
                out.push(Token::new(
                    TokenKind::Offset,
                    raw,
                    TokenValue::Offset(delta),
                    tok.pos.clone(),
                ));
                i += used;
            }
            _ => {
                out.push(tok.clone());
                i += 1;
            }
        }
    }
    Ok(out)
}

fn is_value(tok: &Token) -> bool {
    match tok.kind {
        TokenKind::Number | TokenKind::String | TokenKind::Offset | TokenKind::Name => true,
        TokenKind::Label => tok.label().is_some_and(|label| label.reference),
        TokenKind::RParen => true,
        _ => false,
    }
}

// `5-3` lexes as `5` `-3`, turn the literal back into an operator
fn split_negative_literals(toks: Vec<Token>) -> Vec<Token> {
    let mut out: Vec<Token> = Vec::with_capacity(toks.len());
    for tok in toks {
        let negative = tok.kind == TokenKind::Number && tok.raw.starts_with('-');
        if negative && out.last().is_some_and(is_value) {
            let value = -tok.number().unwrap_or_default();
            let mut pos = tok.pos.clone();
            pos.offset += 1;
            if pos.line != 0 {
                pos.column += 1;
            }
            out.push(Token::new(
                TokenKind::Operator,
                "-",
                TokenValue::Text("-".into()),
                tok.pos.clone(),
            ));
            out.push(Token::new(
                TokenKind::Number,
                &tok.raw[1..],
                TokenValue::Number(value),
                pos,
            ));
        } else {
            out.push(tok);
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Value,
    Name,
    Unary,
    Binary,
    Open,
    Close,
    Comma,
}

fn classify(tok: &Token) -> Option<Class> {
    match tok.kind {
        TokenKind::Number | TokenKind::String | TokenKind::Offset => Some(Class::Value),
        TokenKind::Label if tok.is_local_label_ref() => Some(Class::Value),
        TokenKind::Name => Some(Class::Name),
        TokenKind::Operator if matches!(tok.raw.as_str(), "!" | "~") => Some(Class::Unary),
        TokenKind::Operator => Some(Class::Binary),
        TokenKind::LParen => Some(Class::Open),
        TokenKind::RParen => Some(Class::Close),
        TokenKind::Comma => Some(Class::Comma),
        _ => None,
    }
}

fn can_start(tok: &Token) -> bool {
    match classify(tok) {
        Some(Class::Value | Class::Name | Class::Unary | Class::Open) => true,
        Some(Class::Binary) => tok.raw == "-" || tok.raw == "+",
        _ => false,
    }
}

// can `cur` follow `prev` inside an expression run
fn adjacent(prev: Class, cur: &Token, depth: usize, call_open: bool) -> bool {
    let Some(class) = classify(cur) else {
        return false;
    };
    let operand = matches!(class, Class::Value | Class::Name | Class::Open | Class::Unary)
        || (class == Class::Binary && (cur.raw == "-" || cur.raw == "+"));
    match prev {
        Class::Value => {
            class == Class::Binary || (depth > 0 && matches!(class, Class::Close | Class::Comma))
        }
        Class::Name => {
            matches!(class, Class::Binary | Class::Open)
                || (depth > 0 && matches!(class, Class::Close | Class::Comma))
        }
        Class::Unary | Class::Binary | Class::Comma => operand,
        Class::Open => operand || (call_open && class == Class::Close),
        Class::Close => {
            class == Class::Binary || (depth > 0 && matches!(class, Class::Close | Class::Comma))
        }
    }
}

fn group_expressions(toks: Vec<Token>) -> Result<Vec<Token>> {
    let mut out = Vec::with_capacity(toks.len());
    let mut i = 0;
    while i < toks.len() {
        if !can_start(&toks[i]) {
            out.push(toks[i].clone());
            i += 1;
            continue;
        }
        let start = i;
        let mut depth = 0usize;
        let mut prev: Option<Class> = None;
        let mut prev_tok: Option<&Token> = None;
        while i < toks.len() {
            let tok = &toks[i];
            let ok = match prev {
                None => can_start(tok),
                Some(prev) => {
                    let call_open = prev == Class::Open
                        && i >= start + 2
                        && classify(&toks[i - 2]) == Some(Class::Name);
                    adjacent(prev, tok, depth, call_open)
                }
            };
            if !ok {
                break;
            }
            let mut class = classify(tok).unwrap_or(Class::Value);
            // unary use of `-`/`+`
            if class == Class::Binary && !matches!(prev, Some(Class::Value | Class::Name | Class::Close)) {
                class = Class::Unary;
            }
            match class {
                Class::Open => depth += 1,
                Class::Close => depth -= 1,
                _ => {}
            }
            prev = Some(class);
            prev_tok = Some(tok);
            i += 1;
        }
        let run = &toks[start..i];
        if depth > 0 {
            return Err(Error::parse(&run[0].pos, "unclosed parenthesis in expression"));
        }
        if let (Some(last), Some(class)) = (prev_tok, prev) {
            if matches!(class, Class::Binary | Class::Unary | Class::Comma) {
                return Err(Error::parse(
                    &last.pos,
                    format!("dangling \"{}\" at end of expression", last.raw),
                ));
            }
        }
        if run.len() == 1 {
            out.push(run[0].clone());
            continue;
        }
        let raw = run
            .iter()
            .map(|tok| tok.raw.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        out.push(Token::new(
            TokenKind::Expression,
            raw,
            TokenValue::Group(run.to_vec()),
            run[0].pos.clone(),
        ));
    }
    Ok(out)
}
