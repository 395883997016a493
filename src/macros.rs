//! Built-in macro functions callable from expressions.

use std::fmt::{self, Debug, Formatter};

use crate::resolver::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Number,
    Text,
}

impl ArgType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Number => "Number",
            Self::Text => "Text",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::Number, Value::Number(_) | Value::Address(_)) | (Self::Text, Value::Text(_))
        )
    }
}

pub type Handler = fn(&[Value]) -> Result<Value, String>;

pub struct Macro {
    pub name: &'static str,
    pub args: &'static [ArgType],
    pub returns: ArgType,
    handler: Handler,
}

impl Macro {
    /// Type checks `args` and runs the handler. Errors are plain messages,
    /// the resolver attaches the call position.
    pub fn call(&self, args: &[Value]) -> Result<Value, String> {
        if args.len() != self.args.len() {
            return Err(format!(
                "{} takes {} argument(s), found {}",
                self.name,
                self.args.len(),
                args.len()
            ));
        }
        for (i, (expected, value)) in self.args.iter().zip(args).enumerate() {
            if !expected.accepts(value) {
                return Err(format!(
                    "{} argument {}: expected {}, found {}",
                    self.name,
                    i + 1,
                    expected.name(),
                    value.type_name()
                ));
            }
        }
        (self.handler)(args)
    }
}

impl PartialEq for Macro {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Macro {}

impl Debug for Macro {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Macro")
            .field("name", &self.name)
            .field("args", &self.args)
            .finish()
    }
}

// handlers only run after `Macro::call` checked the argument types
fn text(value: &Value) -> &str {
    match value {
        Value::Text(text) => text,
        _ => "",
    }
}

fn number(value: &Value) -> i64 {
    match value {
        Value::Number(n) | Value::Address(n) => *n,
        _ => 0,
    }
}

fn strupr(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Text(text(&args[0]).to_uppercase()))
}

fn strlwr(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Text(text(&args[0]).to_lowercase()))
}

// bytes, the size the text takes in `DB`/`DS`
fn strlen(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(text(&args[0]).len() as i64))
}

fn strcat(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Text(format!("{}{}", text(&args[0]), text(&args[1]))))
}

// 1-based start, the length is clamped to the end of the string
fn strsub(args: &[Value]) -> Result<Value, String> {
    let s = text(&args[0]);
    let (start, len) = (number(&args[1]), number(&args[2]));
    let count = s.chars().count() as i64;
    if start < 1 || start > count + 1 {
        return Err(format!(
            "STRSUB start {start} is out of bounds for a string of length {count}"
        ));
    }
    if len < 0 {
        return Err(format!("STRSUB length {len} is negative"));
    }
    let sub = s.chars().skip(start as usize - 1).take(len as usize).collect();
    Ok(Value::Text(sub))
}

// 1-based position of the needle, 0 when absent
fn strin(args: &[Value]) -> Result<Value, String> {
    let (s, needle) = (text(&args[0]), text(&args[1]));
    let pos = s
        .find(needle)
        .map_or(0, |byte| s[..byte].chars().count() as i64 + 1);
    Ok(Value::Number(pos))
}

fn high(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number((number(&args[0]) >> 8) & 0xFF))
}

fn low(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(number(&args[0]) & 0xFF))
}

fn min(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(number(&args[0]).min(number(&args[1]))))
}

fn max(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(number(&args[0]).max(number(&args[1]))))
}

fn abs(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Number(number(&args[0]).abs()))
}

use ArgType::{Number as N, Text as T};

static BUILTINS: [Macro; 11] = [
    Macro { name: "STRUPR", args: &[T], returns: T, handler: strupr },
    Macro { name: "STRLWR", args: &[T], returns: T, handler: strlwr },
    Macro { name: "STRLEN", args: &[T], returns: N, handler: strlen },
    Macro { name: "STRCAT", args: &[T, T], returns: T, handler: strcat },
    Macro { name: "STRSUB", args: &[T, N, N], returns: T, handler: strsub },
    Macro { name: "STRIN", args: &[T, T], returns: N, handler: strin },
    Macro { name: "HIGH", args: &[N], returns: N, handler: high },
    Macro { name: "LOW", args: &[N], returns: N, handler: low },
    Macro { name: "MIN", args: &[N, N], returns: N, handler: min },
    Macro { name: "MAX", args: &[N, N], returns: N, handler: max },
    Macro { name: "ABS", args: &[N], returns: N, handler: abs },
];

/// Immutable lookup table of macro functions.
#[derive(Debug, Clone, Copy)]
pub struct MacroTable {
    macros: &'static [Macro],
}

impl MacroTable {
    pub fn builtin() -> Self {
        Self {
            macros: &BUILTINS,
        }
    }

    pub fn get(&self, name: &str) -> Option<&'static Macro> {
        self.macros.iter().find(|m| m.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

impl Default for MacroTable {
    fn default() -> Self {
        Self::builtin()
    }
}
