//! Symbol lookup and expression evaluation.

use crate::{
    error::{Error, Pos, Result},
    expr::{self, BinOp, ExprNode, UnOp},
    macros::{ArgType, Macro, MacroTable},
    program::{Arg, SourceFile, Symbol},
    token::{Token, TokenKind},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Number(i64),
    Text(String),
    Address(i64),
    Macro(&'static Macro),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Number(_) => "Number",
            Self::Text(_) => "Text",
            Self::Address(_) => "Address",
            Self::Macro(_) => "Macro",
        }
    }

    /// Numbers and addresses.
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Self::Number(n) | Self::Address(n) => Some(*n),
            _ => None,
        }
    }
}

// a symbol by identity, names are not unique across files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SymbolRef {
    file: usize,
    symbol: Symbol,
}

pub struct Resolver<'a> {
    files: &'a [SourceFile],
    macros: &'a MacroTable,
}

impl<'a> Resolver<'a> {
    pub fn new(files: &'a [SourceFile], macros: &'a MacroTable) -> Self {
        Self { files, macros }
    }

    /// Resolves `arg` as seen from `origin` at `offset`. With `relative`
    /// an address result becomes a distance from `offset`.
    pub fn resolve(&self, origin: usize, arg: &Arg, offset: i64, relative: bool) -> Result<Value> {
        let mut stack = Vec::new();
        let value = self.arg(origin, arg, offset, &mut stack)?;
        Ok(match value {
            Value::Address(address) if relative => Value::Number(address - offset),
            value => value,
        })
    }

    fn arg(
        &self,
        origin: usize,
        arg: &Arg,
        offset: i64,
        stack: &mut Vec<SymbolRef>,
    ) -> Result<Value> {
        match arg {
            Arg::Token(tok) => self.token(origin, tok, offset, stack),
            Arg::Expr(node) => self.eval(origin, node, offset, stack),
            Arg::Instruction(index) => {
                let instr = &self.files[origin].instructions[*index];
                Ok(Value::Address(instr.offset as i64))
            }
        }
    }

    fn token(
        &self,
        origin: usize,
        tok: &Token,
        offset: i64,
        stack: &mut Vec<SymbolRef>,
    ) -> Result<Value> {
        match tok.kind {
            TokenKind::Number => Ok(Value::Number(tok.number().unwrap_or_default())),
            TokenKind::String => Ok(Value::Text(tok.text().to_string())),
            TokenKind::Offset => Ok(Value::Address(offset + tok.number().unwrap_or_default())),
            TokenKind::Name => self.name(origin, tok, offset, stack),
            TokenKind::Label if tok.is_local_label_ref() => self.local_label(origin, tok),
            TokenKind::Expression => {
                let node = expr::parse(tok)?;
                self.eval(origin, &node, offset, stack)
            }
            kind => Err(Error::expression(
                &tok.pos,
                format!("unexpected {kind} \"{}\" in expression", tok.raw),
            )),
        }
    }

    fn lookup(&self, origin: usize, name: &str, pos: &Pos) -> Result<SymbolRef> {
        if name.starts_with('_') {
            if let Some(symbol) = self.files[origin].names.get(name) {
                return Ok(SymbolRef {
                    file: origin,
                    symbol: *symbol,
                });
            }
            if let Some(other) = self.files.iter().find(|file| file.names.contains_key(name)) {
                return Err(Error::reference(
                    pos,
                    format!("\"{name}\" is private to {}", other.name),
                ));
            }
        } else {
            for (file, source) in self.files.iter().enumerate() {
                if let Some(symbol) = source.names.get(name) {
                    return Ok(SymbolRef {
                        file,
                        symbol: *symbol,
                    });
                }
            }
        }
        Err(Error::reference(pos, format!("Unresolved name \"{name}\"")))
    }

    fn describe(&self, symbol: SymbolRef) -> String {
        let file = &self.files[symbol.file];
        let name = match symbol.symbol {
            Symbol::Label(index) => file.label_name(index),
            Symbol::Variable(index) => file.variables[index].name.clone(),
            Symbol::Constant(index) => file.constants[index].name.clone(),
        };
        format!("{name} ({})", file.name)
    }

    fn name(
        &self,
        origin: usize,
        tok: &Token,
        offset: i64,
        stack: &mut Vec<SymbolRef>,
    ) -> Result<Value> {
        let name = tok.text();
        if let Some(m) = self.macros.get(name) {
            return Ok(Value::Macro(m));
        }
        let symbol = self.lookup(origin, name, &tok.pos)?;
        self.symbol(symbol, &tok.pos, offset, stack)
    }

    /// Resolves a constant the same way a reference to it would.
    pub fn constant(&self, file: usize, index: usize) -> Result<Value> {
        let symbol = SymbolRef {
            file,
            symbol: Symbol::Constant(index),
        };
        let pos = &self.files[file].constants[index].pos;
        self.symbol(symbol, pos, 0, &mut Vec::new())
    }

    /// Whether `arg` evaluates to Text. Decided from literals, `EQUS`
    /// constants and macro return types, no number is evaluated so the
    /// answer holds before layout.
    pub fn is_text(&self, origin: usize, arg: &Arg) -> Result<bool> {
        match arg {
            Arg::Token(tok) => self.token_is_text(origin, tok),
            Arg::Expr(node) => self.node_is_text(origin, node),
            Arg::Instruction(_) => Ok(false),
        }
    }

    fn token_is_text(&self, origin: usize, tok: &Token) -> Result<bool> {
        match tok.kind {
            TokenKind::String => Ok(true),
            TokenKind::Name if !self.macros.contains(tok.text()) => {
                let symbol = self.lookup(origin, tok.text(), &tok.pos)?;
                let file = &self.files[symbol.file];
                Ok(matches!(symbol.symbol, Symbol::Constant(index) if file.constants[index].is_string))
            }
            TokenKind::Expression => self.node_is_text(origin, &expr::parse(tok)?),
            _ => Ok(false),
        }
    }

    fn node_is_text(&self, origin: usize, node: &ExprNode) -> Result<bool> {
        match node {
            ExprNode::Leaf(tok) => self.token_is_text(origin, tok),
            // text only concatenates
            ExprNode::Binary {
                op: BinOp::Add,
                left,
                ..
            } => self.node_is_text(origin, left),
            ExprNode::Binary { .. } | ExprNode::Unary { .. } => Ok(false),
            ExprNode::Call { name, .. } => Ok(self
                .macros
                .get(name)
                .is_some_and(|m| m.returns == ArgType::Text)),
        }
    }

    fn symbol(
        &self,
        symbol: SymbolRef,
        pos: &Pos,
        offset: i64,
        stack: &mut Vec<SymbolRef>,
    ) -> Result<Value> {
        let file = &self.files[symbol.file];
        match symbol.symbol {
            Symbol::Label(index) => Ok(Value::Address(file.labels[index].offset as i64)),
            Symbol::Variable(index) => Ok(Value::Address(file.variables[index].offset as i64)),
            Symbol::Constant(index) => {
                if let Some(start) = stack.iter().position(|open| *open == symbol) {
                    let chain = stack[start..]
                        .iter()
                        .chain([&symbol])
                        .map(|link| self.describe(*link))
                        .collect::<Vec<_>>()
                        .join(" -> ");
                    return Err(Error::reference(pos, format!("circular reference: {chain}")));
                }
                let constant = &file.constants[index];
                stack.push(symbol);
                let value = self.arg(symbol.file, &constant.value, offset, stack);
                stack.pop();
                let value = value?;
                let text = matches!(value, Value::Text(_));
                match (text, constant.is_string) {
                    (true, true) | (false, false) => Ok(value),
                    (false, true) => Err(Error::expression(
                        &constant.pos,
                        format!(
                            "EQUS constant \"{}\" must be Text, found {}",
                            constant.name,
                            value.type_name()
                        ),
                    )),
                    (true, false) => Err(Error::expression(
                        &constant.pos,
                        format!(
                            "EQU constant \"{}\" must be a Number, found Text",
                            constant.name
                        ),
                    )),
                }
            }
        }
    }

    fn local_label(&self, origin: usize, tok: &Token) -> Result<Value> {
        let file = &self.files[origin];
        let name = tok.text();
        let parent = file
            .global_labels()
            .filter(|(_, label)| label.pos.offset <= tok.pos.offset)
            .max_by_key(|(_, label)| label.pos.offset);
        let Some((_, parent)) = parent else {
            return Err(Error::reference(
                &tok.pos,
                format!("local label \".{name}\" has no enclosing global label"),
            ));
        };
        parent
            .children
            .iter()
            .map(|child| &file.labels[*child])
            .find(|child| child.name == name)
            .map(|child| Value::Address(child.offset as i64))
            .ok_or_else(|| {
                Error::reference(
                    &tok.pos,
                    format!("local label \".{name}\" is not defined in \"{}\"", parent.name),
                )
            })
    }

    fn eval(
        &self,
        origin: usize,
        node: &ExprNode,
        offset: i64,
        stack: &mut Vec<SymbolRef>,
    ) -> Result<Value> {
        match node {
            ExprNode::Leaf(tok) => self.token(origin, tok, offset, stack),
            ExprNode::Unary { op, operand, pos } => {
                let value = self.eval(origin, operand, offset, stack)?;
                let Some(n) = value.as_number() else {
                    return Err(Error::expression(
                        pos,
                        format!(
                            "unary \"{}\" expects Number, found {}",
                            op.symbol(),
                            value.type_name()
                        ),
                    ));
                };
                Ok(Value::Number(match op {
                    UnOp::Not => (n == 0) as i64,
                    UnOp::Neg => n.wrapping_neg(),
                    UnOp::BitNot => !(n as i32) as i64,
                    UnOp::Plus => n,
                }))
            }
            ExprNode::Binary {
                op,
                left,
                right,
                pos,
            } => {
                let left = self.eval(origin, left, offset, stack)?;
                let right = self.eval(origin, right, offset, stack)?;
                binary(*op, left, right, pos)
            }
            ExprNode::Call { name, args, pos } => {
                let Some(m) = self.macros.get(name) else {
                    return Err(Error::expression(pos, format!("unknown macro \"{name}\"")));
                };
                let args = args
                    .iter()
                    .map(|arg| self.eval(origin, arg, offset, stack))
                    .collect::<Result<Vec<_>>>()?;
                m.call(&args).map_err(|msg| Error::expression(pos, msg))
            }
        }
    }
}

fn binary(op: BinOp, left: Value, right: Value, pos: &Pos) -> Result<Value> {
    let mismatch = |left: &Value, right: &Value| {
        Error::expression(
            pos,
            format!(
                "cannot apply \"{}\" to {} and {}",
                op.symbol(),
                left.type_name(),
                right.type_name()
            ),
        )
    };
    if let (Value::Text(a), Value::Text(b)) = (&left, &right) {
        return match op {
            BinOp::Add => Ok(Value::Text(format!("{a}{b}"))),
            BinOp::Eq => Ok(Value::Number((a == b) as i64)),
            BinOp::Ne => Ok(Value::Number((a != b) as i64)),
            _ => Err(mismatch(&left, &right)),
        };
    }
    let (Some(a), Some(b)) = (left.as_number(), right.as_number()) else {
        return Err(mismatch(&left, &right));
    };
    let is_address = |value: &Value| matches!(value, Value::Address(_));
    let shift = |b: i64| {
        u32::try_from(b).ok().filter(|b| *b < 32).ok_or_else(|| {
            Error::expression(pos, format!("shift amount {b} is out of range 0..32"))
        })
    };
    Ok(match op {
        BinOp::Add if is_address(&left) || is_address(&right) => Value::Address(a.wrapping_add(b)),
        BinOp::Sub if is_address(&left) && !is_address(&right) => Value::Address(a.wrapping_sub(b)),
        BinOp::Add => Value::Number(a.wrapping_add(b)),
        BinOp::Sub => Value::Number(a.wrapping_sub(b)),
        BinOp::Mul => Value::Number(a.wrapping_mul(b)),
        BinOp::Div | BinOp::Rem if b == 0 => {
            return Err(Error::expression(pos, "division by zero"));
        }
        BinOp::Div => Value::Number(a.wrapping_div(b)),
        BinOp::Rem => Value::Number(a.wrapping_rem(b)),
        BinOp::Pow if b < 0 => {
            return Err(Error::expression(pos, format!("negative exponent {b}")));
        }
        BinOp::Pow => Value::Number(a.wrapping_pow(b.min(u32::MAX as i64) as u32)),
        BinOp::BitAnd => Value::Number(((a as i32) & (b as i32)) as i64),
        BinOp::BitOr => Value::Number(((a as i32) | (b as i32)) as i64),
        BinOp::BitXor => Value::Number(((a as i32) ^ (b as i32)) as i64),
        BinOp::Shl => Value::Number((a as i32).wrapping_shl(shift(b)?) as i64),
        BinOp::Shr => Value::Number(((a as i32) >> shift(b)?) as i64),
        BinOp::Eq => Value::Number((a == b) as i64),
        BinOp::Ne => Value::Number((a != b) as i64),
        BinOp::Lt => Value::Number((a < b) as i64),
        BinOp::Gt => Value::Number((a > b) as i64),
        BinOp::Le => Value::Number((a <= b) as i64),
        BinOp::Ge => Value::Number((a >= b) as i64),
        BinOp::LogicalAnd => Value::Number((a != 0 && b != 0) as i64),
        BinOp::LogicalOr => Value::Number((a != 0 || b != 0) as i64),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{self, MemoryLoader};

    fn files(sources: &[(&str, &str)]) -> Vec<SourceFile> {
        let mut loader = MemoryLoader::new();
        let mut root = String::new();
        for (name, text) in sources {
            loader.insert(name, *text);
            root.push_str(&format!("INCLUDE \"{name}\"\n"));
        }
        loader.insert("root.s", root);
        let mut files = parser::parse(&loader, "root.s").unwrap();
        files.remove(0);
        files
    }

    fn constant(files: &[SourceFile], name: &str) -> Result<Value> {
        let macros = MacroTable::builtin();
        let resolver = Resolver::new(files, &macros);
        let (origin, symbol) = files
            .iter()
            .enumerate()
            .find_map(|(i, file)| file.names.get(name).map(|symbol| (i, *symbol)))
            .unwrap();
        let Symbol::Constant(index) = symbol else {
            panic!("{name} is not a constant");
        };
        resolver.constant(origin, index)
    }

    fn eval(text: &str) -> Result<Value> {
        let files = files(&[("a.s", &format!("X EQU {text}\n"))]);
        constant(&files, "X")
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(eval("1 + 2 * 3"), Ok(Value::Number(7)));
        assert_eq!(eval("(1 + 2) * 3"), Ok(Value::Number(9)));
        assert_eq!(eval("-7 / 2"), Ok(Value::Number(-3)));
        assert_eq!(eval("-7 % 2"), Ok(Value::Number(-1)));
        assert_eq!(eval("2 ** 3 ** 2"), Ok(Value::Number(512)));
        assert_eq!(eval("1 << 4 | 1"), Ok(Value::Number(17)));
        assert_eq!(eval("~0"), Ok(Value::Number(-1)));
        assert_eq!(eval("3 > 2 && 1 == 1"), Ok(Value::Number(1)));
        assert_eq!(eval("!5"), Ok(Value::Number(0)));
    }

    #[test]
    fn arithmetic_errors() {
        assert!(matches!(eval("1 / 0"), Err(Error::Expression { .. })));
        assert!(matches!(eval("2 ** -1"), Err(Error::Expression { .. })));
        assert!(matches!(eval("1 << 40"), Err(Error::Expression { .. })));
    }

    #[test]
    fn strings() {
        assert_eq!(eval("\"ab\" + \"cd\""), Ok(Value::Text("abcd".into())));
        assert_eq!(eval("\"ab\" == \"ab\""), Ok(Value::Number(1)));
        let err = eval("\"ab\" + 1").unwrap_err();
        assert!(err.message().contains("cannot apply \"+\" to Text and Number"));
        let err = eval("-\"ab\"").unwrap_err();
        assert!(err.message().contains("expects Number, found Text"));
    }

    #[test]
    fn macro_calls() {
        assert_eq!(eval("STRLEN(\"hello\") + 1"), Ok(Value::Number(6)));
        assert_eq!(eval("HIGH($1234)"), Ok(Value::Number(0x12)));
        let err = eval("STRUPR(42)").unwrap_err();
        assert!(matches!(err, Error::Expression { .. }));
        assert!(err.message().contains("expected Text, found Number"));
        let err = eval("NOPE(1)").unwrap_err();
        assert!(err.message().contains("unknown macro"));
    }

    #[test]
    fn constants_resolve_recursively() {
        let files = files(&[
            ("a.s", "A EQU B + 1\nNAME EQUS STRCAT(\"g\", \"b\")\n"),
            ("b.s", "B EQU C * 2\nC EQU 5\n"),
        ]);
        assert_eq!(constant(&files, "A"), Ok(Value::Number(11)));
        assert_eq!(constant(&files, "NAME"), Ok(Value::Text("gb".into())));
    }

    #[test]
    fn circular_constants() {
        let files = files(&[("a.s", "A EQU B\n"), ("b.s", "B EQU A\n")]);
        let err = constant(&files, "A").unwrap_err();
        assert!(matches!(err, Error::Reference { .. }));
        assert_eq!(
            err.message(),
            "circular reference: A (a.s) -> B (b.s) -> A (a.s)"
        );
    }

    #[test]
    fn private_names() {
        let files = files(&[("a.s", "X EQU _HIDDEN\n"), ("b.s", "_HIDDEN EQU 1\n")]);
        let err = constant(&files, "X").unwrap_err();
        assert!(err.message().contains("\"_HIDDEN\" is private to b.s"), "{err}");
    }

    #[test]
    fn unresolved_names() {
        let err = eval("MISSING + 1").unwrap_err();
        assert!(matches!(err, Error::Reference { .. }));
        assert!(err.message().contains("Unresolved name \"MISSING\""));
    }

    #[test]
    fn equ_types_are_checked() {
        let files = files(&[("a.s", "S EQUS 1\nN EQU \"x\"\n")]);
        assert!(matches!(constant(&files, "S"), Err(Error::Expression { .. })));
        assert!(matches!(constant(&files, "N"), Err(Error::Expression { .. })));
    }

    #[test]
    fn local_labels_use_enclosing_scope() {
        let mut files = files(&[(
            "a.s",
            "SECTION \"a\", ROM0\nFirst:\n.loop: nop\n jr .loop\nSecond:\n.loop: nop\n jr .loop\n",
        )]);
        for (i, label) in files[0].labels.iter_mut().enumerate() {
            label.offset = 0x100 * i as u32;
        }
        let macros = MacroTable::builtin();
        let resolver = Resolver::new(&files, &macros);
        let first = &files[0].instructions[1].operand.as_ref().unwrap().arg;
        let second = &files[0].instructions[3].operand.as_ref().unwrap().arg;
        assert_eq!(resolver.resolve(0, first, 0, false), Ok(Value::Address(0x100)));
        assert_eq!(resolver.resolve(0, second, 0, false), Ok(Value::Address(0x300)));
        assert_eq!(resolver.resolve(0, second, 0x310, true), Ok(Value::Number(-0x10)));
    }

    #[test]
    fn address_arithmetic() {
        let mut files = files(&[(
            "a.s",
            "SECTION \"a\", ROM0\nStart: nop\nEnd:\nLEN EQU End - Start\nNEXT EQU End + 1\n",
        )]);
        files[0].labels[0].offset = 0x150;
        files[0].labels[1].offset = 0x151;
        assert_eq!(constant(&files, "LEN"), Ok(Value::Number(1)));
        assert_eq!(constant(&files, "NEXT"), Ok(Value::Address(0x152)));
    }

    #[test]
    fn text_is_known_before_layout() {
        let macros = MacroTable::builtin();
        let text = |source: &str| {
            let files = files(&[(
                "a.s",
                &format!("NAME EQUS \"gb\"\nSIZE EQU 4\nX EQU {source}\n"),
            )]);
            let arg = files[0].constants[2].value.clone();
            Resolver::new(&files, &macros).is_text(0, &arg)
        };
        assert_eq!(text("\"gb\""), Ok(true));
        assert_eq!(text("NAME"), Ok(true));
        assert_eq!(text("STRUPR(NAME) + \"!\""), Ok(true));
        assert_eq!(text("SIZE"), Ok(false));
        assert_eq!(text("STRLEN(NAME)"), Ok(false));
        assert_eq!(text("100 / (SIZE - 4)"), Ok(false));
        assert!(matches!(text("MISSING"), Err(Error::Reference { .. })));
    }
}
