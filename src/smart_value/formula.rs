//! Sandboxed formula language used by `={...}` expressions.
//!
//! The grammar is deliberately tiny: literals (numbers, quoted strings,
//! `True`/`False`/`None`, list and dict literals), arithmetic
//! (`+ - * / // % **`), chained comparisons, `and`/`or`/`not`, indexing and
//! calls to a fixed set of functions. Nothing else is reachable.
//!
//! ```text
//! expr       := or
//! or         := and ('or' and)*
//! and        := not ('and' not)*
//! not        := 'not' not | comparison
//! comparison := sum (cmp_op sum)*
//! sum        := term (('+' | '-') term)*
//! term       := unary (('*' | '/' | '//' | '%') unary)*
//! unary      := ('-' | '+') unary | power
//! power      := postfix ('**' unary)?
//! postfix    := atom ('[' expr ']')*
//! atom       := number | string | name '(' args ')' | constant
//!             | '(' expr ')' | '[' items ']' | '{' pairs '}'
//! ```

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::Rng;

use crate::error::{OpsResult, ResolutionError};
use crate::value::{Value, ValueMap};

/// Deepest allowed nesting of parentheses, containers, calls and prefix operators.
pub const MAX_FORMULA_DEPTH: usize = 64;

/// Longest allowed formula, in tokens. Bounds the depth of operator chains.
pub const MAX_FORMULA_TOKENS: usize = 4096;

/// Functions callable from a formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Int,
    Str,
    Float,
    Rand,
    RandInt,
    Choice,
    Ceil,
    Len,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "int" => Self::Int,
            "str" => Self::Str,
            "float" => Self::Float,
            "rand" => Self::Rand,
            "randint" => Self::RandInt,
            "choice" => Self::Choice,
            "ceil" => Self::Ceil,
            "len" => Self::Len,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Int(i128),
    Float(f64),
    Str(String),
    Name(String),
    Op(&'static str),
}

const OPERATORS: [&str; 21] = [
    "**", "//", "==", "!=", "<=", ">=", "<", ">", "+", "-", "*", "/", "%", "(", ")", "[", "]", "{", "}",
    ",", ":",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Dict(Vec<(Expr, Expr)>),
    Neg(Box<Expr>),
    Not(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, Vec<(CompareOp, Expr)>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Index(Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

struct FormulaError(String);

type FResult<T> = Result<T, FormulaError>;

fn err<T>(message: impl Into<String>) -> FResult<T> {
    Err(FormulaError(message.into()))
}

fn tokenize(text: &str) -> FResult<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let start = i;
            let mut is_float = false;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '_') {
                i += 1;
            }
            if i < chars.len() && chars[i] == '.' {
                is_float = true;
                i += 1;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                is_float = true;
                i += 1;
                if i < chars.len() && (chars[i] == '+' || chars[i] == '-') {
                    i += 1;
                }
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            let literal: String = chars[start..i].iter().filter(|c| **c != '_').collect();
            if is_float {
                let v = literal.parse::<f64>().map_err(|e| FormulaError(format!("bad number '{literal}': {e}")))?;
                tokens.push(Token::Float(v));
            } else {
                let v = literal.parse::<i128>().map_err(|e| FormulaError(format!("bad number '{literal}': {e}")))?;
                tokens.push(Token::Int(v));
            }
            continue;
        }
        if c == '\'' || c == '"' {
            let quote = c;
            let mut out = String::new();
            i += 1;
            loop {
                let Some(&ch) = chars.get(i) else {
                    return err("unterminated string literal");
                };
                i += 1;
                if ch == quote {
                    break;
                }
                if ch == '\\' {
                    let Some(&escaped) = chars.get(i) else {
                        return err("unterminated string literal");
                    };
                    i += 1;
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                } else {
                    out.push(ch);
                }
            }
            tokens.push(Token::Str(out));
            continue;
        }
        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(Token::Name(chars[start..i].iter().collect()));
            continue;
        }
        let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
        let Some(op) = OPERATORS.iter().copied().find(|op| rest.starts_with(*op)) else {
            return err(format!("unexpected character '{c}'"));
        };
        tokens.push(Token::Op(op));
        i += op.chars().count();
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_op(&self, op: &str) -> bool {
        matches!(self.peek(), Some(Token::Op(o)) if *o == op)
    }

    fn peek_name(&self, name: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(n)) if n == name)
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.peek_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_op(&mut self, op: &str) -> FResult<()> {
        if self.eat_op(op) {
            Ok(())
        } else {
            err(format!("expected '{op}'"))
        }
    }

    fn nested(&mut self, rule: fn(&mut Self) -> FResult<Expr>) -> FResult<Expr> {
        if self.depth >= MAX_FORMULA_DEPTH {
            return err(format!("formula nests deeper than {MAX_FORMULA_DEPTH} levels"));
        }
        self.depth += 1;
        let parsed = rule(self);
        self.depth -= 1;
        parsed
    }

    fn expr(&mut self) -> FResult<Expr> {
        self.nested(Self::or)
    }

    fn or(&mut self) -> FResult<Expr> {
        let mut left = self.and()?;
        while self.peek_name("or") {
            self.pos += 1;
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> FResult<Expr> {
        let mut left = self.not()?;
        while self.peek_name("and") {
            self.pos += 1;
            let right = self.not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn not(&mut self) -> FResult<Expr> {
        if self.peek_name("not") {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.nested(Self::not)?)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> FResult<Expr> {
        let first = self.sum()?;
        let mut rest = Vec::new();
        loop {
            let op = match self.peek() {
                Some(Token::Op("==")) => CompareOp::Eq,
                Some(Token::Op("!=")) => CompareOp::Ne,
                Some(Token::Op("<")) => CompareOp::Lt,
                Some(Token::Op("<=")) => CompareOp::Le,
                Some(Token::Op(">")) => CompareOp::Gt,
                Some(Token::Op(">=")) => CompareOp::Ge,
                _ => break,
            };
            self.pos += 1;
            rest.push((op, self.sum()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare(Box::new(first), rest))
        }
    }

    fn sum(&mut self) -> FResult<Expr> {
        let mut left = self.term()?;
        loop {
            let op = if self.eat_op("+") {
                BinaryOp::Add
            } else if self.eat_op("-") {
                BinaryOp::Sub
            } else {
                break;
            };
            let right = self.term()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn term(&mut self) -> FResult<Expr> {
        let mut left = self.unary()?;
        loop {
            let op = if self.eat_op("*") {
                BinaryOp::Mul
            } else if self.eat_op("//") {
                BinaryOp::FloorDiv
            } else if self.eat_op("/") {
                BinaryOp::Div
            } else if self.eat_op("%") {
                BinaryOp::Mod
            } else {
                break;
            };
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> FResult<Expr> {
        if self.eat_op("-") {
            return Ok(Expr::Neg(Box::new(self.nested(Self::unary)?)));
        }
        if self.eat_op("+") {
            return self.nested(Self::unary);
        }
        self.power()
    }

    fn power(&mut self) -> FResult<Expr> {
        let base = self.postfix()?;
        if self.eat_op("**") {
            let exponent = self.nested(Self::unary)?;
            return Ok(Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> FResult<Expr> {
        let mut expr = self.atom()?;
        while self.eat_op("[") {
            let index = self.expr()?;
            self.expect_op("]")?;
            expr = Expr::Index(Box::new(expr), Box::new(index));
        }
        Ok(expr)
    }

    fn sequence(&mut self, close: &str) -> FResult<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.eat_op(close) {
            items.push(self.expr()?);
            if !self.eat_op(",") {
                self.expect_op(close)?;
                break;
            }
        }
        Ok(items)
    }

    fn atom(&mut self) -> FResult<Expr> {
        let Some(token) = self.tokens.get(self.pos).cloned() else {
            return err("unexpected end of formula");
        };
        self.pos += 1;
        match token {
            Token::Int(v) => Ok(Expr::Literal(Value::Int(v))),
            Token::Float(v) => Ok(Expr::Literal(Value::Float(v))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Name(name) => match name.as_str() {
                "True" | "true" => Ok(Expr::Literal(Value::Bool(true))),
                "False" | "false" => Ok(Expr::Literal(Value::Bool(false))),
                "None" | "null" => Ok(Expr::Literal(Value::Null)),
                _ => {
                    let Some(function) = Function::lookup(&name) else {
                        return err(format!("name '{name}' is not allowed"));
                    };
                    self.expect_op("(")?;
                    let args = self.sequence(")")?;
                    Ok(Expr::Call(function, args))
                }
            },
            Token::Op("(") => {
                let inner = self.expr()?;
                self.expect_op(")")?;
                Ok(inner)
            }
            Token::Op("[") => Ok(Expr::List(self.sequence("]")?)),
            Token::Op("{") => {
                let mut pairs = Vec::new();
                while !self.eat_op("}") {
                    let key = self.expr()?;
                    self.expect_op(":")?;
                    let value = self.expr()?;
                    pairs.push((key, value));
                    if !self.eat_op(",") {
                        self.expect_op("}")?;
                        break;
                    }
                }
                Ok(Expr::Dict(pairs))
            }
            Token::Op(op) => err(format!("unexpected '{op}'")),
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Bytes(b) => !b.is_empty(),
        Value::List(l) => !l.is_empty(),
        Value::Map(m) => !m.is_empty(),
    }
}

/// Numeric view of a value; booleans count as integers.
enum Number {
    Int(i128),
    Float(f64),
}

fn number(value: &Value) -> Option<Number> {
    match value {
        Value::Bool(b) => Some(Number::Int(i128::from(*b))),
        Value::Int(i) => Some(Number::Int(*i)),
        Value::Float(f) => Some(Number::Float(*f)),
        _ => None,
    }
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(n: &Number) -> f64 {
    match n {
        Number::Int(i) => *i as f64,
        Number::Float(f) => *f,
    }
}

fn overflow() -> FormulaError {
    FormulaError("integer overflow".to_string())
}

fn int_arith(op: BinaryOp, a: i128, b: i128) -> FResult<Value> {
    let value = match op {
        BinaryOp::Add => Value::Int(a.checked_add(b).ok_or_else(overflow)?),
        BinaryOp::Sub => Value::Int(a.checked_sub(b).ok_or_else(overflow)?),
        BinaryOp::Mul => Value::Int(a.checked_mul(b).ok_or_else(overflow)?),
        BinaryOp::Div => {
            if b == 0 {
                return err("division by zero");
            }
            #[allow(clippy::cast_precision_loss)]
            Value::Float(a as f64 / b as f64)
        }
        BinaryOp::FloorDiv => {
            if b == 0 {
                return err("division by zero");
            }
            let mut q = a.checked_div(b).ok_or_else(overflow)?;
            if a % b != 0 && ((a < 0) != (b < 0)) {
                q -= 1;
            }
            Value::Int(q)
        }
        BinaryOp::Mod => {
            if b == 0 {
                return err("modulo by zero");
            }
            let mut r = a.checked_rem(b).ok_or_else(overflow)?;
            if r != 0 && ((r < 0) != (b < 0)) {
                r += b;
            }
            Value::Int(r)
        }
        BinaryOp::Pow => {
            if b < 0 {
                #[allow(clippy::cast_precision_loss)]
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            let exp = u32::try_from(b).map_err(|_| overflow())?;
            Value::Int(a.checked_pow(exp).ok_or_else(overflow)?)
        }
    };
    Ok(value)
}

fn float_arith(op: BinaryOp, a: f64, b: f64) -> FResult<Value> {
    let value = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return err("division by zero");
            }
            a / b
        }
        BinaryOp::FloorDiv => {
            if b == 0.0 {
                return err("division by zero");
            }
            (a / b).floor()
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return err("modulo by zero");
            }
            a - b * (a / b).floor()
        }
        BinaryOp::Pow => a.powf(b),
    };
    Ok(Value::Float(value))
}

fn repeat<T: Clone>(items: &[T], times: i128) -> Vec<T> {
    let times = usize::try_from(times).unwrap_or(0);
    let mut out = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        out.extend_from_slice(items);
    }
    out
}

fn binary(op: BinaryOp, left: Value, right: Value) -> FResult<Value> {
    if let (Some(a), Some(b)) = (number(&left), number(&right)) {
        return match (a, b) {
            (Number::Int(a), Number::Int(b)) => int_arith(op, a, b),
            (a, b) => float_arith(op, as_f64(&a), as_f64(&b)),
        };
    }
    match (op, left, right) {
        (BinaryOp::Add, Value::String(a), Value::String(b)) => Ok(Value::String(a + &b)),
        (BinaryOp::Add, Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (BinaryOp::Mul, Value::String(s), Value::Int(n)) | (BinaryOp::Mul, Value::Int(n), Value::String(s)) => {
            Ok(Value::String(repeat(&s.chars().collect::<Vec<_>>(), n).into_iter().collect()))
        }
        (BinaryOp::Mul, Value::List(l), Value::Int(n)) | (BinaryOp::Mul, Value::Int(n), Value::List(l)) => {
            Ok(Value::List(repeat(&l, n)))
        }
        (op, left, right) => err(format!(
            "unsupported operand types for {op:?}: {} and {}",
            left.type_name(),
            right.type_name()
        )),
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> FResult<bool> {
    let ordering = match (number(left), number(right)) {
        (Some(Number::Int(a)), Some(Number::Int(b))) => Some(a.cmp(&b)),
        (Some(a), Some(b)) => as_f64(&a).partial_cmp(&as_f64(&b)),
        _ => match (left, right) {
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        },
    };
    match op {
        CompareOp::Eq => Ok(ordering.map_or_else(|| left == right, |o| o == Ordering::Equal)),
        CompareOp::Ne => Ok(ordering.map_or_else(|| left != right, |o| o != Ordering::Equal)),
        _ => {
            let Some(o) = ordering else {
                return err(format!(
                    "cannot order {} and {}",
                    left.type_name(),
                    right.type_name()
                ));
            };
            Ok(match op {
                CompareOp::Lt => o == Ordering::Less,
                CompareOp::Le => o != Ordering::Greater,
                CompareOp::Gt => o == Ordering::Greater,
                _ => o != Ordering::Less,
            })
        }
    }
}

fn sequence_index(len: usize, index: &Value) -> FResult<usize> {
    let Value::Int(i) = index else {
        return err(format!("indices must be integers, not {}", index.type_name()));
    };
    let len_i = i128::try_from(len).map_err(|_| overflow())?;
    let resolved = if *i < 0 { len_i + i } else { *i };
    if resolved < 0 || resolved >= len_i {
        return err(format!("index {i} out of range"));
    }
    usize::try_from(resolved).map_err(|_| overflow())
}

fn index(container: Value, key: &Value) -> FResult<Value> {
    match container {
        Value::List(mut items) => {
            let i = sequence_index(items.len(), key)?;
            Ok(items.swap_remove(i))
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let i = sequence_index(chars.len(), key)?;
            Ok(Value::String(chars[i].to_string()))
        }
        Value::Map(mut map) => {
            let k = match key {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            map.swap_remove(&k).map_or_else(|| err(format!("key '{k}' not found")), Ok)
        }
        other => err(format!("{} is not subscriptable", other.type_name())),
    }
}

fn to_int(value: &Value) -> FResult<i128> {
    match value {
        Value::Bool(b) => Ok(i128::from(*b)),
        Value::Int(i) => Ok(*i),
        #[allow(clippy::cast_possible_truncation)]
        Value::Float(f) if f.is_finite() => Ok(f.trunc() as i128),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| FormulaError(format!("invalid literal for int(): '{s}'"))),
        other => err(format!("int() argument cannot be a {}", other.type_name())),
    }
}

fn to_float(value: &Value) -> FResult<f64> {
    match value {
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| FormulaError(format!("could not convert string to float: '{s}'"))),
        other => number(other)
            .map(|n| as_f64(&n))
            .ok_or_else(|| FormulaError(format!("float() argument cannot be a {}", other.type_name()))),
    }
}

fn arity(function: Function, args: &[Value], allowed: &[usize]) -> FResult<()> {
    if allowed.contains(&args.len()) {
        Ok(())
    } else {
        err(format!("{function:?} takes {allowed:?} arguments, got {}", args.len()))
    }
}

fn call(function: Function, args: Vec<Value>, rng: &mut StdRng) -> FResult<Value> {
    match function {
        Function::Int => {
            arity(function, &args, &[1])?;
            Ok(Value::Int(to_int(&args[0])?))
        }
        Function::Float => {
            arity(function, &args, &[1])?;
            Ok(Value::Float(to_float(&args[0])?))
        }
        Function::Str => {
            arity(function, &args, &[1])?;
            Ok(Value::String(args[0].to_string()))
        }
        Function::Rand => {
            arity(function, &args, &[0])?;
            Ok(Value::Float(rng.gen::<f64>()))
        }
        Function::RandInt => {
            arity(function, &args, &[1, 2])?;
            let (low, high) = if args.len() == 1 {
                (0, to_int(&args[0])?)
            } else {
                (to_int(&args[0])?, to_int(&args[1])?)
            };
            if low >= high {
                return err(format!("randint range [{low}, {high}) is empty"));
            }
            Ok(Value::Int(rng.gen_range(low..high)))
        }
        Function::Choice => {
            arity(function, &args, &[1])?;
            let items: Vec<Value> = match &args[0] {
                Value::List(items) => items.clone(),
                Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
                other => return err(format!("choice() argument cannot be a {}", other.type_name())),
            };
            if items.is_empty() {
                return err("cannot choose from an empty sequence");
            }
            let i = rng.gen_range(0..items.len());
            Ok(items[i].clone())
        }
        Function::Ceil => {
            arity(function, &args, &[1])?;
            let v = to_float(&args[0])?.ceil();
            if !v.is_finite() {
                return err("ceil() of a non-finite number");
            }
            #[allow(clippy::cast_possible_truncation)]
            Ok(Value::Int(v as i128))
        }
        Function::Len => {
            arity(function, &args, &[1])?;
            let len = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Bytes(b) => b.len(),
                Value::List(l) => l.len(),
                Value::Map(m) => m.len(),
                other => return err(format!("{} has no len()", other.type_name())),
            };
            Ok(Value::Int(i128::try_from(len).map_err(|_| overflow())?))
        }
    }
}

fn eval(expr: &Expr, rng: &mut StdRng) -> FResult<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::List(items) => Ok(Value::List(
            items.iter().map(|e| eval(e, rng)).collect::<FResult<_>>()?,
        )),
        Expr::Dict(pairs) => {
            let mut map = ValueMap::new();
            for (k, v) in pairs {
                let key = match eval(k, rng)? {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                map.insert(key, eval(v, rng)?);
            }
            Ok(Value::Map(map))
        }
        Expr::Neg(inner) => match eval(inner, rng)? {
            Value::Int(i) => Ok(Value::Int(i.checked_neg().ok_or_else(overflow)?)),
            Value::Bool(b) => Ok(Value::Int(-i128::from(b))),
            Value::Float(f) => Ok(Value::Float(-f)),
            other => err(format!("bad operand type for unary -: {}", other.type_name())),
        },
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, rng)?))),
        Expr::Binary(op, l, r) => binary(*op, eval(l, rng)?, eval(r, rng)?),
        Expr::Compare(first, rest) => {
            let mut left = eval(first, rng)?;
            for (op, next) in rest {
                let right = eval(next, rng)?;
                if !compare(*op, &left, &right)? {
                    return Ok(Value::Bool(false));
                }
                left = right;
            }
            Ok(Value::Bool(true))
        }
        Expr::And(l, r) => {
            let left = eval(l, rng)?;
            if truthy(&left) {
                eval(r, rng)
            } else {
                Ok(left)
            }
        }
        Expr::Or(l, r) => {
            let left = eval(l, rng)?;
            if truthy(&left) {
                Ok(left)
            } else {
                eval(r, rng)
            }
        }
        Expr::Index(container, key) => {
            let container = eval(container, rng)?;
            let key = eval(key, rng)?;
            index(container, &key)
        }
        Expr::Call(function, args) => {
            let args = args.iter().map(|a| eval(a, rng)).collect::<FResult<Vec<_>>>()?;
            call(*function, args, rng)
        }
    }
}

/// Removes the backslash in front of escaped sigils and braces.
#[must_use]
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.peek().copied() {
                if matches!(next, '%' | '&' | '$' | '=' | '{' | '}') {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

/// Evaluates a formula body (the text between `={` and `}`).
///
/// # Errors
///
/// Returns a `Formula` error for syntax errors, disallowed names, type
/// errors, division by zero and integer overflow.
pub fn evaluate(formula: &str, rng: &mut StdRng) -> OpsResult<Value> {
    let text = unescape(formula);
    let wrap = |e: FormulaError| ResolutionError::Formula {
        formula: formula.to_string(),
        reason: e.0,
    };
    let tokens = tokenize(&text).map_err(wrap)?;
    if tokens.len() > MAX_FORMULA_TOKENS {
        return Err(wrap(FormulaError(format!(
            "formula is too long ({} tokens, at most {MAX_FORMULA_TOKENS})",
            tokens.len()
        )))
        .into());
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expr().map_err(wrap)?;
    if parser.pos != parser.tokens.len() {
        return Err(wrap(FormulaError(format!(
            "unexpected trailing input at token {}",
            parser.pos
        )))
        .into());
    }
    eval(&expr, rng).map_err(|e| wrap(e).into())
}
