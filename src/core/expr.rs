//! SP-005: Expression language for interpolation spans.
//!
//! A small C-style expression grammar evaluated over JSON values:
//! literals, identifiers, member access, indexing, calls on dotted names,
//! unary `!`/`-`, arithmetic, comparisons, `&&`/`||` and `?:`.
//! Identifier lookup and function calls are delegated to a [`Scope`].

use serde_json::Value;
use std::fmt;

/// Name resolution for an evaluation.
pub trait Scope {
    /// Resolve a bare identifier such as `vars` or `sys`.
    fn lookup(&self, name: &str) -> Result<Value, String>;

    /// Call a function by dotted name, e.g. `path.join`.
    fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, String>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    Array(Vec<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    fn binding_power(self) -> u8 {
        match self {
            Self::Or => 2,
            Self::And => 3,
            Self::Eq | Self::Ne => 4,
            Self::Lt | Self::Le | Self::Gt | Self::Ge => 5,
            Self::Add | Self::Sub => 6,
            Self::Mul | Self::Div | Self::Rem => 7,
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
}

const PUNCTS: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", ".", ",", "(", ")", "[", "]", "!", "-",
    "+", "*", "/", "%", "<", ">", "?", ":",
];

fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let text: String = chars[start..i].iter().collect();
            let n = text
                .parse::<f64>()
                .map_err(|_| format!("invalid number '{}'", text))?;
            tokens.push(Token::Number(n));
        } else if c == '\'' || c == '"' {
            let (s, next) = read_string(&chars, i)?;
            tokens.push(Token::Str(s));
            i = next;
        } else if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
            {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
        } else {
            let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
            let punct = PUNCTS
                .iter()
                .find(|p| rest.starts_with(*p))
                .ok_or_else(|| format!("unexpected character '{}'", c))?;
            // `===` and `!==` behave as `==` and `!=`
            tokens.push(Token::Punct(match *punct {
                "===" => "==",
                "!==" => "!=",
                p => p,
            }));
            i += punct.chars().count();
        }
    }

    Ok(tokens)
}

fn read_string(chars: &[char], start: usize) -> Result<(String, usize), String> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            '\\' if i + 1 < chars.len() => {
                out.push(match chars[i + 1] {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => other,
                });
                i += 2;
            }
            c if c == quote => return Ok((out, i + 1)),
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err("unterminated string".to_string())
}

// ============================================================================
// Parser
// ============================================================================

/// Parse one expression.
pub fn parse(src: &str) -> Result<Expr, String> {
    let mut parser = ExprParser {
        tokens: tokenize(src)?,
        pos: 0,
    };
    if parser.tokens.is_empty() {
        return Err("empty expression".to_string());
    }
    let expr = parser.expression(0)?;
    match parser.peek() {
        None => Ok(expr),
        Some(tok) => Err(format!("unexpected {:?}", tok)),
    }
}

struct ExprParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat(&mut self, punct: &str) -> bool {
        if matches!(self.peek(), Some(Token::Punct(p)) if *p == punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), String> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(format!("expected '{}'", punct))
        }
    }

    fn expression(&mut self, min_bp: u8) -> Result<Expr, String> {
        let mut lhs = self.unary()?;

        loop {
            if min_bp <= 1 && self.eat("?") {
                let then = self.expression(0)?;
                self.expect(":")?;
                let otherwise = self.expression(1)?;
                lhs = Expr::Conditional(Box::new(lhs), Box::new(then), Box::new(otherwise));
                continue;
            }

            let op = match self.peek() {
                Some(Token::Punct(p)) => match binop(p) {
                    Some(op) => op,
                    None => break,
                },
                _ => break,
            };
            let bp = op.binding_power();
            if bp < min_bp {
                break;
            }
            self.pos += 1;
            let rhs = self.expression(bp + 1)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }

        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.eat("!") {
            return Ok(Expr::Not(Box::new(self.unary()?)));
        }
        if self.eat("-") {
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        if self.eat("+") {
            return self.unary();
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(".") {
                match self.next() {
                    Some(Token::Ident(name)) => expr = Expr::Member(Box::new(expr), name),
                    _ => return Err("expected property name after '.'".to_string()),
                }
            } else if self.eat("[") {
                let index = self.expression(0)?;
                self.expect("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else if self.eat("(") {
                let args = self.list(")")?;
                expr = Expr::Call(Box::new(expr), args);
            } else {
                return Ok(expr);
            }
        }
    }

    fn list(&mut self, close: &str) -> Result<Vec<Expr>, String> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.expression(0)?);
            if self.eat(close) {
                return Ok(items);
            }
            self.expect(",")?;
        }
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Literal(number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Ident(name)) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" | "undefined" => Expr::Literal(Value::Null),
                _ => Expr::Ident(name),
            }),
            Some(Token::Punct("(")) => {
                let inner = self.expression(0)?;
                self.expect(")")?;
                Ok(inner)
            }
            Some(Token::Punct("[")) => Ok(Expr::Array(self.list("]")?)),
            Some(tok) => Err(format!("unexpected {:?}", tok)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn binop(punct: &str) -> Option<BinOp> {
    Some(match punct {
        "+" => BinOp::Add,
        "-" => BinOp::Sub,
        "*" => BinOp::Mul,
        "/" => BinOp::Div,
        "%" => BinOp::Rem,
        "==" => BinOp::Eq,
        "!=" => BinOp::Ne,
        "<" => BinOp::Lt,
        "<=" => BinOp::Le,
        ">" => BinOp::Gt,
        ">=" => BinOp::Ge,
        "&&" => BinOp::And,
        "||" => BinOp::Or,
        _ => return None,
    })
}

// ============================================================================
// Evaluation
// ============================================================================

/// Evaluate an expression.
pub fn eval(expr: &Expr, scope: &dyn Scope) -> Result<Value, String> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Ident(name) => scope.lookup(name),
        Expr::Member(target, name) => member(&eval(target, scope)?, name),
        Expr::Index(target, index) => {
            let target = eval(target, scope)?;
            let index = eval(index, scope)?;
            match (&target, &index) {
                (Value::Array(items), Value::Number(n)) => Ok(n
                    .as_u64()
                    .and_then(|i| items.get(i as usize))
                    .cloned()
                    .unwrap_or(Value::Null)),
                (_, Value::String(key)) => member(&target, key),
                (_, Value::Number(n)) => member(&target, &n.to_string()),
                _ => Err(format!("cannot index with {}", index)),
            }
        }
        Expr::Call(callee, args) => {
            let name =
                dotted_name(callee).ok_or_else(|| "expression is not callable".to_string())?;
            let args = args
                .iter()
                .map(|a| eval(a, scope))
                .collect::<Result<Vec<_>, _>>()?;
            scope.call(&name, args)
        }
        Expr::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|i| eval(i, scope))
                .collect::<Result<_, _>>()?,
        )),
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, scope)?))),
        Expr::Neg(inner) => Ok(number(-to_number(&eval(inner, scope)?)?)),
        Expr::Conditional(cond, then, otherwise) => {
            if truthy(&eval(cond, scope)?) {
                eval(then, scope)
            } else {
                eval(otherwise, scope)
            }
        }
        Expr::Binary(BinOp::And, lhs, rhs) => {
            let l = eval(lhs, scope)?;
            if truthy(&l) {
                eval(rhs, scope)
            } else {
                Ok(l)
            }
        }
        Expr::Binary(BinOp::Or, lhs, rhs) => {
            let l = eval(lhs, scope)?;
            if truthy(&l) {
                Ok(l)
            } else {
                eval(rhs, scope)
            }
        }
        Expr::Binary(op, lhs, rhs) => binary(*op, &eval(lhs, scope)?, &eval(rhs, scope)?),
    }
}

/// Flatten `a.b.c` into `"a.b.c"`.
fn dotted_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Ident(name) => Some(name.clone()),
        Expr::Member(target, name) => Some(format!("{}.{}", dotted_name(target)?, name)),
        _ => None,
    }
}

fn member(target: &Value, name: &str) -> Result<Value, String> {
    match target {
        Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
        Value::Array(items) if name == "length" => Ok(Value::from(items.len())),
        Value::Array(items) => Ok(name
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Value::Null)),
        Value::String(s) if name == "length" => Ok(Value::from(s.chars().count())),
        Value::Null => Err(format!("cannot read property '{}' of null", name)),
        _ => Ok(Value::Null),
    }
}

fn binary(op: BinOp, l: &Value, r: &Value) -> Result<Value, String> {
    match op {
        BinOp::Add => match (l, r) {
            (Value::String(_), _) | (_, Value::String(_)) => Ok(Value::String(format!(
                "{}{}",
                crate::core::types::value_to_string(l),
                crate::core::types::value_to_string(r)
            ))),
            _ => Ok(number(to_number(l)? + to_number(r)?)),
        },
        BinOp::Sub => Ok(number(to_number(l)? - to_number(r)?)),
        BinOp::Mul => Ok(number(to_number(l)? * to_number(r)?)),
        BinOp::Div => Ok(number(to_number(l)? / to_number(r)?)),
        BinOp::Rem => Ok(number(to_number(l)? % to_number(r)?)),
        BinOp::Eq => Ok(Value::Bool(loose_eq(l, r))),
        BinOp::Ne => Ok(Value::Bool(!loose_eq(l, r))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = match (l, r) {
                (Value::String(a), Value::String(b)) => a.partial_cmp(b),
                _ => to_number(l)?.partial_cmp(&to_number(r)?),
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            Ok(Value::Bool(match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinOp::And | BinOp::Or => Err(format!("operator {} is not binary-evaluable", op)),
    }
}

fn loose_eq(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => l == r,
    }
}

/// Truthiness: null, false, 0, NaN and "" are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn to_number(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| "number out of range".to_string()),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::Null => Ok(0.0),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("'{}' is not a number", s)),
        other => Err(format!("{} is not a number", other)),
    }
}

/// Integral results stay integers so they print without a fraction.
fn number(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        Value::from(f as i64)
    } else {
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct TestScope;

    impl Scope for TestScope {
        fn lookup(&self, name: &str) -> Result<Value, String> {
            match name {
                "vars" => Ok(json!({"a": 1, "s": "str", "list": [10, 20], "o": {"x": true}})),
                _ => Err(format!("{} is not defined", name)),
            }
        }

        fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, String> {
            match name {
                "util.echo" => Ok(Value::Array(args)),
                _ => Err(format!("unknown function {}", name)),
            }
        }
    }

    fn run(src: &str) -> Result<Value, String> {
        eval(&parse(src)?, &TestScope)
    }

    #[test]
    fn test_sp005_arithmetic_and_precedence() {
        assert_eq!(run("1 + 2 * 3").unwrap(), json!(7));
        assert_eq!(run("(1 + 2) * 3").unwrap(), json!(9));
        assert_eq!(run("10 - 4 - 3").unwrap(), json!(3));
        assert_eq!(run("7 / 2").unwrap(), json!(3.5));
        assert_eq!(run("-vars.a + 4").unwrap(), json!(3));
    }

    #[test]
    fn test_sp005_comparison_and_logic() {
        assert_eq!(run("1 + 2 === 3").unwrap(), json!(true));
        assert_eq!(run("vars.a != 1").unwrap(), json!(false));
        assert_eq!(run("vars.a < 2 && vars.s == 'str'").unwrap(), json!(true));
        assert_eq!(run("vars.missing || 'default'").unwrap(), json!("default"));
        assert_eq!(run("!vars.o.x").unwrap(), json!(false));
        assert_eq!(run("vars.a == 1 ? 'yes' : 'no'").unwrap(), json!("yes"));
    }

    #[test]
    fn test_sp005_member_index_and_strings() {
        assert_eq!(run("vars.list[1]").unwrap(), json!(20));
        assert_eq!(run("vars['s']").unwrap(), json!("str"));
        assert_eq!(run("vars.list.length").unwrap(), json!(2));
        assert_eq!(run("'a' + 1").unwrap(), json!("a1"));
        assert_eq!(run("\"it's\"").unwrap(), json!("it's"));
        assert_eq!(run("vars.nothing").unwrap(), json!(null));
    }

    #[test]
    fn test_sp005_calls() {
        assert_eq!(run("util.echo(1, 'x', [true])").unwrap(), json!([1, "x", [true]]));
        assert!(run("noFunc()").unwrap_err().contains("unknown function"));
        assert!(run("(1)()").is_err());
    }

    #[test]
    fn test_sp005_errors() {
        assert!(run("_").unwrap_err().contains("not defined"));
        assert!(run("vars.nothing.deeper").is_err());
        assert!(run("1 +").is_err());
        assert!(run("'open").is_err());
        assert!(run("1 2").is_err());
        assert!(run("").is_err());
        assert!(run("#").is_err());
    }
}
