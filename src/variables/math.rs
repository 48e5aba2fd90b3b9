//! Arithmetic Evaluation
//!
//! Small recursive-descent evaluator for the arithmetic found in variable
//! definitions such as `{processes_per_node}*{n_nodes}`.
//!
//! Grammar (`**` binds tighter than unary minus; `//` and `%` floor):
//!
//! ```text
//! expr   := term (('+' | '-') term)*
//! term   := factor (('*' | '/' | '//' | '%') factor)*
//! factor := ('+' | '-') factor | power
//! power  := atom ('**' factor)?
//! atom   := number | '(' expr ')'
//! ```

#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn render(self) -> Option<String> {
        match self {
            Num::Int(i) => Some(i.to_string()),
            Num::Float(f) if !f.is_finite() => None,
            Num::Float(f) if f.fract() == 0.0 && f.abs() < 1e16 => Some(format!("{:.1}", f)),
            Num::Float(f) => Some(f.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(Num),
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    Power,
    LParen,
    RParen,
}

/// Evaluates `text` if it is a complete arithmetic expression.
///
/// A bare number is returned normalized (`"4"` stays `"4"`).
pub fn evaluate(text: &str) -> Option<String> {
    let (value, _) = parse(text)?;
    value.render()
}

/// Evaluates `text` only if it is an arithmetic expression containing at
/// least one binary operator. Plain numbers and non-arithmetic text yield
/// `None`.
pub fn evaluate_expression(text: &str) -> Option<String> {
    let (value, saw_operator) = parse(text)?;
    if saw_operator {
        value.render()
    } else {
        None
    }
}

/// Contents of `text` when it is a single quoted string literal
/// (`"..."` or `'...'`) with no inner quote of the same kind.
pub fn string_literal(text: &str) -> Option<&str> {
    let text = text.trim();
    let quote = text.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let inner = text.strip_prefix(quote)?.strip_suffix(quote)?;
    if inner.contains(quote) {
        None
    } else {
        Some(inner)
    }
}

fn parse(text: &str) -> Option<(Num, bool)> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return None;
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        saw_operator: false,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return None;
    }
    Some((value, parser.saw_operator))
}

fn tokenize(text: &str) -> Option<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            c if c.is_whitespace() => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Power);
                i += 2;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                tokens.push(Token::DoubleSlash);
                i += 2;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let int_part: String = chars[start..i].iter().collect();
                // "01" is not a number literal
                if int_part.len() > 1 && int_part.starts_with('0') {
                    return None;
                }
                if i < chars.len() && chars[i] == '.' {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                    let literal: String = chars[start..i].iter().collect();
                    tokens.push(Token::Num(Num::Float(literal.parse().ok()?)));
                } else {
                    tokens.push(Token::Num(Num::Int(int_part.parse().ok()?)));
                }
            }
            _ => return None,
        }
    }

    Some(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    saw_operator: bool,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Option<Num> {
        let mut lhs = self.term()?;
        while let Some(op) = self.peek().cloned() {
            if op != Token::Plus && op != Token::Minus {
                break;
            }
            self.pos += 1;
            self.saw_operator = true;
            let rhs = self.term()?;
            lhs = binary(&op, lhs, rhs)?;
        }
        Some(lhs)
    }

    fn term(&mut self) -> Option<Num> {
        let mut lhs = self.factor()?;
        while let Some(op) = self.peek().cloned() {
            if !matches!(op, Token::Star | Token::Slash | Token::DoubleSlash | Token::Percent) {
                break;
            }
            self.pos += 1;
            self.saw_operator = true;
            let rhs = self.factor()?;
            lhs = binary(&op, lhs, rhs)?;
        }
        Some(lhs)
    }

    fn factor(&mut self) -> Option<Num> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                match self.factor()? {
                    Num::Int(i) => i.checked_neg().map(Num::Int),
                    Num::Float(f) => Some(Num::Float(-f)),
                }
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.factor()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Option<Num> {
        let base = self.atom()?;
        if self.peek() == Some(&Token::Power) {
            self.pos += 1;
            self.saw_operator = true;
            let exponent = self.factor()?;
            return binary(&Token::Power, base, exponent);
        }
        Some(base)
    }

    fn atom(&mut self) -> Option<Num> {
        match self.next()? {
            Token::Num(n) => Some(n),
            Token::LParen => {
                let value = self.expr()?;
                match self.next()? {
                    Token::RParen => Some(value),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

fn binary(op: &Token, lhs: Num, rhs: Num) -> Option<Num> {
    if let (Num::Int(a), Num::Int(b)) = (lhs, rhs) {
        return match op {
            Token::Plus => a.checked_add(b).map(Num::Int),
            Token::Minus => a.checked_sub(b).map(Num::Int),
            Token::Star => a.checked_mul(b).map(Num::Int),
            Token::Slash if b == 0 => None,
            Token::Slash => Some(Num::Float(a as f64 / b as f64)),
            Token::DoubleSlash if b == 0 => None,
            Token::DoubleSlash => {
                let quotient = a.checked_div_euclid(b)?;
                let adjust = i64::from(b < 0 && a.checked_rem_euclid(b)? != 0);
                quotient.checked_sub(adjust).map(Num::Int)
            }
            Token::Percent if b == 0 => None,
            Token::Percent => {
                // result takes the sign of the divisor
                let rem = a.checked_rem_euclid(b)?;
                Some(Num::Int(if b < 0 && rem != 0 { rem + b } else { rem }))
            }
            Token::Power if b >= 0 => a.checked_pow(u32::try_from(b).ok()?).map(Num::Int),
            Token::Power => Some(Num::Float((a as f64).powf(b as f64))),
            _ => None,
        };
    }

    let (a, b) = (lhs.as_f64(), rhs.as_f64());
    let value = match op {
        Token::Plus => a + b,
        Token::Minus => a - b,
        Token::Star => a * b,
        Token::Slash if b == 0.0 => return None,
        Token::Slash => a / b,
        Token::DoubleSlash if b == 0.0 => return None,
        Token::DoubleSlash => (a / b).floor(),
        Token::Percent if b == 0.0 => return None,
        Token::Percent => a - b * (a / b).floor(),
        Token::Power => a.powf(b),
        _ => return None,
    };
    Some(Num::Float(value))
}
