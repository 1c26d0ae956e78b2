//! Arithmetic transforms applied to extracted fields
//!
//! Formulas are compiled once when the rule text is parsed and evaluated
//! against the bytes of a captured field:
//!
//! | Term | Meaning |
//! |------|---------|
//! | `X` / `value` | whole field as a big-endian unsigned integer |
//! | `A` .. `H` | individual field bytes, `A` first |
//! | `12`, `0.25`, `0x1F` | numeric literals |
//!
//! Operators are `+ - * /` with the usual precedence, parentheses and unary
//! minus. Spaces are not allowed because rule tokens are whitespace separated.

use std::fmt;

use crate::error::FormulaError;
use crate::precision::{decimals_for_step, round_decimals};

/// Variable referenced by a formula
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Var {
    Whole,
    Byte(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

impl Op {
    fn precedence(self) -> u8 {
        match self {
            Op::Add | Op::Sub => 1,
            Op::Mul | Op::Div => 2,
        }
    }

    fn symbol(self) -> char {
        match self {
            Op::Add => '+',
            Op::Sub => '-',
            Op::Mul => '*',
            Op::Div => '/',
        }
    }
}

/// Compiled expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Var(Var),
    Neg(Box<Expr>),
    Bin(Op, Box<Expr>, Box<Expr>),
}

/// A compiled field transform
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    expr: Expr,
}

impl Formula {
    /// Compile formula text
    pub fn parse(text: &str) -> Result<Self, FormulaError> {
        let tokens = tokenize(text)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        if let Some(tok) = parser.peek() {
            return Err(FormulaError::UnexpectedToken(tok.to_string()));
        }
        Ok(Self { expr })
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Evaluate against the bytes of a captured field
    pub fn eval(&self, bytes: &[u8]) -> Result<f64, FormulaError> {
        eval(&self.expr, bytes)
    }

    /// Evaluate and round to the precision the formula can actually resolve
    ///
    /// Only linear formulas have a fixed output step; anything else is
    /// returned as evaluated.
    pub fn apply(&self, bytes: &[u8]) -> Result<f64, FormulaError> {
        let value = self.eval(bytes)?;
        Ok(match self.resolution() {
            Some(step) => round_decimals(value, decimals_for_step(step)),
            None => value,
        })
    }

    /// Whether the output is an affine function of the inputs: no variable in
    /// a divisor and no product of two variable terms
    pub fn is_linear(&self) -> bool {
        is_linear(&self.expr)
    }

    /// Smallest non-zero output step produced by a one-count change of any
    /// single input byte (or of the whole field); `None` for non-linear
    /// formulas
    pub fn resolution(&self) -> Option<f64> {
        if !self.is_linear() {
            return None;
        }
        let zero = eval(&self.expr, &[0; 8]).ok()?;
        let mut best: Option<f64> = None;
        for idx in 0..8 {
            let mut unit_input = [0u8; 8];
            unit_input[idx] = 1;
            if let Ok(v) = eval(&self.expr, &unit_input) {
                let step = (v - zero).abs();
                if step > 1e-12 && best.map_or(true, |b| step < b) {
                    best = Some(step);
                }
            }
        }
        Some(best.unwrap_or(1.0))
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_expr(f, &self.expr)
    }
}

fn has_var(expr: &Expr) -> bool {
    match expr {
        Expr::Num(_) => false,
        Expr::Var(_) => true,
        Expr::Neg(inner) => has_var(inner),
        Expr::Bin(_, lhs, rhs) => has_var(lhs) || has_var(rhs),
    }
}

fn is_linear(expr: &Expr) -> bool {
    match expr {
        Expr::Num(_) | Expr::Var(_) => true,
        Expr::Neg(inner) => is_linear(inner),
        Expr::Bin(Op::Add | Op::Sub, lhs, rhs) => is_linear(lhs) && is_linear(rhs),
        Expr::Bin(Op::Mul, lhs, rhs) => {
            is_linear(lhs) && is_linear(rhs) && !(has_var(lhs) && has_var(rhs))
        }
        Expr::Bin(Op::Div, lhs, rhs) => is_linear(lhs) && !has_var(rhs),
    }
}

fn eval(expr: &Expr, bytes: &[u8]) -> Result<f64, FormulaError> {
    match expr {
        Expr::Num(n) => Ok(*n),
        Expr::Var(Var::Whole) => Ok(bytes
            .iter()
            .take(8)
            .fold(0u64, |acc, &b| (acc << 8) | b as u64) as f64),
        Expr::Var(Var::Byte(idx)) => bytes
            .get(*idx as usize)
            .map(|&b| b as f64)
            .ok_or(FormulaError::MissingByte {
                index: *idx as usize,
                len: bytes.len(),
            }),
        Expr::Neg(inner) => Ok(-eval(inner, bytes)?),
        Expr::Bin(op, lhs, rhs) => {
            let l = eval(lhs, bytes)?;
            let r = eval(rhs, bytes)?;
            match op {
                Op::Add => Ok(l + r),
                Op::Sub => Ok(l - r),
                Op::Mul => Ok(l * r),
                Op::Div if r == 0.0 => Err(FormulaError::DivisionByZero),
                Op::Div => Ok(l / r),
            }
        }
    }
}

fn write_expr(f: &mut fmt::Formatter<'_>, expr: &Expr) -> fmt::Result {
    match expr {
        Expr::Num(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                write!(f, "{}", *n as i64)
            } else {
                write!(f, "{}", n)
            }
        }
        Expr::Var(Var::Whole) => f.write_str("X"),
        Expr::Var(Var::Byte(idx)) => write!(f, "{}", (b'A' + idx) as char),
        Expr::Neg(inner) => {
            f.write_str("-")?;
            if matches!(**inner, Expr::Bin(..)) {
                f.write_str("(")?;
                write_expr(f, inner)?;
                f.write_str(")")
            } else {
                write_expr(f, inner)
            }
        }
        Expr::Bin(op, lhs, rhs) => {
            let wrap_left =
                matches!(**lhs, Expr::Bin(child, ..) if child.precedence() < op.precedence());
            // Right operands of equal precedence keep their parentheses so the
            // printed text parses back into the same tree.
            let wrap_right =
                matches!(**rhs, Expr::Bin(child, ..) if child.precedence() <= op.precedence());
            write_operand(f, lhs, wrap_left)?;
            write!(f, "{}", op.symbol())?;
            write_operand(f, rhs, wrap_right)
        }
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr, wrap: bool) -> fmt::Result {
    if wrap {
        f.write_str("(")?;
        write_expr(f, expr)?;
        f.write_str(")")
    } else {
        write_expr(f, expr)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Num(n) => write!(f, "{}", n),
            Token::Ident(s) => f.write_str(s),
            Token::Op(c) => write!(f, "{}", c),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, FormulaError> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            '+' | '-' | '*' | '/' => {
                tokens.push(Token::Op(c));
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
            '0'..='9' | '.' => {
                let start = i;
                if c == '0' && matches!(chars.get(i + 1), Some('x') | Some('X')) {
                    i += 2;
                    while i < chars.len() && chars[i].is_ascii_hexdigit() {
                        i += 1;
                    }
                    let digits: String = chars[start + 2..i].iter().collect();
                    let value = u64::from_str_radix(&digits, 16)
                        .map_err(|_| FormulaError::UnexpectedToken(format!("0x{}", digits)))?;
                    tokens.push(Token::Num(value as f64));
                } else {
                    while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                        i += 1;
                    }
                    let literal: String = chars[start..i].iter().collect();
                    let value = literal
                        .parse::<f64>()
                        .map_err(|_| FormulaError::UnexpectedToken(literal.clone()))?;
                    tokens.push(Token::Num(value));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(FormulaError::UnexpectedChar(other)),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expr(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.term()?;
        while let Some(Token::Op(c @ ('+' | '-'))) = self.peek() {
            let op = if *c == '+' { Op::Add } else { Op::Sub };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.factor()?;
        while let Some(Token::Op(c @ ('*' | '/'))) = self.peek() {
            let op = if *c == '*' { Op::Mul } else { Op::Div };
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr, FormulaError> {
        match self.next() {
            Some(Token::Op('-')) => Ok(Expr::Neg(Box::new(self.factor()?))),
            Some(Token::Num(n)) => Ok(Expr::Num(n)),
            Some(Token::Ident(name)) => variable(&name).map(Expr::Var),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(tok) => Err(FormulaError::UnexpectedToken(tok.to_string())),
                    None => Err(FormulaError::UnexpectedEnd),
                }
            }
            Some(tok) => Err(FormulaError::UnexpectedToken(tok.to_string())),
            None => Err(FormulaError::UnexpectedEnd),
        }
    }
}

fn variable(name: &str) -> Result<Var, FormulaError> {
    match name {
        "X" | "x" | "value" => Ok(Var::Whole),
        single if single.len() == 1 => {
            let c = single.as_bytes()[0].to_ascii_uppercase();
            if (b'A'..=b'H').contains(&c) {
                Ok(Var::Byte(c - b'A'))
            } else {
                Err(FormulaError::UnknownVariable(name.to_string()))
            }
        }
        _ => Err(FormulaError::UnknownVariable(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("A-40", &[132], 92.0)]
    #[case("value-40", &[0x5A], 50.0)]
    #[case("(A*256+B)/4", &[0x1C, 0x20], 1800.0)]
    #[case("X/4", &[0x1C, 0x20], 1800.0)]
    #[case("A*100/255", &[255], 100.0)]
    #[case("-A+0x10", &[4], 12.0)]
    #[case("B-A", &[1, 3], 2.0)]
    fn test_eval(#[case] text: &str, #[case] bytes: &[u8], #[case] expected: f64) {
        let formula = Formula::parse(text).unwrap();
        assert!((formula.eval(bytes).unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_precedence() {
        let formula = Formula::parse("A+B*2").unwrap();
        assert_eq!(formula.eval(&[1, 3]).unwrap(), 7.0);
        let formula = Formula::parse("(A+B)*2").unwrap();
        assert_eq!(formula.eval(&[1, 3]).unwrap(), 8.0);
    }

    #[test]
    fn test_display_reparses_to_same_tree() {
        for text in ["A-40", "(A*256+B)/4", "A-(B-C)", "-(A+1)*2", "X/0.25", "A/(B/2)"] {
            let formula = Formula::parse(text).unwrap();
            let printed = formula.to_string();
            let reparsed = Formula::parse(&printed).unwrap();
            assert_eq!(formula, reparsed, "{} printed as {}", text, printed);
        }
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            Formula::parse("A+").unwrap_err(),
            FormulaError::UnexpectedEnd
        );
        assert!(matches!(
            Formula::parse("Q*2").unwrap_err(),
            FormulaError::UnknownVariable(_)
        ));
        assert!(matches!(
            Formula::parse("A 2").unwrap_err(),
            FormulaError::UnexpectedChar(' ')
        ));
        let formula = Formula::parse("B").unwrap();
        assert_eq!(
            formula.eval(&[1]).unwrap_err(),
            FormulaError::MissingByte { index: 1, len: 1 }
        );
        let formula = Formula::parse("A/B").unwrap();
        assert_eq!(
            formula.eval(&[1, 0]).unwrap_err(),
            FormulaError::DivisionByZero
        );
    }

    #[test]
    fn test_apply_rounds_to_resolution() {
        let formula = Formula::parse("(A*256+B)/4").unwrap();
        assert_eq!(formula.resolution(), Some(0.25));
        assert_eq!(formula.apply(&[0x0B, 0xB9]).unwrap(), 750.25);

        let formula = Formula::parse("A*0.1").unwrap();
        // 3 * 0.1 would otherwise print as 0.30000000000000004
        assert_eq!(formula.apply(&[3]).unwrap(), 0.3);
    }

    #[rstest]
    #[case("1/A", &[4], 0.25)]
    #[case("A/B", &[1, 3], 1.0 / 3.0)]
    #[case("100/A", &[3], 100.0 / 3.0)]
    #[case("A*B/10", &[3, 5], 1.5)]
    fn test_non_linear_formulas_are_not_rounded(
        #[case] text: &str,
        #[case] bytes: &[u8],
        #[case] expected: f64,
    ) {
        let formula = Formula::parse(text).unwrap();
        assert!(!formula.is_linear());
        assert_eq!(formula.resolution(), None);
        assert!((formula.apply(bytes).unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_linearity() {
        for text in ["A-40", "(A*256+B)/4", "-(A+1)*2", "X/0.25", "2*(A-B)"] {
            assert!(Formula::parse(text).unwrap().is_linear(), "{}", text);
        }
        for text in ["1/A", "A/(B/2)", "A*B", "(A+1)*(B-1)"] {
            assert!(!Formula::parse(text).unwrap().is_linear(), "{}", text);
        }
    }
}
