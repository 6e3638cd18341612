//! Simple S-expression parsing and formatting tooling,
//! primarily used for test cases at various levels of the IR.

use compact_str::CompactString;
use std::fmt::{self, Display, Formatter, Write as _};

mod parser;

pub use parser::{SyntaxError, SyntaxErrorKind, parse_sexpr};

#[derive(Debug, Clone, PartialEq)]
pub enum SExpr {
    Int(i64),
    Float(f64),
    Symbol(CompactString),
    String(CompactString),
    List(Box<[SExpr]>),
}

impl SExpr {
    /// Parses a single expression. Line comments starting
    /// with `//` are skipped.
    pub fn parse(input: &str) -> Result<Self, SyntaxError> {
        parse_sexpr(input)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            SExpr::Int(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            SExpr::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&str> {
        match self {
            SExpr::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[SExpr]> {
        match self {
            SExpr::List(l) => Some(l),
            _ => None,
        }
    }

    /// If this is a list whose first element is the given symbol,
    /// returns the remaining elements.
    pub fn as_tagged(&self, tag: &str) -> Option<&[SExpr]> {
        match self.as_list()? {
            [SExpr::Symbol(head), rest @ ..] if head == tag => Some(rest),
            _ => None,
        }
    }

    /// Lists nested inside a list start on their own line,
    /// indented four spaces per level.
    fn write_indented(&self, f: &mut Formatter<'_>, depth: usize) -> fmt::Result {
        match self {
            SExpr::Int(x) => write!(f, "{x}"),
            SExpr::Float(x) => write!(f, "{x}"),
            SExpr::Symbol(x) => f.write_str(x),
            SExpr::String(s) => write!(f, "\"{}\"", s.escape_default()),
            SExpr::List(elems) => {
                f.write_char('(')?;
                for (i, elem) in elems.iter().enumerate() {
                    if matches!(elem, SExpr::List(_)) {
                        write!(f, "\n{:width$}", "", width = 4 * (depth + 1))?;
                    } else if i > 0 {
                        f.write_char(' ')?;
                    }
                    elem.write_indented(f, depth + 1)?;
                }
                f.write_char(')')
            }
        }
    }
}

impl Display for SExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)?;
        f.write_char('\n')
    }
}

pub fn int(x: i64) -> SExpr {
    SExpr::Int(x)
}

pub fn float(x: f64) -> SExpr {
    SExpr::Float(x)
}

pub fn symbol(x: impl Into<CompactString>) -> SExpr {
    SExpr::Symbol(x.into())
}

pub fn string(x: impl Into<CompactString>) -> SExpr {
    SExpr::String(x.into())
}

pub fn list(es: impl IntoIterator<Item = SExpr>) -> SExpr {
    SExpr::List(es.into_iter().collect())
}
