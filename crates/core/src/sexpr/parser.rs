use crate::sexpr::SExpr;
use compact_str::CompactString;
use std::{iter::Peekable, str::CharIndices};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{kind} at byte {offset}")]
pub struct SyntaxError {
    pub offset: usize,
    pub kind: SyntaxErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SyntaxErrorKind {
    #[error("no expression")]
    Empty,
    #[error("unterminated list")]
    UnterminatedList,
    #[error("unterminated string")]
    UnterminatedString,
    #[error("unmatched `)`")]
    UnmatchedClose,
    #[error("malformed escape sequence")]
    BadEscape,
    #[error("trailing input after expression")]
    TrailingInput,
}

/// Reads exactly one expression from `input`.
pub fn parse_sexpr(input: &str) -> Result<SExpr, SyntaxError> {
    let mut reader = Reader {
        src: input,
        chars: input.char_indices().peekable(),
    };
    let Some(expr) = reader.read()? else {
        return Err(SyntaxError {
            offset: input.len(),
            kind: SyntaxErrorKind::Empty,
        });
    };
    match reader.next_token() {
        Some((offset, _)) => Err(SyntaxError {
            offset,
            kind: SyntaxErrorKind::TrailingInput,
        }),
        None => Ok(expr),
    }
}

struct Reader<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl Reader<'_> {
    /// Skips whitespace and `//` comments.
    fn next_token(&mut self) -> Option<(usize, char)> {
        loop {
            let &(offset, c) = self.chars.peek()?;
            if c.is_whitespace() {
                self.chars.next();
            } else if self.src[offset..].starts_with("//") {
                for (_, c) in self.chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                return Some((offset, c));
            }
        }
    }

    /// Lists are built on an explicit stack so deeply nested
    /// input cannot overflow the call stack.
    fn read(&mut self) -> Result<Option<SExpr>, SyntaxError> {
        let mut open: Vec<(usize, Vec<SExpr>)> = Vec::new();
        loop {
            let Some((offset, c)) = self.next_token() else {
                return match open.pop() {
                    Some((start, _)) => Err(SyntaxError {
                        offset: start,
                        kind: SyntaxErrorKind::UnterminatedList,
                    }),
                    None => Ok(None),
                };
            };

            let expr = match c {
                '(' => {
                    self.chars.next();
                    open.push((offset, Vec::new()));
                    continue;
                }
                ')' => {
                    self.chars.next();
                    let Some((_, elems)) = open.pop() else {
                        return Err(SyntaxError {
                            offset,
                            kind: SyntaxErrorKind::UnmatchedClose,
                        });
                    };
                    SExpr::List(elems.into_boxed_slice())
                }
                '"' => {
                    self.chars.next();
                    self.read_string(offset)?
                }
                _ => self.read_atom(offset),
            };

            match open.last_mut() {
                Some((_, elems)) => elems.push(expr),
                None => return Ok(Some(expr)),
            }
        }
    }

    fn read_string(&mut self, start: usize) -> Result<SExpr, SyntaxError> {
        let error = |kind| SyntaxError {
            offset: start,
            kind,
        };
        let mut s = CompactString::default();
        loop {
            match self.chars.next() {
                None => return Err(error(SyntaxErrorKind::UnterminatedString)),
                Some((_, '"')) => return Ok(SExpr::String(s)),
                Some((_, '\\')) => {
                    let c = match self.chars.next() {
                        Some((_, 'n')) => '\n',
                        Some((_, 'r')) => '\r',
                        Some((_, 't')) => '\t',
                        Some((_, '0')) => '\0',
                        Some((_, 'u')) => self
                            .read_unicode_escape()
                            .ok_or(error(SyntaxErrorKind::BadEscape))?,
                        Some((_, c)) => c,
                        None => return Err(error(SyntaxErrorKind::UnterminatedString)),
                    };
                    s.push(c);
                }
                Some((_, c)) => s.push(c),
            }
        }
    }

    /// Reads the `{XXXX}` part of a `\u{XXXX}` escape.
    fn read_unicode_escape(&mut self) -> Option<char> {
        if self.chars.next()?.1 != '{' {
            return None;
        }
        let mut code = 0u32;
        loop {
            match self.chars.next()?.1 {
                '}' => return char::from_u32(code),
                c => code = code.checked_mul(16)?.checked_add(c.to_digit(16)?)?,
            }
        }
    }

    fn read_atom(&mut self, start: usize) -> SExpr {
        let mut end = self.src.len();
        while let Some(&(offset, c)) = self.chars.peek() {
            if c.is_whitespace() || c == '(' || c == ')' {
                end = offset;
                break;
            }
            self.chars.next();
        }

        let atom = &self.src[start..end];
        let numeric = atom
            .trim_start_matches(['-', '+'])
            .starts_with(|c: char| c.is_ascii_digit());
        if numeric {
            if let Ok(i) = atom.parse::<i64>() {
                return SExpr::Int(i);
            }
            if let Ok(f) = atom.parse::<f64>() {
                return SExpr::Float(f);
            }
        }
        SExpr::Symbol(CompactString::from(atom))
    }
}
