// The S-expression tokenizer/parser, specified only by the interface it
// exposes: a tree of `List`, `Identifier`, `Int`, `Byte`, `String` nodes,
// with the root already wrapped as `(def (main int) () (do ...))`. It is
// kept here, deliberately thin, so the crate is self-contained and the
// end-to-end scenarios have something real to feed the lowerer.

use std::rc::Rc;

use crate::ast::Value;
use crate::error::CompileError;

// Logs a syntactic error at the point it leaves the reader, once, before
// propagating (errors are fatal and reported with the
// offending form's shape; `tracing::error!` here is the one place this
// module logs, so callers further up the pipeline don't re-log it).
fn log_err(e: CompileError) -> CompileError {
    tracing::error!(error = %e, "parse error");
    e
}

pub fn parse_program(source: &str) -> Result<Value, CompileError> {
    let span = tracing::info_span!("parse", bytes = source.len());
    let _enter = span.enter();
    let forms = read_all(source)?;
    if forms.is_empty() {
        return Err(log_err(CompileError::EmptyProgram));
    }
    let body = Value::list(std::iter::once(Value::ident("do")).chain(forms).collect());
    Ok(Value::list(vec![
        Value::ident("def"),
        Value::list(vec![Value::ident("main"), Value::ident("int")]),
        Value::list(vec![]),
        body,
    ]))
}

// Reads every top-level form without the `main` wrapper; used by unit
// tests that want to inspect the raw tree the reader produces.
pub fn read_all(source: &str) -> Result<Vec<Value>, CompileError> {
    let mut r = Reader::new(source);
    let mut forms = Vec::new();
    loop {
        r.skip_ws();
        if r.at_end() {
            break;
        }
        forms.push(r.read_form().map_err(log_err)?);
    }
    Ok(forms)
}

struct Reader {
    chars: Vec<char>,
    pos: usize,
}

impl Reader {
    fn new(source: &str) -> Reader {
        Reader {
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn read_form(&mut self) -> Result<Value, CompileError> {
        self.skip_ws();
        match self.peek() {
            None => Err(CompileError::UnbalancedParens),
            Some('(') => self.read_list(),
            Some(')') => Err(CompileError::UnbalancedParens),
            Some('"') => self.read_string(),
            Some('\'') => self.read_char(),
            Some(_) => self.read_atom(),
        }
    }

    fn read_list(&mut self) -> Result<Value, CompileError> {
        self.advance(); // consume '('
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Err(CompileError::UnbalancedParens),
                Some(')') => {
                    self.advance();
                    return Ok(Value::list(items));
                }
                _ => items.push(self.read_form()?),
            }
        }
    }

    fn read_string(&mut self) -> Result<Value, CompileError> {
        self.advance(); // opening quote
        let mut s = String::new();
        loop {
            match self.advance() {
                None => return Err(CompileError::UnterminatedString),
                Some('"') => break,
                Some('\\') => match self.advance() {
                    Some('n') => s.push('\n'),
                    Some('r') => s.push('\r'),
                    Some('t') => s.push('\t'),
                    Some('\\') => s.push('\\'),
                    Some('"') => s.push('"'),
                    Some(other) => {
                        return Err(CompileError::InvalidCharLiteral(format!("\\{}", other)))
                    }
                    None => return Err(CompileError::UnterminatedString),
                },
                Some(c) => s.push(c),
            }
        }
        Ok(Value::String(Rc::from(s.as_str())))
    }

    // `'A'` (single byte), `'\uXXXX'` (BMP codepoint), optionally followed
    // directly by a `u8` suffix narrowing the result to a byte literal
    // (e.g. `'A'u8`).
    fn read_char(&mut self) -> Result<Value, CompileError> {
        self.advance(); // opening quote
        let codepoint: u32 = match self.advance() {
            Some('\\') => {
                if self.advance() != Some('u') {
                    return Err(CompileError::InvalidCharLiteral(
                        "expected \\u escape".to_string(),
                    ));
                }
                let mut hex = String::new();
                for _ in 0..4 {
                    match self.advance() {
                        Some(c) if c.is_ascii_hexdigit() => hex.push(c),
                        _ => {
                            return Err(CompileError::InvalidCharLiteral(
                                "malformed \\uXXXX escape".to_string(),
                            ))
                        }
                    }
                }
                u32::from_str_radix(&hex, 16)
                    .map_err(|_| CompileError::InvalidCharLiteral(hex.clone()))?
            }
            Some(c) => c as u32,
            None => return Err(CompileError::UnterminatedString),
        };
        if self.advance() != Some('\'') {
            return Err(CompileError::InvalidCharLiteral(
                "unterminated character literal".to_string(),
            ));
        }
        if self.peek() == Some('u') && self.chars.get(self.pos + 1) == Some(&'8') {
            self.pos += 2;
            if codepoint > 0xFF {
                return Err(CompileError::InvalidCharLiteral(format!(
                    "codepoint {} does not fit in a byte",
                    codepoint
                )));
            }
            return Ok(Value::Byte(codepoint as u8));
        }
        Ok(Value::Int(codepoint as i64))
    }

    fn read_atom(&mut self) -> Result<Value, CompileError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == '(' || c == ')' {
                break;
            }
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if text.is_empty() {
            return Err(CompileError::TrailingGarbage("<empty atom>".to_string()));
        }
        parse_atom(&text)
    }
}

fn parse_atom(text: &str) -> Result<Value, CompileError> {
    if let Some(value) = try_parse_number(text) {
        return value;
    }
    if text.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
        return Err(CompileError::TrailingGarbage(format!(
            "identifier cannot begin with a digit: {}",
            text
        )));
    }
    Ok(Value::ident(text))
}

// Returns `None` when `text` is not number-shaped at all (so the caller
// falls through to identifier parsing); `Some(Err(_))` when it looks like
// a number but is malformed (e.g. a `u8` suffix that overflows a byte).
fn try_parse_number(text: &str) -> Option<Result<Value, CompileError>> {
    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    if rest.is_empty() || !rest.chars().next().unwrap().is_ascii_digit() {
        return None;
    }
    let (digits, is_byte) = match rest.strip_suffix("u8") {
        Some(d) => (d, true),
        None => (rest, false),
    };
    let magnitude: Result<i64, _> = if let Some(hex) = digits.strip_prefix("0x") {
        i64::from_str_radix(hex, 16)
    } else if let Some(hex) = digits.strip_prefix("0X") {
        i64::from_str_radix(hex, 16)
    } else {
        digits.parse::<i64>()
    };
    let magnitude = match magnitude {
        Ok(m) => m,
        Err(_) => {
            return Some(Err(CompileError::TrailingGarbage(format!(
                "malformed numeric literal: {}",
                text
            ))))
        }
    };
    let value = if negative { -magnitude } else { magnitude };
    if is_byte {
        if !(0..=255).contains(&value) {
            return Some(Err(CompileError::InvalidCharLiteral(format!(
                "byte literal out of range: {}",
                text
            ))));
        }
        Some(Ok(Value::Byte(value as u8)))
    } else {
        Some(Ok(Value::Int(value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_integers() {
        assert_eq!(read_all("42").unwrap(), vec![Value::Int(42)]);
        assert_eq!(read_all("-1").unwrap(), vec![Value::Int(-1)]);
        assert_eq!(read_all("0x7FFFFFFF").unwrap(), vec![Value::Int(0x7FFFFFFF)]);
    }

    #[test]
    fn reads_byte_literal() {
        assert_eq!(read_all("200u8").unwrap(), vec![Value::Byte(200)]);
    }

    #[test]
    fn rejects_out_of_range_byte() {
        assert!(read_all("300u8").is_err());
    }

    #[test]
    fn reads_identifiers_and_operators() {
        assert_eq!(read_all("foo").unwrap(), vec![Value::ident("foo")]);
        assert_eq!(read_all("+").unwrap(), vec![Value::ident("+")]);
    }

    #[test]
    fn reads_nested_list() {
        let forms = read_all("(+ 1 (- 2 3))").unwrap();
        assert_eq!(
            forms[0],
            Value::list(vec![
                Value::ident("+"),
                Value::Int(1),
                Value::list(vec![Value::ident("-"), Value::Int(2), Value::Int(3)]),
            ])
        );
    }

    #[test]
    fn reads_string_with_escapes() {
        assert_eq!(
            read_all("\"a\\nb\"").unwrap(),
            vec![Value::String(Rc::from("a\nb"))]
        );
    }

    #[test]
    fn reads_char_literal_with_u8_suffix() {
        assert_eq!(read_all("'A'u8").unwrap(), vec![Value::Byte(65)]);
    }

    #[test]
    fn unbalanced_parens_is_an_error() {
        assert!(read_all("(+ 1 2").is_err());
    }

    #[test]
    fn wraps_program_in_main() {
        let program = parse_program("(return 1)").unwrap();
        let top = program.as_list().unwrap();
        assert_eq!(top[0].as_identifier(), Some("def"));
        assert_eq!(top[1].as_list().unwrap()[0].as_identifier(), Some("main"));
    }
}
