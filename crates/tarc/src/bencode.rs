//! Strict bencode codec.
//!
//! Metadata is only trusted when it is canonical: the decoder rejects
//! truncated documents, integers with leading zeros, unsorted or duplicated
//! dictionary keys and trailing bytes. Every error points at the field path
//! that failed, e.g. `info.files[3].length`.
//!
//! Encoding goes through `bendy`, which always emits dictionaries with
//! sorted keys, so `encode(decode(x)) == x` for every canonical `x`.

use std::collections::BTreeMap;

use bendy::encoding::{self, SingleItemEncoder, ToBencode};

use crate::error::{DecodeError, DecodeErrorKind};

/// Deepest nesting of lists and dictionaries accepted.
pub const MAX_DEPTH: usize = 64;

/// A decoded bencode value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// The byte string as UTF-8, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(v) => Some(v),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Bytes(_) => "byte string",
            Value::List(_) => "list",
            Value::Dict(_) => "dictionary",
        }
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Bytes(value.as_bytes().to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl ToBencode for Value {
    const MAX_DEPTH: usize = MAX_DEPTH + 1;

    fn encode(
        &self,
        encoder: SingleItemEncoder,
    ) -> Result<(), encoding::Error> {
        match self {
            Value::Int(v) => encoder.emit_int(*v),
            Value::Bytes(v) => encoder.emit_bytes(v),
            Value::List(list) => encoder.emit_list(|e| {
                for item in list {
                    e.emit(item)?;
                }
                Ok(())
            }),
            Value::Dict(dict) => encoder.emit_dict(|mut e| {
                for (key, value) in dict {
                    e.emit_pair(key, value)?;
                }
                Ok(())
            }),
        }
    }
}

/// Encode a value canonically.
pub fn encode(value: &Value) -> Result<Vec<u8>, encoding::Error> {
    value.to_bencode()
}

/// Decode exactly one canonical value spanning the whole buffer.
pub fn decode(buf: &[u8]) -> Result<Value, DecodeError> {
    let mut parser = Parser { buf, pos: 0, path: Vec::new() };
    let value = parser.value(0)?;

    if parser.pos != buf.len() {
        return Err(parser.error(
            DecodeErrorKind::NonCanonical,
            format!(
                "{} trailing bytes after the top-level value",
                buf.len() - parser.pos
            ),
        ));
    }

    Ok(value)
}

#[derive(Debug)]
enum Segment {
    Key(String),
    Index(usize),
}

/// Render a field path such as `info.files[2].path`.
fn render_path(path: &[Segment]) -> String {
    let mut out = String::new();
    for segment in path {
        match segment {
            Segment::Key(key) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(key);
            }
            Segment::Index(i) => {
                out.push_str(&format!("[{i}]"));
            }
        }
    }
    out
}

struct Parser<'a> {
    buf: &'a [u8],
    pos: usize,
    path: Vec<Segment>,
}

impl Parser<'_> {
    fn error(
        &self,
        kind: DecodeErrorKind,
        detail: impl Into<String>,
    ) -> DecodeError {
        DecodeError::new(kind, detail)
            .at(render_path(&self.path))
            .offset(self.pos)
    }

    fn truncated(&self) -> DecodeError {
        self.error(DecodeErrorKind::Truncated, "unexpected end of input")
    }

    fn peek(&self) -> Result<u8, DecodeError> {
        self.buf.get(self.pos).copied().ok_or_else(|| self.truncated())
    }

    fn value(&mut self, depth: usize) -> Result<Value, DecodeError> {
        if depth > MAX_DEPTH {
            return Err(self.error(
                DecodeErrorKind::InvalidType,
                format!("nesting deeper than {MAX_DEPTH} levels"),
            ));
        }

        match self.peek()? {
            b'i' => self.int().map(Value::Int),
            b'l' => self.list(depth),
            b'd' => self.dict(depth),
            b'0'..=b'9' => self.bytes().map(Value::Bytes),
            c => Err(self.error(
                DecodeErrorKind::InvalidType,
                format!("unexpected byte 0x{c:02x}"),
            )),
        }
    }

    /// Scan the run of digits (and `-` when `signed`) starting at `pos`, and
    /// return its end, which must hold `delim`.
    fn digits_until(
        &self,
        start: usize,
        delim: u8,
        signed: bool,
    ) -> Result<usize, DecodeError> {
        let end = self.buf[start..]
            .iter()
            .position(|&c| !(c.is_ascii_digit() || (signed && c == b'-')))
            .map(|i| start + i)
            .ok_or_else(|| self.truncated())?;

        if self.buf[end] != delim {
            return Err(self.error(
                DecodeErrorKind::InvalidType,
                format!("expected `{}` at byte {end}", delim as char),
            ));
        }
        Ok(end)
    }

    fn int(&mut self) -> Result<i64, DecodeError> {
        let start = self.pos + 1;
        let end = self.digits_until(start, b'e', true)?;
        let raw = &self.buf[start..end];

        let (negative, digits) = match raw.split_first() {
            Some((b'-', rest)) => (true, rest),
            _ => (false, raw),
        };

        if digits.is_empty() || digits.contains(&b'-') {
            return Err(
                self.error(DecodeErrorKind::InvalidType, "malformed integer")
            );
        }
        if digits.len() > 1 && digits[0] == b'0' {
            return Err(self.error(
                DecodeErrorKind::NonCanonical,
                "integer has leading zeros",
            ));
        }
        if negative && digits == b"0" {
            return Err(
                self.error(DecodeErrorKind::NonCanonical, "negative zero")
            );
        }

        // only ascii digits and a sign at this point
        let text = std::str::from_utf8(raw).unwrap_or_default();
        let value = text.parse::<i64>().map_err(|_| {
            self.error(DecodeErrorKind::InvalidType, "integer out of range")
        })?;

        self.pos = end + 1;
        Ok(value)
    }

    fn bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let start = self.pos;
        let colon = self.digits_until(start, b':', false)?;
        let digits = &self.buf[start..colon];

        if digits.len() > 1 && digits[0] == b'0' {
            return Err(self.error(
                DecodeErrorKind::NonCanonical,
                "string length has leading zeros",
            ));
        }

        let len = std::str::from_utf8(digits)
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .ok_or_else(|| {
                self.error(
                    DecodeErrorKind::InvalidType,
                    "string length out of range",
                )
            })?;

        let begin = colon + 1;
        let end = begin
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                self.error(
                    DecodeErrorKind::Truncated,
                    format!(
                        "string of {len} bytes runs past the end of input"
                    ),
                )
            })?;

        self.pos = end;
        Ok(self.buf[begin..end].to_vec())
    }

    fn list(&mut self, depth: usize) -> Result<Value, DecodeError> {
        self.pos += 1;
        let mut list = Vec::new();

        loop {
            if self.peek()? == b'e' {
                self.pos += 1;
                return Ok(Value::List(list));
            }
            self.path.push(Segment::Index(list.len()));
            let value = self.value(depth + 1)?;
            self.path.pop();
            list.push(value);
        }
    }

    fn dict(&mut self, depth: usize) -> Result<Value, DecodeError> {
        self.pos += 1;
        let mut dict = BTreeMap::new();
        let mut last_key: Option<Vec<u8>> = None;

        loop {
            let c = self.peek()?;
            if c == b'e' {
                self.pos += 1;
                return Ok(Value::Dict(dict));
            }
            if !c.is_ascii_digit() {
                return Err(self.error(
                    DecodeErrorKind::InvalidType,
                    "dictionary keys must be byte strings",
                ));
            }

            let key = self.bytes()?;
            if let Some(prev) = &last_key {
                if key == *prev {
                    return Err(self.error(
                        DecodeErrorKind::NonCanonical,
                        "duplicate dictionary key",
                    ));
                }
                if key < *prev {
                    return Err(self.error(
                        DecodeErrorKind::NonCanonical,
                        "dictionary keys are not sorted",
                    ));
                }
            }

            self.path.push(Segment::Key(String::from_utf8_lossy(&key).into()));
            let value = self.value(depth + 1)?;
            self.path.pop();

            last_key = Some(key.clone());
            dict.insert(key, value);
        }
    }
}
