//! RESP wire codec: commands go out as arrays of bulk strings, replies come
//! back as any of the five RESP data types plus the error frame.

/// A parsed RESP reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    SimpleString(Vec<u8>),
    BulkString(Vec<u8>),
    Integer(i64),
    Array(Vec<Value>),
    Null,
    /// Raw server error text (`-ERR …`). Classification happens at the client
    /// boundary, not here.
    Error(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view of the reply: native integers pass through, string frames
    /// are parsed as decimal.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            Value::BulkString(bytes) | Value::SimpleString(bytes) => {
                std::str::from_utf8(bytes).ok()?.trim().parse().ok()
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::BulkString(bytes) | Value::SimpleString(bytes) => {
                std::str::from_utf8(bytes).ok()
            }
            _ => None,
        }
    }
}

/// A command argument, stringified by the canonical formatter: integers in
/// decimal, floats with their default precision, strings as-is.
#[derive(Debug, Clone)]
pub enum CommandArg {
    Str(String),
    Int(i64),
    Float(f64),
}

impl std::fmt::Display for CommandArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandArg::Str(s) => write!(f, "{s}"),
            CommandArg::Int(n) => write!(f, "{n}"),
            CommandArg::Float(x) => write!(f, "{x}"),
        }
    }
}

impl From<&str> for CommandArg {
    fn from(value: &str) -> Self {
        CommandArg::Str(value.to_string())
    }
}

impl From<String> for CommandArg {
    fn from(value: String) -> Self {
        CommandArg::Str(value)
    }
}

impl From<i64> for CommandArg {
    fn from(value: i64) -> Self {
        CommandArg::Int(value)
    }
}

impl From<f64> for CommandArg {
    fn from(value: f64) -> Self {
        CommandArg::Float(value)
    }
}

/// Serialize a command as a RESP array of bulk strings:
/// `*N\r\n$len\r\narg\r\n…`.
pub fn encode_command(args: &[CommandArg]) -> Vec<u8> {
    // Pre-size for the protocol overhead so small commands encode without
    // reallocating.
    let mut buf = Vec::with_capacity(64 + args.len() * 16);
    buf.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        let rendered = arg.to_string();
        buf.extend_from_slice(format!("${}\r\n", rendered.len()).as_bytes());
        buf.extend_from_slice(rendered.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    buf
}

#[derive(Debug, PartialEq)]
pub struct CodecError {
    pub message: String,
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid RESP frame: {}", self.message)
    }
}

fn malformed(message: impl Into<String>) -> CodecError {
    CodecError {
        message: message.into(),
    }
}

/// Parse one RESP value starting at `pos`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete frame, so
/// a transport can keep appending bytes and retry.
pub fn parse_value(buf: &[u8], pos: usize) -> Result<Option<(Value, usize)>, CodecError> {
    let Some((line, after_line)) = read_line(buf, pos) else {
        return Ok(None);
    };
    if line.is_empty() {
        return Err(malformed("empty frame header"));
    }
    let (prefix, rest) = line.split_at(1);
    match prefix[0] {
        b'+' => Ok(Some((Value::SimpleString(rest.to_vec()), after_line))),
        b'-' => Ok(Some((
            Value::Error(String::from_utf8_lossy(rest).into_owned()),
            after_line,
        ))),
        b':' => {
            let n = parse_decimal(rest)?;
            Ok(Some((Value::Integer(n), after_line)))
        }
        b'$' => {
            let len = parse_decimal(rest)?;
            if len < 0 {
                return Ok(Some((Value::Null, after_line)));
            }
            let len = len as usize;
            if buf.len() < after_line + len + 2 {
                return Ok(None);
            }
            if &buf[after_line + len..after_line + len + 2] != b"\r\n" {
                return Err(malformed("bulk string missing terminator"));
            }
            Ok(Some((
                Value::BulkString(buf[after_line..after_line + len].to_vec()),
                after_line + len + 2,
            )))
        }
        b'*' => {
            let count = parse_decimal(rest)?;
            if count < 0 {
                return Ok(Some((Value::Null, after_line)));
            }
            let mut items = Vec::with_capacity(count as usize);
            let mut cursor = after_line;
            for _ in 0..count {
                match parse_value(buf, cursor)? {
                    Some((item, next)) => {
                        items.push(item);
                        cursor = next;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((Value::Array(items), cursor)))
        }
        other => Err(malformed(format!(
            "unexpected type prefix {:?}",
            other as char
        ))),
    }
}

/// Parse a buffer expected to hold exactly one complete reply.
pub fn parse_reply(buf: &[u8]) -> Result<Value, CodecError> {
    match parse_value(buf, 0)? {
        Some((value, _)) => Ok(value),
        None => Err(malformed("truncated reply")),
    }
}

/// Slice out one `\r\n`-terminated line, returning it without the terminator
/// along with the offset just past it.
fn read_line(buf: &[u8], pos: usize) -> Option<(&[u8], usize)> {
    let haystack = buf.get(pos..)?;
    let at = haystack.windows(2).position(|w| w == b"\r\n")?;
    Some((&haystack[..at], pos + at + 2))
}

fn parse_decimal(bytes: &[u8]) -> Result<i64, CodecError> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| malformed("non-decimal length or integer"))
}
