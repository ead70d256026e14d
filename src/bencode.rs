use crate::error::{Error, Result};

/// A decoded bencode value. Dictionaries keep their entries in the order they
/// appeared on the wire; [`encode`] is the one that sorts.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(Vec<(Vec<u8>, Value)>),
}

impl Value {
    /// Looks up a dictionary entry by key.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        match self {
            Value::Dict(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// JSON rendering for the `decode` command. Byte strings that are not
    /// valid UTF-8 are rendered lossily.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Bytes(b) => serde_json::Value::from(String::from_utf8_lossy(b).into_owned()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Dict(pairs) => serde_json::Value::Object(
                pairs
                    .iter()
                    .map(|(k, v)| (String::from_utf8_lossy(k).into_owned(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

/// Decodes one complete bencoded value; trailing bytes are an error.
pub fn decode(input: &[u8]) -> Result<Value> {
    let (value, rest) = decode_value(input)?;
    if !rest.is_empty() {
        return Err(Error::MalformedBencode(format!(
            "{} trailing bytes after value",
            rest.len()
        )));
    }
    Ok(value)
}

/// Canonical encoding: dictionary keys sorted lexicographically by raw bytes.
/// The info hash is defined over exactly this form.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_value(value, &mut out);
    out
}

fn decode_value(input: &[u8]) -> Result<(Value, &[u8])> {
    match input.first() {
        Some(b'i') => decode_int(input),
        Some(b'l') => decode_list(input),
        Some(b'd') => decode_dict(input),
        Some(b'0'..=b'9') => {
            let (bytes, rest) = decode_bytes(input)?;
            Ok((Value::Bytes(bytes), rest))
        }
        Some(&other) => Err(Error::MalformedBencode(format!(
            "unexpected byte {:#04x}",
            other
        ))),
        None => Err(Error::MalformedBencode("unexpected end of input".into())),
    }
}

fn decode_int(input: &[u8]) -> Result<(Value, &[u8])> {
    let body = &input[1..];
    let end = body
        .iter()
        .position(|&b| b == b'e')
        .ok_or_else(|| Error::MalformedBencode("unterminated integer".into()))?;
    let digits = std::str::from_utf8(&body[..end])
        .map_err(|_| Error::MalformedBencode("non-numeric integer".into()))?;
    if digits.is_empty() || digits == "-0" || (digits.len() > 1 && digits.starts_with('0')) {
        return Err(Error::MalformedBencode(format!("invalid integer {digits:?}")));
    }
    let value = digits
        .parse::<i64>()
        .map_err(|_| Error::MalformedBencode(format!("invalid integer {digits:?}")))?;
    Ok((Value::Int(value), &body[end + 1..]))
}

fn decode_bytes(input: &[u8]) -> Result<(Vec<u8>, &[u8])> {
    let colon = input
        .iter()
        .position(|&b| b == b':')
        .ok_or_else(|| Error::MalformedBencode("missing ':' after string length".into()))?;
    let len = std::str::from_utf8(&input[..colon])
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| Error::MalformedBencode("invalid string length".into()))?;
    let body = &input[colon + 1..];
    if len > body.len() {
        return Err(Error::MalformedBencode(format!(
            "string length {len} exceeds remaining {} bytes",
            body.len()
        )));
    }
    Ok((body[..len].to_vec(), &body[len..]))
}

fn decode_list(input: &[u8]) -> Result<(Value, &[u8])> {
    let mut rest = &input[1..];
    let mut items = Vec::new();
    loop {
        match rest.first() {
            Some(b'e') => return Ok((Value::List(items), &rest[1..])),
            Some(_) => {
                let (item, remainder) = decode_value(rest)?;
                items.push(item);
                rest = remainder;
            }
            None => return Err(Error::MalformedBencode("unterminated list".into())),
        }
    }
}

fn decode_dict(input: &[u8]) -> Result<(Value, &[u8])> {
    let mut rest = &input[1..];
    let mut pairs = Vec::new();
    loop {
        match rest.first() {
            Some(b'e') => return Ok((Value::Dict(pairs), &rest[1..])),
            Some(b'0'..=b'9') => {
                let (key, remainder) = decode_bytes(rest)?;
                let (value, remainder) = decode_value(remainder)?;
                pairs.push((key, value));
                rest = remainder;
            }
            Some(_) => {
                return Err(Error::MalformedBencode(
                    "dictionary key is not a byte string".into(),
                ))
            }
            None => return Err(Error::MalformedBencode("unterminated dictionary".into())),
        }
    }
}

fn encode_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Int(i) => {
            out.push(b'i');
            out.extend_from_slice(i.to_string().as_bytes());
            out.push(b'e');
        }
        Value::Bytes(bytes) => encode_bytes(bytes, out),
        Value::List(items) => {
            out.push(b'l');
            for item in items {
                encode_value(item, out);
            }
            out.push(b'e');
        }
        Value::Dict(pairs) => {
            let mut sorted: Vec<&(Vec<u8>, Value)> = pairs.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            out.push(b'd');
            for (key, value) in sorted {
                encode_bytes(key, out);
                encode_value(value, out);
            }
            out.push(b'e');
        }
    }
}

fn encode_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}
