//! Call and Result Envelope wire format.
//!
//! Each envelope is sent as a single datagram: a one byte message kind
//! followed by any number of length-delimited fields.
//!
//! ```text
//! [u8: kind] ([u8: field][u32 BE: len][len bytes])*
//! ```
//!
//! | kind | message | fields |
//! |------|---------|--------|
//! | 1 | call | 1 = classname, 2 = methodname, 3 = parameter (repeated) |
//! | 2 | result | 1 = result, 2 = exception |
//!
//! Unknown fields are skipped. No request id is carried, so a retransmitted
//! call is byte-identical to the original.

use crate::codec::Payload;
use crate::error::{Result, RpcError};
use bytes::{Buf, BufMut, Bytes, BytesMut};

const KIND_CALL: u8 = 1;
const KIND_RESULT: u8 = 2;

const FIELD_CLASSNAME: u8 = 1;
const FIELD_METHODNAME: u8 = 2;
const FIELD_PARAMETER: u8 = 3;

const FIELD_RESULT: u8 = 1;
const FIELD_EXCEPTION: u8 = 2;

/// A request naming a procedure and carrying its encoded arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEnvelope {
    pub type_name: String,
    pub method_name: String,
    pub arguments: Vec<Bytes>,
}

impl CallEnvelope {
    pub fn new(type_name: impl Into<String>, method_name: impl Into<String>, args: &[Payload]) -> Self {
        Self {
            type_name: type_name.into(),
            method_name: method_name.into(),
            arguments: args.iter().map(Payload::to_bytes).collect(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(KIND_CALL);
        write_field(&mut buf, FIELD_CLASSNAME, self.type_name.as_bytes());
        write_field(&mut buf, FIELD_METHODNAME, self.method_name.as_bytes());
        for arg in &self.arguments {
            write_field(&mut buf, FIELD_PARAMETER, arg);
        }
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut buf = expect_kind(data, KIND_CALL)?;
        let mut type_name = None;
        let mut method_name = None;
        let mut arguments = Vec::new();

        while let Some((field, value)) = read_field(&mut buf)? {
            match field {
                FIELD_CLASSNAME => type_name = Some(utf8_field("classname", value)?),
                FIELD_METHODNAME => method_name = Some(utf8_field("methodname", value)?),
                FIELD_PARAMETER => arguments.push(value),
                _ => {}
            }
        }

        Ok(Self {
            type_name: type_name.ok_or_else(|| decode_error("call is missing classname"))?,
            method_name: method_name.ok_or_else(|| decode_error("call is missing methodname"))?,
            arguments,
        })
    }
}

/// The outcome of a call: exactly one of a return value or a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultEnvelope {
    Success(Bytes),
    Failure(Bytes),
}

impl ResultEnvelope {
    pub fn success(value: &Payload) -> Self {
        ResultEnvelope::Success(value.to_bytes())
    }

    pub fn failure(failure: &Payload) -> Self {
        ResultEnvelope::Failure(failure.to_bytes())
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u8(KIND_RESULT);
        match self {
            ResultEnvelope::Success(value) => write_field(&mut buf, FIELD_RESULT, value),
            ResultEnvelope::Failure(failure) => write_field(&mut buf, FIELD_EXCEPTION, failure),
        }
        buf.freeze()
    }

    /// Decode a result. If both fields are present the exception wins.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut buf = expect_kind(data, KIND_RESULT)?;
        let mut result = None;
        let mut exception = None;

        while let Some((field, value)) = read_field(&mut buf)? {
            match field {
                FIELD_RESULT => result = Some(value),
                FIELD_EXCEPTION => exception = Some(value),
                _ => {}
            }
        }

        match (exception, result) {
            (Some(failure), _) => Ok(ResultEnvelope::Failure(failure)),
            (None, Some(value)) => Ok(ResultEnvelope::Success(value)),
            (None, None) => Err(decode_error("result carries neither result nor exception")),
        }
    }
}

fn expect_kind(data: &[u8], kind: u8) -> Result<&[u8]> {
    match data.split_first() {
        Some((&found, rest)) if found == kind => Ok(rest),
        Some((&found, _)) => Err(RpcError::ProtocolDecode {
            message: format!("unexpected message kind {} (wanted {})", found, kind),
        }),
        None => Err(decode_error("empty datagram")),
    }
}

fn write_field(buf: &mut BytesMut, field: u8, value: &[u8]) {
    buf.put_u8(field);
    buf.put_u32(value.len() as u32);
    buf.put_slice(value);
}

/// Read one field. Returns `None` once the message is exhausted.
fn read_field(buf: &mut &[u8]) -> Result<Option<(u8, Bytes)>> {
    if !buf.has_remaining() {
        return Ok(None);
    }
    if buf.remaining() < 5 {
        return Err(decode_error("truncated field header"));
    }
    let field = buf.get_u8();
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(RpcError::ProtocolDecode {
            message: format!(
                "field {} claims {} bytes but only {} remain",
                field,
                len,
                buf.remaining()
            ),
        });
    }
    let value = Bytes::copy_from_slice(&buf[..len]);
    buf.advance(len);
    Ok(Some((field, value)))
}

fn utf8_field(name: &str, value: Bytes) -> Result<String> {
    String::from_utf8(value.to_vec()).map_err(|_| RpcError::ProtocolDecode {
        message: format!("{} is not valid UTF-8", name),
    })
}

fn decode_error(message: &str) -> RpcError {
    RpcError::ProtocolDecode {
        message: message.to_string(),
    }
}
