//! # Protocol Frames
//!
//! The envelope around one call or one reply.
//!
//! ```text
//! Call  = Variant("Call",  Map { id: u64, class: str, function: str, args: List })
//! Reply = Variant("Reply", Map { id: u64, values: List })
//! ```
//!
//! ## Invariants
//! - Decoding never panics on untrusted input; every path returns `Result`.
//! - Unknown map keys are skipped, so either side may add fields.

use ipcpack::Decoder;
use ipcpack::Encoder;

use crate::CallId;
use crate::codec::decode_vals;
use crate::codec::encode_vals;
use crate::error::Result;
use crate::error::RpcError;
use crate::response::Response;
use crate::value::Value;

const CALL: &str = "Call";
const REPLY: &str = "Reply";

/// Encodes an outbound call.
pub struct CallFrame<'a> {
    pub id: CallId,
    pub class: &'a str,
    pub function: &'a str,
    pub args: &'a [Value],
}

impl<'a> CallFrame<'a> {
    pub fn new(id: CallId, class: &'a str, function: &'a str, args: &'a [Value]) -> Self {
        Self { id, class, function, args }
    }

    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.variant_begin(CALL)?;
        enc.map_begin()?;

        write_entry(enc, "id", |enc| enc.u64(self.id))?;
        write_entry(enc, "class", |enc| enc.str(self.class))?;
        write_entry(enc, "function", |enc| enc.str(self.function))?;

        enc.variant_begin("args")?;
        encode_vals(enc, self.args)?;
        enc.variant_end()?;

        enc.map_end()?;
        enc.variant_end()?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        self.encode(&mut enc)?;
        Ok(enc.into_bytes()?)
    }
}

/// A decoded inbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallDecoder<'a> {
    pub id: CallId,
    pub class: &'a str,
    pub function: &'a str,
    pub args: Vec<Value>,
}

impl<'a> CallDecoder<'a> {
    fn decode_body(mut body: Decoder<'a>) -> Result<Self> {
        let mut map = body.map()?;
        let mut id = None;
        let mut class = None;
        let mut function = None;
        let mut args = None;

        while let Some((key, mut val)) = map.next_entry()? {
            match key {
                "id" => id = Some(val.u64()?),
                "class" => class = Some(val.str()?),
                "function" => function = Some(val.str()?),
                "args" => args = Some(decode_vals(&mut val)?),
                _ => val.skip()?,
            }
        }

        Ok(Self {
            id: id.ok_or(missing("id"))?,
            class: class.ok_or(missing("class"))?,
            function: function.ok_or(missing("function"))?,
            args: args.ok_or(missing("args"))?,
        })
    }
}

/// Encodes an outbound reply.
pub struct ReplyFrame<'a> {
    pub id: CallId,
    pub values: &'a [Value],
}

impl<'a> ReplyFrame<'a> {
    pub fn new(id: CallId, values: &'a [Value]) -> Self {
        Self { id, values }
    }

    pub fn encode(&self, enc: &mut Encoder) -> Result<()> {
        enc.variant_begin(REPLY)?;
        enc.map_begin()?;

        write_entry(enc, "id", |enc| enc.u64(self.id))?;

        enc.variant_begin("values")?;
        encode_vals(enc, self.values)?;
        enc.variant_end()?;

        enc.map_end()?;
        enc.variant_end()?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut enc = Encoder::new();
        self.encode(&mut enc)?;
        Ok(enc.into_bytes()?)
    }
}

/// A decoded inbound reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplyDecoder {
    pub id: CallId,
    pub response: Response,
}

impl ReplyDecoder {
    fn decode_body(mut body: Decoder<'_>) -> Result<Self> {
        let mut map = body.map()?;
        let mut id = None;
        let mut values = None;

        while let Some((key, mut val)) = map.next_entry()? {
            match key {
                "id" => id = Some(val.u64()?),
                "values" => values = Some(decode_vals(&mut val)?),
                _ => val.skip()?,
            }
        }

        Ok(Self {
            id: id.ok_or(missing("id"))?,
            response: Response::from_values(values.ok_or(missing("values"))?),
        })
    }
}

/// Any frame that can arrive on the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame<'a> {
    Call(CallDecoder<'a>),
    Reply(ReplyDecoder),
}

impl<'a> Frame<'a> {
    pub fn decode(payload: &'a [u8]) -> Result<Self> {
        let mut dec = Decoder::new(payload);
        let (name, body) = dec.variant()?;
        match name {
            CALL => Ok(Frame::Call(CallDecoder::decode_body(body)?)),
            REPLY => Ok(Frame::Reply(ReplyDecoder::decode_body(body)?)),
            other => Err(RpcError::UnknownVariant(other.to_string())),
        }
    }
}

/// Reads only the call id of a frame.
///
/// Lets a receiver answer or fail the right call even when the rest of the
/// frame does not decode.
pub fn peek_id(payload: &[u8]) -> Result<CallId> {
    let mut dec = Decoder::new(payload);
    let (_, mut body) = dec.variant()?;
    let mut map = body.map()?;
    while let Some((key, mut val)) = map.next_entry()? {
        if key == "id" {
            return Ok(val.u64()?);
        }
    }
    Err(missing("id"))
}

fn write_entry(
    enc: &mut Encoder,
    key: &str,
    write: impl FnOnce(&mut Encoder) -> ipcpack::Result<()>,
) -> Result<()> {
    enc.variant_begin(key)?;
    write(enc)?;
    enc.variant_end()?;
    Ok(())
}

fn missing(field: &str) -> RpcError {
    RpcError::ProtocolViolation(format!("missing {}", field))
}
