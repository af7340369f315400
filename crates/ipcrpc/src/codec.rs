//! # Value Codec
//!
//! Maps each [`Value`] variant onto one `ipcpack` item.
//!
//! `Null` without a message is `Unit`; `Null` with a message is the variant
//! `"null"` wrapping a string, so a transport failure keeps its text on the wire.

use ipcpack::Decoder;
use ipcpack::Encoder;
use ipcpack::Tag;

use crate::error::Result;
use crate::error::RpcError;
use crate::value::Value;

const NULL_WITH_MESSAGE: &str = "null";

pub fn encode_val(enc: &mut Encoder, val: &Value) -> Result<()> {
    match val {
        Value::Null(None) => enc.unit()?,
        Value::Null(Some(msg)) => {
            enc.variant_begin(NULL_WITH_MESSAGE)?;
            enc.str(msg)?;
            enc.variant_end()?;
        }
        Value::Bool(v) => enc.bool(*v)?,
        Value::Int32(v) => enc.s32(*v)?,
        Value::UInt32(v) => enc.u32(*v)?,
        Value::Int64(v) => enc.s64(*v)?,
        Value::UInt64(v) => enc.u64(*v)?,
        Value::Float32(v) => enc.f32(*v)?,
        Value::Float64(v) => enc.f64(*v)?,
        Value::String(v) => enc.str(v)?,
        Value::Binary(v) => enc.bytes(v)?,
    }
    Ok(())
}

/// Encodes `vals` as a single list item.
pub fn encode_vals(enc: &mut Encoder, vals: &[Value]) -> Result<()> {
    enc.list_begin()?;
    for val in vals {
        encode_val(enc, val)?;
    }
    enc.list_end()?;
    Ok(())
}

pub fn decode_val(dec: &mut Decoder) -> Result<Value> {
    let val = match dec.peek_tag()? {
        Tag::Pad => {
            dec.skip()?;
            return decode_val(dec);
        }
        Tag::Unit => {
            dec.unit()?;
            Value::Null(None)
        }
        Tag::Variant => {
            let (name, mut payload) = dec.variant()?;
            if name != NULL_WITH_MESSAGE {
                return Err(RpcError::UnknownVariant(name.to_string()));
            }
            Value::Null(Some(payload.str()?.to_string()))
        }
        Tag::BoolTrue | Tag::BoolFalse => Value::Bool(dec.bool()?),
        Tag::S32 => Value::Int32(dec.s32()?),
        Tag::U32 => Value::UInt32(dec.u32()?),
        Tag::S64 => Value::Int64(dec.s64()?),
        Tag::U64 => Value::UInt64(dec.u64()?),
        Tag::F32 => Value::Float32(dec.f32()?),
        Tag::F64 => Value::Float64(dec.f64()?),
        Tag::String => Value::String(dec.str()?.to_string()),
        Tag::Bytes => Value::Binary(dec.bytes()?.to_vec()),
        tag @ (Tag::List | Tag::Map) => {
            return Err(RpcError::UnsupportedType(format!("{:?}", tag)));
        }
    };
    Ok(val)
}

/// Decodes a list item produced by [`encode_vals`].
pub fn decode_vals(dec: &mut Decoder) -> Result<Vec<Value>> {
    let mut out = Vec::new();
    for item in dec.list()? {
        let mut item = item?;
        out.push(decode_val(&mut item)?);
    }
    Ok(out)
}
