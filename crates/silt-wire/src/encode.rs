//! Tag-protocol encoder.
//!
//! Values the underlying MessagePack format represents directly (nil,
//! bool, integers, floats, strings, binary, arrays, string-keyed maps) are
//! written natively. Everything else is wrapped in a map under the
//! reserved tag key `"t"` with its payload under `"o"` (and a dtype
//! descriptor under `"d"` where one applies). Typed records are written as
//! plain maps carrying their `type_` tag.

use rmp::encode as mp;

use crate::error::{CodecError, Result};
use crate::value::{
    DTYPE_KEY, PAYLOAD_KEY, TAG_ARRAY, TAG_COMPLEX, TAG_DTYPE, TAG_KEY, TAG_NUMERIC, TAG_SET,
    TAG_SLICE, TYPE_FIELD, TypedRecord, WireValue,
};

/// Encode a value to MessagePack bytes.
///
/// Deterministic for a given input: maps iterate in key order, so the same
/// value always produces identical bytes.
pub fn encode(value: &WireValue) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_value(&mut buf, value)?;
    Ok(buf)
}

fn container_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| CodecError::Malformed("container too large".into()))
}

fn write_value(wr: &mut Vec<u8>, value: &WireValue) -> Result<()> {
    match value {
        WireValue::Nil => mp::write_nil(wr)?,
        WireValue::Bool(b) => mp::write_bool(wr, *b)?,
        WireValue::Int(i) => {
            mp::write_sint(wr, *i)?;
        }
        WireValue::UInt(u) => {
            mp::write_uint(wr, *u)?;
        }
        WireValue::Float(f) => mp::write_f64(wr, *f)?,
        WireValue::Str(s) => mp::write_str(wr, s)?,
        WireValue::Bin(b) => mp::write_bin(wr, b)?,
        WireValue::List(xs) => write_array(wr, xs)?,
        WireValue::Set(xs) => {
            write_tag(wr, TAG_SET, 2)?;
            mp::write_str(wr, PAYLOAD_KEY)?;
            write_array(wr, xs)?;
        }
        WireValue::Map(m) => {
            mp::write_map_len(wr, container_len(m.len())?)?;
            for (k, v) in m {
                mp::write_str(wr, k)?;
                write_value(wr, v)?;
            }
        }
        WireValue::Complex { re, im } => {
            write_tag(wr, TAG_COMPLEX, 2)?;
            mp::write_str(wr, PAYLOAD_KEY)?;
            mp::write_array_len(wr, 2)?;
            mp::write_f64(wr, *re)?;
            mp::write_f64(wr, *im)?;
        }
        WireValue::Slice { start, stop, step } => {
            write_tag(wr, TAG_SLICE, 2)?;
            mp::write_str(wr, PAYLOAD_KEY)?;
            mp::write_array_len(wr, 3)?;
            for bound in [start, stop, step] {
                match bound {
                    Some(v) => {
                        mp::write_sint(wr, *v)?;
                    }
                    None => mp::write_nil(wr)?,
                }
            }
        }
        WireValue::Dtype(s) => {
            write_tag(wr, TAG_DTYPE, 2)?;
            mp::write_str(wr, PAYLOAD_KEY)?;
            mp::write_str(wr, s)?;
        }
        WireValue::Array { data, dtype } => {
            write_tag(wr, TAG_ARRAY, 3)?;
            mp::write_str(wr, PAYLOAD_KEY)?;
            write_array(wr, data)?;
            mp::write_str(wr, DTYPE_KEY)?;
            mp::write_str(wr, dtype)?;
        }
        WireValue::Numeric { value, dtype } => {
            match value.as_ref() {
                WireValue::Int(_) | WireValue::UInt(_) | WireValue::Float(_) => {}
                other => {
                    return Err(CodecError::UnknownType(format!(
                        "numeric scalar cannot carry a {}",
                        other.kind()
                    )));
                }
            }
            write_tag(wr, TAG_NUMERIC, 3)?;
            mp::write_str(wr, PAYLOAD_KEY)?;
            write_value(wr, value)?;
            mp::write_str(wr, DTYPE_KEY)?;
            mp::write_str(wr, dtype)?;
        }
        WireValue::Record(rec) => write_record(wr, rec)?,
    }
    Ok(())
}

fn write_array(wr: &mut Vec<u8>, xs: &[WireValue]) -> Result<()> {
    mp::write_array_len(wr, container_len(xs.len())?)?;
    for x in xs {
        write_value(wr, x)?;
    }
    Ok(())
}

/// Write the opening of a tagged map: the map header and the `"t"` entry.
/// `entries` counts the tag entry itself.
fn write_tag(wr: &mut Vec<u8>, tag: &str, entries: u32) -> Result<()> {
    mp::write_map_len(wr, entries)?;
    mp::write_str(wr, TAG_KEY)?;
    mp::write_str(wr, tag)?;
    Ok(())
}

fn write_record(wr: &mut Vec<u8>, rec: &TypedRecord) -> Result<()> {
    mp::write_map_len(wr, container_len(rec.len() + 1)?)?;
    mp::write_str(wr, TYPE_FIELD)?;
    mp::write_str(wr, &rec.type_tag)?;
    for (k, v) in rec.entries() {
        mp::write_str(wr, k)?;
        write_value(wr, v)?;
    }
    Ok(())
}
