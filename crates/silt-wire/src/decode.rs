//! Tag-protocol decoder.
//!
//! Decoding is order-independent over map keys: a map is read into pairs
//! first, then interpreted. A map carrying `type_` becomes a typed record
//! through the registry; a map carrying a known tag under `"t"` becomes
//! the wrapped extension type; anything else is a plain map. An unknown
//! `"t"` value passes through as a plain map, matching the tolerant
//! behavior of existing peers.

use std::collections::BTreeMap;
use std::io::Read;

use rmp::Marker;
use rmp::decode as mp;
use rmp::decode::RmpRead;

use crate::error::{CodecError, Result};
use crate::registry::TypeRegistry;
use crate::value::{
    DTYPE_KEY, PAYLOAD_KEY, TAG_ARRAY, TAG_COMPLEX, TAG_DTYPE, TAG_KEY, TAG_LIST, TAG_NUMERIC,
    TAG_SET, TAG_SLICE, TYPE_FIELD, WireValue,
};

/// Decode one value from `bytes`, consuming the whole input.
pub fn decode(bytes: &[u8], registry: &TypeRegistry) -> Result<WireValue> {
    let mut rd = bytes;
    let value = read_value(&mut rd, registry)?;
    if !rd.is_empty() {
        return Err(CodecError::Malformed(format!(
            "{} trailing bytes after value",
            rd.len()
        )));
    }
    Ok(value)
}

fn read_value(rd: &mut &[u8], registry: &TypeRegistry) -> Result<WireValue> {
    let marker = mp::read_marker(rd)?;
    Ok(match marker {
        Marker::Null => WireValue::Nil,
        Marker::True => WireValue::Bool(true),
        Marker::False => WireValue::Bool(false),

        Marker::FixPos(v) => WireValue::Int(v as i64),
        Marker::FixNeg(v) => WireValue::Int(v as i64),
        Marker::U8 => WireValue::Int(rd.read_data_u8()? as i64),
        Marker::U16 => WireValue::Int(rd.read_data_u16()? as i64),
        Marker::U32 => WireValue::Int(rd.read_data_u32()? as i64),
        Marker::U64 => WireValue::from_u64(rd.read_data_u64()?),
        Marker::I8 => WireValue::Int(rd.read_data_i8()? as i64),
        Marker::I16 => WireValue::Int(rd.read_data_i16()? as i64),
        Marker::I32 => WireValue::Int(rd.read_data_i32()? as i64),
        Marker::I64 => WireValue::Int(rd.read_data_i64()?),

        Marker::F32 => WireValue::Float(rd.read_data_f32()? as f64),
        Marker::F64 => WireValue::Float(rd.read_data_f64()?),

        Marker::FixStr(len) => WireValue::Str(read_str(rd, len as usize)?),
        Marker::Str8 => {
            let len = rd.read_data_u8()? as usize;
            WireValue::Str(read_str(rd, len)?)
        }
        Marker::Str16 => {
            let len = rd.read_data_u16()? as usize;
            WireValue::Str(read_str(rd, len)?)
        }
        Marker::Str32 => {
            let len = rd.read_data_u32()? as usize;
            WireValue::Str(read_str(rd, len)?)
        }

        Marker::Bin8 => {
            let len = rd.read_data_u8()? as usize;
            WireValue::Bin(read_bytes(rd, len)?)
        }
        Marker::Bin16 => {
            let len = rd.read_data_u16()? as usize;
            WireValue::Bin(read_bytes(rd, len)?)
        }
        Marker::Bin32 => {
            let len = rd.read_data_u32()? as usize;
            WireValue::Bin(read_bytes(rd, len)?)
        }

        Marker::FixArray(len) => read_list(rd, len as usize, registry)?,
        Marker::Array16 => {
            let len = rd.read_data_u16()? as usize;
            read_list(rd, len, registry)?
        }
        Marker::Array32 => {
            let len = rd.read_data_u32()? as usize;
            read_list(rd, len, registry)?
        }

        Marker::FixMap(len) => read_map(rd, len as usize, registry)?,
        Marker::Map16 => {
            let len = rd.read_data_u16()? as usize;
            read_map(rd, len, registry)?
        }
        Marker::Map32 => {
            let len = rd.read_data_u32()? as usize;
            read_map(rd, len, registry)?
        }

        other => return Err(other.into()),
    })
}

fn read_bytes(rd: &mut &[u8], len: usize) -> Result<Vec<u8>> {
    if rd.len() < len {
        return Err(CodecError::Malformed("input shorter than declared".into()));
    }
    let mut buf = vec![0u8; len];
    rd.read_exact(&mut buf)?;
    Ok(buf)
}

fn read_str(rd: &mut &[u8], len: usize) -> Result<String> {
    String::from_utf8(read_bytes(rd, len)?)
        .map_err(|_| CodecError::Malformed("invalid utf-8 in string".into()))
}

fn read_list(rd: &mut &[u8], len: usize, registry: &TypeRegistry) -> Result<WireValue> {
    let mut elems = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        elems.push(read_value(rd, registry)?);
    }
    Ok(WireValue::List(elems))
}

fn read_map(rd: &mut &[u8], len: usize, registry: &TypeRegistry) -> Result<WireValue> {
    let mut pairs = Vec::with_capacity(len.min(1024));
    for _ in 0..len {
        let key = match read_value(rd, registry)? {
            WireValue::Str(s) => s,
            other => {
                return Err(CodecError::Malformed(format!(
                    "map key must be a string, got {}",
                    other.kind()
                )));
            }
        };
        let value = read_value(rd, registry)?;
        pairs.push((key, value));
    }
    interpret_pairs(pairs, registry)
}

/// Interpret decoded map pairs: typed record, tagged extension type, or
/// plain map. Shared with the JSON bridge so both paths agree.
pub(crate) fn interpret_pairs(
    pairs: Vec<(String, WireValue)>,
    registry: &TypeRegistry,
) -> Result<WireValue> {
    if pairs.iter().any(|(k, _)| k == TYPE_FIELD) {
        return build_record(pairs, registry);
    }

    let tag = pairs.iter().find_map(|(k, v)| match (k.as_str(), v) {
        (TAG_KEY, WireValue::Str(t)) => Some(t.clone()),
        _ => None,
    });
    let Some(tag) = tag else {
        return Ok(WireValue::Map(pairs.into_iter().collect()));
    };

    let payload = pairs
        .iter()
        .find(|(k, _)| k == PAYLOAD_KEY)
        .map(|(_, v)| v.clone());
    let dtype = pairs.iter().find_map(|(k, v)| match (k.as_str(), v) {
        (DTYPE_KEY, WireValue::Str(s)) => Some(s.clone()),
        _ => None,
    });

    match tag.as_str() {
        TAG_LIST => match payload {
            Some(WireValue::List(xs)) => Ok(WireValue::List(xs)),
            _ => Err(CodecError::bad_payload('l', "expected a sequence")),
        },
        TAG_SET => match payload {
            Some(WireValue::List(xs)) => Ok(WireValue::Set(xs)),
            _ => Err(CodecError::bad_payload('s', "expected a sequence")),
        },
        TAG_ARRAY => match (payload, dtype) {
            (Some(WireValue::List(data)), Some(dtype)) => Ok(WireValue::Array { data, dtype }),
            _ => Err(CodecError::bad_payload(
                'a',
                "expected nested sequence and dtype",
            )),
        },
        TAG_COMPLEX => match payload {
            Some(WireValue::List(xs)) if xs.len() == 2 => {
                let (re, im) = (as_f64(&xs[0]), as_f64(&xs[1]));
                match (re, im) {
                    (Some(re), Some(im)) => Ok(WireValue::Complex { re, im }),
                    _ => Err(CodecError::bad_payload('c', "non-numeric component")),
                }
            }
            _ => Err(CodecError::bad_payload('c', "expected (real, imag)")),
        },
        TAG_DTYPE => match payload {
            Some(WireValue::Str(s)) => Ok(WireValue::Dtype(s)),
            _ => Err(CodecError::bad_payload('d', "expected a dtype string")),
        },
        TAG_SLICE => match payload {
            Some(WireValue::List(xs)) if xs.len() == 3 => {
                let mut bounds = [None, None, None];
                for (i, x) in xs.iter().enumerate() {
                    bounds[i] = match x {
                        WireValue::Nil => None,
                        WireValue::Int(v) => Some(*v),
                        _ => {
                            return Err(CodecError::bad_payload('i', "non-integer bound"));
                        }
                    };
                }
                Ok(WireValue::Slice {
                    start: bounds[0],
                    stop: bounds[1],
                    step: bounds[2],
                })
            }
            _ => Err(CodecError::bad_payload('i', "expected (start, stop, step)")),
        },
        TAG_NUMERIC => match (payload, dtype) {
            (Some(v @ (WireValue::Int(_) | WireValue::UInt(_) | WireValue::Float(_))), Some(dtype)) => {
                Ok(WireValue::Numeric {
                    value: Box::new(v),
                    dtype,
                })
            }
            _ => Err(CodecError::bad_payload('n', "expected scalar and dtype")),
        },
        // Unknown tag values pass through untouched.
        _ => Ok(WireValue::Map(pairs.into_iter().collect())),
    }
}

fn build_record(pairs: Vec<(String, WireValue)>, registry: &TypeRegistry) -> Result<WireValue> {
    let type_tag = pairs
        .iter()
        .find(|(k, _)| k == TYPE_FIELD)
        .and_then(|(_, v)| match v {
            WireValue::Str(s) => Some(s.clone()),
            _ => None,
        })
        .ok_or_else(|| CodecError::Malformed("type_ must be a string".into()))?;

    let spec = registry
        .spec(&type_tag)
        .ok_or_else(|| CodecError::UnknownTypeTag(type_tag.clone()))?;

    let mut fields = BTreeMap::new();
    let mut extensions = BTreeMap::new();
    for (k, v) in pairs {
        if k == TYPE_FIELD {
            continue;
        }
        if spec.declares(&k) {
            fields.insert(k, v);
        } else {
            extensions.insert(k, v);
        }
    }

    Ok(WireValue::Record(crate::value::TypedRecord {
        type_tag,
        fields,
        extensions,
    }))
}

fn as_f64(v: &WireValue) -> Option<f64> {
    match v {
        WireValue::Int(i) => Some(*i as f64),
        WireValue::UInt(u) => Some(*u as f64),
        WireValue::Float(f) => Some(*f),
        _ => None,
    }
}
