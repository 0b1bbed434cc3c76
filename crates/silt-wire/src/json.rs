//! Bridge between wire values and JSON document bodies.
//!
//! Documents persist through JSONB, so anything that lives in a record
//! field must survive a trip through `serde_json::Value`. The extension
//! types reuse the same tag maps as the wire format, which keeps the two
//! representations interchangeable: a tagged map read back from the
//! database folds into the same [`WireValue`] the codec would produce.

use serde_json::{Map as JsonMap, Number, Value as Json};

use crate::decode::interpret_pairs;
use crate::error::{CodecError, Result};
use crate::registry::TypeRegistry;
use crate::value::{
    DTYPE_KEY, PAYLOAD_KEY, TAG_ARRAY, TAG_COMPLEX, TAG_DTYPE, TAG_KEY, TAG_NUMERIC, TAG_SET,
    TAG_SLICE, TYPE_FIELD, WireValue,
};

impl WireValue {
    /// Render as a JSON value suitable for a document body.
    ///
    /// Binary data and non-finite floats have no JSON form and are
    /// rejected as `UnknownType`.
    pub fn to_json(&self) -> Result<Json> {
        Ok(match self {
            WireValue::Nil => Json::Null,
            WireValue::Bool(b) => Json::Bool(*b),
            WireValue::Int(i) => Json::Number((*i).into()),
            WireValue::UInt(u) => Json::Number((*u).into()),
            WireValue::Float(f) => Json::Number(
                Number::from_f64(*f)
                    .ok_or_else(|| CodecError::UnknownType("non-finite float in document".into()))?,
            ),
            WireValue::Str(s) => Json::String(s.clone()),
            WireValue::Bin(_) => {
                return Err(CodecError::UnknownType(
                    "binary data in document body".into(),
                ));
            }
            WireValue::List(xs) => Json::Array(to_json_seq(xs)?),
            WireValue::Set(xs) => tagged(TAG_SET, Json::Array(to_json_seq(xs)?), None),
            WireValue::Map(m) => {
                let mut out = JsonMap::new();
                for (k, v) in m {
                    out.insert(k.clone(), v.to_json()?);
                }
                Json::Object(out)
            }
            WireValue::Complex { re, im } => {
                let pair = vec![
                    WireValue::Float(*re).to_json()?,
                    WireValue::Float(*im).to_json()?,
                ];
                tagged(TAG_COMPLEX, Json::Array(pair), None)
            }
            WireValue::Slice { start, stop, step } => {
                let bounds = [start, stop, step]
                    .into_iter()
                    .map(|b| match b {
                        Some(v) => Json::Number((*v).into()),
                        None => Json::Null,
                    })
                    .collect();
                tagged(TAG_SLICE, Json::Array(bounds), None)
            }
            WireValue::Dtype(s) => tagged(TAG_DTYPE, Json::String(s.clone()), None),
            WireValue::Array { data, dtype } => tagged(
                TAG_ARRAY,
                Json::Array(to_json_seq(data)?),
                Some(dtype.as_str()),
            ),
            WireValue::Numeric { value, dtype } => {
                tagged(TAG_NUMERIC, value.to_json()?, Some(dtype.as_str()))
            }
            WireValue::Record(rec) => {
                let mut out = JsonMap::new();
                out.insert(TYPE_FIELD.to_string(), Json::String(rec.type_tag.clone()));
                for (k, v) in rec.entries() {
                    out.insert(k.clone(), v.to_json()?);
                }
                Json::Object(out)
            }
        })
    }

    /// Reconstruct a wire value from a JSON document body.
    pub fn from_json(value: &Json, registry: &TypeRegistry) -> Result<WireValue> {
        Ok(match value {
            Json::Null => WireValue::Nil,
            Json::Bool(b) => WireValue::Bool(*b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    WireValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    WireValue::from_u64(u)
                } else {
                    // as_f64 is total for serde_json numbers
                    WireValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Json::String(s) => WireValue::Str(s.clone()),
            Json::Array(xs) => WireValue::List(
                xs.iter()
                    .map(|x| WireValue::from_json(x, registry))
                    .collect::<Result<_>>()?,
            ),
            Json::Object(m) => {
                let pairs = m
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), WireValue::from_json(v, registry)?)))
                    .collect::<Result<Vec<_>>>()?;
                interpret_pairs(pairs, registry)?
            }
        })
    }
}

fn to_json_seq(xs: &[WireValue]) -> Result<Vec<Json>> {
    xs.iter().map(WireValue::to_json).collect()
}

fn tagged(tag: &str, payload: Json, dtype: Option<&str>) -> Json {
    let mut m = JsonMap::new();
    m.insert(TAG_KEY.to_string(), Json::String(tag.to_string()));
    m.insert(PAYLOAD_KEY.to_string(), payload);
    if let Some(d) = dtype {
        m.insert(DTYPE_KEY.to_string(), Json::String(d.to_string()));
    }
    Json::Object(m)
}
