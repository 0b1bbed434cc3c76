//! Tagged MessagePack wire codec for silt.
//!
//! This crate serializes the values the platform moves across its message
//! bus: plain scalars and containers, a family of tagged extension types,
//! and typed records resolved through a registry.
//!
//! # Tag protocol
//!
//! Types MessagePack cannot represent directly are wrapped in a map with
//! the reserved tag key `"t"` and the payload key `"o"` (plus `"d"` for a
//! dtype descriptor where one applies):
//!
//! | tag   | meaning                     | payload              |
//! |-------|-----------------------------|----------------------|
//! | `"l"` | heterogeneous list          | sequence of elements |
//! | `"s"` | set                         | sequence of elements |
//! | `"a"` | n-dimensional numeric array | nested lists + dtype |
//! | `"c"` | complex number              | `(real, imag)`       |
//! | `"d"` | dtype descriptor            | dtype string         |
//! | `"i"` | slice                       | `(start, stop, step)`|
//! | `"n"` | numeric scalar with dtype   | scalar + dtype       |
//!
//! Typed records travel as plain maps carrying a `type_` key; decoding
//! consults the [`TypeRegistry`] and routes undeclared keys into the
//! record's extensions map.
//!
//! The codec is symmetric: `decode(encode(x)) == x` for every supported
//! value, with float equality taken bitwise and sets compared as sets.

mod decode;
mod encode;
mod error;
mod intercept;
mod json;
mod registry;
mod value;

pub use decode::decode;
pub use encode::encode;
pub use error::{CodecError, Result};
pub use intercept::{Codec, DEFAULT_MAX_MESSAGE_SIZE, EncodeInterceptor};
pub use registry::{TypeRegistry, TypeSpec};
pub use value::{TypedRecord, WireValue};
