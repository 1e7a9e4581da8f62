//! Length-prefixed wire codec for daqlink.
//!
//! Every value on the wire is self-describing:
//! - integers are 4 bytes, big-endian, unsigned
//! - strings are a length prefix followed by UTF-8 bytes
//! - scalars and arrays carry a numpy-style dtype descriptor (`<f8`, `>i4`,
//!   `|u1`), arrays additionally their rank and shape
//! - lists are a count followed by tagged elements
//!
//! Readers never consume past the bytes a value declares, so a socket's
//! readiness state always reflects the frames still waiting on it.

pub mod codec;
pub mod dtype;
pub mod error;
pub mod reader;
pub mod value;
pub mod writer;

pub use codec::{
    Encoder, WireConfig, DEFAULT_MAX_PAYLOAD, INT_SIZE, READ_CHUNK_SIZE, TAG_ARRAY, TAG_SCALAR,
    TAG_STRING,
};
pub use dtype::{ByteOrder, Dtype, DtypeKind, Element};
pub use error::{Result, WireError};
pub use reader::WireReader;
pub use value::{Scalar, WireArray, WireValue};
pub use writer::WireWriter;
