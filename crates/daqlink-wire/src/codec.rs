use std::fmt::Display;
use std::time::Duration;

use bytes::{BufMut, BytesMut};

use crate::error::{Result, WireError};
use crate::value::{Scalar, WireArray, WireValue};

/// Framing integer size: 4 bytes, big-endian, unsigned.
pub const INT_SIZE: usize = 4;

/// Largest single `read()` issued while collecting a payload.
pub const READ_CHUNK_SIZE: usize = 4096;

/// Default maximum length accepted for any one length-prefixed payload: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// List element tag for scalars.
pub const TAG_SCALAR: &str = "scalar";
/// List element tag for strings.
pub const TAG_STRING: &str = "string";
/// List element tag for arrays.
pub const TAG_ARRAY: &str = "array";

/// Encodes wire values into a buffer.
///
/// Wire layouts:
/// ```text
/// int     ┌───────────────┐
///         │ u32 BE (4B)   │
///         └───────────────┘
/// string  ┌───────────────┬──────────────────┐
///         │ len (int)     │ UTF-8 bytes      │
///         └───────────────┴──────────────────┘
/// scalar  ┌───────────────┬───────────────┬──────────────┐
///         │ dtype (str)   │ len (int)     │ element      │
///         └───────────────┴───────────────┴──────────────┘
/// array   ┌─────────────┬───────────┬────────────┬─────────────┬───────────┐
///         │ dtype (str) │ len (int) │ rank (int) │ dims (int)* │ data      │
///         └─────────────┴───────────┴────────────┴─────────────┴───────────┘
/// list    ┌─────────────┬────────────────────────────────────┐
///         │ count (int) │ (tag (str), element)*              │
///         └─────────────┴────────────────────────────────────┘
/// ```
///
/// Nothing reaches a stream until a whole batch encoded without error, see
/// [`crate::WireWriter::send_frames`].
pub struct Encoder<'a> {
    dst: &'a mut BytesMut,
    max_payload: usize,
}

impl<'a> Encoder<'a> {
    pub fn new(dst: &'a mut BytesMut, max_payload: usize) -> Self {
        Self { dst, max_payload }
    }

    /// Append a framing integer.
    pub fn put_int(&mut self, n: u32) -> &mut Self {
        self.dst.put_u32(n);
        self
    }

    fn put_len(&mut self, len: usize) -> Result<()> {
        let max = self.max_payload.min(u32::MAX as usize);
        if len > max {
            return Err(WireError::PayloadTooLarge { size: len, max });
        }
        self.dst.put_u32(len as u32);
        Ok(())
    }

    /// Append a string frame.
    pub fn put_string(&mut self, s: &str) -> Result<&mut Self> {
        self.put_len(s.len())?;
        self.dst.put_slice(s.as_bytes());
        Ok(self)
    }

    /// Append a string frame from anything printable.
    ///
    /// This is the explicit coercion point for labels: numeric or other
    /// non-string values are rendered with `Display` before encoding.
    pub fn put_display(&mut self, value: &dyn Display) -> Result<&mut Self> {
        self.put_string(&value.to_string())
    }

    /// Append a scalar frame. Only int/uint/float dtypes are accepted.
    pub fn put_scalar(&mut self, scalar: &Scalar) -> Result<&mut Self> {
        let dtype = scalar.dtype();
        if !dtype.kind().is_real_number() {
            return Err(WireError::Type {
                found: format!("scalar of dtype {dtype}"),
                expected: "an integer or float scalar",
            });
        }
        self.put_string(&dtype.to_string())?;
        self.put_len(scalar.raw().len())?;
        self.dst.put_slice(scalar.raw());
        Ok(self)
    }

    /// Append an array frame.
    pub fn put_array(&mut self, array: &WireArray) -> Result<&mut Self> {
        let rank = u32::try_from(array.ndim()).map_err(|_| {
            WireError::InvalidArray(format!("rank {} does not fit a frame", array.ndim()))
        })?;
        self.put_string(&array.dtype().to_string())?;
        self.put_len(array.data().len())?;
        self.put_int(rank);
        for &dim in array.shape() {
            let dim = u32::try_from(dim).map_err(|_| {
                WireError::InvalidArray(format!("dimension {dim} does not fit a frame"))
            })?;
            self.put_int(dim);
        }
        self.dst.put_slice(array.data());
        Ok(self)
    }

    /// Append one list element (without its tag).
    pub fn put_value(&mut self, value: &WireValue) -> Result<&mut Self> {
        match value {
            WireValue::Scalar(s) => self.put_scalar(s),
            WireValue::String(s) => self.put_string(s),
            WireValue::Array(a) => self.put_array(a),
        }
    }

    /// Append a list frame: count, then a tag and the value for each item.
    pub fn put_list(&mut self, items: &[WireValue]) -> Result<&mut Self> {
        let count = u32::try_from(items.len()).map_err(|_| WireError::PayloadTooLarge {
            size: items.len(),
            max: u32::MAX as usize,
        })?;
        self.put_int(count);
        for item in items {
            self.put_string(item.tag())?;
            self.put_value(item)?;
        }
        Ok(self)
    }

    /// Append a list of strings (paths).
    pub fn put_string_list<S: AsRef<str>>(&mut self, items: &[S]) -> Result<&mut Self> {
        let count = u32::try_from(items.len()).map_err(|_| WireError::PayloadTooLarge {
            size: items.len(),
            max: u32::MAX as usize,
        })?;
        self.put_int(count);
        for item in items {
            self.put_string(TAG_STRING)?;
            self.put_string(item.as_ref())?;
        }
        Ok(self)
    }
}

/// Configuration for wire readers and writers.
#[derive(Debug, Clone)]
pub struct WireConfig {
    /// Maximum length of a single length-prefixed payload. Default: 16 MiB.
    pub max_payload_size: usize,
    /// Read timeout for blocking operations.
    pub read_timeout: Option<Duration>,
    /// Write timeout for blocking operations.
    pub write_timeout: Option<Duration>,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
            read_timeout: None,
            write_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::Dtype;

    fn encode(f: impl FnOnce(&mut Encoder<'_>) -> Result<()>) -> Result<Vec<u8>> {
        let mut buf = BytesMut::new();
        let mut enc = Encoder::new(&mut buf, DEFAULT_MAX_PAYLOAD);
        f(&mut enc)?;
        Ok(buf.to_vec())
    }

    #[test]
    fn int_is_big_endian() {
        let bytes = encode(|e| {
            e.put_int(1);
            e.put_int(0x0A0B_0C0D);
            Ok(())
        })
        .unwrap();
        assert_eq!(bytes, [0, 0, 0, 1, 0x0A, 0x0B, 0x0C, 0x0D]);
    }

    #[test]
    fn string_layout() {
        let bytes = encode(|e| e.put_string("Done").map(|_| ())).unwrap();
        assert_eq!(bytes, b"\x00\x00\x00\x04Done");
    }

    #[test]
    fn display_coerces_numbers() {
        let bytes = encode(|e| e.put_display(&42).map(|_| ())).unwrap();
        assert_eq!(bytes, b"\x00\x00\x00\x0242");
    }

    #[test]
    fn scalar_layout() {
        let bytes = encode(|e| e.put_scalar(&Scalar::new(12.546f64)).map(|_| ())).unwrap();
        let mut expected = b"\x00\x00\x00\x03<f8\x00\x00\x00\x08".to_vec();
        expected.extend_from_slice(&12.546f64.to_le_bytes());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn array_layout() {
        let array = WireArray::from_values(vec![2, 1], &[1i32, 2]).unwrap();
        let bytes = encode(|e| e.put_array(&array).map(|_| ())).unwrap();

        let mut expected = b"\x00\x00\x00\x03<i4".to_vec();
        expected.extend_from_slice(&[0, 0, 0, 8]); // data length
        expected.extend_from_slice(&[0, 0, 0, 2]); // rank
        expected.extend_from_slice(&[0, 0, 0, 2, 0, 0, 0, 1]); // shape
        expected.extend_from_slice(&[1, 0, 0, 0, 2, 0, 0, 0]);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn list_layout_tags_each_element() {
        let items = vec![WireValue::from("ok"), WireValue::from(5i64)];
        let bytes = encode(|e| e.put_list(&items).map(|_| ())).unwrap();

        let mut expected = vec![0, 0, 0, 2];
        expected.extend_from_slice(b"\x00\x00\x00\x06string\x00\x00\x00\x02ok");
        expected.extend_from_slice(b"\x00\x00\x00\x06scalar\x00\x00\x00\x03<i8\x00\x00\x00\x08");
        expected.extend_from_slice(&5i64.to_le_bytes());
        assert_eq!(bytes, expected);
    }

    #[test]
    fn bool_and_complex_scalars_are_type_errors() {
        for descr in ["|b1", "<c16"] {
            let dtype: Dtype = descr.parse().unwrap();
            let scalar = Scalar::from_raw(dtype, vec![1u8; dtype.itemsize()]).unwrap();
            let err = encode(|e| e.put_scalar(&scalar).map(|_| ())).unwrap_err();
            assert!(matches!(err, WireError::Type { .. }), "{descr}");
        }
    }

    #[test]
    fn oversized_string_rejected() {
        let mut buf = BytesMut::new();
        let mut enc = Encoder::new(&mut buf, 4);
        let err = enc.put_string("too long").map(|_| ()).unwrap_err();
        assert!(matches!(err, WireError::PayloadTooLarge { size: 8, max: 4 }));
    }
}
