use std::io::{ErrorKind, Read};

use bytes::{Bytes, BytesMut};
use daqlink_transport::TcpConnection;
use tracing::trace;

use crate::codec::{WireConfig, INT_SIZE, READ_CHUNK_SIZE, TAG_ARRAY, TAG_SCALAR, TAG_STRING};
use crate::dtype::Dtype;
use crate::error::{Result, WireError};
use crate::value::{element_count, Scalar, WireArray, WireValue};

/// numpy refuses more dimensions than this; so do we.
const MAX_RANK: usize = 64;

/// Reads wire values from any `Read` stream.
///
/// Handles short reads internally. Never reads past the bytes the current
/// value declares: there is no read-ahead buffer, so whatever has not been
/// decoded yet is still in the socket.
pub struct WireReader<T> {
    inner: T,
    config: WireConfig,
}

impl<T: Read> WireReader<T> {
    /// Create a new wire reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, WireConfig::default())
    }

    /// Create a new wire reader with explicit configuration.
    pub fn with_config(inner: T, config: WireConfig) -> Self {
        Self { inner, config }
    }

    /// Receive exactly `len` bytes, in chunks of at most [`READ_CHUNK_SIZE`].
    ///
    /// Returns `Err(WireError::ConnectionClosed)` if EOF arrives first.
    pub fn recv_exact(&mut self, len: usize) -> Result<Bytes> {
        let mut buf = BytesMut::zeroed(len);
        let mut filled = 0usize;
        while filled < len {
            let want = (len - filled).min(READ_CHUNK_SIZE);
            match self.inner.read(&mut buf[filled..filled + want]) {
                Ok(0) => return Err(WireError::ConnectionClosed),
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_timeout(&err) => return Err(WireError::Timeout),
                Err(err) => return Err(WireError::Io(err)),
            }
        }
        Ok(buf.freeze())
    }

    /// Receive a framing integer.
    pub fn recv_int(&mut self) -> Result<u32> {
        let bytes = self.recv_exact(INT_SIZE)?;
        let mut raw = [0u8; INT_SIZE];
        raw.copy_from_slice(&bytes);
        Ok(u32::from_be_bytes(raw))
    }

    fn recv_len(&mut self) -> Result<usize> {
        let len = self.recv_int()? as usize;
        if len > self.config.max_payload_size {
            return Err(WireError::PayloadTooLarge {
                size: len,
                max: self.config.max_payload_size,
            });
        }
        Ok(len)
    }

    /// Receive a string frame.
    pub fn recv_string(&mut self) -> Result<String> {
        let len = self.recv_len()?;
        let bytes = self.recv_exact(len)?;
        let s = String::from_utf8(bytes.to_vec())?;
        trace!(len, "received string frame");
        Ok(s)
    }

    fn recv_dtype(&mut self) -> Result<Dtype> {
        self.recv_string()?.parse()
    }

    /// Receive a scalar frame.
    pub fn recv_scalar(&mut self) -> Result<Scalar> {
        let dtype = self.recv_dtype()?;
        let len = self.recv_len()?;
        let raw = self.recv_exact(len)?;
        Scalar::from_raw(dtype, raw)
    }

    /// Receive an array frame and restore its shape.
    pub fn recv_array(&mut self) -> Result<WireArray> {
        let dtype = self.recv_dtype()?;
        let len = self.recv_len()?;
        let rank = self.recv_int()? as usize;
        if rank > MAX_RANK {
            return Err(WireError::InvalidArray(format!(
                "rank {rank} exceeds {MAX_RANK}"
            )));
        }
        let mut shape = Vec::with_capacity(rank);
        for _ in 0..rank {
            shape.push(self.recv_int()? as usize);
        }

        let expected = element_count(&shape).and_then(|n| n.checked_mul(dtype.itemsize()));
        if expected != Some(len) {
            return Err(WireError::InvalidArray(format!(
                "declared {len} bytes for shape {shape:?} with dtype {dtype}"
            )));
        }

        let data = self.recv_exact(len)?;
        trace!(%dtype, ?shape, "received array frame");
        WireArray::from_raw(dtype, shape, data)
    }

    /// Receive one list element whose tag was already read.
    pub fn recv_value(&mut self, tag: &str) -> Result<WireValue> {
        match tag {
            TAG_SCALAR => self.recv_scalar().map(WireValue::Scalar),
            TAG_STRING => self.recv_string().map(WireValue::String),
            TAG_ARRAY => self.recv_array().map(WireValue::Array),
            other => Err(WireError::UnknownListTag(other.to_string())),
        }
    }

    /// Receive a list frame.
    pub fn recv_list(&mut self) -> Result<Vec<WireValue>> {
        let count = self.recv_int()? as usize;
        // Each element takes at least a tag frame; do not trust the count for allocation.
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            let tag = self.recv_string()?;
            items.push(self.recv_value(&tag)?);
        }
        Ok(items)
    }

    /// Receive a list whose elements must all be strings (a settings path).
    pub fn recv_string_list(&mut self) -> Result<Vec<String>> {
        self.recv_list()?
            .into_iter()
            .map(|item| match item {
                WireValue::String(s) => Ok(s),
                other => Err(WireError::Type {
                    found: format!("list element tagged {:?}", other.tag()),
                    expected: "a list of strings",
                }),
            })
            .collect()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent reads.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current reader configuration.
    pub fn config(&self) -> &WireConfig {
        &self.config
    }
}

impl WireReader<TcpConnection> {
    /// Create a wire reader for a TCP connection and apply the read timeout from config.
    pub fn with_config_tcp(inner: TcpConnection, config: WireConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_wire_error)?;
        Ok(Self::with_config(inner, config))
    }
}

/// `SO_RCVTIMEO`/`SO_SNDTIMEO` expiry surfaces as `WouldBlock` on unix and
/// `TimedOut` on windows.
pub(crate) fn is_timeout(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

pub(crate) fn transport_to_wire_error(err: daqlink_transport::TransportError) -> WireError {
    match err {
        daqlink_transport::TransportError::Io(io)
        | daqlink_transport::TransportError::Accept(io)
        | daqlink_transport::TransportError::Poll(io) => WireError::Io(io),
        daqlink_transport::TransportError::Bind { source, .. }
        | daqlink_transport::TransportError::Connect { source, .. } => WireError::Io(source),
        other => WireError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::{Encoder, DEFAULT_MAX_PAYLOAD};

    fn wire(f: impl FnOnce(&mut Encoder<'_>) -> Result<()>) -> Vec<u8> {
        let mut buf = BytesMut::new();
        let mut enc = Encoder::new(&mut buf, DEFAULT_MAX_PAYLOAD);
        f(&mut enc).unwrap();
        buf.to_vec()
    }

    #[derive(Debug)]
    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    /// Records the largest buffer any single `read()` was offered.
    struct ChunkSpy {
        inner: Cursor<Vec<u8>>,
        largest_request: usize,
    }

    impl Read for ChunkSpy {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.largest_request = self.largest_request.max(buf.len());
            self.inner.read(buf)
        }
    }

    #[test]
    fn read_int_and_string() {
        let bytes = wire(|e| {
            e.put_int(7);
            e.put_string("move_abs")?;
            Ok(())
        });
        let mut reader = WireReader::new(Cursor::new(bytes));
        assert_eq!(reader.recv_int().unwrap(), 7);
        assert_eq!(reader.recv_string().unwrap(), "move_abs");
    }

    #[test]
    fn int_is_unsigned() {
        let mut reader = WireReader::new(Cursor::new(vec![0xFF, 0xFF, 0xFF, 0xFE]));
        assert_eq!(reader.recv_int().unwrap(), 0xFFFF_FFFE);
    }

    #[test]
    fn scalar_roundtrip_preserves_bits() {
        let values = [
            Scalar::new(12.546f64),
            Scalar::new(-3.25f32),
            Scalar::new(i64::MIN),
            Scalar::new(42i32),
            Scalar::new(200u8),
            Scalar::new(u16::MAX),
            Scalar::new(f64::NAN),
        ];
        for value in values {
            let bytes = wire(|e| e.put_scalar(&value).map(|_| ()));
            let decoded = WireReader::new(Cursor::new(bytes)).recv_scalar().unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn big_endian_scalar_from_foreign_peer() {
        let bytes = wire(|e| {
            e.put_string(">f8")?;
            e.put_int(8);
            Ok(())
        });
        let mut bytes = bytes;
        bytes.extend_from_slice(&1.5f64.to_be_bytes());

        let decoded = WireReader::new(Cursor::new(bytes)).recv_scalar().unwrap();
        assert_eq!(decoded.get::<f64>(), Some(1.5));
    }

    #[test]
    fn array_roundtrip_shapes_and_dtypes() {
        let arrays = vec![
            WireArray::from_values(vec![2, 3], &[1.0f64, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
            WireArray::from_values(vec![2, 2, 2], &[1u16, 2, 3, 4, 5, 6, 7, 8]).unwrap(),
            WireArray::from_values(Vec::new(), &[9i32]).unwrap(),
            WireArray::from_values::<f32>(vec![0], &[]).unwrap(),
            WireArray::from_values::<u8>(vec![3, 0], &[]).unwrap(),
            WireArray::from_slice(&[1i64, -1, i64::MAX]).to_order(crate::ByteOrder::Big),
        ];
        for array in arrays {
            let bytes = wire(|e| e.put_array(&array).map(|_| ()));
            let decoded = WireReader::new(Cursor::new(bytes)).recv_array().unwrap();
            assert_eq!(decoded, array);
            assert_eq!(decoded.shape(), array.shape());
        }
    }

    #[test]
    fn heterogeneous_list_roundtrip_keeps_order() {
        let items = vec![
            WireValue::from(WireArray::from_slice(&[1i64, 2, 3])),
            WireValue::from("ok"),
            WireValue::from(5i64),
            WireValue::from(2.654f64),
            WireValue::from(""),
        ];
        let bytes = wire(|e| e.put_list(&items).map(|_| ()));
        let decoded = WireReader::new(Cursor::new(bytes)).recv_list().unwrap();
        assert_eq!(decoded, items);
    }

    #[test]
    fn short_reads_do_not_change_results() {
        let items = vec![
            WireValue::from(WireArray::from_values(vec![4, 4], &[0.5f64; 16]).unwrap()),
            WireValue::from("Hello World"),
            WireValue::from(1i64),
        ];
        let bytes = wire(|e| {
            e.put_string("Done")?;
            e.put_list(&items)?;
            Ok(())
        });

        let mut reader = WireReader::new(ByteByByteReader { bytes, pos: 0 });
        assert_eq!(reader.recv_string().unwrap(), "Done");
        assert_eq!(reader.recv_list().unwrap(), items);
    }

    #[test]
    fn zero_length_payloads_decode_without_blocking() {
        let bytes = wire(|e| {
            e.put_string("")?;
            e.put_array(&WireArray::from_values::<f64>(vec![0], &[]).unwrap())?;
            e.put_list(&[])?;
            Ok(())
        });
        let mut reader = WireReader::new(Cursor::new(bytes));
        assert_eq!(reader.recv_string().unwrap(), "");
        assert!(reader.recv_array().unwrap().is_empty());
        assert!(reader.recv_list().unwrap().is_empty());
    }

    #[test]
    fn reads_stop_at_declared_length() {
        let mut bytes = wire(|e| e.put_string("Quit").map(|_| ()));
        bytes.extend_from_slice(b"next-frame");
        let mut reader = WireReader::new(Cursor::new(bytes));

        reader.recv_string().unwrap();
        assert_eq!(reader.get_ref().position(), 8);
    }

    #[test]
    fn large_payload_read_in_bounded_chunks() {
        let array = WireArray::from_values(vec![100, 100], &vec![7u32; 10_000]).unwrap();
        let bytes = wire(|e| e.put_array(&array).map(|_| ()));
        let spy = ChunkSpy {
            inner: Cursor::new(bytes),
            largest_request: 0,
        };

        let mut reader = WireReader::new(spy);
        assert_eq!(reader.recv_array().unwrap(), array);
        assert!(reader.get_ref().largest_request <= READ_CHUNK_SIZE);
    }

    #[test]
    fn truncated_stream_is_connection_closed() {
        let mut reader = WireReader::new(Cursor::new(vec![0, 0]));
        assert!(matches!(
            reader.recv_int().unwrap_err(),
            WireError::ConnectionClosed
        ));

        let mut bytes = wire(|e| e.put_string("position_is").map(|_| ()));
        bytes.truncate(bytes.len() - 3);
        let mut reader = WireReader::new(Cursor::new(bytes));
        assert!(matches!(
            reader.recv_string().unwrap_err(),
            WireError::ConnectionClosed
        ));
    }

    #[test]
    fn oversized_length_rejected_before_reading() {
        let cfg = WireConfig {
            max_payload_size: 16,
            ..WireConfig::default()
        };
        let mut reader = WireReader::with_config(Cursor::new(vec![0, 0, 4, 0]), cfg);
        assert!(matches!(
            reader.recv_string().unwrap_err(),
            WireError::PayloadTooLarge { size: 1024, max: 16 }
        ));
    }

    #[test]
    fn array_length_mismatch_rejected() {
        let bytes = wire(|e| {
            e.put_string("<f8")?;
            e.put_int(16);
            e.put_int(1);
            e.put_int(3);
            Ok(())
        });
        let mut reader = WireReader::new(Cursor::new(bytes));
        assert!(matches!(
            reader.recv_array().unwrap_err(),
            WireError::InvalidArray(_)
        ));
    }

    #[test]
    fn unknown_list_tag_rejected() {
        let bytes = wire(|e| {
            e.put_int(1);
            e.put_string("dict")?;
            Ok(())
        });
        let mut reader = WireReader::new(Cursor::new(bytes));
        assert!(matches!(
            reader.recv_list().unwrap_err(),
            WireError::UnknownListTag(tag) if tag == "dict"
        ));
    }

    #[test]
    fn string_list_rejects_other_elements() {
        let bytes = wire(|e| e.put_string_list(&["settings_client", "main", "gain"]).map(|_| ()));
        let mut reader = WireReader::new(Cursor::new(bytes));
        assert_eq!(
            reader.recv_string_list().unwrap(),
            ["settings_client", "main", "gain"]
        );

        let bytes = wire(|e| {
            e.put_list(&[WireValue::from("a"), WireValue::from(1.0f64)])
                .map(|_| ())
        });
        let mut reader = WireReader::new(Cursor::new(bytes));
        assert!(matches!(
            reader.recv_string_list().unwrap_err(),
            WireError::Type { .. }
        ));
    }

    #[test]
    fn invalid_utf8_rejected() {
        let mut reader = WireReader::new(Cursor::new(vec![0, 0, 0, 2, 0xC3, 0x28]));
        assert!(matches!(
            reader.recv_string().unwrap_err(),
            WireError::InvalidUtf8(_)
        ));
    }

    #[test]
    fn invalid_dtype_rejected() {
        let bytes = wire(|e| {
            e.put_string("<U8")?;
            e.put_int(8);
            Ok(())
        });
        let mut reader = WireReader::new(Cursor::new(bytes));
        assert!(matches!(
            reader.recv_scalar().unwrap_err(),
            WireError::InvalidDtype(_)
        ));
    }

    struct InterruptedThenData {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }

    #[test]
    fn interrupted_read_retries() {
        let bytes = wire(|e| e.put_string("ok").map(|_| ()));
        let mut reader = WireReader::new(InterruptedThenData {
            interrupted: false,
            inner: Cursor::new(bytes),
        });
        assert_eq!(reader.recv_string().unwrap(), "ok");
    }

    #[test]
    fn would_block_is_a_timeout() {
        struct WouldBlock;
        impl Read for WouldBlock {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::from(ErrorKind::WouldBlock))
            }
        }

        let mut reader = WireReader::new(WouldBlock);
        let err = reader.recv_int().unwrap_err();
        assert!(matches!(err, WireError::Timeout));
    }
}
