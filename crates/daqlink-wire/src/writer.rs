use std::fmt::Display;
use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use daqlink_transport::TcpConnection;
use tracing::trace;

use crate::codec::{Encoder, WireConfig};
use crate::error::{Result, WireError};
use crate::reader::{is_timeout, transport_to_wire_error};
use crate::value::{Scalar, WireArray, WireValue};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes wire values to any `Write` stream.
///
/// Each call encodes into an internal buffer first; bytes only reach the
/// stream once the whole batch encoded cleanly. A type error therefore
/// never leaves a half-written value behind.
pub struct WireWriter<T> {
    inner: T,
    buf: BytesMut,
    config: WireConfig,
}

impl<T: Write> WireWriter<T> {
    /// Create a new wire writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, WireConfig::default())
    }

    /// Create a new wire writer with explicit configuration.
    pub fn with_config(inner: T, config: WireConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode a batch of frames with `f` and write them as one unit.
    ///
    /// ```ignore
    /// writer.send_frames(|enc| {
    ///     enc.put_string("position_is")?;
    ///     enc.put_scalar(&Scalar::new(12.5f64))?;
    ///     Ok(())
    /// })?;
    /// ```
    pub fn send_frames<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Encoder<'_>) -> Result<()>,
    {
        self.buf.clear();
        {
            let mut enc = Encoder::new(&mut self.buf, self.config.max_payload_size);
            f(&mut enc)?;
        }
        trace!(len = self.buf.len(), "writing encoded frames");

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(WireError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_timeout(&err) => return Err(WireError::Timeout),
                Err(err) => return Err(WireError::Io(err)),
            }
        }

        self.flush()
    }

    pub fn send_int(&mut self, n: u32) -> Result<()> {
        self.send_frames(|enc| {
            enc.put_int(n);
            Ok(())
        })
    }

    pub fn send_string(&mut self, s: &str) -> Result<()> {
        self.send_frames(|enc| enc.put_string(s).map(|_| ()))
    }

    /// Send anything printable as a string frame.
    pub fn send_display(&mut self, value: &dyn Display) -> Result<()> {
        self.send_frames(|enc| enc.put_display(value).map(|_| ()))
    }

    pub fn send_scalar(&mut self, scalar: &Scalar) -> Result<()> {
        self.send_frames(|enc| enc.put_scalar(scalar).map(|_| ()))
    }

    pub fn send_array(&mut self, array: &WireArray) -> Result<()> {
        self.send_frames(|enc| enc.put_array(array).map(|_| ()))
    }

    /// Send a single untagged value.
    pub fn send_value(&mut self, value: &WireValue) -> Result<()> {
        self.send_frames(|enc| enc.put_value(value).map(|_| ()))
    }

    pub fn send_list(&mut self, items: &[WireValue]) -> Result<()> {
        self.send_frames(|enc| enc.put_list(items).map(|_| ()))
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_timeout(&err) => return Err(WireError::Timeout),
                Err(err) => return Err(WireError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying stream.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent encoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current writer configuration.
    pub fn config(&self) -> &WireConfig {
        &self.config
    }
}

impl WireWriter<TcpConnection> {
    /// Create a wire writer for a TCP connection and apply the write timeout from config.
    pub fn with_config_tcp(inner: TcpConnection, config: WireConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_wire_error)?;
        Ok(Self::with_config(inner, config))
    }
}
