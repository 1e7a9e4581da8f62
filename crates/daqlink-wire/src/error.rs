/// Errors that can occur while encoding or decoding wire values.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The stream ended before a declared length was fully received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,

    /// The value cannot travel through the requested encoder.
    /// Raised before anything is written.
    #[error("cannot send {found} as {expected}")]
    Type {
        found: String,
        expected: &'static str,
    },

    /// A dtype descriptor could not be parsed.
    #[error("invalid dtype descriptor {0:?}")]
    InvalidDtype(String),

    /// Array bytes, shape and dtype disagree.
    #[error("invalid array: {0}")]
    InvalidArray(String),

    /// A declared payload length exceeds the configured maximum.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A string frame did not hold UTF-8.
    #[error("string frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// A list element carried a kind tag other than scalar/string/array.
    #[error("unknown list element tag {0:?}")]
    UnknownListTag(String),

    /// The socket timeout expired before the frame was fully transferred.
    #[error("timed out mid-frame")]
    Timeout,

    /// An I/O error occurred while reading or writing.
    #[error("wire I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WireError>;
