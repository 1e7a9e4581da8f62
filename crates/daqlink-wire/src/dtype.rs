//! numpy-style dtype descriptors.
//!
//! A descriptor is `<order><kind><itemsize>`, e.g. `<f8` (little-endian
//! 8-byte float), `>i4` (big-endian 4-byte int) or `|u1` (byte, order not
//! applicable). The order character decides how element bytes are laid out;
//! it has nothing to do with the big-endian framing integers.

use std::fmt;
use std::str::FromStr;

use crate::error::WireError;

/// Byte order of array/scalar payload elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ByteOrder {
    Little,
    Big,
    /// Single-byte elements (`|`).
    NotApplicable,
}

impl ByteOrder {
    fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    fn as_char(self) -> char {
        match self {
            ByteOrder::Little => '<',
            ByteOrder::Big => '>',
            ByteOrder::NotApplicable => '|',
        }
    }
}

/// Element kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DtypeKind {
    Int,
    UInt,
    Float,
    Complex,
    Bool,
}

impl DtypeKind {
    fn as_char(self) -> char {
        match self {
            DtypeKind::Int => 'i',
            DtypeKind::UInt => 'u',
            DtypeKind::Float => 'f',
            DtypeKind::Complex => 'c',
            DtypeKind::Bool => 'b',
        }
    }

    fn from_char(c: char) -> Option<Self> {
        match c {
            'i' => Some(DtypeKind::Int),
            'u' => Some(DtypeKind::UInt),
            'f' => Some(DtypeKind::Float),
            'c' => Some(DtypeKind::Complex),
            'b' => Some(DtypeKind::Bool),
            _ => None,
        }
    }

    fn valid_itemsize(self, size: usize) -> bool {
        match self {
            DtypeKind::Int | DtypeKind::UInt => matches!(size, 1 | 2 | 4 | 8),
            DtypeKind::Float => matches!(size, 2 | 4 | 8 | 16),
            DtypeKind::Complex => matches!(size, 8 | 16 | 32),
            DtypeKind::Bool => size == 1,
        }
    }

    /// Kinds allowed through the scalar encoder (ints and floats).
    pub fn is_real_number(self) -> bool {
        matches!(self, DtypeKind::Int | DtypeKind::UInt | DtypeKind::Float)
    }
}

/// A parsed dtype descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dtype {
    order: ByteOrder,
    kind: DtypeKind,
    itemsize: usize,
}

impl Dtype {
    /// Build a descriptor, normalising single-byte types to `|`.
    pub fn new(order: ByteOrder, kind: DtypeKind, itemsize: usize) -> Result<Self, WireError> {
        if !kind.valid_itemsize(itemsize) {
            return Err(WireError::InvalidDtype(format!(
                "{}{}{}",
                order.as_char(),
                kind.as_char(),
                itemsize
            )));
        }
        let order = if itemsize == 1 {
            ByteOrder::NotApplicable
        } else if order == ByteOrder::NotApplicable {
            ByteOrder::native()
        } else {
            order
        };
        Ok(Self {
            order,
            kind,
            itemsize,
        })
    }

    /// Little-endian descriptor for a Rust element type.
    pub fn of<T: Element>() -> Self {
        let order = if T::SIZE == 1 {
            ByteOrder::NotApplicable
        } else {
            ByteOrder::Little
        };
        Self {
            order,
            kind: T::KIND,
            itemsize: T::SIZE,
        }
    }

    /// Same kind and width with a different element byte order.
    pub fn with_order(self, order: ByteOrder) -> Self {
        if self.itemsize == 1 {
            return self;
        }
        let order = match order {
            ByteOrder::NotApplicable => ByteOrder::native(),
            other => other,
        };
        Self { order, ..self }
    }

    pub fn order(&self) -> ByteOrder {
        self.order
    }

    pub fn kind(&self) -> DtypeKind {
        self.kind
    }

    /// Bytes per element.
    pub fn itemsize(&self) -> usize {
        self.itemsize
    }

    /// True if values of this dtype decode as `T` without conversion.
    pub fn matches<T: Element>(&self) -> bool {
        self.kind == T::KIND && self.itemsize == T::SIZE
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.order.as_char(),
            self.kind.as_char(),
            self.itemsize
        )
    }
}

impl FromStr for Dtype {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WireError::InvalidDtype(s.to_string());
        let mut chars = s.chars();
        let first = chars.next().ok_or_else(invalid)?;

        let (order, kind_char) = match first {
            '<' => (ByteOrder::Little, chars.next()),
            '>' => (ByteOrder::Big, chars.next()),
            '|' => (ByteOrder::NotApplicable, chars.next()),
            '=' => (ByteOrder::native(), chars.next()),
            other => (ByteOrder::native(), Some(other)),
        };
        let kind = kind_char.and_then(DtypeKind::from_char).ok_or_else(invalid)?;
        let itemsize: usize = chars.as_str().parse().map_err(|_| invalid())?;

        Dtype::new(order, kind, itemsize).map_err(|_| invalid())
    }
}

/// A Rust numeric type with a wire dtype.
pub trait Element: Copy + fmt::Debug + 'static {
    const KIND: DtypeKind;
    const SIZE: usize;

    /// Append this value's bytes in `order`.
    fn put_bytes(self, order: ByteOrder, dst: &mut Vec<u8>);

    /// Decode one element from exactly `Self::SIZE` bytes laid out in `order`.
    fn from_bytes(bytes: &[u8], order: ByteOrder) -> Self;
}

macro_rules! impl_element {
    ($($ty:ty => $kind:expr),* $(,)?) => {
        $(
            impl Element for $ty {
                const KIND: DtypeKind = $kind;
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn put_bytes(self, order: ByteOrder, dst: &mut Vec<u8>) {
                    match order {
                        ByteOrder::Big => dst.extend_from_slice(&self.to_be_bytes()),
                        ByteOrder::Little | ByteOrder::NotApplicable => {
                            dst.extend_from_slice(&self.to_le_bytes())
                        }
                    }
                }

                fn from_bytes(bytes: &[u8], order: ByteOrder) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&bytes[..std::mem::size_of::<$ty>()]);
                    match order {
                        ByteOrder::Big => <$ty>::from_be_bytes(raw),
                        ByteOrder::Little | ByteOrder::NotApplicable => <$ty>::from_le_bytes(raw),
                    }
                }
            }
        )*
    };
}

impl_element! {
    i8 => DtypeKind::Int,
    i16 => DtypeKind::Int,
    i32 => DtypeKind::Int,
    i64 => DtypeKind::Int,
    u8 => DtypeKind::UInt,
    u16 => DtypeKind::UInt,
    u32 => DtypeKind::UInt,
    u64 => DtypeKind::UInt,
    f32 => DtypeKind::Float,
    f64 => DtypeKind::Float,
}
