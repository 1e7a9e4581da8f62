use bytes::Bytes;

use crate::dtype::{ByteOrder, Dtype, DtypeKind, Element};
use crate::error::{Result, WireError};

/// A single numeric value with its dtype.
///
/// Equality is bitwise over the dtype and element bytes, so a value that
/// went through the wire compares equal to the original only if its dtype
/// and bit pattern survived unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scalar {
    dtype: Dtype,
    raw: Bytes,
}

impl Scalar {
    /// Wrap a Rust number using its little-endian dtype.
    pub fn new<T: Element>(value: T) -> Self {
        let dtype = Dtype::of::<T>();
        let mut raw = Vec::with_capacity(T::SIZE);
        value.put_bytes(dtype.order(), &mut raw);
        Self {
            dtype,
            raw: Bytes::from(raw),
        }
    }

    /// Build a scalar from raw element bytes.
    ///
    /// Any dtype is accepted here; the scalar encoder is what restricts
    /// sendable kinds to ints and floats.
    pub fn from_raw(dtype: Dtype, raw: impl Into<Bytes>) -> Result<Self> {
        let raw = raw.into();
        if raw.len() != dtype.itemsize() {
            return Err(WireError::InvalidArray(format!(
                "scalar of dtype {dtype} needs {} bytes, got {}",
                dtype.itemsize(),
                raw.len()
            )));
        }
        Ok(Self { dtype, raw })
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    /// Element bytes in the dtype's own byte order.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Decode as `T` when the dtype matches exactly.
    pub fn get<T: Element>(&self) -> Option<T> {
        self.dtype
            .matches::<T>()
            .then(|| T::from_bytes(&self.raw, self.dtype.order()))
    }

    /// Numeric value widened to `f64` (ints, uints, 4/8-byte floats).
    pub fn as_f64(&self) -> Option<f64> {
        let order = self.dtype.order();
        let raw = &self.raw[..];
        match (self.dtype.kind(), self.dtype.itemsize()) {
            (DtypeKind::Float, 8) => Some(f64::from_bytes(raw, order)),
            (DtypeKind::Float, 4) => Some(f64::from(f32::from_bytes(raw, order))),
            (DtypeKind::Int, _) | (DtypeKind::UInt, _) => self.as_i128().map(|v| v as f64),
            _ => None,
        }
    }

    /// Integer value when the dtype is an int/uint that fits in `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_i128().and_then(|v| i64::try_from(v).ok())
    }

    fn as_i128(&self) -> Option<i128> {
        let order = self.dtype.order();
        let raw = &self.raw[..];
        let value = match (self.dtype.kind(), self.dtype.itemsize()) {
            (DtypeKind::Int, 1) => i128::from(i8::from_bytes(raw, order)),
            (DtypeKind::Int, 2) => i128::from(i16::from_bytes(raw, order)),
            (DtypeKind::Int, 4) => i128::from(i32::from_bytes(raw, order)),
            (DtypeKind::Int, 8) => i128::from(i64::from_bytes(raw, order)),
            (DtypeKind::UInt, 1) => i128::from(u8::from_bytes(raw, order)),
            (DtypeKind::UInt, 2) => i128::from(u16::from_bytes(raw, order)),
            (DtypeKind::UInt, 4) => i128::from(u32::from_bytes(raw, order)),
            (DtypeKind::UInt, 8) => i128::from(u64::from_bytes(raw, order)),
            _ => return None,
        };
        Some(value)
    }
}

macro_rules! impl_scalar_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Scalar {
                fn from(value: $ty) -> Self {
                    Scalar::new(value)
                }
            }
        )*
    };
}

impl_scalar_from!(i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

/// An n-dimensional array: dtype, shape and flat element bytes.
///
/// Invariant: `data.len() == product(shape) * dtype.itemsize()`. An empty
/// shape is a 0-d array holding one element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireArray {
    dtype: Dtype,
    shape: Vec<usize>,
    data: Bytes,
}

impl WireArray {
    /// Build a little-endian array from row-major values.
    pub fn from_values<T: Element>(shape: Vec<usize>, values: &[T]) -> Result<Self> {
        let dtype = Dtype::of::<T>();
        let mut data = Vec::with_capacity(values.len() * T::SIZE);
        for value in values {
            value.put_bytes(dtype.order(), &mut data);
        }
        Self::from_raw(dtype, shape, data)
    }

    /// Build a 1-d array.
    pub fn from_slice<T: Element>(values: &[T]) -> Self {
        let dtype = Dtype::of::<T>();
        let mut data = Vec::with_capacity(values.len() * T::SIZE);
        for value in values {
            value.put_bytes(dtype.order(), &mut data);
        }
        Self {
            dtype,
            shape: vec![values.len()],
            data: Bytes::from(data),
        }
    }

    /// Build from raw element bytes, checking the length invariant.
    pub fn from_raw(dtype: Dtype, shape: Vec<usize>, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        let expected = element_count(&shape)
            .and_then(|n| n.checked_mul(dtype.itemsize()))
            .ok_or_else(|| WireError::InvalidArray(format!("shape {shape:?} overflows")))?;
        if data.len() != expected {
            return Err(WireError::InvalidArray(format!(
                "shape {shape:?} with dtype {dtype} needs {expected} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self { dtype, shape, data })
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements (`1` for a 0-d array).
    pub fn len(&self) -> usize {
        self.data.len() / self.dtype.itemsize()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flat element bytes in the dtype's byte order.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Decode all elements as `T` when the dtype matches exactly.
    pub fn to_vec<T: Element>(&self) -> Option<Vec<T>> {
        if !self.dtype.matches::<T>() {
            return None;
        }
        let order = self.dtype.order();
        Some(
            self.data
                .chunks_exact(T::SIZE)
                .map(|chunk| T::from_bytes(chunk, order))
                .collect(),
        )
    }

    /// Same values re-laid out in another element byte order.
    pub fn to_order(&self, order: ByteOrder) -> Self {
        let target = self.dtype.with_order(order);
        if target.order() == self.dtype.order() {
            return self.clone();
        }
        // A complex element is two floats; each part swaps on its own.
        let size = match self.dtype.kind() {
            DtypeKind::Complex => self.dtype.itemsize() / 2,
            _ => self.dtype.itemsize(),
        };
        let mut data = Vec::with_capacity(self.data.len());
        for chunk in self.data.chunks_exact(size) {
            data.extend(chunk.iter().rev());
        }
        Self {
            dtype: target,
            shape: self.shape.clone(),
            data: Bytes::from(data),
        }
    }
}

pub(crate) fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

/// One element of a wire list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireValue {
    Scalar(Scalar),
    String(String),
    Array(WireArray),
}

impl WireValue {
    /// The kind tag sent ahead of this element inside a list.
    pub fn tag(&self) -> &'static str {
        match self {
            WireValue::Scalar(_) => crate::codec::TAG_SCALAR,
            WireValue::String(_) => crate::codec::TAG_STRING,
            WireValue::Array(_) => crate::codec::TAG_ARRAY,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            WireValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            WireValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&WireArray> {
        match self {
            WireValue::Array(a) => Some(a),
            _ => None,
        }
    }
}

impl From<Scalar> for WireValue {
    fn from(value: Scalar) -> Self {
        WireValue::Scalar(value)
    }
}

impl From<WireArray> for WireValue {
    fn from(value: WireArray) -> Self {
        WireValue::Array(value)
    }
}

impl From<String> for WireValue {
    fn from(value: String) -> Self {
        WireValue::String(value)
    }
}

impl From<&str> for WireValue {
    fn from(value: &str) -> Self {
        WireValue::String(value.to_string())
    }
}

impl From<i64> for WireValue {
    fn from(value: i64) -> Self {
        WireValue::Scalar(Scalar::new(value))
    }
}

impl From<f64> for WireValue {
    fn from(value: f64) -> Self {
        WireValue::Scalar(Scalar::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_accessors() {
        let s = Scalar::new(12.546f64);
        assert_eq!(s.dtype().to_string(), "<f8");
        assert_eq!(s.get::<f64>(), Some(12.546));
        assert_eq!(s.get::<f32>(), None);
        assert_eq!(s.as_f64(), Some(12.546));
        assert_eq!(s.as_i64(), None);

        let i = Scalar::new(-7i32);
        assert_eq!(i.as_i64(), Some(-7));
        assert_eq!(i.as_f64(), Some(-7.0));
    }

    #[test]
    fn big_endian_scalar_decodes() {
        let dtype: Dtype = ">f8".parse().unwrap();
        let s = Scalar::from_raw(dtype, 2.5f64.to_be_bytes().to_vec()).unwrap();
        assert_eq!(s.get::<f64>(), Some(2.5));
    }

    #[test]
    fn scalar_from_raw_checks_width() {
        let dtype: Dtype = "<f8".parse().unwrap();
        assert!(Scalar::from_raw(dtype, vec![0u8; 4]).is_err());
    }

    #[test]
    fn u64_beyond_i64_has_no_i64_view() {
        let s = Scalar::new(u64::MAX);
        assert_eq!(s.as_i64(), None);
        assert!(s.as_f64().is_some());
    }

    #[test]
    fn array_invariant_enforced() {
        let dtype: Dtype = "<i4".parse().unwrap();
        assert!(WireArray::from_raw(dtype, vec![2, 3], vec![0u8; 24]).is_ok());
        assert!(WireArray::from_raw(dtype, vec![2, 3], vec![0u8; 20]).is_err());
        assert!(WireArray::from_values(vec![4], &[1i32, 2, 3]).is_err());
    }

    #[test]
    fn zero_d_and_empty_arrays() {
        let zero_d = WireArray::from_values(Vec::new(), &[3.0f64]).unwrap();
        assert_eq!(zero_d.ndim(), 0);
        assert_eq!(zero_d.len(), 1);

        let empty = WireArray::from_values::<f64>(vec![0, 5], &[]).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.shape(), &[0, 5]);
    }

    #[test]
    fn to_vec_and_reorder() {
        let a = WireArray::from_values(vec![2, 2], &[1u16, 2, 3, 0x0102]).unwrap();
        let be = a.to_order(ByteOrder::Big);
        assert_eq!(be.dtype().to_string(), ">u2");
        assert_eq!(&be.data()[6..8], &[0x01, 0x02]);
        assert_eq!(be.to_vec::<u16>(), Some(vec![1, 2, 3, 0x0102]));
        assert_eq!(a.to_vec::<i16>(), None);
    }

    #[test]
    fn complex_reorder_keeps_real_and_imaginary_parts() {
        let dtype: Dtype = "<c16".parse().unwrap();
        let mut raw = 1.0f64.to_le_bytes().to_vec();
        raw.extend_from_slice(&2.0f64.to_le_bytes());
        let a = WireArray::from_raw(dtype, vec![1], raw).unwrap();

        let be = a.to_order(ByteOrder::Big);
        assert_eq!(be.dtype().to_string(), ">c16");
        assert_eq!(&be.data()[..8], &1.0f64.to_be_bytes());
        assert_eq!(&be.data()[8..], &2.0f64.to_be_bytes());
        assert_eq!(be.to_order(ByteOrder::Little), a);
    }

    #[test]
    fn value_tags() {
        assert_eq!(WireValue::from("ok").tag(), "string");
        assert_eq!(WireValue::from(5i64).tag(), "scalar");
        assert_eq!(WireValue::from(WireArray::from_slice(&[1u8])).tag(), "array");
    }
}
