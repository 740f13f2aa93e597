use std::error::Error;
use std::fmt;
use std::io::Cursor;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

/// Element types understood by the store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    Float,
    Double,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Bool,
}

impl DType {
    /// Parses a descriptor dtype name.
    ///
    /// Accepts both the numpy-style names used in descriptors (`float32`,
    /// `int64`, ...) and the store's own names (`FLOAT`, `DOUBLE`, ...).
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "float" | "float32" => Some(DType::Float),
            "double" | "float64" => Some(DType::Double),
            "int8" => Some(DType::Int8),
            "int16" => Some(DType::Int16),
            "int32" => Some(DType::Int32),
            "int64" => Some(DType::Int64),
            "uint8" => Some(DType::Uint8),
            "uint16" => Some(DType::Uint16),
            "bool" => Some(DType::Bool),
            _ => None,
        }
    }

    /// Name used on the store wire protocol
    pub fn store_name(&self) -> &'static str {
        match self {
            DType::Float => "FLOAT",
            DType::Double => "DOUBLE",
            DType::Int8 => "INT8",
            DType::Int16 => "INT16",
            DType::Int32 => "INT32",
            DType::Int64 => "INT64",
            DType::Uint8 => "UINT8",
            DType::Uint16 => "UINT16",
            DType::Bool => "BOOL",
        }
    }

    /// Size in bytes of one element
    pub fn byte_width(&self) -> usize {
        match self {
            DType::Int8 | DType::Uint8 | DType::Bool => 1,
            DType::Int16 | DType::Uint16 => 2,
            DType::Float | DType::Int32 => 4,
            DType::Double | DType::Int64 => 8,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.store_name())
    }
}

/// Errors raised while building or decoding tensors
#[derive(Debug)]
pub enum TensorError {
    /// The dtype name is not supported by the store
    UnknownDType(String),
    /// Element count does not match the product of the shape
    ShapeMismatch { shape: Vec<usize>, elements: usize },
    /// The shape's element count does not fit in memory
    TooLarge { shape: Vec<usize> },
    /// Blob length does not match dtype and shape
    BlobSize { expected: usize, actual: usize },
    /// A value could not be represented as a number
    NotNumeric(String),
}

impl fmt::Display for TensorError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TensorError::UnknownDType(name) => write!(f, "Unsupported tensor dtype '{}'", name),
            TensorError::ShapeMismatch { shape, elements } => match element_count(shape) {
                Some(expected) => write!(
                    f,
                    "Shape {:?} requires {} elements but {} were provided",
                    shape, expected, elements
                ),
                None => write!(f, "Shape {:?} does not match {} elements", shape, elements),
            },
            TensorError::TooLarge { shape } => write!(f, "Shape {:?} has too many elements", shape),
            TensorError::BlobSize { expected, actual } => {
                write!(f, "Tensor blob has {} bytes, expected {}", actual, expected)
            }
            TensorError::NotNumeric(value) => write!(f, "Value '{}' is not numeric", value),
        }
    }
}

impl Error for TensorError {}

impl From<std::io::Error> for TensorError {
    fn from(err: std::io::Error) -> Self {
        TensorError::NotNumeric(err.to_string())
    }
}

/// Number of elements a shape holds, `None` on overflow
pub fn element_count(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
}

/// A dense, row-major tensor.
///
/// Values are held as `f64` regardless of dtype and narrowed when encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub values: Vec<f64>,
}

impl Tensor {
    /// Creates a tensor, checking the element count against the shape.
    pub fn new(dtype: DType, shape: Vec<usize>, values: Vec<f64>) -> Result<Self, TensorError> {
        let expected = element_count(&shape).ok_or_else(|| TensorError::TooLarge { shape: shape.clone() })?;
        if expected != values.len() {
            return Err(TensorError::ShapeMismatch { shape, elements: values.len() });
        }
        Ok(Self { dtype, shape, values })
    }

    /// Encodes the values as a little-endian blob of `dtype` elements.
    pub fn to_blob(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(self.values.len() * self.dtype.byte_width());
        for &value in &self.values {
            // Writes into a Vec cannot fail
            let _ = match self.dtype {
                DType::Float => blob.write_f32::<LittleEndian>(value as f32),
                DType::Double => blob.write_f64::<LittleEndian>(value),
                DType::Int8 => blob.write_i8(value as i8),
                DType::Int16 => blob.write_i16::<LittleEndian>(value as i16),
                DType::Int32 => blob.write_i32::<LittleEndian>(value as i32),
                DType::Int64 => blob.write_i64::<LittleEndian>(value as i64),
                DType::Uint8 => blob.write_u8(value as u8),
                DType::Uint16 => blob.write_u16::<LittleEndian>(value as u16),
                DType::Bool => blob.write_u8(u8::from(value != 0.0)),
            };
        }
        blob
    }

    /// Decodes a blob produced by the store.
    pub fn from_blob(dtype: DType, shape: Vec<usize>, blob: &[u8]) -> Result<Self, TensorError> {
        let elements = element_count(&shape).ok_or_else(|| TensorError::TooLarge { shape: shape.clone() })?;
        let expected = elements
            .checked_mul(dtype.byte_width())
            .ok_or_else(|| TensorError::TooLarge { shape: shape.clone() })?;
        if blob.len() != expected {
            return Err(TensorError::BlobSize { expected, actual: blob.len() });
        }

        let mut reader = Cursor::new(blob);
        let mut values = Vec::with_capacity(elements);
        for _ in 0..elements {
            let value = match dtype {
                DType::Float => reader.read_f32::<LittleEndian>()? as f64,
                DType::Double => reader.read_f64::<LittleEndian>()?,
                DType::Int8 => reader.read_i8()? as f64,
                DType::Int16 => reader.read_i16::<LittleEndian>()? as f64,
                DType::Int32 => reader.read_i32::<LittleEndian>()? as f64,
                DType::Int64 => reader.read_i64::<LittleEndian>()? as f64,
                DType::Uint8 | DType::Bool => reader.read_u8()? as f64,
                DType::Uint16 => reader.read_u16::<LittleEndian>()? as f64,
            };
            values.push(value);
        }

        Ok(Self { dtype, shape, values })
    }

    /// Index of the largest value, if any
    pub fn argmax(&self) -> Option<usize> {
        self.values
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
                Some((_, b)) if b >= v => best,
                _ => Some((i, v)),
            })
            .map(|(i, _)| i)
    }
}

/// Flattens a nested JSON array into row-major values and its shape.
///
/// Scalars produce an empty shape. Ragged arrays and non-numeric leaves are
/// rejected.
pub fn flatten_json(value: &serde_json::Value) -> Result<(Vec<usize>, Vec<f64>), TensorError> {
    let mut values = Vec::new();
    let shape = collect_json(value, &mut values)?;
    Ok((shape, values))
}

fn collect_json(value: &serde_json::Value, out: &mut Vec<f64>) -> Result<Vec<usize>, TensorError> {
    match value {
        serde_json::Value::Number(n) => {
            out.push(n.as_f64().ok_or_else(|| TensorError::NotNumeric(n.to_string()))?);
            Ok(Vec::new())
        }
        serde_json::Value::Bool(b) => {
            out.push(if *b { 1.0 } else { 0.0 });
            Ok(Vec::new())
        }
        serde_json::Value::Array(items) => {
            let mut inner: Option<Vec<usize>> = None;
            for item in items {
                let shape = collect_json(item, out)?;
                match &inner {
                    Some(existing) if *existing != shape => {
                        return Err(TensorError::NotNumeric("ragged array".to_string()));
                    }
                    Some(_) => {}
                    None => inner = Some(shape),
                }
            }
            let mut shape = vec![items.len()];
            shape.extend(inner.unwrap_or_default());
            Ok(shape)
        }
        other => Err(TensorError::NotNumeric(other.to_string())),
    }
}
