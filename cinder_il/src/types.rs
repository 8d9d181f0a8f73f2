//! Data types carried by IL values.
//!
//! Every [`Value`](crate::Value) has exactly one `DataType`: a machine-level
//! primitive or a fixed-width vector of primitives. Aggregate and pointer
//! types live in the [`TypeDictionary`](crate::TypeDictionary); values only
//! ever see the primitive they collapse to (a pointer is an `Address`).

use std::fmt;

// =============================================================================
// Data Type
// =============================================================================

/// Primitive or vector data type of an IL value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    /// No value (void returns, effect-only operations).
    NoType = 0,

    Int8 = 1,
    Int16 = 2,
    Int32 = 3,
    Int64 = 4,

    /// 32-bit IEEE float.
    Float = 5,

    /// 64-bit IEEE float.
    Double = 6,

    /// Machine address (64-bit).
    Address = 7,

    /// 128-bit vectors.
    VectorInt8 = 16,
    VectorInt16 = 17,
    VectorInt32 = 18,
    VectorInt64 = 19,
    VectorFloat = 20,
    VectorDouble = 21,
}

impl DataType {
    /// Integer types (not addresses).
    #[inline]
    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
        )
    }

    #[inline]
    pub const fn is_floating_point(self) -> bool {
        matches!(self, DataType::Float | DataType::Double)
    }

    #[inline]
    pub const fn is_vector(self) -> bool {
        (self as u8) >= 16
    }

    /// Types that can appear as arithmetic operands.
    #[inline]
    pub const fn is_numeric(self) -> bool {
        self.is_integer() || self.is_floating_point()
    }

    /// Size of a value of this type in bytes (0 for `NoType`).
    pub const fn size(self) -> u32 {
        match self {
            DataType::NoType => 0,
            DataType::Int8 => 1,
            DataType::Int16 => 2,
            DataType::Int32 | DataType::Float => 4,
            DataType::Int64 | DataType::Double | DataType::Address => 8,
            DataType::VectorInt8
            | DataType::VectorInt16
            | DataType::VectorInt32
            | DataType::VectorInt64
            | DataType::VectorFloat
            | DataType::VectorDouble => 16,
        }
    }

    /// Element type of a vector type, or the type itself for scalars.
    pub const fn element(self) -> DataType {
        match self {
            DataType::VectorInt8 => DataType::Int8,
            DataType::VectorInt16 => DataType::Int16,
            DataType::VectorInt32 => DataType::Int32,
            DataType::VectorInt64 => DataType::Int64,
            DataType::VectorFloat => DataType::Float,
            DataType::VectorDouble => DataType::Double,
            other => other,
        }
    }

    /// Vector type holding elements of this type, if one exists.
    pub const fn vector_of(self) -> Option<DataType> {
        match self {
            DataType::Int8 => Some(DataType::VectorInt8),
            DataType::Int16 => Some(DataType::VectorInt16),
            DataType::Int32 => Some(DataType::VectorInt32),
            DataType::Int64 => Some(DataType::VectorInt64),
            DataType::Float => Some(DataType::VectorFloat),
            DataType::Double => Some(DataType::VectorDouble),
            _ => None,
        }
    }

    /// Type produced by a binary arithmetic operation on `self` and `other`.
    ///
    /// Address arithmetic (`Address + IntN`) yields an address. Any other
    /// mix is an operand mismatch and yields `None`.
    pub const fn arith_result(self, other: DataType) -> Option<DataType> {
        if self as u8 == other as u8 {
            return Some(self);
        }
        match (self, other) {
            (DataType::Address, o) if o.is_integer() => Some(DataType::Address),
            (o, DataType::Address) if o.is_integer() => Some(DataType::Address),
            _ => None,
        }
    }
}

impl fmt::Debug for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::NoType => "NoType",
            DataType::Int8 => "Int8",
            DataType::Int16 => "Int16",
            DataType::Int32 => "Int32",
            DataType::Int64 => "Int64",
            DataType::Float => "Float",
            DataType::Double => "Double",
            DataType::Address => "Address",
            DataType::VectorInt8 => "VectorInt8",
            DataType::VectorInt16 => "VectorInt16",
            DataType::VectorInt32 => "VectorInt32",
            DataType::VectorInt64 => "VectorInt64",
            DataType::VectorFloat => "VectorFloat",
            DataType::VectorDouble => "VectorDouble",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(DataType::Int32.is_integer());
        assert!(!DataType::Address.is_integer());
        assert!(DataType::Double.is_floating_point());
        assert!(DataType::VectorFloat.is_vector());
        assert!(!DataType::Int64.is_vector());
        assert!(!DataType::NoType.is_numeric());
    }

    #[test]
    fn test_sizes() {
        assert_eq!(DataType::Int8.size(), 1);
        assert_eq!(DataType::Int16.size(), 2);
        assert_eq!(DataType::Float.size(), 4);
        assert_eq!(DataType::Address.size(), 8);
        assert_eq!(DataType::VectorDouble.size(), 16);
        assert_eq!(DataType::NoType.size(), 0);
    }

    #[test]
    fn test_vector_element_round_trip() {
        for ty in [DataType::Int8, DataType::Int32, DataType::Double] {
            let vector = ty.vector_of().unwrap();
            assert_eq!(vector.element(), ty);
        }
        assert_eq!(DataType::Address.vector_of(), None);
    }

    #[test]
    fn test_arith_result() {
        assert_eq!(
            DataType::Int32.arith_result(DataType::Int32),
            Some(DataType::Int32)
        );
        assert_eq!(
            DataType::Address.arith_result(DataType::Int64),
            Some(DataType::Address)
        );
        assert_eq!(DataType::Int32.arith_result(DataType::Int64), None);
        assert_eq!(DataType::Float.arith_result(DataType::Double), None);
    }
}
