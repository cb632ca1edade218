use num_enum::TryFromPrimitive;

use crate::location::Width;

/// The scalar types servable through the bridge.
///
/// Discriminants are the OPC UA built-in data-type numeric ids (`Boolean = 1`
/// through `Double = 11`), so a value doubles as the `ns=0` data-type node id
/// of the variable exposing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum ScalarType {
    Boolean = 1,
    SByte = 2,
    Byte = 3,
    Int16 = 4,
    UInt16 = 5,
    Int32 = 6,
    UInt32 = 7,
    Int64 = 8,
    UInt64 = 9,
    Float = 10,
    Double = 11,
}

impl ScalarType {
    /// The image width this type is stored in.
    #[must_use]
    pub fn width(self) -> Width {
        match self {
            Self::Boolean => Width::Bit,
            Self::SByte | Self::Byte => Width::Byte,
            Self::Int16 | Self::UInt16 => Width::Word,
            Self::Int32 | Self::UInt32 => Width::DoubleWord,
            Self::Int64 | Self::UInt64 => Width::LongWord,
            Self::Float => Width::Real,
            Self::Double => Width::LongReal,
        }
    }

    /// The zero value of this type, used to seed freshly created nodes.
    #[must_use]
    pub fn zero(self) -> Variant {
        match self {
            Self::Boolean => Variant::Boolean(false),
            Self::SByte => Variant::SByte(0),
            Self::Byte => Variant::Byte(0),
            Self::Int16 => Variant::Int16(0),
            Self::UInt16 => Variant::UInt16(0),
            Self::Int32 => Variant::Int32(0),
            Self::UInt32 => Variant::UInt32(0),
            Self::Int64 => Variant::Int64(0),
            Self::UInt64 => Variant::UInt64(0),
            Self::Float => Variant::Float(0.0),
            Self::Double => Variant::Double(0.0),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Boolean => "Boolean",
            Self::SByte => "SByte",
            Self::Byte => "Byte",
            Self::Int16 => "Int16",
            Self::UInt16 => "UInt16",
            Self::Int32 => "Int32",
            Self::UInt32 => "UInt32",
            Self::Int64 => "Int64",
            Self::UInt64 => "UInt64",
            Self::Float => "Float",
            Self::Double => "Double",
        }
    }
}

/// A raw process-image cell value, typed by access width only.
///
/// The image stores these; signedness is applied when a cell is
/// reinterpreted as a [`Variant`] of a binding's declared type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue {
    Bit(bool),
    Byte(u8),
    Word(u16),
    DWord(u32),
    LWord(u64),
    Real(f32),
    LReal(f64),
}

impl RawValue {
    #[must_use]
    pub fn width(self) -> Width {
        match self {
            Self::Bit(_) => Width::Bit,
            Self::Byte(_) => Width::Byte,
            Self::Word(_) => Width::Word,
            Self::DWord(_) => Width::DoubleWord,
            Self::LWord(_) => Width::LongWord,
            Self::Real(_) => Width::Real,
            Self::LReal(_) => Width::LongReal,
        }
    }

    /// The cleared cell value a slot holds right after allocation.
    #[must_use]
    pub fn zero(width: Width) -> Self {
        match width {
            Width::Bit => Self::Bit(false),
            Width::Byte => Self::Byte(0),
            Width::Word => Self::Word(0),
            Width::DoubleWord => Self::DWord(0),
            Width::LongWord => Self::LWord(0),
            Width::Real => Self::Real(0.0),
            Width::LongReal => Self::LReal(0.0),
        }
    }
}

/// A typed scalar value as it crosses the protocol boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Variant {
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
}

impl Variant {
    #[must_use]
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Self::Boolean(_) => ScalarType::Boolean,
            Self::SByte(_) => ScalarType::SByte,
            Self::Byte(_) => ScalarType::Byte,
            Self::Int16(_) => ScalarType::Int16,
            Self::UInt16(_) => ScalarType::UInt16,
            Self::Int32(_) => ScalarType::Int32,
            Self::UInt32(_) => ScalarType::UInt32,
            Self::Int64(_) => ScalarType::Int64,
            Self::UInt64(_) => ScalarType::UInt64,
            Self::Float(_) => ScalarType::Float,
            Self::Double(_) => ScalarType::Double,
        }
    }

    /// Reinterpret a raw cell as a value of the declared type.
    ///
    /// Returns `None` when the cell width does not carry the type; bindings
    /// are constructed so that this cannot happen for a live slot.
    #[must_use]
    pub fn from_raw(ty: ScalarType, raw: RawValue) -> Option<Self> {
        Some(match (ty, raw) {
            (ScalarType::Boolean, RawValue::Bit(v)) => Self::Boolean(v),
            (ScalarType::SByte, RawValue::Byte(v)) => Self::SByte(v as i8),
            (ScalarType::Byte, RawValue::Byte(v)) => Self::Byte(v),
            (ScalarType::Int16, RawValue::Word(v)) => Self::Int16(v as i16),
            (ScalarType::UInt16, RawValue::Word(v)) => Self::UInt16(v),
            (ScalarType::Int32, RawValue::DWord(v)) => Self::Int32(v as i32),
            (ScalarType::UInt32, RawValue::DWord(v)) => Self::UInt32(v),
            (ScalarType::Int64, RawValue::LWord(v)) => Self::Int64(v as i64),
            (ScalarType::UInt64, RawValue::LWord(v)) => Self::UInt64(v),
            (ScalarType::Float, RawValue::Real(v)) => Self::Float(v),
            (ScalarType::Double, RawValue::LReal(v)) => Self::Double(v),
            _ => return None,
        })
    }

    /// Lower a typed value into the raw cell representation of its width.
    /// Signed values keep their bit pattern.
    #[must_use]
    pub fn to_raw(self) -> RawValue {
        match self {
            Self::Boolean(v) => RawValue::Bit(v),
            Self::SByte(v) => RawValue::Byte(v as u8),
            Self::Byte(v) => RawValue::Byte(v),
            Self::Int16(v) => RawValue::Word(v as u16),
            Self::UInt16(v) => RawValue::Word(v),
            Self::Int32(v) => RawValue::DWord(v as u32),
            Self::UInt32(v) => RawValue::DWord(v),
            Self::Int64(v) => RawValue::LWord(v as u64),
            Self::UInt64(v) => RawValue::LWord(v),
            Self::Float(v) => RawValue::Real(v),
            Self::Double(v) => RawValue::LReal(v),
        }
    }
}

#[test]
fn test_scalar_ids_match_opcua_data_types() {
    assert_eq!(ScalarType::Boolean as u8, 1);
    assert_eq!(ScalarType::Double as u8, 11);
    assert_eq!(ScalarType::try_from(5u8).unwrap(), ScalarType::UInt16);
    assert!(ScalarType::try_from(12u8).is_err());
    assert!(ScalarType::try_from(0u8).is_err());
}

#[test]
fn test_zero_values_match_declared_type() {
    for id in 1u8..=11 {
        let ty = ScalarType::try_from(id).unwrap();
        assert_eq!(ty.zero().scalar_type(), ty);
        assert_eq!(ty.zero().to_raw(), RawValue::zero(ty.width()));
    }
}

#[test]
fn test_signed_reinterpretation_preserves_bits() {
    let v = Variant::Int16(-1);
    assert_eq!(v.to_raw(), RawValue::Word(0xFFFF));
    assert_eq!(
        Variant::from_raw(ScalarType::Int16, RawValue::Word(0xFFFF)),
        Some(Variant::Int16(-1))
    );
    assert_eq!(
        Variant::from_raw(ScalarType::UInt16, RawValue::Word(0xFFFF)),
        Some(Variant::UInt16(0xFFFF))
    );
    assert_eq!(Variant::SByte(-128).to_raw(), RawValue::Byte(0x80));
    assert_eq!(
        Variant::from_raw(ScalarType::Int64, RawValue::LWord(u64::MAX)),
        Some(Variant::Int64(-1))
    );
}

#[test]
fn test_from_raw_rejects_width_mismatch() {
    assert_eq!(Variant::from_raw(ScalarType::UInt32, RawValue::Word(1)), None);
    assert_eq!(Variant::from_raw(ScalarType::Boolean, RawValue::Byte(1)), None);
    assert_eq!(Variant::from_raw(ScalarType::Float, RawValue::LReal(1.0)), None);
}

#[test]
fn test_float_nan_survives_round_trip() {
    let RawValue::Real(raw) = Variant::Float(f32::NAN).to_raw() else {
        panic!("float must lower to a real cell");
    };
    assert!(raw.is_nan());
    let Some(Variant::Double(v)) =
        Variant::from_raw(ScalarType::Double, RawValue::LReal(f64::NEG_INFINITY))
    else {
        panic!("double must lift from an lreal cell");
    };
    assert!(v.is_infinite() && v.is_sign_negative());
}
