use std::{error, fmt};

use crate::image::{ProcessImage, SlotId};
use crate::location::{Area, Width};
use crate::manifest::LocatedVar;
use crate::scalar::ScalarType;

/// Why a located variable could not be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The compiler did not allocate the slot (or the index is out of
    /// range). Such entries are skipped; a program may legitimately carry
    /// locations the current build never materialized.
    Unavailable,
    /// The area/width combination is outside the supported matrix
    /// (`%M` with `X` or `B`).
    Unsupported,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unavailable => "slot not allocated in the process image",
            Self::Unsupported => "area/width combination not supported",
        })
    }
}

impl error::Error for Error {}

/// The scalar type a width serves as, honoring the manifest's IEC
/// declaration for signed integer widths. Unrecognized declarations keep
/// the width's unsigned default.
#[must_use]
pub fn scalar_for(width: Width, iec_type: &str) -> ScalarType {
    match (width, iec_type) {
        (Width::Byte, "SINT") => ScalarType::SByte,
        (Width::Word, "INT") => ScalarType::Int16,
        (Width::DoubleWord, "DINT") => ScalarType::Int32,
        (Width::LongWord, "LINT") => ScalarType::Int64,
        (Width::Bit, _) => ScalarType::Boolean,
        (Width::Byte, _) => ScalarType::Byte,
        (Width::Word, _) => ScalarType::UInt16,
        (Width::DoubleWord, _) => ScalarType::UInt32,
        (Width::LongWord, _) => ScalarType::UInt64,
        (Width::Real, _) => ScalarType::Float,
        (Width::LongReal, _) => ScalarType::Double,
    }
}

/// Resolve a manifest record against the live image: the slot handle plus
/// the scalar type the variable will be exposed as.
pub fn resolve(image: &ProcessImage, var: &LocatedVar) -> Result<(SlotId, ScalarType), Error> {
    let loc = var.location;
    if loc.area == Area::Memory && matches!(loc.width, Width::Bit | Width::Byte) {
        return Err(Error::Unsupported);
    }
    let slot = image
        .slot(loc.area, loc.width, loc.index, loc.bit)
        .ok_or(Error::Unavailable)?;
    Ok((slot, scalar_for(loc.width, &var.iec_type)))
}
