use std::path::{Path, PathBuf};
use std::{error, fmt};

use log::warn;

use crate::location::{self, Area, Location, Width};

/// File name emitted by the compiler toolchain.
pub const MANIFEST_FILE: &str = "LOCATED_VARIABLES.h";

/// Record marker; lines without it are not manifest records.
const MARKER: &str = "__LOCATED_VAR";

/// Relative directories probed for the manifest, in order.
#[must_use]
pub fn default_search_dirs() -> Vec<PathBuf> {
    [".", "./core", "../core", ".."].iter().map(PathBuf::from).collect()
}

/// Errors for a single manifest record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The line contains the record marker but cannot be decomposed into
    /// five or six parenthesized fields.
    Malformed,
    /// Fields decomposed, but they do not name a valid location.
    Location(location::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => f.write_str("malformed manifest record"),
            Self::Location(err) => err.fmt(f),
        }
    }
}

impl error::Error for Error {}

impl From<location::Error> for Error {
    fn from(err: location::Error) -> Self {
        Self::Location(err)
    }
}

/// One `__LOCATED_VAR(<iec>,<name>,<area>,<width>,<i1>[,<i2>])` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedVar {
    /// The IEC declaration (`BOOL`, `UINT`, `SINT`, ...). Informational for
    /// addressing, but it selects signed interpretation for integer widths.
    pub iec_type: String,
    /// Symbolic name as emitted by the compiler.
    pub name: String,
    pub location: Location,
}

impl LocatedVar {
    /// The OPC UA browse name: the symbolic name with the compiler's
    /// leading `__` stripped.
    #[must_use]
    pub fn browse_name(&self) -> &str {
        self.name.strip_prefix("__").unwrap_or(&self.name)
    }
}

/// Outcome of parsing one manifest text.
#[derive(Debug, Default)]
pub struct ManifestSummary {
    /// Records that decomposed into valid located variables, in file order.
    pub vars: Vec<LocatedVar>,
    /// Lines carrying the record marker, whether or not they decomposed.
    pub seen: usize,
    /// Marker lines rejected (malformed or invalid location) and skipped.
    pub rejected: usize,
}

/// Parse a manifest. Rejected records are logged and skipped; they never
/// fail the parse as a whole.
#[must_use]
pub fn parse(text: &str) -> ManifestSummary {
    let mut summary = ManifestSummary::default();
    for (line_no, line) in text.lines().enumerate() {
        if !line.contains(MARKER) {
            continue;
        }
        summary.seen += 1;
        match parse_record(line) {
            Ok(var) => summary.vars.push(var),
            Err(err) => {
                summary.rejected += 1;
                warn!("manifest line {}: {err}, skipped", line_no + 1);
            }
        }
    }
    summary
}

fn parse_record(line: &str) -> Result<LocatedVar, Error> {
    let open = line.find('(').ok_or(Error::Malformed)?;
    let inner = &line[open + 1..];
    let close = inner.find(')').ok_or(Error::Malformed)?;
    let fields: Vec<&str> = inner[..close].split(',').map(str::trim).collect();
    if !(5..=6).contains(&fields.len()) {
        return Err(Error::Malformed);
    }

    let iec_type = fields[0];
    let name = fields[1];
    if iec_type.is_empty() || name.is_empty() {
        return Err(Error::Malformed);
    }
    let area = Area::try_from(single_char(fields[2])?)?;
    let width = Width::try_from(single_char(fields[3])?)?;
    let index = number(fields[4])?;
    let bit = match fields.get(5) {
        Some(field) => Some(u8::try_from(number(field)?).map_err(|_| location::Error::BadBit)?),
        None => None,
    };

    let location = Location::new(area, width, index, bit)?;
    Ok(LocatedVar {
        iec_type: iec_type.to_string(),
        name: name.to_string(),
        location,
    })
}

fn single_char(field: &str) -> Result<char, Error> {
    let mut chars = field.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(Error::Malformed),
    }
}

fn number(field: &str) -> Result<u32, Error> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Malformed);
    }
    field.parse().map_err(|_| Error::Malformed)
}

/// Find the manifest in the first search directory that carries one.
#[must_use]
pub fn locate<P: AsRef<Path>>(dirs: &[P]) -> Option<PathBuf> {
    dirs.iter()
        .map(|dir| dir.as_ref().join(MANIFEST_FILE))
        .find(|path| path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_records_and_counts_marker_lines() {
        let text = "\
// compiler emitted
__LOCATED_VAR(BOOL,__QX0_1,Q,X,0,1)
int unrelated = 0;
  __LOCATED_VAR( UINT , __IW5 , I , W , 5 )
__LOCATED_VAR(REAL,__MR2,M,R,2)
";
        let summary = parse(text);
        assert_eq!(summary.seen, 3);
        assert_eq!(summary.rejected, 0);
        assert_eq!(summary.vars.len(), 3);

        let qx = &summary.vars[0];
        assert_eq!(qx.iec_type, "BOOL");
        assert_eq!(qx.browse_name(), "QX0_1");
        assert_eq!(qx.location, Location::parse("%QX0.1").unwrap());

        let iw = &summary.vars[1];
        assert_eq!(iw.location, Location::parse("%IW5").unwrap());
        assert_eq!(iw.browse_name(), "IW5");
    }

    #[test]
    fn marker_line_with_four_fields_is_rejected_but_seen() {
        let summary = parse("__LOCATED_VAR(BOOL,__QX0_1,Q,X)\n");
        assert_eq!(summary.seen, 1);
        assert_eq!(summary.rejected, 1);
        assert!(summary.vars.is_empty());
    }

    #[test]
    fn marker_less_lines_are_not_seen() {
        let summary = parse("LOCATED_VAR(BOOL,a,Q,X,0,1)\n// nothing\n");
        assert_eq!(summary.seen, 0);
        assert_eq!(summary.vars.len(), 0);
    }

    #[test]
    fn bit_rules_apply_to_records() {
        // X without a bit index
        let summary = parse("__LOCATED_VAR(BOOL,__IX0,I,X,0)\n");
        assert_eq!((summary.seen, summary.rejected), (1, 1));
        // non-X with a bit index
        let summary = parse("__LOCATED_VAR(UINT,__IW0,I,W,0,3)\n");
        assert_eq!((summary.seen, summary.rejected), (1, 1));
        // bit out of range
        let summary = parse("__LOCATED_VAR(BOOL,__IX0_8,I,X,0,8)\n");
        assert_eq!((summary.seen, summary.rejected), (1, 1));
    }

    #[test]
    fn unsupported_memory_widths_still_parse() {
        // %MB0 is a well-formed record; the resolver decides supportability.
        let summary = parse("__LOCATED_VAR(SINT,__MB0,M,B,0)\n");
        assert_eq!(summary.rejected, 0);
        assert_eq!(summary.vars[0].location.width, Width::Byte);
    }

    #[test]
    fn junk_fields_are_malformed() {
        for line in [
            "__LOCATED_VAR(BOOL,__QX0_1,QQ,X,0,1)",
            "__LOCATED_VAR(BOOL,__QX0_1,Q,X,zero,1)",
            "__LOCATED_VAR(BOOL,,Q,X,0,1)",
            "__LOCATED_VAR(UINT,__IW5,I,W,-1)",
            "__LOCATED_VAR(UINT,__IW5,I,W,5,0,9)",
            "__LOCATED_VAR",
        ] {
            let summary = parse(line);
            assert_eq!((summary.seen, summary.rejected), (1, 1), "{line}");
        }
    }

    #[test]
    fn parse_is_idempotent_over_the_same_text() {
        let text = "\
__LOCATED_VAR(BOOL,__QX0_1,Q,X,0,1)
__LOCATED_VAR(UINT,__IW5,I,W,5)
__LOCATED_VAR(LREAL,__MF3,M,F,3)
";
        let a = parse(text);
        let b = parse(text);
        let keys = |s: &ManifestSummary| {
            let mut k: Vec<_> = s.vars.iter().map(|v| v.location).collect();
            k.sort();
            k
        };
        assert_eq!(keys(&a), keys(&b));
        assert_eq!(a.seen, b.seen);
    }
}
