//! The server-side OPC UA surface the bridge consumes.
//!
//! This is the minimal slice of a stack the bridge needs: namespace
//! registration, folder and variable node creation with value callbacks,
//! direct node writes for the publisher, and the run/iterate/shutdown
//! entry points. Session handling, encoding, transport, and security stay
//! behind the implementing stack.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use crate::scalar::{ScalarType, Variant};

/// A numeric node id qualified by a namespace index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId {
    pub namespace: u16,
    pub numeric: u32,
}

impl NodeId {
    /// The standard Objects folder (`ns=0;i=85`).
    pub const OBJECTS_FOLDER: Self = Self::new(0, 85);
    /// `FolderType` (`ns=0;i=61`), the type definition for folder objects.
    pub const FOLDER_TYPE: Self = Self::new(0, 61);

    #[must_use]
    pub const fn new(namespace: u16, numeric: u32) -> Self {
        Self { namespace, numeric }
    }

    /// The `ns=0` data-type node for one of the servable scalar types.
    #[must_use]
    pub fn data_type(ty: ScalarType) -> Self {
        Self::new(0, ty as u32)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns={};i={}", self.namespace, self.numeric)
    }
}

/// A browse name qualified by a namespace index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualifiedName {
    pub namespace: u16,
    pub name: String,
}

impl QualifiedName {
    #[must_use]
    pub fn new(namespace: u16, name: impl Into<String>) -> Self {
        Self {
            namespace,
            name: name.into(),
        }
    }
}

/// An OPC UA status code. Only the codes the bridge produces or inspects
/// get named constants; everything else passes through numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCode(pub u32);

impl StatusCode {
    pub const GOOD: Self = Self(0x0000_0000);
    pub const BAD_INTERNAL_ERROR: Self = Self(0x8002_0000);
    pub const BAD_NODE_ID_UNKNOWN: Self = Self(0x8033_0000);
    pub const BAD_NODE_ID_EXISTS: Self = Self(0x805E_0000);
    pub const BAD_TYPE_MISMATCH: Self = Self(0x8074_0000);
    pub const BAD_OUT_OF_SERVICE: Self = Self(0x808D_0000);

    /// Severity bit per part 4: the top two bits are 00 for good.
    #[must_use]
    pub fn is_good(self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    #[must_use]
    pub fn is_bad(self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::GOOD => "Good",
            Self::BAD_INTERNAL_ERROR => "BadInternalError",
            Self::BAD_NODE_ID_UNKNOWN => "BadNodeIdUnknown",
            Self::BAD_NODE_ID_EXISTS => "BadNodeIdExists",
            Self::BAD_TYPE_MISMATCH => "BadTypeMismatch",
            Self::BAD_OUT_OF_SERVICE => "BadOutOfService",
            _ => return None,
        })
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}

bitflags! {
    /// Variable access-level byte (part 3, AccessLevelType).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessLevel: u8 {
        const CURRENT_READ = 0x01;
        const CURRENT_WRITE = 0x02;
    }
}

/// Value rank for a scalar-only variable.
pub const SCALAR_RANK: i32 = -1;

/// A value paired with its quality, as moved by read and write services.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataValue {
    pub status: StatusCode,
    pub value: Option<Variant>,
}

impl DataValue {
    #[must_use]
    pub fn good(value: Variant) -> Self {
        Self {
            status: StatusCode::GOOD,
            value: Some(value),
        }
    }

    /// A status with no value payload.
    #[must_use]
    pub fn empty(status: StatusCode) -> Self {
        Self {
            status,
            value: None,
        }
    }
}

/// Everything the stack needs to create one folder object node.
#[derive(Debug, Clone)]
pub struct ObjectAttributes {
    pub node_id: NodeId,
    pub parent: NodeId,
    pub browse_name: QualifiedName,
    pub display_name: String,
    pub type_definition: NodeId,
}

/// Everything the stack needs to create one variable node.
#[derive(Debug, Clone)]
pub struct VariableAttributes {
    pub node_id: NodeId,
    pub parent: NodeId,
    pub browse_name: QualifiedName,
    pub display_name: String,
    pub data_type: NodeId,
    pub value_rank: i32,
    pub access_level: AccessLevel,
    /// Seed value; stacks type-check it against `data_type` at creation.
    pub initial_value: Variant,
}

/// The per-node callback pair. The stack hands back the opaque context
/// registered with the node; implementations must not block and must not
/// call back into the stack.
pub trait ValueCallback: Send + Sync {
    fn on_read(&self, context: u64) -> DataValue;
    fn on_write(&self, context: u64, value: &DataValue) -> StatusCode;
}

/// One running server instance.
///
/// Implementations serve sessions from their own threads, so every method
/// takes `&self` and the instance is shared as an `Arc`. A fresh instance
/// is created per bridge start and dropped at stop.
pub trait UaServer: Send + Sync {
    /// Register (or find) a namespace URI, returning its index. Index 0 is
    /// the OPC UA namespace; a stack returning 0 for an application URI has
    /// failed.
    fn add_namespace(&self, uri: &str) -> u16;

    /// Create an object node with an explicit numeric id.
    fn add_object(&self, attrs: &ObjectAttributes) -> StatusCode;

    /// Create a variable node with an explicit numeric id, wiring the
    /// context/callback pair to its value attribute.
    fn add_variable(
        &self,
        attrs: &VariableAttributes,
        context: u64,
        callback: Arc<dyn ValueCallback>,
    ) -> StatusCode;

    /// Write a node's value attribute directly (publisher path).
    fn write_value(&self, node: NodeId, value: Variant) -> StatusCode;

    /// Bring the endpoint up.
    fn run_startup(&self) -> StatusCode;

    /// Serve one step; returns the stack's suggested wait in milliseconds
    /// before the next call.
    fn iterate(&self, blocking: bool) -> u16;

    /// Take the endpoint down. Dropping the instance afterwards releases
    /// everything it allocated.
    fn run_shutdown(&self) -> StatusCode;
}

/// Produces a fresh server instance listening on the given port.
pub type ServerFactory =
    Box<dyn Fn(u16) -> Result<Arc<dyn UaServer>, StatusCode> + Send + Sync>;

#[test]
fn test_status_code_classification() {
    assert!(StatusCode::GOOD.is_good());
    assert!(!StatusCode::GOOD.is_bad());
    assert!(StatusCode::BAD_TYPE_MISMATCH.is_bad());
    assert!(!StatusCode::BAD_TYPE_MISMATCH.is_good());
    assert_eq!(StatusCode::BAD_TYPE_MISMATCH.to_string(), "BadTypeMismatch");
    assert_eq!(StatusCode(0x8ABC_0000).to_string(), "0x8ABC0000");
}

#[test]
fn test_data_type_node_ids() {
    assert_eq!(NodeId::data_type(ScalarType::Boolean), NodeId::new(0, 1));
    assert_eq!(NodeId::data_type(ScalarType::Double), NodeId::new(0, 11));
    assert_eq!(NodeId::new(0, 85), NodeId::OBJECTS_FOLDER);
}
