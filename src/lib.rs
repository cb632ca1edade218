//! OPC UA bridge over an IEC 61131-3 process image
//!
//! Discovers located variables from the compiler-emitted manifest, binds
//! them to live process-image slots, and serves them to supervisory
//! clients through a minimal OPC UA server surface. The scan engine drives
//! the bridge once per cycle via [`Bridge::publish`]; clients read the
//! per-binding shadow cache and write through to the image under the scan
//! lock.

/// Bindings and the shadow cache
pub mod binding;
/// Process-image registry
pub mod image;
/// IEC location tokens
pub mod location;
/// Located-variable manifest parsing
pub mod manifest;
/// Located-variable type resolution
pub mod resolve;
/// Scalar types and variants
pub mod scalar;
/// Bridge lifecycle and address space
pub mod server;
/// Consumed OPC UA server surface
pub mod ua;

pub use self::binding::Binding;
pub use self::image::{BUFFER_SIZE, ProcessImage, SlotId};
pub use self::location::{Area, Location, Width};
pub use self::manifest::LocatedVar;
pub use self::scalar::{RawValue, ScalarType, Variant};
pub use self::server::{Bridge, BridgeConfig, BridgeError, BridgeState, NAMESPACE_URI, ReadMode};
pub use self::ua::{
    AccessLevel, DataValue, NodeId, QualifiedName, StatusCode, UaServer, ValueCallback,
};
