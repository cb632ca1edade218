use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};
use std::{error, fmt, fs};

use log::{error, info, warn};

use crate::binding::{Binding, BindingSet, lock_unpoisoned};
use crate::image::{BUFFER_SIZE, ProcessImage, SlotId};
use crate::manifest::{self, LocatedVar, ManifestSummary};
use crate::resolve;
use crate::scalar::ScalarType;
use crate::ua::{
    AccessLevel, DataValue, NodeId, ObjectAttributes, QualifiedName, SCALAR_RANK, ServerFactory,
    StatusCode, UaServer, ValueCallback, VariableAttributes,
};

/// Application namespace registered at every start.
pub const NAMESPACE_URI: &str = "http://openplc.org/";

/// Root object under the standard Objects folder.
const OPENPLC_OBJECT_ID: u32 = 1000;
/// Per-type folders, created even when discovery leaves them empty.
const TYPE_FOLDERS: [(u32, &str); 5] = [
    (2000, "BooleanInputs"),
    (2001, "BooleanOutputs"),
    (2002, "IntegerInputs"),
    (2003, "IntegerOutputs"),
    (2004, "MemoryVariables"),
];
/// All discovered variables land here.
const PROGRAM_VARIABLES_ID: u32 = 2100;
/// Variable node ids come from a counter that starts here and is never
/// reset, so a context captured in one lifetime cannot alias a node of a
/// later one.
const FIRST_VARIABLE_ID: u32 = 4_000_000;

/// Lifecycle states. Histories are prefixes of
/// `(Idle Starting Running Stopping)*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BridgeState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
}

/// How read callbacks answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Serve the shadow value.
    #[default]
    Shadow,
    /// Reply `Good` with no payload, matching runtime revisions that
    /// predate the shadow cache. Kept selectable for clients that grew to
    /// depend on it.
    LegacyEmpty,
}

/// Bridge tuning. `Default` matches a typical deployment; the endpoint
/// port is chosen per [`Bridge::start`] call.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub read_mode: ReadMode,
    /// Cooperative yield between iterate steps.
    pub iterate_period: Duration,
    /// How long `stop` waits for the iterate loop before complaining.
    pub stop_grace: Duration,
    /// Directories probed for the located-variable manifest.
    pub manifest_dirs: Vec<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            read_mode: ReadMode::default(),
            iterate_period: Duration::from_millis(50),
            stop_grace: Duration::from_millis(100),
            manifest_dirs: manifest::default_search_dirs(),
        }
    }
}

/// Fatal startup failures. Everything per-record is logged and skipped
/// instead.
#[derive(Debug)]
pub enum BridgeError {
    /// The stack returned namespace index 0 for the application URI.
    NamespaceRejected,
    /// A stack operation the startup sequence depends on failed.
    Stack {
        operation: &'static str,
        status: StatusCode,
    },
    /// The iterate-loop thread could not be spawned.
    Spawn(std::io::Error),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NamespaceRejected => {
                write!(f, "stack refused to register namespace {NAMESPACE_URI}")
            }
            Self::Stack { operation, status } => write!(f, "{operation}: {status}"),
            Self::Spawn(err) => write!(f, "spawning iterate loop: {err}"),
        }
    }
}

impl error::Error for BridgeError {}

#[derive(Default)]
struct Inner {
    state: BridgeState,
    server: Option<Arc<dyn UaServer>>,
    bindings: BindingSet,
    loop_thread: Option<thread::JoinHandle<()>>,
}

/// The OPC UA bridge over one process image.
///
/// One instance per PLC runtime. `start` builds a fresh server instance,
/// address space, and binding set; the scan engine calls [`Bridge::publish`]
/// once per cycle; `stop` tears the instance down. All three are safe to
/// call from any thread.
pub struct Bridge {
    image: Arc<Mutex<ProcessImage>>,
    factory: ServerFactory,
    config: BridgeConfig,
    inner: Arc<Mutex<Inner>>,
    running: Arc<AtomicBool>,
    next_node_id: AtomicU32,
}

/// Resolves node contexts back to bindings on behalf of the stack.
///
/// Holds the bridge internals weakly: a stack instance that outlives its
/// bridge resolves nothing and answers reads with `Good` and no value.
struct Router {
    inner: Weak<Mutex<Inner>>,
    image: Arc<Mutex<ProcessImage>>,
    read_mode: ReadMode,
}

impl Router {
    fn binding(&self, context: u64) -> Option<Arc<Binding>> {
        let inner = self.inner.upgrade()?;
        let guard = lock_unpoisoned(&inner);
        guard.bindings.get(context).cloned()
    }
}

impl ValueCallback for Router {
    fn on_read(&self, context: u64) -> DataValue {
        match (self.binding(context), self.read_mode) {
            (Some(binding), ReadMode::Shadow) => binding.read(),
            // Absent or stale contexts are not read errors.
            (Some(_), ReadMode::LegacyEmpty) | (None, _) => DataValue::empty(StatusCode::GOOD),
        }
    }

    fn on_write(&self, context: u64, value: &DataValue) -> StatusCode {
        let Some(binding) = self.binding(context) else {
            return StatusCode::BAD_NODE_ID_UNKNOWN;
        };
        let status = binding.apply_write(&self.image, value);
        if status.is_bad() {
            warn!("write to {} rejected: {status}", binding.node_id);
        }
        status
    }
}

struct Built {
    server: Arc<dyn UaServer>,
    bindings: BindingSet,
}

impl Bridge {
    #[must_use]
    pub fn new(
        image: Arc<Mutex<ProcessImage>>,
        factory: ServerFactory,
        config: BridgeConfig,
    ) -> Self {
        Self {
            image,
            factory,
            config,
            inner: Arc::new(Mutex::new(Inner::default())),
            running: Arc::new(AtomicBool::new(false)),
            next_node_id: AtomicU32::new(FIRST_VARIABLE_ID),
        }
    }

    #[must_use]
    pub fn state(&self) -> BridgeState {
        lock_unpoisoned(&self.inner).state
    }

    /// Bindings in the current lifetime.
    #[must_use]
    pub fn binding_count(&self) -> usize {
        lock_unpoisoned(&self.inner).bindings.len()
    }

    /// Bring a fresh server instance up on `port`.
    ///
    /// A no-op (logged) unless the bridge is idle. On failure the partial
    /// instance is destroyed and the bridge is idle again.
    pub fn start(&self, port: u16) -> Result<(), BridgeError> {
        {
            let mut inner = lock_unpoisoned(&self.inner);
            if inner.state != BridgeState::Idle {
                info!("start({port}) ignored: server is {:?}", inner.state);
                return Ok(());
            }
            inner.state = BridgeState::Starting;
        }
        info!(
            "opcua bridge {} starting on port {port}, {BUFFER_SIZE} cells per image directory",
            env!("CARGO_PKG_VERSION")
        );

        match self.build(port).and_then(|built| self.install(built)) {
            Ok(()) => {
                info!("server running on port {port}");
                Ok(())
            }
            Err(err) => {
                error!("startup failed: {err}");
                let mut inner = lock_unpoisoned(&self.inner);
                inner.server = None;
                inner.state = BridgeState::Idle;
                Err(err)
            }
        }
    }

    /// Tear the running instance down. A no-op (logged) unless running.
    pub fn stop(&self) {
        let handle = {
            let mut inner = lock_unpoisoned(&self.inner);
            if inner.state != BridgeState::Running {
                info!("stop ignored: server is {:?}", inner.state);
                return;
            }
            inner.state = BridgeState::Stopping;
            self.running.store(false, Ordering::Release);
            inner.server = None;
            inner.loop_thread.take()
        };

        if let Some(handle) = handle {
            let deadline = Instant::now() + self.config.stop_grace;
            while !handle.is_finished() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(5));
            }
            if !handle.is_finished() {
                warn!(
                    "iterate loop still busy after {:?}, waiting for it",
                    self.config.stop_grace
                );
            }
            if handle.join().is_err() {
                warn!("iterate loop panicked");
            }
        }

        let leaked = {
            let mut inner = lock_unpoisoned(&self.inner);
            let leaked = inner.bindings.release();
            inner.state = BridgeState::Idle;
            leaked
        };
        if leaked > 0 {
            warn!("{leaked} bindings outlived the server instance");
        }
        info!("server stopped");
    }

    /// Scan-cycle hook: snapshot the image into the shadows under the scan
    /// lock, then push the snapshot into the protocol nodes after releasing
    /// it. Returns immediately unless running.
    pub fn publish(&self) {
        let (server, bindings) = {
            let inner = lock_unpoisoned(&self.inner);
            if inner.state != BridgeState::Running {
                return;
            }
            let Some(server) = inner.server.clone() else {
                return;
            };
            (server, inner.bindings.arcs())
        };

        let mut updates = Vec::with_capacity(bindings.len());
        {
            let image = lock_unpoisoned(&self.image);
            for binding in &bindings {
                if let Some(value) = binding.refresh_from(&image) {
                    updates.push((binding.node_id, value));
                }
            }
        }

        for (node, value) in updates {
            let status = server.write_value(node, value);
            if status.is_bad() {
                warn!("publishing {node} failed: {status}");
            }
        }
    }

    fn build(&self, port: u16) -> Result<Built, BridgeError> {
        let server = (self.factory)(port).map_err(|status| BridgeError::Stack {
            operation: "create server instance",
            status,
        })?;

        let ns_index = server.add_namespace(NAMESPACE_URI);
        if ns_index == 0 {
            return Err(BridgeError::NamespaceRejected);
        }

        Self::build_folders(server.as_ref(), ns_index)?;
        let summary = self.load_manifest();
        let bindings = self.build_variables(&server, ns_index, &summary);

        let status = server.run_startup();
        if status.is_bad() {
            return Err(BridgeError::Stack {
                operation: "run startup",
                status,
            });
        }

        Ok(Built { server, bindings })
    }

    fn install(&self, built: Built) -> Result<(), BridgeError> {
        let mut inner = lock_unpoisoned(&self.inner);
        inner.bindings = built.bindings;
        inner.server = Some(Arc::clone(&built.server));
        self.running.store(true, Ordering::Release);

        let running = Arc::clone(&self.running);
        let period = self.config.iterate_period;
        let server = built.server;
        let spawned = thread::Builder::new()
            .name("ua-iterate".into())
            .spawn(move || {
                while running.load(Ordering::Acquire) {
                    server.iterate(true);
                    thread::sleep(period);
                }
                let status = server.run_shutdown();
                if status.is_bad() {
                    warn!("shutdown returned {status}");
                }
            });

        match spawned {
            Ok(handle) => {
                inner.loop_thread = Some(handle);
                inner.state = BridgeState::Running;
                Ok(())
            }
            Err(err) => {
                self.running.store(false, Ordering::Release);
                let server = inner.server.take();
                inner.bindings.release();
                // The bridge lock must not be held across the stack call.
                drop(inner);
                if let Some(server) = server {
                    server.run_shutdown();
                }
                Err(BridgeError::Spawn(err))
            }
        }
    }

    fn build_folders(server: &dyn UaServer, ns_index: u16) -> Result<(), BridgeError> {
        let root = NodeId::new(ns_index, OPENPLC_OBJECT_ID);
        Self::ensure_folder(
            server,
            &ObjectAttributes {
                node_id: root,
                parent: NodeId::OBJECTS_FOLDER,
                browse_name: QualifiedName::new(ns_index, "OpenPLC"),
                display_name: "OpenPLC".into(),
                type_definition: NodeId::FOLDER_TYPE,
            },
        )?;

        let folders = TYPE_FOLDERS
            .iter()
            .copied()
            .chain([(PROGRAM_VARIABLES_ID, "ProgramVariables")]);
        for (numeric, name) in folders {
            Self::ensure_folder(
                server,
                &ObjectAttributes {
                    node_id: NodeId::new(ns_index, numeric),
                    parent: root,
                    browse_name: QualifiedName::new(ns_index, name),
                    display_name: name.into(),
                    type_definition: NodeId::FOLDER_TYPE,
                },
            )?;
        }
        Ok(())
    }

    /// Folder creation is idempotent: an already-existing node id counts
    /// as success.
    fn ensure_folder(server: &dyn UaServer, attrs: &ObjectAttributes) -> Result<(), BridgeError> {
        let status = server.add_object(attrs);
        if status.is_good() || status == StatusCode::BAD_NODE_ID_EXISTS {
            Ok(())
        } else {
            Err(BridgeError::Stack {
                operation: "add folder",
                status,
            })
        }
    }

    fn load_manifest(&self) -> ManifestSummary {
        let Some(path) = manifest::locate(&self.config.manifest_dirs) else {
            warn!(
                "{} not found in search path, starting with an empty program",
                manifest::MANIFEST_FILE
            );
            return ManifestSummary::default();
        };
        match fs::read_to_string(&path) {
            Ok(text) => parse_logged(&path.display().to_string(), &text),
            Err(err) => {
                warn!(
                    "{} unreadable: {err}, starting with an empty program",
                    path.display()
                );
                ManifestSummary::default()
            }
        }
    }

    fn build_variables(
        &self,
        server: &Arc<dyn UaServer>,
        ns_index: u16,
        summary: &ManifestSummary,
    ) -> BindingSet {
        let router: Arc<dyn ValueCallback> = Arc::new(Router {
            inner: Arc::downgrade(&self.inner),
            image: Arc::clone(&self.image),
            read_mode: self.config.read_mode,
        });
        let parent = NodeId::new(ns_index, PROGRAM_VARIABLES_ID);

        let mut absent = 0usize;
        let mut unsupported = 0usize;
        // Resolution needs the scan lock; node creation must not hold it.
        let resolved: Vec<(&LocatedVar, SlotId, ScalarType)> = {
            let image = lock_unpoisoned(&self.image);
            summary
                .vars
                .iter()
                .filter_map(|var| match resolve::resolve(&image, var) {
                    Ok((slot, ty)) => Some((var, slot, ty)),
                    Err(resolve::Error::Unavailable) => {
                        absent += 1;
                        None
                    }
                    Err(resolve::Error::Unsupported) => {
                        unsupported += 1;
                        None
                    }
                })
                .collect()
        };

        let mut bindings = BindingSet::default();
        for (var, slot, ty) in resolved {
            let node_id = NodeId::new(ns_index, self.next_node_id.fetch_add(1, Ordering::Relaxed));
            let attrs = VariableAttributes {
                node_id,
                parent,
                browse_name: QualifiedName::new(ns_index, var.browse_name()),
                display_name: var.browse_name().to_string(),
                data_type: NodeId::data_type(ty),
                value_rank: SCALAR_RANK,
                access_level: AccessLevel::CURRENT_READ | AccessLevel::CURRENT_WRITE,
                initial_value: ty.zero(),
            };
            let status = server.add_variable(&attrs, u64::from(node_id.numeric), Arc::clone(&router));
            if status == StatusCode::BAD_NODE_ID_EXISTS {
                warn!("{node_id} already exists, skipping {}", var.browse_name());
                continue;
            }
            if status.is_bad() {
                warn!("adding {} at {slot} failed: {status}", var.browse_name());
                continue;
            }
            if !bindings.insert(Arc::new(Binding::new(node_id, slot, ty))) {
                warn!("duplicate binding for {node_id}, skipping {}", var.browse_name());
            }
        }

        info!(
            "located variables: seen={}, added={}, malformed={}, unsupported={}, absent={}",
            summary.seen,
            bindings.len(),
            summary.rejected,
            unsupported,
            absent
        );
        bindings
    }
}

fn parse_logged(origin: &str, text: &str) -> ManifestSummary {
    let summary = manifest::parse(text);
    info!("manifest {origin}: {} records", summary.seen);
    summary
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.stop();
    }
}
