//! Miniature embedding of the bridge: a fake scan engine ticking a two
//! variable program against a trivial in-process stack.
//!
//! ```bash
//! cargo run --example scan_loop
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use std::{env, fs, process, thread};

use openplc_opcua::ua::{ObjectAttributes, UaServer, ValueCallback, VariableAttributes};
use openplc_opcua::{
    Bridge, BridgeConfig, DataValue, Location, NodeId, ProcessImage, RawValue, SlotId, StatusCode,
    Variant,
};

struct DemoVariable {
    name: String,
    value: Variant,
    context: u64,
    callback: Arc<dyn ValueCallback>,
}

/// Just enough of a stack to watch the bridge work: nodes in a map,
/// values printed as the publisher pushes them.
#[derive(Default)]
struct DemoServer {
    variables: Mutex<BTreeMap<u32, DemoVariable>>,
}

impl DemoServer {
    fn client_read(&self, name: &str) -> DataValue {
        let (callback, context) = {
            let vars = self.variables.lock().unwrap();
            let var = vars.values().find(|v| v.name == name).expect("unknown node");
            (Arc::clone(&var.callback), var.context)
        };
        callback.on_read(context)
    }

    fn client_write(&self, name: &str, value: Variant) -> StatusCode {
        let (callback, context) = {
            let vars = self.variables.lock().unwrap();
            let var = vars.values().find(|v| v.name == name).expect("unknown node");
            (Arc::clone(&var.callback), var.context)
        };
        callback.on_write(context, &DataValue::good(value))
    }
}

impl UaServer for DemoServer {
    fn add_namespace(&self, _uri: &str) -> u16 {
        2
    }

    fn add_object(&self, attrs: &ObjectAttributes) -> StatusCode {
        println!("folder   {} ({})", attrs.browse_name.name, attrs.node_id);
        StatusCode::GOOD
    }

    fn add_variable(
        &self,
        attrs: &VariableAttributes,
        context: u64,
        callback: Arc<dyn ValueCallback>,
    ) -> StatusCode {
        println!(
            "variable {} ({}, data type {})",
            attrs.browse_name.name, attrs.node_id, attrs.data_type
        );
        self.variables.lock().unwrap().insert(
            attrs.node_id.numeric,
            DemoVariable {
                name: attrs.browse_name.name.clone(),
                value: attrs.initial_value,
                context,
                callback,
            },
        );
        StatusCode::GOOD
    }

    fn write_value(&self, node: NodeId, value: Variant) -> StatusCode {
        match self.variables.lock().unwrap().get_mut(&node.numeric) {
            Some(var) => {
                var.value = value;
                StatusCode::GOOD
            }
            None => StatusCode::BAD_NODE_ID_UNKNOWN,
        }
    }

    fn run_startup(&self) -> StatusCode {
        println!("endpoint up");
        StatusCode::GOOD
    }

    fn iterate(&self, _blocking: bool) -> u16 {
        0
    }

    fn run_shutdown(&self) -> StatusCode {
        println!("endpoint down");
        StatusCode::GOOD
    }
}

fn main() {
    let dir = env::temp_dir().join(format!("openplc-opcua-demo-{}", process::id()));
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("LOCATED_VARIABLES.h"),
        "__LOCATED_VAR(UINT,__IW0,I,W,0)\n__LOCATED_VAR(BOOL,__QX0_0,Q,X,0,0)\n",
    )
    .unwrap();

    // The scan engine owns the image; the bridge borrows it.
    let image = Arc::new(Mutex::new(ProcessImage::new()));
    let input = SlotId::from(Location::parse("%IW0").unwrap());
    let coil = SlotId::from(Location::parse("%QX0.0").unwrap());
    {
        let mut image = image.lock().unwrap();
        image.allocate(input).unwrap();
        image.allocate(coil).unwrap();
    }

    let server = Arc::new(DemoServer::default());
    let bridge = Bridge::new(
        Arc::clone(&image),
        {
            let server = Arc::clone(&server);
            Box::new(move |port| {
                println!("listening on opc.tcp://0.0.0.0:{port}");
                Ok(Arc::clone(&server) as Arc<dyn UaServer>)
            })
        },
        BridgeConfig {
            manifest_dirs: vec![dir.clone()],
            ..BridgeConfig::default()
        },
    );

    bridge.start(4840).unwrap();

    for cycle in 0..5u16 {
        // Input refresh + program body, then the per-cycle publish.
        image
            .lock()
            .unwrap()
            .set(input, RawValue::Word(cycle * 11))
            .unwrap();
        bridge.publish();

        let status = server.client_write("QX0_0", Variant::Boolean(cycle % 2 == 0));
        println!(
            "cycle {cycle}: IW0 -> {:?}, QX0_0 write {status}, coil now {:?}",
            server.client_read("IW0").value,
            image.lock().unwrap().get(coil)
        );
        thread::sleep(Duration::from_millis(20));
    }

    for var in server.variables.lock().unwrap().values() {
        println!("node {} holds {:?}", var.name, var.value);
    }

    bridge.stop();
    let _ = fs::remove_dir_all(&dir);
}
