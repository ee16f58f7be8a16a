//! Trellis Testing Framework
//!
//! Fixtures for exercising workflows deterministically: scripted nodes that
//! record the states they were handed, and a suspension store that records
//! every call and can be told to fail.

pub mod node;
pub mod store;

pub use node::ScriptedNode;
pub use store::{RecordingStore, StoreCall};

use trellis_kernel::workflow::NodeId;

/// Node id from a literal. Panics on an empty name.
pub fn node_id(name: &str) -> NodeId {
    NodeId::new(name).expect("node id must not be empty")
}

#[macro_export]
macro_rules! assert_node_called {
    ($node:expr, $expected_count:expr) => {
        let count = $node.call_count().await;
        assert_eq!(
            count, $expected_count,
            "Expected node '{}' to be called {} times, but was called {} times",
            $node.node_id(),
            $expected_count,
            count
        );
    };
}
