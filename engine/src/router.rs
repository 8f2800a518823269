use crate::{
    connection::{PortConnection, PortConnectionsManager},
    error::{RouteError, RouteResult},
    graph::GraphSnapshot,
    mutex::UnsafeMutex,
    node::{GraphNode, NodeId, NodeKind, Processable, ProcessorHandle},
    port::{PortHandle, PortIdentifier},
    render::SnapshotPublisher,
    routing,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

struct RegisteredNode {
    name: String,
    kind: NodeKind,
    processor: ProcessorHandle,
    ports: Vec<PortIdentifier>,
}

/// Owns the session topology: every registered node and port, the
/// connection registry and the last accepted graph.
///
/// Lives on the control thread. Changes only reach the render thread
/// through [`Router::recalc_graph`].
pub struct Router {
    block_length: usize,
    nodes: BTreeMap<NodeId, RegisteredNode>,
    next_id: NodeId,
    ports: HashMap<PortIdentifier, (NodeId, PortHandle)>,
    connections: PortConnectionsManager,
    live: Arc<GraphSnapshot>,
    version: u64,
    publisher: SnapshotPublisher,
}

impl Router {
    pub fn new(block_length: usize, publisher: SnapshotPublisher) -> Self {
        Self {
            block_length,
            nodes: BTreeMap::new(),
            next_id: 0,
            ports: HashMap::new(),
            connections: PortConnectionsManager::new(),
            live: Arc::new(GraphSnapshot::default()),
            version: 0,
            publisher,
        }
    }

    pub fn block_length(&self) -> usize {
        self.block_length
    }

    /// Registers a node and its ports. Names and port identifiers must be
    /// unique in the session.
    pub fn add_node(&mut self, processor: Box<dyn Processable>) -> RouteResult<NodeId> {
        let name = processor.name().to_string();
        if self.node_id(&name).is_some() {
            return Err(RouteError::DuplicateNode(name));
        }
        let handles: Vec<PortHandle> = processor
            .inputs()
            .iter()
            .chain(processor.outputs())
            .cloned()
            .collect();
        let mut ids: Vec<PortIdentifier> = Vec::with_capacity(handles.len());
        for handle in &handles {
            let id = handle.get().id();
            if self.ports.contains_key(id) || ids.contains(id) {
                return Err(RouteError::DuplicatePort(id.to_string()));
            }
            ids.push(id.clone());
        }

        let id = self.next_id;
        self.next_id += 1;
        for (port_id, handle) in ids.iter().zip(handles) {
            self.ports.insert(port_id.clone(), (id, handle));
        }
        let kind = processor.kind();
        debug!("Registered node {name} ({kind:?}) with {} ports", ids.len());
        self.nodes.insert(
            id,
            RegisteredNode {
                name,
                kind,
                processor: Arc::new(UnsafeMutex::new(processor)),
                ports: ids,
            },
        );
        Ok(id)
    }

    /// Unregisters a node and drops every connection touching its ports.
    /// The live graph keeps running the node until the next recalculation.
    pub fn remove_node(&mut self, id: NodeId) -> RouteResult<()> {
        let node = self.nodes.remove(&id).ok_or(RouteError::UnknownNode(id))?;
        let mut dropped = 0;
        for port in &node.ports {
            self.ports.remove(port);
            dropped += self.connections.ensure_disconnect_all(port);
        }
        debug!("Removed node {} and {dropped} connections", node.name);
        Ok(())
    }

    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .find(|(_, node)| node.name == name)
            .map(|(id, _)| *id)
    }

    pub fn node_name(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(&id).map(|n| n.name.as_str())
    }

    pub fn node_kind(&self, id: NodeId) -> Option<NodeKind> {
        self.nodes.get(&id).map(|n| n.kind)
    }

    pub fn node_names(&self) -> Vec<String> {
        self.nodes.values().map(|n| n.name.clone()).collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Identifiers of a node's ports, inputs first.
    pub fn node_ports(&self, id: NodeId) -> Option<&[PortIdentifier]> {
        self.nodes.get(&id).map(|n| n.ports.as_slice())
    }

    /// Looks a port up by node name and port label.
    pub fn find_port(&self, node: &str, label: &str) -> Option<PortIdentifier> {
        let id = self.node_id(node)?;
        self.node_ports(id)?
            .iter()
            .find(|p| p.label == label)
            .cloned()
    }

    pub fn port(&self, id: &PortIdentifier) -> Option<PortHandle> {
        self.ports.get(id).map(|(_, handle)| handle.clone())
    }

    pub fn connections(&self) -> &PortConnectionsManager {
        &self.connections
    }

    fn owner_of(&self, port: &PortIdentifier) -> RouteResult<NodeId> {
        self.ports
            .get(port)
            .map(|(node, _)| *node)
            .ok_or_else(|| RouteError::DanglingPort(port.to_string()))
    }

    /// Node adjacency from the enabled connections.
    fn node_successors(&self) -> HashMap<NodeId, Vec<NodeId>> {
        let mut successors: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for conn in self.connections.connections().iter().filter(|c| c.enabled) {
            if let (Some((from, _)), Some((to, _))) =
                (self.ports.get(&conn.src), self.ports.get(&conn.dest))
            {
                let next = successors.entry(*from).or_default();
                if !next.contains(to) {
                    next.push(*to);
                }
            }
        }
        successors
    }

    fn check_edge(&self, src: &PortIdentifier, dest: &PortIdentifier) -> RouteResult<()> {
        let from = self.owner_of(src)?;
        let to = self.owner_of(dest)?;
        if from == to {
            return Err(RouteError::SelfLoop {
                node: self.node_name(from).unwrap_or_default().to_string(),
            });
        }
        let successors = self.node_successors();
        if routing::would_create_cycle(&from, &to, |node| {
            successors.get(node).cloned().unwrap_or_default()
        }) {
            return Err(RouteError::ConnectionCycle {
                src: src.to_string(),
                dest: dest.to_string(),
            });
        }
        Ok(())
    }

    /// Creates or updates the connection `src -> dest`. On error the
    /// routing is unchanged.
    pub fn connect(
        &mut self,
        src: &PortIdentifier,
        dest: &PortIdentifier,
        multiplier: f32,
        locked: bool,
        enabled: bool,
    ) -> RouteResult<&PortConnection> {
        if enabled {
            self.check_edge(src, dest)?;
        } else {
            self.owner_of(src)?;
            self.owner_of(dest)?;
        }
        Ok(self
            .connections
            .ensure_connect(src, dest, multiplier, locked, enabled)?)
    }

    pub fn disconnect(&mut self, src: &PortIdentifier, dest: &PortIdentifier) -> bool {
        self.connections.ensure_disconnect(src, dest)
    }

    fn existing(&self, src: &PortIdentifier, dest: &PortIdentifier) -> RouteResult<PortConnection> {
        self.connections
            .find(src, dest)
            .cloned()
            .ok_or_else(|| RouteError::NotConnected {
                src: src.to_string(),
                dest: dest.to_string(),
            })
    }

    pub fn set_multiplier(
        &mut self,
        src: &PortIdentifier,
        dest: &PortIdentifier,
        multiplier: f32,
    ) -> RouteResult<()> {
        let conn = self.existing(src, dest)?;
        self.connections
            .ensure_connect(src, dest, multiplier, conn.locked, conn.enabled)?;
        Ok(())
    }

    /// Enabling a connection adds an edge to the graph, so it is checked
    /// like a new one.
    pub fn set_connection_enabled(
        &mut self,
        src: &PortIdentifier,
        dest: &PortIdentifier,
        enabled: bool,
    ) -> RouteResult<()> {
        let conn = self.existing(src, dest)?;
        if enabled && !conn.enabled {
            self.check_edge(src, dest)?;
        }
        self.connections
            .ensure_connect(src, dest, conn.multiplier, conn.locked, enabled)?;
        Ok(())
    }

    /// Replaces the whole connection set, as when a session is loaded, and
    /// recalculates. A set that cannot be scheduled is rejected and the
    /// previous connections stay in place.
    pub fn load_connections(
        &mut self,
        connections: PortConnectionsManager,
    ) -> RouteResult<Arc<GraphSnapshot>> {
        let previous = std::mem::replace(&mut self.connections, connections);
        match self.recalc_graph() {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                self.connections = previous;
                Err(e)
            }
        }
    }

    /// Builds a new graph from the registered nodes and enabled
    /// connections and hands it to the render thread.
    ///
    /// A topology with a cycle, a self loop or a dangling port is
    /// rejected; the live graph stays as it was.
    pub fn recalc_graph(&mut self) -> RouteResult<Arc<GraphSnapshot>> {
        let nodes: Vec<GraphNode> = self
            .nodes
            .iter()
            .map(|(id, node)| GraphNode::new(*id, node.processor.clone()))
            .collect();
        let version = self.version + 1;
        match GraphSnapshot::build(version, nodes, &self.ports, &self.connections) {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                info!(
                    "Graph v{version}: {} nodes in {} levels, {} edges, {} frames playback latency",
                    snapshot.nodes().len(),
                    snapshot.levels().len(),
                    snapshot.edges().len(),
                    snapshot.max_playback_latency()
                );
                self.version = version;
                self.live = snapshot.clone();
                self.publisher.publish(snapshot.clone());
                Ok(snapshot)
            }
            Err(e) => {
                warn!("Graph recalculation rejected, keeping v{}: {e}", self.version);
                Err(e)
            }
        }
    }

    /// The last accepted graph.
    pub fn live_snapshot(&self) -> Arc<GraphSnapshot> {
        self.live.clone()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Connections feeding `port` in the live graph.
    pub fn port_sources(&self, port: &PortIdentifier) -> Vec<PortConnection> {
        self.live
            .sources_of(port)
            .map(|links| links.iter().map(|l| l.connection.clone()).collect())
            .unwrap_or_default()
    }

    /// Frees graphs the render thread no longer uses.
    pub fn collect_garbage(&mut self) -> usize {
        self.publisher.collect_garbage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::EngineConfig,
        error::ProcessFault,
        plugin::{PluginIo, PluginNode, PluginPortSpec, PluginProcess},
        port::PortType,
        render::{self, Renderer, RtStats},
        track::Track,
    };

    const BLOCK: usize = 16;

    fn router() -> (Router, Renderer) {
        let config = EngineConfig {
            block_length: BLOCK,
            render_threads: 1,
            ..EngineConfig::default()
        };
        let (publisher, renderer, _) =
            render::create(&config, Arc::new(RtStats::default())).unwrap();
        (Router::new(BLOCK, publisher), renderer)
    }

    /// Adds a one-in one-out track and returns its input and output.
    fn add_track(router: &mut Router, name: &str) -> (PortIdentifier, PortIdentifier) {
        let track = Track::new(name.to_string(), 1, 1, 0, 0, BLOCK);
        let input = track.audio_inputs()[0].get().id().clone();
        let output = track.audio_outputs()[0].get().id().clone();
        router.add_node(Box::new(track)).unwrap();
        (input, output)
    }

    #[test]
    fn connect_and_recalc_publish_levels() {
        let (mut router, mut renderer) = router();
        let (_, a_out) = add_track(&mut router, "A");
        let (b_in, _) = add_track(&mut router, "B");
        router.connect(&a_out, &b_in, 1.0, false, true).unwrap();
        let snapshot = router.recalc_graph().unwrap();
        assert_eq!(snapshot.version(), 1);
        assert_eq!(snapshot.levels().len(), 2);
        assert_eq!(router.port_sources(&b_in).len(), 1);

        renderer.process_cycle(BLOCK);
        assert_eq!(renderer.graph_version(), 1);
    }

    struct Lookahead(usize);

    impl PluginProcess for Lookahead {
        fn process(&mut self, _io: &mut PluginIo<'_>) -> Result<(), ProcessFault> {
            Ok(())
        }

        fn latency(&self) -> usize {
            self.0
        }
    }

    fn add_lookahead(
        router: &mut Router,
        name: &str,
        frames: usize,
    ) -> (PortIdentifier, PortIdentifier) {
        let plugin = PluginNode::new(
            name.to_string(),
            0,
            &[PluginPortSpec::new(PortType::Audio, "in", "In")],
            &[PluginPortSpec::new(PortType::Audio, "out", "Out")],
            BLOCK,
            Box::new(Lookahead(frames)),
        );
        let input = plugin.inputs()[0].get().id().clone();
        let output = plugin.outputs()[0].get().id().clone();
        router.add_node(Box::new(plugin)).unwrap();
        (input, output)
    }

    #[test]
    fn playback_latency_follows_the_slowest_route() {
        let (mut router, _renderer) = router();
        let (_, a_out) = add_track(&mut router, "A");
        let (_, c_out) = add_track(&mut router, "C");
        let (b_in, _) = add_track(&mut router, "B");
        let (lim_in, lim_out) = add_lookahead(&mut router, "Limiter", 64);
        let (eq_in, eq_out) = add_lookahead(&mut router, "Eq", 16);
        // A -> Limiter -> Eq -> B, and C -> Eq.
        router.connect(&a_out, &lim_in, 1.0, false, true).unwrap();
        router.connect(&lim_out, &eq_in, 1.0, false, true).unwrap();
        router.connect(&eq_out, &b_in, 1.0, false, true).unwrap();
        router.connect(&c_out, &eq_in, 1.0, false, true).unwrap();

        let snapshot = router.recalc_graph().unwrap();
        let latency = |name: &str| {
            snapshot
                .nodes()
                .iter()
                .find(|n| n.node.name == name)
                .map(|n| n.playback_latency)
                .unwrap()
        };
        assert_eq!(latency("B"), 0);
        assert_eq!(latency("Eq"), 16);
        assert_eq!(latency("C"), 16);
        assert_eq!(latency("Limiter"), 80);
        assert_eq!(latency("A"), 80);
        assert_eq!(snapshot.max_playback_latency(), 80);

        assert!(router.disconnect(&lim_out, &eq_in));
        let snapshot = router.recalc_graph().unwrap();
        assert_eq!(snapshot.max_playback_latency(), 64);
    }

    #[test]
    fn connect_rejects_a_loop_and_keeps_routing() {
        let (mut router, _renderer) = router();
        let (a_in, a_out) = add_track(&mut router, "A");
        let (b_in, b_out) = add_track(&mut router, "B");
        router.connect(&a_out, &b_in, 1.0, false, true).unwrap();
        let err = router.connect(&b_out, &a_in, 1.0, false, true).unwrap_err();
        assert!(matches!(err, RouteError::ConnectionCycle { .. }));
        assert_eq!(router.connections().len(), 1);
    }

    #[test]
    fn recalc_rejects_a_loop_and_keeps_the_live_graph() {
        let (mut router, mut renderer) = router();
        let (a_in, a_out) = add_track(&mut router, "A");
        let (b_in, b_out) = add_track(&mut router, "B");
        router.connect(&a_out, &b_in, 1.0, false, true).unwrap();
        let before = router.recalc_graph().unwrap();
        renderer.process_cycle(BLOCK);

        // Bypass the per-edge check to get A -> B -> A into the registry.
        router
            .connections
            .ensure_connect(&b_out, &a_in, 1.0, false, true)
            .unwrap();
        let err = router.recalc_graph().unwrap_err();
        match err {
            RouteError::Cycle { nodes } => assert_eq!(nodes, vec!["A", "B"]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(Arc::ptr_eq(&router.live_snapshot(), &before));
        assert_eq!(router.version(), 1);

        renderer.process_cycle(BLOCK);
        assert_eq!(renderer.graph_version(), 1);
    }

    #[test]
    fn loading_a_looping_session_restores_connections() {
        let (mut router, _renderer) = router();
        let (a_in, a_out) = add_track(&mut router, "A");
        let (b_in, b_out) = add_track(&mut router, "B");
        router.connect(&a_out, &b_in, 1.0, false, true).unwrap();
        router.recalc_graph().unwrap();

        let mut looping = PortConnectionsManager::new();
        looping.ensure_connect(&a_out, &b_in, 1.0, false, true).unwrap();
        looping.ensure_connect(&b_out, &a_in, 0.5, false, true).unwrap();
        assert!(router.load_connections(looping).is_err());
        assert_eq!(router.connections().len(), 1);
        assert_eq!(router.live_snapshot().version(), 1);
    }

    #[test]
    fn self_loop_is_rejected() {
        let (mut router, _renderer) = router();
        let (a_in, a_out) = add_track(&mut router, "A");
        assert!(matches!(
            router.connect(&a_out, &a_in, 1.0, false, true),
            Err(RouteError::SelfLoop { .. })
        ));
    }

    #[test]
    fn dangling_port_is_rejected() {
        let (mut router, _renderer) = router();
        let (a_in, _) = add_track(&mut router, "A");
        let ghost = Track::new("ghost".to_string(), 1, 1, 0, 0, BLOCK);
        let ghost_out = ghost.audio_outputs()[0].get().id().clone();
        assert!(matches!(
            router.connect(&ghost_out, &a_in, 1.0, false, true),
            Err(RouteError::DanglingPort(_))
        ));
    }

    #[test]
    fn disabled_connection_may_close_a_loop_until_enabled() {
        let (mut router, _renderer) = router();
        let (a_in, a_out) = add_track(&mut router, "A");
        let (b_in, b_out) = add_track(&mut router, "B");
        router.connect(&a_out, &b_in, 1.0, false, true).unwrap();
        router.connect(&b_out, &a_in, 1.0, false, false).unwrap();
        assert!(router.recalc_graph().is_ok());
        assert!(router.set_connection_enabled(&b_out, &a_in, true).is_err());
        assert!(!router.connections().find(&b_out, &a_in).unwrap().enabled);
    }

    #[test]
    fn recalc_never_drops_registered_nodes() {
        let (mut router, _renderer) = router();
        for name in ["A", "B", "C"] {
            add_track(&mut router, name);
        }
        let first = router.recalc_graph().unwrap();
        add_track(&mut router, "D");
        let second = router.recalc_graph().unwrap();
        assert_eq!(first.nodes().len(), 3);
        assert_eq!(second.nodes().len(), 4);
        for name in first.node_names() {
            assert!(second.node_names().contains(&name));
        }
    }

    #[test]
    fn duplicate_names_and_ports_are_rejected() {
        let (mut router, _renderer) = router();
        add_track(&mut router, "A");
        let again = Track::new("A".to_string(), 1, 1, 0, 0, BLOCK);
        assert!(matches!(
            router.add_node(Box::new(again)),
            Err(RouteError::DuplicateNode(_))
        ));
    }

    #[test]
    fn remove_node_drops_its_connections() {
        let (mut router, _renderer) = router();
        let (_, a_out) = add_track(&mut router, "A");
        let (b_in, _) = add_track(&mut router, "B");
        router.connect(&a_out, &b_in, 1.0, false, true).unwrap();
        let b = router.node_id("B").unwrap();
        router.remove_node(b).unwrap();
        assert!(router.connections().is_empty());
        assert!(router.port(&b_in).is_none());
        assert_eq!(router.recalc_graph().unwrap().nodes().len(), 1);
    }

    #[test]
    fn set_multiplier_needs_an_existing_connection() {
        let (mut router, _renderer) = router();
        let (_, a_out) = add_track(&mut router, "A");
        let (b_in, _) = add_track(&mut router, "B");
        assert!(matches!(
            router.set_multiplier(&a_out, &b_in, 0.5),
            Err(RouteError::NotConnected { .. })
        ));
        router.connect(&a_out, &b_in, 1.0, true, true).unwrap();
        router.set_multiplier(&a_out, &b_in, 0.5).unwrap();
        let conn = router.connections().find(&a_out, &b_in).unwrap();
        assert_eq!(conn.multiplier, 0.5);
        assert!(conn.locked);
    }
}
