use crate::{
    connection::PortConnectionsManager,
    error::{RouteError, RouteResult},
    node::{GraphNode, NodeId},
    port::{PortHandle, PortIdentifier, SourceLink},
    routing,
};
use std::collections::HashMap;

/// An input port together with its resolved sources.
#[derive(Debug, Clone)]
pub struct InputFeed {
    pub port: PortHandle,
    pub sources: Vec<SourceLink>,
}

#[derive(Debug, Clone)]
pub struct ScheduledNode {
    pub node: GraphNode,
    /// One entry per input port, in port order.
    pub feeds: Vec<InputFeed>,
    /// Frames between this node's input and the graph's terminal outputs:
    /// its own latency plus the largest one downstream.
    pub playback_latency: usize,
}

/// Immutable schedule handed to the render thread.
#[derive(Debug, Default)]
pub struct GraphSnapshot {
    version: u64,
    nodes: Vec<ScheduledNode>,
    levels: Vec<Vec<usize>>,
    edges: Vec<(usize, usize)>,
    max_playback_latency: usize,
}

impl GraphSnapshot {
    /// Builds the schedule for `nodes` from the enabled connections.
    ///
    /// `ports` maps every registered port to the id of its owning node.
    pub fn build(
        version: u64,
        nodes: Vec<GraphNode>,
        ports: &HashMap<PortIdentifier, (NodeId, PortHandle)>,
        connections: &PortConnectionsManager,
    ) -> RouteResult<Self> {
        let index_of: HashMap<NodeId, usize> =
            nodes.iter().enumerate().map(|(i, n)| (n.id, i)).collect();
        let mut successors = vec![vec![]; nodes.len()];
        let mut edges = vec![];
        let mut links: HashMap<PortIdentifier, Vec<SourceLink>> = HashMap::new();

        for conn in connections.connections().iter().filter(|c| c.enabled) {
            let (src_node, src_port) = ports
                .get(&conn.src)
                .ok_or_else(|| RouteError::DanglingPort(conn.src.to_string()))?;
            let (dest_node, _) = ports
                .get(&conn.dest)
                .ok_or_else(|| RouteError::DanglingPort(conn.dest.to_string()))?;
            let (Some(&from), Some(&to)) = (index_of.get(src_node), index_of.get(dest_node)) else {
                return Err(RouteError::UnknownNode(*src_node));
            };
            if from == to {
                return Err(RouteError::SelfLoop {
                    node: nodes[from].name.clone(),
                });
            }
            if !successors[from].contains(&to) {
                successors[from].push(to);
                edges.push((from, to));
            }
            links.entry(conn.dest.clone()).or_default().push(SourceLink {
                port: src_port.clone(),
                connection: conn.clone(),
            });
        }

        let levels = routing::levels(&successors).map_err(|cycle| RouteError::Cycle {
            nodes: cycle.iter().map(|&i| nodes[i].name.clone()).collect(),
        })?;

        // Successors always sit in later levels.
        let mut playback = vec![0; nodes.len()];
        for level in levels.iter().rev() {
            for &i in level {
                let downstream = successors[i].iter().map(|&s| playback[s]).max();
                playback[i] = nodes[i].latency + downstream.unwrap_or(0);
            }
        }
        let max_playback_latency = playback.iter().copied().max().unwrap_or(0);

        let nodes = nodes
            .into_iter()
            .zip(playback)
            .map(|(node, playback_latency)| {
                let feeds = node
                    .inputs
                    .iter()
                    .map(|port| InputFeed {
                        port: port.clone(),
                        sources: links.remove(port.get().id()).unwrap_or_default(),
                    })
                    .collect();
                ScheduledNode {
                    node,
                    feeds,
                    playback_latency,
                }
            })
            .collect();

        Ok(Self {
            version,
            nodes,
            levels,
            edges,
            max_playback_latency,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn nodes(&self) -> &[ScheduledNode] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&ScheduledNode> {
        self.nodes.get(index)
    }

    /// Node indices per level. Every predecessor of a node is in an
    /// earlier level.
    pub fn levels(&self) -> &[Vec<usize>] {
        &self.levels
    }

    /// Node index pairs `(from, to)`.
    pub fn edges(&self) -> &[(usize, usize)] {
        &self.edges
    }

    /// Largest playback latency of any route, in frames.
    pub fn max_playback_latency(&self) -> usize {
        self.max_playback_latency
    }

    pub fn node_names(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.node.name.clone()).collect()
    }

    /// Sources resolved for one input port.
    pub fn sources_of(&self, port: &PortIdentifier) -> Option<&[SourceLink]> {
        self.nodes
            .iter()
            .flat_map(|n| &n.feeds)
            .find(|f| f.port.get().id() == port)
            .map(|f| f.sources.as_slice())
    }
}
