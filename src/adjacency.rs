//! Local views over a distributed graph.

/// The part of a distributed graph stored on the calling rank.
///
/// Nodes and edges are numbered locally from zero, and each maps to a global
/// index that is unique across the whole group. Edge endpoints are given as
/// global node indices.
pub trait AdjacencySource {
    /// Finalize pending inserts. Called once at the start of each
    /// partitioning run.
    fn ready(&mut self);

    /// The number of nodes stored on this rank.
    fn nodes(&self) -> usize;

    /// The number of edges stored on this rank.
    fn edges(&self) -> usize;

    /// The global index of local node `node`.
    fn node_index(&self, node: usize) -> usize;

    /// The global index of local edge `edge`.
    fn edge_index(&self, edge: usize) -> usize;

    /// The global indices of the endpoints of local edge `edge`.
    fn edge(&self, edge: usize) -> (usize, usize);
}

impl<A> AdjacencySource for &mut A
where
    A: AdjacencySource + ?Sized,
{
    fn ready(&mut self) {
        A::ready(self)
    }

    fn nodes(&self) -> usize {
        A::nodes(self)
    }

    fn edges(&self) -> usize {
        A::edges(self)
    }

    fn node_index(&self, node: usize) -> usize {
        A::node_index(self, node)
    }

    fn edge_index(&self, edge: usize) -> usize {
        A::edge_index(self, edge)
    }

    fn edge(&self, edge: usize) -> (usize, usize) {
        A::edge(self, edge)
    }
}

/// A list of nodes and edges stored in memory.
///
/// Inserted items are staged, and only show up once [`AdjacencyList::ready`]
/// has been called.
///
/// # Example
///
/// ```rust
/// use partage::AdjacencySource as _;
///
/// let mut adjacency = partage::AdjacencyList::new();
/// adjacency.add_node(4);
/// adjacency.add_edge(7, 4, 2);
/// assert_eq!(adjacency.nodes(), 0);
///
/// adjacency.ready();
/// assert_eq!(adjacency.nodes(), 1);
/// assert_eq!(adjacency.edge(0), (4, 2));
/// ```
#[derive(Debug, Default, Clone)]
pub struct AdjacencyList {
    nodes: Vec<usize>,
    edges: Vec<Edge>,
    pending_nodes: Vec<usize>,
    pending_edges: Vec<Edge>,
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    index: usize,
    ends: (usize, usize),
}

impl AdjacencyList {
    pub fn new() -> AdjacencyList {
        AdjacencyList::default()
    }

    /// Reserve room for the expected number of local nodes and edges.
    pub fn with_capacity(nodes: usize, edges: usize) -> AdjacencyList {
        AdjacencyList {
            nodes: Vec::with_capacity(nodes),
            edges: Vec::with_capacity(edges),
            pending_nodes: Vec::with_capacity(nodes),
            pending_edges: Vec::with_capacity(edges),
        }
    }

    /// Stage a node, given its global index.
    pub fn add_node(&mut self, global_index: usize) {
        self.pending_nodes.push(global_index);
    }

    /// Stage an edge, given its global index and the global indices of its
    /// endpoints.
    pub fn add_edge(&mut self, global_index: usize, node1: usize, node2: usize) {
        self.pending_edges.push(Edge {
            index: global_index,
            ends: (node1, node2),
        });
    }

    /// Drop every node and edge, staged or not.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.edges.clear();
        self.pending_nodes.clear();
        self.pending_edges.clear();
    }
}

impl AdjacencySource for AdjacencyList {
    fn ready(&mut self) {
        self.nodes.append(&mut self.pending_nodes);
        self.edges.append(&mut self.pending_edges);
    }

    fn nodes(&self) -> usize {
        self.nodes.len()
    }

    fn edges(&self) -> usize {
        self.edges.len()
    }

    fn node_index(&self, node: usize) -> usize {
        self.nodes[node]
    }

    fn edge_index(&self, edge: usize) -> usize {
        self.edges[edge].index
    }

    fn edge(&self, edge: usize) -> (usize, usize) {
        self.edges[edge].ends
    }
}
