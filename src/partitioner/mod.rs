//! Distributed partitioning of a graph and resolution of its ghost boundary.

use crate::AdjacencyList;
use crate::AdjacencySource;
use crate::Communicator;
use crate::DistArray;
use crate::Domain;
use crate::Error;
use crate::PartitionStrategy;
use std::collections::BTreeSet;
use std::sync::Arc;

mod ghost;

use self::ghost::GhostPair;
pub use self::ghost::GhostExchange;

/// Where a [`GraphPartitioner`] stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No successful run yet, or the last run failed.
    Unpartitioned,
    /// A run is in progress.
    Partitioning,
    /// Results of the last run are available.
    Partitioned,
}

/// Partitions a graph distributed over a process group, and computes which
/// ranks need ghost copies of each node and edge.
///
/// Given a [`PartitionStrategy`] that sends each node to a rank, the
/// partitioner derives:
///
/// - the destination of each edge, which is the destination of its endpoint
///   with the lowest global index,
/// - the ghost destination of each edge, which is the destination of its
///   endpoint with the highest global index,
/// - the ghost destinations of each node, that is the set of ranks that own
///   a neighbor of the node across a partition boundary.
///
/// Results are given for the nodes and edges stored on the calling rank, in
/// local order.
///
/// # Example
///
/// ```rust
/// use partage::Communicator as _;
///
/// # fn main() -> Result<(), partage::Error> {
/// // The path 0-1-2-3, where rank 0 stores nodes 0 and 1, and rank 1 stores
/// // nodes 2 and 3.
/// let group = partage::ThreadGroup::new(2)?;
/// let ghosts = group.run(|comm| -> Result<_, partage::Error> {
///     let mut partitioner = partage::GraphPartitioner::with_capacity(comm, 2, 2);
///     let adjacency = partitioner.adjacency_mut();
///     if comm.rank() == 0 {
///         adjacency.add_node(0);
///         adjacency.add_node(1);
///         adjacency.add_edge(0, 0, 1);
///         adjacency.add_edge(1, 1, 2);
///     } else {
///         adjacency.add_node(2);
///         adjacency.add_node(3);
///         adjacency.add_edge(2, 2, 3);
///     }
///     partitioner.partition(&mut partage::Stay)?;
///     Ok(partitioner.ghost_node_destinations().unwrap_or_default())
/// });
///
/// assert_eq!(ghosts[0].clone()?, [vec![], vec![1]]);
/// assert_eq!(ghosts[1].clone()?, [vec![0], vec![]]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct GraphPartitioner<C, A> {
    comm: C,
    adjacency: A,

    /// The protocol used to pool ghost node destinations.
    pub exchange: GhostExchange,

    state: State,
    node_destinations: Vec<usize>,
    edge_destinations: Vec<usize>,
    ghost_edge_destinations: Vec<usize>,
    ghost_node_destinations: Vec<Vec<usize>>,
}

impl<C> GraphPartitioner<C, AdjacencyList>
where
    C: Communicator,
{
    /// Create a partitioner over an empty [`AdjacencyList`], with room for
    /// the given number of local nodes and edges.
    pub fn with_capacity(comm: C, nodes: usize, edges: usize) -> Self {
        let adjacency = AdjacencyList::with_capacity(nodes, edges);
        let mut partitioner = GraphPartitioner::new(comm, adjacency);
        partitioner.node_destinations.reserve(nodes);
        partitioner.edge_destinations.reserve(edges);
        partitioner.ghost_edge_destinations.reserve(edges);
        partitioner.ghost_node_destinations.reserve(nodes);
        partitioner
    }
}

impl<C, A> GraphPartitioner<C, A>
where
    C: Communicator,
    A: AdjacencySource,
{
    pub fn new(comm: C, adjacency: A) -> Self {
        GraphPartitioner {
            comm,
            adjacency,
            exchange: GhostExchange::default(),
            state: State::Unpartitioned,
            node_destinations: Vec::new(),
            edge_destinations: Vec::new(),
            ghost_edge_destinations: Vec::new(),
            ghost_node_destinations: Vec::new(),
        }
    }

    /// Use the given protocol to pool ghost node destinations.
    pub fn with_exchange(mut self, exchange: GhostExchange) -> Self {
        self.exchange = exchange;
        self
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn adjacency(&self) -> &A {
        &self.adjacency
    }

    /// Mutable access to the local graph, to insert nodes and edges.
    pub fn adjacency_mut(&mut self) -> &mut A {
        &mut self.adjacency
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The destination rank of each local node.
    pub fn node_destinations(&self) -> Option<Vec<usize>> {
        self.result(&self.node_destinations)
    }

    /// The destination rank of each local edge.
    pub fn edge_destinations(&self) -> Option<Vec<usize>> {
        self.result(&self.edge_destinations)
    }

    /// The destination of the higher endpoint of each local edge, where a
    /// ghost copy of the edge may be needed.
    pub fn ghost_edge_destinations(&self) -> Option<Vec<usize>> {
        self.result(&self.ghost_edge_destinations)
    }

    /// The ranks that need a ghost copy of each local node, without
    /// duplicates.
    pub fn ghost_node_destinations(&self) -> Option<Vec<Vec<usize>>> {
        self.result(&self.ghost_node_destinations)
    }

    fn result<T: Clone>(&self, values: &[T]) -> Option<Vec<T>> {
        match self.state {
            State::Partitioned => Some(values.to_vec()),
            State::Unpartitioned | State::Partitioning => None,
        }
    }

    /// Partition the graph.
    ///
    /// This is a collective operation, every rank of the group must call it.
    /// Errors are detected collectively and returned on every rank, so that no
    /// rank is left waiting for the others.
    ///
    /// Previous results are discarded. On error, no result is available until
    /// the next successful call.
    pub fn partition<S>(&mut self, strategy: &mut S) -> Result<(), Error>
    where
        S: PartitionStrategy<A> + ?Sized,
    {
        let span = tracing::info_span!("partition", rank = self.comm.rank());
        let _enter = span.enter();

        self.state = State::Partitioning;
        self.node_destinations.clear();
        self.edge_destinations.clear();
        self.ghost_edge_destinations.clear();
        self.ghost_node_destinations.clear();

        match self.run(strategy) {
            Ok(()) => {
                self.state = State::Partitioned;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(%err, "partitioning failed");
                self.state = State::Unpartitioned;
                Err(err)
            }
        }
    }

    fn run<S>(&mut self, strategy: &mut S) -> Result<(), Error>
    where
        S: PartitionStrategy<A> + ?Sized,
    {
        self.adjacency.ready();

        let comm = &self.comm;
        let adjacency = &self.adjacency;
        let rank = comm.rank();
        let size = comm.size();
        let local_nodes = adjacency.nodes();
        let local_edges = adjacency.edges();

        let global_nodes = comm.all_reduce_sum(local_nodes);
        let global_edges = comm.all_reduce_sum(local_edges);
        if global_nodes == 0 || global_edges == 0 {
            return Err(Error::EmptyGraph {
                nodes: global_nodes,
                edges: global_edges,
            });
        }
        tracing::info!(global_nodes, global_edges, local_nodes, local_edges);

        let mut destinations = vec![0; local_nodes];
        let domain = Domain {
            adjacency,
            rank,
            size,
            global_nodes,
            global_edges,
        };
        let verdict = check_indices(adjacency, global_nodes)
            .and_then(|()| {
                strategy
                    .destinations(&mut destinations, domain)
                    .map_err(|err| Error::Strategy(Arc::new(err)))
            })
            .and_then(|()| check_destinations(adjacency, &destinations, size));
        agree(comm, verdict)?;

        // Global node indices of the local nodes.
        let node_indices: Vec<[usize; 1]> = (0..local_nodes)
            .map(|node| [adjacency.node_index(node)])
            .collect();
        let mut node_destination = DistArray::new(comm, "node destination", [global_nodes], 0);
        let mut node_source = DistArray::new(comm, "node source", [global_nodes], 0);
        node_destination.scatter(&destinations, &node_indices);
        node_source.scatter(&vec![rank; local_nodes], &node_indices);
        node_destination.sync();

        // Edges go where their lowest endpoint goes, and are ghosted where
        // their highest endpoint goes.
        let (lows, highs): (Vec<[usize; 1]>, Vec<[usize; 1]>) = (0..local_edges)
            .map(|edge| {
                let (node1, node2) = adjacency.edge(edge);
                ([usize::min(node1, node2)], [usize::max(node1, node2)])
            })
            .unzip();
        let low_destinations = node_destination.gather(&lows);
        let high_destinations = node_destination.gather(&highs);

        // Both ends of a boundary edge need a ghost copy on the other end's
        // destination.
        let mut pairs = BTreeSet::new();
        for edge in 0..local_edges {
            let ([low], [high]) = (lows[edge], highs[edge]);
            let (primary, ghost) = (low_destinations[edge], high_destinations[edge]);
            tracing::debug!(
                edge = adjacency.edge_index(edge),
                low,
                high,
                primary,
                ghost,
                "edge destinations"
            );
            if primary != ghost {
                pairs.insert(GhostPair {
                    node: low,
                    rank: ghost,
                });
                pairs.insert(GhostPair {
                    node: high,
                    rank: primary,
                });
            }
        }
        tracing::info!(pairs = pairs.len(), "found ghost node candidates");

        let homes = match self.exchange {
            GhostExchange::RoundRobin => Vec::new(),
            GhostExchange::AllToAll => {
                let nodes: Vec<[usize; 1]> = pairs.iter().map(|pair| [pair.node]).collect();
                node_source.gather(&nodes)
            }
        };

        node_destination.sync();
        drop(node_destination);
        drop(node_source);

        let ghost_nodes = match self.exchange {
            GhostExchange::RoundRobin => {
                ghost::round_robin(comm, adjacency, &pairs, global_nodes)
            }
            GhostExchange::AllToAll => ghost::all_to_all(comm, adjacency, &pairs, &homes),
        };

        self.node_destinations = destinations;
        self.edge_destinations = low_destinations;
        self.ghost_edge_destinations = high_destinations;
        self.ghost_node_destinations = ghost_nodes;
        Ok(())
    }
}

/// Check that the local nodes and edge endpoints are global indices of the
/// graph.
fn check_indices<A>(adjacency: &A, global_nodes: usize) -> Result<(), Error>
where
    A: AdjacencySource + ?Sized,
{
    let nodes = (0..adjacency.nodes()).map(|node| adjacency.node_index(node));
    let endpoints = (0..adjacency.edges()).flat_map(|edge| {
        let (node1, node2) = adjacency.edge(edge);
        [node1, node2]
    });
    match nodes.chain(endpoints).find(|index| global_nodes <= *index) {
        Some(index) => Err(Error::NodeIndexOutOfRange {
            index,
            nodes: global_nodes,
        }),
        None => Ok(()),
    }
}

/// Check the output of a partition strategy on this rank.
fn check_destinations<A>(adjacency: &A, destinations: &[usize], size: usize) -> Result<(), Error>
where
    A: AdjacencySource + ?Sized,
{
    match destinations.iter().position(|destination| size <= *destination) {
        Some(node) => Err(Error::DestinationOutOfRange {
            node: adjacency.node_index(node),
            destination: destinations[node],
            size,
        }),
        None => Ok(()),
    }
}

/// Make every rank fail if any rank failed.
///
/// Ranks that failed keep their own error, the others report the first rank
/// that failed.
fn agree<C>(comm: &C, verdict: Result<(), Error>) -> Result<(), Error>
where
    C: Communicator,
{
    let failed = comm.all_gather(u8::from(verdict.is_err()));
    verdict?;
    match failed.iter().position(|failed| *failed != 0) {
        Some(rank) => Err(Error::RemoteFailure { rank }),
        None => Ok(()),
    }
}
