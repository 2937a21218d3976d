use anyhow::Context as _;
use anyhow::Result;
use itertools::Itertools as _;
use partage::AdjacencyList;
use partage::AdjacencySource;
use partage::Communicator as _;
use partage::Domain;
use partage::GhostExchange;
use partage::GraphPartitioner;
use partage::PartitionStrategy;
use rand::SeedableRng as _;
use std::convert::Infallible;
use std::io;

/// A graph given as a list of edges.
///
/// Nodes are numbered from zero, and the node count is one plus the highest
/// index found in the list.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EdgeList {
    pub nodes: usize,
    pub edges: Vec<(usize, usize)>,
}

/// Read an edge list, one `n1 n2` pair per line.
///
/// Blank lines and everything after a `#` are ignored.
pub fn read_edge_list<R>(r: R) -> Result<EdgeList>
where
    R: io::BufRead,
{
    let mut graph = EdgeList::default();
    for (lineno, line) in r.lines().enumerate() {
        let lineno = lineno + 1;
        let line = line.context("failed to read line")?;
        let line = match line.split_once('#') {
            Some((content, _comment)) => content,
            None => &line,
        };
        let mut words = line.split_whitespace();
        let Some(first) = words.next() else {
            continue;
        };
        let second = words
            .next()
            .with_context(|| format!("line {lineno}: expected two node indices"))?;
        if let Some(extra) = words.next() {
            anyhow::bail!("line {lineno}: unexpected {extra:?} after the edge");
        }
        let node1: usize = first
            .parse()
            .with_context(|| format!("line {lineno}: {first:?} is not a valid node index"))?;
        let node2: usize = second
            .parse()
            .with_context(|| format!("line {lineno}: {second:?} is not a valid node index"))?;
        graph.nodes = usize::max(graph.nodes, usize::max(node1, node2) + 1);
        graph.edges.push((node1, node2));
    }
    Ok(graph)
}

/// The rank storing `node` when nodes are spread in contiguous blocks.
pub fn home(node: usize, nodes: usize, size: usize) -> usize {
    node * size / nodes
}

/// Insert the part of `graph` stored on `rank`.
///
/// Edges are stored next to their lowest endpoint, and their global index is
/// their position in the list.
pub fn load(adjacency: &mut AdjacencyList, graph: &EdgeList, rank: usize, size: usize) {
    for node in (0..graph.nodes).filter(|node| home(*node, graph.nodes, size) == rank) {
        adjacency.add_node(node);
    }
    for (edge, (node1, node2)) in graph.edges.iter().copied().enumerate() {
        if home(usize::min(node1, node2), graph.nodes, size) == rank {
            adjacency.add_edge(edge, node1, node2);
        }
    }
}

/// The strategies available from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Stay,
    Block,
    Cyclic,
    Random { seed: u64 },
}

impl std::str::FromStr for Strategy {
    type Err = anyhow::Error;

    fn from_str(definition: &str) -> Result<Self> {
        let mut args = definition.split(',');
        let name = args.next().context("empty definition")?;
        let strategy = match name {
            "stay" => Strategy::Stay,
            "block" => Strategy::Block,
            "cyclic" => Strategy::Cyclic,
            "random" => {
                let seed = match args.next() {
                    Some(arg) => arg
                        .parse()
                        .with_context(|| format!("arg {arg:?} is not a valid seed"))?,
                    None => 0,
                };
                Strategy::Random { seed }
            }
            _ => anyhow::bail!("unknown strategy {name:?}"),
        };
        if let Some(arg) = args.next() {
            anyhow::bail!("too many arguments for {name:?}, starting at {arg:?}");
        }
        Ok(strategy)
    }
}

impl<A> PartitionStrategy<A> for Strategy
where
    A: AdjacencySource + ?Sized,
{
    type Error = Infallible;

    fn destinations(
        &mut self,
        destinations: &mut [usize],
        domain: Domain<'_, A>,
    ) -> Result<(), Self::Error> {
        match *self {
            Strategy::Stay => partage::Stay.destinations(destinations, domain),
            Strategy::Block => partage::Block.destinations(destinations, domain),
            Strategy::Cyclic => partage::Cyclic.destinations(destinations, domain),
            Strategy::Random { seed } => {
                // One stream per rank, so ranks do not all draw the same numbers.
                let seed = seed.wrapping_add(domain.rank as u64);
                let rng = rand_pcg::Pcg64::seed_from_u64(seed);
                partage::Random { rng }.destinations(destinations, domain)
            }
        }
    }
}

pub fn parse_exchange(name: &str) -> Result<GhostExchange> {
    Ok(match name {
        "round-robin" => GhostExchange::RoundRobin,
        "all-to-all" => GhostExchange::AllToAll,
        _ => anyhow::bail!("expected round-robin or all-to-all, got {name:?}"),
    })
}

/// The outcome of a partitioning run, indexed by global node and edge index.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Partition {
    pub node_destinations: Vec<usize>,
    pub ghost_node_destinations: Vec<Vec<usize>>,
    pub edge_destinations: Vec<usize>,
    pub ghost_edge_destinations: Vec<usize>,
}

/// What one rank learned about the nodes and edges it stores.
struct RankResult {
    nodes: Vec<usize>,
    edges: Vec<usize>,
    node_destinations: Vec<usize>,
    ghost_node_destinations: Vec<Vec<usize>>,
    edge_destinations: Vec<usize>,
    ghost_edge_destinations: Vec<usize>,
}

/// Partition `graph` over an in-process group of `size` ranks.
pub fn partition(
    graph: &EdgeList,
    size: usize,
    strategy: Strategy,
    exchange: GhostExchange,
) -> Result<Partition> {
    let group = partage::ThreadGroup::new(size)?;
    let results = group.run(|comm| -> Result<RankResult> {
        let mut partitioner = GraphPartitioner::new(comm, AdjacencyList::new());
        partitioner.exchange = exchange;
        load(partitioner.adjacency_mut(), graph, comm.rank(), size);
        let mut strategy = strategy;
        partitioner.partition(&mut strategy)?;

        let adjacency = partitioner.adjacency();
        let missing = "partitioner has no result";
        Ok(RankResult {
            nodes: (0..adjacency.nodes())
                .map(|node| adjacency.node_index(node))
                .collect(),
            edges: (0..adjacency.edges())
                .map(|edge| adjacency.edge_index(edge))
                .collect(),
            node_destinations: partitioner.node_destinations().context(missing)?,
            ghost_node_destinations: partitioner.ghost_node_destinations().context(missing)?,
            edge_destinations: partitioner.edge_destinations().context(missing)?,
            ghost_edge_destinations: partitioner.ghost_edge_destinations().context(missing)?,
        })
    });

    let mut partition = Partition {
        node_destinations: vec![0; graph.nodes],
        ghost_node_destinations: vec![Vec::new(); graph.nodes],
        edge_destinations: vec![0; graph.edges.len()],
        ghost_edge_destinations: vec![0; graph.edges.len()],
    };
    for (rank, result) in results.into_iter().enumerate() {
        let result = result.with_context(|| format!("rank {rank} failed to partition"))?;
        let nodes = result.nodes.iter().zip(result.node_destinations);
        for ((node, destination), ghosts) in nodes.zip(result.ghost_node_destinations) {
            partition.node_destinations[*node] = destination;
            partition.ghost_node_destinations[*node] = ghosts;
        }
        let edges = result.edges.iter().zip(result.edge_destinations);
        for ((edge, primary), ghost) in edges.zip(result.ghost_edge_destinations) {
            partition.edge_destinations[*edge] = primary;
            partition.ghost_edge_destinations[*edge] = ghost;
        }
    }
    Ok(partition)
}

/// Print one `node destination ghosts` line per node, then one
/// `e node1 node2 primary ghost` line per edge.
///
/// Ghost ranks are comma-separated, and the field is left empty when the
/// node has no ghost copy.
pub fn write<W>(mut w: W, graph: &EdgeList, partition: &Partition) -> io::Result<()>
where
    W: io::Write,
{
    let nodes = partition
        .node_destinations
        .iter()
        .zip(&partition.ghost_node_destinations);
    for (node, (destination, ghosts)) in nodes.enumerate() {
        writeln!(w, "{node} {destination} {}", ghosts.iter().join(","))?;
    }
    let edges = graph
        .edges
        .iter()
        .zip(&partition.edge_destinations)
        .zip(&partition.ghost_edge_destinations);
    for (((node1, node2), primary), ghost) in edges {
        writeln!(w, "e {node1} {node2} {primary} {ghost}")?;
    }
    Ok(())
}
