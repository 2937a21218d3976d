//! Partition strategies decide which rank each node is sent to.
//!
//! The graph partitioner calls a strategy exactly once per run, on every
//! rank, and trusts nothing else about it than the destinations it fills.

use crate::AdjacencySource;
use std::convert::Infallible;
use std::fmt;

/// What a strategy knows about the graph when it runs on a rank.
pub struct Domain<'a, A: ?Sized> {
    /// The local part of the graph.
    pub adjacency: &'a A,

    /// The rank the strategy runs on.
    pub rank: usize,

    /// The number of ranks, destinations must be lower than this.
    pub size: usize,

    /// The number of nodes of the whole graph.
    pub global_nodes: usize,

    /// The number of edges of the whole graph.
    pub global_edges: usize,
}

impl<A: ?Sized> Clone for Domain<'_, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A: ?Sized> Copy for Domain<'_, A> {}

impl<A: ?Sized> fmt::Debug for Domain<'_, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .field("global_nodes", &self.global_nodes)
            .field("global_edges", &self.global_edges)
            .finish_non_exhaustive()
    }
}

/// The `PartitionStrategy` trait assigns a destination rank to the nodes
/// stored locally.
///
/// It is implemented by the strategies of this module and by closures taking
/// the same arguments as [`PartitionStrategy::destinations`].
pub trait PartitionStrategy<A: ?Sized> {
    /// Error details, should the strategy fail to run.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Write the destination of local node `n` in `destinations[n]`.
    ///
    /// `destinations` has one entry per local node and is zeroed beforehand.
    fn destinations(
        &mut self,
        destinations: &mut [usize],
        domain: Domain<'_, A>,
    ) -> Result<(), Self::Error>;
}

impl<A, F> PartitionStrategy<A> for F
where
    A: ?Sized,
    F: FnMut(&mut [usize], Domain<'_, A>),
{
    type Error = Infallible;

    fn destinations(
        &mut self,
        destinations: &mut [usize],
        domain: Domain<'_, A>,
    ) -> Result<(), Self::Error> {
        self(destinations, domain);
        Ok(())
    }
}

/// Keep every node on the rank that stores it.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stay;

impl<A> PartitionStrategy<A> for Stay
where
    A: AdjacencySource + ?Sized,
{
    type Error = Infallible;

    fn destinations(
        &mut self,
        destinations: &mut [usize],
        domain: Domain<'_, A>,
    ) -> Result<(), Self::Error> {
        destinations.fill(domain.rank);
        Ok(())
    }
}

/// Split the global node range into contiguous blocks, one per rank.
///
/// # Example
///
/// ```rust
/// use partage::AdjacencySource as _;
/// use partage::PartitionStrategy as _;
///
/// let mut adjacency = partage::AdjacencyList::new();
/// for node in [0, 5, 9] {
///     adjacency.add_node(node);
/// }
/// adjacency.ready();
///
/// let domain = partage::Domain {
///     adjacency: &adjacency,
///     rank: 0,
///     size: 2,
///     global_nodes: 10,
///     global_edges: 9,
/// };
/// let mut destinations = [0; 3];
/// partage::Block.destinations(&mut destinations, domain).unwrap();
/// assert_eq!(destinations, [0, 1, 1]);
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct Block;

impl<A> PartitionStrategy<A> for Block
where
    A: AdjacencySource + ?Sized,
{
    type Error = Infallible;

    fn destinations(
        &mut self,
        destinations: &mut [usize],
        domain: Domain<'_, A>,
    ) -> Result<(), Self::Error> {
        for (node, destination) in destinations.iter_mut().enumerate() {
            let global = domain.adjacency.node_index(node);
            *destination = global * domain.size / domain.global_nodes;
        }
        Ok(())
    }
}

/// Deal nodes to ranks like cards, by global index.
#[derive(Debug, Default, Clone, Copy)]
pub struct Cyclic;

impl<A> PartitionStrategy<A> for Cyclic
where
    A: AdjacencySource + ?Sized,
{
    type Error = Infallible;

    fn destinations(
        &mut self,
        destinations: &mut [usize],
        domain: Domain<'_, A>,
    ) -> Result<(), Self::Error> {
        for (node, destination) in destinations.iter_mut().enumerate() {
            *destination = domain.adjacency.node_index(node) % domain.size;
        }
        Ok(())
    }
}

/// Send nodes to ranks at random.
///
/// Runs are only reproducible if every rank seeds its generator the same way
/// across runs.
#[derive(Debug)]
pub struct Random<R> {
    pub rng: R,
}

impl<A, R> PartitionStrategy<A> for Random<R>
where
    A: ?Sized,
    R: rand::Rng,
{
    type Error = Infallible;

    fn destinations(
        &mut self,
        destinations: &mut [usize],
        domain: Domain<'_, A>,
    ) -> Result<(), Self::Error> {
        for destination in destinations {
            *destination = self.rng.gen_range(0..domain.size);
        }
        Ok(())
    }
}

/// Look destinations up in a table indexed by global node.
#[derive(Debug, Default, Clone)]
pub struct Explicit {
    pub destinations: Vec<usize>,
}

/// Error returned by [`Explicit`] when its table is too short.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingNode {
    pub node: usize,
}

impl fmt::Display for MissingNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no destination given for node {}", self.node)
    }
}

impl std::error::Error for MissingNode {}

impl<A> PartitionStrategy<A> for Explicit
where
    A: AdjacencySource + ?Sized,
{
    type Error = MissingNode;

    fn destinations(
        &mut self,
        destinations: &mut [usize],
        domain: Domain<'_, A>,
    ) -> Result<(), Self::Error> {
        for (node, destination) in destinations.iter_mut().enumerate() {
            let global = domain.adjacency.node_index(node);
            *destination = *self
                .destinations
                .get(global)
                .ok_or(MissingNode { node: global })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AdjacencyList;
    use rand::SeedableRng as _;

    fn adjacency(nodes: &[usize]) -> AdjacencyList {
        let mut adjacency = AdjacencyList::new();
        for node in nodes {
            adjacency.add_node(*node);
        }
        adjacency.ready();
        adjacency
    }

    fn domain(adjacency: &AdjacencyList, rank: usize, size: usize) -> Domain<'_, AdjacencyList> {
        Domain {
            adjacency,
            rank,
            size,
            global_nodes: 8,
            global_edges: 7,
        }
    }

    #[test]
    fn test_stay() {
        let adjacency = adjacency(&[1, 2, 3]);
        let mut destinations = [0; 3];
        Stay.destinations(&mut destinations, domain(&adjacency, 2, 4))
            .unwrap();
        assert_eq!(destinations, [2, 2, 2]);
    }

    #[test]
    fn test_block_and_cyclic() {
        let adjacency = adjacency(&[0, 1, 3, 4, 7]);
        let mut destinations = [0; 5];
        Block
            .destinations(&mut destinations, domain(&adjacency, 0, 4))
            .unwrap();
        assert_eq!(destinations, [0, 0, 1, 2, 3]);
        Cyclic
            .destinations(&mut destinations, domain(&adjacency, 0, 3))
            .unwrap();
        assert_eq!(destinations, [0, 1, 0, 1, 1]);
    }

    #[test]
    fn test_random_in_range() {
        let adjacency = adjacency(&[0, 1, 2, 3, 4, 5, 6, 7]);
        let mut destinations = [0; 8];
        let mut strategy = Random {
            rng: rand::rngs::StdRng::seed_from_u64(5),
        };
        strategy
            .destinations(&mut destinations, domain(&adjacency, 1, 3))
            .unwrap();
        assert!(destinations.iter().all(|destination| *destination < 3));
    }

    #[test]
    fn test_explicit() {
        let adjacency = adjacency(&[2, 0]);
        let mut destinations = [0; 2];
        let mut strategy = Explicit {
            destinations: vec![1, 0, 3],
        };
        strategy
            .destinations(&mut destinations, domain(&adjacency, 0, 4))
            .unwrap();
        assert_eq!(destinations, [3, 1]);

        let adjacency = self::adjacency(&[5]);
        let err = strategy
            .destinations(&mut destinations[..1], domain(&adjacency, 0, 4))
            .unwrap_err();
        assert_eq!(err, MissingNode { node: 5 });
    }

    #[test]
    fn test_closure() {
        let adjacency = adjacency(&[0, 1]);
        let mut destinations = [0; 2];
        let mut strategy = |destinations: &mut [usize], domain: Domain<'_, AdjacencyList>| {
            destinations.fill(domain.size - 1);
        };
        strategy
            .destinations(&mut destinations, domain(&adjacency, 0, 2))
            .unwrap();
        assert_eq!(destinations, [1, 1]);
    }
}
