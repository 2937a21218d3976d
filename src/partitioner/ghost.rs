//! Aggregation of ghost node destinations contributed by every rank.

use crate::AdjacencySource;
use crate::Communicator;
use crate::DistArray;
use itertools::Itertools as _;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;

/// Marks an empty cell of the ghost table.
const NO_RANK: usize = usize::MAX;

/// How ranks pool the ghost destinations they found for each node.
///
/// Both protocols give exactly the same ghost sets, in the same order.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum GhostExchange {
    /// Ranks append their contributions to a distributed table one after the
    /// other. Needs as many rounds of collective reads and writes as there
    /// are ranks.
    #[default]
    RoundRobin,

    /// Every rank sends each contribution to the rank storing the node, in a
    /// single personalized all-to-all exchange.
    AllToAll,
}

/// A rank that needs a ghost copy of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[derive(bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub(crate) struct GhostPair {
    pub node: usize,
    pub rank: usize,
}

/// Turn-based append into a `[nodes, ranks]` table.
///
/// On its turn, a rank reads the whole count vector and the filled part of
/// the rows it contributes to, appends each of its pairs to the row of the
/// node unless the rank is already listed there, and writes both back. Rows
/// thus never hold more than one entry per rank.
///
/// Every read and write is collective: ranks waiting for their turn take
/// part with empty requests.
pub(crate) fn round_robin<C, A>(
    comm: &C,
    adjacency: &A,
    pairs: &BTreeSet<GhostPair>,
    global_nodes: usize,
) -> Vec<Vec<usize>>
where
    C: Communicator,
    A: AdjacencySource + ?Sized,
{
    let size = comm.size();
    let mut table = DistArray::new(
        comm,
        "ghost node destinations",
        [global_nodes, size],
        NO_RANK,
    );
    let mut count = DistArray::new(
        comm,
        "ghost node destination count",
        [global_nodes],
        0_usize,
    );
    let nodes: Vec<usize> = pairs.iter().map(|pair| pair.node).dedup().collect();

    for turn in 0..size {
        let active = turn == comm.rank();
        let hi = if active { global_nodes } else { 0 };

        let mut counts = count.get([0], [hi]);
        let cells: Vec<[usize; 2]> = if active {
            rows(&nodes, |node| counts[node])
        } else {
            Vec::new()
        };
        let listed = table.gather(&cells);
        let mut present: HashSet<(usize, usize)> = cells
            .iter()
            .zip(listed)
            .map(|([node, _], rank)| (*node, rank))
            .collect();

        let mut values = Vec::new();
        let mut indices = Vec::new();
        if active {
            for &GhostPair { node, rank } in pairs {
                if present.insert((node, rank)) {
                    values.push(rank);
                    indices.push([node, counts[node]]);
                    counts[node] += 1;
                }
            }
            tracing::debug!(turn, appended = values.len(), "appended ghost destinations");
        }
        table.scatter(&values, &indices);
        count.put([0], [hi], &counts);
    }

    let locals: Vec<usize> = (0..adjacency.nodes())
        .map(|local| adjacency.node_index(local))
        .collect();
    let local_indices: Vec<[usize; 1]> = locals.iter().map(|node| [*node]).collect();
    let counts = count.gather(&local_indices);
    let filled: HashMap<usize, usize> =
        locals.iter().copied().zip(counts.iter().copied()).collect();
    let mut listed = table.gather(&rows(&locals, |node| filled[&node])).into_iter();
    counts
        .into_iter()
        .map(|filled| listed.by_ref().take(filled).collect())
        .map(dedup_stable)
        .collect()
}

/// Indices of the filled cells of the given rows.
fn rows(nodes: &[usize], filled: impl Fn(usize) -> usize) -> Vec<[usize; 2]> {
    nodes
        .iter()
        .flat_map(|node| (0..filled(*node)).map(move |cell| [*node, cell]))
        .collect()
}

/// Single exchange where each pair goes to the home rank of its node.
///
/// `homes[i]` is the home rank of the node of the `i`-th pair.
pub(crate) fn all_to_all<C, A>(
    comm: &C,
    adjacency: &A,
    pairs: &BTreeSet<GhostPair>,
    homes: &[usize],
) -> Vec<Vec<usize>>
where
    C: Communicator,
    A: AdjacencySource + ?Sized,
{
    debug_assert_eq!(pairs.len(), homes.len());

    let mut outgoing = vec![Vec::new(); comm.size()];
    for (pair, home) in pairs.iter().zip(homes) {
        outgoing[*home].push(*pair);
    }
    let incoming = comm.all_to_all(outgoing);

    let locals: HashMap<usize, usize> = (0..adjacency.nodes())
        .map(|local| (adjacency.node_index(local), local))
        .collect();
    let mut ghosts = vec![Vec::new(); adjacency.nodes()];
    // Sources are visited in rank order, and each source sent its pairs in
    // ascending order, like the turns of the round-robin protocol.
    for GhostPair { node, rank } in incoming.into_iter().flatten() {
        let local = match locals.get(&node) {
            Some(local) => *local,
            None => panic!("received ghost destination for node {node}, not stored on this rank"),
        };
        ghosts[local].push(rank);
    }
    tracing::debug!(
        received = ghosts.iter().map(Vec::len).sum::<usize>(),
        "exchanged ghost destinations"
    );

    ghosts.into_iter().map(dedup_stable).collect()
}

/// Remove duplicates, keeping the first occurrence of each rank in place.
fn dedup_stable(ranks: Vec<usize>) -> Vec<usize> {
    ranks.into_iter().unique().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AdjacencyList;
    use crate::SingleProcess;
    use crate::ThreadGroup;

    #[test]
    fn test_dedup_stable() {
        assert_eq!(dedup_stable(vec![3, 1, 3, 0, 1]), [3, 1, 0]);
        assert!(dedup_stable(Vec::new()).is_empty());
    }

    #[test]
    fn test_pair_order() {
        let pairs: BTreeSet<_> = [
            GhostPair { node: 2, rank: 0 },
            GhostPair { node: 1, rank: 3 },
            GhostPair { node: 1, rank: 1 },
        ]
        .into_iter()
        .collect();
        let pairs: Vec<_> = pairs.into_iter().map(|p| (p.node, p.rank)).collect();
        assert_eq!(pairs, [(1, 1), (1, 3), (2, 0)]);
    }

    #[test]
    fn test_protocols_agree_on_one_rank() {
        let mut adjacency = AdjacencyList::new();
        for node in [2, 0, 1] {
            adjacency.add_node(node);
        }
        adjacency.ready();
        let pairs: BTreeSet<_> = [(0, 0), (2, 0), (0, 0)]
            .into_iter()
            .map(|(node, rank)| GhostPair { node, rank })
            .collect();

        let table = round_robin(&SingleProcess, &adjacency, &pairs, 3);
        let exchanged = all_to_all(&SingleProcess, &adjacency, &pairs, &[0, 0]);
        assert_eq!(table, [vec![0], vec![0], vec![]]);
        assert_eq!(table, exchanged);
    }

    #[test]
    fn test_turn_order() {
        // Rank 0 stores both nodes, every rank contributes destinations.
        let contributions = [
            vec![(1, 2)],
            vec![(0, 2), (1, 0)],
            vec![(0, 1), (1, 2), (0, 2)],
        ];
        let group = ThreadGroup::new(3).unwrap();
        let runs = group.run(|comm| {
            let mut adjacency = AdjacencyList::new();
            if comm.rank() == 0 {
                adjacency.add_node(0);
                adjacency.add_node(1);
            }
            adjacency.ready();
            let pairs: BTreeSet<_> = contributions[comm.rank()]
                .iter()
                .map(|&(node, rank)| GhostPair { node, rank })
                .collect();
            let homes = vec![0; pairs.len()];
            let table = round_robin(comm, &adjacency, &pairs, 2);
            let exchanged = all_to_all(comm, &adjacency, &pairs, &homes);
            (table, exchanged)
        });
        assert_eq!(runs[0].0, [vec![2, 1], vec![2, 0]]);
        for (table, exchanged) in runs {
            assert_eq!(table, exchanged);
        }
    }
}
