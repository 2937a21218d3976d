use criterion::black_box;
use criterion::criterion_group;
use criterion::criterion_main;
use criterion::Criterion;
use partage::AdjacencyList;
use partage::Communicator as _;
use partage::GhostExchange;
use partage::GraphPartitioner;

/// A `side * side` grid, stored by rows in contiguous blocks.
fn grid<C>(comm: C, side: usize) -> GraphPartitioner<C, AdjacencyList>
where
    C: partage::Communicator,
{
    let nodes = side * side;
    let first = comm.rank() * nodes / comm.size();
    let last = (comm.rank() + 1) * nodes / comm.size();
    let mut partitioner = GraphPartitioner::with_capacity(comm, last - first, 2 * (last - first));
    let adjacency = partitioner.adjacency_mut();
    for node in first..last {
        adjacency.add_node(node);
        let (row, col) = (node / side, node % side);
        if col + 1 < side {
            adjacency.add_edge(2 * node, node, node + 1);
        }
        if row + 1 < side {
            adjacency.add_edge(2 * node + 1, node, node + side);
        }
    }
    partitioner
}

pub fn bench(c: &mut Criterion) {
    let side = 200;
    let mut group = c.benchmark_group("ghost_exchange");

    for size in [1, 2, 4, 8] {
        let ranks = partage::ThreadGroup::new(size).unwrap();
        for (name, exchange) in [
            ("round_robin", GhostExchange::RoundRobin),
            ("all_to_all", GhostExchange::AllToAll),
        ] {
            group.bench_function(format!("{name}/{size}"), |b| {
                b.iter(|| {
                    ranks.run(|comm| {
                        let mut partitioner = grid(comm, side).with_exchange(exchange);
                        partitioner
                            .partition(&mut partage::Cyclic)
                            .unwrap();
                        black_box(partitioner.ghost_node_destinations())
                    })
                })
            });
        }
    }
}

criterion_group!(benches, bench);
criterion_main!(benches);
