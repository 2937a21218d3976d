//! A distributed graph partitioning library that resolves the ghost boundary
//! of each part.
//!
//! # Crate Layout
//!
//! Partage runs on a group of ranks that all execute the same program, each
//! holding a piece of a graph. Ranks talk through the [`Communicator`] trait,
//! implemented by [`SingleProcess`], by the in-process [`ThreadGroup`], and by
//! `MpiComm` when the `mpi` feature is enabled.
//!
//! The [`GraphPartitioner`] takes the local piece of the graph, through the
//! [`AdjacencySource`] trait, and a [`PartitionStrategy`] that picks the
//! destination rank of each node. It then works out where edges go, and
//! which ranks need ghost copies of each node to hold every edge that
//! crosses a part boundary.
//!
//! Ranks share data through [`DistArray`]s, global arrays split in blocks
//! over the group, whose elements can be read and written from any rank.
//!
//! # Available strategies
//!
//! - [Stay], nodes stay where they are,
//! - [Block], contiguous ranges of global indices,
//! - [Cyclic], global indices dealt round-robin,
//! - [Random],
//! - [Explicit], from a lookup table,
//! - any closure that fills the destination slice.

#![warn(
    missing_copy_implementations,
    missing_debug_implementations,
    rust_2018_idioms
)]

mod adjacency;
mod comm;
mod dist_array;
mod error;
mod partitioner;
mod strategy;

pub use crate::adjacency::AdjacencyList;
pub use crate::adjacency::AdjacencySource;
pub use crate::comm::Communicator;
pub use crate::comm::Message;
#[cfg(feature = "mpi")]
pub use crate::comm::MpiComm;
pub use crate::comm::SingleProcess;
pub use crate::comm::ThreadComm;
pub use crate::comm::ThreadGroup;
pub use crate::dist_array::DistArray;
pub use crate::error::Error;
pub use crate::partitioner::GhostExchange;
pub use crate::partitioner::GraphPartitioner;
pub use crate::partitioner::State;
pub use crate::strategy::*;
