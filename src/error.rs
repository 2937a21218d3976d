use std::fmt;
use std::sync::Arc;

/// Errors raised while setting up a group or partitioning a graph.
///
/// Every variant returned by [`GraphPartitioner::partition`] is returned on
/// all ranks of the group, so callers can bail out without leaving another
/// rank stuck on a barrier.
///
/// [`GraphPartitioner::partition`]: crate::GraphPartitioner::partition
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A process group must contain at least one rank.
    EmptyGroup,

    /// The thread pool backing an in-process group could not be built.
    ThreadPool(Arc<rayon::ThreadPoolBuildError>),

    /// The distributed graph has no nodes or no edges.
    EmptyGraph { nodes: usize, edges: usize },

    /// A local node or edge endpoint refers to a global node index outside of
    /// the graph.
    NodeIndexOutOfRange { index: usize, nodes: usize },

    /// The partition strategy sent a node to a rank outside the group.
    DestinationOutOfRange {
        node: usize,
        destination: usize,
        size: usize,
    },

    /// The partition strategy failed on this rank.
    Strategy(Arc<dyn std::error::Error + Send + Sync>),

    /// Another rank failed, the whole collective operation is aborted.
    RemoteFailure { rank: usize },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::EmptyGroup => write!(f, "process group has no rank"),
            Error::ThreadPool(err) => write!(f, "failed to build the rank thread pool: {err}"),
            Error::EmptyGraph { nodes, edges } => write!(
                f,
                "cannot partition a graph without nodes ({nodes}) or edges ({edges})",
            ),
            Error::NodeIndexOutOfRange { index, nodes } => write!(
                f,
                "node index {index} is out of range, the graph has {nodes} nodes",
            ),
            Error::DestinationOutOfRange {
                node,
                destination,
                size,
            } => write!(
                f,
                "node {node} was sent to rank {destination}, but the group only has {size} ranks",
            ),
            Error::Strategy(err) => write!(f, "partition strategy failed: {err}"),
            Error::RemoteFailure { rank } => write!(f, "partitioning failed on rank {rank}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::ThreadPool(err) => Some(&**err),
            Error::Strategy(err) => Some(&**err),
            _ => None,
        }
    }
}
