//! Process groups backed by MPI.
//!
//! The caller initializes MPI and keeps the universe alive while partitioning:
//!
//! ```ignore
//! let universe = mpi::initialize().expect("MPI init failed");
//! let comm = partage::MpiComm::new(&universe);
//! ```

use super::Communicator;
use super::Message;
use ::mpi::collective::SystemOperation;
use ::mpi::datatype::Partition;
use ::mpi::datatype::PartitionMut;
use ::mpi::environment::Universe;
use ::mpi::topology::SimpleCommunicator;
use ::mpi::traits::Communicator as _;
use ::mpi::traits::CommunicatorCollectives as _;
use ::mpi::Count;
use std::fmt;
use std::mem;

/// A group made of the processes of the MPI world communicator.
///
/// Values are sent as raw bytes, so ranks must agree on the layout of the
/// types they exchange, which holds for a single binary run over MPI.
pub struct MpiComm {
    world: SimpleCommunicator,
}

impl fmt::Debug for MpiComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MpiComm")
            .field("rank", &self.world.rank())
            .field("size", &self.world.size())
            .finish()
    }
}

impl MpiComm {
    pub fn new(universe: &Universe) -> MpiComm {
        MpiComm {
            world: universe.world(),
        }
    }
}

/// Offsets of each rank's bytes in a receive buffer.
fn displacements(counts: &[Count]) -> Vec<Count> {
    counts
        .iter()
        .scan(0, |offset, count| {
            let displacement = *offset;
            *offset += count;
            Some(displacement)
        })
        .collect()
}

fn byte_count<T>(len: usize) -> Count {
    match Count::try_from(len * mem::size_of::<T>()) {
        Ok(count) => count,
        Err(_) => panic!("message of {len} elements is too large for MPI"),
    }
}

/// Split a receive buffer back into one vector per rank.
fn split<T>(buffer: &[u8], counts: &[Count], displs: &[Count]) -> Vec<Vec<T>>
where
    T: Message,
{
    counts
        .iter()
        .zip(displs)
        .map(|(count, displ)| {
            let start = *displ as usize;
            bytemuck::pod_collect_to_vec(&buffer[start..start + *count as usize])
        })
        .collect()
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    fn size(&self) -> usize {
        self.world.size() as usize
    }

    fn barrier(&self) {
        self.world.barrier();
    }

    fn all_gather_varcount<T>(&self, values: &[T]) -> Vec<Vec<T>>
    where
        T: Message,
    {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let local = byte_count::<T>(values.len());
        let mut counts = vec![0; self.size()];
        self.world.all_gather_into(&local, &mut counts[..]);

        let displs = displacements(&counts);
        let total = counts.iter().map(|count| *count as usize).sum();
        let mut buffer = vec![0_u8; total];
        {
            let mut partition = PartitionMut::new(&mut buffer[..], &counts[..], &displs[..]);
            self.world.all_gather_varcount_into(bytes, &mut partition);
        }
        split(&buffer, &counts, &displs)
    }

    fn all_to_all<T>(&self, outgoing: Vec<Vec<T>>) -> Vec<Vec<T>>
    where
        T: Message,
    {
        assert_eq!(
            outgoing.len(),
            self.size(),
            "all_to_all needs one bucket per rank",
        );
        let send_counts: Vec<Count> = outgoing
            .iter()
            .map(|bucket| byte_count::<T>(bucket.len()))
            .collect();
        let send_displs = displacements(&send_counts);
        let send: Vec<u8> = outgoing
            .iter()
            .flat_map(|bucket| bytemuck::cast_slice::<T, u8>(bucket).iter().copied())
            .collect();

        let mut recv_counts = vec![0; self.size()];
        self.world
            .all_to_all_into(&send_counts[..], &mut recv_counts[..]);
        let recv_displs = displacements(&recv_counts);
        let total = recv_counts.iter().map(|count| *count as usize).sum();
        let mut recv = vec![0_u8; total];
        {
            let send = Partition::new(&send[..], &send_counts[..], &send_displs[..]);
            let mut recv = PartitionMut::new(&mut recv[..], &recv_counts[..], &recv_displs[..]);
            self.world.all_to_all_varcount_into(&send, &mut recv);
        }
        split(&recv, &recv_counts, &recv_displs)
    }

    fn all_reduce_sum(&self, local: usize) -> usize {
        let local = local as u64;
        let mut global = 0_u64;
        self.world
            .all_reduce_into(&local, &mut global, SystemOperation::sum());
        global as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_displacements() {
        assert_eq!(displacements(&[3, 0, 5, 1]), [0, 3, 3, 8]);
        assert!(displacements(&[]).is_empty());
    }

    #[test]
    fn test_split() {
        let values = [1_u32, 2, 3];
        let bytes: &[u8] = bytemuck::cast_slice(&values);
        let parts: Vec<Vec<u32>> = split(bytes, &[4, 0, 8], &[0, 4, 4]);
        assert_eq!(parts, [vec![1], vec![], vec![2, 3]]);
    }
}
