//! Process groups and the collectives the partitioner relies on.
//!
//! Every method of [`Communicator`] except [`Communicator::rank`] and
//! [`Communicator::size`] is collective: all ranks of the group must call it,
//! in the same order, with values of the same type.
//!
//! Ranks share no memory. Everything they exchange goes through these
//! collectives, as plain data.

#[cfg(feature = "mpi")]
mod mpi;
mod thread;

#[cfg(feature = "mpi")]
pub use self::mpi::MpiComm;
pub use self::thread::ThreadComm;
pub use self::thread::ThreadGroup;

/// Plain data that can be sent to another rank as bytes.
pub trait Message: bytemuck::Pod + Send + Sync {}

impl<T> Message for T where T: bytemuck::Pod + Send + Sync {}

/// A fixed set of cooperating processes executing the same program.
pub trait Communicator {
    /// The rank of the calling process, in `0..size()`.
    fn rank(&self) -> usize;

    /// The number of processes in the group.
    fn size(&self) -> usize;

    /// Block until every rank of the group has reached this barrier.
    fn barrier(&self);

    /// Collect any number of values from every rank. Element `r` of the result
    /// holds the values given by rank `r`.
    fn all_gather_varcount<T>(&self, values: &[T]) -> Vec<Vec<T>>
    where
        T: Message;

    /// Personalized all-to-all exchange.
    ///
    /// `outgoing[r]` is sent to rank `r`; element `r` of the result is what
    /// rank `r` sent to the caller.
    ///
    /// # Panics
    ///
    /// Panics if `outgoing` does not have one bucket per rank.
    fn all_to_all<T>(&self, outgoing: Vec<Vec<T>>) -> Vec<Vec<T>>
    where
        T: Message;

    /// Collect one value from every rank. Element `r` of the result is the
    /// value given by rank `r`.
    fn all_gather<T>(&self, value: T) -> Vec<T>
    where
        T: Message,
    {
        self.all_gather_varcount(&[value])
            .into_iter()
            .map(|values| values[0])
            .collect()
    }

    /// Sum a local count across the group.
    fn all_reduce_sum(&self, local: usize) -> usize {
        self.all_gather(local).into_iter().sum()
    }
}

impl<C> Communicator for &C
where
    C: Communicator,
{
    fn rank(&self) -> usize {
        C::rank(self)
    }

    fn size(&self) -> usize {
        C::size(self)
    }

    fn barrier(&self) {
        C::barrier(self)
    }

    fn all_gather_varcount<T>(&self, values: &[T]) -> Vec<Vec<T>>
    where
        T: Message,
    {
        C::all_gather_varcount(self, values)
    }

    fn all_to_all<T>(&self, outgoing: Vec<Vec<T>>) -> Vec<Vec<T>>
    where
        T: Message,
    {
        C::all_to_all(self, outgoing)
    }

    fn all_gather<T>(&self, value: T) -> Vec<T>
    where
        T: Message,
    {
        C::all_gather(self, value)
    }

    fn all_reduce_sum(&self, local: usize) -> usize {
        C::all_reduce_sum(self, local)
    }
}

/// A group made of the calling process alone.
///
/// Every collective returns immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn all_gather_varcount<T>(&self, values: &[T]) -> Vec<Vec<T>>
    where
        T: Message,
    {
        vec![values.to_vec()]
    }

    fn all_to_all<T>(&self, outgoing: Vec<Vec<T>>) -> Vec<Vec<T>>
    where
        T: Message,
    {
        assert_eq!(outgoing.len(), 1, "all_to_all needs one bucket per rank");
        outgoing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_process() {
        let comm = SingleProcess;
        assert_eq!(comm.rank(), 0);
        assert_eq!(comm.size(), 1);
        assert_eq!(comm.all_reduce_sum(42), 42);
        assert_eq!(comm.all_gather(3_u8), [3]);
        assert_eq!(comm.all_gather_varcount(&[1_u32, 2]), [vec![1, 2]]);
        assert_eq!(comm.all_to_all(vec![vec![1_usize, 2]]), [vec![1, 2]]);
    }

    #[test]
    #[should_panic]
    fn test_single_process_all_to_all_bucket_count() {
        SingleProcess.all_to_all(vec![vec![1_usize], vec![2]]);
    }
}
