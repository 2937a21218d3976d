use super::Communicator;
use super::Message;
use crate::Error;
use std::any::Any;
use std::fmt;
use std::mem;
use std::panic;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

type Slot = Option<Box<dyn Any + Send>>;

/// Panic payload of the ranks woken up because another rank panicked.
struct Aborted;

/// A barrier that can be torn down when a rank panics.
struct Gate {
    waiting: usize,
    generation: usize,
    aborted: bool,
}

/// State shared by all the ranks of a [`ThreadGroup`].
struct Shared {
    size: usize,
    gate: Mutex<Gate>,
    opened: Condvar,
    /// One mailbox per rank, written by its owner during a collective.
    slots: Mutex<Vec<Slot>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Poisoning only happens when a rank panics, and the group is aborted then.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn wait(&self) {
        let mut gate = lock(&self.gate);
        if gate.aborted {
            drop(gate);
            panic::panic_any(Aborted);
        }
        gate.waiting += 1;
        if gate.waiting == self.size {
            gate.waiting = 0;
            gate.generation += 1;
            self.opened.notify_all();
            return;
        }
        let generation = gate.generation;
        while gate.generation == generation && !gate.aborted {
            gate = self
                .opened
                .wait(gate)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if gate.generation == generation {
            drop(gate);
            panic::panic_any(Aborted);
        }
    }

    /// Wake every rank waiting on the barrier, and make them panic.
    fn abort(&self) {
        lock(&self.gate).aborted = true;
        self.opened.notify_all();
    }
}

/// An in-process group where each rank runs on its own thread.
///
/// Ranks are the threads of a dedicated rayon pool with exactly one thread per
/// rank, so a rank blocked on a barrier never prevents another rank from
/// making progress. Ranks only communicate through [`Communicator`]
/// collectives, the same way processes of a distributed job would.
///
/// # Example
///
/// ```rust
/// use partage::Communicator as _;
///
/// # fn main() -> Result<(), partage::Error> {
/// let group = partage::ThreadGroup::new(4)?;
/// let sums = group.run(|comm| comm.all_reduce_sum(comm.rank()));
/// assert_eq!(sums, [6, 6, 6, 6]);
/// # Ok(())
/// # }
/// ```
pub struct ThreadGroup {
    size: usize,
    pool: rayon::ThreadPool,
}

impl fmt::Debug for ThreadGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadGroup")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl ThreadGroup {
    /// Build a group of `size` ranks.
    pub fn new(size: usize) -> Result<ThreadGroup, Error> {
        if size == 0 {
            return Err(Error::EmptyGroup);
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(size)
            .thread_name(|index| format!("rank-{index}"))
            .build()
            .map_err(|err| Error::ThreadPool(Arc::new(err)))?;
        Ok(ThreadGroup { size, pool })
    }

    /// The number of ranks in the group.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Run `op` once on every rank and return the results in rank order.
    ///
    /// # Panics
    ///
    /// If `op` panics on a rank, the whole group is aborted: ranks waiting on
    /// a collective, or reaching one later, panic as well. Once every rank is
    /// done, the first panic is resumed on the caller.
    pub fn run<F, R>(&self, op: F) -> Vec<R>
    where
        F: Fn(&ThreadComm) -> R + Sync,
        R: Send,
    {
        let shared = Arc::new(Shared {
            size: self.size,
            gate: Mutex::new(Gate {
                waiting: 0,
                generation: 0,
                aborted: false,
            }),
            opened: Condvar::new(),
            slots: Mutex::new((0..self.size).map(|_| None).collect()),
        });
        let outcomes = self.pool.broadcast(|ctx| {
            let comm = ThreadComm {
                rank: ctx.index(),
                size: self.size,
                shared: Arc::clone(&shared),
            };
            panic::catch_unwind(panic::AssertUnwindSafe(|| op(&comm))).map_err(|payload| {
                if !payload.is::<Aborted>() {
                    tracing::warn!(rank = comm.rank, "rank panicked, aborting the group");
                }
                comm.shared.abort();
                payload
            })
        });

        let mut results = Vec::with_capacity(self.size);
        let mut panics = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(result) => results.push(result),
                Err(payload) => panics.push(payload),
            }
        }
        if !panics.is_empty() {
            let first = panics
                .iter()
                .position(|payload| !payload.is::<Aborted>())
                .unwrap_or(0);
            panic::resume_unwind(panics.swap_remove(first));
        }
        results
    }
}

/// The communicator handed to each rank of a [`ThreadGroup`].
pub struct ThreadComm {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

impl fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl ThreadComm {
    /// Publish `value` in this rank's mailbox, then wait for everyone else.
    fn post<T>(&self, value: T)
    where
        T: Send + 'static,
    {
        lock(&self.shared.slots)[self.rank] = Some(Box::new(value));
        self.shared.wait();
    }

    /// Wait until every rank is done reading, then empty this rank's mailbox.
    fn retract(&self) {
        self.shared.wait();
        lock(&self.shared.slots)[self.rank] = None;
    }
}

fn downcast_mut<T>(slot: &mut Slot) -> &mut T
where
    T: 'static,
{
    match slot.as_mut().and_then(|value| value.downcast_mut::<T>()) {
        Some(value) => value,
        None => panic!(
            "ranks diverged: collective expected a {}",
            std::any::type_name::<T>(),
        ),
    }
}

impl Communicator for ThreadComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        self.shared.wait();
    }

    fn all_gather_varcount<T>(&self, values: &[T]) -> Vec<Vec<T>>
    where
        T: Message,
    {
        self.post(values.to_vec());
        let gathered = lock(&self.shared.slots)
            .iter_mut()
            .map(|slot| downcast_mut::<Vec<T>>(slot).clone())
            .collect();
        self.retract();
        gathered
    }

    fn all_to_all<T>(&self, outgoing: Vec<Vec<T>>) -> Vec<Vec<T>>
    where
        T: Message,
    {
        assert_eq!(
            outgoing.len(),
            self.size,
            "all_to_all needs one bucket per rank",
        );
        self.post(outgoing);
        // Each rank only moves out its own column.
        let incoming = lock(&self.shared.slots)
            .iter_mut()
            .map(|slot| mem::take(&mut downcast_mut::<Vec<Vec<T>>>(slot)[self.rank]))
            .collect();
        self.retract();
        incoming
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_group() {
        assert!(matches!(ThreadGroup::new(0), Err(Error::EmptyGroup)));
    }

    #[test]
    fn test_ranks() {
        let group = ThreadGroup::new(5).unwrap();
        let ranks = group.run(|comm| (comm.rank(), comm.size()));
        assert_eq!(ranks, [(0, 5), (1, 5), (2, 5), (3, 5), (4, 5)]);
    }

    #[test]
    fn test_all_gather() {
        let group = ThreadGroup::new(3).unwrap();
        let gathered = group.run(|comm| {
            let first = comm.all_gather(comm.rank() * 10);
            let second = comm.all_gather_varcount(&vec![comm.rank() as u8; comm.rank()][..]);
            (first, second)
        });
        for (first, second) in gathered {
            assert_eq!(first, [0, 10, 20]);
            assert_eq!(second, [vec![], vec![1], vec![2, 2]]);
        }
    }

    #[test]
    fn test_all_reduce_sum() {
        let group = ThreadGroup::new(4).unwrap();
        let sums = group.run(|comm| comm.all_reduce_sum(comm.rank() + 1));
        assert_eq!(sums, [10; 4]);
    }

    #[test]
    fn test_all_to_all() {
        let group = ThreadGroup::new(3).unwrap();
        let received = group.run(|comm| {
            // rank r sends [r, dst] to every dst, and nothing to itself.
            let outgoing = (0..comm.size())
                .map(|dst| {
                    if dst == comm.rank() {
                        Vec::new()
                    } else {
                        vec![[comm.rank(), dst]]
                    }
                })
                .collect();
            comm.all_to_all(outgoing)
        });
        for (rank, incoming) in received.into_iter().enumerate() {
            for (src, bucket) in incoming.into_iter().enumerate() {
                if src == rank {
                    assert!(bucket.is_empty());
                } else {
                    assert_eq!(bucket, [[src, rank]]);
                }
            }
        }
    }

    #[test]
    #[should_panic(expected = "rank 1 gave up")]
    fn test_panic_aborts_group() {
        let group = ThreadGroup::new(3).unwrap();
        group.run(|comm| {
            if comm.rank() == 1 {
                panic!("rank 1 gave up");
            }
            comm.barrier();
            comm.all_reduce_sum(1)
        });
    }

    #[test]
    fn test_group_usable_after_abort() {
        let group = ThreadGroup::new(2).unwrap();
        let aborted = panic::catch_unwind(panic::AssertUnwindSafe(|| {
            group.run(|comm| {
                if comm.rank() == 0 {
                    panic!("rank 0 gave up");
                }
                comm.barrier();
            })
        }));
        assert!(aborted.is_err());
        assert_eq!(group.run(|comm| comm.all_reduce_sum(1)), [2, 2]);
    }
}
