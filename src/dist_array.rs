//! Arrays addressable by global index from every rank of a group.

use crate::Communicator;
use crate::Message;
use itertools::Itertools as _;
use std::fmt;

/// A `D`-dimensional array of fixed global shape, split over a process group.
///
/// Elements are laid out in row-major order, and each rank stores one
/// contiguous block of that layout. Any rank can read and write any element:
/// requests are routed to the rank storing it.
///
/// Every operation is collective, including [`DistArray::new`]. Ranks with
/// nothing to read or write take part with empty requests. A write is visible
/// to every operation that follows it, on all ranks. Concurrent writes from
/// different ranks to the same element in the same call are not ordered.
///
/// Ranges are half-open.
///
/// # Panics
///
/// Every operation panics when given an index outside of the array's shape.
/// This is a contract violation, not a recoverable error.
///
/// # Example
///
/// ```rust
/// use partage::Communicator as _;
/// use partage::DistArray;
///
/// # fn main() -> Result<(), partage::Error> {
/// let group = partage::ThreadGroup::new(3)?;
/// let views = group.run(|comm| {
///     let mut array = DistArray::new(comm, "ranks", [3], 0);
///     array.scatter(&[comm.rank() + 1], &[[comm.rank()]]);
///     array.get([0], [3])
/// });
/// assert!(views.iter().all(|view| view == &[1, 2, 3]));
/// # Ok(())
/// # }
/// ```
pub struct DistArray<C, T, const D: usize>
where
    C: Communicator,
{
    comm: C,
    name: String,
    shape: [usize; D],
    /// `starts[r]` is the first offset stored on rank `r`, the last entry is
    /// the length of the array.
    starts: Vec<usize>,
    local: Vec<T>,
}

impl<C, T, const D: usize> fmt::Debug for DistArray<C, T, D>
where
    C: Communicator,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistArray")
            .field("name", &self.name)
            .field("shape", &self.shape)
            .field("local", &self.local.len())
            .finish_non_exhaustive()
    }
}

impl<C, T, const D: usize> DistArray<C, T, D>
where
    C: Communicator,
    T: Message,
{
    /// Collectively create an array of the given shape, with every element
    /// set to `fill`.
    pub fn new(comm: C, name: impl Into<String>, shape: [usize; D], fill: T) -> Self {
        let name = name.into();
        let len: usize = shape.iter().product();
        let size = comm.size();
        let starts: Vec<usize> = (0..=size).map(|rank| len * rank / size).collect();
        let rank = comm.rank();
        let local = vec![fill; starts[rank + 1] - starts[rank]];
        tracing::trace!(
            rank,
            name = %name,
            ?shape,
            local = local.len(),
            "created distributed array"
        );
        comm.barrier();
        DistArray {
            comm,
            name,
            shape,
            starts,
            local,
        }
    }

    /// The global shape of the array.
    pub fn shape(&self) -> [usize; D] {
        self.shape
    }

    /// The total number of elements.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for every rank.
    pub fn sync(&self) {
        self.comm.barrier();
    }

    /// Write `values[i]` at `indices[i]`.
    pub fn scatter(&mut self, values: &[T], indices: &[[usize; D]]) {
        assert_eq!(
            values.len(),
            indices.len(),
            "{}: scatter needs one value per index",
            self.name,
        );
        let offsets: Vec<usize> = indices.iter().map(|index| self.offset(*index)).collect();
        self.write(&offsets, values);
    }

    /// Read the elements at `indices`.
    pub fn gather(&self, indices: &[[usize; D]]) -> Vec<T> {
        let offsets: Vec<usize> = indices.iter().map(|index| self.offset(*index)).collect();
        self.read(&offsets)
    }

    /// Read the block `lo <= index < hi`.
    pub fn get(&self, lo: [usize; D], hi: [usize; D]) -> Vec<T> {
        let offsets = self.block(lo, hi);
        self.read(&offsets)
    }

    /// Overwrite the block `lo <= index < hi` with `values`.
    pub fn put(&mut self, lo: [usize; D], hi: [usize; D], values: &[T]) {
        let offsets = self.block(lo, hi);
        assert_eq!(
            offsets.len(),
            values.len(),
            "{}: block {lo:?}..{hi:?} does not match the given values",
            self.name,
        );
        self.write(&offsets, values);
    }

    /// Set every element to `value`.
    pub fn fill(&mut self, value: T) {
        self.local.fill(value);
        self.comm.barrier();
    }

    /// The rank storing the element at `offset`.
    fn owner(&self, offset: usize) -> usize {
        // Ranks storing nothing share their start with the next rank, the
        // owner is the last rank starting at or before `offset`.
        self.starts.partition_point(|start| *start <= offset) - 1
    }

    fn write(&mut self, offsets: &[usize], values: &[T]) {
        let size = self.comm.size();
        let mut targets = vec![Vec::new(); size];
        let mut contents = vec![Vec::new(); size];
        for (offset, value) in offsets.iter().zip(values) {
            let owner = self.owner(*offset);
            targets[owner].push(*offset);
            contents[owner].push(*value);
        }
        let targets = self.comm.all_to_all(targets);
        let contents = self.comm.all_to_all(contents);

        let first = self.starts[self.comm.rank()];
        for (offsets, values) in targets.into_iter().zip(contents) {
            for (offset, value) in offsets.into_iter().zip(values) {
                self.local[offset - first] = value;
            }
        }
    }

    fn read(&self, offsets: &[usize]) -> Vec<T> {
        let size = self.comm.size();
        let mut requests = vec![Vec::new(); size];
        // Where the answer to each offset will be found.
        let mut slots = Vec::with_capacity(offsets.len());
        for offset in offsets {
            let owner = self.owner(*offset);
            slots.push((owner, requests[owner].len()));
            requests[owner].push(*offset);
        }
        let requests = self.comm.all_to_all(requests);

        let first = self.starts[self.comm.rank()];
        let replies = requests
            .into_iter()
            .map(|offsets| {
                offsets
                    .into_iter()
                    .map(|offset| self.local[offset - first])
                    .collect()
            })
            .collect();
        let replies: Vec<Vec<T>> = self.comm.all_to_all(replies);

        slots
            .into_iter()
            .map(|(owner, position)| replies[owner][position])
            .collect()
    }

    fn offset(&self, index: [usize; D]) -> usize {
        let mut offset = 0;
        for (i, n) in index.iter().zip(self.shape) {
            assert!(
                *i < n,
                "{}: index {index:?} out of bounds for shape {:?}",
                self.name,
                self.shape,
            );
            offset = offset * n + i;
        }
        offset
    }

    /// Row-major offsets of the elements of a block.
    fn block(&self, lo: [usize; D], hi: [usize; D]) -> Vec<usize> {
        for ((l, h), n) in lo.iter().zip(hi).zip(self.shape) {
            assert!(
                *l <= h && h <= n,
                "{}: block {lo:?}..{hi:?} out of bounds for shape {:?}",
                self.name,
                self.shape,
            );
        }
        lo.iter()
            .zip(hi)
            .map(|(l, h)| *l..h)
            .multi_cartesian_product()
            .map(|index| {
                index
                    .into_iter()
                    .zip(self.shape)
                    .fold(0, |offset, (i, n)| offset * n + i)
            })
            .collect()
    }
}

impl<C, T, const D: usize> Drop for DistArray<C, T, D>
where
    C: Communicator,
{
    fn drop(&mut self) {
        tracing::trace!(
            rank = self.comm.rank(),
            name = %self.name,
            "destroyed distributed array"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SingleProcess;
    use crate::ThreadGroup;

    #[test]
    fn test_scatter_gather() {
        let mut array = DistArray::new(SingleProcess, "a", [6], 0);
        array.scatter(&[5, 3, 1], &[[4], [0], [2]]);
        assert_eq!(array.gather(&[[0], [1], [2], [3], [4], [5]]), [3, 0, 1, 0, 5, 0]);
        assert!(array.gather(&[]).is_empty());
    }

    #[test]
    fn test_get_put_2d() {
        let mut array = DistArray::new(SingleProcess, "table", [3, 4], -1_i32);
        array.put([1, 1], [3, 3], &[1, 2, 3, 4]);
        assert_eq!(
            array.get([0, 0], [3, 4]),
            [-1, -1, -1, -1, -1, 1, 2, -1, -1, 3, 4, -1],
        );
        assert_eq!(array.get([2, 0], [3, 4]), [-1, 3, 4, -1]);
        assert_eq!(array.gather(&[[1, 2], [2, 1]]), [2, 3]);
        assert!(array.get([1, 2], [1, 4]).is_empty());
    }

    #[test]
    fn test_fill() {
        let mut array = DistArray::new(SingleProcess, "a", [2, 2], 1_u8);
        assert_eq!(array.len(), 4);
        assert_eq!(array.shape(), [2, 2]);
        array.fill(9);
        assert_eq!(array.get([0, 0], [2, 2]), [9; 4]);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_scatter_out_of_bounds() {
        let mut array = DistArray::new(SingleProcess, "a", [3], 0);
        array.scatter(&[1], &[[3]]);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_gather_out_of_bounds_2d() {
        let array = DistArray::new(SingleProcess, "a", [3, 2], 0);
        array.gather(&[[0, 2]]);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_inverted_block() {
        let array = DistArray::new(SingleProcess, "a", [3], 0);
        array.get([2], [1]);
    }

    #[test]
    #[should_panic(expected = "does not match")]
    fn test_put_length_mismatch() {
        let mut array = DistArray::new(SingleProcess, "a", [3], 0);
        array.put([0], [2], &[1, 2, 3]);
    }

    #[test]
    fn test_blocks() {
        let group = ThreadGroup::new(4).unwrap();
        let blocks = group.run(|comm| {
            let array = DistArray::new(comm, "a", [2, 3], 0_u8);
            let owners: Vec<usize> = (0..6).map(|offset| array.owner(offset)).collect();
            (array.local.len(), owners)
        });
        let locals: Vec<usize> = blocks.iter().map(|(local, _)| *local).collect();
        assert_eq!(locals, [1, 2, 1, 2]);
        for (_, owners) in blocks {
            assert_eq!(owners, [0, 1, 1, 2, 3, 3]);
        }
    }

    #[test]
    fn test_fewer_elements_than_ranks() {
        let group = ThreadGroup::new(4).unwrap();
        let views = group.run(|comm| {
            let mut array = DistArray::new(comm, "a", [2], 0);
            if comm.rank() == 3 {
                array.scatter(&[7, 8], &[[0], [1]]);
            } else {
                array.scatter(&[], &[]);
            }
            array.get([0], [2])
        });
        assert!(views.iter().all(|view| view == &[7, 8]));
    }

    #[test]
    fn test_shared_between_ranks() {
        let group = ThreadGroup::new(4).unwrap();
        let views = group.run(|comm| {
            let mut array = DistArray::new(comm, "a", [4, 2], 0);
            let rank = comm.rank();
            array.put([rank, 0], [rank + 1, 2], &[rank, 10 * rank]);
            array.get([0, 0], [4, 2])
        });
        for view in views {
            assert_eq!(view, [0, 0, 1, 10, 2, 20, 3, 30]);
        }
    }

    #[test]
    fn test_one_sided_turns() {
        // Ranks read and write one after the other, idle ranks send empty
        // requests.
        let group = ThreadGroup::new(3).unwrap();
        let views = group.run(|comm| {
            let mut array = DistArray::new(comm, "a", [1], 0_usize);
            for turn in 0..comm.size() {
                let active = turn == comm.rank();
                let hi = if active { 1 } else { 0 };
                let current = array.get([0], [hi]);
                let next: Vec<usize> = current.iter().map(|sum| sum * 10 + turn + 1).collect();
                array.put([0], [hi], &next);
            }
            array.gather(&[[0]])
        });
        assert!(views.iter().all(|view| view == &[123]));
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn test_out_of_bounds_aborts_group() {
        let group = ThreadGroup::new(2).unwrap();
        group.run(|comm| {
            let mut array = DistArray::new(comm, "a", [2], 0);
            let index = if comm.rank() == 1 { 7 } else { 0 };
            array.scatter(&[1], &[[index]]);
            array.get([0], [2])
        });
    }
}
