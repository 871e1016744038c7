//! All-gather of variable-length vectors across a group of cooperating
//! processes.
//!
//! Every participant contributes a slice of fixed-size elements and receives
//! the concatenation of all contributions, ordered by rank. The group is
//! always passed in explicitly as a [`CommGroup`].
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::pin::Pin;

mod error;
mod gather;
mod local;
#[cfg(feature = "mpi")]
mod mpi;

pub use error::{GatherError, Result};
pub use gather::{gather_all, gather_all_async};
pub use local::{local_groups, LocalCommGroup};
#[cfg(feature = "mpi")]
pub use mpi::{init_standard_mpi, MpiCommGroup};

pub trait DataType: Serialize + DeserializeOwned + Default + Clone {}

impl<T> DataType for T where T: Serialize + DeserializeOwned + Default + Clone {}

/// Future returned by the collective primitives of a [`CommGroup`].
pub type CommFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a>>;

pub trait CommGroup {
    /// Get the rank of the process in the group.
    fn rank(&self) -> u32;
    /// Get the size of this communication group.
    fn size(&self) -> u32;
    /// Exchange one value with every process. The result holds the value of
    /// each process (including this one), ordered by rank.
    ///
    /// Every process must send a value with the same encoded size.
    fn all_gather<T: DataType + 'static>(&self, data: &T) -> CommFuture<'_, Vec<T>>;
    /// Exchange variable-length byte ranges with every process.
    ///
    /// `counts[i]` bytes from process `i` land in `recv` starting at
    /// `displacements[i]`. `send` must hold exactly `counts[self.rank()]`
    /// bytes.
    fn all_gather_bytes<'a>(
        &'a self,
        send: &'a [u8],
        recv: &'a mut [u8],
        counts: &'a [usize],
        displacements: &'a [usize],
    ) -> CommFuture<'a, ()>;
}
