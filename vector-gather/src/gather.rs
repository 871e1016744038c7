use std::mem;

use bytemuck::Pod;
use futures::executor;
use log::{debug, warn};

use crate::{CommGroup, GatherError, Result};

/// Where each rank's contribution lands in the gathered buffer.
///
/// Byte counts and displacements are indexed by rank; displacements are the
/// exclusive prefix sum of the byte counts in ascending rank order.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct GatherLayout {
    pub counts: Vec<usize>,
    pub displacements: Vec<usize>,
    pub total_len: usize,
}

impl GatherLayout {
    pub(crate) fn new(lengths: &[u64], element_size: usize) -> Result<Self> {
        let mut counts = Vec::with_capacity(lengths.len());
        let mut displacements = Vec::with_capacity(lengths.len());
        let mut offset = 0usize;
        let mut total_len = 0usize;
        for &len in lengths {
            let overflow = || GatherError::CountOverflow { value: len };
            let elements = usize::try_from(len).map_err(|_| overflow())?;
            let bytes = elements.checked_mul(element_size).ok_or_else(overflow)?;
            displacements.push(offset);
            counts.push(bytes);
            offset = offset.checked_add(bytes).ok_or_else(overflow)?;
            total_len = total_len.checked_add(elements).ok_or_else(overflow)?;
        }
        Ok(Self {
            counts,
            displacements,
            total_len,
        })
    }
}

/// Gather `local` from every process of `group` into `result`, blocking
/// until the exchange has completed.
///
/// Every process of the group must call this with the same element type.
/// On success `result` holds the contributions of all processes
/// concatenated in rank order, identically on every process. On failure
/// `result` is left empty.
pub fn gather_all<T: Pod, G: CommGroup>(
    result: &mut Vec<T>,
    local: &[T],
    group: &G,
) -> Result<()> {
    executor::block_on(gather_all_async(result, local, group))
}

/// Asynchronous form of [`gather_all`].
pub async fn gather_all_async<T: Pod, G: CommGroup>(
    result: &mut Vec<T>,
    local: &[T],
    group: &G,
) -> Result<()> {
    let outcome = exchange(result, local, group).await;
    if let Err(err) = &outcome {
        warn!(
            "rank {}: gather failed, discarding result buffer: {}",
            group.rank(),
            err
        );
        result.clear();
    }
    outcome
}

async fn exchange<T: Pod, G: CommGroup>(
    result: &mut Vec<T>,
    local: &[T],
    group: &G,
) -> Result<()> {
    let rank = group.rank();
    let size = group.size();
    if size == 0 || rank >= size {
        return Err(GatherError::InvalidContext { rank, size });
    }

    let local_len = local.len() as u64;
    let lengths: Vec<u64> = group.all_gather(&local_len).await?;
    if lengths.len() != size as usize {
        return Err(GatherError::MembershipMismatch {
            expected: size as usize,
            actual: lengths.len(),
        });
    }
    if lengths[rank as usize] != local_len {
        return Err(GatherError::ContributionMismatch {
            rank,
            announced: lengths[rank as usize],
            actual: local.len(),
        });
    }

    let element_size = mem::size_of::<T>();
    let layout = GatherLayout::new(&lengths, element_size)?;
    debug!(
        "rank {}/{}: gathering {} elements ({} local)",
        rank,
        size,
        layout.total_len,
        local.len()
    );

    if result.len() != layout.total_len {
        result.clear();
        result.try_reserve_exact(layout.total_len)?;
        result.resize(layout.total_len, T::zeroed());
    }

    // Zero-sized elements carry no bytes.
    if element_size == 0 {
        return Ok(());
    }

    group
        .all_gather_bytes(
            bytemuck::cast_slice(local),
            bytemuck::cast_slice_mut(result.as_mut_slice()),
            &layout.counts,
            &layout.displacements,
        )
        .await?;
    debug!("rank {}/{}: gather complete", rank, size);
    Ok(())
}
