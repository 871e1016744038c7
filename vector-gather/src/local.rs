//! In-process implementation of CommGroup. Ranks may run on their own
//! threads or as futures on a shared executor.
use crate::{CommFuture, CommGroup, DataType, GatherError, Result};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::lock::Mutex;
use futures::StreamExt;
use log::trace;

type Sender = UnboundedSender<Vec<u8>>;
type Receiver = Mutex<UnboundedReceiver<Vec<u8>>>;

/// One rank of a group whose members live in the current process.
///
/// Every ordered pair of ranks is connected by its own channel, so messages
/// between two ranks arrive in the order they were sent.
pub struct LocalCommGroup {
    senders: Vec<Option<Sender>>,
    receivers: Vec<Option<Receiver>>,
    rank: u32,
    size: u32,
}

/// Create a fully connected group of `num_ranks` members. The handle at
/// index `i` has rank `i`.
pub fn local_groups(num_ranks: usize) -> Vec<LocalCommGroup> {
    let mut senders: Vec<Vec<Option<Sender>>> = (0..num_ranks)
        .map(|_| (0..num_ranks).map(|_| None).collect())
        .collect();
    let mut receivers: Vec<Vec<Option<Receiver>>> = (0..num_ranks)
        .map(|_| (0..num_ranks).map(|_| None).collect())
        .collect();
    for from in 0..num_ranks {
        for to in 0..num_ranks {
            if from == to {
                continue;
            }
            let (sender, receiver) = unbounded();
            senders[from][to] = Some(sender);
            receivers[to][from] = Some(Mutex::new(receiver));
        }
    }
    senders
        .into_iter()
        .zip(receivers)
        .enumerate()
        .map(|(rank, (senders, receivers))| LocalCommGroup {
            senders,
            receivers,
            rank: rank as u32,
            size: num_ranks as u32,
        })
        .collect()
}

impl LocalCommGroup {
    fn send_to_others(&self, data: &[u8]) -> Result<()> {
        for (rank, sender) in self.senders.iter().enumerate() {
            if let Some(sender) = sender {
                trace!("rank {}: sending {} bytes to {}", self.rank, data.len(), rank);
                sender
                    .unbounded_send(data.to_vec())
                    .map_err(|_| GatherError::PeerDisconnected { rank: rank as u32 })?;
            }
        }
        Ok(())
    }

    async fn receive_from(&self, rank: usize) -> Result<Vec<u8>> {
        let receiver = self.receivers[rank]
            .as_ref()
            .ok_or(GatherError::InvalidContext {
                rank: self.rank,
                size: self.size,
            })?;
        let buffer = receiver
            .lock()
            .await
            .next()
            .await
            .ok_or(GatherError::PeerDisconnected { rank: rank as u32 })?;
        trace!("rank {}: received {} bytes from {}", self.rank, buffer.len(), rank);
        Ok(buffer)
    }
}

impl CommGroup for LocalCommGroup {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn size(&self) -> u32 {
        self.size
    }

    fn all_gather<T: DataType + 'static>(&self, data: &T) -> CommFuture<'_, Vec<T>> {
        let encoded = bincode::serialize(data);
        let mut data = Some(data.clone());
        Box::into_pin(Box::new(async move {
            let encoded = encoded?;
            self.send_to_others(&encoded)?;
            let mut result = Vec::with_capacity(self.size as usize);
            for i in 0..self.size as usize {
                if i == self.rank as usize {
                    if let Some(data) = data.take() {
                        result.push(data);
                    }
                } else {
                    let buffer = self.receive_from(i).await?;
                    if buffer.len() != encoded.len() {
                        return Err(GatherError::BufferSizeMismatch {
                            rank: i as u32,
                            expected: encoded.len(),
                            actual: buffer.len(),
                        });
                    }
                    result.push(bincode::deserialize(&buffer)?);
                }
            }
            Ok(result)
        }))
    }

    fn all_gather_bytes<'a>(
        &'a self,
        send: &'a [u8],
        recv: &'a mut [u8],
        counts: &'a [usize],
        displacements: &'a [usize],
    ) -> CommFuture<'a, ()> {
        Box::into_pin(Box::new(async move {
            let rank = self.rank as usize;
            let size = self.size as usize;
            if counts.len() != size || displacements.len() != size {
                return Err(GatherError::MembershipMismatch {
                    expected: size,
                    actual: counts.len().min(displacements.len()),
                });
            }
            if send.len() != counts[rank] {
                return Err(GatherError::BufferSizeMismatch {
                    rank: self.rank,
                    expected: counts[rank],
                    actual: send.len(),
                });
            }

            self.send_to_others(send)?;
            let recv_len = recv.len();
            for i in 0..size {
                let end = displacements[i].saturating_add(counts[i]);
                let slot = recv.get_mut(displacements[i]..end).ok_or(
                    GatherError::BufferSizeMismatch {
                        rank: i as u32,
                        expected: end,
                        actual: recv_len,
                    },
                )?;
                if i == rank {
                    slot.copy_from_slice(send);
                } else {
                    let buffer = self.receive_from(i).await?;
                    if buffer.len() != slot.len() {
                        return Err(GatherError::BufferSizeMismatch {
                            rank: i as u32,
                            expected: slot.len(),
                            actual: buffer.len(),
                        });
                    }
                    slot.copy_from_slice(&buffer);
                }
            }
            Ok(())
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use futures::{executor, future};

    use super::local_groups;
    use crate::{CommGroup, GatherError};

    #[test]
    fn ranks_and_sizes() {
        let groups = local_groups(3);
        for (i, group) in groups.iter().enumerate() {
            assert_eq!(group.rank(), i as u32);
            assert_eq!(group.size(), 3);
        }
    }

    #[test]
    fn all_gather_in_rank_order() {
        let threads: Vec<_> = local_groups(4)
            .into_iter()
            .map(|group| {
                thread::spawn(move || {
                    let value = 10 * group.rank() as u64;
                    executor::block_on(group.all_gather(&value)).unwrap()
                })
            })
            .collect();
        for thread in threads {
            assert_eq!(thread.join().unwrap(), vec![0, 10, 20, 30]);
        }
    }

    #[test]
    fn ranks_share_one_executor() {
        let groups = local_groups(2);
        let (a, b) = executor::block_on(future::join(
            groups[0].all_gather(&5u64),
            groups[1].all_gather(&6u64),
        ));
        assert_eq!(a.unwrap(), vec![5, 6]);
        assert_eq!(b.unwrap(), vec![5, 6]);
    }

    #[test]
    fn all_gather_bytes_places_ranges() {
        let counts = [2, 0, 3];
        let displacements = [0, 2, 2];
        let threads: Vec<_> = local_groups(3)
            .into_iter()
            .map(|group| {
                thread::spawn(move || {
                    let send = vec![group.rank() as u8 + 1; counts[group.rank() as usize]];
                    let mut recv = vec![0u8; 5];
                    executor::block_on(group.all_gather_bytes(
                        &send,
                        &mut recv,
                        &counts,
                        &displacements,
                    ))
                    .unwrap();
                    recv
                })
            })
            .collect();
        for thread in threads {
            assert_eq!(thread.join().unwrap(), vec![1, 1, 3, 3, 3]);
        }
    }

    #[test]
    fn disconnected_peer_is_reported() {
        let mut groups = local_groups(2);
        let group1 = groups.pop().unwrap();
        let group0 = groups.pop().unwrap();
        drop(group1);
        let err = executor::block_on(group0.all_gather(&1u64)).unwrap_err();
        assert!(matches!(err, GatherError::PeerDisconnected { rank: 1 }));
    }

    #[test]
    fn short_range_is_reported() {
        let mut groups = local_groups(2);
        let group1 = groups.pop().unwrap();
        let group0 = groups.pop().unwrap();
        let thread = thread::spawn(move || {
            // Rank 1 disagrees about its own byte count.
            let mut recv = vec![0u8; 12];
            executor::block_on(group1.all_gather_bytes(&[7; 4], &mut recv, &[8, 4], &[0, 8]))
        });
        let mut recv = vec![0u8; 16];
        let err = executor::block_on(group0.all_gather_bytes(&[1; 8], &mut recv, &[8, 8], &[0, 8]))
            .unwrap_err();
        assert!(matches!(
            err,
            GatherError::BufferSizeMismatch {
                rank: 1,
                expected: 8,
                actual: 4
            }
        ));
        thread.join().unwrap().unwrap();
    }
}
