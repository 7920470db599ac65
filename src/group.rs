//! The collective-operation capability and an in-process backend.
//!
//! The worker runtime never talks to a transport directly; it is handed a
//! [`GroupChannel`] and calls the three collectives through it. The
//! shared-memory process backend lives in [`crate::shmem`]; this module holds
//! the trait plus [`ThreadGroup`], a rendezvous-channel backend that simulates
//! a whole group inside one process for tests and demos.

use crate::{Error, Result};
use crossbeam::channel::{bounded, Receiver, Sender};
use log::debug;
use serde::{de::DeserializeOwned, Serialize};

/// Blocking collective operations over a fixed worker group.
///
/// All three calls are collective: every rank must invoke the matching
/// operation or the group never advances. Each call returns only after the
/// collective has completed on every worker, so no rank observes a later
/// phase before the group has finished the current one.
pub trait GroupChannel {
    /// This worker's fixed identity, `0..size`.
    fn rank(&self) -> usize;

    /// The fixed number of workers in the group.
    fn size(&self) -> usize;

    /// Delivers one value from `root` to every rank. Only the root supplies
    /// `value`; every rank (the root included) receives the same result.
    fn broadcast<T: Serialize + DeserializeOwned>(
        &self,
        value: Option<&T>,
        root: usize,
    ) -> Result<T>;

    /// Splits the root's flat array into equal contiguous chunks of
    /// `chunk_len` scalars, one per rank in ascending rank order, and returns
    /// this rank's chunk. Only the root supplies `full`, whose length must be
    /// `chunk_len * size`.
    fn scatter_chunks(
        &self,
        full: Option<&[f32]>,
        chunk_len: usize,
        root: usize,
    ) -> Result<Vec<f32>>;

    /// Collects one equally sized chunk from every rank into a single flat
    /// array at `root`, concatenated in ascending rank order. Returns
    /// `Some(full)` on the root and `None` everywhere else.
    fn gather_chunks(&self, chunk: &[f32], root: usize) -> Result<Option<Vec<f32>>>;
}

/// An in-process group backend: one handle per simulated worker, connected by
/// a rendezvous channel per ordered rank pair.
///
/// Sends block until the peer receives, matching the blocking semantics of
/// the shared-memory backend. Unlike a real process group, a vanished peer
/// surfaces as a [`Error::Communication`] instead of an eternal stall, which
/// is what lets test harnesses observe the straggler failure mode.
pub struct ThreadGroup {
    rank: usize,
    size: usize,
    /// `senders[dst]` carries messages from this rank to `dst`.
    senders: Vec<Sender<Vec<u8>>>,
    /// `receivers[src]` carries messages from `src` to this rank.
    receivers: Vec<Receiver<Vec<u8>>>,
}

impl ThreadGroup {
    /// Builds a connected group of `size` handles, one per rank, in rank
    /// order. Hand each handle to its own thread.
    pub fn create(size: usize) -> Result<Vec<ThreadGroup>> {
        if size == 0 {
            return Err(Error::Init("Size must be positive".into()));
        }

        let mut senders = Vec::with_capacity(size * size);
        let mut receivers = Vec::with_capacity(size * size);
        for _ in 0..size * size {
            // Rendezvous channel: a send completes only when the peer receives.
            let (tx, rx) = bounded(0);
            senders.push(tx);
            receivers.push(Some(rx));
        }

        Ok((0..size)
            .map(|rank| ThreadGroup {
                rank,
                size,
                senders: (0..size).map(|dst| senders[rank * size + dst].clone()).collect(),
                receivers: (0..size)
                    .map(|src| {
                        receivers[src * size + rank]
                            .take()
                            .expect("each pair receiver is claimed exactly once")
                    })
                    .collect(),
            })
            .collect())
    }

    fn send_bytes(&self, bytes: Vec<u8>, dest: usize) -> Result<()> {
        self.senders[dest]
            .send(bytes)
            .map_err(|_| Error::Communication(format!("Rank {dest} has left the group")))
    }

    fn recv_bytes(&self, source: usize) -> Result<Vec<u8>> {
        self.receivers[source]
            .recv()
            .map_err(|_| Error::Communication(format!("Rank {source} has left the group")))
    }

    /// Two-phase barrier: everyone signals rank 0, then rank 0 releases everyone.
    fn barrier(&self) -> Result<()> {
        if self.rank == 0 {
            for rank in 1..self.size {
                self.recv_bytes(rank)?;
            }
            for rank in 1..self.size {
                self.send_bytes(Vec::new(), rank)?;
            }
        } else {
            self.send_bytes(Vec::new(), 0)?;
            self.recv_bytes(0)?;
        }
        Ok(())
    }
}

impl GroupChannel for ThreadGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn broadcast<T: Serialize + DeserializeOwned>(
        &self,
        value: Option<&T>,
        root: usize,
    ) -> Result<T> {
        if root >= self.size {
            return Err(Error::InvalidRank(root));
        }

        debug!("Rank {} entering broadcast", self.rank);

        let bytes = if self.rank == root {
            let value = value
                .ok_or_else(|| Error::Init("Root must provide a broadcast value".into()))?;
            let bytes = bincode::serialize(value)
                .map_err(|e| Error::Serialization(e.to_string()))?;
            for rank in 0..self.size {
                if rank != root {
                    self.send_bytes(bytes.clone(), rank)?;
                }
            }
            bytes
        } else {
            self.recv_bytes(root)?
        };

        let value =
            bincode::deserialize(&bytes).map_err(|e| Error::Serialization(e.to_string()))?;
        self.barrier()?;

        debug!("Rank {} completed broadcast", self.rank);
        Ok(value)
    }

    fn scatter_chunks(
        &self,
        full: Option<&[f32]>,
        chunk_len: usize,
        root: usize,
    ) -> Result<Vec<f32>> {
        if root >= self.size {
            return Err(Error::InvalidRank(root));
        }

        debug!("Rank {} entering scatter", self.rank);

        let chunk = if self.rank == root {
            let full = full
                .ok_or_else(|| Error::Init("Root must provide the full array for scatter".into()))?;
            if full.len() != chunk_len * self.size {
                return Err(Error::Init(
                    "Array length must equal chunk length times group size".into(),
                ));
            }

            for rank in 0..self.size {
                if rank != root {
                    let piece = &full[rank * chunk_len..(rank + 1) * chunk_len];
                    self.send_bytes(bytemuck::cast_slice(piece).to_vec(), rank)?;
                }
            }
            full[root * chunk_len..(root + 1) * chunk_len].to_vec()
        } else {
            let bytes = self.recv_bytes(root)?;
            let chunk: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes);
            if chunk.len() != chunk_len {
                return Err(Error::Communication(format!(
                    "Expected a chunk of {} scalars, got {}",
                    chunk_len,
                    chunk.len()
                )));
            }
            chunk
        };

        self.barrier()?;

        debug!("Rank {} completed scatter", self.rank);
        Ok(chunk)
    }

    fn gather_chunks(&self, chunk: &[f32], root: usize) -> Result<Option<Vec<f32>>> {
        if root >= self.size {
            return Err(Error::InvalidRank(root));
        }

        debug!("Rank {} entering gather", self.rank);

        let result = if self.rank == root {
            let mut full = Vec::with_capacity(chunk.len() * self.size);
            for rank in 0..self.size {
                if rank == root {
                    full.extend_from_slice(chunk);
                } else {
                    let bytes = self.recv_bytes(rank)?;
                    let piece: Vec<f32> = bytemuck::pod_collect_to_vec(&bytes);
                    if piece.len() != chunk.len() {
                        return Err(Error::Communication(format!(
                            "Expected a chunk of {} scalars from rank {}, got {}",
                            chunk.len(),
                            rank,
                            piece.len()
                        )));
                    }
                    full.extend_from_slice(&piece);
                }
            }
            Some(full)
        } else {
            self.send_bytes(bytemuck::cast_slice(chunk).to_vec(), root)?;
            None
        };

        self.barrier()?;

        debug!("Rank {} completed gather", self.rank);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn broadcast_reaches_every_rank() {
        let mut handles = ThreadGroup::create(3).unwrap().into_iter();
        let root = handles.next().unwrap();

        let members: Vec<_> = handles
            .map(|g| thread::spawn(move || g.broadcast::<u64>(None, 0).unwrap()))
            .collect();

        let sent = root.broadcast(Some(&7u64), 0).unwrap();
        assert_eq!(sent, 7);
        for member in members {
            assert_eq!(member.join().unwrap(), 7);
        }
    }

    #[test]
    fn scatter_hands_out_rank_ordered_chunks() {
        let mut handles = ThreadGroup::create(2).unwrap().into_iter();
        let root = handles.next().unwrap();
        let member = handles.next().unwrap();

        let worker = thread::spawn(move || member.scatter_chunks(None, 3, 0).unwrap());

        let full = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let own = root.scatter_chunks(Some(&full), 3, 0).unwrap();

        assert_eq!(own, vec![1.0, 2.0, 3.0]);
        assert_eq!(worker.join().unwrap(), vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn gather_reassembles_in_rank_order() {
        let mut handles = ThreadGroup::create(3).unwrap().into_iter();
        let root = handles.next().unwrap();

        let members: Vec<_> = handles
            .map(|g| {
                thread::spawn(move || {
                    let chunk = [g.rank() as f32 * 10.0, g.rank() as f32 * 10.0 + 1.0];
                    assert!(g.gather_chunks(&chunk, 0).unwrap().is_none());
                })
            })
            .collect();

        let full = root.gather_chunks(&[0.0, 1.0], 0).unwrap().unwrap();
        assert_eq!(full, vec![0.0, 1.0, 10.0, 11.0, 20.0, 21.0]);

        for member in members {
            member.join().unwrap();
        }
    }

    #[test]
    fn zero_size_group_is_an_init_error() {
        assert!(matches!(ThreadGroup::create(0), Err(Error::Init(_))));
    }

    #[test]
    fn scatter_rejects_a_mismatched_array() {
        let mut handles = ThreadGroup::create(1).unwrap().into_iter();
        let root = handles.next().unwrap();
        assert!(matches!(
            root.scatter_chunks(Some(&[1.0, 2.0]), 3, 0),
            Err(Error::Init(_))
        ));
    }
}
