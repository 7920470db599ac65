//! The production group backend: one OS process per rank, communicating
//! through a POSIX shared-memory segment (`/dev/shm` on Linux).
//!
//! The segment starts with a [`GroupState`] handshake block followed by one
//! message slot per ordered rank pair. A send copies the payload into the
//! `(src, dst)` slot and blocks until the receiver acknowledges, so every
//! transfer is a rendezvous; the collectives in [`GroupChannel`] are built on
//! top of that plus a two-phase barrier.

use crate::group::GroupChannel;
use crate::{Error, Result};
use log::debug;
use serde::{de::DeserializeOwned, Serialize};
use shared_memory::{Shmem, ShmemConf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

const MAX_MSG_SIZE: usize = 1024 * 1024; // 1MB max message size
const HEADER_SIZE: usize = std::mem::size_of::<SlotHeader>();
const FLINK_NAME: &str = "cross_mpi_group";
const SPAWN_ENV: &str = "CROSS_MPI_SPAWNED";
const MAX_RANKS: usize = 32;

const TAG_COLLECTIVE: i32 = 0;
const TAG_BARRIER_ARRIVE: i32 = -1;
const TAG_BARRIER_RELEASE: i32 = -2;

#[repr(C)]
struct SlotHeader {
    /// Set by the sender once the payload is in place, cleared by the receiver.
    full: AtomicBool,
    /// Set by the receiver; the sender blocks on it, making every send a rendezvous.
    acked: AtomicBool,
    tag: i32,
    len: usize,
}

impl SlotHeader {
    fn new() -> Self {
        Self {
            full: AtomicBool::new(false),
            acked: AtomicBool::new(false),
            tag: 0,
            len: 0,
        }
    }
}

#[repr(C)]
struct GroupState {
    size: AtomicUsize,
    /// Process IDs per rank; spawned workers claim a rank by CAS from 0.
    pids: [AtomicUsize; MAX_RANKS],
    /// Set once a rank has attached and is ready to communicate.
    ready: [AtomicBool; MAX_RANKS],
    /// Set when a rank enters destruct.
    parting: [AtomicBool; MAX_RANKS],
    /// Set when a non-owner rank has detached from the segment.
    gone: [AtomicBool; MAX_RANKS],
}

/// A fixed-size group of worker processes sharing one memory segment.
///
/// Rank 0 is the process that called [`ProcessGroup::init`]; it creates the
/// segment and spawns the remaining ranks as copies of the current
/// executable. Spawned processes detect the spawn marker in their
/// environment, attach to the segment, and claim the first free rank.
pub struct ProcessGroup {
    rank: usize,
    size: usize,
    shmem: Shmem,
}

impl ProcessGroup {
    /// Forms a group of `size` worker processes and blocks until every rank
    /// has attached. Call this once, early, from every process (spawned
    /// copies re-enter `main` and land here too).
    pub fn init(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::Init("Size must be positive".into()));
        }
        if size > MAX_RANKS {
            return Err(Error::Init(format!(
                "At most {MAX_RANKS} workers are supported"
            )));
        }

        if std::env::var(SPAWN_ENV).is_ok() {
            return Self::attach(size);
        }

        debug!("Forming process group of size {}", size);

        let state_size = std::mem::size_of::<GroupState>();
        let total_size = state_size + size * size * (HEADER_SIZE + MAX_MSG_SIZE);

        let shmem = ShmemConf::new()
            .size(total_size)
            .flink(FLINK_NAME)
            .create()
            .map_err(|e| Error::SharedMemory(e.to_string()))?;

        debug!("shmem path {:?}", shmem.get_flink_path());

        unsafe {
            let state = &mut *(shmem.as_ptr() as *mut GroupState);
            state.size.store(size, Ordering::SeqCst);
            for i in 0..MAX_RANKS {
                state.pids[i].store(0, Ordering::SeqCst);
                state.ready[i].store(false, Ordering::SeqCst);
                state.parting[i].store(false, Ordering::SeqCst);
                state.gone[i].store(false, Ordering::SeqCst);
            }
            state.pids[0].store(std::process::id() as usize, Ordering::SeqCst);

            let base = shmem.as_ptr().add(state_size);
            for i in 0..size * size {
                let slot = base.add(i * (HEADER_SIZE + MAX_MSG_SIZE)) as *mut SlotHeader;
                std::ptr::write(slot, SlotHeader::new());
            }

            state.ready[0].store(true, Ordering::SeqCst);
        }

        // Spawn the remaining ranks only after the segment is fully set up,
        // so an open on the flink always sees initialized state.
        let exe = std::env::current_exe().map_err(|e| Error::Process(e.to_string()))?;
        for _ in 1..size {
            Command::new(&exe)
                .env(SPAWN_ENV, "1")
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .spawn()
                .map_err(|e| Error::Process(e.to_string()))?;
        }

        let group = Self {
            rank: 0,
            size,
            shmem,
        };
        group.wait_all_ready();

        debug!("Process group formed, this process is rank 0");
        Ok(group)
    }

    /// Attach a spawned process to an existing group segment.
    fn attach(size: usize) -> Result<Self> {
        debug!("Spawned process attaching to group");

        let shmem = ShmemConf::new()
            .flink(FLINK_NAME)
            .open()
            .map_err(|e| Error::SharedMemory(e.to_string()))?;

        let pid = std::process::id() as usize;
        let rank = {
            let state = unsafe { &*(shmem.as_ptr() as *const GroupState) };
            let mut claimed = None;
            for i in 1..size {
                if state.pids[i]
                    .compare_exchange(0, pid, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    claimed = Some(i);
                    break;
                }
            }
            let rank =
                claimed.ok_or_else(|| Error::Init(format!("No free rank for process {pid}")))?;
            state.ready[rank].store(true, Ordering::SeqCst);
            rank
        };

        let group = Self { rank, size, shmem };
        group.wait_all_ready();

        debug!("Process {} attached as rank {}", pid, rank);
        Ok(group)
    }

    /// This worker's rank, `0..size`.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// The fixed group size.
    pub fn size(&self) -> usize {
        self.size
    }

    fn state(&self) -> &GroupState {
        unsafe { &*(self.shmem.as_ptr() as *const GroupState) }
    }

    fn wait_all_ready(&self) {
        let state = self.state();
        for i in 0..self.size {
            while !state.ready[i].load(Ordering::SeqCst) {
                std::hint::spin_loop();
            }
        }
    }

    fn slot_ptr(&self, src: usize, dst: usize) -> *mut u8 {
        let state_size = std::mem::size_of::<GroupState>();
        let slot_size = HEADER_SIZE + MAX_MSG_SIZE;
        let index = src * self.size + dst;
        unsafe { self.shmem.as_ptr().add(state_size + index * slot_size) }
    }

    /// Copies `bytes` into the `(self, dest)` slot and blocks until the
    /// receiver acknowledges.
    fn send_bytes(&self, bytes: &[u8], dest: usize, tag: i32) -> Result<()> {
        if dest >= self.size {
            return Err(Error::InvalidRank(dest));
        }
        if bytes.len() > MAX_MSG_SIZE {
            return Err(Error::Communication("Message too large".into()));
        }

        debug!("Rank {} sending to rank {} with tag {}", self.rank, dest, tag);

        let slot = self.slot_ptr(self.rank, dest);
        unsafe {
            let header = &mut *(slot as *mut SlotHeader);

            while header.full.load(Ordering::SeqCst) {
                std::hint::spin_loop();
            }

            header.tag = tag;
            header.len = bytes.len();
            header.acked.store(false, Ordering::SeqCst);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), slot.add(HEADER_SIZE), bytes.len());
            header.full.store(true, Ordering::SeqCst);

            while !header.acked.load(Ordering::SeqCst) {
                std::hint::spin_loop();
            }
        }

        debug!("Rank {} completed send to rank {}", self.rank, dest);
        Ok(())
    }

    /// Blocks until the `(source, self)` slot holds a message with `tag` and
    /// returns its payload.
    fn recv_bytes(&self, source: usize, tag: i32) -> Result<Vec<u8>> {
        if source >= self.size {
            return Err(Error::InvalidRank(source));
        }

        debug!(
            "Rank {} receiving from rank {} with tag {}",
            self.rank, source, tag
        );

        let slot = self.slot_ptr(source, self.rank);
        let bytes = unsafe {
            let header = &mut *(slot as *mut SlotHeader);

            while !header.full.load(Ordering::SeqCst) || header.tag != tag {
                std::hint::spin_loop();
            }

            let mut bytes = vec![0u8; header.len];
            std::ptr::copy_nonoverlapping(slot.add(HEADER_SIZE), bytes.as_mut_ptr(), header.len);

            header.acked.store(true, Ordering::SeqCst);
            header.full.store(false, Ordering::SeqCst);
            bytes
        };

        debug!("Rank {} completed receive from rank {}", self.rank, source);
        Ok(bytes)
    }

    /// Two-phase barrier: everyone signals rank 0, then rank 0 releases everyone.
    fn barrier(&self) -> Result<()> {
        debug!("Rank {} entering barrier", self.rank);

        if self.rank == 0 {
            for rank in 1..self.size {
                self.recv_bytes(rank, TAG_BARRIER_ARRIVE)?;
            }
            for rank in 1..self.size {
                self.send_bytes(&[], rank, TAG_BARRIER_RELEASE)?;
            }
        } else {
            self.send_bytes(&[], 0, TAG_BARRIER_ARRIVE)?;
            self.recv_bytes(0, TAG_BARRIER_RELEASE)?;
        }

        debug!("Rank {} exiting barrier", self.rank);
        Ok(())
    }

    /// Tears the group down: waits until every rank has arrived, then lets
    /// rank 0 unlink the segment once every other rank has detached.
    ///
    /// Must be called by every rank; a missing rank stalls the teardown the
    /// same way a missing collective call stalls a run.
    pub fn destruct(self) {
        let state = self.state();

        state.parting[self.rank].store(true, Ordering::SeqCst);
        for i in 0..self.size {
            while !state.parting[i].load(Ordering::SeqCst) {
                std::hint::spin_loop();
            }
        }

        if self.rank == 0 {
            // The owner unlinks the flink when the mapping drops, so every
            // other rank must have stopped touching the segment first.
            for i in 1..self.size {
                while !state.gone[i].load(Ordering::SeqCst) {
                    std::hint::spin_loop();
                }
            }
        } else {
            state.gone[self.rank].store(true, Ordering::SeqCst);
        }

        debug!("Rank {} finished", self.rank);
    }
}

impl GroupChannel for ProcessGroup {
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
                    self.send_bytes(&bytes, rank, TAG_COLLECTIVE)?;
                }
            }
            bytes
        } else {
            self.recv_bytes(root, TAG_COLLECTIVE)?
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
                    self.send_bytes(bytemuck::cast_slice(piece), rank, TAG_COLLECTIVE)?;
                }
            }
            full[root * chunk_len..(root + 1) * chunk_len].to_vec()
        } else {
            let bytes = self.recv_bytes(root, TAG_COLLECTIVE)?;
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
                    let bytes = self.recv_bytes(rank, TAG_COLLECTIVE)?;
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
            self.send_bytes(bytemuck::cast_slice(chunk), root, TAG_COLLECTIVE)?;
            None
        };

        self.barrier()?;

        debug!("Rank {} completed gather", self.rank);
        Ok(result)
    }
}
