// In: src/chunk_pipeline/shuffle.rs

//! The all-to-all exchange between workers.
//!
//! Every transit chunk handed to the shuffle already carries its destination in
//! `TransitAddress::dst_instance` (the instance-split writer guarantees each
//! chunk is homogeneous in destination). The service moves each chunk to that
//! worker, keeping its `(src_instance, chunk_no)` so the merge can walk every
//! origin's stream in order.

use parking_lot::{Condvar, Mutex};

use log::debug;

use crate::array::{TransitAddress, TransitArray, TransitChunk};
use crate::error::RedimError;
use crate::log_metric;
use crate::types::InstanceId;

/// The external redistribute facility. Blocks until the calling worker has
/// received every inbound chunk from every origin worker.
pub trait ShuffleService: Send + Sync {
    fn redistribute(&self, local: TransitArray, self_instance: InstanceId) -> Result<TransitArray, RedimError>;

    /// Releases workers blocked in `redistribute` after a sibling failed.
    fn abort(&self) {}
}

#[derive(Debug, Default)]
struct Exchange {
    inboxes: Vec<Vec<(TransitAddress, TransitChunk)>>,
    delivered: Vec<bool>,
    collected: Vec<bool>,
    aborted: bool,
}

impl Exchange {
    fn all_delivered(&self) -> bool {
        self.delivered.iter().all(|&d| d)
    }
}

/// A single-use exchange among the worker threads of one process.
#[derive(Debug)]
pub struct InProcessShuffle {
    num_instances: u32,
    state: Mutex<Exchange>,
    arrived: Condvar,
}

impl InProcessShuffle {
    pub fn new(num_instances: u32) -> Self {
        let n = num_instances as usize;
        Self {
            num_instances,
            state: Mutex::new(Exchange {
                inboxes: (0..n).map(|_| Vec::new()).collect(),
                delivered: vec![false; n],
                collected: vec![false; n],
                aborted: false,
            }),
            arrived: Condvar::new(),
        }
    }

    pub fn num_instances(&self) -> u32 {
        self.num_instances
    }
}

impl ShuffleService for InProcessShuffle {
    fn redistribute(&self, local: TransitArray, self_instance: InstanceId) -> Result<TransitArray, RedimError> {
        let me = self_instance as usize;
        if self_instance >= self.num_instances {
            return Err(RedimError::Internal(format!(
                "instance {} joined a {}-worker shuffle",
                self_instance, self.num_instances
            )));
        }
        // Validate routing before touching shared state.
        for (address, _) in local.chunks() {
            if address.dst_instance >= self.num_instances || address.src_instance != self_instance {
                return Err(RedimError::Internal(format!(
                    "instance {} cannot ship transit chunk {:?}",
                    self_instance, address
                )));
            }
        }
        let sent_chunks = local.num_chunks();
        let sent_tuples = local.num_tuples();

        let mut state = self.state.lock();
        if state.aborted {
            return Err(RedimError::Aborted("shuffle released by a sibling worker failure".into()));
        }
        if state.delivered[me] {
            return Err(RedimError::Internal(format!(
                "instance {} delivered to the shuffle twice",
                self_instance
            )));
        }
        for (address, chunk) in local.into_chunks() {
            state.inboxes[address.dst_instance as usize].push((address, chunk));
        }
        state.delivered[me] = true;
        debug!("instance {} delivered {} transit chunks", self_instance, sent_chunks);
        self.arrived.notify_all();

        while !state.all_delivered() && !state.aborted {
            self.arrived.wait(&mut state);
        }
        if state.aborted {
            return Err(RedimError::Aborted("shuffle released by a sibling worker failure".into()));
        }

        state.collected[me] = true;
        let inbound = std::mem::take(&mut state.inboxes[me]);
        drop(state);

        let mut received = TransitArray::new();
        for (address, chunk) in inbound {
            received.insert(address, chunk)?;
        }
        log_metric!(
            "event" = "shuffle_done",
            "instance" = self_instance,
            "sent_chunks" = sent_chunks,
            "sent_tuples" = sent_tuples,
            "received_chunks" = received.num_chunks(),
            "received_tuples" = received.num_tuples()
        );
        Ok(received)
    }

    fn abort(&self) {
        let mut state = self.state.lock();
        if !state.collected.iter().all(|&c| c) {
            state.aborted = true;
        }
        self.arrived.notify_all();
    }
}
