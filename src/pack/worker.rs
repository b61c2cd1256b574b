//! Background flattening.
//!
//! [`FlattenWorker`] owns a thread that takes trees by value and sends back
//! exactly one [`FlattenResponse`] per request. The packed buffer moves to the
//! receiver; nothing is shared with the worker afterwards.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread::{self, JoinHandle};

use rayon::prelude::*;

use super::{FlatBvh, flatten};
use crate::bvh::Bvh;
use crate::util::{Error, Result};

/// Commands sent to the worker.
#[derive(Debug)]
pub enum FlattenCommand {
    /// Flatten `bvh` and reply with the same `id`.
    Flatten { id: u64, bvh: Bvh },
    /// Stop the worker thread.
    Stop,
}

/// Reply to one `Flatten` command.
#[derive(Debug)]
pub struct FlattenResponse {
    pub id: u64,
    /// Packed buffer, or the failure message.
    pub result: std::result::Result<FlatBvh, String>,
}

impl FlattenResponse {
    pub fn into_result(self) -> Result<FlatBvh> {
        self.result.map_err(Error::Worker)
    }
}

/// Handle to the flatten thread.
pub struct FlattenWorker {
    tx: Sender<FlattenCommand>,
    rx: Receiver<FlattenResponse>,
    next_id: u64,
    handle: Option<JoinHandle<()>>,
}

impl FlattenWorker {
    pub fn spawn() -> Result<Self> {
        let (cmd_tx, cmd_rx) = channel::<FlattenCommand>();
        let (res_tx, res_rx) = channel::<FlattenResponse>();

        let handle = thread::Builder::new()
            .name("bvh-flatten".into())
            .spawn(move || worker_loop(cmd_rx, res_tx))?;

        Ok(Self {
            tx: cmd_tx,
            rx: res_rx,
            next_id: 0,
            handle: Some(handle),
        })
    }

    /// Queue a tree; returns the id its response will carry.
    pub fn submit(&mut self, bvh: Bvh) -> Result<u64> {
        let id = self.next_id;
        self.next_id += 1;
        self.tx
            .send(FlattenCommand::Flatten { id, bvh })
            .map_err(|_| Error::WorkerDisconnected)?;
        Ok(id)
    }

    /// Block for the next response.
    pub fn recv(&self) -> Result<FlattenResponse> {
        self.rx.recv().map_err(|_| Error::WorkerDisconnected)
    }

    /// Check for a ready response (non-blocking).
    pub fn try_recv(&self) -> Option<FlattenResponse> {
        self.rx.try_recv().ok()
    }

    /// Submit and wait for this tree's buffer.
    ///
    /// Responses to earlier submissions that arrive first are dropped with a
    /// warning.
    pub fn flatten(&mut self, bvh: Bvh) -> Result<FlatBvh> {
        let id = self.submit(bvh)?;
        loop {
            let response = self.recv()?;
            if response.id == id {
                return response.into_result();
            }
            tracing::warn!("discarding flatten response {} while waiting for {id}", response.id);
        }
    }

    /// Stop the worker and wait for it to finish.
    pub fn stop(&mut self) {
        let _ = self.tx.send(FlattenCommand::Stop);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FlattenWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(rx: Receiver<FlattenCommand>, tx: Sender<FlattenResponse>) {
    while let Ok(cmd) = rx.recv() {
        match cmd {
            FlattenCommand::Flatten { id, bvh } => {
                let result = flatten_guarded(&bvh);
                if let Err(e) = &result {
                    tracing::warn!("flatten request {id} failed: {e}");
                }
                if tx.send(FlattenResponse { id, result }).is_err() {
                    break; // caller gone
                }
            }
            FlattenCommand::Stop => break,
        }
    }
}

/// Flatten with panics turned into an error message.
fn flatten_guarded(bvh: &Bvh) -> std::result::Result<FlatBvh, String> {
    match panic::catch_unwind(AssertUnwindSafe(|| flatten(bvh))) {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(payload) => Err(payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "flatten panicked".to_string())),
    }
}

/// Flatten several trees in parallel, one result per input in input order.
#[tracing::instrument(skip_all, fields(trees = trees.len()))]
pub fn flatten_all(trees: &[Bvh]) -> Vec<Result<FlatBvh>> {
    trees.par_iter().map(flatten).collect()
}
