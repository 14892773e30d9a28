//! Two-channel async generation harness.
//!
//! Work runs on the bounded [`JobSystem`]; each finished job pushes its result
//! together with the submitter's callback onto the channel's completion queue.
//! Callbacks only ever run inside [`Drained::deliver`], on whichever thread drains
//! the pipeline, so the state they mutate needs no locking.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use tracing::warn;

use crate::events::{self, EventReceiver, EventSender};
use crate::jobs::JobSystem;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    Panicked {
        channel: &'static str,
        message: String,
    },
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Panicked { channel, message } => {
                write!(f, "{channel} job panicked: {message}")
            }
        }
    }
}

impl std::error::Error for JobError {}

type Callback<C, T> = Box<dyn FnOnce(&mut C, Result<T, JobError>) + Send>;

pub struct Completion<C, T> {
    result: Result<T, JobError>,
    on_complete: Callback<C, T>,
}

impl<C, T> Completion<C, T> {
    pub fn deliver(self, ctx: &mut C) {
        (self.on_complete)(ctx, self.result);
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

pub struct DataChannel<C, T> {
    name: &'static str,
    tx: EventSender<Completion<C, T>>,
    rx: EventReceiver<Completion<C, T>>,
    in_flight: usize,
}

impl<C: 'static, T: Send + 'static> DataChannel<C, T> {
    pub fn new(name: &'static str) -> Self {
        let (tx, rx) = events::channel();
        Self {
            name,
            tx,
            rx,
            in_flight: 0,
        }
    }

    pub fn submit<W, F>(&mut self, jobs: &JobSystem, work: W, on_complete: F)
    where
        W: FnOnce() -> T + Send + 'static,
        F: FnOnce(&mut C, Result<T, JobError>) + Send + 'static,
    {
        let tx = self.tx.clone();
        let name = self.name;
        let on_complete: Callback<C, T> = Box::new(on_complete);
        self.in_flight += 1;

        jobs.spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(work)).map_err(|payload| {
                let message = panic_message(payload.as_ref());
                warn!("{name} job panicked: {message}");
                JobError::Panicked {
                    channel: name,
                    message,
                }
            });
            // The receiver lives as long as the pipeline; a failed send means it is gone.
            let _ = tx.send(Completion {
                result,
                on_complete,
            });
        });
    }

    pub fn drain(&mut self) -> Vec<Completion<C, T>> {
        let completed = self.rx.drain();
        self.in_flight = self.in_flight.saturating_sub(completed.len());
        completed
    }

    /// Submitted jobs whose completion has not been drained yet.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Completions popped from both channels during one drain step.
pub struct Drained<C, H, M> {
    pub heights: Vec<Completion<C, H>>,
    pub meshes: Vec<Completion<C, M>>,
}

impl<C, H, M> Drained<C, H, M> {
    pub fn len(&self) -> usize {
        self.heights.len() + self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every callback on the calling thread: height channel first, each
    /// channel in arrival order.
    pub fn deliver(self, ctx: &mut C) -> usize {
        let delivered = self.len();
        for completion in self.heights {
            completion.deliver(ctx);
        }
        for completion in self.meshes {
            completion.deliver(ctx);
        }
        delivered
    }
}

pub struct DataPipeline<C, H, M> {
    jobs: JobSystem,
    heights: DataChannel<C, H>,
    meshes: DataChannel<C, M>,
}

impl<C, H, M> DataPipeline<C, H, M>
where
    C: 'static,
    H: Send + 'static,
    M: Send + 'static,
{
    pub fn new(jobs: JobSystem) -> Self {
        Self {
            jobs,
            heights: DataChannel::new("height"),
            meshes: DataChannel::new("mesh"),
        }
    }

    pub fn request_height<W, F>(&mut self, work: W, on_complete: F)
    where
        W: FnOnce() -> H + Send + 'static,
        F: FnOnce(&mut C, Result<H, JobError>) + Send + 'static,
    {
        self.heights.submit(&self.jobs, work, on_complete);
    }

    pub fn request_mesh<W, F>(&mut self, work: W, on_complete: F)
    where
        W: FnOnce() -> M + Send + 'static,
        F: FnOnce(&mut C, Result<M, JobError>) + Send + 'static,
    {
        self.meshes.submit(&self.jobs, work, on_complete);
    }

    pub fn drain(&mut self) -> Drained<C, H, M> {
        Drained {
            heights: self.heights.drain(),
            meshes: self.meshes.drain(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.heights.in_flight() + self.meshes.in_flight()
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight() == 0
    }

    pub fn worker_threads(&self) -> usize {
        self.jobs.num_threads()
    }
}
