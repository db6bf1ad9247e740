//! Async driver: a tokio task that owns a [`Waveform`] and runs its storage
//! queries on the blocking pool.
//!
//! Callers talk to the task through a cloneable [`WaveformHandle`]. Pushes
//! keep being applied while a query is in flight; the controller coalesces
//! them into a single follow-up redraw.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::OptionsPatch;
use crate::error::{Error, Result};
use crate::renderer::Renderer;
use crate::storage::ReducedFrame;
use crate::waveform::{RedrawTicket, Waveform};

const COMMAND_QUEUE: usize = 64;

type WaveformFn<R> = Box<dyn FnOnce(&mut Waveform<R>) + Send>;

/// Commands sent from handles to the driver task
pub enum Command<R: Renderer> {
    Push { samples: Vec<f32> },
    Set { samples: Vec<f32> },
    Update {
        patch: OptionsPatch,
        reply: oneshot::Sender<Result<()>>,
    },
    With { f: WaveformFn<R> },
    Flush { reply: oneshot::Sender<()> },
}

pub struct WaveformHandle<R: Renderer> {
    tx: mpsc::Sender<Command<R>>,
}

impl<R: Renderer> Clone for WaveformHandle<R> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<R: Renderer + Send + 'static> WaveformHandle<R> {
    async fn send(&self, command: Command<R>) -> Result<()> {
        self.tx.send(command).await.map_err(|_| Error::DriverClosed)
    }

    pub async fn push(&self, samples: Vec<f32>) -> Result<()> {
        self.send(Command::Push { samples }).await
    }

    pub async fn set(&self, samples: Vec<f32>) -> Result<()> {
        self.send(Command::Set { samples }).await
    }

    /// Merge options; configuration errors come back from the driver.
    pub async fn update(&self, patch: OptionsPatch) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Update { patch, reply }).await?;
        rx.await.map_err(|_| Error::DriverClosed)?
    }

    /// Run `f` on the driver task with exclusive access to the waveform.
    pub async fn with<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Waveform<R>) -> T + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let f: WaveformFn<R> = Box::new(move |waveform| {
            let _ = reply.send(f(waveform));
        });
        self.send(Command::With { f }).await?;
        rx.await.map_err(|_| Error::DriverClosed)
    }

    /// Wait until every queued trigger has been drawn or has failed.
    pub async fn flush(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Flush { reply }).await?;
        rx.await.map_err(|_| Error::DriverClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Move `waveform` onto a driver task.
///
/// The task ends once every handle is dropped and the last redraw has
/// completed, handing the waveform back through the join handle.
pub fn spawn<R>(waveform: Waveform<R>) -> (WaveformHandle<R>, JoinHandle<Waveform<R>>)
where
    R: Renderer + Send + 'static,
{
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
    let task = tokio::spawn(run(waveform, rx));
    (WaveformHandle { tx }, task)
}

type InFlight = (RedrawTicket, JoinHandle<Result<ReducedFrame>>);

async fn run<R>(mut waveform: Waveform<R>, mut rx: mpsc::Receiver<Command<R>>) -> Waveform<R>
where
    R: Renderer + Send + 'static,
{
    let mut in_flight: Option<InFlight> = None;
    let mut flush_waiters: Vec<oneshot::Sender<()>> = Vec::new();
    let mut open = true;

    loop {
        if in_flight.is_none() {
            match waveform.begin_redraw() {
                Ok(Some(ticket)) => {
                    let storage = waveform.storage().clone();
                    let query = ticket.query;
                    let worker = tokio::task::spawn_blocking(move || storage.query(&query));
                    in_flight = Some((ticket, worker));
                }
                Ok(None) => {}
                Err(e) => warn!("Could not start redraw: {}", e),
            }
        }

        if in_flight.is_none() {
            for waiter in flush_waiters.drain(..) {
                let _ = waiter.send(());
            }
            if !open {
                break;
            }
        }

        tokio::select! {
            command = rx.recv(), if open => match command {
                Some(command) => handle(&mut waveform, command, &mut flush_waiters),
                None => {
                    debug!("All waveform handles dropped, draining driver");
                    open = false;
                }
            },
            (ticket, result) = join_query(&mut in_flight) => {
                if let Err(e) = waveform.complete_redraw(ticket, result) {
                    debug!("Redraw left the waveform stalled: {}", e);
                }
            }
        }
    }

    waveform
}

fn handle<R: Renderer>(
    waveform: &mut Waveform<R>,
    command: Command<R>,
    flush_waiters: &mut Vec<oneshot::Sender<()>>,
) {
    match command {
        Command::Push { samples } => waveform.push(&samples),
        Command::Set { samples } => waveform.set(&samples),
        Command::Update { patch, reply } => {
            let _ = reply.send(waveform.update(&patch));
        }
        Command::With { f } => f(waveform),
        Command::Flush { reply } => flush_waiters.push(reply),
    }
}

/// Resolve the in-flight query, or never when there is none.
async fn join_query(in_flight: &mut Option<InFlight>) -> (RedrawTicket, Result<ReducedFrame>) {
    let Some((ticket, worker)) = in_flight.as_mut() else {
        return std::future::pending().await;
    };

    let result = match worker.await {
        Ok(result) => result,
        Err(e) => Err(Error::Render(format!("query worker failed: {}", e))),
    };
    let ticket = *ticket;
    *in_flight = None;
    (ticket, result)
}
