//! Pull-based event stream for one Executor run.
//!
//! Each event is handed over with an acknowledgement channel. The producer
//! waits for the acknowledgement, which the consumer sends when it takes the
//! event, so a run never gets more than one event ahead of its reader.

use chrono::Utc;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::DropGuard;

use crate::executor::RunOutput;
use mull_core::{Event, EventPayload, MullError, Result};

type Delivery = (Event, oneshot::Sender<()>);

/// Numbers and delivers events for one run.
pub(crate) struct Emitter {
    agent_id: String,
    sequence: u64,
    sink: Option<mpsc::Sender<Delivery>>,
}

impl Emitter {
    /// Events are numbered but go nowhere.
    pub(crate) fn silent(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            sequence: 0,
            sink: None,
        }
    }

    fn connected(agent_id: impl Into<String>, sink: mpsc::Sender<Delivery>) -> Self {
        Self {
            agent_id: agent_id.into(),
            sequence: 0,
            sink: Some(sink),
        }
    }

    pub(crate) fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Wait until the consumer has taken the event. A gone consumer turns
    /// the emitter silent.
    pub(crate) async fn emit(&mut self, payload: EventPayload) {
        self.sequence += 1;
        let event = Event {
            sequence: self.sequence,
            agent_id: self.agent_id.clone(),
            timestamp: Utc::now(),
            payload,
        };
        let Some(sink) = &self.sink else {
            return;
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if sink.send((event, ack_tx)).await.is_err() || ack_rx.await.is_err() {
            self.sink = None;
        }
    }
}

/// The events of a run in sequence order, ending with exactly one `done`
/// or `error`. Call [`RunStream::finish`] for the typed outcome.
///
/// Dropping the stream cancels the run.
pub struct RunStream {
    rx: mpsc::Receiver<Delivery>,
    handle: Option<JoinHandle<Result<RunOutput>>>,
    _cancel_on_drop: DropGuard,
}

impl RunStream {
    pub(crate) fn channel(agent_id: &str) -> (Emitter, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(1);
        (Emitter::connected(agent_id, tx), rx)
    }

    pub(crate) fn new(
        rx: mpsc::Receiver<Delivery>,
        handle: JoinHandle<Result<RunOutput>>,
        guard: DropGuard,
    ) -> Self {
        Self {
            rx,
            handle: Some(handle),
            _cancel_on_drop: guard,
        }
    }

    /// Drain any unread events and return the run's outcome.
    pub async fn finish(mut self) -> Result<RunOutput> {
        while let Some((_, ack)) = self.rx.recv().await {
            let _ = ack.send(());
        }
        self.join().await
    }

    /// Read every event, then return them with the run's outcome.
    pub async fn collect_all(mut self) -> (Vec<Event>, Result<RunOutput>) {
        let mut events = Vec::new();
        while let Some((event, ack)) = self.rx.recv().await {
            let _ = ack.send(());
            events.push(event);
        }
        let outcome = self.join().await;
        (events, outcome)
    }

    async fn join(&mut self) -> Result<RunOutput> {
        match self.handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| MullError::Other(anyhow::anyhow!("run task failed: {e}")))?,
            None => Err(MullError::Other(anyhow::anyhow!("run already finished"))),
        }
    }
}

impl Stream for RunStream {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        let this = self.get_mut();
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some((event, ack))) => {
                let _ = ack.send(());
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl std::fmt::Debug for RunStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunStream")
            .field("finished", &self.handle.is_none())
            .finish()
    }
}
