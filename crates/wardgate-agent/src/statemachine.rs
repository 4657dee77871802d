//! Endpoint connection state machine
//!
//! One state is active at a time. Each state runs an asynchronous entry
//! action in its own task under its own cancellation token. A transition
//! cancels the running entry action and waits for it to return before the
//! next state is entered, so two states never run side by side.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use wardgate_proto::{AgentState, AgentStatus};

use crate::runtime::RuntimeConfig;
use crate::states::{self, AgentContext};
use crate::status::StatusFanout;

const EXTERNAL_EVENT_BUFFER: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Disconnected,
    Authenticating,
    Bootstrapping,
    Connected,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Disconnected => "Disconnected",
            State::Authenticating => "Authenticating",
            State::Bootstrapping => "Bootstrapping",
            State::Connected => "Connected",
        };
        f.write_str(s)
    }
}

impl From<State> for AgentState {
    fn from(state: State) -> Self {
        match state {
            State::Disconnected => AgentState::Disconnected,
            State::Authenticating => AgentState::Authenticating,
            State::Bootstrapping => AgentState::Bootstrapping,
            State::Connected => AgentState::Connected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    Login,
    Authenticated,
    Bootstrapped,
    Disconnect,
    /// Nothing to do until the user or the system asks for something
    WaitForExternalEvent,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Event::Login => "Login",
            Event::Authenticated => "Authenticated",
            Event::Bootstrapped => "Bootstrapped",
            Event::Disconnect => "Disconnect",
            Event::WaitForExternalEvent => "WaitForExternalEvent",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("no transition for event {event} in state {state}")]
    NoTransition { event: Event, state: State },
}

/// The transition table. `Ok(None)` means the event is accepted but the
/// state stays as it is.
pub fn transition(event: Event, state: State) -> Result<Option<State>, TransitionError> {
    use Event::*;
    use State::*;

    match (event, state) {
        (Login, Disconnected) => Ok(Some(Authenticating)),
        (Authenticated, Authenticating) => Ok(Some(Bootstrapping)),
        (Bootstrapped, Bootstrapping) => Ok(Some(Connected)),
        (Disconnect, Connected | Authenticating | Bootstrapping) => Ok(Some(Disconnected)),
        (WaitForExternalEvent, Disconnected | Connected) => Ok(None),
        (event, state) => Err(TransitionError::NoTransition { event, state }),
    }
}

/// Emits events from inside an entry action. Events carry the generation of
/// the entry that produced them; the machine drops events from entries that
/// have since been exited.
#[derive(Clone)]
pub struct EventSender {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, Event)>,
}

impl EventSender {
    pub fn send(&self, event: Event) {
        if self.tx.send((self.generation, event)).is_err() {
            tracing::debug!(event = %event, "State machine stopped, dropping event");
        }
    }
}

#[cfg(test)]
impl EventSender {
    /// Sender not attached to a running machine
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<(u64, Event)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { generation: 0, tx }, rx)
    }
}

struct Lifecycle {
    state: State,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Lifecycle {
    /// Cancel the entry action and wait for it to return
    async fn exit(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                tracing::error!(state = %self.state, "State entry action panicked");
            }
        }
        tracing::debug!(state = %self.state, "Exited state");
    }
}

/// Control surface for code outside the state machine
#[derive(Clone)]
pub struct AgentHandle {
    events: mpsc::Sender<Event>,
    status: Arc<StatusFanout>,
    runtime: Arc<dyn RuntimeConfig>,
}

impl AgentHandle {
    /// Queue an event; fails once the state machine has stopped.
    pub async fn send(&self, event: Event) -> Result<(), mpsc::error::SendError<Event>> {
        self.events.send(event).await
    }

    pub async fn login(&self) -> Result<(), mpsc::error::SendError<Event>> {
        self.send(Event::Login).await
    }

    pub async fn disconnect(&self) -> Result<(), mpsc::error::SendError<Event>> {
        self.send(Event::Disconnect).await
    }

    /// Forget the session and identity token, then disconnect.
    pub async fn logout(&self) -> Result<(), mpsc::error::SendError<Event>> {
        self.runtime.clear_session();
        self.runtime.clear_token();
        self.disconnect().await
    }

    pub fn status(&self) -> AgentStatus {
        self.status.current()
    }

    pub fn status_fanout(&self) -> &Arc<StatusFanout> {
        &self.status
    }
}

pub struct StateMachine {
    ctx: AgentContext,
    state: State,
    current: Option<Lifecycle>,
    generation: u64,
    root: CancellationToken,
    internal_tx: mpsc::UnboundedSender<(u64, Event)>,
    internal_rx: mpsc::UnboundedReceiver<(u64, Event)>,
    external_rx: mpsc::Receiver<Event>,
}

impl StateMachine {
    pub fn new(ctx: AgentContext) -> (Self, AgentHandle) {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (external_tx, external_rx) = mpsc::channel(EXTERNAL_EVENT_BUFFER);
        let handle = AgentHandle {
            events: external_tx,
            status: ctx.status.clone(),
            runtime: ctx.runtime.clone(),
        };

        let machine = Self {
            ctx,
            state: State::Disconnected,
            current: None,
            generation: 0,
            root: CancellationToken::new(),
            internal_tx,
            internal_rx,
            external_rx,
        };
        (machine, handle)
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Enter Disconnected and process events until `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        self.enter(State::Disconnected);

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(event) = self.external_rx.recv() => event,
                Some((generation, event)) = self.internal_rx.recv() => {
                    if generation != self.generation {
                        tracing::debug!(event = %event, generation, current = self.generation, "Dropping stale state event");
                        continue;
                    }
                    event
                }
                else => break,
            };

            // Undeclared transitions are logged inside handle_event
            let _ = self.handle_event(event).await;
        }

        self.root.cancel();
        if let Some(current) = self.current.take() {
            current.exit().await;
        }
        tracing::info!("State machine stopped");
    }

    /// Apply one event to the current state.
    pub async fn handle_event(&mut self, event: Event) -> Result<(), TransitionError> {
        match transition(event, self.state) {
            Ok(Some(next)) => {
                tracing::info!(from = %self.state, to = %next, event = %event, "State transition");
                if let Some(current) = self.current.take() {
                    current.exit().await;
                }
                self.enter(next);
                Ok(())
            }
            Ok(None) => {
                tracing::debug!(state = %self.state, event = %event, "Waiting for external event");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring event");
                Err(e)
            }
        }
    }

    fn enter(&mut self, state: State) {
        self.generation += 1;
        self.state = state;
        self.ctx.status.update(|s| s.connection_state = state.into());

        let cancel = self.root.child_token();
        let events = EventSender {
            generation: self.generation,
            tx: self.internal_tx.clone(),
        };
        let task = tokio::spawn(states::enter(
            state,
            self.ctx.clone(),
            cancel.clone(),
            events,
        ));

        self.current = Some(Lifecycle {
            state,
            cancel,
            task,
        });
    }
}
