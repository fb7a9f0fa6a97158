//! State machine runtime

use crate::error::{Result, StateError};
use crate::graph::{State, StateGraph};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};
use warden_channels::{Channel, Sentinel};
use warden_types::SharedScheduler;

const HISTORY_LIMIT: usize = 256;

/// A completed transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition<S> {
    /// `None` for the first transition of a machine without an initial state
    pub from: Option<S>,
    pub to: S,
}

/// Notifications published on [`StateMachine::events`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateEvent<S> {
    /// Published synchronously by `transition_to`
    Transition(StateTransition<S>),
    /// A post-transition callback failed, panicked or was never bound
    CallbackFailed {
        state: S,
        callback: String,
        error: String,
    },
}

/// Post-transition callback
pub type Callback<S> = Arc<dyn Fn(StateTransition<S>) -> anyhow::Result<()> + Send + Sync>;

struct Batch<S> {
    transition: StateTransition<S>,
    callbacks: Vec<(String, Option<Callback<S>>)>,
}

/// Validated state machine held by a component
pub struct StateMachine<S: State> {
    name: String,
    graph: StateGraph<S>,
    current: Mutex<Option<S>>,
    history: Mutex<VecDeque<S>>,
    after: Mutex<HashMap<S, Vec<String>>>,
    bindings: Mutex<HashMap<String, Callback<S>>>,
    sentinel: Arc<Sentinel>,
    events: Channel<StateEvent<S>>,
    queue: Mutex<Option<mpsc::UnboundedSender<Batch<S>>>>,
    scheduler: SharedScheduler,
}

impl<S: State> fmt::Debug for StateMachine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("name", &self.name)
            .field("current", &self.current())
            .finish()
    }
}

impl<S: State> StateMachine<S> {
    /// Build a machine; enters the graph's initial state (without callbacks)
    pub fn new(
        name: impl Into<String>,
        graph: StateGraph<S>,
        scheduler: SharedScheduler,
    ) -> Result<Self> {
        let name = name.into();
        graph.validate(&name)?;

        let sentinel = Arc::new(Sentinel::new());
        let events = Channel::new(format!("{}.events", name), &sentinel);
        let initial = graph.initial_state();
        let after = graph.after_table();

        Ok(Self {
            history: Mutex::new(initial.into_iter().collect()),
            current: Mutex::new(initial),
            name,
            graph,
            after: Mutex::new(after),
            bindings: Mutex::new(HashMap::new()),
            sentinel,
            events,
            queue: Mutex::new(None),
            scheduler,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn graph(&self) -> &StateGraph<S> {
        &self.graph
    }

    pub fn current(&self) -> Option<S> {
        *self.current.lock()
    }

    /// States entered so far, oldest first (bounded)
    pub fn history(&self) -> Vec<S> {
        self.history.lock().iter().copied().collect()
    }

    /// Transition and callback-failure notifications
    pub fn events(&self) -> &Channel<StateEvent<S>> {
        &self.events
    }

    /// Whether the machine is in `state`; `state` must be declared
    pub fn in_state(&self, state: S) -> Result<bool> {
        self.ensure_declared(state)?;
        Ok(self.current() == Some(state))
    }

    /// Bind the implementation of a callback named in the graph
    pub fn bind<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(StateTransition<S>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.bindings.lock().insert(name.into(), Arc::new(callback));
    }

    /// Register and bind a callback for `state` in one step
    pub fn on_enter<F>(&self, state: S, name: impl Into<String>, callback: F) -> Result<()>
    where
        F: Fn(StateTransition<S>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.ensure_declared(state)?;
        let name = name.into();
        self.after.lock().entry(state).or_default().push(name.clone());
        self.bind(name, callback);
        Ok(())
    }

    /// Move to `to`, publish the transition and schedule its callbacks
    pub fn transition_to(&self, to: S) -> Result<StateTransition<S>> {
        self.ensure_declared(to)?;

        let transition = {
            let mut current = self.current.lock();
            if let Some(from) = *current {
                if !self.graph.can_transition(from, to) {
                    return Err(StateError::InvalidTransition {
                        machine: self.name.clone(),
                        from: format!("{:?}", from),
                        to: format!("{:?}", to),
                    });
                }
            }
            let transition = StateTransition { from: *current, to };
            *current = Some(to);

            let mut history = self.history.lock();
            if history.len() == HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(to);
            transition
        };

        debug!(
            machine = %self.name,
            from = ?transition.from,
            to = ?transition.to,
            "State transition"
        );

        // Owner always holds the sentinel; failure only means disposed
        let _ = self
            .events
            .publish(&self.sentinel, &StateEvent::Transition(transition));

        self.schedule_callbacks(transition);
        Ok(transition)
    }

    fn ensure_declared(&self, state: S) -> Result<()> {
        if self.graph.is_declared(state) {
            Ok(())
        } else {
            Err(StateError::UnknownState {
                machine: self.name.clone(),
                state: format!("{:?}", state),
            })
        }
    }

    fn schedule_callbacks(&self, transition: StateTransition<S>) {
        let names = match self.after.lock().get(&transition.to) {
            Some(names) if !names.is_empty() => names.clone(),
            _ => return,
        };

        let callbacks = {
            let bindings = self.bindings.lock();
            names
                .into_iter()
                .map(|name| {
                    let callback = bindings.get(&name).cloned();
                    (name, callback)
                })
                .collect()
        };

        let batch = Batch {
            transition,
            callbacks,
        };

        let mut queue = self.queue.lock();
        let sender = queue.get_or_insert_with(|| self.spawn_worker());
        if let Err(mpsc::error::SendError(batch)) = sender.send(batch) {
            // Worker gone (runtime shut down); restart it once
            let sender = self.spawn_worker();
            let _ = sender.send(batch);
            *queue = Some(sender);
        }
    }

    /// Single worker per machine keeps batches in transition order
    fn spawn_worker(&self) -> mpsc::UnboundedSender<Batch<S>> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Batch<S>>();
        let name = self.name.clone();
        let events = self.events.clone();
        let sentinel = Arc::clone(&self.sentinel);

        self.scheduler.spawn(Box::pin(async move {
            while let Some(batch) = rx.recv().await {
                for (callback_name, callback) in batch.callbacks {
                    let outcome = match callback {
                        Some(callback) => {
                            let transition = batch.transition;
                            match std::panic::catch_unwind(AssertUnwindSafe(|| callback(transition))) {
                                Ok(result) => result.map_err(|e| e.to_string()),
                                Err(_) => Err("callback panicked".to_string()),
                            }
                        }
                        None => Err(format!("no callback bound for '{}'", callback_name)),
                    };

                    if let Err(error) = outcome {
                        error!(
                            machine = %name,
                            state = ?batch.transition.to,
                            callback = %callback_name,
                            error = %error,
                            "Post-transition callback failed"
                        );
                        let _ = events.publish(
                            &sentinel,
                            &StateEvent::CallbackFailed {
                                state: batch.transition.to,
                                callback: callback_name,
                                error,
                            },
                        );
                    }
                }
            }
        }));
        tx
    }
}

impl<S: State> Drop for StateMachine<S> {
    fn drop(&mut self) {
        let _ = self.events.dispose(&self.sentinel);
    }
}
