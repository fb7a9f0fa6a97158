//! State graph declaration

use crate::error::{Result, StateError};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Anything usable as a state
pub trait State: Copy + Eq + Hash + Debug + Send + Sync + 'static {}

impl<T> State for T where T: Copy + Eq + Hash + Debug + Send + Sync + 'static {}

/// Declared states, transition table, initial state and named
/// post-transition callbacks
#[derive(Debug, Clone)]
pub struct StateGraph<S: State> {
    states: Vec<S>,
    transitions: HashMap<S, Vec<S>>,
    after: HashMap<S, Vec<String>>,
    initial: Option<S>,
}

impl<S: State> StateGraph<S> {
    pub fn new(states: impl IntoIterator<Item = S>) -> Self {
        let mut declared = Vec::new();
        for state in states {
            if !declared.contains(&state) {
                declared.push(state);
            }
        }
        Self {
            states: declared,
            transitions: HashMap::new(),
            after: HashMap::new(),
            initial: None,
        }
    }

    /// Allow `from -> to` for every `to`
    pub fn allow(mut self, from: S, to: impl IntoIterator<Item = S>) -> Self {
        let targets = self.transitions.entry(from).or_default();
        for state in to {
            if !targets.contains(&state) {
                targets.push(state);
            }
        }
        self
    }

    /// Allow `to` from every declared state other than itself
    pub fn allow_from_all(mut self, to: S) -> Self {
        let sources: Vec<S> = self.states.iter().copied().filter(|s| *s != to).collect();
        for from in sources {
            self = self.allow(from, [to]);
        }
        self
    }

    pub fn initial(mut self, state: S) -> Self {
        self.initial = Some(state);
        self
    }

    /// Run the callback bound to `name` after every transition into `state`
    pub fn after(mut self, state: S, name: impl Into<String>) -> Self {
        self.after.entry(state).or_default().push(name.into());
        self
    }

    pub fn states(&self) -> &[S] {
        &self.states
    }

    pub fn initial_state(&self) -> Option<S> {
        self.initial
    }

    pub fn is_declared(&self, state: S) -> bool {
        self.states.contains(&state)
    }

    pub fn can_transition(&self, from: S, to: S) -> bool {
        self.transitions
            .get(&from)
            .map_or(false, |targets| targets.contains(&to))
    }

    /// States reachable from `from` in one step
    pub fn targets(&self, from: S) -> &[S] {
        self.transitions.get(&from).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn after_table(&self) -> HashMap<S, Vec<String>> {
        self.after.clone()
    }

    /// Every state referenced by the table must be declared
    pub fn validate(&self, machine: &str) -> Result<()> {
        let referenced = self
            .transitions
            .iter()
            .flat_map(|(from, to)| std::iter::once(from).chain(to.iter()))
            .chain(self.after.keys())
            .chain(self.initial.iter());

        for state in referenced {
            if !self.is_declared(*state) {
                return Err(StateError::InvalidGraph {
                    machine: machine.to_string(),
                    state: format!("{:?}", state),
                });
            }
        }
        Ok(())
    }
}
