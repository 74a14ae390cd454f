use crate::zones::constraint::{Clock, Constraint};

use super::{action::Action, sync::Sync};

/// The parser-facing label marking an internal move.
pub const TAU_LABEL: &str = "tau";

/// A symbolic transition between two locations. For the transition to be
/// traversable its guard must be satisfiable in the delayed source zone;
/// traversing it resets the listed clocks to zero.
#[derive(Clone, Debug)]
pub struct Transition {
    /// The observable letter, if any. Unlabeled and `tau`-labeled
    /// transitions carry no action.
    action: Option<Action>,
    /// A conjunction of difference constraints on the clocks.
    guards: Vec<Constraint>,
    /// Clocks reset to zero when the transition fires.
    resets: Vec<Clock>,
    /// The channel handshake, if the transition synchronises.
    sync: Option<Sync>,
}

impl Transition {
    pub const fn new(action: Option<Action>) -> Self {
        Self {
            action,
            guards: Vec::new(),
            resets: Vec::new(),
            sync: None,
        }
    }

    pub const fn action(&self) -> Option<Action> {
        self.action
    }

    pub fn guards(&self) -> &[Constraint] {
        &self.guards
    }

    pub fn resets(&self) -> &[Clock] {
        &self.resets
    }

    pub const fn sync(&self) -> Option<&Sync> {
        self.sync.as_ref()
    }

    pub fn add_guard(&mut self, constraint: Constraint) {
        self.guards.push(constraint);
    }

    pub fn add_reset(&mut self, clock: Clock) {
        self.resets.push(clock);
    }

    pub fn set_sync(&mut self, sync: Sync) {
        self.sync = Some(sync);
    }

    pub const fn has_sync(&self) -> bool {
        self.sync.is_some()
    }

    pub const fn is_sender(&self) -> bool {
        match self.sync() {
            Some(sync) => sync.is_sender(),
            None => false,
        }
    }

    pub const fn is_receiver(&self) -> bool {
        match self.sync() {
            Some(sync) => sync.is_receiver(),
            None => false,
        }
    }

    /// A transition is internal (τ) exactly when it neither synchronises nor
    /// carries an observable letter.
    pub const fn is_internal(&self) -> bool {
        self.sync.is_none() && self.action.is_none()
    }

    /// The letter an observer matches this transition on: the explicit action
    /// if present, otherwise the channel name of the handshake. Internal
    /// transitions have no label.
    pub fn label(&self) -> Option<Action> {
        if let Some(action) = self.action {
            return Some(action);
        }
        self.sync.map(|sync| Action::new(*sync.channel()))
    }

    /// The triple validation matches exactly: letter, channel, and direction
    /// must coincide (or both sides must be unsynchronised).
    pub fn sync_signature(&self) -> (Option<Action>, Option<Sync>) {
        (self.label(), self.sync)
    }
}
