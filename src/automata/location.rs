use std::fmt::{self, Display, Formatter};

use crate::zones::constraint::Constraint;

use super::symbols::Symbol;

/// A discrete control location. The invariant is a conjunction of difference
/// constraints which must hold for as long as the automaton stays here; it
/// also bounds how far time may elapse before a transition must fire.
#[derive(Clone, Debug)]
pub struct Location {
    name: Symbol,
    invariant: Vec<Constraint>,
}

impl Location {
    pub const fn new(name: Symbol, invariant: Vec<Constraint>) -> Self {
        Self { name, invariant }
    }

    pub fn with_name(name: Symbol) -> Self {
        Self::new(name, Vec::new())
    }

    pub const fn name(&self) -> &Symbol {
        &self.name
    }

    pub fn invariant(&self) -> &[Constraint] {
        &self.invariant
    }

    pub fn add_invariant(&mut self, constraint: Constraint) {
        self.invariant.push(constraint);
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}", self.name)?;
        for constraint in self.invariant.iter() {
            write!(f, ", {}", constraint)?;
        }
        write!(f, "]")
    }
}
