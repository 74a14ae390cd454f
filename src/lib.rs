//! Relaxed timed weak bisimulation (RTWBS) checking between timed automata.
//!
//! A refined model (for instance one annotated with distributed time) and an
//! abstract one are compared as a game over their symbolic zone graphs. The
//! timing rule is asymmetric: sent synchronisations may only tighten their
//! enabling window, received ones may only widen it, and internal behaviour
//! is matched under weak (τ-abstracted) semantics.

pub mod automata;
pub mod error;
pub mod zones;

pub use automata::automaton::TimedAutomaton;
pub use automata::cancellation::CancelToken;
pub use automata::driver::{CheckOptions, RunMode, SystemCheckResult};
pub use automata::equivalence::{Checker, Seeding, Variant};
pub use automata::statistics::CheckStatistics;
pub use automata::symbols::SymbolTable;
pub use automata::system::System;
pub use error::Error;
