use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use log::{debug, warn};
use petgraph::{
    graph::{DiGraph, EdgeIndex, NodeIndex},
    visit::EdgeRef,
    Direction::Outgoing,
};

use crate::error::Error;
use crate::zones::{
    bounds::Bounds,
    constraint::{Clock, Constraint, Limit, Relation, Strictness},
    dbm::{Canonical, DBM},
};

use super::{
    action::Action,
    cancellation::CancelToken,
    location::Location,
    symbols::{Symbol, SymbolTable, ACTIONS, CHANNELS, LOCATIONS},
    sync::Sync,
    transition::{Transition, TAU_LABEL},
    zone_graph::{LocationId, StateId, ZoneGraph, ZoneState},
};

/// The safety cutoff for zone-graph exploration. A graph that reaches it is
/// partial but still usable.
pub const DEFAULT_MAX_STATES: usize = 100_000;

/// The dense index of a transition within its automaton.
pub type TransitionId = usize;

/// A timed automaton: a finite control graph over locations and guarded
/// transitions, together with the symbolic reachability graph of its clock
/// zones. Locations and transitions are addressed by dense indices assigned
/// at insertion; the control graph doubles as the outgoing-by-location
/// index.
#[derive(Clone)]
pub struct TimedAutomaton {
    name: Symbol,
    dimension: Clock,
    graph: DiGraph<Location, Transition>,
    channels: HashSet<Symbol>,
    bounds: Bounds,
    zone_graph: ZoneGraph,
    symbols: Arc<SymbolTable>,
}

impl TimedAutomaton {
    /// Creates an automaton with `clocks` real clocks (dimension is one more
    /// for the reference clock). Both automata of a comparison must share
    /// the symbol table.
    pub fn new(name: &str, clocks: Clock, symbols: Arc<SymbolTable>) -> Self {
        Self {
            name: symbols.intern(super::symbols::TEMPLATES, name),
            dimension: clocks + 1,
            graph: DiGraph::new(),
            channels: HashSet::new(),
            bounds: Bounds::new(clocks),
            zone_graph: ZoneGraph::new(),
            symbols,
        }
    }

    pub fn name(&self) -> &str {
        self.symbols.resolve(self.name)
    }

    /// The number of clocks including the reference clock.
    pub const fn dimension(&self) -> Clock {
        self.dimension
    }

    /// The number of real clocks.
    pub const fn clocks(&self) -> Clock {
        self.dimension - 1
    }

    pub fn symbols(&self) -> &Arc<SymbolTable> {
        &self.symbols
    }

    pub fn bounds(&self) -> &Bounds {
        &self.bounds
    }

    pub fn channels(&self) -> impl Iterator<Item = &Symbol> {
        self.channels.iter()
    }

    // ===== Builder API (driven by the external parser) =====

    pub fn add_location(&mut self, name: &str) -> LocationId {
        let symbol = self.symbols.intern(LOCATIONS, name);
        self.graph.add_node(Location::with_name(symbol)).index()
    }

    pub fn add_invariant(
        &mut self,
        location: LocationId,
        i: Clock,
        j: Clock,
        bound: Limit,
        strictness: Strictness,
    ) {
        if !self.valid_clocks(i, j) {
            warn!(
                "invariant on location {location} uses clock outside dimension {}; ignored",
                self.dimension
            );
            return;
        }

        self.witness_constant(i, j, bound);
        let constraint = Constraint::new(i, j, Relation::new(bound, strictness));
        match self.graph.node_weight_mut(NodeIndex::new(location)) {
            Some(weight) => weight.add_invariant(constraint),
            None => warn!("invariant on unknown location {location}; ignored"),
        }
    }

    /// Adds a transition labeled with an observable action, or an internal
    /// one when the label is empty or the silent label.
    pub fn add_transition(&mut self, from: LocationId, to: LocationId, label: &str) -> TransitionId {
        let action = if label.is_empty() || label == TAU_LABEL {
            None
        } else {
            Some(Action::new(self.symbols.intern(ACTIONS, label)))
        };
        self.graph
            .add_edge(
                NodeIndex::new(from),
                NodeIndex::new(to),
                Transition::new(action),
            )
            .index()
    }

    pub fn add_guard(
        &mut self,
        transition: TransitionId,
        i: Clock,
        j: Clock,
        bound: Limit,
        strictness: Strictness,
    ) {
        if !self.valid_clocks(i, j) {
            warn!(
                "guard on transition {transition} uses clock outside dimension {}; ignored",
                self.dimension
            );
            return;
        }

        self.witness_constant(i, j, bound);
        let constraint = Constraint::new(i, j, Relation::new(bound, strictness));
        match self.graph.edge_weight_mut(EdgeIndex::new(transition)) {
            Some(weight) => weight.add_guard(constraint),
            None => warn!("guard on unknown transition {transition}; ignored"),
        }
    }

    pub fn add_reset(&mut self, transition: TransitionId, clock: Clock) {
        if clock == 0 || clock >= self.dimension {
            warn!(
                "reset of clock {clock} outside dimension {} on transition {transition}; ignored",
                self.dimension
            );
            return;
        }

        match self.graph.edge_weight_mut(EdgeIndex::new(transition)) {
            Some(weight) => weight.add_reset(clock),
            None => warn!("reset on unknown transition {transition}; ignored"),
        }
    }

    pub fn add_synchronization(&mut self, transition: TransitionId, channel: &str, is_sender: bool) {
        let channel = self.symbols.intern(CHANNELS, channel);
        self.channels.insert(channel);
        match self.graph.edge_weight_mut(EdgeIndex::new(transition)) {
            Some(weight) => weight.set_sync(Sync::new(channel, is_sender)),
            None => warn!("synchronization on unknown transition {transition}; ignored"),
        }
    }

    pub fn add_channel(&mut self, channel: &str) {
        let channel = self.symbols.intern(CHANNELS, channel);
        self.channels.insert(channel);
    }

    fn valid_clocks(&self, i: Clock, j: Clock) -> bool {
        i < self.dimension && j < self.dimension
    }

    /// Every integer constant of a guard or invariant is an interesting
    /// constant of the clocks it mentions.
    fn witness_constant(&mut self, i: Clock, j: Clock, bound: Limit) {
        self.bounds.witness(i, bound);
        self.bounds.witness(j, bound);
    }

    // ===== Model observers =====

    pub fn location(&self, id: LocationId) -> Option<&Location> {
        self.graph.node_weight(NodeIndex::new(id))
    }

    pub fn location_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn transition(&self, id: TransitionId) -> Option<&Transition> {
        self.graph.edge_weight(EdgeIndex::new(id))
    }

    pub fn transition_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// The target location of a transition.
    pub fn target_of(&self, id: TransitionId) -> LocationId {
        let (_, to) = self
            .graph
            .edge_endpoints(EdgeIndex::new(id))
            .expect("transition id out of range");
        to.index()
    }

    /// The transitions leaving a location, as (id, transition) pairs.
    pub fn outgoing(
        &self,
        location: LocationId,
    ) -> impl Iterator<Item = (TransitionId, &Transition)> {
        self.graph
            .edges_directed(NodeIndex::new(location), Outgoing)
            .map(|edge| (edge.id().index(), edge.weight()))
    }

    pub fn get_outgoing_transitions(&self, location: LocationId) -> Vec<&Transition> {
        self.outgoing(location).map(|(_, weight)| weight).collect()
    }

    // ===== Symbolic zone operations =====

    /// Tightens the zone by the location's invariant. `None` when the
    /// invariant is violated.
    pub fn apply_invariants(
        &self,
        zone: &DBM<Canonical>,
        location: LocationId,
    ) -> Option<DBM<Canonical>> {
        let invariant = self.location(location)?.invariant();
        zone.clone().constrain_all(invariant).ok()
    }

    /// Lets time grow unboundedly and abstracts bounds beyond each clock's
    /// maximal interesting constant, keeping the zone graph finite.
    pub fn time_elapse(&self, zone: &DBM<Canonical>) -> Option<DBM<Canonical>> {
        let mut elapsed = zone.clone();
        elapsed.up();
        elapsed.extrapolate_max_bounds(&self.bounds).ok()
    }

    /// True when the guard of the transition is satisfiable within the zone.
    pub fn is_transition_enabled(&self, zone: &DBM<Canonical>, transition: &Transition) -> bool {
        zone.clone().constrain_all(transition.guards()).is_ok()
    }

    /// Applies guards and resets. `None` when the guard is unsatisfiable.
    pub fn apply_transition(
        &self,
        zone: &DBM<Canonical>,
        transition: &Transition,
    ) -> Option<DBM<Canonical>> {
        let mut zone = zone.clone().constrain_all(transition.guards()).ok()?;
        for clock in transition.resets() {
            zone.reset(*clock, 0);
        }
        Some(zone)
    }

    /// The full successor pipeline of one transition from a zone state:
    /// invariant, delay, invariant again (delay must not outlive the
    /// invariant), guards and resets, target invariant. `None` prunes the
    /// path.
    pub fn symbolic_successor(
        &self,
        state: &ZoneState,
        transition: TransitionId,
    ) -> Option<(LocationId, DBM<Canonical>)> {
        let weight = self.transition(transition)?;
        let zone = self.apply_invariants(state.zone(), state.location())?;
        let elapsed = self.time_elapse(&zone)?;
        let elapsed = self.apply_invariants(&elapsed, state.location())?;
        let fired = self.apply_transition(&elapsed, weight)?;
        let target = self.target_of(transition);
        let settled = self.apply_invariants(&fired, target)?;
        Some((target, settled))
    }

    // ===== Zone graph =====

    /// Breadth-first construction of the zone graph from the given initial
    /// state. A no-op when already constructed, unless forced.
    pub fn construct_zone_graph(
        &mut self,
        initial: LocationId,
        zone: DBM<Canonical>,
        max_states: usize,
        force: bool,
    ) -> Result<(), Error> {
        self.construct_zone_graph_guarded(initial, zone, max_states, force, &CancelToken::new())
    }

    /// As [`Self::construct_zone_graph`] but polling the token between
    /// explorations; a fired token surfaces as [`Error::Timeout`].
    pub fn construct_zone_graph_guarded(
        &mut self,
        initial: LocationId,
        zone: DBM<Canonical>,
        max_states: usize,
        force: bool,
        token: &CancelToken,
    ) -> Result<(), Error> {
        if zone.dimensions() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                found: zone.dimensions(),
            });
        }

        if self.zone_graph.is_constructed() && !force {
            return Ok(());
        }

        // The pipeline only reads the model, so the graph is grown aside and
        // swapped back in, also on failure.
        let mut graph = std::mem::take(&mut self.zone_graph);
        let result = self.explore(&mut graph, initial, zone, max_states, token);
        self.zone_graph = graph;
        result
    }

    fn explore(
        &self,
        graph: &mut ZoneGraph,
        initial: LocationId,
        zone: DBM<Canonical>,
        max_states: usize,
        token: &CancelToken,
    ) -> Result<(), Error> {
        graph.clear();

        let seed = self
            .apply_invariants(&zone, initial)
            .ok_or(Error::EmptyInitialZone)?;
        let (root, _) = graph.insert(ZoneState::new(initial, seed));

        let mut waiting = VecDeque::from([root]);
        while let Some(id) = waiting.pop_front() {
            if token.guard().is_err() {
                return Err(Error::Timeout);
            }

            if graph.len() >= max_states {
                warn!(
                    "{}: zone graph reached the {max_states} state cutoff; graph is partial",
                    self.name()
                );
                break;
            }

            let state = graph.get(id).expect("waiting ids are inserted").clone();
            let transitions: Vec<TransitionId> =
                self.outgoing(state.location()).map(|(tid, _)| tid).collect();

            for tid in transitions {
                if let Some((target, successor)) = self.symbolic_successor(&state, tid) {
                    let (succ, new) = graph.insert(ZoneState::new(target, successor));
                    graph.add_successor(id, succ);
                    if new {
                        waiting.push_back(succ);
                    }
                }
            }
        }

        graph.mark_constructed();
        debug!("{}: zone graph has {} states", self.name(), graph.len());
        Ok(())
    }

    /// Lazily constructs the zone graph from location 0 and the all-zero
    /// zone. Idempotent.
    pub fn ensure_zone_graph(&mut self) -> Result<(), Error> {
        self.ensure_zone_graph_guarded(&CancelToken::new())
    }

    pub fn ensure_zone_graph_guarded(&mut self, token: &CancelToken) -> Result<(), Error> {
        if self.zone_graph.is_constructed() {
            return Ok(());
        }
        self.construct_zone_graph_guarded(
            0,
            DBM::zero(self.clocks()),
            DEFAULT_MAX_STATES,
            true,
            token,
        )
    }

    pub fn zone_graph(&self) -> &ZoneGraph {
        &self.zone_graph
    }

    pub fn get_zone_state(&self, id: StateId) -> Option<&ZoneState> {
        self.zone_graph.get(id)
    }

    pub fn get_state_id(&self, state: &ZoneState) -> Option<StateId> {
        self.zone_graph.id_of(state)
    }

    pub fn find_zone_state(&self, location: LocationId, zone: &DBM<Canonical>) -> Option<StateId> {
        self.zone_graph.find(location, zone)
    }

    pub fn get_all_zone_states(&self) -> impl Iterator<Item = (StateId, &ZoneState)> {
        self.zone_graph.states()
    }

    pub fn zone_successors(&self, id: StateId) -> &[StateId] {
        self.zone_graph.successors(id)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::automata::symbols::SymbolTable;
    use crate::zones::constraint::Strictness;
    use crate::zones::dbm::DBM;

    use super::{TimedAutomaton, DEFAULT_MAX_STATES};

    fn table() -> Arc<SymbolTable> {
        Arc::new(SymbolTable::new())
    }

    /// L0 --(a!, x <= 5, x := 0)--> L1 with Inv(L1): x <= 3.
    fn send_automaton(symbols: Arc<SymbolTable>) -> TimedAutomaton {
        let mut ta = TimedAutomaton::new("sender", 1, symbols);
        let l0 = ta.add_location("L0");
        let l1 = ta.add_location("L1");
        ta.add_invariant(l1, 1, 0, 3, Strictness::Weak);
        let t = ta.add_transition(l0, l1, "a");
        ta.add_guard(t, 1, 0, 5, Strictness::Weak);
        ta.add_reset(t, 1);
        ta.add_synchronization(t, "a", true);
        ta
    }

    #[test]
    fn builder_assigns_dense_ids() {
        let mut ta = TimedAutomaton::new("dense", 1, table());
        assert_eq!(0, ta.add_location("L0"));
        assert_eq!(1, ta.add_location("L1"));
        assert_eq!(2, ta.add_location("L2"));
        assert_eq!(0, ta.add_transition(0, 1, "a"));
        assert_eq!(1, ta.add_transition(1, 2, "b"));
        assert_eq!(3, ta.location_count());
        assert_eq!(2, ta.transition_count());
        assert_eq!(1, ta.target_of(0));
    }

    #[test]
    fn out_of_range_clocks_are_ignored() {
        let mut ta = TimedAutomaton::new("bad-clocks", 1, table());
        let l0 = ta.add_location("L0");
        let t = ta.add_transition(l0, l0, "a");
        ta.add_guard(t, 7, 0, 5, Strictness::Weak);
        ta.add_invariant(l0, 0, 9, -1, Strictness::Weak);
        ta.add_reset(t, 4);

        assert!(ta.transition(t).unwrap().guards().is_empty());
        assert!(ta.transition(t).unwrap().resets().is_empty());
        assert!(ta.location(l0).unwrap().invariant().is_empty());
    }

    #[test]
    fn tau_and_empty_labels_are_internal() {
        let mut ta = TimedAutomaton::new("internal", 1, table());
        let l0 = ta.add_location("L0");
        let silent = ta.add_transition(l0, l0, "tau");
        let unlabeled = ta.add_transition(l0, l0, "");
        let observable = ta.add_transition(l0, l0, "go");

        assert!(ta.transition(silent).unwrap().is_internal());
        assert!(ta.transition(unlabeled).unwrap().is_internal());
        assert!(!ta.transition(observable).unwrap().is_internal());
    }

    #[test]
    fn zone_graph_of_send_automaton() {
        let mut ta = send_automaton(table());
        ta.ensure_zone_graph().unwrap();

        // Initial state plus the post-reset state in L1.
        assert_eq!(2, ta.zone_graph().len());
        let root = ta.get_zone_state(0).unwrap();
        assert_eq!(0, root.location());
        assert!(!root.zone().is_empty());
        assert_eq!(&[1], ta.zone_successors(0));

        let successor = ta.get_zone_state(1).unwrap();
        assert_eq!(1, successor.location());
        // All stored zones are canonical and non-empty.
        for (_, state) in ta.get_all_zone_states() {
            assert!(!state.zone().is_empty());
        }
    }

    #[test]
    fn construction_is_idempotent_unless_forced() {
        let mut ta = send_automaton(table());
        ta.ensure_zone_graph().unwrap();
        let before = ta.zone_graph().len();

        // Unforced reconstruction with different parameters is a no-op.
        ta.construct_zone_graph(0, DBM::zero(1), 1, false).unwrap();
        assert_eq!(before, ta.zone_graph().len());

        ta.construct_zone_graph(0, DBM::zero(1), DEFAULT_MAX_STATES, true)
            .unwrap();
        assert_eq!(before, ta.zone_graph().len());
    }

    #[test]
    fn unsatisfiable_guard_prunes_successor() {
        let symbols = table();
        let mut ta = TimedAutomaton::new("pruned", 1, symbols);
        let l0 = ta.add_location("L0");
        let l1 = ta.add_location("L1");
        ta.add_invariant(l0, 1, 0, 2, Strictness::Weak);
        let t = ta.add_transition(l0, l1, "a");
        // x >= 5 can never hold while the invariant caps x at 2.
        ta.add_guard(t, 0, 1, -5, Strictness::Weak);

        ta.ensure_zone_graph().unwrap();
        assert_eq!(1, ta.zone_graph().len());
        assert!(ta.zone_successors(0).is_empty());
    }

    #[test]
    fn empty_initial_zone_is_an_error() {
        let symbols = table();
        let mut ta = TimedAutomaton::new("empty-seed", 1, symbols);
        let l0 = ta.add_location("L0");
        // Invariant x <= 0 and x >= 1 is unsatisfiable.
        ta.add_invariant(l0, 1, 0, 0, Strictness::Weak);
        ta.add_invariant(l0, 0, 1, -1, Strictness::Weak);

        let result = ta.construct_zone_graph(0, DBM::zero(1), DEFAULT_MAX_STATES, true);
        assert!(matches!(result, Err(crate::error::Error::EmptyInitialZone)));
    }

    #[test]
    fn max_states_cutoff_leaves_partial_graph() {
        let symbols = table();
        let mut ta = TimedAutomaton::new("cutoff", 1, symbols);
        let l0 = ta.add_location("L0");
        let l1 = ta.add_location("L1");
        let forward = ta.add_transition(l0, l1, "a");
        ta.add_reset(forward, 1);
        let back = ta.add_transition(l1, l0, "b");
        ta.add_reset(back, 1);

        ta.construct_zone_graph(0, DBM::zero(1), 1, true).unwrap();
        assert_eq!(1, ta.zone_graph().len());
        assert!(ta.zone_graph().is_constructed());
    }

    #[test]
    fn find_zone_state_round_trips() {
        let mut ta = send_automaton(table());
        ta.ensure_zone_graph().unwrap();

        for (id, state) in ta.get_all_zone_states() {
            assert_eq!(Some(id), ta.find_zone_state(state.location(), state.zone()));
            assert_eq!(Some(id), ta.get_state_id(state));
        }
        assert_eq!(None, ta.find_zone_state(0, &DBM::universe(1)));
    }
}
