use std::hash::{Hash, Hasher};

use indexmap::{Equivalent, IndexSet};

use crate::zones::dbm::{Canonical, DBM};

/// The dense index of a location within its automaton.
pub type LocationId = usize;

/// The index of a zone state within its automaton's zone graph. State 0 is
/// always the initial state. Ids stay valid for the lifetime of the graph;
/// everything outside the graph refers to states by id only.
pub type StateId = usize;

/// A state of the zone graph: a control location paired with the canonical
/// zone of clock valuations reaching it. Two states are equal exactly when
/// location and canonical DBM coincide.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ZoneState {
    location: LocationId,
    zone: DBM<Canonical>,
}

impl ZoneState {
    pub const fn new(location: LocationId, zone: DBM<Canonical>) -> Self {
        Self { location, zone }
    }

    pub const fn location(&self) -> LocationId {
        self.location
    }

    pub const fn zone(&self) -> &DBM<Canonical> {
        &self.zone
    }
}

/// Borrowed lookup key sparing the zone clone on [`ZoneGraph::find`].
struct ZoneStateRef<'a> {
    location: LocationId,
    zone: &'a DBM<Canonical>,
}

impl Hash for ZoneStateRef<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.location.hash(state);
        self.zone.hash(state);
    }
}

impl Equivalent<ZoneState> for ZoneStateRef<'_> {
    fn equivalent(&self, key: &ZoneState) -> bool {
        self.location == key.location && *self.zone == key.zone
    }
}

/// The symbolic reachability graph of one automaton. The insertion-ordered
/// set is simultaneously the arena (index = id) and the de-duplication map;
/// the adjacency list is indexed by state id. Once constructed the graph is
/// immutable.
#[derive(Clone, Default)]
pub struct ZoneGraph {
    states: IndexSet<ZoneState>,
    successors: Vec<Vec<StateId>>,
    constructed: bool,
}

impl ZoneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.states.clear();
        self.successors.clear();
        self.constructed = false;
    }

    pub fn is_constructed(&self) -> bool {
        self.constructed
    }

    pub(crate) fn mark_constructed(&mut self) {
        self.constructed = true;
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Inserts the state unless an equal one exists. Returns the id and
    /// whether the state was new.
    pub(crate) fn insert(&mut self, state: ZoneState) -> (StateId, bool) {
        let (id, new) = self.states.insert_full(state);
        if new {
            self.successors.push(Vec::new());
        }
        (id, new)
    }

    pub(crate) fn add_successor(&mut self, from: StateId, to: StateId) {
        self.successors[from].push(to);
    }

    pub fn get(&self, id: StateId) -> Option<&ZoneState> {
        self.states.get_index(id)
    }

    /// O(1) lookup of the id of the state equal to (location, zone).
    pub fn find(&self, location: LocationId, zone: &DBM<Canonical>) -> Option<StateId> {
        self.states.get_index_of(&ZoneStateRef { location, zone })
    }

    pub fn id_of(&self, state: &ZoneState) -> Option<StateId> {
        self.states.get_index_of(state)
    }

    pub fn states(&self) -> impl Iterator<Item = (StateId, &ZoneState)> {
        self.states.iter().enumerate()
    }

    pub fn successors(&self, id: StateId) -> &[StateId] {
        &self.successors[id]
    }
}

#[cfg(test)]
mod tests {
    use crate::zones::dbm::DBM;

    use super::{ZoneGraph, ZoneState};

    #[test]
    fn insert_deduplicates_equal_states() {
        let mut graph = ZoneGraph::new();
        let (first, new) = graph.insert(ZoneState::new(0, DBM::zero(1)));
        assert!(new);
        let (second, new) = graph.insert(ZoneState::new(0, DBM::zero(1)));
        assert!(!new);
        assert_eq!(first, second);
        assert_eq!(1, graph.len());
    }

    #[test]
    fn states_differ_by_location_or_zone() {
        let mut graph = ZoneGraph::new();
        graph.insert(ZoneState::new(0, DBM::zero(1)));
        let (id_loc, new_loc) = graph.insert(ZoneState::new(1, DBM::zero(1)));
        assert!(new_loc);
        let (id_zone, new_zone) = graph.insert(ZoneState::new(0, DBM::universe(1)));
        assert!(new_zone);
        assert_ne!(id_loc, id_zone);
        assert_eq!(3, graph.len());
    }

    #[test]
    fn find_matches_insert_ids() {
        let mut graph = ZoneGraph::new();
        let (id, _) = graph.insert(ZoneState::new(3, DBM::universe(2)));
        assert_eq!(Some(id), graph.find(3, &DBM::universe(2)));
        assert_eq!(None, graph.find(3, &DBM::zero(2)));
        assert_eq!(None, graph.find(4, &DBM::universe(2)));
    }

    #[test]
    fn successors_follow_insertion() {
        let mut graph = ZoneGraph::new();
        let (a, _) = graph.insert(ZoneState::new(0, DBM::zero(1)));
        let (b, _) = graph.insert(ZoneState::new(1, DBM::universe(1)));
        graph.add_successor(a, b);
        assert_eq!(&[b], graph.successors(a));
        assert!(graph.successors(b).is_empty());
    }

    #[test]
    fn clear_resets_construction() {
        let mut graph = ZoneGraph::new();
        graph.insert(ZoneState::new(0, DBM::zero(1)));
        graph.mark_constructed();
        assert!(graph.is_constructed());
        graph.clear();
        assert!(!graph.is_constructed());
        assert!(graph.is_empty());
    }
}
