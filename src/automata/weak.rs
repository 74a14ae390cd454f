use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;

use super::{
    action::Action,
    automaton::TimedAutomaton,
    cancellation::{CancelToken, Cancelled},
    zone_graph::StateId,
};

/// Memoised weak semantics of one side of a check: τ-closures and weak
/// observable successors (τ*·a·τ*), keyed by zone-state ids. The maps are
/// concurrent so batch-parallel validators can share one cache; entries are
/// only ever added, never mutated.
#[derive(Default)]
pub(crate) struct WeakCache {
    tau: DashMap<StateId, Arc<[StateId]>>,
    weak: DashMap<(StateId, Action), Arc<[StateId]>>,
}

impl WeakCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.tau.clear();
        self.weak.clear();
    }

    /// Every zone state reachable from `start` using internal moves only,
    /// including `start` itself.
    pub fn tau_closure(
        &self,
        ta: &TimedAutomaton,
        start: StateId,
        token: &CancelToken,
    ) -> Result<Arc<[StateId]>, Cancelled> {
        if let Some(hit) = self.tau.get(&start) {
            return Ok(hit.value().clone());
        }

        let closure: Arc<[StateId]> = tau_closure_raw(ta, start, token)?.into();
        self.tau.insert(start, closure.clone());
        Ok(closure)
    }

    /// Every zone state reachable from `start` by τ*·a·τ* for the given
    /// observable letter, deduplicated. Empty exactly when the letter is not
    /// weakly enabled.
    pub fn weak_observable_successors(
        &self,
        ta: &TimedAutomaton,
        start: StateId,
        action: Action,
        token: &CancelToken,
    ) -> Result<Arc<[StateId]>, Cancelled> {
        if let Some(hit) = self.weak.get(&(start, action)) {
            return Ok(hit.value().clone());
        }

        let mut successors = Vec::new();
        let mut seen: HashSet<StateId> = HashSet::new();

        for &pre in self.tau_closure(ta, start, token)?.iter() {
            token.guard()?;
            let Some(state) = ta.get_zone_state(pre) else {
                continue;
            };

            for (tid, transition) in ta.outgoing(state.location()) {
                if transition.is_internal() || transition.label() != Some(action) {
                    continue;
                }

                let Some((target, zone)) = ta.symbolic_successor(state, tid) else {
                    continue;
                };
                // Successors outside the (possibly truncated) graph are
                // treated as absent.
                let Some(mid) = ta.find_zone_state(target, &zone) else {
                    continue;
                };

                for &post in self.tau_closure(ta, mid, token)?.iter() {
                    if seen.insert(post) {
                        successors.push(post);
                    }
                }
            }
        }

        let successors: Arc<[StateId]> = successors.into();
        self.weak.insert((start, action), successors.clone());
        Ok(successors)
    }
}

fn tau_closure_raw(
    ta: &TimedAutomaton,
    start: StateId,
    token: &CancelToken,
) -> Result<Vec<StateId>, Cancelled> {
    let mut closure = Vec::new();
    let mut visited: HashSet<StateId> = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);

    while let Some(id) = queue.pop_front() {
        token.guard()?;
        closure.push(id);

        let Some(state) = ta.get_zone_state(id) else {
            continue;
        };

        for (tid, transition) in ta.outgoing(state.location()) {
            if !transition.is_internal() {
                continue;
            }

            let Some((target, zone)) = ta.symbolic_successor(state, tid) else {
                continue;
            };
            let Some(next) = ta.find_zone_state(target, &zone) else {
                continue;
            };

            if visited.insert(next) {
                queue.push_back(next);
            }
        }
    }

    Ok(closure)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::automata::action::Action;
    use crate::automata::cancellation::CancelToken;
    use crate::automata::symbols::{SymbolTable, ACTIONS};

    use super::super::automaton::TimedAutomaton;
    use super::WeakCache;

    /// L0 -τ-> L1 -a-> L2 -τ-> L3.
    fn chain() -> (TimedAutomaton, Action) {
        let symbols = Arc::new(SymbolTable::new());
        let action = Action::new(symbols.intern(ACTIONS, "a"));

        let mut ta = TimedAutomaton::new("chain", 1, symbols);
        let l0 = ta.add_location("L0");
        let l1 = ta.add_location("L1");
        let l2 = ta.add_location("L2");
        let l3 = ta.add_location("L3");
        ta.add_transition(l0, l1, "tau");
        ta.add_transition(l1, l2, "a");
        ta.add_transition(l2, l3, "");
        ta.ensure_zone_graph().unwrap();
        (ta, action)
    }

    #[test]
    fn tau_closure_follows_internal_chain() {
        let (ta, _) = chain();
        let cache = WeakCache::new();
        let token = CancelToken::new();

        let closure = cache.tau_closure(&ta, 0, &token).unwrap();
        let locations: Vec<usize> = closure
            .iter()
            .map(|&id| ta.get_zone_state(id).unwrap().location())
            .collect();
        assert_eq!(vec![0, 1], locations);
    }

    #[test]
    fn weak_successors_cross_taus_on_both_sides() {
        let (ta, action) = chain();
        let cache = WeakCache::new();
        let token = CancelToken::new();

        let successors = cache
            .weak_observable_successors(&ta, 0, action, &token)
            .unwrap();
        let mut locations: Vec<usize> = successors
            .iter()
            .map(|&id| ta.get_zone_state(id).unwrap().location())
            .collect();
        locations.sort_unstable();
        assert_eq!(vec![2, 3], locations);
    }

    #[test]
    fn unknown_action_has_no_weak_successors() {
        let (ta, _) = chain();
        let symbols = ta.symbols().clone();
        let missing = Action::new(symbols.intern(ACTIONS, "missing"));
        let cache = WeakCache::new();
        let token = CancelToken::new();

        let successors = cache
            .weak_observable_successors(&ta, 0, missing, &token)
            .unwrap();
        assert!(successors.is_empty());
    }

    #[test]
    fn cancellation_unwinds() {
        let (ta, action) = chain();
        let cache = WeakCache::new();
        let token = CancelToken::new();
        token.cancel();

        assert!(cache.tau_closure(&ta, 0, &token).is_err());
        assert!(cache
            .weak_observable_successors(&ta, 0, action, &token)
            .is_err());
    }

    #[test]
    fn closures_are_memoised() {
        let (ta, action) = chain();
        let cache = WeakCache::new();
        let token = CancelToken::new();

        let first = cache
            .weak_observable_successors(&ta, 0, action, &token)
            .unwrap();
        let second = cache
            .weak_observable_successors(&ta, 0, action, &token)
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}
