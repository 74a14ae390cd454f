use std::collections::{HashMap, HashSet, VecDeque};
use std::mem::size_of;
use std::time::Instant;

use itertools::Itertools;
use log::{debug, warn};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::error::Error;
use crate::zones::dbm::{Canonical, DBM};

use super::{
    automaton::TimedAutomaton,
    cancellation::{CancelToken, Cancelled},
    statistics::CheckStatistics,
    transition::Transition,
    weak::WeakCache,
    zone_graph::StateId,
};

/// A candidate of the relation: ids of a refined and an abstract zone state.
pub type PairKey = (StateId, StateId);

/// How the candidate relation is seeded. Pruning by zone inclusion is sound
/// for simulation and shrinks the search space considerably, but zones may
/// only become comparable after weak closure; same-location seeding is the
/// permissive alternative.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Seeding {
    /// Pairs with equal locations and refined zone ⊆ abstract zone.
    #[default]
    SubsetOnly,
    /// All pairs with equal locations.
    SameLocation,
}

/// Which halves of the game are played.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Variant {
    /// Observable moves of either side must be answered by the other.
    #[default]
    Bisimulation,
    /// Only refined moves must be answered; the backward half is skipped.
    Simulation,
}

/// Decides relaxed timed weak bisimulation between two timed automata as a
/// greatest fixed point over pairs of zone states. Violating pairs are
/// eliminated through a worklist; the reverse-dependency map re-queues
/// exactly the pairs whose justification cited an eliminated pair.
///
/// All per-run state (relation, worklist, dependencies, weak caches) is
/// cleared at the start of every top-level call. A checker is not meant to
/// be shared between concurrent pair checks; each worker owns its own.
pub struct Checker {
    relation: HashSet<PairKey>,
    worklist: VecDeque<PairKey>,
    reverse_deps: HashMap<PairKey, Vec<PairKey>>,
    refined_cache: WeakCache,
    abstract_cache: WeakCache,
    stats: CheckStatistics,
    token: CancelToken,
    seeding: Seeding,
    variant: Variant,
    batch_workers: Option<usize>,
}

impl Default for Checker {
    fn default() -> Self {
        Self::new()
    }
}

impl Checker {
    pub fn new() -> Self {
        Self {
            relation: HashSet::new(),
            worklist: VecDeque::new(),
            reverse_deps: HashMap::new(),
            refined_cache: WeakCache::new(),
            abstract_cache: WeakCache::new(),
            stats: CheckStatistics::default(),
            token: CancelToken::new(),
            seeding: Seeding::default(),
            variant: Variant::default(),
            batch_workers: None,
        }
    }

    pub fn with_seeding(mut self, seeding: Seeding) -> Self {
        self.seeding = seeding;
        self
    }

    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_token(mut self, token: CancelToken) -> Self {
        self.token = token;
        self
    }

    /// Replaces the single-worklist loop by the batch-parallel fixed point
    /// with the given number of workers (0 auto-detects).
    pub fn with_batch_workers(mut self, workers: usize) -> Self {
        self.batch_workers = Some(workers);
        self
    }

    pub fn set_token(&mut self, token: CancelToken) {
        self.token = token;
    }

    pub fn set_seeding(&mut self, seeding: Seeding) {
        self.seeding = seeding;
    }

    pub fn set_variant(&mut self, variant: Variant) {
        self.variant = variant;
    }

    /// `Some(workers)` selects the batch-parallel fixed point (0 workers
    /// auto-detects), `None` the single worklist.
    pub fn set_batch_workers(&mut self, workers: Option<usize>) {
        self.batch_workers = workers;
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn get_last_check_statistics(&self) -> CheckStatistics {
        self.stats
    }

    pub(crate) fn set_statistics(&mut self, stats: CheckStatistics) {
        self.stats = stats;
    }

    /// Checks whether the refined automaton is RTWBS-equivalent to the
    /// abstract one, constructing both zone graphs lazily.
    pub fn check_equivalence(
        &mut self,
        refined: &mut TimedAutomaton,
        abstracted: &mut TimedAutomaton,
    ) -> Result<bool, Error> {
        let token = self.token.clone();
        refined.ensure_zone_graph_guarded(&token)?;
        abstracted.ensure_zone_graph_guarded(&token)?;
        self.check_pair(refined, abstracted)
    }

    /// The game over two automata whose zone graphs are already built.
    pub(crate) fn check_pair(
        &mut self,
        refined: &TimedAutomaton,
        abstracted: &TimedAutomaton,
    ) -> Result<bool, Error> {
        let start = Instant::now();
        self.clear_run_state();
        self.stats = CheckStatistics::default();

        if refined.dimension() != abstracted.dimension() {
            warn!(
                "{} and {} differ in dimension ({} vs {}); zones are incomparable",
                refined.name(),
                abstracted.name(),
                refined.dimension(),
                abstracted.dimension()
            );
            self.stats.check_time_ms = start.elapsed().as_millis() as u64;
            return Ok(false);
        }

        self.stats.refined_states = refined.zone_graph().len();
        self.stats.abstract_states = abstracted.zone_graph().len();
        if refined.zone_graph().is_empty() || abstracted.zone_graph().is_empty() {
            self.stats.check_time_ms = start.elapsed().as_millis() as u64;
            return Ok(false);
        }

        self.seed(refined, abstracted);
        debug!(
            "{} vs {}: seeded {} candidate pairs",
            refined.name(),
            abstracted.name(),
            self.relation.len()
        );

        let outcome = if self.relation.is_empty() {
            Ok(())
        } else if let Some(workers) = self.batch_workers {
            self.batched_loop(refined, abstracted, workers)
        } else {
            self.serial_loop(refined, abstracted)
        };

        if outcome.is_err() {
            self.relation.clear();
            self.stats.check_time_ms = start.elapsed().as_millis() as u64;
            return Err(Error::Timeout);
        }

        let equivalent = self.relation.contains(&(0, 0));
        self.stats.simulation_pairs = self.relation.len();
        self.stats.memory_usage_bytes = (self.relation.len()
            + self.reverse_deps.values().map(Vec::len).sum::<usize>())
            * size_of::<PairKey>();
        self.stats.check_time_ms = start.elapsed().as_millis() as u64;
        debug!(
            "{} vs {}: fixed point with {} pairs, equivalent: {}",
            refined.name(),
            abstracted.name(),
            self.relation.len(),
            equivalent
        );
        Ok(equivalent)
    }

    fn clear_run_state(&mut self) {
        self.relation.clear();
        self.worklist.clear();
        self.reverse_deps.clear();
        self.refined_cache.clear();
        self.abstract_cache.clear();
    }

    /// Inserts every candidate pair with matching locations (optionally
    /// pruned by zone inclusion) and schedules it for validation.
    fn seed(&mut self, refined: &TimedAutomaton, abstracted: &TimedAutomaton) {
        let abstract_states: Vec<_> = abstracted.get_all_zone_states().collect();

        for ((r, refined_state), (a, abstract_state)) in refined
            .get_all_zone_states()
            .cartesian_product(abstract_states.iter().copied())
        {
            if refined_state.location() != abstract_state.location() {
                continue;
            }
            if self.seeding == Seeding::SubsetOnly
                && !refined_state.zone().is_subset_of(abstract_state.zone())
            {
                continue;
            }

            self.relation.insert((r, a));
            self.worklist.push_back((r, a));
        }
    }

    /// Pops pairs until the worklist runs dry, removing refuted pairs and
    /// re-queueing every parent whose justification cited them.
    fn serial_loop(
        &mut self,
        refined: &TimedAutomaton,
        abstracted: &TimedAutomaton,
    ) -> Result<(), Cancelled> {
        while let Some(current) = self.worklist.pop_front() {
            self.token.guard()?;
            if !self.relation.contains(&current) {
                continue;
            }

            let mut deps = Vec::new();
            let valid = self.validate(refined, abstracted, current, &mut deps)?;
            self.apply_verdict(current, valid, deps);

            if self.relation.is_empty() {
                break;
            }
        }
        Ok(())
    }

    /// The batch-parallel fixed point: a slice of the worklist is validated
    /// concurrently against the current relation as an immutable snapshot,
    /// then removals and dependency edges are applied serially before the
    /// next batch. Within a batch no pair observes another's removal.
    fn batched_loop(
        &mut self,
        refined: &TimedAutomaton,
        abstracted: &TimedAutomaton,
        workers: usize,
    ) -> Result<(), Cancelled> {
        let workers = effective_workers(workers);

        while !self.worklist.is_empty() && !self.relation.is_empty() {
            self.token.guard()?;

            let batch_size = (self.worklist.len() / (2 * workers)).max(1);
            let mut batch = Vec::with_capacity(batch_size);
            while batch.len() < batch_size {
                match self.worklist.pop_front() {
                    Some(pair) => {
                        if self.relation.contains(&pair) {
                            batch.push(pair);
                        }
                    }
                    None => break,
                }
            }
            if batch.is_empty() {
                continue;
            }
            debug!(
                "batch of {} pairs, {} waiting, {} in relation",
                batch.len(),
                self.worklist.len(),
                self.relation.len()
            );

            let verdicts: Vec<Result<(PairKey, bool, Vec<(PairKey, PairKey)>), Cancelled>> = {
                let this: &Self = &*self;
                batch
                    .par_iter()
                    .map(|&pair| {
                        let mut deps = Vec::new();
                        let valid = this.validate(refined, abstracted, pair, &mut deps)?;
                        Ok((pair, valid, deps))
                    })
                    .collect()
            };

            for verdict in verdicts {
                let (pair, valid, deps) = verdict?;
                self.apply_verdict(pair, valid, deps);
            }
        }
        Ok(())
    }

    fn apply_verdict(&mut self, pair: PairKey, valid: bool, deps: Vec<(PairKey, PairKey)>) {
        if valid {
            for (supporting, parent) in deps {
                self.reverse_deps.entry(supporting).or_default().push(parent);
            }
            return;
        }

        self.relation.remove(&pair);
        if let Some(parents) = self.reverse_deps.remove(&pair) {
            for parent in parents {
                if self.relation.contains(&parent) {
                    self.worklist.push_back(parent);
                }
            }
        }
    }

    /// A pair survives when every observable move of the refined side is
    /// weakly answered by the abstract side, and (for bisimulation) the
    /// other way around. Justifying successor pairs are reported so the
    /// caller can record reverse dependencies.
    fn validate(
        &self,
        refined: &TimedAutomaton,
        abstracted: &TimedAutomaton,
        pair: PairKey,
        deps: &mut Vec<(PairKey, PairKey)>,
    ) -> Result<bool, Cancelled> {
        if !self.validate_half(refined, abstracted, pair, Direction::Forward, deps)? {
            return Ok(false);
        }
        if self.variant == Variant::Bisimulation
            && !self.validate_half(refined, abstracted, pair, Direction::Backward, deps)?
        {
            return Ok(false);
        }
        Ok(true)
    }

    fn validate_half(
        &self,
        refined: &TimedAutomaton,
        abstracted: &TimedAutomaton,
        pair: PairKey,
        direction: Direction,
        deps: &mut Vec<(PairKey, PairKey)>,
    ) -> Result<bool, Cancelled> {
        let (r, a) = pair;
        let (mover_ta, mover_id, matcher_ta, matcher_id) = match direction {
            Direction::Forward => (refined, r, abstracted, a),
            Direction::Backward => (abstracted, a, refined, r),
        };

        let mover_location = mover_ta
            .get_zone_state(mover_id)
            .expect("relation holds only graph state ids")
            .location();
        let matcher_location = matcher_ta
            .get_zone_state(matcher_id)
            .expect("relation holds only graph state ids")
            .location();

        for (_, mover_transition) in mover_ta.outgoing(mover_location) {
            if mover_transition.is_internal() {
                continue;
            }
            let Some(action) = mover_transition.label() else {
                continue;
            };

            let mut matched = false;
            for (_, matcher_transition) in matcher_ta.outgoing(matcher_location) {
                if matcher_transition.is_internal() {
                    continue;
                }
                if matcher_transition.sync_signature() != mover_transition.sync_signature() {
                    continue;
                }

                // The backward half swaps the roles wholesale: the mover
                // always plays the refined side of the timing rule.
                if !timing_ok(
                    mover_ta,
                    mover_id,
                    mover_transition,
                    matcher_ta,
                    matcher_id,
                    matcher_transition,
                ) {
                    continue;
                }

                let refined_successors =
                    self.refined_cache
                        .weak_observable_successors(refined, r, action, &self.token)?;
                if refined_successors.is_empty() {
                    continue;
                }
                let abstract_successors = self.abstract_cache.weak_observable_successors(
                    abstracted,
                    a,
                    action,
                    &self.token,
                )?;
                if abstract_successors.is_empty() {
                    continue;
                }

                'support: for &rs in refined_successors.iter() {
                    for &asucc in abstract_successors.iter() {
                        let refined_location = refined
                            .get_zone_state(rs)
                            .expect("weak successors are graph states")
                            .location();
                        let abstract_location = abstracted
                            .get_zone_state(asucc)
                            .expect("weak successors are graph states")
                            .location();
                        if refined_location != abstract_location {
                            continue;
                        }

                        let candidate = (rs, asucc);
                        if self.relation.contains(&candidate) {
                            deps.push((candidate, pair));
                            matched = true;
                            break 'support;
                        }
                    }
                }

                if matched {
                    break;
                }
            }

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

pub(crate) fn effective_workers(workers: usize) -> usize {
    if workers > 0 {
        return workers;
    }
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
}

/// The asymmetric timing rule on one matched transition pair. Both enabling
/// zones Up(Z ∩ Inv) ∩ Guard are computed; if neither side can move the
/// pair is vacuously compatible, if exactly one can it is not. Otherwise
/// internal moves and sends require the refined window to be included in
/// the abstract one, receives the reverse.
fn timing_ok(
    refined: &TimedAutomaton,
    refined_id: StateId,
    refined_transition: &Transition,
    abstracted: &TimedAutomaton,
    abstract_id: StateId,
    abstract_transition: &Transition,
) -> bool {
    let refined_window = enabling_zone(refined, refined_id, refined_transition);
    let abstract_window = enabling_zone(abstracted, abstract_id, abstract_transition);

    let (refined_window, abstract_window) = match (refined_window, abstract_window) {
        (None, None) => return true,
        (Some(refined_window), Some(abstract_window)) => (refined_window, abstract_window),
        _ => return false,
    };

    let (subset, superset) = refined_window.relation(&abstract_window);

    if !refined_transition.has_sync() && !abstract_transition.has_sync() {
        return subset;
    }

    if let (Some(refined_sync), Some(abstract_sync)) =
        (refined_transition.sync(), abstract_transition.sync())
    {
        if refined_sync.channel() == abstract_sync.channel() {
            if refined_sync.is_sender() && abstract_sync.is_sender() {
                // The refined side must not widen the send window.
                return subset;
            }
            if refined_sync.is_receiver() && abstract_sync.is_receiver() {
                // The refined side may wait longer or accept earlier.
                return superset;
            }
        }
    }

    false
}

/// Up((Z ∩ Inv(ℓ))) tightened by the transition's guards. `None` when the
/// window is empty.
fn enabling_zone(
    ta: &TimedAutomaton,
    state: StateId,
    transition: &Transition,
) -> Option<DBM<Canonical>> {
    let state = ta.get_zone_state(state)?;
    let zone = ta.apply_invariants(state.zone(), state.location())?;
    let elapsed = ta.time_elapse(&zone)?;
    elapsed.constrain_all(transition.guards()).ok()
}
