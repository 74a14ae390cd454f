use std::time::Duration;

use log::{info, warn};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::error::Error;

use super::{
    cancellation::{CancelToken, Watchdog},
    equivalence::{effective_workers, Checker, Seeding, Variant},
    statistics::CheckStatistics,
    system::System,
};

/// How the pairs of a system-level check are scheduled.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum RunMode {
    /// One pair after the other on the calling thread.
    #[default]
    Serial,
    /// Zone graphs are built up front, then one task per pair runs on a
    /// fixed-size thread pool.
    ThreadPool,
}

#[derive(Clone, Copy, Debug)]
pub struct CheckOptions {
    pub mode: RunMode,
    /// Worker threads for the pool and the batched loop; 0 auto-detects.
    pub workers: usize,
    /// Negative disables the watchdog, zero cancels immediately, positive
    /// cancels after that many milliseconds.
    pub timeout_ms: i64,
    pub seeding: Seeding,
    pub variant: Variant,
    /// Use the batch-parallel fixed point inside each pair.
    pub batched: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            mode: RunMode::Serial,
            workers: 0,
            timeout_ms: -1,
            seeding: Seeding::default(),
            variant: Variant::default(),
            batched: false,
        }
    }
}

impl CheckOptions {
    pub fn with_mode(mut self, mode: RunMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_batched(mut self, batched: bool) -> Self {
        self.batched = batched;
        self
    }
}

/// The verdict for one template pair of a detailed system check.
#[derive(Clone, Debug)]
pub struct SystemCheckResult {
    pub index: usize,
    pub refined_template_name: String,
    pub abstract_template_name: String,
    pub is_equivalent: bool,
    pub statistics: CheckStatistics,
}

impl Checker {
    /// Pairwise system-level equivalence: every template of the refined
    /// system must be equivalent to the template at the same index of the
    /// abstract one. Statistics accumulate onto this checker.
    pub fn check_systems(
        &mut self,
        refined: &mut System,
        abstracted: &mut System,
        options: &CheckOptions,
    ) -> Result<bool, Error> {
        self.check_systems_detailed(refined, abstracted, options)
            .map(|(equivalent, _)| equivalent)
    }

    /// As [`Self::check_systems`] but also returning per-pair verdicts and
    /// statistics.
    pub fn check_systems_detailed(
        &mut self,
        refined: &mut System,
        abstracted: &mut System,
        options: &CheckOptions,
    ) -> Result<(bool, Vec<SystemCheckResult>), Error> {
        if refined.size() != abstracted.size() {
            warn!(
                "systems have a different number of automata: {} vs {}",
                refined.size(),
                abstracted.size()
            );
            return Ok((false, Vec::new()));
        }
        if refined.is_empty() {
            info!("both systems are empty; trivially equivalent");
            return Ok((true, Vec::new()));
        }

        let token = CancelToken::new();
        self.set_token(token.clone());
        self.set_seeding(options.seeding);
        self.set_variant(options.variant);
        self.set_batch_workers(options.batched.then_some(options.workers));

        let watchdog = match options.timeout_ms {
            timeout if timeout < 0 => None,
            0 => {
                token.cancel();
                None
            }
            timeout => Some(Watchdog::spawn(
                token.clone(),
                Duration::from_millis(timeout as u64),
            )),
        };

        let outcome = match options.mode {
            RunMode::Serial => self.run_serial(refined, abstracted),
            RunMode::ThreadPool => self.run_pool(refined, abstracted, options, &token),
        };

        if let Some(watchdog) = watchdog {
            watchdog.disarm();
        }

        let (equivalent, results, total) = outcome?;
        self.set_statistics(total);
        info!(
            "system-level result: {}",
            if equivalent { "EQUIVALENT" } else { "NOT EQUIVALENT" }
        );
        Ok((equivalent, results))
    }

    fn run_serial(
        &mut self,
        refined: &mut System,
        abstracted: &mut System,
    ) -> Result<(bool, Vec<SystemCheckResult>, CheckStatistics), Error> {
        let count = refined.size();
        let mut equivalent = true;
        let mut results = Vec::with_capacity(count);
        let mut total = CheckStatistics::default();

        for index in 0..count {
            let refined_name = refined.template_name(index).unwrap_or_default().to_string();
            let abstract_name = abstracted
                .template_name(index)
                .unwrap_or_default()
                .to_string();
            info!(
                "[{}/{count}] checking {refined_name} against {abstract_name}",
                index + 1
            );

            let refined_ta = refined.get_mut(index).expect("index within system size");
            let abstract_ta = abstracted.get_mut(index).expect("index within system size");
            let is_equivalent = self.check_equivalence(refined_ta, abstract_ta)?;
            let statistics = self.get_last_check_statistics();

            equivalent &= is_equivalent;
            total += statistics;
            results.push(SystemCheckResult {
                index,
                refined_template_name: refined_name,
                abstract_template_name: abstract_name,
                is_equivalent,
                statistics,
            });
        }

        Ok((equivalent, results, total))
    }

    /// Graphs are constructed sequentially (they are the only mutable
    /// state), then every pair gets its own checker on the pool, all
    /// sharing the cancel token. Wall time aggregates as the maximum
    /// across workers.
    fn run_pool(
        &mut self,
        refined: &mut System,
        abstracted: &mut System,
        options: &CheckOptions,
        token: &CancelToken,
    ) -> Result<(bool, Vec<SystemCheckResult>, CheckStatistics), Error> {
        refined.construct_all_zone_graphs_guarded(token)?;
        abstracted.construct_all_zone_graphs_guarded(token)?;

        let workers = effective_workers(options.workers);
        let refined_ref: &System = refined;
        let abstracted_ref: &System = abstracted;
        let seeding = options.seeding;
        let variant = options.variant;
        let batched = options.batched;

        let task = |index: &usize| -> Result<SystemCheckResult, Error> {
            let index = *index;
            let mut checker = Checker::new()
                .with_seeding(seeding)
                .with_variant(variant)
                .with_token(token.clone());
            if batched {
                checker = checker.with_batch_workers(workers);
            }

            let refined_ta = refined_ref.get(index).expect("index within system size");
            let abstract_ta = abstracted_ref.get(index).expect("index within system size");
            let is_equivalent = checker.check_pair(refined_ta, abstract_ta)?;

            Ok(SystemCheckResult {
                index,
                refined_template_name: refined_ref
                    .template_name(index)
                    .unwrap_or_default()
                    .to_string(),
                abstract_template_name: abstracted_ref
                    .template_name(index)
                    .unwrap_or_default()
                    .to_string(),
                is_equivalent,
                statistics: checker.get_last_check_statistics(),
            })
        };

        let indices: Vec<usize> = (0..refined_ref.size()).collect();
        let collected: Result<Vec<SystemCheckResult>, Error> =
            match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
                Ok(pool) => pool.install(|| indices.par_iter().map(task).collect()),
                Err(error) => {
                    warn!("dedicated thread pool unavailable ({error}); using the global pool");
                    indices.par_iter().map(task).collect()
                }
            };
        let results = collected?;

        let mut equivalent = true;
        let mut total = CheckStatistics::default();
        for result in results.iter() {
            equivalent &= result.is_equivalent;
            total.merge_concurrent(&result.statistics);
        }

        Ok((equivalent, results, total))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::automata::symbols::SymbolTable;
    use crate::automata::system::System;
    use crate::error::Error;
    use crate::zones::constraint::Strictness;

    use super::super::automaton::TimedAutomaton;
    use super::{CheckOptions, Checker, RunMode};

    fn sender(symbols: &Arc<SymbolTable>, name: &str, bound: i32) -> TimedAutomaton {
        let mut ta = TimedAutomaton::new(name, 1, symbols.clone());
        let l0 = ta.add_location("L0");
        let l1 = ta.add_location("L1");
        let t = ta.add_transition(l0, l1, "a");
        ta.add_guard(t, 1, 0, bound, Strictness::Weak);
        ta.add_synchronization(t, "a", true);
        ta
    }

    fn system_of(symbols: &Arc<SymbolTable>, prefix: &str, bounds: &[i32]) -> System {
        let mut system = System::new(symbols.clone());
        for (index, bound) in bounds.iter().enumerate() {
            system.add_automaton(sender(symbols, &format!("{prefix}{index}"), *bound));
        }
        system
    }

    #[test]
    fn size_mismatch_is_false() {
        let symbols = Arc::new(SymbolTable::new());
        let mut refined = system_of(&symbols, "R", &[5, 5]);
        let mut abstracted = system_of(&symbols, "A", &[5]);

        let mut checker = Checker::new();
        let equivalent = checker
            .check_systems(&mut refined, &mut abstracted, &CheckOptions::default())
            .unwrap();
        assert!(!equivalent);
    }

    #[test]
    fn empty_systems_are_equivalent() {
        let symbols = Arc::new(SymbolTable::new());
        let mut refined = System::new(symbols.clone());
        let mut abstracted = System::new(symbols);

        let mut checker = Checker::new();
        assert!(checker
            .check_systems(&mut refined, &mut abstracted, &CheckOptions::default())
            .unwrap());
    }

    #[test]
    fn serial_and_pool_agree() {
        let symbols = Arc::new(SymbolTable::new());
        let bounds = [5, 7, 9];
        let mut refined = system_of(&symbols, "R", &bounds);
        let mut abstracted = system_of(&symbols, "A", &bounds);

        let mut serial = Checker::new();
        let (serial_verdict, serial_results) = serial
            .check_systems_detailed(&mut refined, &mut abstracted, &CheckOptions::default())
            .unwrap();

        let options = CheckOptions::default()
            .with_mode(RunMode::ThreadPool)
            .with_workers(2);
        let mut pooled = Checker::new();
        let (pool_verdict, pool_results) = pooled
            .check_systems_detailed(&mut refined, &mut abstracted, &options)
            .unwrap();

        assert_eq!(serial_verdict, pool_verdict);
        assert_eq!(serial_results.len(), pool_results.len());
        for (serial_result, pool_result) in serial_results.iter().zip(pool_results.iter()) {
            assert_eq!(serial_result.index, pool_result.index);
            assert_eq!(serial_result.is_equivalent, pool_result.is_equivalent);
            assert_eq!(
                serial_result.statistics.refined_states,
                pool_result.statistics.refined_states
            );
            assert_eq!(
                serial_result.statistics.abstract_states,
                pool_result.statistics.abstract_states
            );
            assert_eq!(
                serial_result.statistics.simulation_pairs,
                pool_result.statistics.simulation_pairs
            );
        }
        assert_eq!(
            serial.get_last_check_statistics().refined_states,
            pooled.get_last_check_statistics().refined_states
        );
    }

    #[test]
    fn one_bad_pair_fails_the_system() {
        let symbols = Arc::new(SymbolTable::new());
        let mut refined = system_of(&symbols, "R", &[5, 10]);
        let mut abstracted = system_of(&symbols, "A", &[5, 5]);

        let mut checker = Checker::new();
        let (equivalent, results) = checker
            .check_systems_detailed(&mut refined, &mut abstracted, &CheckOptions::default())
            .unwrap();
        assert!(!equivalent);
        assert!(results[0].is_equivalent);
        assert!(!results[1].is_equivalent);
        assert_eq!("R1", results[1].refined_template_name);
        assert_eq!("A1", results[1].abstract_template_name);
    }

    #[test]
    fn zero_timeout_cancels_immediately() {
        let symbols = Arc::new(SymbolTable::new());
        let mut refined = system_of(&symbols, "R", &[5]);
        let mut abstracted = system_of(&symbols, "A", &[5]);

        for mode in [RunMode::Serial, RunMode::ThreadPool] {
            let options = CheckOptions::default().with_mode(mode).with_timeout_ms(0);
            let mut checker = Checker::new();
            assert_eq!(
                Err(Error::Timeout),
                checker.check_systems(&mut refined, &mut abstracted, &options)
            );
        }
    }

    #[test]
    fn generous_timeout_does_not_fire() {
        let symbols = Arc::new(SymbolTable::new());
        let mut refined = system_of(&symbols, "R", &[5]);
        let mut abstracted = system_of(&symbols, "A", &[5]);

        let options = CheckOptions::default().with_timeout_ms(60_000);
        let mut checker = Checker::new();
        assert!(checker
            .check_systems(&mut refined, &mut abstracted, &options)
            .unwrap());
    }
}
