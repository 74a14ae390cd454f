use std::fmt::{self, Display, Formatter};
use std::ops::{Add, AddAssign};

/// Aggregate figures of one equivalence check, accumulated across pairs at
/// the system level. Callers persist the CSV row form however they wish; no
/// file I/O happens here.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct CheckStatistics {
    pub refined_states: usize,
    pub abstract_states: usize,
    pub simulation_pairs: usize,
    pub check_time_ms: u64,
    pub memory_usage_bytes: usize,
}

impl CheckStatistics {
    /// Accumulates a result produced on a parallel worker: counts add up,
    /// wall time is the maximum across workers.
    pub fn merge_concurrent(&mut self, other: &Self) {
        self.refined_states += other.refined_states;
        self.abstract_states += other.abstract_states;
        self.simulation_pairs += other.simulation_pairs;
        self.check_time_ms = self.check_time_ms.max(other.check_time_ms);
        self.memory_usage_bytes += other.memory_usage_bytes;
    }

    pub fn csv_header() -> &'static str {
        "model_name,refined_states,abstract_states,simulation_pairs,check_time_ms,memory_usage_bytes,memory_usage_kb"
    }

    pub fn to_csv_row(&self, model_name: &str) -> String {
        format!(
            "{},{},{},{},{},{},{}",
            model_name,
            self.refined_states,
            self.abstract_states,
            self.simulation_pairs,
            self.check_time_ms,
            self.memory_usage_bytes,
            self.memory_usage_bytes as f64 / 1024.0
        )
    }
}

impl Add for CheckStatistics {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            refined_states: self.refined_states + other.refined_states,
            abstract_states: self.abstract_states + other.abstract_states,
            simulation_pairs: self.simulation_pairs + other.simulation_pairs,
            check_time_ms: self.check_time_ms + other.check_time_ms,
            memory_usage_bytes: self.memory_usage_bytes + other.memory_usage_bytes,
        }
    }
}

impl AddAssign for CheckStatistics {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl Display for CheckStatistics {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Equivalence Check Statistics:")?;
        writeln!(f, "  Refined States: {}", self.refined_states)?;
        writeln!(f, "  Abstract States: {}", self.abstract_states)?;
        writeln!(f, "  Simulation Pairs: {}", self.simulation_pairs)?;
        writeln!(f, "  Check Time: {} ms", self.check_time_ms)?;
        write!(f, "  Memory Usage: {} KB", self.memory_usage_bytes / 1024)
    }
}
