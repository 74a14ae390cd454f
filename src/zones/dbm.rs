use std::hash::{Hash, Hasher};
use std::ops::{Index, IndexMut};

use super::{
    bounds::Bounds,
    constraint::{Clock, Constraint, Limit, Relation, Strictness, INFINITY, REFERENCE, ZERO},
};

pub trait DBMState: Sized {}

/// A difference-bound matrix over `clocks` indices where index 0 is the
/// reference clock. Cell (i, j) bounds the difference x_i - x_j. The type
/// parameter tracks whether the matrix is known to be canonical.
#[derive(Clone, Debug)]
pub struct DBM<State: DBMState> {
    /// The number of clocks inside the DBM including the reference clock.
    clocks: Clock,
    /// The relations between the clocks.
    relations: Box<[Relation]>,
    /// The internal state important for the current type of DBM.
    state: State,
}

impl<State: DBMState> DBM<State> {
    /// Returns the number of clocks excluding the reference clock.
    pub const fn clocks(&self) -> Clock {
        self.clocks - 1
    }

    /// Returns the number of clocks including the reference clock.
    pub const fn dimensions(&self) -> Clock {
        self.clocks
    }

    pub const fn constraints(&self) -> usize {
        (self.dimensions() as usize) * (self.dimensions() as usize)
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    #[inline]
    pub const fn index(&self, i: Clock, j: Clock) -> usize {
        (i as usize) * (self.dimensions() as usize) + (j as usize)
    }

    #[inline]
    fn get(&self, i: Clock, j: Clock) -> Relation {
        self.relations[self.index(i, j)]
    }

    #[inline]
    fn set(&mut self, i: Clock, j: Clock, relation: Relation) {
        let index = self.index(i, j);
        self.relations[index] = relation
    }

    #[inline]
    pub fn tightens(&self, i: Clock, j: Clock, relation: Relation) -> bool {
        relation < self[(i, j)]
    }

    #[inline]
    pub fn upper(&self, clock: Clock) -> Relation {
        self.relations[self.index(clock, REFERENCE)]
    }

    #[inline]
    fn set_upper(&mut self, clock: Clock, relation: Relation) {
        let index = self.index(clock, REFERENCE);
        self.relations[index] = relation
    }

    #[inline]
    pub fn lower(&self, clock: Clock) -> Relation {
        self.relations[self.index(REFERENCE, clock)]
    }

    /// The up operation computes the strongest postcondition of a zone with respect to delay.
    /// Afterwards the DBM contains the clock assignments that can be reached by delay.
    /// up(D) = {u + d | u ∈ D, d ∈ ℝ+}.
    /// This operation preserves the canonical form thereby applying it on a canonical DBM
    /// will result in a new canonical DBM.
    pub fn up(&mut self) {
        for i in REFERENCE + 1..self.dimensions() {
            self.set_upper(i, INFINITY);
        }
    }

    /// Sets the clock to be assigned to its limit. This is expressed as {u[x=m] | u ∈ D}.
    /// Preserves the canonical form.
    pub fn reset(&mut self, clock: Clock, limit: Limit) {
        let positive = Relation::new(limit, Strictness::Weak);
        let negative = Relation::new(-limit, Strictness::Weak);
        for i in REFERENCE..self.dimensions() {
            self.set(clock, i, positive.addition(&self.lower(i)));
            self.set(i, clock, self.upper(i).addition(&negative));
        }
        self.set(clock, clock, ZERO);
    }

    #[inline]
    fn empty(mut self) -> DBM<Unsafe> {
        self.set(REFERENCE, REFERENCE, Relation::strict(-1));
        DBM {
            clocks: self.clocks,
            relations: self.relations,
            state: Unsafe {},
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        for c in REFERENCE..self.dimensions() {
            if self[(c, c)] < ZERO {
                return true;
            }
        }
        false
    }

    pub fn fmt_conjunctions(&self, labels: &[&str]) -> String {
        let mut conjunctions: Vec<String> = Vec::new();

        for i in REFERENCE + 1..self.dimensions() {
            // Lower bound: 0 - c R N.
            let lower = self.lower(i);
            if !lower.is_infinity() {
                conjunctions.push(format!(
                    "-{} {} {}",
                    labels[(i - 1) as usize],
                    lower.strictness(),
                    lower.limit()
                ));
            }

            // Upper bound: c - 0 R N.
            let upper = self.upper(i);
            if !upper.is_infinity() {
                conjunctions.push(format!(
                    "{} {} {}",
                    labels[(i - 1) as usize],
                    upper.strictness(),
                    upper.limit()
                ));
            }

            for j in REFERENCE + 1..self.dimensions() {
                if i == j {
                    continue;
                }

                let relation = self.get(i, j);
                if relation.is_infinity() {
                    continue;
                }

                // Difference constraints: c0 - c1 R N.
                conjunctions.push(format!(
                    "{} - {} {} {}",
                    labels[(i - 1) as usize],
                    labels[(j - 1) as usize],
                    relation.strictness(),
                    relation.limit()
                ));
            }
        }

        conjunctions.join(" ∧ ")
    }
}

impl<T: DBMState> Index<(Clock, Clock)> for DBM<T> {
    type Output = Relation;

    fn index(&self, index: (Clock, Clock)) -> &Self::Output {
        let (i, j) = index;
        &self.relations[self.index(i, j)]
    }
}

#[derive(Clone, Debug)]
pub struct Canonical {}
impl DBMState for Canonical {}

impl DBM<Canonical> {
    /// Returns the most strictly constrained DBM where all clocks are zero.
    pub fn zero(clocks: Clock) -> Self {
        let dimension = clocks + 1;
        Self {
            clocks: dimension,
            relations: vec![ZERO; (dimension as usize) * (dimension as usize)].into_boxed_slice(),
            state: Canonical {},
        }
    }

    /// Returns an unconstrained DBM.
    pub fn universe(clocks: Clock) -> Self {
        let dimension = clocks + 1;
        let mut dbm = Self {
            clocks: dimension,
            relations: vec![INFINITY; (dimension as usize) * (dimension as usize)]
                .into_boxed_slice(),
            state: Canonical {},
        };

        for i in 0..dimension {
            dbm.set(REFERENCE, i, ZERO);
            dbm.set(i, i, ZERO);
        }

        dbm
    }

    /// Returns a tuple (subset, superset) of:
    /// subset is true then self is a subset of other.
    /// superset is true then self is a superset of other.
    /// If both subset and superset then they are equal.
    pub fn relation(&self, other: &Self) -> (bool, bool) {
        let mut subset = true;
        let mut superset = true;

        for i in REFERENCE..self.dimensions() {
            for j in REFERENCE..self.dimensions() {
                if !subset && !superset {
                    return (subset, superset);
                }

                let lhs = self.get(i, j);
                let rhs = other.get(i, j);

                subset = subset && (lhs <= rhs);
                superset = superset && (lhs >= rhs);
            }
        }

        (subset, superset)
    }

    /// Returns true if all valuations of self are also in other.
    pub fn is_subset_of(&self, other: &Self) -> bool {
        let (subset, _) = self.relation(other);
        subset
    }

    /// Returns true if all valuations of other are also in self.
    pub fn is_superset_of(&self, other: &Self) -> bool {
        let (_, superset) = self.relation(other);
        superset
    }

    pub fn is_eq(&self, other: &Self) -> bool {
        let (subset, superset) = self.relation(other);
        subset && superset
    }

    pub fn is_different(&self, other: &Self) -> bool {
        let (subset, superset) = self.relation(other);
        !subset && !superset
    }

    /// Re-closes the DBM after cell (i, j) was tightened. On a previously
    /// canonical DBM every improved path uses the tightened edge exactly
    /// once, so a single pass over p - i - j - q suffices. A negative cycle
    /// through (i, j) surfaces as a negative diagonal.
    pub fn close_ij(mut self, i: Clock, j: Clock) -> Result<DBM<Canonical>, DBM<Unsafe>> {
        let ij = self[(i, j)];

        for p in REFERENCE..self.dimensions() {
            let pi = self[(p, i)];
            if pi.is_infinity() {
                continue;
            }

            let pij = pi.addition(&ij);
            for q in REFERENCE..self.dimensions() {
                let jq = self[(j, q)];
                if jq.is_infinity() {
                    continue;
                }

                let pq = pij.addition(&jq);
                if self[(p, q)] > pq {
                    self.set(p, q, pq);
                }
            }
        }

        if self.is_empty() {
            return Err(self.empty());
        }
        Ok(self)
    }

    /// Only if the new relation tightens the existing relation
    /// is the relation updated and closed.
    pub fn tighten(
        mut self,
        i: Clock,
        j: Clock,
        relation: Relation,
    ) -> Result<DBM<Canonical>, DBM<Unsafe>> {
        if self.tightens(i, j, relation) {
            self.set(i, j, relation);
            return self.close_ij(i, j);
        }
        Ok(self)
    }

    pub fn tighten_upper(
        self,
        clock: Clock,
        relation: Relation,
    ) -> Result<DBM<Canonical>, DBM<Unsafe>> {
        self.tighten(clock, REFERENCE, relation)
    }

    pub fn tighten_lower(
        self,
        clock: Clock,
        relation: Relation,
    ) -> Result<DBM<Canonical>, DBM<Unsafe>> {
        self.tighten(REFERENCE, clock, relation)
    }

    /// Tightens by a single difference constraint.
    pub fn constrain(self, constraint: &Constraint) -> Result<DBM<Canonical>, DBM<Unsafe>> {
        self.tighten(
            constraint.minuend(),
            constraint.subtrahend(),
            constraint.relation(),
        )
    }

    /// Tightens by a conjunction of constraints, failing on the first
    /// inconsistency.
    pub fn constrain_all<'a>(
        self,
        constraints: impl IntoIterator<Item = &'a Constraint>,
    ) -> Result<DBM<Canonical>, DBM<Unsafe>> {
        let mut dbm = self;
        for constraint in constraints {
            dbm = dbm.constrain(constraint)?;
        }
        Ok(dbm)
    }

    /// Removes every bound that exceeds the clock's maximal interesting
    /// constant. Finite upper bounds above M(x) become infinite and lower
    /// bounds below -M(x) are capped at (-M(x), <). The result is
    /// re-canonicalised; loosening cannot make the zone empty.
    pub fn extrapolate_max_bounds(self, bounds: &Bounds) -> Result<Self, DBM<Unsafe>> {
        let mut dirty = self.dirty();

        for i in REFERENCE..dirty.dimensions() {
            for j in REFERENCE..dirty.dimensions() {
                if i == j || dirty[(i, j)].is_infinity() {
                    continue;
                }

                if i != REFERENCE && dirty[(i, j)].limit() > bounds.limit(i) {
                    dirty[(i, j)] = INFINITY;
                } else if i == REFERENCE && dirty[(i, j)].limit() < -bounds.limit(j) {
                    dirty[(i, j)] = Relation::strict(-bounds.limit(j));
                }
            }
        }

        dirty.clean()
    }

    pub fn dirty(self) -> DBM<Dirty> {
        DBM {
            clocks: self.clocks,
            relations: self.relations,
            state: Dirty { touched: false },
        }
    }
}

impl PartialEq for DBM<Canonical> {
    fn eq(&self, other: &Self) -> bool {
        self.clocks == other.clocks && self.relations == other.relations
    }
}

impl Eq for DBM<Canonical> {}

impl Hash for DBM<Canonical> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.clocks.hash(state);
        for relation in self.relations.iter() {
            relation.hash(state);
        }
    }
}

#[derive(Clone, Debug)]
pub struct Unsafe {}
impl DBMState for Unsafe {}

/// A DBM whose relations may have been edited arbitrarily and therefore may
/// no longer be canonical.
#[derive(Clone, Debug)]
pub struct Dirty {
    touched: bool,
}

impl DBMState for Dirty {}

impl DBM<Dirty> {
    pub fn tighten(&mut self, i: Clock, j: Clock, relation: Relation) {
        if self.tightens(i, j, relation) {
            self[(i, j)] = relation
        }
    }

    /// Returns the canonical form of the DBM, skipping the closure when no
    /// relation was touched.
    pub fn clean(self) -> Result<DBM<Canonical>, DBM<Unsafe>> {
        if !self.state.touched {
            return Ok(DBM {
                clocks: self.clocks,
                relations: self.relations,
                state: Canonical {},
            });
        }

        self.close()
    }

    /// The all-pairs shortest path tightening over every intermediate clock.
    pub fn close(mut self) -> Result<DBM<Canonical>, DBM<Unsafe>> {
        for k in REFERENCE..self.dimensions() {
            for i in REFERENCE..self.dimensions() {
                if i == k {
                    continue;
                }

                for j in REFERENCE..self.dimensions() {
                    if j == k {
                        continue;
                    }

                    let ij = self[(i, j)];
                    let ik = self[(i, k)];
                    let kj = self[(k, j)];
                    let ikj = ik.addition(&kj);
                    if ij > ikj {
                        self.set(i, j, ikj);
                    }
                }

                if self[(i, i)] < ZERO {
                    return Err(self.empty());
                }
            }
        }

        if self.is_empty() {
            return Err(self.empty());
        }

        Ok(DBM {
            clocks: self.clocks,
            relations: self.relations,
            state: Canonical {},
        })
    }
}

impl IndexMut<(Clock, Clock)> for DBM<Dirty> {
    fn index_mut(&mut self, clocks: (Clock, Clock)) -> &mut Self::Output {
        let (i, j) = clocks;
        self.state.touched = true;
        let index = self.index(i, j);
        &mut self.relations[index]
    }
}
