use std::fmt;

/// The unique index of a clock. This can be used to directly address the DBM.
pub type Clock = u16;

/// The integer limit of a bound between two clocks.
pub type Limit = i32;

/// The zero'th (0) clock is the reference clock which is always exactly zero.
pub const REFERENCE: Clock = 0;

// The limit is stored in all but the least significant bit of the relation.
pub const MIN_LIMIT: Limit = i32::MIN >> 1;
pub const MAX_LIMIT: Limit = i32::MAX >> 1;

/// Describes the strictness (<, ≤) of the relation between two clocks in the DBM.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Strictness {
    Strict,
    Weak,
}

impl fmt::Display for Strictness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strictness::Strict => write!(f, "<"),
            Strictness::Weak => write!(f, "≤"),
        }
    }
}

/// An element optimized for caching which represents a strict or weak
/// relation between two clocks (c0 - c1 RELATION). This encoding uses
/// the least significant bit to represent the strictness and the other
/// bits as the limit. The encoding is [limit] [1 bit strictness].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Relation(i32);

/// Infinity is the maximum weak relation (∞, ≤) which no bound exceeds.
pub const INFINITY: Relation = Relation::new(MAX_LIMIT, Strictness::Weak);

/// Zero is just a relation with limit of 0 but it is weak and thereby includes 0 (0, ≤).
pub const ZERO: Relation = Relation::new(0, Strictness::Weak);

impl Relation {
    pub const fn new(limit: Limit, strictness: Strictness) -> Self {
        let bit = match strictness {
            Strictness::Strict => 0,
            Strictness::Weak => 1,
        };
        Self((limit << 1) | bit)
    }

    pub const fn weak(limit: Limit) -> Self {
        Self::new(limit, Strictness::Weak)
    }

    pub const fn strict(limit: Limit) -> Self {
        Self::new(limit, Strictness::Strict)
    }

    /// Returns the limit of the relation which can be represented with one
    /// less bit than the relation as the last bit describes the strictness.
    pub const fn limit(&self) -> Limit {
        self.0 >> 1
    }

    pub const fn strictness(&self) -> Strictness {
        if self.is_strict() {
            return Strictness::Strict;
        }
        Strictness::Weak
    }

    pub const fn is_strict(&self) -> bool {
        (self.0 & 1) == 0
    }

    pub const fn is_weak(&self) -> bool {
        !self.is_strict()
    }

    /// Returns true if the relation represents an infinite relation (∞, ≤).
    pub const fn is_infinity(&self) -> bool {
        self.0 == INFINITY.0
    }

    /// Returns true if the relation represents a zero relation (0, ≤).
    pub const fn is_zero(&self) -> bool {
        self.0 == ZERO.0
    }

    /// The addition of two path bounds. Infinity is absorbing and the
    /// strictness is weak only when both relations are weak.
    pub const fn addition(&self, other: &Self) -> Self {
        if self.is_infinity() || other.is_infinity() {
            return INFINITY;
        }
        Self(((self.limit() + other.limit()) << 1) | (self.0 & other.0 & 1))
    }

    /// The relation describing the complement ¬(c0 - c1 R m) = (c1 - c0 R' -m)
    /// where the strictness is flipped.
    pub const fn negation(&self) -> Self {
        let strictness = match self.strictness() {
            Strictness::Strict => Strictness::Weak,
            Strictness::Weak => Strictness::Strict,
        };
        Self::new(-self.limit(), strictness)
    }

    /// Returns the same bound but with the limit negated and strictness kept.
    pub const fn negate_limit(&self) -> Self {
        Self::new(-self.limit(), self.strictness())
    }

    pub const fn as_weak(&self) -> Self {
        Self(self.0 | 1)
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinity() {
            return write!(f, "(∞, {})", self.strictness());
        }
        write!(f, "({}, {})", self.limit(), self.strictness())
    }
}

/// A single difference constraint "minuend - subtrahend R limit" in the DBM
/// encoding. Guards and invariants are conjunctions of these. A lower bound
/// x ≥ c is stored as its dual 0 - x ≤ -c.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Constraint {
    minuend: Clock,
    subtrahend: Clock,
    relation: Relation,
}

impl Constraint {
    pub const fn new(minuend: Clock, subtrahend: Clock, relation: Relation) -> Self {
        Self {
            minuend,
            subtrahend,
            relation,
        }
    }

    /// An upper bound on the clock: clock - 0 R limit.
    pub const fn upper(clock: Clock, relation: Relation) -> Self {
        Self::new(clock, REFERENCE, relation)
    }

    /// A lower bound on the clock in dual form: 0 - clock R -limit.
    pub const fn lower(clock: Clock, relation: Relation) -> Self {
        Self::new(REFERENCE, clock, relation)
    }

    pub const fn minuend(&self) -> Clock {
        self.minuend
    }

    pub const fn subtrahend(&self) -> Clock {
        self.subtrahend
    }

    pub const fn relation(&self) -> Relation {
        self.relation
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {} {}", self.minuend, self.subtrahend, self.relation)
    }
}
