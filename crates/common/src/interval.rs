//! Canonical sets of half-open intervals over a totally-ordered key.
//!
//! An [`IntervalSet`] keeps its intervals sorted, disjoint, and
//! non-adjacent (touching intervals collapse into one). The frame loader
//! uses it for request/cover arithmetic: point and containment queries are
//! O(log n) via the underlying `BTreeMap`, set-set combinations are linear
//! merges over both operands.

use std::collections::BTreeMap;
use std::fmt;

/// An ordered set of non-empty, disjoint, non-adjacent half-open
/// intervals `[lo, hi)`.
///
/// Equality is structural on the canonical representation, so two sets
/// built by different insert/erase sequences compare equal iff they cover
/// the same points.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct IntervalSet<T> {
    /// Interval start → interval end.
    map: BTreeMap<T, T>,
}

impl<T: Copy + Ord> IntervalSet<T> {
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    /// Single-interval set; empty if `lo >= hi`.
    pub fn of(lo: T, hi: T) -> Self {
        let mut set = Self::new();
        set.insert(lo, hi);
        set
    }

    /// Number of disjoint intervals.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Iterate the intervals in ascending order as `(lo, hi)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (T, T)> + '_ {
        self.map.iter().map(|(&lo, &hi)| (lo, hi))
    }

    /// Insert `[lo, hi)`, merging with any overlapping or exactly-touching
    /// intervals. No-op if `lo >= hi`.
    pub fn insert(&mut self, lo: T, hi: T) {
        if lo >= hi {
            return;
        }
        let (mut lo, mut hi) = (lo, hi);

        // Absorb an interval starting at or before lo that reaches lo.
        let prev = self.map.range(..=lo).next_back().map(|(&k, &v)| (k, v));
        if let Some((plo, phi)) = prev {
            if phi >= lo {
                lo = plo;
                if phi > hi {
                    hi = phi;
                }
                self.map.remove(&plo);
            }
        }

        // Absorb intervals starting within [lo, hi] (inclusive hi: touching
        // intervals collapse).
        let absorbed: Vec<T> = self.map.range(lo..=hi).map(|(&k, _)| k).collect();
        for k in absorbed {
            if let Some(v) = self.map.remove(&k) {
                if v > hi {
                    hi = v;
                }
            }
        }

        self.map.insert(lo, hi);
    }

    /// Erase `[lo, hi)`, splitting intervals that straddle an endpoint and
    /// removing fully-covered ones. No-op if `lo >= hi`.
    pub fn erase(&mut self, lo: T, hi: T) {
        if lo >= hi {
            return;
        }

        // Truncate an interval that starts before lo and reaches into the
        // erased region; keep any tail past hi.
        let prev = self.map.range(..lo).next_back().map(|(&k, &v)| (k, v));
        if let Some((plo, phi)) = prev {
            if phi > lo {
                self.map.insert(plo, lo);
                if phi > hi {
                    self.map.insert(hi, phi);
                }
            }
        }

        // Remove intervals starting within [lo, hi); keep tails past hi.
        let starts: Vec<T> = self.map.range(lo..hi).map(|(&k, _)| k).collect();
        for k in starts {
            if let Some(v) = self.map.remove(&k) {
                if v > hi {
                    self.map.insert(hi, v);
                }
            }
        }
    }

    /// Set union.
    pub fn union(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for (&lo, &hi) in &other.map {
            out.insert(lo, hi);
        }
        out
    }

    /// Set difference `self ∖ other`, by linear merge.
    pub fn difference(&self, other: &Self) -> Self {
        let mut out = BTreeMap::new();
        let mut sub = other.map.iter().peekable();

        for (&lo, &hi) in &self.map {
            let mut cur = lo;
            while cur < hi {
                // Skip subtrahend intervals entirely behind the cursor.
                while let Some(&(_, &shi)) = sub.peek() {
                    if shi <= cur {
                        sub.next();
                    } else {
                        break;
                    }
                }
                match sub.peek() {
                    Some(&(&slo, &shi)) if slo < hi => {
                        if slo > cur {
                            out.insert(cur, slo);
                        }
                        cur = if shi < hi { shi } else { hi };
                    }
                    _ => {
                        out.insert(cur, hi);
                        cur = hi;
                    }
                }
            }
        }

        Self { map: out }
    }

    /// Set intersection, by linear merge.
    pub fn intersection(&self, other: &Self) -> Self {
        let mut out = BTreeMap::new();
        let mut a = self.map.iter().peekable();
        let mut b = other.map.iter().peekable();

        while let (Some(&(&alo, &ahi)), Some(&(&blo, &bhi))) = (a.peek(), b.peek()) {
            let lo = if alo > blo { alo } else { blo };
            let hi = if ahi < bhi { ahi } else { bhi };
            if lo < hi {
                out.insert(lo, hi);
            }
            if ahi <= bhi {
                a.next();
            } else {
                b.next();
            }
        }

        Self { map: out }
    }

    /// True iff some interval contains `t`.
    pub fn contains(&self, t: T) -> bool {
        self.map
            .range(..=t)
            .next_back()
            .is_some_and(|(_, &hi)| hi > t)
    }

    /// True iff some interval intersects `[lo, hi)`.
    pub fn overlaps(&self, lo: T, hi: T) -> bool {
        if lo >= hi {
            return false;
        }
        if let Some((_, &phi)) = self.map.range(..=lo).next_back() {
            if phi > lo {
                return true;
            }
        }
        self.map.range(lo..hi).next().is_some()
    }

    /// Outermost bounds `[min_lo, max_hi)`, or `None` if empty.
    pub fn bounds(&self) -> Option<(T, T)> {
        let (&lo, _) = self.map.first_key_value()?;
        let (_, &hi) = self.map.last_key_value()?;
        Some((lo, hi))
    }

    /// First point in `[t, limit)` not covered by the set, or `limit` if
    /// `[t, limit)` is fully covered. Returns `t` itself when `t` is
    /// uncovered.
    pub fn gap_after(&self, t: T, limit: T) -> T {
        if t >= limit {
            return limit;
        }
        match self.map.range(..=t).next_back() {
            Some((_, &hi)) if hi > t => {
                if hi < limit {
                    hi
                } else {
                    limit
                }
            }
            _ => t,
        }
    }
}

impl<T: Copy + Ord> FromIterator<(T, T)> for IntervalSet<T> {
    fn from_iter<I: IntoIterator<Item = (T, T)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (lo, hi) in iter {
            set.insert(lo, hi);
        }
        set
    }
}

impl<T: fmt::Debug> fmt::Debug for IntervalSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (lo, hi)) in self.map.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "[{lo:?}, {hi:?})")?;
        }
        write!(f, "}}")
    }
}

// ── Tests ────────────────────────────────────────────────────────────
