// val.rs — Extended integer/float values and range-set algebra
//
// IntVal is an arbitrary-precision integer extended with ±∞. Values inside
// the machine-word range stay inline; anything larger spills to a shared
// bignum, so arithmetic never overflows. The remaining arithmetic errors are
// invalid infinity combinations and exponents too large to materialize; the
// evaluator converts those into eval errors at the failing expression.
// IntSetVal and FloatSetVal store ordered disjoint inclusive ranges and
// implement their algebra through lazy range iterators, so intersections and
// differences never materialize intermediate element lists.

use std::cmp::Ordering;
use std::fmt;
use std::iter::Peekable;
use std::rc::Rc;

use num_bigint::{BigInt, Sign};
use num_traits::{Signed, ToPrimitive};
use ordered_float::OrderedFloat;

/// Arithmetic failure (invalid infinity combination, or a value that cannot
/// be materialized).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArithError(pub &'static str);

impl fmt::Display for ArithError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub type ArithResult<T> = Result<T, ArithError>;

// ── IntVal ──────────────────────────────────────────────────────────────────

/// An arbitrary-precision integer extended with ±∞.
///
/// Normalization invariant: `Big` only holds values outside the `i64` range,
/// so `Int` and `Big` representations never overlap and derived equality and
/// hashing are value equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IntVal {
    InfNeg,
    Int(i64),
    Big(Rc<BigInt>),
    InfPos,
}

impl IntVal {
    pub const ZERO: IntVal = IntVal::Int(0);
    pub const ONE: IntVal = IntVal::Int(1);

    pub fn new(v: i64) -> IntVal {
        IntVal::Int(v)
    }

    /// Build from a bignum, collapsing back into the inline representation
    /// whenever the value fits.
    pub fn from_bigint(v: BigInt) -> IntVal {
        match v.to_i64() {
            Some(i) => IntVal::Int(i),
            None => IntVal::Big(Rc::new(v)),
        }
    }

    pub fn is_finite(&self) -> bool {
        matches!(self, IntVal::Int(_) | IntVal::Big(_))
    }

    pub fn is_plus_inf(&self) -> bool {
        matches!(self, IntVal::InfPos)
    }

    pub fn is_minus_inf(&self) -> bool {
        matches!(self, IntVal::InfNeg)
    }

    /// The inline value, if the number fits a machine word.
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            IntVal::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn to_bigint(&self) -> Option<BigInt> {
        match self {
            IntVal::Int(v) => Some(BigInt::from(*v)),
            IntVal::Big(b) => Some((**b).clone()),
            _ => None,
        }
    }

    /// Machine-sized value or an arithmetic error; used where an index or
    /// a count must be materialized.
    pub fn finite(&self) -> ArithResult<i64> {
        self.to_i64()
            .ok_or(ArithError("value out of machine integer range"))
    }

    pub fn add(&self, other: &IntVal) -> ArithResult<IntVal> {
        use IntVal::*;
        match (self, other) {
            (Int(a), Int(b)) => Ok(match a.checked_add(*b) {
                Some(v) => Int(v),
                None => IntVal::from_bigint(BigInt::from(*a) + BigInt::from(*b)),
            }),
            (InfPos, InfNeg) | (InfNeg, InfPos) => {
                Err(ArithError("addition of opposite infinities"))
            }
            (InfPos, _) | (_, InfPos) => Ok(InfPos),
            (InfNeg, _) | (_, InfNeg) => Ok(InfNeg),
            (a, b) => {
                let (x, y) = (a.to_bigint().unwrap(), b.to_bigint().unwrap());
                Ok(IntVal::from_bigint(x + y))
            }
        }
    }

    pub fn sub(&self, other: &IntVal) -> ArithResult<IntVal> {
        self.add(&other.neg())
    }

    pub fn neg(&self) -> IntVal {
        use IntVal::*;
        match self {
            Int(a) => match a.checked_neg() {
                Some(v) => Int(v),
                None => IntVal::from_bigint(-BigInt::from(*a)),
            },
            Big(b) => IntVal::from_bigint(-(**b).clone()),
            InfPos => InfNeg,
            InfNeg => InfPos,
        }
    }

    pub fn mul(&self, other: &IntVal) -> ArithResult<IntVal> {
        use IntVal::*;
        match (self, other) {
            (Int(a), Int(b)) => Ok(match a.checked_mul(*b) {
                Some(v) => Int(v),
                None => IntVal::from_bigint(BigInt::from(*a) * BigInt::from(*b)),
            }),
            (a, b) if a.is_finite() && b.is_finite() => {
                let (x, y) = (a.to_bigint().unwrap(), b.to_bigint().unwrap());
                Ok(IntVal::from_bigint(x * y))
            }
            (a, b) => {
                // At least one operand is infinite. 0 * ∞ is an error.
                let sa = a.signum();
                let sb = b.signum();
                if sa == 0 || sb == 0 {
                    Err(ArithError("multiplication of zero and infinity"))
                } else if sa * sb > 0 {
                    Ok(InfPos)
                } else {
                    Ok(InfNeg)
                }
            }
        }
    }

    /// Truncating division. The caller is responsible for rejecting a zero
    /// divisor before the call (that case is undefinedness, not an
    /// arithmetic fault); a zero that slips through still errors.
    pub fn div(&self, other: &IntVal) -> ArithResult<IntVal> {
        use IntVal::*;
        match (self, other) {
            (_, b) if b.signum() == 0 && b.is_finite() => {
                Err(ArithError("division by zero"))
            }
            (Int(a), Int(b)) => Ok(match a.checked_div(*b) {
                Some(v) => Int(v),
                None => IntVal::from_bigint(BigInt::from(*a) / BigInt::from(*b)),
            }),
            (a, b) if a.is_finite() && b.is_finite() => {
                let (x, y) = (a.to_bigint().unwrap(), b.to_bigint().unwrap());
                Ok(IntVal::from_bigint(x / y))
            }
            (a, InfPos) | (a, InfNeg) if a.is_finite() => Ok(Int(0)),
            (a, b) if !a.is_finite() && !b.is_finite() => {
                Err(ArithError("division of infinities"))
            }
            (a, b) => {
                if a.signum() * b.signum() >= 0 {
                    Ok(InfPos)
                } else {
                    Ok(InfNeg)
                }
            }
        }
    }

    /// Remainder with the sign of the dividend (matches truncating division).
    pub fn rem(&self, other: &IntVal) -> ArithResult<IntVal> {
        use IntVal::*;
        match (self, other) {
            (_, b) if b.signum() == 0 && b.is_finite() => {
                Err(ArithError("remainder by zero"))
            }
            (Int(a), Int(b)) => Ok(match a.checked_rem(*b) {
                Some(v) => Int(v),
                None => IntVal::from_bigint(BigInt::from(*a) % BigInt::from(*b)),
            }),
            (a, b) if a.is_finite() && b.is_finite() => {
                let (x, y) = (a.to_bigint().unwrap(), b.to_bigint().unwrap());
                Ok(IntVal::from_bigint(x % y))
            }
            _ => Err(ArithError("remainder with infinite operand")),
        }
    }

    /// Integer exponentiation. A negative exponent yields the integral part
    /// of the rational power; base 0 with negative exponent is rejected by
    /// the evaluator before this is called. An exponent too large to
    /// materialize the result is an arithmetic error.
    pub fn pow(&self, exp: &IntVal) -> ArithResult<IntVal> {
        use IntVal::*;
        if !self.is_finite() || !exp.is_finite() {
            return Err(ArithError("exponentiation with infinite operand"));
        }
        let e = match exp.to_i64() {
            Some(e) => e,
            // A bignum exponent: negative follows the integral-part rule,
            // positive cannot be materialized.
            None if exp.signum() < 0 => i64::MIN,
            None => return Err(ArithError("exponent too large")),
        };
        if e < 0 {
            let even = exp.rem(&IntVal::Int(2)).unwrap() == IntVal::ZERO;
            return Ok(match self.to_i64() {
                Some(1) => Int(1),
                Some(-1) => Int(if even { 1 } else { -1 }),
                _ => Int(0),
            });
        }
        if let (Some(base), Ok(e32)) = (self.to_i64(), u32::try_from(e)) {
            if let Some(v) = base.checked_pow(e32) {
                return Ok(Int(v));
            }
        }
        let e32 = u32::try_from(e).map_err(|_| ArithError("exponent too large"))?;
        let base = self.to_bigint().unwrap();
        Ok(IntVal::from_bigint(num_traits::pow(base, e32 as usize)))
    }

    pub fn abs(&self) -> IntVal {
        use IntVal::*;
        match self {
            Int(a) => match a.checked_abs() {
                Some(v) => Int(v),
                None => IntVal::from_bigint(BigInt::from(*a).abs()),
            },
            Big(b) => IntVal::from_bigint((**b).abs()),
            _ => InfPos,
        }
    }

    pub fn signum(&self) -> i64 {
        match self {
            IntVal::Int(v) => v.signum(),
            IntVal::Big(b) => match b.sign() {
                Sign::Minus => -1,
                Sign::NoSign => 0,
                Sign::Plus => 1,
            },
            IntVal::InfPos => 1,
            IntVal::InfNeg => -1,
        }
    }

    pub fn min(&self, other: &IntVal) -> IntVal {
        if self <= other {
            self.clone()
        } else {
            other.clone()
        }
    }

    pub fn max(&self, other: &IntVal) -> IntVal {
        if self >= other {
            self.clone()
        } else {
            other.clone()
        }
    }

    /// Successor; infinities stay put. Used for adjacency tests during
    /// range normalization.
    fn succ(&self) -> IntVal {
        match self {
            v if v.is_finite() => v.add(&IntVal::ONE).unwrap(),
            inf => inf.clone(),
        }
    }

    fn pred(&self) -> IntVal {
        match self {
            v if v.is_finite() => v.sub(&IntVal::ONE).unwrap(),
            inf => inf.clone(),
        }
    }

    pub fn to_float(&self) -> FloatVal {
        match self {
            IntVal::Int(v) => FloatVal::new(*v as f64),
            IntVal::Big(b) => FloatVal::new(b.to_f64().unwrap_or_else(|| {
                if b.sign() == Sign::Minus {
                    f64::NEG_INFINITY
                } else {
                    f64::INFINITY
                }
            })),
            IntVal::InfPos => FloatVal::INFINITY,
            IntVal::InfNeg => FloatVal::NEG_INFINITY,
        }
    }
}

impl Ord for IntVal {
    fn cmp(&self, other: &Self) -> Ordering {
        use IntVal::*;
        match (self, other) {
            (Int(a), Int(b)) => a.cmp(b),
            (Big(a), Big(b)) => a.cmp(b),
            // A normalized Big lies outside the i64 range, so its sign
            // decides the order against any inline value.
            (Big(a), Int(_)) => {
                if a.sign() == Sign::Minus {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (Int(_), Big(b)) => {
                if b.sign() == Sign::Minus {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (InfNeg, InfNeg) | (InfPos, InfPos) => Ordering::Equal,
            (InfNeg, _) | (_, InfPos) => Ordering::Less,
            (InfPos, _) | (_, InfNeg) => Ordering::Greater,
        }
    }
}

impl PartialOrd for IntVal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<i64> for IntVal {
    fn from(v: i64) -> Self {
        IntVal::Int(v)
    }
}

impl From<bool> for IntVal {
    fn from(v: bool) -> Self {
        IntVal::Int(v as i64)
    }
}

impl fmt::Display for IntVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntVal::Int(v) => write!(f, "{v}"),
            IntVal::Big(b) => write!(f, "{b}"),
            IntVal::InfPos => write!(f, "infinity"),
            IntVal::InfNeg => write!(f, "-infinity"),
        }
    }
}

// ── FloatVal ────────────────────────────────────────────────────────────────

/// An f64 with total order and hashing, so float literals can key the CSE map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FloatVal(OrderedFloat<f64>);

impl FloatVal {
    pub const INFINITY: FloatVal = FloatVal(OrderedFloat(f64::INFINITY));
    pub const NEG_INFINITY: FloatVal = FloatVal(OrderedFloat(f64::NEG_INFINITY));
    pub const ZERO: FloatVal = FloatVal(OrderedFloat(0.0));

    pub fn new(v: f64) -> Self {
        FloatVal(OrderedFloat(v))
    }

    pub fn value(self) -> f64 {
        self.0 .0
    }

    pub fn is_finite(self) -> bool {
        self.value().is_finite()
    }

    pub fn min(self, other: FloatVal) -> FloatVal {
        if self <= other {
            self
        } else {
            other
        }
    }

    pub fn max(self, other: FloatVal) -> FloatVal {
        if self >= other {
            self
        } else {
            other
        }
    }

    /// Next representable float above/below; used for closed-interval
    /// difference on float range sets.
    fn next_up(self) -> FloatVal {
        let v = self.value();
        if v.is_infinite() {
            return self;
        }
        let bits = v.to_bits();
        let next = if v >= 0.0 { bits + 1 } else { bits - 1 };
        FloatVal::new(f64::from_bits(next))
    }

    fn next_down(self) -> FloatVal {
        let v = self.value();
        if v.is_infinite() {
            return self;
        }
        if v == 0.0 {
            return FloatVal::new(-f64::from_bits(1));
        }
        let bits = v.to_bits();
        let next = if v > 0.0 { bits - 1 } else { bits + 1 };
        FloatVal::new(f64::from_bits(next))
    }
}

impl std::ops::Add for FloatVal {
    type Output = FloatVal;
    fn add(self, rhs: FloatVal) -> FloatVal {
        FloatVal::new(self.value() + rhs.value())
    }
}

impl std::ops::Sub for FloatVal {
    type Output = FloatVal;
    fn sub(self, rhs: FloatVal) -> FloatVal {
        FloatVal::new(self.value() - rhs.value())
    }
}

impl std::ops::Mul for FloatVal {
    type Output = FloatVal;
    fn mul(self, rhs: FloatVal) -> FloatVal {
        FloatVal::new(self.value() * rhs.value())
    }
}

impl std::ops::Div for FloatVal {
    type Output = FloatVal;
    fn div(self, rhs: FloatVal) -> FloatVal {
        FloatVal::new(self.value() / rhs.value())
    }
}

impl std::ops::Neg for FloatVal {
    type Output = FloatVal;
    fn neg(self) -> FloatVal {
        FloatVal::new(-self.value())
    }
}

impl From<f64> for FloatVal {
    fn from(v: f64) -> Self {
        FloatVal::new(v)
    }
}

impl fmt::Display for FloatVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.value();
        if v.is_infinite() {
            write!(f, "{}infinity", if v < 0.0 { "-" } else { "" })
        } else {
            write!(f, "{v:?}")
        }
    }
}

// Shared Display body for both set kinds: `l..u` for a single range,
// otherwise a brace list of ranges.
macro_rules! fmt_set_body {
    () => {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            if self.ranges.len() == 1 {
                let (l, u) = &self.ranges[0];
                return write!(f, "{l}..{u}");
            }
            write!(f, "{{")?;
            for (i, (l, u)) in self.ranges.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                if l == u {
                    write!(f, "{l}")?;
                } else {
                    write!(f, "{l}..{u}")?;
                }
            }
            write!(f, "}}")
        }
    };
}

// ── Lazy range iterators ────────────────────────────────────────────────────
//
// All adapters consume iterators over sorted, disjoint, non-empty inclusive
// ranges and produce the same. IntSetVal's set algebra is built on these.

type Range = (IntVal, IntVal);

/// Union of two sorted range streams.
pub struct RangesUnion<A: Iterator<Item = Range>, B: Iterator<Item = Range>> {
    a: Peekable<A>,
    b: Peekable<B>,
}

impl<A: Iterator<Item = Range>, B: Iterator<Item = Range>> RangesUnion<A, B> {
    pub fn new(a: A, b: B) -> Self {
        RangesUnion {
            a: a.peekable(),
            b: b.peekable(),
        }
    }
}

impl<A: Iterator<Item = Range>, B: Iterator<Item = Range>> Iterator for RangesUnion<A, B> {
    type Item = Range;
    fn next(&mut self) -> Option<Range> {
        let mut cur = match (self.a.peek(), self.b.peek()) {
            (None, None) => return None,
            (Some(_), None) => self.a.next().unwrap(),
            (None, Some(_)) => self.b.next().unwrap(),
            (Some(ra), Some(rb)) => {
                if ra.0 <= rb.0 {
                    self.a.next().unwrap()
                } else {
                    self.b.next().unwrap()
                }
            }
        };
        // Absorb every following range that overlaps or is adjacent.
        loop {
            let take_a = matches!(self.a.peek(), Some(ra) if ra.0 <= cur.1.succ());
            if take_a {
                let ra = self.a.next().unwrap();
                cur.1 = cur.1.max(ra.1);
                continue;
            }
            let take_b = matches!(self.b.peek(), Some(rb) if rb.0 <= cur.1.succ());
            if take_b {
                let rb = self.b.next().unwrap();
                cur.1 = cur.1.max(rb.1);
                continue;
            }
            break;
        }
        Some(cur)
    }
}

/// Intersection of two sorted range streams.
pub struct RangesInter<A: Iterator<Item = Range>, B: Iterator<Item = Range>> {
    a: Peekable<A>,
    b: Peekable<B>,
}

impl<A: Iterator<Item = Range>, B: Iterator<Item = Range>> RangesInter<A, B> {
    pub fn new(a: A, b: B) -> Self {
        RangesInter {
            a: a.peekable(),
            b: b.peekable(),
        }
    }
}

impl<A: Iterator<Item = Range>, B: Iterator<Item = Range>> Iterator for RangesInter<A, B> {
    type Item = Range;
    fn next(&mut self) -> Option<Range> {
        loop {
            let (ra, rb) = match (self.a.peek(), self.b.peek()) {
                (Some(ra), Some(rb)) => (ra.clone(), rb.clone()),
                _ => return None,
            };
            let lo = IntVal::max(&ra.0, &rb.0);
            let hi = IntVal::min(&ra.1, &rb.1);
            // Advance whichever stream ends first.
            if ra.1 <= rb.1 {
                self.a.next();
            } else {
                self.b.next();
            }
            if lo <= hi {
                return Some((lo, hi));
            }
        }
    }
}

/// Difference of two sorted range streams (elements of `a` not in `b`).
pub struct RangesDiff<A: Iterator<Item = Range>, B: Iterator<Item = Range>> {
    a: Peekable<A>,
    b: Peekable<B>,
    cur: Option<Range>,
}

impl<A: Iterator<Item = Range>, B: Iterator<Item = Range>> RangesDiff<A, B> {
    pub fn new(a: A, b: B) -> Self {
        RangesDiff {
            a: a.peekable(),
            b: b.peekable(),
            cur: None,
        }
    }
}

impl<A: Iterator<Item = Range>, B: Iterator<Item = Range>> Iterator for RangesDiff<A, B> {
    type Item = Range;
    fn next(&mut self) -> Option<Range> {
        loop {
            let mut cur = match self.cur.take().or_else(|| self.a.next()) {
                Some(r) => r,
                None => return None,
            };
            loop {
                match self.b.peek() {
                    None => return Some(cur),
                    Some(rb) => {
                        let rb = rb.clone();
                        if rb.1 < cur.0 {
                            self.b.next();
                            continue;
                        }
                        if rb.0 > cur.1 {
                            return Some(cur);
                        }
                        // Overlap. Emit any prefix of cur before rb.
                        if cur.0 < rb.0 {
                            let out = (cur.0, rb.0.pred());
                            // Remainder (if any) continues after rb.
                            if rb.1 < cur.1 {
                                self.cur = Some((rb.1.succ(), cur.1));
                            }
                            return Some(out);
                        }
                        // cur starts inside rb; drop the covered prefix.
                        if rb.1 >= cur.1 {
                            break; // fully covered, fetch next from a
                        }
                        cur.0 = rb.1.succ();
                    }
                }
            }
        }
    }
}

// ── IntSetVal ───────────────────────────────────────────────────────────────

/// A set of integers as sorted, disjoint, non-adjacent inclusive ranges.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IntSetVal {
    ranges: Vec<Range>,
}

impl IntSetVal {
    pub fn empty() -> Self {
        IntSetVal { ranges: Vec::new() }
    }

    pub fn from_range(min: IntVal, max: IntVal) -> Self {
        if min > max {
            return Self::empty();
        }
        IntSetVal {
            ranges: vec![(min, max)],
        }
    }

    /// Full range, -∞..+∞.
    pub fn all() -> Self {
        Self::from_range(IntVal::InfNeg, IntVal::InfPos)
    }

    /// Build from arbitrary (possibly overlapping, unsorted) ranges.
    pub fn from_ranges(ranges: impl IntoIterator<Item = Range>) -> Self {
        let mut rs: Vec<Range> = ranges.into_iter().filter(|(l, u)| l <= u).collect();
        rs.sort();
        let mut out: Vec<Range> = Vec::with_capacity(rs.len());
        for r in rs {
            let merge = match out.last() {
                Some(last) => r.0 <= last.1.succ(),
                None => false,
            };
            if merge {
                let last = out.last_mut().unwrap();
                last.1 = last.1.clone().max(r.1);
            } else {
                out.push(r);
            }
        }
        IntSetVal { ranges: out }
    }

    pub fn from_values(values: impl IntoIterator<Item = IntVal>) -> Self {
        Self::from_ranges(values.into_iter().map(|v| (v.clone(), v)))
    }

    /// Rebuild from an iterator already in sorted disjoint order.
    pub fn from_sorted_ranges(ranges: impl Iterator<Item = Range>) -> Self {
        IntSetVal {
            ranges: ranges.collect(),
        }
    }

    pub fn ranges(&self) -> impl Iterator<Item = Range> + Clone + '_ {
        self.ranges.iter().cloned()
    }

    pub fn num_ranges(&self) -> usize {
        self.ranges.len()
    }

    pub fn range(&self, i: usize) -> Range {
        self.ranges[i].clone()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn is_finite(&self) -> bool {
        self.ranges
            .iter()
            .all(|(l, u)| l.is_finite() && u.is_finite())
    }

    pub fn min(&self) -> Option<IntVal> {
        self.ranges.first().map(|r| r.0.clone())
    }

    pub fn max(&self) -> Option<IntVal> {
        self.ranges.last().map(|r| r.1.clone())
    }

    pub fn contains(&self, v: &IntVal) -> bool {
        self.ranges
            .binary_search_by(|(l, u)| {
                if v < l {
                    Ordering::Greater
                } else if v > u {
                    Ordering::Less
                } else {
                    Ordering::Equal
                }
            })
            .is_ok()
    }

    /// Cardinality; +∞ for unbounded sets.
    pub fn card(&self) -> ArithResult<IntVal> {
        let mut n = IntVal::ZERO;
        for (l, u) in &self.ranges {
            if !l.is_finite() || !u.is_finite() {
                return Ok(IntVal::InfPos);
            }
            n = n.add(&u.sub(l)?.add(&IntVal::ONE)?)?;
        }
        Ok(n)
    }

    /// Iterate the elements of a finite set in increasing order. Ranges
    /// beyond the machine-word span clamp; callers gate on `is_finite` and
    /// practical cardinality before iterating.
    pub fn values(&self) -> impl Iterator<Item = IntVal> + '_ {
        self.ranges.iter().flat_map(|(l, u)| {
            let lo = l.to_i64().unwrap_or(i64::MIN);
            let hi = u.to_i64().unwrap_or(i64::MAX);
            (lo..=hi).map(IntVal::Int)
        })
    }

    pub fn union(&self, other: &IntSetVal) -> IntSetVal {
        Self::from_sorted_ranges(RangesUnion::new(self.ranges(), other.ranges()))
    }

    pub fn intersect(&self, other: &IntSetVal) -> IntSetVal {
        Self::from_sorted_ranges(RangesInter::new(self.ranges(), other.ranges()))
    }

    pub fn diff(&self, other: &IntSetVal) -> IntSetVal {
        Self::from_sorted_ranges(RangesDiff::new(self.ranges(), other.ranges()))
    }

    pub fn sym_diff(&self, other: &IntSetVal) -> IntSetVal {
        Self::from_sorted_ranges(RangesUnion::new(
            RangesDiff::new(self.ranges(), other.ranges()),
            RangesDiff::new(other.ranges(), self.ranges()),
        ))
    }

    pub fn is_subset_of(&self, other: &IntSetVal) -> bool {
        RangesDiff::new(self.ranges(), other.ranges()).next().is_none()
    }

    /// Lexicographic order over the range sequence.
    pub fn lex_cmp(&self, other: &IntSetVal) -> Ordering {
        self.ranges.cmp(&other.ranges)
    }
}

impl fmt::Display for IntSetVal {
    fmt_set_body!();
}

// ── FloatSetVal ─────────────────────────────────────────────────────────────

type FRange = (FloatVal, FloatVal);

/// A set of floats as sorted, disjoint closed intervals.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FloatSetVal {
    ranges: Vec<FRange>,
}

impl FloatSetVal {
    pub fn empty() -> Self {
        FloatSetVal { ranges: Vec::new() }
    }

    pub fn from_range(min: FloatVal, max: FloatVal) -> Self {
        if min > max {
            return Self::empty();
        }
        FloatSetVal {
            ranges: vec![(min, max)],
        }
    }

    pub fn from_ranges(ranges: impl IntoIterator<Item = FRange>) -> Self {
        let mut rs: Vec<FRange> = ranges.into_iter().filter(|(l, u)| l <= u).collect();
        rs.sort();
        let mut out: Vec<FRange> = Vec::with_capacity(rs.len());
        for r in rs {
            let merge = match out.last() {
                Some(last) => r.0 <= last.1.next_up(),
                None => false,
            };
            if merge {
                let last = out.last_mut().unwrap();
                last.1 = last.1.max(r.1);
            } else {
                out.push(r);
            }
        }
        FloatSetVal { ranges: out }
    }

    pub fn ranges(&self) -> impl Iterator<Item = FRange> + Clone + '_ {
        self.ranges.iter().copied()
    }

    pub fn num_ranges(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn min(&self) -> Option<FloatVal> {
        self.ranges.first().map(|r| r.0)
    }

    pub fn max(&self) -> Option<FloatVal> {
        self.ranges.last().map(|r| r.1)
    }

    pub fn contains(&self, v: FloatVal) -> bool {
        self.ranges.iter().any(|&(l, u)| l <= v && v <= u)
    }

    pub fn union(&self, other: &FloatSetVal) -> FloatSetVal {
        Self::from_ranges(self.ranges().chain(other.ranges()))
    }

    pub fn intersect(&self, other: &FloatSetVal) -> FloatSetVal {
        let mut out = Vec::new();
        for &(la, ua) in &self.ranges {
            for &(lb, ub) in &other.ranges {
                let lo = la.max(lb);
                let hi = ua.min(ub);
                if lo <= hi {
                    out.push((lo, hi));
                }
            }
        }
        Self::from_ranges(out)
    }

    /// Difference on closed intervals; interior holes use the neighbouring
    /// representable floats as new endpoints.
    pub fn diff(&self, other: &FloatSetVal) -> FloatSetVal {
        let mut acc: Vec<FRange> = self.ranges.clone();
        for &(lb, ub) in &other.ranges {
            let mut next = Vec::with_capacity(acc.len() + 1);
            for (la, ua) in acc {
                if ub < la || lb > ua {
                    next.push((la, ua));
                    continue;
                }
                if la < lb {
                    next.push((la, lb.next_down()));
                }
                if ub < ua {
                    next.push((ub.next_up(), ua));
                }
            }
            acc = next;
        }
        Self::from_ranges(acc)
    }

    pub fn sym_diff(&self, other: &FloatSetVal) -> FloatSetVal {
        self.diff(other).union(&other.diff(self))
    }

    pub fn is_subset_of(&self, other: &FloatSetVal) -> bool {
        self.diff(other).is_empty()
    }
}

impl fmt::Display for FloatSetVal {
    fmt_set_body!();
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn isv(ranges: &[(i64, i64)]) -> IntSetVal {
        IntSetVal::from_ranges(
            ranges
                .iter()
                .map(|&(l, u)| (IntVal::Int(l), IntVal::Int(u))),
        )
    }

    #[test]
    fn arithmetic_spills_to_bignum() {
        let a = IntVal::Int(i64::MAX);
        let b = a.add(&IntVal::ONE).unwrap();
        assert!(b.to_i64().is_none());
        assert!(b > a);
        assert!(b < IntVal::InfPos);
        // Subtracting back collapses into the inline representation.
        assert_eq!(b.sub(&IntVal::ONE).unwrap(), a);
        assert_eq!(
            IntVal::Int(6).mul(&IntVal::Int(7)).unwrap(),
            IntVal::Int(42)
        );
        assert_eq!(
            IntVal::Int(-7).div(&IntVal::Int(2)).unwrap(),
            IntVal::Int(-3)
        );
        assert_eq!(
            IntVal::Int(-7).rem(&IntVal::Int(2)).unwrap(),
            IntVal::Int(-1)
        );
    }

    #[test]
    fn bignum_products_are_exact() {
        let big = IntVal::Int(i64::MAX).mul(&IntVal::Int(4)).unwrap();
        let back = big.div(&IntVal::Int(4)).unwrap();
        assert_eq!(back, IntVal::Int(i64::MAX));
        // Sign-based ordering against inline values.
        let neg_big = big.neg();
        assert!(neg_big < IntVal::Int(i64::MIN));
        assert_eq!(neg_big.abs(), big);
        assert_eq!(big.signum(), 1);
        assert_eq!(neg_big.signum(), -1);
    }

    #[test]
    fn intval_infinity_ordering() {
        assert!(IntVal::InfNeg < IntVal::Int(i64::MIN));
        assert!(IntVal::Int(i64::MAX) < IntVal::InfPos);
        assert_eq!(
            IntVal::InfPos.add(&IntVal::Int(1)).unwrap(),
            IntVal::InfPos
        );
        assert!(IntVal::InfPos.add(&IntVal::InfNeg).is_err());
        assert!(IntVal::InfPos.mul(&IntVal::ZERO).is_err());
    }

    #[test]
    fn intval_pow() {
        assert_eq!(
            IntVal::Int(2).pow(&IntVal::Int(10)).unwrap(),
            IntVal::Int(1024)
        );
        assert_eq!(
            IntVal::Int(-1).pow(&IntVal::Int(-3)).unwrap(),
            IntVal::Int(-1)
        );
        assert_eq!(
            IntVal::Int(5).pow(&IntVal::Int(-1)).unwrap(),
            IntVal::Int(0)
        );
        // Past the machine word the result is still exact.
        let p = IntVal::Int(10).pow(&IntVal::Int(40)).unwrap();
        assert!(p.to_i64().is_none());
        assert_eq!(
            p.div(&IntVal::Int(10).pow(&IntVal::Int(39)).unwrap())
                .unwrap(),
            IntVal::Int(10)
        );
        let huge = IntVal::Int(i64::MAX);
        assert!(IntVal::Int(2).pow(&huge).is_err());
    }

    #[test]
    fn normalization_merges_adjacent() {
        let s = isv(&[(1, 3), (4, 6), (10, 12)]);
        assert_eq!(s.num_ranges(), 2);
        assert_eq!(s.range(0), (IntVal::Int(1), IntVal::Int(6)));
    }

    #[test]
    fn union_intersect_diff() {
        let a = isv(&[(1, 5), (10, 15)]);
        let b = isv(&[(4, 11)]);
        assert_eq!(a.union(&b), isv(&[(1, 15)]));
        assert_eq!(a.intersect(&b), isv(&[(4, 5), (10, 11)]));
        assert_eq!(a.diff(&b), isv(&[(1, 3), (12, 15)]));
        assert_eq!(a.sym_diff(&b), isv(&[(1, 3), (6, 9), (12, 15)]));
    }

    #[test]
    fn subset_and_contains() {
        let a = isv(&[(1, 3), (7, 9)]);
        let b = isv(&[(0, 10)]);
        assert!(a.is_subset_of(&b));
        assert!(!b.is_subset_of(&a));
        assert!(a.contains(&IntVal::Int(8)));
        assert!(!a.contains(&IntVal::Int(5)));
    }

    #[test]
    fn cardinality() {
        assert_eq!(isv(&[(1, 3), (7, 9)]).card().unwrap(), IntVal::Int(6));
        let unbounded = IntSetVal::from_range(IntVal::InfNeg, IntVal::Int(0));
        assert_eq!(unbounded.card().unwrap(), IntVal::InfPos);
        // A bignum-wide range has an exact bignum cardinality.
        let lo = IntVal::Int(i64::MIN);
        let hi = IntVal::Int(i64::MAX);
        let wide = IntSetVal::from_range(lo.clone(), hi.clone());
        let expect = hi.sub(&lo).unwrap().add(&IntVal::ONE).unwrap();
        assert_eq!(wide.card().unwrap(), expect);
        assert!(wide.card().unwrap().to_i64().is_none());
    }

    #[test]
    fn values_iteration_is_sorted() {
        let vals: Vec<i64> = isv(&[(3, 5), (1, 1)])
            .values()
            .map(|v| v.to_i64().unwrap())
            .collect();
        assert_eq!(vals, vec![1, 3, 4, 5]);
    }

    #[test]
    fn empty_set_edge_cases() {
        let e = IntSetVal::empty();
        assert!(e.is_empty());
        assert!(e.is_subset_of(&isv(&[(1, 2)])));
        assert_eq!(e.union(&isv(&[(1, 2)])), isv(&[(1, 2)]));
        assert_eq!(e.card().unwrap(), IntVal::ZERO);
        assert_eq!(IntSetVal::from_range(IntVal::Int(5), IntVal::Int(3)), e);
    }

    #[test]
    fn float_set_basic() {
        let a = FloatSetVal::from_range(FloatVal::new(0.0), FloatVal::new(1.0));
        let b = FloatSetVal::from_range(FloatVal::new(0.5), FloatVal::new(2.0));
        let u = a.union(&b);
        assert_eq!(u.min(), Some(FloatVal::new(0.0)));
        assert_eq!(u.max(), Some(FloatVal::new(2.0)));
        let i = a.intersect(&b);
        assert_eq!(i.min(), Some(FloatVal::new(0.5)));
        assert!(a.contains(FloatVal::new(0.75)));
        assert!(a.diff(&b).max().unwrap() < FloatVal::new(0.5));
    }

    #[test]
    fn lex_order_on_sets() {
        let a = isv(&[(1, 2)]);
        let b = isv(&[(1, 3)]);
        let c = isv(&[(2, 2)]);
        assert_eq!(a.lex_cmp(&b), Ordering::Less);
        assert_eq!(b.lex_cmp(&c), Ordering::Less);
        assert_eq!(a.lex_cmp(&a), Ordering::Equal);
    }
}
