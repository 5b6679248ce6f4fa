//! Integer values extended with signed infinities and NaN.
//!
//! Arithmetic happens in `i128` and is saturated against a caller supplied
//! threshold: any finite result whose magnitude exceeds it becomes an
//! infinity carrying the result's sign.

use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Number {
    Int(i64),
    PosInf,
    NegInf,
    NaN,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CmpOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Gt => ">",
            CmpOp::Le => "<=",
            CmpOp::Ge => ">=",
        }
    }

    pub fn from_symbol(s: &str) -> Option<Self> {
        match s {
            "==" => Some(CmpOp::Eq),
            "!=" => Some(CmpOp::Ne),
            "<" => Some(CmpOp::Lt),
            ">" => Some(CmpOp::Gt),
            "<=" => Some(CmpOp::Le),
            ">=" => Some(CmpOp::Ge),
            _ => None,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Number {
    pub fn saturate(value: i128, threshold: i64) -> Number {
        let threshold = threshold as i128;
        if value > threshold {
            Number::PosInf
        } else if value < -threshold {
            Number::NegInf
        } else {
            Number::Int(value as i64)
        }
    }

    /// Re-applies the threshold to an already constructed value.
    pub fn clamp(self, threshold: i64) -> Number {
        match self {
            Number::Int(n) => Number::saturate(n as i128, threshold),
            other => other,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Number::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_nan(&self) -> bool {
        matches!(self, Number::NaN)
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, Number::PosInf | Number::NegInf)
    }

    pub fn is_special(&self) -> bool {
        !matches!(self, Number::Int(_))
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Number::Int(0))
    }

    fn sign(&self) -> i32 {
        match self {
            Number::Int(n) => n.signum() as i32,
            Number::PosInf => 1,
            Number::NegInf => -1,
            Number::NaN => 0,
        }
    }

    fn infinity(sign: i32) -> Number {
        if sign < 0 {
            Number::NegInf
        } else {
            Number::PosInf
        }
    }

    pub fn add(self, rhs: Number, threshold: i64) -> Number {
        match (self, rhs) {
            (Number::NaN, _) | (_, Number::NaN) => Number::NaN,
            (Number::PosInf, Number::NegInf) | (Number::NegInf, Number::PosInf) => Number::NaN,
            (Number::PosInf, _) | (_, Number::PosInf) => Number::PosInf,
            (Number::NegInf, _) | (_, Number::NegInf) => Number::NegInf,
            (Number::Int(a), Number::Int(b)) => Number::saturate(a as i128 + b as i128, threshold),
        }
    }

    pub fn sub(self, rhs: Number, threshold: i64) -> Number {
        self.add(rhs.neg(threshold), threshold)
    }

    pub fn neg(self, threshold: i64) -> Number {
        match self {
            Number::Int(a) => Number::saturate(-(a as i128), threshold),
            Number::PosInf => Number::NegInf,
            Number::NegInf => Number::PosInf,
            Number::NaN => Number::NaN,
        }
    }

    pub fn mul(self, rhs: Number, threshold: i64) -> Number {
        match (self, rhs) {
            (Number::NaN, _) | (_, Number::NaN) => Number::NaN,
            (Number::Int(a), Number::Int(b)) => Number::saturate(a as i128 * b as i128, threshold),
            (a, b) => {
                let sign = a.sign() * b.sign();
                if sign == 0 {
                    Number::NaN
                } else {
                    Number::infinity(sign)
                }
            }
        }
    }

    /// Floor division. A zero divisor yields NaN and a finite value divided
    /// by an infinity yields zero.
    pub fn floor_div(self, rhs: Number) -> Number {
        match (self, rhs) {
            (_, Number::Int(0)) => Number::NaN,
            (Number::Int(_), Number::PosInf | Number::NegInf) => Number::Int(0),
            (Number::Int(a), Number::Int(b)) => {
                let (a, b) = (a as i128, b as i128);
                let mut q = a / b;
                if a % b != 0 && ((a < 0) != (b < 0)) {
                    q -= 1;
                }
                Number::saturate(q, i64::MAX)
            }
            _ => Number::NaN,
        }
    }

    /// Floor modulo; the result takes the sign of the divisor.
    pub fn floor_mod(self, rhs: Number) -> Number {
        match (self, rhs) {
            (_, Number::Int(0)) => Number::NaN,
            (Number::Int(a), Number::PosInf | Number::NegInf) => {
                if a == 0 || (a > 0) == (rhs.sign() > 0) {
                    Number::Int(a)
                } else {
                    rhs
                }
            }
            (Number::Int(a), Number::Int(b)) => {
                let (a, b) = (a as i128, b as i128);
                let mut r = a % b;
                if r != 0 && ((r < 0) != (b < 0)) {
                    r += b;
                }
                Number::Int(r as i64)
            }
            _ => Number::NaN,
        }
    }

    pub fn abs(self) -> Number {
        match self {
            Number::Int(a) => Number::saturate((a as i128).abs(), i64::MAX),
            Number::NegInf => Number::PosInf,
            other => other,
        }
    }

    pub fn min(self, rhs: Number) -> Number {
        match self.partial_cmp(&rhs) {
            Some(Ordering::Greater) => rhs,
            Some(_) => self,
            None => Number::NaN,
        }
    }

    pub fn max(self, rhs: Number) -> Number {
        match self.partial_cmp(&rhs) {
            Some(Ordering::Less) => rhs,
            Some(_) => self,
            None => Number::NaN,
        }
    }

    /// Unsaturated addition used for operation counts.
    pub fn count_add(self, rhs: Number) -> Number {
        match (self, rhs) {
            (Number::Int(a), Number::Int(b)) => Number::Int(a.saturating_add(b)),
            (a, b) => a.add(b, i64::MAX),
        }
    }

    /// Every comparison involving NaN is false, except `!=`.
    pub fn compare(self, op: CmpOp, rhs: Number) -> bool {
        match self.partial_cmp(&rhs) {
            None => op == CmpOp::Ne,
            Some(ordering) => match op {
                CmpOp::Eq => ordering == Ordering::Equal,
                CmpOp::Ne => ordering != Ordering::Equal,
                CmpOp::Lt => ordering == Ordering::Less,
                CmpOp::Gt => ordering == Ordering::Greater,
                CmpOp::Le => ordering != Ordering::Greater,
                CmpOp::Ge => ordering != Ordering::Less,
            },
        }
    }

    /// Interprets the value as a positive operation count.
    pub fn as_count(&self) -> u64 {
        match self {
            Number::Int(n) if *n > 0 => *n as u64,
            Number::PosInf => u64::MAX,
            _ => 1,
        }
    }
}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Number::NaN, _) | (_, Number::NaN) => None,
            (Number::Int(a), Number::Int(b)) => Some(a.cmp(b)),
            (a, b) if a == b => Some(Ordering::Equal),
            (Number::NegInf, _) | (_, Number::PosInf) => Some(Ordering::Less),
            (Number::PosInf, _) | (_, Number::NegInf) => Some(Ordering::Greater),
        }
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Number::Int(value)
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(n) => write!(f, "{}", n),
            Number::PosInf => f.write_str("inf"),
            Number::NegInf => f.write_str("-inf"),
            Number::NaN => f.write_str("NaN"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const T: i64 = 1000;

    #[test]
    fn arithmetic_should_saturate_beyond_threshold() {
        assert_eq!(Number::Int(600).add(Number::Int(600), T), Number::PosInf);
        assert_eq!(Number::Int(-600).sub(Number::Int(600), T), Number::NegInf);
        assert_eq!(Number::Int(40).mul(Number::Int(-30), T), Number::NegInf);
        assert_eq!(Number::Int(40).mul(Number::Int(25), T), Number::Int(1000));
        assert_eq!(Number::Int(-1000).neg(T), Number::Int(1000));
    }

    #[test]
    fn special_values_follow_ieee_rules() {
        assert_eq!(Number::PosInf.add(Number::NegInf, T), Number::NaN);
        assert_eq!(Number::PosInf.mul(Number::Int(0), T), Number::NaN);
        assert_eq!(Number::NegInf.mul(Number::Int(-3), T), Number::PosInf);
        assert_eq!(Number::NaN.add(Number::Int(1), T), Number::NaN);
        assert_eq!(Number::PosInf.floor_div(Number::Int(3)), Number::NaN);
    }

    #[test]
    fn division_should_floor_towards_negative_infinity() {
        assert_eq!(Number::Int(7).floor_div(Number::Int(2)), Number::Int(3));
        assert_eq!(Number::Int(-7).floor_div(Number::Int(2)), Number::Int(-4));
        assert_eq!(Number::Int(7).floor_div(Number::Int(0)), Number::NaN);
        assert_eq!(Number::Int(-7).floor_div(Number::PosInf), Number::Int(0));
        assert_eq!(Number::Int(-7).floor_mod(Number::Int(3)), Number::Int(2));
        assert_eq!(Number::Int(7).floor_mod(Number::Int(-3)), Number::Int(-2));
        assert_eq!(Number::Int(-5).floor_mod(Number::PosInf), Number::PosInf);
        assert_eq!(Number::Int(5).floor_mod(Number::PosInf), Number::Int(5));
    }

    #[test]
    fn nan_comparisons_are_false_except_not_equal() {
        assert!(!Number::NaN.compare(CmpOp::Eq, Number::NaN));
        assert!(!Number::NaN.compare(CmpOp::Lt, Number::Int(1)));
        assert!(Number::NaN.compare(CmpOp::Ne, Number::NaN));
        assert!(Number::NegInf.compare(CmpOp::Lt, Number::Int(i64::MIN)));
        assert!(Number::PosInf.compare(CmpOp::Ge, Number::PosInf));
    }

    proptest! {
        #[test]
        fn sums_never_exceed_threshold(a in -2000i64..2000, b in -2000i64..2000) {
            match Number::Int(a).add(Number::Int(b), T) {
                Number::Int(n) => prop_assert!(n.abs() <= T),
                Number::PosInf => prop_assert!(a + b > T),
                Number::NegInf => prop_assert!(a + b < -T),
                Number::NaN => prop_assert!(false),
            }
        }

        #[test]
        fn floor_div_and_mod_recompose(a in -10_000i64..10_000, b in prop_oneof![-50i64..-1, 1i64..50]) {
            let q = Number::Int(a).floor_div(Number::Int(b)).as_int().unwrap();
            let r = Number::Int(a).floor_mod(Number::Int(b)).as_int().unwrap();
            prop_assert_eq!(q * b + r, a);
        }
    }
}
