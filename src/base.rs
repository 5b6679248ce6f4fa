use crate::error::{Error, Result};
use rand::Rng;

pub const DEFAULT_DIGITS: &str = "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Converts integers to and from digit strings in bases `2..=max_base`.
#[derive(Debug, Clone)]
pub struct BaseConverter {
    digits: Vec<char>,
    max_base: u32,
}

impl BaseConverter {
    pub fn new(digits: &str, max_base: u32) -> Result<Self> {
        let digits: Vec<char> = digits.chars().collect();
        if max_base < 2 {
            return Err(Error::Config(format!("max base {} is below 2", max_base)));
        }
        if digits.len() < max_base as usize {
            return Err(Error::Config(format!(
                "digit alphabet has {} symbols but max base is {}",
                digits.len(),
                max_base
            )));
        }
        for (i, d) in digits.iter().enumerate() {
            if digits[..i].contains(d) || *d == '-' {
                return Err(Error::Config(format!("digit `{}` is not usable", d)));
            }
        }
        Ok(Self { digits, max_base })
    }

    pub fn max_base(&self) -> u32 {
        self.max_base
    }

    pub fn digits(&self) -> &[char] {
        &self.digits
    }

    fn check_base(&self, base: u32) -> Result<()> {
        if base < 2 || base > self.max_base {
            return Err(Error::UnsupportedBase {
                base,
                max: self.max_base,
            });
        }
        Ok(())
    }

    pub fn to_base(&self, n: i64, base: u32) -> Result<String> {
        self.check_base(base)?;
        if n == 0 {
            return Ok(self.digits[0].to_string());
        }
        let mut magnitude = n.unsigned_abs();
        let mut out = Vec::new();
        while magnitude > 0 {
            out.push(self.digits[(magnitude % base as u64) as usize]);
            magnitude /= base as u64;
        }
        if n < 0 {
            out.push('-');
        }
        Ok(out.into_iter().rev().collect())
    }

    pub fn digit_value(&self, c: char, base: u32) -> Option<u32> {
        self.digits[..base as usize]
            .iter()
            .position(|d| *d == c)
            .map(|p| p as u32)
    }

    pub fn from_base(&self, s: &str, base: u32) -> Result<i64> {
        self.check_base(base)?;
        let (negative, body) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        if body.is_empty() {
            return Err(Error::Evaluation(format!("`{}` has no digits", s)));
        }
        let mut acc: i128 = 0;
        for c in body.chars() {
            let d = self.digit_value(c, base).ok_or_else(|| {
                Error::Evaluation(format!("`{}` is not a base-{} digit", c, base))
            })?;
            acc = acc * base as i128 + d as i128;
            if acc > i64::MAX as i128 + 1 {
                return Err(Error::Evaluation(format!("`{}` overflows a 64-bit integer", s)));
            }
        }
        let value = if negative { -acc } else { acc };
        i64::try_from(value).map_err(|_| Error::Evaluation(format!("`{}` overflows a 64-bit integer", s)))
    }

    /// Draws a random value in `min..=max` and renders it in `base`.
    pub fn random_number<R: Rng + ?Sized>(&self, rng: &mut R, min: i64, max: i64, base: u32) -> Result<(i64, String)> {
        let value = rng.gen_range(min..=max);
        Ok((value, self.to_base(value, base)?))
    }
}

impl Default for BaseConverter {
    fn default() -> Self {
        Self {
            digits: DEFAULT_DIGITS.chars().collect(),
            max_base: 36,
        }
    }
}
