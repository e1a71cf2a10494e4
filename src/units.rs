//! Capacity arithmetic.
//!
//! Capacities are fixed-point hundredths of a GiB, which is the precision
//! LVM reports with `--units g`. Keeping them integral means a split of a
//! total into two shares always sums back to the exact total.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

const BYTES_PER_GIB: u64 = 1024 * 1024 * 1024;
const CENTI_PER_GIB: u64 = 100;

static DECIMAL_GIB: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:([0-9]+)(?:\.([0-9]*))?|\.([0-9]+))$").expect("valid capacity regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Capacity(u64);

impl Capacity {
    pub const ZERO: Capacity = Capacity(0);

    pub const fn from_centi_gib(centi: u64) -> Self {
        Self(centi)
    }

    pub const fn from_gib(gib: u64) -> Self {
        Self(gib * CENTI_PER_GIB)
    }

    /// Round down to the nearest hundredth of a GiB, so a capacity derived
    /// from a byte count never exceeds what the tools will actually hand out.
    pub fn from_bytes(bytes: u64) -> Self {
        let centi = (bytes as u128 * CENTI_PER_GIB as u128) / BYTES_PER_GIB as u128;
        Self(centi as u64)
    }

    /// Convert a configured GiB value (e.g. `0.1`) to a capacity.
    /// Negative and non-finite values collapse to zero.
    pub fn from_gib_f64(gib: f64) -> Self {
        if !gib.is_finite() || gib <= 0.0 {
            return Self::ZERO;
        }
        Self((gib * CENTI_PER_GIB as f64).round() as u64)
    }

    /// Parse a user-supplied decimal GiB amount such as `8`, `8.5`, `.5` or
    /// `8.125`.
    ///
    /// Digits past the second decimal are truncated, so the result never
    /// exceeds what was typed. Signs and exponents are rejected.
    pub fn parse_gib(input: &str) -> Option<Self> {
        let caps = DECIMAL_GIB.captures(input.trim())?;
        let whole: u64 = match caps.get(1) {
            Some(m) => m.as_str().parse().ok()?,
            None => 0,
        };
        let digits = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
        let fraction = digits
            .bytes()
            .chain(std::iter::repeat(b'0'))
            .take(2)
            .fold(0u64, |acc, d| acc * 10 + u64::from(d - b'0'));
        whole
            .checked_mul(CENTI_PER_GIB)?
            .checked_add(fraction)
            .map(Self)
    }

    pub const fn centi_gib(self) -> u64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_sub(self, other: Capacity) -> Option<Capacity> {
        self.0.checked_sub(other.0).map(Capacity)
    }

    pub fn saturating_sub(self, other: Capacity) -> Capacity {
        Capacity(self.0.saturating_sub(other.0))
    }

    /// Size argument for `lvextend -L +<size>`.
    pub fn lvm_size_arg(self) -> String {
        format!("+{}.{:02}g", self.0 / CENTI_PER_GIB, self.0 % CENTI_PER_GIB)
    }
}

impl std::ops::Add for Capacity {
    type Output = Capacity;

    fn add(self, rhs: Capacity) -> Capacity {
        Capacity(self.0 + rhs.0)
    }
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:02} GiB",
            self.0 / CENTI_PER_GIB,
            self.0 % CENTI_PER_GIB
        )
    }
}

/// Format a byte count for humans, e.g. `20.0 GiB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Format a signed byte delta, e.g. `+20.0 GiB`.
pub fn format_delta(before: u64, after: u64) -> String {
    if after >= before {
        format!("+{}", format_bytes(after - before))
    } else {
        format!("-{}", format_bytes(before - after))
    }
}
