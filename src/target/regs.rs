use std::{fmt, ops};

/// The kind of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegKind {
    /// The general purpose register.
    General,
    /// The floating point register.
    Float,
    /// The vector register.
    Vector,
}

impl RegKind {
    pub const ALL: [RegKind; 3] = [RegKind::General, RegKind::Float, RegKind::Vector];

    /// Dense index of the kind, used to key per-kind tables.
    pub const fn index(self) -> usize {
        match self {
            RegKind::General => 0,
            RegKind::Float => 1,
            RegKind::Vector => 2,
        }
    }
}

impl fmt::Display for RegKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegKind::General => write!(f, "int"),
            RegKind::Float => write!(f, "float"),
            RegKind::Vector => write!(f, "vec"),
        }
    }
}

/// The physical register.
///
/// The register number and the kind are kept separately, a number is only
/// meaningful together with its kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PReg(u8, RegKind);

impl PReg {
    pub const fn new(num: u8, kind: RegKind) -> Self { Self(num, kind) }

    pub const fn num(&self) -> u8 { self.0 }

    pub const fn kind(&self) -> RegKind { self.1 }
}

/// A set of registers of one kind, bit `n` standing for register number `n`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegMask(u64);

impl RegMask {
    pub const EMPTY: RegMask = RegMask(0);

    pub const fn from_bits(bits: u64) -> Self { Self(bits) }

    pub const fn bits(self) -> u64 { self.0 }

    pub const fn single(num: u8) -> Self { Self(1 << num) }

    /// The mask of registers `0..n`.
    pub const fn first_n(n: u8) -> Self {
        if n >= 64 {
            Self(u64::MAX)
        } else {
            Self((1u64 << n) - 1)
        }
    }

    pub fn from_nums(nums: &[u8]) -> Self {
        nums.iter().fold(Self::EMPTY, |mask, num| mask | Self::single(*num))
    }

    pub const fn contains(self, num: u8) -> bool { num < 64 && self.0 & (1 << num) != 0 }

    pub fn insert(&mut self, num: u8) { self.0 |= 1 << num; }

    pub fn remove(&mut self, num: u8) { self.0 &= !(1 << num); }

    pub const fn is_empty(self) -> bool { self.0 == 0 }

    pub const fn count(self) -> u32 { self.0.count_ones() }

    /// The lowest-numbered register in the set.
    pub fn lowest(self) -> Option<u8> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as u8)
        }
    }

    /// Whether the set holds exactly one register.
    pub const fn is_single(self) -> bool { self.0.count_ones() == 1 }

    /// Keep only the `n` lowest-numbered registers of the set.
    pub fn limit(self, n: u8) -> Self {
        let mut result = Self::EMPTY;
        for num in self.iter().take(n as usize) {
            result.insert(num);
        }
        result
    }

    /// Rotate the lowest `size` bits right by `amount`, so bit `s` of the
    /// result is bit `(s + amount) % size` of `self`.
    pub fn rotate_right_within(self, amount: u8, size: u8) -> Self {
        let file = Self::first_n(size);
        let bits = self.0 & file.0;
        let amount = u32::from(amount % size.max(1));
        if amount == 0 {
            return Self(bits);
        }
        let rotated = (bits >> amount) | (bits << (u32::from(size) - amount));
        Self(rotated & file.0)
    }

    pub fn iter(self) -> impl Iterator<Item = u8> {
        let mut bits = self.0;
        std::iter::from_fn(move || {
            if bits == 0 {
                None
            } else {
                let num = bits.trailing_zeros() as u8;
                bits &= bits - 1;
                Some(num)
            }
        })
    }
}

impl ops::BitAnd for RegMask {
    type Output = RegMask;

    fn bitand(self, rhs: Self) -> Self { Self(self.0 & rhs.0) }
}

impl ops::BitOr for RegMask {
    type Output = RegMask;

    fn bitor(self, rhs: Self) -> Self { Self(self.0 | rhs.0) }
}

impl ops::BitOrAssign for RegMask {
    fn bitor_assign(&mut self, rhs: Self) { self.0 |= rhs.0; }
}

impl ops::BitAndAssign for RegMask {
    fn bitand_assign(&mut self, rhs: Self) { self.0 &= rhs.0; }
}

impl ops::Not for RegMask {
    type Output = RegMask;

    fn not(self) -> Self { Self(!self.0) }
}

impl ops::Shr<u8> for RegMask {
    type Output = RegMask;

    fn shr(self, rhs: u8) -> Self { Self(self.0.checked_shr(u32::from(rhs)).unwrap_or(0)) }
}

impl fmt::Debug for RegMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
