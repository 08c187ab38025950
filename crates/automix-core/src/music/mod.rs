//! Music theory utilities for key matching
//!
//! Provides Camelot wheel key parsing, wheel distance, and semitone
//! calculations for automatic harmonic mixing.
//!
//! Keys use Camelot notation `"<n><m>"` where `n` is a wheel position
//! (1-12, laid out in the circle of fifths) and `m` is `A` (minor) or
//! `B` (major). Adjacent positions on the wheel are harmonically
//! compatible; the relative major/minor pair shares a position.

/// Key mode on the Camelot wheel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyMode {
    /// Minor keys (the "A" ring)
    Minor,
    /// Major keys (the "B" ring)
    Major,
}

impl KeyMode {
    /// The Camelot letter for this mode
    pub fn letter(&self) -> char {
        match self {
            KeyMode::Minor => 'A',
            KeyMode::Major => 'B',
        }
    }
}

/// A key on the Camelot wheel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CamelotKey {
    /// Wheel position (1-12)
    pub number: u8,
    /// Minor (A) or major (B)
    pub mode: KeyMode,
}

impl CamelotKey {
    /// Parse a Camelot key string like "8A" or "12B"
    ///
    /// Returns None for anything outside `1..=12` + `{A, B}` (case
    /// insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.len() < 2 {
            return None;
        }

        let (digits, mode_char) = s.split_at(s.len() - 1);
        let number: u8 = digits.parse().ok()?;
        if !(1..=12).contains(&number) {
            return None;
        }

        let mode = match mode_char.chars().next()?.to_ascii_uppercase() {
            'A' => KeyMode::Minor,
            'B' => KeyMode::Major,
            _ => return None,
        };

        Some(Self { number, mode })
    }

    /// Semitone offset of the root note from C (0=C ... 11=B)
    ///
    /// Camelot numbers step through the circle of fifths, so the root is
    /// `(n - 5) * 7 mod 12` semitones for the minor ring; the relative
    /// major sits 3 semitones above.
    pub fn root_semitone(&self) -> u8 {
        let minor_root = ((self.number as i32 - 5) * 7).rem_euclid(12) as u8;
        match self.mode {
            KeyMode::Minor => minor_root,
            KeyMode::Major => (minor_root + 3) % 12,
        }
    }
}

impl std::fmt::Display for CamelotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.number, self.mode.letter())
    }
}

/// Calculate distance on the Camelot wheel between two key strings
///
/// Returns the minimum circular step count (0-6) for same-mode keys, 0 for
/// a relative major/minor pair, and wheel distance + 1 for any other
/// cross-mode pair. Unparseable keys are treated as distance 0 so that
/// missing analysis never blocks a transition.
pub fn camelot_distance(key1: &str, key2: &str) -> u8 {
    let (Some(k1), Some(k2)) = (CamelotKey::parse(key1), CamelotKey::parse(key2)) else {
        return 0;
    };

    let diff = (k1.number as i32 - k2.number as i32).unsigned_abs() as u8;
    let wheel_dist = diff.min(12 - diff);

    if k1.mode == k2.mode {
        return wheel_dist;
    }

    // Relative major/minor share a wheel position
    if k1.number == k2.number {
        return 0;
    }

    // Cross-mode move costs one extra step
    wheel_dist + 1
}

/// Check if two keys are harmonically compatible (distance <= 1)
pub fn keys_compatible(key1: &str, key2: &str) -> bool {
    camelot_distance(key1, key2) <= 1
}

/// Signed semitone interval from `from` to `to`, wrapped to [-6, +6]
///
/// Used to decide whether a small pitch shift can reconcile two nearby
/// keys. Returns None when either key fails to parse.
pub fn semitone_interval(from: &str, to: &str) -> Option<i8> {
    let from = CamelotKey::parse(from)?;
    let to = CamelotKey::parse(to)?;

    let diff = to.root_semitone() as i8 - from.root_semitone() as i8;
    Some(if diff > 6 {
        diff - 12
    } else if diff < -6 {
        diff + 12
    } else {
        diff
    })
}
