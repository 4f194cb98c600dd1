//! PostgreSQL's eight lock levels and their compatibility matrix.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The eight PostgreSQL table lock levels, in ascending strength order.
///
/// `LockLevel` derives `Ord` so callers can compare strength directly
/// (`ExclusiveLock > ShareLock`), matching the total order from spec §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockLevel {
    AccessShare,
    RowShare,
    RowExclusive,
    ShareUpdateExclusive,
    Share,
    ShareRowExclusive,
    Exclusive,
    AccessExclusive,
}

impl LockLevel {
    pub const ALL: [LockLevel; 8] = [
        LockLevel::AccessShare,
        LockLevel::RowShare,
        LockLevel::RowExclusive,
        LockLevel::ShareUpdateExclusive,
        LockLevel::Share,
        LockLevel::ShareRowExclusive,
        LockLevel::Exclusive,
        LockLevel::AccessExclusive,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LockLevel::AccessShare => "ACCESS SHARE",
            LockLevel::RowShare => "ROW SHARE",
            LockLevel::RowExclusive => "ROW EXCLUSIVE",
            LockLevel::ShareUpdateExclusive => "SHARE UPDATE EXCLUSIVE",
            LockLevel::Share => "SHARE",
            LockLevel::ShareRowExclusive => "SHARE ROW EXCLUSIVE",
            LockLevel::Exclusive => "EXCLUSIVE",
            LockLevel::AccessExclusive => "ACCESS EXCLUSIVE",
        }
    }

    /// What operations this lock level blocks, for the Lock Radar impact badge.
    pub fn blocking_potential(self) -> BlockingPotential {
        match self {
            LockLevel::AccessShare => BlockingPotential {
                blocks_reads: false,
                blocks_writes: false,
                blocks_ddl: false,
            },
            LockLevel::RowShare | LockLevel::RowExclusive => BlockingPotential {
                blocks_reads: false,
                blocks_writes: false,
                blocks_ddl: true,
            },
            LockLevel::ShareUpdateExclusive => BlockingPotential {
                blocks_reads: false,
                blocks_writes: false,
                blocks_ddl: true,
            },
            LockLevel::Share => BlockingPotential {
                blocks_reads: false,
                blocks_writes: true,
                blocks_ddl: true,
            },
            LockLevel::ShareRowExclusive => BlockingPotential {
                blocks_reads: false,
                blocks_writes: true,
                blocks_ddl: true,
            },
            LockLevel::Exclusive => BlockingPotential {
                blocks_reads: false,
                blocks_writes: true,
                blocks_ddl: true,
            },
            LockLevel::AccessExclusive => BlockingPotential {
                blocks_reads: true,
                blocks_writes: true,
                blocks_ddl: true,
            },
        }
    }

    /// PostgreSQL's lock compatibility matrix: `true` iff a lock of `self` and
    /// a lock of `other` may be held concurrently on the same relation.
    pub fn compatible_with(self, other: LockLevel) -> bool {
        COMPATIBILITY[self.index()][other.index()]
    }

    pub fn conflicts_with(self, other: LockLevel) -> bool {
        !self.compatible_with(other)
    }
}

impl fmt::Display for LockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockingPotential {
    pub blocks_reads: bool,
    pub blocks_writes: bool,
    pub blocks_ddl: bool,
}

// Row order / column order follows LockLevel::ALL. Transcribed from the
// PostgreSQL documentation's table-level lock compatibility matrix.
//
//                          AS     RS     RE     SUE    S      SRE    E      AE
const COMPATIBILITY: [[bool; 8]; 8] = [
    /* AS  */ [true, true, true, true, true, true, true, false],
    /* RS  */ [true, true, true, true, true, true, false, false],
    /* RE  */ [true, true, true, true, false, false, false, false],
    /* SUE */ [true, true, true, false, false, false, false, false],
    /* S   */ [true, true, false, false, true, false, false, false],
    /* SRE */ [true, true, false, false, false, false, false, false],
    /* E   */ [true, false, false, false, false, false, false, false],
    /* AE  */ [false, false, false, false, false, false, false, false],
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_is_symmetric() {
        for a in LockLevel::ALL {
            for b in LockLevel::ALL {
                assert_eq!(
                    a.compatible_with(b),
                    b.compatible_with(a),
                    "asymmetry between {a:?} and {b:?}"
                );
            }
        }
    }

    #[test]
    fn access_exclusive_conflicts_with_everything() {
        for level in LockLevel::ALL {
            assert!(LockLevel::AccessExclusive.conflicts_with(level));
        }
    }

    #[test]
    fn access_share_only_conflicts_with_access_exclusive() {
        for level in LockLevel::ALL {
            if level == LockLevel::AccessExclusive {
                assert!(LockLevel::AccessShare.conflicts_with(level));
            } else {
                assert!(LockLevel::AccessShare.compatible_with(level));
            }
        }
    }

    #[test]
    fn share_update_exclusive_self_conflicts() {
        assert!(LockLevel::ShareUpdateExclusive.conflicts_with(LockLevel::ShareUpdateExclusive));
    }

    #[test]
    fn ordering_matches_ascending_strength() {
        assert!(LockLevel::AccessShare < LockLevel::RowShare);
        assert!(LockLevel::ShareUpdateExclusive < LockLevel::Share);
        assert!(LockLevel::Exclusive < LockLevel::AccessExclusive);
    }
}
