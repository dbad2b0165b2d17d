//! Index traversal kinds.
//!
//! Different index types support different iterators; asking an index for a
//! kind it does not support fails on the server with `ER_UNSUPPORTED`. To be
//! usable as a primary key an index must support at least `Eq` and `Ge`.
//!
//! An empty key means "first key" for `Ge`/`Gt` and "last key" for
//! `Le`/`Lt`, so `Ge` or `Le` with an empty key walks the whole index.
//! `Eq` and `Req` require a non-empty key.

/// Iterator kind with a fixed numeric wire code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum IteratorType {
    /// key == x, ascending
    #[default]
    Eq = 0,
    /// key == x, descending
    Req = 1,
    /// all tuples
    All = 2,
    /// key < x
    Lt = 3,
    /// key <= x
    Le = 4,
    /// key >= x
    Ge = 5,
    /// key > x
    Gt = 6,
    /// all bits of x are set in key
    BitsAllSet = 7,
    /// at least one bit of x is set in key
    BitsAnySet = 8,
    /// no bit of x is set in key
    BitsAllNotSet = 9,
    /// key overlaps x
    Overlaps = 10,
    /// tuples in ascending distance from a point
    Neighbor = 11,
}

impl IteratorType {
    /// Sentinel one past the last valid code
    pub const MAX: u32 = 12;

    pub const ALL: [IteratorType; 12] = [
        IteratorType::Eq,
        IteratorType::Req,
        IteratorType::All,
        IteratorType::Lt,
        IteratorType::Le,
        IteratorType::Ge,
        IteratorType::Gt,
        IteratorType::BitsAllSet,
        IteratorType::BitsAnySet,
        IteratorType::BitsAllNotSet,
        IteratorType::Overlaps,
        IteratorType::Neighbor,
    ];

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Whether this kind is meaningless without a key
    pub fn requires_key(self) -> bool {
        matches!(self, IteratorType::Eq | IteratorType::Req)
    }
}
