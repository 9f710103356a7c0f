//! Connection handle types shared by the pool, the reactor and business handlers.

/// Index of one slot inside the fixed connection array.
pub type SlotIndex = usize;

/// Reuse tag of one connection slot.
pub type Generation = usize;

/// Logical session counter of one connection slot.
pub type SessionSequence = u64;

/// Wire message code.
pub type MessageCode = u16;

/// Number of low token bits holding the slot index.
pub const TOKEN_INDEX_BITS: u32 = 24;

/// Upper bound on pool capacity imposed by the token layout.
pub const MAX_POOL_CAPACITY: usize = 1 << TOKEN_INDEX_BITS;

const TOKEN_INDEX_MASK: usize = MAX_POOL_CAPACITY - 1;

/// Mask applied to generations so they always fit in the high token bits.
pub const GENERATION_MASK: usize = usize::MAX >> TOKEN_INDEX_BITS;

/// Arena handle for one pooled connection: slot index plus the generation it was issued for.
///
/// A handle is only honoured while the slot still carries the same generation. Once the slot
/// is recycled and handed out again, every old handle (and every poll token built from one)
/// resolves to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionRef {
    index: SlotIndex,
    generation: Generation,
}

impl ConnectionRef {
    /// Builds a handle; the generation is truncated to the token-representable range.
    #[must_use]
    pub const fn new(index: SlotIndex, generation: Generation) -> Self {
        Self {
            index,
            generation: generation & GENERATION_MASK,
        }
    }

    /// Slot index inside the pool.
    #[must_use]
    pub const fn index(self) -> SlotIndex {
        self.index
    }

    /// Generation the handle was issued for.
    #[must_use]
    pub const fn generation(self) -> Generation {
        self.generation
    }

    /// Packs the handle into one poll token value: `generation << 24 | index`.
    #[must_use]
    pub const fn to_token_value(self) -> usize {
        (self.generation << TOKEN_INDEX_BITS) | (self.index & TOKEN_INDEX_MASK)
    }

    /// Inverse of [`ConnectionRef::to_token_value`].
    #[must_use]
    pub const fn from_token_value(value: usize) -> Self {
        Self {
            index: value & TOKEN_INDEX_MASK,
            generation: value >> TOKEN_INDEX_BITS,
        }
    }
}

/// Advances a slot generation, wrapping inside the token-representable range.
#[must_use]
pub const fn next_generation(generation: Generation) -> Generation {
    generation.wrapping_add(1) & GENERATION_MASK
}

/// Validated pool capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PoolCapacity(usize);

impl PoolCapacity {
    /// Creates a validated capacity.
    ///
    /// Returns `None` for zero and for values whose slot indexes would not fit in a token.
    #[must_use]
    pub fn new(value: usize) -> Option<Self> {
        if value == 0 || value > MAX_POOL_CAPACITY {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Returns the inner count.
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }
}
