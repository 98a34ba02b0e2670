//! Pending-operation table and correlation tokens.
//!
//! Every submission entry carries a token packed into its 64-bit user data.
//! The token names a slot in a slab that owns the request's memory until the
//! kernel reports the completion. Each slot has a generation that is bumped
//! when it is freed, so a token that outlived its request never matches the
//! slot's next occupant.

use std::fmt;

/// Correlation token: slab index plus generation.
///
/// Packed into user data as `generation << 32 | index`. Generations start at
/// 1, so user data 0 never names a pending request.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Token {
    index: u32,
    generation: u32,
}

impl Token {
    /// Build a token from its parts.
    pub const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Slot generation at the time the token was issued.
    #[must_use]
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Value stamped into a submission entry's user data.
    #[must_use]
    pub const fn to_user_data(self) -> u64 {
        ((self.generation as u64) << 32) | self.index as u64
    }

    /// Inverse of [`to_user_data`](Self::to_user_data).
    #[must_use]
    pub const fn from_user_data(user_data: u64) -> Self {
        Self {
            index: user_data as u32,
            generation: (user_data >> 32) as u32,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug)]
enum Slot<T> {
    Occupied { value: T, generation: u32 },
    Vacant { next_free: u32, generation: u32 },
}

const FREE_LIST_END: u32 = u32::MAX;
const FIRST_GENERATION: u32 = 1;

fn next_generation(generation: u32) -> u32 {
    match generation.wrapping_add(1) {
        0 => FIRST_GENERATION,
        g => g,
    }
}

/// Slab of in-flight requests keyed by [`Token`].
///
/// O(1) insert, lookup and removal through an intrusive free list. Freed
/// slots are reused most-recently-freed first with a bumped generation.
#[derive(Debug)]
pub struct PendingTable<T> {
    slots: Vec<Slot<T>>,
    free_head: u32,
    len: usize,
}

impl<T> Default for PendingTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PendingTable<T> {
    /// Empty table.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Empty table with room for `capacity` entries before reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_head: FREE_LIST_END,
            len: 0,
        }
    }

    /// Store `value` and return the token that names it.
    pub fn insert(&mut self, value: T) -> Token {
        self.len += 1;
        if self.free_head == FREE_LIST_END {
            let index = self.slots.len() as u32;
            self.slots.push(Slot::Occupied {
                value,
                generation: FIRST_GENERATION,
            });
            return Token::new(index, FIRST_GENERATION);
        }

        let index = self.free_head;
        let slot = &mut self.slots[index as usize];
        let (generation, next_free) = match slot {
            Slot::Vacant {
                next_free,
                generation,
            } => (*generation, *next_free),
            Slot::Occupied { .. } => unreachable!("free list points at an occupied slot"),
        };
        *slot = Slot::Occupied { value, generation };
        self.free_head = next_free;
        Token::new(index, generation)
    }

    /// Entry named by `token`, if it is still pending.
    pub fn get(&self, token: Token) -> Option<&T> {
        match self.slots.get(token.index as usize)? {
            Slot::Occupied { value, generation } if *generation == token.generation => Some(value),
            _ => None,
        }
    }

    /// Mutable entry named by `token`, if it is still pending.
    pub fn get_mut(&mut self, token: Token) -> Option<&mut T> {
        match self.slots.get_mut(token.index as usize)? {
            Slot::Occupied { value, generation } if *generation == token.generation => Some(value),
            _ => None,
        }
    }

    /// Whether `token` names a pending entry.
    pub fn contains(&self, token: Token) -> bool {
        self.get(token).is_some()
    }

    /// Take the entry named by `token` out of the table.
    ///
    /// Returns `None` for stale or unknown tokens and leaves the table
    /// unchanged in that case.
    pub fn remove(&mut self, token: Token) -> Option<T> {
        let index = token.index as usize;
        match self.slots.get(index) {
            Some(Slot::Occupied { generation, .. }) if *generation == token.generation => {}
            _ => return None,
        }

        let vacant = Slot::Vacant {
            next_free: self.free_head,
            generation: next_generation(token.generation),
        };
        match std::mem::replace(&mut self.slots[index], vacant) {
            Slot::Occupied { value, .. } => {
                self.free_head = token.index;
                self.len -= 1;
                Some(value)
            }
            Slot::Vacant { .. } => unreachable!("checked occupied above"),
        }
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pending entries with their tokens, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Token, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| match slot {
            Slot::Occupied { value, generation } => Some((Token::new(index as u32, *generation), value)),
            Slot::Vacant { .. } => None,
        })
    }

    /// Tokens of every pending entry.
    pub fn tokens(&self) -> Vec<Token> {
        self.iter().map(|(token, _)| token).collect()
    }
}
