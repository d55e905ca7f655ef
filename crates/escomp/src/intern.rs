//! Interning of source identifiers and literal strings.
//!
//! Every identifier and string literal encountered by the lexer is folded into
//! a single table keyed by content, not identity: two lexemes with the same
//! UTF-16 code units always resolve to the same [`StringId`]. Downstream
//! passes compare identifiers and the generated backend registers string
//! literals by comparing these small integers instead of cloning text.
//!
//! `StringId` values assigned by this compiler start at [`COMPILER_ID_FLOOR`]
//! and count upward from there; ids below the floor are reserved for the
//! runtime's own bootstrap strings (property names such as `length` that the
//! runtime interns before any compiled module runs). Keeping the ranges
//! disjoint is what makes the pool injective end to end (ids the compiler
//! allocates never collide with ids the runtime reserves for itself).

use std::cell::RefCell;

use ahash::AHashMap;

/// Runtime-reserved ids occupy `0..COMPILER_ID_FLOOR`; the compiler's pool
/// never hands out an id below this floor.
pub const COMPILER_ID_FLOOR: u32 = 10_000;

/// A stable, content-deduplicated handle to an interned UTF-16 string.
///
/// Two [`StringId`]s are equal exactly when the text they name is equal; the
/// pool guarantees there is at most one live id per distinct content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct StringId(u32);

impl StringId {
    /// Wraps a raw id without consulting the pool. Used only for constants
    /// whose value is fixed ahead of time, such as the empty string.
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

/// djb2 over 16-bit code units, matching the hash the lexer and pool share.
#[must_use]
pub fn djb2(units: &[u16]) -> u64 {
    let mut hash: u64 = 5381;
    for &unit in units {
        hash = hash.wrapping_mul(33).wrapping_add(u64::from(unit));
    }
    hash
}

/// An immutable, hash-memoized sequence of UTF-16 code units.
///
/// Content equality, not identity, is what the pool keys on; `hash` is
/// computed once at construction since the unit sequence never changes
/// afterwards.
#[derive(Debug, Clone)]
pub struct InternedString {
    units: Box<[u16]>,
    hash: u64,
}

impl InternedString {
    fn new(units: Vec<u16>) -> Self {
        let hash = djb2(&units);
        Self {
            units: units.into_boxed_slice(),
            hash,
        }
    }

    #[must_use]
    pub fn units(&self) -> &[u16] {
        &self.units
    }

    #[must_use]
    pub fn to_utf8(&self) -> String {
        String::from_utf16_lossy(&self.units)
    }
}

impl PartialEq for InternedString {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.units == other.units
    }
}
impl Eq for InternedString {}

/// Deduplicating pool of interned strings, keyed by content hash.
///
/// The pool is append-only for the lifetime of a compilation unit: once an id
/// is assigned it is never reused or invalidated, satisfying invariant 7 of
/// the IR data model (compiler ids and runtime ids never collide).
pub struct InternPool {
    by_content: AHashMap<Box<[u16]>, StringId>,
    strings: Vec<InternedString>,
    next_id: u32,
}

impl Default for InternPool {
    fn default() -> Self {
        Self::new()
    }
}

impl InternPool {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_content: AHashMap::new(),
            strings: Vec::new(),
            next_id: COMPILER_ID_FLOOR,
        }
    }

    /// Interns `text`, returning its stable id. Repeated calls with equal
    /// content return the same id without growing the pool.
    pub fn intern(&mut self, text: &str) -> StringId {
        let units: Vec<u16> = text.encode_utf16().collect();
        self.intern_units(units)
    }

    pub fn intern_units(&mut self, units: Vec<u16>) -> StringId {
        let key: Box<[u16]> = units.clone().into_boxed_slice();
        if let Some(&id) = self.by_content.get(&key) {
            return id;
        }
        let id = StringId(self.next_id);
        self.next_id += 1;
        self.strings.push(InternedString::new(units));
        self.by_content.insert(key, id);
        id
    }

    #[must_use]
    pub fn is_interned(&self, text: &str) -> bool {
        let units: Vec<u16> = text.encode_utf16().collect();
        self.by_content.contains_key(units.as_slice())
    }

    /// Linear lookup from id back to content. Test-only: production passes
    /// never need to go from id to text, only the reverse.
    #[must_use]
    pub fn lookup(&self, id: StringId) -> Option<&InternedString> {
        let index = id.0.checked_sub(COMPILER_ID_FLOOR)? as usize;
        self.strings.get(index)
    }

    /// Replaces (or installs) a mapping so a compiler-visible name aligns
    /// with an id the runtime already reserved for it at boot. Used only
    /// while bootstrapping well-known property names; never called once a
    /// module's ordinary identifiers are being interned.
    pub fn unsafe_intern(&mut self, text: &str, id: StringId) {
        let units: Vec<u16> = text.encode_utf16().collect();
        self.by_content.insert(units.into_boxed_slice(), id);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Resources to register at module init, in the order they were first
    /// interned (insertion order, never re-sorted -- this is what keeps
    /// emission deterministic per the concurrency/ordering note).
    pub fn resources(&self) -> impl Iterator<Item = (StringId, &InternedString)> {
        self.strings
            .iter()
            .enumerate()
            .map(|(i, s)| (StringId(COMPILER_ID_FLOOR + i as u32), s))
    }
}

thread_local! {
    static SCRATCH: RefCell<Vec<u16>> = const { RefCell::new(Vec::new()) };
}

/// Interns `text` into `pool`, reusing a thread-local scratch buffer to avoid
/// an allocation on the common path where the string is already present.
pub fn intern_cached(pool: &mut InternPool, text: &str) -> StringId {
    SCRATCH.with(|scratch| {
        let mut buf = scratch.borrow_mut();
        buf.clear();
        buf.extend(text.encode_utf16());
        if let Some(&id) = pool.by_content.get(buf.as_slice()) {
            return id;
        }
        pool.intern_units(buf.clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_same_content_returns_same_id() {
        let mut pool = InternPool::new();
        let a = pool.intern("foo");
        let b = pool.intern("foo");
        assert_eq!(a, b);
    }

    #[test]
    fn interning_distinct_content_returns_distinct_ids() {
        let mut pool = InternPool::new();
        let a = pool.intern("foo");
        let b = pool.intern("bar");
        assert_ne!(a, b);
    }

    #[test]
    fn ids_start_at_compiler_floor() {
        let mut pool = InternPool::new();
        let a = pool.intern("foo");
        assert!(a.raw() >= COMPILER_ID_FLOOR);
    }

    #[test]
    fn lookup_round_trips_content() {
        let mut pool = InternPool::new();
        let id = pool.intern("hello");
        assert_eq!(pool.lookup(id).unwrap().to_utf8(), "hello");
    }

    #[test]
    fn resources_preserve_insertion_order() {
        let mut pool = InternPool::new();
        pool.intern("b");
        pool.intern("a");
        pool.intern("c");
        let names: Vec<String> = pool.resources().map(|(_, s)| s.to_utf8()).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn unsafe_intern_overrides_mapping() {
        let mut pool = InternPool::new();
        pool.unsafe_intern("length", StringId::from_raw(42));
        assert_eq!(pool.intern("length"), StringId::from_raw(42));
    }
}
