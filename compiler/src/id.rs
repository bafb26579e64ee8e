// id.rs — Typed arena indices for compiler artifacts
//
// Every node in the managed store is addressed by a typed index rather than
// a pointer. Indices are handed out in creation order, which keeps introduced
// variable numbering deterministic across runs on equal input.

/// Trait implemented by all typed indices so the generic arena can mint them.
pub trait ArenaId: Copy + Eq {
    fn from_usize(i: usize) -> Self;
    fn as_usize(self) -> usize;
}

macro_rules! arena_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl ArenaId for $name {
            fn from_usize(i: usize) -> Self {
                $name(i as u32)
            }
            fn as_usize(self) -> usize {
                self.0 as usize
            }
        }
    };
}

arena_id! {
    /// Index of an expression node in the environment's expression arena.
    ExprId
}

arena_id! {
    /// Index of a variable declaration. `Id` expressions hold a `DeclId`
    /// instead of a direct edge, which is what breaks reference cycles
    /// during structural traversal.
    DeclId
}

arena_id! {
    /// Index of a model item (declaration, constraint, solve, ...).
    ItemId
}

arena_id! {
    /// Index of a function item (predicate, builtin, or user function).
    FnId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let e = ExprId::from_usize(17);
        assert_eq!(e, ExprId(17));
        assert_eq!(e.as_usize(), 17);
    }

    #[test]
    fn ids_are_ordered_by_allocation() {
        assert!(DeclId(3) < DeclId(4));
        assert!(ItemId(0) < ItemId(1));
    }
}
