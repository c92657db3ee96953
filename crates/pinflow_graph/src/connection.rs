// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connection rules deciding whether two pins may be linked.

use crate::pin::Pin;

/// Predicate gating a connection attempt.
///
/// Direction and fan-in are enforced by the pins themselves; a rule only
/// adds compatibility checks on top.
pub trait ConnectionRule: Send + Sync {
    /// Check if a connection between `a` and `b` is allowed
    fn can_connect(&self, a: &Pin, b: &Pin) -> bool;
}

impl<F> ConnectionRule for F
where
    F: Fn(&Pin, &Pin) -> bool + Send + Sync,
{
    fn can_connect(&self, a: &Pin, b: &Pin) -> bool {
        self(a, b)
    }
}

/// Accepts every pair
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl ConnectionRule for AllowAll {
    fn can_connect(&self, _a: &Pin, _b: &Pin) -> bool {
        true
    }
}

/// Accepts pairs whose declared kinds are compatible
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeChecked;

impl ConnectionRule for TypeChecked {
    fn can_connect(&self, a: &Pin, b: &Pin) -> bool {
        a.kind.can_connect_to(&b.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pin::PinKind;

    #[test]
    fn test_rules() {
        let a = Pin::output().with_kind(PinKind::String);
        let b = Pin::input().with_kind(PinKind::Integer);
        assert!(AllowAll.can_connect(&a, &b));
        assert!(!TypeChecked.can_connect(&a, &b));

        let named = |a: &Pin, b: &Pin| a.name.is_some() && b.name.is_some();
        assert!(!named.can_connect(&a, &b));
    }
}
