use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{CoreError, CoreResult};

static NEXT_LOOP_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_loop_id() -> u64 {
    NEXT_LOOP_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug)]
struct Inner {
    loop_id: u64,
    serial: u64,
    generation: AtomicU64,
}

/// Identity handle used to cancel pending work belonging to one logical
/// owner without affecting work posted by anyone else.
///
/// A token compares equal only to itself: cloning shares the same
/// generation counter, so bumping it via [`EventLoop::cancel`] makes every
/// outstanding closure captured with the old generation a no-op when it
/// finally runs.
///
/// [`EventLoop::cancel`]: crate::event_loop::EventLoop::cancel
#[derive(Debug, Clone)]
pub struct Token(Arc<Inner>);

impl Token {
    pub(crate) fn new(loop_id: u64, serial: u64) -> Token {
        Token(Arc::new(Inner {
            loop_id,
            serial,
            generation: AtomicU64::new(0),
        }))
    }

    pub(crate) fn loop_id(&self) -> u64 {
        self.0.loop_id
    }

    pub(crate) fn serial(&self) -> u64 {
        self.0.serial
    }

    pub(crate) fn generation(&self) -> u64 {
        self.0.generation.load(Ordering::Acquire)
    }

    pub(crate) fn bump_generation(&self) -> u64 {
        self.0.generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Checks this token was created by `loop_id`, returning
    /// `CoreError::InvalidParam` otherwise. Tokens are not transferable
    /// between loops.
    pub(crate) fn check_owner(&self, loop_id: u64) -> CoreResult<()> {
        if self.0.loop_id == loop_id {
            Ok(())
        } else {
            Err(CoreError::InvalidParam)
        }
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Token) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Token {}

impl Token {
    /// Returns `true` if `generation` (captured from [`Token::generation`]
    /// at post time) still matches the token's live generation, i.e. no
    /// `cancel` happened in between.
    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }
}

/// Allocates tokens for one event loop. Serials are unique within a loop
/// and are only used for debugging/identity, not for lookups: a token
/// carries everything needed to decide whether a stamped closure is still
/// live.
#[derive(Debug)]
pub(crate) struct TokenRegistry {
    loop_id: u64,
    next_serial: AtomicU64,
}

impl TokenRegistry {
    pub(crate) fn new(loop_id: u64) -> TokenRegistry {
        TokenRegistry {
            loop_id,
            next_serial: AtomicU64::new(1),
        }
    }

    pub(crate) fn create(&self) -> Token {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        Token::new(self.loop_id, serial)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn token_equality_is_identity() {
        let registry = TokenRegistry::new(1);
        let a = registry.create();
        let b = registry.create();
        let a2 = a.clone();

        assert_eq!(a, a2);
        assert_ne!(a, b);
    }

    #[test]
    fn reset_invalidates_old_generation() {
        let registry = TokenRegistry::new(1);
        let token = registry.create();
        let generation = token.generation();
        assert!(token.is_current(generation));

        token.bump_generation();
        assert!(!token.is_current(generation));
        assert!(token.is_current(token.generation()));
    }

    #[test]
    fn rejects_foreign_loop() {
        let registry_a = TokenRegistry::new(1);
        let token = registry_a.create();
        assert!(token.check_owner(1).is_ok());
        assert_eq!(token.check_owner(2), Err(CoreError::InvalidParam));
    }
}
