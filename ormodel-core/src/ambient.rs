//! Task-local ambient session slot
//!
//! Holds at most one [`Session`] per logical task. Writers follow a strict
//! set/reset discipline: `set` returns a [`Token`] carrying the previous
//! value and `reset` restores exactly that value, so nested scopes unwind
//! correctly. Concurrent tasks never observe each other's slot.

use std::cell::RefCell;
use std::future::Future;

use crate::error::{OrmError, Result};
use crate::session::Session;

tokio::task_local! {
    static AMBIENT_SESSION: RefCell<Option<Session>>;
}

/// Previous slot value, returned by [`set`] and consumed by [`reset`]
#[must_use = "the token must be passed to reset() to restore the previous session"]
#[derive(Debug)]
pub struct Token {
    previous: Option<Session>,
}

/// Run `fut` with a fresh, empty ambient slot.
pub async fn enter<F: Future>(fut: F) -> F::Output {
    AMBIENT_SESSION.scope(RefCell::new(None), fut).await
}

/// Whether the current task has an ambient slot at all.
pub fn is_available() -> bool {
    AMBIENT_SESSION.try_with(|_| ()).is_ok()
}

/// Bind `session`, returning the value it replaced.
pub fn set(session: Session) -> Result<Token> {
    AMBIENT_SESSION
        .try_with(|slot| Token {
            previous: slot.borrow_mut().replace(session),
        })
        .map_err(|_| OrmError::NoTaskContext)
}

/// The bound session, if any. Never blocks and never creates one.
pub fn get() -> Option<Session> {
    AMBIENT_SESSION
        .try_with(|slot| slot.borrow().clone())
        .ok()
        .flatten()
}

/// Restore the value captured by `token`.
pub fn reset(token: Token) {
    let restored = AMBIENT_SESSION.try_with(|slot| {
        *slot.borrow_mut() = token.previous;
    });
    if restored.is_err() {
        tracing::warn!("ambient session reset outside its task; slot already gone");
    }
}

/// The bound session or a typed failure for manager verbs.
pub fn current() -> Result<Session> {
    get().ok_or(OrmError::NoActiveSession)
}

/// Resets the slot when dropped, covering early returns, panics and
/// cancellation of the owning future.
pub(crate) struct SlotGuard {
    token: Option<Token>,
}

impl SlotGuard {
    pub(crate) fn bind(session: Session) -> Result<Self> {
        Ok(Self {
            token: Some(set(session)?),
        })
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            reset(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_outside_slot_fails() {
        assert!(!is_available());
        assert!(get().is_none());
        assert!(matches!(current(), Err(OrmError::NoActiveSession)));

        let pool = sqlx::SqlitePool::connect_lazy("sqlite::memory:").unwrap();
        let err = set(Session::new(pool, false)).unwrap_err();
        assert!(matches!(err, OrmError::NoTaskContext));
        assert!(get().is_none());
    }

    #[tokio::test]
    async fn empty_slot_reports_no_session() {
        enter(async {
            assert!(is_available());
            assert!(get().is_none());
        })
        .await;
    }
}
