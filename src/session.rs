//! Notification when a session cannot be recovered

use tracing::warn;

/// Receives "session expired" notifications from the client
///
/// Invoked once per unrecoverable episode, after stored tokens are cleared.
/// Any `Fn() + Send + Sync` closure is a handler.
pub trait UnauthorizedHandler: Send + Sync {
    fn on_unauthorized(&self);
}

impl<F> UnauthorizedHandler for F
where
    F: Fn() + Send + Sync,
{
    fn on_unauthorized(&self) {
        self()
    }
}

/// Fallback used when the application registered no handler
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    target: String,
}

impl LoginRedirect {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl UnauthorizedHandler for LoginRedirect {
    fn on_unauthorized(&self) {
        warn!(redirect = %self.target, "Session expired, redirecting to login");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn closures_are_handlers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler: Box<dyn UnauthorizedHandler> = Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        handler.on_unauthorized();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn login_redirect_target() {
        let redirect = LoginRedirect::new("/login");
        assert_eq!(redirect.target(), "/login");
        redirect.on_unauthorized();
    }
}
