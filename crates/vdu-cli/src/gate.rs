//! Ties volume access to the login state.

use vdu_provider::AccessGate;
use vdu_session::Session;

/// Open while the session holds a token.
#[derive(Debug, Clone)]
pub struct SessionGate {
    session: Session,
}

impl SessionGate {
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

impl AccessGate for SessionGate {
    fn is_open(&self) -> bool {
        self.session.is_authenticated()
    }
}
