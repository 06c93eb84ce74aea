//! Explicit runtime handle.
//!
//! Components that need session ids or version identity take the pieces
//! from here instead of reaching for a process-wide singleton. Cloning is
//! cheap; all clones share the session registry.

use std::sync::Arc;

use carbon_core::session::{SessionId, SessionRegistry};
use carbon_vep::system::Version;

/// Version of this library, as reported in VERSION_REPLY packets.
#[must_use]
pub fn library_version() -> Version {
    let major = env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or(0);
    let minor = env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or(0);
    Version::new(major, minor)
}

/// Shared per-process runtime state.
#[derive(Debug, Clone)]
pub struct Runtime {
    sessions: Arc<SessionRegistry>,
    application: Version,
}

impl Runtime {
    #[must_use]
    pub fn new(application: Version) -> Self {
        Self { sessions: Arc::new(SessionRegistry::new()), application }
    }

    #[must_use]
    pub fn sessions(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.sessions)
    }

    /// Allocate a fresh session id.
    #[must_use]
    pub fn next_session(&self) -> SessionId {
        self.sessions.next()
    }

    #[must_use]
    pub fn application_version(&self) -> Version {
        self.application
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_sessions_shared() {
        let runtime = Runtime::new(Version::new(1, 0));
        let clone = runtime.clone();
        let a = runtime.next_session();
        let b = clone.next_session();
        assert_ne!(a, b);
    }

    #[test]
    fn test_library_version_is_set() {
        // The workspace version is 0.x; only sanity-check the parse.
        let version = library_version();
        assert!(version.major > 0 || version.minor >= 1 || version == Version::new(0, 1));
    }
}
