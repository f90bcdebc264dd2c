//! URI-scheme registration contract.
//!
//! Join and spectate flows only work when the operating system knows how
//! to launch the application from a `discord-<application id>://` URI.
//! Registration itself is platform-specific and lives outside this crate;
//! the client only consumes the resulting boolean, gating presence
//! secrets and event subscriptions on it.

/// Registers the application's URI scheme with the operating system.
pub trait SchemeRegistrar {
    /// Attempt registration; returns whether the scheme is registered.
    fn register(&self, application_id: &str) -> bool;
}

/// Registrar that assumes the host application already performed the
/// platform registration through other means (installer, packaging).
#[derive(Debug, Clone, Copy, Default)]
pub struct AlreadyRegistered;

impl SchemeRegistrar for AlreadyRegistered {
    fn register(&self, _application_id: &str) -> bool {
        true
    }
}
