//! Business dispatch contract shared by the server reactor and message handlers.

pub mod dispatch;

use dispatch::HandlerRegistry;

/// Core module bootstrap object.
///
/// Owns the message-code table. The reactor borrows it for every validated packet; handlers
/// never see the reactor, only the [`dispatch::MessageSink`] they reply through.
#[derive(Debug)]
pub struct CoreModule {
    /// Message-code table used by the ingress path.
    pub handlers: HandlerRegistry,
}

impl CoreModule {
    /// Creates the core module with the built-in register/login handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::with_registry(HandlerRegistry::with_builtin_handlers())
    }

    /// Creates the core module around a caller-built table.
    #[must_use]
    pub fn with_registry(handlers: HandlerRegistry) -> Self {
        Self { handlers }
    }
}

impl Default for CoreModule {
    fn default() -> Self {
        Self::new()
    }
}
