//! Message-code table and handler contract.
//!
//! A validated packet carries a message code; the registry resolves that code to one handler
//! capability object. Handlers reply by pushing encoded packets into a [`MessageSink`], never
//! by touching sockets.

use hps_common::error::{HpsError, HpsResult};
use hps_common::ids::MessageCode;
use hps_facade::protocol::{MessageHeader, OutboundMessage};
use thiserror::Error;

#[path = "dispatch/body_shape.rs"]
mod body_shape;
#[path = "dispatch/handlers_auth.rs"]
mod handlers_auth;
#[path = "dispatch/registry.rs"]
mod registry;

pub use body_shape::{BodyShape, HandlerSpec};
pub use handlers_auth::{
    LOGIN_BODY_LEN, LoginHandler, LoginRecord, PASSWORD_LEN, REGISTER_BODY_LEN, RegisterHandler,
    RegisterRecord, USERNAME_LEN,
};
pub use registry::HandlerRegistry;

/// Codes `0..RESERVED_MESSAGE_CODES` are kept free for future server-level messages.
pub const RESERVED_MESSAGE_CODES: MessageCode = 5;

/// Account registration request and reply.
pub const CMD_REGISTER: MessageCode = 5;

/// Account login request and reply.
pub const CMD_LOGIN: MessageCode = 6;

/// Failures reported by one handler invocation. They never close the connection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Body does not have the shape the handler expects.
    #[error("message {code}: body of {actual} bytes does not match {expected}")]
    BadBody {
        /// Message code being handled.
        code: MessageCode,
        /// Expected body shape.
        expected: BodyShape,
        /// Received body length.
        actual: usize,
    },

    /// The reply could not be queued.
    #[error("reply could not be queued: {0}")]
    Send(#[from] HpsError),
}

/// Result of one handler invocation.
pub type HandlerResult = Result<(), HandlerError>;

/// Outbound side of the core: accepts encoded replies for later transmission.
pub trait MessageSink: Send + Sync {
    /// Queues one reply; ownership of the buffer moves to the sink.
    ///
    /// # Errors
    ///
    /// Returns an error when the sink no longer accepts messages.
    fn send_msg(&self, message: OutboundMessage) -> HpsResult<()>;
}

/// One business handler bound to a message code.
pub trait MessageHandler: Send + Sync {
    /// Handles one validated body.
    ///
    /// `origin` identifies the connection and session the packet came from; replies must be
    /// addressed to it so the sender can drop them once the session is gone.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError`] when the body is unusable or the reply cannot be queued.
    fn handle(&self, sink: &dyn MessageSink, origin: MessageHeader, body: &[u8])
    -> HandlerResult;
}
