use std::fmt;

use hps_common::ids::MessageCode;
use hps_facade::protocol::MessageHeader;

use super::{HandlerError, HandlerResult, MessageHandler, MessageSink};

/// Body length constraint for one message code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyShape {
    /// Header-only packet.
    Empty,
    /// Body must have exactly this many bytes.
    Exact(usize),
    /// Any body, including none.
    Any,
}

impl BodyShape {
    /// Returns whether a body of `len` bytes satisfies this shape.
    #[must_use]
    pub fn accepts(self, len: usize) -> bool {
        match self {
            Self::Empty => len == 0,
            Self::Exact(expected) => len == expected,
            Self::Any => true,
        }
    }
}

impl fmt::Display for BodyShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("an empty body"),
            Self::Exact(len) => write!(f, "{len} bytes"),
            Self::Any => f.write_str("any body"),
        }
    }
}

/// Metadata and capability object for one table entry.
pub struct HandlerSpec {
    /// Name used in logs.
    pub name: &'static str,
    /// Body constraint checked before the handler runs.
    pub body: BodyShape,
    /// Handler implementation.
    pub handler: Box<dyn MessageHandler>,
}

impl fmt::Debug for HandlerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSpec")
            .field("name", &self.name)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

impl HandlerSpec {
    /// Checks the body shape, then runs the handler.
    ///
    /// # Errors
    ///
    /// Returns `HandlerError::BadBody` for a body of the wrong length, or whatever the
    /// handler itself reports.
    pub fn invoke(
        &self,
        code: MessageCode,
        sink: &dyn MessageSink,
        origin: MessageHeader,
        body: &[u8],
    ) -> HandlerResult {
        if !self.body.accepts(body.len()) {
            return Err(HandlerError::BadBody {
                code,
                expected: self.body,
                actual: body.len(),
            });
        }
        self.handler.handle(sink, origin, body)
    }
}
