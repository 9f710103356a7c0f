//! Validation and dispatch of framed packets read by the reactor.

use hps_common::ids::MessageCode;
use hps_core::dispatch::MessageSink;
use hps_facade::protocol::{InboundMessage, PacketRejection, validate_packet};
use tracing::{debug, warn};

use crate::app::ServerApp;
use crate::network::ConnectionPool;

/// What happened to one inbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IngressOutcome {
    /// A handler ran successfully.
    Dispatched { code: MessageCode },
    /// Length or CRC check failed.
    Malformed(PacketRejection),
    /// Code is reserved or has no handler.
    UnknownCode(MessageCode),
    /// The session that sent the packet ended before dispatch.
    StaleSession,
    /// The handler rejected the body or could not queue its reply.
    HandlerFailed { code: MessageCode },
}

/// Validates one packet and runs its handler under the connection's logic lock.
///
/// Every failure is contained here; the connection stays open.
pub(crate) fn ingress_message(
    app: &ServerApp,
    pool: &ConnectionPool,
    sink: &dyn MessageSink,
    message: InboundMessage,
) -> IngressOutcome {
    let origin = message.header;
    let slot = origin.connection.index();

    let validated = match validate_packet(&message.packet) {
        Ok(validated) => validated,
        Err(rejection) => {
            warn!(slot, %rejection, "dropping malformed packet");
            return IngressOutcome::Malformed(rejection);
        }
    };
    let code = validated.header.message_code;
    let Some(spec) = app.core.handlers.lookup(code) else {
        warn!(slot, code, "dropping packet with unknown message code");
        return IngressOutcome::UnknownCode(code);
    };

    let Some(logic_lock) = pool.logic_lock(origin.connection) else {
        return IngressOutcome::StaleSession;
    };
    // A panicking handler leaves nothing behind the lock worth protecting.
    let _logic_guard = logic_lock
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if pool.sequence_of(origin.connection) != Some(origin.sequence) {
        debug!(slot, sequence = origin.sequence, "dropping packet from ended session");
        return IngressOutcome::StaleSession;
    }

    match spec.invoke(code, sink, origin, validated.body) {
        Ok(()) => IngressOutcome::Dispatched { code },
        Err(error) => {
            warn!(slot, code, handler = spec.name, %error, "handler failed");
            IngressOutcome::HandlerFailed { code }
        }
    }
}
