use hps_facade::protocol::{MessageHeader, OutboundMessage};
use tracing::debug;

use super::{
    BodyShape, CMD_LOGIN, CMD_REGISTER, HandlerError, HandlerResult, MessageHandler, MessageSink,
};

/// Fixed width of the NUL-padded user name field.
pub const USERNAME_LEN: usize = 56;

/// Fixed width of the NUL-padded password field.
pub const PASSWORD_LEN: usize = 40;

/// Register body: `kind: i32` (big-endian), user name, password.
pub const REGISTER_BODY_LEN: usize = 4 + USERNAME_LEN + PASSWORD_LEN;

/// Login body: user name, password.
pub const LOGIN_BODY_LEN: usize = USERNAME_LEN + PASSWORD_LEN;

/// Decoded register request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRecord {
    /// Account kind requested by the client.
    pub kind: i32,
    /// Account name.
    pub username: String,
    /// Account password.
    pub password: String,
}

impl RegisterRecord {
    /// Decodes a [`REGISTER_BODY_LEN`]-byte body.
    #[must_use]
    pub fn decode(body: &[u8]) -> Option<Self> {
        if body.len() != REGISTER_BODY_LEN {
            return None;
        }
        let (kind, rest) = body.split_at(4);
        let (username, password) = rest.split_at(USERNAME_LEN);
        Some(Self {
            kind: i32::from_be_bytes([kind[0], kind[1], kind[2], kind[3]]),
            username: read_fixed_str(username),
            password: read_fixed_str(password),
        })
    }

    /// Encodes into a [`REGISTER_BODY_LEN`]-byte body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(REGISTER_BODY_LEN);
        body.extend_from_slice(&self.kind.to_be_bytes());
        write_fixed_str(&mut body, &self.username, USERNAME_LEN);
        write_fixed_str(&mut body, &self.password, PASSWORD_LEN);
        body
    }
}

/// Decoded login request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRecord {
    /// Account name.
    pub username: String,
    /// Account password.
    pub password: String,
}

impl LoginRecord {
    /// Decodes a [`LOGIN_BODY_LEN`]-byte body.
    #[must_use]
    pub fn decode(body: &[u8]) -> Option<Self> {
        if body.len() != LOGIN_BODY_LEN {
            return None;
        }
        let (username, password) = body.split_at(USERNAME_LEN);
        Some(Self {
            username: read_fixed_str(username),
            password: read_fixed_str(password),
        })
    }

    /// Encodes into a [`LOGIN_BODY_LEN`]-byte body.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(LOGIN_BODY_LEN);
        write_fixed_str(&mut body, &self.username, USERNAME_LEN);
        write_fixed_str(&mut body, &self.password, PASSWORD_LEN);
        body
    }
}

fn read_fixed_str(field: &[u8]) -> String {
    let end = field.iter().position(|byte| *byte == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

// Keeps at least one trailing NUL so peers reading C strings stop inside the field.
fn write_fixed_str(out: &mut Vec<u8>, value: &str, width: usize) {
    let bytes = value.as_bytes();
    let copied = bytes.len().min(width.saturating_sub(1));
    out.extend_from_slice(&bytes[..copied]);
    out.resize(out.len() + (width - copied), 0);
}

/// Handles [`CMD_REGISTER`]: echoes the accepted account back without its password.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterHandler;

impl MessageHandler for RegisterHandler {
    fn handle(&self, sink: &dyn MessageSink, origin: MessageHeader, body: &[u8]) -> HandlerResult {
        let request = RegisterRecord::decode(body).ok_or(HandlerError::BadBody {
            code: CMD_REGISTER,
            expected: BodyShape::Exact(REGISTER_BODY_LEN),
            actual: body.len(),
        })?;
        debug!(
            connection = origin.connection.index(),
            sequence = origin.sequence,
            username = %request.username,
            kind = request.kind,
            "register request"
        );

        let reply = RegisterRecord {
            password: String::new(),
            ..request
        };
        sink.send_msg(OutboundMessage::new(origin, CMD_REGISTER, &reply.encode())?)?;
        Ok(())
    }
}

/// Handles [`CMD_LOGIN`]: acknowledges the login with the user name.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoginHandler;

impl MessageHandler for LoginHandler {
    fn handle(&self, sink: &dyn MessageSink, origin: MessageHeader, body: &[u8]) -> HandlerResult {
        let request = LoginRecord::decode(body).ok_or(HandlerError::BadBody {
            code: CMD_LOGIN,
            expected: BodyShape::Exact(LOGIN_BODY_LEN),
            actual: body.len(),
        })?;
        debug!(
            connection = origin.connection.index(),
            sequence = origin.sequence,
            username = %request.username,
            "login request"
        );

        let reply = LoginRecord {
            username: request.username,
            password: String::new(),
        };
        sink.send_msg(OutboundMessage::new(origin, CMD_LOGIN, &reply.encode())?)?;
        Ok(())
    }
}
