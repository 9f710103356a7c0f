use std::fmt;

use hps_common::error::{HpsError, HpsResult};
use hps_common::ids::MessageCode;

use super::{
    BodyShape, CMD_LOGIN, CMD_REGISTER, HandlerSpec, LOGIN_BODY_LEN, LoginHandler,
    MessageHandler, REGISTER_BODY_LEN, RESERVED_MESSAGE_CODES, RegisterHandler,
};

/// Message-code table.
///
/// Indexed directly by code. Reserved codes and holes stay `None` and resolve to "no handler".
pub struct HandlerRegistry {
    table: Vec<Option<HandlerSpec>>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("table_len", &self.table.len())
            .field("registered", &self.registered_codes())
            .finish()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    /// Builds a table holding only the reserved (empty) entries.
    #[must_use]
    pub fn new() -> Self {
        Self {
            table: (0..RESERVED_MESSAGE_CODES).map(|_| None).collect(),
        }
    }

    /// Builds a table preloaded with the account handlers.
    #[must_use]
    pub fn with_builtin_handlers() -> Self {
        let mut registry = Self::new();
        registry.register_account_handlers();
        registry
    }

    fn register_account_handlers(&mut self) {
        let builtin = [
            (
                CMD_REGISTER,
                HandlerSpec {
                    name: "REGISTER",
                    body: BodyShape::Exact(REGISTER_BODY_LEN),
                    handler: Box::new(RegisterHandler),
                },
            ),
            (
                CMD_LOGIN,
                HandlerSpec {
                    name: "LOGIN",
                    body: BodyShape::Exact(LOGIN_BODY_LEN),
                    handler: Box::new(LoginHandler),
                },
            ),
        ];
        for (code, spec) in builtin {
            // Built-in codes sit right after the reserved range and never collide.
            let _ = self.register(code, spec);
        }
    }

    /// Binds `spec` to `code`.
    ///
    /// # Errors
    ///
    /// Returns `HpsError::InvalidConfig` for a reserved code or a code that already has a
    /// handler.
    pub fn register(&mut self, code: MessageCode, spec: HandlerSpec) -> HpsResult<()> {
        if code < RESERVED_MESSAGE_CODES {
            return Err(HpsError::InvalidConfig(format!(
                "message code {code} is reserved"
            )));
        }
        let index = usize::from(code);
        if self.table.len() <= index {
            self.table.resize_with(index + 1, || None);
        }
        if self.table[index].is_some() {
            return Err(HpsError::InvalidConfig(format!(
                "message code {code} already has a handler"
            )));
        }
        self.table[index] = Some(spec);
        Ok(())
    }

    /// Convenience wrapper binding a handler that accepts any body.
    ///
    /// # Errors
    ///
    /// Same as [`HandlerRegistry::register`].
    pub fn register_handler<H>(
        &mut self,
        code: MessageCode,
        name: &'static str,
        handler: H,
    ) -> HpsResult<()>
    where
        H: MessageHandler + 'static,
    {
        self.register(
            code,
            HandlerSpec {
                name,
                body: BodyShape::Any,
                handler: Box::new(handler),
            },
        )
    }

    /// Resolves one code. Out-of-range codes and empty entries both yield `None`.
    #[must_use]
    pub fn lookup(&self, code: MessageCode) -> Option<&HandlerSpec> {
        self.table.get(usize::from(code)).and_then(Option::as_ref)
    }

    /// Number of table entries; every code at or above this bound is unknown.
    #[must_use]
    pub fn table_len(&self) -> usize {
        self.table.len()
    }

    /// Codes with a bound handler, ascending.
    #[must_use]
    pub fn registered_codes(&self) -> Vec<MessageCode> {
        self.table
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_some())
            .filter_map(|(index, _)| MessageCode::try_from(index).ok())
            .collect()
    }
}
