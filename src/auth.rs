use crate::errors::{Error, Result};

/// Which authentication protocol byte goes into the connection preamble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// No credential exchange; the context message is sent immediately.
    Simple,
    /// Token based SASL-like exchange before the context message.
    Token,
}

impl AuthMethod {
    /// Wire value of the auth-protocol preamble byte.
    pub fn protocol_byte(self) -> u8 {
        match self {
            AuthMethod::Simple => 0,
            AuthMethod::Token => 1,
        }
    }
}

/// Supplies the per-connection credential exchange.
///
/// The engine never interprets token payloads; it only moves them between
/// the provider and the server and insists that the server ends the
/// exchange with a SUCCESS state.
pub trait AuthProvider: Send + Sync {
    fn method(&self) -> AuthMethod;

    /// Opening token offered with the first negotiation message.
    fn initial_token(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    /// Answer a server challenge. Returning an error aborts the handshake
    /// with an authentication failure.
    fn evaluate(&self, challenge: &[u8]) -> Result<Vec<u8>>;
}

/// The default provider: no credentials at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleAuth;

impl AuthProvider for SimpleAuth {
    fn method(&self) -> AuthMethod {
        AuthMethod::Simple
    }

    fn evaluate(&self, _challenge: &[u8]) -> Result<Vec<u8>> {
        Err(Error::AuthFailed(
            "server demanded credentials on a simple-auth connection".into(),
        ))
    }
}

/// Presents one opaque delegation token, re-offered for every challenge.
#[derive(Debug, Clone)]
pub struct TokenAuth {
    token: Vec<u8>,
}

impl TokenAuth {
    pub fn new(token: impl Into<Vec<u8>>) -> Self {
        TokenAuth {
            token: token.into(),
        }
    }
}

impl AuthProvider for TokenAuth {
    fn method(&self) -> AuthMethod {
        AuthMethod::Token
    }

    fn initial_token(&self) -> Result<Vec<u8>> {
        Ok(self.token.clone())
    }

    fn evaluate(&self, _challenge: &[u8]) -> Result<Vec<u8>> {
        Ok(self.token.clone())
    }
}
