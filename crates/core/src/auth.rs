//! Request authentication hook.
//!
//! The client asks its [`Authenticator`] for an `Authorization` header
//! value before writing each request. Only HTTP Basic (RFC 7617) is built
//! in; digest or token schemes plug in by implementing the trait.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::protocol::Method;
use crate::url::Credentials;

/// Produces the `Authorization` header value for a request, if any.
pub trait Authenticator: Send + Sync {
    fn authorization(&self, method: Method, url: &str) -> Option<String>;
}

/// HTTP Basic authentication: `Basic base64(username:password)`.
#[derive(Debug, Clone)]
pub struct BasicAuthenticator {
    value: String,
}

impl BasicAuthenticator {
    pub fn new(credentials: &Credentials) -> Self {
        let token = STANDARD.encode(format!("{}:{}", credentials.username, credentials.password));
        Self {
            value: format!("Basic {token}"),
        }
    }
}

impl Authenticator for BasicAuthenticator {
    fn authorization(&self, _method: Method, _url: &str) -> Option<String> {
        Some(self.value.clone())
    }
}
