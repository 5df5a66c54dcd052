//! Token validation boundary.
//!
//! Authentication is out of scope for the reservation core; the boundary
//! consumes a validator and turns failures into typed `unauthorized`
//! responses (never a bare fault).

use std::collections::HashSet;

/// Validates bearer tokens presented at the API boundary.
pub trait Authenticator: Send + Sync {
    /// Whether the token grants access.
    fn validate_token(&self, token: &str) -> bool;

    /// Whether requests without a token are admitted (dev mode).
    fn allows_anonymous(&self) -> bool;
}

/// Validator over a static token set from configuration.
///
/// An empty set means the boundary is open: every request is admitted.
/// That is the dev default; production deployments set `SUDS_API_TOKENS`.
#[derive(Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashSet<String>,
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: impl IntoIterator<Item = String>) -> Self {
        Self {
            tokens: tokens.into_iter().filter(|t| !t.is_empty()).collect(),
        }
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn validate_token(&self, token: &str) -> bool {
        self.allows_anonymous() || self.tokens.contains(token)
    }

    fn allows_anonymous(&self) -> bool {
        self.tokens.is_empty()
    }
}
