//! Identity collaborator seam
//!
//! The session layer consumes, but does not own, the application's identity
//! state: the current user id/display name for message stamping, the auth
//! token for the signaling handshake, and a credential-clear capability the
//! transport invokes when the server forces this client offline.

use std::sync::atomic::{AtomicBool, Ordering};

/// Identity provider consumed by the transport and session layer
pub trait IdentityProvider: Send + Sync {
    /// Current user id
    fn user_id(&self) -> String;

    /// Current user display name
    fn display_name(&self) -> String;

    /// Auth token for the signaling connection, if logged in
    fn auth_token(&self) -> Option<String>;

    /// Clear local credentials; invoked when a `force-offline` message
    /// arrives on the signaling channel
    fn clear_credentials(&self);
}

/// Fixed identity for tests and headless tools
pub struct StaticIdentity {
    user_id: String,
    display_name: String,
    token: Option<String>,
    cleared: AtomicBool,
}

impl StaticIdentity {
    /// Create an identity with a token
    pub fn new(user_id: &str, display_name: &str, token: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            token: Some(token.to_string()),
            cleared: AtomicBool::new(false),
        }
    }

    /// Create an identity with no token (connect attempts fail with
    /// `Error::MissingCredential`)
    pub fn without_token(user_id: &str, display_name: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
            token: None,
            cleared: AtomicBool::new(false),
        }
    }

    /// Whether `clear_credentials` has been invoked
    pub fn was_cleared(&self) -> bool {
        self.cleared.load(Ordering::SeqCst)
    }
}

impl IdentityProvider for StaticIdentity {
    fn user_id(&self) -> String {
        self.user_id.clone()
    }

    fn display_name(&self) -> String {
        self.display_name.clone()
    }

    fn auth_token(&self) -> Option<String> {
        if self.cleared.load(Ordering::SeqCst) {
            None
        } else {
            self.token.clone()
        }
    }

    fn clear_credentials(&self) {
        self.cleared.store(true, Ordering::SeqCst);
    }
}
