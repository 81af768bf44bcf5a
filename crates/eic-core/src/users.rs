// ABOUTME: Local user lookup for the requested login name.
// ABOUTME: Backed by the system passwd database through nix.

use tracing::debug;

/// Answers whether a login name belongs to a local account.
pub trait UserDirectory {
    fn exists(&self, username: &str) -> bool;
}

/// The host's passwd database (files, NSS modules, ...).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemUsers;

impl UserDirectory for SystemUsers {
    fn exists(&self, username: &str) -> bool {
        if username.is_empty() {
            return false;
        }
        match nix::unistd::User::from_name(username) {
            Ok(user) => user.is_some(),
            Err(e) => {
                debug!(username, error = %e, "user lookup failed");
                false
            }
        }
    }
}
