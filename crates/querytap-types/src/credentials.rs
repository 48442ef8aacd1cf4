//! Portal credentials.
//!
//! Credentials are opaque strings supplied once at startup through the
//! environment. They are held in memory for the lifetime of a run, passed
//! into the login sequencer by construction, and never persisted. The
//! `Debug` implementation masks the password so credentials cannot leak
//! through logs or error chains.

use std::fmt;

/// Immutable login configuration for one capture run.
#[derive(Clone)]
pub struct Credentials {
    /// Tenant/entity identifier entered on the first login step.
    pub entity_id: String,
    /// Account username entered on the credential step.
    pub username: String,
    /// Account password entered on the credential step.
    pub password: String,
    /// Login entry point of the portal.
    pub portal_url: String,
    /// URL of the analytics area that hosts the embedded report surfaces.
    pub analytics_url: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("entity_id", &self.entity_id)
            .field("username", &self.username)
            .field("password", &"***")
            .field("portal_url", &self.portal_url)
            .field("analytics_url", &self.analytics_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Credentials {
        Credentials {
            entity_id: "4711".into(),
            username: "ops@example.com".into(),
            password: "hunter2".into(),
            portal_url: "https://portal.example.com/login".into(),
            analytics_url: "https://analytics.example.com/home".into(),
        }
    }

    #[test]
    fn debug_masks_password() {
        let creds = sample();
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
        // Non-secret fields remain visible for diagnostics.
        assert!(rendered.contains("ops@example.com"));
        assert!(rendered.contains("4711"));
    }
}
