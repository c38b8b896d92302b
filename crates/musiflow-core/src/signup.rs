//! Free-trial signup form.
//!
//! Validation runs before anything else and reports every bad field at once.
//! A valid form never touches the registries; the "account creation" is a
//! simulated delay followed by a welcome message.

use tracing::info;

use crate::error::SignupError;
use crate::workflow::{pause, Delays};

/// Minimum password length, in characters.
pub const MIN_PASSWORD_LEN: usize = 6;

/// A field of the signup form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignupField {
    Name,
    Email,
    Password,
}

impl std::fmt::Display for SignupField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name => f.write_str("name"),
            Self::Email => f.write_str("email"),
            Self::Password => f.write_str("password"),
        }
    }
}

/// What the user typed into the signup modal.
#[derive(Debug, Clone)]
pub struct SignupForm {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl SignupForm {
    /// Check every field.
    ///
    /// # Errors
    ///
    /// Returns [`SignupError`] listing each invalid field in form order.
    pub fn validate(&self) -> Result<(), SignupError> {
        let mut fields = Vec::new();
        if self.name.trim().is_empty() {
            fields.push(SignupField::Name);
        }
        if !is_valid_email(&self.email) {
            fields.push(SignupField::Email);
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            fields.push(SignupField::Password);
        }

        if fields.is_empty() {
            Ok(())
        } else {
            Err(SignupError { fields })
        }
    }

    /// Validate, wait out the simulated account creation, and return the
    /// welcome message.
    ///
    /// # Errors
    ///
    /// Returns [`SignupError`] without waiting if any field is invalid.
    pub async fn submit(&self, delays: &Delays) -> Result<String, SignupError> {
        self.validate()?;
        pause(delays.signup).await;
        info!("signup accepted");
        Ok(format!(
            "Welcome to MusiFlow, {}! Your free trial has started.",
            self.name
        ))
    }
}

/// `local@domain.tld` with no whitespace and exactly one `@`.
///
/// The domain needs a dot with at least one character on each side.
#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    domain
        .char_indices()
        .any(|(i, c)| c == '.' && i > 0 && i + 1 < domain.len())
}
