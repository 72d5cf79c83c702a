//! Password hashing and registration checks.
//!
//! The credential mechanism is deliberately small: bcrypt for hashing, plus
//! the same registration rules the sign-up form enforces (email-shaped
//! username, minimum password length).

use bcrypt::{hash, verify, DEFAULT_COST};
use thiserror::Error;

const MIN_PASSWORD_CHARS: usize = 6;

#[derive(Debug, PartialEq, Eq, Error)]
pub enum RegistrationError {
  #[error("completa todos los campos")]
  MissingFields,
  #[error("las contraseñas no coinciden")]
  PasswordMismatch,
  #[error("usa un formato de email válido (ej: nombre@dominio.com)")]
  InvalidEmail,
  #[error("la contraseña debe tener al menos {MIN_PASSWORD_CHARS} caracteres")]
  PasswordTooShort,
}

pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
  hash(password, DEFAULT_COST)
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
  // A malformed stored hash counts as a failed login, not an error.
  verify(password, stored_hash).unwrap_or(false)
}

/// Lowercased, trimmed username as stored and compared everywhere.
pub fn normalize_username(raw: &str) -> String {
  raw.trim().to_lowercase()
}

pub fn validate_registration(
  username: &str,
  password: &str,
  confirm: &str,
) -> Result<(), RegistrationError> {
  if username.is_empty() || password.is_empty() || confirm.is_empty() {
    return Err(RegistrationError::MissingFields);
  }
  if password != confirm {
    return Err(RegistrationError::PasswordMismatch);
  }
  let domain_has_dot = username.rsplit('@').next().is_some_and(|d| d.contains('.'));
  if !username.contains('@') || !domain_has_dot {
    return Err(RegistrationError::InvalidEmail);
  }
  if password.chars().count() < MIN_PASSWORD_CHARS {
    return Err(RegistrationError::PasswordTooShort);
  }
  Ok(())
}
