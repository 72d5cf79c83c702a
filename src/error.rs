//! Error taxonomy for the practice round engine.
//!
//! Generation-side failures (transport + validation) are absorbed inside the
//! generation client's retry loop and surface only as `GenerationFailure`.
//! The round state machine never panics for expected failure modes; every
//! rejected operation is an explicit `RoundError` variant the caller can
//! branch on.

use thiserror::Error;

use crate::util::trunc_for_log;

/// The text-generation capability failed at the network/API level.
#[derive(Debug, Clone, Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Rule violated by one question inside a generated question set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuestionRule {
  #[error("prompt is empty")]
  EmptyPrompt,
  #[error("options must have exactly the keys A, B, C, D (got: {got})")]
  WrongOptionKeys { got: String },
  #[error("option {key} has empty text")]
  EmptyOption { key: String },
  #[error("correct_answer must be one of A/B/C/D and present in options (got: {got:?})")]
  BadCorrectKey { got: String },
}

/// Generated output failed structural/content checks. Deterministic; carries
/// the specific violated rule so retries can be diagnosed from logs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
  #[error("response is empty")]
  Empty,
  #[error("response too short: {chars} chars (minimum {min})")]
  TooShort { chars: usize, min: usize },
  #[error("word count {words} below minimum {min} for level {level}")]
  WordCountLow { words: usize, min: usize, level: u8 },
  #[error("response looks like a refusal, not a passage")]
  Refusal,
  #[error("not valid JSON: {0}")]
  Json(String),
  #[error("expected a list of exactly 5 questions, got {0}")]
  QuestionCount(usize),
  #[error("question {index}: {rule}")]
  Question { index: usize, rule: QuestionRule },
}

/// Terminal outcome of the generation retry loop. Never raised past the
/// generation client boundary; the round treats it as the end of the attempt.
#[derive(Debug, Clone, Error)]
#[error("generation failed after {attempts} attempt(s): {last_error}")]
pub struct GenerationFailure {
  pub attempts: u32,
  pub last_error: String,
  /// Last raw model output seen, truncated, for diagnostics.
  pub last_raw: Option<String>,
}

impl GenerationFailure {
  pub fn new(attempts: u32, last_error: String, last_raw: Option<&str>) -> Self {
    Self {
      attempts,
      last_error,
      last_raw: last_raw.map(|r| trunc_for_log(r, 400)),
    }
  }
}

/// Persistence layer failure. Non-fatal at grading time: the in-memory
/// session keeps operating and the caller surfaces a warning.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("store I/O error: {0}")]
  Io(#[from] std::io::Error),
  #[error("store contains invalid data: {0}")]
  Corrupt(String),
  #[error("unknown user: {0}")]
  UnknownUser(String),
  #[error("username already exists: {0}")]
  DuplicateUser(String),
}

/// Login/registration failures surfaced to the user.
#[derive(Debug, Error)]
pub enum AuthError {
  // Deliberately the same message for unknown user and wrong password.
  #[error("usuario o contraseña incorrectos")]
  InvalidCredentials,
  #[error("este usuario ya está registrado")]
  DuplicateUser,
  #[error(transparent)]
  Registration(#[from] crate::auth::RegistrationError),
  #[error(transparent)]
  Store(#[from] StoreError),
  #[error("password hashing failed: {0}")]
  Hash(String),
}

/// Rejected round operations. All recoverable; none of these tears down the
/// session.
#[derive(Debug, Error)]
pub enum RoundError {
  #[error("answer all questions before submitting (missing: {missing:?})")]
  IncompleteAnswers { missing: Vec<usize> },
  #[error("operation not allowed in phase {phase}")]
  WrongPhase { phase: &'static str },
  #[error(transparent)]
  Generation(#[from] GenerationFailure),
  #[error("text generation is not configured")]
  GenerationUnavailable,
}
