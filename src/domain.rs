//! Domain models: passages, questions, round history, and account records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Difficulty scale bounds. Levels outside this range never exist.
pub const MIN_LEVEL: u8 = 1;
pub const MAX_LEVEL: u8 = 10;
/// Starting level assigned to newly registered students.
pub const DEFAULT_LEVEL: u8 = 3;
/// Every round carries exactly this many questions.
pub const QUESTIONS_PER_ROUND: usize = 5;

/// One of the four multiple-choice keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChoiceKey {
  A,
  B,
  C,
  D,
}

impl ChoiceKey {
  pub const ALL: [ChoiceKey; 4] = [ChoiceKey::A, ChoiceKey::B, ChoiceKey::C, ChoiceKey::D];

  pub fn index(self) -> usize {
    match self {
      ChoiceKey::A => 0,
      ChoiceKey::B => 1,
      ChoiceKey::C => 2,
      ChoiceKey::D => 3,
    }
  }

  pub fn as_str(self) -> &'static str {
    match self {
      ChoiceKey::A => "A",
      ChoiceKey::B => "B",
      ChoiceKey::C => "C",
      ChoiceKey::D => "D",
    }
  }

  /// Parse an uppercase letter key. Anything else is rejected.
  pub fn parse(s: &str) -> Option<ChoiceKey> {
    match s {
      "A" => Some(ChoiceKey::A),
      "B" => Some(ChoiceKey::B),
      "C" => Some(ChoiceKey::C),
      "D" => Some(ChoiceKey::D),
      _ => None,
    }
  }
}

impl std::fmt::Display for ChoiceKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A validated reading passage. Immutable once built by the validator;
/// discarded when the round ends.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Passage {
  pub level: u8,
  pub body: String,
  pub word_count: usize,
}

/// One validated multiple-choice item. `options` is indexed by
/// `ChoiceKey::index`, so all four texts are always present and non-empty.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Question {
  pub prompt: String,
  pub options: [String; 4],
  pub correct: ChoiceKey,
}

impl Question {
  pub fn option_text(&self, key: ChoiceKey) -> &str {
    &self.options[key.index()]
  }
}

/// Exactly `QUESTIONS_PER_ROUND` validated questions tied to one passage.
/// Only the validator constructs these, so the length invariant holds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuestionSet {
  questions: Vec<Question>,
}

impl QuestionSet {
  /// Invariant: callers (the validator, tests) must pass exactly
  /// `QUESTIONS_PER_ROUND` questions.
  pub(crate) fn from_validated(questions: Vec<Question>) -> Self {
    debug_assert_eq!(questions.len(), QUESTIONS_PER_ROUND);
    Self { questions }
  }

  pub fn questions(&self) -> &[Question] {
    &self.questions
  }

  pub fn len(&self) -> usize {
    self.questions.len()
  }
}

/// One graded round, as persisted in a student's history. Append-only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryEntry {
  pub timestamp: DateTime<Utc>,
  pub level_before: u8,
  pub level_after: u8,
  pub score: u8,
  pub passage_snippet: String,
}

/// Account role. Only students carry a level and history; admins never
/// practice, so the fields simply do not exist for them.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Role {
  Admin,
  Student {
    current_level: u8,
    #[serde(default)]
    history: Vec<HistoryEntry>,
  },
}

/// Persisted per-user record. The password hash is opaque to everything but
/// the auth module.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserRecord {
  pub username: String,
  pub password_hash: String,
  #[serde(flatten)]
  pub role: Role,
}

impl UserRecord {
  pub fn is_admin(&self) -> bool {
    matches!(self.role, Role::Admin)
  }

  pub fn current_level(&self) -> Option<u8> {
    match &self.role {
      Role::Admin => None,
      Role::Student { current_level, .. } => Some(*current_level),
    }
  }

  pub fn history(&self) -> &[HistoryEntry] {
    match &self.role {
      Role::Admin => &[],
      Role::Student { history, .. } => history,
    }
  }
}
