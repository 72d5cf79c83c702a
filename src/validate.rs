//! Deterministic, side-effect-free validation of generated output.
//!
//! The upstream capability is a generative text model with no structural
//! guarantee, so this is the most failure-prone seam in the system: the
//! checks are strict, never panic on malformed input, and always name the
//! specific violated rule so the retry loop can log it.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::domain::{ChoiceKey, Passage, Question, QuestionSet, QUESTIONS_PER_ROUND};
use crate::error::{QuestionRule, ValidationError};
use crate::level::band_for;
use crate::util::{strip_code_fences, word_count};

/// Anything at or below this many characters is junk regardless of level
/// (an apology fragment, a stray sentence, an empty fence).
const MIN_PASSAGE_CHARS: usize = 40;

/// Phrases the model emits instead of content when it declines the request.
const REFUSAL_MARKERS: [&str; 2] = ["no puedo generar", "contenido inapropiado"];

/// Check a raw model response against the passage contract for `level`:
/// non-empty after trimming fences, above the absolute character floor, not a
/// refusal, and at least 80% of the level band's minimum word count.
pub fn validate_passage(raw_text: &str, level: u8) -> Result<Passage, ValidationError> {
  let body = strip_code_fences(raw_text);
  if body.is_empty() {
    return Err(ValidationError::Empty);
  }
  let chars = body.chars().count();
  if chars <= MIN_PASSAGE_CHARS {
    return Err(ValidationError::TooShort { chars, min: MIN_PASSAGE_CHARS });
  }
  let lower = body.to_lowercase();
  if REFUSAL_MARKERS.iter().any(|m| lower.contains(m)) {
    return Err(ValidationError::Refusal);
  }
  let words = word_count(body);
  let min = band_for(level).tolerated_min_words();
  if words < min {
    return Err(ValidationError::WordCountLow { words, min, level });
  }
  Ok(Passage { level, body: body.to_string(), word_count: words })
}

/// Wire shape we ask the model for: a JSON list of objects with exactly these
/// three fields. Unknown extra fields are tolerated; missing ones are not.
#[derive(Debug, Deserialize)]
struct RawQuestion {
  question: String,
  options: BTreeMap<String, String>,
  correct_answer: String,
}

/// Parse and check a raw model response against the question-set contract:
/// valid JSON list of exactly 5 elements, each with a non-empty prompt,
/// options with exactly the keys A/B/C/D (all non-empty), and a
/// `correct_answer` that is one of those keys.
pub fn validate_question_set(raw_text: &str) -> Result<QuestionSet, ValidationError> {
  let cleaned = strip_code_fences(raw_text);
  if cleaned.is_empty() {
    return Err(ValidationError::Empty);
  }
  let raw: Vec<RawQuestion> =
    serde_json::from_str(cleaned).map_err(|e| ValidationError::Json(e.to_string()))?;
  if raw.len() != QUESTIONS_PER_ROUND {
    return Err(ValidationError::QuestionCount(raw.len()));
  }

  let mut questions = Vec::with_capacity(QUESTIONS_PER_ROUND);
  for (index, rq) in raw.into_iter().enumerate() {
    questions.push(validate_question(rq).map_err(|rule| ValidationError::Question { index, rule })?);
  }
  Ok(QuestionSet::from_validated(questions))
}

fn validate_question(rq: RawQuestion) -> Result<Question, QuestionRule> {
  if rq.question.trim().is_empty() {
    return Err(QuestionRule::EmptyPrompt);
  }

  let expected: Vec<&str> = ChoiceKey::ALL.iter().map(|k| k.as_str()).collect();
  let got: Vec<&str> = rq.options.keys().map(String::as_str).collect();
  if got != expected {
    return Err(QuestionRule::WrongOptionKeys { got: got.join(",") });
  }

  let mut options: [String; 4] = Default::default();
  for key in ChoiceKey::ALL {
    // Key presence was just checked; the map lookup cannot miss.
    let text = rq.options.get(key.as_str()).cloned().unwrap_or_default();
    if text.trim().is_empty() {
      return Err(QuestionRule::EmptyOption { key: key.to_string() });
    }
    options[key.index()] = text;
  }

  let correct = ChoiceKey::parse(rq.correct_answer.trim())
    .ok_or_else(|| QuestionRule::BadCorrectKey { got: rq.correct_answer.clone() })?;

  Ok(Question { prompt: rq.question, options, correct })
}
