//! Generation client: turns (level, kind) requests into validated content.
//!
//! One parametrized retry-with-validator loop serves both passage and
//! question generation: build the prompt, call the text source, validate the
//! raw output, and either return immediately or back off exponentially and
//! try again. After `max_retries` attempts the loop returns a terminal
//! `GenerationFailure` carrying the last error and the last raw output seen.
//! Nothing here panics on malformed model output.
//!
//! Accepted passages are cached per `(level, day)` so repeated requests for
//! the same level reuse content instead of paying for a new generation. Cache
//! hits bypass the whole pipeline; entries from earlier days are evicted
//! whenever a fresh passage is inserted.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::config::{GenerationSettings, Prompts};
use crate::domain::{Passage, QuestionSet, MAX_LEVEL, MIN_LEVEL};
use crate::error::{GenerationFailure, TransportError, ValidationError};
use crate::level::band_for;
use crate::util::{fill_template, trunc_for_log};
use crate::validate::{validate_passage, validate_question_set};

/// The external text-generation capability: one instruction in, one raw
/// response out. No structural guarantee and no determinism between calls.
#[allow(async_fn_in_trait)]
pub trait TextSource {
  async fn generate(
    &self,
    system: &str,
    user: &str,
    temperature: f32,
  ) -> Result<String, TransportError>;
}

pub struct GenerationClient<G> {
  source: G,
  prompts: Prompts,
  settings: GenerationSettings,
  passage_cache: RwLock<HashMap<(u8, NaiveDate), Passage>>,
}

impl<G: TextSource> GenerationClient<G> {
  pub fn new(source: G, prompts: Prompts, settings: GenerationSettings) -> Self {
    Self { source, prompts, settings, passage_cache: RwLock::new(HashMap::new()) }
  }

  /// Generate and validate a reading passage for `level`, reusing today's
  /// cached passage for that level when one exists.
  #[instrument(level = "info", skip(self), fields(%level))]
  pub async fn request_passage(&self, level: u8) -> Result<Passage, GenerationFailure> {
    let key = (level, Utc::now().date_naive());
    if let Some(p) = self.passage_cache.read().await.get(&key) {
      info!(target: "generation", %level, words = p.word_count, "Passage cache hit");
      return Ok(p.clone());
    }

    let band = band_for(level);
    let user = fill_template(
      &self.prompts.passage_user_template,
      &[
        ("level", &level.to_string()),
        ("min_level", &MIN_LEVEL.to_string()),
        ("max_level", &MAX_LEVEL.to_string()),
        ("descriptor", band.descriptor),
        ("min_words", &band.min_words.to_string()),
        ("max_words", &band.max_words.to_string()),
        ("topic_hint", band.topic_hint),
      ],
    );

    let passage = self
      .generate_validated("passage", &self.prompts.passage_system, &user, 0.9, |raw| {
        validate_passage(raw, level)
      })
      .await?;

    info!(target: "generation", %level, words = passage.word_count, "Passage accepted");
    let mut cache = self.passage_cache.write().await;
    // Yesterday's passages are never served again; drop them on insert.
    cache.retain(|(_, day), _| *day == key.1);
    cache.insert(key, passage.clone());
    Ok(passage)
  }

  /// Generate and validate the 5-question set for an accepted passage.
  #[instrument(level = "info", skip(self, passage), fields(level = passage.level, words = passage.word_count))]
  pub async fn request_questions(&self, passage: &Passage) -> Result<QuestionSet, GenerationFailure> {
    let user =
      fill_template(&self.prompts.questions_user_template, &[("passage", &passage.body)]);

    let set = self
      .generate_validated("questions", &self.prompts.questions_system, &user, 0.3, |raw| {
        validate_question_set(raw)
      })
      .await?;

    info!(target: "generation", level = passage.level, "Question set accepted");
    Ok(set)
  }

  /// Shared retry loop. A transport error and a validation failure are
  /// handled the same way: log, back off `base^attempt` seconds, generate
  /// again (never reparse the same output). The terminal failure carries the
  /// last error and raw response for diagnostics.
  async fn generate_validated<T>(
    &self,
    what: &'static str,
    system: &str,
    user: &str,
    temperature: f32,
    validate: impl Fn(&str) -> Result<T, ValidationError>,
  ) -> Result<T, GenerationFailure> {
    let max_retries = self.settings.max_retries.max(1);
    let mut last_error = String::from("no attempts made");
    let mut last_raw: Option<String> = None;

    for attempt in 0..max_retries {
      match self.source.generate(system, user, temperature).await {
        Ok(raw) => match validate(&raw) {
          Ok(value) => return Ok(value),
          Err(rule) => {
            warn!(
              target: "generation",
              what,
              attempt = attempt + 1,
              max_retries,
              reason = %rule,
              raw = %trunc_for_log(&raw, 160),
              "Generated output failed validation"
            );
            last_error = rule.to_string();
            last_raw = Some(raw);
          }
        },
        Err(TransportError(msg)) => {
          warn!(
            target: "generation",
            what,
            attempt = attempt + 1,
            max_retries,
            error = %msg,
            "Generation call failed"
          );
          last_error = msg;
        }
      }

      if attempt + 1 < max_retries {
        let delay = self.settings.backoff_base.powi(attempt as i32);
        if delay > 0.0 {
          tokio::time::sleep(std::time::Duration::from_secs_f64(delay)).await;
        }
      }
    }

    Err(GenerationFailure::new(max_retries, last_error, last_raw.as_deref()))
  }
}


#[cfg(test)]
mod tests {
  use super::testsource::ScriptedSource;
  use super::*;
  use crate::domain::QUESTIONS_PER_ROUND;

  fn client(responses: Vec<Result<String, TransportError>>) -> GenerationClient<ScriptedSource> {
    let settings = GenerationSettings { max_retries: 3, backoff_base: 0.0 };
    GenerationClient::new(ScriptedSource::new(responses), Prompts::default(), settings)
  }

  fn good_passage(words: usize) -> String {
    vec!["palabra"; words].join(" ")
  }

  fn good_question_set_json() -> String {
    let q = serde_json::json!({
      "question": "¿Qué describe el texto?",
      "options": { "A": "Uno", "B": "Dos", "C": "Tres", "D": "Cuatro" },
      "correct_answer": "A",
    });
    serde_json::Value::Array(vec![q; QUESTIONS_PER_ROUND]).to_string()
  }

  #[tokio::test]
  async fn first_valid_response_wins() {
    let c = client(vec![Ok(good_passage(70))]);
    let p = c.request_passage(3).await.unwrap();
    assert_eq!(p.word_count, 70);
    assert_eq!(c.source.calls(), 1);
  }

  #[tokio::test]
  async fn short_output_is_retried_then_accepted() {
    let c = client(vec![Ok(good_passage(45)), Ok(good_passage(64))]);
    let p = c.request_passage(3).await.unwrap();
    assert_eq!(p.word_count, 64);
    assert_eq!(c.source.calls(), 2);
  }

  #[tokio::test]
  async fn exhausted_retries_return_failure_with_diagnostics() {
    // All three attempts produce under 64 words for a level-3 band.
    let c = client(vec![
      Ok(good_passage(45)),
      Ok(good_passage(50)),
      Ok(good_passage(60)),
    ]);
    let err = c.request_passage(3).await.unwrap_err();
    assert_eq!(err.attempts, 3);
    assert_eq!(c.source.calls(), 3);
    assert!(err.last_error.contains("word count 60"));
    assert!(err.last_raw.is_some());
  }

  #[tokio::test]
  async fn transport_errors_are_retried_too() {
    let c = client(vec![
      Err(TransportError("connection reset".into())),
      Ok(good_passage(70)),
    ]);
    assert!(c.request_passage(3).await.is_ok());
    assert_eq!(c.source.calls(), 2);
  }

  #[tokio::test]
  async fn all_transport_failures_surface_last_error() {
    let c = client(vec![
      Err(TransportError("timeout 1".into())),
      Err(TransportError("timeout 2".into())),
      Err(TransportError("timeout 3".into())),
    ]);
    let err = c.request_passage(2).await.unwrap_err();
    assert_eq!(err.attempts, 3);
    assert_eq!(err.last_error, "timeout 3");
    assert!(err.last_raw.is_none());
  }

  #[tokio::test]
  async fn same_day_same_level_hits_the_cache() {
    let c = client(vec![Ok(good_passage(70)), Ok(good_passage(100))]);
    let first = c.request_passage(3).await.unwrap();
    let second = c.request_passage(3).await.unwrap();
    assert_eq!(first.body, second.body);
    // The second response is still queued: the cache bypassed the source.
    assert_eq!(c.source.calls(), 1);
  }

  #[tokio::test]
  async fn different_levels_do_not_share_cache_entries() {
    let c = client(vec![Ok(good_passage(70)), Ok(good_passage(130))]);
    let p3 = c.request_passage(3).await.unwrap();
    let p5 = c.request_passage(5).await.unwrap();
    assert_ne!(p3.word_count, p5.word_count);
    assert_eq!(c.source.calls(), 2);
  }

  #[tokio::test]
  async fn stale_cache_days_are_evicted_on_insert() {
    let c = client(vec![Ok(good_passage(70))]);
    let stale_key = (4u8, chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
    c.passage_cache.write().await.insert(
      stale_key,
      Passage { level: 4, body: "texto de ayer".into(), word_count: 3 },
    );

    c.request_passage(3).await.unwrap();

    let cache = c.passage_cache.read().await;
    assert!(!cache.contains_key(&stale_key));
    assert_eq!(cache.len(), 1);
  }

  #[tokio::test]
  async fn malformed_question_json_retries_then_succeeds() {
    let c = client(vec![
      Ok("no JSON here".into()),
      Ok(good_question_set_json()),
    ]);
    let passage = Passage { level: 3, body: good_passage(64), word_count: 64 };
    let set = c.request_questions(&passage).await.unwrap();
    assert_eq!(set.len(), QUESTIONS_PER_ROUND);
    assert_eq!(c.source.calls(), 2);
  }
}
