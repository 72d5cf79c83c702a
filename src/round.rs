//! The practice round state machine.
//!
//! One round walks `Idle → Generating → Ready → Answered → Graded → Idle`.
//! Generation failures are terminal for the attempt (retries already happened
//! inside the generation client) and drop the round back to `Idle` with the
//! content cleared. Grading runs exactly once per round: the adaptation and
//! the history append are guarded by the `Graded` phase, so re-invoking it
//! returns the cached outcome and appends nothing.
//!
//! A `Session` owns the round plus the student's in-memory level; there is no
//! ambient global state. One caller at a time per session.

use std::collections::HashMap;

use tracing::{info, instrument, warn};

use crate::domain::{
  ChoiceKey, HistoryEntry, Passage, QuestionSet, MAX_LEVEL, MIN_LEVEL, QUESTIONS_PER_ROUND,
};
use crate::error::RoundError;
use crate::generation::{GenerationClient, TextSource};
use crate::level::next_level;
use crate::store::ProgressStore;
use crate::util::snippet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum RoundPhase {
  #[default]
  Idle,
  Generating,
  Ready,
  Answered,
  Graded,
}

impl RoundPhase {
  pub fn name(self) -> &'static str {
    match self {
      RoundPhase::Idle => "idle",
      RoundPhase::Generating => "generating",
      RoundPhase::Ready => "ready",
      RoundPhase::Answered => "answered",
      RoundPhase::Graded => "graded",
    }
  }
}

/// Result of grading one round. `persisted` is false when the store write
/// failed; the in-memory session still advanced.
#[derive(Clone, Debug)]
pub struct GradeOutcome {
  pub score: u8,
  pub level_before: u8,
  pub level_after: u8,
  pub persisted: bool,
}

#[derive(Default)]
pub struct Round {
  level_at_start: u8,
  passage: Option<Passage>,
  question_set: Option<QuestionSet>,
  answers: HashMap<usize, ChoiceKey>,
  phase: RoundPhase,
  outcome: Option<GradeOutcome>,
}

impl Round {
  pub fn phase(&self) -> RoundPhase {
    self.phase
  }

  pub fn passage(&self) -> Option<&Passage> {
    self.passage.as_ref()
  }

  pub fn question_set(&self) -> Option<&QuestionSet> {
    self.question_set.as_ref()
  }

  pub fn answers(&self) -> &HashMap<usize, ChoiceKey> {
    &self.answers
  }

  pub fn outcome(&self) -> Option<&GradeOutcome> {
    self.outcome.as_ref()
  }

  fn reset(&mut self) {
    *self = Round::default();
  }
}

/// One logged-in student's practice state: the persisted username, the level
/// the next round will use, and the current round.
pub struct Session {
  pub username: String,
  pub current_level: u8,
  pub round: Round,
}

impl Session {
  pub fn new(username: String, current_level: u8) -> Self {
    Self { username, current_level, round: Round::default() }
  }

  /// `Idle → Generating → Ready`, or back to `Idle` when generation fails.
  /// A no-op when a round is already underway.
  #[instrument(level = "info", skip(self, gen), fields(username = %self.username, level = self.current_level))]
  pub async fn start_round<G: TextSource>(
    &mut self,
    gen: &GenerationClient<G>,
  ) -> Result<(), RoundError> {
    if self.round.phase != RoundPhase::Idle {
      info!(target: "round", phase = self.round.phase.name(), "start ignored: round already underway");
      return Ok(());
    }

    self.round.reset();
    self.round.level_at_start = self.current_level;
    self.round.phase = RoundPhase::Generating;

    let passage = match gen.request_passage(self.current_level).await {
      Ok(p) => p,
      Err(failure) => {
        warn!(target: "round", error = %failure, "Passage generation failed; round back to idle");
        self.round.reset();
        return Err(failure.into());
      }
    };

    let question_set = match gen.request_questions(&passage).await {
      Ok(qs) => qs,
      Err(failure) => {
        warn!(target: "round", error = %failure, "Question generation failed; round back to idle");
        self.round.reset();
        return Err(failure.into());
      }
    };

    info!(target: "round", words = passage.word_count, "Round ready");
    self.round.passage = Some(passage);
    self.round.question_set = Some(question_set);
    self.round.phase = RoundPhase::Ready;
    Ok(())
  }

  /// `Ready → Answered`. Rejected unless every question index has an answer;
  /// a rejected submit leaves the round in `Ready`.
  #[instrument(level = "info", skip(self, answers), fields(username = %self.username))]
  pub fn submit_answers(
    &mut self,
    answers: &HashMap<usize, ChoiceKey>,
  ) -> Result<(), RoundError> {
    if self.round.phase != RoundPhase::Ready {
      return Err(RoundError::WrongPhase { phase: self.round.phase.name() });
    }

    let missing: Vec<usize> =
      (0..QUESTIONS_PER_ROUND).filter(|i| !answers.contains_key(i)).collect();
    if !missing.is_empty() {
      return Err(RoundError::IncompleteAnswers { missing });
    }

    self.round.answers =
      (0..QUESTIONS_PER_ROUND).map(|i| (i, answers[&i])).collect();
    self.round.phase = RoundPhase::Answered;
    Ok(())
  }

  /// `Answered → Graded`. Computes the score, adapts the level, and appends
  /// one history entry. Idempotent: calling it again on a graded round
  /// returns the cached outcome without touching the store. A store failure
  /// degrades to an unpersisted outcome instead of failing the round.
  #[instrument(level = "info", skip(self, store), fields(username = %self.username))]
  pub fn grade(&mut self, store: &dyn ProgressStore) -> Result<GradeOutcome, RoundError> {
    if self.round.phase == RoundPhase::Graded {
      // Already graded; self.round.outcome was set on the first pass.
      if let Some(outcome) = &self.round.outcome {
        info!(target: "round", score = outcome.score, "grade repeated; returning cached outcome");
        return Ok(outcome.clone());
      }
    }
    if self.round.phase != RoundPhase::Answered {
      return Err(RoundError::WrongPhase { phase: self.round.phase.name() });
    }

    // Both are guaranteed by the Answered phase.
    let (Some(question_set), Some(passage)) = (&self.round.question_set, &self.round.passage)
    else {
      return Err(RoundError::WrongPhase { phase: self.round.phase.name() });
    };

    let score = compute_score(&self.round.answers, question_set);
    let level_before = self.round.level_at_start;
    let level_after = next_level(level_before, score, MIN_LEVEL, MAX_LEVEL);

    let entry = HistoryEntry {
      timestamp: chrono::Utc::now(),
      level_before,
      level_after,
      score,
      passage_snippet: snippet(&passage.body, 80),
    };
    let persisted = match store.append_history(&self.username, entry) {
      Ok(()) => true,
      Err(e) => {
        warn!(target: "round", error = %e, "Could not persist round outcome; session continues in memory");
        false
      }
    };

    self.current_level = level_after;
    let outcome = GradeOutcome { score, level_before, level_after, persisted };
    info!(target: "round", score, level_before, level_after, persisted, "Round graded");
    self.round.outcome = Some(outcome.clone());
    self.round.phase = RoundPhase::Graded;
    Ok(outcome)
  }

  /// `Graded → Idle`: clears passage, questions, answers, and score. The
  /// session level persists across rounds.
  #[instrument(level = "info", skip(self), fields(username = %self.username))]
  pub fn next_round(&mut self) -> Result<(), RoundError> {
    match self.round.phase {
      RoundPhase::Graded | RoundPhase::Idle => {
        self.round.reset();
        Ok(())
      }
      phase => Err(RoundError::WrongPhase { phase: phase.name() }),
    }
  }
}

/// Deterministic score: how many chosen keys match the correct key at the
/// same index. No partial credit.
fn compute_score(answers: &HashMap<usize, ChoiceKey>, question_set: &QuestionSet) -> u8 {
  question_set
    .questions()
    .iter()
    .enumerate()
    .filter(|(i, q)| answers.get(i) == Some(&q.correct))
    .count() as u8
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{GenerationSettings, Prompts};
  use crate::domain::{Role, UserRecord, DEFAULT_LEVEL};
  use crate::error::TransportError;
  use crate::generation::testsource::ScriptedSource;
  use crate::store::memory::MemoryStore;
  use crate::store::ProgressStore;

  fn passage_text(words: usize) -> String {
    vec!["palabra"; words].join(" ")
  }

  /// Five questions whose correct keys are A, B, C, D, A.
  fn questions_json() -> String {
    let correct = ["A", "B", "C", "D", "A"];
    let items: Vec<serde_json::Value> = correct
      .iter()
      .map(|k| {
        serde_json::json!({
          "question": "¿Qué dice el texto?",
          "options": { "A": "Uno", "B": "Dos", "C": "Tres", "D": "Cuatro" },
          "correct_answer": k,
        })
      })
      .collect();
    serde_json::Value::Array(items).to_string()
  }

  fn gen_ok() -> GenerationClient<ScriptedSource> {
    let source = ScriptedSource::new(vec![Ok(passage_text(70)), Ok(questions_json())]);
    GenerationClient::new(
      source,
      Prompts::default(),
      GenerationSettings { max_retries: 3, backoff_base: 0.0 },
    )
  }

  fn store_with(username: &str) -> MemoryStore {
    let store = MemoryStore::default();
    store
      .add_user(UserRecord {
        username: username.into(),
        password_hash: "hash".into(),
        role: Role::Student { current_level: DEFAULT_LEVEL, history: vec![] },
      })
      .unwrap();
    store
  }

  fn answers(keys: [ChoiceKey; 5]) -> HashMap<usize, ChoiceKey> {
    keys.into_iter().enumerate().collect()
  }

  async fn ready_session(store_user: &str) -> Session {
    let mut session = Session::new(store_user.into(), DEFAULT_LEVEL);
    session.start_round(&gen_ok()).await.unwrap();
    session
  }

  #[tokio::test]
  async fn happy_path_grades_and_adapts() {
    use ChoiceKey::*;
    let store = store_with("ana@test.com");
    let mut session = ready_session("ana@test.com").await;
    assert_eq!(session.round.phase(), RoundPhase::Ready);

    // 4 of 5 correct (last answer wrong).
    session.submit_answers(&answers([A, B, C, D, B])).unwrap();
    assert_eq!(session.round.phase(), RoundPhase::Answered);

    let outcome = session.grade(&store).unwrap();
    assert_eq!(outcome.score, 4);
    assert_eq!(outcome.level_before, DEFAULT_LEVEL);
    assert_eq!(outcome.level_after, DEFAULT_LEVEL + 1);
    assert!(outcome.persisted);
    assert_eq!(session.current_level, DEFAULT_LEVEL + 1);

    let rec = store.get_user("ana@test.com").unwrap().unwrap();
    assert_eq!(rec.history().len(), 1);
    assert_eq!(rec.history()[0].score, 4);
    assert_eq!(rec.current_level(), Some(DEFAULT_LEVEL + 1));
  }

  #[tokio::test]
  async fn generation_failure_returns_to_idle_with_clean_round() {
    let source = ScriptedSource::new(vec![
      Err(TransportError("boom".into())),
      Err(TransportError("boom".into())),
      Err(TransportError("boom".into())),
    ]);
    let gen = GenerationClient::new(
      source,
      Prompts::default(),
      GenerationSettings { max_retries: 3, backoff_base: 0.0 },
    );
    let mut session = Session::new("ana@test.com".into(), DEFAULT_LEVEL);
    let err = session.start_round(&gen).await.unwrap_err();
    assert!(matches!(err, RoundError::Generation(_)));
    assert_eq!(session.round.phase(), RoundPhase::Idle);
    assert!(session.round.passage().is_none());
    assert!(session.round.question_set().is_none());
  }

  #[tokio::test]
  async fn question_failure_also_clears_the_round() {
    // Passage fine, but every question attempt is junk.
    let source = ScriptedSource::new(vec![
      Ok(passage_text(70)),
      Ok("not json".into()),
      Ok("[]".into()),
      Ok("still not json".into()),
    ]);
    let gen = GenerationClient::new(
      source,
      Prompts::default(),
      GenerationSettings { max_retries: 3, backoff_base: 0.0 },
    );
    let mut session = Session::new("ana@test.com".into(), DEFAULT_LEVEL);
    assert!(session.start_round(&gen).await.is_err());
    assert_eq!(session.round.phase(), RoundPhase::Idle);
    assert!(session.round.passage().is_none());
  }

  #[tokio::test]
  async fn start_is_a_noop_when_round_is_underway() {
    let mut session = ready_session("ana@test.com").await;
    // Second generator would panic the script if consulted; start must not
    // reach it.
    let untouched = GenerationClient::new(
      ScriptedSource::new(vec![]),
      Prompts::default(),
      GenerationSettings { max_retries: 1, backoff_base: 0.0 },
    );
    session.start_round(&untouched).await.unwrap();
    assert_eq!(session.round.phase(), RoundPhase::Ready);
  }

  #[tokio::test]
  async fn partial_answers_are_rejected_and_phase_holds() {
    use ChoiceKey::*;
    let mut session = ready_session("ana@test.com").await;
    let mut partial = answers([A, B, C, D, A]);
    partial.remove(&4);
    let err = session.submit_answers(&partial).unwrap_err();
    assert!(matches!(err, RoundError::IncompleteAnswers { ref missing } if missing == &vec![4]));
    assert_eq!(session.round.phase(), RoundPhase::Ready);
  }

  #[tokio::test]
  async fn submit_outside_ready_is_rejected() {
    use ChoiceKey::*;
    let store = store_with("ana@test.com");
    let mut session = ready_session("ana@test.com").await;
    session.submit_answers(&answers([A, B, C, D, A])).unwrap();
    // Already answered; a second submit must not overwrite anything.
    assert!(matches!(
      session.submit_answers(&answers([B, B, B, B, B])),
      Err(RoundError::WrongPhase { .. })
    ));
    let outcome = session.grade(&store).unwrap();
    assert_eq!(outcome.score, 5);
  }

  #[tokio::test]
  async fn double_grade_appends_history_once() {
    use ChoiceKey::*;
    let store = store_with("ana@test.com");
    let mut session = ready_session("ana@test.com").await;
    session.submit_answers(&answers([A, B, C, D, A])).unwrap();

    let first = session.grade(&store).unwrap();
    let second = session.grade(&store).unwrap();
    assert_eq!(first.score, second.score);
    assert_eq!(first.level_after, second.level_after);

    let rec = store.get_user("ana@test.com").unwrap().unwrap();
    assert_eq!(rec.history().len(), 1, "history must not double-append");
  }

  #[tokio::test]
  async fn grade_before_submit_is_rejected() {
    let store = store_with("ana@test.com");
    let mut session = ready_session("ana@test.com").await;
    assert!(matches!(session.grade(&store), Err(RoundError::WrongPhase { .. })));
  }

  #[tokio::test]
  async fn store_outage_degrades_but_does_not_fail_grading() {
    use ChoiceKey::*;
    let store = store_with("ana@test.com");
    let mut session = ready_session("ana@test.com").await;
    session.submit_answers(&answers([A, B, C, D, A])).unwrap();

    store.fail_writes.store(true, std::sync::atomic::Ordering::SeqCst);
    let outcome = session.grade(&store).unwrap();
    assert!(!outcome.persisted);
    assert_eq!(outcome.score, 5);
    // In-memory level still advanced.
    assert_eq!(session.current_level, DEFAULT_LEVEL + 1);
  }

  #[tokio::test]
  async fn next_clears_content_but_keeps_the_level() {
    use ChoiceKey::*;
    let store = store_with("ana@test.com");
    let mut session = ready_session("ana@test.com").await;
    session.submit_answers(&answers([A, B, C, D, A])).unwrap();
    session.grade(&store).unwrap();

    session.next_round().unwrap();
    assert_eq!(session.round.phase(), RoundPhase::Idle);
    assert!(session.round.passage().is_none());
    assert!(session.round.question_set().is_none());
    assert!(session.round.answers().is_empty());
    assert!(session.round.outcome().is_none());
    assert_eq!(session.current_level, DEFAULT_LEVEL + 1);
  }

  #[tokio::test]
  async fn next_mid_round_is_rejected() {
    let mut session = ready_session("ana@test.com").await;
    assert!(matches!(session.next_round(), Err(RoundError::WrongPhase { phase: "ready" })));
  }

  #[tokio::test]
  async fn zero_score_at_min_level_clamps() {
    use ChoiceKey::*;
    let store = store_with("ana@test.com");
    let gen = gen_ok();
    let mut session = Session::new("ana@test.com".into(), MIN_LEVEL);
    session.start_round(&gen).await.unwrap();
    // Every answer wrong: correct keys are A,B,C,D,A; answer the off-by-one.
    session.submit_answers(&answers([B, C, D, A, B])).unwrap();
    let outcome = session.grade(&store).unwrap();
    assert_eq!(outcome.score, 0);
    assert_eq!(outcome.level_after, MIN_LEVEL);
  }
}
