//! Public request/response structs for the HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.
//!
//! Correct answers are never serialized before grading: `QuestionOut` carries
//! prompt + options only, and the correct keys appear solely in the grade
//! review.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::{ChoiceKey, HistoryEntry, Question};
use crate::round::{GradeOutcome, RoundPhase, Session};

//
// Auth
//

#[derive(Debug, Deserialize)]
pub struct RegisterIn {
    pub username: String,
    pub password: String,
    #[serde(rename = "confirmPassword")]
    pub confirm_password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginIn {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginOut {
    pub token: String,
    #[serde(rename = "isAdmin")]
    pub is_admin: bool,
    pub level: Option<u8>,
}

#[derive(Serialize)]
pub struct OkOut {
    pub ok: bool,
}

//
// Round
//

/// One question as shown to the student: no correct key.
#[derive(Serialize)]
pub struct QuestionOut {
    pub prompt: String,
    pub options: BTreeMap<String, String>,
}

impl QuestionOut {
    fn from_question(q: &Question) -> Self {
        let options = ChoiceKey::ALL
            .iter()
            .map(|k| (k.to_string(), q.option_text(*k).to_string()))
            .collect();
        Self { prompt: q.prompt.clone(), options }
    }
}

/// Current round view: whatever content the phase permits.
#[derive(Serialize)]
pub struct RoundOut {
    pub phase: &'static str,
    pub level: u8,
    pub passage: Option<String>,
    pub questions: Vec<QuestionOut>,
}

pub fn to_round_out(session: &Session) -> RoundOut {
    let round = &session.round;
    let show_content = !matches!(round.phase(), RoundPhase::Idle | RoundPhase::Generating);
    RoundOut {
        phase: round.phase().name(),
        level: session.current_level,
        passage: round
            .passage()
            .filter(|_| show_content)
            .map(|p| p.body.clone()),
        questions: if show_content {
            round
                .question_set()
                .map(|set| set.questions().iter().map(QuestionOut::from_question).collect())
                .unwrap_or_default()
        } else {
            Vec::new()
        },
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitIn {
    /// Question index ("0".."4" as JSON keys) to chosen letter.
    pub answers: std::collections::HashMap<usize, String>,
}

/// Per-question feedback shown after grading.
#[derive(Serialize)]
pub struct QuestionReview {
    pub prompt: String,
    pub chosen: String,
    #[serde(rename = "chosenText")]
    pub chosen_text: String,
    pub correct: String,
    #[serde(rename = "correctText")]
    pub correct_text: String,
    #[serde(rename = "isCorrect")]
    pub is_correct: bool,
}

#[derive(Serialize)]
pub struct GradeOut {
    pub score: u8,
    pub total: usize,
    #[serde(rename = "levelBefore")]
    pub level_before: u8,
    #[serde(rename = "levelAfter")]
    pub level_after: u8,
    pub persisted: bool,
    pub review: Vec<QuestionReview>,
}

pub fn to_grade_out(session: &Session, outcome: &GradeOutcome) -> GradeOut {
    let review = session
        .round
        .question_set()
        .map(|set| {
            set.questions()
                .iter()
                .enumerate()
                .map(|(i, q)| {
                    let chosen = session.round.answers().get(&i).copied();
                    QuestionReview {
                        prompt: q.prompt.clone(),
                        chosen: chosen.map(|k| k.to_string()).unwrap_or_default(),
                        chosen_text: chosen
                            .map(|k| q.option_text(k).to_string())
                            .unwrap_or_default(),
                        correct: q.correct.to_string(),
                        correct_text: q.option_text(q.correct).to_string(),
                        is_correct: chosen == Some(q.correct),
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    GradeOut {
        score: outcome.score,
        total: crate::domain::QUESTIONS_PER_ROUND,
        level_before: outcome.level_before,
        level_after: outcome.level_after,
        persisted: outcome.persisted,
        review,
    }
}

//
// Progress & admin
//

#[derive(Serialize)]
pub struct ProgressOut {
    pub level: u8,
    pub history: Vec<HistoryEntry>,
}

#[derive(Serialize)]
pub struct StudentRow {
    pub username: String,
    pub level: u8,
    pub rounds: usize,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}

#[derive(Serialize)]
pub struct ErrorOut {
    pub message: String,
}
