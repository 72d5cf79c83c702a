//! Difficulty bands and the level adaptation rule.
//!
//! Bands map the 1–10 scale onto CEFR-ish descriptors and target word ranges
//! for the generated Spanish passages. The adapter is a pure function over
//! one round's score; it clamps and never errors.

use crate::domain::{MAX_LEVEL, MIN_LEVEL, QUESTIONS_PER_ROUND};

/// Prompt-facing description of one difficulty bucket.
#[derive(Clone, Copy, Debug)]
pub struct LevelBand {
  pub descriptor: &'static str,
  pub min_words: usize,
  pub max_words: usize,
  pub topic_hint: &'static str,
}

impl LevelBand {
  /// Accept passages down to 80% of the band minimum; generative output
  /// routinely lands a little short of the requested range.
  pub fn tolerated_min_words(&self) -> usize {
    self.min_words * 8 / 10
  }
}

/// Band lookup for a level. Out-of-range input is clamped into the scale
/// rather than rejected, so callers never have to handle a missing band.
pub fn band_for(level: u8) -> LevelBand {
  match level.clamp(MIN_LEVEL, MAX_LEVEL) {
    0..=2 => LevelBand {
      descriptor: "muy fácil, con vocabulario simple (A1-A2 CEFR) y frases cortas y directas",
      min_words: 50,
      max_words: 80,
      topic_hint: "una descripción simple de un animal, un objeto cotidiano o una acción simple",
    },
    3..=4 => LevelBand {
      descriptor: "fácil (A2-B1 CEFR), con vocabulario común y frases relativamente cortas",
      min_words: 80,
      max_words: 120,
      topic_hint: "una anécdota breve, la descripción de un lugar conocido o una explicación simple de un hobby",
    },
    5..=6 => LevelBand {
      descriptor: "intermedio (B1 CEFR), con vocabulario variado y frases de longitud media",
      min_words: 120,
      max_words: 180,
      topic_hint: "el resumen de una noticia sencilla, un proceso simple o una opinión breve sobre un tema general",
    },
    7..=8 => LevelBand {
      descriptor: "intermedio-alto (B2 CEFR), con vocabulario más rico y frases subordinadas",
      min_words: 180,
      max_words: 250,
      topic_hint: "la explicación de un concepto científico básico, un relato histórico corto o una reseña simple",
    },
    _ => LevelBand {
      descriptor: "avanzado (C1 CEFR), con vocabulario avanzado y frases largas y complejas",
      min_words: 250,
      max_words: 350,
      topic_hint: "un análisis corto de un tema social, una reflexión sobre una obra de arte o una tecnología emergente",
    },
  }
}

/// Map one round's score onto the next level.
///
/// Thresholds over `QUESTIONS_PER_ROUND`: at or above 80% (4–5 correct) the
/// level goes up; at or below 40% (0–2 correct) it goes down; otherwise it
/// holds. Both bounds are inclusive — 2/5 counts as a decrease. The result is
/// always clamped into `[min_level, max_level]`.
pub fn next_level(current_level: u8, score: u8, min_level: u8, max_level: u8) -> u8 {
  let pct = f32::from(score) / QUESTIONS_PER_ROUND as f32;
  let next = if pct >= 0.8 {
    current_level.saturating_add(1)
  } else if pct <= 0.4 {
    current_level.saturating_sub(1)
  } else {
    current_level
  };
  next.clamp(min_level, max_level)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn high_scores_raise_the_level() {
    assert_eq!(next_level(5, 4, MIN_LEVEL, MAX_LEVEL), 6);
    assert_eq!(next_level(5, 5, MIN_LEVEL, MAX_LEVEL), 6);
  }

  #[test]
  fn low_scores_lower_the_level_inclusive_bound() {
    // 2/5 is exactly 40% and decreases: the lower bound is inclusive.
    assert_eq!(next_level(5, 2, MIN_LEVEL, MAX_LEVEL), 4);
    assert_eq!(next_level(5, 1, MIN_LEVEL, MAX_LEVEL), 4);
    assert_eq!(next_level(5, 0, MIN_LEVEL, MAX_LEVEL), 4);
  }

  #[test]
  fn middling_score_holds() {
    for lvl in MIN_LEVEL..=MAX_LEVEL {
      assert_eq!(next_level(lvl, 3, MIN_LEVEL, MAX_LEVEL), lvl);
    }
  }

  #[test]
  fn clamped_at_both_ends() {
    assert_eq!(next_level(MAX_LEVEL, 5, MIN_LEVEL, MAX_LEVEL), MAX_LEVEL);
    assert_eq!(next_level(MIN_LEVEL, 0, MIN_LEVEL, MAX_LEVEL), MIN_LEVEL);
  }

  #[test]
  fn never_leaves_the_scale() {
    for lvl in MIN_LEVEL..=MAX_LEVEL {
      for score in 0..=5u8 {
        let next = next_level(lvl, score, MIN_LEVEL, MAX_LEVEL);
        assert!((MIN_LEVEL..=MAX_LEVEL).contains(&next));
        match score {
          4 | 5 => assert!(next >= lvl),
          0..=2 => assert!(next <= lvl),
          _ => assert_eq!(next, lvl),
        }
      }
    }
  }

  #[test]
  fn bands_cover_the_scale_and_grow() {
    let mut prev_min = 0;
    for lvl in MIN_LEVEL..=MAX_LEVEL {
      let band = band_for(lvl);
      assert!(band.min_words < band.max_words);
      assert!(band.min_words >= prev_min);
      assert!(band.tolerated_min_words() <= band.min_words);
      prev_min = band.min_words;
    }
  }

  #[test]
  fn tolerated_minimum_is_eighty_percent() {
    assert_eq!(band_for(3).tolerated_min_words(), 64); // 80 * 0.8
    assert_eq!(band_for(9).tolerated_min_words(), 200); // 250 * 0.8
  }
}
