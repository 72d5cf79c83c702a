//! Loading trainer configuration (prompts + generation tuning) from TOML.
//!
//! Everything has production defaults; the TOML file is optional and only
//! needed to tune prompt wording or retry behavior.

use serde::Deserialize;
use tracing::{error, info};

#[derive(Clone, Debug, Deserialize, Default)]
pub struct TrainerConfig {
  #[serde(default)]
  pub prompts: Prompts,
  #[serde(default)]
  pub generation: GenerationSettings,
}

/// Retry/backoff tuning for the generation client.
#[derive(Clone, Debug, Deserialize)]
pub struct GenerationSettings {
  /// Attempts per request before giving up with a `GenerationFailure`.
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  /// Exponential backoff base; the wait before attempt N+1 is `base^N` seconds.
  #[serde(default = "default_backoff_base")]
  pub backoff_base: f64,
}

fn default_max_retries() -> u32 {
  3
}
fn default_backoff_base() -> f64 {
  1.5
}

impl Default for GenerationSettings {
  fn default() -> Self {
    Self { max_retries: default_max_retries(), backoff_base: default_backoff_base() }
  }
}

/// Prompts used by the generation client. Defaults produce Spanish reading
/// material for teenage students; override them in TOML to tune tone or
/// audience. Templates use `{placeholder}` substitution (see `util::fill_template`).
#[derive(Clone, Debug, Deserialize)]
pub struct Prompts {
  pub passage_system: String,
  /// Placeholders: {level} {min_level} {max_level} {descriptor} {min_words} {max_words} {topic_hint}
  pub passage_user_template: String,
  pub questions_system: String,
  /// Placeholders: {passage}
  pub questions_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      passage_system:
        "Eres un asistente experto en crear material didáctico de español (ELE y nativos jóvenes). \
         Generas únicamente el texto pedido, sin títulos, sin preguntas, sin encabezados ni notas. \
         El contenido debe ser seguro, ético y apropiado para menores (G-rated)."
          .into(),
      passage_user_template:
        "Genera un texto de lectura en ESPAÑOL para un estudiante de bachillerato (16-17 años).\n\
         Nivel de dificultad: {level} (escala {min_level} a {max_level}), es decir {descriptor}.\n\
         Tema sugerido: {topic_hint}.\n\
         Longitud: aproximadamente {min_words}-{max_words} palabras.\n\
         El texto debe ser coherente, autocontenido y permitir formular 5 preguntas claras de \
         comprensión lectora (idea principal, detalles, inferencia simple, vocabulario en contexto).\n\
         FORMATO: solo el texto de lectura, ningún otro contenido."
          .into(),
      questions_system:
        "Creas preguntas de comprensión lectora en español. Respondes ÚNICAMENTE con una lista JSON \
         válida, sin texto introductorio y sin bloques de código markdown."
          .into(),
      questions_user_template:
        "Basado ESTRICTAMENTE en el siguiente texto, crea EXACTAMENTE 5 preguntas de opción múltiple.\n\
         Cada elemento de la lista JSON debe tener TRES claves exactas:\n\
         - \"question\": (string) el texto de la pregunta.\n\
         - \"options\": (objeto) exactamente cuatro pares, con claves MAYÚSCULAS \"A\", \"B\", \"C\", \"D\".\n\
         - \"correct_answer\": (string) la letra de la opción correcta, presente en \"options\".\n\
         Solo UNA opción es correcta según el texto; los distractores deben ser plausibles pero \
         claramente incorrectos. Todo en español.\n\
         Texto:\n---\n{passage}\n---\n\
         Responde SOLO con la lista JSON, empezando con `[` y terminando con `]`."
          .into(),
    }
  }
}

/// Attempt to load `TrainerConfig` from TRAINER_CONFIG_PATH.
/// On any parsing/IO error, returns None and the caller falls back to defaults.
pub fn load_trainer_config_from_env() -> Option<TrainerConfig> {
  let path = std::env::var("TRAINER_CONFIG_PATH").ok()?;
  match std::fs::read_to_string(&path) {
    Ok(s) => match toml::from_str::<TrainerConfig>(&s) {
      Ok(cfg) => {
        info!(target: "lectura_backend", %path, "Loaded trainer config (TOML)");
        Some(cfg)
      }
      Err(e) => {
        error!(target: "lectura_backend", %path, error = %e, "Failed to parse TOML config");
        None
      }
    },
    Err(e) => {
      error!(target: "lectura_backend", %path, error = %e, "Failed to read TOML config file");
      None
    }
  }
}
