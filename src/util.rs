//! Small utility helpers used across modules.

/// Very small and safe string templating.
/// Replaces occurrences of `{key}` in the template with provided values.
/// This is intentionally simple (no nested/conditional logic).
pub fn fill_template(tpl: &str, pairs: &[(&str, &str)]) -> String {
  let mut out = tpl.to_string();
  for (k, v) in pairs {
    let needle = format!("{{{}}}", k);
    out = out.replace(&needle, v);
  }
  out
}

/// Whitespace-separated word count. Good enough for prose length checks.
pub fn word_count(s: &str) -> usize {
  s.split_whitespace().count()
}

/// Strip a leading/trailing markdown code fence (``` or ```json) plus
/// surrounding quotes. Generative models love to wrap structured output in
/// them even when told not to.
pub fn strip_code_fences(raw: &str) -> &str {
  let mut s = raw.trim();
  if let Some(rest) = s.strip_prefix("```json") {
    s = rest;
  } else if let Some(rest) = s.strip_prefix("```") {
    s = rest;
  }
  if let Some(rest) = s.strip_suffix("```") {
    s = rest;
  }
  s = s.trim();
  // Some responses arrive wrapped in a single pair of quotes.
  if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
    s = &s[1..s.len() - 1];
  }
  s.trim()
}

/// Log-safe truncation for large strings.
/// Avoids spamming logs with huge request/response payloads.
pub fn trunc_for_log(s: &str, max: usize) -> String {
  if s.chars().count() <= max {
    s.to_string()
  } else {
    let head: String = s.chars().take(max).collect();
    format!("{}… ({} bytes total)", head, s.len())
  }
}

/// First `max` characters of a passage, for history snippets.
pub fn snippet(s: &str, max: usize) -> String {
  s.chars().take(max).collect()
}
