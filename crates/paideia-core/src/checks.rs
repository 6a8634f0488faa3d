use crate::model::Generation;

/// Content checks over the tutor's reply. A pattern is a case-insensitive
/// substring unless prefixed with `re:`, which makes it a regex. An empty
/// pattern list yields `None` (no check defined, different from passing).
pub fn passes_required(text: &str, patterns: &[String]) -> Option<bool> {
    if patterns.is_empty() {
        return None;
    }
    Some(patterns.iter().all(|p| matches_pattern(text, p)))
}

pub fn passes_forbidden(text: &str, patterns: &[String]) -> Option<bool> {
    if patterns.is_empty() {
        return None;
    }
    Some(!patterns.iter().any(|p| matches_pattern(text, p)))
}

fn matches_pattern(text: &str, pattern: &str) -> bool {
    if let Some(expr) = pattern.strip_prefix("re:") {
        match regex::Regex::new(expr) {
            Ok(re) => re.is_match(text),
            Err(e) => {
                tracing::warn!(pattern = expr, error = %e, "invalid content-check regex, matching literally");
                text.to_lowercase().contains(&expr.to_lowercase())
            }
        }
    } else {
        text.to_lowercase().contains(&pattern.to_lowercase())
    }
}

/// Joins every suggestion message into the text the checks run against.
pub fn reply_text(generation: &Generation) -> String {
    generation
        .suggestions
        .iter()
        .map(|s| s.message.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_checks_are_case_insensitive() {
        assert_eq!(
            passes_required("Think about the Base Case first.", &["base case".into()]),
            Some(true)
        );
        assert_eq!(
            passes_required("Here is the answer.", &["base case".into()]),
            Some(false)
        );
    }

    #[test]
    fn forbidden_passes_when_absent() {
        assert_eq!(
            passes_forbidden("Try stepping through it.", &["just copy".into()]),
            Some(true)
        );
        assert_eq!(
            passes_forbidden("Just copy my version.", &["just copy".into()]),
            Some(false)
        );
    }

    #[test]
    fn empty_pattern_list_is_no_check() {
        assert_eq!(passes_required("anything", &[]), None);
        assert_eq!(passes_forbidden("anything", &[]), None);
    }

    #[test]
    fn re_prefix_switches_to_regex() {
        assert_eq!(
            passes_required("returns n - 1 here", &["re:n\\s*-\\s*1".into()]),
            Some(true)
        );
        assert_eq!(
            passes_forbidden("the answer is 42", &["re:\\d{2}".into()]),
            Some(false)
        );
    }
}
