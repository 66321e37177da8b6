//! Task-name sanitization for worktree directory basenames (spec.md §4.2).

/// Lowercase, collapse runs of non-alphanumeric characters to a single `-`,
/// strip leading/trailing `-`, truncate to 50 characters without a trailing
/// `-`.
pub fn sanitize_task_name(name: &str) -> String {
    let lower = name.to_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut last_was_dash = false;
    for c in lower.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }

    let trimmed = out.trim_matches('-');
    let mut truncated = trimmed.chars().take(50).collect::<String>();
    while truncated.ends_with('-') {
        truncated.pop();
    }
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_and_trims() {
        assert_eq!(sanitize_task_name("  Add User Auth!!  "), "add-user-auth");
        assert_eq!(sanitize_task_name("T001"), "t001");
        assert_eq!(sanitize_task_name("---leading-and-trailing---"), "leading-and-trailing");
    }

    #[test]
    fn truncates_to_fifty_without_trailing_dash() {
        let long = "a".repeat(60);
        let result = sanitize_task_name(&long);
        assert_eq!(result.len(), 50);

        let long_with_boundary_dash = format!("{}-{}", "a".repeat(49), "b".repeat(10));
        let result = sanitize_task_name(&long_with_boundary_dash);
        assert!(result.len() <= 50);
        assert!(!result.ends_with('-'));
    }

    #[test]
    fn sanitization_contract_property() {
        // Property from spec.md §8: basename matches
        // ^[a-z0-9]([a-z0-9-]{0,48}[a-z0-9])?$ and length <= 50.
        let re = regex::Regex::new(r"^[a-z0-9]([a-z0-9-]{0,48}[a-z0-9])?$").unwrap();
        let samples = [
            "Fix Auth Bug #42",
            "___",
            "UPPER_CASE_NAME",
            "a",
            "a very long task name that keeps going and going and going past fifty chars",
            "trailing---",
            "123-456",
        ];
        for sample in samples {
            let sanitized = sanitize_task_name(sample);
            if sanitized.is_empty() {
                continue;
            }
            assert!(sanitized.len() <= 50, "too long: {sanitized}");
            assert!(re.is_match(&sanitized), "failed pattern: {sanitized}");
        }
    }
}
