/// Find the pre-image `pattern` within `lines` at or after `start`, trying
/// decreasing strictness: exact first, then ignoring trailing whitespace,
/// then ignoring whitespace on both sides. Hunk start lines in a diff are
/// hints, not guarantees, so the apply step seeks rather than indexes.
///
/// Empty patterns match in place; patterns longer than the input never match.
pub(crate) fn seek_lines(lines: &[String], pattern: &[String], start: usize) -> Option<usize> {
    if pattern.is_empty() {
        return Some(start);
    }
    if pattern.len() > lines.len() || start > lines.len() - pattern.len() {
        return None;
    }

    let last = lines.len() - pattern.len();
    for i in start..=last {
        if lines[i..i + pattern.len()] == *pattern {
            return Some(i);
        }
    }
    for i in start..=last {
        if pattern
            .iter()
            .enumerate()
            .all(|(offset, want)| lines[i + offset].trim_end() == want.trim_end())
        {
            return Some(i);
        }
    }
    for i in start..=last {
        if pattern
            .iter()
            .enumerate()
            .all(|(offset, want)| lines[i + offset].trim() == want.trim())
        {
            return Some(i);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::seek_lines;

    fn to_vec(strings: &[&str]) -> Vec<String> {
        strings.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn exact_match_wins() {
        let lines = to_vec(&["alpha", "beta", "gamma"]);
        assert_eq!(seek_lines(&lines, &to_vec(&["beta", "gamma"]), 0), Some(1));
    }

    #[test]
    fn trailing_whitespace_is_forgiven() {
        let lines = to_vec(&["alpha   ", "beta\t"]);
        assert_eq!(seek_lines(&lines, &to_vec(&["alpha", "beta"]), 0), Some(0));
    }

    #[test]
    fn oversized_pattern_never_matches() {
        let lines = to_vec(&["only line"]);
        assert_eq!(seek_lines(&lines, &to_vec(&["a", "b"]), 0), None);
    }

    #[test]
    fn start_past_candidates_returns_none() {
        let lines = to_vec(&["alpha", "beta"]);
        assert_eq!(seek_lines(&lines, &to_vec(&["alpha"]), 2), None);
    }
}
