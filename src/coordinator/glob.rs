//! Path glob matching for watch subscriptions.
//!
//! Two wildcards are supported: `*` matches exactly one path segment and
//! `**` matches any remaining suffix (including none). Everything else is a
//! literal segment match.

/// Whether `path` matches the glob `pattern`. Both are absolute,
/// `/`-separated paths.
pub fn matches(pattern: &str, path: &str) -> bool {
    let pat: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let segs: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    match_segments(&pat, &segs)
}

fn match_segments(pat: &[&str], segs: &[&str]) -> bool {
    match pat.split_first() {
        None => segs.is_empty(),
        Some((&"**", _)) => true,
        Some((head, rest)) => match segs.split_first() {
            None => false,
            Some((seg, seg_rest)) => {
                (*head == "*" || head == seg) && match_segments(rest, seg_rest)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::matches;

    #[test]
    fn double_star_matches_everything() {
        assert!(matches("/**", "/apps/a/registered"));
        assert!(matches("/**", "/next-port"));
    }

    #[test]
    fn rooted_double_star_matches_subtree_only() {
        assert!(matches("/event-test/**", "/event-test/apps/a/registered"));
        assert!(!matches("/event-test/**", "/other/apps/a/registered"));
    }

    #[test]
    fn single_star_matches_one_segment() {
        assert!(matches("/runners/*/*", "/runners/10.0.0.1/9999"));
        assert!(!matches("/runners/*/*", "/runners/10.0.0.1"));
        assert!(!matches("/runners/*/*", "/runners/10.0.0.1/9999/extra"));
    }

    #[test]
    fn literal_paths_match_exactly() {
        assert!(matches("/instances/8/start", "/instances/8/start"));
        assert!(!matches("/instances/8/start", "/instances/9/start"));
    }
}
