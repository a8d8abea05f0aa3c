//! Glob-style key pattern matching.
//!
//! Invalidation patterns use the same subset Redis `SCAN MATCH`
//! understands in practice here: `*` matches any run of characters,
//! `?` matches exactly one. The in-memory store and the process-local
//! cache tier use this matcher; Redis evaluates the pattern server-side.

/// Returns `true` if `key` matches the glob `pattern`.
pub fn key_pattern_matches(pattern: &str, key: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let k: Vec<char> = key.chars().collect();

    // Iterative backtracking matcher: remember the last `*` position and
    // re-expand it when a later literal fails to match.
    let (mut pi, mut ki) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while ki < k.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == k[ki]) {
            pi += 1;
            ki += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ki));
            pi += 1;
        } else if let Some((star_pi, star_ki)) = star {
            pi = star_pi + 1;
            ki = star_ki + 1;
            star = Some((star_pi, star_ki + 1));
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}
