use std::collections::BTreeSet;

use strsim::normalized_levenshtein;

/// Upper bound on how many candidates `rank` returns.
pub const MAX_MATCHES: usize = 5;

/// Default minimum score for a candidate to be considered at all.
pub const DEFAULT_THRESHOLD: u32 = 50;

/// A candidate value with its similarity score (0-100, 100 = exact
/// normalized match). The value keeps the stored casing so a rewritten
/// query compares equal against the real data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchCandidate {
    pub value: String,
    pub score: u32,
}

/// Rank `candidates` against `target`, best first.
///
/// Both sides are uppercased before scoring. If the target shares at least
/// one whitespace token with any candidate, only those candidates are
/// considered and the token-sort score alone decides inclusion. Otherwise
/// every candidate is scored with four strategies (plain ratio, best
/// substring window, token-sort, token-set) and the maximum wins.
///
/// The result is at most [`MAX_MATCHES`] entries, sorted by score
/// descending with ties keeping input order, every entry `>= threshold`.
/// Pure and deterministic.
pub fn rank(target: &str, candidates: &[String], threshold: u32) -> Vec<MatchCandidate> {
    if target.trim().is_empty() || candidates.is_empty() {
        return Vec::new();
    }

    let norm_target = target.to_uppercase();
    let target_tokens: BTreeSet<&str> = norm_target.split_whitespace().collect();

    // Token-overlap short-circuit: candidates sharing a token are scored by
    // token-sort only, and if any survive the remaining strategies are
    // skipped for this call.
    let mut overlap = Vec::new();
    for candidate in candidates {
        let norm = candidate.to_uppercase();
        if norm.trim().is_empty() {
            continue;
        }
        let shares_token = norm
            .split_whitespace()
            .any(|tok| target_tokens.contains(tok));
        if shares_token {
            let score = token_sort_ratio(&norm_target, &norm);
            if score >= threshold {
                overlap.push(MatchCandidate {
                    value: candidate.clone(),
                    score,
                });
            }
        }
    }
    if !overlap.is_empty() {
        return finish(overlap);
    }

    let mut matches = Vec::new();
    for candidate in candidates {
        let norm = candidate.to_uppercase();
        if norm.trim().is_empty() {
            continue;
        }
        let best = ratio(&norm_target, &norm)
            .max(partial_ratio(&norm_target, &norm))
            .max(token_sort_ratio(&norm_target, &norm))
            .max(token_set_ratio(&norm_target, &norm));
        if best >= threshold {
            matches.push(MatchCandidate {
                value: candidate.clone(),
                score: best,
            });
        }
    }
    finish(matches)
}

fn finish(mut matches: Vec<MatchCandidate>) -> Vec<MatchCandidate> {
    // sort_by is stable, so equal scores keep candidate input order.
    matches.sort_by(|a, b| b.score.cmp(&a.score));
    matches.truncate(MAX_MATCHES);
    matches
}

/// Character-alignment similarity of the full strings, 0-100.
fn ratio(a: &str, b: &str) -> u32 {
    (normalized_levenshtein(a, b) * 100.0).round() as u32
}

/// Best alignment between the shorter string and any equal-length window
/// of the longer one.
fn partial_ratio(a: &str, b: &str) -> u32 {
    let (short, long) = if a.chars().count() <= b.chars().count() {
        (a, b)
    } else {
        (b, a)
    };
    let short_len = short.chars().count();
    let long_chars: Vec<char> = long.chars().collect();
    if short_len == 0 {
        return 0;
    }
    if short_len == long_chars.len() {
        return ratio(short, long);
    }

    let mut best = 0;
    for window in long_chars.windows(short_len) {
        let slice: String = window.iter().collect();
        best = best.max(ratio(short, &slice));
        if best == 100 {
            break;
        }
    }
    best
}

/// Alignment of the two strings with their tokens sorted alphabetically,
/// which makes the comparison word-order insensitive.
fn token_sort_ratio(a: &str, b: &str) -> u32 {
    ratio(&sorted_tokens(a), &sorted_tokens(b))
}

/// Order- and duplicate-insensitive comparison built from the token-set
/// intersection and the two one-sided differences.
fn token_set_ratio(a: &str, b: &str) -> u32 {
    let set_a: BTreeSet<&str> = a.split_whitespace().collect();
    let set_b: BTreeSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0;
    }

    let intersection = join_sorted(set_a.intersection(&set_b).copied());
    let only_a = join_sorted(set_a.difference(&set_b).copied());
    let only_b = join_sorted(set_b.difference(&set_a).copied());

    let combined_a = combine(&intersection, &only_a);
    let combined_b = combine(&intersection, &only_b);

    ratio(&intersection, &combined_a)
        .max(ratio(&intersection, &combined_b))
        .max(ratio(&combined_a, &combined_b))
}

fn sorted_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// BTreeSet iteration is already sorted; just stitch the tokens back up.
fn join_sorted<'a>(iter: impl Iterator<Item = &'a str>) -> String {
    iter.collect::<Vec<_>>().join(" ")
}

fn combine(base: &str, rest: &str) -> String {
    if base.is_empty() {
        rest.to_string()
    } else if rest.is_empty() {
        base.to_string()
    } else {
        format!("{} {}", base, rest)
    }
}
