//! Edit-distance ranking used for "did you mean" suggestions.

/// Levenshtein distance, giving up early once every cell in a row exceeds `max_dist`.
///
/// Returns `max_dist + 1` when the distance is known to be larger than `max_dist`.
pub fn levenshtein_with_max(value: &str, target: &str, max_dist: usize) -> usize {
    let target: Vec<char> = target.chars().collect();
    let n = target.len();
    if n == 0 {
        return value.chars().count().min(max_dist + 1);
    }

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr: Vec<usize> = vec![0; n + 1];

    for (i, c) in value.chars().enumerate() {
        curr[0] = i + 1;
        let mut row_min = curr[0];

        for j in 1..=n {
            let cost = usize::from(c != target[j - 1]);
            let d = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
            curr[j] = d;
            row_min = row_min.min(d);
        }

        if row_min > max_dist {
            return max_dist + 1;
        }

        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n].min(max_dist + 1)
}

pub fn levenshtein(value: &str, target: &str) -> usize {
    levenshtein_with_max(value, target, usize::MAX - 1)
}

/// The `max_items` names closest to `needle`, closest first, ties broken by name.
pub fn closest_names<'a>(
    needle: &str,
    candidates: impl IntoIterator<Item = &'a str>,
    max_items: usize,
) -> Vec<String> {
    let mut scored: Vec<(usize, &str)> = candidates
        .into_iter()
        .map(|c| (levenshtein(needle, c), c))
        .collect();
    scored.sort();
    scored.dedup();
    scored
        .into_iter()
        .take(max_items)
        .map(|(_, c)| c.to_string())
        .collect()
}
