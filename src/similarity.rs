//! Fast string similarity calculation
//!
//! Character-level sequence similarity and keyword-overlap scoring used by
//! the matching engine. All functions are pure.

use ahash::AHashSet;
use once_cell::sync::Lazy;
use regex::Regex;

static HAN_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\p{Han}{2,}").expect("Invalid regex pattern"));
static ASCII_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z]{2,}").expect("Invalid regex pattern"));
static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").expect("Invalid regex pattern"));

/// Generic words that carry no identifying signal in cinema or film names.
const STOPWORDS: &[&str] = &[
    "影城", "影院", "电影", "电影院", "电影城", "国际", "国际影城", "影视", "影视城", "中心",
    "有限公司", "公司", "分店", "的",
];

/// Similarity between two names in [0, 1].
///
/// Sequence ratio of the lowercased strings, scaled down by
/// `1 - 0.3 * |len(a) - len(b)| / max(len(a), len(b))`.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();

    if a_lower == b_lower {
        return 1.0;
    }

    let ratio = sequence_ratio(&a_lower, &b_lower);

    let a_len = a_lower.chars().count();
    let b_len = b_lower.chars().count();
    let longest = a_len.max(b_len);
    if longest == 0 {
        return ratio;
    }
    let penalty = a_len.abs_diff(b_len) as f64 / longest as f64;

    (ratio * (1.0 - 0.3 * penalty)).clamp(0.0, 1.0)
}

/// Calculate sequence similarity ratio (similar to difflib.SequenceMatcher.ratio)
///
/// Uses longest common subsequence instead of full Ratcliff-Obershelp for speed.
pub fn sequence_ratio(s1: &str, s2: &str) -> f64 {
    if s1.is_empty() && s2.is_empty() {
        return 1.0;
    }
    if s1.is_empty() || s2.is_empty() {
        return 0.0;
    }

    let lcs_len = longest_common_subsequence(s1, s2);
    let total_len = s1.chars().count() + s2.chars().count();

    (2.0 * lcs_len as f64) / total_len as f64
}

/// Calculate length of longest common subsequence (LCS)
fn longest_common_subsequence(s1: &str, s2: &str) -> usize {
    let s1_chars: Vec<char> = s1.chars().collect();
    let s2_chars: Vec<char> = s2.chars().collect();

    let m = s1_chars.len();
    let n = s2_chars.len();

    // Use dynamic programming with space optimization
    let mut prev = vec![0; n + 1];
    let mut curr = vec![0; n + 1];

    for i in 1..=m {
        for j in 1..=n {
            if s1_chars[i - 1] == s2_chars[j - 1] {
                curr[j] = prev[j - 1] + 1;
            } else {
                curr[j] = prev[j].max(curr[j - 1]);
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Keyword set of a name: Han runs of two or more characters together with
/// their two-character windows, uppercased ASCII words, and digit runs.
/// Stopwords are dropped.
pub fn extract_keywords(text: &str) -> AHashSet<String> {
    let mut keywords = AHashSet::new();

    for run in HAN_RUN.find_iter(text) {
        let run_str = run.as_str();
        if !STOPWORDS.contains(&run_str) {
            keywords.insert(run_str.to_string());
        }

        let chars: Vec<char> = run_str.chars().collect();
        for window in chars.windows(2) {
            let token: String = window.iter().collect();
            if !STOPWORDS.contains(&token.as_str()) {
                keywords.insert(token);
            }
        }
    }

    for word in ASCII_RUN.find_iter(text) {
        keywords.insert(word.as_str().to_uppercase());
    }

    for digits in DIGIT_RUN.find_iter(text) {
        keywords.insert(digits.as_str().to_string());
    }

    keywords
}

/// Jaccard similarity of the keyword sets plus 0.1 for every shared keyword
/// of three or more characters, capped at 0.9.
pub fn keyword_score(a: &str, b: &str) -> f64 {
    keyword_score_detail(a, b).0
}

/// [`keyword_score`] together with the shared keywords, longest first.
pub fn keyword_score_detail(a: &str, b: &str) -> (f64, Vec<String>) {
    let a_keywords = extract_keywords(a);
    let b_keywords = extract_keywords(b);

    if a_keywords.is_empty() || b_keywords.is_empty() {
        return (0.0, Vec::new());
    }

    let mut shared: Vec<String> = a_keywords.intersection(&b_keywords).cloned().collect();
    let union = a_keywords.union(&b_keywords).count();
    let jaccard = shared.len() as f64 / union as f64;

    let long_shared = shared.iter().filter(|k| k.chars().count() >= 3).count();
    let score = (jaccard + 0.1 * long_shared as f64).min(0.9);

    shared.sort_by(|x, y| y.chars().count().cmp(&x.chars().count()).then_with(|| x.cmp(y)));
    (score, shared)
}
