//! Candidate matcher - ranks candidate records against a target name
//!
//! Each candidate is scored by the strongest applicable strategy: exact
//! equality, alias table, brand table, text similarity, then keyword overlap
//! as a fallback. Results are memoised per (stage, target, candidate list).

use std::time::{Duration, Instant};

use ahash::{AHashMap, RandomState};
use serde::{Deserialize, Serialize};

use crate::brands::{alias_match, brand_match, brand_score_detail, extract_brand, resolve_alias};
use crate::config::MatcherConfig;
use crate::similarity::{keyword_score_detail, text_similarity};
use crate::types::{Candidate, MatchCandidate, MatchType, Stage};

/// Per-reason confidence bonus and its cap.
const REASON_BONUS: f64 = 0.02;
const MAX_REASON_BONUS: f64 = 0.1;

/// How many shared keywords a keyword-match reason lists.
const MAX_KEYWORD_REASONS: usize = 3;

/// A score for one name, before it is attached to a record.
#[derive(Debug, Clone, PartialEq)]
pub struct NameScore {
    pub score: f64,
    pub match_type: MatchType,
    pub reasons: Vec<String>,
}

impl NameScore {
    fn new(score: f64, match_type: MatchType, reasons: Vec<String>) -> Self {
        Self {
            score,
            match_type,
            reasons,
        }
    }

    pub fn confidence(&self) -> f64 {
        confidence_of(self.score, self.match_type, self.reasons.len())
    }
}

/// Score scaled by the match type's multiplier, plus a small bonus per
/// supporting reason.
pub(crate) fn confidence_of(score: f64, match_type: MatchType, reason_count: usize) -> f64 {
    let bonus = (REASON_BONUS * reason_count as f64).min(MAX_REASON_BONUS);
    (score * match_type.confidence_multiplier() + bonus).clamp(0.0, 1.0)
}

/// Diagnostic counters for the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchStats {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub cache_hits: u64,
    pub average_latency_us: f64,
}

impl MatchStats {
    fn record(&mut self, elapsed: Duration, success: bool) {
        self.total_calls += 1;
        if success {
            self.successful_calls += 1;
        }
        let sample = elapsed.as_secs_f64() * 1_000_000.0;
        self.average_latency_us += (sample - self.average_latency_us) / self.total_calls as f64;
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.successful_calls as f64 / self.total_calls as f64
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    stage: Option<Stage>,
    target: String,
    fingerprint: u64,
}

#[derive(Debug, Clone)]
struct RankedIndex {
    index: usize,
    score: NameScore,
}

#[derive(Debug)]
struct CacheEntry {
    ranked: Vec<RankedIndex>,
    inserted: Instant,
}

/// Ranks candidate lists against target names.
///
/// Scoring is synchronous; the engine is owned by one cascade at a time.
#[derive(Debug)]
pub struct MatchingEngine {
    config: MatcherConfig,
    cache: AHashMap<CacheKey, CacheEntry>,
    hasher: RandomState,
    stats: MatchStats,
}

impl MatchingEngine {
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            config,
            cache: AHashMap::new(),
            hasher: RandomState::new(),
            stats: MatchStats::default(),
        }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn stats(&self) -> &MatchStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats = MatchStats::default();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Drop every cached result.
    pub fn clear(&mut self) {
        self.cache.clear();
    }

    /// Drop cached results older than the configured TTL. Returns how many
    /// were removed; a no-op without a TTL.
    pub fn sweep_expired(&mut self) -> usize {
        let Some(ttl) = self.config.cache_ttl() else {
            return 0;
        };
        let before = self.cache.len();
        self.cache.retain(|_, entry| entry.inserted.elapsed() < ttl);
        before - self.cache.len()
    }

    /// Candidates scoring above `candidate_cutoff`, best first.
    pub fn find_candidates<T: Candidate + Clone>(
        &mut self,
        target: &str,
        candidates: &[T],
    ) -> Vec<MatchCandidate<T>> {
        self.find_candidates_scoped(None, target, candidates)
    }

    /// [`find_candidates`](Self::find_candidates) with results cached per stage.
    pub fn find_candidates_in<T: Candidate + Clone>(
        &mut self,
        stage: Stage,
        target: &str,
        candidates: &[T],
    ) -> Vec<MatchCandidate<T>> {
        self.find_candidates_scoped(Some(stage), target, candidates)
    }

    /// Top candidate if it scores at least `min_match_score`.
    pub fn best_match<T: Candidate + Clone>(
        &mut self,
        target: &str,
        candidates: &[T],
    ) -> Option<MatchCandidate<T>> {
        self.best_match_scoped(None, target, candidates)
    }

    /// [`best_match`](Self::best_match) with results cached per stage.
    pub fn best_match_in<T: Candidate + Clone>(
        &mut self,
        stage: Stage,
        target: &str,
        candidates: &[T],
    ) -> Option<MatchCandidate<T>> {
        self.best_match_scoped(Some(stage), target, candidates)
    }

    fn find_candidates_scoped<T: Candidate + Clone>(
        &mut self,
        stage: Option<Stage>,
        target: &str,
        candidates: &[T],
    ) -> Vec<MatchCandidate<T>> {
        let started = Instant::now();
        let ranked = self.rank(stage, target, candidates);
        let results = materialize(&ranked, candidates);
        self.stats.record(started.elapsed(), !results.is_empty());
        results
    }

    fn best_match_scoped<T: Candidate + Clone>(
        &mut self,
        stage: Option<Stage>,
        target: &str,
        candidates: &[T],
    ) -> Option<MatchCandidate<T>> {
        let started = Instant::now();
        let ranked = self.rank(stage, target, candidates);
        let best = ranked
            .first()
            .filter(|top| top.score.score >= self.config.min_match_score)
            .and_then(|top| materialize(std::slice::from_ref(top), candidates).pop());
        self.stats.record(started.elapsed(), best.is_some());

        match &best {
            Some(m) => tracing::debug!(
                target_name = target,
                matched = %m.record.primary_name(),
                score = m.score,
                match_type = %m.match_type,
                "best match found"
            ),
            None => tracing::debug!(target_name = target, "no confident match"),
        }
        best
    }

    /// Ranked (index, score) pairs above the candidate cutoff, from cache
    /// when the same target was ranked against the same list before.
    fn rank<T: Candidate>(
        &mut self,
        stage: Option<Stage>,
        target: &str,
        candidates: &[T],
    ) -> Vec<RankedIndex> {
        let normalized = normalize_name(target);
        if normalized.is_empty() || candidates.is_empty() {
            return Vec::new();
        }

        let key = CacheKey {
            stage,
            target: normalized,
            fingerprint: self.fingerprint(candidates),
        };

        let ttl = self.config.cache_ttl();
        if let Some(entry) = self.cache.get(&key) {
            let fresh = ttl.map_or(true, |ttl| entry.inserted.elapsed() < ttl);
            if fresh {
                self.stats.cache_hits += 1;
                return entry.ranked.clone();
            }
        }

        let mut ranked: Vec<RankedIndex> = candidates
            .iter()
            .enumerate()
            .filter_map(|(index, candidate)| {
                let score = self.score_name(target, &candidate.primary_name())?;
                (score.score > self.config.candidate_cutoff).then_some(RankedIndex { index, score })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.score
                .score
                .partial_cmp(&a.score.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.score.match_type.priority().cmp(&b.score.match_type.priority()))
                .then_with(|| a.index.cmp(&b.index))
        });

        self.insert_cached(key, ranked.clone());
        ranked
    }

    fn insert_cached(&mut self, key: CacheKey, ranked: Vec<RankedIndex>) {
        if self.cache.len() >= self.config.cache_capacity && !self.cache.contains_key(&key) {
            let oldest = self
                .cache
                .iter()
                .min_by_key(|(_, entry)| entry.inserted)
                .map(|(key, _)| key.clone());
            if let Some(oldest) = oldest {
                self.cache.remove(&oldest);
            }
        }
        self.cache.insert(
            key,
            CacheEntry {
                ranked,
                inserted: Instant::now(),
            },
        );
    }

    fn fingerprint<T: Candidate>(&self, candidates: &[T]) -> u64 {
        let names: Vec<_> = candidates.iter().map(|c| c.primary_name()).collect();
        self.hasher.hash_one(&names)
    }

    /// Score one candidate name against a target. `None` when the candidate
    /// has no usable name.
    pub fn score_name(&self, target: &str, candidate_name: &str) -> Option<NameScore> {
        let target_norm = normalize_name(target);
        let candidate_norm = normalize_name(candidate_name);
        if target_norm.is_empty() || candidate_norm.is_empty() {
            return None;
        }

        if target_norm == candidate_norm {
            return Some(NameScore::new(1.0, MatchType::Exact, vec!["名称完全一致".to_string()]));
        }

        if alias_match(&target_norm, &candidate_norm) {
            let standard = resolve_alias(&target_norm)
                .map(|entry| entry.standard_name)
                .unwrap_or_default();
            return Some(NameScore::new(
                0.95,
                MatchType::Alias,
                vec![format!("别名匹配: {standard}")],
            ));
        }

        let mut best: Option<NameScore> = None;

        if let Some(brand) = extract_brand(&target_norm) {
            if brand_match(brand, &candidate_norm) {
                let (score, reasons) = brand_score_detail(&target_norm, &candidate_norm, brand);
                if score > self.config.brand_cutoff {
                    best = Some(NameScore::new(score, MatchType::Brand, reasons));
                }
            }
        }

        let similarity = text_similarity(&target_norm, &candidate_norm);
        let beats_brand = best.as_ref().map_or(true, |b| similarity > b.score);
        if similarity > self.config.fuzzy_cutoff && beats_brand {
            best = Some(NameScore::new(
                similarity,
                MatchType::Fuzzy,
                vec![format!("文本相似度: {similarity:.2}")],
            ));
        }

        let current_score = best.as_ref().map_or(0.0, |b| b.score);
        if current_score < self.config.keyword_fallback_below {
            let (score, shared) = keyword_score_detail(&target_norm, &candidate_norm);
            if score > current_score {
                let listed: Vec<&str> = shared
                    .iter()
                    .take(MAX_KEYWORD_REASONS)
                    .map(String::as_str)
                    .collect();
                best = Some(NameScore::new(
                    score,
                    MatchType::Keyword,
                    vec![format!("关键词重合: {}", listed.join("、"))],
                ));
            }
        }

        best
    }
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self::new(MatcherConfig::default())
    }
}

fn materialize<T: Clone>(ranked: &[RankedIndex], candidates: &[T]) -> Vec<MatchCandidate<T>> {
    ranked
        .iter()
        .filter_map(|r| {
            let record = candidates.get(r.index)?.clone();
            Some(MatchCandidate {
                record,
                score: r.score.score,
                match_type: r.score.match_type,
                confidence: r.score.confidence(),
                reasons: r.score.reasons.clone(),
            })
        })
        .collect()
}

/// Trim, lowercase, fold full-width brackets and collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    let folded: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '（' => '(',
            '）' => ')',
            '\u{3000}' => ' ',
            other => other,
        })
        .collect::<String>()
        .to_lowercase();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_exact_match_ranks_first() {
        let mut engine = MatchingEngine::default();
        let candidates = names(&["万达影城(通州店)", "万达", "CGV影城"]);
        let results = engine.find_candidates("万达", &candidates);

        assert_eq!(results[0].record, "万达");
        assert_eq!(results[0].score, 1.0);
        assert_eq!(results[0].match_type, MatchType::Exact);
        assert_eq!(results[0].confidence, 1.0);
    }

    #[test]
    fn test_alias_match() {
        let mut engine = MatchingEngine::default();
        let candidates = names(&["CGV影城", "万达影城"]);
        let best = engine.best_match("万达电影", &candidates).unwrap();

        assert_eq!(best.record, "万达影城");
        assert_eq!(best.match_type, MatchType::Alias);
        assert!((best.score - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_brand_match_prefers_same_branch() {
        let mut engine = MatchingEngine::default();
        let candidates = names(&["万达影城(通州店)", "万达影城（CBD店）", "CGV影城(CBD店)"]);
        let results = engine.find_candidates("万达影城(CBD店)", &candidates);

        // Full-width brackets fold to the target's form.
        assert_eq!(results[0].record, "万达影城（CBD店）");
        assert_eq!(results[0].match_type, MatchType::Exact);
        assert_eq!(results[1].record, "万达影城(通州店)");
        assert_eq!(results[1].match_type, MatchType::Brand);
    }

    #[test]
    fn test_brand_score_with_location() {
        let mut engine = MatchingEngine::default();
        let candidates = names(&["万达影城(通州店)", "万达影城CBD店IMAX"]);
        let best = engine.best_match("万达影城(CBD店)", &candidates).unwrap();

        assert_eq!(best.record, "万达影城CBD店IMAX");
        assert_eq!(best.match_type, MatchType::Brand);
        assert!((best.score - 0.9).abs() < 1e-9);
        assert!(best.reasons.iter().any(|r| r.starts_with("位置匹配")));
    }

    #[test]
    fn test_fuzzy_match() {
        let mut engine = MatchingEngine::default();
        let candidates = names(&["阿凡达2", "沙丘2", "哪吒之魔童闹海"]);
        let best = engine.best_match("阿凡达", &candidates).unwrap();

        assert_eq!(best.record, "阿凡达2");
        assert_eq!(best.match_type, MatchType::Fuzzy);
    }

    #[test]
    fn test_weak_similarity_is_not_fuzzy() {
        let mut engine = MatchingEngine::default();
        // similarity (4/6) * (1 - 0.3 * 0.5) = 0.567, under the fuzzy cutoff
        assert!(text_similarity("星际", "星际穿越") < 0.6);

        let score = engine.score_name("星际", "星际穿越");
        assert!(score.map_or(true, |s| s.match_type != MatchType::Fuzzy));
        assert!(engine.find_candidates("星际", &names(&["星际穿越"])).is_empty());
    }

    #[test]
    fn test_keyword_fallback() {
        let engine = MatchingEngine::default();
        let score = engine
            .score_name("阿凡达：水之道", "阿凡达 水之道 IMAX 3D 版")
            .unwrap();
        assert_eq!(score.match_type, MatchType::Keyword);
        assert!(score.score > 0.6);
    }

    #[test]
    fn test_returns_none_below_threshold() {
        let mut engine = MatchingEngine::default();
        let candidates = names(&["沙丘2", "哪吒之魔童闹海", "Dune"]);
        assert!(engine.best_match("阿凡达", &candidates).is_none());
        assert!(engine.best_match("阿凡达", &Vec::<String>::new()).is_none());
        assert!(engine.best_match("", &candidates).is_none());
    }

    #[test]
    fn test_confidence_uses_type_multiplier() {
        let score = NameScore::new(0.8, MatchType::Fuzzy, vec!["a".to_string()]);
        assert!((score.confidence() - (0.8 * 0.75 + 0.02)).abs() < 1e-9);

        let many = NameScore::new(0.5, MatchType::Keyword, vec![String::new(); 8]);
        assert!((many.confidence() - (0.5 * 0.65 + 0.1)).abs() < 1e-9);
    }

    #[test]
    fn test_cache_hit_skips_rescoring() {
        let mut engine = MatchingEngine::default();
        let candidates = names(&["万达影城", "CGV影城"]);

        let first = engine.find_candidates_in(Stage::Cinema, "万达影城", &candidates);
        let second = engine.find_candidates_in(Stage::Cinema, " 万达影城 ", &candidates);

        assert_eq!(first, second);
        assert_eq!(engine.stats().cache_hits, 1);
        assert_eq!(engine.stats().total_calls, 2);
        assert_eq!(engine.cache_len(), 1);

        engine.clear();
        assert_eq!(engine.cache_len(), 0);
    }

    #[test]
    fn test_cache_distinguishes_candidate_lists() {
        let mut engine = MatchingEngine::default();
        let first = names(&["万达影城"]);
        let second = names(&["CGV影城"]);

        assert!(engine.best_match("万达影城", &first).is_some());
        assert!(engine.best_match("万达影城", &second).is_none());
        assert_eq!(engine.stats().cache_hits, 0);
    }

    #[test]
    fn test_cache_capacity_evicts_oldest() {
        let mut engine = MatchingEngine::new(MatcherConfig {
            cache_capacity: 2,
            ..Default::default()
        });
        let candidates = names(&["万达影城"]);
        engine.find_candidates("a", &candidates);
        engine.find_candidates("b", &candidates);
        engine.find_candidates("c", &candidates);
        assert_eq!(engine.cache_len(), 2);
    }

    #[test]
    fn test_sweep_expired() {
        let mut engine = MatchingEngine::new(MatcherConfig {
            cache_ttl_secs: Some(0),
            ..Default::default()
        });
        engine.find_candidates("万达", &names(&["万达"]));
        assert_eq!(engine.sweep_expired(), 1);

        let mut lifetime = MatchingEngine::default();
        lifetime.find_candidates("万达", &names(&["万达"]));
        assert_eq!(lifetime.sweep_expired(), 0);
        assert_eq!(lifetime.cache_len(), 1);
    }

    #[test]
    fn test_stats_success_rate() {
        let mut engine = MatchingEngine::default();
        let candidates = names(&["万达影城"]);
        engine.best_match("万达影城", &candidates);
        engine.best_match("沙丘", &candidates);

        assert_eq!(engine.stats().total_calls, 2);
        assert_eq!(engine.stats().successful_calls, 1);
        assert!((engine.stats().success_rate() - 0.5).abs() < 1e-9);

        engine.reset_stats();
        assert_eq!(engine.stats().total_calls, 0);
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  万达影城（CBD店）  IMAX "), "万达影城(cbd店) imax");
    }
}
