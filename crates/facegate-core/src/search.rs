//! Gallery search: recency-biased ordering, bounded scan, early exit.

use crate::threshold::Threshold;
use crate::types::EnrolledIdentity;
use std::collections::VecDeque;

/// Most identities compared in one identification.
pub const MAX_CANDIDATES: usize = 10;
/// A score above this ends the scan.
pub const EARLY_EXIT_SCORE: f32 = 0.85;
pub const RECENT_MATCH_CAPACITY: usize = 5;

/// Keys of recently matched identities, most recent first.
///
/// Only an ordering hint: it never decides a match.
#[derive(Debug, Clone)]
pub struct RecentMatchCache {
    keys: VecDeque<String>,
    capacity: usize,
}

impl RecentMatchCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            keys: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Move `key` to the front, dropping the oldest entries past capacity.
    pub fn promote(&mut self, key: &str) {
        if let Some(pos) = self.keys.iter().position(|k| k == key) {
            self.keys.remove(pos);
        }
        self.keys.push_front(key.to_string());
        self.keys.truncate(self.capacity);
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Default for RecentMatchCache {
    fn default() -> Self {
        Self::new(RECENT_MATCH_CAPACITY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchPolicy {
    pub max_candidates: usize,
    pub early_exit: f32,
}

impl Default for SearchPolicy {
    fn default() -> Self {
        Self {
            max_candidates: MAX_CANDIDATES,
            early_exit: EARLY_EXIT_SCORE,
        }
    }
}

impl SearchPolicy {
    /// Early-exit cutover for `threshold`: never below the threshold itself,
    /// so an early exit is always an acceptance.
    pub fn cutover(&self, threshold: Threshold) -> f32 {
        self.early_exit.max(threshold.value())
    }
}

/// Recent identities first (cache order), then the rest of the gallery in
/// its own order, truncated to `cap`. No gallery entry appears twice.
pub fn candidate_order<'a>(
    gallery: &'a [EnrolledIdentity],
    recent: &RecentMatchCache,
    cap: usize,
) -> Vec<&'a EnrolledIdentity> {
    let mut taken = vec![false; gallery.len()];
    let mut order = Vec::with_capacity(gallery.len().min(cap));

    for key in recent.keys() {
        if let Some(idx) = gallery
            .iter()
            .enumerate()
            .position(|(i, id)| !taken[i] && id.key == key)
        {
            taken[idx] = true;
            order.push(idx);
        }
    }
    order.extend((0..gallery.len()).filter(|&i| !taken[i]));
    order.truncate(cap);

    order.into_iter().map(|i| &gallery[i]).collect()
}

/// What a scan found.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport<'a> {
    /// Highest-scoring candidate, if any candidate could be scored.
    pub best: Option<&'a EnrolledIdentity>,
    pub best_score: f32,
    /// `best` cleared the threshold.
    pub accepted: bool,
    pub compared: usize,
    pub skipped: usize,
    pub early_exit: bool,
}

impl<'a> ScanReport<'a> {
    pub fn matched(&self) -> Option<&'a EnrolledIdentity> {
        self.best.filter(|_| self.accepted)
    }
}

/// Score candidates in order. `score` returns `None` for a candidate that
/// cannot be scored (unreadable image, no face); it is skipped.
pub fn scan<'a, F>(
    candidates: &[&'a EnrolledIdentity],
    threshold: Threshold,
    policy: &SearchPolicy,
    mut score: F,
) -> ScanReport<'a>
where
    F: FnMut(&EnrolledIdentity) -> Option<f32>,
{
    let cutover = policy.cutover(threshold);
    let mut report = ScanReport {
        best: None,
        best_score: 0.0,
        accepted: false,
        compared: 0,
        skipped: 0,
        early_exit: false,
    };

    for &candidate in candidates {
        let Some(s) = score(candidate) else {
            report.skipped += 1;
            continue;
        };
        report.compared += 1;
        tracing::debug!(key = %candidate.key, score = s, "candidate scored");

        if report.best.is_none() || s > report.best_score {
            report.best = Some(candidate);
            report.best_score = s;
        }
        if s > cutover {
            report.early_exit = true;
            break;
        }
    }

    report.accepted = report.best.is_some() && threshold.accepts(report.best_score);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn gallery(n: usize) -> Vec<EnrolledIdentity> {
        (0..n)
            .map(|i| EnrolledIdentity {
                key: format!("w{i}"),
                display_name: format!("User {i}"),
                image_path: PathBuf::from(format!("/faces/{i}.jpg")),
            })
            .collect()
    }

    fn keys(order: &[&EnrolledIdentity]) -> Vec<String> {
        order.iter().map(|id| id.key.clone()).collect()
    }

    #[test]
    fn test_cache_promote_orders_and_bounds() {
        let mut cache = RecentMatchCache::default();
        for i in 0..7 {
            cache.promote(&format!("w{i}"));
        }
        assert_eq!(cache.len(), RECENT_MATCH_CAPACITY);
        assert_eq!(cache.keys().collect::<Vec<_>>(), ["w6", "w5", "w4", "w3", "w2"]);

        cache.promote("w3");
        assert_eq!(cache.keys().collect::<Vec<_>>(), ["w3", "w6", "w5", "w4", "w2"]);
    }

    #[test]
    fn test_candidate_order_recent_first_then_gallery_order() {
        let g = gallery(5);
        let mut cache = RecentMatchCache::default();
        cache.promote("w3");
        cache.promote("w1");
        let order = candidate_order(&g, &cache, MAX_CANDIDATES);
        assert_eq!(keys(&order), ["w1", "w3", "w0", "w2", "w4"]);
    }

    #[test]
    fn test_candidate_order_ignores_unknown_recent_keys() {
        let g = gallery(3);
        let mut cache = RecentMatchCache::default();
        cache.promote("gone");
        let order = candidate_order(&g, &cache, MAX_CANDIDATES);
        assert_eq!(keys(&order), ["w0", "w1", "w2"]);
    }

    #[test]
    fn test_candidate_order_caps() {
        let g = gallery(25);
        let mut cache = RecentMatchCache::default();
        cache.promote("w20");
        let order = candidate_order(&g, &cache, MAX_CANDIDATES);
        assert_eq!(order.len(), MAX_CANDIDATES);
        assert_eq!(order[0].key, "w20");
        assert_eq!(order[9].key, "w8");
    }

    #[test]
    fn test_scan_empty() {
        let report = scan(&[], Threshold::default(), &SearchPolicy::default(), |_| Some(1.0));
        assert!(report.matched().is_none());
        assert_eq!(report.compared, 0);
        assert_eq!(report.best_score, 0.0);
    }

    #[test]
    fn test_scan_picks_best_above_threshold() {
        let g = gallery(4);
        let order = candidate_order(&g, &RecentMatchCache::default(), MAX_CANDIDATES);
        let scores = [0.2, 0.7, 0.65, 0.1];
        let report = scan(&order, Threshold::default(), &SearchPolicy::default(), |id| {
            Some(scores[id.key[1..].parse::<usize>().unwrap()])
        });
        assert_eq!(report.matched().unwrap().key, "w1");
        assert_eq!(report.best_score, 0.7);
        assert_eq!(report.compared, 4);
        assert!(!report.early_exit);
    }

    #[test]
    fn test_scan_below_threshold_is_no_match() {
        let g = gallery(2);
        let order = candidate_order(&g, &RecentMatchCache::default(), MAX_CANDIDATES);
        let report = scan(&order, Threshold::default(), &SearchPolicy::default(), |_| Some(0.59));
        assert!(report.matched().is_none());
        assert_eq!(report.best.unwrap().key, "w0");
    }

    #[test]
    fn test_scan_threshold_inclusive() {
        let g = gallery(1);
        let order = candidate_order(&g, &RecentMatchCache::default(), MAX_CANDIDATES);
        let t = Threshold::new(0.5).unwrap();
        let report = scan(&order, t, &SearchPolicy::default(), |_| Some(0.5));
        assert!(report.accepted);
    }

    #[test]
    fn test_scan_early_exit_stops_comparing() {
        let g = gallery(6);
        let order = candidate_order(&g, &RecentMatchCache::default(), MAX_CANDIDATES);
        let mut calls = 0;
        let report = scan(&order, Threshold::default(), &SearchPolicy::default(), |id| {
            calls += 1;
            Some(if id.key == "w2" { 0.9 } else { 0.3 })
        });
        assert_eq!(calls, 3);
        assert!(report.early_exit);
        assert_eq!(report.matched().unwrap().key, "w2");
    }

    #[test]
    fn test_scan_exact_cutover_does_not_exit() {
        let g = gallery(3);
        let order = candidate_order(&g, &RecentMatchCache::default(), MAX_CANDIDATES);
        let report = scan(&order, Threshold::default(), &SearchPolicy::default(), |_| {
            Some(EARLY_EXIT_SCORE)
        });
        assert!(!report.early_exit);
        assert_eq!(report.compared, 3);
        assert_eq!(report.matched().unwrap().key, "w0");
    }

    #[test]
    fn test_cutover_never_below_threshold() {
        let policy = SearchPolicy::default();
        assert_eq!(policy.cutover(Threshold::new(0.6).unwrap()), EARLY_EXIT_SCORE);
        assert_eq!(policy.cutover(Threshold::new(0.95).unwrap()), 0.95);
    }

    #[test]
    fn test_scan_skips_unscorable_candidates() {
        let g = gallery(3);
        let order = candidate_order(&g, &RecentMatchCache::default(), MAX_CANDIDATES);
        let report = scan(&order, Threshold::default(), &SearchPolicy::default(), |id| {
            (id.key == "w2").then_some(0.7)
        });
        assert_eq!(report.skipped, 2);
        assert_eq!(report.compared, 1);
        assert_eq!(report.matched().unwrap().key, "w2");

        let none = scan(&order, Threshold::default(), &SearchPolicy::default(), |_| None);
        assert!(none.best.is_none());
        assert!(!none.accepted);
    }
}
