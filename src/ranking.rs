//! "Most relevant now" ranking
//!
//! Counts how often each script or scene was activated around the current
//! clock time on previous days, regardless of date.

use std::collections::HashMap;

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::gateway::Entity;
use crate::usage::UsageBucket;

/// Prefix shared by every hourly ranking cache key
pub const CACHE_KEY_PREFIX: &str = "most_used_";

#[derive(Debug, Clone, Copy)]
pub struct RankingSettings {
    /// Half-width of the time-of-day band around now
    pub window: Duration,
    /// How far back activations count
    pub lookback: Duration,
    pub limit: usize,
}

impl Default for RankingSettings {
    fn default() -> Self {
        Self {
            window: Duration::hours(1),
            lookback: Duration::days(30),
            limit: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntity {
    pub entity_id: String,
    pub name: String,
    pub count: u64,
}

/// A band of clock time, possibly wrapping past midnight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TimeWindow {
    pub fn around(now: NaiveTime, radius: Duration) -> Self {
        // NaiveTime arithmetic wraps around midnight
        Self {
            start: now - radius,
            end: now + radius,
        }
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= time && time <= self.end
        } else {
            time >= self.start || time <= self.end
        }
    }
}

/// Cache key for the ranking computed during `now`'s hour
pub fn cache_key(now: NaiveDateTime) -> String {
    format!("{CACHE_KEY_PREFIX}{:02}", now.hour())
}

/// Start of the lookback period
pub fn cutoff(now: NaiveDateTime, settings: &RankingSettings) -> NaiveDateTime {
    now - settings.lookback
}

/// Rank entities by activations inside the window around `now`.
///
/// `buckets` must already be restricted to the lookback period. Entities not
/// in `live` are skipped. Equal counts keep the order in which entities first
/// appear in `buckets`.
pub fn rank(
    buckets: &[UsageBucket],
    now: NaiveDateTime,
    live: &[Entity],
    settings: &RankingSettings,
) -> Vec<RankedEntity> {
    let window = TimeWindow::around(now.time(), settings.window);

    let mut totals: Vec<(&str, u64)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for bucket in buckets.iter().filter(|b| window.contains(b.time_of_day)) {
        match index.get(bucket.entity_id.as_str()) {
            Some(&i) => totals[i].1 += bucket.count,
            None => {
                index.insert(bucket.entity_id.as_str(), totals.len());
                totals.push((bucket.entity_id.as_str(), bucket.count));
            }
        }
    }

    let names: HashMap<&str, &str> = live
        .iter()
        .map(|e| (e.entity_id.as_str(), e.name.as_str()))
        .collect();

    // sort_by is stable, so ties stay in discovery order
    totals.sort_by(|a, b| b.1.cmp(&a.1));

    totals
        .into_iter()
        .filter_map(|(entity_id, count)| {
            let name = names.get(entity_id)?;
            Some(RankedEntity {
                entity_id: entity_id.to_string(),
                name: name.to_string(),
                count,
            })
        })
        .take(settings.limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn now_at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 15)
            .unwrap()
            .and_time(time(h, m))
    }

    fn bucket(entity_id: &str, h: u32, m: u32, count: u64) -> UsageBucket {
        UsageBucket {
            entity_id: entity_id.to_string(),
            time_of_day: time(h, m),
            count,
        }
    }

    fn entity(entity_id: &str, name: &str) -> Entity {
        Entity {
            entity_id: entity_id.to_string(),
            name: name.to_string(),
            area_id: None,
        }
    }

    #[test]
    fn test_window_without_wrap() {
        let window = TimeWindow::around(time(12, 0), Duration::hours(1));
        assert!(window.contains(time(11, 0)));
        assert!(window.contains(time(12, 59)));
        assert!(window.contains(time(13, 0)));
        assert!(!window.contains(time(13, 1)));
        assert!(!window.contains(time(0, 30)));
    }

    #[test]
    fn test_window_wraps_past_midnight() {
        let window = TimeWindow::around(time(0, 30), Duration::hours(1));
        assert_eq!(window.start, time(23, 30));
        assert_eq!(window.end, time(1, 30));
        assert!(window.contains(time(23, 45)));
        assert!(window.contains(time(0, 0)));
        assert!(window.contains(time(1, 15)));
        assert!(!window.contains(time(12, 0)));
        assert!(!window.contains(time(23, 0)));
    }

    #[test]
    fn test_late_evening_usage_counts_after_midnight() {
        let buckets = vec![bucket("scene.night", 23, 45, 4), bucket("script.lunch", 12, 0, 9)];
        let live = vec![entity("scene.night", "Night"), entity("script.lunch", "Lunch")];

        let ranked = rank(&buckets, now_at(0, 30), &live, &RankingSettings::default());
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].entity_id, "scene.night");
        assert_eq!(ranked[0].name, "Night");
        assert_eq!(ranked[0].count, 4);
    }

    #[test]
    fn test_counts_accumulate_across_buckets() {
        let buckets = vec![
            bucket("script.coffee", 7, 30, 3),
            bucket("script.blinds", 7, 45, 2),
            bucket("script.blinds", 8, 10, 2),
            bucket("script.coffee", 6, 50, 1),
        ];
        let live = vec![
            entity("script.coffee", "Coffee"),
            entity("script.blinds", "Blinds"),
        ];

        let ranked = rank(&buckets, now_at(7, 40), &live, &RankingSettings::default());
        assert_eq!(
            ranked,
            vec![
                RankedEntity {
                    entity_id: "script.coffee".to_string(),
                    name: "Coffee".to_string(),
                    count: 4,
                },
                RankedEntity {
                    entity_id: "script.blinds".to_string(),
                    name: "Blinds".to_string(),
                    count: 4,
                },
            ]
        );
    }

    #[test]
    fn test_unknown_entities_are_dropped() {
        let buckets = vec![bucket("script.renamed", 9, 0, 10), bucket("scene.focus", 9, 5, 1)];
        let live = vec![entity("scene.focus", "Focus")];

        let ranked = rank(&buckets, now_at(9, 0), &live, &RankingSettings::default());
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].entity_id, "scene.focus");
    }

    #[test]
    fn test_at_most_limit_entries() {
        let ids: Vec<String> = (0..8).map(|i| format!("script.s{i}")).collect();
        let buckets: Vec<UsageBucket> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| bucket(id, 18, 0, 10 - i as u64))
            .collect();
        let live: Vec<Entity> = ids.iter().map(|id| entity(id, id)).collect();

        let ranked = rank(&buckets, now_at(18, 20), &live, &RankingSettings::default());
        assert_eq!(ranked.len(), 5);
        assert_eq!(ranked[0].entity_id, "script.s0");
        assert!(ranked.windows(2).all(|w| w[0].count >= w[1].count));
    }

    #[test]
    fn test_ties_keep_discovery_order() {
        let buckets = vec![
            bucket("script.zulu", 10, 0, 2),
            bucket("script.alpha", 10, 5, 2),
            bucket("script.mike", 10, 10, 2),
        ];
        let live = vec![
            entity("script.alpha", "Alpha"),
            entity("script.mike", "Mike"),
            entity("script.zulu", "Zulu"),
        ];

        let ranked = rank(&buckets, now_at(10, 0), &live, &RankingSettings::default());
        let order: Vec<&str> = ranked.iter().map(|r| r.entity_id.as_str()).collect();
        assert_eq!(order, vec!["script.zulu", "script.alpha", "script.mike"]);
    }

    #[test]
    fn test_cache_key_varies_by_hour() {
        assert_eq!(cache_key(now_at(7, 5)), "most_used_07");
        assert_eq!(cache_key(now_at(7, 59)), "most_used_07");
        assert_eq!(cache_key(now_at(23, 0)), "most_used_23");
    }

    #[test]
    fn test_cutoff_uses_lookback() {
        let settings = RankingSettings::default();
        let now = now_at(12, 0);
        assert_eq!(cutoff(now, &settings), now - Duration::days(30));
    }
}
