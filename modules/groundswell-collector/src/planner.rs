//! Sampling plan generation.
//!
//! A plan is a shuffled list of listing strategies spread across sort
//! methods, time filters, pagination offsets and (optionally) historical
//! 2-day windows, so one run pulls as many unique posts as the per-account
//! quotas allow.

use rand::seq::{IndexedRandom, SliceRandom};
use rand::Rng;

const MAX_LISTING_LIMIT: u32 = 100;
const EXTRA_LISTING_LIMIT: u32 = 25;
const OFFSET_BASES: [u32; 5] = [50, 100, 200, 400, 600];
const TWO_DAYS_SECS: i64 = 2 * 24 * 3600;
const THIRTY_DAYS_SECS: i64 = 30 * 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMethod {
    Hot,
    New,
    Top,
    Rising,
    Controversial,
}

impl SortMethod {
    pub const ALL: [SortMethod; 5] = [
        SortMethod::Hot,
        SortMethod::New,
        SortMethod::Top,
        SortMethod::Rising,
        SortMethod::Controversial,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortMethod::Hot => "hot",
            SortMethod::New => "new",
            SortMethod::Top => "top",
            SortMethod::Rising => "rising",
            SortMethod::Controversial => "controversial",
        }
    }

    /// Only top/controversial listings accept a time filter.
    pub fn supports_time_filter(&self) -> bool {
        matches!(self, SortMethod::Top | SortMethod::Controversial)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFilter {
    Hour,
    Day,
    Week,
    Month,
    Year,
    All,
}

impl TimeFilter {
    pub const ALL: [TimeFilter; 6] = [
        TimeFilter::Hour,
        TimeFilter::Day,
        TimeFilter::Week,
        TimeFilter::Month,
        TimeFilter::Year,
        TimeFilter::All,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeFilter::Hour => "hour",
            TimeFilter::Day => "day",
            TimeFilter::Week => "week",
            TimeFilter::Month => "month",
            TimeFilter::Year => "year",
            TimeFilter::All => "all",
        }
    }
}

/// One listing call the harvester should make.
#[derive(Debug, Clone)]
pub struct SamplingStrategy {
    pub sub_source: String,
    pub sort: SortMethod,
    pub time_filter: Option<TimeFilter>,
    pub limit: u32,
    /// Unix-seconds window bounds; posts outside are dropped client-side.
    pub before: Option<i64>,
    pub after_ts: Option<i64>,
    /// Pagination offset into the listing.
    pub offset: Option<u32>,
}

impl SamplingStrategy {
    fn listing(sub_source: &str, sort: SortMethod, limit: u32) -> Self {
        Self {
            sub_source: sub_source.to_string(),
            sort,
            time_filter: None,
            limit: limit.min(MAX_LISTING_LIMIT),
            before: None,
            after_ts: None,
            offset: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PlanOptions {
    /// Add 5 random 2-day `sort=new` windows in the last 30 days.
    pub time_windows: bool,
    /// Add random deep-pagination offsets for hot/rising.
    pub offsets: bool,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            time_windows: true,
            offsets: true,
        }
    }
}

/// Build a shuffled sampling plan for one run.
///
/// `now_unix` anchors the historical windows so plans are reproducible in
/// tests.
pub fn build_plan(
    sub_sources: &[String],
    target_count: usize,
    now_unix: i64,
    options: PlanOptions,
) -> Vec<SamplingStrategy> {
    let mut rng = rand::rng();
    let mut plan = Vec::new();

    if sub_sources.is_empty() {
        return plan;
    }

    let target_per_sub = target_count.div_ceil(sub_sources.len());
    let base_limit = (target_per_sub.div_ceil(SortMethod::ALL.len()) as u32).max(1);

    for sub in sub_sources {
        // One strategy per sort method.
        for sort in SortMethod::ALL {
            plan.push(SamplingStrategy::listing(sub, sort, base_limit));
        }

        // Extra random time filters for the sorts that support them.
        for sort in [SortMethod::Top, SortMethod::Controversial] {
            for _ in 0..3 {
                let filter = *TimeFilter::ALL.choose(&mut rng).unwrap_or(&TimeFilter::Day);
                let mut s = SamplingStrategy::listing(sub, sort, base_limit);
                s.time_filter = Some(filter);
                plan.push(s);
            }
        }

        // Two extra shallow pulls from the fast-moving sorts.
        let fast = [SortMethod::New, SortMethod::Hot, SortMethod::Rising];
        for _ in 0..2 {
            let sort = *fast.choose(&mut rng).unwrap_or(&SortMethod::New);
            plan.push(SamplingStrategy::listing(sub, sort, EXTRA_LISTING_LIMIT));
        }

        // Historical 2-day windows, newest-first listing filtered client-side.
        if options.time_windows {
            for _ in 0..5 {
                let start_ago = rng.random_range(TWO_DAYS_SECS..THIRTY_DAYS_SECS);
                let window_start = now_unix - start_ago;
                let mut s = SamplingStrategy::listing(sub, SortMethod::New, MAX_LISTING_LIMIT);
                s.after_ts = Some(window_start);
                s.before = Some(window_start + TWO_DAYS_SECS);
                plan.push(s);
            }
        }

        // Deep-pagination offsets to reach past the first pages.
        if options.offsets {
            for sort in [SortMethod::Hot, SortMethod::Rising] {
                let base = *OFFSET_BASES.choose(&mut rng).unwrap_or(&50);
                let mut s = SamplingStrategy::listing(sub, sort, MAX_LISTING_LIMIT);
                s.offset = Some(base + rng.random_range(0..50));
                plan.push(s);
            }
        }
    }

    // Shuffle so consecutive calls hit different sub-sources and the load
    // spreads across credentials.
    plan.shuffle(&mut rng);
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn plan_covers_every_sort_per_sub_source() {
        let plan = build_plan(&subs(&["startups", "smallbusiness"]), 500, 1_700_000_000, PlanOptions::default());
        for sub in ["startups", "smallbusiness"] {
            for sort in SortMethod::ALL {
                assert!(
                    plan.iter().any(|s| s.sub_source == sub && s.sort == sort),
                    "missing {sort:?} for {sub}"
                );
            }
        }
    }

    #[test]
    fn limits_never_exceed_listing_max() {
        let plan = build_plan(&subs(&["startups"]), 50_000, 1_700_000_000, PlanOptions::default());
        assert!(plan.iter().all(|s| s.limit <= MAX_LISTING_LIMIT));
    }

    #[test]
    fn time_filters_only_on_supporting_sorts() {
        let plan = build_plan(&subs(&["startups"]), 500, 1_700_000_000, PlanOptions::default());
        for s in &plan {
            if s.time_filter.is_some() {
                assert!(s.sort.supports_time_filter());
            }
        }
    }

    #[test]
    fn historical_windows_span_two_days_within_last_month() {
        let now = 1_700_000_000;
        let plan = build_plan(&subs(&["startups"]), 500, now, PlanOptions::default());
        let windows: Vec<_> = plan.iter().filter(|s| s.after_ts.is_some()).collect();
        assert_eq!(windows.len(), 5);
        for w in windows {
            let start = w.after_ts.unwrap();
            let end = w.before.unwrap();
            assert_eq!(end - start, TWO_DAYS_SECS);
            assert!(start >= now - THIRTY_DAYS_SECS);
            assert!(end <= now);
            assert_eq!(w.sort, SortMethod::New);
        }
    }

    #[test]
    fn offsets_land_in_expected_band() {
        let plan = build_plan(&subs(&["startups"]), 500, 1_700_000_000, PlanOptions::default());
        for s in plan.iter().filter(|s| s.offset.is_some()) {
            let offset = s.offset.unwrap();
            assert!((50..650 + 50).contains(&offset));
            assert!(matches!(s.sort, SortMethod::Hot | SortMethod::Rising));
        }
    }

    #[test]
    fn options_disable_windows_and_offsets() {
        let plan = build_plan(
            &subs(&["startups"]),
            500,
            1_700_000_000,
            PlanOptions { time_windows: false, offsets: false },
        );
        assert!(plan.iter().all(|s| s.after_ts.is_none() && s.offset.is_none()));
    }
}
