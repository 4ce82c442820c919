use std::time::Instant;

use fwdp_common::{FwdStats, PcctStats};

use crate::traffic::TrafficStats;

/// Counters gathered from the worker and the traffic generator at one instant
#[derive(Debug, Clone, Copy, Default)]
pub struct Snapshot {
    pub fwd: FwdStats,
    pub pcct: PcctStats,
    pub traffic: TrafficStats,
}

/// Tracks successive snapshots to derive rates
#[derive(Default)]
pub struct StatsManager {
    last: Option<(Snapshot, Instant)>,
}

impl StatsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `snap` and return rates since the previous one
    pub fn update(&mut self, snap: Snapshot) -> StatsRates {
        let now = Instant::now();
        let rates = match self.last {
            Some((last, last_time)) => {
                let time_diff = now.duration_since(last_time).as_secs_f64();
                StatsRates::between(&last.fwd, &snap.fwd, time_diff)
            }
            None => StatsRates::default(),
        };
        self.last = Some((snap, now));
        rates
    }

    /// Statistics formatted as JSON
    pub fn to_json(snap: &Snapshot) -> serde_json::Value {
        serde_json::json!({
            "forwarding": snap.fwd,
            "pcct": snap.pcct,
            "traffic": snap.traffic,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatsRates {
    pub interests_per_sec: f64,
    pub data_per_sec: f64,
    pub cs_hit_ratio: f64,
    pub time_period: f64,
}

impl StatsRates {
    fn between(last: &FwdStats, cur: &FwdStats, time_diff: f64) -> Self {
        if time_diff <= 0.0 {
            return Self::default();
        }
        let interests = cur.interests.saturating_sub(last.interests);
        let hits = cur.cs_hits.saturating_sub(last.cs_hits);
        Self {
            interests_per_sec: interests as f64 / time_diff,
            data_per_sec: cur.data.saturating_sub(last.data) as f64 / time_diff,
            cs_hit_ratio: if interests == 0 {
                0.0
            } else {
                hits as f64 / interests as f64
            },
            time_period: time_diff,
        }
    }

    /// Format rates as a human-readable string
    pub fn format(&self) -> String {
        format!(
            "Interests/sec: {:.2}, Data/sec: {:.2}, CS hit ratio: {:.1}% (over {:.2}s)",
            self.interests_per_sec,
            self.data_per_sec,
            self.cs_hit_ratio * 100.0,
            self.time_period
        )
    }
}

pub fn display_statistics(snap: &Snapshot) {
    let (fwd, pcct) = (&snap.fwd, &snap.pcct);
    println!("╭─────────────────────────────────────────────────────────────────────────────────────╮");
    println!("│                                 FWDP Statistics                                     │");
    println!("├─────────────────────────────────────────────────────────────────────────────────────┤");
    println!("│ Interests:     {:<12} │ Data:          {:<12} │ CS Hits:       {:<12} │",
             fwd.interests, fwd.data, fwd.cs_hits);
    println!("│ Name Disp:     {:<12} │ Token Disp:    {:<12} │ Bad Tokens:    {:<12} │",
             fwd.n_name_disp, fwd.n_token_disp, fwd.n_bad_token);
    println!("│ Duplicates:    {:<12} │ Unsolicited:   {:<12} │ Parse Errors:  {:<12} │",
             fwd.duplicates, fwd.unsolicited, fwd.parse_errors);
    println!("│ Nacks In:      {:<12} │ Nacks Out:     {:<12} │ Refused:       {:<12} │",
             fwd.nacks, fwd.nacks_sent, fwd.table_full_drops);
    println!("├─────────────────────────────────────────────────────────────────────────────────────┤");
    println!("│ Slots:  {:>8}/{:<8}  │ PIT:           {:<12} │ Table Full:    {:<12} │",
             pcct.in_use, pcct.capacity, pcct.pit.entries, pcct.table_full);
    println!("│ CS-MD:  {:>8}/{:<8}  │ CS-MI:  {:>8}/{:<8}  │ Evicted:       {:<12} │",
             pcct.cs.direct_entries, pcct.cs.direct_capacity,
             pcct.cs.indirect_entries, pcct.cs.indirect_capacity,
             pcct.cs.evicted_direct + pcct.cs.evicted_indirect);
    println!("│ PIT Expired:   {:<12} │ CS Stale:      {:<12} │ Stale Tokens:  {:<12} │",
             pcct.pit.expired, pcct.cs.stale_dropped, pcct.stale_tokens);
    println!("╰─────────────────────────────────────────────────────────────────────────────────────╯");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_between() {
        let last = FwdStats::new();
        let mut cur = FwdStats::new();
        cur.interests = 200;
        cur.cs_hits = 50;
        cur.data = 100;

        let rates = StatsRates::between(&last, &cur, 2.0);
        assert_eq!(rates.interests_per_sec, 100.0);
        assert_eq!(rates.data_per_sec, 50.0);
        assert_eq!(rates.cs_hit_ratio, 0.25);
        assert!(rates.format().contains("CS hit ratio: 25.0%"));

        let none = StatsRates::between(&last, &cur, 0.0);
        assert_eq!(none.interests_per_sec, 0.0);
    }

    #[test]
    fn test_first_update_has_no_rates() {
        let mut mgr = StatsManager::new();
        let rates = mgr.update(Snapshot::default());
        assert_eq!(rates.time_period, 0.0);
    }

    #[test]
    fn test_json_export() {
        let mut snap = Snapshot::default();
        snap.fwd.n_token_disp = 7;
        snap.pcct.cs.direct_capacity = 32;
        snap.traffic.interests_sent = 3;

        let json = StatsManager::to_json(&snap);
        assert_eq!(json["forwarding"]["n_token_disp"], 7);
        assert_eq!(json["pcct"]["cs"]["direct_capacity"], 32);
        assert_eq!(json["traffic"]["interests_sent"], 3);
        assert!(json["timestamp"].is_string());
    }
}
