//! 时间模式与昼夜节律分析
//!
//! 把每条交互的小时映射到 morning / afternoon / evening / night 四个时段，
//! 对每个时段累计次数、成功次数与表现分，再按加权得分给出节律类型与高峰时段。
//! 纯函数：同一份日志多次运行结果完全一致。

use std::collections::BTreeMap;

use chrono::{Datelike, Timelike, Weekday};

use super::learner::LearningConfig;
use super::performance::performance_score;
use crate::memory::{
    CircadianAnalysis, CircadianType, DayPeriod, Interaction, PeriodBreakdown, PeriodStats,
    TimePatterns,
};

const MAX_PEAK_HOURS: usize = 3;

/// 频率表众数；并列时取键序最小者
pub(crate) fn argmax<K: Clone + Ord>(table: &BTreeMap<K, usize>) -> Option<K> {
    let mut best: Option<(&K, usize)> = None;
    for (k, &v) in table {
        match best {
            Some((_, bv)) if v <= bv => {}
            _ => best = Some((k, v)),
        }
    }
    best.map(|(k, _)| k.clone())
}

pub fn learn_time_patterns(interactions: &[Interaction], config: &LearningConfig) -> TimePatterns {
    let mut patterns = TimePatterns {
        total: interactions.len(),
        ..TimePatterns::default()
    };
    let mut periods = PeriodBreakdown::default();
    let mut performance_sums: BTreeMap<DayPeriod, f64> = BTreeMap::new();

    for interaction in interactions {
        let hour = interaction.timestamp.hour();
        let weekday = interaction.timestamp.weekday();

        *patterns.hour_frequency.entry(hour).or_default() += 1;
        *patterns.day_frequency.entry(weekday_name(weekday).to_string()).or_default() += 1;
        let bucket = match weekday {
            Weekday::Sat | Weekday::Sun => "weekend",
            _ => "weekday",
        };
        *patterns.weekday_frequency.entry(bucket.to_string()).or_default() += 1;
        if let Some(block) = &interaction.time_block {
            *patterns.time_block_frequency.entry(block.clone()).or_default() += 1;
        }

        let period = DayPeriod::from_hour(hour);
        let stats = periods.get_mut(period);
        stats.count += 1;
        if interaction.success == Some(true) {
            stats.successes += 1;
        }
        *performance_sums.entry(period).or_default() += performance_score(interaction);
    }

    patterns.optimal_hour = argmax(&patterns.hour_frequency);
    patterns.optimal_day = argmax(&patterns.day_frequency);
    patterns.optimal_weekday = argmax(&patterns.weekday_frequency);
    patterns.optimal_time_block = argmax(&patterns.time_block_frequency);

    let total = interactions.len();
    for period in DayPeriod::ALL {
        let sum = performance_sums.get(&period).copied().unwrap_or(0.0);
        let stats = periods.get_mut(period);
        if stats.count > 0 {
            stats.success_rate = stats.successes as f64 / stats.count as f64;
            stats.avg_performance = sum / stats.count as f64;
        }
        stats.score = period_score(stats, total, config);
    }

    patterns.circadian = classify(periods, total, &patterns.hour_frequency, config);
    patterns
}

fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
        Weekday::Sun => "Sun",
    }
}

/// 时段得分：各项先换算到 0–100 再加权
fn period_score(stats: &PeriodStats, total: usize, config: &LearningConfig) -> f64 {
    if stats.count == 0 || total == 0 {
        return 0.0;
    }
    let frequency = stats.count as f64 / total as f64 * 100.0;
    config.success_weight * stats.success_rate * 100.0
        + config.performance_weight * stats.avg_performance
        + config.frequency_weight * frequency
}

/// 与获胜时段比较的对手时段
fn rival(period: DayPeriod) -> Option<DayPeriod> {
    match period {
        DayPeriod::Morning => Some(DayPeriod::Evening),
        DayPeriod::Evening => Some(DayPeriod::Morning),
        DayPeriod::Night => Some(DayPeriod::Evening),
        DayPeriod::Afternoon => None,
    }
}

fn classify(
    periods: PeriodBreakdown,
    total: usize,
    hour_frequency: &BTreeMap<u32, usize>,
    config: &LearningConfig,
) -> CircadianAnalysis {
    if total < config.min_interactions {
        return CircadianAnalysis {
            kind: CircadianType::InsufficientData,
            confidence: 0.0,
            peak_hours: Vec::new(),
            recommendations: vec![
                "Keep logging activity to unlock time-of-day insights".to_string(),
            ],
            periods,
        };
    }

    let mut winner = DayPeriod::Morning;
    let mut max = f64::MIN;
    let mut min = f64::MAX;
    for period in DayPeriod::ALL {
        let score = periods.get(period).score;
        if score > max {
            max = score;
            winner = period;
        }
        min = min.min(score);
    }

    let kind = if max - min < config.balanced_spread {
        CircadianType::Balanced
    } else {
        match rival(winner) {
            Some(r) if max - periods.get(r).score > config.dominance_margin => match winner {
                DayPeriod::Morning => CircadianType::MorningPerson,
                DayPeriod::Evening => CircadianType::EveningPerson,
                DayPeriod::Night => CircadianType::NightOwl,
                DayPeriod::Afternoon => CircadianType::Balanced,
            },
            _ => CircadianType::Balanced,
        }
    };

    let mut ranked: Vec<(u32, f64)> = hour_frequency
        .iter()
        .map(|(&hour, &count)| {
            let score = periods.get(DayPeriod::from_hour(hour)).score;
            (hour, count as f64 * score)
        })
        .filter(|(_, weight)| *weight > 0.0)
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    let peak_hours: Vec<u32> = ranked
        .into_iter()
        .take(MAX_PEAK_HOURS)
        .map(|(h, _)| h)
        .collect();

    CircadianAnalysis {
        kind,
        confidence: (max / 100.0).clamp(0.0, 1.0),
        recommendations: recommendations_for(kind, &peak_hours),
        peak_hours,
        periods,
    }
}

fn recommendations_for(kind: CircadianType, peak_hours: &[u32]) -> Vec<String> {
    let mut out = Vec::new();
    match kind {
        CircadianType::MorningPerson => {
            out.push("Schedule deep work before noon".to_string());
            out.push("Keep afternoons for meetings and admin".to_string());
        }
        CircadianType::EveningPerson => {
            out.push("Reserve late afternoon and evening for demanding tasks".to_string());
            out.push("Use mornings for planning and light work".to_string());
        }
        CircadianType::NightOwl => {
            out.push("Protect late-night focus blocks".to_string());
            out.push("Avoid stacking early meetings".to_string());
        }
        CircadianType::Balanced => {
            out.push("Performance is even across the day; plan by priority rather than time".to_string());
        }
        CircadianType::InsufficientData => {}
    }
    if !peak_hours.is_empty() {
        let hours: Vec<String> = peak_hours.iter().map(|h| format!("{:02}:00", h)).collect();
        out.push(format!("Peak hours: {}", hours.join(", ")));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Energy, Focus};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    fn morning_log() -> Vec<Interaction> {
        (0..8)
            .map(|i| {
                Interaction::new("task", at(4 + (i % 5), 6 + i % 3))
                    .with_success(true)
                    .with_energy(Energy::High)
                    .with_focus(Focus::DeepWork)
                    .with_time_block("early")
            })
            .collect()
    }

    #[test]
    fn test_morning_person_detected() {
        let patterns = learn_time_patterns(&morning_log(), &LearningConfig::default());
        let c = &patterns.circadian;
        assert_eq!(c.kind, CircadianType::MorningPerson);
        assert!(c.confidence > 0.5);
        assert!(c.peak_hours.len() <= 3);
        assert!(c.peak_hours.iter().all(|h| (6..=8).contains(h)));
        assert_eq!(c.periods.morning.count, 8);
        assert_eq!(patterns.optimal_time_block.as_deref(), Some("early"));
    }

    #[test]
    fn test_deterministic_and_idempotent() {
        let log = morning_log();
        let config = LearningConfig::default();
        let a = learn_time_patterns(&log, &config);
        let b = learn_time_patterns(&log, &config);
        assert_eq!(a, b);
    }

    #[test]
    fn test_insufficient_data() {
        let log: Vec<Interaction> = morning_log().into_iter().take(2).collect();
        let patterns = learn_time_patterns(&log, &LearningConfig::default());
        assert_eq!(patterns.circadian.kind, CircadianType::InsufficientData);
        assert_eq!(patterns.circadian.confidence, 0.0);
    }

    #[test]
    fn test_even_spread_is_balanced() {
        let mut log = Vec::new();
        for hour in [8, 14, 19, 23] {
            for d in 0..3 {
                log.push(Interaction::new("task", at(4 + d, hour)).with_success(true));
            }
        }
        let patterns = learn_time_patterns(&log, &LearningConfig::default());
        assert_eq!(patterns.circadian.kind, CircadianType::Balanced);
    }

    #[test]
    fn test_night_owl_beats_evening() {
        let mut log = Vec::new();
        for d in 0..6 {
            log.push(
                Interaction::new("task", at(4 + d, 23))
                    .with_success(true)
                    .with_energy(Energy::High),
            );
        }
        log.push(Interaction::new("task", at(11, 18)).with_success(false));
        let patterns = learn_time_patterns(&log, &LearningConfig::default());
        assert_eq!(patterns.circadian.kind, CircadianType::NightOwl);
    }

    #[test]
    fn test_weekday_buckets() {
        // 2024-03-09 是周六
        let log = vec![
            Interaction::new("a", at(9, 10)),
            Interaction::new("b", at(9, 11)),
            Interaction::new("c", at(11, 10)),
        ];
        let patterns = learn_time_patterns(&log, &LearningConfig::default());
        assert_eq!(patterns.weekday_frequency.get("weekend"), Some(&2));
        assert_eq!(patterns.optimal_weekday.as_deref(), Some("weekend"));
        assert_eq!(patterns.optimal_day.as_deref(), Some("Sat"));
        assert_eq!(patterns.optimal_hour, Some(10));
    }

    #[test]
    fn test_argmax_tie_breaks_by_key() {
        let mut t = BTreeMap::new();
        t.insert("b".to_string(), 2);
        t.insert("a".to_string(), 2);
        t.insert("c".to_string(), 1);
        assert_eq!(argmax(&t).as_deref(), Some("a"));
    }
}
