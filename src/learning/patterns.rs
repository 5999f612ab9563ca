//! 行为偏好、成功模式、上下文表现三类模式

use std::collections::BTreeMap;

use super::circadian::argmax;
use super::performance::performance_score;
use crate::memory::{
    BehavioralPreferences, ContextKey, ContextPerformance, Interaction, Preference,
    SuccessPattern,
};

/// 每个操作保留的上下文样本数（最近的）
const MAX_CONTEXT_SAMPLES: usize = 100;

fn preference_of(table: &BTreeMap<String, usize>) -> Option<Preference> {
    let total: usize = table.values().sum();
    let value = argmax(table)?;
    let count = table.get(&value).copied().unwrap_or(0);
    Some(Preference {
        confidence: count as f64 / total as f64,
        value,
    })
}

/// focus / energy / urgency / actionType 各自独立的众数与占比
pub fn learn_behavioral_preferences(interactions: &[Interaction]) -> BehavioralPreferences {
    let mut focus = BTreeMap::new();
    let mut energy = BTreeMap::new();
    let mut urgency = BTreeMap::new();
    let mut action_type = BTreeMap::new();

    for i in interactions {
        if let Some(f) = &i.focus {
            *focus.entry(f.to_string()).or_insert(0) += 1;
        }
        if let Some(e) = &i.energy {
            *energy.entry(e.to_string()).or_insert(0) += 1;
        }
        if let Some(u) = &i.urgency {
            *urgency.entry(u.to_string()).or_insert(0) += 1;
        }
        if let Some(a) = &i.action_type {
            *action_type.entry(a.clone()).or_insert(0) += 1;
        }
    }

    BehavioralPreferences {
        focus: preference_of(&focus),
        energy: preference_of(&energy),
        urgency: preference_of(&urgency),
        action_type: preference_of(&action_type),
    }
}

/// 按操作统计成功率；只统计结果明确（success 非空）的交互
pub fn learn_success_patterns(interactions: &[Interaction]) -> BTreeMap<String, SuccessPattern> {
    let mut patterns: BTreeMap<String, SuccessPattern> = BTreeMap::new();
    let mut blocks: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();

    for i in interactions {
        let (Some(op), Some(success)) = (i.operation_key(), i.success) else {
            continue;
        };
        let pattern = patterns.entry(op.to_string()).or_default();
        pattern.attempts += 1;
        if success {
            pattern.successes += 1;
            pattern.optimal_contexts.push(i.context_key());
            if let Some(block) = &i.time_block {
                *blocks
                    .entry(op.to_string())
                    .or_default()
                    .entry(block.clone())
                    .or_insert(0) += 1;
            }
        } else {
            pattern.failure_contexts.push(i.context_key());
        }
    }

    for (op, pattern) in patterns.iter_mut() {
        pattern.success_rate = pattern.successes as f64 / pattern.attempts as f64;
        pattern.optimal_time_block = blocks.get(op).and_then(argmax);
        keep_recent(&mut pattern.optimal_contexts);
        keep_recent(&mut pattern.failure_contexts);
    }
    patterns
}

fn keep_recent(contexts: &mut Vec<ContextKey>) {
    let n = contexts.len();
    if n > MAX_CONTEXT_SAMPLES {
        contexts.drain(0..n - MAX_CONTEXT_SAMPLES);
    }
}

/// 按完整上下文元组分组，样本数达到 `min_samples` 的组按平均表现取前 `top_n`
pub fn learn_context_patterns(
    interactions: &[Interaction],
    min_samples: usize,
    top_n: usize,
) -> Vec<ContextPerformance> {
    // (样本数, 成功数, 表现分总和)
    let mut groups: BTreeMap<ContextKey, (usize, usize, f64)> = BTreeMap::new();
    for i in interactions {
        let entry = groups.entry(i.context_key()).or_insert((0, 0, 0.0));
        entry.0 += 1;
        if i.success == Some(true) {
            entry.1 += 1;
        }
        entry.2 += performance_score(i);
    }

    let mut ranked: Vec<ContextPerformance> = groups
        .into_iter()
        .filter(|(_, (n, _, _))| *n >= min_samples.max(1))
        .map(|(context, (n, successes, sum))| ContextPerformance {
            context,
            samples: n,
            success_rate: successes as f64 / n as f64,
            avg_performance: sum / n as f64,
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.avg_performance
            .total_cmp(&a.avg_performance)
            .then(b.success_rate.total_cmp(&a.success_rate))
            .then(b.samples.cmp(&a.samples))
    });
    ranked.truncate(top_n);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Energy, Focus, Urgency};
    use chrono::Utc;

    fn i(op: &str, success: Option<bool>, focus: Focus) -> Interaction {
        let mut x = Interaction::new("task", Utc::now())
            .with_action_type(op)
            .with_focus(focus)
            .with_time_block("morning");
        x.success = success;
        x
    }

    #[test]
    fn test_behavioral_argmax_and_confidence() {
        let log = vec![
            i("email", None, Focus::DeepWork),
            i("email", None, Focus::DeepWork),
            i("review", None, Focus::Admin),
            i("email", None, Focus::DeepWork),
        ];
        let prefs = learn_behavioral_preferences(&log);
        let focus = prefs.focus.unwrap();
        assert_eq!(focus.value, "deep-work");
        assert!((focus.confidence - 0.75).abs() < 1e-9);
        assert_eq!(prefs.action_type.unwrap().value, "email");
        assert!(prefs.energy.is_none());
    }

    #[test]
    fn test_success_patterns_ignore_unknown_outcomes() {
        let log = vec![
            i("deploy", Some(true), Focus::DeepWork),
            i("deploy", Some(false), Focus::Admin),
            i("deploy", Some(true), Focus::DeepWork),
            i("deploy", None, Focus::DeepWork),
        ];
        let patterns = learn_success_patterns(&log);
        let deploy = &patterns["deploy"];
        assert_eq!(deploy.attempts, 3);
        assert!((deploy.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(deploy.optimal_contexts.len(), 2);
        assert_eq!(deploy.failure_contexts.len(), 1);
        assert_eq!(deploy.optimal_time_block.as_deref(), Some("morning"));
    }

    #[test]
    fn test_operation_preferred_over_action_type() {
        let log = vec![Interaction::new("task", Utc::now())
            .with_operation("create_card")
            .with_action_type("trello")
            .with_success(true)];
        let patterns = learn_success_patterns(&log);
        assert!(patterns.contains_key("create_card"));
        assert!(!patterns.contains_key("trello"));
    }

    #[test]
    fn test_context_patterns_require_two_samples_and_rank() {
        let good = |s| {
            Interaction::new("t", Utc::now())
                .with_energy(Energy::High)
                .with_urgency(Urgency::Critical)
                .with_success(s)
        };
        let plain = || Interaction::new("t", Utc::now()).with_energy(Energy::Low);
        let lonely = Interaction::new("t", Utc::now()).with_focus(Focus::Break);

        let log = vec![good(true), good(true), plain(), plain(), plain(), lonely];
        let ranked = learn_context_patterns(&log, 2, 5);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].context.energy, Some(Energy::High));
        assert_eq!(ranked[0].success_rate, 1.0);
        assert!(ranked[0].avg_performance > ranked[1].avg_performance);
        assert_eq!(ranked[1].samples, 3);
    }

    #[test]
    fn test_context_patterns_keep_top_n() {
        let mut log = Vec::new();
        for block in ["a", "b", "c", "d", "e", "f", "g"] {
            for _ in 0..2 {
                log.push(Interaction::new("t", Utc::now()).with_time_block(block));
            }
        }
        assert_eq!(learn_context_patterns(&log, 2, 5).len(), 5);
    }
}
