//! 转移表：相邻两条交互构成 (当前状态, 下一状态)，统计次数并按源状态归一化

use std::collections::BTreeMap;

use crate::memory::{Interaction, NextState, PredictivePatterns, StateKey, Transition};

pub fn learn_predictive_patterns(interactions: &[Interaction]) -> PredictivePatterns {
    let mut counts: BTreeMap<StateKey, BTreeMap<StateKey, usize>> = BTreeMap::new();
    for pair in interactions.windows(2) {
        *counts
            .entry(pair[0].state_key())
            .or_default()
            .entry(pair[1].state_key())
            .or_insert(0) += 1;
    }

    let transitions = counts
        .into_iter()
        .map(|(from, successors)| {
            let total: usize = successors.values().sum();
            let mut next: Vec<NextState> = successors
                .into_iter()
                .map(|(state, count)| NextState {
                    state,
                    count,
                    probability: count as f64 / total as f64,
                })
                .collect();
            // 稳定排序：同概率时保持键序
            next.sort_by(|a, b| b.probability.total_cmp(&a.probability));
            Transition { from, total, next }
        })
        .collect();

    PredictivePatterns {
        transitions,
        sequence_count: interactions.len().saturating_sub(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Energy, Focus};
    use chrono::Utc;

    fn step(action: &str) -> Interaction {
        Interaction::new("task", Utc::now())
            .with_action_type(action)
            .with_focus(Focus::DeepWork)
            .with_energy(Energy::High)
    }

    #[test]
    fn test_probabilities_sum_to_one() {
        let log: Vec<Interaction> = ["a", "b", "a", "c", "a", "b", "b", "a", "c", "c", "a"]
            .iter()
            .map(|s| step(s))
            .collect();
        let patterns = learn_predictive_patterns(&log);
        assert_eq!(patterns.sequence_count, log.len() - 1);
        for t in &patterns.transitions {
            let sum: f64 = t.next.iter().map(|n| n.probability).sum();
            assert!((sum - 1.0).abs() < 1e-9, "{:?} sums to {}", t.from, sum);
            assert_eq!(t.total, t.next.iter().map(|n| n.count).sum::<usize>());
        }
    }

    #[test]
    fn test_successors_sorted_by_probability() {
        let log: Vec<Interaction> = ["a", "b", "a", "b", "a", "c"]
            .iter()
            .map(|s| step(s))
            .collect();
        let patterns = learn_predictive_patterns(&log);
        let from_a = patterns.lookup(&step("a").state_key()).unwrap();
        assert_eq!(from_a.next[0].state.action_type.as_deref(), Some("b"));
        assert!((from_a.next[0].probability - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_and_single_logs() {
        assert!(learn_predictive_patterns(&[]).transitions.is_empty());
        let one = learn_predictive_patterns(&[step("a")]);
        assert!(one.transitions.is_empty());
        assert_eq!(one.sequence_count, 0);
    }
}
