//! 表格型动作价值（Q 表），键为精确的编码状态，不做状态泛化

use std::collections::HashMap;

use super::state::EncodedState;

#[derive(Debug, Clone, Default)]
pub struct QTable {
    values: HashMap<EncodedState, HashMap<String, f64>>,
}

impl QTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, state: &EncodedState, action: &str) -> f64 {
        self.values
            .get(state)
            .and_then(|actions| actions.get(action))
            .copied()
            .unwrap_or(0.0)
    }

    /// 状态下已知动作的最大值；未见过的状态为 0
    pub fn max_value(&self, state: &EncodedState) -> f64 {
        self.values
            .get(state)
            .and_then(|actions| actions.values().copied().reduce(f64::max))
            .unwrap_or(0.0)
    }

    /// `Q(s,a) += α·(target − Q(s,a))`；无后继状态时 target = reward
    pub fn update(
        &mut self,
        state: &EncodedState,
        action: &str,
        reward: f64,
        next_state: Option<&EncodedState>,
        alpha: f64,
        gamma: f64,
    ) -> f64 {
        let target = match next_state {
            Some(next) => reward + gamma * self.max_value(next),
            None => reward,
        };
        let slot = self
            .values
            .entry(state.clone())
            .or_default()
            .entry(action.to_string())
            .or_insert(0.0);
        *slot += alpha * (target - *slot);
        *slot
    }

    /// 候选中价值最高者；并列取靠前的
    pub fn best_of<'a>(&self, state: &EncodedState, candidates: &'a [String]) -> Option<&'a String> {
        candidates.iter().fold(None, |best: Option<(&String, f64)>, c| {
            let q = self.get(state, c);
            match best {
                Some((_, bq)) if bq >= q => best,
                _ => Some((c, q)),
            }
        })
        .map(|(c, _)| c)
    }

    /// (状态, 动作) 条目数
    pub fn len(&self) -> usize {
        self.values.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(x: f64) -> EncodedState {
        EncodedState(vec![x])
    }

    #[test]
    fn test_terminal_update() {
        let mut q = QTable::new();
        let v = q.update(&s(1.0), "a", 1.0, None, 0.5, 0.95);
        assert!((v - 0.5).abs() < 1e-12);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_bootstrap_uses_next_state_max() {
        let mut q = QTable::new();
        q.update(&s(2.0), "x", 1.0, None, 1.0, 0.9);
        q.update(&s(2.0), "y", 3.0, None, 1.0, 0.9);
        let v = q.update(&s(1.0), "a", 0.0, Some(&s(2.0)), 1.0, 0.9);
        assert!((v - 2.7).abs() < 1e-12);
    }

    #[test]
    fn test_repeated_example_converges_without_overshoot() {
        let gamma = 0.95;
        let limit = 1.0 / (1.0 - gamma);
        let mut q = QTable::new();
        let state = s(3.0);
        let mut last = 0.0;
        for _ in 0..2000 {
            let v = q.update(&state, "a", 1.0, Some(&state), 0.5, gamma);
            assert!(v >= last - 1e-12);
            assert!(v <= limit + 1e-9);
            last = v;
        }
        assert!((limit - last).abs() < 1e-6);
    }

    #[test]
    fn test_best_of_prefers_first_on_tie() {
        let mut q = QTable::new();
        let candidates = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(q.best_of(&s(0.0), &candidates).map(String::as_str), Some("a"));
        q.update(&s(0.0), "c", 1.0, None, 1.0, 0.9);
        assert_eq!(q.best_of(&s(0.0), &candidates).map(String::as_str), Some("c"));
        assert!(q.best_of(&s(0.0), &[]).is_none());
    }
}
