//! 预测引擎
//!
//! 只读消费已学习的模式：下一动作、最佳时机、成功概率，以及汇总后的个性化建议。
//! 数据不足时返回零置信度的哨兵对象而不是报错。

use std::sync::Arc;

use chrono::Timelike;

use super::types::*;
use crate::memory::{CircadianType, MemoryStore, Patterns, Preference, StateKey};

const MAX_NEXT_ACTIONS: usize = 3;
/// 历史尝试达到该次数后置信度封顶为 1
const FULL_CONFIDENCE_ATTEMPTS: f64 = 10.0;
/// 行为一致度在最终概率中的占比
const BEHAVIOR_BLEND: f64 = 0.3;
/// 低于该成功概率时给出优化建议
const SUCCESS_ALERT_THRESHOLD: f64 = 0.7;
const MIN_TIMING_CONFIDENCE: f64 = 0.3;
const MIN_PREFERENCE_CONFIDENCE: f64 = 0.5;

pub struct PredictionEngine {
    store: Arc<MemoryStore>,
}

impl PredictionEngine {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    pub async fn predict_next_action(&self, user_id: &str, current: &StateKey) -> NextActionPrediction {
        let memory = self.store.load(user_id).await;
        next_action_from(&memory.patterns, current)
    }

    pub async fn predict_optimal_timing(&self, user_id: &str, action_type: &str) -> TimingPrediction {
        let memory = self.store.load(user_id).await;
        timing_from(&memory.patterns, action_type)
    }

    pub async fn predict_success_probability(
        &self,
        user_id: &str,
        context: &PredictionContext,
    ) -> SuccessPrediction {
        let memory = self.store.load(user_id).await;
        success_from(&memory.patterns, context)
    }

    pub async fn generate_personalized_recommendations(
        &self,
        user_id: &str,
        context: &PredictionContext,
    ) -> Vec<Recommendation> {
        let memory = self.store.load(user_id).await;
        let recs = recommendations_from(&memory.patterns, context);
        tracing::debug!(user_id, count = recs.len(), "generated recommendations");
        recs
    }
}

/// 精确匹配当前状态，取概率最高的前 3 个后继
pub fn next_action_from(patterns: &Patterns, current: &StateKey) -> NextActionPrediction {
    let predictive = &patterns.predictive_patterns;
    let Some(transition) = predictive.lookup(current) else {
        return NextActionPrediction {
            sequence_count: predictive.sequence_count,
            ..NextActionPrediction::default()
        };
    };

    let predictions: Vec<PredictedState> = transition
        .next
        .iter()
        .take(MAX_NEXT_ACTIONS)
        .map(|n| PredictedState {
            state: n.state.clone(),
            probability: n.probability,
            count: n.count,
        })
        .collect();
    let confidence = if predictions.is_empty() {
        0.0
    } else {
        predictions.iter().map(|p| p.probability).sum::<f64>() / predictions.len() as f64
    };

    NextActionPrediction {
        predictions,
        confidence,
        sequence_count: predictive.sequence_count,
    }
}

fn share(count: Option<&usize>, total: usize) -> f64 {
    match count {
        Some(&c) if total > 0 => c as f64 / total as f64,
        _ => 0.0,
    }
}

pub fn timing_from(patterns: &Patterns, action_type: &str) -> TimingPrediction {
    let time = &patterns.time_blocks;
    let mut recommendations = Vec::new();

    if let Some(hour) = time.optimal_hour {
        recommendations.push(TimingRecommendation {
            source: TimingSource::OptimalHour,
            value: format!("{:02}:00", hour),
            hours: vec![hour],
            confidence: share(time.hour_frequency.get(&hour), time.total),
            reason: "Most frequent activity hour".to_string(),
        });
    }

    if let Some(block) = &time.optimal_time_block {
        let total: usize = time.time_block_frequency.values().sum();
        recommendations.push(TimingRecommendation {
            source: TimingSource::OptimalTimeBlock,
            value: block.clone(),
            hours: Vec::new(),
            confidence: share(time.time_block_frequency.get(block), total),
            reason: "Most frequent time block".to_string(),
        });
    }

    if let Some(weekday) = &time.optimal_weekday {
        recommendations.push(TimingRecommendation {
            source: TimingSource::OptimalWeekday,
            value: weekday.clone(),
            hours: Vec::new(),
            confidence: share(time.weekday_frequency.get(weekday), time.total),
            reason: "Most active part of the week".to_string(),
        });
    }

    let circadian = &time.circadian;
    if circadian.kind != CircadianType::InsufficientData {
        recommendations.push(TimingRecommendation {
            source: TimingSource::Circadian,
            value: circadian.kind.to_string(),
            hours: circadian.peak_hours.clone(),
            confidence: circadian.confidence,
            reason: "Circadian performance profile".to_string(),
        });
    }

    if let Some(pattern) = patterns.success_patterns.get(action_type) {
        if let Some(block) = &pattern.optimal_time_block {
            recommendations.push(TimingRecommendation {
                source: TimingSource::ActionSpecific,
                value: block.clone(),
                hours: Vec::new(),
                confidence: pattern.success_rate,
                reason: format!("Where {} has succeeded most", action_type),
            });
        }
    }

    recommendations.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    TimingPrediction {
        action_type: action_type.to_string(),
        recommendations,
    }
}

fn preference_match(pref: &Option<Preference>, actual: Option<String>) -> Option<(f64, f64)> {
    let pref = pref.as_ref()?;
    let actual = actual?;
    Some((pref.confidence, if pref.value == actual { 1.0 } else { 0.0 }))
}

pub fn success_from(patterns: &Patterns, context: &PredictionContext) -> SuccessPrediction {
    let mut factors = Vec::new();

    let history = context
        .action_type
        .as_ref()
        .and_then(|a| patterns.success_patterns.get(a))
        .filter(|p| p.attempts > 0);
    let (mut probability, confidence) = match history {
        Some(p) => (
            p.success_rate,
            (p.attempts as f64 / FULL_CONFIDENCE_ATTEMPTS).min(1.0),
        ),
        None => (0.5, 0.0),
    };
    factors.push(SuccessFactor {
        name: "historical_success_rate".to_string(),
        value: probability,
        weight: confidence,
    });

    let key = context.context_key();
    let best = patterns
        .optimal_contexts
        .iter()
        .map(|c| (c.context.match_fraction(&key), c))
        .fold(None, |best: Option<(f64, _)>, (m, c)| match best {
            Some((bm, _)) if bm >= m => best,
            _ => Some((m, c)),
        });
    if let Some((matched, entry)) = best.filter(|(m, _)| *m > 0.0) {
        let context_probability = entry.avg_performance / 100.0;
        probability = 0.5 * probability + 0.5 * context_probability;
        factors.push(SuccessFactor {
            name: "context_match".to_string(),
            value: context_probability,
            weight: matched,
        });
    }

    let prefs = &patterns.behavioral_preferences;
    let checks = [
        preference_match(&prefs.focus, context.focus.as_ref().map(|f| f.to_string())),
        preference_match(&prefs.energy, context.energy.as_ref().map(|e| e.to_string())),
        preference_match(&prefs.urgency, context.urgency.as_ref().map(|u| u.to_string())),
        preference_match(&prefs.action_type, context.action_type.clone()),
    ];
    let (weight_sum, weighted) = checks
        .iter()
        .flatten()
        .fold((0.0, 0.0), |(w, s), (weight, hit)| (w + weight, s + weight * hit));
    if weight_sum > 0.0 {
        let alignment = weighted / weight_sum;
        probability = (1.0 - BEHAVIOR_BLEND) * probability + BEHAVIOR_BLEND * alignment;
        let n = checks.iter().flatten().count() as f64;
        factors.push(SuccessFactor {
            name: "behavioral_alignment".to_string(),
            value: alignment,
            weight: weight_sum / n,
        });
    }

    factors.sort_by(|a, b| b.weight.total_cmp(&a.weight));
    let probability = if probability.is_finite() {
        probability.clamp(0.0, 1.0)
    } else {
        0.5
    };

    SuccessPrediction {
        probability,
        confidence,
        factors,
    }
}

pub fn recommendations_from(patterns: &Patterns, context: &PredictionContext) -> Vec<Recommendation> {
    let mut recs = Vec::new();

    if let Some(action) = &context.action_type {
        let timing = timing_from(patterns, action);
        if let Some(best) = timing
            .recommendations
            .iter()
            .find(|r| r.confidence >= MIN_TIMING_CONFIDENCE)
        {
            recs.push(Recommendation {
                category: RecommendationCategory::Timing,
                priority: RecommendationPriority::Medium,
                title: format!("Best time for {}", action),
                message: format!("{} ({})", best.value, best.reason),
                confidence: best.confidence,
            });
        }
    }

    let success = success_from(patterns, context);
    if success.probability < SUCCESS_ALERT_THRESHOLD {
        let message = match patterns.optimal_contexts.first() {
            Some(best) => format!(
                "Success odds are {:.0}%; you do best with {}",
                success.probability * 100.0,
                describe(&best.context)
            ),
            None => format!(
                "Success odds are {:.0}%; consider a lower-pressure slot",
                success.probability * 100.0
            ),
        };
        recs.push(Recommendation {
            category: RecommendationCategory::SuccessOptimization,
            priority: RecommendationPriority::High,
            title: "Improve your odds".to_string(),
            message,
            confidence: 1.0 - success.probability,
        });
    }

    let prefs = &patterns.behavioral_preferences;
    let dimensions = [
        ("focus", &prefs.focus, context.focus.as_ref().map(|f| f.to_string())),
        ("energy", &prefs.energy, context.energy.as_ref().map(|e| e.to_string())),
        ("urgency", &prefs.urgency, context.urgency.as_ref().map(|u| u.to_string())),
    ];
    for (name, pref, actual) in dimensions {
        let (Some(pref), Some(actual)) = (pref, actual) else {
            continue;
        };
        if pref.confidence < MIN_PREFERENCE_CONFIDENCE || pref.value == actual {
            continue;
        }
        recs.push(Recommendation {
            category: RecommendationCategory::BehavioralMismatch,
            priority: if pref.confidence >= 0.8 {
                RecommendationPriority::Medium
            } else {
                RecommendationPriority::Low
            },
            title: format!("Unusual {}", name),
            message: format!("You usually work with {} {}, now {}", name, pref.value, actual),
            confidence: pref.confidence,
        });
    }

    let circadian = &patterns.time_blocks.circadian;
    if circadian.kind != CircadianType::InsufficientData && !circadian.peak_hours.is_empty() {
        let hour = context.at.hour();
        if circadian.peak_hours.contains(&hour) {
            recs.push(Recommendation {
                category: RecommendationCategory::ProductivityWindow,
                priority: RecommendationPriority::High,
                title: "Peak window".to_string(),
                message: "You are in one of your most productive hours; tackle the hardest task now"
                    .to_string(),
                confidence: circadian.confidence,
            });
        } else if let Some(next) = next_peak(&circadian.peak_hours, hour) {
            recs.push(Recommendation {
                category: RecommendationCategory::ProductivityWindow,
                priority: RecommendationPriority::Low,
                title: "Next peak window".to_string(),
                message: format!("Your next productive window starts at {:02}:00", next),
                confidence: circadian.confidence,
            });
        }
    }

    recs.sort_by(|a, b| b.priority.cmp(&a.priority));
    recs
}

/// 当前小时之后最近的高峰小时（跨午夜回绕）
fn next_peak(peaks: &[u32], hour: u32) -> Option<u32> {
    peaks
        .iter()
        .copied()
        .min_by_key(|p| (p + 24 - hour) % 24)
}

fn describe(context: &crate::memory::ContextKey) -> String {
    let mut parts = Vec::new();
    if let Some(t) = &context.time_block {
        parts.push(format!("time block {}", t));
    }
    if let Some(f) = &context.focus {
        parts.push(format!("focus {}", f));
    }
    if let Some(e) = &context.energy {
        parts.push(format!("{} energy", e));
    }
    if let Some(u) = &context.urgency {
        parts.push(format!("{} urgency", u));
    }
    if parts.is_empty() {
        "your usual setup".to_string()
    } else {
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learning::{relearn, LearningConfig};
    use crate::memory::{Energy, Focus, InMemoryBackend, Interaction, MemoryConfig, UserMemory, Urgency};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 4, hour, 0, 0).unwrap()
    }

    fn trained() -> Patterns {
        let mut memory = UserMemory::new("u");
        let base = at(6);
        for n in 0..12i64 {
            let action = if n % 2 == 0 { "plan" } else { "write" };
            memory.push_interaction(
                Interaction::new("task", base + Duration::days(n % 4) + Duration::hours(n % 3))
                    .with_action_type(action)
                    .with_time_block("morning")
                    .with_focus(Focus::DeepWork)
                    .with_energy(Energy::High)
                    .with_success(n % 5 != 0),
                1000,
            );
        }
        relearn(&mut memory, &LearningConfig::default());
        memory.patterns
    }

    fn state(action: &str) -> StateKey {
        PredictionContext::new(at(6))
            .with_action_type(action)
            .with_time_block("morning")
            .with_focus(Focus::DeepWork)
            .with_energy(Energy::High)
            .state_key()
    }

    #[tokio::test]
    async fn test_empty_log_predicts_nothing() {
        let store = Arc::new(MemoryStore::new(Arc::new(InMemoryBackend::new()), MemoryConfig::default()));
        let engine = PredictionEngine::new(store.clone());
        let p = engine.predict_next_action("nobody", &state("plan")).await;
        assert_eq!(p.confidence, 0.0);
        assert!(p.predictions.is_empty());

        let s = engine
            .predict_success_probability("nobody", &PredictionContext::new(at(9)))
            .await;
        assert_eq!(s.probability, 0.5);
        assert_eq!(s.confidence, 0.0);

        // 只读预测不会为未知用户创建缓存条目
        for i in 0..10 {
            let who = format!("stranger{}", i);
            engine.predict_optimal_timing(&who, "plan").await;
        }
        assert_eq!(store.active_users().await, 0);
    }

    #[test]
    fn test_next_action_alternates() {
        let patterns = trained();
        let p = next_action_from(&patterns, &state("plan"));
        assert_eq!(p.predictions[0].state.action_type.as_deref(), Some("write"));
        assert!((p.confidence - 1.0).abs() < 1e-9);
        assert!(p.predictions.len() <= 3);
    }

    #[test]
    fn test_unknown_state_has_zero_confidence() {
        let patterns = trained();
        let p = next_action_from(&patterns, &state("email"));
        assert_eq!(p.confidence, 0.0);
        assert!(p.predictions.is_empty());
        assert_eq!(p.sequence_count, 11);
    }

    #[test]
    fn test_timing_sorted_by_confidence() {
        let t = timing_from(&trained(), "write");
        assert!(!t.recommendations.is_empty());
        for pair in t.recommendations.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
        assert!(t
            .recommendations
            .iter()
            .any(|r| r.source == TimingSource::ActionSpecific && r.value == "morning"));
        assert!(t
            .recommendations
            .iter()
            .any(|r| r.source == TimingSource::Circadian && r.value == "morning_person"));
    }

    #[test]
    fn test_success_probability_bounded() {
        let patterns = trained();
        let contexts = [
            PredictionContext::new(at(6)),
            PredictionContext::new(at(23))
                .with_action_type("plan")
                .with_focus(Focus::Other("??".into()))
                .with_energy(Energy::Low)
                .with_urgency(Urgency::Critical),
            PredictionContext::new(at(7))
                .with_action_type("write")
                .with_time_block("morning")
                .with_focus(Focus::DeepWork)
                .with_energy(Energy::High),
        ];
        for c in &contexts {
            let s = success_from(&patterns, c);
            assert!((0.0..=1.0).contains(&s.probability));
            assert!((0.0..=1.0).contains(&s.confidence));
        }
    }

    #[test]
    fn test_aligned_context_beats_misaligned() {
        let patterns = trained();
        let aligned = success_from(
            &patterns,
            &PredictionContext::new(at(7))
                .with_action_type("write")
                .with_time_block("morning")
                .with_focus(Focus::DeepWork)
                .with_energy(Energy::High),
        );
        let misaligned = success_from(
            &patterns,
            &PredictionContext::new(at(7))
                .with_action_type("write")
                .with_focus(Focus::Admin)
                .with_energy(Energy::Low),
        );
        assert!(aligned.probability > misaligned.probability);
        assert!(aligned.factors.iter().any(|f| f.name == "behavioral_alignment"));
    }

    #[test]
    fn test_recommendations_sorted_by_priority() {
        let patterns = trained();
        let ctx = PredictionContext::new(at(7))
            .with_action_type("write")
            .with_focus(Focus::Admin)
            .with_energy(Energy::Low);
        let recs = recommendations_from(&patterns, &ctx);
        assert!(recs
            .iter()
            .any(|r| r.category == RecommendationCategory::BehavioralMismatch));
        assert!(recs
            .iter()
            .any(|r| r.category == RecommendationCategory::ProductivityWindow
                && r.priority == RecommendationPriority::High));
        for pair in recs.windows(2) {
            assert!(pair[0].priority >= pair[1].priority);
        }
    }

    #[test]
    fn test_next_peak_wraps() {
        assert_eq!(next_peak(&[6, 7], 23), Some(6));
        assert_eq!(next_peak(&[6, 20], 10), Some(20));
        assert_eq!(next_peak(&[], 10), None);
    }
}
