//! 单条交互的表现分（0–100）

use crate::memory::{Energy, Focus, Interaction, Urgency};

const BASE_SCORE: f64 = 50.0;

/// 基础 50；成功 +30 / 明确失败 −20；精力 high +10 / low −10；
/// 专注 deep-work +10 / meeting-prep +5；紧急 critical +5 / low −5；截断到 [0,100]
pub fn performance_score(interaction: &Interaction) -> f64 {
    let mut score = BASE_SCORE;

    match interaction.success {
        Some(true) => score += 30.0,
        Some(false) => score -= 20.0,
        None => {}
    }

    match interaction.energy {
        Some(Energy::High) => score += 10.0,
        Some(Energy::Low) => score -= 10.0,
        _ => {}
    }

    match interaction.focus {
        Some(Focus::DeepWork) => score += 10.0,
        Some(Focus::MeetingPrep) => score += 5.0,
        _ => {}
    }

    match interaction.urgency {
        Some(Urgency::Critical) => score += 5.0,
        Some(Urgency::Low) => score -= 5.0,
        _ => {}
    }

    score.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_neutral_interaction_scores_base() {
        assert_eq!(performance_score(&Interaction::new("x", Utc::now())), 50.0);
    }

    #[test]
    fn test_best_case_clamps_to_100() {
        let i = Interaction::new("x", Utc::now())
            .with_success(true)
            .with_energy(Energy::High)
            .with_focus(Focus::DeepWork)
            .with_urgency(Urgency::Critical);
        assert_eq!(performance_score(&i), 100.0);
    }

    #[test]
    fn test_worst_case() {
        let i = Interaction::new("x", Utc::now())
            .with_success(false)
            .with_energy(Energy::Low)
            .with_urgency(Urgency::Low);
        assert_eq!(performance_score(&i), 15.0);
    }

    #[test]
    fn test_meeting_prep_bonus() {
        let i = Interaction::new("x", Utc::now()).with_focus(Focus::MeetingPrep);
        assert_eq!(performance_score(&i), 55.0);
    }
}
