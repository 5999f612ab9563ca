//! 用户记忆的数据模型：偏好、交互日志、学习到的模式与行为
//!
//! 所有记录都可 JSON 序列化；交互与上下文带 `schema_version`，未知的枚举字符串
//! 落入 `Other(..)` 而不是反序列化失败。

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 当前记录结构版本
pub const SCHEMA_VERSION: u32 = 1;

fn schema_version() -> u32 {
    SCHEMA_VERSION
}

/// 专注状态
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Focus {
    DeepWork,
    MeetingPrep,
    Admin,
    Break,
    Other(String),
}

impl From<String> for Focus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "deep-work" => Focus::DeepWork,
            "meeting-prep" => Focus::MeetingPrep,
            "admin" => Focus::Admin,
            "break" => Focus::Break,
            _ => Focus::Other(s),
        }
    }
}

impl From<Focus> for String {
    fn from(f: Focus) -> Self {
        f.to_string()
    }
}

impl fmt::Display for Focus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Focus::DeepWork => write!(f, "deep-work"),
            Focus::MeetingPrep => write!(f, "meeting-prep"),
            Focus::Admin => write!(f, "admin"),
            Focus::Break => write!(f, "break"),
            Focus::Other(s) => write!(f, "{}", s),
        }
    }
}

/// 精力水平
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Energy {
    High,
    Medium,
    Low,
    Other(String),
}

impl From<String> for Energy {
    fn from(s: String) -> Self {
        match s.as_str() {
            "high" => Energy::High,
            "medium" => Energy::Medium,
            "low" => Energy::Low,
            _ => Energy::Other(s),
        }
    }
}

impl From<Energy> for String {
    fn from(e: Energy) -> Self {
        e.to_string()
    }
}

impl fmt::Display for Energy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Energy::High => write!(f, "high"),
            Energy::Medium => write!(f, "medium"),
            Energy::Low => write!(f, "low"),
            Energy::Other(s) => write!(f, "{}", s),
        }
    }
}

/// 紧急程度
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Urgency {
    Critical,
    High,
    Medium,
    Low,
    Other(String),
}

impl From<String> for Urgency {
    fn from(s: String) -> Self {
        match s.as_str() {
            "critical" => Urgency::Critical,
            "high" => Urgency::High,
            "medium" => Urgency::Medium,
            "low" => Urgency::Low,
            _ => Urgency::Other(s),
        }
    }
}

impl From<Urgency> for String {
    fn from(u: Urgency) -> Self {
        u.to_string()
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Urgency::Critical => write!(f, "critical"),
            Urgency::High => write!(f, "high"),
            Urgency::Medium => write!(f, "medium"),
            Urgency::Low => write!(f, "low"),
            Urgency::Other(s) => write!(f, "{}", s),
        }
    }
}

/// 单条交互记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Interaction {
    #[serde(default = "schema_version")]
    pub schema_version: u32,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub time_block: Option<String>,
    #[serde(default)]
    pub focus: Option<Focus>,
    #[serde(default)]
    pub energy: Option<Energy>,
    #[serde(default)]
    pub urgency: Option<Urgency>,
    /// 三态：成功 / 失败 / 未知
    #[serde(default)]
    pub success: Option<bool>,
    pub timestamp: DateTime<Utc>,
}

impl Interaction {
    pub fn new(kind: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            kind: kind.into(),
            operation: None,
            action_type: None,
            time_block: None,
            focus: None,
            energy: None,
            urgency: None,
            success: None,
            timestamp,
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_action_type(mut self, action_type: impl Into<String>) -> Self {
        self.action_type = Some(action_type.into());
        self
    }

    pub fn with_time_block(mut self, time_block: impl Into<String>) -> Self {
        self.time_block = Some(time_block.into());
        self
    }

    pub fn with_focus(mut self, focus: Focus) -> Self {
        self.focus = Some(focus);
        self
    }

    pub fn with_energy(mut self, energy: Energy) -> Self {
        self.energy = Some(energy);
        self
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = Some(urgency);
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = Some(success);
        self
    }

    /// 成功率统计所用的操作名：优先 operation，其次 actionType
    pub fn operation_key(&self) -> Option<&str> {
        self.operation.as_deref().or(self.action_type.as_deref())
    }

    pub fn context_key(&self) -> ContextKey {
        ContextKey {
            time_block: self.time_block.clone(),
            focus: self.focus.clone(),
            energy: self.energy.clone(),
            urgency: self.urgency.clone(),
        }
    }

    pub fn state_key(&self) -> StateKey {
        StateKey {
            context: self.context_key(),
            action_type: self.action_type.clone(),
        }
    }
}

/// (timeBlock, focus, energy, urgency) 上下文元组
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextKey {
    pub time_block: Option<String>,
    pub focus: Option<Focus>,
    pub energy: Option<Energy>,
    pub urgency: Option<Urgency>,
}

impl ContextKey {
    /// 四个字段中相等的比例（0..=1）
    pub fn match_fraction(&self, other: &ContextKey) -> f64 {
        let matches = [
            self.time_block == other.time_block,
            self.focus == other.focus,
            self.energy == other.energy,
            self.urgency == other.urgency,
        ]
        .iter()
        .filter(|m| **m)
        .count();
        matches as f64 / 4.0
    }
}

/// 转移表中的状态：上下文 + 动作类型
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateKey {
    pub context: ContextKey,
    pub action_type: Option<String>,
}

/// 工作时间窗口（小时，左闭右开）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourWindow {
    pub start: u32,
    pub end: u32,
}

impl HourWindow {
    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            hour >= self.start && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

/// 用户偏好
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Preferences {
    pub work_hours: HourWindow,
    pub focus_windows: Vec<HourWindow>,
    pub break_windows: Vec<HourWindow>,
    pub no_meeting_windows: Vec<HourWindow>,
    pub notifications_enabled: bool,
    pub proactive_suggestions: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            work_hours: HourWindow { start: 9, end: 17 },
            focus_windows: Vec::new(),
            break_windows: Vec::new(),
            no_meeting_windows: Vec::new(),
            notifications_enabled: true,
            proactive_suggestions: true,
        }
    }
}

/// 一天中的时段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayPeriod {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl DayPeriod {
    pub const ALL: [DayPeriod; 4] = [
        DayPeriod::Morning,
        DayPeriod::Afternoon,
        DayPeriod::Evening,
        DayPeriod::Night,
    ];

    /// morning 05–12, afternoon 12–17, evening 17–22, night 22–05
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => DayPeriod::Morning,
            12..=16 => DayPeriod::Afternoon,
            17..=21 => DayPeriod::Evening,
            _ => DayPeriod::Night,
        }
    }
}

impl fmt::Display for DayPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DayPeriod::Morning => write!(f, "morning"),
            DayPeriod::Afternoon => write!(f, "afternoon"),
            DayPeriod::Evening => write!(f, "evening"),
            DayPeriod::Night => write!(f, "night"),
        }
    }
}

/// 昼夜节律类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircadianType {
    MorningPerson,
    EveningPerson,
    NightOwl,
    Balanced,
    #[default]
    InsufficientData,
}

impl fmt::Display for CircadianType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircadianType::MorningPerson => "morning_person",
            CircadianType::EveningPerson => "evening_person",
            CircadianType::NightOwl => "night_owl",
            CircadianType::Balanced => "balanced",
            CircadianType::InsufficientData => "insufficient_data",
        };
        write!(f, "{}", s)
    }
}

/// 单个时段的统计
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodStats {
    pub count: usize,
    pub successes: usize,
    pub success_rate: f64,
    pub avg_performance: f64,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeriodBreakdown {
    pub morning: PeriodStats,
    pub afternoon: PeriodStats,
    pub evening: PeriodStats,
    pub night: PeriodStats,
}

impl PeriodBreakdown {
    pub fn get(&self, period: DayPeriod) -> &PeriodStats {
        match period {
            DayPeriod::Morning => &self.morning,
            DayPeriod::Afternoon => &self.afternoon,
            DayPeriod::Evening => &self.evening,
            DayPeriod::Night => &self.night,
        }
    }

    pub fn get_mut(&mut self, period: DayPeriod) -> &mut PeriodStats {
        match period {
            DayPeriod::Morning => &mut self.morning,
            DayPeriod::Afternoon => &mut self.afternoon,
            DayPeriod::Evening => &mut self.evening,
            DayPeriod::Night => &mut self.night,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CircadianAnalysis {
    #[serde(rename = "type")]
    pub kind: CircadianType,
    pub confidence: f64,
    /// 最多 3 个小时
    pub peak_hours: Vec<u32>,
    pub periods: PeriodBreakdown,
    pub recommendations: Vec<String>,
}

/// 时间模式：频率表、最优值、昼夜分析
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimePatterns {
    pub hour_frequency: BTreeMap<u32, usize>,
    /// 星期几（Mon..Sun）
    pub day_frequency: BTreeMap<String, usize>,
    /// weekday / weekend
    pub weekday_frequency: BTreeMap<String, usize>,
    pub time_block_frequency: BTreeMap<String, usize>,
    pub optimal_hour: Option<u32>,
    pub optimal_day: Option<String>,
    pub optimal_weekday: Option<String>,
    pub optimal_time_block: Option<String>,
    pub total: usize,
    pub circadian: CircadianAnalysis,
}

/// 单个维度的偏好：众数 + 占比
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preference {
    pub value: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BehavioralPreferences {
    pub focus: Option<Preference>,
    pub energy: Option<Preference>,
    pub urgency: Option<Preference>,
    pub action_type: Option<Preference>,
}

/// 单个操作的成功模式
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SuccessPattern {
    pub attempts: usize,
    pub successes: usize,
    pub success_rate: f64,
    pub optimal_contexts: Vec<ContextKey>,
    pub failure_contexts: Vec<ContextKey>,
    /// 成功上下文中出现最多的时间块
    pub optimal_time_block: Option<String>,
}

/// 上下文元组的表现
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPerformance {
    pub context: ContextKey,
    pub samples: usize,
    pub success_rate: f64,
    pub avg_performance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextState {
    pub state: StateKey,
    pub count: usize,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub from: StateKey,
    pub total: usize,
    /// 按概率降序
    pub next: Vec<NextState>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PredictivePatterns {
    pub transitions: Vec<Transition>,
    pub sequence_count: usize,
}

impl PredictivePatterns {
    pub fn lookup(&self, state: &StateKey) -> Option<&Transition> {
        self.transitions.iter().find(|t| &t.from == state)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Patterns {
    pub time_blocks: TimePatterns,
    pub behavioral_preferences: BehavioralPreferences,
    pub success_patterns: BTreeMap<String, SuccessPattern>,
    pub optimal_contexts: Vec<ContextPerformance>,
    pub predictive_patterns: PredictivePatterns,
}

/// 学习到的单条行为
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedBehavior {
    pub value: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub confidence: f64,
}

/// 每用户一份的持久记忆
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMemory {
    pub user_id: String,
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default)]
    pub patterns: Patterns,
    /// 追加写，超过上限时淘汰最旧的
    #[serde(default)]
    pub interactions: Vec<Interaction>,
    /// category -> key -> behavior
    #[serde(default)]
    pub learned_behaviors: BTreeMap<String, BTreeMap<String, LearnedBehavior>>,
    pub created_at: DateTime<Utc>,
    /// 最近一次保存时间
    pub timestamp: DateTime<Utc>,
}

impl UserMemory {
    pub fn new(user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            preferences: Preferences::default(),
            patterns: Patterns::default(),
            interactions: Vec::new(),
            learned_behaviors: BTreeMap::new(),
            created_at: now,
            timestamp: now,
        }
    }

    /// 追加交互并按上限淘汰最旧条目
    pub fn push_interaction(&mut self, interaction: Interaction, cap: usize) {
        self.interactions.push(interaction);
        let n = self.interactions.len();
        if n > cap {
            self.interactions.drain(0..n - cap);
        }
    }

    pub fn behavior(&self, category: &str, key: &str) -> Option<&LearnedBehavior> {
        self.learned_behaviors.get(category)?.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_unknown_enum_strings_are_kept() {
        let json = r#"{"type":"task","focus":"pairing","energy":"high","urgency":"whenever","timestamp":"2024-03-04T07:00:00Z"}"#;
        let i: Interaction = serde_json::from_str(json).unwrap();
        assert_eq!(i.schema_version, SCHEMA_VERSION);
        assert_eq!(i.focus, Some(Focus::Other("pairing".into())));
        assert_eq!(i.energy, Some(Energy::High));
        assert_eq!(i.urgency, Some(Urgency::Other("whenever".into())));
        assert_eq!(i.success, None);

        let back = serde_json::to_value(&i).unwrap();
        assert_eq!(back["focus"], "pairing");
        assert_eq!(back["type"], "task");
    }

    #[test]
    fn test_push_interaction_evicts_oldest() {
        let mut memory = UserMemory::new("u1");
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for i in 0..15 {
            memory.push_interaction(
                Interaction::new(format!("k{}", i), t0 + chrono::Duration::minutes(i)),
                10,
            );
        }
        assert_eq!(memory.interactions.len(), 10);
        assert_eq!(memory.interactions[0].kind, "k5");
        assert_eq!(memory.interactions[9].kind, "k14");
    }

    #[test]
    fn test_day_period_boundaries() {
        assert_eq!(DayPeriod::from_hour(4), DayPeriod::Night);
        assert_eq!(DayPeriod::from_hour(5), DayPeriod::Morning);
        assert_eq!(DayPeriod::from_hour(12), DayPeriod::Afternoon);
        assert_eq!(DayPeriod::from_hour(17), DayPeriod::Evening);
        assert_eq!(DayPeriod::from_hour(22), DayPeriod::Night);
    }

    #[test]
    fn test_context_match_fraction() {
        let a = ContextKey {
            time_block: Some("morning".into()),
            focus: Some(Focus::DeepWork),
            energy: Some(Energy::High),
            urgency: None,
        };
        let mut b = a.clone();
        assert_eq!(a.match_fraction(&b), 1.0);
        b.energy = Some(Energy::Low);
        assert_eq!(a.match_fraction(&b), 0.75);
    }

    #[test]
    fn test_hour_window_wraps_midnight() {
        let w = HourWindow { start: 22, end: 2 };
        assert!(w.contains(23));
        assert!(w.contains(1));
        assert!(!w.contains(12));
    }
}
