//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CADENCE__*` 覆盖（双下划线表示嵌套，如 `CADENCE__RLVR__EPSILON=0.2`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub memory: MemorySection,
    #[serde(default)]
    pub learning: LearningSection,
    #[serde(default)]
    pub rlvr: RlvrSection,
    #[serde(default)]
    pub scheduler: SchedulerSection,
}

/// [memory] 段：存储目录、交互日志上限、默认清理天数
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_max_interactions")]
    pub max_interactions: usize,
    #[serde(default = "default_prune_days")]
    pub prune_days: i64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data/memory")
}

fn default_max_interactions() -> usize {
    1000
}

fn default_prune_days() -> i64 {
    90
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_interactions: default_max_interactions(),
            prune_days: default_prune_days(),
        }
    }
}

/// [learning] 段：节律分类的经验常数
#[derive(Debug, Clone, Deserialize)]
pub struct LearningSection {
    #[serde(default = "default_success_weight")]
    pub success_weight: f64,
    #[serde(default = "default_performance_weight")]
    pub performance_weight: f64,
    #[serde(default = "default_frequency_weight")]
    pub frequency_weight: f64,
    #[serde(default = "default_balanced_spread")]
    pub balanced_spread: f64,
    #[serde(default = "default_dominance_margin")]
    pub dominance_margin: f64,
    #[serde(default = "default_min_interactions")]
    pub min_interactions: usize,
    #[serde(default = "default_predictive_min_interactions")]
    pub predictive_min_interactions: usize,
    #[serde(default = "default_top_contexts")]
    pub top_contexts: usize,
}

fn default_success_weight() -> f64 {
    0.4
}

fn default_performance_weight() -> f64 {
    0.4
}

fn default_frequency_weight() -> f64 {
    0.2
}

fn default_balanced_spread() -> f64 {
    10.0
}

fn default_dominance_margin() -> f64 {
    5.0
}

fn default_min_interactions() -> usize {
    3
}

fn default_predictive_min_interactions() -> usize {
    10
}

fn default_top_contexts() -> usize {
    5
}

impl Default for LearningSection {
    fn default() -> Self {
        Self {
            success_weight: default_success_weight(),
            performance_weight: default_performance_weight(),
            frequency_weight: default_frequency_weight(),
            balanced_spread: default_balanced_spread(),
            dominance_margin: default_dominance_margin(),
            min_interactions: default_min_interactions(),
            predictive_min_interactions: default_predictive_min_interactions(),
            top_contexts: default_top_contexts(),
        }
    }
}

/// [rlvr] 段：学习率、折扣、探索率、经验缓冲上限、状态历史窗口
#[derive(Debug, Clone, Deserialize)]
pub struct RlvrSection {
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_gamma")]
    pub gamma: f64,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default = "default_experience_capacity")]
    pub experience_capacity: usize,
    #[serde(default = "default_history_window")]
    pub history_window: usize,
}

fn default_alpha() -> f64 {
    0.001
}

fn default_gamma() -> f64 {
    0.95
}

fn default_epsilon() -> f64 {
    0.1
}

fn default_experience_capacity() -> usize {
    1000
}

fn default_history_window() -> usize {
    10
}

impl Default for RlvrSection {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            gamma: default_gamma(),
            epsilon: default_epsilon(),
            experience_capacity: default_experience_capacity(),
            history_window: default_history_window(),
        }
    }
}

/// [scheduler] 段：评估周期、结果历史、工作池与灵敏度边界
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_feedback_window")]
    pub feedback_window: usize,
    /// 工作池并发上限
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// 单次卸载等待上限（毫秒），应大于动作自身超时
    #[serde(default = "default_offload_timeout_ms")]
    pub offload_timeout_ms: u64,
    #[serde(default = "default_min_sensitivity")]
    pub min_sensitivity: f64,
    #[serde(default = "default_max_sensitivity")]
    pub max_sensitivity: f64,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_history_capacity() -> usize {
    100
}

fn default_feedback_window() -> usize {
    20
}

fn default_max_workers() -> usize {
    3
}

fn default_offload_timeout_ms() -> u64 {
    35_000
}

fn default_min_sensitivity() -> f64 {
    0.1
}

fn default_max_sensitivity() -> f64 {
    5.0
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            history_capacity: default_history_capacity(),
            feedback_window: default_feedback_window(),
            max_workers: default_max_workers(),
            offload_timeout_ms: default_offload_timeout_ms(),
            min_sensitivity: default_min_sensitivity(),
            max_sensitivity: default_max_sensitivity(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 CADENCE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CADENCE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CADENCE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置（调用方决定是否用新配置重建组件）
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}
