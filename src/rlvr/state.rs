//! 视觉状态与数值编码
//!
//! 状态 = 界面快照 + 用户上下文 + 最近若干条交互历史，编码为扁平的 `f64` 向量作为策略表的键。
//! 对象按键名有序展开，每个字段标量化：数字原样、布尔 0/1、字符串取长度、数组/对象取元素数、null 为 0。

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VisualState {
    pub interface: Value,
    pub user_context: Value,
    pub history: Vec<Value>,
}

impl VisualState {
    /// 构造时只保留最近 `window` 条历史
    pub fn new(interface: Value, user_context: Value, history: Vec<Value>, window: usize) -> Self {
        let mut state = Self {
            interface,
            user_context,
            history,
        };
        state.truncate_history(window);
        state
    }

    pub fn truncate_history(&mut self, window: usize) {
        let n = self.history.len();
        if n > window {
            self.history.drain(0..n - window);
        }
    }

    pub fn encode(&self) -> EncodedState {
        let mut features = Vec::new();
        flatten_into(&self.interface, &mut features);
        flatten_into(&self.user_context, &mut features);
        features.push(self.history.len() as f64);
        EncodedState(features)
    }

    /// 历史中是否出现过该动作类型（`actionType` / `action_type` / `action` 任一字段）
    pub fn has_seen_action(&self, action_type: &str) -> bool {
        self.history.iter().any(|entry| {
            ["actionType", "action_type", "action"]
                .iter()
                .any(|k| entry.get(k).and_then(Value::as_str) == Some(action_type))
        })
    }
}

fn flatten_into(value: &Value, out: &mut Vec<f64>) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.extend(keys.into_iter().map(|k| scalarize(&map[k])));
        }
        other => out.push(scalarize(other)),
    }
}

fn scalarize(value: &Value) -> f64 {
    match value {
        Value::Null => 0.0,
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.chars().count() as f64,
        Value::Array(a) => a.len() as f64,
        Value::Object(o) => o.len() as f64,
    }
}

/// 编码后的状态；按位比较，`-0.0` 与 `0.0` 视为相同，所有 NaN 视为相同
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedState(pub Vec<f64>);

impl EncodedState {
    fn canonical_bits(&self) -> impl Iterator<Item = u64> + '_ {
        self.0.iter().map(|f| {
            if f.is_nan() {
                f64::NAN.to_bits()
            } else if *f == 0.0 {
                0u64
            } else {
                f.to_bits()
            }
        })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for EncodedState {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.canonical_bits().eq(other.canonical_bits())
    }
}

impl Eq for EncodedState {}

impl Hash for EncodedState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.len().hash(state);
        for bits in self.canonical_bits() {
            bits.hash(state);
        }
    }
}
