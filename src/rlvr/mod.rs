//! 奖励学习：视觉状态编码、奖励函数、Q 表与单样本学习智能体

pub mod agent;
pub mod policy;
pub mod reward;
pub mod state;

pub use agent::{Experience, RlvrAgent, RlvrConfig, RLVR_CATEGORY};
pub use policy::QTable;
pub use reward::{compute_reward, Feedback, Outcome, RewardSignal};
pub use state::{EncodedState, VisualState};
