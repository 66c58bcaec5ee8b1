use thiserror::Error;

use crate::models::task::TaskError;
use crate::scenario::ScenarioError;

/// ランタイム操作のエラー
#[derive(Debug, Error)]
pub enum SimError {
    #[error("不明なドローンID: {0}")]
    UnknownAgent(String),

    #[error("不正なタスク: {0}")]
    InvalidTask(#[from] TaskError),

    #[error("消火機ではありません: {0}")]
    NotFirefighting(String),

    /// OFFLINE / FAILED の機体への操作
    #[error("ドローンは稼働していません: {0}")]
    AgentInactive(String),

    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error("シミュレーションループは既に実行中です")]
    AlreadyRunning,
}

pub type SimResult<T> = Result<T, SimError>;
