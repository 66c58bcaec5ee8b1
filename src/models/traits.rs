use crate::models::common::{Bounds, Vec2};
use crate::models::drone::Drone;
use crate::models::event::DroneEvent;
use crate::models::task::Task;

/// 全てのドローンエージェントが実装する基本インターフェース
///
/// ランタイムは機体を `Box<dyn IAgent>` として保持し、派生機体（消火機など）も
/// 同じ tick / 割り当て経路で扱います。
pub trait IAgent: Send {
    /// エージェントIDの取得
    fn get_id(&self) -> &str;

    /// 基本機体状態（位置・電池・状態・タスク）への参照
    fn drone(&self) -> &Drone;

    /// 1ティックの処理実行
    fn tick(&mut self, dt: f64, ts: f64, bounds: Option<&Bounds>) -> Vec<DroneEvent>;

    /// タスクの割り当て（現在のタスクは破棄される）
    fn assign_task(&mut self, task: Task, ts: f64) -> Vec<DroneEvent>;

    /// オフライン化
    fn set_offline(&mut self, ts: f64, reason: &str) -> Vec<DroneEvent>;

    /// 外部からの故障マーク
    fn mark_failed(&mut self, ts: f64, reason: &str) -> Vec<DroneEvent>;

    /// エージェントが稼働中かどうか
    fn is_active(&self) -> bool {
        self.drone().is_operational()
    }

    fn get_position(&self) -> Vec2 {
        self.drone().pos
    }

    /// 消火機能を持つ場合はそのインターフェースを返す
    fn as_suppressor(&self) -> Option<&dyn ISuppressor> {
        None
    }

    fn as_suppressor_mut(&mut self) -> Option<&mut dyn ISuppressor> {
        None
    }
}

/// 消火（散布）能力のインターフェース
pub trait ISuppressor {
    /// 火点への移動と散布を開始
    fn start_suppress_fire(&mut self, fire_pos: Vec2, ts: f64) -> Vec<DroneEvent>;

    /// 散布を停止
    fn stop_suppress_fire(&mut self, ts: f64, reason: &str) -> Vec<DroneEvent>;

    /// 残り消火剤量
    fn payload_left(&self) -> f64;

    fn is_suppressing(&self) -> bool;
}
