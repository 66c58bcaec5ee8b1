use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::{
    common::{Bounds, Vec2},
    drone::{Drone, DroneConfig, DroneStatus},
    event::{DroneEvent, DroneEventType, suppression_payload},
    task::Task,
    traits::{IAgent, ISuppressor},
};

/// ホーム位置判定の許容距離
const AT_HOME_EPSILON: f64 = 1e-6;
/// 消火剤枯渇判定の閾値
const PAYLOAD_EMPTY_EPSILON: f64 = 1e-9;
const FIRE_GOTO_ARRIVE_EPS: f64 = 1.0;
const FIRE_GOTO_PRIORITY: i32 = 20;
const FIRE_HOLD_EPS: f64 = 0.6;
const FIRE_HOLD_PRIORITY: i32 = 30;

/// 消火機の性能設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FirefightingConfig {
    #[serde(flatten)]
    pub drone: DroneConfig,
    /// 消火剤の搭載量
    pub payload_capacity: f64,
    /// 毎秒の散布量
    pub use_rate_per_s: f64,
    /// 散布可能な火点までの距離 (m)
    pub suppress_range_m: f64,
    /// ホーム到着時に自動補充するか
    pub refill_at_home: bool,
}

impl Default for FirefightingConfig {
    fn default() -> Self {
        Self {
            drone: DroneConfig::default(),
            payload_capacity: 80.0,
            use_rate_per_s: 1.5,
            suppress_range_m: 6.0,
            refill_at_home: true,
        }
    }
}

/// 消火ドローン
///
/// 基本ドローンの tick を実行した後、結果の位置・状態に対して
/// 補充と散布のオーバーレイ処理を行います。散布は状態列挙とは独立した
/// フラグで管理され、tick 駆動でのみ進行します。
#[derive(Debug, Clone)]
pub struct FirefightingDrone {
    pub base: Drone,
    pub config: FirefightingConfig,
    pub payload_left: f64,
    pub suppressing: bool,
    pub fire_pos: Option<Vec2>,
}

impl FirefightingDrone {
    pub fn new(id: impl Into<String>, home: Vec2, config: FirefightingConfig) -> Self {
        let base = Drone::new(id, home, config.drone.clone());
        let payload_left = config.payload_capacity;
        Self {
            base,
            config,
            payload_left,
            suppressing: false,
            fire_pos: None,
        }
    }

    pub fn tick(&mut self, dt: f64, ts: f64, bounds: Option<&Bounds>) -> Vec<DroneEvent> {
        let mut events = self.base.tick(dt, ts, bounds);
        if !self.base.is_operational() {
            return events;
        }

        if self.config.refill_at_home
            && self.base.pos.distance(&self.base.home) <= AT_HOME_EPSILON
            && self.payload_left < self.config.payload_capacity
        {
            self.payload_left = self.config.payload_capacity;
            info!(drone_id = %self.base.id, payload = self.payload_left, "FIRE_DRONE_REFILLED: ホームで消火剤を補充しました");
            events.push(self.base.event(
                DroneEventType::PayloadRefilled,
                ts,
                "Refilled firefighting payload at home".to_string(),
            ));
        }

        if self.suppressing {
            if let Some(fire_pos) = self.fire_pos {
                if self.base.pos.distance(&fire_pos) <= self.config.suppress_range_m {
                    events.extend(self.suppress(dt, ts));
                }
            }
        }

        events
    }

    /// 散布範囲内での処理
    fn suppress(&mut self, dt: f64, ts: f64) -> Vec<DroneEvent> {
        let mut events = Vec::new();

        if self.base.task.is_none() || self.base.status == DroneStatus::Idle {
            let hold = Task::hold(
                format!("hold-fire-{}-{}", self.base.id, (ts * 1000.0) as i64),
                self.base.pos,
                None,
                FIRE_HOLD_EPS,
            )
            .with_priority(FIRE_HOLD_PRIORITY);
            events.extend(self.base.assign_task(hold, ts));
            events.push(self.base.event(
                DroneEventType::SuppressionEngaged,
                ts,
                "Fire suppression started (holding position)".to_string(),
            ));
        }

        if self.payload_left > 0.0 {
            let used = self.payload_left.min(self.config.use_rate_per_s * dt);
            self.payload_left -= used;

            let mut progress = self.base.event(
                DroneEventType::Suppressing,
                ts,
                format!("Suppressing fire... used={:.2}, left={:.2}", used, self.payload_left),
            );
            progress.payload = Some(suppression_payload(used, self.payload_left));
            events.push(progress);

            if self.payload_left <= PAYLOAD_EMPTY_EPSILON {
                self.payload_left = 0.0;
                self.suppressing = false;
                info!(drone_id = %self.base.id, "FIRE_DRONE_PAYLOAD_EMPTY: 消火剤が尽きたため散布を停止します");
                events.push(self.base.event(
                    DroneEventType::PayloadEmpty,
                    ts,
                    "Payload empty. Fire suppression done/paused.".to_string(),
                ));
            }
        }

        events
    }
}

impl ISuppressor for FirefightingDrone {
    /// 火点へ GOTO を割り当て、到着後にホバリングして散布する
    fn start_suppress_fire(&mut self, fire_pos: Vec2, ts: f64) -> Vec<DroneEvent> {
        if !self.base.is_operational() {
            return Vec::new();
        }

        self.fire_pos = Some(fire_pos);
        self.suppressing = true;

        let goto = Task::goto(
            format!("goto-fire-{}-{}", self.base.id, (ts * 1000.0) as i64),
            fire_pos,
            FIRE_GOTO_ARRIVE_EPS,
        )
        .with_priority(FIRE_GOTO_PRIORITY);

        debug!(drone_id = %self.base.id, fire_x = fire_pos.x, fire_y = fire_pos.y, "FIRE_DRONE_DISPATCHED");

        let mut events = self.base.assign_task(goto, ts);
        events.push(self.base.event(
            DroneEventType::SuppressionRequested,
            ts,
            format!("Fire suppression requested -> {fire_pos}"),
        ));
        events
    }

    fn stop_suppress_fire(&mut self, ts: f64, reason: &str) -> Vec<DroneEvent> {
        self.suppressing = false;
        self.fire_pos = None;
        vec![self.base.event(DroneEventType::SuppressionStopped, ts, reason.to_string())]
    }

    fn payload_left(&self) -> f64 {
        self.payload_left
    }

    fn is_suppressing(&self) -> bool {
        self.suppressing
    }
}

impl IAgent for FirefightingDrone {
    fn get_id(&self) -> &str {
        &self.base.id
    }

    fn drone(&self) -> &Drone {
        &self.base
    }

    fn tick(&mut self, dt: f64, ts: f64, bounds: Option<&Bounds>) -> Vec<DroneEvent> {
        FirefightingDrone::tick(self, dt, ts, bounds)
    }

    fn assign_task(&mut self, task: Task, ts: f64) -> Vec<DroneEvent> {
        self.base.assign_task(task, ts)
    }

    fn set_offline(&mut self, ts: f64, reason: &str) -> Vec<DroneEvent> {
        self.suppressing = false;
        self.base.set_offline(ts, reason)
    }

    fn mark_failed(&mut self, ts: f64, reason: &str) -> Vec<DroneEvent> {
        self.suppressing = false;
        self.base.mark_failed(ts, reason)
    }

    fn as_suppressor(&self) -> Option<&dyn ISuppressor> {
        Some(self)
    }

    fn as_suppressor_mut(&mut self) -> Option<&mut dyn ISuppressor> {
        Some(self)
    }
}
