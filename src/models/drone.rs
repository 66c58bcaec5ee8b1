//! # Drone モジュール
//!
//! ドローンのタスク実行ステートマシンを提供します。
//!
//! ## ティック処理順序
//!
//! 1. OFFLINE / FAILED の場合は何もしない
//! 2. 電池消費
//! 3. 低電池時の強制帰還（現在のタスクを破棄）
//! 4. タスク実行（タスクが無ければ IDLE へ）
//! 5. 領域境界へのクランプ
//! 6. ハートビート
//!
//! 後段の処理は前段の変更結果に依存するため、この順序は固定です。

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::models::{
    common::{Bounds, Vec2, math_utils},
    event::{DroneEvent, DroneEventType},
    task::{DEFAULT_HOME_ARRIVE_EPS, Task, TaskKind, TaskType},
    traits::IAgent,
};

/// タスク速度上書きの下限 (m/s)
pub const MIN_TASK_SPEED: f64 = 0.1;
/// 経過時間判定の許容誤差（dt の累積誤差対策）
const DURATION_EPSILON: f64 = 1e-9;
/// 低電池時に生成する帰還タスクの優先度
const RETURN_HOME_PRIORITY: i32 = 10;

/// ドローンの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DroneStatus {
    /// タスク無し・待機
    Idle,
    /// PATH / GOTO の移動中
    Navigating,
    /// ORBIT / HOLD の実行中
    Executing,
    /// 帰還中
    Returning,
    /// 離脱（終端状態）
    Offline,
    /// 故障（終端状態）
    Failed,
}

impl DroneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DroneStatus::Idle => "IDLE",
            DroneStatus::Navigating => "NAVIGATING",
            DroneStatus::Executing => "EXECUTING",
            DroneStatus::Returning => "RETURNING",
            DroneStatus::Offline => "OFFLINE",
            DroneStatus::Failed => "FAILED",
        }
    }

    /// タスク種別から割り当て後の状態を決定
    pub fn for_task(task_type: TaskType) -> Self {
        match task_type {
            TaskType::Path | TaskType::GoTo => DroneStatus::Navigating,
            TaskType::Orbit | TaskType::Hold => DroneStatus::Executing,
            TaskType::ReturnHome => DroneStatus::Returning,
        }
    }
}

impl std::fmt::Display for DroneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 機体性能設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DroneConfig {
    /// 巡航速度 (m/s)
    pub speed_mps: f64,
    pub battery_capacity: f64,
    /// 毎秒の電池消費量
    pub battery_drain_per_s: f64,
    /// この値以下で強制帰還
    pub battery_low_threshold: f64,
    pub heartbeat_period_s: f64,
    /// ORBIT の円周分割数（4未満は4として扱う）
    pub orbit_points: usize,
}

impl Default for DroneConfig {
    fn default() -> Self {
        Self {
            speed_mps: 8.0,
            battery_capacity: 100.0,
            battery_drain_per_s: 0.12,
            battery_low_threshold: 20.0,
            heartbeat_period_s: 1.0,
            orbit_points: 12,
        }
    }
}

/// タスク1ステップの結果
enum StepOutcome {
    Continue,
    Complete(String),
    /// 帰還完了（IDLE への遷移を伴う）
    ArrivedHome,
}

/// ドローンエージェント
///
/// 位置・電池・状態・現在タスクを所有し、tick ごとに物理的に前進します。
/// 実行中に破棄されることはなく、OFFLINE / FAILED は常駐したままの終端状態です。
#[derive(Debug, Clone)]
pub struct Drone {
    pub id: String,
    pub pos: Vec2,
    /// ホーム位置（生成後は不変）
    pub home: Vec2,
    pub config: DroneConfig,
    pub status: DroneStatus,
    pub battery: f64,
    pub task: Option<Task>,
    pub last_heartbeat_ts: f64,
    pub last_seen_ts: f64,
    orbit_index: usize,
}

impl Drone {
    /// ホーム位置に満充電の状態で新しいドローンを作成します
    pub fn new(id: impl Into<String>, home: Vec2, config: DroneConfig) -> Self {
        let battery = config.battery_capacity;
        Self {
            id: id.into(),
            pos: home,
            home,
            config,
            status: DroneStatus::Idle,
            battery,
            task: None,
            last_heartbeat_ts: 0.0,
            last_seen_ts: 0.0,
            orbit_index: 0,
        }
    }

    pub fn is_operational(&self) -> bool {
        !matches!(self.status, DroneStatus::Offline | DroneStatus::Failed)
    }

    pub fn orbit_index(&self) -> usize {
        self.orbit_index
    }

    /// タスクの割り当て
    ///
    /// 状態をタスク種別に応じて遷移させ（変化が無ければ STATUS_CHANGED は出さない）、
    /// 続けて TASK_ASSIGNED を発行します。終端状態の機体には割り当てません。
    pub fn assign_task(&mut self, task: Task, ts: f64) -> Vec<DroneEvent> {
        if !self.is_operational() {
            warn!(
                drone_id = %self.id,
                task_id = %task.id,
                status = %self.status,
                "DRONE_ASSIGN_REJECTED: 終端状態のドローンにはタスクを割り当てられません"
            );
            return Vec::new();
        }

        let task_type = task.task_type();
        let new_status = DroneStatus::for_task(task_type);

        debug!(
            drone_id = %self.id,
            task_id = %task.id,
            task_type = %task_type,
            priority = task.priority,
            "DRONE_TASK_ASSIGNED: タスクが割り当てられました"
        );

        self.task = Some(task);

        let mut events = self.set_status(new_status, ts, format!("Task assigned: {task_type}"));
        events.push(self.event(DroneEventType::TaskAssigned, ts, format!("Assigned task={task_type}")));
        events
    }

    /// オフライン化（タスクは破棄）
    pub fn set_offline(&mut self, ts: f64, reason: &str) -> Vec<DroneEvent> {
        self.task = None;
        let mut events = self.set_status(DroneStatus::Offline, ts, reason.to_string());
        events.push(self.event(DroneEventType::Offline, ts, reason.to_string()));

        info!(drone_id = %self.id, reason, "DRONE_OFFLINE: ドローンがオフラインになりました");
        events
    }

    /// 故障マーク（タスクは破棄）
    pub fn mark_failed(&mut self, ts: f64, reason: &str) -> Vec<DroneEvent> {
        self.task = None;
        info!(drone_id = %self.id, reason, "DRONE_FAILED: ドローンが故障状態になりました");
        self.set_status(DroneStatus::Failed, ts, reason.to_string())
    }

    /// 1ティックの処理
    ///
    /// # 引数
    ///
    /// * `dt` - 時間刻み（秒）
    /// * `ts` - 現在のシミュレーション時刻（秒）
    /// * `bounds` - 位置の境界制限（任意）
    ///
    /// # 戻り値
    ///
    /// 発生順のイベント列
    pub fn tick(&mut self, dt: f64, ts: f64, bounds: Option<&Bounds>) -> Vec<DroneEvent> {
        let mut events = Vec::new();

        if !self.is_operational() {
            return events;
        }

        self.battery = math_utils::clamp(
            self.battery - self.config.battery_drain_per_s * dt,
            0.0,
            self.config.battery_capacity,
        );

        if self.battery <= self.config.battery_low_threshold
            && !matches!(self.status, DroneStatus::Returning | DroneStatus::Idle)
        {
            events.extend(self.preempt_for_low_battery(ts));
        }

        if self.task.is_none() {
            if self.status != DroneStatus::Idle {
                events.extend(self.set_status(DroneStatus::Idle, ts, "No task".to_string()));
            }
        } else {
            events.extend(self.step_task(dt, ts));
            if self.task.is_none() && self.status != DroneStatus::Idle {
                events.extend(self.set_status(DroneStatus::Idle, ts, "Task finished".to_string()));
            }
        }

        if let Some(bounds) = bounds {
            self.pos = bounds.clamp(self.pos);
        }

        if ts - self.last_heartbeat_ts >= self.config.heartbeat_period_s {
            self.last_heartbeat_ts = ts;
            self.last_seen_ts = ts;
            events.push(self.event(DroneEventType::Heartbeat, ts, "heartbeat".to_string()));
        }

        trace!(
            drone_id = %self.id,
            x = self.pos.x,
            y = self.pos.y,
            battery = self.battery,
            status = %self.status,
            "DRONE_TICK"
        );

        events
    }

    /// 低電池による強制帰還
    ///
    /// 実行中のタスクは破棄され、低電池から回復しても再開しません。
    fn preempt_for_low_battery(&mut self, ts: f64) -> Vec<DroneEvent> {
        let return_task = Task::return_home(
            format!("return-{}-{}", self.id, (ts * 1000.0) as i64),
            self.home,
            DEFAULT_HOME_ARRIVE_EPS,
        )
        .with_priority(RETURN_HOME_PRIORITY);

        warn!(
            drone_id = %self.id,
            battery = self.battery,
            threshold = self.config.battery_low_threshold,
            preempted_task = ?self.task.as_ref().map(|t| t.id.as_str()),
            "DRONE_BATTERY_LOW: 電池残量低下のため強制帰還します"
        );

        let mut events = self.assign_task(return_task, ts);
        events.push(self.event(
            DroneEventType::BatteryLow,
            ts,
            format!("Battery low: {:.1}%", self.battery),
        ));
        events
    }

    fn set_status(&mut self, new_status: DroneStatus, ts: f64, reason: String) -> Vec<DroneEvent> {
        if new_status == self.status {
            return Vec::new();
        }
        debug!(
            drone_id = %self.id,
            previous = %self.status,
            current = %new_status,
            reason = %reason,
            "DRONE_STATUS_CHANGED"
        );
        self.status = new_status;
        vec![self.event(DroneEventType::StatusChanged, ts, reason)]
    }

    fn effective_speed(&self) -> f64 {
        match self.task.as_ref().and_then(|t| t.speed_override) {
            Some(speed) => speed.max(MIN_TASK_SPEED),
            None => self.config.speed_mps,
        }
    }

    fn step_task(&mut self, dt: f64, ts: f64) -> Vec<DroneEvent> {
        let max_step = self.effective_speed() * dt;
        let orbit_points = self.config.orbit_points;

        let outcome = match self.task.as_mut() {
            None => return Vec::new(),
            Some(task) => match task.validate() {
                Err(e) => {
                    warn!(
                        drone_id = %self.id,
                        task_id = %task.id,
                        error = %e,
                        "DRONE_MALFORMED_TASK: 不正なタスクを破棄します"
                    );
                    StepOutcome::Complete(format!("Malformed task: {e}"))
                }
                Ok(()) => advance(&mut self.pos, &mut self.orbit_index, orbit_points, task, max_step, dt),
            },
        };

        match outcome {
            StepOutcome::Continue => Vec::new(),
            StepOutcome::Complete(reason) => self.complete_task(ts, reason),
            StepOutcome::ArrivedHome => {
                let mut events = self.complete_task(ts, "Arrived home".to_string());
                events.extend(self.set_status(DroneStatus::Idle, ts, "Returned home".to_string()));
                events
            }
        }
    }

    fn complete_task(&mut self, ts: f64, reason: String) -> Vec<DroneEvent> {
        let task_id = self.task.take().map(|t| t.id);
        debug!(
            drone_id = %self.id,
            task_id = ?task_id,
            reason = %reason,
            "DRONE_TASK_COMPLETED: タスクが完了しました"
        );
        vec![DroneEvent {
            event_type: DroneEventType::TaskCompleted,
            drone_id: self.id.clone(),
            pos: self.pos,
            ts,
            message: reason,
            status: self.status,
            task_id,
            payload: None,
        }]
    }

    pub(crate) fn event(&self, event_type: DroneEventType, ts: f64, message: String) -> DroneEvent {
        DroneEvent {
            event_type,
            drone_id: self.id.clone(),
            pos: self.pos,
            ts,
            message,
            status: self.status,
            task_id: self.task.as_ref().map(|t| t.id.clone()),
            payload: None,
        }
    }
}

/// タスク種別ごとの1ステップ前進
fn advance(
    pos: &mut Vec2,
    orbit_index: &mut usize,
    orbit_points: usize,
    task: &mut Task,
    max_step: f64,
    dt: f64,
) -> StepOutcome {
    match &mut task.kind {
        TaskKind::Path(t) => {
            if t.waypoints.is_empty() {
                return StepOutcome::Complete("Empty path".to_string());
            }

            let wp = t.waypoints[t.cursor];
            let arrived = if pos.distance(&wp) <= t.arrive_eps {
                *pos = wp;
                true
            } else {
                let (next, arrived) = math_utils::move_towards(*pos, wp, max_step);
                *pos = next;
                arrived
            };

            if arrived {
                t.cursor += 1;
                if t.cursor >= t.waypoints.len() {
                    if t.looping {
                        t.cursor = 0;
                    } else {
                        return StepOutcome::Complete("Path finished".to_string());
                    }
                }
            }
            StepOutcome::Continue
        }
        TaskKind::GoTo(t) => {
            if pos.distance(&t.target) <= t.arrive_eps {
                *pos = t.target;
                return StepOutcome::Complete("Arrived target".to_string());
            }
            let (next, arrived) = math_utils::move_towards(*pos, t.target, max_step);
            *pos = next;
            if arrived {
                StepOutcome::Complete("Arrived target".to_string())
            } else {
                StepOutcome::Continue
            }
        }
        TaskKind::Orbit(t) => {
            let n = orbit_points.max(4);
            let target = math_utils::orbit_point(t.center, t.radius, *orbit_index, n);
            let (next, arrived) = math_utils::move_towards(*pos, target, max_step);
            *pos = next;
            if arrived {
                *orbit_index = (*orbit_index + 1) % n;
            }

            t.elapsed += dt;
            if duration_reached(t.elapsed, t.duration) {
                StepOutcome::Complete("Orbit done".to_string())
            } else {
                StepOutcome::Continue
            }
        }
        TaskKind::Hold(t) => {
            if pos.distance(&t.pos) > t.hold_eps {
                let (next, _) = math_utils::move_towards(*pos, t.pos, max_step);
                *pos = next;
            }

            t.elapsed += dt;
            if duration_reached(t.elapsed, t.duration) {
                StepOutcome::Complete("Hold done".to_string())
            } else {
                StepOutcome::Continue
            }
        }
        TaskKind::ReturnHome(t) => {
            if pos.distance(&t.home) <= t.arrive_eps {
                *pos = t.home;
                return StepOutcome::ArrivedHome;
            }
            let (next, arrived) = math_utils::move_towards(*pos, t.home, max_step);
            *pos = next;
            if arrived {
                StepOutcome::ArrivedHome
            } else {
                StepOutcome::Continue
            }
        }
    }
}

fn duration_reached(elapsed: f64, duration: Option<f64>) -> bool {
    duration.is_some_and(|d| elapsed + DURATION_EPSILON >= d)
}

impl IAgent for Drone {
    fn get_id(&self) -> &str {
        &self.id
    }

    fn drone(&self) -> &Drone {
        self
    }

    fn tick(&mut self, dt: f64, ts: f64, bounds: Option<&Bounds>) -> Vec<DroneEvent> {
        Drone::tick(self, dt, ts, bounds)
    }

    fn assign_task(&mut self, task: Task, ts: f64) -> Vec<DroneEvent> {
        Drone::assign_task(self, task, ts)
    }

    fn set_offline(&mut self, ts: f64, reason: &str) -> Vec<DroneEvent> {
        Drone::set_offline(self, ts, reason)
    }

    fn mark_failed(&mut self, ts: f64, reason: &str) -> Vec<DroneEvent> {
        Drone::mark_failed(self, ts, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn count(events: &[DroneEvent], event_type: DroneEventType) -> usize {
        events.iter().filter(|e| e.event_type == event_type).count()
    }

    fn no_drain() -> DroneConfig {
        DroneConfig {
            battery_drain_per_s: 0.0,
            ..DroneConfig::default()
        }
    }

    #[test]
    fn test_assign_sets_status_and_emits_in_order() {
        let mut d = Drone::new("D1", Vec2::new(0.0, 0.0), DroneConfig::default());
        let events = d.assign_task(Task::goto("g1", Vec2::new(10.0, 0.0), 0.5), 0.0);
        assert_eq!(d.status, DroneStatus::Navigating);
        let kinds: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(kinds, vec![DroneEventType::StatusChanged, DroneEventType::TaskAssigned]);
        assert_eq!(events[1].task_id.as_deref(), Some("g1"));

        // 同じ状態への再割り当てでは STATUS_CHANGED を出さない
        let events = d.assign_task(Task::path("p1", vec![Vec2::new(1.0, 1.0)], true), 0.2);
        let kinds: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(kinds, vec![DroneEventType::TaskAssigned]);
        assert_eq!(d.task.as_ref().map(|t| t.id.as_str()), Some("p1"));
    }

    #[test]
    fn test_status_mapping_is_total() {
        assert_eq!(DroneStatus::for_task(TaskType::Path), DroneStatus::Navigating);
        assert_eq!(DroneStatus::for_task(TaskType::GoTo), DroneStatus::Navigating);
        assert_eq!(DroneStatus::for_task(TaskType::Orbit), DroneStatus::Executing);
        assert_eq!(DroneStatus::for_task(TaskType::Hold), DroneStatus::Executing);
        assert_eq!(DroneStatus::for_task(TaskType::ReturnHome), DroneStatus::Returning);
    }

    #[test]
    fn test_goto_converges_exactly_on_target() {
        let mut d = Drone::new("D1", Vec2::new(0.0, 0.0), no_drain());
        let target = Vec2::new(10.0, 0.0);
        d.assign_task(Task::goto("g1", target, 0.5).with_speed(1.0), 0.0);

        let mut completed_at = None;
        for k in 1..=100 {
            let events = d.tick(0.1, k as f64 * 0.1, None);
            if count(&events, DroneEventType::TaskCompleted) == 1 {
                completed_at = Some(k);
                let done = events.iter().find(|e| e.event_type == DroneEventType::TaskCompleted).unwrap();
                assert_eq!(done.task_id.as_deref(), Some("g1"));
                break;
            }
        }
        assert!(completed_at.is_some());
        assert_eq!(d.pos, target);
        assert!(d.task.is_none());
        assert_eq!(d.status, DroneStatus::Idle);
    }

    #[test]
    fn test_idle_tick_is_idempotent() {
        let mut d = Drone::new("D1", Vec2::new(5.0, 5.0), DroneConfig::default());
        let e1 = d.tick(0.2, 0.2, None);
        let e2 = d.tick(0.2, 0.4, None);
        assert_eq!(count(&e1, DroneEventType::StatusChanged), 0);
        assert_eq!(count(&e2, DroneEventType::StatusChanged), 0);
        assert_eq!(d.status, DroneStatus::Idle);
        assert_eq!(d.pos, Vec2::new(5.0, 5.0));
    }

    #[test]
    fn test_low_battery_preempts_navigation() {
        let config = DroneConfig {
            battery_capacity: 100.0,
            battery_drain_per_s: 5.0,
            battery_low_threshold: 20.0,
            ..DroneConfig::default()
        };
        let mut d = Drone::new("D1", Vec2::new(0.0, 0.0), config);
        d.assign_task(Task::goto("far", Vec2::new(1000.0, 0.0), 0.5), 0.0);

        let mut low_ticks = Vec::new();
        let mut last = 100.0;
        for k in 1..=17 {
            let events = d.tick(1.0, k as f64, None);
            assert!(d.battery <= last);
            last = d.battery;
            if count(&events, DroneEventType::BatteryLow) > 0 {
                low_ticks.push(k);
            }
            if k < 16 {
                assert_eq!(d.status, DroneStatus::Navigating);
                assert!(d.battery > 20.0);
            }
            if k == 16 {
                assert_eq!(d.battery, 20.0);
                assert_eq!(d.status, DroneStatus::Returning);
            }
        }

        assert_eq!(d.battery, 15.0);
        // 20.0 <= 20.0 で発火
        assert_eq!(low_ticks, vec![16]);
        assert_eq!(d.status, DroneStatus::Returning);
        let task = d.task.as_ref().unwrap();
        assert_eq!(task.task_type(), TaskType::ReturnHome);
        assert!(task.id.starts_with("return-D1-"));
    }

    #[test]
    fn test_idle_drone_is_not_preempted() {
        let config = DroneConfig {
            battery_drain_per_s: 50.0,
            ..DroneConfig::default()
        };
        let mut d = Drone::new("D1", Vec2::new(0.0, 0.0), config);
        let events = d.tick(1.0, 1.0, None);
        assert_eq!(d.battery, 50.0);
        let events2 = d.tick(1.0, 2.0, None);
        assert_eq!(d.battery, 0.0);
        assert_eq!(count(&events, DroneEventType::BatteryLow), 0);
        assert_eq!(count(&events2, DroneEventType::BatteryLow), 0);
        assert!(d.task.is_none());
    }

    #[test]
    fn test_orbit_without_duration_never_completes() {
        let mut d = Drone::new("D1", Vec2::new(0.0, 0.0), DroneConfig::default());
        d.assign_task(Task::orbit("o1", Vec2::new(20.0, 20.0), 5.0, None), 0.0);
        for k in 1..=1000 {
            let events = d.tick(0.2, k as f64 * 0.2, None);
            assert_eq!(count(&events, DroneEventType::TaskCompleted), 0);
        }
        assert_eq!(d.status, DroneStatus::Executing);
        assert!(d.orbit_index() < 12);
    }

    #[test]
    fn test_orbit_with_duration_completes_on_25th_tick() {
        let mut d = Drone::new("D1", Vec2::new(0.0, 0.0), DroneConfig::default());
        d.assign_task(Task::orbit("o1", Vec2::new(20.0, 20.0), 5.0, Some(5.0)), 0.0);
        for k in 1..=24 {
            let events = d.tick(0.2, k as f64 * 0.2, None);
            assert_eq!(count(&events, DroneEventType::TaskCompleted), 0, "completed early at tick {k}");
        }
        let events = d.tick(0.2, 25.0 * 0.2, None);
        assert_eq!(count(&events, DroneEventType::TaskCompleted), 1);
        assert!(d.task.is_none());
    }

    #[test]
    fn test_hold_corrects_drift_only_beyond_eps() {
        let mut d = Drone::new("D1", Vec2::new(0.5, 0.0), no_drain());
        d.assign_task(Task::hold("h1", Vec2::new(0.0, 0.0), Some(1.0), 0.8), 0.0);
        d.tick(0.2, 0.2, None);
        assert_eq!(d.pos, Vec2::new(0.5, 0.0));

        d.pos = Vec2::new(3.0, 0.0);
        d.tick(0.2, 0.4, None);
        assert!((d.pos.x - 1.4).abs() < 1e-9);
    }

    #[test]
    fn test_path_loops_and_completes() {
        let wps = vec![Vec2::new(1.0, 0.0), Vec2::new(2.0, 0.0)];
        let mut d = Drone::new("D1", Vec2::new(0.0, 0.0), no_drain());
        d.assign_task(Task::path("loop", wps.clone(), true), 0.0);
        for k in 1..=10 {
            d.tick(1.0, k as f64, None);
        }
        assert!(d.task.is_some());

        let mut d = Drone::new("D2", Vec2::new(0.0, 0.0), no_drain());
        d.assign_task(Task::path("once", wps, false), 0.0);
        let e1 = d.tick(1.0, 1.0, None);
        assert_eq!(count(&e1, DroneEventType::TaskCompleted), 0);
        assert_eq!(d.pos, Vec2::new(1.0, 0.0));
        let e2 = d.tick(1.0, 2.0, None);
        assert_eq!(count(&e2, DroneEventType::TaskCompleted), 1);
        assert_eq!(d.pos, Vec2::new(2.0, 0.0));
        assert_eq!(d.status, DroneStatus::Idle);
    }

    #[test]
    fn test_empty_path_completes_without_motion() {
        let mut d = Drone::new("D1", Vec2::new(3.0, 3.0), no_drain());
        d.assign_task(Task::path("empty", Vec::new(), false), 0.0);
        let events = d.tick(1.0, 0.5, None);
        assert_eq!(count(&events, DroneEventType::TaskCompleted), 1);
        assert_eq!(d.pos, Vec2::new(3.0, 3.0));
    }

    #[test]
    fn test_return_home_forces_idle() {
        let mut d = Drone::new("D1", Vec2::new(0.0, 0.0), no_drain());
        d.pos = Vec2::new(4.0, 0.0);
        d.assign_task(Task::return_home("rtb", d.home, 0.8), 0.0);
        assert_eq!(d.status, DroneStatus::Returning);
        let events = d.tick(1.0, 0.5, None);
        assert_eq!(d.pos, Vec2::new(0.0, 0.0));
        let kinds: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(kinds, vec![DroneEventType::TaskCompleted, DroneEventType::StatusChanged]);
        assert_eq!(events[0].task_id.as_deref(), Some("rtb"));
        assert_eq!(d.status, DroneStatus::Idle);
    }

    #[test]
    fn test_malformed_task_completes_with_diagnostic() {
        let mut d = Drone::new("D1", Vec2::new(0.0, 0.0), no_drain());
        d.assign_task(Task::goto("bad", Vec2::new(f64::NAN, 0.0), 0.5), 0.0);
        let events = d.tick(0.2, 0.2, None);
        let done = events.iter().find(|e| e.event_type == DroneEventType::TaskCompleted).unwrap();
        assert!(done.message.starts_with("Malformed task"));
        assert_eq!(done.task_id.as_deref(), Some("bad"));
        assert_eq!(d.pos, Vec2::new(0.0, 0.0));
        assert_eq!(d.status, DroneStatus::Idle);
    }

    #[test]
    fn test_offline_is_inert() {
        let mut d = Drone::new("D1", Vec2::new(0.0, 0.0), DroneConfig::default());
        d.assign_task(Task::goto("g", Vec2::new(50.0, 0.0), 0.5), 0.0);
        let events = d.set_offline(0.0, "link lost");
        let kinds: Vec<_> = events.iter().map(|e| e.event_type).collect();
        assert_eq!(kinds, vec![DroneEventType::StatusChanged, DroneEventType::Offline]);
        assert!(d.task.is_none());

        let battery = d.battery;
        assert!(d.tick(1.0, 5.0, None).is_empty());
        assert_eq!(d.battery, battery);
        assert!(d.assign_task(Task::goto("g2", Vec2::new(1.0, 1.0), 0.5), 6.0).is_empty());
        assert_eq!(d.status, DroneStatus::Offline);
    }

    #[test]
    fn test_bounds_clamp_pins_at_wall() {
        let mut d = Drone::new("D1", Vec2::new(95.0, 50.0), no_drain());
        d.assign_task(Task::goto("out", Vec2::new(200.0, 50.0), 0.5), 0.0);
        let bounds = Bounds::new(0.0, 100.0, 0.0, 100.0);
        for k in 1..=5 {
            d.tick(1.0, k as f64, Some(&bounds));
        }
        assert_eq!(d.pos, Vec2::new(100.0, 50.0));
        assert_eq!(d.status, DroneStatus::Navigating);
    }

    #[test]
    fn test_heartbeat_period() {
        let mut d = Drone::new("D1", Vec2::new(0.0, 0.0), DroneConfig::default());
        let mut beats = Vec::new();
        for k in 1..=10 {
            let ts = k as f64 * 0.2;
            if count(&d.tick(0.2, ts, None), DroneEventType::Heartbeat) > 0 {
                beats.push(k);
            }
        }
        assert_eq!(beats, vec![5, 10]);
        assert_eq!(d.last_seen_ts, d.last_heartbeat_ts);
    }

    proptest! {
        #[test]
        fn prop_battery_is_monotonic_and_bounded(
            drain in 0.01f64..20.0,
            dt in 0.01f64..2.0,
            ticks in 1usize..200,
        ) {
            let config = DroneConfig { battery_drain_per_s: drain, ..DroneConfig::default() };
            let mut d = Drone::new("P", Vec2::new(0.0, 0.0), config);
            d.assign_task(Task::orbit("o", Vec2::new(10.0, 10.0), 3.0, None), 0.0);
            let mut last = d.battery;
            for k in 1..=ticks {
                d.tick(dt, k as f64 * dt, None);
                prop_assert!(d.battery <= last);
                prop_assert!(d.battery >= 0.0);
                prop_assert!(d.battery <= d.config.battery_capacity);
                last = d.battery;
            }
        }

        #[test]
        fn prop_goto_never_overshoots(
            tx in -50.0f64..50.0,
            ty in -50.0f64..50.0,
            speed in 0.5f64..5.0,
            eps in 0.2f64..2.0,
        ) {
            let dt = eps / speed * 0.5;
            let target = Vec2::new(tx, ty);
            let mut d = Drone::new("P", Vec2::new(0.0, 0.0), no_drain());
            d.assign_task(Task::goto("g", target, eps).with_speed(speed), 0.0);

            let distance = target.norm();
            let limit = ((distance / (speed * dt)).ceil() as usize).max(1);
            let mut remaining = distance;
            let mut done_at = None;
            for k in 1..=limit {
                let events = d.tick(dt, k as f64 * dt, None);
                let now = d.pos.distance(&target);
                prop_assert!(now <= remaining + 1e-9);
                remaining = now;
                if events.iter().any(|e| e.event_type == DroneEventType::TaskCompleted) {
                    done_at = Some(k);
                    break;
                }
            }
            prop_assert!(done_at.is_some());
            prop_assert_eq!(d.pos, target);
        }
    }
}
