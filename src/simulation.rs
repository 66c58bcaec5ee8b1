//! # Simulation モジュール
//!
//! エッジシミュレータの中核となる共有状態と、実時間ループを提供します。
//!
//! [`SimulationState`] は機体群・ワールド・イベントバッファを所有し、1ティックの
//! 処理（[`SimulationState::step`]）と外部コマンド（タスク割り当て、オフライン化、
//! 消火指示）、スナップショット生成を同期的に実行します。
//!
//! [`SimulationEngine`] は状態を単一の `Mutex` で保護し、tokio タスクとして
//! 固定時間刻みのループを回します。ティック・割り当て・スナップショットは
//! いずれもロックを保持したまま完了するため、互いに分断されることはありません。
//!
//! ## ティック処理順序
//!
//! 1. **時刻更新**: `ts += dt`
//! 2. **機体処理**: 登録順に `tick(dt, ts, bounds)`
//! 3. **ワールド処理**: 全機の位置でゾーン判定
//! 4. **イベント記録**: 機体イベント、ワールドイベントの順でリングバッファへ
//!
//! ## 使用例
//!
//! ```rust,no_run
//! use edgesim::scenario::ScenarioConfig;
//! use edgesim::simulation::SimulationEngine;
//!
//! # async fn demo() -> edgesim::SimResult<()> {
//! let config = ScenarioConfig::from_file("scenarios/fire_response.yaml")?;
//! let mut engine = SimulationEngine::from_scenario(&config)?;
//!
//! engine.start()?;
//! tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//! engine.stop().await;
//!
//! println!("{}", serde_json::to_string_pretty(&engine.snapshot()).unwrap_or_default());
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::error::{SimError, SimResult};
use crate::models::{
    DroneEvent, DroneStatus, EventRecord, IAgent, Rect, Task, TaskContext, Vec2, World,
};
use crate::scenario::ScenarioConfig;

pub const DEFAULT_EVENT_CAPACITY: usize = 200;
pub const DEFAULT_SNAPSHOT_EVENT_LIMIT: usize = 50;

/// 一括割り当ての1コマンド
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AssignCommand {
    pub drone_id: String,
    pub task: Value,
}

/// 一括割り当ての1コマンドの結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignResult {
    pub ok: bool,
    pub drone_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 機体の状態
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroneSnapshot {
    pub id: String,
    pub pos: Vec2,
    pub status: DroneStatus,
    pub battery: f64,
    pub task: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_left: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppressing: Option<bool>,
}

/// ゾーン記述子
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneSnapshot {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub zone_type: String,
    pub rect: Rect,
}

/// ある時点の全体状態
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub ts: f64,
    pub step_count: u64,
    pub agents: Vec<DroneSnapshot>,
    pub zones: Vec<ZoneSnapshot>,
    /// 古い順
    pub recent_events: Vec<EventRecord>,
}

/// シミュレーションの共有状態
pub struct SimulationState {
    pub ts: f64,
    pub dt: f64,
    pub step_count: u64,
    pub world: World,
    fleet: Vec<Box<dyn IAgent>>,
    events: VecDeque<EventRecord>,
    event_capacity: usize,
    snapshot_limit: usize,
}

impl SimulationState {
    pub fn new(world: World, fleet: Vec<Box<dyn IAgent>>, dt: f64) -> Self {
        Self {
            ts: 0.0,
            dt,
            step_count: 0,
            world,
            fleet,
            events: VecDeque::with_capacity(DEFAULT_EVENT_CAPACITY),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            snapshot_limit: DEFAULT_SNAPSHOT_EVENT_LIMIT,
        }
    }

    /// イベントバッファ容量とスナップショット件数の変更
    pub fn with_event_limits(mut self, capacity: usize, snapshot_limit: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self.snapshot_limit = snapshot_limit;
        self
    }

    /// シナリオから状態を構築し、初期タスクを割り当てる
    pub fn from_scenario(config: &ScenarioConfig) -> SimResult<Self> {
        let seed = config.sim.seed.unwrap_or_else(rand::random);
        let world = config.build_world(seed);
        let fleet = config.build_fleet();

        info!(
            scenario = %config.meta.name,
            seed,
            drones = fleet.len(),
            zones = world.zones().len(),
            "SIM_INITIALIZED: シミュレーション状態を構築しました"
        );

        let mut state = Self::new(world, fleet, config.sim.dt_s)
            .with_event_limits(config.sim.event_buffer_capacity, config.sim.snapshot_event_limit);

        for initial in &config.initial_tasks {
            state.assign_task(&initial.drone_id, &initial.task)?;
        }

        Ok(state)
    }

    pub fn fleet(&self) -> &[Box<dyn IAgent>] {
        &self.fleet
    }

    pub fn agent(&self, agent_id: &str) -> Option<&dyn IAgent> {
        self.fleet.iter().find(|a| a.get_id() == agent_id).map(|a| &**a)
    }

    /// バッファ内のイベント数
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// 1ティック進める
    ///
    /// # 戻り値
    ///
    /// このティックで発生したイベント（バッファにも記録済み）
    pub fn step(&mut self) -> Vec<EventRecord> {
        self.ts += self.dt;
        self.step_count += 1;

        let mut records = self.process_drones();
        records.extend(self.process_world());

        trace!(ts = self.ts, step = self.step_count, events = records.len(), "SIM_STEP");

        for record in &records {
            self.record(record.clone());
        }
        records
    }

    fn process_drones(&mut self) -> Vec<EventRecord> {
        let bounds = self.world.bounds();
        let (dt, ts) = (self.dt, self.ts);
        self.fleet
            .iter_mut()
            .flat_map(|agent| agent.tick(dt, ts, Some(&bounds)))
            .map(EventRecord::from)
            .collect()
    }

    fn process_world(&mut self) -> Vec<EventRecord> {
        let positions: Vec<(String, Vec2)> = self
            .fleet
            .iter()
            .map(|a| (a.get_id().to_string(), a.get_position()))
            .collect();
        self.world
            .update(&positions, self.ts)
            .into_iter()
            .map(EventRecord::from)
            .collect()
    }

    fn record(&mut self, record: EventRecord) {
        while self.events.len() >= self.event_capacity {
            self.events.pop_front();
        }
        self.events.push_back(record);
    }

    fn record_drone_events(&mut self, events: &[DroneEvent]) {
        for event in events {
            self.record(EventRecord::from(event.clone()));
        }
    }

    fn agent_mut(&mut self, agent_id: &str) -> SimResult<&mut Box<dyn IAgent>> {
        self.fleet
            .iter_mut()
            .find(|a| a.get_id() == agent_id)
            .ok_or_else(|| SimError::UnknownAgent(agent_id.to_string()))
    }

    fn active_agent_mut(&mut self, agent_id: &str) -> SimResult<&mut Box<dyn IAgent>> {
        let agent = self.agent_mut(agent_id)?;
        if !agent.is_active() {
            return Err(SimError::AgentInactive(agent_id.to_string()));
        }
        Ok(agent)
    }

    /// ペイロードを解析してタスクを割り当てる
    ///
    /// # 引数
    ///
    /// * `agent_id` - 対象ドローンID
    /// * `payload` - `{"type": "GOTO", ...}` 形式のタスク
    ///
    /// # 戻り値
    ///
    /// 割り当てにより発生したイベント。不明なID・不正なペイロードの場合は
    /// 状態を変更せずにエラーを返す
    pub fn assign_task(&mut self, agent_id: &str, payload: &Value) -> SimResult<Vec<DroneEvent>> {
        let ts = self.ts;
        let agent = self.active_agent_mut(agent_id)?;
        let ctx = TaskContext {
            ts,
            current_pos: Some(agent.get_position()),
            home: Some(agent.drone().home),
        };
        let task = Task::from_payload(payload, &ctx).map_err(|e| {
            warn!(drone_id = %agent_id, error = %e, "SIM_ASSIGN_REJECTED: タスクの解析に失敗しました");
            SimError::from(e)
        })?;

        let events = agent.assign_task(task, ts);
        self.record_drone_events(&events);
        Ok(events)
    }

    /// 構築済みタスクの割り当て
    pub fn assign(&mut self, agent_id: &str, task: Task) -> SimResult<Vec<DroneEvent>> {
        task.validate()?;
        let ts = self.ts;
        let events = self.active_agent_mut(agent_id)?.assign_task(task, ts);
        self.record_drone_events(&events);
        Ok(events)
    }

    /// 一括割り当て（失敗したコマンドは他のコマンドに影響しない）
    pub fn batch_assign(&mut self, commands: &[AssignCommand]) -> Vec<AssignResult> {
        commands
            .iter()
            .map(|cmd| match self.assign_task(&cmd.drone_id, &cmd.task) {
                Ok(events) => AssignResult {
                    ok: true,
                    drone_id: cmd.drone_id.clone(),
                    task_id: events.last().and_then(|e| e.task_id.clone()),
                    error: None,
                },
                Err(e) => AssignResult {
                    ok: false,
                    drone_id: cmd.drone_id.clone(),
                    task_id: None,
                    error: Some(e.to_string()),
                },
            })
            .collect()
    }

    pub fn set_offline(&mut self, agent_id: &str, reason: &str) -> SimResult<Vec<DroneEvent>> {
        let ts = self.ts;
        let events = self.agent_mut(agent_id)?.set_offline(ts, reason);
        self.record_drone_events(&events);
        Ok(events)
    }

    pub fn mark_failed(&mut self, agent_id: &str, reason: &str) -> SimResult<Vec<DroneEvent>> {
        let ts = self.ts;
        let events = self.agent_mut(agent_id)?.mark_failed(ts, reason);
        self.record_drone_events(&events);
        Ok(events)
    }

    /// 消火機へ消火を指示
    pub fn start_suppress_fire(&mut self, agent_id: &str, fire_pos: Vec2) -> SimResult<Vec<DroneEvent>> {
        if !fire_pos.is_finite() {
            return Err(SimError::InvalidTask(crate::models::TaskError::Degenerate(
                "fire position must be finite".to_string(),
            )));
        }
        let ts = self.ts;
        let agent = self.active_agent_mut(agent_id)?;
        let suppressor = agent
            .as_suppressor_mut()
            .ok_or_else(|| SimError::NotFirefighting(agent_id.to_string()))?;
        let events = suppressor.start_suppress_fire(fire_pos, ts);

        info!(drone_id = %agent_id, x = fire_pos.x, y = fire_pos.y, "SIM_SUPPRESSION_DISPATCHED: 消火機を出動させました");
        self.record_drone_events(&events);
        Ok(events)
    }

    pub fn stop_suppress_fire(&mut self, agent_id: &str, reason: &str) -> SimResult<Vec<DroneEvent>> {
        let ts = self.ts;
        let suppressor = self
            .agent_mut(agent_id)?
            .as_suppressor_mut()
            .ok_or_else(|| SimError::NotFirefighting(agent_id.to_string()))?;
        let events = suppressor.stop_suppress_fire(ts, reason);
        self.record_drone_events(&events);
        Ok(events)
    }

    /// 現在の状態のスナップショット
    pub fn snapshot(&self) -> Snapshot {
        let agents = self
            .fleet
            .iter()
            .map(|agent| {
                let drone = agent.drone();
                let suppressor = agent.as_suppressor();
                DroneSnapshot {
                    id: drone.id.clone(),
                    pos: drone.pos,
                    status: drone.status,
                    battery: drone.battery,
                    task: drone.task.as_ref().map(Task::to_payload),
                    payload_left: suppressor.map(|s| s.payload_left()),
                    suppressing: suppressor.map(|s| s.is_suppressing()),
                }
            })
            .collect();

        let zones = self
            .world
            .zones()
            .iter()
            .map(|z| ZoneSnapshot {
                id: z.id.clone(),
                name: z.name.clone(),
                zone_type: z.zone_type.as_str().to_string(),
                rect: z.rect,
            })
            .collect();

        let skip = self.events.len().saturating_sub(self.snapshot_limit);
        Snapshot {
            ts: self.ts,
            step_count: self.step_count,
            agents,
            zones,
            recent_events: self.events.iter().skip(skip).cloned().collect(),
        }
    }
}

fn lock_state(state: &Mutex<SimulationState>) -> MutexGuard<'_, SimulationState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

struct LoopHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// 共有状態と実時間ループの管理
pub struct SimulationEngine {
    state: Arc<Mutex<SimulationState>>,
    dt: f64,
    running: Option<LoopHandle>,
}

impl SimulationEngine {
    pub fn new(state: SimulationState) -> Self {
        let dt = state.dt;
        Self {
            state: Arc::new(Mutex::new(state)),
            dt,
            running: None,
        }
    }

    pub fn from_scenario(config: &ScenarioConfig) -> SimResult<Self> {
        Ok(Self::new(SimulationState::from_scenario(config)?))
    }

    /// 共有状態へのハンドル
    pub fn shared_state(&self) -> Arc<Mutex<SimulationState>> {
        Arc::clone(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(|h| !h.join.is_finished())
    }

    /// バックグラウンドループを開始
    ///
    /// tokio ランタイム内から呼び出す必要があります。
    pub fn start(&mut self) -> SimResult<()> {
        if self.is_running() {
            return Err(SimError::AlreadyRunning);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let state = Arc::clone(&self.state);
        let join = tokio::spawn(run_loop(state, self.dt, stop_rx));
        self.running = Some(LoopHandle { stop_tx, join });

        info!(dt = self.dt, "SIM_LOOP_STARTED: シミュレーションループを開始しました");
        Ok(())
    }

    /// ループを停止し、終了を待つ
    pub async fn stop(&mut self) {
        let Some(handle) = self.running.take() else {
            return;
        };
        let _ = handle.stop_tx.send(true);
        if let Err(e) = handle.join.await {
            warn!(error = %e, "SIM_LOOP_JOIN_FAILED: ループタスクが異常終了しました");
        }
        info!(ts = self.with_state(|s| s.ts), "SIM_LOOP_STOPPED: シミュレーションループを停止しました");
    }

    /// 実時間を待たずに `t_max` まで進める
    ///
    /// # 戻り値
    ///
    /// 実行したステップ数
    pub fn run_fast(&self, t_max: f64) -> u64 {
        info!(t_max, "=== シミュレーション実行開始 ===");
        let mut steps = 0;
        loop {
            let mut state = self.lock();
            if state.ts + state.dt * 0.5 > t_max {
                break;
            }
            state.step();
            steps += 1;

            if state.step_count % 1000 == 0 {
                let progress = (state.ts / t_max) * 100.0;
                info!("進行状況: {:.1}% ({:.1}/{:.1}秒)", progress, state.ts, t_max);
            }
        }
        let state = self.lock();
        info!(ts = state.ts, steps = state.step_count, "=== シミュレーション完了 ===");
        steps
    }

    fn lock(&self) -> MutexGuard<'_, SimulationState> {
        lock_state(&self.state)
    }

    /// ロックを取得して状態に対する処理を実行
    pub fn with_state<T>(&self, f: impl FnOnce(&mut SimulationState) -> T) -> T {
        f(&mut self.lock())
    }

    pub fn step(&self) -> Vec<EventRecord> {
        self.lock().step()
    }

    pub fn assign_task(&self, agent_id: &str, payload: &Value) -> SimResult<Vec<DroneEvent>> {
        self.lock().assign_task(agent_id, payload)
    }

    pub fn batch_assign(&self, commands: &[AssignCommand]) -> Vec<AssignResult> {
        self.lock().batch_assign(commands)
    }

    pub fn set_offline(&self, agent_id: &str, reason: &str) -> SimResult<Vec<DroneEvent>> {
        self.lock().set_offline(agent_id, reason)
    }

    pub fn mark_failed(&self, agent_id: &str, reason: &str) -> SimResult<Vec<DroneEvent>> {
        self.lock().mark_failed(agent_id, reason)
    }

    pub fn start_suppress_fire(&self, agent_id: &str, fire_pos: Vec2) -> SimResult<Vec<DroneEvent>> {
        self.lock().start_suppress_fire(agent_id, fire_pos)
    }

    pub fn stop_suppress_fire(&self, agent_id: &str, reason: &str) -> SimResult<Vec<DroneEvent>> {
        self.lock().stop_suppress_fire(agent_id, reason)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot()
    }
}

/// 固定時間刻みのループ
///
/// 1反復で `dt` だけ進め、処理時間を差し引いた残りを待機します。
/// 処理が `dt` を超過しても追いつき処理は行いません。
async fn run_loop(state: Arc<Mutex<SimulationState>>, dt: f64, mut stop_rx: watch::Receiver<bool>) {
    let period = Duration::try_from_secs_f64(dt).unwrap_or(Duration::ZERO);

    loop {
        if *stop_rx.borrow() {
            break;
        }

        let started = Instant::now();
        let produced = lock_state(&state).step().len();
        let elapsed = started.elapsed();

        if elapsed > period {
            debug!(elapsed_ms = elapsed.as_millis() as u64, "SIM_STEP_OVERRUN: ティック処理が dt を超過しました");
        } else if produced > 0 {
            trace!(events = produced, "SIM_STEP_EVENTS");
        }

        tokio::select! {
            _ = tokio::time::sleep(period.saturating_sub(elapsed)) => {}
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
        }
    }
}
