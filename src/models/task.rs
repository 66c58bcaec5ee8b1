//! # Task モジュール
//!
//! ドローンに割り当てる汎用タスク（航法・行動意図）を定義します。
//!
//! タスクは幾何・時間パラメータのみを持ち、振る舞いは持ちません。
//! 実行ロジックは [`crate::models::drone::Drone`] の tick が担当します。
//!
//! - `PATH`: 航点列の追従（巡回・カバレッジ）
//! - `GOTO`: 単一目標点への移動
//! - `ORBIT`: 中心点周りの周回
//! - `HOLD`: 指定点でのホバリング
//! - `RETURN_HOME`: 帰還
//!
//! 外部（HTTP層・ディスパッチ層）からは `type` 判別子付きの緩い JSON
//! ペイロードとして受け取り、[`Task::from_payload`] で検証付きに変換します。

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::models::common::Vec2;

pub const DEFAULT_PATH_ARRIVE_EPS: f64 = 0.5;
pub const DEFAULT_GOTO_ARRIVE_EPS: f64 = 0.5;
/// 外部ペイロードで arrive_eps が省略された GOTO の既定値
pub const DEFAULT_PAYLOAD_GOTO_ARRIVE_EPS: f64 = 2.0;
pub const DEFAULT_ORBIT_RADIUS: f64 = 6.0;
pub const DEFAULT_ORBIT_DURATION_S: f64 = 15.0;
pub const DEFAULT_HOLD_DURATION_S: f64 = 5.0;
pub const DEFAULT_HOLD_EPS: f64 = 0.8;
pub const DEFAULT_HOME_ARRIVE_EPS: f64 = 0.8;

/// タスク種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskType {
    #[serde(rename = "PATH")]
    Path,
    #[serde(rename = "GOTO")]
    GoTo,
    #[serde(rename = "ORBIT")]
    Orbit,
    #[serde(rename = "HOLD")]
    Hold,
    #[serde(rename = "RETURN_HOME")]
    ReturnHome,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Path => "PATH",
            TaskType::GoTo => "GOTO",
            TaskType::Orbit => "ORBIT",
            TaskType::Hold => "HOLD",
            TaskType::ReturnHome => "RETURN_HOME",
        }
    }

    /// id 省略時に生成する識別子の接頭辞
    fn id_prefix(&self) -> &'static str {
        match self {
            TaskType::Path => "path",
            TaskType::GoTo => "goto",
            TaskType::Orbit => "orbit",
            TaskType::Hold => "hold",
            TaskType::ReturnHome => "return",
        }
    }
}

impl FromStr for TaskType {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PATH" => Ok(TaskType::Path),
            "GOTO" | "GO_TO" => Ok(TaskType::GoTo),
            "ORBIT" => Ok(TaskType::Orbit),
            "HOLD" => Ok(TaskType::Hold),
            "RETURN_HOME" | "RETURNHOME" => Ok(TaskType::ReturnHome),
            _ => Err(TaskError::UnknownType(s.to_string())),
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// タスクペイロードの検証エラー
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    #[error("task payload must be a JSON object")]
    NotAnObject,

    #[error("task payload is missing the `type` discriminator")]
    MissingType,

    #[error("unsupported task type: {0}")]
    UnknownType(String),

    #[error("invalid task payload: {0}")]
    InvalidPayload(String),

    #[error("degenerate task geometry: {0}")]
    Degenerate(String),
}

/// 航点列追従タスク
#[derive(Debug, Clone, PartialEq)]
pub struct PathTask {
    pub waypoints: Vec<Vec2>,
    pub looping: bool,
    /// 次に向かう航点のインデックス
    pub cursor: usize,
    pub arrive_eps: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GoToTask {
    pub target: Vec2,
    pub arrive_eps: f64,
}

/// 周回タスク
#[derive(Debug, Clone, PartialEq)]
pub struct OrbitTask {
    pub center: Vec2,
    pub radius: f64,
    /// None は無期限（再割り当てまで周回を継続）
    pub duration: Option<f64>,
    pub elapsed: f64,
}

/// ホバリングタスク
#[derive(Debug, Clone, PartialEq)]
pub struct HoldTask {
    pub pos: Vec2,
    pub duration: Option<f64>,
    pub elapsed: f64,
    /// 補正を開始するまでの許容ドリフト距離
    pub hold_eps: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnHomeTask {
    pub home: Vec2,
    pub arrive_eps: f64,
}

/// タスク種別ごとのパラメータ（閉じた直和型）
#[derive(Debug, Clone, PartialEq)]
pub enum TaskKind {
    Path(PathTask),
    GoTo(GoToTask),
    Orbit(OrbitTask),
    Hold(HoldTask),
    ReturnHome(ReturnHomeTask),
}

/// ドローンに割り当てられるタスク
///
/// タスクは割り当て先ドローンが排他的に所有し、完了・置換時に破棄されます。
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    /// 参考値（コアのスケジューラでは強制しない）
    pub priority: i32,
    /// このタスクに限り巡航速度を上書き (m/s)
    pub speed_override: Option<f64>,
    pub kind: TaskKind,
}

impl Task {
    pub fn new(id: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            id: id.into(),
            priority: 0,
            speed_override: None,
            kind,
        }
    }

    pub fn path(id: impl Into<String>, waypoints: Vec<Vec2>, looping: bool) -> Self {
        Self::new(
            id,
            TaskKind::Path(PathTask {
                waypoints,
                looping,
                cursor: 0,
                arrive_eps: DEFAULT_PATH_ARRIVE_EPS,
            }),
        )
    }

    pub fn goto(id: impl Into<String>, target: Vec2, arrive_eps: f64) -> Self {
        Self::new(id, TaskKind::GoTo(GoToTask { target, arrive_eps }))
    }

    pub fn orbit(id: impl Into<String>, center: Vec2, radius: f64, duration: Option<f64>) -> Self {
        Self::new(
            id,
            TaskKind::Orbit(OrbitTask {
                center,
                radius,
                duration,
                elapsed: 0.0,
            }),
        )
    }

    pub fn hold(id: impl Into<String>, pos: Vec2, duration: Option<f64>, hold_eps: f64) -> Self {
        Self::new(
            id,
            TaskKind::Hold(HoldTask {
                pos,
                duration,
                elapsed: 0.0,
                hold_eps,
            }),
        )
    }

    pub fn return_home(id: impl Into<String>, home: Vec2, arrive_eps: f64) -> Self {
        Self::new(id, TaskKind::ReturnHome(ReturnHomeTask { home, arrive_eps }))
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_speed(mut self, speed_mps: f64) -> Self {
        self.speed_override = Some(speed_mps);
        self
    }

    pub fn task_type(&self) -> TaskType {
        match &self.kind {
            TaskKind::Path(_) => TaskType::Path,
            TaskKind::GoTo(_) => TaskType::GoTo,
            TaskKind::Orbit(_) => TaskType::Orbit,
            TaskKind::Hold(_) => TaskType::Hold,
            TaskKind::ReturnHome(_) => TaskType::ReturnHome,
        }
    }

    /// 幾何パラメータの健全性チェック
    ///
    /// 非有限の座標、負の閾値、半径0以下の周回などを拒否します。
    /// 空の航点列は許容されます（即時完了する）。
    pub fn validate(&self) -> Result<(), TaskError> {
        fn finite(name: &str, v: f64) -> Result<(), TaskError> {
            if v.is_finite() {
                Ok(())
            } else {
                Err(TaskError::Degenerate(format!("{name} must be finite")))
            }
        }
        fn non_negative(name: &str, v: f64) -> Result<(), TaskError> {
            finite(name, v)?;
            if v < 0.0 {
                return Err(TaskError::Degenerate(format!("{name} must be >= 0")));
            }
            Ok(())
        }
        fn point(name: &str, p: &Vec2) -> Result<(), TaskError> {
            if p.is_finite() {
                Ok(())
            } else {
                Err(TaskError::Degenerate(format!("{name} must have finite coordinates")))
            }
        }

        if let Some(speed) = self.speed_override {
            finite("speed_mps", speed)?;
        }

        match &self.kind {
            TaskKind::Path(t) => {
                for wp in &t.waypoints {
                    point("waypoint", wp)?;
                }
                non_negative("arrive_eps", t.arrive_eps)?;
                if !t.waypoints.is_empty() && t.cursor >= t.waypoints.len() {
                    return Err(TaskError::Degenerate("path cursor out of range".to_string()));
                }
            }
            TaskKind::GoTo(t) => {
                point("target", &t.target)?;
                non_negative("arrive_eps", t.arrive_eps)?;
            }
            TaskKind::Orbit(t) => {
                point("center", &t.center)?;
                finite("radius", t.radius)?;
                if t.radius <= 0.0 {
                    return Err(TaskError::Degenerate("radius must be > 0".to_string()));
                }
                if let Some(d) = t.duration {
                    non_negative("duration_s", d)?;
                }
            }
            TaskKind::Hold(t) => {
                point("pos", &t.pos)?;
                non_negative("hold_eps", t.hold_eps)?;
                if let Some(d) = t.duration {
                    non_negative("duration_s", d)?;
                }
            }
            TaskKind::ReturnHome(t) => {
                point("home", &t.home)?;
                non_negative("arrive_eps", t.arrive_eps)?;
            }
        }
        Ok(())
    }

    /// 外部ペイロードからタスクを生成
    ///
    /// # 引数
    ///
    /// * `payload` - `{"type": "GOTO", "target": {"x":..,"y":..}, ...}` 形式のJSON
    /// * `ctx` - 既定IDの生成と省略値の解決に使う割り当て時の文脈
    ///
    /// # 戻り値
    ///
    /// 検証済みのタスク、または [`TaskError`]
    pub fn from_payload(payload: &Value, ctx: &TaskContext) -> Result<Task, TaskError> {
        let obj = payload.as_object().ok_or(TaskError::NotAnObject)?;
        let raw_type = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or(TaskError::MissingType)?;
        let task_type: TaskType = raw_type.parse()?;

        let common: CommonFields = decode(payload)?;

        let kind = match task_type {
            TaskType::Path => {
                let p: PathPayload = decode(payload)?;
                TaskKind::Path(PathTask {
                    waypoints: p.waypoints,
                    looping: p.looping,
                    cursor: 0,
                    arrive_eps: p.arrive_eps,
                })
            }
            TaskType::GoTo => {
                let p: GoToPayload = decode(payload)?;
                TaskKind::GoTo(GoToTask {
                    target: p.target,
                    arrive_eps: p.arrive_eps,
                })
            }
            TaskType::Orbit => {
                let p: OrbitPayload = decode(payload)?;
                TaskKind::Orbit(OrbitTask {
                    center: p.center,
                    radius: p.radius,
                    duration: p.duration_s.unwrap_or(None),
                    elapsed: 0.0,
                })
            }
            TaskType::Hold => {
                let p: HoldPayload = decode(payload)?;
                let pos = p.pos.or(ctx.current_pos).ok_or_else(|| {
                    TaskError::InvalidPayload("HOLD requires `pos` or a known drone position".to_string())
                })?;
                TaskKind::Hold(HoldTask {
                    pos,
                    duration: p.duration_s.unwrap_or(Some(DEFAULT_HOLD_DURATION_S)),
                    elapsed: 0.0,
                    hold_eps: p.hold_eps,
                })
            }
            TaskType::ReturnHome => {
                let p: ReturnHomePayload = decode(payload)?;
                let home = p.home.or(ctx.home).ok_or_else(|| {
                    TaskError::InvalidPayload("RETURN_HOME requires `home` or a known home".to_string())
                })?;
                TaskKind::ReturnHome(ReturnHomeTask {
                    home,
                    arrive_eps: p.arrive_eps,
                })
            }
        };

        let id = common
            .id
            .unwrap_or_else(|| format!("{}_{}", task_type.id_prefix(), (ctx.ts * 10.0) as i64));

        let task = Task {
            id,
            priority: common.priority,
            speed_override: common.speed_mps,
            kind,
        };
        task.validate()?;
        Ok(task)
    }

    /// スナップショット用のペイロード表現
    pub fn to_payload(&self) -> Value {
        let mut value = match &self.kind {
            TaskKind::Path(t) => json!({
                "waypoints": t.waypoints,
                "loop": t.looping,
                "cursor": t.cursor,
                "arrive_eps": t.arrive_eps,
            }),
            TaskKind::GoTo(t) => json!({
                "target": t.target,
                "arrive_eps": t.arrive_eps,
            }),
            TaskKind::Orbit(t) => json!({
                "center": t.center,
                "radius": t.radius,
                "duration_s": t.duration,
                "elapsed_s": t.elapsed,
            }),
            TaskKind::Hold(t) => json!({
                "pos": t.pos,
                "duration_s": t.duration,
                "elapsed_s": t.elapsed,
                "hold_eps": t.hold_eps,
            }),
            TaskKind::ReturnHome(t) => json!({
                "home": t.home,
                "arrive_eps": t.arrive_eps,
            }),
        };
        if let Value::Object(map) = &mut value {
            map.insert("type".to_string(), json!(self.task_type().as_str()));
            map.insert("id".to_string(), json!(self.id));
            map.insert("priority".to_string(), json!(self.priority));
            if let Some(speed) = self.speed_override {
                map.insert("speed_mps".to_string(), json!(speed));
            }
        }
        value
    }
}

/// ペイロード変換時の文脈
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskContext {
    /// 現在のシミュレーション時刻（秒）
    pub ts: f64,
    /// 割り当て先ドローンの現在位置（HOLD の pos 省略時に使用）
    pub current_pos: Option<Vec2>,
    /// 割り当て先ドローンのホーム位置（RETURN_HOME の home 省略時に使用）
    pub home: Option<Vec2>,
}

fn decode<T: serde::de::DeserializeOwned>(payload: &Value) -> Result<T, TaskError> {
    serde_json::from_value(payload.clone()).map_err(|e| TaskError::InvalidPayload(e.to_string()))
}

/// `duration_s` の「省略」と「明示的な null（無期限）」を区別する
fn explicit_option<'de, D>(deserializer: D) -> Result<Option<Option<f64>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<f64>::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
struct CommonFields {
    id: Option<String>,
    #[serde(default)]
    priority: i32,
    speed_mps: Option<f64>,
}

#[derive(Deserialize)]
struct PathPayload {
    waypoints: Vec<Vec2>,
    #[serde(rename = "loop", default = "default_true")]
    looping: bool,
    #[serde(default = "default_path_eps")]
    arrive_eps: f64,
}

#[derive(Deserialize)]
struct GoToPayload {
    target: Vec2,
    #[serde(default = "default_payload_goto_eps")]
    arrive_eps: f64,
}

#[derive(Deserialize)]
struct OrbitPayload {
    center: Vec2,
    #[serde(default = "default_orbit_radius")]
    radius: f64,
    #[serde(default = "default_orbit_duration", deserialize_with = "explicit_option")]
    duration_s: Option<Option<f64>>,
}

#[derive(Deserialize)]
struct HoldPayload {
    pos: Option<Vec2>,
    #[serde(default, deserialize_with = "explicit_option")]
    duration_s: Option<Option<f64>>,
    #[serde(default = "default_hold_eps")]
    hold_eps: f64,
}

#[derive(Deserialize)]
struct ReturnHomePayload {
    home: Option<Vec2>,
    #[serde(default = "default_home_eps")]
    arrive_eps: f64,
}

fn default_true() -> bool {
    true
}

fn default_path_eps() -> f64 {
    DEFAULT_PATH_ARRIVE_EPS
}

fn default_payload_goto_eps() -> f64 {
    DEFAULT_PAYLOAD_GOTO_ARRIVE_EPS
}

fn default_orbit_radius() -> f64 {
    DEFAULT_ORBIT_RADIUS
}

fn default_orbit_duration() -> Option<Option<f64>> {
    Some(Some(DEFAULT_ORBIT_DURATION_S))
}

fn default_hold_eps() -> f64 {
    DEFAULT_HOLD_EPS
}

fn default_home_eps() -> f64 {
    DEFAULT_HOME_ARRIVE_EPS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TaskContext {
        TaskContext {
            ts: 1.25,
            current_pos: Some(Vec2::new(3.0, 4.0)),
            home: Some(Vec2::new(5.0, 5.0)),
        }
    }

    #[test]
    fn test_parse_goto_with_defaults() {
        let task = Task::from_payload(&json!({"type": "goto", "target": {"x": 10, "y": 20.5}}), &ctx()).unwrap();
        assert_eq!(task.id, "goto_12");
        assert_eq!(task.task_type(), TaskType::GoTo);
        match task.kind {
            TaskKind::GoTo(g) => {
                assert_eq!(g.target, Vec2::new(10.0, 20.5));
                assert_eq!(g.arrive_eps, DEFAULT_PAYLOAD_GOTO_ARRIVE_EPS);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn test_parse_path_keeps_order_and_loop_flag() {
        let payload = json!({
            "type": "PATH",
            "id": "patrol-1",
            "priority": 3,
            "speed_mps": 2.5,
            "waypoints": [{"x": 1, "y": 1}, {"x": 2, "y": 2}],
            "loop": false
        });
        let task = Task::from_payload(&payload, &ctx()).unwrap();
        assert_eq!(task.id, "patrol-1");
        assert_eq!(task.priority, 3);
        assert_eq!(task.speed_override, Some(2.5));
        let TaskKind::Path(p) = task.kind else {
            panic!("expected path");
        };
        assert_eq!(p.waypoints, vec![Vec2::new(1.0, 1.0), Vec2::new(2.0, 2.0)]);
        assert!(!p.looping);
        assert_eq!(p.cursor, 0);
    }

    #[test]
    fn test_parse_orbit_null_duration_is_indefinite() {
        let task = Task::from_payload(
            &json!({"type": "ORBIT", "center": {"x": 0, "y": 0}, "radius": 4.0, "duration_s": null}),
            &ctx(),
        )
        .unwrap();
        let TaskKind::Orbit(o) = task.kind else {
            panic!("expected orbit");
        };
        assert_eq!(o.duration, None);

        let task = Task::from_payload(&json!({"type": "ORBIT", "center": {"x": 0, "y": 0}}), &ctx()).unwrap();
        let TaskKind::Orbit(o) = task.kind else {
            panic!("expected orbit");
        };
        assert_eq!(o.duration, Some(DEFAULT_ORBIT_DURATION_S));
    }

    #[test]
    fn test_parse_hold_uses_current_position() {
        let task = Task::from_payload(&json!({"type": "HOLD"}), &ctx()).unwrap();
        let TaskKind::Hold(h) = task.kind else {
            panic!("expected hold");
        };
        assert_eq!(h.pos, Vec2::new(3.0, 4.0));
        assert_eq!(h.duration, Some(DEFAULT_HOLD_DURATION_S));

        let err = Task::from_payload(&json!({"type": "HOLD"}), &TaskContext::default()).unwrap_err();
        assert!(matches!(err, TaskError::InvalidPayload(_)));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Task::from_payload(&json!([1, 2]), &ctx()), Err(TaskError::NotAnObject));
        assert_eq!(Task::from_payload(&json!({"target": {}}), &ctx()), Err(TaskError::MissingType));
        assert_eq!(
            Task::from_payload(&json!({"type": "SCAN"}), &ctx()),
            Err(TaskError::UnknownType("SCAN".to_string()))
        );
        let missing = Task::from_payload(&json!({"type": "GOTO"}), &ctx()).unwrap_err();
        assert!(matches!(missing, TaskError::InvalidPayload(msg) if msg.contains("target")));
        let degenerate =
            Task::from_payload(&json!({"type": "ORBIT", "center": {"x": 0, "y": 0}, "radius": 0.0}), &ctx())
                .unwrap_err();
        assert!(matches!(degenerate, TaskError::Degenerate(_)));
    }

    #[test]
    fn test_to_payload_roundtrips_type_and_id() {
        let task = Task::return_home("rtb", Vec2::new(1.0, 2.0), 0.8).with_priority(10);
        let payload = task.to_payload();
        assert_eq!(payload["type"], "RETURN_HOME");
        assert_eq!(payload["id"], "rtb");
        assert_eq!(payload["priority"], 10);
        assert_eq!(payload["home"]["x"], 1.0);
        assert!(payload.get("speed_mps").is_none());
    }
}
