use serde::Serialize;
use serde_json::{Value, json};

use crate::models::common::Vec2;
use crate::models::drone::DroneStatus;

/// ドローン内部で発生するイベントの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DroneEventType {
    StatusChanged,
    TaskAssigned,
    TaskCompleted,
    BatteryLow,
    Offline,
    Heartbeat,
    /// ホームでの消火剤補充
    PayloadRefilled,
    /// 消火要請の受理（火点へ移動開始）
    SuppressionRequested,
    /// 火点到着、ホバリングして散布開始
    SuppressionEngaged,
    /// 散布中の進捗
    Suppressing,
    /// 消火剤枯渇による自動停止
    PayloadEmpty,
    SuppressionStopped,
}

impl DroneEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DroneEventType::StatusChanged => "STATUS_CHANGED",
            DroneEventType::TaskAssigned => "TASK_ASSIGNED",
            DroneEventType::TaskCompleted => "TASK_COMPLETED",
            DroneEventType::BatteryLow => "BATTERY_LOW",
            DroneEventType::Offline => "OFFLINE",
            DroneEventType::Heartbeat => "HEARTBEAT",
            DroneEventType::PayloadRefilled => "PAYLOAD_REFILLED",
            DroneEventType::SuppressionRequested => "SUPPRESSION_REQUESTED",
            DroneEventType::SuppressionEngaged => "SUPPRESSION_ENGAGED",
            DroneEventType::Suppressing => "SUPPRESSING",
            DroneEventType::PayloadEmpty => "PAYLOAD_EMPTY",
            DroneEventType::SuppressionStopped => "SUPPRESSION_STOPPED",
        }
    }
}

/// ドローンが発行するイベント（スケジューラ・ログ・UI向け）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroneEvent {
    #[serde(rename = "type")]
    pub event_type: DroneEventType,
    pub drone_id: String,
    pub pos: Vec2,
    pub ts: f64,
    pub message: String,
    pub status: DroneStatus,
    pub task_id: Option<String>,
    pub payload: Option<Value>,
}

/// ワールド（ゾーン）で発生するイベントの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorldEventType {
    EnterZone,
    StayInZone,
    FireDetected,
    NoFlyViolation,
    SignalLoss,
}

impl WorldEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorldEventType::EnterZone => "ENTER_ZONE",
            WorldEventType::StayInZone => "STAY_IN_ZONE",
            WorldEventType::FireDetected => "FIRE_DETECTED",
            WorldEventType::NoFlyViolation => "NO_FLY_VIOLATION",
            WorldEventType::SignalLoss => "SIGNAL_LOSS",
        }
    }
}

/// ゾーンが発行するイベント
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorldEvent {
    #[serde(rename = "type")]
    pub event_type: WorldEventType,
    pub ts: f64,
    pub pos: Vec2,
    pub drone_id: String,
    pub zone_id: String,
    pub message: String,
    pub severity: f64,
    pub confidence: f64,
    pub payload: Option<Value>,
}

/// 直近イベントバッファに格納する統一表現
///
/// ドローン系とワールド系の両イベントを同じ形に揃えたもので、
/// スナップショットでそのままシリアライズされます。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    pub ts: f64,
    #[serde(rename = "type")]
    pub event_type: String,
    pub drone_id: String,
    pub pos: Vec2,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<DroneStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl From<DroneEvent> for EventRecord {
    fn from(ev: DroneEvent) -> Self {
        Self {
            ts: ev.ts,
            event_type: ev.event_type.as_str().to_string(),
            drone_id: ev.drone_id,
            pos: ev.pos,
            message: ev.message,
            status: Some(ev.status),
            task_id: ev.task_id,
            zone_id: None,
            severity: None,
            confidence: None,
            payload: ev.payload,
        }
    }
}

impl From<WorldEvent> for EventRecord {
    fn from(ev: WorldEvent) -> Self {
        Self {
            ts: ev.ts,
            event_type: ev.event_type.as_str().to_string(),
            drone_id: ev.drone_id,
            pos: ev.pos,
            message: ev.message,
            status: None,
            task_id: None,
            zone_id: Some(ev.zone_id),
            severity: Some(ev.severity),
            confidence: Some(ev.confidence),
            payload: ev.payload,
        }
    }
}

/// 散布進捗のペイロード
pub(crate) fn suppression_payload(used: f64, left: f64) -> Value {
    json!({ "used": used, "left": left })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_event_record_keeps_severity() {
        let ev = WorldEvent {
            event_type: WorldEventType::FireDetected,
            ts: 3.0,
            pos: Vec2::new(1.0, 2.0),
            drone_id: "D1".to_string(),
            zone_id: "z1".to_string(),
            message: "fire".to_string(),
            severity: 0.9,
            confidence: 0.8,
            payload: None,
        };
        let rec = EventRecord::from(ev);
        assert_eq!(rec.event_type, "FIRE_DETECTED");
        assert_eq!(rec.severity, Some(0.9));
        assert_eq!(rec.confidence, Some(0.8));
        assert_eq!(rec.zone_id.as_deref(), Some("z1"));

        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["type"], "FIRE_DETECTED");
        assert!(json.get("status").is_none());
    }
}
