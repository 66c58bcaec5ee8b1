//! # Zone モジュール
//!
//! 矩形ジオフェンス（ゾーン）と、確率的・クールダウン付きのイベント発行ポリシーを定義します。
//!
//! ゾーン自体は不変の値・問い合わせオブジェクトです。発火履歴（クールダウン管理）は
//! [`crate::models::world::World`] が保持し、[`Zone::produce_events`] へ引数として渡されます。
//!
//! ## 発火判定の順序
//!
//! 1. ON_ENTER かつ進入遷移でない → 発火しない
//! 2. ON_STAY かつ前回発火からクールダウン未経過 → 発火しない
//! 3. 一様乱数が確率を超えた → 発火しない
//! 4. ゾーン種別に応じたイベントを1件発行し、発火時刻を更新

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::models::{
    common::Vec2,
    event::{WorldEvent, WorldEventType},
};

/// ゾーン種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZoneType {
    FireRisk,
    NoFly,
    SignalLoss,
    Info,
}

impl ZoneType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneType::FireRisk => "FIRE_RISK",
            ZoneType::NoFly => "NO_FLY",
            ZoneType::SignalLoss => "SIGNAL_LOSS",
            ZoneType::Info => "INFO",
        }
    }
}

/// 発火モード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerMode {
    /// 外→内の遷移時のみ発火
    OnEnter,
    /// 滞在中、クールダウンごとに発火
    OnStay,
}

/// 軸平行矩形（境界を含む）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
}

impl Rect {
    pub fn new(xmin: f64, xmax: f64, ymin: f64, ymax: f64) -> Self {
        Self { xmin, xmax, ymin, ymax }
    }

    pub fn contains(&self, p: Vec2) -> bool {
        self.xmin <= p.x && p.x <= self.xmax && self.ymin <= p.y && p.y <= self.ymax
    }

    /// 面積を持つ有限な矩形かどうか
    pub fn is_valid(&self) -> bool {
        [self.xmin, self.xmax, self.ymin, self.ymax].iter().all(|v| v.is_finite())
            && self.xmin < self.xmax
            && self.ymin < self.ymax
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new((self.xmin + self.xmax) / 2.0, (self.ymin + self.ymax) / 2.0)
    }
}

/// ゾーンのイベント発行ポリシー
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerPolicy {
    pub trigger_mode: TriggerMode,
    /// ON_STAY 時の最小発火間隔（秒）
    pub cooldown_s: f64,
    /// 発火確率 [0, 1]
    pub probability: f64,
    pub severity: f64,
    pub confidence: f64,
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self {
            trigger_mode: TriggerMode::OnEnter,
            cooldown_s: 0.0,
            probability: 1.0,
            severity: 0.5,
            confidence: 0.7,
        }
    }
}

/// 矩形ジオフェンス
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub zone_type: ZoneType,
    pub rect: Rect,
    #[serde(default)]
    pub policy: TriggerPolicy,
}

impl Zone {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        zone_type: ZoneType,
        rect: Rect,
        policy: TriggerPolicy,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            zone_type,
            rect,
            policy,
        }
    }

    pub fn contains(&self, p: Vec2) -> bool {
        self.rect.contains(p)
    }

    /// ゾーン内にいるドローンに対するイベント生成
    ///
    /// # 引数
    ///
    /// * `drone_id` - 対象ドローンID
    /// * `pos` - ドローン位置
    /// * `ts` - 現在時刻（秒）
    /// * `entering` - 前ティックではゾーン外だったか
    /// * `last_fired_ts` - この (ドローン, ゾーン) の前回発火時刻
    /// * `rng` - 確率ゲート用の乱数源
    ///
    /// # 戻り値
    ///
    /// (発行イベント, 新しい前回発火時刻)。発火しなかった場合は入力の発火時刻をそのまま返す
    pub fn produce_events<R: Rng>(
        &self,
        drone_id: &str,
        pos: Vec2,
        ts: f64,
        entering: bool,
        last_fired_ts: Option<f64>,
        rng: &mut R,
    ) -> (Vec<WorldEvent>, Option<f64>) {
        match self.policy.trigger_mode {
            TriggerMode::OnEnter if !entering => return (Vec::new(), last_fired_ts),
            TriggerMode::OnStay => {
                if let Some(last) = last_fired_ts {
                    if ts - last < self.policy.cooldown_s {
                        return (Vec::new(), last_fired_ts);
                    }
                }
            }
            TriggerMode::OnEnter => {}
        }

        let draw: f64 = rng.r#gen();
        if draw > self.policy.probability {
            return (Vec::new(), last_fired_ts);
        }

        let (event_type, message) = match self.zone_type {
            ZoneType::FireRisk => (
                WorldEventType::FireDetected,
                format!("Fire suspected in zone {}", self.name),
            ),
            ZoneType::NoFly => (
                WorldEventType::NoFlyViolation,
                format!("No-fly zone violation: {}", self.name),
            ),
            ZoneType::SignalLoss => (
                WorldEventType::SignalLoss,
                format!("Signal loss triggered in zone {}", self.name),
            ),
            ZoneType::Info => (
                if entering {
                    WorldEventType::EnterZone
                } else {
                    WorldEventType::StayInZone
                },
                format!("Zone trigger: {}", self.name),
            ),
        };

        let event = WorldEvent {
            event_type,
            ts,
            pos,
            drone_id: drone_id.to_string(),
            zone_id: self.id.clone(),
            message,
            severity: self.policy.severity,
            confidence: self.policy.confidence,
            payload: Some(json!({
                "zone_type": self.zone_type.as_str(),
                "zone_name": self.name,
                "entering": entering,
            })),
        };

        (vec![event], Some(ts))
    }
}
