use std::collections::{HashMap, HashSet};

use rand::SeedableRng;
use rand::rngs::SmallRng;
use tracing::info;

use crate::models::{
    common::{Bounds, Vec2},
    event::WorldEvent,
    zone::Zone,
};

/// 2次元ワールド
///
/// ゾーンの登録簿と、(ドローン, ゾーン) ごとの在圏・発火履歴を保持します。
/// 履歴は [`World::update`] でのみ更新されます。
#[derive(Debug, Clone)]
pub struct World {
    pub width: f64,
    pub height: f64,
    zones: Vec<Zone>,
    /// 前ティック時点で各ドローンが在圏していたゾーンID
    last_inside: HashMap<String, HashSet<String>>,
    last_fired: HashMap<(String, String), f64>,
    rng: SmallRng,
}

impl World {
    /// 新しいワールドを作成します
    ///
    /// # 引数
    ///
    /// * `width` / `height` - 領域サイズ（メートル、原点は左下）
    /// * `seed` - 確率ゲート用乱数のシード
    pub fn new(width: f64, height: f64, seed: u64) -> Self {
        Self {
            width,
            height,
            zones: Vec::new(),
            last_inside: HashMap::new(),
            last_fired: HashMap::new(),
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// 乱数源の再シード
    pub fn set_seed(&mut self, seed: u64) {
        self.rng = SmallRng::seed_from_u64(seed);
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::new(0.0, self.width, 0.0, self.height)
    }

    pub fn add_zone(&mut self, zone: Zone) {
        self.zones.push(zone);
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    /// 指定位置を含むゾーン一覧
    pub fn query_zones(&self, pos: Vec2) -> Vec<&Zone> {
        self.zones.iter().filter(|z| z.contains(pos)).collect()
    }

    /// 前ティックの在圏ゾーン
    pub fn zones_of(&self, drone_id: &str) -> Option<&HashSet<String>> {
        self.last_inside.get(drone_id)
    }

    /// 在圏状態を更新し、ゾーンイベントを収集
    ///
    /// ドローン順→ゾーン登録順に走査するため、同一ティック内のイベント順は
    /// 入力順に対して決定的です（確率ゲートの乱数を除く）。
    ///
    /// # 引数
    ///
    /// * `positions` - (ドローンID, 位置) の列
    /// * `ts` - 現在時刻（秒）
    pub fn update(&mut self, positions: &[(String, Vec2)], ts: f64) -> Vec<WorldEvent> {
        let mut events = Vec::new();

        for (drone_id, pos) in positions {
            let mut inside_now = HashSet::new();
            let inside_prev = self.last_inside.remove(drone_id).unwrap_or_default();

            for zone in &self.zones {
                if !zone.contains(*pos) {
                    continue;
                }
                inside_now.insert(zone.id.clone());

                let entering = !inside_prev.contains(&zone.id);
                let key = (drone_id.clone(), zone.id.clone());
                let last_fired_ts = self.last_fired.get(&key).copied();

                let (produced, new_last) =
                    zone.produce_events(drone_id, *pos, ts, entering, last_fired_ts, &mut self.rng);

                for ev in &produced {
                    info!(
                        drone_id = %ev.drone_id,
                        zone_id = %ev.zone_id,
                        event_type = ev.event_type.as_str(),
                        severity = ev.severity,
                        confidence = ev.confidence,
                        x = ev.pos.x,
                        y = ev.pos.y,
                        "ZONE_TRIGGERED: ゾーンイベントが発生しました"
                    );
                }
                events.extend(produced);

                if let Some(last) = new_last {
                    self.last_fired.insert(key, last);
                }
            }

            self.last_inside.insert(drone_id.clone(), inside_now);
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::drone::{Drone, DroneConfig};
    use crate::models::event::WorldEventType;
    use crate::models::task::Task;
    use crate::models::zone::{Rect, TriggerMode, TriggerPolicy, ZoneType};

    fn fire_zone(policy: TriggerPolicy) -> Zone {
        Zone::new("z_fire_1", "FireZone-1", ZoneType::FireRisk, Rect::new(42.0, 58.0, 42.0, 58.0), policy)
    }

    fn at(id: &str, x: f64, y: f64) -> Vec<(String, Vec2)> {
        vec![(id.to_string(), Vec2::new(x, y))]
    }

    #[test]
    fn test_on_enter_fires_once_per_contiguous_stay() {
        let mut world = World::new(100.0, 100.0, 0);
        world.add_zone(fire_zone(TriggerPolicy::default()));

        assert!(world.update(&at("D1", 10.0, 10.0), 0.2).is_empty());
        assert_eq!(world.update(&at("D1", 45.0, 45.0), 0.4).len(), 1);
        for k in 0..20 {
            assert!(world.update(&at("D1", 46.0, 46.0), 0.6 + k as f64 * 0.2).is_empty());
        }
        assert!(world.update(&at("D1", 70.0, 70.0), 5.0).is_empty());
        let events = world.update(&at("D1", 50.0, 50.0), 5.2);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, WorldEventType::FireDetected);
    }

    #[test]
    fn test_membership_is_tracked_per_drone() {
        let mut world = World::new(100.0, 100.0, 0);
        world.add_zone(fire_zone(TriggerPolicy::default()));

        let positions = vec![
            ("D1".to_string(), Vec2::new(50.0, 50.0)),
            ("D2".to_string(), Vec2::new(10.0, 10.0)),
            ("D3".to_string(), Vec2::new(44.0, 44.0)),
        ];
        let events = world.update(&positions, 1.0);
        let ids: Vec<_> = events.iter().map(|e| e.drone_id.as_str()).collect();
        assert_eq!(ids, vec!["D1", "D3"]);
        assert!(world.zones_of("D1").unwrap().contains("z_fire_1"));
        assert!(world.zones_of("D2").unwrap().is_empty());
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let policy = TriggerPolicy {
            trigger_mode: TriggerMode::OnStay,
            probability: 0.5,
            ..TriggerPolicy::default()
        };
        let run = |seed: u64| {
            let mut world = World::new(100.0, 100.0, seed);
            world.add_zone(fire_zone(policy.clone()));
            (0..50)
                .map(|k| world.update(&at("D1", 50.0, 50.0), k as f64).len())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(42), run(42));
        let fired: usize = run(42).iter().sum();
        assert!(fired > 0 && fired < 50);

        let mut reseeded = World::new(100.0, 100.0, 7);
        reseeded.add_zone(fire_zone(policy.clone()));
        reseeded.set_seed(42);
        let counts: Vec<_> = (0..50)
            .map(|k| reseeded.update(&at("D1", 50.0, 50.0), k as f64).len())
            .collect();
        assert_eq!(counts, run(42));
    }

    #[test]
    fn test_events_follow_drone_then_zone_order() {
        let mut world = World::new(100.0, 100.0, 0);
        world.add_zone(Zone::new(
            "z_nofly_1",
            "NoFly-1",
            ZoneType::NoFly,
            Rect::new(40.0, 60.0, 40.0, 60.0),
            TriggerPolicy::default(),
        ));
        world.add_zone(fire_zone(TriggerPolicy::default()));

        let center = world.zones()[1].rect.center();
        assert_eq!(center, Vec2::new(50.0, 50.0));
        let positions = vec![("D2".to_string(), center), ("D1".to_string(), Vec2::new(45.0, 45.0))];
        let events = world.update(&positions, 1.0);
        let order: Vec<_> = events
            .iter()
            .map(|e| (e.drone_id.as_str(), e.zone_id.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("D2", "z_nofly_1"),
                ("D2", "z_fire_1"),
                ("D1", "z_nofly_1"),
                ("D1", "z_fire_1"),
            ]
        );
        assert_eq!(events[0].event_type, WorldEventType::NoFlyViolation);
        assert_eq!(events[1].event_type, WorldEventType::FireDetected);
    }

    #[test]
    fn test_query_zones() {
        let mut world = World::new(100.0, 100.0, 0);
        world.add_zone(fire_zone(TriggerPolicy::default()));
        world.add_zone(Zone::new(
            "z_info",
            "Base",
            ZoneType::Info,
            Rect::new(40.0, 60.0, 40.0, 60.0),
            TriggerPolicy::default(),
        ));
        assert_eq!(world.query_zones(Vec2::new(50.0, 50.0)).len(), 2);
        assert_eq!(world.query_zones(Vec2::new(41.0, 41.0)).len(), 1);
        assert!(world.query_zones(Vec2::new(0.0, 0.0)).is_empty());
        assert_eq!(world.bounds(), Bounds::new(0.0, 100.0, 0.0, 100.0));
    }

    #[test]
    fn test_patrol_into_fire_zone_reports_once() {
        let policy = TriggerPolicy {
            severity: 0.87,
            confidence: 0.79,
            ..TriggerPolicy::default()
        };
        let mut world = World::new(100.0, 100.0, 0);
        world.add_zone(fire_zone(policy));
        let bounds = world.bounds();

        let config = DroneConfig {
            speed_mps: 1.6,
            ..DroneConfig::default()
        };
        let mut drone = Drone::new("D1", Vec2::new(10.0, 10.0), config);
        drone.assign_task(Task::path("patrol", vec![Vec2::new(49.0, 49.0)], false), 0.0);

        let zone_rect = Rect::new(42.0, 58.0, 42.0, 58.0);
        let mut detections = Vec::new();
        let mut entered_at = None;
        for k in 1..=400 {
            let ts = k as f64 * 0.2;
            drone.tick(0.2, ts, Some(&bounds));
            let events = world.update(&[(drone.id.clone(), drone.pos)], ts);
            if entered_at.is_none() && zone_rect.contains(drone.pos) {
                entered_at = Some(k);
                assert_eq!(events.len(), 1);
            }
            detections.extend(events);
        }

        assert!(entered_at.is_some());
        assert_eq!(detections.len(), 1);
        let ev = &detections[0];
        assert_eq!(ev.event_type, WorldEventType::FireDetected);
        assert_eq!(ev.drone_id, "D1");
        assert_eq!(ev.severity, 0.87);
        assert_eq!(ev.confidence, 0.79);
        assert_eq!(drone.pos, Vec2::new(49.0, 49.0));
    }
}
