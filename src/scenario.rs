//! # Scenario モジュール
//!
//! YAML シナリオファイルの読み込み・検証と、ワールド／機体群の構築を行います。
//!
//! シナリオを省略した場合は [`ScenarioConfig::edge_default`] の既定構成
//! （四隅の巡回機4機、下辺中央の消火機4機、ランダムな火災ゾーン2〜3個）を使用します。

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{
    Bounds, Drone, DroneConfig, FirefightingConfig, FirefightingDrone, IAgent, Rect, TriggerMode,
    TriggerPolicy, Vec2, World, Zone, ZoneType,
};

/// シナリオメタデータ
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScenarioMeta {
    pub version: String,
    pub name: String,
    pub description: String,
}

impl Default for ScenarioMeta {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            name: "unnamed".to_string(),
            description: String::new(),
        }
    }
}

/// シミュレーション設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    pub dt_s: f64,
    pub t_max_s: f64,
    /// 省略時は起動ごとにランダム
    #[serde(default)]
    pub seed: Option<u64>,
    /// イベントリングバッファの容量
    #[serde(default = "default_event_buffer_capacity")]
    pub event_buffer_capacity: usize,
    /// スナップショットに含める直近イベント数
    #[serde(default = "default_snapshot_event_limit")]
    pub snapshot_event_limit: usize,
}

fn default_event_buffer_capacity() -> usize {
    200
}

fn default_snapshot_event_limit() -> usize {
    50
}

/// 世界設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorldConfig {
    pub width_m: f64,
    pub height_m: f64,
    #[serde(default)]
    pub zones: Vec<Zone>,
    #[serde(default)]
    pub random_fire_zones: Option<RandomFireZones>,
}

/// ランダム火災ゾーンの生成パラメータ
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RandomFireZones {
    pub min_count: u32,
    pub max_count: u32,
    pub min_side_m: f64,
    pub max_side_m: f64,
    /// 領域端からの余白
    pub border_m: f64,
    pub severity_range: [f64; 2],
    pub confidence_range: [f64; 2],
}

impl Default for RandomFireZones {
    fn default() -> Self {
        Self {
            min_count: 2,
            max_count: 3,
            min_side_m: 6.0,
            max_side_m: 12.0,
            border_m: 8.0,
            severity_range: [0.75, 0.95],
            confidence_range: [0.75, 0.95],
        }
    }
}

impl RandomFireZones {
    /// 火災ゾーンを生成
    ///
    /// # 引数
    ///
    /// * `width` / `height` - ワールドサイズ
    /// * `taken` - 既に使われているゾーンID（`z_fire_<n>` の番号はこれを避けて採番）
    /// * `rng` - 乱数源
    pub fn generate<R: Rng>(&self, width: f64, height: f64, taken: &HashSet<&str>, rng: &mut R) -> Vec<Zone> {
        let count = rng.gen_range(self.min_count..=self.max_count);
        let mut next = 1usize;
        (0..count)
            .map(|_| {
                while taken.contains(format!("z_fire_{next}").as_str()) {
                    next += 1;
                }
                let i = next;
                next += 1;
                let w = rng.gen_range(self.min_side_m..=self.max_side_m);
                let h = rng.gen_range(self.min_side_m..=self.max_side_m);
                let xmin = rng.gen_range(self.border_m..=width - self.border_m - w);
                let ymin = rng.gen_range(self.border_m..=height - self.border_m - h);
                let policy = TriggerPolicy {
                    trigger_mode: TriggerMode::OnEnter,
                    cooldown_s: 9999.0,
                    probability: 1.0,
                    severity: rng.gen_range(self.severity_range[0]..=self.severity_range[1]),
                    confidence: rng.gen_range(self.confidence_range[0]..=self.confidence_range[1]),
                };
                Zone::new(
                    format!("z_fire_{i}"),
                    format!("FireZone-{i}"),
                    ZoneType::FireRisk,
                    Rect::new(xmin, xmin + w, ymin, ymin + h),
                    policy,
                )
            })
            .collect()
    }

    fn validate(&self, width: f64, height: f64) -> Result<(), ScenarioError> {
        if self.min_count > self.max_count {
            return Err(ScenarioError::ValidationError(
                "random_fire_zones: min_count > max_count".to_string(),
            ));
        }
        if !(self.min_side_m > 0.0 && self.min_side_m <= self.max_side_m) {
            return Err(ScenarioError::ValidationError(
                "random_fire_zones: invalid side range".to_string(),
            ));
        }
        if self.border_m < 0.0 || 2.0 * self.border_m + self.max_side_m > width.min(height) {
            return Err(ScenarioError::ValidationError(
                "random_fire_zones: zones do not fit inside the world".to_string(),
            ));
        }
        for (name, [lo, hi]) in [("severity_range", self.severity_range), ("confidence_range", self.confidence_range)] {
            if !(0.0..=1.0).contains(&lo) || !(0.0..=1.0).contains(&hi) || lo > hi {
                return Err(ScenarioError::ValidationError(format!(
                    "random_fire_zones: {name} must be an ordered pair within [0, 1]"
                )));
            }
        }
        Ok(())
    }
}

/// 機体種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DroneKind {
    #[default]
    Standard,
    Firefighting,
}

/// 機体ごとの定義（省略した性能値は既定値を使用）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DroneEntry {
    pub id: String,
    #[serde(default)]
    pub kind: DroneKind,
    pub home: Vec2,
    #[serde(default)]
    pub speed_mps: Option<f64>,
    #[serde(default)]
    pub battery_capacity: Option<f64>,
    #[serde(default)]
    pub battery_drain_per_s: Option<f64>,
    #[serde(default)]
    pub battery_low_threshold: Option<f64>,
    #[serde(default)]
    pub payload_capacity: Option<f64>,
}

impl DroneEntry {
    pub fn with_home(id: impl Into<String>, kind: DroneKind, home: Vec2) -> Self {
        Self {
            id: id.into(),
            kind,
            home,
            speed_mps: None,
            battery_capacity: None,
            battery_drain_per_s: None,
            battery_low_threshold: None,
            payload_capacity: None,
        }
    }

    fn apply_overrides(&self, mut config: DroneConfig) -> DroneConfig {
        if let Some(v) = self.speed_mps {
            config.speed_mps = v;
        }
        if let Some(v) = self.battery_capacity {
            config.battery_capacity = v;
        }
        if let Some(v) = self.battery_drain_per_s {
            config.battery_drain_per_s = v;
        }
        if let Some(v) = self.battery_low_threshold {
            config.battery_low_threshold = v;
        }
        config
    }
}

/// 機体群設定
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FleetConfig {
    pub drone_defaults: DroneConfig,
    pub firefighting_defaults: FirefightingConfig,
    pub drones: Vec<DroneEntry>,
}

/// 初期タスク（ランタイムと同じペイロード形式）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InitialTask {
    pub drone_id: String,
    pub task: Value,
}

/// 完全なシナリオ設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    #[serde(default)]
    pub meta: ScenarioMeta,
    pub sim: SimulationConfig,
    pub world: WorldConfig,
    #[serde(default)]
    pub fleet: FleetConfig,
    #[serde(default)]
    pub initial_tasks: Vec<InitialTask>,
}

impl ScenarioConfig {
    /// YAMLファイルからシナリオ設定を読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.to_path_buf()));
        }

        let contents =
            fs::read_to_string(path).map_err(|e| ScenarioError::IoError(path.to_path_buf(), e))?;

        let config: ScenarioConfig = serde_yaml::from_str(&contents)
            .map_err(|e| ScenarioError::ParseError(path.to_path_buf(), e))?;

        config.validate()?;
        info!(path = %path.display(), name = %config.meta.name, "SCENARIO_LOADED: シナリオを読み込みました");

        Ok(config)
    }

    /// YAML文字列から読み込み
    pub fn from_yaml_str(contents: &str) -> Result<Self, ScenarioError> {
        let config: ScenarioConfig = serde_yaml::from_str(contents)
            .map_err(|e| ScenarioError::ParseError(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    /// 既定のエッジ構成
    ///
    /// 100m×100m、dt=0.2s。四隅（余白5m）に巡回機 D1〜D4、下辺中央に
    /// 4m 間隔で消火機 FD1〜FD4 を配置し、火災ゾーンを2〜3個ランダム生成します。
    pub fn edge_default() -> Self {
        let (w, h) = (100.0, 100.0);
        let margin = 5.0;

        let mut drones: Vec<DroneEntry> = [
            ("D1", Vec2::new(margin, margin)),
            ("D2", Vec2::new(w - margin, margin)),
            ("D3", Vec2::new(margin, h - margin)),
            ("D4", Vec2::new(w - margin, h - margin)),
        ]
        .into_iter()
        .map(|(id, home)| DroneEntry::with_home(id, DroneKind::Standard, home))
        .collect();

        let dock_x0 = w * 0.5 - 6.0;
        drones.extend((0..4).map(|i| {
            DroneEntry::with_home(
                format!("FD{}", i + 1),
                DroneKind::Firefighting,
                Vec2::new(dock_x0 + 4.0 * i as f64, margin),
            )
        }));

        Self {
            meta: ScenarioMeta {
                version: "1.0".to_string(),
                name: "edge-default".to_string(),
                description: "Corner patrol drones, docked firefighting drones, random fire zones".to_string(),
            },
            sim: SimulationConfig {
                dt_s: 0.2,
                t_max_s: 600.0,
                seed: None,
                event_buffer_capacity: default_event_buffer_capacity(),
                snapshot_event_limit: default_snapshot_event_limit(),
            },
            world: WorldConfig {
                width_m: w,
                height_m: h,
                zones: Vec::new(),
                random_fire_zones: Some(RandomFireZones::default()),
            },
            fleet: FleetConfig {
                drone_defaults: DroneConfig {
                    speed_mps: 1.6,
                    battery_drain_per_s: 0.02,
                    heartbeat_period_s: 1.0,
                    ..DroneConfig::default()
                },
                firefighting_defaults: FirefightingConfig {
                    drone: DroneConfig {
                        speed_mps: 1.8,
                        battery_drain_per_s: 0.03,
                        heartbeat_period_s: 1.0,
                        ..DroneConfig::default()
                    },
                    ..FirefightingConfig::default()
                },
                drones,
            },
            initial_tasks: Vec::new(),
        }
    }

    /// 設定の検証
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if !(self.sim.dt_s > 0.0) {
            return Err(ScenarioError::ValidationError("dt_s must be positive".to_string()));
        }
        if !(self.sim.t_max_s > 0.0) {
            return Err(ScenarioError::ValidationError("t_max_s must be positive".to_string()));
        }
        if self.sim.event_buffer_capacity == 0 {
            return Err(ScenarioError::ValidationError(
                "event_buffer_capacity must be at least 1".to_string(),
            ));
        }
        if !(self.world.width_m > 0.0 && self.world.height_m > 0.0) {
            return Err(ScenarioError::ValidationError("Invalid world size".to_string()));
        }

        let mut zone_ids = HashSet::new();
        for zone in &self.world.zones {
            if !zone.rect.is_valid() {
                return Err(ScenarioError::ValidationError(format!("Zone {} has a degenerate rect", zone.id)));
            }
            if !(0.0..=1.0).contains(&zone.policy.probability) {
                return Err(ScenarioError::ValidationError(format!(
                    "Zone {} probability {} outside [0, 1]",
                    zone.id, zone.policy.probability
                )));
            }
            if zone.policy.cooldown_s < 0.0 {
                return Err(ScenarioError::ValidationError(format!("Zone {} has a negative cooldown", zone.id)));
            }
            if !zone_ids.insert(zone.id.as_str()) {
                return Err(ScenarioError::ValidationError(format!("Duplicate zone id {}", zone.id)));
            }
        }
        if let Some(random) = &self.world.random_fire_zones {
            random.validate(self.world.width_m, self.world.height_m)?;
        }

        let mut drone_ids = HashSet::new();
        for entry in &self.fleet.drones {
            if !drone_ids.insert(entry.id.as_str()) {
                return Err(ScenarioError::ValidationError(format!("Duplicate drone id {}", entry.id)));
            }
            if !self.is_position_in_bounds(entry.home) {
                return Err(ScenarioError::ValidationError(format!(
                    "Drone {} home {} outside world bounds",
                    entry.id, entry.home
                )));
            }
            let config = self.drone_config_for(entry);
            if !(config.speed_mps > 0.0) || config.battery_drain_per_s < 0.0 {
                return Err(ScenarioError::ValidationError(format!(
                    "Drone {} has invalid performance values",
                    entry.id
                )));
            }
        }

        for initial in &self.initial_tasks {
            if !drone_ids.contains(initial.drone_id.as_str()) {
                return Err(ScenarioError::ValidationError(format!(
                    "Initial task references unknown drone {}",
                    initial.drone_id
                )));
            }
        }

        Ok(())
    }

    fn is_position_in_bounds(&self, p: Vec2) -> bool {
        Bounds::new(0.0, self.world.width_m, 0.0, self.world.height_m).contains(p)
    }

    fn drone_config_for(&self, entry: &DroneEntry) -> DroneConfig {
        let base = match entry.kind {
            DroneKind::Standard => self.fleet.drone_defaults.clone(),
            DroneKind::Firefighting => self.fleet.firefighting_defaults.drone.clone(),
        };
        entry.apply_overrides(base)
    }

    /// ワールドを構築
    ///
    /// # 引数
    ///
    /// * `seed` - ゾーン確率ゲートのシード。ランダム火災ゾーンは `seed + 1` で生成
    pub fn build_world(&self, seed: u64) -> World {
        let mut world = World::new(self.world.width_m, self.world.height_m, seed);
        for zone in &self.world.zones {
            world.add_zone(zone.clone());
        }
        if let Some(random) = &self.world.random_fire_zones {
            let mut rng = SmallRng::seed_from_u64(seed.wrapping_add(1));
            let taken: HashSet<&str> = self.world.zones.iter().map(|z| z.id.as_str()).collect();
            for zone in random.generate(self.world.width_m, self.world.height_m, &taken, &mut rng) {
                debug!(zone_id = %zone.id, xmin = zone.rect.xmin, ymin = zone.rect.ymin, "FIRE_ZONE_GENERATED");
                world.add_zone(zone);
            }
        }
        world
    }

    /// 機体群を構築（定義順）
    pub fn build_fleet(&self) -> Vec<Box<dyn IAgent>> {
        self.fleet
            .drones
            .iter()
            .map(|entry| -> Box<dyn IAgent> {
                let config = self.drone_config_for(entry);
                match entry.kind {
                    DroneKind::Standard => Box::new(Drone::new(entry.id.clone(), entry.home, config)),
                    DroneKind::Firefighting => {
                        let mut ff = self.fleet.firefighting_defaults.clone();
                        ff.drone = config;
                        if let Some(capacity) = entry.payload_capacity {
                            ff.payload_capacity = capacity;
                        }
                        Box::new(FirefightingDrone::new(entry.id.clone(), entry.home, ff))
                    }
                }
            })
            .collect()
    }

    /// シナリオの概要を表示
    pub fn print_summary(&self) {
        println!("=== シナリオ情報 ===");
        println!("名前: {}", self.meta.name);
        println!("説明: {}", self.meta.description);
        println!("バージョン: {}", self.meta.version);
        println!();

        println!("=== シミュレーション設定 ===");
        println!("時間刻み: {:.3}秒", self.sim.dt_s);
        println!("最大時間: {:.1}秒 ({:.1}分)", self.sim.t_max_s, self.sim.t_max_s / 60.0);
        match self.sim.seed {
            Some(seed) => println!("シード値: {}", seed),
            None => println!("シード値: (起動ごとにランダム)"),
        }
        println!();

        println!("=== ワールド ===");
        println!("サイズ: {:.0}m x {:.0}m", self.world.width_m, self.world.height_m);
        println!("固定ゾーン: {}個", self.world.zones.len());
        for zone in &self.world.zones {
            println!("  {} ({}): {}", zone.id, zone.zone_type.as_str(), zone.name);
        }
        if let Some(random) = &self.world.random_fire_zones {
            println!("ランダム火災ゾーン: {}〜{}個", random.min_count, random.max_count);
        }
        println!();

        println!("=== 機体 ===");
        let firefighting = self
            .fleet
            .drones
            .iter()
            .filter(|d| d.kind == DroneKind::Firefighting)
            .count();
        println!("巡回機: {}機", self.fleet.drones.len() - firefighting);
        println!("消火機: {}機", firefighting);
        println!("初期タスク: {}件", self.initial_tasks.len());
    }
}

/// シナリオ読み込みエラー
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("シナリオファイルが見つかりません: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("ファイル読み込みエラー {}: {}", .0.display(), .1)]
    IoError(PathBuf, #[source] std::io::Error),

    #[error("YAML解析エラー {}: {}", .0.display(), .1)]
    ParseError(PathBuf, #[source] serde_yaml::Error),

    #[error("設定検証エラー: {0}")]
    ValidationError(String),
}
