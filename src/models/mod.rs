// 基本的なデータ型と数学ユーティリティ
pub mod common;

// エージェントの基本インターフェース（trait）定義
pub mod traits;

// タスクとイベントの値型
pub mod task;
pub mod event;

// 各エージェントモデルの実装
pub mod drone;
pub mod fire_drone;

// ワールドとジオフェンス
pub mod zone;
pub mod world;

// 便利な re-export
pub use common::*;
pub use traits::*;
pub use task::{Task, TaskContext, TaskError, TaskKind, TaskType};
pub use event::{DroneEvent, DroneEventType, EventRecord, WorldEvent, WorldEventType};
pub use drone::{Drone, DroneConfig, DroneStatus};
pub use fire_drone::{FirefightingConfig, FirefightingDrone};
pub use zone::{Rect, TriggerMode, TriggerPolicy, Zone, ZoneType};
pub use world::World;
