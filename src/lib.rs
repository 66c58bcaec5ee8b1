//! # edgesim
//!
//! 2次元ワールド上のドローン群を固定時間刻みで動かすエッジシミュレータです。
//!
//! - [`models`]: ドローン・タスク・ゾーン・ワールドのモデル
//! - [`simulation`]: 共有状態とバックグラウンドループ
//! - [`scenario`]: YAML シナリオの読み込みと検証
//! - [`logging`]: tracing の初期化

pub mod error;
pub mod logging;
pub mod models;
pub mod scenario;
pub mod simulation;

pub use error::{SimError, SimResult};
