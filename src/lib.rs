//! # arenasim
//!
//! プール化されたAIエージェントとプレイヤーが戦う戦闘アリーナのシミュレーションエンジン。

pub mod collaborators;
pub mod logging;
pub mod models;
pub mod scenario;
pub mod scheduler;
pub mod simulation;
