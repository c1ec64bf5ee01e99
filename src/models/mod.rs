// 基本的なデータ型と数学ユーティリティ
pub mod common;

// 外部コラボレータとプールのインターフェース（trait）定義
pub mod traits;

// インスタンスプールと購読管理
pub mod pool;
pub mod observer;

// 各エンティティとルールの実装
pub mod agent;
pub mod attack;
pub mod leaderboard;
pub mod name_tag;
pub mod player;
pub mod projectile;
pub mod score;
pub mod spawner;
pub mod targeting;

// 便利な re-export
pub use common::*;
pub use traits::*;
pub use pool::{EntityPool, GrowthPolicy};
pub use agent::{Agent, AgentCommand, AgentHandle, AgentRules};
pub use attack::{AttackPhase, AttackResolver, AttackToken};
pub use leaderboard::{LeaderboardEntry, ScoreLeaderboard};
pub use name_tag::{NameTag, NameTagHandle};
pub use player::Player;
pub use projectile::{Projectile, ProjectileEndReason, ProjectileHandle, ProjectileHit};
pub use score::{MatchOutcome, MatchState, ScoreManager};
pub use spawner::{SpawnArea, Spawner};
pub use targeting::{TargetAcquisition, TargetSnapshot, TargetingConfig};
