use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::pool::GrowthPolicy;
use crate::models::spawner::SpawnArea;

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
            name: "default_arena".to_string(),
            description: "2エリア・2種別の標準アリーナ".to_string(),
        }
    }
}

/// シミュレーション設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub dt_s: f64,
    pub t_max_s: f64,
    pub seed: u64,
    /// 実時間に合わせてティックを進める
    pub realtime: bool,
    /// 勝敗が決まった時点で実行を打ち切る
    pub stop_on_outcome: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            dt_s: 0.05,
            t_max_s: 120.0,
            seed: 42,
            realtime: false,
            stop_on_outcome: true,
        }
    }
}

/// AIエージェントの行動設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AiConfig {
    /// プレハブ種別
    pub kinds: Vec<String>,
    pub detection_range: f64,
    pub attack_range: f64,
    /// リード距離
    pub max_distance: f64,
    pub target_switch_cooldown_s: f64,
    pub speed: f64,
    pub angular_speed_deg: f64,
    pub stopping_distance: f64,
    /// 機会攻撃の前方コーン角（全角）
    pub attack_angle_deg: f64,
    pub attack_cooldown_s: f64,
    pub opportunistic_attacks: bool,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            kinds: vec!["Warrior".to_string(), "Berserker".to_string()],
            detection_range: 50.0,
            attack_range: 2.5,
            max_distance: 200.0,
            target_switch_cooldown_s: 1.5,
            speed: 1.5,
            angular_speed_deg: 120.0,
            stopping_distance: 2.0,
            attack_angle_deg: 60.0,
            attack_cooldown_s: 1.5,
            opportunistic_attacks: true,
        }
    }
}

/// 攻撃・死亡のタイミング設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CombatConfig {
    pub hammer_delay_s: f64,
    pub hammer_speed: f64,
    pub attack_recovery_s: f64,
    pub player_attack_recovery_s: f64,
    /// 推定飛翔時間に加える返却猶予
    pub hammer_return_buffer_s: f64,
    pub death_animation_s: f64,
    pub release_buffer_s: f64,
    pub hit_radius: f64,
}

impl Default for CombatConfig {
    fn default() -> Self {
        Self {
            hammer_delay_s: 0.5,
            hammer_speed: 30.0,
            attack_recovery_s: 0.5,
            player_attack_recovery_s: 0.5,
            hammer_return_buffer_s: 0.5,
            death_animation_s: 1.5,
            release_buffer_s: 0.5,
            hit_radius: 1.0,
        }
    }
}

impl CombatConfig {
    /// 死亡からプール返却までの遅延
    pub fn death_release_delay(&self) -> f64 {
        self.death_animation_s + self.release_buffer_s
    }
}

/// 撃破によるスケール成長
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScalingConfig {
    pub kill_scale_amount: f64,
    pub scale_step: u32,
    pub scale_amount: f64,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            kill_scale_amount: 0.3,
            scale_step: 5,
            scale_amount: 0.1,
        }
    }
}

/// プール容量と枯渇時ポリシー
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolsConfig {
    pub agents_per_kind: usize,
    pub agent_policy: GrowthPolicy,
    pub projectile_capacity: usize,
    pub projectile_policy: GrowthPolicy,
    pub name_tag_capacity: usize,
    pub name_tag_policy: GrowthPolicy,
}

impl Default for PoolsConfig {
    fn default() -> Self {
        Self {
            agents_per_kind: 10,
            agent_policy: GrowthPolicy::Fixed,
            projectile_capacity: 5,
            projectile_policy: GrowthPolicy::Fixed,
            name_tag_capacity: 50,
            name_tag_policy: GrowthPolicy::Grow,
        }
    }
}

/// スポーン設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SpawnConfig {
    pub auto_spawn: bool,
    pub agents_per_area: u32,
    pub areas: Vec<SpawnArea>,
    pub min_spawn_distance: f64,
    pub max_spawn_attempts: u32,
    /// 表示名 `AI_<n>` の番号の下限
    pub name_min: u32,
    /// 表示名 `AI_<n>` の番号の上限
    pub name_max: u32,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            auto_spawn: true,
            agents_per_area: 10,
            areas: vec![
                SpawnArea {
                    name: "west".to_string(),
                    x_min: -60.0,
                    x_max: -10.0,
                    y_min: -40.0,
                    y_max: 40.0,
                    z: 0.0,
                },
                SpawnArea {
                    name: "east".to_string(),
                    x_min: 10.0,
                    x_max: 60.0,
                    y_min: -40.0,
                    y_max: 40.0,
                    z: 0.0,
                },
            ],
            min_spawn_distance: 15.0,
            max_spawn_attempts: 20,
            name_min: 100,
            name_max: 999,
        }
    }
}

/// スクリプト入力のキーフレーム
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InputKey {
    pub at_s: f64,
    pub x: f64,
    pub y: f64,
}

/// プレイヤー設定
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub max_health: u32,
    pub move_speed: f64,
    /// 自動攻撃の探知範囲
    pub detect_range: f64,
    /// 時刻順の移動入力（空なら外部から操作）
    pub inputs: Vec<InputKey>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            name: "Player".to_string(),
            x: 0.0,
            y: 0.0,
            max_health: 3,
            move_speed: 6.0,
            detect_range: 2.0,
            inputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LeaderboardConfig {
    pub max_entries: usize,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self { max_entries: 5 }
    }
}

/// 試合ルール
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MatchRulesConfig {
    /// 制限時間（0以下で無制限）
    pub duration_s: f64,
}

impl Default for MatchRulesConfig {
    fn default() -> Self {
        Self { duration_s: 60.0 }
    }
}

fn default_players() -> Vec<PlayerConfig> {
    vec![PlayerConfig::default()]
}

/// 完全なシナリオ設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArenaScenario {
    #[serde(default)]
    pub meta: ScenarioMeta,
    #[serde(default)]
    pub sim: SimulationConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub combat: CombatConfig,
    #[serde(default)]
    pub scaling: ScalingConfig,
    #[serde(default)]
    pub pools: PoolsConfig,
    #[serde(default)]
    pub spawn: SpawnConfig,
    #[serde(default = "default_players")]
    pub players: Vec<PlayerConfig>,
    #[serde(default)]
    pub leaderboard: LeaderboardConfig,
    #[serde(default)]
    pub match_rules: MatchRulesConfig,
}

impl Default for ArenaScenario {
    fn default() -> Self {
        Self {
            meta: ScenarioMeta::default(),
            sim: SimulationConfig::default(),
            ai: AiConfig::default(),
            combat: CombatConfig::default(),
            scaling: ScalingConfig::default(),
            pools: PoolsConfig::default(),
            spawn: SpawnConfig::default(),
            players: default_players(),
            leaderboard: LeaderboardConfig::default(),
            match_rules: MatchRulesConfig::default(),
        }
    }
}

impl ArenaScenario {
    /// YAMLファイルからシナリオ設定を読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.to_path_buf()));
        }

        let contents =
            fs::read_to_string(path).map_err(|e| ScenarioError::Io(path.to_path_buf(), e))?;

        let config: ArenaScenario = serde_yaml::from_str(&contents)
            .map_err(|e| ScenarioError::Parse(path.to_path_buf(), e))?;

        config.validate()?;

        Ok(config)
    }

    /// 設定の基本的な検証
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.sim.dt_s <= 0.0 {
            return Err(ScenarioError::Validation("dt_s must be positive".to_string()));
        }
        if self.sim.t_max_s <= 0.0 {
            return Err(ScenarioError::Validation("t_max_s must be positive".to_string()));
        }

        if self.ai.kinds.is_empty() {
            return Err(ScenarioError::Validation("ai.kinds must not be empty".to_string()));
        }
        if self.ai.attack_range <= 0.0 || self.ai.attack_range >= self.ai.detection_range {
            return Err(ScenarioError::Validation(format!(
                "attack_range {} must be positive and smaller than detection_range {}",
                self.ai.attack_range, self.ai.detection_range
            )));
        }
        if self.ai.max_distance < self.ai.detection_range {
            return Err(ScenarioError::Validation(
                "max_distance must not be smaller than detection_range".to_string(),
            ));
        }

        if self.combat.hammer_speed <= 0.0 {
            return Err(ScenarioError::Validation("hammer_speed must be positive".to_string()));
        }

        if self.pools.agents_per_kind == 0 || self.pools.projectile_capacity == 0 {
            return Err(ScenarioError::Validation("pool capacities must be positive".to_string()));
        }

        for area in &self.spawn.areas {
            if !area.is_valid() {
                return Err(ScenarioError::Validation(format!(
                    "Invalid spawn area bounds: {}",
                    area.name
                )));
            }
        }

        if self.spawn.name_min > self.spawn.name_max {
            return Err(ScenarioError::Validation(format!(
                "spawn.name_min ({}) must not exceed spawn.name_max ({})",
                self.spawn.name_min, self.spawn.name_max
            )));
        }

        for player in &self.players {
            if player.max_health == 0 {
                return Err(ScenarioError::Validation(format!(
                    "Player {} must have positive max_health",
                    player.name
                )));
            }
        }

        if self.leaderboard.max_entries == 0 {
            return Err(ScenarioError::Validation("leaderboard.max_entries must be positive".to_string()));
        }

        Ok(())
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
        println!("シード値: {}", self.sim.seed);
        println!("制限時間: {:.1}秒", self.match_rules.duration_s);
        println!();

        println!("=== AI ===");
        println!("種別: {}", self.ai.kinds.join(", "));
        println!(
            "探知半径: {:.1} / 攻撃射程: {:.1} / リード距離: {:.1}",
            self.ai.detection_range, self.ai.attack_range, self.ai.max_distance
        );
        println!(
            "プール: 種別ごと{}体 ({:?}), 投擲物{}個 ({:?}), ネームタグ{}個 ({:?})",
            self.pools.agents_per_kind,
            self.pools.agent_policy,
            self.pools.projectile_capacity,
            self.pools.projectile_policy,
            self.pools.name_tag_capacity,
            self.pools.name_tag_policy
        );
        println!();

        println!("=== スポーン ===");
        for area in &self.spawn.areas {
            println!(
                "  {}: x[{:.0}, {:.0}] y[{:.0}, {:.0}] × {}体",
                area.name, area.x_min, area.x_max, area.y_min, area.y_max, self.spawn.agents_per_area
            );
        }
        println!("表示名: AI_{}〜AI_{}", self.spawn.name_min, self.spawn.name_max);
        println!("プレイヤー: {}人", self.players.len());
    }
}

/// シナリオ読み込みエラー
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("シナリオファイルが見つかりません: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("ファイル読み込みエラー {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),
    #[error("YAML解析エラー {}: {}", .0.display(), .1)]
    Parse(PathBuf, #[source] serde_yaml::Error),
    #[error("設定検証エラー: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let scenario = ArenaScenario::default();
        assert!(scenario.validate().is_ok());
        assert_eq!(scenario.combat.death_release_delay(), 2.0);
        assert_eq!(scenario.players.len(), 1);
    }

    #[test]
    fn test_partial_yaml_falls_back_to_defaults() {
        let yaml = r#"
meta:
  name: "small"
sim:
  dt_s: 0.1
ai:
  kinds: ["Warrior"]
pools:
  agents_per_kind: 3
"#;
        let scenario: ArenaScenario = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(scenario.meta.name, "small");
        assert_eq!(scenario.sim.dt_s, 0.1);
        assert_eq!(scenario.sim.seed, 42);
        assert_eq!(scenario.ai.attack_range, 2.5);
        assert_eq!(scenario.pools.agents_per_kind, 3);
        assert_eq!(scenario.pools.name_tag_policy, GrowthPolicy::Grow);
        assert_eq!((scenario.spawn.name_min, scenario.spawn.name_max), (100, 999));
        assert_eq!(scenario.players.len(), 1);
        assert!(scenario.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_ranges() {
        let mut scenario = ArenaScenario::default();
        scenario.ai.attack_range = 60.0;
        assert!(matches!(scenario.validate(), Err(ScenarioError::Validation(_))));

        let mut scenario = ArenaScenario::default();
        scenario.sim.dt_s = 0.0;
        assert!(scenario.validate().is_err());

        let mut scenario = ArenaScenario::default();
        scenario.spawn.name_min = 1000;
        assert!(matches!(scenario.validate(), Err(ScenarioError::Validation(_))));
    }

    #[test]
    fn test_missing_file() {
        let result = ArenaScenario::from_file("does/not/exist.yaml");
        assert!(matches!(result, Err(ScenarioError::FileNotFound(_))));
    }
}
