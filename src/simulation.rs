//! # Simulation モジュール
//!
//! 戦闘アリーナの中核となるシミュレーションエンジンを提供します。
//!
//! 固定時間刻み（Δt）のシングルスレッドループで、全エージェントの状態機械・目標獲得・
//! 攻撃シーケンス・投擲物・撃破の集計を協調させます。ブロッキングな待機は行わず、
//! 「D秒後に再開」する処理はすべて [`Scheduler`] の継続として登録します。
//!
//! ## ティックの処理順序
//!
//! 1. **時刻更新**: 時計を進め、期限を迎えた継続を発火
//! 2. **空間インデックス再構築**: 生存エンティティの位置を登録
//! 3. **プレイヤー処理**: 入力・移動・自動攻撃
//! 4. **エージェント処理**: 目標の再検証 → 獲得 → 状態処理 → 機会攻撃
//! 5. **移動積分**: 移動コラボレータによる位置更新
//! 6. **投擲物処理**: 飛翔と接触判定（撃破）
//! 7. **試合管理**: 制限時間と勝敗
//!
//! 目標の再検証は移動より先、移動は攻撃射程判定より先に行われるため、
//! 同じティック内で無効と判明した目標に対して行動することはありません。
//!
//! ## 使用例
//!
//! ```no_run
//! use arenasim::scenario::ArenaScenario;
//! use arenasim::simulation::{ArenaCollaborators, ArenaSimulation};
//!
//! let scenario = ArenaScenario::from_file("scenarios/arena_basic.yaml")?;
//! let collaborators = ArenaCollaborators::reference(&scenario);
//! let mut engine = ArenaSimulation::new(scenario, collaborators, 1)?;
//! engine.initialize();
//! let summary = engine.run();
//! println!("{}", summary.outcome);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::collaborators::{AnimationRecorder, KinematicMover, NaiveSpatialIndex, StraightLineLauncher};
use crate::models::agent::{Agent, AgentCommand, AgentHandle, AgentRules, AgentTick};
use crate::models::attack::AttackToken;
use crate::models::common::{anim, math_utils, EntityRef, EntityTag, PlayerId, Position3D};
use crate::models::leaderboard::{LeaderboardEntry, ScoreLeaderboard};
use crate::models::name_tag::{NameTag, NameTagHandle};
use crate::models::observer::ObserverRegistry;
use crate::models::player::Player;
use crate::models::pool::EntityPool;
use crate::models::projectile::{Projectile, ProjectileEndReason, ProjectileHandle};
use crate::models::score::{MatchOutcome, MatchState, ScoreManager};
use crate::models::spawner::Spawner;
use crate::models::targeting::{ITargetRegistry, TargetAcquisition, TargetSnapshot, TargetingConfig};
use crate::models::traits::{
    IAnimation, IKillSink, IMovement, IProjectilePhysics, ISpatialQuery, SpatialEntry,
};
use crate::scenario::{ArenaScenario, ScenarioError};
use crate::scheduler::{Scheduler, TimerId};

/// シミュレーション実行エラー
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error("ランタイムの初期化に失敗しました: {0}")]
    Runtime(#[from] std::io::Error),
}

/// 時間指定で再開される処理
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Continuation {
    /// 振りかぶり完了: 投擲物を発射
    HammerRelease { attacker: EntityRef, token: AttackToken },
    /// 投擲後の復帰: 状態機械を再開
    AttackResume { attacker: EntityRef, token: AttackToken },
    /// 死亡演出後のエージェント返却
    ReleaseAgent(AgentHandle),
    /// 飛翔時間経過後の投擲物返却
    ReleaseProjectile(ProjectileHandle),
}

/// 外部コラボレータ一式（未設定のものは副作用をスキップ）
#[derive(Default)]
pub struct ArenaCollaborators {
    pub spatial: Option<Box<dyn ISpatialQuery>>,
    pub movement: Option<Box<dyn IMovement>>,
    pub animation: Option<Box<dyn IAnimation>>,
    pub physics: Option<Box<dyn IProjectilePhysics>>,
}

impl ArenaCollaborators {
    /// インメモリ参照実装一式
    pub fn reference(scenario: &ArenaScenario) -> Self {
        Self {
            spatial: Some(Box::new(NaiveSpatialIndex::new())),
            movement: Some(Box::new(KinematicMover::new(
                scenario.ai.speed,
                scenario.ai.angular_speed_deg,
                scenario.ai.stopping_distance,
            ))),
            animation: Some(Box::new(AnimationRecorder::new())),
            physics: Some(Box::new(StraightLineLauncher::new(scenario.combat.hit_radius))),
        }
    }
}

/// 空間クエリが未設定のときの代替
struct NoSpatial;

impl ISpatialQuery for NoSpatial {
    fn query_radius(&self, _point: Position3D, _radius: f64, _tag: Option<EntityTag>) -> Vec<EntityRef> {
        Vec::new()
    }
}

fn spatial_of(collaborators: &ArenaCollaborators) -> &dyn ISpatialQuery {
    match collaborators.spatial.as_deref() {
        Some(spatial) => spatial,
        None => &NoSpatial,
    }
}

/// プール・スコア集計・試合状態をまとめた実行時コンテキスト
///
/// 生成順はプール → 順位表 → スコア/試合状態 → スポーナーの順で固定です。
pub struct ArenaContext {
    pub agents: EntityPool<AgentHandle, Agent>,
    pub projectiles: EntityPool<ProjectileHandle, Projectile>,
    pub name_tags: EntityPool<NameTagHandle, NameTag>,
    pub players: Vec<Player>,
    pub leaderboard: ScoreLeaderboard,
    pub score: ScoreManager,
    pub match_state: MatchState,
    /// 撃破数 → ネームタグの購読
    pub tag_observers: ObserverRegistry<AgentHandle, NameTagHandle>,
    pub spawner: Spawner,
}

impl ArenaContext {
    pub fn new(scenario: &ArenaScenario) -> Self {
        let kinds = scenario.ai.kinds.clone();
        let per_kind = scenario.pools.agents_per_kind;
        let agents = EntityPool::new(
            "agents",
            kinds.len() * per_kind,
            scenario.pools.agent_policy,
            move |slot| Agent::new(kinds[(slot / per_kind) % kinds.len()].clone(), slot),
        );
        let projectiles = EntityPool::new(
            "projectiles",
            scenario.pools.projectile_capacity,
            scenario.pools.projectile_policy,
            |_| Projectile::default(),
        );
        let name_tags = EntityPool::new(
            "name_tags",
            scenario.pools.name_tag_capacity,
            scenario.pools.name_tag_policy,
            |_| NameTag::default(),
        );

        let leaderboard = ScoreLeaderboard::new(scenario.leaderboard.max_entries);
        let score = ScoreManager::new();
        let match_state = MatchState::new(scenario.players.len() as u32, scenario.match_rules.duration_s);
        let spawner = Spawner::new(
            scenario.spawn.min_spawn_distance,
            scenario.spawn.max_spawn_attempts,
            scenario.spawn.name_min..=scenario.spawn.name_max,
        );

        Self {
            agents,
            projectiles,
            name_tags,
            players: Vec::new(),
            leaderboard,
            score,
            match_state,
            tag_observers: ObserverRegistry::new(),
            spawner,
        }
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.players.iter().find(|player| player.id == id)
    }

    pub fn player_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|player| player.id == id)
    }
}

impl ITargetRegistry for ArenaContext {
    fn snapshot(&self, entity: EntityRef) -> Option<TargetSnapshot> {
        match entity {
            EntityRef::Agent(handle) => self.agents.get(handle).map(|agent| TargetSnapshot {
                entity,
                tag: agent.tag,
                position: agent.position,
                alive: !agent.is_dead(),
            }),
            EntityRef::Player(id) => self.player(id).map(|player| TargetSnapshot {
                entity,
                tag: EntityTag::Player,
                position: player.position,
                alive: !player.is_dead(),
            }),
        }
    }
}

/// 実行結果の要約
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub duration: f64,
    pub steps: u64,
    pub outcome: MatchOutcome,
    pub alive: u32,
    pub ai_dead: u32,
    pub player_score: i64,
    pub leaderboard: Vec<LeaderboardEntry>,
}

pub struct ArenaSimulation {
    pub current_time: f64,
    pub dt: f64,
    pub max_time: f64,
    pub seed: u64,
    pub step_count: u64,

    ctx: ArenaContext,
    collaborators: ArenaCollaborators,
    scheduler: Scheduler<Continuation>,
    targeting: TargetAcquisition,
    rules: AgentRules,
    rng: ChaCha8Rng,

    pub scenario: ArenaScenario,
    pub verbose_level: u8,
}

impl ArenaSimulation {
    pub fn new(
        scenario: ArenaScenario,
        collaborators: ArenaCollaborators,
        verbose_level: u8,
    ) -> Result<Self, SimulationError> {
        scenario.validate()?;

        let targeting = TargetAcquisition::new(TargetingConfig {
            detection_range: scenario.ai.detection_range,
            attack_range: scenario.ai.attack_range,
            max_distance: scenario.ai.max_distance,
            switch_cooldown: scenario.ai.target_switch_cooldown_s,
        });
        let rules = AgentRules {
            attack_range: scenario.ai.attack_range,
            death_release_delay: scenario.combat.death_release_delay(),
            kill_scale_amount: scenario.scaling.kill_scale_amount,
            scale_step: scenario.scaling.scale_step,
            scale_amount: scenario.scaling.scale_amount,
        };

        Ok(Self {
            current_time: 0.0,
            dt: scenario.sim.dt_s,
            max_time: scenario.sim.t_max_s,
            seed: scenario.sim.seed,
            step_count: 0,
            ctx: ArenaContext::new(&scenario),
            collaborators,
            scheduler: Scheduler::new(),
            targeting,
            rules,
            rng: ChaCha8Rng::seed_from_u64(scenario.sim.seed),
            scenario,
            verbose_level,
        })
    }

    /// プレイヤーを配置し、自動スポーンが有効なら最初のウェーブを出現させる
    pub fn initialize(&mut self) {
        if self.verbose_level > 0 {
            info!("シミュレーションエンジンを初期化中...");
        }

        for (index, config) in self.scenario.players.iter().enumerate() {
            let mut player = Player::new(
                PlayerId(index as u32),
                config.name.clone(),
                Position3D::new(config.x, config.y, 0.0),
                config.max_health,
                config.move_speed,
            );
            player.score_subscription = Some(self.ctx.score.subscribe(player.id));
            self.ctx.leaderboard.update_score(&player.name, 0);
            self.ctx.players.push(player);
        }

        let spawned = if self.scenario.spawn.auto_spawn { self.spawn_wave() } else { 0 };

        if self.verbose_level > 0 {
            info!("初期化完了:");
            info!("  プレイヤー: {}人", self.ctx.players.len());
            info!("  エージェント: {}体 (容量 {})", spawned, self.ctx.agents.capacity());
            info!("  投擲物プール: {}個", self.ctx.projectiles.capacity());
        }
    }

    pub fn context(&self) -> &ArenaContext {
        &self.ctx
    }

    pub fn agent(&self, handle: AgentHandle) -> Option<&Agent> {
        self.ctx.agents.get(handle)
    }

    pub fn player(&self, id: PlayerId) -> Option<&Player> {
        self.ctx.player(id)
    }

    pub fn now(&self) -> f64 {
        self.scheduler.now()
    }

    pub fn pending_continuations(&self) -> usize {
        self.scheduler.pending_count()
    }

    pub fn is_finished(&self) -> bool {
        self.current_time >= self.max_time
            || (self.scenario.sim.stop_on_outcome && self.ctx.match_state.is_over())
    }

    // ------------------------------------------------------------------
    // スポーンと返却
    // ------------------------------------------------------------------

    /// 全スポーン領域にウェーブを出現させ、出現数を返す
    pub fn spawn_wave(&mut self) -> usize {
        self.ctx.spawner.reset_positions();
        let areas = self.scenario.spawn.areas.clone();
        let mut spawned = 0;

        for area in &areas {
            for _ in 0..self.scenario.spawn.agents_per_area {
                let Some(kind) = self
                    .ctx
                    .spawner
                    .pick_kind(&self.scenario.ai.kinds, &mut self.rng)
                    .map(str::to_string)
                else {
                    continue;
                };
                let position = self.ctx.spawner.next_spawn_point(area, &mut self.rng);
                if self.spawn_agent(&kind, position).is_some() {
                    spawned += 1;
                }
            }
        }

        info!(spawned, areas = areas.len(), "WAVE_SPAWNED: ウェーブを出現させました");
        spawned
    }

    /// 指定種別のエージェントを1体出現させる
    ///
    /// 拡張可能なプールでは要求された種別のインスタンスを追加します。
    /// 固定容量のプールが枯渇している場合は `None`（スポーンをスキップ）。
    pub fn spawn_agent(&mut self, kind: &str, position: Position3D) -> Option<AgentHandle> {
        let handle = self
            .ctx
            .agents
            .acquire_matching_or_insert(|agent| agent.kind == kind, |slot| Agent::new(kind, slot))?;
        let name = self.ctx.spawner.next_name(&mut self.rng);

        let tag = self.ctx.name_tags.acquire();
        if let Some(tag) = tag.and_then(|tag| self.ctx.name_tags.get_mut(tag)) {
            tag.set_name(name.clone());
            tag.set_score(0);
        }
        let subscription = tag.and_then(|tag| self.ctx.tag_observers.subscribe(handle, tag));

        let agent = self.ctx.agents.get_mut(handle)?;
        agent.position = position;
        agent.name = name.clone();
        agent.name_tag = tag;
        agent.tag_subscription = subscription;

        let who = EntityRef::Agent(handle);
        if let Some(movement) = self.collaborators.movement.as_mut() {
            movement.set_enabled(who, true);
        }
        self.ctx.match_state.register_agent();

        info!(
            agent = %name,
            kind,
            x = position.x,
            y = position.y,
            "AGENT_SPAWNED: エージェントが出現しました"
        );
        Some(handle)
    }

    /// エージェントをプールへ返却
    ///
    /// ネームタグの購読解除 → タグの返却 → アニメーション・移動のリセット →
    /// プール返却の順で行います。古いハンドルに対しては何もしません。
    pub fn release_agent(&mut self, handle: AgentHandle) -> bool {
        let Some(agent) = self.ctx.agents.get(handle) else {
            trace!(handle = ?handle, "AGENT_RELEASE_STALE");
            return false;
        };
        let (tag, subscription, name) = (agent.name_tag, agent.tag_subscription, agent.name.clone());

        if let Some(subscription) = subscription {
            self.ctx.tag_observers.unsubscribe(handle, subscription);
        }
        if let Some(tag) = tag {
            self.ctx.name_tags.release(tag);
        }

        let who = EntityRef::Agent(handle);
        if let Some(animation) = self.collaborators.animation.as_mut() {
            animation.rebind(who);
        }
        if let Some(movement) = self.collaborators.movement.as_mut() {
            movement.forget(who);
        }

        let released = self.ctx.agents.release(handle);
        debug!(agent = %name, "AGENT_RELEASED: エージェントをプールへ返却しました");
        released
    }

    fn release_projectile(&mut self, handle: ProjectileHandle, reason: ProjectileEndReason) {
        let Some(projectile) = self.ctx.projectiles.get_mut(handle) else {
            return;
        };
        projectile.end_reason = Some(reason);
        if let Some(physics) = self.collaborators.physics.as_mut() {
            physics.cancel(handle);
        }
        self.ctx.projectiles.release(handle);
        trace!(handle = ?handle, reason = ?reason, "PROJECTILE_RETURNED");
    }

    // ------------------------------------------------------------------
    // 攻撃
    // ------------------------------------------------------------------

    /// 攻撃シーケンスを開始（攻撃中・死亡中は無視）
    fn begin_attack(&mut self, attacker: EntityRef, aim: Position3D) {
        let now = self.scheduler.now();
        let (token, name) = match attacker {
            EntityRef::Agent(handle) => {
                let Some(agent) = self.ctx.agents.get_mut(handle) else {
                    return;
                };
                if agent.is_dead() {
                    return;
                }
                let Some(token) = agent.attack.begin(aim, now) else {
                    return;
                };
                agent.face_towards(aim);
                (token, agent.name.clone())
            }
            EntityRef::Player(id) => {
                let Some(player) = self.ctx.player_mut(id) else {
                    return;
                };
                if player.is_dead() {
                    return;
                }
                let Some(token) = player.attack.begin(aim, now) else {
                    return;
                };
                (token, player.name.clone())
            }
        };

        if let Some(animation) = self.collaborators.animation.as_mut() {
            animation.trigger(attacker, anim::ATTACK);
        }

        let timer = self.scheduler.schedule_after(
            self.scenario.combat.hammer_delay_s,
            Continuation::HammerRelease { attacker, token },
        );
        self.set_pending_timer(attacker, timer);

        debug!(attacker = %name, aim_x = aim.x, aim_y = aim.y, "ATTACK_BEGIN");
    }

    fn set_pending_timer(&mut self, attacker: EntityRef, timer: TimerId) {
        match attacker {
            EntityRef::Agent(handle) => {
                if let Some(agent) = self.ctx.agents.get_mut(handle) {
                    agent.attack.set_pending_timer(timer);
                }
            }
            EntityRef::Player(id) => {
                if let Some(player) = self.ctx.player_mut(id) {
                    player.attack.set_pending_timer(timer);
                }
            }
        }
    }

    /// プレイヤーに指定位置への攻撃を要求
    pub fn player_attack_at(&mut self, id: PlayerId, aim: Position3D) {
        self.begin_attack(EntityRef::Player(id), aim);
    }

    /// プレイヤーの移動入力を設定
    pub fn set_player_input(&mut self, id: PlayerId, direction: Position3D) {
        if let Some(player) = self.ctx.player_mut(id) {
            player.set_input(direction);
        }
    }

    fn on_hammer_release(&mut self, attacker: EntityRef, token: AttackToken) {
        let (origin, aim, recovery) = match attacker {
            EntityRef::Agent(handle) => {
                let Some(agent) = self.ctx.agents.get_mut(handle) else {
                    return;
                };
                if agent.is_dead() {
                    return;
                }
                let Some(aim) = agent.attack.on_hammer_due(token) else {
                    return;
                };
                (agent.position, aim, self.scenario.combat.attack_recovery_s)
            }
            EntityRef::Player(id) => {
                let Some(player) = self.ctx.player_mut(id) else {
                    return;
                };
                if player.is_dead() {
                    return;
                }
                let Some(aim) = player.attack.on_hammer_due(token) else {
                    return;
                };
                (player.position, aim, self.scenario.combat.player_attack_recovery_s)
            }
        };

        self.launch_projectile(attacker, origin, aim);

        let timer = self
            .scheduler
            .schedule_after(recovery, Continuation::AttackResume { attacker, token });
        self.set_pending_timer(attacker, timer);
    }

    /// 投擲物をプールから取り出して発射
    ///
    /// プール枯渇時は発射をスキップします。
    fn launch_projectile(&mut self, owner: EntityRef, origin: Position3D, aim: Position3D) -> Option<ProjectileHandle> {
        let handle = self.ctx.projectiles.acquire()?;
        let now = self.scheduler.now();
        let speed = self.scenario.combat.hammer_speed;

        let flight_time = match self.collaborators.physics.as_mut() {
            Some(physics) => physics.launch(handle, origin, aim, speed),
            None => {
                trace!("COLLABORATOR_MISSING: physics");
                origin.distance_3d(&aim) / speed
            }
        };

        if let Some(projectile) = self.ctx.projectiles.get_mut(handle) {
            projectile.arm(Some(owner), origin, aim, speed, now);
            projectile.flight_time = flight_time;
        }

        self.scheduler.schedule_after(
            flight_time + self.scenario.combat.hammer_return_buffer_s,
            Continuation::ReleaseProjectile(handle),
        );
        Some(handle)
    }

    fn on_attack_resume(&mut self, attacker: EntityRef, token: AttackToken) {
        match attacker {
            EntityRef::Agent(handle) => {
                let target_position = self.held_target_position(handle);
                let Some(agent) = self.ctx.agents.get_mut(handle) else {
                    return;
                };
                if agent.is_dead() || !agent.attack.on_resume_due(token) {
                    return;
                }
                let mut commands = Vec::new();
                agent.finish_attack(target_position, &self.rules, &mut commands);
                self.apply_agent_commands(handle, commands);
            }
            EntityRef::Player(id) => {
                if let Some(player) = self.ctx.player_mut(id) {
                    player.attack.on_resume_due(token);
                }
            }
        }
    }

    /// 保持中の目標の現在位置（無効な目標は None）
    fn held_target_position(&self, handle: AgentHandle) -> Option<Position3D> {
        let agent = self.ctx.agents.get(handle)?;
        let target = agent.target?;
        self.ctx
            .snapshot(target)
            .filter(|snapshot| snapshot.alive)
            .map(|snapshot| snapshot.position)
    }

    // ------------------------------------------------------------------
    // 撃破
    // ------------------------------------------------------------------

    /// エージェントへの致命的な被弾（死亡済み・返却済みなら何もしない）
    pub fn kill_agent(&mut self, handle: AgentHandle, killer: Option<EntityRef>) -> bool {
        let Some(agent) = self.ctx.agents.get_mut(handle) else {
            return false;
        };
        let mut commands = Vec::new();
        if !agent.die(killer, &self.rules, &mut commands) {
            return false;
        }
        self.apply_agent_commands(handle, commands);
        true
    }

    fn damage_player(&mut self, id: PlayerId, amount: u32) {
        let Some(player) = self.ctx.player_mut(id) else {
            return;
        };
        let timer = if player.health() <= amount { player.attack.cancel() } else { None };
        if !player.take_damage(amount) {
            return;
        }
        let subscription = player.score_subscription.take();
        if let Some(subscription) = subscription {
            self.ctx.score.unsubscribe(subscription);
        }
        if let Some(timer) = timer {
            self.scheduler.cancel(timer);
        }
        if let Some(animation) = self.collaborators.animation.as_mut() {
            animation.set_flag(EntityRef::Player(id), anim::DEATH, true);
        }
        self.ctx.match_state.record_player_death();
    }

    // ------------------------------------------------------------------
    // コマンド適用
    // ------------------------------------------------------------------

    fn apply_agent_commands(&mut self, handle: AgentHandle, commands: Vec<AgentCommand>) {
        let who = EntityRef::Agent(handle);
        for command in commands {
            match command {
                AgentCommand::SetDestination(point) => match self.collaborators.movement.as_mut() {
                    Some(movement) => movement.set_destination(who, point),
                    None => trace!("COLLABORATOR_MISSING: movement"),
                },
                AgentCommand::ResetPath => {
                    if let Some(movement) = self.collaborators.movement.as_mut() {
                        movement.reset_path(who);
                    }
                }
                AgentCommand::SetMovementEnabled(enabled) => {
                    if let Some(movement) = self.collaborators.movement.as_mut() {
                        movement.set_enabled(who, enabled);
                    }
                }
                AgentCommand::SetAnimFlag(name, value) => match self.collaborators.animation.as_mut() {
                    Some(animation) => animation.set_flag(who, name, value),
                    None => trace!(flag = name, "COLLABORATOR_MISSING: animation"),
                },
                AgentCommand::BeginAttack { aim } => self.begin_attack(who, aim),
                AgentCommand::CancelTimer(timer) => {
                    self.scheduler.cancel(timer);
                }
                AgentCommand::NotifyKilled { killer } => self.on_entity_killed(who, killer),
                AgentCommand::ScheduleRelease { delay } => {
                    self.scheduler.schedule_after(delay, Continuation::ReleaseAgent(handle));
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // ティック
    // ------------------------------------------------------------------

    pub fn run(&mut self) -> RunSummary {
        info!("=== シミュレーション実行開始 ===");

        while !self.is_finished() {
            self.tick();

            if self.verbose_level > 2 {
                trace!("時刻: {:.2}秒 (ステップ: {})", self.current_time, self.step_count);
            }

            if self.step_count % 100 == 0 && self.verbose_level > 0 {
                let progress = (self.current_time / self.max_time) * 100.0;
                info!(
                    "進行状況: {:.1}% ({:.1}/{:.1}秒) 生存: {}",
                    progress,
                    self.current_time,
                    self.max_time,
                    self.ctx.match_state.total_alive()
                );
            }
        }

        let summary = self.summary();
        info!("=== シミュレーション完了 ===");
        info!("実行時間: {:.1}秒", summary.duration);
        info!("総ステップ数: {}", summary.steps);
        info!("結果: {}", summary.outcome);
        summary
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            duration: self.current_time,
            steps: self.step_count,
            outcome: self.ctx.match_state.outcome(),
            alive: self.ctx.match_state.total_alive(),
            ai_dead: self.ctx.match_state.ai_dead_count(),
            player_score: self.ctx.score.score(),
            leaderboard: self.ctx.leaderboard.get_top(),
        }
    }

    /// 1ティック進める
    pub fn tick(&mut self) {
        let dt = self.dt;
        self.step_count += 1;
        self.current_time = self.step_count as f64 * dt;

        self.scheduler.advance_to(self.current_time);
        self.fire_due_continuations();
        self.rebuild_spatial_index();
        self.apply_scripted_inputs();
        self.process_players(dt);
        self.process_agents(dt);
        self.integrate_movement(dt);
        self.process_projectiles(dt);
        if !self.ctx.match_state.is_over() {
            self.ctx.match_state.tick_countdown(dt);
        }
    }

    fn fire_due_continuations(&mut self) {
        while let Some((_, continuation)) = self.scheduler.pop_due() {
            match continuation {
                Continuation::HammerRelease { attacker, token } => self.on_hammer_release(attacker, token),
                Continuation::AttackResume { attacker, token } => self.on_attack_resume(attacker, token),
                Continuation::ReleaseAgent(handle) => {
                    self.release_agent(handle);
                }
                Continuation::ReleaseProjectile(handle) => {
                    self.release_projectile(handle, ProjectileEndReason::Expired);
                }
            }
        }
    }

    fn rebuild_spatial_index(&mut self) {
        let Some(spatial) = self.collaborators.spatial.as_mut() else {
            return;
        };

        let mut entries: Vec<SpatialEntry> = self
            .ctx
            .players
            .iter()
            .filter(|player| !player.is_dead())
            .map(|player| SpatialEntry {
                entity: EntityRef::Player(player.id),
                position: player.position,
                tag: EntityTag::Player,
            })
            .collect();
        entries.extend(
            self.ctx
                .agents
                .iter_active()
                .filter(|(_, agent)| agent.collision_enabled)
                .map(|(handle, agent)| SpatialEntry {
                    entity: EntityRef::Agent(handle),
                    position: agent.position,
                    tag: agent.tag,
                }),
        );
        spatial.rebuild(&entries);
    }

    fn apply_scripted_inputs(&mut self) {
        let now = self.current_time;
        for (index, config) in self.scenario.players.iter().enumerate() {
            let Some(key) = config.inputs.iter().rev().find(|key| key.at_s <= now) else {
                continue;
            };
            if let Some(player) = self.ctx.players.get_mut(index) {
                player.set_input(Position3D::new(key.x, key.y, 0.0));
            }
        }
    }

    fn process_players(&mut self, dt: f64) {
        for index in 0..self.ctx.players.len() {
            let player = &mut self.ctx.players[index];
            if player.is_dead() {
                continue;
            }
            let who = EntityRef::Player(player.id);
            let step = player.step_movement(dt);
            let (position, attacking) = (player.position, player.attack.is_attacking());

            if let Some(timer) = step.cancelled_timer {
                self.scheduler.cancel(timer);
            }
            if let Some(animation) = self.collaborators.animation.as_mut() {
                if step.cancelled_attack {
                    animation.set_flag(who, anim::ATTACK, false);
                }
                if step.moving {
                    animation.set_flag(who, anim::RUNNING, true);
                } else if step.stopped_now {
                    animation.set_flag(who, anim::RUNNING, false);
                }
            }

            if step.moving || attacking {
                continue;
            }

            let detect_range = self
                .scenario
                .players
                .get(index)
                .map_or(0.0, |config| config.detect_range);
            let Some(nearest) = self.nearest_ai(position, detect_range) else {
                continue;
            };
            let attack_angle = self.scenario.ai.attack_angle_deg;
            self.ctx.players[index].aim_at(nearest.position, attack_angle);
            self.begin_attack(who, nearest.position);
        }
    }

    fn nearest_ai(&self, position: Position3D, radius: f64) -> Option<TargetSnapshot> {
        if radius <= 0.0 {
            return None;
        }
        spatial_of(&self.collaborators)
            .query_radius(position, radius, Some(EntityTag::Ai))
            .into_iter()
            .filter_map(|entity| self.ctx.snapshot(entity))
            .filter(|snapshot| snapshot.alive && snapshot.tag == EntityTag::Ai)
            .min_by(|a, b| {
                position
                    .distance_sq(&a.position)
                    .total_cmp(&position.distance_sq(&b.position))
            })
    }

    fn process_agents(&mut self, dt: f64) {
        for handle in self.ctx.agents.active_handles() {
            let who = EntityRef::Agent(handle);
            let Some(agent) = self.ctx.agents.get(handle) else {
                continue;
            };
            if agent.is_dead() {
                continue;
            }
            let (position, current, timer) = (agent.position, agent.target, agent.target_switch_timer + dt);

            let decision = self.targeting.plan(
                spatial_of(&self.collaborators),
                &self.ctx,
                position,
                who,
                current,
                timer,
                &mut self.rng,
            );
            let (steering, angular_speed) = match self.collaborators.movement.as_deref() {
                Some(movement) => (
                    movement
                        .is_grounded(who)
                        .then(|| movement.steering_heading(who, position))
                        .flatten(),
                    movement.angular_speed_deg(who),
                ),
                None => (None, self.scenario.ai.angular_speed_deg),
            };

            let mut commands = Vec::new();
            if let Some(agent) = self.ctx.agents.get_mut(handle) {
                agent.advance_switch_timer(dt);
                agent.apply_target(&decision);
                let tick = AgentTick {
                    target_position: decision.target.map(|snapshot| snapshot.position),
                    steering,
                    angular_speed_deg: angular_speed,
                    dt,
                };
                agent.process_state(&tick, &self.rules, &mut commands);
            }
            self.apply_agent_commands(handle, commands);

            if self.scenario.ai.opportunistic_attacks {
                self.opportunistic_attack(handle);
            }
        }
    }

    /// 前方コーン内のAIへの機会攻撃
    fn opportunistic_attack(&mut self, handle: AgentHandle) {
        let Some(agent) = self.ctx.agents.get(handle) else {
            return;
        };
        if agent.is_dead() || agent.attack.is_attacking() {
            return;
        }
        if self.scheduler.now() - agent.attack.last_attack_time < self.scenario.ai.attack_cooldown_s {
            return;
        }

        let (position, forward) = (agent.position, agent.forward());
        let who = EntityRef::Agent(handle);
        let half_angle = self.scenario.ai.attack_angle_deg / 2.0;
        let aim = spatial_of(&self.collaborators)
            .query_radius(position, self.scenario.ai.attack_range * 2.0, Some(EntityTag::Ai))
            .into_iter()
            .filter(|entity| *entity != who)
            .filter_map(|entity| self.ctx.snapshot(entity))
            .filter(|snapshot| snapshot.alive)
            .find(|snapshot| {
                math_utils::angle_between(&forward, &(snapshot.position - position).flat()) < half_angle
            })
            .map(|snapshot| snapshot.position);

        if let Some(aim) = aim {
            trace!(agent = ?handle, "OPPORTUNISTIC_ATTACK");
            self.begin_attack(who, aim);
        }
    }

    fn integrate_movement(&mut self, dt: f64) {
        let Some(movement) = self.collaborators.movement.as_mut() else {
            return;
        };
        for handle in self.ctx.agents.active_handles() {
            let Some(agent) = self.ctx.agents.get_mut(handle) else {
                continue;
            };
            if agent.is_dead() || !agent.movement_enabled {
                continue;
            }
            agent.position = movement.integrate(EntityRef::Agent(handle), agent.position, dt);
        }
    }

    fn process_projectiles(&mut self, dt: f64) {
        let hits = match (self.collaborators.physics.as_mut(), self.collaborators.spatial.as_deref()) {
            (Some(physics), Some(spatial)) => physics.step(dt, spatial),
            (Some(physics), None) => physics.step(dt, &NoSpatial),
            (None, _) => return,
        };

        for hit in hits {
            let Some(projectile) = self.ctx.projectiles.get(hit.projectile) else {
                continue;
            };
            if projectile.is_owned_by(hit.victim) {
                continue;
            }
            let owner = projectile.owner;

            match hit.victim {
                EntityRef::Agent(victim) => {
                    let Some(agent) = self.ctx.agents.get(victim) else {
                        continue;
                    };
                    if !agent.collision_enabled {
                        continue;
                    }
                    self.kill_agent(victim, owner);
                }
                EntityRef::Player(id) => {
                    if self.ctx.player(id).is_none_or(|player| player.is_dead()) {
                        continue;
                    }
                    self.damage_player(id, 1);
                }
            }
            self.release_projectile(hit.projectile, ProjectileEndReason::Hit);
        }
    }
}

impl IKillSink for ArenaSimulation {
    /// 撃破者のタグに応じてスコアを帰属させる
    fn on_entity_killed(&mut self, victim: EntityRef, killer: Option<EntityRef>) {
        if victim.as_agent().is_some() {
            self.ctx.match_state.record_agent_death();
        }

        match killer {
            Some(EntityRef::Player(id)) => {
                let Some(name) = self.ctx.player(id).map(|player| player.name.clone()) else {
                    return;
                };
                let score = self.ctx.score.add_score(1);
                let step = i64::from(self.scenario.scaling.scale_step);
                let amount = self.scenario.scaling.scale_amount;
                for listener in self.ctx.score.listeners() {
                    if let Some(player) = self.ctx.player_mut(listener) {
                        player.on_score_changed(score, step, amount);
                    }
                }
                self.ctx.leaderboard.update_score(&name, 1);
                info!(killer = %name, score, "KILL_CREDITED: プレイヤーの撃破を記録しました");
            }
            Some(EntityRef::Agent(handle)) => {
                let Some(agent) = self.ctx.agents.get_mut(handle) else {
                    return;
                };
                let kills = agent.increase_kill(&self.rules);
                let name = agent.name.clone();

                for tag in self.ctx.tag_observers.listeners(handle) {
                    if let Some(tag) = self.ctx.name_tags.get_mut(tag) {
                        tag.set_score(kills);
                    }
                }
                self.ctx.leaderboard.update_score(&name, 1);
                info!(killer = %name, kills, "KILL_CREDITED: エージェントの撃破を記録しました");
            }
            None => {
                debug!(victim = ?victim, "KILL_UNATTRIBUTED");
            }
        }
    }
}

impl std::fmt::Debug for ArenaSimulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArenaSimulation")
            .field("current_time", &self.current_time)
            .field("step_count", &self.step_count)
            .field("agents", &self.ctx.agents)
            .field("projectiles", &self.ctx.projectiles)
            .field("pending", &self.scheduler.pending_count())
            .finish()
    }
}

/// プール返却・継続・拡張の整合性の確認
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::pool::GrowthPolicy;

    fn scenario() -> ArenaScenario {
        let mut scenario = ArenaScenario::default();
        scenario.ai.kinds = vec!["Warrior".to_string()];
        scenario.pools.agents_per_kind = 1;
        scenario.spawn.auto_spawn = false;
        scenario.players.clear();
        scenario
    }

    #[test]
    fn test_stale_release_continuation_is_ignored() {
        let mut sim = ArenaSimulation::new(scenario(), ArenaCollaborators::default(), 0).unwrap();
        sim.initialize();

        let old = sim.spawn_agent("Warrior", Position3D::ZERO).unwrap();
        let slot = sim.agent(old).unwrap().slot;
        assert!(sim.kill_agent(old, None));
        assert!(sim.release_agent(old));

        let new = sim.spawn_agent("Warrior", Position3D::ZERO).unwrap();
        assert_ne!(old, new);
        assert_eq!(sim.agent(new).unwrap().slot, slot);

        // 死亡時に予約された返却が発火しても新しい個体は残る
        for _ in 0..60 {
            sim.tick();
        }
        assert!(sim.context().agents.is_active(new));
        assert!(!sim.agent(new).unwrap().is_dead());
    }

    #[test]
    fn test_missing_collaborators_do_not_fail_tick() {
        let mut sim = ArenaSimulation::new(scenario(), ArenaCollaborators::default(), 0).unwrap();
        sim.initialize();
        let handle = sim.spawn_agent("Warrior", Position3D::ZERO).unwrap();
        for _ in 0..10 {
            sim.tick();
        }
        assert!(sim.context().agents.is_active(handle));
        assert_eq!(sim.context().match_state.total_alive(), 1);
    }

    #[test]
    fn test_released_agent_returns_to_defaults() {
        let mut scenario = scenario();
        scenario.pools.agents_per_kind = 2;
        let mut sim = ArenaSimulation::new(scenario, ArenaCollaborators::default(), 0).unwrap();
        sim.initialize();

        let killer = sim.spawn_agent("Warrior", Position3D::new(5.0, 0.0, 0.0)).unwrap();
        let victim = sim.spawn_agent("Warrior", Position3D::ZERO).unwrap();
        assert!(sim.kill_agent(victim, Some(EntityRef::Agent(killer))));
        assert_eq!(sim.agent(killer).unwrap().kill_count(), 1);

        let slot = sim.agent(killer).unwrap().slot;
        assert!(sim.kill_agent(killer, None));
        assert!(sim.release_agent(killer));

        let released = sim
            .context()
            .agents
            .idle()
            .find(|agent| agent.slot == slot)
            .unwrap();
        assert_eq!(released.kill_count(), 0);
        assert_eq!(released.scale, 1.0);
        assert_eq!(released.tag, EntityTag::Ai);
        assert_eq!(released.state(), crate::models::common::AgentState::Idle);
        assert_eq!(released.position, Position3D::ZERO);
        assert!(released.collision_enabled);
        assert!(released.movement_enabled);
        assert!(released.name.is_empty());
        assert!(released.name_tag.is_none());
        assert!(released.killed_by.is_none());
        assert_eq!(sim.context().tag_observers.subscription_count(), 0);
    }

    #[test]
    fn test_score_listeners_scale_living_players_only() {
        let mut scenario = scenario();
        scenario.pools.agents_per_kind = 2;
        scenario.scaling.scale_step = 1;
        scenario.scaling.scale_amount = 0.1;
        scenario.players = vec![crate::scenario::PlayerConfig::default()];
        let mut sim = ArenaSimulation::new(scenario, ArenaCollaborators::default(), 0).unwrap();
        sim.initialize();
        let player = EntityRef::Player(PlayerId(0));

        let first = sim.spawn_agent("Warrior", Position3D::new(30.0, 0.0, 0.0)).unwrap();
        assert!(sim.kill_agent(first, Some(player)));
        assert_eq!(sim.context().score.score(), 1);
        assert!((sim.player(PlayerId(0)).unwrap().scale - 1.1).abs() < 1e-9);

        let max_health = sim.player(PlayerId(0)).unwrap().max_health();
        sim.damage_player(PlayerId(0), max_health);
        assert!(sim.context().score.listeners().is_empty());

        // 死亡後に着弾した撃破はスコアにのみ加算される
        let second = sim.spawn_agent("Warrior", Position3D::new(-30.0, 0.0, 0.0)).unwrap();
        assert!(sim.kill_agent(second, Some(player)));
        assert_eq!(sim.context().score.score(), 2);
        assert!((sim.player(PlayerId(0)).unwrap().scale - 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_growable_agent_pool_adds_requested_kind() {
        let mut scenario = scenario();
        scenario.ai.kinds = vec!["Warrior".to_string(), "Berserker".to_string()];
        scenario.pools.agent_policy = GrowthPolicy::Grow;
        let mut sim = ArenaSimulation::new(scenario, ArenaCollaborators::default(), 0).unwrap();
        sim.initialize();

        let first = sim.spawn_agent("Berserker", Position3D::ZERO).unwrap();
        let second = sim.spawn_agent("Berserker", Position3D::new(20.0, 0.0, 0.0)).unwrap();
        assert_ne!(first, second);
        assert_eq!(sim.agent(second).unwrap().kind, "Berserker");
        assert_eq!(sim.context().agents.capacity(), 3);

        // 初期在庫の Warrior はそのまま払い出せる
        let warrior = sim.spawn_agent("Warrior", Position3D::new(-20.0, 0.0, 0.0)).unwrap();
        assert_eq!(sim.agent(warrior).unwrap().kind, "Warrior");
        assert_eq!(sim.context().agents.capacity(), 3);
    }
}
