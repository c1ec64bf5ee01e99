//! # Agent モジュール
//!
//! 自律戦闘エージェントと、その行動状態機械（Idle / Move / Attack / Dead）を定義します。
//!
//! 状態機械は外部状態に直接触れず、副作用を [`AgentCommand`] として出力します。
//! シミュレーションがそれを移動・アニメーション等のコラボレータへ適用するため、
//! コラボレータが存在しない場合は該当する副作用だけがスキップされます。
//!
//! ## 状態遷移
//!
//! - Idle → Move: 有効な目標がある
//! - Move → Attack: 目標との距離の二乗が攻撃射程の二乗以下
//! - Move → Idle: 目標を失い、代替も見つからない
//! - Attack → Move / Idle: 攻撃シーケンス完了時に距離を再判定
//! - 任意 → Dead: 致命的な被弾（2回目以降は無視）
//!
//! `Dead` は終端状態で、プールへの返却と再取得でのみ `Idle` に戻ります。

use slotmap::new_key_type;
use tracing::{debug, info};

use crate::models::attack::AttackResolver;
use crate::models::common::{anim, math_utils, AgentState, EntityRef, EntityTag, Position3D};
use crate::models::name_tag::NameTagHandle;
use crate::models::observer::SubscriptionId;
use crate::models::targeting::TargetDecision;
use crate::models::traits::IPoolable;
use crate::scheduler::TimerId;

new_key_type! {
    /// エージェントプールのハンドル
    pub struct AgentHandle;
}

/// 状態機械が出力する副作用
#[derive(Debug, Clone, PartialEq)]
pub enum AgentCommand {
    SetDestination(Position3D),
    ResetPath,
    SetMovementEnabled(bool),
    SetAnimFlag(&'static str, bool),
    /// 攻撃シーケンスの開始要求
    BeginAttack { aim: Position3D },
    /// 進行中の攻撃ステップのタイマー取り消し
    CancelTimer(TimerId),
    /// 撃破通知
    NotifyKilled { killer: Option<EntityRef> },
    /// 死亡演出後のプール返却予約
    ScheduleRelease { delay: f64 },
}

/// エージェントの行動パラメータ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentRules {
    pub attack_range: f64,
    /// 死亡からプール返却までの遅延（死亡アニメーション＋バッファ）
    pub death_release_delay: f64,
    /// 撃破1回ごとのスケール増加量
    pub kill_scale_amount: f64,
    /// 段階スケーリングの撃破数間隔
    pub scale_step: u32,
    /// 段階スケーリングの増加量
    pub scale_amount: f64,
}

/// 1ティック分の状態処理の入力
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentTick {
    /// 再検証済みの目標位置（目標なしは None）
    pub target_position: Option<Position3D>,
    /// 移動コラボレータのステアリング方向
    pub steering: Option<Position3D>,
    pub angular_speed_deg: f64,
    pub dt: f64,
}

/// 自律戦闘エージェント
#[derive(Debug, Clone)]
pub struct Agent {
    /// プレハブ種別（プールはこの種別で払い出す）
    pub kind: String,
    /// プール内の通し番号（生成順）
    pub slot: usize,
    pub name: String,
    pub position: Position3D,
    pub yaw_deg: f64,
    pub scale: f64,
    pub tag: EntityTag,
    state: AgentState,
    pub target: Option<EntityRef>,
    pub target_switch_timer: f64,
    kill_count: u32,
    last_scale_kill_count: u32,
    pub killed_by: Option<EntityRef>,
    pub name_tag: Option<NameTagHandle>,
    pub tag_subscription: Option<SubscriptionId>,
    pub collision_enabled: bool,
    pub movement_enabled: bool,
    pub audio_listener_enabled: bool,
    pub attack: AttackResolver,
}

impl Agent {
    pub fn new(kind: impl Into<String>, slot: usize) -> Self {
        Self {
            kind: kind.into(),
            slot,
            name: String::new(),
            position: Position3D::ZERO,
            yaw_deg: 0.0,
            scale: 1.0,
            tag: EntityTag::Ai,
            state: AgentState::Idle,
            target: None,
            target_switch_timer: 0.0,
            kill_count: 0,
            last_scale_kill_count: 0,
            killed_by: None,
            name_tag: None,
            tag_subscription: None,
            collision_enabled: true,
            movement_enabled: true,
            audio_listener_enabled: false,
            attack: AttackResolver::default(),
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn is_dead(&self) -> bool {
        self.state == AgentState::Dead
    }

    pub fn kill_count(&self) -> u32 {
        self.kill_count
    }

    /// 前方単位ベクトル（XY平面）
    pub fn forward(&self) -> Position3D {
        math_utils::forward_from_yaw(self.yaw_deg)
    }

    /// 目標切替タイマーを進め、加算後の値を返す
    pub fn advance_switch_timer(&mut self, dt: f64) -> f64 {
        self.target_switch_timer += dt;
        self.target_switch_timer
    }

    /// 目標獲得の決定を反映
    pub fn apply_target(&mut self, decision: &TargetDecision) {
        if let Some(lost) = decision.lost {
            debug!(agent = %self.name, reason = ?lost, "TARGET_LOST: 目標が無効になりました");
        }
        let next = decision.target.map(|snapshot| snapshot.entity);
        if next != self.target {
            debug!(agent = %self.name, from = ?self.target, to = ?next, "TARGET_SWITCH");
        }
        self.target = next;
        if decision.reset_timer {
            self.target_switch_timer = 0.0;
        }
    }

    /// 指定位置の方向を向く
    pub fn face_towards(&mut self, point: Position3D) {
        if let Some(yaw) = math_utils::yaw_from_direction(&(point - self.position)) {
            self.yaw_deg = yaw;
        }
    }

    /// 状態を遷移させ、退出・進入アクションを出力
    ///
    /// 同一状態への遷移と `Dead` からの遷移は何もしません。
    pub fn set_state(
        &mut self,
        new_state: AgentState,
        target_position: Option<Position3D>,
        commands: &mut Vec<AgentCommand>,
    ) {
        if self.state == new_state || self.state == AgentState::Dead {
            return;
        }

        self.exit_state(commands);
        debug!(agent = %self.name, from = ?self.state, to = ?new_state, "STATE_CHANGE");
        self.state = new_state;

        match new_state {
            AgentState::Idle => {
                commands.push(AgentCommand::ResetPath);
                commands.push(AgentCommand::SetAnimFlag(anim::RUNNING, false));
            }
            AgentState::Move => {
                if let Some(point) = target_position {
                    commands.push(AgentCommand::SetDestination(point));
                    commands.push(AgentCommand::SetAnimFlag(anim::RUNNING, true));
                }
            }
            AgentState::Attack => {
                commands.push(AgentCommand::ResetPath);
                commands.push(AgentCommand::SetAnimFlag(anim::RUNNING, false));
                commands.push(AgentCommand::SetAnimFlag(anim::ATTACK, true));
                if let Some(aim) = target_position {
                    commands.push(AgentCommand::BeginAttack { aim });
                }
            }
            AgentState::Dead => {
                commands.push(AgentCommand::ResetPath);
                commands.push(AgentCommand::SetMovementEnabled(false));
                commands.push(AgentCommand::SetAnimFlag(anim::RUNNING, false));
                commands.push(AgentCommand::SetAnimFlag(anim::ATTACK, false));
                commands.push(AgentCommand::SetAnimFlag(anim::DEATH, true));
            }
        }
    }

    fn exit_state(&mut self, commands: &mut Vec<AgentCommand>) {
        match self.state {
            AgentState::Attack => commands.push(AgentCommand::SetAnimFlag(anim::ATTACK, false)),
            AgentState::Move => commands.push(AgentCommand::SetAnimFlag(anim::RUNNING, false)),
            AgentState::Idle | AgentState::Dead => {}
        }
    }

    /// 現在の状態に応じた1ティック分の処理
    pub fn process_state(&mut self, tick: &AgentTick, rules: &AgentRules, commands: &mut Vec<AgentCommand>) {
        match self.state {
            AgentState::Idle => {
                if tick.target_position.is_some() {
                    self.set_state(AgentState::Move, tick.target_position, commands);
                }
            }
            AgentState::Move => self.move_to_target(tick, rules, commands),
            AgentState::Attack => {
                // 攻撃開始が受理されなかった場合の取り残し防止
                if !self.attack.is_attacking() {
                    self.finish_attack(tick.target_position, rules, commands);
                }
            }
            AgentState::Dead => {}
        }
    }

    fn move_to_target(&mut self, tick: &AgentTick, rules: &AgentRules, commands: &mut Vec<AgentCommand>) {
        let Some(target) = tick.target_position else {
            self.set_state(AgentState::Idle, None, commands);
            return;
        };

        if self.position.distance_sq(&target) <= rules.attack_range * rules.attack_range {
            self.set_state(AgentState::Attack, Some(target), commands);
            return;
        }

        commands.push(AgentCommand::SetDestination(target));

        if let Some(yaw) = tick
            .steering
            .and_then(|heading| math_utils::yaw_from_direction(&heading.flat()))
        {
            self.yaw_deg =
                math_utils::rotate_towards(self.yaw_deg, yaw, tick.angular_speed_deg * tick.dt);
        }
    }

    /// 攻撃シーケンス完了時の復帰
    ///
    /// 目標が射程外なら Move、それ以外（射程内・目標なし）は Idle に戻ります。
    pub fn finish_attack(
        &mut self,
        target_position: Option<Position3D>,
        rules: &AgentRules,
        commands: &mut Vec<AgentCommand>,
    ) {
        if self.is_dead() {
            return;
        }

        let next = match target_position {
            Some(target) if self.position.distance_sq(&target) > rules.attack_range * rules.attack_range => {
                AgentState::Move
            }
            _ => AgentState::Idle,
        };
        self.set_state(next, target_position, commands);

        commands.push(AgentCommand::SetAnimFlag(anim::ATTACK, false));
        commands.push(AgentCommand::SetAnimFlag(anim::RUNNING, self.state == AgentState::Move));
    }

    /// 致命的な被弾
    ///
    /// 最初の呼び出しでのみ `true` を返し、以降は何もしません。
    pub fn die(&mut self, killer: Option<EntityRef>, rules: &AgentRules, commands: &mut Vec<AgentCommand>) -> bool {
        if self.is_dead() {
            return false;
        }

        if let Some(timer) = self.attack.cancel() {
            commands.push(AgentCommand::CancelTimer(timer));
        }
        self.target = None;
        self.set_state(AgentState::Dead, None, commands);

        self.tag = EntityTag::Untagged;
        self.collision_enabled = false;
        self.movement_enabled = false;
        self.killed_by = killer;

        commands.push(AgentCommand::NotifyKilled { killer });
        commands.push(AgentCommand::ScheduleRelease {
            delay: rules.death_release_delay,
        });

        info!(
            agent = %self.name,
            kind = %self.kind,
            killer = ?killer,
            kills = self.kill_count,
            "AGENT_DIED: エージェントが撃破されました"
        );
        true
    }

    /// 撃破数を加算し、スケールを成長させる
    ///
    /// 撃破ごとの成長に加えて、`scale_step` 回ごとに段階的な成長を適用します。
    pub fn increase_kill(&mut self, rules: &AgentRules) -> u32 {
        self.kill_count += 1;
        self.scale += rules.kill_scale_amount;

        if rules.scale_step > 0 && self.kill_count - self.last_scale_kill_count >= rules.scale_step {
            self.last_scale_kill_count = self.kill_count;
            self.scale += rules.scale_amount;
            debug!(agent = %self.name, scale = self.scale, "AGENT_STEP_SCALED");
        }
        self.kill_count
    }
}

impl Agent {
    /// プール内での識別（種別と通し番号）を残して全フィールドを既定値へ戻す
    ///
    /// 攻撃トークンの採番は引き継ぎます。
    fn reset_pooled_state(&mut self) {
        let mut attack = std::mem::take(&mut self.attack);
        attack.reset();
        *self = Agent {
            attack,
            ..Agent::new(std::mem::take(&mut self.kind), self.slot)
        };
    }
}

impl IPoolable for Agent {
    fn on_acquire(&mut self) {
        self.reset_pooled_state();
    }

    fn on_release(&mut self) {
        self.reset_pooled_state();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> AgentRules {
        AgentRules {
            attack_range: 2.5,
            death_release_delay: 2.0,
            kill_scale_amount: 0.3,
            scale_step: 5,
            scale_amount: 0.1,
        }
    }

    fn tick(target: Option<Position3D>) -> AgentTick {
        AgentTick {
            target_position: target,
            steering: target,
            angular_speed_deg: 120.0,
            dt: 0.1,
        }
    }

    fn spawned() -> Agent {
        let mut agent = Agent::new("Warrior", 0);
        agent.on_acquire();
        agent.name = "AI_1".to_string();
        agent
    }

    #[test]
    fn test_idle_to_move_issues_destination() {
        let mut agent = spawned();
        let mut commands = Vec::new();
        let player = Position3D::new(10.0, 0.0, 0.0);
        agent.process_state(&tick(Some(player)), &rules(), &mut commands);

        assert_eq!(agent.state(), AgentState::Move);
        assert!(commands.contains(&AgentCommand::SetDestination(player)));
        assert!(commands.contains(&AgentCommand::SetAnimFlag(anim::RUNNING, true)));
        assert!(!commands.iter().any(|c| matches!(c, AgentCommand::BeginAttack { .. })));
    }

    #[test]
    fn test_move_to_attack_when_in_range() {
        let mut agent = spawned();
        let mut commands = Vec::new();
        let far = Position3D::new(10.0, 0.0, 0.0);
        agent.process_state(&tick(Some(far)), &rules(), &mut commands);

        commands.clear();
        let near = Position3D::new(2.0, 0.0, 0.0);
        agent.process_state(&tick(Some(near)), &rules(), &mut commands);

        assert_eq!(agent.state(), AgentState::Attack);
        assert!(commands.contains(&AgentCommand::SetAnimFlag(anim::ATTACK, true)));
        assert!(commands.contains(&AgentCommand::BeginAttack { aim: near }));
    }

    #[test]
    fn test_move_rotates_with_capped_rate() {
        let mut agent = spawned();
        let mut commands = Vec::new();
        let east = Position3D::new(10.0, 0.0, 0.0);
        agent.process_state(&tick(Some(east)), &rules(), &mut commands);
        agent.process_state(&tick(Some(east)), &rules(), &mut commands);
        // 120度/秒 × 0.1秒
        assert!((agent.yaw_deg - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_move_to_idle_when_target_lost() {
        let mut agent = spawned();
        let mut commands = Vec::new();
        agent.process_state(&tick(Some(Position3D::new(10.0, 0.0, 0.0))), &rules(), &mut commands);
        agent.process_state(&tick(None), &rules(), &mut commands);
        assert_eq!(agent.state(), AgentState::Idle);
    }

    #[test]
    fn test_finish_attack_picks_next_state() {
        let mut agent = spawned();
        let mut commands = Vec::new();
        agent.process_state(&tick(Some(Position3D::new(10.0, 0.0, 0.0))), &rules(), &mut commands);
        agent.process_state(&tick(Some(Position3D::new(1.0, 0.0, 0.0))), &rules(), &mut commands);
        assert_eq!(agent.state(), AgentState::Attack);

        agent.finish_attack(Some(Position3D::new(8.0, 0.0, 0.0)), &rules(), &mut commands);
        assert_eq!(agent.state(), AgentState::Move);
        assert_eq!(
            commands.last(),
            Some(&AgentCommand::SetAnimFlag(anim::RUNNING, true))
        );

        agent.set_state(AgentState::Attack, None, &mut commands);
        agent.finish_attack(None, &rules(), &mut commands);
        assert_eq!(agent.state(), AgentState::Idle);
    }

    #[test]
    fn test_dead_is_absorbing() {
        let mut agent = spawned();
        let mut commands = Vec::new();
        let killer = Some(EntityRef::Player(crate::models::common::PlayerId(0)));
        assert!(agent.die(killer, &rules(), &mut commands));
        assert!(commands.contains(&AgentCommand::NotifyKilled { killer }));
        assert!(commands.contains(&AgentCommand::ScheduleRelease { delay: 2.0 }));
        assert_eq!(agent.tag, EntityTag::Untagged);
        assert!(!agent.collision_enabled);

        commands.clear();
        assert!(!agent.die(None, &rules(), &mut commands));
        let target = Some(Position3D::new(1.0, 0.0, 0.0));
        agent.process_state(&tick(target), &rules(), &mut commands);
        agent.finish_attack(target, &rules(), &mut commands);
        agent.set_state(AgentState::Move, target, &mut commands);
        agent.set_state(AgentState::Idle, target, &mut commands);

        assert_eq!(agent.state(), AgentState::Dead);
        assert!(commands.is_empty());
    }

    #[test]
    fn test_death_cancels_pending_attack_timer() {
        let mut agent = spawned();
        let mut scheduler = crate::scheduler::Scheduler::new();
        agent.attack.begin(Position3D::ZERO, 0.0).unwrap();
        let timer = scheduler.schedule_after(0.5, ());
        agent.attack.set_pending_timer(timer);

        let mut commands = Vec::new();
        agent.die(None, &rules(), &mut commands);
        assert!(commands.contains(&AgentCommand::CancelTimer(timer)));
        assert!(!agent.attack.is_attacking());
    }

    #[test]
    fn test_kill_scaling() {
        let mut agent = spawned();
        for _ in 0..5 {
            agent.increase_kill(&rules());
        }
        assert_eq!(agent.kill_count(), 5);
        // 0.3 × 5 + 段階成長 0.1
        assert!((agent.scale - (1.0 + 1.5 + 0.1)).abs() < 1e-9);
    }

    #[test]
    fn test_acquire_resets_defaults() {
        let mut agent = spawned();
        agent.increase_kill(&rules());
        agent.die(None, &rules(), &mut Vec::new());
        agent.on_release();
        agent.on_acquire();

        assert_eq!(agent.kill_count(), 0);
        assert_eq!(agent.kind, "Warrior");
        assert_eq!(agent.scale, 1.0);
        assert_eq!(agent.tag, EntityTag::Ai);
        assert_eq!(agent.state(), AgentState::Idle);
        assert!(agent.collision_enabled);
        assert!(!agent.audio_listener_enabled);
    }

    #[test]
    fn test_release_clears_every_field() {
        let mut agent = spawned();
        agent.name = "AI_123".to_string();
        agent.position = Position3D::new(4.0, -2.0, 0.0);
        agent.yaw_deg = 90.0;
        agent.target = Some(EntityRef::Player(crate::models::common::PlayerId(0)));
        agent.increase_kill(&rules());
        agent.die(None, &rules(), &mut Vec::new());
        agent.on_release();

        assert_eq!(agent.state(), AgentState::Idle);
        assert_eq!(agent.kill_count(), 0);
        assert_eq!(agent.scale, 1.0);
        assert_eq!(agent.yaw_deg, 0.0);
        assert_eq!(agent.position, Position3D::ZERO);
        assert_eq!(agent.tag, EntityTag::Ai);
        assert!(agent.name.is_empty());
        assert!(agent.target.is_none());
        assert!(agent.killed_by.is_none());
        assert!(agent.collision_enabled);
        assert!(agent.movement_enabled);
        assert!(!agent.attack.is_attacking());
        assert_eq!(agent.slot, 0);
    }
}
