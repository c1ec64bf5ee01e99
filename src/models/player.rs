use tracing::{debug, info};

use crate::models::attack::AttackResolver;
use crate::models::common::{math_utils, PlayerId, Position3D};
use crate::models::score::ScoreListenerId;
use crate::scheduler::TimerId;

/// 入力ベクトルを移動とみなす最小の長さの二乗
const INPUT_DEADZONE_SQ: f64 = 0.01;

/// 1ティック分の移動結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovementStep {
    /// このティックに移動した
    pub moving: bool,
    /// このティックに停止した（前ティックは移動中）
    pub stopped_now: bool,
    /// 移動によって取り消された攻撃のタイマー
    pub cancelled_timer: Option<TimerId>,
    /// 移動によって攻撃が中断された
    pub cancelled_attack: bool,
}

/// 人間が操作する戦闘者
///
/// プールされず、試合の間ずっと存在します。移動入力がない間は探知範囲内の
/// 最も近いAIへ自動で攻撃し、移動入力は進行中の攻撃を取り消します。
#[derive(Debug, Clone)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub position: Position3D,
    pub yaw_deg: f64,
    pub scale: f64,
    pub move_speed: f64,
    health: u32,
    max_health: u32,
    dead: bool,
    input: Position3D,
    was_moving: bool,
    last_scale_score: i64,
    /// 共有スコアの購読（死亡時に解除）
    pub score_subscription: Option<ScoreListenerId>,
    pub attack: AttackResolver,
}

impl Player {
    pub fn new(id: PlayerId, name: impl Into<String>, position: Position3D, max_health: u32, move_speed: f64) -> Self {
        Self {
            id,
            name: name.into(),
            position,
            yaw_deg: 0.0,
            scale: 1.0,
            move_speed,
            health: max_health,
            max_health,
            dead: false,
            input: Position3D::ZERO,
            was_moving: false,
            last_scale_score: 0,
            score_subscription: None,
            attack: AttackResolver::default(),
        }
    }

    pub fn health(&self) -> u32 {
        self.health
    }

    pub fn max_health(&self) -> u32 {
        self.max_health
    }

    pub fn is_dead(&self) -> bool {
        self.dead
    }

    pub fn forward(&self) -> Position3D {
        math_utils::forward_from_yaw(self.yaw_deg)
    }

    /// 移動入力（XY平面の方向、長さ0で停止）
    pub fn set_input(&mut self, direction: Position3D) {
        self.input = direction.flat();
    }

    pub fn input(&self) -> Position3D {
        self.input
    }

    pub fn has_move_input(&self) -> bool {
        self.input.magnitude().powi(2) >= INPUT_DEADZONE_SQ
    }

    /// 入力に従って1ティック分移動
    pub fn step_movement(&mut self, dt: f64) -> MovementStep {
        let mut step = MovementStep {
            moving: false,
            stopped_now: false,
            cancelled_timer: None,
            cancelled_attack: false,
        };
        if self.dead {
            return step;
        }

        if self.has_move_input() {
            let direction = self.input.normalize();
            self.position = self.position + direction * (self.move_speed * dt);
            if let Some(yaw) = math_utils::yaw_from_direction(&direction) {
                self.yaw_deg = yaw;
            }
            self.was_moving = true;
            step.moving = true;

            if self.attack.is_attacking() {
                step.cancelled_timer = self.attack.cancel();
                step.cancelled_attack = true;
                debug!(player = %self.name, "PLAYER_ATTACK_CANCELLED: 移動により攻撃を中断しました");
            }
        } else if self.was_moving {
            self.was_moving = false;
            step.stopped_now = true;
        }
        step
    }

    /// 攻撃対象の方向を向く
    ///
    /// 前方との角度が `attack_angle_deg` 以上のときだけ向き直ります。
    pub fn aim_at(&mut self, point: Position3D, attack_angle_deg: f64) {
        let to_target = (point - self.position).flat();
        if math_utils::angle_between(&self.forward(), &to_target) >= attack_angle_deg {
            if let Some(yaw) = math_utils::yaw_from_direction(&to_target) {
                self.yaw_deg = yaw;
            }
        }
    }

    /// ダメージを受ける
    ///
    /// この呼び出しで死亡した場合に `true`。死亡後の呼び出しは何もしません。
    pub fn take_damage(&mut self, amount: u32) -> bool {
        if self.dead {
            return false;
        }
        self.health = self.health.saturating_sub(amount);
        info!(player = %self.name, health = self.health, "PLAYER_DAMAGED: プレイヤーが被弾しました");

        if self.health == 0 {
            self.dead = true;
            self.input = Position3D::ZERO;
            self.attack.cancel();
            info!(player = %self.name, "PLAYER_DIED: プレイヤーが倒れました");
            return true;
        }
        false
    }

    /// スコア変化に応じた段階スケーリング
    pub fn on_score_changed(&mut self, score: i64, scale_step: i64, scale_amount: f64) {
        if scale_step > 0 && score - self.last_scale_score >= scale_step {
            self.last_scale_score = score;
            self.scale += scale_amount;
            debug!(player = %self.name, scale = self.scale, "PLAYER_STEP_SCALED");
        }
    }
}
