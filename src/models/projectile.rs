use slotmap::new_key_type;
use tracing::info;

use crate::models::common::{EntityRef, Position3D};
use crate::models::traits::IPoolable;

new_key_type! {
    /// 投擲物プールのハンドル
    pub struct ProjectileHandle;
}

/// 投擲物が飛翔を終えた理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectileEndReason {
    /// エージェントまたはプレイヤーに命中した
    Hit,
    /// 飛翔時間から求めた返却時刻に達した
    Expired,
}

/// 物理コラボレータが報告する接触
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectileHit {
    pub projectile: ProjectileHandle,
    pub victim: EntityRef,
    pub position: Position3D,
}

/// 投擲物（ハンマー）
///
/// 飛翔中のみアクティブで、発射者を所有者として保持します。所有者は自傷の防止と
/// 撃破の帰属に使用されます。
#[derive(Debug, Clone, Default)]
pub struct Projectile {
    pub owner: Option<EntityRef>,
    pub origin: Position3D,
    pub aim_point: Position3D,
    pub speed: f64,
    /// 発射時刻（シミュレーション秒）
    pub launched_at: f64,
    /// 物理コラボレータが返した推定飛翔時間
    pub flight_time: f64,
    pub end_reason: Option<ProjectileEndReason>,
}

impl Projectile {
    /// 発射パラメータを設定
    pub fn arm(
        &mut self,
        owner: Option<EntityRef>,
        origin: Position3D,
        aim_point: Position3D,
        speed: f64,
        now: f64,
    ) {
        self.owner = owner;
        self.origin = origin;
        self.aim_point = aim_point;
        self.speed = speed;
        self.launched_at = now;
        self.end_reason = None;

        info!(
            owner = ?owner,
            origin_x = origin.x,
            origin_y = origin.y,
            aim_x = aim_point.x,
            aim_y = aim_point.y,
            speed,
            "PROJECTILE_LAUNCHED: ハンマーが投擲されました"
        );
    }

    /// 接触相手が所有者自身かどうか（自傷防止）
    pub fn is_owned_by(&self, entity: EntityRef) -> bool {
        self.owner == Some(entity)
    }
}

impl IPoolable for Projectile {
    fn on_acquire(&mut self) {
        *self = Projectile::default();
    }

    fn on_release(&mut self) {
        *self = Projectile::default();
    }
}
