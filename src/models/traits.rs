use crate::models::common::{EntityRef, EntityTag, Position3D};
use crate::models::projectile::{ProjectileHandle, ProjectileHit};

/// プールで再利用される全エンティティが実装するインターフェース
pub trait IPoolable {
    /// プールから払い出される直前に呼ばれ、既定値へリセットする
    fn on_acquire(&mut self);

    /// プールへ返却された直後に呼ばれ、一時的な参照をクリアする
    fn on_release(&mut self);
}

/// 空間インデックスへ登録する1エンティティ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialEntry {
    pub entity: EntityRef,
    pub position: Position3D,
    pub tag: EntityTag,
}

/// 空間クエリ（外部コラボレータ）
///
/// 指定点から半径内にあるエンティティを返します。
pub trait ISpatialQuery {
    fn query_radius(
        &self,
        point: Position3D,
        radius: f64,
        tag_filter: Option<EntityTag>,
    ) -> Vec<EntityRef>;

    /// ティック開始時にエンティティ一覧を受け取る（自前で位置を追跡する実装は無視してよい）
    fn rebuild(&mut self, _entries: &[SpatialEntry]) {}
}

/// 移動（経路探索・ステアリング）コラボレータ
pub trait IMovement {
    /// 移動先を設定
    fn set_destination(&mut self, who: EntityRef, point: Position3D);

    /// 現在の経路を破棄して停止
    fn reset_path(&mut self, who: EntityRef);

    /// 移動能力の有効/無効を切り替え
    fn set_enabled(&mut self, who: EntityRef, enabled: bool);

    /// 現在のステアリング方向（経路がない場合は None）
    fn steering_heading(&self, who: EntityRef, from: Position3D) -> Option<Position3D>;

    /// 最大旋回速度（度/秒）
    fn angular_speed_deg(&self, who: EntityRef) -> f64;

    /// 接地しているか（浮いている間は旋回しない）
    fn is_grounded(&self, who: EntityRef) -> bool;

    /// 1ティック分の移動を積分し、新しい位置を返す
    fn integrate(&mut self, who: EntityRef, position: Position3D, dt: f64) -> Position3D;

    /// 管理対象から外す（プール返却時）
    fn forget(&mut self, who: EntityRef);
}

/// アニメーションコラボレータ
pub trait IAnimation {
    fn set_flag(&mut self, who: EntityRef, name: &'static str, value: bool);

    fn trigger(&mut self, who: EntityRef, name: &'static str);

    /// 全パラメータを初期状態へ戻す
    fn rebind(&mut self, who: EntityRef);
}

/// 投擲物の物理コラボレータ
pub trait IProjectilePhysics {
    /// 投擲物を発射し、推定飛翔時間（秒）を返す
    fn launch(
        &mut self,
        projectile: ProjectileHandle,
        from: Position3D,
        to: Position3D,
        speed: f64,
    ) -> f64;

    /// 飛翔中の投擲物を停止・破棄
    fn cancel(&mut self, projectile: ProjectileHandle);

    /// 1ティック分の飛翔を進め、発生した接触を返す
    fn step(&mut self, dt: f64, spatial: &dyn ISpatialQuery) -> Vec<ProjectileHit>;
}

/// 撃破通知の受け口
///
/// 被撃破者と（判明していれば）撃破者を受け取り、撃破者のタグに応じて
/// スコアを帰属させる責務を持ちます。
pub trait IKillSink {
    fn on_entity_killed(&mut self, victim: EntityRef, killer: Option<EntityRef>);
}
