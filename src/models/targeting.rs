//! # Targeting モジュール
//!
//! エージェントの次の戦闘目標を選定する近接ベースの目標獲得アルゴリズムです。
//!
//! ## 選定ポリシー（優先順）
//!
//! 1. 探知半径内の全エンティティを照会し、自分自身を除外
//! 2. 攻撃射程内に生存プレイヤーがいれば即座にそれを返す
//! 3. 死亡していないAIを候補として収集し、一様乱数で1体を選ぶ
//! 4. AI候補がなければ、探知半径内で最も近い生存プレイヤーを返す
//! 5. いずれもなければ `None`
//!
//! 保持中の目標は毎ティック再検証され、死亡・消滅・リード距離超過のいずれかで
//! 切替クールダウンを無視して即座に再獲得します。

use rand::Rng;
use tracing::trace;

use crate::models::common::{EntityRef, EntityTag, Position3D};
use crate::models::traits::ISpatialQuery;

/// 目標候補のある時点での情報
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetSnapshot {
    pub entity: EntityRef,
    pub tag: EntityTag,
    pub position: Position3D,
    pub alive: bool,
}

/// エンティティ参照を解決するレジストリ
///
/// 古いハンドル（返却・再利用済み）に対しては `None` を返さなければなりません。
pub trait ITargetRegistry {
    fn snapshot(&self, entity: EntityRef) -> Option<TargetSnapshot>;
}

/// 保持中の目標の再検証結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetValidity {
    Valid(TargetSnapshot),
    /// 目標が死亡している
    Dead,
    /// 目標がプールへ返却済み（ハンドルが古い）
    Gone,
    /// リード距離を超えて離れた
    OutOfLeash,
}

/// 目標獲得のパラメータ
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetingConfig {
    pub detection_range: f64,
    pub attack_range: f64,
    /// リード距離（これを超えると強制再獲得）
    pub max_distance: f64,
    pub switch_cooldown: f64,
}

/// 1ティック分の目標更新の決定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetDecision {
    pub target: Option<TargetSnapshot>,
    /// 切替タイマーを0に戻すか
    pub reset_timer: bool,
    /// 保持していた目標を失った理由
    pub lost: Option<TargetValidity>,
}

#[derive(Debug, Clone)]
pub struct TargetAcquisition {
    pub config: TargetingConfig,
}

impl TargetAcquisition {
    pub fn new(config: TargetingConfig) -> Self {
        Self { config }
    }

    /// 次の目標を選定
    ///
    /// # 引数
    ///
    /// * `spatial` - 空間クエリ
    /// * `registry` - 参照解決
    /// * `position` - 照会元の位置
    /// * `self_ref` - 照会元自身（結果から除外）
    /// * `rng` - AI候補選択用の乱数
    pub fn select_target<R: Rng + ?Sized>(
        &self,
        spatial: &dyn ISpatialQuery,
        registry: &dyn ITargetRegistry,
        position: Position3D,
        self_ref: EntityRef,
        rng: &mut R,
    ) -> Option<TargetSnapshot> {
        let attack_range_sq = self.config.attack_range * self.config.attack_range;

        let nearby: Vec<TargetSnapshot> = spatial
            .query_radius(position, self.config.detection_range, None)
            .into_iter()
            .filter(|entity| *entity != self_ref)
            .filter_map(|entity| registry.snapshot(entity))
            .filter(|snapshot| snapshot.alive)
            .collect();

        // プレイヤーが攻撃射程内なら最優先
        if let Some(player) = nearby.iter().find(|snapshot| {
            snapshot.tag == EntityTag::Player && position.distance_sq(&snapshot.position) <= attack_range_sq
        }) {
            trace!(target = ?player.entity, "TARGET_PLAYER_IN_RANGE");
            return Some(*player);
        }

        let candidates: Vec<&TargetSnapshot> = nearby
            .iter()
            .filter(|snapshot| snapshot.tag == EntityTag::Ai)
            .collect();

        if !candidates.is_empty() {
            let index = rng.gen_range(0..candidates.len());
            return Some(*candidates[index]);
        }

        nearby
            .iter()
            .filter(|snapshot| snapshot.tag == EntityTag::Player)
            .min_by(|a, b| {
                position
                    .distance_sq(&a.position)
                    .total_cmp(&position.distance_sq(&b.position))
            })
            .copied()
    }

    /// 保持中の目標を再検証
    pub fn revalidate(
        &self,
        holder_position: Position3D,
        target: EntityRef,
        registry: &dyn ITargetRegistry,
    ) -> TargetValidity {
        let Some(snapshot) = registry.snapshot(target) else {
            return TargetValidity::Gone;
        };
        if !snapshot.alive {
            return TargetValidity::Dead;
        }
        let leash_sq = self.config.max_distance * self.config.max_distance;
        if holder_position.distance_sq(&snapshot.position) > leash_sq {
            return TargetValidity::OutOfLeash;
        }
        TargetValidity::Valid(snapshot)
    }

    /// 1ティック分の目標更新を計画
    ///
    /// `switch_timer` はこのティックの経過時間を加算済みの値を渡します。
    #[allow(clippy::too_many_arguments)]
    pub fn plan<R: Rng + ?Sized>(
        &self,
        spatial: &dyn ISpatialQuery,
        registry: &dyn ITargetRegistry,
        holder_position: Position3D,
        self_ref: EntityRef,
        current: Option<EntityRef>,
        switch_timer: f64,
        rng: &mut R,
    ) -> TargetDecision {
        let Some(current) = current else {
            return TargetDecision {
                target: self.select_target(spatial, registry, holder_position, self_ref, rng),
                reset_timer: true,
                lost: None,
            };
        };

        match self.revalidate(holder_position, current, registry) {
            TargetValidity::Valid(snapshot) => {
                if switch_timer < self.config.switch_cooldown {
                    return TargetDecision {
                        target: Some(snapshot),
                        reset_timer: false,
                        lost: None,
                    };
                }
                // クールダウン経過: プレイヤーが射程に入っていれば乗り換える
                let preferred = if snapshot.tag == EntityTag::Player {
                    snapshot
                } else {
                    self.select_target(spatial, registry, holder_position, self_ref, rng)
                        .filter(|candidate| candidate.tag == EntityTag::Player)
                        .unwrap_or(snapshot)
                };
                TargetDecision {
                    target: Some(preferred),
                    reset_timer: true,
                    lost: None,
                }
            }
            invalid => TargetDecision {
                target: self.select_target(spatial, registry, holder_position, self_ref, rng),
                reset_timer: true,
                lost: Some(invalid),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::agent::AgentHandle;
    use crate::models::common::PlayerId;
    use crate::models::pool::EntityPool;
    use crate::models::pool::GrowthPolicy;
    use crate::models::agent::Agent;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashMap;

    /// テスト用の固定ワールド
    struct FixedWorld {
        entries: HashMap<EntityRef, TargetSnapshot>,
    }

    impl FixedWorld {
        fn new(snapshots: &[TargetSnapshot]) -> Self {
            Self {
                entries: snapshots.iter().map(|s| (s.entity, *s)).collect(),
            }
        }
    }

    impl ISpatialQuery for FixedWorld {
        fn query_radius(&self, point: Position3D, radius: f64, _tag: Option<EntityTag>) -> Vec<EntityRef> {
            let mut found: Vec<_> = self
                .entries
                .values()
                .filter(|s| s.position.distance_sq(&point) <= radius * radius)
                .map(|s| s.entity)
                .collect();
            found.sort_by_key(|e| format!("{:?}", e));
            found
        }
    }

    impl ITargetRegistry for FixedWorld {
        fn snapshot(&self, entity: EntityRef) -> Option<TargetSnapshot> {
            self.entries.get(&entity).copied()
        }
    }

    fn handles(count: usize) -> Vec<AgentHandle> {
        let mut pool: EntityPool<AgentHandle, Agent> =
            EntityPool::new("agents", count, GrowthPolicy::Fixed, |i| Agent::new("Warrior", i));
        (0..count).filter_map(|_| pool.acquire()).collect()
    }

    fn ai(handle: AgentHandle, x: f64, alive: bool) -> TargetSnapshot {
        TargetSnapshot {
            entity: EntityRef::Agent(handle),
            tag: if alive { EntityTag::Ai } else { EntityTag::Untagged },
            position: Position3D::new(x, 0.0, 0.0),
            alive,
        }
    }

    fn player(x: f64, alive: bool) -> TargetSnapshot {
        TargetSnapshot {
            entity: EntityRef::Player(PlayerId(0)),
            tag: EntityTag::Player,
            position: Position3D::new(x, 0.0, 0.0),
            alive,
        }
    }

    fn acquisition() -> TargetAcquisition {
        TargetAcquisition::new(TargetingConfig {
            detection_range: 50.0,
            attack_range: 2.5,
            max_distance: 200.0,
            switch_cooldown: 1.5,
        })
    }

    #[test]
    fn test_never_returns_self_or_dead() {
        let h = handles(3);
        let world = FixedWorld::new(&[ai(h[0], 0.0, true), ai(h[1], 1.0, false), ai(h[2], 3.0, true)]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        for _ in 0..50 {
            let picked = acquisition()
                .select_target(&world, &world, Position3D::ZERO, EntityRef::Agent(h[0]), &mut rng)
                .unwrap();
            assert_eq!(picked.entity, EntityRef::Agent(h[2]));
        }
    }

    #[test]
    fn test_player_in_attack_range_beats_closer_ai() {
        let h = handles(2);
        let world = FixedWorld::new(&[ai(h[0], 0.0, true), ai(h[1], 0.5, true), player(2.0, true)]);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let picked = acquisition()
            .select_target(&world, &world, Position3D::ZERO, EntityRef::Agent(h[0]), &mut rng)
            .unwrap();
        assert_eq!(picked.tag, EntityTag::Player);
    }

    #[test]
    fn test_player_outside_attack_range_is_fallback() {
        let h = handles(1);
        let world = FixedWorld::new(&[ai(h[0], 0.0, true), player(20.0, true)]);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let picked = acquisition()
            .select_target(&world, &world, Position3D::ZERO, EntityRef::Agent(h[0]), &mut rng)
            .unwrap();
        assert_eq!(picked.entity, EntityRef::Player(PlayerId(0)));

        let dead = FixedWorld::new(&[ai(h[0], 0.0, true), player(20.0, false)]);
        assert!(acquisition()
            .select_target(&dead, &dead, Position3D::ZERO, EntityRef::Agent(h[0]), &mut rng)
            .is_none());
    }

    #[test]
    fn test_random_choice_covers_all_candidates() {
        let h = handles(4);
        let world = FixedWorld::new(&[
            ai(h[0], 0.0, true),
            ai(h[1], 5.0, true),
            ai(h[2], 6.0, true),
            ai(h[3], 7.0, true),
        ]);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let picked = acquisition()
                .select_target(&world, &world, Position3D::ZERO, EntityRef::Agent(h[0]), &mut rng)
                .unwrap();
            seen.insert(picked.entity);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_invalid_target_bypasses_cooldown() {
        let h = handles(3);
        let world = FixedWorld::new(&[ai(h[0], 0.0, true), ai(h[1], 5.0, false), ai(h[2], 6.0, true)]);
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let decision = acquisition().plan(
            &world,
            &world,
            Position3D::ZERO,
            EntityRef::Agent(h[0]),
            Some(EntityRef::Agent(h[1])),
            0.0,
            &mut rng,
        );
        assert_eq!(decision.lost, Some(TargetValidity::Dead));
        assert_eq!(decision.target.map(|t| t.entity), Some(EntityRef::Agent(h[2])));
        assert!(decision.reset_timer);
    }

    #[test]
    fn test_out_of_leash_and_gone() {
        let h = handles(2);
        let far = TargetSnapshot {
            position: Position3D::new(500.0, 0.0, 0.0),
            ..ai(h[1], 0.0, true)
        };
        let world = FixedWorld::new(&[ai(h[0], 0.0, true), far]);
        let acq = acquisition();
        assert_eq!(
            acq.revalidate(Position3D::ZERO, EntityRef::Agent(h[1]), &world),
            TargetValidity::OutOfLeash
        );
        let empty = FixedWorld::new(&[]);
        assert_eq!(
            acq.revalidate(Position3D::ZERO, EntityRef::Agent(h[1]), &empty),
            TargetValidity::Gone
        );
    }

    #[test]
    fn test_valid_target_kept_during_cooldown() {
        let h = handles(3);
        let world = FixedWorld::new(&[ai(h[0], 0.0, true), ai(h[1], 5.0, true), ai(h[2], 6.0, true)]);
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        for timer in [0.1, 1.0, 2.0] {
            let decision = acquisition().plan(
                &world,
                &world,
                Position3D::ZERO,
                EntityRef::Agent(h[0]),
                Some(EntityRef::Agent(h[1])),
                timer,
                &mut rng,
            );
            assert_eq!(decision.target.map(|t| t.entity), Some(EntityRef::Agent(h[1])));
            assert_eq!(decision.reset_timer, timer >= 1.5);
        }
    }
}
