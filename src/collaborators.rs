//! # Collaborators モジュール
//!
//! エンジンをヘッドレスで動かすための、外部コラボレータのインメモリ参照実装です。
//!
//! - [`NaiveSpatialIndex`]: ティックごとに再構築する全探索の空間インデックス
//! - [`KinematicMover`]: 目的地へ等速直線で近づく移動コラボレータ
//! - [`AnimationRecorder`]: 要求されたアニメーションパラメータを記録するだけの実装
//! - [`StraightLineLauncher`]: 投擲物を等速直線で飛ばし、掃引判定で接触を報告する

use std::collections::HashMap;

use tracing::trace;

use crate::models::common::{EntityRef, EntityTag, Position3D};
use crate::models::projectile::{ProjectileHandle, ProjectileHit};
use crate::models::traits::{IAnimation, IMovement, IProjectilePhysics, ISpatialQuery, SpatialEntry};

/// 全探索の空間インデックス
#[derive(Debug, Default, Clone)]
pub struct NaiveSpatialIndex {
    entries: Vec<SpatialEntry>,
}

impl NaiveSpatialIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ISpatialQuery for NaiveSpatialIndex {
    fn query_radius(&self, point: Position3D, radius: f64, tag_filter: Option<EntityTag>) -> Vec<EntityRef> {
        let radius_sq = radius * radius;
        self.entries
            .iter()
            .filter(|entry| tag_filter.is_none_or(|tag| entry.tag == tag))
            .filter(|entry| entry.position.distance_sq(&point) <= radius_sq)
            .map(|entry| entry.entity)
            .collect()
    }

    fn rebuild(&mut self, entries: &[SpatialEntry]) {
        self.entries.clear();
        self.entries.extend_from_slice(entries);
    }
}

#[derive(Debug, Clone, Copy)]
struct MoverState {
    destination: Option<Position3D>,
    enabled: bool,
    grounded: bool,
}

impl Default for MoverState {
    fn default() -> Self {
        Self {
            destination: None,
            enabled: true,
            grounded: true,
        }
    }
}

/// 等速直線の移動コラボレータ
///
/// 目的地まで `stopping_distance` を残して停止します。
#[derive(Debug, Clone)]
pub struct KinematicMover {
    pub speed: f64,
    pub angular_speed_deg: f64,
    pub stopping_distance: f64,
    states: HashMap<EntityRef, MoverState>,
}

impl KinematicMover {
    pub fn new(speed: f64, angular_speed_deg: f64, stopping_distance: f64) -> Self {
        Self {
            speed,
            angular_speed_deg,
            stopping_distance,
            states: HashMap::new(),
        }
    }

    pub fn destination(&self, who: EntityRef) -> Option<Position3D> {
        self.states.get(&who).and_then(|state| state.destination)
    }

    /// 接地状態を設定（吹き飛ばし等で浮いている間は水平移動しない）
    pub fn set_grounded(&mut self, who: EntityRef, grounded: bool) {
        self.states.entry(who).or_default().grounded = grounded;
    }
}

impl IMovement for KinematicMover {
    fn set_destination(&mut self, who: EntityRef, point: Position3D) {
        self.states.entry(who).or_default().destination = Some(point);
    }

    fn reset_path(&mut self, who: EntityRef) {
        if let Some(state) = self.states.get_mut(&who) {
            state.destination = None;
        }
    }

    fn set_enabled(&mut self, who: EntityRef, enabled: bool) {
        let state = self.states.entry(who).or_default();
        state.enabled = enabled;
        if !enabled {
            state.destination = None;
        }
    }

    fn steering_heading(&self, who: EntityRef, from: Position3D) -> Option<Position3D> {
        let destination = self.destination(who)?;
        let heading = (destination - from).flat();
        (!heading.is_zero()).then_some(heading.normalize())
    }

    fn angular_speed_deg(&self, _who: EntityRef) -> f64 {
        self.angular_speed_deg
    }

    fn is_grounded(&self, who: EntityRef) -> bool {
        self.states.get(&who).is_none_or(|state| state.grounded)
    }

    fn integrate(&mut self, who: EntityRef, position: Position3D, dt: f64) -> Position3D {
        let Some(state) = self.states.get(&who) else {
            return position;
        };
        let Some(destination) = state.destination.filter(|_| state.enabled && state.grounded) else {
            return position;
        };

        let to_destination = (destination - position).flat();
        let remaining = to_destination.magnitude() - self.stopping_distance;
        if remaining <= 0.0 {
            return position;
        }
        let step = (self.speed * dt).min(remaining);
        position + to_destination.normalize() * step
    }

    fn forget(&mut self, who: EntityRef) {
        self.states.remove(&who);
    }
}

/// アニメーション要求の記録
#[derive(Debug, Default, Clone)]
pub struct AnimationRecorder {
    flags: HashMap<(EntityRef, &'static str), bool>,
    triggers: Vec<(EntityRef, &'static str)>,
}

impl AnimationRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(&self, who: EntityRef, name: &'static str) -> bool {
        self.flags.get(&(who, name)).copied().unwrap_or(false)
    }

    pub fn trigger_count(&self, who: EntityRef, name: &'static str) -> usize {
        self.triggers
            .iter()
            .filter(|(entity, trigger)| *entity == who && *trigger == name)
            .count()
    }
}

impl IAnimation for AnimationRecorder {
    fn set_flag(&mut self, who: EntityRef, name: &'static str, value: bool) {
        self.flags.insert((who, name), value);
    }

    fn trigger(&mut self, who: EntityRef, name: &'static str) {
        self.triggers.push((who, name));
    }

    fn rebind(&mut self, who: EntityRef) {
        self.flags.retain(|(entity, _), _| *entity != who);
    }
}

#[derive(Debug, Clone, Copy)]
struct Flight {
    projectile: ProjectileHandle,
    position: Position3D,
    direction: Position3D,
    speed: f64,
}

/// 等速直線の投擲物物理
///
/// 照準点を通過した後も、シミュレーションが返却するまで同じ方向へ飛び続けます。
#[derive(Debug, Clone)]
pub struct StraightLineLauncher {
    pub hit_radius: f64,
    flights: Vec<Flight>,
}

impl StraightLineLauncher {
    pub fn new(hit_radius: f64) -> Self {
        Self {
            hit_radius,
            flights: Vec::new(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }
}

impl IProjectilePhysics for StraightLineLauncher {
    fn launch(&mut self, projectile: ProjectileHandle, from: Position3D, to: Position3D, speed: f64) -> f64 {
        let offset = to - from;
        let distance = offset.magnitude();
        self.flights.retain(|flight| flight.projectile != projectile);
        self.flights.push(Flight {
            projectile,
            position: from,
            direction: offset.normalize(),
            speed,
        });
        if speed > 0.0 { distance / speed } else { 0.0 }
    }

    fn cancel(&mut self, projectile: ProjectileHandle) {
        self.flights.retain(|flight| flight.projectile != projectile);
    }

    fn step(&mut self, dt: f64, spatial: &dyn ISpatialQuery) -> Vec<ProjectileHit> {
        let mut hits = Vec::new();
        for flight in self.flights.iter_mut() {
            let travel = flight.direction * (flight.speed * dt);
            let midpoint = flight.position + travel * 0.5;
            // 1ティック分の線分を包む球で掃引判定
            let sweep_radius = self.hit_radius + travel.magnitude() * 0.5;
            for victim in spatial.query_radius(midpoint, sweep_radius, None) {
                hits.push(ProjectileHit {
                    projectile: flight.projectile,
                    victim,
                    position: midpoint,
                });
            }
            flight.position = flight.position + travel;
        }
        if !hits.is_empty() {
            trace!(count = hits.len(), "PROJECTILE_CONTACTS");
        }
        hits
    }
}
