//! # Spawner モジュール
//!
//! スポーン領域内の出現位置と、エージェントの一意な表示名を払い出します。
//!
//! - 出現位置は既出の位置から `min_spawn_distance` 以上離れた点を最大
//!   `max_spawn_attempts` 回まで試行し、見つからなければ領域内の任意の点を使います
//! - 表示名は `AI_<n>`（n は `name_min..=name_max` から非復元抽出、枯渇時に補充）

use std::ops::RangeInclusive;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::common::Position3D;

/// 矩形のスポーン領域（XY平面、高さ z）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnArea {
    pub name: String,
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    #[serde(default)]
    pub z: f64,
}

impl SpawnArea {
    pub fn is_valid(&self) -> bool {
        self.x_min <= self.x_max && self.y_min <= self.y_max
    }

    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Position3D {
        Position3D::new(
            sample_range(rng, self.x_min, self.x_max),
            sample_range(rng, self.y_min, self.y_max),
            self.z,
        )
    }
}

fn sample_range<R: Rng + ?Sized>(rng: &mut R, min: f64, max: f64) -> f64 {
    if max > min { rng.gen_range(min..max) } else { min }
}

#[derive(Debug, Clone)]
pub struct Spawner {
    min_spawn_distance: f64,
    max_spawn_attempts: u32,
    name_numbers: RangeInclusive<u32>,
    used_positions: Vec<Position3D>,
    available_names: Vec<u32>,
}

impl Spawner {
    /// # 引数
    ///
    /// * `name_numbers` - 表示名に使う番号の範囲（空の範囲は下限1つに縮めます）
    pub fn new(min_spawn_distance: f64, max_spawn_attempts: u32, name_numbers: RangeInclusive<u32>) -> Self {
        let (min, max) = name_numbers.into_inner();
        let mut spawner = Self {
            min_spawn_distance,
            max_spawn_attempts,
            name_numbers: min..=max.max(min),
            used_positions: Vec::new(),
            available_names: Vec::new(),
        };
        spawner.refill_names();
        spawner
    }

    /// ウェーブ開始時に使用済み位置を忘れる
    pub fn reset_positions(&mut self) {
        self.used_positions.clear();
    }

    /// 既出位置から十分離れた出現位置を選ぶ
    pub fn next_spawn_point<R: Rng + ?Sized>(&mut self, area: &SpawnArea, rng: &mut R) -> Position3D {
        let min_sq = self.min_spawn_distance * self.min_spawn_distance;
        for _ in 0..self.max_spawn_attempts {
            let candidate = area.sample(rng);
            if self
                .used_positions
                .iter()
                .all(|used| used.distance_sq(&candidate) >= min_sq)
            {
                self.used_positions.push(candidate);
                return candidate;
            }
        }

        debug!(area = %area.name, "SPAWN_SPACING_RELAXED: 間隔条件を満たす位置が見つかりませんでした");
        area.sample(rng)
    }

    /// 一意な表示名を払い出す
    pub fn next_name<R: Rng + ?Sized>(&mut self, rng: &mut R) -> String {
        if self.available_names.is_empty() {
            warn!(
                min = *self.name_numbers.start(),
                max = *self.name_numbers.end(),
                "NAME_POOL_REFILLED: 名前番号を使い切ったため補充しました"
            );
            self.refill_names();
        }
        let index = rng.gen_range(0..self.available_names.len());
        let number = self.available_names.swap_remove(index);
        format!("AI_{number}")
    }

    /// 種別をランダムに選ぶ
    pub fn pick_kind<'a, R: Rng + ?Sized>(&self, kinds: &'a [String], rng: &mut R) -> Option<&'a str> {
        if kinds.is_empty() {
            return None;
        }
        Some(kinds[rng.gen_range(0..kinds.len())].as_str())
    }

    pub fn remaining_names(&self) -> usize {
        self.available_names.len()
    }

    fn refill_names(&mut self) {
        self.available_names = self.name_numbers.clone().collect();
    }
}
