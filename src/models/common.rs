use std::ops::{Add, Mul, Sub};

use crate::models::agent::AgentHandle;

/// 3次元位置（方向ベクトルとしても使用）
///
/// アリーナは z 軸を上方向とし、移動・照準は XY 平面で行います。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position3D {
    pub const ZERO: Position3D = Position3D { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// 3次元距離の二乗（範囲判定用、平方根を取らない）
    pub fn distance_sq(&self, other: &Position3D) -> f64 {
        (self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2)
    }

    /// 3次元距離
    pub fn distance_3d(&self, other: &Position3D) -> f64 {
        self.distance_sq(other).sqrt()
    }

    /// XY平面での2次元距離
    pub fn distance_xy(&self, other: &Position3D) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// ベクトルの長さ
    pub fn magnitude(&self) -> f64 {
        (self.x.powi(2) + self.y.powi(2) + self.z.powi(2)).sqrt()
    }

    /// 正規化（長さ0の場合はゼロベクトルを返す）
    pub fn normalize(&self) -> Self {
        let mag = self.magnitude();
        if mag > 1e-9 {
            Self::new(self.x / mag, self.y / mag, self.z / mag)
        } else {
            Self::ZERO
        }
    }

    /// z成分を落としたXY平面上のベクトル
    pub fn flat(&self) -> Self {
        Self::new(self.x, self.y, 0.0)
    }

    pub fn is_zero(&self) -> bool {
        self.magnitude() <= 1e-9
    }
}

impl Add for Position3D {
    type Output = Self;

    fn add(self, other: Self) -> Self::Output {
        Self::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl Sub for Position3D {
    type Output = Self;

    fn sub(self, other: Self) -> Self::Output {
        Self::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

impl Mul<f64> for Position3D {
    type Output = Self;

    fn mul(self, scalar: f64) -> Self::Output {
        Self::new(self.x * scalar, self.y * scalar, self.z * scalar)
    }
}

/// エージェントの行動状態
///
/// `Dead` は終端状態で、プールへの返却と再スポーンによってのみ `Idle` に戻ります。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentState {
    #[default]
    Idle,
    Move,
    Attack,
    Dead,
}

/// エンティティのタグ（空間クエリのフィルタと撃破の帰属に使用）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityTag {
    Player,
    Ai,
    /// 死亡したエージェントはタグを外され、探索対象から除外される
    Untagged,
}

impl EntityTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityTag::Player => "Player",
            EntityTag::Ai => "AI",
            EntityTag::Untagged => "Untagged",
        }
    }
}

/// プレイヤーの識別子（プレイヤーはプールされない）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub u32);

/// 戦闘エンティティへの弱参照
///
/// エージェントへの参照は世代付きハンドルなので、プールに返却された後は
/// 参照解決に失敗し「消滅済み」として扱われます。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Player(PlayerId),
    Agent(AgentHandle),
}

impl EntityRef {
    pub fn as_agent(&self) -> Option<AgentHandle> {
        match self {
            EntityRef::Agent(handle) => Some(*handle),
            EntityRef::Player(_) => None,
        }
    }

    pub fn as_player(&self) -> Option<PlayerId> {
        match self {
            EntityRef::Player(id) => Some(*id),
            EntityRef::Agent(_) => None,
        }
    }
}

/// アニメーションパラメータ名
pub mod anim {
    pub const ATTACK: &str = "Attack";
    pub const RUNNING: &str = "Running";
    pub const DEATH: &str = "Death";
}

/// 数学ユーティリティ関数
pub mod math_utils {
    use super::Position3D;

    /// 角度を-180度〜180度の範囲に正規化
    pub fn normalize_angle(angle_deg: f64) -> f64 {
        let mut normalized = angle_deg % 360.0;
        if normalized > 180.0 {
            normalized -= 360.0;
        } else if normalized <= -180.0 {
            normalized += 360.0;
        }
        normalized
    }

    /// 2つの角度の差を計算（-180度〜180度の範囲）
    pub fn angle_difference(from_deg: f64, to_deg: f64) -> f64 {
        normalize_angle(to_deg - from_deg)
    }

    /// XY平面の方向ベクトルからヨー角（度）を計算
    ///
    /// +Y を 0度、+X を 90度とする（時計回り）。
    pub fn yaw_from_direction(direction: &Position3D) -> Option<f64> {
        if direction.x.abs() < 1e-9 && direction.y.abs() < 1e-9 {
            return None;
        }
        Some(direction.x.atan2(direction.y).to_degrees())
    }

    /// ヨー角（度）からXY平面の前方単位ベクトルを計算
    pub fn forward_from_yaw(yaw_deg: f64) -> Position3D {
        let rad = yaw_deg.to_radians();
        Position3D::new(rad.sin(), rad.cos(), 0.0)
    }

    /// 最大回転量で制限しながら現在角を目標角へ近づける
    pub fn rotate_towards(current_deg: f64, target_deg: f64, max_delta_deg: f64) -> f64 {
        let delta = angle_difference(current_deg, target_deg);
        if delta.abs() <= max_delta_deg {
            normalize_angle(target_deg)
        } else {
            normalize_angle(current_deg + delta.signum() * max_delta_deg)
        }
    }

    /// 前方ベクトルと目標方向のなす角（度、0〜180）
    pub fn angle_between(a: &Position3D, b: &Position3D) -> f64 {
        let a = a.normalize();
        let b = b.normalize();
        if a.is_zero() || b.is_zero() {
            return 0.0;
        }
        let dot = (a.x * b.x + a.y * b.y + a.z * b.z).clamp(-1.0, 1.0);
        dot.acos().to_degrees()
    }
}

#[cfg(test)]
mod tests {
    use super::math_utils::*;
    use super::*;

    #[test]
    fn test_distance_sq_matches_distance() {
        let a = Position3D::new(0.0, 0.0, 0.0);
        let b = Position3D::new(3.0, 4.0, 0.0);
        assert_eq!(a.distance_sq(&b), 25.0);
        assert_eq!(a.distance_3d(&b), 5.0);
    }

    #[test]
    fn test_rotate_towards_is_capped() {
        assert_eq!(rotate_towards(0.0, 90.0, 30.0), 30.0);
        assert_eq!(rotate_towards(0.0, -90.0, 30.0), -30.0);
        assert_eq!(rotate_towards(170.0, -170.0, 30.0), -170.0);
        assert_eq!(rotate_towards(10.0, 20.0, 30.0), 20.0);
    }

    #[test]
    fn test_yaw_roundtrip_axes() {
        let east = Position3D::new(1.0, 0.0, 0.0);
        assert_eq!(yaw_from_direction(&east), Some(90.0));
        assert!(yaw_from_direction(&Position3D::ZERO).is_none());
        let forward = forward_from_yaw(0.0);
        assert!((forward.y - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_angle_between() {
        let a = Position3D::new(0.0, 1.0, 0.0);
        let b = Position3D::new(1.0, 0.0, 0.0);
        assert!((angle_between(&a, &b) - 90.0).abs() < 1e-9);
    }
}
