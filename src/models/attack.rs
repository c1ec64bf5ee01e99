//! 攻撃シーケンス（振りかぶり → 投擲 → 復帰）の進行状態
//!
//! 1体につき同時に1つの攻撃しか進行させません。各攻撃には [`AttackToken`] が
//! 割り当てられ、遅延実行される各ステップは発火時にトークンを照合します。
//! 死亡による中断やキャンセルでトークンは無効化されるため、古いステップは何もしません。

use tracing::trace;

use crate::models::common::Position3D;
use crate::scheduler::TimerId;

/// 攻撃1回分の識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttackToken(u64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttackPhase {
    Ready,
    /// 振りかぶり中（投擲待ち）
    WindUp { token: AttackToken, aim: Position3D },
    /// 投擲済み、状態機械の再開待ち
    Recovering { token: AttackToken },
}

/// 攻撃シーケンスの進行管理
#[derive(Debug, Clone)]
pub struct AttackResolver {
    phase: AttackPhase,
    next_token: u64,
    pending_timer: Option<TimerId>,
    /// 最後に攻撃を開始した時刻（機会攻撃のクールダウン判定用）
    pub last_attack_time: f64,
}

impl Default for AttackResolver {
    fn default() -> Self {
        Self {
            phase: AttackPhase::Ready,
            next_token: 0,
            pending_timer: None,
            last_attack_time: f64::NEG_INFINITY,
        }
    }
}

impl AttackResolver {
    pub fn phase(&self) -> AttackPhase {
        self.phase
    }

    pub fn is_attacking(&self) -> bool {
        !matches!(self.phase, AttackPhase::Ready)
    }

    /// 新しい攻撃を開始する
    ///
    /// 既に攻撃が進行中の場合は `None`（再入ガード）。
    pub fn begin(&mut self, aim: Position3D, now: f64) -> Option<AttackToken> {
        if self.is_attacking() {
            trace!("ATTACK_REENTRY_IGNORED: 攻撃中の再要求を無視しました");
            return None;
        }
        self.next_token += 1;
        let token = AttackToken(self.next_token);
        self.phase = AttackPhase::WindUp { token, aim };
        self.last_attack_time = now;
        Some(token)
    }

    /// 次のステップの遅延実行を記録（キャンセル時に取り消すため）
    pub fn set_pending_timer(&mut self, timer: TimerId) {
        self.pending_timer = Some(timer);
    }

    /// 投擲ステップの発火
    ///
    /// トークンが一致すれば復帰待ちへ遷移し、照準位置を返します。
    pub fn on_hammer_due(&mut self, token: AttackToken) -> Option<Position3D> {
        match self.phase {
            AttackPhase::WindUp { token: current, aim } if current == token => {
                self.phase = AttackPhase::Recovering { token };
                self.pending_timer = None;
                Some(aim)
            }
            _ => None,
        }
    }

    /// 復帰ステップの発火
    ///
    /// トークンが一致すれば攻撃を完了して `true` を返します。
    pub fn on_resume_due(&mut self, token: AttackToken) -> bool {
        match self.phase {
            AttackPhase::Recovering { token: current } if current == token => {
                self.phase = AttackPhase::Ready;
                self.pending_timer = None;
                true
            }
            _ => false,
        }
    }

    /// 進行中の攻撃を破棄し、取り消すべきタイマーを返す
    ///
    /// 死亡時の中断とプレイヤー移動によるキャンセルの両方で使われます。
    pub fn cancel(&mut self) -> Option<TimerId> {
        if !self.is_attacking() {
            return None;
        }
        self.phase = AttackPhase::Ready;
        self.pending_timer.take()
    }

    /// プール返却時の完全リセット（トークン採番は継続する）
    pub fn reset(&mut self) {
        self.phase = AttackPhase::Ready;
        self.pending_timer = None;
        self.last_attack_time = f64::NEG_INFINITY;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reentry_is_ignored() {
        let mut resolver = AttackResolver::default();
        let first = resolver.begin(Position3D::ZERO, 0.0);
        assert!(first.is_some());
        for _ in 0..10 {
            assert!(resolver.begin(Position3D::ZERO, 0.0).is_none());
        }
    }

    #[test]
    fn test_full_sequence() {
        let mut resolver = AttackResolver::default();
        let aim = Position3D::new(1.0, 2.0, 0.0);
        let token = resolver.begin(aim, 0.0).unwrap();
        assert!(!resolver.on_resume_due(token));
        assert_eq!(resolver.on_hammer_due(token), Some(aim));
        assert_eq!(resolver.on_hammer_due(token), None);
        assert!(resolver.on_resume_due(token));
        assert!(!resolver.is_attacking());
    }

    #[test]
    fn test_cancelled_attack_ignores_stale_steps() {
        let mut resolver = AttackResolver::default();
        let token = resolver.begin(Position3D::ZERO, 0.0).unwrap();
        resolver.cancel();
        assert!(resolver.on_hammer_due(token).is_none());

        let next = resolver.begin(Position3D::ZERO, 1.0).unwrap();
        assert_ne!(token, next);
        assert!(resolver.on_hammer_due(token).is_none());
        assert!(resolver.on_hammer_due(next).is_some());
    }
}
