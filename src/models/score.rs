//! プレイヤースコアと試合の進行状況（生存数・勝敗・制限時間）

use std::fmt;

use tracing::{debug, info};

use crate::models::common::PlayerId;

/// 購読の識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScoreListenerId(u64);

/// プレイヤー陣営の共有スコア
///
/// 購読者はプレイヤーIDで登録し、スコアが変化したときに `listeners` の
/// 順で段階スケーリングを受け取ります。死亡したプレイヤーは購読を解除します。
#[derive(Debug, Default)]
pub struct ScoreManager {
    score: i64,
    next_listener: u64,
    listeners: Vec<(ScoreListenerId, PlayerId)>,
}

impl ScoreManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn score(&self) -> i64 {
        self.score
    }

    /// スコアを加算し、加算後のスコアを返す
    pub fn add_score(&mut self, amount: i64) -> i64 {
        self.score += amount;
        debug!(score = self.score, listeners = self.listeners.len(), "SCORE_CHANGED");
        self.score
    }

    pub fn subscribe(&mut self, player: PlayerId) -> ScoreListenerId {
        self.next_listener += 1;
        let id = ScoreListenerId(self.next_listener);
        self.listeners.push((id, player));
        id
    }

    pub fn unsubscribe(&mut self, id: ScoreListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    /// 通知先のプレイヤー（購読順）
    pub fn listeners(&self) -> Vec<PlayerId> {
        self.listeners.iter().map(|(_, player)| *player).collect()
    }
}

/// 試合結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchOutcome {
    #[default]
    InProgress,
    Victory,
    Defeat,
}

impl fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            MatchOutcome::InProgress => "in progress",
            MatchOutcome::Victory => "victory",
            MatchOutcome::Defeat => "defeat",
        };
        f.write_str(text)
    }
}

/// 生存数と勝敗の管理
#[derive(Debug, Clone)]
pub struct MatchState {
    total_alive: u32,
    players_alive: u32,
    ai_dead_count: u32,
    /// 残り時間（None は無制限）
    remaining: Option<f64>,
    outcome: MatchOutcome,
}

impl MatchState {
    /// # 引数
    ///
    /// * `players` - 参加プレイヤー数
    /// * `duration` - 制限時間（秒）。0以下は無制限
    pub fn new(players: u32, duration: f64) -> Self {
        Self {
            total_alive: players,
            players_alive: players,
            ai_dead_count: 0,
            remaining: (duration > 0.0).then_some(duration),
            outcome: MatchOutcome::InProgress,
        }
    }

    pub fn total_alive(&self) -> u32 {
        self.total_alive
    }

    pub fn ai_dead_count(&self) -> u32 {
        self.ai_dead_count
    }

    pub fn remaining(&self) -> Option<f64> {
        self.remaining
    }

    pub fn outcome(&self) -> MatchOutcome {
        self.outcome
    }

    pub fn is_over(&self) -> bool {
        self.outcome != MatchOutcome::InProgress
    }

    /// スポーンしたエージェントを生存数に加える
    pub fn register_agent(&mut self) {
        self.total_alive += 1;
        debug!(alive = self.total_alive, "ALIVE_COUNT");
    }

    /// エージェントの死亡を記録し、勝利条件を判定
    pub fn record_agent_death(&mut self) -> MatchOutcome {
        self.ai_dead_count += 1;
        self.total_alive = self.total_alive.saturating_sub(1);
        debug!(alive = self.total_alive, ai_dead = self.ai_dead_count, "ALIVE_COUNT");

        if self.total_alive <= 1 && !self.is_over() {
            self.finish(if self.players_alive > 0 {
                MatchOutcome::Victory
            } else {
                MatchOutcome::Defeat
            });
        }
        self.outcome
    }

    /// プレイヤーの死亡を記録（全滅で敗北）
    pub fn record_player_death(&mut self) -> MatchOutcome {
        self.players_alive = self.players_alive.saturating_sub(1);
        self.total_alive = self.total_alive.saturating_sub(1);
        if self.players_alive == 0 && !self.is_over() {
            self.finish(MatchOutcome::Defeat);
        }
        self.outcome
    }

    /// 制限時間を進める（時間切れで敗北）
    pub fn tick_countdown(&mut self, dt: f64) -> MatchOutcome {
        if self.is_over() {
            return self.outcome;
        }
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = (*remaining - dt).max(0.0);
            if *remaining <= 0.0 {
                self.finish(MatchOutcome::Defeat);
            }
        }
        self.outcome
    }

    fn finish(&mut self, outcome: MatchOutcome) {
        self.outcome = outcome;
        info!(
            outcome = %outcome,
            alive = self.total_alive,
            ai_dead = self.ai_dead_count,
            "MATCH_OVER: 試合が終了しました"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_listeners_follow_subscriptions() {
        let mut manager = ScoreManager::new();
        let first = manager.subscribe(PlayerId(0));
        manager.subscribe(PlayerId(1));
        assert_eq!(manager.add_score(1), 1);
        assert_eq!(manager.listeners(), vec![PlayerId(0), PlayerId(1)]);

        assert!(manager.unsubscribe(first));
        assert!(!manager.unsubscribe(first));
        assert_eq!(manager.add_score(2), 3);
        assert_eq!(manager.listeners(), vec![PlayerId(1)]);
    }

    #[test]
    fn test_victory_when_last_agent_falls() {
        let mut state = MatchState::new(1, 60.0);
        state.register_agent();
        state.register_agent();
        assert_eq!(state.total_alive(), 3);

        assert_eq!(state.record_agent_death(), MatchOutcome::InProgress);
        assert_eq!(state.record_agent_death(), MatchOutcome::Victory);
        assert_eq!(state.ai_dead_count(), 2);
    }

    #[test]
    fn test_defeat_on_player_death_or_timeout() {
        let mut state = MatchState::new(1, 60.0);
        state.register_agent();
        assert_eq!(state.record_player_death(), MatchOutcome::Defeat);

        let mut timed = MatchState::new(1, 1.0);
        timed.register_agent();
        assert_eq!(timed.tick_countdown(0.6), MatchOutcome::InProgress);
        assert_eq!(timed.tick_countdown(0.6), MatchOutcome::Defeat);
        assert_eq!(timed.remaining(), Some(0.0));
    }

    #[test]
    fn test_unlimited_duration() {
        let mut state = MatchState::new(1, 0.0);
        state.register_agent();
        assert_eq!(state.tick_countdown(1000.0), MatchOutcome::InProgress);
        assert!(state.remaining().is_none());
    }
}
