//! # Leaderboard モジュール
//!
//! 名前付きエンティティのスコアを集計し、降順に並べて上位N件に切り詰め、
//! 変更のたびに購読者へ順位表のスナップショットを通知します。
//!
//! エントリは最初のスコア更新で生成され、切り詰め以外で削除されることはありません。
//! 名前の一意性は呼び出し側の責任です。

use std::fmt;

use tracing::debug;

/// 順位表の1行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub name: String,
    pub score: i64,
}

impl LeaderboardEntry {
    pub fn new(name: impl Into<String>, score: i64) -> Self {
        Self {
            name: name.into(),
            score,
        }
    }
}

/// 購読の識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&[LeaderboardEntry])>;

/// スコア集計と順位表
pub struct ScoreLeaderboard {
    entries: Vec<LeaderboardEntry>,
    max_entries: usize,
    next_listener: u64,
    listeners: Vec<(ListenerId, Listener)>,
}

impl fmt::Debug for ScoreLeaderboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScoreLeaderboard")
            .field("entries", &self.entries)
            .field("max_entries", &self.max_entries)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl ScoreLeaderboard {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_entries,
            next_listener: 0,
            listeners: Vec::new(),
        }
    }

    /// スコアを加算（エントリがなければ作成）
    ///
    /// 降順に安定ソートし、上限件数に切り詰めてから購読者へ通知します。
    pub fn update_score(&mut self, name: &str, delta: i64) {
        match self.entries.iter_mut().find(|entry| entry.name == name) {
            Some(entry) => entry.score += delta,
            None => self.entries.push(LeaderboardEntry::new(name, delta)),
        }

        self.rank();
        debug!(name, delta, total = self.score_of(name), "LEADERBOARD_UPDATE");
        self.notify();
    }

    /// 順位表を丸ごと置き換える
    pub fn replace_all(&mut self, entries: Vec<LeaderboardEntry>) {
        self.entries = entries;
        self.rank();
        self.notify();
    }

    /// 現在の順位表のコピー
    pub fn get_top(&self) -> Vec<LeaderboardEntry> {
        self.entries.clone()
    }

    /// 順位表に残っている場合のスコア
    pub fn score_of(&self, name: &str) -> Option<i64> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.score)
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&[LeaderboardEntry]) + 'static) -> ListenerId {
        self.next_listener += 1;
        let id = ListenerId(self.next_listener);
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    fn rank(&mut self) {
        // sort_by は安定ソート: 同点は先着順を保つ
        self.entries.sort_by(|a, b| b.score.cmp(&a.score));
        self.entries.truncate(self.max_entries);
    }

    fn notify(&mut self) {
        let snapshot = &self.entries;
        for (_, listener) in self.listeners.iter_mut() {
            listener(snapshot);
        }
    }
}
