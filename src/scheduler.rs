//! # Scheduler モジュール
//!
//! シングルスレッドのティックループ上で動作する、時間指定の継続（コールバック）キューです。
//!
//! 「D秒後にこの処理を再開する」という要求をブロックせずに登録し、ティックごとに
//! 期限を迎えたものを登録順に取り出します。登録された継続は [`TimerId`] で
//! 取り消せます。継続のペイロード自体も世代付きハンドルを持つため、取り消し漏れが
//! あっても発火時に古さを検出して無視できます。

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

/// 浮動小数点の時刻累積誤差を吸収する許容幅（秒）
const DUE_EPSILON: f64 = 1e-9;

/// 登録済み継続の識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug)]
struct Scheduled<C> {
    due: f64,
    seq: u64,
    payload: C,
}

impl<C> PartialEq for Scheduled<C> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<C> Eq for Scheduled<C> {}

impl<C> PartialOrd for Scheduled<C> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<C> Ord for Scheduled<C> {
    // BinaryHeap は最大ヒープなので、期限が早く登録順が古いものを「大きい」とする
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .total_cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// 時間指定継続のキュー
#[derive(Debug)]
pub struct Scheduler<C> {
    now: f64,
    next_seq: u64,
    queue: BinaryHeap<Scheduled<C>>,
    pending: HashSet<u64>,
}

impl<C> Default for Scheduler<C> {
    fn default() -> Self {
        Self {
            now: 0.0,
            next_seq: 0,
            queue: BinaryHeap::new(),
            pending: HashSet::new(),
        }
    }
}

impl<C> Scheduler<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 現在のスケジューラ時刻（秒）
    pub fn now(&self) -> f64 {
        self.now
    }

    /// `delay` 秒後に発火する継続を登録
    pub fn schedule_after(&mut self, delay: f64, payload: C) -> TimerId {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Scheduled {
            due: self.now + delay.max(0.0),
            seq,
            payload,
        });
        self.pending.insert(seq);
        TimerId(seq)
    }

    /// 未発火の継続を取り消す
    ///
    /// 既に発火済み・取り消し済みの場合は `false`。
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.pending.remove(&id.0)
    }

    pub fn is_pending(&self, id: TimerId) -> bool {
        self.pending.contains(&id.0)
    }

    /// 時刻を進める（巻き戻しはしない）
    pub fn advance_to(&mut self, time: f64) {
        if time > self.now {
            self.now = time;
        }
    }

    /// 現在時刻までに期限を迎えた継続を1つ取り出す
    pub fn pop_due(&mut self) -> Option<(TimerId, C)> {
        while let Some(head) = self.queue.peek() {
            if head.due > self.now + DUE_EPSILON {
                return None;
            }
            let Some(entry) = self.queue.pop() else {
                return None;
            };
            if self.pending.remove(&entry.seq) {
                return Some((TimerId(entry.seq), entry.payload));
            }
        }
        None
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fires_in_due_then_insertion_order() {
        let mut scheduler = Scheduler::new();
        scheduler.schedule_after(1.0, "late");
        scheduler.schedule_after(0.5, "first");
        scheduler.schedule_after(0.5, "second");

        scheduler.advance_to(0.4);
        assert!(scheduler.pop_due().is_none());

        scheduler.advance_to(1.0);
        let fired: Vec<_> = std::iter::from_fn(|| scheduler.pop_due().map(|(_, p)| p)).collect();
        assert_eq!(fired, vec!["first", "second", "late"]);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let mut scheduler = Scheduler::new();
        let id = scheduler.schedule_after(0.5, 1);
        scheduler.schedule_after(0.5, 2);
        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));

        scheduler.advance_to(2.0);
        assert_eq!(scheduler.pop_due().map(|(_, p)| p), Some(2));
        assert!(scheduler.pop_due().is_none());
    }

    #[test]
    fn test_schedule_is_relative_to_now() {
        let mut scheduler = Scheduler::new();
        scheduler.advance_to(10.0);
        let id = scheduler.schedule_after(0.25, ());
        scheduler.advance_to(10.2);
        assert!(scheduler.pop_due().is_none());
        assert!(scheduler.is_pending(id));
        scheduler.advance_to(10.25);
        assert!(scheduler.pop_due().is_some());
    }
}
