//! 明示的な購読/購読解除で管理するオブザーバ登録簿
//!
//! 発生源（エージェント等）のプールハンドルをキーに、`slotmap` の [`SecondaryMap`] で
//! リスナを保持します。購読の解除は発生源の返却処理が責任を持って行い、
//! 解除漏れは `subscription_count` で検出できます。

use slotmap::{Key, SecondaryMap};

/// 購読の識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug)]
pub struct ObserverRegistry<S: Key, L> {
    next_id: u64,
    by_source: SecondaryMap<S, Vec<(SubscriptionId, L)>>,
}

impl<S: Key, L> Default for ObserverRegistry<S, L> {
    fn default() -> Self {
        Self {
            next_id: 0,
            by_source: SecondaryMap::new(),
        }
    }
}

impl<S: Key, L: Copy> ObserverRegistry<S, L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 発生源にリスナを登録
    ///
    /// 発生源のハンドルが既に無効（より新しい世代が登録済み）の場合は `None`。
    pub fn subscribe(&mut self, source: S, listener: L) -> Option<SubscriptionId> {
        let listeners = self.by_source.entry(source)?.or_insert_with(Vec::new);
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        listeners.push((id, listener));
        Some(id)
    }

    /// 購読を解除し、解除したリスナを返す
    pub fn unsubscribe(&mut self, source: S, id: SubscriptionId) -> Option<L> {
        let listeners = self.by_source.get_mut(source)?;
        let position = listeners.iter().position(|(sub, _)| *sub == id)?;
        let (_, listener) = listeners.remove(position);
        if listeners.is_empty() {
            self.by_source.remove(source);
        }
        Some(listener)
    }

    /// 発生源に登録されているリスナのコピー
    pub fn listeners(&self, source: S) -> Vec<L> {
        self.by_source
            .get(source)
            .map(|listeners| listeners.iter().map(|(_, listener)| *listener).collect())
            .unwrap_or_default()
    }

    /// 全発生源の購読数の合計
    pub fn subscription_count(&self) -> usize {
        self.by_source.values().map(Vec::len).sum()
    }
}
