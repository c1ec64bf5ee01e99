//! # Pool モジュール
//!
//! エージェント・投擲物・ネームタグを再利用するための有界オブジェクトプールを提供します。
//!
//! 貸し出し中のインスタンスは `slotmap` の [`SlotMap`] に格納され、払い出しのキーが
//! そのままハンドルになります。返却時はスロットから取り外して待機列へ移すため、
//! スロットのバージョンが進み、古いキーは二度と参照解決されません。
//!
//! ## 容量ポリシー
//!
//! - [`GrowthPolicy::Fixed`]: 容量固定。枯渇時の払い出しは `None`（呼び出し側でスキップ）
//! - [`GrowthPolicy::Grow`]: 枯渇時に要求された条件のインスタンスを生成して追加

use std::fmt;
use std::rc::Rc;

use slotmap::{Key, SlotMap};
use tracing::{debug, trace, warn};

use crate::models::traits::IPoolable;

/// 枯渇時の容量ポリシー
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GrowthPolicy {
    Fixed,
    Grow,
}

/// 有界エンティティプール
///
/// `K` は `slotmap::new_key_type!` で宣言したプール専用のハンドル型です。
pub struct EntityPool<K: Key, T: IPoolable> {
    name: &'static str,
    active: SlotMap<K, T>,
    /// 返却済みで再利用を待つインスタンス（返却順）
    idle: Vec<T>,
    policy: GrowthPolicy,
    factory: Rc<dyn Fn(usize) -> T>,
}

impl<K: Key, T: IPoolable> fmt::Debug for EntityPool<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityPool")
            .field("name", &self.name)
            .field("capacity", &self.capacity())
            .field("active", &self.active_count())
            .field("policy", &self.policy)
            .finish()
    }
}

impl<K: Key, T: IPoolable> EntityPool<K, T> {
    /// 全インスタンスを非アクティブ状態で事前生成してプールを作成
    ///
    /// # 引数
    ///
    /// * `name` - ログ出力用のプール名
    /// * `capacity` - 初期容量
    /// * `policy` - 枯渇時のポリシー
    /// * `factory` - 通し番号からインスタンスを生成する関数
    pub fn new(
        name: &'static str,
        capacity: usize,
        policy: GrowthPolicy,
        factory: impl Fn(usize) -> T + 'static,
    ) -> Self {
        let idle = (0..capacity).map(&factory).collect();

        debug!(pool = name, capacity, policy = ?policy, "POOL_CREATED: プールを作成しました");

        Self {
            name,
            active: SlotMap::with_capacity_and_key(capacity),
            idle,
            policy,
            factory: Rc::new(factory),
        }
    }

    /// 非アクティブなインスタンスを1つ払い出す
    ///
    /// 拡張時はプール生成時の関数でインスタンスを作ります。
    pub fn acquire(&mut self) -> Option<K> {
        let factory = Rc::clone(&self.factory);
        self.acquire_matching_or_insert(|_| true, |serial| factory(serial))
    }

    /// 条件に一致する非アクティブなインスタンスを払い出す
    ///
    /// 一致するものが待機列になければ、`Grow` ポリシーのときに限り `make` で
    /// 新しいインスタンスを作って追加します。`make` には追加後の通し番号が渡されます。
    /// 払い出したインスタンスは `on_acquire` で既定値にリセットされます。
    pub fn acquire_matching_or_insert(
        &mut self,
        mut predicate: impl FnMut(&T) -> bool,
        make: impl FnOnce(usize) -> T,
    ) -> Option<K> {
        let mut item = match self.idle.iter().position(|item| predicate(item)) {
            Some(position) => self.idle.remove(position),
            None if self.policy == GrowthPolicy::Grow => {
                let item = make(self.capacity());
                debug!(pool = self.name, capacity = self.capacity() + 1, "POOL_GROWN: プールを拡張しました");
                item
            }
            None => {
                warn!(
                    pool = self.name,
                    capacity = self.capacity(),
                    "POOL_EXHAUSTED: 利用可能なインスタンスがありません"
                );
                return None;
            }
        };

        item.on_acquire();
        let key = self.active.insert(item);
        trace!(pool = self.name, key = ?key, "POOL_ACQUIRE");
        Some(key)
    }

    /// インスタンスをプールへ返却
    ///
    /// スロットから取り外すため、以降このハンドル（およびそのコピー）は無効になります。
    /// 既に無効なハンドルの場合は何もせず `false` を返します。
    pub fn release(&mut self, key: K) -> bool {
        let Some(mut item) = self.active.remove(key) else {
            trace!(pool = self.name, key = ?key, "POOL_RELEASE_STALE: 無効なハンドルの返却を無視しました");
            return false;
        };
        item.on_release();
        self.idle.push(item);
        trace!(pool = self.name, key = ?key, "POOL_RELEASE");
        true
    }

    /// ハンドルが現在アクティブなインスタンスを指しているか
    pub fn is_active(&self, key: K) -> bool {
        self.active.contains_key(key)
    }

    pub fn get(&self, key: K) -> Option<&T> {
        self.active.get(key)
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        self.active.get_mut(key)
    }

    /// 再利用を待つインスタンス（返却順、診断用）
    pub fn idle(&self) -> impl Iterator<Item = &T> + '_ {
        self.idle.iter()
    }

    /// アクティブなインスタンスのハンドル一覧
    pub fn active_handles(&self) -> Vec<K> {
        self.active.keys().collect()
    }

    pub fn iter_active(&self) -> impl Iterator<Item = (K, &T)> + '_ {
        self.active.iter()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn capacity(&self) -> usize {
        self.active.len() + self.idle.len()
    }

    pub fn policy(&self) -> GrowthPolicy {
        self.policy
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::new_key_type;

    new_key_type! {
        struct TokenKey;
    }

    #[derive(Debug, Default)]
    struct Token {
        kind: u8,
        serial: usize,
        value: u32,
        acquired: u32,
    }

    impl IPoolable for Token {
        fn on_acquire(&mut self) {
            self.value = 0;
            self.acquired += 1;
        }

        fn on_release(&mut self) {
            self.value = 0;
        }
    }

    fn fixed_pool(capacity: usize) -> EntityPool<TokenKey, Token> {
        EntityPool::new("test", capacity, GrowthPolicy::Fixed, |serial| Token {
            kind: (serial % 2) as u8,
            serial,
            ..Token::default()
        })
    }

    #[test]
    fn test_fixed_pool_exhaustion_returns_none() {
        let mut pool = fixed_pool(3);
        let handles: Vec<_> = (0..3).filter_map(|_| pool.acquire()).collect();
        assert_eq!(handles.len(), 3);
        assert!(pool.acquire().is_none());

        let serial = pool.get(handles[1]).unwrap().serial;
        assert!(pool.release(handles[1]));
        let again = pool.acquire().expect("released slot should be reusable");
        assert_ne!(again, handles[1]);
        assert_eq!(pool.get(again).unwrap().serial, serial);
        assert_eq!(pool.get(again).unwrap().acquired, 2);
        assert_eq!(pool.capacity(), 3);
    }

    #[test]
    fn test_release_invalidates_handle_and_resets() {
        let mut pool = fixed_pool(1);
        let handle = pool.acquire().unwrap();
        pool.get_mut(handle).unwrap().value = 42;

        assert!(pool.release(handle));
        assert!(!pool.is_active(handle));
        assert!(pool.get(handle).is_none());
        assert_eq!(pool.idle().next().unwrap().value, 0);

        // 二重返却は無視される
        assert!(!pool.release(handle));
        assert_eq!(pool.idle().count(), 1);
    }

    #[test]
    fn test_stale_handle_does_not_touch_reused_instance() {
        let mut pool = fixed_pool(1);
        let old = pool.acquire().unwrap();
        pool.release(old);
        let new = pool.acquire().unwrap();
        pool.get_mut(new).unwrap().value = 7;

        assert!(pool.get_mut(old).is_none());
        assert!(!pool.release(old));
        assert_eq!(pool.get(new).unwrap().value, 7);
    }

    #[test]
    fn test_acquire_matching_kind() {
        let mut pool = fixed_pool(4);
        let odd = pool.acquire_matching_or_insert(|token| token.kind == 1, |_| unreachable!()).unwrap();
        assert_eq!(pool.get(odd).unwrap().serial, 1);
        let odd2 = pool.acquire_matching_or_insert(|token| token.kind == 1, |_| unreachable!()).unwrap();
        assert_eq!(pool.get(odd2).unwrap().serial, 3);
        assert!(pool.acquire_matching_or_insert(|token| token.kind == 1, |_| unreachable!()).is_none());
        assert_eq!(pool.active_count(), 2);
    }

    #[test]
    fn test_growable_pool_extends_on_exhaustion() {
        let mut pool: EntityPool<TokenKey, Token> =
            EntityPool::new("grow", 1, GrowthPolicy::Grow, |_| Token::default());
        let first = pool.acquire().unwrap();
        let second = pool.acquire().unwrap();
        assert_ne!(first, second);
        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.active_handles(), vec![first, second]);
    }

    #[test]
    fn test_growth_builds_the_requested_kind() {
        let mut pool: EntityPool<TokenKey, Token> = EntityPool::new("grow", 2, GrowthPolicy::Grow, |serial| Token {
            kind: serial as u8,
            serial,
            ..Token::default()
        });
        // 種別1は初期在庫に1つだけ
        let a = pool.acquire_matching_or_insert(|token| token.kind == 1, |_| unreachable!()).unwrap();
        let b = pool
            .acquire_matching_or_insert(
                |token| token.kind == 1,
                |serial| Token {
                    kind: 1,
                    serial,
                    ..Token::default()
                },
            )
            .unwrap();

        assert_ne!(a, b);
        assert_eq!(pool.get(b).unwrap().kind, 1);
        assert_eq!(pool.get(b).unwrap().serial, 2);
        assert_eq!(pool.capacity(), 3);
        assert_eq!(pool.idle().count(), 1);
    }
}
