use slotmap::new_key_type;

use crate::models::traits::IPoolable;

new_key_type! {
    /// ネームタグプールのハンドル
    pub struct NameTagHandle;
}

/// エージェントの頭上に表示される名前とスコア
///
/// アタッチ中はエージェントと1対1で対応し、デタッチ時に既定値へ戻してからプールへ返します。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NameTag {
    pub name: String,
    pub score: u32,
}

impl NameTag {
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_score(&mut self, score: u32) {
        self.score = score;
    }

    pub fn reset(&mut self) {
        self.name.clear();
        self.score = 0;
    }

    pub fn is_default(&self) -> bool {
        self.name.is_empty() && self.score == 0
    }
}

impl IPoolable for NameTag {
    fn on_acquire(&mut self) {
        self.reset();
    }

    fn on_release(&mut self) {
        self.reset();
    }
}
