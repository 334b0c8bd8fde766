// crates/iso_foundation/src/arena.rs

//! 泛型 Arena 内存池
//!
//! 以连续槽位存储同类对象，删除的槽位进入空闲链表供后续插入复用。
//! 分裂单元树的节点通过 [`Idx`] 句柄相互引用（父节点、主/从子节点），
//! 避免共享所有权和引用计数。
//!
//! # 注意事项
//!
//! 本实现不含代际验证：删除后的槽位会被下一次插入复用，旧句柄随之指向
//! 新元素。不要保存已删除元素的句柄；删除节点时必须同时清理所有指向它的
//! 句柄（父节点、兄弟节点中的引用）。
//!
//! # 示例
//!
//! ```
//! use iso_foundation::arena::{Arena, ArenaTag};
//!
//! #[derive(Debug, Clone, Copy)]
//! struct SplitTag;
//! impl ArenaTag for SplitTag {}
//!
//! let mut arena: Arena<&str, SplitTag> = Arena::new();
//! let idx = arena.insert("root");
//! assert_eq!(arena.remove(idx), Some("root"));
//! assert_eq!(arena.get(idx), None);
//!
//! // 复用槽位
//! let again = arena.insert("child");
//! assert_eq!(again.index(), idx.index());
//! ```

use std::fmt;
use std::marker::PhantomData;

// ============================================================================
// 标记类型与句柄
// ============================================================================

/// Arena 标记 trait，用于区分不同用途的 Arena
pub trait ArenaTag: 'static + Copy + Send + Sync {}

/// 轻量级类型安全句柄（4 字节）
///
/// `PhantomData<fn() -> Tag>` 使句柄对任意 `Tag` 都是 `Copy + Send + Sync`。
#[repr(transparent)]
pub struct Idx<Tag> {
    index: u32,
    _marker: PhantomData<fn() -> Tag>,
}

impl<Tag> Copy for Idx<Tag> {}

impl<Tag> Clone for Idx<Tag> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<Tag> PartialEq for Idx<Tag> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<Tag> Eq for Idx<Tag> {}

impl<Tag> std::hash::Hash for Idx<Tag> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<Tag> PartialOrd for Idx<Tag> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<Tag> Ord for Idx<Tag> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.index.cmp(&other.index)
    }
}

impl<Tag> fmt::Debug for Idx<Tag> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Idx({})", self.index)
    }
}

impl<Tag> Idx<Tag> {
    #[inline]
    const fn new(index: u32) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    /// 槽位号
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }
}

// ============================================================================
// Arena
// ============================================================================

#[derive(Debug, Clone)]
enum Slot<T> {
    Occupied(T),
    Vacant { next_free: Option<u32> },
}

/// 泛型内存池
///
/// 插入与删除均为 O(1)（均摊），遍历顺序为槽位顺序。
#[derive(Clone)]
pub struct Arena<T, Tag: ArenaTag> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
    _marker: PhantomData<Tag>,
}

impl<T, Tag: ArenaTag> Default for Arena<T, Tag> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug, Tag: ArenaTag> fmt::Debug for Arena<T, Tag> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<T, Tag: ArenaTag> Arena<T, Tag> {
    /// 创建空 Arena
    #[inline]
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
            _marker: PhantomData,
        }
    }

    /// 有效元素数量
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// 是否为空
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 插入元素并返回句柄，优先复用空闲槽位
    pub fn insert(&mut self, value: T) -> Idx<Tag> {
        if let Some(free) = self.free_head {
            if let Some(slot) = self.slots.get_mut(free as usize) {
                if let Slot::Vacant { next_free } = *slot {
                    self.free_head = next_free;
                    *slot = Slot::Occupied(value);
                    self.len += 1;
                    return Idx::new(free);
                }
            }
            // 空闲链表损坏时放弃复用，退化为追加
            self.free_head = None;
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied(value));
        self.len += 1;
        Idx::new(index)
    }

    /// 获取元素的不可变引用
    #[inline]
    pub fn get(&self, idx: Idx<Tag>) -> Option<&T> {
        match self.slots.get(idx.index as usize) {
            Some(Slot::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    /// 获取元素的可变引用
    #[inline]
    pub fn get_mut(&mut self, idx: Idx<Tag>) -> Option<&mut T> {
        match self.slots.get_mut(idx.index as usize) {
            Some(Slot::Occupied(value)) => Some(value),
            _ => None,
        }
    }

    /// 删除元素并返回其值
    pub fn remove(&mut self, idx: Idx<Tag>) -> Option<T> {
        let slot = self.slots.get_mut(idx.index as usize)?;
        if let Slot::Vacant { .. } = slot {
            return None;
        }
        let slot = std::mem::replace(
            slot,
            Slot::Vacant {
                next_free: self.free_head,
            },
        );
        self.free_head = Some(idx.index());
        self.len -= 1;
        match slot {
            Slot::Occupied(value) => Some(value),
            Slot::Vacant { .. } => None,
        }
    }

    /// 按槽位顺序遍历 `(句柄, 元素)`
    pub fn iter(&self) -> impl Iterator<Item = (Idx<Tag>, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| match slot {
                Slot::Occupied(value) => Some((Idx::new(i as u32), value)),
                Slot::Vacant { .. } => None,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy)]
    struct TestTag;
    impl ArenaTag for TestTag {}

    #[test]
    fn test_insert_get_remove() {
        let mut arena: Arena<i32, TestTag> = Arena::new();
        let a = arena.insert(1);
        let b = arena.insert(2);
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.get(a), Some(&1));
        assert_eq!(arena.remove(b), Some(2));
        assert_eq!(arena.get(b), None);
        assert_eq!(arena.remove(b), None);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_slot_reuse() {
        let mut arena: Arena<i32, TestTag> = Arena::new();
        let a = arena.insert(1);
        let _b = arena.insert(2);
        arena.remove(a);
        let c = arena.insert(3);
        assert_eq!(c.index(), a.index());
        // 旧句柄指向新元素
        assert_eq!(arena.get(a), Some(&3));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_iter_skips_vacant() {
        let mut arena: Arena<i32, TestTag> = Arena::new();
        let ids: Vec<_> = (0..5).map(|v| arena.insert(v)).collect();
        arena.remove(ids[1]);
        arena.remove(ids[3]);
        let values: Vec<i32> = arena.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![0, 2, 4]);
    }

    #[test]
    fn test_handle_past_end() {
        let mut arena: Arena<i32, TestTag> = Arena::new();
        let a = arena.insert(1);
        let other: Arena<i32, TestTag> = Arena::new();
        assert!(other.get(a).is_none());
        assert_eq!(format!("{a:?}"), "Idx(0)");
        assert_eq!(arena.remove(a), Some(1));
        assert!(arena.is_empty());
    }

    #[test]
    fn test_get_mut() {
        let mut arena: Arena<i32, TestTag> = Arena::new();
        let a = arena.insert(1);
        if let Some(v) = arena.get_mut(a) {
            *v = 10;
        }
        assert_eq!(arena.get(a), Some(&10));
    }
}
