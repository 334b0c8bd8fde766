// crates/iso_mesh/src/topo/split_tree.rs

//! 分裂单元树
//!
//! 记录单元的分裂历史，使切分可以被逐级撤销。每个节点保存单元编号、
//! 父节点以及主/从子节点，节点存放在 Arena 中并通过句柄互相引用。
//!
//! # 状态
//!
//! ```text
//! LIVE (叶节点, 在 live 表中)
//!   └─ record_split ─→ SPLIT (有主、从两个子节点, 不在 live 表中)
//!                        └─ merge(主, 从) ─→ LIVE (父节点重新入表)
//!                                         或 删除 (父节点为根)
//! ```
//!
//! 不变式：节点在 live 表中当且仅当它没有子节点。

use std::collections::BTreeMap;
use std::fmt::Write as _;

use iso_foundation::arena::{Arena, ArenaTag, Idx};
use iso_foundation::require;

use crate::error::{MeshError, MeshResult};

/// 分裂树节点标记
#[derive(Debug, Clone, Copy)]
pub struct SplitNodeTag;
impl ArenaTag for SplitNodeTag {}

/// 分裂树节点句柄
pub type SplitNodeId = Idx<SplitNodeTag>;

/// 分裂树节点
#[derive(Debug, Clone, PartialEq)]
pub struct SplitCellNode {
    /// 当前（或最后）对应的单元编号
    pub cell_label: usize,
    /// 父节点
    pub parent: Option<SplitNodeId>,
    /// 主子节点
    pub master: Option<SplitNodeId>,
    /// 从子节点
    pub slave: Option<SplitNodeId>,
}

impl SplitCellNode {
    fn leaf(cell_label: usize, parent: Option<SplitNodeId>) -> Self {
        Self {
            cell_label,
            parent,
            master: None,
            slave: None,
        }
    }

    /// 是否未再细分
    #[inline]
    pub fn is_unrefined(&self) -> bool {
        self.master.is_none() && self.slave.is_none()
    }
}

/// 分裂单元树
#[derive(Debug, Clone, Default)]
pub struct SplitCellTree {
    nodes: Arena<SplitCellNode, SplitNodeTag>,
    live: BTreeMap<usize, SplitNodeId>,
}

impl SplitCellTree {
    /// 创建空树
    pub fn new() -> Self {
        Self::default()
    }

    /// 节点数（含根节点）
    #[inline]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// 获取节点
    #[inline]
    pub fn node(&self, id: SplitNodeId) -> Option<&SplitCellNode> {
        self.nodes.get(id)
    }

    /// 单元对应的活动节点
    #[inline]
    pub fn live_node(&self, cell: usize) -> Option<SplitNodeId> {
        self.live.get(&cell).copied()
    }

    /// 活动单元（升序）
    pub fn live_cells(&self) -> impl Iterator<Item = usize> + '_ {
        self.live.keys().copied()
    }

    /// 是否没有任何活动节点
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    fn get(&self, id: SplitNodeId, cell: usize) -> MeshResult<&SplitCellNode> {
        self.nodes
            .get(id)
            .ok_or_else(|| MeshError::split_tree(cell, format!("节点 {id:?} 已失效")))
    }

    /// 是否为父节点的主子节点
    pub fn is_master(&self, id: SplitNodeId) -> bool {
        self.nodes
            .get(id)
            .and_then(|n| n.parent)
            .and_then(|p| self.nodes.get(p))
            .is_some_and(|p| p.master == Some(id))
    }

    /// 是否未再细分
    pub fn is_unrefined(&self, id: SplitNodeId) -> bool {
        self.nodes.get(id).is_some_and(SplitCellNode::is_unrefined)
    }

    /// 兄弟节点
    pub fn other(&self, id: SplitNodeId) -> Option<SplitNodeId> {
        let parent = self.nodes.get(self.nodes.get(id)?.parent?)?;
        if parent.master == Some(id) {
            parent.slave
        } else if parent.slave == Some(id) {
            parent.master
        } else {
            None
        }
    }

    /// 记录单元 `cell` 分裂出 `added`：`cell` 成为主子节点，`added` 为从子节点
    ///
    /// `cell` 尚不在树中时先为其创建根节点。
    pub fn record_split(&mut self, cell: usize, added: usize) -> MeshResult<()> {
        if cell == added {
            return Err(MeshError::split_tree(cell, "单元不能分裂为自身"));
        }
        if self.live.contains_key(&added) {
            return Err(MeshError::split_tree(added, "新增单元已在活动表中"));
        }
        let parent = match self.live.remove(&cell) {
            Some(id) => id,
            None => self.nodes.insert(SplitCellNode::leaf(cell, None)),
        };
        let master = self.nodes.insert(SplitCellNode::leaf(cell, Some(parent)));
        let slave = self.nodes.insert(SplitCellNode::leaf(added, Some(parent)));
        let node = self
            .nodes
            .get_mut(parent)
            .ok_or_else(|| MeshError::split_tree(cell, "父节点已失效"))?;
        node.master = Some(master);
        node.slave = Some(slave);
        self.live.insert(cell, master);
        self.live.insert(added, slave);
        Ok(())
    }

    /// 活动的主/从单元对（双方均未再细分）
    pub fn added_cells(&self) -> BTreeMap<usize, usize> {
        let mut pairs = BTreeMap::new();
        for (&cell, &id) in &self.live {
            if !self.is_master(id) || !self.is_unrefined(id) {
                continue;
            }
            let Some(other) = self.other(id) else { continue };
            if !self.is_unrefined(other) {
                continue;
            }
            if let Some(node) = self.nodes.get(other) {
                if self.live.get(&node.cell_label) == Some(&other) {
                    pairs.insert(cell, node.cell_label);
                }
            }
        }
        pairs
    }

    /// 检查 `own`、`nbr` 能否合并（同一父节点下的两个活动叶节点）
    pub fn check_merge(&self, own: usize, nbr: usize) -> MeshResult<SplitNodeId> {
        let own_id = require!(self.live_node(own), MeshError::split_tree(own, "不是活动分裂单元"));
        let nbr_id = require!(self.live_node(nbr), MeshError::split_tree(nbr, "不是活动分裂单元"));
        let own_node = self.get(own_id, own)?;
        let nbr_node = self.get(nbr_id, nbr)?;
        if !own_node.is_unrefined() || !nbr_node.is_unrefined() {
            return Err(MeshError::split_tree(own, "单元已被再次细分"));
        }
        let parent = match (own_node.parent, nbr_node.parent) {
            (Some(a), Some(b)) if a == b => a,
            _ => {
                return Err(MeshError::split_tree(
                    own,
                    format!("单元 {own} 与 {nbr} 不属于同一父单元"),
                ))
            }
        };
        if self.is_unrefined(parent) {
            return Err(MeshError::split_tree(own, "父节点未处于分裂状态"));
        }
        Ok(parent)
    }

    /// 合并 `own` 与 `nbr`
    ///
    /// 两个叶节点被删除；父节点若还有父节点则以 `own` 的编号重新成为活动
    /// 节点，否则（根节点）整个删除。
    pub fn merge(&mut self, own: usize, nbr: usize) -> MeshResult<()> {
        let parent = self.check_merge(own, nbr)?;
        for cell in [own, nbr] {
            if let Some(id) = self.live.remove(&cell) {
                self.nodes.remove(id);
            }
        }
        let grand_parent = self.get(parent, own)?.parent;
        if grand_parent.is_some() {
            if let Some(node) = self.nodes.get_mut(parent) {
                node.cell_label = own;
                node.master = None;
                node.slave = None;
            }
            self.live.insert(own, parent);
        } else {
            self.nodes.remove(parent);
        }
        Ok(())
    }

    /// 按旧→新单元映射重新编号，映射为 `None` 的活动节点被删除
    pub fn update_labels(&mut self, reverse_cell_map: &[Option<usize>]) {
        let old = std::mem::take(&mut self.live);
        for (cell, id) in old {
            match reverse_cell_map.get(cell).copied().flatten() {
                Some(new_cell) => {
                    if let Some(node) = self.nodes.get_mut(id) {
                        node.cell_label = new_cell;
                    }
                    self.live.insert(new_cell, id);
                }
                None => {
                    // 叶节点删除后从父节点上摘除
                    let parent = self.nodes.get(id).and_then(|n| n.parent);
                    if let Some(p) = parent.and_then(|p| self.nodes.get_mut(p)) {
                        if p.master == Some(id) {
                            p.master = None;
                        }
                        if p.slave == Some(id) {
                            p.slave = None;
                        }
                    }
                    self.nodes.remove(id);
                }
            }
        }
    }

    /// 树的文本表示，用于调试输出
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let roots = self.nodes.iter().filter(|(_, n)| n.parent.is_none());
        for (id, _) in roots {
            self.describe_node(id, 0, &mut out);
        }
        out
    }

    fn describe_node(&self, id: SplitNodeId, depth: usize, out: &mut String) {
        let Some(node) = self.nodes.get(id) else { return };
        let state = if self.live.get(&node.cell_label) == Some(&id) {
            "live"
        } else if node.is_unrefined() {
            "dead"
        } else {
            "split"
        };
        let _ = writeln!(out, "{:indent$}{} ({state})", "", node.cell_label, indent = depth * 2);
        for child in [node.master, node.slave].into_iter().flatten() {
            self.describe_node(child, depth + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_query() {
        let mut tree = SplitCellTree::new();
        tree.record_split(3, 7).unwrap();
        assert_eq!(tree.n_nodes(), 3);
        assert_eq!(tree.live_cells().collect::<Vec<_>>(), vec![3, 7]);
        let m = tree.live_node(3).unwrap();
        let s = tree.live_node(7).unwrap();
        assert!(tree.is_master(m));
        assert!(!tree.is_master(s));
        assert_eq!(tree.other(m), Some(s));
        assert_eq!(tree.added_cells(), BTreeMap::from([(3, 7)]));
    }

    #[test]
    fn test_nested_split_hides_parent_pair() {
        let mut tree = SplitCellTree::new();
        tree.record_split(0, 1).unwrap();
        tree.record_split(1, 2).unwrap();
        // 0 的兄弟 1 已再细分
        assert_eq!(tree.added_cells(), BTreeMap::from([(1, 2)]));
        assert!(tree.merge(0, 1).is_err());

        tree.merge(1, 2).unwrap();
        assert_eq!(tree.live_cells().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(tree.added_cells(), BTreeMap::from([(0, 1)]));

        tree.merge(0, 1).unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.n_nodes(), 0);
    }

    #[test]
    fn test_merge_requires_common_parent() {
        let mut tree = SplitCellTree::new();
        tree.record_split(0, 2).unwrap();
        tree.record_split(1, 3).unwrap();
        assert!(matches!(tree.merge(0, 3), Err(MeshError::SplitTree { .. })));
        assert!(tree.merge(0, 5).is_err());
    }

    #[test]
    fn test_duplicate_added_cell_rejected() {
        let mut tree = SplitCellTree::new();
        tree.record_split(0, 2).unwrap();
        assert!(tree.record_split(1, 2).is_err());
    }

    #[test]
    fn test_update_labels() {
        let mut tree = SplitCellTree::new();
        tree.record_split(1, 4).unwrap();
        tree.record_split(2, 5).unwrap();
        // 单元 0 被删除, 其余单元编号前移; 单元 5 被删除
        let map = vec![None, Some(0), Some(1), Some(2), Some(3), None];
        tree.update_labels(&map);
        assert_eq!(tree.live_cells().collect::<Vec<_>>(), vec![0, 1, 3]);
        assert_eq!(tree.added_cells(), BTreeMap::from([(0, 3)]));
        let text = tree.describe();
        assert!(text.contains("0 (live)"));
    }
}
