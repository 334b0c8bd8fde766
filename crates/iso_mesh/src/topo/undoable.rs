// crates/iso_mesh/src/topo/undoable.rs

//! 可撤销的网格切分器
//!
//! 在 [`MeshCutter`] 之上维护 [`SplitCellTree`]，使平面切分可以通过删除
//! 主/从单元之间的切口面逐级撤销。

use std::collections::BTreeMap;

use iso_foundation::GeometricTolerance;
use serde::{Deserialize, Serialize};

use crate::error::{MeshError, MeshResult};
use crate::poly_mesh::PolyMesh;
use crate::topo::cutter::{CellCut, MeshCutter, SplitResult};
use crate::topo::map::MeshMap;
use crate::topo::remover::FaceRemover;
use crate::topo::split_tree::SplitCellTree;

/// 切分器配置
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeshCutterConfig {
    /// 是否记录分裂历史
    #[serde(default = "default_undoable")]
    pub undoable: bool,
    /// 撤销时允许合并的面法向最大夹角 [度]
    #[serde(default = "default_merge_angle")]
    pub merge_angle_deg: f64,
    /// 几何容差
    #[serde(default)]
    pub tolerance: GeometricTolerance,
}

fn default_undoable() -> bool {
    true
}

fn default_merge_angle() -> f64 {
    30.0
}

impl Default for MeshCutterConfig {
    fn default() -> Self {
        Self {
            undoable: default_undoable(),
            merge_angle_deg: default_merge_angle(),
            tolerance: GeometricTolerance::default(),
        }
    }
}

/// 撤销结果
#[derive(Debug, Clone)]
pub struct MergeResult {
    /// 新网格
    pub mesh: PolyMesh,
    /// 旧网格到新网格的映射
    pub map: MeshMap,
}

/// 可撤销网格切分器
#[derive(Debug, Clone)]
pub struct UndoableMeshCutter {
    undoable: bool,
    cutter: MeshCutter,
    remover: FaceRemover,
    tree: SplitCellTree,
}

impl Default for UndoableMeshCutter {
    fn default() -> Self {
        Self::new(MeshCutterConfig::default())
    }
}

impl UndoableMeshCutter {
    /// 创建切分器
    pub fn new(config: MeshCutterConfig) -> Self {
        Self {
            undoable: config.undoable,
            cutter: MeshCutter::new(config.tolerance),
            remover: FaceRemover::new(config.merge_angle_deg),
            tree: SplitCellTree::new(),
        }
    }

    /// 是否开启撤销
    #[inline]
    pub fn undoable(&self) -> bool {
        self.undoable
    }

    /// 分裂单元树
    #[inline]
    pub fn tree(&self) -> &SplitCellTree {
        &self.tree
    }

    /// 切分单元并记录分裂历史
    ///
    /// 已记录的活动单元先按映射重新编号（平面切分不改变已有单元编号），
    /// 再为每个被切单元登记主/从子节点。
    pub fn set_refinement(&mut self, mesh: &PolyMesh, cuts: &[CellCut]) -> MeshResult<SplitResult> {
        let result = self.cutter.split_cells(mesh, cuts)?;
        if self.undoable {
            self.tree.update_labels(&result.map.reverse_cell_map);
            for (&master, &slave) in &result.added_cells {
                self.tree.record_split(master, slave)?;
            }
            log::debug!("分裂单元树:\n{}", self.tree.describe());
        }
        Ok(result)
    }

    /// 外部拓扑变化后重新编号
    pub fn update_mesh(&mut self, map: &MeshMap) {
        if self.undoable {
            self.tree.update_labels(&map.reverse_cell_map);
        }
    }

    /// 活动主/从单元对之间的切口面
    pub fn get_split_faces(&self, mesh: &PolyMesh) -> MeshResult<Vec<usize>> {
        if !self.undoable {
            return Err(MeshError::NotUndoable {
                operation: "get_split_faces",
            });
        }
        let mut faces = Vec::new();
        for (master, slave) in self.tree.added_cells() {
            MeshError::check_index("cell", master.max(slave), mesh.n_cells())?;
            let face = mesh.shared_face(master, slave).ok_or_else(|| {
                MeshError::split_tree(master, format!("与从单元 {slave} 之间没有公共面"))
            })?;
            faces.push(face);
        }
        Ok(faces)
    }

    /// 活动主单元 → 从单元
    pub fn get_added_cells(&self) -> MeshResult<BTreeMap<usize, usize>> {
        if !self.undoable {
            return Err(MeshError::NotUndoable {
                operation: "get_added_cells",
            });
        }
        Ok(self.tree.added_cells())
    }

    /// 删除切口面，合并主/从单元
    ///
    /// 每个面两侧必须是同一父单元下两个未再细分的活动单元。合并后的单元
    /// 取较小编号（owner）。
    pub fn remove_split_faces(&mut self, mesh: &PolyMesh, split_faces: &[usize]) -> MeshResult<MergeResult> {
        if !self.undoable {
            return Err(MeshError::NotUndoable {
                operation: "remove_split_faces",
            });
        }

        for &f in split_faces {
            MeshError::check_index("face", f, mesh.n_faces())?;
            let nbr = mesh.face_neighbour(f).ok_or_else(|| {
                MeshError::topology("remove_split_faces", format!("面 {f} 为边界面"))
            })?;
            self.tree.check_merge(mesh.face_owner(f), nbr)?;
        }

        let removes = self.remover.compatible_removes(mesh, split_faces)?;
        if removes.faces.len() != split_faces.len() {
            return Err(MeshError::IncompatibleRemoval {
                requested: split_faces.len(),
                required: removes.faces.len(),
            });
        }

        let (new_mesh, map) = self.remover.remove_faces(mesh, split_faces)?;

        for &f in split_faces {
            if let Some(nbr) = mesh.face_neighbour(f) {
                self.tree.merge(mesh.face_owner(f), nbr)?;
            }
        }
        self.tree.update_labels(&map.reverse_cell_map);
        log::debug!("撤销 {} 个切分, 分裂单元树:\n{}", split_faces.len(), self.tree.describe());

        Ok(MergeResult { mesh: new_mesh, map })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::BlockMeshBuilder;
    use glam::DVec3;

    #[test]
    fn test_not_undoable() {
        let mesh = BlockMeshBuilder::new(1, 1, 1).build().unwrap();
        let mut cutter = UndoableMeshCutter::new(MeshCutterConfig {
            undoable: false,
            ..Default::default()
        });
        let result = cutter
            .set_refinement(&mesh, &[CellCut::new(0, DVec3::splat(0.5), DVec3::Z)])
            .unwrap();
        assert_eq!(result.mesh.n_cells(), 2);
        assert!(matches!(cutter.get_added_cells(), Err(MeshError::NotUndoable { .. })));
        assert!(matches!(
            cutter.get_split_faces(&result.mesh),
            Err(MeshError::NotUndoable { .. })
        ));
        assert!(cutter.remove_split_faces(&result.mesh, &[0]).is_err());
    }

    #[test]
    fn test_reject_non_split_face() {
        let mesh = BlockMeshBuilder::new(2, 1, 1).build().unwrap();
        let mut cutter = UndoableMeshCutter::default();
        let result = cutter
            .set_refinement(&mesh, &[CellCut::new(0, DVec3::new(0.25, 0.0, 0.0), DVec3::X)])
            .unwrap();
        // 单元 1 从未被切分
        let f = result.mesh.shared_face(1, 2).unwrap();
        assert!(matches!(
            cutter.remove_split_faces(&result.mesh, &[f]),
            Err(MeshError::SplitTree { .. })
        ));
    }

    #[test]
    fn test_config_json() {
        let config: MeshCutterConfig = serde_json::from_str(r#"{"undoable": false}"#).unwrap();
        assert!(!config.undoable);
        assert!((config.merge_angle_deg - 30.0).abs() < 1e-12);
    }
}
