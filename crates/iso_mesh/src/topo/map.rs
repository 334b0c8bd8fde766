// crates/iso_mesh/src/topo/map.rs

//! 拓扑变化映射
//!
//! 记录一次拓扑变化前后单元、面、点编号的对应关系，供分裂单元树重新编号
//! 和场量重映射使用。

use crate::poly_mesh::PolyMesh;

/// 拓扑变化映射
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshMap {
    /// 新单元 → 来源旧单元（分裂得到的单元只有一个来源，合并得到的单元有多个）
    pub cell_sources: Vec<Vec<usize>>,
    /// 旧单元 → 新单元，被合并删除的单元为 `None`
    pub reverse_cell_map: Vec<Option<usize>>,
    /// 新面 → 旧面，新增面为 `None`
    pub face_map: Vec<Option<usize>>,
    /// 旧面 → 新面，删除的面为 `None`
    pub reverse_face_map: Vec<Option<usize>>,
    /// 新点 → 旧点，新增点为 `None`
    pub point_map: Vec<Option<usize>>,
    /// 旧点 → 新点，删除的点为 `None`
    pub reverse_point_map: Vec<Option<usize>>,
}

impl MeshMap {
    /// 恒等映射
    pub fn identity(mesh: &PolyMesh) -> Self {
        let ids = |n: usize| (0..n).map(Some).collect::<Vec<_>>();
        Self {
            cell_sources: (0..mesh.n_cells()).map(|c| vec![c]).collect(),
            reverse_cell_map: ids(mesh.n_cells()),
            face_map: ids(mesh.n_faces()),
            reverse_face_map: ids(mesh.n_faces()),
            point_map: ids(mesh.n_points()),
            reverse_point_map: ids(mesh.n_points()),
        }
    }

    /// 变化后单元数
    #[inline]
    pub fn n_cells(&self) -> usize {
        self.cell_sources.len()
    }

    /// 变化前单元数
    #[inline]
    pub fn n_old_cells(&self) -> usize {
        self.reverse_cell_map.len()
    }

    /// 旧单元的新编号
    #[inline]
    pub fn new_cell(&self, old: usize) -> Option<usize> {
        self.reverse_cell_map.get(old).copied().flatten()
    }

    /// 新增单元（来源单元已映射到其他新单元）
    pub fn added_cells(&self) -> Vec<usize> {
        self.cell_sources
            .iter()
            .enumerate()
            .filter(|(c, sources)| {
                sources
                    .first()
                    .is_some_and(|&s| self.new_cell(s) != Some(*c))
                    && sources.len() == 1
            })
            .map(|(c, _)| c)
            .collect()
    }

    /// 复合映射：先应用 `self`，再应用 `next`
    pub fn then(&self, next: &MeshMap) -> MeshMap {
        let cell_sources = next
            .cell_sources
            .iter()
            .map(|mid| {
                let mut sources: Vec<usize> = mid
                    .iter()
                    .flat_map(|&m| self.cell_sources.get(m).into_iter().flatten().copied())
                    .collect();
                sources.sort_unstable();
                sources.dedup();
                sources
            })
            .collect();

        let chain_forward = |first: &[Option<usize>], second: &[Option<usize>]| -> Vec<Option<usize>> {
            first
                .iter()
                .map(|m| m.and_then(|m| second.get(m).copied().flatten()))
                .collect()
        };

        MeshMap {
            cell_sources,
            reverse_cell_map: chain_forward(&self.reverse_cell_map, &next.reverse_cell_map),
            face_map: chain_forward(&next.face_map, &self.face_map),
            reverse_face_map: chain_forward(&self.reverse_face_map, &next.reverse_face_map),
            point_map: chain_forward(&next.point_map, &self.point_map),
            reverse_point_map: chain_forward(&self.reverse_point_map, &next.reverse_point_map),
        }
    }

    /// 按映射重排单元场：单来源直接复制，多来源按旧单元体积加权平均
    pub fn map_cell_field(&self, old_values: &[f64], old_volumes: &[f64]) -> Vec<f64> {
        self.cell_sources
            .iter()
            .map(|sources| match sources.as_slice() {
                [] => 0.0,
                [single] => old_values.get(*single).copied().unwrap_or(0.0),
                many => {
                    let (sum, vol) = many.iter().fold((0.0, 0.0), |(s, v), &o| {
                        let vo = old_volumes.get(o).copied().unwrap_or(0.0);
                        (s + old_values.get(o).copied().unwrap_or(0.0) * vo, v + vo)
                    });
                    if vol > 0.0 {
                        sum / vol
                    } else {
                        0.0
                    }
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_map() -> MeshMap {
        // 2 个单元 → 单元 0 分裂出单元 2
        MeshMap {
            cell_sources: vec![vec![0], vec![1], vec![0]],
            reverse_cell_map: vec![Some(0), Some(1)],
            ..Default::default()
        }
    }

    fn merge_map() -> MeshMap {
        // 3 个单元 → 单元 2 合并入单元 0
        MeshMap {
            cell_sources: vec![vec![0, 2], vec![1]],
            reverse_cell_map: vec![Some(0), Some(1), None],
            ..Default::default()
        }
    }

    #[test]
    fn test_added_cells() {
        assert_eq!(split_map().added_cells(), vec![2]);
        assert!(merge_map().added_cells().is_empty());
    }

    #[test]
    fn test_compose_split_then_merge() {
        let total = split_map().then(&merge_map());
        assert_eq!(total.cell_sources, vec![vec![0], vec![1]]);
        assert_eq!(total.reverse_cell_map, vec![Some(0), Some(1)]);
    }

    #[test]
    fn test_map_cell_field() {
        let split = split_map().map_cell_field(&[0.3, 0.7], &[1.0, 1.0]);
        assert_eq!(split, vec![0.3, 0.7, 0.3]);

        let merged = merge_map().map_cell_field(&[1.0, 0.5, 0.0], &[1.0, 2.0, 3.0]);
        assert!((merged[0] - 0.25).abs() < 1e-12);
        assert_eq!(merged[1], 0.5);
    }
}
