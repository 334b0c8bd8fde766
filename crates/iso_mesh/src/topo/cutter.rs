// crates/iso_mesh/src/topo/cutter.rs

//! 平面切分单元
//!
//! 用平面把凸多面体单元一分为二：平面负侧保留原单元编号（主单元），
//! 正侧成为新单元（从单元）。被平面穿过的边插入新点，所有使用这些边的面
//! （包括相邻单元的面）都插入该点以保持网格协调；单元上被穿过的面
//! 拆成两部分，切口多边形成为主、从单元之间的新内部面。

use std::collections::BTreeMap;

use glam::DVec3;
use iso_foundation::GeometricTolerance;
use serde::{Deserialize, Serialize};

use crate::error::{MeshError, MeshResult};
use crate::geometry::sort_around;
use crate::poly_mesh::PolyMesh;
use crate::topo::change::{FaceRecord, TopoChange};
use crate::topo::map::MeshMap;

/// 单元切分平面
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellCut {
    /// 被切单元
    pub cell: usize,
    /// 平面上一点
    pub point: DVec3,
    /// 平面法向（指向从单元一侧）
    pub normal: DVec3,
}

impl CellCut {
    /// 创建切分平面
    pub fn new(cell: usize, point: DVec3, normal: DVec3) -> Self {
        Self {
            cell,
            point,
            normal,
        }
    }
}

/// 切分结果
#[derive(Debug, Clone)]
pub struct SplitResult {
    /// 新网格
    pub mesh: PolyMesh,
    /// 旧网格到新网格的映射
    pub map: MeshMap,
    /// 主单元 → 从单元（新网格编号）
    pub added_cells: BTreeMap<usize, usize>,
}

/// 平面单元切分器
#[derive(Debug, Clone, Default)]
pub struct MeshCutter {
    tolerance: GeometricTolerance,
}

impl MeshCutter {
    /// 创建切分器
    pub fn new(tolerance: GeometricTolerance) -> Self {
        Self { tolerance }
    }

    /// 依次切分多个单元
    ///
    /// 切分不改变已有单元编号，新单元追加在末尾，因此 `cuts` 中的单元编号
    /// 在整个过程中保持有效。每个单元最多出现一次。
    pub fn split_cells(&self, mesh: &PolyMesh, cuts: &[CellCut]) -> MeshResult<SplitResult> {
        let mut seen = std::collections::BTreeSet::new();
        for cut in cuts {
            MeshError::check_index("cell", cut.cell, mesh.n_cells())?;
            if !seen.insert(cut.cell) {
                return Err(MeshError::degenerate_cut(cut.cell, "单元重复出现在切分列表中"));
            }
        }

        let mut current = mesh.clone();
        let mut total = MeshMap::identity(mesh);
        let mut added_cells = BTreeMap::new();
        for cut in cuts {
            let (next, map, slave) = self.split_cell(&current, cut)?;
            total = total.then(&map);
            added_cells.insert(cut.cell, slave);
            current = next;
        }
        Ok(SplitResult {
            mesh: current,
            map: total,
            added_cells,
        })
    }

    /// 切分单个单元，返回新网格、映射和从单元编号
    pub fn split_cell(&self, mesh: &PolyMesh, cut: &CellCut) -> MeshResult<(PolyMesh, MeshMap, usize)> {
        let c = cut.cell;
        MeshError::check_index("cell", c, mesh.n_cells())?;
        let normal = cut.normal.normalize_or_zero();
        if normal == DVec3::ZERO {
            return Err(MeshError::degenerate_cut(c, "切分平面法向为零"));
        }

        let snap = self.tolerance.snap_distance(mesh.cell_length(c));
        let distance = |p: usize| (mesh.points()[p] - cut.point).dot(normal);

        let mut has_below = false;
        let mut has_above = false;
        for &p in mesh.cell_points(c) {
            let d = distance(p);
            if d.abs() < snap {
                return Err(MeshError::degenerate_cut(c, format!("平面穿过顶点 {p}")));
            }
            has_below |= d < 0.0;
            has_above |= d > 0.0;
        }
        if !(has_below && has_above) {
            return Err(MeshError::degenerate_cut(c, "平面未穿过单元"));
        }

        let mut change = TopoChange::from_mesh(mesh);

        // 被穿过的边 → 新点
        let mut edge_points: BTreeMap<(usize, usize), usize> = BTreeMap::new();
        for &f in mesh.cell_faces(c) {
            let face = mesh.face(f);
            let n = face.len();
            for i in 0..n {
                let (a, b) = (face[i], face[(i + 1) % n]);
                let (da, db) = (distance(a), distance(b));
                if da * db < 0.0 {
                    let key = (a.min(b), a.max(b));
                    if !edge_points.contains_key(&key) {
                        let t = da / (da - db);
                        let x = mesh.points()[a] + t * (mesh.points()[b] - mesh.points()[a]);
                        edge_points.insert(key, change.add_point(x));
                    }
                }
            }
        }
        let is_new = |p: usize| p >= mesh.n_points();

        let slave = change.add_cell(c);

        for f in 0..mesh.n_faces() {
            let face = mesh.face(f);
            let n = face.len();
            let mut points = Vec::with_capacity(n + 2);
            let mut inserted = false;
            for i in 0..n {
                let (a, b) = (face[i], face[(i + 1) % n]);
                points.push(a);
                if let Some(&m) = edge_points.get(&(a.min(b), a.max(b))) {
                    points.push(m);
                    inserted = true;
                }
            }

            let Some(record) = change.face(f).cloned() else {
                continue;
            };
            if !record.touches(c) {
                if inserted {
                    change.modify_face(f, FaceRecord { points, ..record })?;
                }
                continue;
            }

            let side = |p: usize| if is_new(p) { 0.0 } else { distance(p) };
            let below: Vec<usize> = points.iter().copied().filter(|&p| side(p) <= 0.0).collect();
            let above: Vec<usize> = points.iter().copied().filter(|&p| side(p) >= 0.0).collect();
            let n_new = points.iter().filter(|&&p| is_new(p)).count();
            let all_below = points.iter().all(|&p| side(p) <= 0.0);
            let all_above = points.iter().all(|&p| side(p) >= 0.0);

            if all_below {
                change.modify_face(f, FaceRecord { points, ..record })?;
            } else if all_above {
                let mut moved = FaceRecord { points, ..record };
                moved.replace_cell(c, slave);
                change.modify_face(f, moved)?;
            } else {
                if n_new != 2 {
                    return Err(MeshError::degenerate_cut(
                        c,
                        format!("面 {f} 被穿过 {n_new} 次, 单元非凸"),
                    ));
                }
                let mut upper = FaceRecord {
                    points: above,
                    ..record.clone()
                };
                upper.replace_cell(c, slave);
                change.modify_face(f, FaceRecord { points: below, ..record })?;
                change.add_face(upper);
            }
        }

        // 切口面: 法向沿平面法向，从主单元指向从单元
        let cut_points: Vec<usize> = edge_points.values().copied().collect();
        if cut_points.len() < 3 {
            return Err(MeshError::degenerate_cut(c, "切口少于三个点"));
        }
        let coords: Vec<DVec3> = cut_points.iter().map(|&p| change.point(p)).collect();
        let order = sort_around(&coords, normal);
        change.add_face(FaceRecord {
            points: order.into_iter().map(|i| cut_points[i]).collect(),
            owner: c,
            neighbour: Some(slave),
            patch: None,
        });

        let (new_mesh, map) = change.build()?;
        log::debug!(
            "单元 {c} 被平面切分为 {c} (体积 {:.4e}) 和 {slave} (体积 {:.4e})",
            new_mesh.cell_volume(c),
            new_mesh.cell_volume(slave)
        );
        Ok((new_mesh, map, slave))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{unit_cube, BlockMeshBuilder};

    #[test]
    fn test_split_unit_cube() {
        let mesh = unit_cube().unwrap();
        let cutter = MeshCutter::default();
        let (split, map, slave) = cutter
            .split_cell(&mesh, &CellCut::new(0, DVec3::new(0.3, 0.5, 0.5), DVec3::X))
            .unwrap();
        assert_eq!(slave, 1);
        assert_eq!(split.n_cells(), 2);
        assert_eq!(split.n_internal_faces(), 1);
        // 4 个侧面各拆成两部分
        assert_eq!(split.n_faces(), 6 + 4 + 1);
        assert_eq!(split.n_points(), 12);
        assert!((split.cell_volume(0) - 0.3).abs() < 1e-12);
        assert!((split.cell_volume(1) - 0.7).abs() < 1e-12);
        assert!(split.face_area(0).x > 0.0);
        assert_eq!(map.cell_sources, vec![vec![0], vec![0]]);
    }

    #[test]
    fn test_split_inserts_points_into_neighbour_faces() {
        let mesh = BlockMeshBuilder::new(2, 2, 1).build().unwrap();
        let cutter = MeshCutter::default();
        let (split, _, slave) = cutter
            .split_cell(&mesh, &CellCut::new(0, DVec3::new(0.25, 0.2, 0.5), DVec3::X))
            .unwrap();
        assert_eq!(slave, 4);
        assert!((split.total_volume() - 1.0).abs() < 1e-12);
        assert!((split.cell_volume(0) - 0.125).abs() < 1e-12);
        // y=0.5 的公共面被拆成两半
        let shared = split.shared_face(2, slave).unwrap();
        assert_eq!(split.face(shared).len(), 4);
        let f_02 = split.shared_face(0, 2).unwrap();
        assert_eq!(split.face(f_02).len(), 4);
        // 单元 2 的 zmin 面只共享被切的边, 插入一个新点
        let zmin = split.find_patch("zmin").unwrap();
        let f = split
            .patch(zmin)
            .range()
            .find(|&f| split.face_owner(f) == 2)
            .unwrap();
        assert_eq!(split.face(f).len(), 5);
    }

    #[test]
    fn test_oblique_split_volumes() {
        let mesh = unit_cube().unwrap();
        let cutter = MeshCutter::default();
        let normal = DVec3::new(1.0, 1.0, 0.0);
        let (split, _, slave) = cutter
            .split_cell(&mesh, &CellCut::new(0, DVec3::new(0.5, 0.25, 0.0), normal))
            .unwrap();
        // 平面 x + y = 0.75 以下部分为三棱柱, 体积 0.75²/2
        assert!((split.cell_volume(0) - 0.28125).abs() < 1e-12);
        assert!((split.cell_volume(slave) - 0.71875).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_cuts() {
        let mesh = unit_cube().unwrap();
        let cutter = MeshCutter::default();
        assert!(matches!(
            cutter.split_cell(&mesh, &CellCut::new(0, DVec3::new(2.0, 0.0, 0.0), DVec3::X)),
            Err(MeshError::DegenerateCut { .. })
        ));
        assert!(matches!(
            cutter.split_cell(&mesh, &CellCut::new(0, DVec3::ZERO, DVec3::X)),
            Err(MeshError::DegenerateCut { .. })
        ));
        assert!(cutter.split_cell(&mesh, &CellCut::new(3, DVec3::ZERO, DVec3::X)).is_err());
    }

    #[test]
    fn test_split_cells_sequential() {
        let mesh = BlockMeshBuilder::new(2, 1, 1).build().unwrap();
        let cutter = MeshCutter::default();
        let result = cutter
            .split_cells(
                &mesh,
                &[
                    CellCut::new(0, DVec3::new(0.25, 0.0, 0.0), DVec3::X),
                    CellCut::new(1, DVec3::new(0.0, 0.0, 0.3), DVec3::Z),
                ],
            )
            .unwrap();
        assert_eq!(result.mesh.n_cells(), 4);
        assert_eq!(result.added_cells.get(&0), Some(&2));
        assert_eq!(result.added_cells.get(&1), Some(&3));
        assert_eq!(result.map.cell_sources, vec![vec![0], vec![1], vec![0], vec![1]]);
        assert!((result.mesh.total_volume() - 1.0).abs() < 1e-12);
    }
}
