// crates/iso_mesh/src/poly_mesh.rs

//! 任意多面体网格
//!
//! 面列表按"内部面在前、边界面按补丁连续排列"的约定存储：
//!
//! ```text
//! faces:  [0 .. n_internal)          内部面，owner < neighbour
//!         [start_p .. start_p+size_p) 第 p 个边界补丁
//! ```
//!
//! 面法向按顶点顺序右手定则确定，从 owner 指向 neighbour（边界面指向域外）。
//! 构造时一次性计算面形心/面积矢量、单元形心/体积以及单元-面、单元-点、
//! 点-单元连接关系，之后网格在一个时间步内只读。

use std::path::Path;

use glam::DVec3;
use iso_foundation::ensure;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::{MeshError, MeshResult};
use crate::geometry::{polygon_centre_and_area, pyramid_centre_and_volume};

/// 面顶点坐标的短列表
pub type FacePoints = SmallVec<[DVec3; 8]>;

// ============================================================================
// 边界补丁
// ============================================================================

/// 边界补丁类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatchKind {
    /// 固壁
    Wall,
    /// 一般边界（进出口）
    Patch,
    /// 二维计算的空补丁，不存储场值
    Empty,
    /// 与其他分区相邻的处理器补丁
    Processor {
        /// 相邻分区号
        neighbour_rank: usize,
    },
}

impl PatchKind {
    /// 是否为空补丁
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// 处理器补丁的相邻分区号
    #[inline]
    pub fn neighbour_rank(&self) -> Option<usize> {
        match self {
            Self::Processor { neighbour_rank } => Some(*neighbour_rank),
            _ => None,
        }
    }
}

/// 边界补丁：连续的一段边界面
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryPatch {
    /// 补丁名称
    pub name: String,
    /// 补丁类型
    pub kind: PatchKind,
    /// 第一个面的全局编号
    pub start: usize,
    /// 面数
    pub size: usize,
}

impl BoundaryPatch {
    /// 创建补丁
    pub fn new(name: impl Into<String>, kind: PatchKind, start: usize, size: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            start,
            size,
        }
    }

    /// 全局面编号范围
    #[inline]
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.size
    }

    /// 是否包含面
    #[inline]
    pub fn contains(&self, face: usize) -> bool {
        self.range().contains(&face)
    }

    /// 是否为处理器补丁
    #[inline]
    pub fn is_processor(&self) -> bool {
        self.kind.neighbour_rank().is_some()
    }
}

// ============================================================================
// 原始数据（序列化格式）
// ============================================================================

/// 网格原始数据，用于序列化和构造
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolyMeshData {
    /// 点坐标
    pub points: Vec<DVec3>,
    /// 面顶点列表
    pub faces: Vec<Vec<usize>>,
    /// 面所属单元
    pub owner: Vec<usize>,
    /// 内部面相邻单元
    pub neighbour: Vec<usize>,
    /// 边界补丁
    pub patches: Vec<BoundaryPatch>,
}

// ============================================================================
// PolyMesh
// ============================================================================

/// 任意多面体有限体积网格
#[derive(Debug, Clone)]
pub struct PolyMesh {
    points: Vec<DVec3>,
    faces: Vec<Vec<usize>>,
    owner: Vec<usize>,
    neighbour: Vec<usize>,
    patches: Vec<BoundaryPatch>,

    n_cells: usize,
    cell_faces: Vec<Vec<usize>>,
    cell_points: Vec<Vec<usize>>,
    point_cells: Vec<Vec<usize>>,

    face_centres: Vec<DVec3>,
    face_areas: Vec<DVec3>,
    cell_centres: Vec<DVec3>,
    cell_volumes: Vec<f64>,
}

impl PolyMesh {
    /// 由原始拓扑构造网格并校验
    ///
    /// # 错误
    ///
    /// - 面顶点不足三个或越界
    /// - owner/neighbour 长度与面数不符，或内部面两侧为同一单元
    /// - 补丁未连续覆盖全部边界面
    /// - 单元不闭合或体积非正（面朝向错误）
    pub fn new(
        points: Vec<DVec3>,
        faces: Vec<Vec<usize>>,
        owner: Vec<usize>,
        neighbour: Vec<usize>,
        patches: Vec<BoundaryPatch>,
    ) -> MeshResult<Self> {
        let n_points = points.len();
        let n_faces = faces.len();
        let n_internal = neighbour.len();

        ensure!(
            owner.len() == n_faces,
            MeshError::topology(
                "PolyMesh::new",
                format!("owner 长度 {} 与面数 {} 不符", owner.len(), n_faces),
            )
        );
        ensure!(
            n_internal <= n_faces,
            MeshError::topology("PolyMesh::new", format!("neighbour 长度 {n_internal} 超过面数 {n_faces}"))
        );

        for (f, face) in faces.iter().enumerate() {
            ensure!(
                face.len() >= 3,
                MeshError::topology("PolyMesh::new", format!("面 {f} 只有 {} 个顶点", face.len()))
            );
            for &p in face {
                MeshError::check_index("point", p, n_points)?;
            }
        }

        for (f, &nbr) in neighbour.iter().enumerate() {
            ensure!(
                nbr != owner[f],
                MeshError::topology("PolyMesh::new", format!("内部面 {f} 两侧为同一单元 {nbr}"))
            );
        }

        let mut next_start = n_internal;
        for patch in &patches {
            if patch.start != next_start {
                return Err(MeshError::topology(
                    "PolyMesh::new",
                    format!(
                        "补丁 {} 起始面 {} 与期望 {} 不符",
                        patch.name, patch.start, next_start
                    ),
                ));
            }
            next_start += patch.size;
        }
        if next_start != n_faces {
            return Err(MeshError::topology(
                "PolyMesh::new",
                format!("补丁覆盖到面 {next_start}, 总面数 {n_faces}"),
            ));
        }

        let n_cells = owner
            .iter()
            .chain(neighbour.iter())
            .copied()
            .max()
            .map_or(0, |m| m + 1);

        let mut cell_faces = vec![Vec::new(); n_cells];
        for (f, &o) in owner.iter().enumerate() {
            cell_faces[o].push(f);
        }
        for (f, &n) in neighbour.iter().enumerate() {
            cell_faces[n].push(f);
        }
        for cf in &mut cell_faces {
            cf.sort_unstable();
        }
        if let Some(c) = cell_faces.iter().position(|cf| cf.len() < 4) {
            return Err(MeshError::topology(
                "PolyMesh::new",
                format!("单元 {c} 只有 {} 个面", cell_faces[c].len()),
            ));
        }

        let mut cell_points = Vec::with_capacity(n_cells);
        for cf in &cell_faces {
            let mut pts: Vec<usize> = cf.iter().flat_map(|&f| faces[f].iter().copied()).collect();
            pts.sort_unstable();
            pts.dedup();
            cell_points.push(pts);
        }

        let mut point_cells = vec![Vec::new(); n_points];
        for (c, pts) in cell_points.iter().enumerate() {
            for &p in pts {
                point_cells[p].push(c);
            }
        }

        let mut mesh = Self {
            points,
            faces,
            owner,
            neighbour,
            patches,
            n_cells,
            cell_faces,
            cell_points,
            point_cells,
            face_centres: Vec::new(),
            face_areas: Vec::new(),
            cell_centres: Vec::new(),
            cell_volumes: Vec::new(),
        };
        mesh.compute_geometry();
        mesh.check_closed()?;
        Ok(mesh)
    }

    /// 由原始数据构造
    pub fn from_data(data: PolyMeshData) -> MeshResult<Self> {
        Self::new(
            data.points,
            data.faces,
            data.owner,
            data.neighbour,
            data.patches,
        )
    }

    /// 导出原始数据
    pub fn to_data(&self) -> PolyMeshData {
        PolyMeshData {
            points: self.points.clone(),
            faces: self.faces.clone(),
            owner: self.owner.clone(),
            neighbour: self.neighbour.clone(),
            patches: self.patches.clone(),
        }
    }

    /// 从 JSON 文件加载
    pub fn from_json_file(path: impl AsRef<Path>) -> MeshResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let data: PolyMeshData = serde_json::from_str(&content)?;
        Self::from_data(data)
    }

    /// 保存为 JSON 文件
    pub fn save_json(&self, path: impl AsRef<Path>) -> MeshResult<()> {
        let content = serde_json::to_string(&self.to_data())?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    fn compute_geometry(&mut self) {
        let (centres, areas): (Vec<DVec3>, Vec<DVec3>) = self
            .faces
            .iter()
            .map(|face| {
                let pts: FacePoints = face.iter().map(|&p| self.points[p]).collect();
                polygon_centre_and_area(&pts)
            })
            .unzip();
        self.face_centres = centres;
        self.face_areas = areas;

        let mut cell_centres = Vec::with_capacity(self.n_cells);
        let mut cell_volumes = Vec::with_capacity(self.n_cells);
        for c in 0..self.n_cells {
            let faces = self.cell_faces[c].iter().map(|&f| {
                let s = if self.owner[f] == c {
                    self.face_areas[f]
                } else {
                    -self.face_areas[f]
                };
                (self.face_centres[f], s)
            });
            let (centre, volume) = pyramid_centre_and_volume(faces);
            cell_centres.push(centre);
            cell_volumes.push(volume);
        }
        self.cell_centres = cell_centres;
        self.cell_volumes = cell_volumes;
    }

    fn check_closed(&self) -> MeshResult<()> {
        for c in 0..self.n_cells {
            let mut sum = DVec3::ZERO;
            let mut mag = 0.0;
            for &f in &self.cell_faces[c] {
                let s = self.face_areas[f];
                sum += if self.owner[f] == c { s } else { -s };
                mag += s.length();
            }
            if sum.length() > 1e-6 * mag {
                return Err(MeshError::topology(
                    "PolyMesh::check_closed",
                    format!("单元 {c} 不闭合, |ΣS| = {:.3e}, Σ|S| = {:.3e}", sum.length(), mag),
                ));
            }
            if self.cell_volumes[c] <= 0.0 {
                return Err(MeshError::topology(
                    "PolyMesh::check_closed",
                    format!("单元 {c} 体积非正 ({:.3e}), 面朝向错误", self.cell_volumes[c]),
                ));
            }
        }
        Ok(())
    }

    // ========================================================================
    // 尺寸
    // ========================================================================

    /// 点数
    #[inline]
    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    /// 面数
    #[inline]
    pub fn n_faces(&self) -> usize {
        self.faces.len()
    }

    /// 内部面数
    #[inline]
    pub fn n_internal_faces(&self) -> usize {
        self.neighbour.len()
    }

    /// 单元数
    #[inline]
    pub fn n_cells(&self) -> usize {
        self.n_cells
    }

    /// 补丁数
    #[inline]
    pub fn n_patches(&self) -> usize {
        self.patches.len()
    }

    // ========================================================================
    // 拓扑
    // ========================================================================

    /// 全部点坐标
    #[inline]
    pub fn points(&self) -> &[DVec3] {
        &self.points
    }

    /// 全部面
    #[inline]
    pub fn faces(&self) -> &[Vec<usize>] {
        &self.faces
    }

    /// 面顶点编号
    #[inline]
    pub fn face(&self, face: usize) -> &[usize] {
        &self.faces[face]
    }

    /// 面顶点坐标
    pub fn face_points(&self, face: usize) -> FacePoints {
        self.faces[face].iter().map(|&p| self.points[p]).collect()
    }

    /// owner 数组
    #[inline]
    pub fn owner(&self) -> &[usize] {
        &self.owner
    }

    /// neighbour 数组（仅内部面）
    #[inline]
    pub fn neighbour(&self) -> &[usize] {
        &self.neighbour
    }

    /// 面所属单元
    #[inline]
    pub fn face_owner(&self, face: usize) -> usize {
        self.owner[face]
    }

    /// 面相邻单元，边界面返回 `None`
    #[inline]
    pub fn face_neighbour(&self, face: usize) -> Option<usize> {
        self.neighbour.get(face).copied()
    }

    /// 是否为内部面
    #[inline]
    pub fn is_internal_face(&self, face: usize) -> bool {
        face < self.neighbour.len()
    }

    /// 全部补丁
    #[inline]
    pub fn patches(&self) -> &[BoundaryPatch] {
        &self.patches
    }

    /// 补丁
    #[inline]
    pub fn patch(&self, patch: usize) -> &BoundaryPatch {
        &self.patches[patch]
    }

    /// 边界面所在补丁，内部面或越界面返回 `None`
    pub fn which_patch(&self, face: usize) -> Option<usize> {
        if face < self.n_internal_faces() || face >= self.n_faces() {
            return None;
        }
        // 补丁按起始面有序
        let idx = self.patches.partition_point(|p| p.start + p.size <= face);
        (idx < self.patches.len() && self.patches[idx].contains(face)).then_some(idx)
    }

    /// 按名称查找补丁
    pub fn find_patch(&self, name: &str) -> Option<usize> {
        self.patches.iter().position(|p| p.name == name)
    }

    /// 单元的面
    #[inline]
    pub fn cell_faces(&self, cell: usize) -> &[usize] {
        &self.cell_faces[cell]
    }

    /// 单元的顶点
    #[inline]
    pub fn cell_points(&self, cell: usize) -> &[usize] {
        &self.cell_points[cell]
    }

    /// 点的相邻单元
    #[inline]
    pub fn point_cells(&self, point: usize) -> &[usize] {
        &self.point_cells[point]
    }

    /// 通过内部面相邻的单元
    pub fn cell_cells(&self, cell: usize) -> impl Iterator<Item = usize> + '_ {
        self.cell_faces[cell].iter().filter_map(move |&f| {
            let nbr = self.face_neighbour(f)?;
            Some(if self.owner[f] == cell { nbr } else { self.owner[f] })
        })
    }

    /// 两个单元的公共面
    pub fn shared_face(&self, a: usize, b: usize) -> Option<usize> {
        self.cell_faces[a].iter().copied().find(|&f| {
            self.face_neighbour(f)
                .is_some_and(|n| (self.owner[f] == a && n == b) || (self.owner[f] == b && n == a))
        })
    }

    // ========================================================================
    // 几何
    // ========================================================================

    /// 面形心
    #[inline]
    pub fn face_centre(&self, face: usize) -> DVec3 {
        self.face_centres[face]
    }

    /// 面积矢量（owner → neighbour）
    #[inline]
    pub fn face_area(&self, face: usize) -> DVec3 {
        self.face_areas[face]
    }

    /// 面积大小
    #[inline]
    pub fn face_mag_area(&self, face: usize) -> f64 {
        self.face_areas[face].length()
    }

    /// 面积矢量数组
    #[inline]
    pub fn face_areas(&self) -> &[DVec3] {
        &self.face_areas
    }

    /// 单元形心
    #[inline]
    pub fn cell_centre(&self, cell: usize) -> DVec3 {
        self.cell_centres[cell]
    }

    /// 单元形心数组
    #[inline]
    pub fn cell_centres(&self) -> &[DVec3] {
        &self.cell_centres
    }

    /// 单元体积
    #[inline]
    pub fn cell_volume(&self, cell: usize) -> f64 {
        self.cell_volumes[cell]
    }

    /// 单元体积数组
    #[inline]
    pub fn cell_volumes(&self) -> &[f64] {
        &self.cell_volumes
    }

    /// 总体积
    pub fn total_volume(&self) -> f64 {
        self.cell_volumes.iter().sum()
    }

    /// 单元特征长度（体积立方根）
    #[inline]
    pub fn cell_length(&self, cell: usize) -> f64 {
        self.cell_volumes[cell].cbrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::{unit_cube, BlockMeshBuilder};

    #[test]
    fn test_unit_cube_geometry() {
        let mesh = unit_cube().unwrap();
        assert_eq!(mesh.n_cells(), 1);
        assert_eq!(mesh.n_faces(), 6);
        assert_eq!(mesh.n_internal_faces(), 0);
        assert!((mesh.cell_volume(0) - 1.0).abs() < 1e-12);
        assert!((mesh.cell_centre(0) - DVec3::splat(0.5)).length() < 1e-12);
        for f in 0..6 {
            let outward = mesh.face_centre(f) - mesh.cell_centre(0);
            assert!(mesh.face_area(f).dot(outward) > 0.0);
        }
    }

    #[test]
    fn test_which_patch() {
        let mesh = BlockMeshBuilder::new(2, 1, 1).build().unwrap();
        assert_eq!(mesh.which_patch(0), None);
        for f in mesh.n_internal_faces()..mesh.n_faces() {
            let p = mesh.which_patch(f).unwrap();
            assert!(mesh.patch(p).contains(f));
        }
        assert_eq!(mesh.which_patch(mesh.n_faces()), None);
    }

    #[test]
    fn test_shared_face_and_neighbours() {
        let mesh = BlockMeshBuilder::new(3, 1, 1).build().unwrap();
        let f = mesh.shared_face(0, 1).unwrap();
        assert!(mesh.is_internal_face(f));
        assert_eq!(mesh.shared_face(0, 2), None);
        let nbrs: Vec<usize> = mesh.cell_cells(1).collect();
        assert_eq!(nbrs.len(), 2);
    }

    #[test]
    fn test_rejects_bad_patches() {
        let data = unit_cube().unwrap().to_data();
        let mut bad = data.clone();
        bad.patches[0].size -= 1;
        assert!(PolyMesh::from_data(bad).is_err());
    }

    #[test]
    fn test_rejects_inverted_face() {
        let mut data = unit_cube().unwrap().to_data();
        data.faces[0].reverse();
        assert!(matches!(
            PolyMesh::from_data(data),
            Err(MeshError::InvalidTopology { .. })
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let mesh = BlockMeshBuilder::new(2, 2, 1).build().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.json");
        mesh.save_json(&path).unwrap();
        let loaded = PolyMesh::from_json_file(&path).unwrap();
        assert_eq!(loaded.n_cells(), mesh.n_cells());
        assert!((loaded.total_volume() - mesh.total_volume()).abs() < 1e-12);
    }
}
