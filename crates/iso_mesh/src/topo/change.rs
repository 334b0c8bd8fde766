// crates/iso_mesh/src/topo/change.rs

//! 网格拓扑变化引擎
//!
//! 以旧网格为起点记录增删改操作，最后一次性生成新网格和编号映射。
//! 生成时：
//!
//! 1. 删除的单元被压缩，剩余单元保持原有相对顺序
//! 2. 内部面规范为 owner < neighbour（必要时翻转顶点顺序）并按
//!    `(owner, neighbour)` 排序，边界面按补丁连续排列
//! 3. 不再被任何面引用的点被删除
//!
//! 平面切分、面删除合并都建立在这一引擎之上。

use std::collections::HashMap;

use glam::DVec3;

use crate::error::{MeshError, MeshResult};
use crate::poly_mesh::{BoundaryPatch, PatchKind, PolyMesh};
use crate::topo::map::MeshMap;

/// 面记录
#[derive(Debug, Clone, PartialEq)]
pub struct FaceRecord {
    /// 顶点编号
    pub points: Vec<usize>,
    /// 所属单元
    pub owner: usize,
    /// 相邻单元（内部面）
    pub neighbour: Option<usize>,
    /// 所在补丁（边界面）
    pub patch: Option<usize>,
}

impl FaceRecord {
    /// 面另一侧的标识：相邻单元或补丁
    pub fn other_side(&self, cell: usize) -> Option<FaceSide> {
        match (self.neighbour, self.patch) {
            (Some(n), _) if self.owner == cell => Some(FaceSide::Cell(n)),
            (Some(n), _) if n == cell => Some(FaceSide::Cell(self.owner)),
            (None, Some(p)) if self.owner == cell => Some(FaceSide::Patch(p)),
            _ => None,
        }
    }

    /// 是否与单元相邻
    #[inline]
    pub fn touches(&self, cell: usize) -> bool {
        self.owner == cell || self.neighbour == Some(cell)
    }

    /// 将单元标号 `from` 替换为 `to`
    pub fn replace_cell(&mut self, from: usize, to: usize) {
        if self.owner == from {
            self.owner = to;
        }
        if self.neighbour == Some(from) {
            self.neighbour = Some(to);
        }
    }
}

/// 面另一侧
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FaceSide {
    /// 相邻单元
    Cell(usize),
    /// 边界补丁
    Patch(usize),
}

/// 拓扑变化记录
#[derive(Debug, Clone)]
pub struct TopoChange {
    points: Vec<DVec3>,
    point_source: Vec<Option<usize>>,
    faces: Vec<Option<FaceRecord>>,
    face_source: Vec<Option<usize>>,
    cell_sources: Vec<Vec<usize>>,
    cell_removed: Vec<bool>,
    patches: Vec<(String, PatchKind)>,
    n_old_points: usize,
    n_old_faces: usize,
    n_old_cells: usize,
}

impl TopoChange {
    /// 以现有网格为起点
    pub fn from_mesh(mesh: &PolyMesh) -> Self {
        let faces = (0..mesh.n_faces())
            .map(|f| {
                Some(FaceRecord {
                    points: mesh.face(f).to_vec(),
                    owner: mesh.face_owner(f),
                    neighbour: mesh.face_neighbour(f),
                    patch: mesh.which_patch(f),
                })
            })
            .collect();
        Self {
            points: mesh.points().to_vec(),
            point_source: (0..mesh.n_points()).map(Some).collect(),
            faces,
            face_source: (0..mesh.n_faces()).map(Some).collect(),
            cell_sources: (0..mesh.n_cells()).map(|c| vec![c]).collect(),
            cell_removed: vec![false; mesh.n_cells()],
            patches: mesh
                .patches()
                .iter()
                .map(|p| (p.name.clone(), p.kind))
                .collect(),
            n_old_points: mesh.n_points(),
            n_old_faces: mesh.n_faces(),
            n_old_cells: mesh.n_cells(),
        }
    }

    /// 点坐标
    #[inline]
    pub fn point(&self, point: usize) -> DVec3 {
        self.points[point]
    }

    /// 当前点数（含新增）
    #[inline]
    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    /// 新增点
    pub fn add_point(&mut self, position: DVec3) -> usize {
        self.points.push(position);
        self.point_source.push(None);
        self.points.len() - 1
    }

    /// 当前单元数（含新增和已删除）
    #[inline]
    pub fn n_cells(&self) -> usize {
        self.cell_sources.len()
    }

    /// 新增单元，`source` 为映射场量的来源单元
    pub fn add_cell(&mut self, source: usize) -> usize {
        let sources = self.cell_sources.get(source).cloned().unwrap_or_default();
        self.cell_sources.push(sources);
        self.cell_removed.push(false);
        self.cell_sources.len() - 1
    }

    /// 将单元 `cell` 合并入 `into`（`cell` 被删除，其来源并入 `into`）
    pub fn merge_cell_into(&mut self, cell: usize, into: usize) -> MeshResult<()> {
        MeshError::check_index("cell", cell, self.n_cells())?;
        MeshError::check_index("cell", into, self.n_cells())?;
        if cell == into || self.cell_removed[into] {
            return Err(MeshError::topology(
                "TopoChange::merge_cell_into",
                format!("无法将单元 {cell} 合并入 {into}"),
            ));
        }
        let moved = std::mem::take(&mut self.cell_sources[cell]);
        self.cell_sources[into].extend(moved);
        self.cell_sources[into].sort_unstable();
        self.cell_removed[cell] = true;
        Ok(())
    }

    /// 当前面数（含新增和已删除）
    #[inline]
    pub fn n_faces(&self) -> usize {
        self.faces.len()
    }

    /// 面记录，已删除返回 `None`
    #[inline]
    pub fn face(&self, face: usize) -> Option<&FaceRecord> {
        self.faces.get(face).and_then(Option::as_ref)
    }

    /// 修改面
    pub fn modify_face(&mut self, face: usize, record: FaceRecord) -> MeshResult<()> {
        match self.faces.get_mut(face) {
            Some(slot @ Some(_)) => {
                *slot = Some(record);
                Ok(())
            }
            _ => Err(MeshError::topology(
                "TopoChange::modify_face",
                format!("面 {face} 不存在或已删除"),
            )),
        }
    }

    /// 新增面，返回面编号
    pub fn add_face(&mut self, record: FaceRecord) -> usize {
        self.faces.push(Some(record));
        self.face_source.push(None);
        self.faces.len() - 1
    }

    /// 删除面
    pub fn remove_face(&mut self, face: usize) -> MeshResult<()> {
        match self.faces.get_mut(face) {
            Some(slot @ Some(_)) => {
                *slot = None;
                Ok(())
            }
            _ => Err(MeshError::topology(
                "TopoChange::remove_face",
                format!("面 {face} 不存在或已删除"),
            )),
        }
    }

    /// 遍历存活的面
    pub fn live_faces(&self) -> impl Iterator<Item = (usize, &FaceRecord)> + '_ {
        self.faces
            .iter()
            .enumerate()
            .filter_map(|(f, r)| r.as_ref().map(|r| (f, r)))
    }

    /// 删除冗余点：位于两相邻顶点连线上、且在所有使用它的面中都夹在
    /// 同一对顶点之间的点
    ///
    /// 返回删除的点数。`rel_tol` 为相对共线容差。
    pub fn remove_redundant_points(&mut self, candidates: &[usize], rel_tol: f64) -> usize {
        let mut point_faces: HashMap<usize, Vec<usize>> = HashMap::new();
        for (f, record) in self.live_faces() {
            for &p in &record.points {
                point_faces.entry(p).or_default().push(f);
            }
        }

        let mut removed = 0;
        for &p in candidates {
            let Some(faces) = point_faces.get(&p) else {
                continue;
            };
            let mut pair: Option<(usize, usize)> = None;
            let mut removable = !faces.is_empty();
            for &f in faces {
                let Some(record) = self.face(f) else {
                    removable = false;
                    break;
                };
                let n = record.points.len();
                let Some(i) = record.points.iter().position(|&q| q == p) else {
                    removable = false;
                    break;
                };
                if n <= 3 {
                    removable = false;
                    break;
                }
                let a = record.points[(i + n - 1) % n];
                let b = record.points[(i + 1) % n];
                let key = (a.min(b), a.max(b));
                match pair {
                    None => pair = Some(key),
                    Some(existing) if existing == key => {}
                    Some(_) => {
                        removable = false;
                        break;
                    }
                }
            }
            let Some((a, b)) = pair.filter(|_| removable) else {
                continue;
            };
            let ab = self.points[b] - self.points[a];
            let ap = self.points[p] - self.points[a];
            if ab.cross(ap).length() > rel_tol * ab.length_squared() {
                continue;
            }
            for &f in faces {
                if let Some(Some(record)) = self.faces.get_mut(f) {
                    record.points.retain(|&q| q != p);
                }
            }
            removed += 1;
        }
        removed
    }

    /// 生成新网格和映射
    pub fn build(self) -> MeshResult<(PolyMesh, MeshMap)> {
        // 单元压缩编号
        let mut new_cell = vec![None; self.cell_sources.len()];
        let mut cell_sources = Vec::new();
        for (c, removed) in self.cell_removed.iter().enumerate() {
            if !removed {
                new_cell[c] = Some(cell_sources.len());
                cell_sources.push(self.cell_sources[c].clone());
            }
        }

        // 规范化面
        struct Pending {
            source: Option<usize>,
            points: Vec<usize>,
            owner: usize,
            neighbour: Option<usize>,
            patch: Option<usize>,
            order: usize,
        }
        let mut pending = Vec::new();
        for (f, slot) in self.faces.into_iter().enumerate() {
            let Some(record) = slot else { continue };
            let map_cell = |c: usize| {
                new_cell.get(c).copied().flatten().ok_or_else(|| {
                    MeshError::topology(
                        "TopoChange::build",
                        format!("面 {f} 引用已删除单元 {c}"),
                    )
                })
            };
            let mut owner = map_cell(record.owner)?;
            let mut points = record.points;
            let neighbour = match (record.neighbour, record.patch) {
                (Some(n), None) => {
                    let mut n = map_cell(n)?;
                    if n == owner {
                        return Err(MeshError::topology(
                            "TopoChange::build",
                            format!("面 {f} 两侧为同一单元 {n}"),
                        ));
                    }
                    if owner > n {
                        std::mem::swap(&mut owner, &mut n);
                        points.reverse();
                    }
                    Some(n)
                }
                (None, Some(p)) if p < self.patches.len() => None,
                _ => {
                    return Err(MeshError::topology(
                        "TopoChange::build",
                        format!("面 {f} 既非内部面也不属于有效补丁"),
                    ))
                }
            };
            pending.push(Pending {
                source: self.face_source[f],
                points,
                owner,
                neighbour,
                patch: record.patch,
                order: f,
            });
        }

        pending.sort_by_key(|p| match (p.neighbour, p.patch) {
            (Some(n), _) => (0, p.owner, n, p.order),
            (None, Some(patch)) => (1, patch, 0, p.order),
            (None, None) => (2, 0, 0, p.order),
        });

        // 点压缩编号
        let mut used = vec![false; self.points.len()];
        for face in &pending {
            for &p in &face.points {
                used[p] = true;
            }
        }
        let mut new_point = vec![None; self.points.len()];
        let mut points = Vec::new();
        let mut point_map = Vec::new();
        for (p, is_used) in used.iter().enumerate() {
            if *is_used {
                new_point[p] = Some(points.len());
                points.push(self.points[p]);
                point_map.push(self.point_source[p]);
            }
        }

        let n_internal = pending.iter().filter(|p| p.neighbour.is_some()).count();
        let mut patch_sizes = vec![0usize; self.patches.len()];
        for face in pending.iter().filter(|p| p.neighbour.is_none()) {
            if let Some(patch) = face.patch {
                patch_sizes[patch] += 1;
            }
        }
        let mut start = n_internal;
        let patches = self
            .patches
            .iter()
            .zip(&patch_sizes)
            .map(|((name, kind), &size)| {
                let patch = BoundaryPatch::new(name.clone(), *kind, start, size);
                start += size;
                patch
            })
            .collect();

        let mut faces = Vec::with_capacity(pending.len());
        let mut owner = Vec::with_capacity(pending.len());
        let mut neighbour = Vec::with_capacity(n_internal);
        let mut face_map = Vec::with_capacity(pending.len());
        let mut reverse_face_map = vec![None; self.n_old_faces];
        for (new_f, face) in pending.iter().enumerate() {
            let pts = face
                .points
                .iter()
                .map(|&p| {
                    new_point[p].ok_or_else(|| MeshError::topology("TopoChange::build", "点编号失效"))
                })
                .collect::<MeshResult<Vec<_>>>()?;
            faces.push(pts);
            owner.push(face.owner);
            if let Some(n) = face.neighbour {
                neighbour.push(n);
            }
            face_map.push(face.source);
            if let Some(old) = face.source {
                if old < self.n_old_faces {
                    reverse_face_map[old] = Some(new_f);
                }
            }
        }

        let mesh = PolyMesh::new(points, faces, owner, neighbour, patches)?;
        let map = MeshMap {
            cell_sources,
            reverse_cell_map: new_cell[..self.n_old_cells].to_vec(),
            face_map,
            reverse_face_map,
            point_map,
            reverse_point_map: new_point[..self.n_old_points].to_vec(),
        };
        log::debug!(
            "拓扑变化: 单元 {} → {}, 面 {} → {}, 点 {} → {}",
            self.n_old_cells,
            mesh.n_cells(),
            self.n_old_faces,
            mesh.n_faces(),
            self.n_old_points,
            mesh.n_points()
        );
        Ok((mesh, map))
    }
}
