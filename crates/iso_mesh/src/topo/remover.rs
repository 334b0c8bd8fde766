// crates/iso_mesh/src/topo/remover.rs

//! 面删除与单元合并
//!
//! 删除内部面即合并其两侧单元（保留较小的编号）。合并后：
//!
//! - 两侧均属同一合并区域的其他内部面也必须删除（兼容性检查）
//! - 合并单元上通往同一相邻单元或同一补丁、共边且近似共面的面被合并成一个面
//! - 切分时插入到边上、现已多余的共线点被删除
//!
//! 对平面切分的结果执行面删除可以精确还原切分前的网格。

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::error::{MeshError, MeshResult};
use crate::geometry::polygon_centre_and_area;
use crate::poly_mesh::PolyMesh;
use crate::topo::change::{FaceRecord, FaceSide, TopoChange};
use crate::topo::map::MeshMap;

/// 兼容性检查结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibleRemoves {
    /// 实际需要删除的面（升序）
    pub faces: Vec<usize>,
    /// 每个单元所属合并区域的主单元（未合并单元指向自身）
    pub cell_region: Vec<usize>,
}

/// 面删除器
#[derive(Debug, Clone)]
pub struct FaceRemover {
    min_cos: f64,
    collinear_tol: f64,
}

impl Default for FaceRemover {
    fn default() -> Self {
        Self::new(30.0)
    }
}

impl FaceRemover {
    /// 创建面删除器，`merge_angle_deg` 为合并面之间允许的最大法向夹角
    pub fn new(merge_angle_deg: f64) -> Self {
        Self {
            min_cos: merge_angle_deg.to_radians().cos(),
            collinear_tol: 1e-8,
        }
    }

    /// 计算与请求兼容的删除集合
    pub fn compatible_removes(&self, mesh: &PolyMesh, faces: &[usize]) -> MeshResult<CompatibleRemoves> {
        let mut parent: Vec<usize> = (0..mesh.n_cells()).collect();
        fn find(parent: &mut [usize], mut c: usize) -> usize {
            while parent[c] != c {
                parent[c] = parent[parent[c]];
                c = parent[c];
            }
            c
        }

        for &f in faces {
            MeshError::check_index("face", f, mesh.n_faces())?;
            let Some(nbr) = mesh.face_neighbour(f) else {
                return Err(MeshError::topology(
                    "FaceRemover::compatible_removes",
                    format!("面 {f} 为边界面, 不能删除"),
                ));
            };
            let a = find(&mut parent, mesh.face_owner(f));
            let b = find(&mut parent, nbr);
            if a != b {
                // 区域主单元取最小编号
                let (lo, hi) = (a.min(b), a.max(b));
                parent[hi] = lo;
            }
        }

        let cell_region: Vec<usize> = (0..mesh.n_cells()).map(|c| find(&mut parent, c)).collect();
        let faces = (0..mesh.n_internal_faces())
            .filter(|&f| {
                let o = mesh.face_owner(f);
                mesh.face_neighbour(f)
                    .is_some_and(|n| cell_region[o] == cell_region[n])
            })
            .collect();
        Ok(CompatibleRemoves { faces, cell_region })
    }

    /// 删除面并合并单元
    pub fn remove_faces(&self, mesh: &PolyMesh, faces: &[usize]) -> MeshResult<(PolyMesh, MeshMap)> {
        let removes = self.compatible_removes(mesh, faces)?;
        let region = &removes.cell_region;
        let mut change = TopoChange::from_mesh(mesh);

        for &f in &removes.faces {
            change.remove_face(f)?;
        }

        let mut merged_masters = BTreeSet::new();
        for (c, &master) in region.iter().enumerate() {
            if master != c {
                change.merge_cell_into(c, master)?;
                merged_masters.insert(master);
            }
        }

        // 单元标号替换为区域主单元
        let touched: Vec<usize> = change
            .live_faces()
            .filter(|(_, r)| {
                region[r.owner] != r.owner || r.neighbour.is_some_and(|n| region[n] != n)
            })
            .map(|(f, _)| f)
            .collect();
        for f in touched {
            if let Some(record) = change.face(f).cloned() {
                let mut record = record;
                record.owner = region[record.owner];
                record.neighbour = record.neighbour.map(|n| region[n]);
                change.modify_face(f, record)?;
            }
        }

        let mut candidates = BTreeSet::new();
        for &master in &merged_masters {
            self.merge_coplanar_faces(&mut change, master)?;
            for (_, record) in change.live_faces().filter(|(_, r)| r.touches(master)) {
                candidates.extend(record.points.iter().copied());
            }
        }
        let candidates: Vec<usize> = candidates.into_iter().collect();
        // 删除一个点可能使相邻点变为可删除
        let mut n_removed = 0;
        loop {
            let n = change.remove_redundant_points(&candidates, self.collinear_tol);
            if n == 0 {
                break;
            }
            n_removed += n;
        }

        log::debug!(
            "删除 {} 个面, 合并入 {} 个单元, 删除 {} 个共线点",
            removes.faces.len(),
            merged_masters.len(),
            n_removed
        );
        change.build()
    }

    /// 合并单元 `master` 上通往同一侧、共边且近似共面的面
    fn merge_coplanar_faces(&self, change: &mut TopoChange, master: usize) -> MeshResult<()> {
        let mut groups: BTreeMap<FaceSide, Vec<usize>> = BTreeMap::new();
        for (f, record) in change.live_faces() {
            if let Some(side) = record.other_side(master) {
                groups.entry(side).or_default().push(f);
            }
        }

        for (side, faces) in groups {
            if faces.len() < 2 {
                continue;
            }
            // 统一为从 master 指向外侧的顶点顺序
            let oriented: Vec<(usize, Vec<usize>)> = faces
                .iter()
                .filter_map(|&f| {
                    let record = change.face(f)?;
                    let mut pts = record.points.clone();
                    if record.owner != master {
                        pts.reverse();
                    }
                    Some((f, pts))
                })
                .collect();
            let normals: Vec<_> = oriented
                .iter()
                .map(|(_, pts)| {
                    let coords: Vec<_> = pts.iter().map(|&p| change.point(p)).collect();
                    polygon_centre_and_area(&coords).1.normalize_or_zero()
                })
                .collect();

            // 共边且法向接近的面聚成簇
            let mut edge_faces: HashMap<(usize, usize), Vec<usize>> = HashMap::new();
            for (i, (_, pts)) in oriented.iter().enumerate() {
                for k in 0..pts.len() {
                    let (a, b) = (pts[k], pts[(k + 1) % pts.len()]);
                    edge_faces.entry((a.min(b), a.max(b))).or_default().push(i);
                }
            }
            let mut cluster_of = vec![usize::MAX; oriented.len()];
            let mut clusters: Vec<Vec<usize>> = Vec::new();
            for seed in 0..oriented.len() {
                if cluster_of[seed] != usize::MAX {
                    continue;
                }
                let id = clusters.len();
                cluster_of[seed] = id;
                let mut members = vec![seed];
                let mut stack = vec![seed];
                while let Some(i) = stack.pop() {
                    let pts = &oriented[i].1;
                    for k in 0..pts.len() {
                        let (a, b) = (pts[k], pts[(k + 1) % pts.len()]);
                        for &j in edge_faces.get(&(a.min(b), a.max(b))).into_iter().flatten() {
                            if cluster_of[j] == usize::MAX && normals[j].dot(normals[seed]) >= self.min_cos {
                                cluster_of[j] = id;
                                members.push(j);
                                stack.push(j);
                            }
                        }
                    }
                }
                clusters.push(members);
            }

            for members in clusters.into_iter().filter(|m| m.len() > 1) {
                let loops: Vec<&Vec<usize>> = members.iter().map(|&i| &oriented[i].1).collect();
                let Some(merged) = merge_loops(&loops) else {
                    log::debug!("单元 {master} 的面 {:?} 无法合并为单一多边形", members);
                    continue;
                };
                let keep = oriented[members[0]].0;
                let record = match side {
                    FaceSide::Cell(n) => FaceRecord {
                        points: merged,
                        owner: master,
                        neighbour: Some(n),
                        patch: None,
                    },
                    FaceSide::Patch(p) => FaceRecord {
                        points: merged,
                        owner: master,
                        neighbour: None,
                        patch: Some(p),
                    },
                };
                change.modify_face(keep, record)?;
                for &i in &members[1..] {
                    change.remove_face(oriented[i].0)?;
                }
            }
        }
        Ok(())
    }
}

/// 合并同向多边形：抵消成对反向的边，剩余边须构成唯一闭环
fn merge_loops(loops: &[&Vec<usize>]) -> Option<Vec<usize>> {
    let mut edges: Vec<(usize, usize)> = loops
        .iter()
        .flat_map(|pts| (0..pts.len()).map(move |k| (pts[k], pts[(k + 1) % pts.len()])))
        .collect();
    let all: BTreeSet<(usize, usize)> = edges.iter().copied().collect();
    edges.retain(|&(a, b)| !all.contains(&(b, a)));

    let mut next: HashMap<usize, usize> = HashMap::new();
    for &(a, b) in &edges {
        if next.insert(a, b).is_some() {
            return None;
        }
    }
    let &(start, _) = edges.first()?;
    let mut result = vec![start];
    let mut current = start;
    loop {
        let n = *next.get(&current)?;
        if n == start {
            break;
        }
        if result.len() > edges.len() {
            return None;
        }
        result.push(n);
        current = n;
    }
    (result.len() == edges.len() && result.len() >= 3).then_some(result)
}
