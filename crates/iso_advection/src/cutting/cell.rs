// crates/iso_advection/src/cutting/cell.rs

//! 单元切割
//!
//! 对单元的每个面调用面切割，把各面的等值线段首尾相接成闭合的等值面
//! 多边形，再用锥体分解计算等值以上（湿）子单元的体积与形心。
//!
//! 反求模式 [`CellCutter::vof_cut`] 给定目标体积分数搜索等值：
//!
//! 1. 在排序后的单元顶点值之间二分，找到包含解的相邻顶点值区间
//! 2. 区间内取四个采样点拟合三次多项式，用 Newton 法求根并验证
//! 3. 验证残差超过容差时在区间内继续 Illinois 割线搜索
//! 4. 仍不收敛则返回 [`AdvectionError::ConvergenceFailure`]

use glam::DVec3;
use iso_foundation::{ROOTVSMALL, SMALL, VSMALL};
use iso_mesh::geometry::polygon_centre_and_area;
use iso_mesh::PolyMesh;
use rayon::prelude::*;
use smallvec::SmallVec;

use crate::cutting::face::{cut_face, FaceStatus, PointList};
use crate::error::{AdvectionError, AdvectionResult};

/// 单元相对等值的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum CellStatus {
    /// 全部在等值以下
    Below = -1,
    /// 被等值面穿过
    Cut = 0,
    /// 全部在等值以上
    Above = 1,
}

/// 单元切割结果
#[derive(Debug, Clone, PartialEq)]
pub struct CellCut {
    /// 状态
    pub status: CellStatus,
    /// 使用的等值
    pub iso_value: f64,
    /// 等值面闭合环
    pub iso_face_loops: Vec<Vec<DVec3>>,
    /// 等值面形心
    pub iso_face_centre: DVec3,
    /// 等值面面积矢量，指向湿子单元外侧（函数值降低的方向）
    pub iso_face_area: DVec3,
    /// 湿子单元体积
    pub sub_cell_volume: f64,
    /// 湿子单元形心
    pub sub_cell_centre: DVec3,
    /// 体积分数，截断到 `[0, 1]`
    pub volume_of_fluid: f64,
    /// 完全在等值以上的面
    pub fully_submerged_faces: Vec<usize>,
    /// 被穿过的面
    pub cut_faces: Vec<usize>,
}

impl CellCut {
    /// 等值面全部顶点（各环依次排列）
    pub fn iso_face_points(&self) -> impl Iterator<Item = DVec3> + '_ {
        self.iso_face_loops.iter().flatten().copied()
    }
}

// ============================================================================
// 多面体切割核心
// ============================================================================

/// 待切割的多面体：每个面的顶点坐标与顶点值
struct Polyhedron {
    labels: SmallVec<[usize; 8]>,
    points: Vec<PointList>,
    values: Vec<SmallVec<[f64; 8]>>,
    volume: f64,
    centre: DVec3,
}

impl Polyhedron {
    fn from_mesh(mesh: &PolyMesh, cell: usize, point_values: &[f64]) -> Self {
        let faces = mesh.cell_faces(cell);
        Self {
            labels: faces.iter().copied().collect(),
            points: faces.iter().map(|&f| mesh.face_points(f)).collect(),
            values: faces
                .iter()
                .map(|&f| mesh.face(f).iter().map(|&p| point_values[p]).collect())
                .collect(),
            volume: mesh.cell_volume(cell),
            centre: mesh.cell_centre(cell),
        }
    }

    fn length_scale(&self) -> f64 {
        let mut lo = DVec3::splat(f64::MAX);
        let mut hi = DVec3::splat(f64::MIN);
        for p in self.points.iter().flatten() {
            lo = lo.min(*p);
            hi = hi.max(*p);
        }
        (hi - lo).length().max(ROOTVSMALL)
    }

    fn extreme_values(&self) -> (f64, f64) {
        self.values
            .iter()
            .flatten()
            .fold((f64::MAX, f64::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }

    fn sorted_values(&self) -> Vec<f64> {
        let mut values: Vec<f64> = self.values.iter().flatten().copied().collect();
        values.sort_by(f64::total_cmp);
        values.dedup();
        values
    }

    fn cut(&self, cell: Option<usize>, iso_value: f64) -> AdvectionResult<CellCut> {
        let mut wet: Vec<(DVec3, DVec3)> = Vec::with_capacity(self.points.len() + 1);
        let mut segments: Vec<(DVec3, DVec3)> = Vec::new();
        let mut fully_submerged = Vec::new();
        let mut cut_faces = Vec::new();

        for (k, (pts, vals)) in self.points.iter().zip(&self.values).enumerate() {
            let face_cut = cut_face(pts, vals, iso_value)?;
            match face_cut.status {
                FaceStatus::Below => {}
                FaceStatus::Above => {
                    fully_submerged.push(self.labels[k]);
                    wet.push((face_cut.sub_face_centre, face_cut.sub_face_area));
                }
                FaceStatus::Cut => {
                    cut_faces.push(self.labels[k]);
                    wet.push((face_cut.sub_face_centre, face_cut.sub_face_area));
                    segments.push((face_cut.interface_points[0], face_cut.interface_points[1]));
                }
            }
        }

        // 等值恰在某个顶点上时，只含该顶点的面给出长度约为 SNAP_TOL 的线段
        let tol = 1e-8 * self.length_scale();
        segments.retain(|(a, b)| (*a - *b).length() > tol);
        let loops = if segments.is_empty() {
            Vec::new()
        } else {
            chain_segments(cell, &segments, tol)?
        };

        if loops.is_empty() && (cut_faces.is_empty() || fully_submerged.is_empty()) {
            // 湿区为空或退化为点、线
            let full = cut_faces.is_empty() && !fully_submerged.is_empty();
            return Ok(CellCut {
                status: if full { CellStatus::Above } else { CellStatus::Below },
                iso_value,
                iso_face_loops: Vec::new(),
                iso_face_centre: DVec3::ZERO,
                iso_face_area: DVec3::ZERO,
                sub_cell_volume: if full { self.volume } else { 0.0 },
                sub_cell_centre: if full { self.centre } else { DVec3::ZERO },
                volume_of_fluid: if full { 1.0 } else { 0.0 },
                fully_submerged_faces: fully_submerged,
                cut_faces,
            });
        }

        let (iso_centre, iso_area) = if loops.is_empty() {
            (DVec3::ZERO, DVec3::ZERO)
        } else {
            let iso_face = self.oriented_iso_face(&loops, iso_value);
            wet.push(iso_face);
            iso_face
        };
        let (sub_centre, sub_volume) = abs_pyramid_centre_and_volume(&wet);

        let vof = if self.volume > VSMALL {
            (sub_volume / self.volume).clamp(0.0, 1.0)
        } else {
            0.0
        };

        Ok(CellCut {
            status: CellStatus::Cut,
            iso_value,
            iso_face_loops: loops,
            iso_face_centre: iso_centre,
            iso_face_area: iso_area,
            sub_cell_volume: sub_volume,
            sub_cell_centre: sub_centre,
            volume_of_fluid: vof,
            fully_submerged_faces: fully_submerged,
            cut_faces,
        })
    }

    /// 等值面形心与面积矢量，各环分别定向为指向函数值降低的一侧
    fn oriented_iso_face(&self, loops: &[Vec<DVec3>], iso_value: f64) -> (DVec3, DVec3) {
        let mut sum_area = DVec3::ZERO;
        let mut sum_mag = 0.0;
        let mut sum_centre = DVec3::ZERO;
        for lp in loops {
            let (centre, mut area) = polygon_centre_and_area(lp);
            // 线性函数时 Σ (f - iso)(x - c)·S 与梯度和 S 的点积同号
            let trend: f64 = self
                .points
                .iter()
                .flatten()
                .zip(self.values.iter().flatten())
                .map(|(p, &v)| (v - iso_value) * (*p - centre).dot(area))
                .sum();
            if trend > 0.0 {
                area = -area;
            }
            let mag = area.length();
            sum_area += area;
            sum_mag += mag;
            sum_centre += mag * centre;
        }
        let centre = if sum_mag > ROOTVSMALL {
            sum_centre / sum_mag
        } else {
            let n: usize = loops.iter().map(Vec::len).sum();
            loops.iter().flatten().copied().sum::<DVec3>() / n.max(1) as f64
        };
        (centre, sum_area)
    }
}

/// 把无向线段首尾相接成闭合环
///
/// 少于三个点的环面积为零，直接丢弃。
fn chain_segments(
    cell: Option<usize>,
    segments: &[(DVec3, DVec3)],
    tol: f64,
) -> AdvectionResult<Vec<Vec<DVec3>>> {
    let close = |a: DVec3, b: DVec3| (a - b).length() <= tol;
    let mut used = vec![false; segments.len()];
    let mut loops = Vec::new();

    while let Some(seed) = used.iter().position(|u| !u) {
        used[seed] = true;
        let (start, mut end) = segments[seed];
        let mut lp = vec![start, end];
        loop {
            if close(end, start) && lp.len() > 2 {
                lp.pop();
                break;
            }
            let next = segments.iter().enumerate().find_map(|(k, &(a, b))| {
                if used[k] {
                    None
                } else if close(a, end) {
                    Some((k, b))
                } else if close(b, end) {
                    Some((k, a))
                } else {
                    None
                }
            });
            match next {
                Some((k, other)) => {
                    used[k] = true;
                    lp.push(other);
                    end = other;
                }
                None => {
                    return Err(AdvectionError::not_closed(
                        cell,
                        format!(
                            "{} 条线段中第 {} 个环在 {:?} 处断开",
                            segments.len(),
                            loops.len() + 1,
                            end
                        ),
                    ))
                }
            }
        }
        if lp.len() < 3 {
            log::trace!("单元 {cell:?} 丢弃 {} 个点的退化等值面环", lp.len());
            continue;
        }
        loops.push(lp);
    }
    Ok(loops)
}

/// 面锥体分解，锥体体积取绝对值，锥顶为各面形心均值
fn abs_pyramid_centre_and_volume(faces: &[(DVec3, DVec3)]) -> (DVec3, f64) {
    if faces.is_empty() {
        return (DVec3::ZERO, 0.0);
    }
    let c_est = faces.iter().map(|(c, _)| *c).sum::<DVec3>() / faces.len() as f64;
    let mut vol3 = 0.0;
    let mut centre = DVec3::ZERO;
    for &(c, s) in faces {
        let pyr3 = s.dot(c - c_est).abs().max(VSMALL);
        vol3 += pyr3;
        centre += pyr3 * (0.75 * c + 0.25 * c_est);
    }
    (centre / vol3, vol3 / 3.0)
}

/// 切割由面顶点列表给出的独立多面体
///
/// 面的走向任意；`face_value_lists` 与 `face_point_lists` 一一对应。
/// 结果中的面编号为面在列表中的序号。
pub fn cut_cell(
    face_point_lists: &[Vec<DVec3>],
    face_value_lists: &[Vec<f64>],
    iso_value: f64,
) -> AdvectionResult<CellCut> {
    AdvectionError::check_size("face_value_lists", face_point_lists.len(), face_value_lists.len())?;
    let points: Vec<PointList> = face_point_lists.iter().map(|f| f.iter().copied().collect()).collect();
    let geometry: Vec<(DVec3, DVec3)> = points.iter().map(|f| polygon_centre_and_area(f)).collect();
    let (centre, volume) = abs_pyramid_centre_and_volume(&geometry);
    let poly = Polyhedron {
        labels: (0..points.len()).collect(),
        points,
        values: face_value_lists.iter().map(|v| v.iter().copied().collect()).collect(),
        volume,
        centre,
    };
    poly.cut(None, iso_value)
}

// ============================================================================
// 网格单元切割器
// ============================================================================

/// 网格单元切割器
#[derive(Debug, Clone, Copy)]
pub struct CellCutter<'a> {
    mesh: &'a PolyMesh,
    band_tol: f64,
}

impl<'a> CellCutter<'a> {
    /// 创建切割器
    pub fn new(mesh: &'a PolyMesh) -> Self {
        Self { mesh, band_tol: 0.0 }
    }

    /// 体积分数距 0 或 1 小于 `band_tol` 的 `Cut` 结果改判为 `Below`/`Above`
    pub fn with_band_tol(mut self, band_tol: f64) -> Self {
        self.band_tol = band_tol.max(0.0);
        self
    }

    /// 分类带宽
    #[inline]
    pub fn band_tol(&self) -> f64 {
        self.band_tol
    }

    /// 所属网格
    #[inline]
    pub fn mesh(&self) -> &'a PolyMesh {
        self.mesh
    }

    fn check(&self, cell: usize, point_values: &[f64]) -> AdvectionResult<()> {
        if cell >= self.mesh.n_cells() {
            return Err(AdvectionError::invalid_input(format!(
                "单元 {cell} 超出范围 0..{}",
                self.mesh.n_cells()
            )));
        }
        AdvectionError::check_size("point_values", self.mesh.n_points(), point_values.len())
    }

    fn classify(&self, mut result: CellCut) -> CellCut {
        if result.status == CellStatus::Cut && self.band_tol > 0.0 {
            if result.volume_of_fluid < self.band_tol {
                result.status = CellStatus::Below;
            } else if result.volume_of_fluid > 1.0 - self.band_tol {
                result.status = CellStatus::Above;
            }
        }
        result
    }

    /// 按等值切割单元
    pub fn cut(&self, cell: usize, point_values: &[f64], iso_value: f64) -> AdvectionResult<CellCut> {
        self.check(cell, point_values)?;
        let poly = Polyhedron::from_mesh(self.mesh, cell, point_values);
        Ok(self.classify(poly.cut(Some(cell), iso_value)?))
    }

    /// 反求使体积分数等于 `target` 的等值，返回等值及对应的切割结果
    pub fn vof_cut(
        &self,
        cell: usize,
        point_values: &[f64],
        target: f64,
        tol: f64,
        max_iter: usize,
    ) -> AdvectionResult<(f64, CellCut)> {
        self.check(cell, point_values)?;
        if !(0.0..=1.0).contains(&target) {
            return Err(AdvectionError::invalid_input(format!("目标体积分数 {target} 不在 [0, 1] 内")));
        }
        let poly = Polyhedron::from_mesh(self.mesh, cell, point_values);
        let (f_min, f_max) = poly.extreme_values();
        let cut_at = |f: f64| poly.cut(Some(cell), f);
        // 提前返回的结果同样要满足容差
        let verified = |f: f64, r: CellCut| {
            let residual = (r.volume_of_fluid - target).abs();
            if residual <= tol {
                Ok((f, self.classify(r)))
            } else {
                Err(AdvectionError::ConvergenceFailure {
                    cell,
                    target,
                    residual,
                    iterations: 0,
                })
            }
        };

        if target < tol {
            return verified(f_max, cut_at(f_max)?);
        }
        if 1.0 - target < tol {
            return verified(f_min, cut_at(f_min)?);
        }

        // 1. 顶点值二分，体积分数随等值单调不增。两端的体积分数已知，不必切割
        let values = poly.sorted_values();
        let (mut lo, mut hi) = (0usize, values.len().saturating_sub(1));
        let (mut f1, mut f2) = (f_min, f_max);
        let (mut a1, mut a2) = (1.0, 0.0);
        while hi - lo > 1 {
            let mid = (lo + hi) / 2;
            let f3 = values[mid];
            let r = cut_at(f3)?;
            let a3 = r.volume_of_fluid;
            if a3 > target {
                lo = mid;
                f1 = f3;
                a1 = a3;
            } else if a3 < target {
                hi = mid;
                f2 = f3;
                a2 = a3;
            } else {
                return verified(f3, r);
            }
        }
        log::trace!("单元 {cell} 等值区间 [{f1:.6e}, {f2:.6e}], 体积分数 [{a1:.6}, {a2:.6}]");

        if (f1 - f2).abs() < 10.0 * SMALL {
            return verified(f1, cut_at(f1)?);
        }
        if (a1 - a2).abs() < tol {
            let f = 0.5 * (f1 + f2);
            return verified(f, cut_at(f)?);
        }

        // 2. 三次拟合 + Newton
        let s_nodes = [0.0, 1.0 / 3.0, 2.0 / 3.0, 1.0];
        let a_third = cut_at(f1 + (f2 - f1) / 3.0)?.volume_of_fluid;
        let a_two_thirds = cut_at(f1 + 2.0 * (f2 - f1) / 3.0)?.volume_of_fluid;
        let cubic = NewtonCubic::fit(s_nodes, [a1, a_third, a_two_thirds, a2]);
        let mut s = safe_fraction(a1 - target, a1 - a2);
        for _ in 0..max_iter {
            let (p, dp) = cubic.eval(s);
            if (p - target).abs() <= tol || dp.abs() < VSMALL {
                break;
            }
            s = (s - (p - target) / dp).clamp(0.0, 1.0);
        }
        let f3 = f1 + s * (f2 - f1);
        let r3 = cut_at(f3)?;
        let g3 = r3.volume_of_fluid - target;
        if g3.abs() <= tol {
            return Ok((f3, self.classify(r3)));
        }
        log::trace!("单元 {cell} 三次拟合残差 {g3:.3e}, 转入割线搜索");

        // 3. Illinois 割线法，区间端点 g1 > 0 > g2
        let (mut x1, mut g1) = (f1, a1 - target);
        let (mut x2, mut g2) = (f2, a2 - target);
        if g3 > 0.0 {
            x1 = f3;
            g1 = g3;
        } else {
            x2 = f3;
            g2 = g3;
        }
        let mut side = 0i8;
        let mut residual = g3.abs();
        for _ in 0..max_iter {
            let x = (x1 * g2 - x2 * g1) / (g2 - g1);
            let r = cut_at(x)?;
            let g = r.volume_of_fluid - target;
            residual = g.abs();
            if residual <= tol {
                return Ok((x, self.classify(r)));
            }
            if g > 0.0 {
                x1 = x;
                g1 = g;
                if side == 1 {
                    g2 *= 0.5;
                }
                side = 1;
            } else {
                x2 = x;
                g2 = g;
                if side == -1 {
                    g1 *= 0.5;
                }
                side = -1;
            }
            if (x2 - x1).abs() < 10.0 * SMALL {
                break;
            }
        }

        Err(AdvectionError::ConvergenceFailure {
            cell,
            target,
            residual,
            iterations: max_iter,
        })
    }

    /// 点函数在每个单元上的体积分数（由解析界面初始化体积分数场）
    pub fn volume_of_fluid_field(&self, point_values: &[f64], iso_value: f64) -> AdvectionResult<Vec<f64>> {
        AdvectionError::check_size("point_values", self.mesh.n_points(), point_values.len())?;
        (0..self.mesh.n_cells())
            .into_par_iter()
            .map(|c| {
                Polyhedron::from_mesh(self.mesh, c, point_values)
                    .cut(Some(c), iso_value)
                    .map(|r| r.volume_of_fluid)
            })
            .collect()
    }
}

#[inline]
fn safe_fraction(num: f64, den: f64) -> f64 {
    if den.abs() < VSMALL {
        0.5
    } else {
        (num / den).clamp(0.0, 1.0)
    }
}

/// Newton 插值形式的三次多项式
struct NewtonCubic {
    nodes: [f64; 4],
    coeffs: [f64; 4],
}

impl NewtonCubic {
    fn fit(nodes: [f64; 4], values: [f64; 4]) -> Self {
        let mut c = values;
        for level in 1..4 {
            for i in (level..4).rev() {
                c[i] = (c[i] - c[i - 1]) / (nodes[i] - nodes[i - level]);
            }
        }
        Self { nodes, coeffs: c }
    }

    /// 多项式值及导数
    fn eval(&self, s: f64) -> (f64, f64) {
        let mut p = self.coeffs[3];
        let mut dp = 0.0;
        for k in (0..3).rev() {
            dp = dp * (s - self.nodes[k]) + p;
            p = p * (s - self.nodes[k]) + self.coeffs[k];
        }
        (p, dp)
    }
}
