// crates/iso_advection/src/interpolation.rs

//! 单元场到点场的插值
//!
//! # 反距离加权
//!
//! 点值为周围单元值按单元形心距离倒数加权的平均:
//!
//! ```text
//! φ_p = Σ_c w_pc φ_c / Σ_c w_pc,   w_pc = 1 / |x_p - x_c|
//! ```
//!
//! 多分区运行时，处理器补丁上的点只看到本分区的单元。各分区先算出本地
//! 部分和，再通过 [`ProcessorExchange`] 把补丁点上的部分和发给相邻分区，
//! 按坐标匹配后相加。
//!
//! 只通过棱或角点与本分区接触、而不共享任何补丁面的分区贡献不会被计入。

use glam::DVec3;
use iso_foundation::GeometricTolerance;
use iso_mesh::PolyMesh;
use smallvec::SmallVec;
use std::collections::BTreeSet;

use crate::error::{AdvectionError, AdvectionResult};
use crate::exchange::{unexpected, ExchangeMessage, ExchangeTag, ProcessorExchange};

/// 一个处理器补丁上的点
#[derive(Debug, Clone)]
struct ProcessorPoints {
    neighbour_rank: usize,
    points: Vec<usize>,
    coords: Vec<DVec3>,
    match_tol: f64,
}

/// 反距离加权点插值器
#[derive(Debug, Clone)]
pub struct PointInterpolator {
    /// 点 → (单元, 权重)
    weights: Vec<SmallVec<[(usize, f64); 8]>>,
    processor_points: Vec<ProcessorPoints>,
}

impl PointInterpolator {
    /// 预计算权重和处理器补丁点
    pub fn new(mesh: &PolyMesh) -> Self {
        let weights = (0..mesh.n_points())
            .map(|p| {
                let x = mesh.points()[p];
                mesh.point_cells(p)
                    .iter()
                    .map(|&c| (c, 1.0 / (x - mesh.cell_centre(c)).length().max(f64::MIN_POSITIVE)))
                    .collect()
            })
            .collect();

        let tol = GeometricTolerance::default();
        let processor_points = mesh
            .patches()
            .iter()
            .filter_map(|patch| {
                let neighbour_rank = patch.kind.neighbour_rank()?;
                let mut points = BTreeSet::new();
                let mut length = f64::INFINITY;
                for face in patch.range() {
                    points.extend(mesh.face(face).iter().copied());
                    length = length.min(mesh.cell_length(mesh.face_owner(face)));
                }
                let points: Vec<usize> = points.into_iter().collect();
                let coords = points.iter().map(|&p| mesh.points()[p]).collect();
                let length = if length.is_finite() { length } else { 1.0 };
                Some(ProcessorPoints {
                    neighbour_rank,
                    points,
                    coords,
                    match_tol: tol.merge_distance(length),
                })
            })
            .collect();

        Self {
            weights,
            processor_points,
        }
    }

    /// 点数
    #[inline]
    pub fn n_points(&self) -> usize {
        self.weights.len()
    }

    /// 标量场插值到点
    pub fn interpolate_scalar(
        &self,
        cell_values: &[f64],
        exchange: &dyn ProcessorExchange,
    ) -> AdvectionResult<Vec<f64>> {
        let values = self.interpolate::<1>(cell_values.len(), |c| [cell_values[c]], exchange)?;
        Ok(values.into_iter().map(|[v]| v).collect())
    }

    /// 矢量场插值到点
    pub fn interpolate_vector(
        &self,
        cell_values: &[DVec3],
        exchange: &dyn ProcessorExchange,
    ) -> AdvectionResult<Vec<DVec3>> {
        let values = self.interpolate::<3>(cell_values.len(), |c| cell_values[c].to_array(), exchange)?;
        Ok(values.into_iter().map(DVec3::from_array).collect())
    }

    fn interpolate<const N: usize>(
        &self,
        n_cells: usize,
        value: impl Fn(usize) -> [f64; N],
        exchange: &dyn ProcessorExchange,
    ) -> AdvectionResult<Vec<[f64; N]>> {
        let mut weight_sums = vec![0.0; self.weights.len()];
        let mut value_sums = vec![[0.0; N]; self.weights.len()];
        for (p, contributions) in self.weights.iter().enumerate() {
            for &(c, w) in contributions {
                if c >= n_cells {
                    return Err(AdvectionError::SizeMismatch {
                        name: "cell_values",
                        expected: c + 1,
                        actual: n_cells,
                    });
                }
                let v = value(c);
                weight_sums[p] += w;
                for k in 0..N {
                    value_sums[p][k] += w * v[k];
                }
            }
        }

        if exchange.is_parallel() && !self.processor_points.is_empty() {
            self.sync_sums(&mut weight_sums, &mut value_sums, exchange)?;
        }

        Ok(weight_sums
            .iter()
            .zip(&value_sums)
            .map(|(&w, s)| if w > 0.0 { s.map(|x| x / w) } else { [0.0; N] })
            .collect())
    }

    /// 交换处理器补丁点上的部分和（只发送本地部分和）
    fn sync_sums<const N: usize>(
        &self,
        weight_sums: &mut [f64],
        value_sums: &mut [[f64; N]],
        exchange: &dyn ProcessorExchange,
    ) -> AdvectionResult<()> {
        for proc in &self.processor_points {
            let message = ExchangeMessage::PointSums {
                points: proc.coords.clone(),
                weights: proc.points.iter().map(|&p| weight_sums[p]).collect(),
                sums: proc.points.iter().flat_map(|&p| value_sums[p]).collect(),
                width: N,
            };
            exchange.send(proc.neighbour_rank, ExchangeTag::PointSums, message)?;
        }

        let mut received_w = vec![0.0; weight_sums.len()];
        let mut received_v = vec![[0.0; N]; value_sums.len()];
        for proc in &self.processor_points {
            let (points, weights, sums, width) =
                match exchange.receive(proc.neighbour_rank, ExchangeTag::PointSums)? {
                    ExchangeMessage::PointSums {
                        points,
                        weights,
                        sums,
                        width,
                    } => (points, weights, sums, width),
                    other => return Err(unexpected(exchange.rank(), "PointSums", &other)),
                };
            if width != N || weights.len() != points.len() || sums.len() != N * points.len() {
                return Err(AdvectionError::exchange(
                    exchange.rank(),
                    format!("分区 {} 的点部分和布局不符", proc.neighbour_rank),
                ));
            }

            let matches = match_points(&proc.coords, &points, proc.match_tol);
            for (local, remote) in proc.points.iter().zip(matches) {
                let Some(r) = remote else {
                    log::warn!(
                        "分区 {}: 补丁点 {local} 在分区 {} 中没有对应点",
                        exchange.rank(),
                        proc.neighbour_rank
                    );
                    continue;
                };
                received_w[*local] += weights[r];
                for k in 0..N {
                    received_v[*local][k] += sums[N * r + k];
                }
            }
        }

        for (w, r) in weight_sums.iter_mut().zip(received_w) {
            *w += r;
        }
        for (v, r) in value_sums.iter_mut().zip(received_v) {
            for k in 0..N {
                v[k] += r[k];
            }
        }
        Ok(())
    }
}

/// 按坐标为每个本地点找到远端点序号
fn match_points(local: &[DVec3], remote: &[DVec3], tol: f64) -> Vec<Option<usize>> {
    let mut order: Vec<usize> = (0..remote.len()).collect();
    order.sort_by(|&a, &b| remote[a].x.total_cmp(&remote[b].x));
    local
        .iter()
        .map(|x| {
            let start = order.partition_point(|&r| remote[r].x < x.x - tol);
            order[start..]
                .iter()
                .take_while(|&&r| remote[r].x <= x.x + tol)
                .copied()
                .find(|&r| remote[r].distance(*x) <= tol)
        })
        .collect()
}

/// 单元内任意点的值：单元形心与单元顶点按距离倒数加权
///
/// `x` 与某个样本点重合时直接返回该样本值。
pub fn interpolate_cell_point<T>(
    mesh: &PolyMesh,
    cell: usize,
    x: DVec3,
    cell_value: T,
    point_values: &[T],
) -> T
where
    T: Copy + Default + std::ops::Add<Output = T> + std::ops::Mul<f64, Output = T>,
{
    let tiny = 1e-12 * mesh.cell_length(cell);
    let centre = mesh.cell_centre(cell);
    let d = x.distance(centre);
    if d < tiny {
        return cell_value;
    }
    let mut sum = cell_value * (1.0 / d);
    let mut w_sum = 1.0 / d;
    for &p in mesh.cell_points(cell) {
        let Some(&v) = point_values.get(p) else {
            continue;
        };
        let d = x.distance(mesh.points()[p]);
        if d < tiny {
            return v;
        }
        sum = sum + v * (1.0 / d);
        w_sum += 1.0 / d;
    }
    sum * (1.0 / w_sum)
}

/// 单元的 Green-Gauss 梯度
///
/// 内部面取两侧单元值的算术平均，边界面值由 `boundary_value` 给出。
pub fn green_gauss_gradient(
    mesh: &PolyMesh,
    cell: usize,
    values: &[f64],
    boundary_value: impl Fn(usize) -> f64,
) -> DVec3 {
    let volume = mesh.cell_volume(cell);
    if volume <= 0.0 {
        return DVec3::ZERO;
    }
    let mut grad = DVec3::ZERO;
    for &face in mesh.cell_faces(cell) {
        let owner = mesh.face_owner(face);
        let sign = if owner == cell { 1.0 } else { -1.0 };
        let phi_f = match mesh.face_neighbour(face) {
            Some(neighbour) => 0.5 * (values[owner] + values[neighbour]),
            None => boundary_value(face),
        };
        grad += sign * phi_f * mesh.face_area(face);
    }
    grad / volume
}
