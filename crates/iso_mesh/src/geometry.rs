// crates/iso_mesh/src/geometry.rs

//! 多边形与多面体几何量
//!
//! 面与切割子面共用同一套多边形形心/面积公式，单元体积和形心通过面锥体
//! 分解计算。这些函数同时服务于网格几何初始化和界面切割算法，保证两处
//! 得到的几何量彼此一致。

use glam::DVec3;
use iso_foundation::{ROOTVSMALL, VSMALL};

/// 多边形形心与面积矢量
///
/// 以顶点均值为锥顶做三角扇分解，每个三角形按其面积在总法向上的投影
/// 加权求形心。面积矢量方向由顶点顺序按右手定则确定。
///
/// 少于三个点时返回零面积；面积过小时形心退化为顶点均值。
pub fn polygon_centre_and_area(points: &[DVec3]) -> (DVec3, DVec3) {
    match points.len() {
        0 => (DVec3::ZERO, DVec3::ZERO),
        1 => (points[0], DVec3::ZERO),
        2 => (0.5 * (points[0] + points[1]), DVec3::ZERO),
        3 => {
            let centre = (points[0] + points[1] + points[2]) / 3.0;
            let area = 0.5 * (points[1] - points[0]).cross(points[2] - points[0]);
            (centre, area)
        }
        n => {
            let mean = points.iter().copied().sum::<DVec3>() / n as f64;

            let mut sum_n = DVec3::ZERO;
            for i in 0..n {
                let p = points[i];
                let next = points[(i + 1) % n];
                sum_n += (next - p).cross(mean - p);
            }
            let mag_n = sum_n.length();
            if mag_n < ROOTVSMALL {
                return (mean, DVec3::ZERO);
            }
            let n_hat = sum_n / mag_n;

            let mut sum_a = 0.0;
            let mut sum_ac = DVec3::ZERO;
            for i in 0..n {
                let p = points[i];
                let next = points[(i + 1) % n];
                let tri_n = (next - p).cross(mean - p);
                let a = tri_n.dot(n_hat);
                sum_a += a;
                sum_ac += a * (p + next + mean);
            }

            let centre = if sum_a.abs() < VSMALL {
                mean
            } else {
                sum_ac / (3.0 * sum_a)
            };
            (centre, 0.5 * sum_n)
        }
    }
}

/// 面锥体分解求多面体形心与体积
///
/// `faces` 给出每个面的 `(形心, 外法向面积矢量)`。锥顶取面形心均值，
/// 每个面与锥顶构成锥体，体积的 3 倍为 `S·(C - c_est)`，锥体形心为
/// `0.75 C + 0.25 c_est`。
pub fn pyramid_centre_and_volume<I>(faces: I) -> (DVec3, f64)
where
    I: IntoIterator<Item = (DVec3, DVec3)>,
    I::IntoIter: Clone,
{
    let iter = faces.into_iter();
    let (sum, count) = iter
        .clone()
        .fold((DVec3::ZERO, 0usize), |(s, n), (c, _)| (s + c, n + 1));
    if count == 0 {
        return (DVec3::ZERO, 0.0);
    }
    let c_est = sum / count as f64;

    let mut vol3 = 0.0;
    let mut centre_sum = DVec3::ZERO;
    for (c, s) in iter {
        let pyr3 = s.dot(c - c_est);
        vol3 += pyr3;
        centre_sum += pyr3 * (0.75 * c + 0.25 * c_est);
    }

    let centre = if vol3.abs() > VSMALL {
        centre_sum / vol3
    } else {
        c_est
    };
    (centre, vol3 / 3.0)
}

/// 按给定法向构造平面内正交基 `(e1, e2)`
pub fn plane_basis(normal: DVec3) -> (DVec3, DVec3) {
    let n = normal.normalize_or_zero();
    let helper = if n.x.abs() < 0.9 { DVec3::X } else { DVec3::Y };
    let e1 = (helper - helper.dot(n) * n).normalize_or_zero();
    let e2 = n.cross(e1);
    (e1, e2)
}

/// 将共面点按绕 `normal` 的逆时针顺序排序，返回排序后的下标
pub fn sort_around(points: &[DVec3], normal: DVec3) -> Vec<usize> {
    if points.is_empty() {
        return Vec::new();
    }
    let centre = points.iter().copied().sum::<DVec3>() / points.len() as f64;
    let (e1, e2) = plane_basis(normal);
    let mut order: Vec<(usize, f64)> = points
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let d = *p - centre;
            (i, d.dot(e2).atan2(d.dot(e1)))
        })
        .collect();
    order.sort_by(|a, b| a.1.total_cmp(&b.1));
    order.into_iter().map(|(i, _)| i).collect()
}
