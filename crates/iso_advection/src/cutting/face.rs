// crates/iso_advection/src/cutting/face.rs

//! 面切割
//!
//! 按顶点上的标量值把多边形面切成等值线以上（湿）和以下两部分。
//!
//! # 判定规则
//!
//! 与等值的距离小于 [`SNAP_TOL`] 的顶点值被抬高 `SNAP_TOL`，即恰好等于
//! 等值的顶点算作"以上"。因此所有顶点都等于等值的面被判为 `Above`，
//! 重复切割结果不变。

use glam::DVec3;
use iso_foundation::SNAP_TOL;
use iso_mesh::geometry::polygon_centre_and_area;
use smallvec::SmallVec;

use crate::error::{AdvectionError, AdvectionResult};

/// 面上的短点列
pub type PointList = SmallVec<[DVec3; 8]>;

/// 面相对等值的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceStatus {
    /// 全部在等值以下
    Below,
    /// 被等值线穿过
    Cut,
    /// 全部在等值以上
    Above,
}

/// 面切割结果
#[derive(Debug, Clone, PartialEq)]
pub struct FaceCut {
    /// 状态
    pub status: FaceStatus,
    /// 湿子面顶点（保持原面走向）
    pub sub_face_points: PointList,
    /// 湿子面形心
    pub sub_face_centre: DVec3,
    /// 湿子面面积矢量
    pub sub_face_area: DVec3,
    /// 等值线段端点：先为进入湿区的交点，后为离开湿区的交点
    pub interface_points: SmallVec<[DVec3; 2]>,
}

impl FaceCut {
    fn below() -> Self {
        Self {
            status: FaceStatus::Below,
            sub_face_points: PointList::new(),
            sub_face_centre: DVec3::ZERO,
            sub_face_area: DVec3::ZERO,
            interface_points: SmallVec::new(),
        }
    }

    /// 湿子面面积
    #[inline]
    pub fn sub_face_mag_area(&self) -> f64 {
        self.sub_face_area.length()
    }
}

#[inline]
fn lifted(value: f64, iso_value: f64) -> f64 {
    let d = value - iso_value;
    if d.abs() < SNAP_TOL {
        SNAP_TOL
    } else {
        d
    }
}

/// 切割一个面
///
/// `points` 与 `values` 一一对应。多于两个交点时返回
/// [`AdvectionError::DegenerateFaceGeometry`]。
pub fn cut_face(points: &[DVec3], values: &[f64], iso_value: f64) -> AdvectionResult<FaceCut> {
    AdvectionError::check_size("face_values", points.len(), values.len())?;
    let n = points.len();
    if n < 3 {
        return Err(AdvectionError::invalid_input(format!("面只有 {n} 个顶点")));
    }

    let d: SmallVec<[f64; 8]> = values.iter().map(|&v| lifted(v, iso_value)).collect();

    let mut sub = PointList::new();
    let mut crossings: SmallVec<[(usize, DVec3); 2]> = SmallVec::new();
    let mut n_crossings = 0;
    // 第一个进入湿区的交点在 sub 中的位置
    let mut entry_slot = None;

    for i in 0..n {
        let j = (i + 1) % n;
        if d[i] > 0.0 {
            sub.push(points[i]);
        }
        if (d[i] > 0.0) != (d[j] > 0.0) {
            let t = d[i] / (d[i] - d[j]);
            let x = points[i] + t * (points[j] - points[i]);
            n_crossings += 1;
            if d[j] > 0.0 && entry_slot.is_none() {
                entry_slot = Some(sub.len());
            }
            if crossings.len() < 2 {
                crossings.push((usize::from(d[j] > 0.0), x));
            }
            sub.push(x);
        }
    }

    match n_crossings {
        0 if d.iter().all(|&v| v > 0.0) => {
            let (centre, area) = polygon_centre_and_area(points);
            Ok(FaceCut {
                status: FaceStatus::Above,
                sub_face_points: points.iter().copied().collect(),
                sub_face_centre: centre,
                sub_face_area: area,
                interface_points: SmallVec::new(),
            })
        }
        0 => Ok(FaceCut::below()),
        2 => {
            if let Some(slot) = entry_slot {
                sub.rotate_left(slot);
            }
            let (centre, area) = polygon_centre_and_area(&sub);
            // 进入点排在前面
            let mut interface: SmallVec<[DVec3; 2]> = SmallVec::new();
            let (entry, exit) = if crossings[0].0 == 1 {
                (crossings[0].1, crossings[1].1)
            } else {
                (crossings[1].1, crossings[0].1)
            };
            interface.push(entry);
            interface.push(exit);
            Ok(FaceCut {
                status: FaceStatus::Cut,
                sub_face_points: sub,
                sub_face_centre: centre,
                sub_face_area: area,
                interface_points: interface,
            })
        }
        k => Err(AdvectionError::DegenerateFaceGeometry {
            crossings: k,
            n_points: n,
        }),
    }
}

/// 沿面边界找出函数值等于 `f0` 的点
///
/// 与 `f0` 距离小于 [`SNAP_TOL`] 的顶点视为恰在等值上并直接加入结果，
/// 因此面与等值面平行时所有顶点都会返回。结果可能多于两个点，由调用方
/// 处理。
pub fn cut_points(points: &[DVec3], values: &[f64], f0: f64) -> PointList {
    let n = points.len();
    let mut result = PointList::new();
    if n == 0 || values.len() != n {
        return result;
    }
    let snap = |v: f64| if (v - f0).abs() < SNAP_TOL { f0 } else { v };

    let mut f1 = snap(values[0]);
    for i in 0..n {
        let j = (i + 1) % n;
        let f2 = snap(values[j]);
        if f1 == f0 {
            result.push(points[i]);
        } else if (f1 < f0 && f2 > f0) || (f1 > f0 && f2 < f0) {
            let s = (f0 - f1) / (f2 - f1);
            result.push(points[i] + s * (points[j] - points[i]));
        }
        f1 = f2;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> Vec<DVec3> {
        vec![
            DVec3::new(0.0, 0.0, 0.0),
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(1.0, 1.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
        ]
    }

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn test_half_cut() {
        let pts = unit_square();
        let values: Vec<f64> = pts.iter().map(|p| p.x).collect();
        let cut = cut_face(&pts, &values, 0.25).unwrap();
        assert_eq!(cut.status, FaceStatus::Cut);
        assert_eq!(cut.interface_points.len(), 2);
        assert!(approx_eq(cut.sub_face_area.z, 0.75));
        assert!(approx_eq(cut.sub_face_centre.x, 0.625));
        assert!(approx_eq(cut.sub_face_centre.y, 0.5));
        // 子面以进入湿区的交点开头，以离开的交点结尾
        assert_eq!(cut.sub_face_points[0], cut.interface_points[0]);
        assert_eq!(*cut.sub_face_points.last().unwrap(), cut.interface_points[1]);
        for p in &cut.interface_points {
            assert!(approx_eq(p.x, 0.25));
        }
    }

    #[test]
    fn test_corner_cut_keeps_orientation() {
        let pts = unit_square();
        let values: Vec<f64> = pts.iter().map(|p| p.x + p.y).collect();
        let cut = cut_face(&pts, &values, 1.5).unwrap();
        assert_eq!(cut.status, FaceStatus::Cut);
        assert_eq!(cut.sub_face_points.len(), 3);
        assert!(approx_eq(cut.sub_face_area.z, 0.125));
    }

    #[test]
    fn test_uncut_faces() {
        let pts = unit_square();
        let values = vec![1.0, 2.0, 3.0, 4.0];
        let above = cut_face(&pts, &values, 0.0).unwrap();
        assert_eq!(above.status, FaceStatus::Above);
        assert!(approx_eq(above.sub_face_area.z, 1.0));
        assert!(above.interface_points.is_empty());

        let below = cut_face(&pts, &values, 10.0).unwrap();
        assert_eq!(below.status, FaceStatus::Below);
        assert!(below.sub_face_points.is_empty());
        assert_eq!(below.sub_face_area, DVec3::ZERO);
    }

    #[test]
    fn test_all_values_at_iso_are_above() {
        let pts = unit_square();
        let values = vec![0.5; 4];
        let first = cut_face(&pts, &values, 0.5).unwrap();
        assert_eq!(first.status, FaceStatus::Above);
        assert!(approx_eq(first.sub_face_mag_area(), 1.0));

        let again = cut_face(&first.sub_face_points, &values, 0.5).unwrap();
        assert_eq!(again.status, FaceStatus::Above);
        assert_eq!(again.sub_face_area, first.sub_face_area);
    }

    #[test]
    fn test_vertex_on_iso_counts_as_above() {
        let pts = unit_square();
        let values = vec![0.0, 1.0, 0.0, -1.0];
        let cut = cut_face(&pts, &values, 0.0).unwrap();
        assert_eq!(cut.status, FaceStatus::Cut);
        // 顶点 0 与 2 被抬高到等值以上, 只有顶点 3 在以下, 切线贴近对角线
        assert_eq!(cut.sub_face_points.len(), 5);
        assert!((cut.sub_face_area.z - 0.5).abs() < 1e-10);
    }

    #[test]
    fn test_saddle_is_degenerate() {
        let pts = unit_square();
        let values = vec![1.0, -1.0, 1.0, -1.0];
        assert!(matches!(
            cut_face(&pts, &values, 0.0),
            Err(AdvectionError::DegenerateFaceGeometry { crossings: 4, .. })
        ));
    }

    #[test]
    fn test_cut_points() {
        let pts = unit_square();
        let values: Vec<f64> = pts.iter().map(|p| p.y).collect();
        let cut = cut_points(&pts, &values, 0.5);
        assert_eq!(cut.len(), 2);
        assert!(cut.iter().all(|p| approx_eq(p.y, 0.5)));

        // 面与等值面平行时返回全部顶点
        let flat = cut_points(&pts, &[0.3; 4], 0.3);
        assert_eq!(flat.len(), 4);
    }
}
