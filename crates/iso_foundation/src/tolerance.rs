// crates/iso_foundation/src/tolerance.rs

//! 几何容差
//!
//! 切割算法中的比较阈值统一定义在此处。`SMALL` 系列常量与双精度有限体积
//! 程序的惯用取值一致；`GeometricTolerance` 提供按特征长度缩放的相对容差，
//! 通过参数传递而非全局状态。

use serde::{Deserialize, Serialize};

/// 小量，切割时等值判定的基准（实际吸附阈值为 `10 * SMALL`）
pub const SMALL: f64 = 1.0e-15;

/// 极小量，用于防止除零
pub const VSMALL: f64 = 1.0e-300;

/// `VSMALL` 的平方根
pub const ROOTVSMALL: f64 = 1.0e-150;

/// 等值面吸附阈值：距离等值小于该值的顶点值视为位于等值之上
pub const SNAP_TOL: f64 = 10.0 * SMALL;

/// 按特征长度缩放的几何容差
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeometricTolerance {
    /// 点重合的相对容差（乘以特征长度）
    #[serde(default = "default_point_merge")]
    pub point_merge: f64,
    /// 平面切割时顶点到平面距离的相对容差
    #[serde(default = "default_plane_snap")]
    pub plane_snap: f64,
    /// 面闭合检查的相对容差（乘以面积尺度）
    #[serde(default = "default_closedness")]
    pub closedness: f64,
}

fn default_point_merge() -> f64 {
    1.0e-8
}

fn default_plane_snap() -> f64 {
    1.0e-9
}

fn default_closedness() -> f64 {
    1.0e-6
}

impl Default for GeometricTolerance {
    fn default() -> Self {
        Self {
            point_merge: default_point_merge(),
            plane_snap: default_plane_snap(),
            closedness: default_closedness(),
        }
    }
}

impl GeometricTolerance {
    /// 特征长度为 `length` 时的点重合距离
    #[inline]
    pub fn merge_distance(&self, length: f64) -> f64 {
        (self.point_merge * length).max(SNAP_TOL)
    }

    /// 特征长度为 `length` 时的平面吸附距离
    #[inline]
    pub fn snap_distance(&self, length: f64) -> f64 {
        (self.plane_snap * length).max(SNAP_TOL)
    }
}

/// 安全除法：分母绝对值小于 `VSMALL` 时返回 `fallback`
#[inline]
pub fn safe_div(num: f64, den: f64, fallback: f64) -> f64 {
    if den.abs() < VSMALL {
        fallback
    } else {
        num / den
    }
}

/// 正部指示函数：`x >= 0` 时为 1
#[inline]
pub fn pos0(x: f64) -> f64 {
    if x >= 0.0 {
        1.0
    } else {
        0.0
    }
}

/// 负部指示函数：`x <= 0` 时为 1
#[inline]
pub fn neg0(x: f64) -> f64 {
    if x <= 0.0 {
        1.0
    } else {
        0.0
    }
}

/// 符号函数，零视为正
#[inline]
pub fn sign0(x: f64) -> f64 {
    if x >= 0.0 {
        1.0
    } else {
        -1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tolerance() {
        let tol = GeometricTolerance::default();
        assert!((tol.point_merge - 1e-8).abs() < 1e-20);
        assert!(tol.merge_distance(1.0) > tol.snap_distance(1.0));
        assert!(tol.merge_distance(0.0) >= SNAP_TOL);
    }

    #[test]
    fn test_indicator_functions() {
        assert_eq!(pos0(0.0), 1.0);
        assert_eq!(pos0(-1e-20), 0.0);
        assert_eq!(neg0(0.0), 1.0);
        assert_eq!(neg0(1e-20), 0.0);
        assert_eq!(sign0(0.0), 1.0);
        assert_eq!(sign0(-2.0), -1.0);
    }

    #[test]
    fn test_safe_div() {
        assert_eq!(safe_div(1.0, 2.0, 0.0), 0.5);
        assert_eq!(safe_div(1.0, 0.0, -1.0), -1.0);
    }

    #[test]
    fn test_serde_partial_config() {
        let tol: GeometricTolerance = serde_json::from_str(r#"{"point_merge": 1e-6}"#).unwrap();
        assert!((tol.point_merge - 1e-6).abs() < 1e-20);
        assert!((tol.plane_snap - 1e-9).abs() < 1e-20);
    }
}
