// crates/iso_advection/tests/common/mod.rs

//! 集成测试公用工具：涡旋流场与圆盘初场

#![allow(dead_code)]

use glam::DVec3;
use iso_advection::cutting::CellCutter;
use iso_advection::{FaceField, IsoAdvectionConfig};
use iso_mesh::PolyMesh;
use std::f64::consts::PI;

/// 流函数 `sin(πx) sin(πy)`，在单位正方形边界上为零
pub fn stream_function(p: DVec3) -> f64 {
    (PI * p.x).sin() * (PI * p.y).sin()
}

/// 由流函数得到的面体积通量
///
/// 通量等于 `ψ ẑ` 沿面边界的环量，只有 z 向的棱有贡献。每条棱在相邻
/// 两个面上方向相反，离散散度严格为零。
pub fn vortex_flux(mesh: &PolyMesh) -> FaceField {
    FaceField::from_fn(mesh, |f| {
        let points = mesh.face_points(f);
        let n = points.len();
        (0..n)
            .map(|i| {
                let a = points[i];
                let b = points[(i + 1) % n];
                stream_function(0.5 * (a + b)) * (b.z - a.z)
            })
            .sum()
    })
}

/// 单元中心速度 `(∂ψ/∂y, -∂ψ/∂x)`
pub fn vortex_velocity(mesh: &PolyMesh) -> Vec<DVec3> {
    mesh.cell_centres()
        .iter()
        .map(|c| {
            DVec3::new(
                PI * (PI * c.x).sin() * (PI * c.y).cos(),
                -PI * (PI * c.x).cos() * (PI * c.y).sin(),
                0.0,
            )
        })
        .collect()
}

/// 圆盘（沿 z 拉伸的圆柱）内为液相的体积分数
pub fn disc_alpha(mesh: &PolyMesh, centre: DVec3, radius: f64) -> Vec<f64> {
    let values: Vec<f64> = mesh
        .points()
        .iter()
        .map(|p| radius - (*p - centre).truncate().length())
        .collect();
    CellCutter::new(mesh)
        .volume_of_fluid_field(&values, 0.0)
        .unwrap()
}

/// 涡旋算例的时间步：最大速度 π，库朗数 0.2
pub fn vortex_dt(n: usize) -> f64 {
    0.2 / (n as f64 * PI)
}

/// 不做强制有界化的配置，用于检查守恒
pub fn conservative_config() -> IsoAdvectionConfig {
    IsoAdvectionConfig {
        clip: false,
        snap_tol: 0.0,
        ..Default::default()
    }
}

pub fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() <= tol
}
