// crates/iso_advection/src/engine/bounding.rs

//! 通量限制
//!
//! 更新后体积分数超过 1 的单元把多出的液相经下游面推给下游单元:
//! 按 `|phi dt|` 比例分配，每个面不超过剩余容量 `|phi dt - dVf|`。
//! 低于 0 的单元对另一相 `1 - alpha` 做同样的处理，通量取
//! `phi dt - dVf`。

use iso_foundation::tolerance::sign0;
use iso_foundation::SMALL;
use iso_mesh::PolyMesh;
use smallvec::SmallVec;

use super::surface::DOWNWIND_TOL;
use super::{AdvectionStats, IsoAdvection};
use crate::error::AdvectionResult;
use crate::fields::FaceField;

/// 需要有界化的判据
const BOUND_TOL: f64 = 1e-12;

/// 单元内的再分配容差
const REDISTRIBUTE_TOL: f64 = 10.0 * SMALL;

/// 单个单元的再分配轮数上限
const MAX_PASSES: usize = 64;

/// 单元的净流出体积
pub fn net_flux(mesh: &PolyMesh, dvf: &FaceField, cell: usize) -> AdvectionResult<f64> {
    let mut net = 0.0;
    for &face in mesh.cell_faces(cell) {
        let value = dvf.face_value(mesh, face)?;
        if mesh.face_owner(face) == cell {
            net += value;
        } else {
            net -= value;
        }
    }
    Ok(net)
}

/// 单元的下游面：通量流出单元的面
pub fn set_downwind_faces(
    mesh: &PolyMesh,
    phi: &FaceField,
    cell: usize,
    downwind: &mut SmallVec<[usize; 8]>,
) -> AdvectionResult<()> {
    downwind.clear();
    for &face in mesh.cell_faces(cell) {
        let p = phi.face_value(mesh, face)?;
        let out = match mesh.face_neighbour(face) {
            Some(neighbour) if neighbour == cell => p < -DOWNWIND_TOL,
            _ => p > DOWNWIND_TOL,
        };
        if out {
            downwind.push(face);
        }
    }
    Ok(())
}

/// 对 `check` 标记的单元把超过 1 的部分经下游面推出
///
/// 直接修改 `dvf`，返回被修正的面；做过修正的单元在 `bounded` 中置位。
pub fn bound_from_above(
    mesh: &PolyMesh,
    phi: &FaceField,
    dt: f64,
    alpha: &[f64],
    dvf: &mut FaceField,
    check: &[bool],
    bounded: &mut [bool],
) -> AdvectionResult<Vec<usize>> {
    let mut corrected = Vec::new();
    let mut downwind = SmallVec::new();
    let mut open: SmallVec<[(usize, f64, f64); 8]> = SmallVec::new();

    for cell in (0..mesh.n_cells()).filter(|&c| check[c]) {
        let volume = mesh.cell_volume(cell);
        let mut overshoot = alpha[cell] - net_flux(mesh, dvf, cell)? / volume - 1.0;
        let mut pass = 0;

        while overshoot > REDISTRIBUTE_TOL && pass < MAX_PASSES {
            bounded[cell] = true;
            set_downwind_faces(mesh, phi, cell, &mut downwind)?;

            // (面, phi, 剩余容量)
            open.clear();
            let mut total = 0.0;
            for &face in &downwind {
                let p = phi.face_value(mesh, face)?;
                let capacity = (p * dt - dvf.face_value(mesh, face)?).abs();
                if capacity / volume > REDISTRIBUTE_TOL {
                    open.push((face, p, capacity));
                    total += (p * dt).abs();
                }
            }
            if open.is_empty() || total <= 0.0 {
                log::debug!("单元 {cell} 无法继续推出液相, 剩余超出 {overshoot:.3e}");
                break;
            }

            let surplus = overshoot * volume;
            let mut n_unsaturated = 0;
            for &(face, p, capacity) in &open {
                let share = surplus * (p * dt).abs() / total;
                if capacity >= share {
                    n_unsaturated += 1;
                }
                let value = dvf.face_value(mesh, face)? + sign0(p) * share.min(capacity);
                dvf.set_face_value(mesh, face, value)?;
                if pass == 0 {
                    corrected.push(face);
                }
            }

            pass += 1;
            overshoot = alpha[cell] - net_flux(mesh, dvf, cell)? / volume - 1.0;
            if n_unsaturated == 0 {
                break;
            }
        }
    }
    Ok(corrected)
}

impl IsoAdvection {
    /// 超出 / 低于界限的待检查单元数
    fn count_unbounded(&self, mesh: &PolyMesh) -> AdvectionResult<(usize, usize)> {
        let mut over = 0;
        let mut under = 0;
        for cell in (0..mesh.n_cells()).filter(|&c| self.check_bounding[c]) {
            let a = self.alpha[cell] - net_flux(mesh, &self.dvf, cell)? / mesh.cell_volume(cell);
            if a > 1.0 + BOUND_TOL {
                over += 1;
            } else if a < -BOUND_TOL {
                under += 1;
            }
        }
        Ok((over, under))
    }

    /// 有界化迭代，每次修正后同步处理器补丁
    pub(super) fn limit_fluxes(
        &mut self,
        mesh: &PolyMesh,
        phi: &FaceField,
        dt: f64,
        stats: &mut AdvectionStats,
    ) -> AdvectionResult<()> {
        for _ in 0..self.config.n_alpha_bounds {
            let (over, under) = self.count_unbounded(mesh)?;
            let over = self.exchange.sum_reduce(over as f64)?;
            let under = self.exchange.sum_reduce(under as f64)?;
            if over == 0.0 && under == 0.0 {
                break;
            }
            stats.bounding_iterations += 1;

            if over > 0.0 {
                log::debug!("有界化: 全局 {over} 个单元超过 1");
                let mut corrected = self.dvf.clone();
                let faces = bound_from_above(
                    mesh,
                    phi,
                    dt,
                    &self.alpha,
                    &mut corrected,
                    &self.check_bounding,
                    &mut self.bounded,
                )?;
                for face in faces {
                    self.dvf.set_face_value(mesh, face, corrected.face_value(mesh, face)?)?;
                    self.record_proc_face(mesh, face);
                }
                self.sync_proc_patches(mesh)?;
            }

            if under > 0.0 {
                log::debug!("有界化: 全局 {under} 个单元低于 0");
                let alpha2: Vec<f64> = self.alpha.iter().map(|a| 1.0 - a).collect();
                let mut corrected = phi.zip_with(&self.dvf, |p, v| p * dt - v)?;
                let faces = bound_from_above(
                    mesh,
                    phi,
                    dt,
                    &alpha2,
                    &mut corrected,
                    &self.check_bounding,
                    &mut self.bounded,
                )?;
                for face in faces {
                    let p = phi.face_value(mesh, face)?;
                    self.dvf.set_face_value(mesh, face, p * dt - corrected.face_value(mesh, face)?)?;
                    self.record_proc_face(mesh, face);
                }
                self.sync_proc_patches(mesh)?;
            }
        }
        Ok(())
    }
}
