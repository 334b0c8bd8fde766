// crates/iso_advection/src/engine/surface.rs

//! 表面单元的几何通量
//!
//! 先对所有表面单元计算界面和下游面通量（可并行，互不写共享数据），再
//! 按单元顺序写回 `dVf`，结果与串行执行一致。

use glam::DVec3;
use iso_foundation::tolerance::sign0;
use iso_foundation::SMALL;
use iso_mesh::PolyMesh;
use rayon::prelude::*;
use smallvec::SmallVec;

use super::{AdvectionStats, IsoAdvection};
use crate::config::IsoAdvectionConfig;
use crate::cutting::{CellCutter, CellStatus};
use crate::error::AdvectionResult;
use crate::fields::FaceField;
use crate::flux::{time_integrated_face_flux, IsoFace};
use crate::interpolation::{green_gauss_gradient, interpolate_cell_point};

/// 下游面判据
pub(super) const DOWNWIND_TOL: f64 = 10.0 * SMALL;

/// 一个表面单元的计算结果
#[derive(Debug, Default)]
struct SurfaceCellFlux {
    cell: usize,
    iso_face: Option<IsoFace>,
    iso_loops: Vec<Vec<DVec3>>,
    /// (全局面号, dVf)
    face_fluxes: SmallVec<[(usize, f64); 6]>,
    cut_failed: bool,
    face_failures: usize,
    degenerate_normals: usize,
}

/// 计算表面单元通量所需的只读数据
struct FluxContext<'a> {
    mesh: &'a PolyMesh,
    phi: &'a FaceField,
    alpha: &'a [f64],
    u: &'a [DVec3],
    point_alpha: &'a [f64],
    point_u: &'a [DVec3],
    gradients: Option<&'a [DVec3]>,
    cutter: CellCutter<'a>,
    config: &'a IsoAdvectionConfig,
    dt: f64,
}

impl FluxContext<'_> {
    fn cell_flux(&self, cell: usize) -> AdvectionResult<SurfaceCellFlux> {
        let mut result = SurfaceCellFlux {
            cell,
            ..Default::default()
        };
        let cut = match self.cutter.vof_cut(
            cell,
            self.point_alpha,
            self.alpha[cell],
            self.config.vof_to_iso_tol,
            self.config.max_iso_iterations,
        ) {
            Ok((_, cut)) => cut,
            Err(err) if err.is_local_geometry() => {
                log::warn!("单元 {cell} 界面重构失败, 保留迎风通量: {err}");
                result.cut_failed = true;
                return Ok(result);
            }
            Err(err) => return Err(err),
        };
        if cut.status != CellStatus::Cut {
            return Ok(result);
        }

        let normal = match self.gradients {
            Some(grads) => -grads[cell],
            None => cut.iso_face_area,
        };
        let n0 = normal.try_normalize().unwrap_or(DVec3::ZERO);
        let x0 = cut.iso_face_centre;
        let u0 = interpolate_cell_point(self.mesh, cell, x0, self.u[cell], self.point_u);
        let iso = IsoFace {
            centre: x0,
            normal: n0,
            normal_speed: u0.dot(n0),
        };

        for &face in self.mesh.cell_faces(cell) {
            let phi_f = self.phi.face_value(self.mesh, face)?;
            let downwind = match self.mesh.face_neighbour(face) {
                Some(neighbour) => {
                    (self.mesh.face_owner(face) == cell && phi_f > DOWNWIND_TOL)
                        || (neighbour == cell && phi_f < -DOWNWIND_TOL)
                }
                // 空补丁上 phi 读为 0
                None => phi_f > DOWNWIND_TOL,
            };
            if !downwind {
                continue;
            }

            if n0.length() < 0.5 {
                // 法向退化: 有界迎风
                let a = self.alpha[cell];
                let bounded = (a * phi_f * self.dt).abs().min(a * self.mesh.cell_volume(cell));
                result.face_fluxes.push((face, sign0(phi_f) * bounded));
                result.degenerate_normals += 1;
                continue;
            }

            let points = self.mesh.face_points(face);
            match time_integrated_face_flux(
                &points,
                self.mesh.face_centre(face),
                &iso,
                self.dt,
                phi_f,
                self.mesh.face_mag_area(face),
            ) {
                Ok(dvf) => result.face_fluxes.push((face, dvf)),
                Err(err) if err.is_local_geometry() => {
                    log::warn!("单元 {cell} 面 {face} 通量计算失败, 保留迎风通量: {err}");
                    result.face_failures += 1;
                }
                Err(err) => return Err(err),
            }
        }

        if self.config.capture_iso_faces {
            result.iso_loops = cut.iso_face_loops;
        }
        result.iso_face = Some(iso);
        Ok(result)
    }
}

impl IsoAdvection {
    /// 表面单元下游面的几何通量，写入 `dVf`
    ///
    /// 多分区运行时每个分区都必须调用（点插值需要交换）。
    pub(super) fn time_integrated_flux(
        &mut self,
        mesh: &PolyMesh,
        phi: &FaceField,
        u: &[DVec3],
        dt: f64,
        stats: &mut AdvectionStats,
    ) -> AdvectionResult<()> {
        let point_alpha = self.interpolator.interpolate_scalar(&self.alpha, self.exchange.as_ref())?;
        let point_u = self.interpolator.interpolate_vector(u, self.exchange.as_ref())?;

        let gradients: Option<Vec<DVec3>> = self.config.grad_alpha_normal.then(|| {
            self.surface_cells
                .iter()
                .map(|&c| green_gauss_gradient(mesh, c, &self.alpha, |f| self.gradient_face_alpha(mesh, f)))
                .collect()
        });
        // 梯度按单元号索引
        let gradients = gradients.map(|g| {
            let mut full = vec![DVec3::ZERO; mesh.n_cells()];
            for (&c, gc) in self.surface_cells.iter().zip(g) {
                full[c] = gc;
            }
            full
        });

        let ctx = FluxContext {
            mesh,
            phi,
            alpha: &self.alpha,
            u,
            point_alpha: &point_alpha,
            point_u: &point_u,
            gradients: gradients.as_deref(),
            cutter: self.surface_cutter(mesh),
            config: &self.config,
            dt,
        };

        let n = self.surface_cells.len();
        stats.parallel = self.config.parallel.is_parallel(n, self.config.min_parallel_cells);
        let results: Vec<AdvectionResult<SurfaceCellFlux>> = if stats.parallel {
            self.surface_cells.par_iter().map(|&c| ctx.cell_flux(c)).collect()
        } else {
            self.surface_cells.iter().map(|&c| ctx.cell_flux(c)).collect()
        };

        for result in results {
            let result = result?;
            if result.cut_failed {
                stats.n_cut_fallbacks += 1;
            }
            stats.n_face_fallbacks += result.face_failures;
            stats.n_degenerate_normals += result.degenerate_normals;
            for &(face, value) in &result.face_fluxes {
                self.dvf.set_face_value(mesh, face, value)?;
                if !mesh.is_internal_face(face) {
                    self.record_proc_face(mesh, face);
                }
            }
            stats.n_flux_faces += result.face_fluxes.len();
            if result.iso_face.is_some() {
                self.iso_faces.extend(result.iso_loops);
            }
            self.mark_for_bounding(mesh, result.cell);
        }
        Ok(())
    }

    /// 表面单元的切割器，体积分数距 0 或 1 不足 `surf_cell_tol` 的切割结果
    /// 按未切割处理
    pub(super) fn surface_cutter<'m>(&self, mesh: &'m PolyMesh) -> CellCutter<'m> {
        CellCutter::new(mesh).with_band_tol(self.config.surf_cell_tol)
    }

    /// 单元、相邻单元及相邻单元的相邻单元需要检查有界性
    ///
    /// 越过处理器补丁的部分由 [`IsoAdvection::exchange_bounding_marks`] 补上。
    fn mark_for_bounding(&mut self, mesh: &PolyMesh, cell: usize) {
        self.check_bounding[cell] = true;
        for n in mesh.cell_cells(cell) {
            self.check_bounding[n] = true;
            for m in mesh.cell_cells(n) {
                self.check_bounding[m] = true;
            }
        }
    }

    /// 梯度计算用的边界面值（空补丁取所属单元值）
    fn gradient_face_alpha(&self, mesh: &PolyMesh, face: usize) -> f64 {
        match mesh.which_patch(face) {
            Some(patch) if !mesh.patch(patch).kind.is_empty() => {
                self.boundary_face_alpha(mesh, patch, face - mesh.patch(patch).start)
            }
            _ => self.alpha[mesh.face_owner(face)],
        }
    }
}
