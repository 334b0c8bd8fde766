// crates/iso_advection/src/engine/mod.rs

//! 几何界面输运引擎
//!
//! 每个时间步:
//!
//! 1. 刷新边界体积分数，按迎风格式初始化面液相体积通量 `dVf`
//! 2. 找出表面单元 `tol < alpha < 1 - tol`
//! 3. 体积分数和速度插值到点，在每个表面单元内反求界面，计算下游面
//!    的时间积分通量
//! 4. 同步处理器补丁上的通量
//! 5. 限制通量使体积分数保持在 `[0, 1]`
//! 6. `alpha -= ΣdVf / V`
//! 7. 强制有界化（吸附、截断）
//!
//! 单元级几何失败（等值搜索不收敛、面切割退化）保留迎风通量，计数并
//! 记录日志。

mod bounding;
mod surface;
mod sync;

pub use bounding::{bound_from_above, net_flux, set_downwind_faces};

use glam::DVec3;
use iso_mesh::{MeshMap, PolyMesh};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::IsoAdvectionConfig;
use crate::error::{AdvectionError, AdvectionResult};
use crate::exchange::{ProcessorExchange, SerialExchange};
use crate::fields::FaceField;
use crate::interpolation::PointInterpolator;

/// 边界补丁上的体积分数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum BoundaryAlpha {
    /// 取所属单元值
    ZeroGradient,
    /// 给定值（入流边界），每个补丁面一个
    Fixed(Vec<f64>),
    /// 相邻分区的单元值（处理器补丁）
    Processor,
}

/// 单步统计
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdvectionStats {
    /// 本分区表面单元数
    pub n_surface_cells: usize,
    /// 全局表面单元数
    pub n_global_surface_cells: usize,
    /// 按几何方法计算通量的面数
    pub n_flux_faces: usize,
    /// 等值搜索失败、整个单元保留迎风通量的次数
    pub n_cut_fallbacks: usize,
    /// 单个面通量计算失败的次数
    pub n_face_fallbacks: usize,
    /// 界面法向退化、使用有界迎风通量的面数
    pub n_degenerate_normals: usize,
    /// 做过通量修正的单元数
    pub n_bounded_cells: usize,
    /// 有界化迭代次数
    pub bounding_iterations: usize,
    /// 强制有界化前的最小体积分数
    pub alpha_min: f64,
    /// 强制有界化前的最大体积分数
    pub alpha_max: f64,
    /// 步前液相体积
    pub volume_before: f64,
    /// 步后液相体积
    pub volume_after: f64,
    /// 表面单元是否并行切割
    pub parallel: bool,
    /// 耗时
    pub duration: Duration,
}

/// 几何界面输运引擎
pub struct IsoAdvection {
    config: IsoAdvectionConfig,
    exchange: Arc<dyn ProcessorExchange>,
    /// 单元体积分数
    alpha: Vec<f64>,
    /// 每个补丁的边界体积分数
    boundary_alpha: Vec<BoundaryAlpha>,
    /// 处理器补丁上相邻分区的单元值
    neighbour_alpha: Vec<Vec<f64>>,
    interpolator: PointInterpolator,
    /// 面液相体积通量
    dvf: FaceField,
    surface_cells: Vec<usize>,
    check_bounding: Vec<bool>,
    bounded: Vec<bool>,
    /// 每个处理器补丁上待同步的面（补丁内序号）
    proc_faces: Vec<Vec<usize>>,
    iso_faces: Vec<Vec<DVec3>>,
    advection_time: Duration,
    last_dt: Option<f64>,
    last_stats: AdvectionStats,
    /// (单元数, 面数, 点数)，用于发现未通知的拓扑变化
    mesh_signature: (usize, usize, usize),
}

impl std::fmt::Debug for IsoAdvection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsoAdvection")
            .field("rank", &self.exchange.rank())
            .field("n_cells", &self.alpha.len())
            .field("n_surface_cells", &self.surface_cells.len())
            .field("advection_time", &self.advection_time)
            .finish()
    }
}

fn signature(mesh: &PolyMesh) -> (usize, usize, usize) {
    (mesh.n_cells(), mesh.n_faces(), mesh.n_points())
}

fn default_boundary_alpha(mesh: &PolyMesh) -> Vec<BoundaryAlpha> {
    mesh.patches()
        .iter()
        .map(|p| {
            if p.is_processor() {
                BoundaryAlpha::Processor
            } else {
                BoundaryAlpha::ZeroGradient
            }
        })
        .collect()
}

impl IsoAdvection {
    /// 创建引擎
    pub fn new(
        mesh: &PolyMesh,
        alpha: Vec<f64>,
        config: IsoAdvectionConfig,
        exchange: Arc<dyn ProcessorExchange>,
    ) -> AdvectionResult<Self> {
        config.validate()?;
        AdvectionError::check_size("alpha", mesh.n_cells(), alpha.len())?;
        check_processor_patches(mesh, exchange.as_ref())?;

        let n_cells = mesh.n_cells();
        Ok(Self {
            interpolator: PointInterpolator::new(mesh),
            dvf: FaceField::zeros(mesh),
            boundary_alpha: default_boundary_alpha(mesh),
            neighbour_alpha: vec![Vec::new(); mesh.n_patches()],
            proc_faces: vec![Vec::new(); mesh.n_patches()],
            surface_cells: Vec::new(),
            check_bounding: vec![false; n_cells],
            bounded: vec![false; n_cells],
            iso_faces: Vec::new(),
            advection_time: Duration::ZERO,
            last_dt: None,
            last_stats: AdvectionStats::default(),
            mesh_signature: signature(mesh),
            config,
            exchange,
            alpha,
        })
    }

    /// 单分区引擎
    pub fn serial(mesh: &PolyMesh, alpha: Vec<f64>, config: IsoAdvectionConfig) -> AdvectionResult<Self> {
        Self::new(mesh, alpha, config, Arc::new(SerialExchange))
    }

    /// 配置
    #[inline]
    pub fn config(&self) -> &IsoAdvectionConfig {
        &self.config
    }

    /// 单元体积分数
    #[inline]
    pub fn alpha(&self) -> &[f64] {
        &self.alpha
    }

    /// 单元体积分数（可写）
    #[inline]
    pub fn alpha_mut(&mut self) -> &mut [f64] {
        &mut self.alpha
    }

    /// 最近一步的面液相体积通量
    #[inline]
    pub fn dvf(&self) -> &FaceField {
        &self.dvf
    }

    /// 最近一步的表面单元
    #[inline]
    pub fn surface_cells(&self) -> &[usize] {
        &self.surface_cells
    }

    /// 最近一步做过通量修正的单元
    pub fn bounded_cells(&self) -> Vec<usize> {
        self.bounded
            .iter()
            .enumerate()
            .filter_map(|(c, &b)| b.then_some(c))
            .collect()
    }

    /// 最近一步的界面多边形（需开启 `capture_iso_faces`）
    #[inline]
    pub fn iso_faces(&self) -> &[Vec<DVec3>] {
        &self.iso_faces
    }

    /// 累计耗时
    #[inline]
    pub fn advection_time(&self) -> Duration {
        self.advection_time
    }

    /// 最近一步统计
    #[inline]
    pub fn last_stats(&self) -> &AdvectionStats {
        &self.last_stats
    }

    /// 补丁的边界体积分数
    pub fn patch_alpha(&self, patch: usize) -> Option<&BoundaryAlpha> {
        self.boundary_alpha.get(patch)
    }

    /// 设置补丁的边界体积分数
    pub fn set_patch_alpha(&mut self, mesh: &PolyMesh, patch: usize, value: BoundaryAlpha) -> AdvectionResult<()> {
        if patch >= mesh.n_patches() {
            return Err(AdvectionError::invalid_input(format!(
                "补丁 {patch} 超出范围 0..{}",
                mesh.n_patches()
            )));
        }
        let info = mesh.patch(patch);
        match &value {
            BoundaryAlpha::Processor if !info.is_processor() => {
                return Err(AdvectionError::invalid_input(format!("补丁 '{}' 不是处理器补丁", info.name)));
            }
            _ if info.is_processor() && value != BoundaryAlpha::Processor => {
                return Err(AdvectionError::invalid_input(format!(
                    "处理器补丁 '{}' 的值由相邻分区给出",
                    info.name
                )));
            }
            BoundaryAlpha::Fixed(values) => {
                AdvectionError::check_size("patch_alpha", info.size, values.len())?;
            }
            _ => {}
        }
        self.boundary_alpha[patch] = value;
        Ok(())
    }

    /// 推进一个时间步
    ///
    /// `phi` 为面体积通量（方向由 owner 指向 neighbour），`u` 为单元速度。
    pub fn advect(
        &mut self,
        mesh: &PolyMesh,
        phi: &FaceField,
        u: &[DVec3],
        dt: f64,
    ) -> AdvectionResult<AdvectionStats> {
        let start = Instant::now();
        self.check_inputs(mesh, phi, u, dt)?;

        let mut stats = AdvectionStats {
            volume_before: self.liquid_volume(mesh),
            ..Default::default()
        };

        self.exchange_patch_alpha(mesh)?;
        self.dvf = self.upwind_dvf(mesh, phi, dt);
        self.check_bounding.fill(false);
        self.bounded.fill(false);
        self.iso_faces.clear();
        for faces in &mut self.proc_faces {
            faces.clear();
        }

        let tol = self.config.surf_cell_tol;
        self.surface_cells = (0..mesh.n_cells())
            .filter(|&c| self.alpha[c] > tol && self.alpha[c] < 1.0 - tol)
            .collect();
        stats.n_surface_cells = self.surface_cells.len();
        stats.n_global_surface_cells = self.exchange.sum_reduce(stats.n_surface_cells as f64)?.round() as usize;

        if stats.n_global_surface_cells > 0 {
            self.time_integrated_flux(mesh, phi, u, dt, &mut stats)?;
            self.exchange_bounding_marks(mesh)?;
        }
        self.sync_proc_patches(mesh)?;

        self.limit_fluxes(mesh, phi, dt, &mut stats)?;

        for cell in 0..mesh.n_cells() {
            self.alpha[cell] -= net_flux(mesh, &self.dvf, cell)? / mesh.cell_volume(cell);
        }
        stats.alpha_min = self.alpha.iter().copied().fold(f64::INFINITY, f64::min);
        stats.alpha_max = self.alpha.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        self.apply_brute_force_bounding();

        stats.volume_after = self.liquid_volume(mesh);
        stats.n_bounded_cells = self.bounded.iter().filter(|&&b| b).count();
        stats.duration = start.elapsed();
        self.advection_time += stats.duration;
        self.last_dt = Some(dt);

        log::info!(
            "分区 {}: 表面单元 {} (全局 {}), 几何通量面 {}, 有界化 {} 次/{} 个单元, alpha ∈ [{:.3e}, 1 + {:.3e}], 耗时 {:?}",
            self.exchange.rank(),
            stats.n_surface_cells,
            stats.n_global_surface_cells,
            stats.n_flux_faces,
            stats.bounding_iterations,
            stats.n_bounded_cells,
            stats.alpha_min,
            stats.alpha_max - 1.0,
            stats.duration
        );
        if stats.n_cut_fallbacks + stats.n_face_fallbacks > 0 {
            log::warn!(
                "分区 {}: {} 个单元和 {} 个面回退为迎风通量",
                self.exchange.rank(),
                stats.n_cut_fallbacks,
                stats.n_face_fallbacks
            );
        }

        self.last_stats = stats.clone();
        Ok(stats)
    }

    /// 强制有界化：吸附到端点并截断到 `[0, 1]`
    pub fn apply_brute_force_bounding(&mut self) {
        let snap = self.config.snap_tol;
        if snap > 0.0 {
            for a in &mut self.alpha {
                if *a < snap {
                    *a = 0.0;
                } else if *a >= 1.0 - snap {
                    *a = 1.0;
                }
            }
        }
        if self.config.clip {
            for a in &mut self.alpha {
                *a = a.clamp(0.0, 1.0);
            }
        }
    }

    /// 质量通量 `(rho1 - rho2) dVf / dt + rho2 phi`
    pub fn rho_phi(&self, mesh: &PolyMesh, phi: &FaceField, rho1: f64, rho2: f64) -> AdvectionResult<FaceField> {
        let dt = self
            .last_dt
            .ok_or_else(|| AdvectionError::invalid_input("尚未推进任何时间步"))?;
        phi.check_layout(mesh)?;
        self.dvf.zip_with(phi, |v, p| (rho1 - rho2) * v / dt + rho2 * p)
    }

    /// 拓扑变化后重映射体积分数并重建与网格相关的数据
    pub fn update_mesh(&mut self, old_mesh: &PolyMesh, new_mesh: &PolyMesh, map: &MeshMap) -> AdvectionResult<()> {
        AdvectionError::check_size("map.old_cells", self.alpha.len(), map.n_old_cells())?;
        AdvectionError::check_size("map.cells", new_mesh.n_cells(), map.n_cells())?;
        check_processor_patches(new_mesh, self.exchange.as_ref())?;

        self.alpha = map.map_cell_field(&self.alpha, old_mesh.cell_volumes());

        let mut boundary_alpha = default_boundary_alpha(new_mesh);
        for (patch, slot) in new_mesh.patches().iter().zip(boundary_alpha.iter_mut()) {
            let Some(old) = old_mesh.find_patch(&patch.name) else {
                continue;
            };
            match self.boundary_alpha.get(old) {
                Some(BoundaryAlpha::Fixed(values)) if values.len() == patch.size && !patch.is_processor() => {
                    *slot = BoundaryAlpha::Fixed(values.clone());
                }
                Some(BoundaryAlpha::Fixed(_)) => {
                    log::warn!("补丁 '{}' 面数改变, 给定体积分数改为零梯度", patch.name);
                }
                _ => {}
            }
        }
        self.boundary_alpha = boundary_alpha;

        let n_cells = new_mesh.n_cells();
        self.interpolator = PointInterpolator::new(new_mesh);
        self.dvf = FaceField::zeros(new_mesh);
        self.neighbour_alpha = vec![Vec::new(); new_mesh.n_patches()];
        self.proc_faces = vec![Vec::new(); new_mesh.n_patches()];
        self.surface_cells.clear();
        self.check_bounding = vec![false; n_cells];
        self.bounded = vec![false; n_cells];
        self.iso_faces.clear();
        self.last_dt = None;
        self.mesh_signature = signature(new_mesh);

        log::debug!(
            "分区 {}: 网格更新 {} → {} 个单元",
            self.exchange.rank(),
            old_mesh.n_cells(),
            n_cells
        );
        Ok(())
    }

    /// 本分区液相体积
    pub fn liquid_volume(&self, mesh: &PolyMesh) -> f64 {
        self.alpha
            .iter()
            .zip(mesh.cell_volumes())
            .map(|(a, v)| a * v)
            .sum()
    }

    fn check_inputs(&self, mesh: &PolyMesh, phi: &FaceField, u: &[DVec3], dt: f64) -> AdvectionResult<()> {
        if signature(mesh) != self.mesh_signature {
            return Err(AdvectionError::invalid_input(
                "网格与引擎不一致, 拓扑变化后需先调用 update_mesh",
            ));
        }
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(AdvectionError::invalid_input(format!("时间步长 {dt} 无效")));
        }
        AdvectionError::check_size("u", mesh.n_cells(), u.len())?;
        phi.check_layout(mesh)
    }

    /// 边界面上的体积分数
    fn boundary_face_alpha(&self, mesh: &PolyMesh, patch: usize, local: usize) -> f64 {
        let owner_alpha = || self.alpha[mesh.face_owner(mesh.patch(patch).start + local)];
        match &self.boundary_alpha[patch] {
            BoundaryAlpha::ZeroGradient => owner_alpha(),
            BoundaryAlpha::Fixed(values) => values.get(local).copied().unwrap_or_else(owner_alpha),
            BoundaryAlpha::Processor => self.neighbour_alpha[patch]
                .get(local)
                .copied()
                .unwrap_or_else(owner_alpha),
        }
    }

    /// 迎风初值 `phi dt alpha_upwind`
    fn upwind_dvf(&self, mesh: &PolyMesh, phi: &FaceField, dt: f64) -> FaceField {
        let mut dvf = FaceField::zeros(mesh);
        let owner = mesh.owner();
        let neighbour = mesh.neighbour();
        for (f, (slot, &p)) in dvf.internal_mut().iter_mut().zip(phi.internal()).enumerate() {
            let upwind = if p >= 0.0 { owner[f] } else { neighbour[f] };
            *slot = p * self.alpha[upwind] * dt;
        }
        for (pi, patch) in mesh.patches().iter().enumerate() {
            if patch.kind.is_empty() {
                continue;
            }
            for local in 0..patch.size {
                let p = phi.patch(pi)[local];
                let a = if p >= 0.0 {
                    self.alpha[owner[patch.start + local]]
                } else {
                    self.boundary_face_alpha(mesh, pi, local)
                };
                dvf.patch_mut(pi)[local] = p * a * dt;
            }
        }
        dvf
    }

    /// 记录需要同步的处理器补丁面
    fn record_proc_face(&mut self, mesh: &PolyMesh, face: usize) {
        if let Some(patch) = mesh.which_patch(face) {
            let info = mesh.patch(patch);
            if info.is_processor() {
                self.proc_faces[patch].push(face - info.start);
            }
        }
    }
}

/// 处理器补丁检查：需要多分区交换，相邻分区号有效且每个相邻分区至多一个补丁
fn check_processor_patches(mesh: &PolyMesh, exchange: &dyn ProcessorExchange) -> AdvectionResult<()> {
    let mut seen = HashSet::new();
    for patch in mesh.patches() {
        let Some(rank) = patch.kind.neighbour_rank() else {
            continue;
        };
        if !exchange.is_parallel() {
            return Err(AdvectionError::invalid_input(format!(
                "处理器补丁 '{}' 需要多分区数据交换",
                patch.name
            )));
        }
        if rank == exchange.rank() || rank >= exchange.n_ranks() {
            return Err(AdvectionError::invalid_input(format!(
                "处理器补丁 '{}' 的相邻分区 {rank} 无效 (本分区 {}, 分区数 {})",
                patch.name,
                exchange.rank(),
                exchange.n_ranks()
            )));
        }
        if !seen.insert(rank) {
            return Err(AdvectionError::invalid_input(format!(
                "与分区 {rank} 相邻的处理器补丁多于一个"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use iso_mesh::generation::{BlockMeshBuilder, BlockSide};
    use iso_mesh::PatchKind;

    fn uniform_flow(mesh: &PolyMesh, u: DVec3) -> FaceField {
        FaceField::from_fn(mesh, |f| mesh.face_area(f).dot(u))
    }

    #[test]
    fn test_constructor_checks() {
        let mesh = BlockMeshBuilder::new(2, 1, 1).build().unwrap();
        assert!(IsoAdvection::serial(&mesh, vec![0.0; 3], IsoAdvectionConfig::default()).is_err());

        let proc_mesh = BlockMeshBuilder::new(2, 1, 1)
            .with_side(BlockSide::XMax, PatchKind::Processor { neighbour_rank: 1 })
            .build()
            .unwrap();
        assert!(IsoAdvection::serial(&proc_mesh, vec![0.0; 2], IsoAdvectionConfig::default()).is_err());
    }

    #[test]
    fn test_full_and_empty_fields_stay_put() {
        let mesh = BlockMeshBuilder::new(4, 4, 1).two_dimensional().build().unwrap();
        let phi = uniform_flow(&mesh, DVec3::new(0.3, 0.1, 0.0));
        let u = vec![DVec3::new(0.3, 0.1, 0.0); mesh.n_cells()];
        let mut engine = IsoAdvection::serial(&mesh, vec![1.0; mesh.n_cells()], IsoAdvectionConfig::default()).unwrap();
        let stats = engine.advect(&mesh, &phi, &u, 0.1).unwrap();
        assert_eq!(stats.n_surface_cells, 0);
        assert!(engine.alpha().iter().all(|&a| (a - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_fixed_inflow_fills_domain() {
        let mesh = BlockMeshBuilder::new(4, 1, 1).build().unwrap();
        let phi = uniform_flow(&mesh, DVec3::X);
        let u = vec![DVec3::X; mesh.n_cells()];
        let mut engine = IsoAdvection::serial(&mesh, vec![0.0; 4], IsoAdvectionConfig::default()).unwrap();
        let xmin = mesh.find_patch("xmin").unwrap();
        engine
            .set_patch_alpha(&mesh, xmin, BoundaryAlpha::Fixed(vec![1.0]))
            .unwrap();
        // 入流体积 |phi| dt = 0.1, 单元体积 0.25
        engine.advect(&mesh, &phi, &u, 0.1).unwrap();
        assert!((engine.alpha()[0] - 0.4).abs() < 1e-12);
        assert_eq!(engine.alpha()[1], 0.0);
    }

    #[test]
    fn test_set_patch_alpha_validation() {
        let mesh = BlockMeshBuilder::new(2, 2, 1).build().unwrap();
        let mut engine = IsoAdvection::serial(&mesh, vec![0.0; 4], IsoAdvectionConfig::default()).unwrap();
        let xmin = mesh.find_patch("xmin").unwrap();
        assert!(engine.set_patch_alpha(&mesh, xmin, BoundaryAlpha::Fixed(vec![1.0])).is_err());
        assert!(engine.set_patch_alpha(&mesh, xmin, BoundaryAlpha::Processor).is_err());
        assert!(engine.set_patch_alpha(&mesh, 99, BoundaryAlpha::ZeroGradient).is_err());
        engine
            .set_patch_alpha(&mesh, xmin, BoundaryAlpha::Fixed(vec![1.0, 0.5]))
            .unwrap();
        assert_eq!(engine.patch_alpha(xmin), Some(&BoundaryAlpha::Fixed(vec![1.0, 0.5])));
    }

    #[test]
    fn test_brute_force_bounding() {
        let mesh = BlockMeshBuilder::new(4, 1, 1).build().unwrap();
        let config = IsoAdvectionConfig {
            snap_tol: 1e-3,
            ..Default::default()
        };
        let mut engine = IsoAdvection::serial(&mesh, vec![-0.1, 5e-4, 0.9995, 1.2], config).unwrap();
        engine.apply_brute_force_bounding();
        assert_eq!(engine.alpha(), &[0.0, 0.0, 1.0, 1.0]);
    }

    #[test]
    fn test_rho_phi_needs_a_step() {
        let mesh = BlockMeshBuilder::new(2, 1, 1).build().unwrap();
        let phi = uniform_flow(&mesh, DVec3::X);
        let u = vec![DVec3::X; 2];
        let mut engine = IsoAdvection::serial(&mesh, vec![1.0, 0.0], IsoAdvectionConfig::default()).unwrap();
        assert!(engine.rho_phi(&mesh, &phi, 1000.0, 1.0).is_err());
        engine.advect(&mesh, &phi, &u, 0.1).unwrap();
        let rho_phi = engine.rho_phi(&mesh, &phi, 1000.0, 1.0).unwrap();
        // 内部面上游单元全满: rho_phi = rho1 phi
        assert!((rho_phi.internal()[0] - 1000.0 * phi.internal()[0]).abs() < 1e-9);
    }

    #[test]
    fn test_stale_mesh_is_rejected() {
        let mesh = BlockMeshBuilder::new(2, 1, 1).build().unwrap();
        let other = BlockMeshBuilder::new(3, 1, 1).build().unwrap();
        let mut engine = IsoAdvection::serial(&mesh, vec![0.5, 0.5], IsoAdvectionConfig::default()).unwrap();
        let phi = uniform_flow(&other, DVec3::X);
        let u = vec![DVec3::X; 3];
        assert!(matches!(
            engine.advect(&other, &phi, &u, 0.1),
            Err(AdvectionError::InvalidInput(_))
        ));
    }
}
