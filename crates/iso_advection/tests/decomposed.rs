// crates/iso_advection/tests/decomposed.rs

//! 两分区输运集成测试
//!
//! 单位正方形沿 x = 0.5 分成两块，各在一个线程中推进，经
//! [`LocalExchange`] 交换补丁值和面通量。与整块网格的串行结果比较。

mod common;

use common::*;
use glam::DVec3;
use iso_advection::prelude::*;
use iso_mesh::generation::{BlockMeshBuilder, BlockSide};
use iso_mesh::{PatchKind, PolyMesh};
use std::sync::Arc;

const N: usize = 20;
const STEPS: usize = 8;

fn disc_centre() -> DVec3 {
    // 圆盘跨过分区界面
    DVec3::new(0.5, 0.7, 0.0)
}

/// 第 `rank` 块网格及其处理器补丁名称
fn partition_mesh(rank: usize) -> (PolyMesh, &'static str) {
    let half = BlockMeshBuilder::new(N / 2, N, 1).two_dimensional();
    let (half, name) = if rank == 0 {
        (
            half.with_bounds(DVec3::ZERO, DVec3::new(0.5, 1.0, 1.0))
                .with_named_side(BlockSide::XMax, "procBoundary0to1", PatchKind::Processor { neighbour_rank: 1 }),
            "procBoundary0to1",
        )
    } else {
        (
            half.with_bounds(DVec3::new(0.5, 0.0, 0.0), DVec3::ONE)
                .with_named_side(BlockSide::XMin, "procBoundary1to0", PatchKind::Processor { neighbour_rank: 0 }),
            "procBoundary1to0",
        )
    };
    (half.build().unwrap(), name)
}

/// 整块网格中的单元号
fn global_cell(rank: usize, local: usize) -> usize {
    let half = N / 2;
    let (i, j) = (local % half, local / half);
    i + rank * half + N * j
}

struct RankResult {
    alpha: Vec<f64>,
    volumes: Vec<f64>,
    /// 处理器补丁上的 dVf
    proc_dvf: Vec<f64>,
    n_global_surface_cells: Vec<usize>,
}

fn run_rank(rank: usize, exchange: LocalExchange, config: IsoAdvectionConfig) -> RankResult {
    let (mesh, proc_name) = partition_mesh(rank);
    let phi = vortex_flux(&mesh);
    let u = vortex_velocity(&mesh);
    let alpha = disc_alpha(&mesh, disc_centre(), 0.15);

    let mut engine = IsoAdvection::new(&mesh, alpha, config, Arc::new(exchange)).unwrap();
    let proc_patch = mesh.find_patch(proc_name).unwrap();
    assert_eq!(engine.patch_alpha(proc_patch), Some(&BoundaryAlpha::Processor));

    let mut n_global_surface_cells = Vec::new();
    for _ in 0..STEPS {
        let stats = engine.advect(&mesh, &phi, &u, vortex_dt(N)).unwrap();
        n_global_surface_cells.push(stats.n_global_surface_cells);
    }

    RankResult {
        alpha: engine.alpha().to_vec(),
        volumes: mesh.cell_volumes().to_vec(),
        proc_dvf: engine.dvf().patch(proc_patch).to_vec(),
        n_global_surface_cells,
    }
}

fn run_decomposed(config: IsoAdvectionConfig) -> Vec<RankResult> {
    let exchanges = LocalExchange::group(2, config.exchange_timeout());
    std::thread::scope(|s| {
        let handles: Vec<_> = exchanges
            .into_iter()
            .enumerate()
            .map(|(rank, exchange)| {
                let config = config.clone();
                s.spawn(move || run_rank(rank, exchange, config))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

fn run_serial(config: IsoAdvectionConfig) -> Vec<f64> {
    let mesh = BlockMeshBuilder::new(N, N, 1).two_dimensional().build().unwrap();
    let phi = vortex_flux(&mesh);
    let u = vortex_velocity(&mesh);
    let alpha = disc_alpha(&mesh, disc_centre(), 0.15);
    let mut engine = IsoAdvection::serial(&mesh, alpha, config).unwrap();
    for _ in 0..STEPS {
        engine.advect(&mesh, &phi, &u, vortex_dt(N)).unwrap();
    }
    engine.alpha().to_vec()
}

fn total_volume(ranks: &[RankResult]) -> f64 {
    ranks
        .iter()
        .flat_map(|r| r.alpha.iter().zip(&r.volumes).map(|(a, v)| a * v))
        .sum()
}

#[test]
fn test_processor_fluxes_are_antisymmetric() {
    let ranks = run_decomposed(conservative_config());
    assert_eq!(ranks[0].proc_dvf.len(), N);
    assert_eq!(ranks[1].proc_dvf.len(), N);
    // 两侧面法向相反
    for (i, (a, b)) in ranks[0].proc_dvf.iter().zip(&ranks[1].proc_dvf).enumerate() {
        assert!((a + b).abs() < 1e-14, "面 {i}: {a} 与 {b}");
    }
    assert!(ranks[0].proc_dvf.iter().any(|v| v.abs() > 1e-6));
    // 两个分区看到相同的全局表面单元数
    assert_eq!(ranks[0].n_global_surface_cells, ranks[1].n_global_surface_cells);
}

#[test]
fn test_decomposed_run_conserves_volume() {
    let mesh = BlockMeshBuilder::new(N, N, 1).two_dimensional().build().unwrap();
    let initial = disc_alpha(&mesh, disc_centre(), 0.15);
    let v0: f64 = initial.iter().zip(mesh.cell_volumes()).map(|(a, v)| a * v).sum();

    let ranks = run_decomposed(conservative_config());
    assert!(approx_eq(total_volume(&ranks), v0, 1e-12));
}

#[test]
fn test_decomposed_run_matches_serial() {
    let serial = run_serial(conservative_config());
    let ranks = run_decomposed(conservative_config());

    let mut max_diff: f64 = 0.0;
    for (rank, result) in ranks.iter().enumerate() {
        for (local, &a) in result.alpha.iter().enumerate() {
            max_diff = max_diff.max((a - serial[global_cell(rank, local)]).abs());
        }
    }
    assert!(max_diff < 1e-6, "与串行结果最大差 {max_diff:.3e}");
}

#[test]
fn test_processor_patch_requires_exchange() {
    let (mesh, _) = partition_mesh(0);
    let alpha = vec![0.0; mesh.n_cells()];
    let err = IsoAdvection::serial(&mesh, alpha, IsoAdvectionConfig::default()).unwrap_err();
    assert!(matches!(err, AdvectionError::InvalidInput(_)), "{err}");
}
