// crates/iso_advection/src/engine/sync.rs

//! 处理器补丁同步
//!
//! 两侧的处理器补丁按相同顺序列出共享面。计算了某个面几何通量（或修正了
//! 其通量）的一侧是该面的上游侧，它把值发给对侧，对侧以相反数覆盖自己的
//! 值。每个分区先发送全部消息再接收，不会互相等待。

use iso_mesh::PolyMesh;

use super::IsoAdvection;
use crate::error::{AdvectionError, AdvectionResult};
use crate::exchange::{unexpected, ExchangeMessage, ExchangeTag};

/// (补丁, 相邻分区)
fn processor_patches(mesh: &PolyMesh) -> impl Iterator<Item = (usize, usize)> + '_ {
    mesh.patches()
        .iter()
        .enumerate()
        .filter_map(|(p, info)| info.kind.neighbour_rank().map(|rank| (p, rank)))
}

impl IsoAdvection {
    /// 交换处理器补丁两侧的单元体积分数
    pub(super) fn exchange_patch_alpha(&mut self, mesh: &PolyMesh) -> AdvectionResult<()> {
        if !self.exchange.is_parallel() {
            return Ok(());
        }
        for (patch, rank) in processor_patches(mesh) {
            let values = mesh.patch(patch).range().map(|f| self.alpha[mesh.face_owner(f)]).collect();
            self.exchange
                .send(rank, ExchangeTag::PatchAlpha, ExchangeMessage::PatchAlpha { values })?;
        }
        for (patch, rank) in processor_patches(mesh) {
            let values = match self.exchange.receive(rank, ExchangeTag::PatchAlpha)? {
                ExchangeMessage::PatchAlpha { values } => values,
                other => return Err(unexpected(self.exchange.rank(), "PatchAlpha", &other)),
            };
            let size = mesh.patch(patch).size;
            if values.len() != size {
                return Err(AdvectionError::exchange(
                    self.exchange.rank(),
                    format!(
                        "补丁 '{}' 有 {size} 个面, 分区 {rank} 发来 {} 个值",
                        mesh.patch(patch).name,
                        values.len()
                    ),
                ));
            }
            self.neighbour_alpha[patch] = values;
        }
        Ok(())
    }

    /// 把表面单元附近的有界性检查标记传给相邻分区
    ///
    /// 每个补丁面发送所属单元的剩余层数：表面单元为 2，表面单元的相邻
    /// 单元为 1。对侧收到 1 时标记补丁面所属单元，收到 2 时再标记其相邻
    /// 单元，与单分区时的两层标记范围一致。
    pub(super) fn exchange_bounding_marks(&mut self, mesh: &PolyMesh) -> AdvectionResult<()> {
        if !self.exchange.is_parallel() {
            return Ok(());
        }
        let mut hops = vec![0u8; mesh.n_cells()];
        for &cell in &self.surface_cells {
            hops[cell] = 2;
            for n in mesh.cell_cells(cell) {
                hops[n] = hops[n].max(1);
            }
        }

        for (patch, rank) in processor_patches(mesh) {
            let hops = mesh.patch(patch).range().map(|f| hops[mesh.face_owner(f)]).collect();
            self.exchange
                .send(rank, ExchangeTag::BoundingMarks, ExchangeMessage::BoundingMarks { hops })?;
        }

        for (patch, rank) in processor_patches(mesh) {
            let received = match self.exchange.receive(rank, ExchangeTag::BoundingMarks)? {
                ExchangeMessage::BoundingMarks { hops } => hops,
                other => return Err(unexpected(self.exchange.rank(), "BoundingMarks", &other)),
            };
            if received.len() != mesh.patch(patch).size {
                return Err(AdvectionError::exchange(
                    self.exchange.rank(),
                    format!(
                        "补丁 '{}' 有 {} 个面, 分区 {rank} 发来 {} 个标记",
                        mesh.patch(patch).name,
                        mesh.patch(patch).size,
                        received.len()
                    ),
                ));
            }
            for (face, h) in mesh.patch(patch).range().zip(received) {
                if h == 0 {
                    continue;
                }
                let owner = mesh.face_owner(face);
                self.check_bounding[owner] = true;
                if h > 1 {
                    for n in mesh.cell_cells(owner) {
                        self.check_bounding[n] = true;
                    }
                }
            }
        }
        Ok(())
    }

    /// 同步记录过的处理器补丁面通量，然后清空记录
    pub(super) fn sync_proc_patches(&mut self, mesh: &PolyMesh) -> AdvectionResult<()> {
        if !self.exchange.is_parallel() {
            for faces in &mut self.proc_faces {
                faces.clear();
            }
            return Ok(());
        }

        for (patch, rank) in processor_patches(mesh) {
            let mut faces = std::mem::take(&mut self.proc_faces[patch]);
            faces.sort_unstable();
            faces.dedup();
            let values = faces.iter().map(|&f| self.dvf.patch(patch)[f]).collect();
            self.exchange
                .send(rank, ExchangeTag::FaceFluxes, ExchangeMessage::FaceFluxes { faces, values })?;
        }

        for (patch, rank) in processor_patches(mesh) {
            let (faces, values) = match self.exchange.receive(rank, ExchangeTag::FaceFluxes)? {
                ExchangeMessage::FaceFluxes { faces, values } => (faces, values),
                other => return Err(unexpected(self.exchange.rank(), "FaceFluxes", &other)),
            };
            let local = self.dvf.patch_mut(patch);
            if faces.len() != values.len() || faces.iter().any(|&f| f >= local.len()) {
                return Err(AdvectionError::exchange(
                    self.exchange.rank(),
                    format!("分区 {rank} 发来的面通量与补丁 '{}' 不符", mesh.patch(patch).name),
                ));
            }
            for (face, value) in faces.into_iter().zip(values) {
                local[face] = -value;
            }
            log::trace!("分区 {}: 补丁 {patch} 从分区 {rank} 同步", self.exchange.rank());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::IsoAdvectionConfig;
    use crate::engine::IsoAdvection;
    use crate::exchange::LocalExchange;
    use glam::DVec3;
    use iso_mesh::generation::{BlockMeshBuilder, BlockSide};
    use iso_mesh::{PatchKind, PolyMesh};
    use std::sync::Arc;
    use std::time::Duration;

    /// 沿 x = 0.5 分开的两块 3×1×1 网格
    fn half_mesh(rank: usize) -> PolyMesh {
        let builder = BlockMeshBuilder::new(3, 1, 1);
        let builder = if rank == 0 {
            builder
                .with_bounds(DVec3::ZERO, DVec3::new(0.5, 1.0, 1.0))
                .with_named_side(BlockSide::XMax, "procBoundary0to1", PatchKind::Processor { neighbour_rank: 1 })
        } else {
            builder
                .with_bounds(DVec3::new(0.5, 0.0, 0.0), DVec3::ONE)
                .with_named_side(BlockSide::XMin, "procBoundary1to0", PatchKind::Processor { neighbour_rank: 0 })
        };
        builder.build().unwrap()
    }

    /// 第 0 块的 `surface` 为表面单元时第 1 块收到的检查标记
    fn marks_across(surface: &[usize]) -> Vec<bool> {
        let exchanges = LocalExchange::group(2, Duration::from_secs(5));
        let mut marks: Vec<Vec<bool>> = std::thread::scope(|s| {
            let handles: Vec<_> = exchanges
                .into_iter()
                .enumerate()
                .map(|(rank, exchange)| {
                    s.spawn(move || {
                        let mesh = half_mesh(rank);
                        let alpha = vec![0.0; mesh.n_cells()];
                        let mut engine =
                            IsoAdvection::new(&mesh, alpha, IsoAdvectionConfig::default(), Arc::new(exchange)).unwrap();
                        if rank == 0 {
                            engine.surface_cells = surface.to_vec();
                        }
                        engine.exchange_bounding_marks(&mesh).unwrap();
                        engine.check_bounding
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        marks.remove(1)
    }

    #[test]
    fn test_bounding_marks_cross_processor_patch() {
        // 表面单元紧贴补丁: 对侧两层
        assert_eq!(marks_across(&[2]), vec![true, true, false]);
        // 表面单元隔一层: 对侧一层
        assert_eq!(marks_across(&[1]), vec![true, false, false]);
        // 离补丁太远
        assert_eq!(marks_across(&[0]), vec![false, false, false]);
    }
}
