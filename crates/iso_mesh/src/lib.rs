// crates/iso_mesh/src/lib.rs

//! IsoFoam 网格模块
//!
//! 提供任意多面体有限体积网格及其拓扑变化工具。
//!
//! # 核心类型
//!
//! - [`PolyMesh`]: 面-单元寻址的多面体网格，构造时计算全部几何量
//! - [`UndoableMeshCutter`]: 可撤销的平面单元切分器
//! - [`MeshMap`]: 拓扑变化前后的编号映射
//!
//! # 模块结构
//!
//! - [`geometry`]: 多边形/多面体几何公式
//! - [`poly_mesh`]: 网格数据结构
//! - [`generation`]: 测试用网格生成
//! - [`topo`]: 拓扑变化（切分、合并、分裂单元树）
//!
//! # 示例
//!
//! ```rust
//! use glam::DVec3;
//! use iso_mesh::generation::BlockMeshBuilder;
//! use iso_mesh::topo::{CellCut, UndoableMeshCutter};
//!
//! let mesh = BlockMeshBuilder::new(2, 1, 1).build().unwrap();
//! let mut cutter = UndoableMeshCutter::default();
//! let split = cutter
//!     .set_refinement(&mesh, &[CellCut::new(0, DVec3::new(0.25, 0.5, 0.5), DVec3::X)])
//!     .unwrap();
//! assert_eq!(split.mesh.n_cells(), 3);
//!
//! let faces = cutter.get_split_faces(&split.mesh).unwrap();
//! let merged = cutter.remove_split_faces(&split.mesh, &faces).unwrap();
//! assert_eq!(merged.mesh.n_cells(), 2);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod generation;
pub mod geometry;
pub mod poly_mesh;
pub mod topo;

pub use error::{MeshError, MeshResult};
pub use poly_mesh::{BoundaryPatch, FacePoints, PatchKind, PolyMesh, PolyMeshData};
pub use topo::{CellCut, MeshMap, SplitCellTree, UndoableMeshCutter};

/// Prelude 模块，包含常用类型
pub mod prelude {
    pub use crate::error::{MeshError, MeshResult};
    pub use crate::generation::BlockMeshBuilder;
    pub use crate::poly_mesh::{BoundaryPatch, PatchKind, PolyMesh};
    pub use crate::topo::{CellCut, MeshMap, UndoableMeshCutter};
}
