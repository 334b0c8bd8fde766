// crates/iso_mesh/src/topo/mod.rs

//! 网格拓扑变化
//!
//! - [`change`]: 拓扑变化引擎（增删改后一次性重建网格和映射）
//! - [`map`]: 变化前后的编号映射
//! - [`cutter`]: 平面切分单元
//! - [`remover`]: 面删除与单元合并
//! - [`split_tree`]: 分裂单元树
//! - [`undoable`]: 可撤销的网格切分器

pub mod change;
pub mod cutter;
pub mod map;
pub mod remover;
pub mod split_tree;
pub mod undoable;

pub use change::{FaceRecord, FaceSide, TopoChange};
pub use cutter::{CellCut, MeshCutter, SplitResult};
pub use map::MeshMap;
pub use remover::{CompatibleRemoves, FaceRemover};
pub use split_tree::{SplitCellNode, SplitCellTree, SplitNodeId};
pub use undoable::{MergeResult, MeshCutterConfig, UndoableMeshCutter};
