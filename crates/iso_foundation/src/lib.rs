// crates/iso_foundation/src/lib.rs

//! IsoFoam Foundation Layer
//!
//! 基础层，为网格层和界面输运层提供公共抽象。
//!
//! # 模块概览
//!
//! - [`error`]: 统一错误类型与校验宏
//! - [`arena`]: 带类型标记的 Arena 内存池（分裂单元树节点存储）
//! - [`tolerance`]: 几何容差常量与容差配置
//!
//! # 设计原则
//!
//! 1. **最少依赖**: 仅依赖 serde 和 thiserror
//! 2. **类型安全**: 不同 Arena 的句柄在编译期不可混用
//!
//! # 示例
//!
//! ```
//! use iso_foundation::arena::{Arena, ArenaTag};
//! use iso_foundation::error::{IsoError, IsoResult};
//!
//! #[derive(Debug, Clone, Copy)]
//! struct NodeTag;
//! impl ArenaTag for NodeTag {}
//!
//! let mut arena: Arena<usize, NodeTag> = Arena::new();
//! let idx = arena.insert(7);
//! assert_eq!(arena.get(idx), Some(&7));
//!
//! fn positive(x: f64) -> IsoResult<f64> {
//!     iso_foundation::ensure!(x > 0.0, IsoError::invalid_input("x 必须为正"));
//!     Ok(x)
//! }
//! assert!(positive(-1.0).is_err());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arena;
pub mod error;
pub mod tolerance;

// 重导出常用类型
pub use arena::{Arena, ArenaTag, Idx};
pub use error::{IsoError, IsoResult};
pub use tolerance::{GeometricTolerance, ROOTVSMALL, SMALL, SNAP_TOL, VSMALL};

/// Prelude 模块，包含常用类型
pub mod prelude {
    pub use crate::arena::{Arena, ArenaTag, Idx};
    pub use crate::error::{IsoError, IsoResult};
    pub use crate::tolerance::{
        neg0, pos0, safe_div, sign0, GeometricTolerance, ROOTVSMALL, SMALL, SNAP_TOL, VSMALL,
    };
    pub use crate::{ensure, require};
}
