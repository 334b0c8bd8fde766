// crates/iso_advection/src/lib.rs

//! IsoFoam 界面输运模块
//!
//! 基于等值面切割的几何 VOF 界面输运。
//!
//! # 分层
//!
//! 1. [`cutting::face`]: 按顶点值把多边形面切成湿、干两部分
//! 2. [`cutting::cell`]: 切割多面体单元，组装界面，计算湿子单元体积；
//!    反求给定体积分数对应的等值
//! 3. [`engine`]: 每个时间步计算面上的时间积分液相通量，限制通量，
//!    同步分区边界，更新体积分数
//!
//! # 其他模块
//!
//! - [`flux`]: 界面扫过面的时间积分
//! - [`interpolation`]: 单元场插值到点
//! - [`exchange`]: 分区间数据交换
//! - [`fields`]: 面场
//! - [`config`]: 输运配置
//! - [`io`]: 诊断输出
//!
//! # 示例
//!
//! ```rust
//! use iso_advection::cutting::{CellCutter, CellStatus};
//! use iso_mesh::generation::unit_cube;
//!
//! let mesh = unit_cube().unwrap();
//! let f: Vec<f64> = mesh.points().iter().map(|p| p.z).collect();
//! let cut = CellCutter::new(&mesh).cut(0, &f, 0.25).unwrap();
//! assert_eq!(cut.status, CellStatus::Cut);
//! assert!((cut.volume_of_fluid - 0.75).abs() < 1e-12);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod cutting;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod fields;
pub mod flux;
pub mod interpolation;
pub mod io;

pub use config::{IsoAdvectionConfig, ParallelStrategy};
pub use cutting::{cut_cell, cut_face, CellCut, CellCutter, CellStatus, FaceCut, FaceStatus};
pub use engine::{AdvectionStats, BoundaryAlpha, IsoAdvection};
pub use error::{AdvectionError, AdvectionResult};
pub use exchange::{ExchangeMessage, ExchangeTag, LocalExchange, ProcessorExchange, SerialExchange};
pub use fields::FaceField;

/// Prelude 模块，包含常用类型
pub mod prelude {
    pub use crate::config::{IsoAdvectionConfig, ParallelStrategy};
    pub use crate::cutting::{CellCutter, CellStatus, FaceStatus};
    pub use crate::engine::{AdvectionStats, BoundaryAlpha, IsoAdvection};
    pub use crate::error::{AdvectionError, AdvectionResult};
    pub use crate::exchange::{LocalExchange, ProcessorExchange, SerialExchange};
    pub use crate::fields::FaceField;
}
