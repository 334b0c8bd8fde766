// crates/iso_advection/src/error.rs

//! 界面输运错误类型
//!
//! 单个单元内的几何退化（面切割交点过多、界面不闭合）由输运引擎就地
//! 回退为迎风通量；等值搜索不收敛返回给调用方；补丁查找失败属于寻址
//! 错误，立即向外传播。

use iso_foundation::IsoError;
use iso_mesh::MeshError;
use thiserror::Error;

/// 界面输运结果类型
pub type AdvectionResult<T> = Result<T, AdvectionError>;

/// 界面输运错误
#[derive(Error, Debug)]
pub enum AdvectionError {
    /// 面切割出现两个以上交点（非凸面或多段界面）
    #[error("面切割退化: 找到 {crossings} 个交点 (顶点数 {n_points})")]
    DegenerateFaceGeometry {
        /// 交点个数
        crossings: usize,
        /// 面顶点数
        n_points: usize,
    },

    /// 单元内的界面线段无法首尾相接成闭合环
    #[error("单元 {cell:?} 的界面不闭合: {details}")]
    InterfaceNotClosed {
        /// 单元编号（独立多面体时为 `None`）
        cell: Option<usize>,
        /// 详细说明
        details: String,
    },

    /// 体积分数反求等值未收敛
    #[error("单元 {cell} 等值搜索未收敛: 目标 {target}, 残差 {residual:.3e}, 迭代 {iterations} 次")]
    ConvergenceFailure {
        /// 单元编号
        cell: usize,
        /// 目标体积分数
        target: f64,
        /// 最终残差
        residual: f64,
        /// 迭代次数
        iterations: usize,
    },

    /// 面不属于任何补丁，或面场布局与网格不符
    #[error("面 {face} 无法定位到边界补丁 (补丁数 {n_patches}): {details}")]
    InvalidPatchGeometry {
        /// 面编号
        face: usize,
        /// 补丁数
        n_patches: usize,
        /// 详细说明
        details: String,
    },

    /// 场长度不匹配
    #[error("场 {name} 长度不匹配: 期望 {expected}, 实际 {actual}")]
    SizeMismatch {
        /// 场名称
        name: &'static str,
        /// 期望长度
        expected: usize,
        /// 实际长度
        actual: usize,
    },

    /// 无效输入
    #[error("无效输入: {0}")]
    InvalidInput(String),

    /// 分区间数据交换失败
    #[error("分区 {rank} 数据交换失败: {message}")]
    Exchange {
        /// 本分区号
        rank: usize,
        /// 错误信息
        message: String,
    },

    /// 配置错误
    #[error("配置错误 '{key}': {message}")]
    Config {
        /// 配置键
        key: String,
        /// 错误信息
        message: String,
    },

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 网格层错误
    #[error(transparent)]
    Mesh(#[from] MeshError),
}

impl AdvectionError {
    /// 无效输入
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// 配置错误
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            message: message.into(),
        }
    }

    /// 数据交换错误
    pub fn exchange(rank: usize, message: impl Into<String>) -> Self {
        Self::Exchange {
            rank,
            message: message.into(),
        }
    }

    /// 界面不闭合
    pub fn not_closed(cell: Option<usize>, details: impl Into<String>) -> Self {
        Self::InterfaceNotClosed {
            cell,
            details: details.into(),
        }
    }

    /// 补丁定位失败
    pub fn invalid_patch(face: usize, n_patches: usize, details: impl Into<String>) -> Self {
        Self::InvalidPatchGeometry {
            face,
            n_patches,
            details: details.into(),
        }
    }

    /// 检查场长度
    #[inline]
    pub fn check_size(name: &'static str, expected: usize, actual: usize) -> AdvectionResult<()> {
        if expected != actual {
            Err(Self::SizeMismatch {
                name,
                expected,
                actual,
            })
        } else {
            Ok(())
        }
    }

    /// 是否为可由迎风通量回退处理的局部几何错误
    pub fn is_local_geometry(&self) -> bool {
        matches!(
            self,
            Self::DegenerateFaceGeometry { .. }
                | Self::InterfaceNotClosed { .. }
                | Self::ConvergenceFailure { .. }
        )
    }
}

impl From<IsoError> for AdvectionError {
    fn from(err: IsoError) -> Self {
        Self::Mesh(MeshError::from(err))
    }
}

impl From<serde_json::Error> for AdvectionError {
    fn from(err: serde_json::Error) -> Self {
        Self::config("json", err.to_string())
    }
}
