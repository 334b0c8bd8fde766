// crates/iso_mesh/src/error.rs

//! 网格错误类型
//!
//! 包含网格拓扑校验、平面切分、面删除合并以及分裂单元树相关的错误。
//! 基础层错误通过 `#[from]` 向上聚合。

use iso_foundation::IsoError;
use thiserror::Error;

/// 网格模块结果类型
pub type MeshResult<T> = Result<T, MeshError>;

/// 网格错误枚举
#[derive(Error, Debug)]
pub enum MeshError {
    /// 拓扑错误
    #[error("拓扑错误: {operation} 失败, {details}")]
    InvalidTopology {
        /// 出错的操作
        operation: &'static str,
        /// 详细说明
        details: String,
    },

    /// 索引越界
    #[error("索引越界: {entity} {index} 超出范围 0..{len}")]
    IndexOutOfBounds {
        /// 实体类别
        entity: &'static str,
        /// 访问的索引
        index: usize,
        /// 上界
        len: usize,
    },

    /// 切分平面与单元关系退化（穿过顶点、未切到单元或切出非凸面）
    #[error("单元 {cell} 平面切分退化: {reason}")]
    DegenerateCut {
        /// 单元编号
        cell: usize,
        /// 原因
        reason: String,
    },

    /// 切分器未开启撤销能力
    #[error("网格切分器未开启撤销功能, 无法执行 {operation}")]
    NotUndoable {
        /// 被拒绝的操作
        operation: &'static str,
    },

    /// 分裂单元树状态错误
    #[error("分裂单元树错误 (单元 {cell}): {message}")]
    SplitTree {
        /// 相关单元
        cell: usize,
        /// 错误信息
        message: String,
    },

    /// 面删除请求与兼容性检查结果不一致
    #[error("面删除不兼容: 请求删除 {requested} 个面, 实际需删除 {required} 个面")]
    IncompatibleRemoval {
        /// 请求删除的面数
        requested: usize,
        /// 兼容性检查要求删除的面数
        required: usize,
    },

    /// 基础层错误
    #[error(transparent)]
    Foundation(#[from] IsoError),
}

impl MeshError {
    /// 拓扑错误
    pub fn topology(operation: &'static str, details: impl Into<String>) -> Self {
        Self::InvalidTopology {
            operation,
            details: details.into(),
        }
    }

    /// 索引越界
    pub fn out_of_bounds(entity: &'static str, index: usize, len: usize) -> Self {
        Self::IndexOutOfBounds { entity, index, len }
    }

    /// 平面切分退化
    pub fn degenerate_cut(cell: usize, reason: impl Into<String>) -> Self {
        Self::DegenerateCut {
            cell,
            reason: reason.into(),
        }
    }

    /// 分裂单元树错误
    pub fn split_tree(cell: usize, message: impl Into<String>) -> Self {
        Self::SplitTree {
            cell,
            message: message.into(),
        }
    }

    /// 检查索引
    #[inline]
    pub fn check_index(entity: &'static str, index: usize, len: usize) -> MeshResult<()> {
        if index >= len {
            Err(Self::out_of_bounds(entity, index, len))
        } else {
            Ok(())
        }
    }
}

impl From<serde_json::Error> for MeshError {
    fn from(err: serde_json::Error) -> Self {
        Self::Foundation(IsoError::serialization(err.to_string()))
    }
}

impl From<std::io::Error> for MeshError {
    fn from(err: std::io::Error) -> Self {
        Self::Foundation(IsoError::from(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MeshError::topology("validate", "面 3 只有两个顶点");
        assert!(err.to_string().contains("validate"));
        let err = MeshError::NotUndoable {
            operation: "get_added_cells",
        };
        assert!(err.to_string().contains("get_added_cells"));
    }

    #[test]
    fn test_check_index() {
        assert!(MeshError::check_index("cell", 1, 2).is_ok());
        assert!(matches!(
            MeshError::check_index("cell", 2, 2),
            Err(MeshError::IndexOutOfBounds { index: 2, .. })
        ));
    }

    #[test]
    fn test_foundation_conversion() {
        let err: MeshError = IsoError::invalid_input("x").into();
        assert!(matches!(err, MeshError::Foundation(_)));
    }
}
