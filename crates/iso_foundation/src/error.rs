// crates/iso_foundation/src/error.rs

//! 基础层错误
//!
//! `IsoError` 只描述与几何无关的通用失败（无效输入、序列化、IO）。
//! 网格层的 `MeshError` 和输运层的 `AdvectionError` 都可由它转换得到。
//!
//! ```
//! use iso_foundation::error::{IsoError, IsoResult};
//!
//! fn read_mesh() -> IsoResult<()> {
//!     Err(IsoError::serialization("网格文件格式错误"))
//! }
//! assert!(read_mesh().is_err());
//! ```

use thiserror::Error;

/// 基础层结果类型
pub type IsoResult<T> = Result<T, IsoError>;

/// 基础层错误
#[derive(Error, Debug)]
pub enum IsoError {
    /// IO 错误
    #[error("IO错误: {message}")]
    Io {
        /// 描述
        message: String,
        /// 底层错误
        #[source]
        source: Option<std::io::Error>,
    },

    /// 序列化或反序列化失败
    #[error("序列化错误: {message}")]
    Serialization {
        /// 失败原因
        message: String,
    },

    /// 无效输入
    #[error("无效的输入数据: {message}")]
    InvalidInput {
        /// 无效原因
        message: String,
    },
}

impl IsoError {
    /// 序列化错误
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// 无效输入
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for IsoError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

/// 条件不满足时返回错误（错误经 `Into` 转换为函数的错误类型）
///
/// ```
/// use iso_foundation::{ensure, IsoError, IsoResult};
///
/// fn check(n: usize) -> IsoResult<()> {
///     ensure!(n >= 3, IsoError::invalid_input("多边形至少需要三个顶点"));
///     Ok(())
/// }
/// assert!(check(2).is_err());
/// ```
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr $(,)?) => {
        if !$cond {
            return Err($err.into());
        }
    };
}

/// 解包 `Option`，为 `None` 时返回错误
#[macro_export]
macro_rules! require {
    ($opt:expr, $err:expr $(,)?) => {
        match $opt {
            Some(value) => value,
            None => return Err($err.into()),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let text = IsoError::invalid_input("面只有 2 个顶点").to_string();
        assert!(text.contains("2 个顶点"));
        assert!(IsoError::serialization("eof").to_string().contains("eof"));
    }

    #[test]
    fn test_io_conversion_keeps_source() {
        let err: IsoError = std::io::Error::new(std::io::ErrorKind::NotFound, "mesh.json").into();
        assert!(matches!(err, IsoError::Io { source: Some(_), .. }));
        assert!(err.to_string().contains("mesh.json"));
    }

    #[test]
    fn test_macros() {
        fn first_positive(values: &[f64]) -> IsoResult<f64> {
            ensure!(!values.is_empty(), IsoError::invalid_input("空序列"));
            let v = require!(
                values.iter().copied().find(|v| *v > 0.0),
                IsoError::invalid_input("没有正值")
            );
            Ok(v)
        }

        assert_eq!(first_positive(&[-1.0, 2.0]).unwrap(), 2.0);
        assert!(first_positive(&[]).is_err());
        assert!(first_positive(&[-1.0]).is_err());
    }
}
