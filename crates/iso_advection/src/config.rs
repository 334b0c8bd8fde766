// crates/iso_advection/src/config.rs

//! 界面输运配置
//!
//! 所有字段都有默认值，JSON 中缺省的字段取默认值。

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{AdvectionError, AdvectionResult};

/// 表面单元切割的并行策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParallelStrategy {
    /// 串行执行
    Sequential,
    /// 先并行切割各表面单元并收集结果，再按单元顺序串行写回
    CollectThenAccumulate,
    /// 根据表面单元数自动选择
    #[default]
    Auto,
}

impl ParallelStrategy {
    /// 对给定工作量是否并行执行
    pub fn is_parallel(self, n_items: usize, min_parallel: usize) -> bool {
        match self {
            Self::Sequential => false,
            Self::CollectThenAccumulate => true,
            Self::Auto => n_items >= min_parallel,
        }
    }
}

/// 界面输运配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsoAdvectionConfig {
    /// 通量限制迭代次数
    #[serde(default = "default_n_alpha_bounds")]
    pub n_alpha_bounds: usize,

    /// 体积分数反求等值的容差
    #[serde(default = "default_vof_to_iso_tol")]
    pub vof_to_iso_tol: f64,

    /// 表面单元判据 `tol < alpha < 1 - tol`
    #[serde(default = "default_surf_cell_tol")]
    pub surf_cell_tol: f64,

    /// 等值搜索最大迭代次数
    #[serde(default = "default_max_iso_iterations")]
    pub max_iso_iterations: usize,

    /// 用体积分数梯度代替等值面面积矢量作为界面法向
    #[serde(default)]
    pub grad_alpha_normal: bool,

    /// 保留每步的等值面多边形用于输出
    #[serde(default)]
    pub capture_iso_faces: bool,

    /// 强制有界化：距 0 或 1 小于该值的体积分数被吸附到端点（0 表示关闭）
    #[serde(default)]
    pub snap_tol: f64,

    /// 强制有界化：截断到 `[0, 1]`
    #[serde(default = "default_clip")]
    pub clip: bool,

    /// 并行策略
    #[serde(default)]
    pub parallel: ParallelStrategy,

    /// 自动策略下并行执行的最少表面单元数
    #[serde(default = "default_min_parallel_cells")]
    pub min_parallel_cells: usize,

    /// 分区数据交换的接收超时 [ms]，创建 [`LocalExchange`](crate::exchange::LocalExchange) 时使用
    #[serde(default = "default_exchange_timeout_ms")]
    pub exchange_timeout_ms: u64,
}

fn default_n_alpha_bounds() -> usize { 3 }
fn default_vof_to_iso_tol() -> f64 { 1e-8 }
fn default_surf_cell_tol() -> f64 { 1e-8 }
fn default_max_iso_iterations() -> usize { 100 }
fn default_clip() -> bool { true }
fn default_min_parallel_cells() -> usize { 1000 }
fn default_exchange_timeout_ms() -> u64 { 30_000 }

impl Default for IsoAdvectionConfig {
    fn default() -> Self {
        Self {
            n_alpha_bounds: default_n_alpha_bounds(),
            vof_to_iso_tol: default_vof_to_iso_tol(),
            surf_cell_tol: default_surf_cell_tol(),
            max_iso_iterations: default_max_iso_iterations(),
            grad_alpha_normal: false,
            capture_iso_faces: false,
            snap_tol: 0.0,
            clip: default_clip(),
            parallel: ParallelStrategy::default(),
            min_parallel_cells: default_min_parallel_cells(),
            exchange_timeout_ms: default_exchange_timeout_ms(),
        }
    }
}

impl IsoAdvectionConfig {
    /// 从 JSON 文件加载
    pub fn from_file(path: impl AsRef<Path>) -> AdvectionResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// 保存为 JSON 文件
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> AdvectionResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// 校验参数
    pub fn validate(&self) -> AdvectionResult<()> {
        if !(self.vof_to_iso_tol > 0.0 && self.vof_to_iso_tol < 0.5) {
            return Err(AdvectionError::config(
                "vof_to_iso_tol",
                format!("{} 不在 (0, 0.5) 内", self.vof_to_iso_tol),
            ));
        }
        if !(self.surf_cell_tol > 0.0 && self.surf_cell_tol < 0.5) {
            return Err(AdvectionError::config(
                "surf_cell_tol",
                format!("{} 不在 (0, 0.5) 内", self.surf_cell_tol),
            ));
        }
        if self.max_iso_iterations == 0 {
            return Err(AdvectionError::config("max_iso_iterations", "必须大于 0"));
        }
        if !(0.0..0.5).contains(&self.snap_tol) {
            return Err(AdvectionError::config(
                "snap_tol",
                format!("{} 不在 [0, 0.5) 内", self.snap_tol),
            ));
        }
        if self.exchange_timeout_ms == 0 {
            return Err(AdvectionError::config("exchange_timeout_ms", "必须大于 0"));
        }
        Ok(())
    }

    /// 接收超时
    pub fn exchange_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.exchange_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = IsoAdvectionConfig::default();
        assert_eq!(config.n_alpha_bounds, 3);
        assert_eq!(config.max_iso_iterations, 100);
        assert!(config.clip);
        assert!(!config.grad_alpha_normal);
        assert_eq!(config.parallel, ParallelStrategy::Auto);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config: IsoAdvectionConfig =
            serde_json::from_str(r#"{"n_alpha_bounds": 5, "parallel": "sequential"}"#).unwrap();
        assert_eq!(config.n_alpha_bounds, 5);
        assert_eq!(config.parallel, ParallelStrategy::Sequential);
        assert!((config.vof_to_iso_tol - 1e-8).abs() < 1e-20);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = IsoAdvectionConfig {
            surf_cell_tol: 0.7,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(AdvectionError::Config { .. })));

        let config = IsoAdvectionConfig {
            max_iso_iterations: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iso.json");
        let config = IsoAdvectionConfig {
            snap_tol: 1e-6,
            capture_iso_faces: true,
            ..Default::default()
        };
        config.save_to_file(&path).unwrap();
        let loaded = IsoAdvectionConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_strategy_selection() {
        assert!(!ParallelStrategy::Sequential.is_parallel(10_000, 1000));
        assert!(ParallelStrategy::CollectThenAccumulate.is_parallel(1, 1000));
        assert!(ParallelStrategy::Auto.is_parallel(1000, 1000));
        assert!(!ParallelStrategy::Auto.is_parallel(999, 1000));
    }
}
