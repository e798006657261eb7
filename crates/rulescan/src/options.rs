//! 扫描选项与统计信息
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// 扫描选项（可从 TOML 加载）
///
/// ```toml
/// timeout_secs = 1.5
/// threads = 4
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanOptions {
    /// 超时（秒，可为小数）；下发给引擎时向上取整。None 或 0 表示不限时
    pub timeout_secs: Option<f64>,
    /// 批量扫描线程数：None 表示自动（等于 CPU 核数）；Some(1) 走串行
    pub threads: Option<usize>,
}

impl ScanOptions {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let opts: Self = toml::from_str(s)?;
        opts.validate()?;
        Ok(opts)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let txt = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&txt)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(t) = self.timeout_secs {
            if !t.is_finite() || t < 0.0 || Duration::try_from_secs_f64(t).is_err() {
                return Err(ConfigError::InvalidTimeout(t));
            }
        }
        if self.threads == Some(0) {
            return Err(ConfigError::InvalidThreads);
        }
        Ok(())
    }

    /// 超时时长；未配置或无法表示时返回 None
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.and_then(|t| Duration::try_from_secs_f64(t).ok())
    }
}

/// 批量扫描统计信息
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanStats {
    pub buffers_scanned: usize,
    pub matches_total: usize,
    pub timeouts: usize,
    pub failures: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = ScanOptions::from_toml_str("").unwrap();
        assert_eq!(opts, ScanOptions::default());
        assert_eq!(opts.timeout(), None);
    }

    #[test]
    fn test_fractional_timeout() {
        let opts = ScanOptions::from_toml_str("timeout_secs = 1.2\nthreads = 3\n").unwrap();
        let timeout = opts.timeout().unwrap();
        assert!((timeout.as_secs_f64() - 1.2).abs() < 1e-6);
        assert_eq!(opts.threads, Some(3));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(ScanOptions::from_toml_str("timeout_secs = -1.0"), Err(ConfigError::InvalidTimeout(_))));
        assert!(matches!(ScanOptions::from_toml_str("timeout_secs = inf"), Err(ConfigError::InvalidTimeout(_))));
        assert!(matches!(ScanOptions::from_toml_str("threads = 0"), Err(ConfigError::InvalidThreads)));
        assert!(matches!(ScanOptions::from_toml_str("bogus = 1"), Err(ConfigError::Toml(_))));
    }
}
