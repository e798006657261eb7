//! 错误类型
use std::path::PathBuf;

use thiserror::Error;

use crate::matches::Match;

/// 扫描错误
#[derive(Error, Debug)]
pub enum ScanError {
    /// 引擎在截止时间前未完成；`partial` 为超时前已回调的命中（按回调顺序）
    #[error("timeout")]
    Timeout { partial: Vec<Match> },

    /// 引擎报告的其他失败，消息原样透传
    #[error("{0}")]
    Engine(String),

    #[error("scanner has been destroyed")]
    Destroyed,
}

impl ScanError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ScanError::Timeout { .. })
    }
}

/// 规则编译/加载错误
#[derive(Error, Debug)]
pub enum CompileError {
    /// 引擎报告的编译错误
    #[error("{0}")]
    Engine(String),

    #[error("rule source contains a NUL byte")]
    NulByte(#[from] std::ffi::NulError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Walk(#[from] walkdir::Error),
}

/// 配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error("timeout_secs must be a finite, non-negative number of seconds, got {0}")]
    InvalidTimeout(f64),

    #[error("threads must be at least 1")]
    InvalidThreads,
}

/// 批量扫描错误
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("failed to build scan thread pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("scan worker thread panicked")]
    WorkerPanicked,
}
