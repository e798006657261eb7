//! rulescan：规则扫描引擎的宿主侧绑定
//!
//! 设计要点：
//! - [`Rules`] 不可变、可克隆共享；[`Scanner`] 各自独立，可在多个线程上同时使用不同的扫描器。
//! - 引擎回调只携带一个令牌（存放在固定地址），经进程级注册表找回扫描器的命中缓冲。
//! - 扫描结果按引擎回调顺序返回，每条规则在一次扫描内至多出现一次。
//! - 超时按整秒向上取整后下发给引擎；超时返回 [`ScanError::Timeout`] 并带上已得到的部分结果。

mod batch;
mod error;
mod matches;
mod options;
mod pinned;
mod registry;
mod rules;
mod scanner;

pub use batch::{scan_batch, scan_batch_collect, ScanResult};
pub use error::{BatchError, CompileError, ConfigError, ScanError};
pub use matches::Match;
pub use options::{ScanOptions, ScanStats};
pub use registry::Token;
pub use rules::{Compiler, Rules};
pub use rulescan_engine::DEFAULT_NAMESPACE;
pub use scanner::Scanner;
