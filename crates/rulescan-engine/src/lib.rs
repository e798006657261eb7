//! 规则扫描引擎（C ABI 版）
//!
//! 设计要点：
//! - 规则源为 TOML，字面量规则与正则锚点共用一个 Aho-Corasick 自动机做预筛。
//! - 锚点命中生成窗口，窗口内运行 `regex-automata` meta 正则；无锚点正则整段运行 `regex::bytes`。
//! - 编译结果不可变，多个扫描器可并发共享；扫描器本身单线程使用。
//! - 对外只暴露 [`ffi`] 中的 `psx_*` 函数与不透明句柄，宿主侧绑定不依赖任何内部类型。

mod compiler;
mod error;
mod prefilter;
mod rules;
mod scan;

pub mod ffi;

pub use compiler::DEFAULT_NAMESPACE;
pub use error::CompileError;
