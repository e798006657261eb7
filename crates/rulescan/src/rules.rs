//! 编译后规则集合的宿主侧封装
use std::ffi::{CStr, CString};
use std::path::Path;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use rulescan_engine::ffi::{
    psx_compiler_add_source, psx_compiler_build, psx_compiler_create, psx_compiler_destroy, psx_compiler_last_error,
    psx_rules_count, psx_rules_destroy, PSX_COMPILER, PSX_RESULT, PSX_RULES,
};
use walkdir::WalkDir;

use crate::error::CompileError;
use crate::scanner::Scanner;

/// 独占持有的原生规则句柄；最后一个引用释放时销毁
struct RulesHandle {
    ptr: NonNull<PSX_RULES>,
}

// 编译后的规则只读，引擎保证可被多个扫描器并发读取
unsafe impl Send for RulesHandle {}
unsafe impl Sync for RulesHandle {}

impl Drop for RulesHandle {
    fn drop(&mut self) {
        unsafe { psx_rules_destroy(self.ptr.as_ptr()) };
    }
}

/// 不可变的已编译规则集合。
///
/// 克隆只增加引用计数；每个 [`Scanner`] 都持有一份克隆，
/// 因此原生规则一定晚于所有由它创建的原生扫描器销毁。
#[derive(Clone)]
pub struct Rules {
    inner: Arc<RulesHandle>,
}

impl std::fmt::Debug for Rules {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rules").field("len", &self.len()).finish()
    }
}

impl Rules {
    /// 编译单段规则源（默认命名空间）
    pub fn compile(src: &str) -> Result<Self, CompileError> {
        let mut compiler = Compiler::new();
        compiler.add_source(src)?;
        compiler.build()
    }

    /// 从单个 TOML 文件加载，命名空间取文件名（不含扩展名）
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CompileError> {
        let mut compiler = Compiler::new();
        compiler.add_file(path.as_ref())?;
        compiler.build()
    }

    /// 加载目录下所有 `*.toml`（递归，按路径排序），每个文件一个命名空间
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, CompileError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir.as_ref()).min_depth(1).sort_by_file_name() {
            let entry = entry?;
            let is_toml = entry.path().extension().is_some_and(|ext| ext == "toml");
            if entry.file_type().is_file() && is_toml {
                files.push(entry.into_path());
            }
        }

        let mut compiler = Compiler::new();
        for path in &files {
            compiler.add_file(path)?;
        }
        let rules = compiler.build()?;
        tracing::debug!(dir = %dir.as_ref().display(), files = files.len(), rules = rules.len(), "rules loaded");
        Ok(rules)
    }

    pub fn len(&self) -> usize {
        unsafe { psx_rules_count(self.inner.ptr.as_ptr()) }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 基于本规则集合创建扫描器
    pub fn scanner(&self) -> Scanner {
        Scanner::new(self)
    }

    pub(crate) fn as_ptr(&self) -> *const PSX_RULES {
        self.inner.ptr.as_ptr()
    }
}

/// 多源规则编译器
pub struct Compiler {
    ptr: NonNull<PSX_COMPILER>,
}

impl Compiler {
    /// 创建编译器；引擎分配失败视为致命错误
    pub fn new() -> Self {
        let mut raw: *mut PSX_COMPILER = ptr::null_mut();
        let rc = unsafe { psx_compiler_create(&mut raw) };
        match NonNull::new(raw) {
            Some(ptr) if rc == PSX_RESULT::SUCCESS => Self { ptr },
            _ => panic!("psx_compiler_create failed: {rc:?}"),
        }
    }

    /// 加入规则源到默认命名空间
    pub fn add_source(&mut self, src: &str) -> Result<&mut Self, CompileError> {
        self.add(src, None)
    }

    pub fn add_source_with_namespace(&mut self, src: &str, namespace: &str) -> Result<&mut Self, CompileError> {
        self.add(src, Some(namespace))
    }

    fn add_file(&mut self, path: &Path) -> Result<&mut Self, CompileError> {
        let src = std::fs::read_to_string(path)
            .map_err(|source| CompileError::Io { path: path.to_path_buf(), source })?;
        let namespace = path.file_stem().map(|s| s.to_string_lossy().into_owned());
        self.add(&src, namespace.as_deref())
    }

    fn add(&mut self, src: &str, namespace: Option<&str>) -> Result<&mut Self, CompileError> {
        let src = CString::new(src)?;
        let namespace = namespace.map(CString::new).transpose()?;
        let ns_ptr = namespace.as_ref().map_or(ptr::null(), |n| n.as_ptr());
        let rc = unsafe { psx_compiler_add_source(self.ptr.as_ptr(), src.as_ptr(), ns_ptr) };
        if rc != PSX_RESULT::SUCCESS {
            return Err(CompileError::Engine(self.last_error(rc)));
        }
        Ok(self)
    }

    /// 构建规则集合；编译器随后被清空，可继续用于另一组规则
    pub fn build(&mut self) -> Result<Rules, CompileError> {
        let mut raw: *mut PSX_RULES = ptr::null_mut();
        let rc = unsafe { psx_compiler_build(self.ptr.as_ptr(), &mut raw) };
        match NonNull::new(raw) {
            Some(ptr) if rc == PSX_RESULT::SUCCESS => Ok(Rules { inner: Arc::new(RulesHandle { ptr }) }),
            _ => Err(CompileError::Engine(self.last_error(rc))),
        }
    }

    fn last_error(&self, rc: PSX_RESULT) -> String {
        let msg = unsafe { psx_compiler_last_error(self.ptr.as_ptr()) };
        if msg.is_null() {
            return format!("rule compilation failed: {rc:?}");
        }
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Compiler {
    fn drop(&mut self) {
        unsafe { psx_compiler_destroy(self.ptr.as_ptr()) };
    }
}
