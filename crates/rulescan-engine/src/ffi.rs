//! C ABI
//!
//! 引擎对外只暴露不透明句柄与整数结果码，调用方负责以下约定：
//! - `PSX_RULES` 必须比由它创建的所有 `PSX_SCANNER` 活得更久；
//! - 同一个 `PSX_SCANNER` 同一时刻只能有一个 `psx_scanner_scan` 调用；
//! - 回调在 `psx_scanner_scan` 内、调用线程上同步执行，`PSX_RULE` 指针及其借出的字符串仅在回调期间有效；
//! - 不同 `PSX_SCANNER`（即使共享同一个 `PSX_RULES`）可在不同线程上并发扫描。
#![allow(non_camel_case_types)]

use std::ffi::{c_char, c_void, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use anyhow::{anyhow, Context};

use crate::compiler::{CompiledRule, CompiledRules, Compiler, DEFAULT_NAMESPACE};
use crate::scan::{scan_buffer, Deadline};

/// 结果码
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PSX_RESULT {
    SUCCESS = 0,
    SYNTAX_ERROR = 1,
    INVALID_ARGUMENT = 2,
    INVALID_UTF8 = 3,
    SCAN_ERROR = 4,
    SCAN_TIMEOUT = 5,
    PANIC = 6,
}

/// 规则编译器句柄
pub struct PSX_COMPILER {
    inner: Compiler,
    last_error: Option<CString>,
}

/// 编译后规则句柄（只读，可跨线程共享）
pub struct PSX_RULES(CompiledRules);

/// 回调中传出的规则句柄
#[repr(transparent)]
pub struct PSX_RULE(CompiledRule);

/// 扫描器句柄
pub struct PSX_SCANNER {
    rules: *const PSX_RULES,
    timeout_secs: u64,
    callback: Option<(PSX_ON_MATCHING_RULE, *mut c_void)>,
    last_error: Option<CString>,
}

/// 规则命中回调：`user_data` 为注册时传入的原样指针
pub type PSX_ON_MATCHING_RULE = extern "C" fn(rule: *const PSX_RULE, user_data: *mut c_void);

/// 错误消息转为 C 字符串（内嵌 NUL 会被转义）
fn to_cstring(msg: String) -> CString {
    CString::new(msg.replace('\0', "\\0")).unwrap_or_default()
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("engine panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("engine panicked: {s}")
    } else {
        "engine panicked".to_string()
    }
}

fn last_error_ptr(err: &Option<CString>) -> *const c_char {
    err.as_ref().map_or(ptr::null(), |e| e.as_ptr())
}

/// 创建规则编译器
///
/// # Safety
/// `compiler` 必须是可写的有效指针。
#[no_mangle]
pub unsafe extern "C" fn psx_compiler_create(compiler: *mut *mut PSX_COMPILER) -> PSX_RESULT {
    if compiler.is_null() {
        return PSX_RESULT::INVALID_ARGUMENT;
    }
    let boxed = Box::new(PSX_COMPILER { inner: Compiler::new(), last_error: None });
    *compiler = Box::into_raw(boxed);
    PSX_RESULT::SUCCESS
}

/// 加入一段 TOML 规则源；`namespace` 为空指针时使用默认命名空间
///
/// # Safety
/// `compiler` 来自 `psx_compiler_create`；`src`、`namespace` 为 NUL 结尾字符串（`namespace` 可为空）。
#[no_mangle]
pub unsafe extern "C" fn psx_compiler_add_source(
    compiler: *mut PSX_COMPILER,
    src: *const c_char,
    namespace: *const c_char,
) -> PSX_RESULT {
    let Some(c) = compiler.as_mut() else { return PSX_RESULT::INVALID_ARGUMENT };
    if src.is_null() {
        c.last_error = Some(to_cstring("rule source is null".into()));
        return PSX_RESULT::INVALID_ARGUMENT;
    }

    let utf8 = source_args(src, namespace);
    let (src, ns) = match utf8 {
        Ok(v) => v,
        Err(e) => {
            c.last_error = Some(to_cstring(format!("{e:#}")));
            return PSX_RESULT::INVALID_UTF8;
        }
    };

    match catch_unwind(AssertUnwindSafe(|| c.inner.add_source(src, ns))) {
        Ok(Ok(())) => {
            c.last_error = None;
            PSX_RESULT::SUCCESS
        }
        Ok(Err(e)) => {
            let e = anyhow::Error::new(e).context(format!("namespace `{ns}`"));
            c.last_error = Some(to_cstring(format!("{e:#}")));
            PSX_RESULT::SYNTAX_ERROR
        }
        Err(payload) => {
            c.last_error = Some(to_cstring(panic_message(payload.as_ref())));
            PSX_RESULT::PANIC
        }
    }
}

unsafe fn source_args<'a>(src: *const c_char, namespace: *const c_char) -> anyhow::Result<(&'a str, &'a str)> {
    let src = CStr::from_ptr(src).to_str().context("rule source is not valid UTF-8")?;
    let ns = if namespace.is_null() {
        DEFAULT_NAMESPACE
    } else {
        CStr::from_ptr(namespace).to_str().context("namespace is not valid UTF-8")?
    };
    Ok((src, ns))
}

/// 最近一次编译失败的消息；无错误时返回空指针
///
/// # Safety
/// `compiler` 来自 `psx_compiler_create`。返回的指针在下一次调用该编译器前有效。
#[no_mangle]
pub unsafe extern "C" fn psx_compiler_last_error(compiler: *const PSX_COMPILER) -> *const c_char {
    compiler.as_ref().map_or(ptr::null(), |c| last_error_ptr(&c.last_error))
}

/// 用已加入的全部规则源构建规则集合，并清空编译器
///
/// # Safety
/// `compiler` 来自 `psx_compiler_create`；`rules` 必须是可写的有效指针。
#[no_mangle]
pub unsafe extern "C" fn psx_compiler_build(compiler: *mut PSX_COMPILER, rules: *mut *mut PSX_RULES) -> PSX_RESULT {
    let Some(c) = compiler.as_mut() else { return PSX_RESULT::INVALID_ARGUMENT };
    if rules.is_null() {
        return PSX_RESULT::INVALID_ARGUMENT;
    }
    match catch_unwind(AssertUnwindSafe(|| c.inner.build())) {
        Ok(Ok(compiled)) => {
            c.last_error = None;
            *rules = Box::into_raw(Box::new(PSX_RULES(compiled)));
            PSX_RESULT::SUCCESS
        }
        Ok(Err(e)) => {
            c.last_error = Some(to_cstring(e.to_string()));
            PSX_RESULT::SYNTAX_ERROR
        }
        Err(payload) => {
            c.last_error = Some(to_cstring(panic_message(payload.as_ref())));
            PSX_RESULT::PANIC
        }
    }
}

/// 销毁编译器；空指针为 no-op
///
/// # Safety
/// `compiler` 来自 `psx_compiler_create`，且之后不再使用。
#[no_mangle]
pub unsafe extern "C" fn psx_compiler_destroy(compiler: *mut PSX_COMPILER) {
    if !compiler.is_null() {
        drop(Box::from_raw(compiler));
    }
}

/// 规则数量
///
/// # Safety
/// `rules` 来自 `psx_compiler_build` 且尚未销毁。
#[no_mangle]
pub unsafe extern "C" fn psx_rules_count(rules: *const PSX_RULES) -> usize {
    rules.as_ref().map_or(0, |r| r.0.len())
}

/// 销毁规则集合；空指针为 no-op
///
/// # Safety
/// 由它创建的扫描器必须已全部销毁。
#[no_mangle]
pub unsafe extern "C" fn psx_rules_destroy(rules: *mut PSX_RULES) {
    if !rules.is_null() {
        drop(Box::from_raw(rules));
    }
}

/// 基于规则集合创建扫描器
///
/// # Safety
/// `rules` 必须在扫描器销毁之前一直有效；`scanner` 必须是可写的有效指针。
#[no_mangle]
pub unsafe extern "C" fn psx_scanner_create(rules: *const PSX_RULES, scanner: *mut *mut PSX_SCANNER) -> PSX_RESULT {
    if rules.is_null() || scanner.is_null() {
        return PSX_RESULT::INVALID_ARGUMENT;
    }
    let boxed = Box::new(PSX_SCANNER { rules, timeout_secs: 0, callback: None, last_error: None });
    *scanner = Box::into_raw(boxed);
    PSX_RESULT::SUCCESS
}

/// 设置扫描超时（秒）；0 表示不限时。下一次扫描生效。
///
/// # Safety
/// `scanner` 来自 `psx_scanner_create` 且尚未销毁。
#[no_mangle]
pub unsafe extern "C" fn psx_scanner_timeout(scanner: *mut PSX_SCANNER, timeout: u64) -> PSX_RESULT {
    let Some(s) = scanner.as_mut() else { return PSX_RESULT::INVALID_ARGUMENT };
    s.timeout_secs = timeout;
    PSX_RESULT::SUCCESS
}

/// 注册规则命中回调；`user_data` 原样传回，引擎不解引用
///
/// # Safety
/// `scanner` 来自 `psx_scanner_create` 且尚未销毁；`user_data` 需在扫描器存活期间保持有效。
#[no_mangle]
pub unsafe extern "C" fn psx_scanner_on_matching_rule(
    scanner: *mut PSX_SCANNER,
    callback: PSX_ON_MATCHING_RULE,
    user_data: *mut c_void,
) -> PSX_RESULT {
    let Some(s) = scanner.as_mut() else { return PSX_RESULT::INVALID_ARGUMENT };
    s.callback = Some((callback, user_data));
    PSX_RESULT::SUCCESS
}

/// 同步扫描 `data[..len]`。`len == 0` 时 `data` 可为空指针，否则必须非空。
///
/// # Safety
/// `scanner` 来自 `psx_scanner_create` 且尚未销毁；`data` 指向至少 `len` 个可读字节。
#[no_mangle]
pub unsafe extern "C" fn psx_scanner_scan(scanner: *mut PSX_SCANNER, data: *const u8, len: usize) -> PSX_RESULT {
    let Some(s) = scanner.as_mut() else { return PSX_RESULT::INVALID_ARGUMENT };
    s.last_error = None;

    let buf: &[u8] = if len == 0 {
        &[]
    } else if data.is_null() {
        s.last_error = Some(to_cstring(format!("data is null but length is {len}")));
        return PSX_RESULT::INVALID_ARGUMENT;
    } else {
        std::slice::from_raw_parts(data, len)
    };

    let Some(rules) = s.rules.as_ref() else {
        s.last_error = Some(to_cstring("scanner has no rules".into()));
        return PSX_RESULT::SCAN_ERROR;
    };
    let deadline = Deadline::after_secs(s.timeout_secs);
    let callback = s.callback;

    let outcome = catch_unwind(AssertUnwindSafe(|| {
        scan_buffer(&rules.0, buf, deadline, |rule| {
            if let Some((cb, user_data)) = callback {
                let handle = rule as *const CompiledRule as *const PSX_RULE;
                cb(handle, user_data);
            }
        })
    }));

    match outcome {
        Ok(Ok(())) => PSX_RESULT::SUCCESS,
        Ok(Err(_)) => {
            tracing::debug!(len, timeout_secs = s.timeout_secs, "scan aborted by deadline");
            s.last_error = Some(to_cstring(format!("scan timed out after {}s", s.timeout_secs)));
            PSX_RESULT::SCAN_TIMEOUT
        }
        Err(payload) => {
            let msg = anyhow!(panic_message(payload.as_ref())).context("scan failed");
            s.last_error = Some(to_cstring(format!("{msg:#}")));
            PSX_RESULT::PANIC
        }
    }
}

/// 最近一次扫描失败的消息；无错误时返回空指针
///
/// # Safety
/// `scanner` 来自 `psx_scanner_create`。返回的指针在下一次扫描或销毁前有效。
#[no_mangle]
pub unsafe extern "C" fn psx_scanner_last_error(scanner: *const PSX_SCANNER) -> *const c_char {
    scanner.as_ref().map_or(ptr::null(), |s| last_error_ptr(&s.last_error))
}

/// 销毁扫描器；空指针为 no-op
///
/// # Safety
/// `scanner` 来自 `psx_scanner_create`，且之后不再使用。
#[no_mangle]
pub unsafe extern "C" fn psx_scanner_destroy(scanner: *mut PSX_SCANNER) {
    if !scanner.is_null() {
        drop(Box::from_raw(scanner));
    }
}

/// 借出字符串到 (ptr, len) 输出参数
unsafe fn lend(s: Option<&str>, out: *mut *const u8, len: *mut usize) -> PSX_RESULT {
    if out.is_null() || len.is_null() {
        return PSX_RESULT::INVALID_ARGUMENT;
    }
    match s {
        Some(s) => {
            *out = s.as_ptr();
            *len = s.len();
        }
        None => {
            *out = ptr::null();
            *len = 0;
        }
    }
    PSX_RESULT::SUCCESS
}

/// 规则标识符
///
/// # Safety
/// `rule` 为回调收到的句柄，仅在回调期间有效；`ident`、`len` 可写。
#[no_mangle]
pub unsafe extern "C" fn psx_rule_identifier(rule: *const PSX_RULE, ident: *mut *const u8, len: *mut usize) -> PSX_RESULT {
    let Some(r) = rule.as_ref() else { return PSX_RESULT::INVALID_ARGUMENT };
    lend(Some(&r.0.spec.id), ident, len)
}

/// 规则命名空间
///
/// # Safety
/// 同 `psx_rule_identifier`。
#[no_mangle]
pub unsafe extern "C" fn psx_rule_namespace(rule: *const PSX_RULE, ns: *mut *const u8, len: *mut usize) -> PSX_RESULT {
    let Some(r) = rule.as_ref() else { return PSX_RESULT::INVALID_ARGUMENT };
    lend(Some(&r.0.spec.namespace), ns, len)
}

/// 规则显示名；未设置时输出空指针与 0
///
/// # Safety
/// 同 `psx_rule_identifier`。
#[no_mangle]
pub unsafe extern "C" fn psx_rule_name(rule: *const PSX_RULE, name: *mut *const u8, len: *mut usize) -> PSX_RESULT {
    let Some(r) = rule.as_ref() else { return PSX_RESULT::INVALID_ARGUMENT };
    lend(r.0.spec.name.as_deref(), name, len)
}

/// 规则元数据（JSON 对象文本）
///
/// # Safety
/// 同 `psx_rule_identifier`。
#[no_mangle]
pub unsafe extern "C" fn psx_rule_metadata_json(rule: *const PSX_RULE, json: *mut *const u8, len: *mut usize) -> PSX_RESULT {
    let Some(r) = rule.as_ref() else { return PSX_RESULT::INVALID_ARGUMENT };
    lend(Some(&r.0.spec.metadata_json), json, len)
}

/// 规则标签数量
///
/// # Safety
/// `rule` 为回调收到的句柄。
#[no_mangle]
pub unsafe extern "C" fn psx_rule_tag_count(rule: *const PSX_RULE) -> usize {
    rule.as_ref().map_or(0, |r| r.0.spec.tags.len())
}

/// 第 `index` 个标签
///
/// # Safety
/// 同 `psx_rule_identifier`。
#[no_mangle]
pub unsafe extern "C" fn psx_rule_tag(rule: *const PSX_RULE, index: usize, tag: *mut *const u8, len: *mut usize) -> PSX_RESULT {
    let Some(r) = rule.as_ref() else { return PSX_RESULT::INVALID_ARGUMENT };
    match r.0.spec.tags.get(index) {
        Some(t) => lend(Some(t), tag, len),
        None => PSX_RESULT::INVALID_ARGUMENT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const RULES: &[u8] = b"[[rules]]\nid = \"foo\"\nliteral = \"foo\"\ntags = [\"t1\", \"t2\"]\n[[rules]]\nid = \"bar\"\nname = \"Bar\"\nliteral = \"bar\"\n\0";

    unsafe fn compile(src: &[u8]) -> *mut PSX_RULES {
        let mut c = ptr::null_mut();
        assert_eq!(psx_compiler_create(&mut c), PSX_RESULT::SUCCESS);
        assert_eq!(psx_compiler_add_source(c, src.as_ptr() as *const c_char, ptr::null()), PSX_RESULT::SUCCESS);
        let mut rules = ptr::null_mut();
        assert_eq!(psx_compiler_build(c, &mut rules), PSX_RESULT::SUCCESS);
        psx_compiler_destroy(c);
        rules
    }

    unsafe fn borrowed(f: impl FnOnce(*mut *const u8, *mut usize) -> PSX_RESULT) -> Option<String> {
        let mut p = ptr::null();
        let mut n = 0usize;
        assert_eq!(f(&mut p, &mut n), PSX_RESULT::SUCCESS);
        if p.is_null() {
            return None;
        }
        Some(String::from_utf8_lossy(std::slice::from_raw_parts(p, n)).into_owned())
    }

    extern "C" fn collect(rule: *const PSX_RULE, user_data: *mut c_void) {
        let out = unsafe { &mut *(user_data as *mut Vec<(String, Option<String>, usize)>) };
        unsafe {
            let id = borrowed(|p, n| psx_rule_identifier(rule, p, n)).unwrap();
            let name = borrowed(|p, n| psx_rule_name(rule, p, n));
            out.push((id, name, psx_rule_tag_count(rule)));
        }
    }

    extern "C" fn slow(_rule: *const PSX_RULE, user_data: *mut c_void) {
        let count = unsafe { &mut *(user_data as *mut usize) };
        *count += 1;
        std::thread::sleep(Duration::from_millis(1100));
    }

    #[test]
    fn test_scan_through_abi() {
        unsafe {
            let rules = compile(RULES);
            assert_eq!(psx_rules_count(rules), 2);

            let mut s = ptr::null_mut();
            assert_eq!(psx_scanner_create(rules, &mut s), PSX_RESULT::SUCCESS);
            let mut out: Vec<(String, Option<String>, usize)> = Vec::new();
            psx_scanner_on_matching_rule(s, collect, &mut out as *mut _ as *mut c_void);

            let data = b"xx bar foo";
            assert_eq!(psx_scanner_scan(s, data.as_ptr(), data.len()), PSX_RESULT::SUCCESS);
            assert_eq!(out, vec![("bar".to_string(), Some("Bar".to_string()), 0), ("foo".to_string(), None, 2)]);
            assert!(psx_scanner_last_error(s).is_null());

            psx_scanner_destroy(s);
            psx_rules_destroy(rules);
        }
    }

    #[test]
    fn test_null_data_requires_zero_length() {
        unsafe {
            let rules = compile(RULES);
            let mut s = ptr::null_mut();
            psx_scanner_create(rules, &mut s);

            assert_eq!(psx_scanner_scan(s, ptr::null(), 0), PSX_RESULT::SUCCESS);
            assert_eq!(psx_scanner_scan(s, ptr::null(), 4), PSX_RESULT::INVALID_ARGUMENT);
            let msg = CStr::from_ptr(psx_scanner_last_error(s)).to_str().unwrap();
            assert_eq!(msg, "data is null but length is 4");

            psx_scanner_destroy(s);
            psx_rules_destroy(rules);
        }
    }

    #[test]
    fn test_timeout_after_slow_callback() {
        unsafe {
            let rules = compile(RULES);
            let mut s = ptr::null_mut();
            psx_scanner_create(rules, &mut s);
            let mut count = 0usize;
            psx_scanner_on_matching_rule(s, slow, &mut count as *mut usize as *mut c_void);
            psx_scanner_timeout(s, 1);

            let data = b"foo bar";
            assert_eq!(psx_scanner_scan(s, data.as_ptr(), data.len()), PSX_RESULT::SCAN_TIMEOUT);
            assert_eq!(count, 1);

            psx_scanner_destroy(s);
            psx_rules_destroy(rules);
        }
    }

    #[test]
    fn test_compile_error_message() {
        unsafe {
            let mut c = ptr::null_mut();
            psx_compiler_create(&mut c);
            let src = b"[[rules]]\nid = \"x\"\n\0";
            let ns = b"custom\0";
            let rc = psx_compiler_add_source(c, src.as_ptr() as *const c_char, ns.as_ptr() as *const c_char);
            assert_eq!(rc, PSX_RESULT::SYNTAX_ERROR);
            let msg = CStr::from_ptr(psx_compiler_last_error(c)).to_str().unwrap();
            assert!(msg.starts_with("namespace `custom`: rule `x`"), "{msg}");
            psx_compiler_destroy(c);
        }
    }

    #[test]
    fn test_null_handles_are_rejected() {
        unsafe {
            assert_eq!(psx_scanner_scan(ptr::null_mut(), ptr::null(), 0), PSX_RESULT::INVALID_ARGUMENT);
            assert_eq!(psx_scanner_timeout(ptr::null_mut(), 1), PSX_RESULT::INVALID_ARGUMENT);
            assert_eq!(psx_rules_count(ptr::null()), 0);
            assert!(psx_scanner_last_error(ptr::null()).is_null());
            psx_scanner_destroy(ptr::null_mut());
            psx_rules_destroy(ptr::null_mut());
            psx_compiler_destroy(ptr::null_mut());
        }
    }
}
