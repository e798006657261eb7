//! 扫描器：原生扫描器、回调上下文与命中缓冲的生命周期管理
//!
//! 资源归属：
//! - 原生扫描器、固定内存中的令牌、注册表条目三者同生同灭；
//! - 扫描器持有一份 [`Rules`] 克隆，原生规则不会先于原生扫描器被释放；
//! - 销毁顺序固定为：原生扫描器 → 令牌 → 固定内存。引擎不再持有 user data 后才释放它。
use std::ffi::CStr;
use std::ptr::{self, NonNull};
use std::sync::Arc;
use std::time::Duration;

use rulescan_engine::ffi::{
    psx_scanner_create, psx_scanner_destroy, psx_scanner_last_error, psx_scanner_on_matching_rule, psx_scanner_scan,
    psx_scanner_timeout, PSX_RESULT, PSX_SCANNER,
};

use crate::error::ScanError;
use crate::matches::{on_matching_rule, Match, MatchSink};
use crate::options::ScanOptions;
use crate::pinned::PinnedToken;
use crate::registry::{self, Token};
use crate::rules::Rules;

/// 存活期间的原生资源
struct NativeState {
    scanner: NonNull<PSX_SCANNER>,
    context: PinnedToken,
}

/// 基于一组 [`Rules`] 的扫描会话，可重复扫描。
///
/// 同一个扫描器的扫描由 `&mut self` 保证串行；需要并行时为每个线程各建一个扫描器，
/// 它们可以共享同一份 `Rules`。
pub struct Scanner {
    /// None 表示已销毁，之后不会再出现新的原生资源
    native: Option<NativeState>,
    sink: Arc<MatchSink>,
    timeout: Option<Duration>,
    // 必须在 native 之后释放（见 Drop）
    rules: Rules,
}

// 原生扫描器只被一个所有者使用，可以整体移交给其他线程
unsafe impl Send for Scanner {}

impl Scanner {
    /// 创建扫描器。原生扫描器创建失败属于致命错误（内存耗尽等），直接 panic。
    pub fn new(rules: &Rules) -> Self {
        let mut raw: *mut PSX_SCANNER = ptr::null_mut();
        let rc = unsafe { psx_scanner_create(rules.as_ptr(), &mut raw) };
        let scanner = match NonNull::new(raw) {
            Some(p) if rc == PSX_RESULT::SUCCESS => p,
            _ => fatal("psx_scanner_create", rc),
        };

        let sink = Arc::new(MatchSink::default());
        let token = registry::sinks().insert(Arc::clone(&sink));
        let context = PinnedToken::new(token);
        let rc = unsafe { psx_scanner_on_matching_rule(scanner.as_ptr(), on_matching_rule, context.as_user_data()) };
        if rc != PSX_RESULT::SUCCESS {
            // 回调没装上的扫描器永远报告不了命中，不能交给调用方
            unsafe { psx_scanner_destroy(scanner.as_ptr()) };
            registry::sinks().remove(token);
            fatal("psx_scanner_on_matching_rule", rc);
        }

        tracing::debug!(token = token.get(), rules = rules.len(), "scanner created");
        Self { native: Some(NativeState { scanner, context }), sink, timeout: None, rules: rules.clone() }
    }

    /// 创建扫描器并应用选项中的超时
    pub fn with_options(rules: &Rules, opts: &ScanOptions) -> Self {
        let mut scanner = Self::new(rules);
        if let Some(t) = opts.timeout() {
            scanner.set_timeout(t);
        }
        scanner
    }

    /// 设置扫描超时，下一次扫描生效，后设置的值覆盖先前的值。
    ///
    /// 引擎以整秒计时，这里向上取整（1.2s → 2s），保证不会比请求的更早中止；
    /// `Duration::ZERO` 表示不限时。超时是尽力而为：引擎在匹配步骤之间检查截止时间，
    /// 单个耗时很长的步骤可能让扫描超出设定值。
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = Some(timeout);
        if let Some(state) = &self.native {
            unsafe { psx_scanner_timeout(state.scanner.as_ptr(), timeout_secs(timeout)) };
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// 扫描 `data`，返回本次命中的规则（按引擎回调顺序）。
    ///
    /// 超时时返回 [`ScanError::Timeout`]，其中带有超时前已命中的规则。
    pub fn scan(&mut self, data: &[u8]) -> Result<Vec<Match>, ScanError> {
        let state = self.native.as_ref().ok_or(ScanError::Destroyed)?;

        // 清空上一次的结果，避免旧命中混入本次
        self.sink.reset();
        // 空切片以 (null, 0) 传给引擎
        let ptr = if data.is_empty() { ptr::null() } else { data.as_ptr() };
        let rc = unsafe { psx_scanner_scan(state.scanner.as_ptr(), ptr, data.len()) };
        let matches = self.sink.take();

        match rc {
            PSX_RESULT::SUCCESS => Ok(matches),
            PSX_RESULT::SCAN_TIMEOUT => {
                tracing::debug!(token = state.context.token().get(), partial = matches.len(), "scan timed out");
                Err(ScanError::Timeout { partial: matches })
            }
            other => Err(ScanError::Engine(last_error(state.scanner, other))),
        }
    }

    /// 释放原生资源。可重复调用，之后的调用为 no-op；`Drop` 时也会自动调用。
    pub fn destroy(&mut self) {
        if let Some(NativeState { scanner, context }) = self.native.take() {
            let token = context.token();
            unsafe { psx_scanner_destroy(scanner.as_ptr()) };
            registry::sinks().remove(token);
            drop(context);
            tracing::debug!(token = token.get(), "scanner destroyed");
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.native.is_none()
    }

    /// 当前注册表令牌；销毁后为 None
    pub fn token(&self) -> Option<Token> {
        self.native.as_ref().map(|s| s.context.token())
    }

    pub fn rules(&self) -> &Rules {
        &self.rules
    }
}

impl Drop for Scanner {
    fn drop(&mut self) {
        // 字段在此之后才释放，rules 晚于原生扫描器
        self.destroy();
    }
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("token", &self.token())
            .field("timeout", &self.timeout)
            .field("rules", &self.rules)
            .finish()
    }
}

/// 原生资源无法建立：环境耗尽或引擎状态损坏，不返回半成品
fn fatal(call: &str, rc: PSX_RESULT) -> ! {
    tracing::error!(?rc, "{call} failed");
    panic!("{call} failed: {rc:?}");
}

/// 超时转为引擎使用的整秒数，向上取整
pub(crate) fn timeout_secs(timeout: Duration) -> u64 {
    let secs = timeout.as_secs();
    if timeout.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

fn last_error(scanner: NonNull<PSX_SCANNER>, rc: PSX_RESULT) -> String {
    let msg = unsafe { psx_scanner_last_error(scanner.as_ptr()) };
    if msg.is_null() {
        return format!("scan failed: {rc:?}");
    }
    unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
}
