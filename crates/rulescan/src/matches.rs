//! 命中结果与回调适配
use std::ffi::c_void;
use std::ptr;
use std::sync::{Mutex, PoisonError};

use rulescan_engine::ffi::{
    psx_rule_identifier, psx_rule_metadata_json, psx_rule_name, psx_rule_namespace, psx_rule_tag, psx_rule_tag_count,
    PSX_RESULT, PSX_RULE,
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::pinned::PinnedToken;
use crate::registry;

/// 一条命中的规则；构造时已复制全部数据，不引用引擎内存
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    identifier: String,
    namespace: String,
    name: Option<String>,
    tags: Vec<String>,
    metadata: Map<String, Value>,
}

impl Match {
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// 从引擎回调中的规则句柄复制出宿主值
    ///
    /// # Safety
    /// `rule` 必须是当前回调收到的有效句柄。
    unsafe fn from_native(rule: *const PSX_RULE) -> Self {
        let identifier = borrow_str(|p, n| psx_rule_identifier(rule, p, n)).unwrap_or_default();
        let namespace = borrow_str(|p, n| psx_rule_namespace(rule, p, n)).unwrap_or_default();
        let name = borrow_str(|p, n| psx_rule_name(rule, p, n));

        let tags = (0..psx_rule_tag_count(rule))
            .filter_map(|i| borrow_str(|p, n| psx_rule_tag(rule, i, p, n)))
            .collect();

        let metadata = match borrow_str(|p, n| psx_rule_metadata_json(rule, p, n)) {
            Some(json) => serde_json::from_str(&json).unwrap_or_else(|e| {
                tracing::warn!(rule = %identifier, error = %e, "discarding unreadable rule metadata");
                Map::new()
            }),
            None => Map::new(),
        };

        Self { identifier, namespace, name, tags, metadata }
    }
}

/// 复制引擎借出的 (ptr, len) 字符串；空指针视为缺省
unsafe fn borrow_str(f: impl FnOnce(*mut *const u8, *mut usize) -> PSX_RESULT) -> Option<String> {
    let mut p: *const u8 = ptr::null();
    let mut n: usize = 0;
    if f(&mut p, &mut n) != PSX_RESULT::SUCCESS || p.is_null() {
        return None;
    }
    let bytes = std::slice::from_raw_parts(p, n);
    Some(String::from_utf8_lossy(bytes).into_owned())
}

/// 单个扫描器的命中缓冲：扫描开始时清空，扫描中只追加，返回后整体取走。
///
/// 同一扫描器的扫描串行进行（`&mut Scanner`），锁总是无竞争的；
/// 它的存在只是为了让注册表能跨线程持有接收端。
#[derive(Debug, Default)]
pub(crate) struct MatchSink {
    matches: Mutex<Vec<Match>>,
}

impl MatchSink {
    fn buffer(&self) -> std::sync::MutexGuard<'_, Vec<Match>> {
        self.matches.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn reset(&self) {
        self.buffer().clear();
    }

    pub(crate) fn push(&self, m: Match) {
        self.buffer().push(m);
    }

    pub(crate) fn take(&self) -> Vec<Match> {
        std::mem::take(&mut *self.buffer())
    }
}

/// 全局回调入口：由引擎在扫描线程上同步调用。
///
/// 令牌找不到对应接收端说明注册表或固定内存已损坏，无法安全继续，直接终止进程。
pub(crate) extern "C" fn on_matching_rule(rule: *const PSX_RULE, user_data: *mut c_void) {
    let token = unsafe { PinnedToken::read(user_data) };
    let Some(sink) = registry::sinks().get(token) else {
        tracing::error!(token = token.get(), "match callback received an unregistered token");
        std::process::abort();
    };
    let m = unsafe { Match::from_native(rule) };
    tracing::trace!(token = token.get(), rule = %m.identifier, "rule matched");
    sink.push(m);
}
