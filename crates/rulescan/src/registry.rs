//! 跨运行时令牌注册表
//!
//! 引擎回调只能携带一个指针大小的值，无法直接引用可移动的宿主对象。
//! 注册表把整数令牌映射到扫描器的命中接收端，回调凭令牌找回它。
//! 令牌单调递增、永不复用，因此查找结果不会指向已销毁或其他扫描器。

use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use crate::matches::MatchSink;

/// 不透明令牌：同一时刻至多关联一个存活的扫描器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Token(NonZeroU64);

impl Token {
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

/// 令牌 → 对象 的进程内映射；单次操作在锁内完成
pub(crate) struct Registry<T> {
    next: AtomicU64,
    slots: Mutex<HashMap<Token, Arc<T>>>,
}

impl<T> Registry<T> {
    pub(crate) fn new() -> Self {
        Self { next: AtomicU64::new(1), slots: Mutex::new(HashMap::new()) }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<Token, Arc<T>>> {
        // 锁内只有 HashMap 的插删查，中毒时数据仍然一致
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 登记对象，返回新令牌
    pub(crate) fn insert(&self, value: Arc<T>) -> Token {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        let token = match NonZeroU64::new(raw) {
            Some(n) => Token(n),
            // 2^64 次登记后回绕；继续下去会复用令牌
            None => std::process::abort(),
        };
        self.slots().insert(token, value);
        token
    }

    pub(crate) fn get(&self, token: Token) -> Option<Arc<T>> {
        self.slots().get(&token).cloned()
    }

    /// 删除令牌；第二次删除返回 None
    pub(crate) fn remove(&self, token: Token) -> Option<Arc<T>> {
        self.slots().remove(&token)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots().len()
    }
}

/// 进程级注册表：扫描器令牌 → 命中接收端
pub(crate) fn sinks() -> &'static Registry<MatchSink> {
    static SINKS: OnceLock<Registry<MatchSink>> = OnceLock::new();
    SINKS.get_or_init(Registry::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_insert_get_remove() {
        let reg: Registry<String> = Registry::new();
        let a = reg.insert(Arc::new("a".to_string()));
        let b = reg.insert(Arc::new("b".to_string()));
        assert_ne!(a, b);
        assert_eq!(reg.get(a).as_deref().map(String::as_str), Some("a"));
        assert_eq!(reg.get(b).as_deref().map(String::as_str), Some("b"));

        assert!(reg.remove(a).is_some());
        assert!(reg.remove(a).is_none());
        assert!(reg.get(a).is_none());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_tokens_are_never_reused() {
        let reg: Registry<u32> = Registry::new();
        let first = reg.insert(Arc::new(1));
        reg.remove(first);
        let second = reg.insert(Arc::new(2));
        assert!(second > first);
        assert!(reg.get(first).is_none());
        assert_eq!(reg.get(second).as_deref(), Some(&2));
    }

    #[test]
    fn test_concurrent_insert_remove() {
        let reg: Arc<Registry<usize>> = Arc::new(Registry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let reg = Arc::clone(&reg);
                thread::spawn(move || {
                    for i in 0..200 {
                        let v = t * 1000 + i;
                        let tok = reg.insert(Arc::new(v));
                        assert_eq!(reg.get(tok).as_deref(), Some(&v));
                        assert_eq!(reg.remove(tok).as_deref(), Some(&v));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.len(), 0);
    }
}
