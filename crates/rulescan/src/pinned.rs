//! 固定地址的回调上下文
use std::ffi::c_void;
use std::ptr::NonNull;

use crate::registry::Token;

/// 独立堆分配、只存一个令牌的内存块。
///
/// 其地址作为 user data 交给引擎，在扫描器整个生命周期内不变；
/// 宿主侧 `Scanner` 值可以随意移动，引擎持有的地址不受影响。
/// 必须在原生扫描器销毁之后再释放。
pub(crate) struct PinnedToken {
    ptr: NonNull<Token>,
}

impl PinnedToken {
    pub(crate) fn new(token: Token) -> Self {
        Self { ptr: NonNull::from(Box::leak(Box::new(token))) }
    }

    pub(crate) fn token(&self) -> Token {
        unsafe { *self.ptr.as_ptr() }
    }

    /// 交给引擎的不透明指针
    pub(crate) fn as_user_data(&self) -> *mut c_void {
        self.ptr.as_ptr().cast()
    }

    /// 从引擎回传的 user data 读出令牌
    ///
    /// # Safety
    /// `user_data` 必须来自某个仍未释放的 `PinnedToken::as_user_data`。
    pub(crate) unsafe fn read(user_data: *mut c_void) -> Token {
        *(user_data as *const Token)
    }
}

impl Drop for PinnedToken {
    fn drop(&mut self) {
        unsafe { drop(Box::from_raw(self.ptr.as_ptr())) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use std::sync::Arc;

    #[test]
    fn test_address_is_stable_across_moves() {
        let reg: Registry<()> = Registry::new();
        let token = reg.insert(Arc::new(()));
        let pinned = PinnedToken::new(token);
        let addr = pinned.as_user_data();

        let moved = vec![pinned];
        assert_eq!(moved[0].as_user_data(), addr);
        assert_eq!(unsafe { PinnedToken::read(addr) }, token);
        assert_eq!(moved[0].token(), token);
    }
}
