//! 会话监管：单次任务运行的取消管理
//!
//! 每次进入编排器（新任务或确认后恢复）都会领取一个新的 CancellationToken；
//! 只有运行中才会真正触发取消，空闲时调用 cancel 是无操作，且不会影响下一次运行。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

/// 会话级生命周期管理：持有当前运行的取消令牌
///
/// 令牌只在运行期间存在（`Some`），运行标志与令牌同在一把锁内。
#[derive(Debug, Clone, Default)]
pub struct SessionSupervisor {
    current: Arc<Mutex<Option<CancellationToken>>>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 开始一次运行：换发新令牌并标记为运行中
    pub fn begin(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.current() = Some(token.clone());
        token
    }

    /// 结束当前运行（正常结束、挂起等待确认或中止）
    pub fn end(&self) {
        *self.current() = None;
    }

    pub fn is_running(&self) -> bool {
        self.current().is_some()
    }

    /// 触发取消（用户 Ctrl+C）；幂等，空闲时无操作。返回是否真的取消了一次运行
    pub fn cancel(&self) -> bool {
        match self.current().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_when_idle_is_noop() {
        let supervisor = SessionSupervisor::new();
        assert!(!supervisor.cancel());
        let token = supervisor.begin();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancel_running_is_idempotent() {
        let supervisor = SessionSupervisor::new();
        let token = supervisor.begin();
        assert!(supervisor.cancel());
        assert!(supervisor.cancel());
        assert!(token.is_cancelled());
        supervisor.end();
        assert!(!supervisor.cancel());
    }

    #[test]
    fn test_cancel_after_end_touches_no_token() {
        let supervisor = SessionSupervisor::new();
        let handle = supervisor.clone();
        let token = supervisor.begin();
        assert!(handle.is_running());
        supervisor.end();
        assert!(!handle.is_running());
        assert!(!handle.cancel());
        assert!(!token.is_cancelled());
        let next = supervisor.begin();
        assert!(!next.is_cancelled());
        assert!(handle.cancel());
        assert!(next.is_cancelled());
    }

    #[test]
    fn test_new_run_gets_fresh_token() {
        let supervisor = SessionSupervisor::new();
        let first = supervisor.begin();
        supervisor.cancel();
        supervisor.end();
        let second = supervisor.begin();
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
    }
}
