//! 计时任务监管
//!
//! 持有根 CancellationToken；空闲轮询、转接动画等每个计时任务都持有它的子 token。
//! teardown 一次性取消全部计时任务，之后不会再有任何回调触发。

use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Default)]
pub struct TimerSupervisor {
    root: CancellationToken,
}

impl TimerSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为单个计时任务创建子 token
    pub fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// 取消所有计时任务（对话卸载 / 进程退出）
    pub fn teardown(&self) {
        self.root.cancel();
    }

    pub fn is_torn_down(&self) -> bool {
        self.root.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_teardown_cancels_children() {
        let timers = TimerSupervisor::new();
        let a = timers.child_token();
        let b = timers.child_token();
        assert!(!a.is_cancelled());
        timers.teardown();
        assert!(a.is_cancelled());
        assert!(b.is_cancelled());
        assert!(timers.is_torn_down());
    }

    #[test]
    fn test_child_cancel_does_not_affect_root() {
        let timers = TimerSupervisor::new();
        let a = timers.child_token();
        a.cancel();
        assert!(!timers.is_torn_down());
        assert!(!timers.child_token().is_cancelled());
    }
}
