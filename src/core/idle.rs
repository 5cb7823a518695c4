//! 空闲监管
//!
//! 只在「当前为专家 Agent 且对话非空」时启用。启用后每秒轮询一次，比较距上次活动的时间：
//! 超过警告阈值触发一次 Warning（并给出 M:SS 倒计时），超过超时阈值触发一次 Timeout 并停止轮询。
//! reset_timer 把已过时间清零、清除警告标记，可重复调用，在 Expired 状态下调用会重新开始轮询。
//!
//! 状态机：Inactive -> Running -> Warning -> Expired（reset_timer 回到 Running）。

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::events::{DeskEvent, EventSender};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleConfig {
    pub warning_after: Duration,
    pub timeout_after: Duration,
    pub poll_interval: Duration,
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            warning_after: Duration::from_secs(180),
            timeout_after: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IdlePhase {
    Inactive,
    Running,
    Warning,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleEvent {
    Warning { remaining: Duration },
    Timeout,
}

pub struct IdleSupervisor {
    config: IdleConfig,
    phase: IdlePhase,
    enabled: bool,
    last_activity: Instant,
    warning_shown: bool,
    remaining: Duration,
    /// 每次（重新）开始轮询时递增，旧轮询的 tick 被忽略
    generation: u64,
    ticker: Option<CancellationToken>,
    parent: CancellationToken,
    events: EventSender,
}

impl IdleSupervisor {
    pub fn new(config: IdleConfig, events: EventSender, parent: CancellationToken) -> Self {
        let remaining = config.timeout_after;
        Self {
            config,
            phase: IdlePhase::Inactive,
            enabled: false,
            last_activity: Instant::now(),
            warning_shown: false,
            remaining,
            generation: 0,
            ticker: None,
            parent,
            events,
        }
    }

    pub fn phase(&self) -> IdlePhase {
        self.phase
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_polling(&self) -> bool {
        self.ticker.is_some()
    }

    pub fn warning_visible(&self) -> bool {
        self.phase == IdlePhase::Warning
    }

    pub fn remaining(&self) -> Duration {
        self.remaining
    }

    /// 剩余时间，格式 M:SS（秒向上取整）
    pub fn countdown(&self) -> String {
        format_countdown(self.remaining)
    }

    /// 启用时重置计时并开始轮询；禁用时停止轮询且不触发超时
    pub fn set_enabled(&mut self, enabled: bool) {
        if enabled == self.enabled {
            return;
        }
        self.enabled = enabled;
        if enabled {
            tracing::debug!("Idle supervisor enabled");
            self.reset_timer();
        } else {
            tracing::debug!("Idle supervisor disabled");
            self.stop_ticker();
            self.phase = IdlePhase::Inactive;
            self.warning_shown = false;
            self.remaining = self.config.timeout_after;
        }
    }

    /// 记录一次活动：已过时间清零、清除警告
    pub fn reset_timer(&mut self) {
        self.last_activity = Instant::now();
        self.warning_shown = false;
        self.remaining = self.config.timeout_after;
        if !self.enabled {
            return;
        }
        self.phase = IdlePhase::Running;
        if self.ticker.is_none() {
            self.start_ticker();
        }
    }

    /// 用户在警告弹窗中选择继续
    pub fn dismiss_warning(&mut self) {
        self.reset_timer();
    }

    /// 处理一次轮询；generation 不匹配或未启用时忽略
    pub fn on_tick(&mut self, generation: u64) -> Vec<IdleEvent> {
        if generation != self.generation || !self.enabled || self.ticker.is_none() {
            return Vec::new();
        }
        let elapsed = self.last_activity.elapsed();
        self.evaluate(elapsed)
    }

    /// 按已过时间推进状态机
    pub fn evaluate(&mut self, elapsed: Duration) -> Vec<IdleEvent> {
        if matches!(self.phase, IdlePhase::Inactive | IdlePhase::Expired) {
            return Vec::new();
        }
        let mut fired = Vec::new();
        self.remaining = self.config.timeout_after.saturating_sub(elapsed);

        if elapsed >= self.config.warning_after && !self.warning_shown {
            self.warning_shown = true;
            self.phase = IdlePhase::Warning;
            fired.push(IdleEvent::Warning {
                remaining: self.remaining,
            });
        }

        if elapsed >= self.config.timeout_after {
            self.phase = IdlePhase::Expired;
            self.stop_ticker();
            fired.push(IdleEvent::Timeout);
        }

        fired
    }

    fn start_ticker(&mut self) {
        self.stop_ticker();
        self.generation += 1;
        let generation = self.generation;
        let token = self.parent.child_token();
        let task_token = token.clone();
        let events = self.events.clone();
        let period = self.config.poll_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    _ = interval.tick() => {
                        if events.send(DeskEvent::IdleTick { generation }).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        self.ticker = Some(token);
    }

    fn stop_ticker(&mut self) {
        if let Some(token) = self.ticker.take() {
            token.cancel();
        }
    }
}

impl Drop for IdleSupervisor {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

pub fn format_countdown(remaining: Duration) -> String {
    let seconds = remaining.as_millis().div_ceil(1000);
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn supervisor() -> (IdleSupervisor, mpsc::UnboundedReceiver<DeskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sup = IdleSupervisor::new(IdleConfig::default(), tx, CancellationToken::new());
        (sup, rx)
    }

    #[test]
    fn test_format_countdown() {
        assert_eq!(format_countdown(Duration::from_secs(300)), "5:00");
        assert_eq!(format_countdown(Duration::from_millis(119_001)), "2:00");
        assert_eq!(format_countdown(Duration::from_millis(59_500)), "1:00");
        assert_eq!(format_countdown(Duration::from_secs(9)), "0:09");
        assert_eq!(format_countdown(Duration::ZERO), "0:00");
    }

    #[tokio::test(start_paused = true)]
    async fn test_warning_fires_once() {
        let (mut sup, _rx) = supervisor();
        sup.set_enabled(true);

        let events = sup.evaluate(Duration::from_millis(181_000));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], IdleEvent::Warning { .. }));
        assert_eq!(sup.countdown(), "1:59");
        assert!(sup.warning_visible());

        assert!(sup.evaluate(Duration::from_millis(182_000)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_once_and_halts() {
        let (mut sup, _rx) = supervisor();
        sup.set_enabled(true);
        sup.evaluate(Duration::from_millis(181_000));

        let events = sup.evaluate(Duration::from_millis(301_000));
        assert_eq!(events, vec![IdleEvent::Timeout]);
        assert_eq!(sup.phase(), IdlePhase::Expired);
        assert!(!sup.is_polling());
        assert!(sup.evaluate(Duration::from_millis(400_000)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_jump_past_timeout_fires_warning_then_timeout() {
        let (mut sup, _rx) = supervisor();
        sup.set_enabled(true);
        let events = sup.evaluate(Duration::from_millis(301_000));
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], IdleEvent::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_restores_full_countdown() {
        let (mut sup, _rx) = supervisor();
        sup.set_enabled(true);
        sup.evaluate(Duration::from_millis(250_000));
        sup.reset_timer();
        assert_eq!(sup.countdown(), "5:00");
        assert_eq!(sup.phase(), IdlePhase::Running);

        sup.evaluate(Duration::from_millis(301_000));
        sup.reset_timer();
        sup.reset_timer();
        assert_eq!(sup.countdown(), "5:00");
        assert_eq!(sup.phase(), IdlePhase::Running);
        assert!(sup.is_polling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disable_stops_without_timeout() {
        let (mut sup, _rx) = supervisor();
        sup.set_enabled(true);
        sup.set_enabled(false);
        assert_eq!(sup.phase(), IdlePhase::Inactive);
        assert!(!sup.is_polling());
        assert!(sup.evaluate(Duration::from_secs(600)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_drive_timeout() {
        let (mut sup, mut rx) = supervisor();
        sup.set_enabled(true);

        let mut warnings = 0;
        let mut timeouts = 0;
        while let Some(DeskEvent::IdleTick { generation }) = rx.recv().await {
            for e in sup.on_tick(generation) {
                match e {
                    IdleEvent::Warning { .. } => warnings += 1,
                    IdleEvent::Timeout => timeouts += 1,
                }
            }
            if !sup.is_polling() {
                break;
            }
        }
        assert_eq!((warnings, timeouts), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_ignored() {
        let (mut sup, _rx) = supervisor();
        sup.set_enabled(true);
        tokio::time::advance(Duration::from_secs(200)).await;
        assert!(sup.on_tick(0).is_empty());
        assert_eq!(sup.on_tick(1).len(), 1);
    }
}
