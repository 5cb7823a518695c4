//! 转接动画子协议
//!
//! 分诊决定转接后依次经过 Analyzing -> Found -> Connecting -> Connected 四个阶段，
//! 每个阶段有最短停留时间，全部结束后发出 ConnectComplete。
//! 整个序列跑在一个后台任务里，只往事件通道发消息；abort 取消任务并让旧 generation 失效。

use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::core::events::{DeskEvent, EventSender};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectPhase {
    Analyzing,
    Found,
    Connecting,
    Connected,
}

impl ConnectPhase {
    pub const ORDER: [ConnectPhase; 4] = [
        ConnectPhase::Analyzing,
        ConnectPhase::Found,
        ConnectPhase::Connecting,
        ConnectPhase::Connected,
    ];

    pub fn next(self) -> Option<ConnectPhase> {
        match self {
            ConnectPhase::Analyzing => Some(ConnectPhase::Found),
            ConnectPhase::Found => Some(ConnectPhase::Connecting),
            ConnectPhase::Connecting => Some(ConnectPhase::Connected),
            ConnectPhase::Connected => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ConnectPhase::Analyzing => "Analyzing your request",
            ConnectPhase::Found => "Expert found",
            ConnectPhase::Connecting => "Connecting",
            ConnectPhase::Connected => "Connected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectingConfig {
    pub analyzing: Duration,
    pub found: Duration,
    pub connecting: Duration,
    pub connected: Duration,
}

impl Default for ConnectingConfig {
    fn default() -> Self {
        Self {
            analyzing: Duration::from_millis(1200),
            found: Duration::from_millis(1200),
            connecting: Duration::from_millis(1200),
            connected: Duration::from_millis(600),
        }
    }
}

impl ConnectingConfig {
    pub fn dwell(&self, phase: ConnectPhase) -> Duration {
        match phase {
            ConnectPhase::Analyzing => self.analyzing,
            ConnectPhase::Found => self.found,
            ConnectPhase::Connecting => self.connecting,
            ConnectPhase::Connected => self.connected,
        }
    }

    pub fn total(&self) -> Duration {
        ConnectPhase::ORDER.iter().map(|p| self.dwell(*p)).sum()
    }
}

pub struct ConnectingSequence {
    config: ConnectingConfig,
    phase: Option<ConnectPhase>,
    generation: u64,
    task: Option<CancellationToken>,
    parent: CancellationToken,
    events: EventSender,
}

impl ConnectingSequence {
    pub fn new(config: ConnectingConfig, events: EventSender, parent: CancellationToken) -> Self {
        Self {
            config,
            phase: None,
            generation: 0,
            task: None,
            parent,
            events,
        }
    }

    pub fn phase(&self) -> Option<ConnectPhase> {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 从 Analyzing 开始一轮新的动画；已有的一轮会先被取消
    pub fn start(&mut self) -> u64 {
        self.abort();
        self.generation += 1;
        self.phase = Some(ConnectPhase::Analyzing);

        let generation = self.generation;
        let token = self.parent.child_token();
        let task_token = token.clone();
        let events = self.events.clone();
        let config = self.config.clone();

        tokio::spawn(async move {
            let mut phase = ConnectPhase::Analyzing;
            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => return,
                    _ = tokio::time::sleep(config.dwell(phase)) => {}
                }
                let event = match phase.next() {
                    Some(next) => {
                        phase = next;
                        DeskEvent::ConnectPhase { generation, phase: next }
                    }
                    None => DeskEvent::ConnectComplete { generation },
                };
                let done = matches!(event, DeskEvent::ConnectComplete { .. });
                if events.send(event).is_err() || done {
                    return;
                }
            }
        });

        tracing::debug!(generation, "Connecting sequence started");
        self.task = Some(token);
        generation
    }

    /// 取消当前动画，之后到达的旧事件都会被忽略
    pub fn abort(&mut self) {
        if let Some(token) = self.task.take() {
            token.cancel();
            tracing::debug!(generation = self.generation, "Connecting sequence aborted");
            self.generation += 1;
        }
        self.phase = None;
    }

    /// 阶段事件；返回 false 表示事件已过期
    pub fn on_phase(&mut self, generation: u64, phase: ConnectPhase) -> bool {
        if generation != self.generation || self.task.is_none() {
            return false;
        }
        self.phase = Some(phase);
        true
    }

    /// 完成事件；有效时结束本轮并返回 true
    pub fn on_complete(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.task.is_none() {
            return false;
        }
        self.task = None;
        self.phase = None;
        true
    }
}

impl Drop for ConnectingSequence {
    fn drop(&mut self) {
        if let Some(token) = self.task.take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    fn sequence() -> (ConnectingSequence, mpsc::UnboundedReceiver<DeskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let seq = ConnectingSequence::new(ConnectingConfig::default(), tx, CancellationToken::new());
        (seq, rx)
    }

    #[test]
    fn test_total_dwell() {
        assert_eq!(ConnectingConfig::default().total(), Duration::from_millis(4200));
        assert_eq!(ConnectPhase::Connected.next(), None);
        assert_eq!(ConnectPhase::Analyzing.next(), Some(ConnectPhase::Found));
    }

    #[tokio::test(start_paused = true)]
    async fn test_phases_in_order_then_complete() {
        let (mut seq, mut rx) = sequence();
        let started = Instant::now();
        let generation = seq.start();
        assert_eq!(seq.phase(), Some(ConnectPhase::Analyzing));

        let mut seen = vec![ConnectPhase::Analyzing];
        loop {
            match rx.recv().await {
                Some(DeskEvent::ConnectPhase { generation: g, phase }) => {
                    assert!(seq.on_phase(g, phase));
                    seen.push(phase);
                }
                Some(DeskEvent::ConnectComplete { generation: g }) => {
                    assert_eq!(g, generation);
                    assert!(seq.on_complete(g));
                    break;
                }
                other => panic!("unexpected event {:?}", other),
            }
        }

        assert_eq!(seen, ConnectPhase::ORDER.to_vec());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(4200));
        assert!(elapsed < Duration::from_millis(4300));
        assert!(!seq.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_prevents_completion() {
        let (mut seq, mut rx) = sequence();
        let generation = seq.start();
        tokio::time::sleep(Duration::from_millis(500)).await;
        seq.abort();
        assert!(!seq.is_running());
        assert_eq!(seq.phase(), None);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
        assert!(!seq.on_complete(generation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_invalidates_old_generation() {
        let (mut seq, _rx) = sequence();
        let first = seq.start();
        let second = seq.start();
        assert_ne!(first, second);
        assert!(!seq.on_phase(first, ConnectPhase::Found));
        assert!(seq.on_phase(second, ConnectPhase::Found));
    }
}
