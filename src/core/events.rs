//! 计时任务 -> 编排器的事件
//!
//! 计时任务本身不改任何状态，只把事件发到通道；每个事件携带 generation，
//! 编排器只接受与当前周期一致的事件，过期事件直接丢弃。

use tokio::sync::mpsc;

use crate::core::connecting::ConnectPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeskEvent {
    /// 空闲监管的 1 秒轮询
    IdleTick { generation: u64 },
    /// 转接动画进入下一阶段
    ConnectPhase { generation: u64, phase: ConnectPhase },
    /// 转接动画全部阶段结束
    ConnectComplete { generation: u64 },
}

pub type EventSender = mpsc::UnboundedSender<DeskEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<DeskEvent>;
