//! 运行时主循环
//!
//! 负责：加载配置、选择后端、创建编排器，建立 cmd / state 两条通道，
//! 并在后台任务中同时消费用户命令、计时事件与关闭信号，每次处理后发布一份快照。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{mpsc, watch};

use crate::config::{load_config, AppConfig};
use crate::conversation::Attachment;
use crate::core::events::{DeskEvent, EventReceiver};
use crate::core::orchestrator::{ConversationOrchestrator, DeskSettings, SubmitOutcome};
use crate::core::shutdown::{ShutdownManager, ShutdownReason};
use crate::core::state::DeskSnapshot;
use crate::llm::{create_deepseek_backend, ChatBackend, OfflineBackend, OpenAiBackend};

/// 从渲染层发往运行时的命令
#[derive(Debug, Clone)]
pub enum Command {
    /// 提交用户输入（可带 base64 附件）
    Submit {
        text: String,
        attachments: Vec<Attachment>,
    },
    /// 空闲警告中选择继续
    DismissIdleWarning,
    /// 用户主动结束当前专家会话
    EndSession,
    SelectSession(String),
    CancelHandoff,
    DismissDisconnect,
    Quit,
}

/// 根据配置与环境变量选择后端（DeepSeek / OpenAI 兼容 / 离线）
pub fn create_backend_from_config(cfg: &AppConfig) -> Arc<dyn ChatBackend> {
    let provider = cfg.llm.provider.to_lowercase();
    let roster = cfg.roster();
    let has_deepseek_key = std::env::var("DEEPSEEK_API_KEY").is_ok();
    let has_openai_key = std::env::var("OPENAI_API_KEY").is_ok();

    match provider.as_str() {
        "offline" => {
            tracing::info!("Using offline backend");
            Arc::new(OfflineBackend::default())
        }
        "deepseek" if has_deepseek_key || has_openai_key => {
            let backend = create_deepseek_backend(cfg.llm.model.as_deref(), roster);
            tracing::info!("Using DeepSeek backend ({})", backend.model());
            Arc::new(backend)
        }
        "openai" if has_openai_key => {
            let model = cfg
                .llm
                .model
                .clone()
                .unwrap_or_else(|| "gpt-4o-mini".to_string());
            tracing::info!("Using OpenAI backend ({})", model);
            Arc::new(OpenAiBackend::new(
                cfg.llm.base_url.as_deref(),
                &model,
                None,
                roster,
            ))
        }
        _ => {
            tracing::warn!(
                provider = %provider,
                "No API key set or provider unknown, using offline backend"
            );
            Arc::new(OfflineBackend::default())
        }
    }
}

/// 创建运行时：返回命令发送端与快照接收端；快照发送端被丢弃即表示运行时已退出
pub async fn create_desk(
    config_path: Option<PathBuf>,
) -> anyhow::Result<(mpsc::UnboundedSender<Command>, watch::Receiver<DeskSnapshot>)> {
    let cfg = if config_path.is_some() {
        load_config(config_path).context("Failed to load config")?
    } else {
        load_config(None).unwrap_or_else(|e| {
            tracing::warn!("Config load failed ({}), using defaults", e);
            AppConfig::default()
        })
    };
    cfg.validate().context("Invalid configuration")?;

    let backend = create_backend_from_config(&cfg);
    let (orchestrator, events) =
        ConversationOrchestrator::new(backend, cfg.roster(), DeskSettings::from_config(&cfg));

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    Ok(spawn_desk(orchestrator, events, shutdown))
}

/// 在后台任务中运行编排器
pub fn spawn_desk(
    orchestrator: ConversationOrchestrator,
    events: EventReceiver,
    shutdown: Arc<ShutdownManager>,
) -> (mpsc::UnboundedSender<Command>, watch::Receiver<DeskSnapshot>) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
    let (state_tx, state_rx) = watch::channel(orchestrator.snapshot());
    tokio::spawn(run_desk(orchestrator, events, cmd_rx, state_tx, shutdown));
    (cmd_tx, state_rx)
}

async fn run_desk(
    mut desk: ConversationOrchestrator,
    mut events: EventReceiver,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<DeskSnapshot>,
    shutdown: Arc<ShutdownManager>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait_for_shutdown() => break,
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    // cmd_tx 已全部关闭
                    shutdown.shutdown(ShutdownReason::ChannelClosed);
                    break;
                };
                if matches!(cmd, Command::Quit) {
                    shutdown.shutdown(ShutdownReason::UserInitiated);
                    break;
                }
                handle_command(&mut desk, cmd, &state_tx).await;
                let _ = state_tx.send(desk.snapshot());
            }
            Some(event) = events.recv() => {
                if matches!(event, DeskEvent::ConnectComplete { .. }) {
                    publish_busy(&desk, &state_tx);
                }
                desk.handle_event(event).await;
                let _ = state_tx.send(desk.snapshot());
            }
        }
    }

    desk.shutdown();
    let _ = state_tx.send(desk.snapshot());
    tracing::info!("Desk runtime stopped");
}

async fn handle_command(
    desk: &mut ConversationOrchestrator,
    cmd: Command,
    state_tx: &watch::Sender<DeskSnapshot>,
) {
    match cmd {
        Command::Submit { text, attachments } => {
            publish_busy(desk, state_tx);
            match desk.submit_user_message(&text, attachments).await {
                SubmitOutcome::Throttled(limit) => {
                    tracing::info!("Input throttled: {}", limit.message);
                }
                SubmitOutcome::Failed(err) => {
                    tracing::warn!("Submit failed: {}", err);
                }
                outcome => tracing::debug!(?outcome, "Submit handled"),
            }
        }
        Command::DismissIdleWarning => desk.dismiss_idle_warning(),
        Command::EndSession => {
            if !desk.end_session_by_user() {
                tracing::debug!("No specialist session to end");
            }
        }
        Command::SelectSession(id) => {
            if !desk.select_session(&id) {
                tracing::warn!(session_id = %id, "Unknown session");
            }
        }
        Command::CancelHandoff => {
            desk.cancel_handoff();
        }
        Command::DismissDisconnect => desk.dismiss_disconnect(),
        Command::Quit => {}
    }
}

/// 先发布「等待回复」状态，再发起后端调用
fn publish_busy(desk: &ConversationOrchestrator, state_tx: &watch::Sender<DeskSnapshot>) {
    let mut snapshot = desk.snapshot();
    snapshot.busy = true;
    snapshot.input_locked = true;
    let _ = state_tx.send(snapshot);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRoster;
    use crate::core::state::DeskPhase;
    use crate::llm::{BackendReply, HandoffDecision, ScriptedBackend};

    fn scripted_desk(
        backend: Arc<ScriptedBackend>,
    ) -> (
        mpsc::UnboundedSender<Command>,
        watch::Receiver<DeskSnapshot>,
        Arc<ShutdownManager>,
    ) {
        let (desk, events) =
            ConversationOrchestrator::new(backend, AgentRoster::default(), DeskSettings::default());
        let shutdown = Arc::new(ShutdownManager::new());
        let (tx, rx) = spawn_desk(desk, events, shutdown.clone());
        (tx, rx, shutdown)
    }

    async fn wait_for(
        rx: &mut watch::Receiver<DeskSnapshot>,
        pred: impl Fn(&DeskSnapshot) -> bool,
    ) -> DeskSnapshot {
        loop {
            {
                let snap = rx.borrow_and_update();
                if pred(&snap) {
                    return snap.clone();
                }
            }
            rx.changed().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_submit_publishes_reply() {
        let backend = Arc::new(ScriptedBackend::new());
        backend
            .push_reply(BackendReply::triage(r#"{"handoff": false, "message": "Hello!"}"#))
            .await;
        let (tx, mut rx, _shutdown) = scripted_desk(backend);

        tx.send(Command::Submit {
            text: "hi".into(),
            attachments: vec![],
        })
        .unwrap();
        let snap = wait_for(&mut rx, |s| s.messages.len() == 2 && !s.busy).await;
        assert_eq!(snap.messages[1].content, "Hello!");
        assert_eq!(snap.phase, DeskPhase::Triage);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handoff_reaches_specialist() {
        let backend = Arc::new(ScriptedBackend::new());
        backend
            .push_reply(BackendReply {
                handoff: Some(HandoffDecision::to_agent("agent-2", "Connecting...")),
                ..BackendReply::text("Connecting...")
            })
            .await;
        backend.push_reply(BackendReply::text("Hi, I'm Jake.")).await;
        let (tx, mut rx, _shutdown) = scripted_desk(backend);

        tx.send(Command::Submit {
            text: "my workflow is stuck".into(),
            attachments: vec![],
        })
        .unwrap();
        let snap = wait_for(&mut rx, |s| s.phase == DeskPhase::WithSpecialist && !s.busy).await;
        assert_eq!(snap.agent.id(), "agent-2");
        assert_eq!(snap.current_session, snap.selected_session);
        assert_eq!(snap.sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_quit_stops_runtime() {
        let backend = Arc::new(ScriptedBackend::new());
        let (tx, mut rx, shutdown) = scripted_desk(backend);
        tx.send(Command::Quit).unwrap();
        while rx.changed().await.is_ok() {}
        assert!(shutdown.is_shutdown());
    }

    #[tokio::test]
    async fn test_create_desk_rejects_broken_config_file() {
        use std::io::Write;

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[idle]\nwarning_secs = \"soon\"").unwrap();
        let err = create_desk(Some(file.path().to_path_buf())).await.unwrap_err();
        assert!(err.to_string().contains("Failed to load config"));

        let missing = file.path().with_extension("missing.toml");
        assert!(create_desk(Some(missing)).await.is_err());
    }
}
