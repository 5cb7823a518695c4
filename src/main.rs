//! Switchboard - 客服对话终端
//!
//! 入口：初始化日志、创建运行时，从 stdin 读取输入并把快照变化打印到 stdout。
//!
//! 命令：/end 结束会话、/sessions 列出会话、/select <id> 切换会话、
//! /continue 关闭空闲警告、/cancel 中止转接、/quit 退出；其它输入作为消息提交。

use anyhow::Context;
use switchboard::conversation::Role;
use switchboard::core::{create_desk, Command, DeskError, DeskPhase, DeskSnapshot};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    switchboard::observability::init();

    let config_path = std::env::args().nth(1).map(std::path::PathBuf::from);
    let (cmd_tx, state_rx) = create_desk(config_path)
        .await
        .context("Failed to create desk")?;

    let printer = tokio::spawn(print_snapshots(state_rx.clone()));
    println!("Connected to support. Type a message, or /quit to exit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut watcher = state_rx.clone();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) => line,
                None => break,
            },
            // 运行时已退出（Ctrl+C / SIGTERM）
            changed = watcher.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        };
        let line = line.trim();
        let cmd = match line {
            "" => continue,
            "/quit" => Command::Quit,
            "/end" => Command::EndSession,
            "/continue" => Command::DismissIdleWarning,
            "/cancel" => Command::CancelHandoff,
            "/sessions" => {
                print_sessions(&state_rx.borrow());
                continue;
            }
            _ if line.starts_with("/select ") => {
                Command::SelectSession(line["/select ".len()..].trim().to_string())
            }
            _ => Command::Submit {
                text: line.to_string(),
                attachments: Vec::new(),
            },
        };
        let quit = matches!(cmd, Command::Quit);
        cmd_tx.send(cmd).map_err(|_| DeskError::ChannelClosed)?;
        if quit {
            break;
        }
    }

    drop(cmd_tx);
    printer.await.context("Snapshot printer panicked")?;
    Ok(())
}

/// 只打印与上一份快照相比的变化
async fn print_snapshots(mut rx: watch::Receiver<DeskSnapshot>) {
    let mut printed = 0usize;
    let mut last_phase = DeskPhase::Triage;
    let mut last_connect = None;
    let mut last_warning = false;
    let mut last_limit = None;

    loop {
        {
            let snap = rx.borrow_and_update();

            if snap.messages.len() < printed {
                println!("--- conversation cleared ---");
                printed = 0;
            }
            for msg in &snap.messages[printed..] {
                let who = match msg.role {
                    Role::User => "you".to_string(),
                    Role::Model if msg.is_system_message => "system".to_string(),
                    Role::Model => snap.agent.name().to_string(),
                };
                println!("[{}] {}", who, msg.content);
                for source in &msg.sources {
                    println!("    source: {} <{}>", source.title, source.uri);
                }
            }
            printed = snap.messages.len();

            if snap.phase != last_phase {
                if snap.phase == DeskPhase::WithSpecialist {
                    println!("*** now chatting with {} ({})", snap.agent.name(), snap.agent.profile().role);
                }
                last_phase = snap.phase;
            }
            if snap.connect_phase != last_connect {
                if let (Some(phase), Some(agent)) = (snap.connect_phase, &snap.pending_agent) {
                    println!("... {} ({})", phase.label(), agent.name);
                }
                last_connect = snap.connect_phase;
            }
            match (&snap.idle_warning, last_warning) {
                (Some(countdown), false) => {
                    println!("!!! Are you still there? Session ends in {}. Type /continue to stay.", countdown);
                    last_warning = true;
                }
                (None, true) => last_warning = false,
                _ => {}
            }
            let limit = snap.rate_limit.as_ref().map(|l| l.message.clone());
            if limit != last_limit {
                if let Some(l) = &snap.rate_limit {
                    let wait = snap.rate_limit_countdown.as_deref().unwrap_or("unknown");
                    println!("!!! {}: {} (resets in {})", l.limit_type.label(), l.message, wait);
                }
                last_limit = limit;
            }
        }

        if rx.changed().await.is_err() {
            break;
        }
    }
}

fn print_sessions(snap: &DeskSnapshot) {
    if snap.sessions.is_empty() {
        println!("No sessions yet.");
        return;
    }
    for s in &snap.sessions {
        let marker = if snap.current_session.as_deref() == Some(s.id.as_str()) {
            "*"
        } else {
            " "
        };
        let status = if s.is_active { "active" } else { "ended" };
        println!(
            "{} {} [{}] {} | {} ({})",
            marker,
            s.id,
            status,
            s.title,
            s.last_message,
            s.timestamp.format("%H:%M")
        );
    }
}
