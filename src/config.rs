//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SWITCHBOARD__*` 覆盖（双下划线表示嵌套，
//! 如 `SWITCHBOARD__IDLE__TIMEOUT_SECS=600`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::agent::{default_specialists, default_triage, AgentProfile, AgentRoster};
use crate::core::connecting::ConnectingConfig;
use crate::core::error::DeskError;
use crate::core::idle::IdleConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub idle: IdleSection,
    pub connecting: ConnectingSection,
    pub rate_limit: RateLimitSection,
    pub agents: AgentsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择与历史窗口
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai / deepseek / offline
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// 每次调用携带的历史条数
    pub history_window: usize,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "deepseek".to_string(),
            model: None,
            base_url: None,
            history_window: 6,
        }
    }
}

/// [idle] 段：空闲警告 / 超时阈值与轮询周期
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdleSection {
    pub warning_secs: u64,
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for IdleSection {
    fn default() -> Self {
        Self {
            warning_secs: 180,
            timeout_secs: 300,
            poll_interval_ms: 1000,
        }
    }
}

impl IdleSection {
    pub fn to_idle_config(&self) -> IdleConfig {
        IdleConfig {
            warning_after: Duration::from_secs(self.warning_secs),
            timeout_after: Duration::from_secs(self.timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

/// [connecting] 段：转接动画四个阶段的最短停留时间（毫秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConnectingSection {
    pub analyzing_ms: u64,
    pub found_ms: u64,
    pub connecting_ms: u64,
    pub connected_ms: u64,
}

impl Default for ConnectingSection {
    fn default() -> Self {
        Self {
            analyzing_ms: 1200,
            found_ms: 1200,
            connecting_ms: 1200,
            connected_ms: 600,
        }
    }
}

impl ConnectingSection {
    pub fn to_connecting_config(&self) -> ConnectingConfig {
        ConnectingConfig {
            analyzing: Duration::from_millis(self.analyzing_ms),
            found: Duration::from_millis(self.found_ms),
            connecting: Duration::from_millis(self.connecting_ms),
            connected: Duration::from_millis(self.connected_ms),
        }
    }
}

/// [rate_limit] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RateLimitSection {
    /// 是否为免费额度的 Key；未设置时读环境变量 API_KEY_TYPE（"free" 为真）
    pub free_tier: Option<bool>,
    /// 非免费模式下仍把 HTTP 429 识别为限流
    pub limit_paid_429: bool,
}

/// [agents] 段：可选地覆盖内置花名册
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AgentsSection {
    pub triage: Option<AgentProfile>,
    pub specialists: Vec<AgentProfile>,
}

impl AppConfig {
    /// 免费额度模式：配置优先，其次环境变量 API_KEY_TYPE，默认按付费处理
    pub fn free_tier(&self) -> bool {
        self.rate_limit.free_tier.unwrap_or_else(|| {
            std::env::var("API_KEY_TYPE")
                .map(|v| v.eq_ignore_ascii_case("free"))
                .unwrap_or(false)
        })
    }

    pub fn roster(&self) -> AgentRoster {
        let triage = self.agents.triage.clone().unwrap_or_else(default_triage);
        let specialists = if self.agents.specialists.is_empty() {
            default_specialists()
        } else {
            self.agents.specialists.clone()
        };
        AgentRoster::new(triage, specialists)
    }

    /// 校验阈值之间的约束
    pub fn validate(&self) -> Result<(), DeskError> {
        if self.idle.poll_interval_ms == 0 {
            return Err(DeskError::Config("idle.poll_interval_ms must be > 0".into()));
        }
        if self.idle.warning_secs >= self.idle.timeout_secs {
            return Err(DeskError::Config(format!(
                "idle.warning_secs ({}) must be less than idle.timeout_secs ({})",
                self.idle.warning_secs, self.idle.timeout_secs
            )));
        }
        if self.llm.history_window == 0 {
            return Err(DeskError::Config("llm.history_window must be > 0".into()));
        }
        let mut ids = std::collections::HashSet::new();
        for p in &self.agents.specialists {
            if !ids.insert(p.id.as_str()) {
                return Err(DeskError::Config(format!("duplicate specialist id '{}'", p.id)));
            }
        }
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 SWITCHBOARD__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path，则追加该文件（可覆盖前面的键）；显式指定的文件必须存在且可解析
/// 3. 最后叠加环境变量 SWITCHBOARD__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, DeskError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path {
        builder = builder.add_source(config::File::from(path).required(true));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SWITCHBOARD")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    Ok(c.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.idle.warning_secs, 180);
        assert_eq!(cfg.idle.timeout_secs, 300);
        assert_eq!(cfg.llm.history_window, 6);
        assert_eq!(cfg.connecting.connected_ms, 600);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.roster().specialists().len(), 3);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[llm]
provider = "offline"

[idle]
warning_secs = 30
timeout_secs = 60

[rate_limit]
free_tier = true

[[agents.specialists]]
id = "billing"
name = "Bea"
role = "Billing"
description = "invoices"
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.llm.provider, "offline");
        assert_eq!(cfg.idle.timeout_secs, 60);
        assert_eq!(cfg.idle.poll_interval_ms, 1000);
        assert!(cfg.free_tier());
        let roster = cfg.roster();
        assert!(roster.resolve("billing").is_some());
        assert!(roster.resolve("agent-1").is_none());
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let mut cfg = AppConfig::default();
        cfg.idle.warning_secs = 300;
        cfg.idle.timeout_secs = 300;
        assert!(matches!(cfg.validate(), Err(DeskError::Config(_))));
    }

    #[test]
    fn test_explicit_config_must_load() {
        let missing = std::env::temp_dir().join("switchboard-missing-config.toml");
        assert!(matches!(load_config(Some(missing)), Err(DeskError::ConfigError(_))));

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[idle]\nwarning_secs = \"soon\"").unwrap();
        assert!(matches!(
            load_config(Some(file.path().to_path_buf())),
            Err(DeskError::ConfigError(_))
        ));
    }
}
