//! 限流识别
//!
//! 仅在免费额度模式下生效：把后端错误识别为限流，判断限流类型并计算恢复时间。
//! 识别到的限流会阻止输入，直到 reset_time 到期或下一次调用成功。

use std::sync::OnceLock;

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use regex::Regex;
use serde::Serialize;

use crate::llm::BackendError;

const RATE_LIMIT_KEYWORDS: [&str; 4] = [
    "quota",
    "rate limit",
    "resource has been exhausted",
    "too many requests",
];

const MESSAGE_PREFIX: &str = "API rate limit exceeded. ";

/// 显式等待时间的上限（7 天）
const MAX_RETRY_AFTER_SECS: u64 = 7 * 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    PerMinuteRequests,
    PerMinuteTokens,
    PerDayRequests,
    Unknown,
}

impl LimitType {
    /// 按错误消息中的关键词判断类型
    fn from_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("minute") || lower.contains("rpm") {
            LimitType::PerMinuteRequests
        } else if lower.contains("tpm") || lower.contains("token") {
            LimitType::PerMinuteTokens
        } else if lower.contains("day") || lower.contains("daily") || lower.contains("rpd") {
            LimitType::PerDayRequests
        } else {
            LimitType::Unknown
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            LimitType::PerMinuteRequests => "Rate Limit (Per Minute)",
            LimitType::PerMinuteTokens => "Token Limit (Per Minute)",
            LimitType::PerDayRequests => "Daily Limit Reached",
            LimitType::Unknown => "Rate Limit Reached",
        }
    }

    fn message(self) -> String {
        let suffix = match self {
            LimitType::PerMinuteRequests => {
                "You've sent too many requests per minute. Please wait a moment."
            }
            LimitType::PerMinuteTokens => "Token usage limit reached. Please wait a moment.",
            LimitType::PerDayRequests => "Daily request limit reached. You can resume tomorrow.",
            LimitType::Unknown => "Please try again later.",
        };
        format!("{}{}", MESSAGE_PREFIX, suffix)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitState {
    pub is_limited: bool,
    pub limit_type: LimitType,
    pub reset_time: Option<DateTime<Utc>>,
    pub retry_after_secs: Option<u64>,
    pub message: String,
}

impl RateLimitState {
    /// 没有 reset_time 时永不自动到期，只能靠下一次成功调用清除
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.reset_time {
            Some(reset) => now >= reset,
            None => false,
        }
    }

    /// 有未到期的 reset_time 时阻止输入
    pub fn blocks_input(&self, now: DateTime<Utc>) -> bool {
        self.is_limited && self.reset_time.is_some() && !self.is_expired(now)
    }

    /// 倒计时文本：Xh Ym Zs / Ym Zs / Zs / Ready to resume
    pub fn countdown(&self, now: DateTime<Utc>) -> Option<String> {
        let reset = self.reset_time?;
        let left = (reset - now).num_seconds();
        if left <= 0 {
            return Some("Ready to resume".to_string());
        }
        let (h, m, s) = (left / 3600, (left % 3600) / 60, left % 60);
        Some(if h > 0 {
            format!("{}h {}m {}s", h, m, s)
        } else if m > 0 {
            format!("{}m {}s", m, s)
        } else {
            format!("{}s", s)
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimitClassifier {
    free_tier: bool,
    limit_paid_429: bool,
}

impl RateLimitClassifier {
    pub fn new(free_tier: bool, limit_paid_429: bool) -> Self {
        Self {
            free_tier,
            limit_paid_429,
        }
    }

    pub fn is_free_tier(&self) -> bool {
        self.free_tier
    }

    pub fn classify(&self, error: &BackendError) -> Option<RateLimitState> {
        self.classify_at(error, Utc::now())
    }

    pub fn classify_at(&self, error: &BackendError, now: DateTime<Utc>) -> Option<RateLimitState> {
        let recognized = if self.free_tier {
            is_rate_limit_error(error)
        } else {
            self.limit_paid_429 && error.status == Some(429)
        };
        if !recognized {
            return None;
        }

        let message = error.message.replace('_', " ");
        let limit_type = LimitType::from_message(&message);
        let mut retry_after: Option<u64> = match limit_type {
            LimitType::PerMinuteRequests | LimitType::PerMinuteTokens => Some(60),
            LimitType::PerDayRequests => Some(secs_until_next_utc_midnight(now)),
            LimitType::Unknown => None,
        };

        if let Some(explicit) = error.retry_after_secs.or_else(|| parse_retry_hint(error)) {
            retry_after = Some(explicit);
        }

        // 0 秒视为没有窗口；reset_time 与 retry_after_secs 同有同无
        let retry_after = retry_after
            .filter(|s| *s > 0)
            .map(|s| s.min(MAX_RETRY_AFTER_SECS));
        let reset_time = retry_after.and_then(|s| {
            ChronoDuration::try_seconds(s as i64).and_then(|d| now.checked_add_signed(d))
        });
        let retry_after = retry_after.filter(|_| reset_time.is_some());

        tracing::warn!(
            limit_type = ?limit_type,
            retry_after_secs = ?retry_after,
            "Backend rate limit detected"
        );

        Some(RateLimitState {
            is_limited: true,
            limit_type,
            reset_time,
            retry_after_secs: retry_after,
            message: limit_type.message(),
        })
    }
}

fn is_rate_limit_error(error: &BackendError) -> bool {
    if error.status == Some(429) {
        return true;
    }
    let mut text = error.message.to_lowercase();
    if let Some(details) = &error.details {
        text.push(' ');
        text.push_str(&details.to_lowercase());
    }
    let text = text.replace('_', " ");
    RATE_LIMIT_KEYWORDS.iter().any(|k| text.contains(k))
}

fn retry_hint_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)retry[-_ ]?after["']?\s*[:=]?\s*["']?(\d+(?:\.\d+)?)|retry\s+in\s+(\d+(?:\.\d+)?)\s*s|retry[-_ ]?delay["']?\s*[:=]\s*["']?(\d+(?:\.\d+)?)s"#)
            .expect("retry hint regex is valid")
    })
}

/// 从错误文本里找 "retry-after: N" / "retry in N s" / "retryDelay": "Ns"，向上取整到秒
pub fn parse_retry_hint(error: &BackendError) -> Option<u64> {
    let haystacks = std::iter::once(error.message.as_str()).chain(error.details.as_deref());
    for text in haystacks {
        if let Some(caps) = retry_hint_regex().captures(text) {
            let raw = caps
                .iter()
                .skip(1)
                .flatten()
                .next()
                .map(|m| m.as_str())?;
            if let Ok(secs) = raw.parse::<f64>() {
                return Some(secs.ceil() as u64);
            }
        }
    }
    None
}

pub fn secs_until_next_utc_midnight(now: DateTime<Utc>) -> u64 {
    let tomorrow = now.date_naive() + ChronoDuration::days(1);
    let midnight = tomorrow.and_time(NaiveTime::MIN).and_utc();
    (midnight - now).num_seconds().max(0) as u64
}
