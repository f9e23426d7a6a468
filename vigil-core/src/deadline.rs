use reqwest::header::HeaderMap;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// 携带剩余时间预算的请求头（毫秒），作用类似 grpc-timeout
pub const TIMEOUT_HEADER: &str = "x-vigil-timeout-ms";

/// 截止时间已过
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("deadline exceeded")]
pub struct DeadlineExceeded;

/// 请求截止时间
///
/// 在每一跳之间传递：入口从请求头解析调用方的预算，每一跳再用自己的
/// 超时收紧，所有挂起点都用 [`Deadline::run`] 包裹。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// 没有截止时间
    pub fn none() -> Self {
        Self { at: None }
    }

    /// 从现在起经过 `budget` 后到期
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Some(Instant::now() + budget),
        }
    }

    pub fn at(instant: Instant) -> Self {
        Self { at: Some(instant) }
    }

    /// 从请求头解析调用方的截止时间，缺失或非法时视为没有截止时间
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(TIMEOUT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(|ms| Self::after(Duration::from_millis(ms)))
            .unwrap_or_default()
    }

    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    /// 剩余时间，已到期时返回零
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// 用单跳超时收紧截止时间，取两者中更早的一个
    pub fn tighten(&self, budget: Duration) -> Self {
        let hop = Instant::now() + budget;
        match self.at {
            Some(at) if at <= hop => *self,
            _ => Self { at: Some(hop) },
        }
    }

    /// 传给下游的剩余预算
    pub fn header_value(&self) -> Option<String> {
        self.remaining().map(|d| d.as_millis().to_string())
    }

    /// 在截止时间内执行 future，超时后丢弃它（即取消下游调用）
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, DeadlineExceeded>
    where
        F: Future,
    {
        match self.at {
            Some(at) => tokio::time::timeout_at(at, fut)
                .await
                .map_err(|_| DeadlineExceeded),
            None => Ok(fut.await),
        }
    }

    /// 在截止时间内睡眠；截止时间先到则返回错误
    pub async fn sleep(&self, duration: Duration) -> Result<(), DeadlineExceeded> {
        if let Some(remaining) = self.remaining() {
            if remaining < duration {
                tokio::time::sleep(remaining).await;
                return Err(DeadlineExceeded);
            }
        }
        tokio::time::sleep(duration).await;
        Ok(())
    }
}
