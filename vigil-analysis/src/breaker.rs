use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};
use vigil_core::BreakerSettings;

/// 对外可见的熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerPhase {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BreakerPhase::Closed => "closed",
            BreakerPhase::Open => "open",
            BreakerPhase::HalfOpen => "half-open",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed { consecutive_failures: u32 },
    Open { since: Instant },
    HalfOpen { probes_in_flight: u32 },
}

impl BreakerState {
    fn phase(&self) -> BreakerPhase {
        match self {
            BreakerState::Closed { .. } => BreakerPhase::Closed,
            BreakerState::Open { .. } => BreakerPhase::Open,
            BreakerState::HalfOpen { .. } => BreakerPhase::HalfOpen,
        }
    }
}

/// 交给跳闸判定函数的计数，每次状态切换后清零
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TripCounts {
    pub requests: u32,
    pub total_failures: u32,
    pub consecutive_failures: u32,
}

pub type TripPredicate = Arc<dyn Fn(&TripCounts) -> bool + Send + Sync>;
pub type StateChangeHook = Arc<dyn Fn(&str, BreakerPhase, BreakerPhase) + Send + Sync>;

/// 熔断器配置
#[derive(Clone)]
pub struct BreakerConfig {
    pub name: String,
    pub cooldown: Duration,
    pub half_open_max_probes: u32,
    pub ready_to_trip: TripPredicate,
    pub on_state_change: StateChangeHook,
}

impl BreakerConfig {
    /// 连续失败次数超过阈值时跳闸
    pub fn consecutive_failures(name: impl Into<String>, failure_threshold: u32) -> Self {
        Self {
            name: name.into(),
            cooldown: Duration::from_secs(30),
            half_open_max_probes: 3,
            ready_to_trip: Arc::new(move |counts: &TripCounts| {
                counts.consecutive_failures > failure_threshold
            }),
            on_state_change: Arc::new(log_state_change),
        }
    }

    pub fn from_settings(name: impl Into<String>, settings: &BreakerSettings) -> Self {
        Self {
            cooldown: settings.cooldown(),
            half_open_max_probes: settings.half_open_max_probes,
            ..Self::consecutive_failures(name, settings.failure_threshold)
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_ready_to_trip<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&TripCounts) -> bool + Send + Sync + 'static,
    {
        self.ready_to_trip = Arc::new(predicate);
        self
    }

    pub fn with_state_change_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, BreakerPhase, BreakerPhase) + Send + Sync + 'static,
    {
        self.on_state_change = Arc::new(hook);
        self
    }
}

fn log_state_change(name: &str, from: BreakerPhase, to: BreakerPhase) {
    match to {
        BreakerPhase::Open => warn!("Circuit breaker '{}' changed from {} to {}", name, from, to),
        _ => info!("Circuit breaker '{}' changed from {} to {}", name, from, to),
    }
}

/// 经过熔断器的调用失败
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// 熔断器打开，或半开状态下探测名额已满；没有发起调用
    #[error("circuit breaker is open")]
    Open,

    #[error("{0}")]
    Inner(E),
}

/// 熔断器快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub phase: BreakerPhase,
    pub consecutive_failures: u32,
    pub generation: u64,
}

struct Inner {
    state: BreakerState,
    counts: TripCounts,
    /// 每次状态切换递增，旧状态下发起的调用结果会被忽略
    generation: u64,
}

type Transition = (BreakerPhase, BreakerPhase);

/// 三态熔断器
///
/// Closed 时放行全部调用；跳闸判定成立后进入 Open，冷却期内直接拒绝；
/// 冷却结束后进入 HalfOpen，最多放行 `half_open_max_probes` 个并发探测，
/// 任一探测成功即关闭，任一探测失败重新打开。所有调用方共享同一个实例。
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed {
                    consecutive_failures: 0,
                },
                counts: TripCounts::default(),
                generation: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn phase(&self) -> BreakerPhase {
        self.snapshot().phase
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let (snapshot, transition) = {
            let mut inner = self.inner.lock();
            let transition = self.refresh(&mut inner, Instant::now());
            let state = inner.state;
            let consecutive_failures = match state {
                BreakerState::Closed {
                    consecutive_failures,
                } => consecutive_failures,
                _ => inner.counts.consecutive_failures,
            };
            (
                BreakerSnapshot {
                    phase: inner.state.phase(),
                    consecutive_failures,
                    generation: inner.generation,
                },
                transition,
            )
        };
        self.notify(transition);
        snapshot
    }

    /// 在熔断器保护下执行调用
    ///
    /// 调用 future 被中途丢弃时，只释放占用的探测名额，不计入成功或失败。
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(generation) = self.before_call() else {
            return Err(BreakerError::Open);
        };
        let mut guard = CallGuard {
            breaker: self,
            generation,
            finished: false,
        };

        let result = f().await;
        guard.finished = true;
        self.after_call(generation, result.is_ok());
        result.map_err(BreakerError::Inner)
    }

    /// 放行时返回当前代数，拒绝时返回 None
    fn before_call(&self) -> Option<u64> {
        let (outcome, transition) = {
            let mut inner = self.inner.lock();
            let transition = self.refresh(&mut inner, Instant::now());
            let state = inner.state;
            let outcome = match state {
                BreakerState::Closed { .. } => {
                    inner.counts.requests += 1;
                    Some(inner.generation)
                }
                BreakerState::Open { .. } => None,
                BreakerState::HalfOpen { probes_in_flight }
                    if probes_in_flight >= self.config.half_open_max_probes =>
                {
                    None
                }
                BreakerState::HalfOpen { probes_in_flight } => {
                    inner.state = BreakerState::HalfOpen {
                        probes_in_flight: probes_in_flight + 1,
                    };
                    inner.counts.requests += 1;
                    Some(inner.generation)
                }
            };
            (outcome, transition)
        };
        self.notify(transition);
        outcome
    }

    fn after_call(&self, generation: u64, success: bool) {
        let transition = {
            let mut inner = self.inner.lock();
            let now = Instant::now();
            let refreshed = self.refresh(&mut inner, now);
            if generation != inner.generation {
                refreshed
            } else {
                let state = inner.state;
                match state {
                    BreakerState::Closed { .. } if success => {
                        inner.counts.consecutive_failures = 0;
                        inner.state = BreakerState::Closed {
                            consecutive_failures: 0,
                        };
                        None
                    }
                    BreakerState::Closed {
                        consecutive_failures,
                    } => {
                        let consecutive_failures = consecutive_failures + 1;
                        inner.counts.total_failures += 1;
                        inner.counts.consecutive_failures = consecutive_failures;
                        inner.state = BreakerState::Closed {
                            consecutive_failures,
                        };
                        if (self.config.ready_to_trip)(&inner.counts) {
                            self.transition(&mut inner, BreakerState::Open { since: now })
                        } else {
                            None
                        }
                    }
                    BreakerState::HalfOpen { .. } if success => self.transition(
                        &mut inner,
                        BreakerState::Closed {
                            consecutive_failures: 0,
                        },
                    ),
                    BreakerState::HalfOpen { .. } => {
                        self.transition(&mut inner, BreakerState::Open { since: now })
                    }
                    BreakerState::Open { .. } => None,
                }
            }
        };
        self.notify(transition);
    }

    fn abandon(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if generation != inner.generation {
            return;
        }
        let state = inner.state;
        if let BreakerState::HalfOpen { probes_in_flight } = state {
            inner.state = BreakerState::HalfOpen {
                probes_in_flight: probes_in_flight.saturating_sub(1),
            };
        }
    }

    /// 冷却期结束时把 Open 切换为 HalfOpen
    fn refresh(&self, inner: &mut Inner, now: Instant) -> Option<Transition> {
        match inner.state {
            BreakerState::Open { since }
                if now.saturating_duration_since(since) >= self.config.cooldown =>
            {
                self.transition(
                    inner,
                    BreakerState::HalfOpen {
                        probes_in_flight: 0,
                    },
                )
            }
            _ => None,
        }
    }

    fn transition(&self, inner: &mut Inner, next: BreakerState) -> Option<Transition> {
        let from = inner.state.phase();
        inner.state = next;
        inner.generation += 1;
        inner.counts = TripCounts::default();
        Some((from, next.phase()))
    }

    fn notify(&self, transition: Option<Transition>) {
        if let Some((from, to)) = transition {
            (self.config.on_state_change)(&self.config.name, from, to);
        }
    }
}

struct CallGuard<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    finished: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.breaker.abandon(self.generation);
        }
    }
}
