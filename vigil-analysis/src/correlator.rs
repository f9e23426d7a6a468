use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use vigil_core::CorrelationSettings;

/// 关联判定结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationDecision {
    /// 窗口内的可疑次数仍低于阈值
    Suspicious { count: usize },
    /// 达到阈值，状态已清空
    Alarm { count: usize },
}

impl CorrelationDecision {
    pub fn is_alarm(&self) -> bool {
        matches!(self, CorrelationDecision::Alarm { .. })
    }
}

/// 异常关联器
///
/// 为每个客户端维护滑动窗口内的可疑判定时间戳。每次访问时先剔除过期条目，
/// 再追加当前时间并与阈值比较；达到阈值时清空该客户端并触发告警。
/// 整个检查、追加、比较、清空过程在同一把锁内完成，不跨越任何网络调用。
#[derive(Debug)]
pub struct AnomalyCorrelator {
    threshold: usize,
    window: Duration,
    suspicions: Mutex<HashMap<String, Vec<Instant>>>,
}

impl AnomalyCorrelator {
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self {
            threshold: threshold.max(1) as usize,
            window,
            suspicions: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_settings(settings: &CorrelationSettings) -> Self {
        Self::new(settings.alarm_threshold, settings.window())
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// 记录一次异常判定
    pub fn record(&self, client_id: &str) -> CorrelationDecision {
        self.record_at(client_id, Instant::now())
    }

    pub fn record_at(&self, client_id: &str, now: Instant) -> CorrelationDecision {
        let mut suspicions = self.suspicions.lock();
        let timestamps = suspicions.entry(client_id.to_string()).or_default();

        timestamps.retain(|t| now.saturating_duration_since(*t) < self.window);
        timestamps.push(now);
        let count = timestamps.len();

        if count >= self.threshold {
            timestamps.clear();
            debug!(
                "Client '{}' reached {} suspicious verdicts within {:?}",
                client_id, count, self.window
            );
            CorrelationDecision::Alarm { count }
        } else {
            debug!(
                "Client '{}' has {}/{} suspicious verdicts within {:?}",
                client_id, count, self.threshold, self.window
            );
            CorrelationDecision::Suspicious { count }
        }
    }

    /// 窗口内仍有效的可疑次数（会先剔除过期条目）
    pub fn pending(&self, client_id: &str) -> usize {
        self.pending_at(client_id, Instant::now())
    }

    pub fn pending_at(&self, client_id: &str, now: Instant) -> usize {
        let mut suspicions = self.suspicions.lock();
        match suspicions.get_mut(client_id) {
            Some(timestamps) => {
                timestamps.retain(|t| now.saturating_duration_since(*t) < self.window);
                timestamps.len()
            }
            None => 0,
        }
    }

    /// 曾出现过可疑判定的客户端数量
    pub fn tracked_clients(&self) -> usize {
        self.suspicions.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_threshold_escalation_and_reset() {
        let correlator = AnomalyCorrelator::new(3, Duration::from_secs(60));
        let t0 = Instant::now();

        assert_eq!(
            correlator.record_at("x", t0),
            CorrelationDecision::Suspicious { count: 1 }
        );
        assert_eq!(
            correlator.record_at("x", t0 + Duration::from_secs(1)),
            CorrelationDecision::Suspicious { count: 2 }
        );
        assert_eq!(
            correlator.record_at("x", t0 + Duration::from_secs(2)),
            CorrelationDecision::Alarm { count: 3 }
        );
        // 告警后重新计数
        assert_eq!(
            correlator.record_at("x", t0 + Duration::from_secs(3)),
            CorrelationDecision::Suspicious { count: 1 }
        );
    }

    #[test]
    fn test_window_boundary() {
        let correlator = AnomalyCorrelator::new(3, Duration::from_secs(60));
        let t0 = Instant::now();

        correlator.record_at("x", t0);
        correlator.record_at("x", t0 + Duration::from_secs(30));
        assert_eq!(correlator.pending_at("x", t0 + Duration::from_millis(59_999)), 2);

        // T + window 时 T 的判定不再计数
        assert_eq!(
            correlator.record_at("x", t0 + Duration::from_secs(60)),
            CorrelationDecision::Suspicious { count: 2 }
        );
        assert_eq!(correlator.pending_at("x", t0 + Duration::from_secs(200)), 0);
    }

    #[test]
    fn test_clients_are_independent() {
        let correlator = AnomalyCorrelator::new(2, Duration::from_secs(60));
        let t0 = Instant::now();

        correlator.record_at("a", t0);
        assert_eq!(
            correlator.record_at("b", t0),
            CorrelationDecision::Suspicious { count: 1 }
        );
        assert!(correlator.record_at("a", t0).is_alarm());
        assert_eq!(correlator.pending_at("b", t0), 1);
        assert_eq!(correlator.tracked_clients(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_uses_tokio_clock() {
        let correlator = AnomalyCorrelator::new(3, Duration::from_secs(60));
        correlator.record("x");
        correlator.record("x");
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(correlator.record("x"), CorrelationDecision::Suspicious { count: 1 });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_verdicts_raise_exact_alarm_count() {
        let correlator = Arc::new(AnomalyCorrelator::new(3, Duration::from_secs(600)));

        let tasks: Vec<_> = (0..300)
            .map(|_| {
                let correlator = correlator.clone();
                tokio::spawn(async move { correlator.record("x").is_alarm() })
            })
            .collect();

        let mut alarms = 0;
        for task in tasks {
            if task.await.unwrap() {
                alarms += 1;
            }
        }
        assert_eq!(alarms, 100);
        assert_eq!(correlator.pending("x"), 0);
    }
}
