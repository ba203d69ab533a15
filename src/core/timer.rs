//! 计时器登记表：每个用户最多一个未触发的一次性延迟任务
//!
//! 登记表由 `RitualEngine` 独占：进入 SessionActive（或反馈完成）时插入，
//! 触发或取消时移除。取消只是尽力而为，触发方在持有用户锁后还需 `claim` 并复查暂停标志。

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// 计时器用途
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// 会话时长到期
    Session,
    /// 反馈完成后的再提示
    Reprompt,
}

/// 计时器 ID（进程内单调递增）
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TimerId(u64);

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(0);

impl TimerId {
    fn next() -> Self {
        Self(NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// 交给触发回调的句柄
#[derive(Clone, Debug)]
pub struct TimerHandle {
    pub user_id: String,
    pub id: TimerId,
    pub kind: TimerKind,
    token: CancellationToken,
}

impl TimerHandle {
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

struct PendingTimer {
    id: TimerId,
    kind: TimerKind,
    token: CancellationToken,
}

/// user_id -> 未触发的计时器
#[derive(Default)]
pub struct TimerRegistry {
    pending: Mutex<HashMap<String, PendingTimer>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingTimer>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 安排一次性延迟任务；同一用户已有的计时器会被取消并替换
    pub fn schedule<F, Fut>(
        &self,
        user_id: &str,
        kind: TimerKind,
        delay: Duration,
        on_fire: F,
    ) -> TimerHandle
    where
        F: FnOnce(TimerHandle) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = TimerHandle {
            user_id: user_id.to_string(),
            id: TimerId::next(),
            kind,
            token: CancellationToken::new(),
        };

        let previous = self.pending().insert(
            user_id.to_string(),
            PendingTimer {
                id: handle.id,
                kind,
                token: handle.token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
            tracing::debug!("Replaced pending {:?} timer for user {}", previous.kind, user_id);
        }

        let fired = handle.clone();
        let token = handle.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => on_fire(fired).await,
            }
        });

        handle
    }

    /// 取消用户的计时器；返回是否确有计时器被取消
    pub fn cancel(&self, user_id: &str) -> bool {
        match self.pending().remove(user_id) {
            Some(timer) => {
                timer.token.cancel();
                true
            }
            None => false,
        }
    }

    /// 关闭时取消全部计时器
    pub fn cancel_all(&self) -> usize {
        let mut pending = self.pending();
        let count = pending.len();
        for (_, timer) in pending.drain() {
            timer.token.cancel();
        }
        count
    }

    /// 触发方在持有用户锁后调用：句柄仍是当前登记项且未被取消时移除并返回 true
    pub fn claim(&self, handle: &TimerHandle) -> bool {
        if handle.is_cancelled() {
            return false;
        }
        let mut pending = self.pending();
        match pending.get(&handle.user_id) {
            Some(timer) if timer.id == handle.id => {
                pending.remove(&handle.user_id);
                true
            }
            _ => false,
        }
    }

    pub fn pending_kind(&self, user_id: &str) -> Option<TimerKind> {
        self.pending().get(user_id).map(|t| t.kind)
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_timer_fires_and_can_be_claimed() {
        let registry = Arc::new(TimerRegistry::new());
        let claimed = Arc::new(AtomicUsize::new(0));

        let r = registry.clone();
        let c = claimed.clone();
        registry.schedule("u1", TimerKind::Session, Duration::from_millis(20), move |h| async move {
            if r.claim(&h) {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(registry.pending_kind("u1"), Some(TimerKind::Session));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(claimed.load(Ordering::SeqCst), 1);
        assert_eq!(registry.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_timer_never_fires() {
        let registry = TimerRegistry::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let f = fired.clone();
        registry.schedule("u1", TimerKind::Session, Duration::from_millis(30), move |_| async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert!(registry.cancel("u1"));
        assert!(!registry.cancel("u1"));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reschedule_replaces_previous() {
        let registry = Arc::new(TimerRegistry::new());
        let claimed = Arc::new(AtomicUsize::new(0));

        for kind in [TimerKind::Session, TimerKind::Reprompt] {
            let r = registry.clone();
            let c = claimed.clone();
            registry.schedule("u1", kind, Duration::from_millis(20), move |h| async move {
                if r.claim(&h) {
                    c.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        assert_eq!(registry.pending_count(), 1);
        assert_eq!(registry.pending_kind("u1"), Some(TimerKind::Reprompt));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(claimed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_handle_cannot_claim() {
        let registry = TimerRegistry::new();
        let stale = registry.schedule("u1", TimerKind::Session, Duration::from_secs(60), |_| async {});
        registry.cancel("u1");
        let fresh = registry.schedule("u1", TimerKind::Session, Duration::from_secs(60), |_| async {});
        assert!(!registry.claim(&stale));
        assert!(registry.claim(&fresh));
        assert_eq!(registry.cancel_all(), 0);
    }
}
