// ws_session_utils/src/admission.rs

//! 进程级连接准入控制。
//!
//! `AdmissionCounter` 维护"当前已接纳连接数"对"配置上限"的共享计数，
//! 是整个连接层中唯一跨线程可变的共享状态。接纳走 CAS：只有当
//! 预增量值严格小于上限时计数才 +1 并放行；否则计数不变、连接被拒。
//! 归还通过 [`AdmissionPermit`] 的析构完成，保证任意拆除路径
//! （正常关闭、错误、强制关闭）都恰好配对一次 `release`。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, warn};

/// 共享的准入计数器。
///
/// 不变式：任意时刻 `0 <= current <= max_connections`。
/// 上限为 0 表示禁用准入控制（永远放行），与配置层"零值禁用该指标"的约定一致。
#[derive(Debug)]
pub struct AdmissionCounter {
    /// 配置的最大同时连接数。
    max_connections: usize,
    /// 当前已接纳且尚未归还的连接数。
    current: AtomicUsize,
}

impl AdmissionCounter {
    /// 创建一个新的准入计数器。
    pub fn new(max_connections: usize) -> Arc<Self> {
        Arc::new(Self {
            max_connections,
            current: AtomicUsize::new(0),
        })
    }

    /// 尝试接纳一条新连接。
    ///
    /// 可以从多个接受端上下文并发调用。当且仅当预增量值严格小于上限时，
    /// 计数原子地 +1 并返回一个 [`AdmissionPermit`]；否则返回 `None` 且计数不变。
    /// 被拒绝不是错误：调用方应当直接丢弃对应的套接字，让对端观察到
    /// "从未建立连接"。
    pub fn try_admit(self: &Arc<Self>) -> Option<AdmissionPermit> {
        if self.max_connections == 0 {
            // 上限为零表示禁用准入控制
            self.current.fetch_add(1, Ordering::AcqRel);
            return Some(AdmissionPermit { counter: Arc::clone(self) });
        }

        let admitted = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.max_connections).then_some(current + 1)
            });

        match admitted {
            Ok(previous) => {
                debug!(
                    "[准入控制] 接纳新连接: {} -> {} (上限 {})",
                    previous,
                    previous + 1,
                    self.max_connections
                );
                Some(AdmissionPermit { counter: Arc::clone(self) })
            }
            Err(current) => {
                warn!(
                    "[准入控制] 连接数已达上限，拒绝新连接: 当前 {} / 上限 {}",
                    current, self.max_connections
                );
                None
            }
        }
    }

    /// 当前已接纳的连接数快照。
    pub fn current(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    /// 配置的连接数上限。
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// 归还一个名额。仅由 [`AdmissionPermit`] 的析构调用。
    fn release(&self) {
        let previous = self.current.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "准入计数在归还时不应为零");
        debug!(
            "[准入控制] 连接拆除，归还名额: {} -> {}",
            previous,
            previous.saturating_sub(1)
        );
    }
}

/// 一次成功准入的作用域化许可。
///
/// 许可与连接同生命周期：连接任务持有它直到套接字关闭，析构时
/// 自动归还计数。不存在手动 `release`，因此不可能重复归还或泄漏。
#[derive(Debug)]
pub struct AdmissionPermit {
    counter: Arc<AdmissionCounter>,
}

impl AdmissionPermit {
    /// 此许可所属计数器的当前计数（诊断用）。
    pub fn counter_snapshot(&self) -> usize {
        self.counter.current()
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.counter.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admit_up_to_limit_then_reject() {
        let counter = AdmissionCounter::new(3);
        let mut permits = Vec::new();
        for i in 0..3 {
            let permit = counter.try_admit();
            assert!(permit.is_some(), "第 {} 条连接应被接纳", i);
            permits.push(permit.unwrap());
        }
        assert_eq!(counter.current(), 3, "接纳满额后计数应等于上限");
        assert!(counter.try_admit().is_none(), "超出上限的连接应被拒绝");
        assert_eq!(counter.current(), 3, "被拒绝的尝试不应改变计数");
    }

    #[test]
    fn test_permit_drop_releases_exactly_once() {
        let counter = AdmissionCounter::new(1);
        {
            let _permit = counter.try_admit().expect("首条连接应被接纳");
            assert_eq!(counter.current(), 1);
            assert!(counter.try_admit().is_none(), "名额占用期间应拒绝第二条连接");
        }
        assert_eq!(counter.current(), 0, "许可析构后名额应被归还");
        let again = counter.try_admit();
        assert!(again.is_some(), "归还后应能再次接纳");
    }

    #[test]
    fn test_zero_limit_disables_admission_control() {
        let counter = AdmissionCounter::new(0);
        let permits: Vec<_> = (0..32).map(|_| counter.try_admit().expect("零上限应永远放行")).collect();
        assert_eq!(counter.current(), 32);
        drop(permits);
        assert_eq!(counter.current(), 0);
    }

    #[test]
    fn test_concurrent_admission_never_exceeds_limit() {
        // 多线程同时抢占名额：任意时刻计数不得超过上限，
        // 且成功的总次数恰好等于上限。
        const LIMIT: usize = 5;
        const THREADS: usize = 16;

        let counter = AdmissionCounter::new(LIMIT);
        let barrier = Arc::new(std::sync::Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let counter = Arc::clone(&counter);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    let permit = counter.try_admit();
                    assert!(
                        counter.current() <= LIMIT,
                        "计数在任何观察时刻都不得超过上限"
                    );
                    permit
                })
            })
            .collect();

        let permits: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().expect("准入线程不应 panic"))
            .collect();

        assert_eq!(permits.len(), LIMIT, "并发抢占下成功准入数应恰好等于上限");
        assert_eq!(counter.current(), LIMIT);
        drop(permits);
        assert_eq!(counter.current(), 0, "全部许可析构后计数应归零");
    }
}
