//! 대역폭 제한기
//!
//! - 진행 콜백 체인에 끼어들어 전송 속도를 측정하고 초과분만큼 지연
//! - 100ms 미만의 짧은 구간은 측정에서 제외 (노이즈 억제)
//! - 지연은 회당 최대 1초, limit 0은 무제한

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use tracing::trace;

use crate::progress::{FctIncrement, FctReset, ProgressFile};

/// 속도 측정을 건너뛰는 최소 구간
const MIN_WINDOW: Duration = Duration::from_millis(100);

/// 측정 기점만 갱신하는 초단기 구간
const RESET_WINDOW: Duration = Duration::from_millis(1);

/// 회당 최대 지연
const MAX_SLEEP: Duration = Duration::from_secs(1);

/// 초당 바이트 기준 대역폭 제한기
///
/// `ProgressFile`의 increment/reset 콜백 슬롯에 등록해서 쓴다.
/// 여러 파일이 같은 제한기를 공유하면 합산 속도가 제한된다.
pub struct BandwidthLimiter {
    limit: u64,
    last: ArcSwapOption<Instant>,
}

impl BandwidthLimiter {
    /// 초당 `limit` 바이트로 제한하는 제한기 생성 (0은 무제한)
    pub fn new(limit: u64) -> Arc<Self> {
        Arc::new(Self {
            limit,
            last: ArcSwapOption::empty(),
        })
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// `size` 바이트 진행을 반영하고 필요하면 지연
    ///
    /// 직전 기점에서 1ms 미만이면 기점만 갱신하고, 100ms 미만이면
    /// 기점을 유지한 채 다음 호출로 측정을 미룬다.
    pub fn increment(&self, size: i64) {
        if self.limit == 0 {
            return;
        }

        let now = Instant::now();

        let prev = match self.last.load_full() {
            Some(p) => *p,
            None => {
                self.last.store(Some(Arc::new(now)));
                return;
            }
        };

        let elapsed = now.duration_since(prev);

        if elapsed < RESET_WINDOW {
            self.last.store(Some(Arc::new(now)));
            return;
        }

        if elapsed < MIN_WINDOW {
            return;
        }

        let rate = size as f64 / elapsed.as_secs_f64();
        let limit = self.limit as f64;

        if rate > limit {
            let pause = Duration::from_secs_f64((rate / limit).min(MAX_SLEEP.as_secs_f64()));
            trace!(
                "대역폭 초과: {:.0} B/s > {} B/s, {:?} 지연",
                rate,
                self.limit,
                pause
            );
            thread::sleep(pause);
        }

        // 기점은 측정 시각 기준 (지연 시간은 다음 구간에 포함)
        self.last.store(Some(Arc::new(now)));
    }

    /// 측정 기점 초기화 (파일 크기 변경, seek 등)
    pub fn reset(&self, _max: i64, _current: i64) {
        self.last.store(None);
    }

    /// `fpg`의 increment 슬롯에 제한기를 연결
    ///
    /// `chain`이 있으면 지연 후에 이어서 호출한다.
    pub fn register_increment(self: &Arc<Self>, fpg: &ProgressFile, chain: Option<FctIncrement>) {
        let me = self.clone();
        let f: FctIncrement = Box::new(move |size| {
            me.increment(size);
            if let Some(next) = &chain {
                next(size);
            }
        });
        fpg.register_fct_increment(f);
    }

    /// `fpg`의 reset 슬롯에 제한기를 연결
    pub fn register_reset(self: &Arc<Self>, fpg: &ProgressFile, chain: Option<FctReset>) {
        let me = self.clone();
        let f: FctReset = Box::new(move |max, current| {
            me.reset(max, current);
            if let Some(next) = &chain {
                next(max, current);
            }
        });
        fpg.register_fct_reset(f);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_never_sleeps() {
        let bw = BandwidthLimiter::new(0);
        let start = Instant::now();
        for _ in 0..100 {
            bw.increment(1 << 20);
        }
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_first_call_only_records() {
        let bw = BandwidthLimiter::new(1);
        let start = Instant::now();
        bw.increment(i64::MAX);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_short_window_skips_measurement() {
        let bw = BandwidthLimiter::new(1);
        bw.increment(1);
        // 100ms 미만 구간은 측정하지 않으므로 큰 값도 지연 없음
        thread::sleep(Duration::from_millis(10));
        let start = Instant::now();
        bw.increment(1 << 30);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_over_limit_sleeps_capped() {
        let bw = BandwidthLimiter::new(1);
        bw.increment(1);
        thread::sleep(Duration::from_millis(120));

        // 1 B/s 제한에 수 MB 진행: 지연은 1초에서 상한
        let start = Instant::now();
        bw.increment(8 << 20);
        let took = start.elapsed();
        assert!(took >= Duration::from_millis(900), "지연이 없음: {:?}", took);
        assert!(took < Duration::from_millis(1500), "상한 초과: {:?}", took);
    }

    #[test]
    fn test_baseline_is_measurement_entry_time() {
        let bw = BandwidthLimiter::new(1);
        bw.increment(1);
        thread::sleep(Duration::from_millis(120));

        // 약 1초 지연되는 호출
        bw.increment(8 << 20);

        // 저장된 기점은 지연 전의 측정 시각이어야 한다
        let last = bw.last.load_full().unwrap();
        assert!(
            last.elapsed() >= Duration::from_millis(900),
            "기점이 지연 이후 시각으로 저장됨: {:?}",
            last.elapsed()
        );
    }

    #[test]
    fn test_reset_clears_baseline() {
        let bw = BandwidthLimiter::new(1);
        bw.increment(1);
        thread::sleep(Duration::from_millis(120));
        bw.reset(0, 0);

        // 기점이 지워졌으므로 첫 호출처럼 기록만 한다
        let start = Instant::now();
        bw.increment(8 << 20);
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
