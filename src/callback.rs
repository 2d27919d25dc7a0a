//! 콜백 슬롯과 연결 상태
//!
//! - 등록은 원자적 교체 (last-write-wins), 호출과의 순서 보장 없음
//! - 사용자 콜백의 panic은 호출 지점에서 복구
//! - nil(미등록) 콜백은 조용히 무시

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::warn;

use crate::error::Error;

/// 연결 상태 (FuncInfo 콜백으로 보고)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// 서버로 다이얼 시도 중
    Dial,
    /// 새 연결 수립됨
    New,
    /// 연결에서 읽는 중
    Read,
    /// 읽기 측 닫힘
    CloseRead,
    /// 핸들러 실행 중
    Handler,
    /// 연결에 쓰는 중
    Write,
    /// 쓰기 측 닫힘
    CloseWrite,
    /// 연결 전체 닫힘
    Close,
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnState::Dial => "Dial Connection",
            ConnState::New => "New Connection",
            ConnState::Read => "Read Incoming Stream",
            ConnState::CloseRead => "Close Incoming Stream",
            ConnState::Handler => "Run Handler",
            ConnState::Write => "Write Outgoing Stream",
            ConnState::CloseWrite => "Close Outgoing Stream",
            ConnState::Close => "Close Connection",
        };
        f.write_str(s)
    }
}

/// 에러 콜백
pub type FuncError = Box<dyn Fn(&Error) + Send + Sync>;

/// 연결 상태 콜백 (로컬 주소, 원격 주소, 상태)
pub type FuncInfo = Box<dyn Fn(&str, &str, ConnState) + Send + Sync>;

/// 서버 정보 메시지 콜백
pub type FuncInfoSrv = Box<dyn Fn(&str) + Send + Sync>;

/// 원자적 콜백 슬롯
///
/// 동시 등록/호출에 안전하다. 리더는 항상 이전 값 또는 새 값 전체를
/// 관찰하며, 찢어진 포인터는 관찰하지 않는다.
pub struct Slot<T> {
    inner: ArcSwapOption<T>,
}

impl<T> Slot<T> {
    pub fn empty() -> Self {
        Self {
            inner: ArcSwapOption::empty(),
        }
    }

    /// 콜백 등록 (기존 등록은 교체됨)
    pub fn store(&self, f: T) {
        self.inner.store(Some(Arc::new(f)));
    }

    /// 공유 콜백 등록 (다른 슬롯에서 복사할 때)
    pub fn store_shared(&self, f: Option<Arc<T>>) {
        self.inner.store(f);
    }

    /// 등록 해제
    pub fn clear(&self) {
        self.inner.store(None);
    }

    /// 현재 등록된 콜백 로드
    pub fn load(&self) -> Option<Arc<T>> {
        self.inner.load_full()
    }

    pub fn is_set(&self) -> bool {
        self.inner.load().is_some()
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::empty()
    }
}

/// 사용자 콜백 호출을 panic으로부터 보호
///
/// 복구된 panic은 호출자를 죽이지 않고 경고 로그로 남긴다.
/// 정상 종료 시 true, panic 복구 시 false.
pub fn guarded<F: FnOnce()>(site: &str, f: F) -> bool {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!("사용자 콜백 panic 복구: {}", site);
        return false;
    }
    true
}

/// panic 보호 + 복구 시 에러 슬롯으로 보고
///
/// 에러 슬롯 자신의 panic은 로그만 남긴다 (재귀 방지).
pub fn guarded_with<F: FnOnce()>(fe: &Slot<FuncError>, site: &'static str, f: F) {
    if !guarded(site, f) {
        if let Some(g) = fe.load() {
            guarded("fct_error", || (*g)(&Error::CallbackPanic(site)));
        }
    }
}
