//! 서버 공유 상태 (플래그/카운터/콜백 슬롯)

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::time::sleep;

use crate::callback::{guarded, guarded_with, ConnState, FuncError, FuncInfo, FuncInfoSrv, Slot};
use crate::error::{Error, Result};
use crate::server::Handler;

/// 프로토콜 변형들이 공유하는 서버 상태
///
/// 모든 플래그는 원자적으로 읽고 쓰며, 루프는 10ms 틱으로
/// 플래그 변화를 관찰한다.
pub(crate) struct SrvState {
    /// 수락 루프 동작 중
    run: AtomicBool,

    /// 드레인 또는 종료 상태 (최초 listen 전에도 true)
    gon: AtomicBool,

    /// 하드 종료 요청 (진행 중 핸들러도 중단)
    stp: AtomicBool,

    /// 드레인 요청 (수락만 중단)
    drn: AtomicBool,

    /// 터미널 상태 (재시작 불가)
    closed: AtomicBool,

    /// 열린 연결 카운터
    nc: AtomicI64,

    /// 핸들러 슬롯
    pub hdl: Slot<Handler>,

    /// 에러 콜백 슬롯
    pub fe: Slot<FuncError>,

    /// 연결 상태 콜백 슬롯
    pub fi: Slot<FuncInfo>,

    /// 서버 정보 콜백 슬롯
    pub fs: Slot<FuncInfoSrv>,

    /// 바인딩된 로컬 주소 (표시용)
    lad: ArcSwapOption<String>,
}

impl SrvState {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            run: AtomicBool::new(false),
            gon: AtomicBool::new(true),
            stp: AtomicBool::new(false),
            drn: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            nc: AtomicI64::new(0),
            hdl: Slot::empty(),
            fe: Slot::empty(),
            fi: Slot::empty(),
            fs: Slot::empty(),
            lad: ArcSwapOption::empty(),
        })
    }

    pub(crate) fn is_running(&self) -> bool {
        self.run.load(Ordering::SeqCst)
    }

    pub(crate) fn is_gone(&self) -> bool {
        self.gon.load(Ordering::SeqCst)
    }

    pub(crate) fn open_connections(&self) -> i64 {
        self.nc.load(Ordering::SeqCst)
    }

    pub(crate) fn local_addr(&self) -> Option<String> {
        self.lad.load_full().map(|a| (*a).clone())
    }

    pub(crate) fn set_local_addr(&self, addr: &str) {
        self.lad.store(Some(Arc::new(addr.to_string())));
    }

    /// listen 시작 가능 여부 확인 (바인딩 전, 상태 변경 없음)
    pub(crate) fn check_startable(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) || self.stp.load(Ordering::SeqCst) {
            return Err(Error::InvalidInstance);
        }
        if self.is_running() {
            // 소켓 디스크립터는 한 listen 사이클만 소유 가능
            return Err(Error::InvalidInstance);
        }
        Ok(())
    }

    /// 바인딩 성공 후 Listening 상태로 전이
    pub(crate) fn set_running(&self) {
        self.gon.store(false, Ordering::SeqCst);
        self.run.store(true, Ordering::SeqCst);
    }

    /// 수락 루프 종료 후 터미널 상태로 전이
    pub(crate) fn end_listen(&self) {
        self.run.store(false, Ordering::SeqCst);
        self.gon.store(true, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }

    /// 수락 중단 요청 여부 (드레인 또는 하드 종료)
    pub(crate) fn stop_requested(&self) -> bool {
        self.stp.load(Ordering::SeqCst) || self.drn.load(Ordering::SeqCst)
    }

    /// 하드 종료 플래그가 설 때까지 대기 (연결 태스크용)
    pub(crate) async fn hard_stop(&self) {
        while !self.stp.load(Ordering::SeqCst) {
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// 우아한 종료: 드레인 진입 후 비워질 때까지 대기
    pub(crate) async fn shutdown(&self, timeout: Duration) -> Result<()> {
        if !self.is_running() && self.is_gone() {
            return Ok(());
        }

        self.gon.store(true, Ordering::SeqCst);
        self.drn.store(true, Ordering::SeqCst);

        let drained = async {
            while self.is_running() || self.open_connections() > 0 {
                sleep(Duration::from_millis(3)).await;
            }
        };

        match tokio::time::timeout(timeout, drained).await {
            Ok(()) => Ok(()),
            Err(_) => Err(Error::ShutdownTimeout),
        }
    }

    /// 하드 종료 (멱등)
    pub(crate) fn close(&self) -> Result<()> {
        self.gon.store(true, Ordering::SeqCst);
        self.stp.store(true, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// 에러 콜백 호출 (panic 보호)
    pub(crate) fn fct_error(&self, e: &Error) {
        if let Some(f) = self.fe.load() {
            guarded("fct_error", || (*f)(e));
        }
    }

    /// 연결 상태 콜백 호출 (panic 복구 시 에러 콜백으로 보고)
    pub(crate) fn fct_info(&self, local: &str, remote: &str, state: ConnState) {
        if let Some(f) = self.fi.load() {
            guarded_with(&self.fe, "fct_info", || (*f)(local, remote, state));
        }
    }

    /// 서버 정보 콜백 호출 (panic 복구 시 에러 콜백으로 보고)
    pub(crate) fn fct_info_srv(&self, msg: &str) {
        if let Some(f) = self.fs.load() {
            guarded_with(&self.fe, "fct_info_srv", || (*f)(msg));
        }
    }
}

/// 연결 카운터 가드 (수락 시 +1, 종료 시 -1)
pub(crate) struct ConnGuard {
    st: Arc<SrvState>,
}

impl ConnGuard {
    pub(crate) fn new(st: Arc<SrvState>) -> Self {
        st.nc.fetch_add(1, Ordering::SeqCst);
        Self { st }
    }
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.st.nc.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let st = SrvState::new();
        assert!(!st.is_running());
        assert!(st.is_gone());
        assert_eq!(st.open_connections(), 0);
        assert!(st.check_startable().is_ok());
    }

    #[test]
    fn test_conn_guard_counts() {
        let st = SrvState::new();
        {
            let _a = ConnGuard::new(st.clone());
            let _b = ConnGuard::new(st.clone());
            assert_eq!(st.open_connections(), 2);
        }
        assert_eq!(st.open_connections(), 0);
    }

    #[test]
    fn test_close_is_terminal_and_idempotent() {
        let st = SrvState::new();
        assert!(st.close().is_ok());
        assert!(st.close().is_ok());
        assert!(st.is_gone());
        assert!(matches!(st.check_startable(), Err(Error::InvalidInstance)));
    }

    #[test]
    fn test_info_callback_panic_reaches_error_callback() {
        use std::sync::atomic::AtomicUsize;

        let st = SrvState::new();

        let errs = Arc::new(AtomicUsize::new(0));
        let ec = errs.clone();
        st.fe.store(Box::new(move |e| {
            if matches!(e, Error::CallbackPanic(_)) {
                ec.fetch_add(1, Ordering::SeqCst);
            }
        }));
        st.fi.store(Box::new(|_, _, _| panic!("info boom")));
        st.fs.store(Box::new(|_| panic!("srv boom")));

        st.fct_info("local", "remote", ConnState::New);
        assert_eq!(errs.load(Ordering::SeqCst), 1);

        st.fct_info_srv("msg");
        assert_eq!(errs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_before_listen_is_noop() {
        let st = SrvState::new();
        assert!(st.shutdown(Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_times_out_with_open_connection() {
        let st = SrvState::new();
        st.set_running();
        let _guard = ConnGuard::new(st.clone());

        // run 플래그를 내릴 수락 루프가 없으므로 타임아웃
        let res = st.shutdown(Duration::from_millis(30)).await;
        assert!(matches!(res, Err(Error::ShutdownTimeout)));
    }
}
