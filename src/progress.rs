//! 진행 추적 파일 래퍼
//!
//! - 표준 Read/Write/Seek 구현 위에 진행 콜백(increment/reset/EOF)을 얹는다
//! - EOF 콜백은 읽기가 끝을 만날 때 한 번만, seek 후 다시 무장
//! - 임시 파일은 Drop 시 제거

use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::debug;

use crate::callback::{guarded, Slot};
use crate::error::Result;
use crate::{DEFAULT_BUFFER_SIZE, MIN_BUFFER_SIZE};

/// 진행 콜백: 이번 연산에서 처리된 바이트 수
pub type FctIncrement = Box<dyn Fn(i64) + Send + Sync>;

/// 초기화 콜백: (최대 크기, 현재 위치)
pub type FctReset = Box<dyn Fn(i64, i64) + Send + Sync>;

/// 파일 끝 도달 콜백
pub type FctEOF = Box<dyn Fn() + Send + Sync>;

/// 진행 추적 파일
///
/// 모든 읽기/쓰기가 등록된 콜백으로 보고된다. 콜백 슬롯은 원자적이라
/// I/O 도중에도 교체할 수 있다.
pub struct ProgressFile {
    file: File,
    path: PathBuf,
    temp: bool,
    buf_size: AtomicUsize,
    eof_seen: AtomicBool,
    fi: Slot<FctIncrement>,
    fr: Slot<FctReset>,
    fe: Slot<FctEOF>,
}

impl ProgressFile {
    fn wrap(file: File, path: PathBuf, temp: bool) -> Self {
        Self {
            file,
            path,
            temp,
            buf_size: AtomicUsize::new(DEFAULT_BUFFER_SIZE),
            eof_seen: AtomicBool::new(false),
            fi: Slot::empty(),
            fr: Slot::empty(),
            fe: Slot::empty(),
        }
    }

    /// 임의 옵션으로 열기
    ///
    /// `mode`는 파일이 새로 생성될 때만 적용된다 (유닉스 전용).
    pub fn new(path: impl AsRef<Path>, opts: &OpenOptions, mode: u32) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut opts = opts.clone();
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;
        let file = opts.open(&path)?;
        Ok(Self::wrap(file, path, false))
    }

    /// 기존 파일 읽기 전용으로 열기
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(path, OpenOptions::new().read(true), 0)
    }

    /// 새 파일 생성 (기존 내용은 잘린다)
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(
            path,
            OpenOptions::new().read(true).write(true).create(true).truncate(true),
            0o666,
        )
    }

    /// 임시 파일 생성 (Drop 시 제거)
    pub fn temp(pattern: &str) -> Result<Self> {
        let (file, path) = tempfile::Builder::new()
            .prefix(pattern)
            .tempfile()?
            .keep()
            .map_err(|e| e.error)?;
        Ok(Self::wrap(file, path, true))
    }

    /// 지정 디렉터리에 유일한 이름의 파일 생성 (제거 안 함)
    pub fn unique(dir: impl AsRef<Path>, pattern: &str) -> Result<Self> {
        let (file, path) = tempfile::Builder::new()
            .prefix(pattern)
            .tempfile_in(dir)?
            .keep()
            .map_err(|e| e.error)?;
        Ok(Self::wrap(file, path, false))
    }

    pub fn is_temp(&self) -> bool {
        self.temp
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> Result<Metadata> {
        Ok(self.file.metadata()?)
    }

    /// 파일 시작에서 현재 위치까지의 크기
    pub fn size_bof(&self) -> Result<i64> {
        let pos = (&self.file).stream_position()?;
        Ok(pos as i64)
    }

    /// 현재 위치에서 파일 끝까지의 크기
    pub fn size_eof(&self) -> Result<i64> {
        let pos = (&self.file).stream_position()?;
        let len = self.file.metadata()?.len();
        Ok(len.saturating_sub(pos) as i64)
    }

    /// 파일을 `size`로 자르고 reset 콜백으로 알림
    pub fn truncate(&self, size: u64) -> Result<()> {
        self.file.set_len(size)?;

        let current = (&self.file).stream_position().map(|p| p as i64).unwrap_or(0);
        self.eof_seen.store(false, Ordering::SeqCst);
        self.trigger_reset(size as i64, current);

        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// 핸들 닫기 (임시 파일은 Drop에서 제거)
    pub fn close(self) -> Result<()> {
        Ok(())
    }

    /// 닫고 파일 삭제
    pub fn close_delete(self) -> Result<()> {
        let path = self.path.clone();
        drop(self);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    /// 버퍼 I/O에 쓸 버퍼 크기 설정
    ///
    /// 최소값 미만이면 기본값으로 되돌린다.
    pub fn set_buffer_size(&self, size: usize) {
        let size = if size < MIN_BUFFER_SIZE {
            DEFAULT_BUFFER_SIZE
        } else {
            size
        };
        self.buf_size.store(size, Ordering::Relaxed);
    }

    pub fn buffer_size(&self) -> usize {
        self.buf_size.load(Ordering::Relaxed)
    }

    /// 진행 콜백 등록 (기존 등록 교체)
    pub fn register_fct_increment(&self, f: FctIncrement) {
        self.fi.store(f);
    }

    /// 초기화 콜백 등록
    pub fn register_fct_reset(&self, f: FctReset) {
        self.fr.store(f);
    }

    /// EOF 콜백 등록
    pub fn register_fct_eof(&self, f: FctEOF) {
        self.fe.store(f);
    }

    /// 다른 파일의 콜백 등록을 이 파일로 복사
    pub fn set_register_progress(&self, other: &ProgressFile) {
        self.fi.store_shared(other.fi.load());
        self.fr.store_shared(other.fr.load());
        self.fe.store_shared(other.fe.load());
    }

    /// 진행 상태 초기화를 콜백으로 알림
    ///
    /// `max`가 0이면 현재 파일 크기를 쓴다. EOF 상태도 다시 무장된다.
    pub fn reset(&self, max: i64) {
        let max = if max == 0 {
            self.file.metadata().map(|m| m.len() as i64).unwrap_or(0)
        } else {
            max
        };
        let current = (&self.file).stream_position().map(|p| p as i64).unwrap_or(0);

        self.eof_seen.store(false, Ordering::SeqCst);
        self.trigger_reset(max, current);
    }

    fn trigger_increment(&self, size: i64) {
        if size <= 0 {
            return;
        }
        if let Some(f) = self.fi.load() {
            guarded("fct_increment", || (*f)(size));
        }
    }

    fn trigger_reset(&self, max: i64, current: i64) {
        if let Some(f) = self.fr.load() {
            guarded("fct_reset", || (*f)(max, current));
        }
    }

    /// EOF를 한 번만 보고
    fn trigger_eof(&self) {
        if self.eof_seen.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(f) = self.fe.load() {
            guarded("fct_eof", || (*f)());
        }
    }

    /// 바이트 하나 읽기 (EOF는 UnexpectedEof)
    pub fn read_byte(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        let n = self.read(&mut b)?;
        if n == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        Ok(b[0])
    }

    /// 바이트 하나 쓰기
    pub fn write_byte(&mut self, b: u8) -> Result<()> {
        self.write_all(&[b])?;
        Ok(())
    }

    /// 문자열 쓰기, 기록된 바이트 수 반환
    pub fn write_str(&mut self, s: &str) -> Result<usize> {
        self.write_all(s.as_bytes())?;
        Ok(s.len())
    }

    /// `src`의 내용 전체를 이 파일로 복사
    ///
    /// 버퍼 단위로 진행이 보고되고, 복사가 끝나면 EOF 콜백이 불린다.
    pub fn read_from<R: Read>(&mut self, src: &mut R) -> Result<i64> {
        let mut buf = vec![0u8; self.buffer_size()];
        let mut total: i64 = 0;

        loop {
            let n = src.read(&mut buf)?;
            if n == 0 {
                break;
            }
            self.write_all(&buf[..n])?;
            total += n as i64;
        }

        debug!("read_from 완료: {} bytes → {}", total, self.path.display());
        self.trigger_eof();
        Ok(total)
    }

    /// 이 파일의 현재 위치부터 끝까지 `dst`로 복사
    pub fn write_to<W: Write>(&mut self, dst: &mut W) -> Result<i64> {
        let mut buf = vec![0u8; self.buffer_size()];
        let mut total: i64 = 0;

        loop {
            let n = self.read(&mut buf)?;
            if n == 0 {
                break;
            }
            dst.write_all(&buf[..n])?;
            total += n as i64;
        }

        Ok(total)
    }
}

impl Read for ProgressFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.file.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.trigger_eof();
        } else {
            self.trigger_increment(n as i64);
        }
        Ok(n)
    }
}

impl Write for ProgressFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.file.write(buf)?;
        self.trigger_increment(n as i64);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for ProgressFile {
    /// 위치 이동은 reset 콜백으로 보고되고 EOF 상태가 다시 무장된다
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let new_pos = self.file.seek(pos)?;
        let max = self.file.metadata().map(|m| m.len() as i64).unwrap_or(0);

        self.eof_seen.store(false, Ordering::SeqCst);
        self.trigger_reset(max, new_pos as i64);

        Ok(new_pos)
    }
}

impl Drop for ProgressFile {
    fn drop(&mut self) {
        if self.temp {
            if let Err(e) = fs::remove_file(&self.path) {
                debug!("임시 파일 제거 실패 {}: {}", self.path.display(), e);
            }
        }
    }
}
