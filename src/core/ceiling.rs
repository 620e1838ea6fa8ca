//! Purpose: Install and observe a process-wide memory ceiling.
//! Exports: `LimitKind`, `EnforceMode`, `Enforcement`, `LimitBackend`, `OsLimits`,
//! `enforce`, `enforce_with`, `resident_memory_bytes`.
//! Role: Best-effort OS-level protection wrapped around the ingestion engine.
//! Invariants: Limit kinds are tried in one fixed priority order, broadest first.
//! Invariants: The ceiling is process-global; rely on at most one effective
//! enforce call per process lifetime. Loosening a tightened ceiling is
//! platform-dependent and not guaranteed.
use crate::core::error::{Error, ErrorKind};

/// A named OS limit strategy. `AddressSpace` (RLIMIT_AS) bounds all
/// addressable memory and is tried first; `DataSegment` (RLIMIT_DATA) is the
/// narrower fallback.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LimitKind {
    AddressSpace,
    DataSegment,
}

impl LimitKind {
    pub const PRIORITY: [LimitKind; 2] = [LimitKind::AddressSpace, LimitKind::DataSegment];

    pub fn as_str(self) -> &'static str {
        match self {
            LimitKind::AddressSpace => "address-space",
            LimitKind::DataSegment => "data-segment",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EnforceMode {
    /// Refusal of every limit kind is fatal. For deterministic OOM testing.
    Strict,
    /// Refusal is logged and ingestion proceeds unprotected. For production
    /// report generation, where best-effort protection beats refusing to run.
    Degraded,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Enforcement {
    Enforced { kind: LimitKind },
    Unprotected { attempted: Vec<LimitKind> },
}

/// Injectable "try to install limit kind K" capability, so tests can simulate
/// enforcement success and refusal without touching real OS limits.
pub trait LimitBackend {
    fn install(&self, kind: LimitKind, limit_bytes: u64) -> Result<(), Error>;
}

/// The real backend: libc getrlimit/setrlimit.
pub struct OsLimits;

impl LimitBackend for OsLimits {
    fn install(&self, kind: LimitKind, limit_bytes: u64) -> Result<(), Error> {
        os::install(kind, limit_bytes)
    }
}

pub fn enforce(limit_bytes: u64, mode: EnforceMode) -> Result<Enforcement, Error> {
    enforce_with(&OsLimits, limit_bytes, mode)
}

pub fn enforce_with(
    backend: &dyn LimitBackend,
    limit_bytes: u64,
    mode: EnforceMode,
) -> Result<Enforcement, Error> {
    if limit_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage).with_message("memory limit must be non-zero"));
    }

    let mut attempted = Vec::new();
    for kind in LimitKind::PRIORITY {
        match backend.install(kind, limit_bytes) {
            Ok(()) => {
                tracing::debug!(kind = kind.as_str(), limit_bytes, "memory ceiling installed");
                return Ok(Enforcement::Enforced { kind });
            }
            Err(err) => {
                tracing::debug!(kind = kind.as_str(), error = %err, "limit kind refused");
                attempted.push(kind);
            }
        }
    }

    let kinds = attempted
        .iter()
        .map(|kind| kind.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    match mode {
        EnforceMode::Strict => Err(Error::new(ErrorKind::Ceiling)
            .with_message(format!("every limit kind was refused ({kinds})"))
            .with_hint("Run inside a memory-limited container, or use --mode degraded.")),
        EnforceMode::Degraded => {
            tracing::warn!(attempted = %kinds, "memory ceiling refused; proceeding unprotected");
            Ok(Enforcement::Unprotected { attempted })
        }
    }
}

/// Current resident set size in bytes. Always available regardless of
/// enforcement success; returns 0 when the platform offers no reading.
pub fn resident_memory_bytes() -> u64 {
    #[cfg(target_os = "linux")]
    if let Some(rss) = statm_rss() {
        return rss;
    }
    rusage_rss()
}

#[cfg(target_os = "linux")]
fn statm_rss() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return None;
    }
    Some(pages * page_size as u64)
}

#[cfg(unix)]
fn rusage_rss() -> u64 {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return 0;
    }
    let maxrss = usage.ru_maxrss.max(0) as u64;
    // ru_maxrss is kilobytes on Linux and bytes on macOS.
    if cfg!(target_os = "macos") {
        maxrss
    } else {
        maxrss * 1024
    }
}

#[cfg(not(unix))]
fn rusage_rss() -> u64 {
    0
}

#[cfg(unix)]
mod os {
    use std::io;

    use super::LimitKind;
    use crate::core::error::{Error, ErrorKind};

    pub fn install(kind: LimitKind, limit_bytes: u64) -> Result<(), Error> {
        let resource = match kind {
            LimitKind::AddressSpace => libc::RLIMIT_AS,
            LimitKind::DataSegment => libc::RLIMIT_DATA,
        };

        let mut current = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
        let rc = unsafe { libc::getrlimit(resource, &mut current) };
        if rc != 0 {
            return Err(Error::new(ErrorKind::Ceiling)
                .with_message(format!("getrlimit({}) failed", kind.as_str()))
                .with_source(io::Error::last_os_error()));
        }

        let limit = limit_bytes as libc::rlim_t;
        // If the hard limit is unlimited, try pinning both; otherwise lower
        // the soft limit and leave the hard limit alone.
        if current.rlim_max == libc::RLIM_INFINITY {
            let lim = libc::rlimit { rlim_cur: limit, rlim_max: limit };
            if unsafe { libc::setrlimit(resource, &lim) } == 0 {
                return Ok(());
            }
        }
        let lim = libc::rlimit { rlim_cur: limit, rlim_max: current.rlim_max };
        if unsafe { libc::setrlimit(resource, &lim) } == 0 {
            Ok(())
        } else {
            Err(Error::new(ErrorKind::Ceiling)
                .with_message("setrlimit refused")
                .with_source(io::Error::last_os_error()))
        }
    }
}

#[cfg(not(unix))]
mod os {
    use super::LimitKind;
    use crate::core::error::{Error, ErrorKind};

    pub fn install(kind: LimitKind, _limit_bytes: u64) -> Result<(), Error> {
        Err(Error::new(ErrorKind::Ceiling)
            .with_message(format!("{} limits are not supported on this platform", kind.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::{
        EnforceMode, Enforcement, LimitBackend, LimitKind, enforce_with, resident_memory_bytes,
    };
    use crate::core::error::{Error, ErrorKind};

    struct RefuseAll;

    impl LimitBackend for RefuseAll {
        fn install(&self, kind: LimitKind, _limit_bytes: u64) -> Result<(), Error> {
            Err(Error::new(ErrorKind::Ceiling)
                .with_message(format!("{} refused", kind.as_str())))
        }
    }

    struct AcceptOnly(LimitKind);

    impl LimitBackend for AcceptOnly {
        fn install(&self, kind: LimitKind, _limit_bytes: u64) -> Result<(), Error> {
            if kind == self.0 {
                Ok(())
            } else {
                Err(Error::new(ErrorKind::Ceiling).with_message("refused"))
            }
        }
    }

    #[test]
    fn strict_mode_surfaces_total_refusal() {
        let err = enforce_with(&RefuseAll, 1 << 30, EnforceMode::Strict).expect_err("refused");
        assert_eq!(err.kind(), ErrorKind::Ceiling);
    }

    #[test]
    fn degraded_mode_reports_attempted_kinds_and_proceeds() {
        let outcome =
            enforce_with(&RefuseAll, 1 << 30, EnforceMode::Degraded).expect("degraded outcome");
        assert_eq!(
            outcome,
            Enforcement::Unprotected {
                attempted: vec![LimitKind::AddressSpace, LimitKind::DataSegment],
            }
        );
    }

    #[test]
    fn broadest_kind_wins_when_available() {
        let outcome = enforce_with(&AcceptOnly(LimitKind::AddressSpace), 1 << 30, EnforceMode::Strict)
            .expect("enforced");
        assert_eq!(outcome, Enforcement::Enforced { kind: LimitKind::AddressSpace });
    }

    #[test]
    fn narrower_kind_is_the_fallback() {
        let outcome = enforce_with(&AcceptOnly(LimitKind::DataSegment), 1 << 30, EnforceMode::Strict)
            .expect("enforced");
        assert_eq!(outcome, Enforcement::Enforced { kind: LimitKind::DataSegment });
    }

    #[test]
    fn zero_limit_is_a_usage_error() {
        let err = enforce_with(&RefuseAll, 0, EnforceMode::Degraded).expect_err("zero limit");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[cfg(unix)]
    #[test]
    fn resident_memory_reading_is_available() {
        assert!(resident_memory_bytes() > 0);
    }
}
