use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the media-plane core.
///
/// Transient protocol errors (truncated packets, unknown extensions) are
/// logged and swallowed at the call site rather than returned here; this
/// enum carries only the error classes that change control flow for a
/// caller (resource-missing, rate-limited feedback, unsupported feedback).
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("no cache entry for seqno {0}")]
    CacheMiss(u16),

    #[error("resize refused: current state incompatible with requested capacity")]
    ResizeRefused,

    #[error("unknown down track {0}")]
    UnknownDownTrack(u32),

    #[error("unknown up track {0}")]
    UnknownUpTrack(u32),

    /// Sentinel: caller asked for feedback (PLI/FIR) that is currently
    /// rate-limited. Not a failure; callers treat this as "try later".
    #[error("feedback rate-limited")]
    RateLimited,

    /// Sentinel: the requested feedback type isn't supported by the
    /// negotiated RTCP-FB capabilities. Callers may fall back (e.g. FIR to
    /// PLI).
    #[error("feedback type unsupported")]
    UnsupportedFeedback,

    #[error("rtp: {0}")]
    Rtp(#[from] rtp::Error),

    #[error("rtcp: {0}")]
    Rtcp(#[from] rtcp::Error),

    #[error("{0}")]
    Util(#[from] util::Error),

    #[error("{0}")]
    Other(String),
}

impl From<Error> for util::Error {
    fn from(e: Error) -> Self {
        util::Error::from_std(e)
    }
}
