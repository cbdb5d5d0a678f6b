//! # crossref-scheduler
//!
//! Change collector: decides when a dirty document should be reindexed.
//!
//! - Content-only classification: layout and naming changes never dirty a
//!   document.
//! - Debounce with a quiet period, a hard ceiling under continuous edits,
//!   and a per-document minimum interval.
//! - Time and timers are injected ([`Clock`], [`TimerScheduler`]) so the
//!   state machine is tested with a fake clock.

mod clock;
mod collector;
mod config;
mod timer;

pub use clock::{to_delta, until, Clock, FakeClock, SystemClock};
pub use collector::{classify_change, ChangeCollector, ChangeKind};
pub use config::CollectorConfig;
pub use timer::{ManualTimerScheduler, TimerScheduler, TokioTimerScheduler};
