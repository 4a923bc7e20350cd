//! SENTINEL Context - Window and Pack Assembly
//!
//! Maintains the ordered transcript window, classifies memory strain, and
//! assembles every outgoing prompt pack from bounded sections. Assembly
//! is a pure function of in-memory state: identical transcript, digest,
//! snapshot, and user input always produce a byte-identical pack.

mod packer;
mod source;
mod strain;
mod trace;
mod window;

pub use packer::{BuildOptions, Packer};
pub use source::SectionSource;
pub use strain::{classify, pressure, pressure_from};
pub use trace::{PackTrace, PromptPack, SectionTrace, TraceWarning, WarningKind};
pub use window::{Window, WindowSelection};
