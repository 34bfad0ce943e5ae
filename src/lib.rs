//! Live-stream recording to FLV files.
//!
//! A [`Dvr`] is attached to each published stream. It hands frames to a
//! recording [`Plan`] (session, append or segment), which drives a
//! [`Segmenter`] writing one file at a time. Finished files are reported to
//! HTTP callbacks through the [`AsyncNotifier`] worker.

pub mod config;
pub mod container;
pub mod dvr;
pub mod error;
pub mod hooks;
pub mod media;
pub mod request;

pub use config::{Config, ConfigError, DvrConfig, PlanKind, VhostConfig};
pub use container::{ContainerFormat, ContainerWriter};
pub use dvr::{Dvr, DvrService, JitterMode, Plan, Segmenter};
pub use error::DvrError;
pub use hooks::{AsyncNotifier, HookTable, HttpHooks, NotifyEvent, NotifyJob};
pub use media::{Frame, FrameKind};
pub use request::StreamRequest;
