pub mod amf0;
mod frame;

pub use amf0::{Amf0Error, Amf0Value};
pub use frame::{Frame, FrameKind};
