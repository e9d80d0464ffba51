//! Transport collaborators: the radio modem and the host serial stream.

mod radio;
mod serial;

pub use radio::{DynRadio, MemoryRadio, MemoryRadioState, Radio, RadioMode};
pub use serial::{spawn_reader_task, ActivityIndicator};
