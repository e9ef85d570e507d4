pub mod capture;
pub mod detection_loop;
pub mod dispatcher;
pub mod event_sink;
pub mod keycode_map;
pub mod matcher;
pub mod status_board;
pub mod supervisor;
pub mod trigger_gate;

pub use capture::{save_region, Region, ScreenCapturer, XcapCapturer};
pub use detection_loop::DetectionLoop;
pub use dispatcher::create_dispatcher;
pub use event_sink::{ChannelEventSink, EventSink};
pub use matcher::ScaleSet;
pub use status_board::StatusBoard;
pub use supervisor::StrategySupervisor;
