pub mod frame;
pub mod registry;
pub mod stream;

pub use frame::{comment_frame, event_frame, FrameParser, SseEvent};
pub use registry::{Connection, ConnectionRegistry};
pub use stream::SseStream;
