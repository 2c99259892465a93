// Message model
//
// The append-only log is a sequence of `Message`s: announcements and the
// tombstones that retract them. `AnnouncementView` derives "the current
// announcement" from that sequence; the server and every client use the same
// view so both sides agree on what is current.

mod timestamp;
pub mod types;
pub mod view;

pub use types::{Announcement, Message, MessageKind};
pub use view::AnnouncementView;

pub(crate) use timestamp::{deserialize as timestamp_de, deserialize_option as timestamp_opt_de};
