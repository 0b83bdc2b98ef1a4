//! Wire protocol above the codec: frame layout and error reports

pub mod error_report;
pub mod frame;

pub use error_report::{check_reply, codes, reply_error, ErrorReport};
pub use frame::Frame;
