pub mod candidate;
pub mod history;
pub mod media;
pub mod request;
pub mod user;

pub use candidate::{Candidate, SeasonStats};
pub use history::{EventType, HistoryEvent};
pub use media::{DeleteReason, DiskUsagePolicyRow, Media, MediaType, NewDiskUsageRow, NewMedia};
pub use request::{KeepRequest, RequestStatus};
pub use user::User;
