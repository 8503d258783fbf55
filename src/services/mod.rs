pub mod identity;
pub mod messages;
pub mod presence;
pub mod receipts;
pub mod store;

pub use messages::MessageBroadcaster;
pub use presence::PresenceTracker;
pub use receipts::ReadReceiptTracker;
