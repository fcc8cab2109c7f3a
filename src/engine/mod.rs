//! Dispatch engine: worker queues, the task ledger, checkin handling and
//! file transfer.

pub mod checkin;
pub mod dispatcher;
mod ledger;
mod queue;
pub mod transfer;

pub use checkin::CheckinHandler;
pub use dispatcher::Dispatcher;
pub use transfer::FileStore;
