pub mod engine;
pub mod feed;
pub mod group;
pub mod mailbox;
pub mod message;

pub use engine::Broker;
pub use feed::Feed;
