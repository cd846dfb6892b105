pub mod conversation;
pub mod handoff;
pub mod line;
pub mod message;
pub mod notification;
