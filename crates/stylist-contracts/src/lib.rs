pub mod chat;
pub mod events;
pub mod history;
pub mod modal;
pub mod operation;
pub mod photo;
pub mod quota;
pub mod store;
