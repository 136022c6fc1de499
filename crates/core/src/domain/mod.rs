pub mod action;
pub mod classification;
pub mod conversation;
pub mod stage;
