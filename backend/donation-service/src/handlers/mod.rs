pub mod donations;
pub mod events;
pub mod users;
