pub mod conversations;
pub mod messages;
pub mod participants;
pub mod settings;
pub mod users;
