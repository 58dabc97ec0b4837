pub mod bus;
pub mod chat;
pub mod connection;
pub mod notifier;
pub mod poller;
pub mod rooms;
pub mod state_machine;
