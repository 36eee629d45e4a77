pub mod command;
pub mod connection;
pub mod extensions;
pub mod framed;
pub mod fsm;
pub mod limit;
pub mod mime;
pub mod session;
pub mod status;
pub mod transaction;
