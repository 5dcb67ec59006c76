pub mod alarm;
pub mod messages;
pub mod parser;
pub mod realtime;
