pub mod client;
pub mod formatter;
pub mod isupport;
pub mod numerics;
pub mod parser;
pub mod roster;
pub mod throttle;
