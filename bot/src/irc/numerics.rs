//! Numeric replies the bot reacts to.

pub const RPL_WELCOME: &str = "001";
pub const RPL_ISUPPORT: &str = "005";
pub const RPL_NAMREPLY: &str = "353";
pub const RPL_ENDOFNAMES: &str = "366";
pub const ERR_ERRONEUSNICKNAME: &str = "432";
pub const ERR_NICKNAMEINUSE: &str = "433";
pub const ERR_UNAVAILRESOURCE: &str = "437";
pub const ERR_PASSWDMISMATCH: &str = "464";
pub const ERR_BANNEDFROMCHAN: &str = "474";
