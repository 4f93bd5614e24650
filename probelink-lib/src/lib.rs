pub mod crc;
pub mod port;
pub mod protocol;
pub mod sim;
