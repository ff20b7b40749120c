//! Host-side programming and diagnostics for the Momentum board over a
//! CP2102N USB-UART bridge: firmware flashing through the STM32 ROM UART
//! bootloader, and NVM NOR-flash access through the framed protocol served
//! by the running firmware.

pub mod checksum;
mod error;
pub mod frame;
pub mod hexdump;
pub mod nvm;
pub mod ports;
pub mod serial;
pub mod stm32;

pub use error::{Error, Step};
