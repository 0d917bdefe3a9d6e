//! A driver for Daikin DIII-NET Modbus adapters.
//!
//! [`adapter::AdapterHandle`] is the entry point: it exposes status queries and control
//! operations for the up to 16 indoor units (ids 100 to 115) behind one adapter, speaking
//! Modbus RTU over an RS-485 serial line through [`connection::RtuConnection`].

pub mod adapter;
pub mod codes;
pub mod commands;
pub mod connection;
pub mod decode;
pub mod encode;
pub mod modbus;
pub mod output;
pub mod registers;
pub mod retry;
