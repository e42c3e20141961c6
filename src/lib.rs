//! Powerctl - switch a remote PC on and off
//!
//! Powering on logs into a consumer router's admin pages, looks the PC up in the
//! router's Wake-on-LAN list and asks the router to wake it. Powering off opens
//! an SSH session to the PC and runs a shutdown command.
//!
//! Hosts drive a [`PowerController`] through the [`PowerSwitch`] trait.

pub mod config;
pub mod controller;
pub mod error;
pub mod http;
pub mod models;
pub mod parser;
pub mod router;
pub mod ssh;

pub use config::Config;
pub use controller::{PowerController, PowerSettings, PowerSwitch};
pub use error::PowerError;
pub use models::{DeviceRecord, Phase, PowerState};
