//! Builds unattended Ubuntu Server installer images: an autoinstall
//! `user-data` document and a GRUB menu are injected into a copy of a
//! stock server ISO, which stays bootable through a rewritten El Torito
//! boot catalog.

pub mod autoinstall;
pub mod boot;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod iso;
pub mod prompt;
pub mod source;
pub mod utils;

pub use crate::core::Builder;
pub use error::AutoinstallError;
