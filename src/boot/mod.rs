//! Bootloader configuration for the generated image.

pub mod grub;

pub use grub::{generate, CONFIG_MOUNT_DIR};
