use anyhow::Result;
use serde_json::json;
use tracing::{debug, info};

use crate::utils::TemplateEngine;

/// Where the installer sees the injected `/SERVER` directory at boot.
pub const CONFIG_MOUNT_DIR: &str = "/cdrom/server/";

/// The `efi` block is plain GRUB script, evaluated by GRUB at boot.
const GRUB_TEMPLATE: &str = concat!(
    "set timeout={{timeout}}\n",
    "loadfont unicode\n",
    "set menu_color_normal=white/black\n",
    "set menu_color_highlight=black/light-gray\n",
    "menuentry 'Autoinstall' {\n",
    "   set gfxpayload=keep\n",
    "   linux\t/casper/vmlinuz autoinstall ds=nocloud\\;s={{config_dir}}  ---\n",
    "   initrd\t/casper/initrd\n",
    "}\n",
    "menuentry 'Manual install' {\n",
    "   set gfxpayload=keep\n",
    "   linux\t/casper/vmlinuz  ---\n",
    "   initrd\t/casper/initrd\n",
    "}\n",
    "grub_platform\n",
    "if [ $grub_platform = \"efi\" ]; then\n",
    "menuentry 'Boot from next volume' {\n",
    "   exit 1\n",
    "}\n",
    "menuentry 'UEFI Firmware Settings' {\n",
    "   fwsetup\n",
    "}\n",
    "menuentry 'Test memory' {\n",
    "   linux16 /boot/memtest86+x64.bin\n",
    "}\n",
    "fi\n",
);

/// Render `grub.cfg` with a menu timeout of `timeout` seconds. GRUB reads
/// `-1` as no timeout.
pub fn generate(timeout: i32) -> Result<String> {
    info!("Creating grub.cfg...");
    let grub = TemplateEngine::new().render_string(
        GRUB_TEMPLATE,
        &json!({ "timeout": timeout, "config_dir": CONFIG_MOUNT_DIR }),
    )?;
    debug!("grub.cfg:\n{}", grub);
    Ok(grub)
}
