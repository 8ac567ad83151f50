pub mod checksum;
pub mod fs;
pub mod net;
pub mod template;

pub use checksum::ChecksumVerifier;
pub use fs::FileSystemManager;
pub use template::TemplateEngine;
