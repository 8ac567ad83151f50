pub mod builder;
pub mod modifier;
pub mod verify;

pub use builder::Builder;
pub use modifier::IsoModifier;
