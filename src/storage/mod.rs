pub mod filesystem;
pub mod metadata;
pub mod paths;
pub mod retention;

pub use filesystem::FileStorage;
pub use metadata::MetadataStore;
