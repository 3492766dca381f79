pub mod fs;

pub use fs::FileTaskStore;
