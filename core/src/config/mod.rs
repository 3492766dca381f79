mod load;
mod types;

pub use load::{expand_path, finalize, get_data_dir, load_default, load_from_path};
pub use types::{
    AppConfig, DeviceConfig, LoggingConfig, SchedulerConfig, StoreBackend, StoreConfig,
    WorkerOverride,
};
