mod hub;

pub use hub::{download_dataset_files_sync, download_model_file_sync, FetchError};
