pub mod downloader;
pub mod uploader;

pub use downloader::{DownloadProgress, Downloader};
pub use uploader::Uploader;
