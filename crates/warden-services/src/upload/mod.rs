pub mod service;

pub use service::{UploadRequest, UploadService, UploadServiceDeps};
