//! 附件存储
//!
//! 持久化不透明的二进制附件并返回可公开访问的地址与媒体类别

pub mod domain;
pub mod infrastructure;
pub mod service;

pub use domain::model::{MediaKind, StoredAttachment, UploadRequest};
pub use domain::repository::{AttachmentStore, AttachmentStoreRef};
pub use infrastructure::local::filesystem::FilesystemAttachmentStore;
pub use infrastructure::memory::InMemoryAttachmentStore;
pub use infrastructure::object_store::firebase::FirebaseStorageStore;
pub use service::wire::build_attachment_store;
