pub mod detection;
pub mod record;
pub mod upload;
pub mod user;

pub use detection::{Annotation, CreateAnnotation, CreateDetection, Detection, DetectionPatch};
pub use record::{Entity, RecordMeta, Reference, UniqueKey};
pub use upload::{CreateUpload, Upload, UploadAccess};
pub use user::{CreateUser, UpdateUser, User};
