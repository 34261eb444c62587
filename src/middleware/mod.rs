pub mod binder;
pub mod handlers;
pub mod multipart;
pub mod pagination;
pub mod params;
pub mod response;
pub mod validators;

pub use binder::{Binder, FormInput};
pub use handlers::{
    commit, identify, name, name_owner, name_owner_paged, no_result, paginated, plain, search, CommitKind,
    RequestContext, SearchArgs,
};
pub use multipart::{MultipartForm, StagedUpload, Stager, UploadedFile};
pub use pagination::{PaginationRequest, PaginationResult};
