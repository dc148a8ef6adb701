pub mod click;
pub mod link;

pub use click::{Click, NewClick};
pub use link::{
    BatchCreateRequest, CreateLinkRequest, Link, LinkOrder, LinkPatch, LinkPreview, LinkQuery,
    NewLink, OwnerStats,
};
