// quill-common: shared types and wire protocol for the Quill workspace

pub mod protocol;
pub mod types;
