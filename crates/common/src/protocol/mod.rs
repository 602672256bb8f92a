// Wire protocols spoken by Quill clients.

pub mod presence;
pub mod stomp;
