// quill-presence: live "who is viewing this document" for Quill clients.
//
// A session joins a document's presence topic over a broker transport,
// mirrors the server's viewer set, and leaves on teardown. The binding
// drives sessions from changing (document, user) inputs.

pub mod binding;
pub mod config;
pub mod credentials;
pub mod probe;
pub mod session;
pub mod transport;

pub use binding::PresenceBinding;
pub use session::{start, PresenceHandle, PresenceState, PresenceTarget, SessionOptions};
