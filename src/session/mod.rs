pub mod state;
pub mod store;
pub mod tokens;

pub use state::{SessionEvent, SessionSnapshot, SessionState};
pub use store::{token_path, FileTokenStore, MemoryTokenStore, TokenStore};
pub use tokens::{AuthResponse, ProfilePatch, TokenTriple, UserProfile};
