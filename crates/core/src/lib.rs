pub mod config;
pub mod error;

pub use config::{load_dotenv, CredentialPaths, PathRole, TrackedPath, WatcherConfig};
pub use error::*;
