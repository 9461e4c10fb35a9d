pub mod conversations;
pub mod permissions;
pub mod preferences;
pub mod stream;
pub mod system;
