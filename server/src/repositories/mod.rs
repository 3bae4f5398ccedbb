//! Repositories module - Accesso al database
//!
//! Un repository per entità; le interfacce generiche stanno in `traits`.

pub mod message;
pub mod traits;

// Re-exports per facilitare l'import
pub use message::MessageRepository;
pub use traits::{Create, Read};
