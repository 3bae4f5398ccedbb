//! Protocol - Tipi condivisi tra server e client
//!
//! Questo crate contiene i DTO e gli eventi WebSocket usati da entrambi i
//! lati della comunicazione. I DTO separano la rappresentazione esterna
//! (API/wire) dalla rappresentazione interna di ciascun lato.

pub mod events;
pub mod message;
pub mod query;

// Re-exports per facilitare l'import
pub use events::{
    ClientEvent, ConversationUpdateDTO, ErrorDTO, PresenceDTO, ReadReceiptDTO, TypingDTO, WsEvent,
};
pub use message::{
    ConversationTarget, CreateMessageDTO, MessageDTO, MessageType, UpdateMessageDTO,
    direct_conversation_id,
};
pub use query::DirectMessagesQuery;
