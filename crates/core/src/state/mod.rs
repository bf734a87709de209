pub mod db;
pub mod sessions;

pub use db::AgoraDb;

pub use sessions::{
    EventSink, SessionRecord, SqliteEventSink, StoredEvent, SESSION_STARTED, SESSION_TERMINATED,
};
