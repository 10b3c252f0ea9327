#![doc = include_str!("../README.md")]

pub use annals_core::{
    application,
    application::Application,
    cipher, compressor, config,
    config::Config,
    domain,
    domain::{Aggregate, CreationError, DomainEvent, EventPayload, Root},
    mapper,
    mapper::{Mapper, Upcasters},
    notification,
    notification::{NotificationLog, NotificationLogReader},
    repository,
    repository::Repository,
    store,
    store::EventStore,
    transcoder,
    transcoder::{JsonTranscoder, Transcoder},
};

pub mod recorder {
    pub use annals_core::recorder::{
        EventSelect, NonEmpty, Notification, ProgrammingError, Recorder, RecorderError,
        RecordConflict, StoredEvent, inmemory, validate_batch,
    };

    #[cfg(feature = "postgres")]
    #[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
    pub mod postgres {
        pub use annals_postgres::PgRecorder;
    }
}

pub use recorder::inmemory::InMemoryRecorder;
