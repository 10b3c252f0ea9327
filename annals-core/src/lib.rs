//! Core types and traits for the Annals event-sourcing library.
//!
//! This crate provides the persistence and projection core:
//!
//! - [`domain`] - Domain-model primitives (`DomainEvent`, `Root`, `Aggregate`)
//! - [`transcoder`] - Byte encoding of event state (`Transcoder`, `JsonTranscoder`)
//! - [`compressor`] - Optional state compression (`Compressor`, `ZlibCompressor`)
//! - [`cipher`] - Optional authenticated encryption (`Cipher`, `AesGcmCipher`)
//! - [`mapper`] - Event/record binding with upcasting (`Mapper`, `Upcasters`)
//! - [`recorder`] - Durable storage contract (`Recorder`, `StoredEvent`, `Notification`)
//! - [`store`] - Mapper + recorder composition (`EventStore`)
//! - [`repository`] - Aggregate reconstitution (`Repository`)
//! - [`notification`] - Pull-based propagation (`NotificationLog`, `NotificationLogReader`)
//! - [`application`] - The facade binding it all (`Application`)
//! - [`config`] - Recognized configuration options (`Config`)
//!
//! Most users should depend on the [`annals`](https://docs.rs/annals) crate,
//! which re-exports these types with a cleaner API surface.

pub mod application;
pub mod cipher;
pub mod compressor;
pub mod config;
pub mod domain;
pub mod mapper;
pub mod notification;
pub mod recorder;
pub mod repository;
pub mod store;
pub mod transcoder;
