//! Postgres-backed recorder for the Annals event-sourcing library.
//!
//! This crate provides [`PgRecorder`], a `PostgreSQL` implementation of
//! [`annals_core::recorder::Recorder`].
//!
//! # Notification-id density
//!
//! Notification ids must be dense and assigned in commit order: a reader
//! observing id `k` may assume ids `1..k` are all readable. A plain
//! `BIGSERIAL` cannot guarantee that - sequence values are allocated before
//! commit, so a later id can become visible first, and rolled-back
//! transactions leave gaps.
//!
//! `PgRecorder` therefore serializes appenders: every insert transaction
//! takes `pg_advisory_xact_lock` on a single application-wide key, reads
//! `max(notification_id)`, and assigns `max+1..` explicitly. The lock is
//! released at commit, so id assignment order equals commit visibility
//! order and the sequence has no holes. Readers need no locking.

mod recorder;

pub use recorder::PgRecorder;
