//! A single [`Journaler`] abstraction over the durable and in-memory backing stores.
//!
//! [`Journal`] is an enum, not a `dyn Journaler`, following the same dispatch-by-role
//! idiom used for `StreamFactory`: the session layer calls through [`Journaler`]
//! without caring which backend is behind it, and which backend is behind it is
//! decided once, at connection setup, from [`SessionSettings::durable`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::fix::mem::MsgBuf;
use crate::fix::{vec_store, store};
use crate::SessionSettings;

/// Which half of the session's wire traffic a [`JournalError::DuplicateSeqNo`]
/// was detected on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("duplicate {direction:?} msg_seq_num {seq_no} for session {session_key}")]
    DuplicateSeqNo {
        session_key: String,
        direction: Direction,
        seq_no: u32,
    },
    #[error(transparent)]
    IoError(#[from] anyhow::Error),
    #[error("no journal entry for session {0}")]
    SessionNotFound(String),
}

type Result<T> = std::result::Result<T, JournalError>;

/// A durable or in-memory log of every frame sent and received on a session,
/// keyed by `epoch` (the session's local identifier), plus the session's
/// sequence-number counters.
#[async_trait]
pub trait Journaler: Send + Sync {
    async fn get_sequences(&self, epoch: Arc<String>) -> Result<(u32, u32)>;
    async fn set_sequences(
        &self,
        epoch: Arc<String>,
        next_outgoing: u32,
        next_incoming: u32,
    ) -> Result<()>;
    async fn get_prev_messages(
        &self,
        epoch: Arc<String>,
        begin: u32,
        end: u32,
        last: u32,
    ) -> Result<Vec<(u32, Vec<u8>)>>;
    async fn last_send_time(&self, epoch: Arc<String>) -> Result<Option<DateTime<Utc>>>;
    async fn store_outgoing(
        &self,
        epoch: Arc<String>,
        msg_seq_num: u32,
        send_instant: Instant,
        msg: Arc<MsgBuf>,
    ) -> Result<()>;
    async fn store_incoming(
        &self,
        epoch: Arc<String>,
        msg_seq_num: u32,
        msg: Arc<MsgBuf>,
    ) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
}

/// The concrete backend selected by [`SessionSettings::durable`]: SQLite-backed
/// and crash-safe, or an in-memory [`vec_store::Store`] for tests that should
/// never touch the filesystem.
pub enum Journal {
    Sqlite(store::Store),
    Memory(vec_store::Store),
}

impl Journal {
    pub async fn build(settings: &SessionSettings) -> Result<Journal> {
        if settings.durable {
            Ok(Journal::Sqlite(store::Store::build(settings).await?))
        } else {
            Ok(Journal::Memory(vec_store::Store::build(settings)?))
        }
    }
}

#[async_trait]
impl Journaler for Journal {
    async fn get_sequences(&self, epoch: Arc<String>) -> Result<(u32, u32)> {
        match self {
            Journal::Sqlite(s) => s.get_sequences(epoch).await,
            Journal::Memory(s) => s.get_sequences(epoch).await,
        }
    }

    async fn set_sequences(
        &self,
        epoch: Arc<String>,
        next_outgoing: u32,
        next_incoming: u32,
    ) -> Result<()> {
        match self {
            Journal::Sqlite(s) => s.set_sequences(epoch, next_outgoing, next_incoming).await,
            Journal::Memory(s) => s.set_sequences(epoch, next_outgoing, next_incoming).await,
        }
    }

    async fn get_prev_messages(
        &self,
        epoch: Arc<String>,
        begin: u32,
        end: u32,
        last: u32,
    ) -> Result<Vec<(u32, Vec<u8>)>> {
        match self {
            Journal::Sqlite(s) => s.get_prev_messages(epoch, begin, end, last).await,
            Journal::Memory(s) => s.get_prev_messages(epoch, begin, end, last).await,
        }
    }

    async fn last_send_time(&self, epoch: Arc<String>) -> Result<Option<DateTime<Utc>>> {
        match self {
            Journal::Sqlite(s) => s.last_send_time(epoch).await,
            Journal::Memory(s) => s.last_send_time(epoch).await,
        }
    }

    async fn store_outgoing(
        &self,
        epoch: Arc<String>,
        msg_seq_num: u32,
        send_instant: Instant,
        msg: Arc<MsgBuf>,
    ) -> Result<()> {
        match self {
            Journal::Sqlite(s) => s.store_outgoing(epoch, msg_seq_num, send_instant, msg).await,
            Journal::Memory(s) => s.store_outgoing(epoch, msg_seq_num, send_instant, msg).await,
        }
    }

    async fn store_incoming(
        &self,
        epoch: Arc<String>,
        msg_seq_num: u32,
        msg: Arc<MsgBuf>,
    ) -> Result<()> {
        match self {
            Journal::Sqlite(s) => s.store_incoming(epoch, msg_seq_num, msg).await,
            Journal::Memory(s) => s.store_incoming(epoch, msg_seq_num, msg).await,
        }
    }

    async fn disconnect(&self) -> Result<()> {
        match self {
            Journal::Sqlite(s) => s.disconnect().await,
            Journal::Memory(s) => s.disconnect().await,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fix::mem::MsgBuf;
    use crate::SessionSettingsBuilder;

    fn settings(durable: bool) -> SessionSettings {
        SessionSettingsBuilder::new()
            .with_sender_comp_id("SENDER")
            .with_target_comp_id("TARGET")
            .with_socket_addr("127.0.0.1:0".parse().unwrap())
            .with_store_path("unused".into())
            .with_log_dir("unused".into())
            .with_durable(durable)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn memory_journal_roundtrips_sequences_and_outgoing_messages() {
        let settings = settings(false);
        let journal = Journal::build(&settings).await.unwrap();
        assert!(matches!(journal, Journal::Memory(_)));

        let epoch = settings.epoch.clone();
        assert_eq!(journal.get_sequences(epoch.clone()).await.unwrap(), (1, 1));
        journal.set_sequences(epoch.clone(), 5, 3).await.unwrap();
        assert_eq!(journal.get_sequences(epoch.clone()).await.unwrap(), (3, 5));

        let msg = Arc::new(MsgBuf::from(b"8=FIX.4.4\x019=5\x0135=0\x0110=000\x01".to_vec()));
        journal
            .store_outgoing(epoch.clone(), 4, std::time::Instant::now(), msg.clone())
            .await
            .unwrap();
        let prev = journal.get_prev_messages(epoch, 1, 10, 4).await.unwrap();
        assert_eq!(prev, vec![(4, msg.0.clone())]);
    }
}
