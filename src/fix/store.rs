use crate::SessionSettings;
use crate::fix::journal::{Direction, JournalError};
use crate::fix::mem::MsgBuf;

use std::sync::Arc;
use std::time::Instant;

use chrono::offset::Utc;
use chrono::naive::NaiveDateTime;
use chrono::{DateTime, Duration};
use tokio::sync::{mpsc, oneshot};
use tokio_rusqlite::Connection;
use rusqlite::{OptionalExtension, OpenFlags};

type Result<T> = std::result::Result<T, JournalError>;

const SQL_ENTER_WAL_MODE: &str = "PRAGMA journal_mode=WAL;";
const SQL_VACUUM: &str = "VACUUM;";
const SQL_CREATE_INCOMING_TABLE :&str="CREATE TABLE IF NOT EXISTS incoming_messages (key INTEGER PRIMARY KEY AUTOINCREMENT, epoch_guid VARCHAR, msg_seq_num INT, message BLOB, UNIQUE(epoch_guid, msg_seq_num));";
const SQL_CREATE_OUTGOING_TABLE :&str=
    "CREATE TABLE IF NOT EXISTS outgoing_messages (key INTEGER PRIMARY KEY AUTOINCREMENT, epoch_guid VARCHAR, msg_seq_num INT, send_time VARCHAR, message BLOB, UNIQUE(epoch_guid, msg_seq_num));";
const SQL_CREATE_SEQUENCES: &str =
    "CREATE TABLE IF NOT EXISTS sequences (epoch_guid VARCHAR, next_incoming INTEGER, next_outgoing INTEGER)";
const SQL_ENSURE_SEQUENCE_ROW: &str = "INSERT INTO sequences(epoch_guid, next_incoming, next_outgoing) SELECT ?1,1,1 WHERE NOT EXISTS (SELECT * FROM sequences WHERE epoch_guid = ?1);";
const SQL_INSERT_OUTGOING_MESSAGE: &str =
    "INSERT INTO outgoing_messages (epoch_guid, msg_seq_num, send_time, message) VALUES (?,?,?,?)";
const SQL_INSERT_INCOMING_MESSAGE: &str =
    "INSERT INTO incoming_messages (epoch_guid, msg_seq_num, message) VALUES (?,?,?)";
const SQL_LAST_SEND_TIME: &str =
    "SELECT send_time FROM outgoing_messages WHERE epoch_guid = ? ORDER BY send_time DESC LIMIT 1";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Wraps channel-plumbing errors (a dead worker task, a dropped oneshot) as
/// [`JournalError::IoError`] — they're not duplicate-seq or not-found errors,
/// just "the store is unreachable".
fn channel_err(e: impl std::fmt::Display) -> JournalError {
    JournalError::IoError(anyhow::anyhow!(e.to_string()))
}

enum StoreRequest {
    StoreOutgoing(Arc<String>, u32, Instant, Arc<MsgBuf>, oneshot::Sender<Result<()>>),
    StoreIncoming(Arc<String>, u32, Arc<MsgBuf>, oneshot::Sender<Result<()>>),
    #[allow(clippy::type_complexity)]
    GetPrevMessages(
        Arc<String>,
        u32,
        u32,
        u32,
        oneshot::Sender<Result<Vec<(u32, Vec<u8>)>>>,
    ),
    GetSequences(Arc<String>, oneshot::Sender<Result<(u32, u32)>>),
    SetSequences(Arc<String>, u32, u32, oneshot::Sender<Result<()>>),
    LastSendTime(Arc<String>, oneshot::Sender<Result<Option<DateTime<Utc>>>>),
    Disconnect(oneshot::Sender<Result<()>>),
}

pub struct Store {
    sender: mpsc::UnboundedSender<StoreRequest>,
}

impl Store {
    pub async fn build(settings: &SessionSettings) -> Result<Store> {
        let conn = Connection::open_with_flags(settings.store_path.clone(), OpenFlags::default())
            .await
            .map_err(channel_err)?;
        let epoch = settings.epoch.clone();
        setup(&conn, epoch).await?;
        let (sender, mut receiver) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let begin_time = Utc::now();
            let begin_instant = Instant::now();
            while let Some(req) = receiver.recv().await {
                match req {
                    StoreRequest::StoreOutgoing(epoch, msg_seq_num, send_instant, msg, sender) => {
                        let send_time = match Duration::from_std(send_instant.duration_since(begin_instant)) {
                            Ok(d) => begin_time + d,
                            Err(_) => Utc::now(),
                        };
                        let resp = store_outgoing(&conn, epoch, msg_seq_num, send_time, msg).await;
                        let _ = sender.send(resp);
                    }
                    StoreRequest::StoreIncoming(epoch, msg_seq_num, msg, sender) => {
                        let resp = store_incoming(&conn, epoch, msg_seq_num, msg).await;
                        let _ = sender.send(resp);
                    }
                    StoreRequest::GetPrevMessages(epoch, begin, end, last, sender) => {
                        let resp = get_prev_messages(&conn, epoch, begin, end, last).await;
                        let _ = sender.send(resp);
                    }
                    StoreRequest::GetSequences(epoch, sender) => {
                        let resp = get_sequences(&conn, epoch).await;
                        let _ = sender.send(resp);
                    }
                    StoreRequest::SetSequences(epoch, outgoing, incoming, sender) => {
                        let resp = set_sequences(&conn, epoch, outgoing, incoming).await;
                        let _ = sender.send(resp);
                    }
                    StoreRequest::LastSendTime(epoch, sender) => {
                        let resp = last_send_time(&conn, epoch).await;
                        let _ = sender.send(resp);
                    }
                    StoreRequest::Disconnect(sender) => {
                        let resp = vacuum(&conn).await;
                        let _ = sender.send(resp);
                        drop(conn);
                        break;
                    }
                }
            }
        });

        Ok(Store { sender })
    }

    pub async fn store_outgoing(
        &self,
        epoch: Arc<String>,
        msg_seq_num: u32,
        send_instant: Instant,
        msg: Arc<MsgBuf>,
    ) -> Result<()> {
        let (sender, receiver) = oneshot::channel();
        let req = StoreRequest::StoreOutgoing(epoch, msg_seq_num, send_instant, msg, sender);
        self.sender.send(req).map_err(channel_err)?;
        receiver.await.map_err(channel_err)?
    }

    pub async fn store_incoming(
        &self,
        epoch: Arc<String>,
        msg_seq_num: u32,
        msg: Arc<MsgBuf>,
    ) -> Result<()> {
        let (sender, receiver) = oneshot::channel();
        let req = StoreRequest::StoreIncoming(epoch, msg_seq_num, msg, sender);
        self.sender.send(req).map_err(channel_err)?;
        receiver.await.map_err(channel_err)?
    }

    pub async fn get_sequences(&self, epoch: Arc<String>) -> Result<(u32, u32)> {
        let (sender, receiver) = oneshot::channel();
        let req = StoreRequest::GetSequences(epoch, sender);
        self.sender.send(req).map_err(channel_err)?;
        receiver.await.map_err(channel_err)?
    }

    pub async fn get_prev_messages(
        &self,
        epoch: Arc<String>,
        begin: u32,
        end: u32,
        last: u32,
    ) -> Result<Vec<(u32, Vec<u8>)>> {
        let (sender, receiver) = oneshot::channel();
        let req = StoreRequest::GetPrevMessages(epoch, begin, end, last, sender);
        self.sender.send(req).map_err(channel_err)?;
        receiver.await.map_err(channel_err)?
    }

    pub async fn set_sequences(
        &self,
        epoch: Arc<String>,
        next_outgoing: u32,
        next_incoming: u32,
    ) -> Result<()> {
        let (sender, receiver) = oneshot::channel();
        let req = StoreRequest::SetSequences(epoch, next_outgoing, next_incoming, sender);
        self.sender.send(req).map_err(channel_err)?;
        let _ = receiver.await.map_err(channel_err)??;
        Ok(())
    }

    pub async fn last_send_time(
        &self,
        epoch: Arc<String>,
    ) -> Result<Option<DateTime<Utc>>> {
        let (sender, receiver) = oneshot::channel();
        let req = StoreRequest::LastSendTime(epoch, sender);
        self.sender.send(req).map_err(channel_err)?;
        receiver.await.map_err(channel_err)?
    }

    pub async fn disconnect(&self) -> Result<()> {
        let (sender, receiver) = oneshot::channel();
        let req = StoreRequest::Disconnect(sender);
        self.sender.send(req).map_err(channel_err)?;
        let _ = receiver.await.map_err(channel_err)??;
        Ok(())
    }
}

/// Maps a worker-thread SQLite error to [`JournalError`], recognizing the
/// `UNIQUE(epoch_guid, msg_seq_num)` violation as a duplicate-seq condition
/// rather than a generic I/O failure.
fn map_store_err(
    e: tokio_rusqlite::Error,
    session_key: &str,
    direction: Direction,
    msg_seq_num: u32,
) -> JournalError {
    match &e {
        tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            JournalError::DuplicateSeqNo {
                session_key: session_key.to_string(),
                direction,
                seq_no: msg_seq_num,
            }
        }
        _ => JournalError::IoError(anyhow::Error::new(e)),
    }
}

fn map_conn_err(e: tokio_rusqlite::Error) -> JournalError {
    JournalError::IoError(anyhow::Error::new(e))
}

async fn setup(conn: &tokio_rusqlite::Connection, epoch: Arc<String>) -> Result<(u32, u32)> {
    conn.call(move |conn| {
        conn.query_row(SQL_ENTER_WAL_MODE, (), |_| Ok(()))?;
        conn.execute(SQL_CREATE_SEQUENCES, ())?;
        conn.execute(SQL_ENSURE_SEQUENCE_ROW, (Arc::clone(&epoch),))?;
        conn.execute(SQL_CREATE_INCOMING_TABLE, ())?;
        conn.execute(SQL_CREATE_OUTGOING_TABLE, ())?;

        conn.query_row(
            "SELECT next_incoming, next_outgoing FROM sequences where epoch_guid = ?;",
            (Arc::clone(&epoch),),
            |r| {
                let next_incoming: u32 = r.get(0)?;
                let next_outgoing: u32 = r.get(1)?;
                Ok((next_incoming, next_outgoing))
            },
        )
    })
    .await
    .map_err(map_conn_err)
}

async fn vacuum(conn: &tokio_rusqlite::Connection) -> Result<()> {
    conn.call(move |conn| {
        conn.execute(SQL_VACUUM, [])
    })
    .await
    .map(|_| ())
    .map_err(map_conn_err)
}

async fn get_sequences(
    conn: &tokio_rusqlite::Connection,
    epoch: Arc<String>,
) -> Result<(u32, u32)> {
    conn.call(move |conn| {
        conn.query_row(
            "SELECT next_incoming, next_outgoing FROM sequences where epoch_guid = ?;",
            (Arc::clone(&epoch),),
            |r| {
                let next_incoming: u32 = r.get(0)?;
                let next_outgoing: u32 = r.get(1)?;
                Ok((next_incoming, next_outgoing))
            },
        )
    })
    .await
    .map_err(map_conn_err)
}

async fn set_sequences(
    conn: &tokio_rusqlite::Connection,
    epoch: Arc<String>,
    new_outgoing: u32,
    new_incoming: u32,
) -> Result<()> {
    conn.call(move |conn| {
        conn.execute(
            "UPDATE sequences SET next_outgoing = ?1, next_incoming = ?2 WHERE epoch_guid = ?3",
            (new_outgoing, new_incoming, Arc::clone(&epoch)),
        )
    })
    .await
    .map(|_| ())
    .map_err(map_conn_err)
}

async fn store_outgoing(
    conn: &tokio_rusqlite::Connection,
    epoch: Arc<String>,
    msg_seq_num: u32,
    send_time: DateTime<Utc>,
    msg: Arc<MsgBuf>,
) -> Result<()> {
    let session_key = epoch.to_string();
    conn.call(move |conn| {
        conn.execute(
            SQL_INSERT_OUTGOING_MESSAGE,
            (epoch, msg_seq_num, format!("{}", send_time.format(TIME_FORMAT)), &msg.as_ref()[..]),
        )
    })
    .await
    .map(|_| ())
    .map_err(|e| map_store_err(e, &session_key, Direction::Outgoing, msg_seq_num))
}

async fn store_incoming(
    conn: &tokio_rusqlite::Connection,
    epoch: Arc<String>,
    msg_seq_num: u32,
    msg: Arc<MsgBuf>,
) -> Result<()> {
    let session_key = epoch.to_string();
    conn.call(move |conn| conn.execute(SQL_INSERT_INCOMING_MESSAGE, (epoch, msg_seq_num, &msg.as_ref()[..])))
        .await
        .map(|_| ())
        .map_err(|e| map_store_err(e, &session_key, Direction::Incoming, msg_seq_num))
}

async fn get_prev_messages(
    conn: &tokio_rusqlite::Connection,
    epoch: Arc<String>,
    begin_seq_no: u32,
    end_seq_no: u32,
    last_seq_no: u32,
) -> Result<Vec<(u32, Vec<u8>)>> {
    let output: Vec<(u32, Vec<u8>)> = conn.call(move |conn| -> rusqlite::Result<Vec<(u32, Vec<u8>)>> {
        let mut output = Vec::new();
        let mut stmt = conn.prepare("SELECT msg_seq_num, message FROM (SELECT * FROM outgoing_messages WHERE epoch_guid = ?1 ORDER BY key DESC LIMIT ?2) WHERE msg_seq_num BETWEEN ?3 AND ?4;")?;
        let rows = stmt.query_map(
            rusqlite::params![Arc::clone(&epoch), &last_seq_no, &begin_seq_no, &end_seq_no], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
        for row in rows {
            output.push(row?);
        }
        Ok(output)
    }).await.map_err(map_conn_err)?;
    Ok(output)
}

async fn last_send_time(
    conn: &tokio_rusqlite::Connection,
    epoch: Arc<String>,
) -> Result<Option<DateTime<Utc>>> {
    let send_time = conn.call(move |conn| -> rusqlite::Result<Option<NaiveDateTime>> {
        conn.query_row(
           SQL_LAST_SEND_TIME,
           [epoch],
           |row| row.get(0)
        )
        .optional()
    }).await.map_err(map_conn_err)?;
    Ok(send_time.map(|n| n.and_utc()))
}
