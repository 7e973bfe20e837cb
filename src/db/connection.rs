use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex, PoisonError},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::schema::ensure_schema;

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum Request {
    Run(Job),
    Stop,
}

/// The thread that owns the SQLite connection and its request queue.
struct StoreWorker {
    queue: mpsc::Sender<Request>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl StoreWorker {
    fn spawn(db_path: PathBuf) -> Result<Self> {
        let (queue, requests) = mpsc::channel::<Request>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let thread = thread::Builder::new()
            .name("scanlab-db".into())
            .spawn(move || match open_connection(&db_path) {
                Ok(mut conn) => {
                    if ready_tx.send(Ok(())).is_err() {
                        error!("DB initialization receiver dropped before ready signal");
                        return;
                    }
                    serve(&mut conn, requests);
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })
            .context("failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        Ok(Self {
            queue,
            thread: Mutex::new(Some(thread)),
        })
    }
}

impl Drop for StoreWorker {
    fn drop(&mut self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if let Err(err) = self.queue.send(Request::Stop) {
                error!("Failed to send stop to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

fn open_connection(db_path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(db_path).context("failed to open SQLite database")?;

    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        error!("Failed to enable WAL mode: {err}");
    }
    ensure_schema(&mut conn).context("failed to prepare database schema")?;

    Ok(conn)
}

/// Runs jobs in arrival order until a stop request or every sender is gone.
fn serve(conn: &mut Connection, requests: mpsc::Receiver<Request>) {
    for request in requests {
        match request {
            Request::Run(job) => job(conn),
            Request::Stop => break,
        }
    }
    debug!("Database thread shutting down");
}

/// Handle to the SQLite scan store.
///
/// One worker thread owns the connection and runs submitted jobs in order,
/// so every read, write and delete is serialized against the same handle.
/// Clones share the worker.
#[derive(Clone)]
pub struct Database {
    worker: Arc<StoreWorker>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let worker = StoreWorker::spawn(db_path.clone())?;
        info!("Database initialized at {}", db_path.display());

        Ok(Self {
            worker: Arc::new(worker),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    /// Queue `job` on the worker and wait for its result.
    pub async fn execute<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        let request = Request::Run(Box::new(move |conn| {
            if reply_tx.send(job(conn)).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        self.worker
            .queue
            .send(request)
            .map_err(|err| anyhow!("failed to send job to DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }
}
