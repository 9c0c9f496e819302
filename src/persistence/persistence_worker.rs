use super::{config_portal::ConfigPortal, session_client::SessionClient};
use color_eyre::Result;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{channel, Sender};
use tokio::sync::Mutex;
use tracing::error;

macro_rules! handle_action {
    ($action:expr, $response_tx:expr) => {
        if $response_tx.send($action.await).is_err() {
            error!("Failed to send response");
        }
    };
}

/// Owns the session client and serializes all session operations through a
/// worker task, so file I/O never runs on a caller's task.
pub struct PersistenceManager {
    tx: Sender<SessionAction>,
    session_client: Arc<Mutex<SessionClient>>,
    worker_handle: tokio::task::JoinHandle<()>,
    autosave_handle: tokio::task::JoinHandle<()>,
}

impl PersistenceManager {
    pub async fn new(base_path: PathBuf, autosave_seconds: u64) -> Result<Self> {
        let session_client = Arc::new(Mutex::new(
            SessionClient::load_last_session(base_path).await?,
        ));
        let worker_client = session_client.clone();
        let (tx, mut rx) = channel::<SessionAction>(32);

        let worker_handle = tokio::spawn(async move {
            while let Some(action) = rx.recv().await {
                match action {
                    SessionAction::SaveSession { name, response_tx } => {
                        handle_action!(
                            async { worker_client.lock().await.save_session(&name).await },
                            response_tx
                        );
                    }
                    SessionAction::LoadSession { name, response_tx } => {
                        handle_action!(
                            async { worker_client.lock().await.change_session(&name).await },
                            response_tx
                        );
                    }
                    SessionAction::SaveCurrentSession { response_tx } => {
                        handle_action!(
                            async { worker_client.lock().await.save_current_session().await },
                            response_tx
                        );
                    }
                    SessionAction::DeleteSession { name, response_tx } => {
                        handle_action!(
                            async { worker_client.lock().await.delete_session(&name).await },
                            response_tx
                        );
                    }
                    SessionAction::ListSessions { response_tx } => {
                        handle_action!(
                            async { worker_client.lock().await.list_sessions().await },
                            response_tx
                        );
                    }
                }
            }
        });

        let autosave_handle =
            SessionClient::start_autosave_task(session_client.clone(), autosave_seconds);

        Ok(Self {
            tx,
            session_client,
            worker_handle,
            autosave_handle,
        })
    }

    pub fn get_sender(&self) -> Sender<SessionAction> {
        self.tx.clone()
    }

    pub async fn get_cfg_portal(&self) -> Arc<ConfigPortal> {
        self.session_client.lock().await.get_portal_ref()
    }

    /// Saves the current session one last time and stops the worker tasks.
    pub async fn shutdown(self) -> Result<()> {
        let result = self.session_client.lock().await.save_current_session().await;
        self.autosave_handle.abort();
        self.worker_handle.abort();
        result
    }
}

// Action enum for the session worker
#[derive(Debug)]
pub enum SessionAction {
    SaveSession {
        name: String,
        response_tx: tokio::sync::oneshot::Sender<Result<()>>,
    },
    LoadSession {
        name: String,
        response_tx: tokio::sync::oneshot::Sender<Result<()>>,
    },
    SaveCurrentSession {
        response_tx: tokio::sync::oneshot::Sender<Result<()>>,
    },
    DeleteSession {
        name: String,
        response_tx: tokio::sync::oneshot::Sender<Result<()>>,
    },
    ListSessions {
        response_tx: tokio::sync::oneshot::Sender<Result<HashMap<String, PathBuf>>>,
    },
}
