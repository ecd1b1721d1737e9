//! Activation handle and message loop of a connection actor.
//!
//! A `ConnectionActivation` is the part of an activation shared with
//! callers. Commands that mutate the actor go through its bounded mailbox
//! and are processed one at a time by [`run_message_loop`]. `send` does not:
//! it runs on the caller's task against atomics and a server-id snapshot, so
//! many sends to the same connection proceed concurrently.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::{mpsc, oneshot, watch};

use crate::error::BackplaneError;
use crate::pubsub::{StreamEvent, StreamProvider, Topic};

use super::actor::{ConnectionActor, ATTEMPTS_LIMIT_REACHED};
use super::catalog::CatalogInner;
use super::key::{ConnectionKey, ServerId};
use super::lifecycle::{ActivationState, DeactivationReason};
use super::message::{ClientMessage, InvocationMessage};

/// Commands processed by the message loop, in arrival order.
#[derive(Debug)]
pub(crate) enum ConnectionCommand {
    /// Bind to a server.
    Connect {
        server_id: ServerId,
        reply: oneshot::Sender<Result<(), BackplaneError>>,
    },

    /// Tear the connection down.
    Disconnect {
        reason: Option<String>,
        reply: oneshot::Sender<Result<(), BackplaneError>>,
    },

    /// A server announced its disconnection.
    ServerDisconnected { server_id: ServerId },

    /// Leave memory. The loop exits after handling this command.
    Deactivate {
        reason: DeactivationReason,
        done: Option<oneshot::Sender<()>>,
    },
}

/// Shared side of one activation.
///
/// # Fields
///
/// - `id`: distinguishes successive activations of the same key
/// - `state`: lifecycle, observable by callers waiting for `Valid`
/// - `server_id`: snapshot of the record's server id for `send`
/// - `fail_attempts`: consecutive sends that found no server
/// - `disconnected`: set by a disconnect, cleared by a connect or a miss
/// - `touches`: bumped by every `send`, read by the idle check
pub(crate) struct ConnectionActivation {
    id: u64,
    key: ConnectionKey,
    mailbox: mpsc::Sender<ConnectionCommand>,
    state: watch::Sender<ActivationState>,
    server_id: watch::Sender<Option<ServerId>>,
    fail_attempts: AtomicU32,
    disconnected: AtomicBool,
    touches: AtomicU64,
    activation_error: OnceLock<String>,
    max_fail_attempts: u32,
    pubsub: Arc<dyn StreamProvider>,
}

impl ConnectionActivation {
    pub(crate) fn new(
        id: u64,
        key: ConnectionKey,
        mailbox: mpsc::Sender<ConnectionCommand>,
        max_fail_attempts: u32,
        pubsub: Arc<dyn StreamProvider>,
    ) -> Self {
        Self {
            id,
            key,
            mailbox,
            state: watch::Sender::new(ActivationState::Creating),
            server_id: watch::Sender::new(None),
            fail_attempts: AtomicU32::new(0),
            disconnected: AtomicBool::new(false),
            touches: AtomicU64::new(0),
            activation_error: OnceLock::new(),
            max_fail_attempts,
            pubsub,
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub(crate) fn state(&self) -> ActivationState {
        *self.state.borrow()
    }

    /// Transition the lifecycle state.
    ///
    /// ```text
    /// Creating → Activating
    /// Activating → Valid | Deactivating (activation failed)
    /// Valid → Deactivating
    /// Deactivating → Invalid
    /// ```
    ///
    /// Invalid transitions are logged and ignored.
    pub(crate) fn set_state(&self, next: ActivationState) {
        let key = &self.key;
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                tracing::warn!(
                    "Invalid state transition for {}: {:?} -> {:?}",
                    key,
                    current,
                    next
                );
                false
            }
        });
    }

    /// Record why activation failed and start deactivating.
    pub(crate) fn fail(&self, error: &BackplaneError) {
        let _ = self.activation_error.set(error.to_string());
        self.set_state(ActivationState::Deactivating);
    }

    pub(crate) fn server_id(&self) -> Option<ServerId> {
        *self.server_id.borrow()
    }

    pub(crate) fn set_server_id(&self, server_id: Option<ServerId>) {
        self.server_id.send_replace(server_id);
    }

    pub(crate) fn fail_attempts(&self) -> u32 {
        self.fail_attempts.load(Ordering::SeqCst)
    }

    pub(crate) fn reset_fail_attempts(&self) {
        self.fail_attempts.store(0, Ordering::SeqCst);
    }

    /// Whether the last disconnect has not been followed by a connect or a
    /// miss.
    pub(crate) fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    pub(crate) fn set_disconnected(&self, disconnected: bool) {
        self.disconnected.store(disconnected, Ordering::SeqCst);
    }

    pub(crate) fn touches(&self) -> u64 {
        self.touches.load(Ordering::Relaxed)
    }

    /// Enqueue a command without waiting for it to be processed.
    pub(crate) async fn enqueue(&self, command: ConnectionCommand) -> Result<(), BackplaneError> {
        self.mailbox
            .send(command)
            .await
            .map_err(|_| self.stopped())
    }

    pub(crate) async fn connect(&self, server_id: ServerId) -> Result<(), BackplaneError> {
        self.wait_until_valid().await?;
        let (reply, rx) = oneshot::channel();
        self.enqueue(ConnectionCommand::Connect { server_id, reply })
            .await?;
        rx.await.map_err(|_| self.stopped())?
    }

    pub(crate) async fn disconnect(&self, reason: Option<String>) -> Result<(), BackplaneError> {
        self.wait_until_valid().await?;
        let (reply, rx) = oneshot::channel();
        self.enqueue(ConnectionCommand::Disconnect { reason, reply })
            .await?;
        rx.await.map_err(|_| self.stopped())?
    }

    /// Route `message` to the bound server, or count a miss.
    ///
    /// Runs on the caller's task. Reaching the attempts limit disconnects
    /// the connection through the mailbox and waits for it.
    pub(crate) async fn send(&self, message: InvocationMessage) -> Result<(), BackplaneError> {
        self.wait_until_valid().await?;
        self.touches.fetch_add(1, Ordering::Relaxed);

        match self.server_id() {
            Some(server_id) => {
                tracing::debug!(
                    "Routing {} for {} to server {}",
                    message.target,
                    self.key,
                    server_id
                );
                let event = StreamEvent::Message(ClientMessage {
                    hub_name: self.key.hub_type().to_string(),
                    connection_id: self.key.connection_id().to_string(),
                    payload: message,
                });
                self.pubsub
                    .publish(&Topic::server_stream(server_id), event)
                    .await?;
                self.reset_fail_attempts();
                Ok(())
            }
            None => {
                // A miss after a disconnect counts as on a fresh connection.
                self.set_disconnected(false);
                let attempts = self.fail_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::info!(
                    "Client not connected for connectionId '{}' and hub '{}' ({}/{})",
                    self.key.connection_id(),
                    self.key.hub_type(),
                    attempts,
                    self.max_fail_attempts
                );
                if attempts >= self.max_fail_attempts {
                    tracing::warn!(
                        "Force disconnecting client {} after {} failed attempts",
                        self.key,
                        attempts
                    );
                    self.disconnect(Some(ATTEMPTS_LIMIT_REACHED.to_string()))
                        .await?;
                }
                Ok(())
            }
        }
    }

    /// Wait until the activation has finished activating.
    pub(crate) async fn wait_until_valid(&self) -> Result<(), BackplaneError> {
        let mut rx = self.state.subscribe();
        let state = match rx
            .wait_for(|state| {
                !matches!(state, ActivationState::Creating | ActivationState::Activating)
            })
            .await
        {
            Ok(state) => *state,
            Err(_) => return Err(self.stopped()),
        };

        if state.can_process_messages() {
            return Ok(());
        }
        match self.activation_error.get() {
            Some(error) => Err(BackplaneError::ActivationFailed(format!(
                "{}: {}",
                self.key, error
            ))),
            None => Err(self.stopped()),
        }
    }

    fn stopped(&self) -> BackplaneError {
        BackplaneError::ActorStopped(self.key.to_string())
    }
}

impl std::fmt::Debug for ConnectionActivation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionActivation")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("state", &self.state())
            .field("server_id", &self.server_id())
            .field("fail_attempts", &self.fail_attempts())
            .finish()
    }
}

/// Message loop of one activation.
///
/// Activates the actor, then processes mailbox commands one at a time until
/// a `Deactivate` command arrives or the activation stays idle for too long.
/// Idle means no command and no `send` within the linger period: the idle
/// timeout normally, the shorter deactivation delay once disconnected.
///
/// # Exit
///
/// 1. State moves to `Deactivating` and the activation leaves the catalog
/// 2. The mailbox is closed; commands still queued are forwarded to a fresh
///    activation, or dropped on node shutdown
/// 3. State moves to `Invalid`
///
/// The durable record and the pub/sub subscription outlive the activation.
///
/// # Orleans Pattern
///
/// Adapts `RunMessageLoop()` with collection on idle: the next access to the
/// same key triggers a fresh activation that reloads the record.
pub(crate) async fn run_message_loop(
    activation: Arc<ConnectionActivation>,
    mut mailbox: mpsc::Receiver<ConnectionCommand>,
    catalog: Arc<CatalogInner>,
) {
    let key = activation.key().clone();
    tracing::info!("Message loop started: {}", key);

    activation.set_state(ActivationState::Activating);
    let actor = ConnectionActor::activate(
        activation.clone(),
        catalog.store(),
        catalog.pubsub(),
        Arc::downgrade(&catalog),
    )
    .await;

    let mut actor = match actor {
        Ok(actor) => actor,
        Err(e) => {
            tracing::error!("Activation failed for {}: {}", key, e);
            activation.fail(&e);
            finish(
                &activation,
                mailbox,
                &catalog,
                DeactivationReason::ActivationFailed,
                None,
            )
            .await;
            return;
        }
    };

    activation.set_state(ActivationState::Valid);
    tracing::debug!("Activated: {} (activation {})", key, activation.id());

    let idle_timeout = catalog.config().idle_timeout();
    let deactivation_delay = catalog.config().deactivation_delay();
    let mut seen_touches = activation.touches();
    let mut pending_done = None;

    let reason = loop {
        let linger = if activation.is_disconnected() {
            deactivation_delay
        } else {
            idle_timeout
        };

        tokio::select! {
            command = mailbox.recv() => {
                let Some(command) = command else {
                    tracing::info!("Mailbox closed for: {}", key);
                    break DeactivationReason::NodeShutdown;
                };

                match command {
                    ConnectionCommand::Connect { server_id, reply } => {
                        let result = actor.connect(server_id).await;
                        if let Err(e) = &result {
                            tracing::warn!("Connect failed for {}: {}", key, e);
                        }
                        let _ = reply.send(result);
                    }
                    ConnectionCommand::Disconnect { reason, reply } => {
                        let result = actor.disconnect(reason.as_deref()).await;
                        if let Err(e) = &result {
                            tracing::warn!("Disconnect failed for {}: {}", key, e);
                        }
                        let _ = reply.send(result);
                    }
                    ConnectionCommand::ServerDisconnected { server_id } => {
                        if let Err(e) = actor.on_server_disconnected(server_id).await {
                            tracing::error!(
                                "Handling disconnection of server {} failed for {}: {}",
                                server_id,
                                key,
                                e
                            );
                        }
                    }
                    ConnectionCommand::Deactivate { reason, done } => {
                        pending_done = done;
                        break reason;
                    }
                }
            }

            _ = tokio::time::sleep(linger) => {
                let touches = activation.touches();
                if touches != seen_touches {
                    seen_touches = touches;
                    continue;
                }
                break if activation.is_disconnected() {
                    DeactivationReason::Disconnected
                } else {
                    DeactivationReason::IdleTimeout
                };
            }
        }
    };

    activation.set_state(ActivationState::Deactivating);
    finish(&activation, mailbox, &catalog, reason, pending_done).await;
}

async fn finish(
    activation: &Arc<ConnectionActivation>,
    mut mailbox: mpsc::Receiver<ConnectionCommand>,
    catalog: &Arc<CatalogInner>,
    reason: DeactivationReason,
    done: Option<oneshot::Sender<()>>,
) {
    let key = activation.key().clone();
    tracing::info!("Deactivating: {} ({:?})", key, reason);

    catalog.remove(activation);

    mailbox.close();
    while let Ok(command) = mailbox.try_recv() {
        match command {
            ConnectionCommand::Deactivate { done, .. } => {
                if let Some(done) = done {
                    let _ = done.send(());
                }
            }
            command
                if matches!(
                    reason,
                    DeactivationReason::NodeShutdown | DeactivationReason::ActivationFailed
                ) =>
            {
                tracing::debug!("Dropping {:?} for {} ({:?})", command, key, reason);
            }
            command => catalog.forward(&key, command).await,
        }
    }

    activation.set_state(ActivationState::Invalid);
    if let Some(done) = done {
        let _ = done.send(());
    }
    tracing::info!("Message loop exited: {}", key);
}
