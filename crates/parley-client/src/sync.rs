//! The synchronization orchestrator.
//!
//! [`ChatClient`] is the composition root and the action surface the UI
//! calls into.  It decides, per channel, whether to serve messages from the
//! local cache, fetch incrementally, or reload wholesale; it sequences the
//! session bootstrap; and it owns every debounce/guard map for its lifetime
//! (there is no global state anywhere in the engine).
//!
//! Every store mutation for messages is idempotent, so the cache-merge,
//! incremental-fetch, and live-socket paths can interleave freely without
//! producing duplicates.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use parley_net::{ChatSocket, SocketConfig};
use parley_shared::auth::AuthProvider;
use parley_shared::constants::{MARK_READ_DEBOUNCE, MARK_READ_RETRY_DELAY};
use parley_shared::{Channel, ChannelId, ClientFrame, Message, MessageId, RetryPolicy};
use parley_store::Database;

use crate::api::{ApiError, ChannelDraft, ChatApi, HttpChatApi, NewMessage};
use crate::config::ClientConfig;
use crate::events::spawn_event_pump;
use crate::persist::spawn_cache_persister;
use crate::reducer::ChatAction;
use crate::store::ChatStore;
use crate::transport::Transport;

/// The client engine: state store, cache, transport, and REST API wired
/// together behind one action surface.
pub struct ChatClient {
    store: Arc<ChatStore>,
    api: Arc<dyn ChatApi>,
    transport: Arc<dyn Transport>,
    db: Arc<Mutex<Database>>,
    config: ClientConfig,

    /// Channels with a message load in flight; a second load for the same
    /// channel is dropped instead of racing.
    loading: Mutex<HashSet<ChannelId>>,
    /// Channels already fully refreshed from the server this session.
    refreshed: Mutex<HashSet<ChannelId>>,
    /// Pending read-receipt timers keyed by (channel, message-or-latest).
    read_receipts: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    /// Background pumps (socket events, cache persister).
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChatClient {
    /// Wire the engine from explicitly injected collaborators.
    ///
    /// Must be called inside a tokio runtime: the constructor spawns the
    /// socket event pump and the cache persister.
    pub fn new(
        config: ClientConfig,
        api: Arc<dyn ChatApi>,
        transport: Arc<dyn Transport>,
        db: Database,
    ) -> Self {
        let store = Arc::new(ChatStore::new());
        let db = Arc::new(Mutex::new(db));

        let pump = spawn_event_pump(Arc::clone(&store), Arc::clone(&transport));
        let persister = spawn_cache_persister(Arc::clone(&store), Arc::clone(&db));

        Self {
            store,
            api,
            transport,
            db,
            config,
            loading: Mutex::new(HashSet::new()),
            refreshed: Mutex::new(HashSet::new()),
            read_receipts: Arc::new(Mutex::new(HashMap::new())),
            tasks: Mutex::new(vec![pump, persister]),
        }
    }

    /// Wire the engine with the default collaborators: the platform database,
    /// the reqwest REST client, and a [`ChatSocket`] for the realtime side.
    pub fn with_defaults(
        config: ClientConfig,
        auth: Arc<dyn AuthProvider>,
    ) -> parley_store::Result<Self> {
        let db = Database::new()?;
        let api = Arc::new(HttpChatApi::new(config.rest_url.clone(), Arc::clone(&auth)));
        let socket = Arc::new(ChatSocket::new(
            SocketConfig::new(config.socket_url.clone()),
            auth,
        ));
        Ok(Self::new(config, api, socket, db))
    }

    /// The observable state store; the UI reads state and subscribes here.
    pub fn store(&self) -> &Arc<ChatStore> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Bootstrap
    // -----------------------------------------------------------------------

    /// Session bootstrap: identity sync → realtime connect → channel list →
    /// users + invitation count in parallel → restore the remembered channel.
    ///
    /// Every step is isolated: one failing does not abort the others.  Only
    /// a failing channel-list fetch is surfaced to the user (and returned),
    /// because nothing below it can render without channels.
    pub async fn load_channels(&self) -> Result<(), ApiError> {
        if let Err(e) = self.api.sync_identity(&self.config.profile).await {
            warn!(error = %e, "identity sync failed");
        }

        if let Err(e) = self.transport.connect().await {
            warn!(error = %e, "realtime connect failed, continuing with REST only");
        }

        let channels = match self.api.fetch_channels().await {
            Ok(channels) => channels,
            Err(e) => {
                self.surface_error("Failed to load channels");
                return Err(e);
            }
        };
        info!(count = channels.len(), "channels loaded");
        self.store
            .dispatch(ChatAction::SetChannels(channels.clone()));

        let (users, invitations) = tokio::join!(
            self.api.fetch_users(),
            self.api.pending_invitation_count()
        );
        match users {
            Ok(users) => self.store.dispatch(ChatAction::SetUsers(users)),
            Err(e) => warn!(error = %e, "user list load failed"),
        }
        match invitations {
            Ok(count) => self
                .store
                .dispatch(ChatAction::SetPendingInvitations(count)),
            Err(e) => warn!(error = %e, "invitation count load failed"),
        }

        let remembered = self.locked(&self.db).last_selected_channel();
        if let Some(channel_id) = remembered {
            if channels.iter().any(|c| c.id == channel_id) {
                self.store
                    .dispatch(ChatAction::SetCurrentChannel(Some(channel_id)));
                self.load_messages(channel_id, true).await;
            }
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Message loading
    // -----------------------------------------------------------------------

    /// Load a channel's messages.
    ///
    /// Serving order: in-memory state (when already refreshed this session),
    /// then cache-then-reconcile, then a fresh fetch.  The cached list is
    /// published immediately for a fast paint; the incremental fetch and the
    /// full refresh that follow are best-effort and never take the paint
    /// back.
    pub async fn load_messages(&self, channel_id: ChannelId, force: bool) {
        if !self.locked(&self.loading).insert(channel_id) {
            debug!(channel = %channel_id, "message load already in flight");
            return;
        }
        self.load_messages_inner(channel_id, force).await;
        self.locked(&self.loading).remove(&channel_id);
    }

    async fn load_messages_inner(&self, channel_id: ChannelId, force: bool) {
        if !force {
            let already_loaded = self
                .store
                .with_state(|s| !s.channel_messages(channel_id).is_empty());
            if already_loaded && self.locked(&self.refreshed).contains(&channel_id) {
                return;
            }
        }

        let cached = if force {
            Vec::new()
        } else {
            self.locked(&self.db)
                .load_message_cache()
                .remove(&channel_id)
                .unwrap_or_default()
        };

        if !cached.is_empty() {
            let last_cached = cached.last().map(|m| m.id);

            // Fast paint from cache; everything after this is reconciliation.
            self.store.dispatch(ChatAction::SetMessages {
                channel_id,
                messages: cached,
            });

            if let Some(after) = last_cached {
                match self.api.fetch_messages_after(channel_id, after).await {
                    Ok(fresh) => {
                        for message in fresh {
                            self.store.dispatch(ChatAction::AddMessage(message));
                        }
                    }
                    Err(e) => warn!(channel = %channel_id, error = %e, "incremental fetch failed"),
                }
            }

            // Full refresh picks up server-side mutations the incremental
            // fetch cannot see (edited thread counts, reactions).
            match self
                .api
                .fetch_latest_messages(channel_id, self.config.page_size)
                .await
            {
                Ok(latest) => {
                    self.store.dispatch(ChatAction::SetMessages {
                        channel_id,
                        messages: latest,
                    });
                    self.locked(&self.refreshed).insert(channel_id);
                }
                Err(e) => warn!(channel = %channel_id, error = %e, "metadata refresh failed"),
            }
        } else {
            match self
                .api
                .fetch_latest_messages(channel_id, self.config.page_size)
                .await
            {
                Ok(latest) => {
                    self.store.dispatch(ChatAction::SetMessages {
                        channel_id,
                        messages: latest,
                    });
                    self.locked(&self.refreshed).insert(channel_id);
                }
                Err(e) => warn!(channel = %channel_id, error = %e, "message load failed"),
            }
        }
    }

    /// Select a channel: remember it, load its messages, and schedule a
    /// read receipt for its newest message.
    pub async fn select_channel(&self, channel_id: ChannelId) {
        self.store
            .dispatch(ChatAction::SetCurrentChannel(Some(channel_id)));
        self.store
            .dispatch(ChatAction::ClearChannelUnread(channel_id));
        if let Err(e) = self.locked(&self.db).set_last_selected_channel(channel_id) {
            warn!(error = %e, "failed to remember selected channel");
        }
        self.load_messages(channel_id, false).await;
        self.mark_as_read(channel_id, None);
    }

    // -----------------------------------------------------------------------
    // Read receipts
    // -----------------------------------------------------------------------

    /// Schedule a debounced read receipt.
    ///
    /// Keyed by (channel, message-or-latest): a key already pending is
    /// skipped.  The receipt goes out after the debounce window and is
    /// retried once on transient (5xx/timeout) failures; anything else is
    /// logged and dropped.
    pub fn mark_as_read(&self, channel_id: ChannelId, message_id: Option<MessageId>) {
        let key = match message_id {
            Some(id) => format!("{channel_id}:{id}"),
            None => format!("{channel_id}:latest"),
        };

        let mut pending = self.locked(&self.read_receipts);
        pending.retain(|_, timer| !timer.is_finished());
        if pending.contains_key(&key) {
            debug!(key = %key, "read receipt already pending");
            return;
        }

        let api = Arc::clone(&self.api);
        let receipts = Arc::clone(&self.read_receipts);
        let task_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(MARK_READ_DEBOUNCE).await;

            let policy = RetryPolicy::new(2, MARK_READ_RETRY_DELAY);
            let result = policy
                .run(
                    || api.mark_read(channel_id, message_id),
                    ApiError::is_transient,
                )
                .await;
            if let Err(e) = result {
                warn!(channel = %channel_id, error = %e, "read receipt failed");
            }

            let mut pending = match receipts.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            pending.remove(&task_key);
        });
        pending.insert(key, timer);
    }

    // -----------------------------------------------------------------------
    // User-facing operations
    // -----------------------------------------------------------------------

    pub async fn send_message(
        &self,
        channel_id: ChannelId,
        draft: NewMessage,
    ) -> Result<Message, ApiError> {
        match self.api.send_message(channel_id, &draft).await {
            Ok(message) => {
                self.store.dispatch(ChatAction::AddMessage(message.clone()));
                Ok(message)
            }
            Err(e) => {
                self.surface_error("Failed to send message");
                Err(e)
            }
        }
    }

    pub async fn update_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        content: &str,
    ) -> Result<Message, ApiError> {
        match self.api.update_message(channel_id, message_id, content).await {
            Ok(message) => {
                self.store
                    .dispatch(ChatAction::UpdateMessage(message.clone()));
                Ok(message)
            }
            Err(e) => {
                self.surface_error("Failed to edit message");
                Err(e)
            }
        }
    }

    pub async fn delete_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
    ) -> Result<(), ApiError> {
        match self.api.delete_message(channel_id, message_id).await {
            Ok(()) => {
                self.store.dispatch(ChatAction::RemoveMessage {
                    channel_id,
                    message_id,
                });
                Ok(())
            }
            Err(e) => {
                self.surface_error("Failed to delete message");
                Err(e)
            }
        }
    }

    pub async fn create_channel(&self, draft: ChannelDraft) -> Result<Channel, ApiError> {
        match self.api.create_channel(&draft).await {
            Ok(channel) => {
                self.store.dispatch(ChatAction::AddChannel(channel.clone()));
                Ok(channel)
            }
            Err(e) => {
                self.surface_error("Failed to create channel");
                Err(e)
            }
        }
    }

    pub async fn update_channel(
        &self,
        channel_id: ChannelId,
        draft: ChannelDraft,
    ) -> Result<Channel, ApiError> {
        match self.api.update_channel(channel_id, &draft).await {
            Ok(channel) => {
                self.store
                    .dispatch(ChatAction::UpdateChannel(channel.clone()));
                Ok(channel)
            }
            Err(e) => {
                self.surface_error("Failed to update channel");
                Err(e)
            }
        }
    }

    pub async fn delete_channel(&self, channel_id: ChannelId) -> Result<(), ApiError> {
        match self.api.delete_channel(channel_id).await {
            Ok(()) => {
                self.store.dispatch(ChatAction::RemoveChannel(channel_id));
                Ok(())
            }
            Err(e) => {
                self.surface_error("Failed to delete channel");
                Err(e)
            }
        }
    }

    pub async fn join_channel(&self, channel_id: ChannelId) -> Result<Channel, ApiError> {
        match self.api.join_channel(channel_id).await {
            Ok(channel) => {
                self.store.dispatch(ChatAction::AddChannel(channel.clone()));
                Ok(channel)
            }
            Err(e) => {
                self.surface_error("Failed to join channel");
                Err(e)
            }
        }
    }

    pub async fn leave_channel(&self, channel_id: ChannelId) -> Result<(), ApiError> {
        match self.api.leave_channel(channel_id).await {
            Ok(()) => {
                self.store.dispatch(ChatAction::RemoveChannel(channel_id));
                Ok(())
            }
            Err(e) => {
                self.surface_error("Failed to leave channel");
                Err(e)
            }
        }
    }

    pub async fn add_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<(), ApiError> {
        match self.api.add_reaction(channel_id, message_id, emoji).await {
            Ok(message) => {
                self.store.dispatch(ChatAction::UpdateMessage(message));
                Ok(())
            }
            Err(e) => {
                self.surface_error("Failed to add reaction");
                Err(e)
            }
        }
    }

    pub async fn remove_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<(), ApiError> {
        match self.api.remove_reaction(channel_id, message_id, emoji).await {
            Ok(message) => {
                self.store.dispatch(ChatAction::UpdateMessage(message));
                Ok(())
            }
            Err(e) => {
                self.surface_error("Failed to remove reaction");
                Err(e)
            }
        }
    }

    /// Fetch a thread's replies; they are regular channel messages, so they
    /// land in the store through the idempotent add path.
    pub async fn load_thread_messages(&self, root: MessageId) -> Result<Vec<Message>, ApiError> {
        let messages = self.api.fetch_thread_messages(root).await?;
        for message in &messages {
            self.store
                .dispatch(ChatAction::AddMessage(message.clone()));
        }
        Ok(messages)
    }

    pub async fn accept_invitation(&self, invitation_id: i64) -> Result<Channel, ApiError> {
        match self.api.accept_invitation(invitation_id).await {
            Ok(channel) => {
                self.store.dispatch(ChatAction::AddChannel(channel.clone()));
                let pending = self.store.with_state(|s| s.pending_invitations);
                self.store
                    .dispatch(ChatAction::SetPendingInvitations(pending.saturating_sub(1)));
                Ok(channel)
            }
            Err(e) => {
                self.surface_error("Failed to accept invitation");
                Err(e)
            }
        }
    }

    pub async fn decline_invitation(&self, invitation_id: i64) -> Result<(), ApiError> {
        match self.api.decline_invitation(invitation_id).await {
            Ok(()) => {
                let pending = self.store.with_state(|s| s.pending_invitations);
                self.store
                    .dispatch(ChatAction::SetPendingInvitations(pending.saturating_sub(1)));
                Ok(())
            }
            Err(e) => {
                self.surface_error("Failed to decline invitation");
                Err(e)
            }
        }
    }

    /// Typing notifications ride the socket: at-most-once control events,
    /// dropped when disconnected.
    pub async fn start_typing(&self, channel_id: ChannelId, thread_root: Option<MessageId>) {
        self.transport
            .send(ClientFrame::typing_start(channel_id, thread_root))
            .await;
    }

    pub async fn stop_typing(&self, channel_id: ChannelId, thread_root: Option<MessageId>) {
        self.transport
            .send(ClientFrame::typing_stop(channel_id, thread_root))
            .await;
    }

    /// User-initiated reconnect after a terminal connection failure.
    pub async fn retry_connect(&self) -> Result<(), parley_net::SocketError> {
        self.transport.connect().await
    }

    /// Clear the surfaced error once the UI has shown it.
    pub fn clear_error(&self) {
        self.store.dispatch(ChatAction::ClearError);
    }

    /// Disconnect, stop all background tasks, and flush the cache once.
    pub async fn shutdown(&self) {
        self.transport.disconnect().await;

        for task in self.locked(&self.tasks).drain(..) {
            task.abort();
        }
        for (_, timer) in self.locked(&self.read_receipts).drain() {
            timer.abort();
        }

        let snapshot = self.store.snapshot_messages();
        if let Err(e) = self.locked(&self.db).save_message_cache(&snapshot) {
            warn!(error = %e, "final cache flush failed");
        }
    }

    fn surface_error(&self, message: &str) {
        self.store.dispatch(ChatAction::SetError(message.into()));
    }

    fn locked<'a, T>(&self, mutex: &'a Mutex<T>) -> MutexGuard<'a, T> {
        match mutex.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
