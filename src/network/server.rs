//! WebSocket Throne Server
//!
//! Async WebSocket server for the collaborator peers. Authenticates each
//! connection, routes gateway game events into the submission pipeline
//! and the admin console, and answers front-end queries from the ledger.
//!
//! Broadcast directives after a commit are best-effort: they are queued to
//! every connected gateway peer, and a failed queue is logged, never
//! propagated - the ledger commit behind the directive already happened.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, instrument, warn};

use crate::game::admin::AdminConsole;
use crate::game::pipeline::{
    PaymentOutcome, PhotoOutcome, PrivacyOutcome, SubmissionPipeline,
};
use crate::moderation::provider::ModerationProvider;
use crate::network::auth::{validate_peer, AuthConfig};
use crate::network::files::{validate_ref, PhotoStore};
use crate::network::protocol::{
    ClientMessage, ErrorCode, PeerRole, PromptKind, ServerError, ServerMessage,
    SubmissionReply, ThroneView,
};
use crate::network::rate::RateLimiter;
use crate::CAPTION_MAX_CHARS;

/// Most entries a single hall-of-fame query may ask for.
const TOP_QUERY_CAP: u32 = 100;

/// Entries served when a hall-of-fame query names no limit.
const TOP_QUERY_DEFAULT: u32 = 10;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Peer authentication settings.
    pub auth: AuthConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("static addr"),
            max_connections: 1000,
            auth: AuthConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Throne server errors.
#[derive(Debug, thiserror::Error)]
pub enum ThroneServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Connected peer state.
struct ConnectedPeer {
    /// Token subject (after a successful Hello).
    client_key: Option<String>,
    /// Accepted role (after a successful Hello).
    role: Option<PeerRole>,
    /// Connection time.
    #[allow(dead_code)]
    connected_at: Instant,
    /// Outbound queue to this peer.
    sender: mpsc::Sender<ServerMessage>,
}

/// Everything the connection tasks share.
struct Shared<M, F> {
    config: ServerConfig,
    pipeline: SubmissionPipeline<M, F>,
    console: AdminConsole,
    limiter: RateLimiter,
    peers: RwLock<BTreeMap<SocketAddr, ConnectedPeer>>,
}

/// The throne server. Generic over the moderation provider and photo
/// store so tests can run the full routing without collaborators.
pub struct ThroneServer<M, F> {
    shared: Arc<Shared<M, F>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl<M: ModerationProvider, F: PhotoStore> ThroneServer<M, F> {
    /// Create a new throne server.
    pub fn new(
        config: ServerConfig,
        pipeline: SubmissionPipeline<M, F>,
        console: AdminConsole,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            shared: Arc::new(Shared {
                config,
                pipeline,
                console,
                limiter: RateLimiter::frontend_default(),
                peers: RwLock::new(BTreeMap::new()),
            }),
            shutdown_tx,
        }
    }

    /// Run the server.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), ThroneServerError> {
        let listener = TcpListener::bind(&self.shared.config.bind_addr).await?;
        info!("Throne server listening on {}", self.shared.config.bind_addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let peer_count = self.shared.peers.read().await.len();
                            if peer_count >= self.shared.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let shared = self.shared.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(64);

            shared.register_peer(addr, msg_tx.clone()).await;

            // Outbound queue drain
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(err_msg(
                                            ErrorCode::InvalidInput,
                                            "Invalid message format",
                                        )).await;
                                        continue;
                                    }
                                };

                                for reply in shared.dispatch(addr, client_msg).await {
                                    let _ = msg_tx.send(reply).await;
                                }
                            }
                            Some(Ok(Message::Ping(_))) => {
                                let _ = msg_tx.send(ServerMessage::Pong {
                                    timestamp: 0,
                                    server_time: now_millis(),
                                }).await;
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Peer {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                error!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "Server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            sender_task.abort();
            shared.peers.write().await.remove(&addr);
            info!("Peer {} cleaned up", addr);
        });
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get active connection count.
    pub async fn connection_count(&self) -> usize {
        self.shared.peers.read().await.len()
    }

    #[cfg(test)]
    fn shared(&self) -> &Arc<Shared<M, F>> {
        &self.shared
    }
}

impl<M: ModerationProvider, F: PhotoStore> Shared<M, F> {
    async fn register_peer(&self, addr: SocketAddr, sender: mpsc::Sender<ServerMessage>) {
        self.peers.write().await.insert(
            addr,
            ConnectedPeer {
                client_key: None,
                role: None,
                connected_at: Instant::now(),
                sender,
            },
        );
    }

    /// Routes one peer message, answering with zero or more replies for
    /// that peer. Broadcast directives go straight to the gateway queues.
    async fn dispatch(&self, addr: SocketAddr, msg: ClientMessage) -> Vec<ServerMessage> {
        match msg {
            ClientMessage::Hello { token, role } => {
                vec![self.hello(addr, &token, role).await]
            }
            ClientMessage::Ping { timestamp } => vec![ServerMessage::Pong {
                timestamp,
                server_time: now_millis(),
            }],
            msg => self.dispatch_authenticated(addr, msg).await,
        }
    }

    async fn dispatch_authenticated(
        &self,
        addr: SocketAddr,
        msg: ClientMessage,
    ) -> Vec<ServerMessage> {
        let (client_key, peer_role) = {
            let peers = self.peers.read().await;
            let identity = peers
                .get(&addr)
                .and_then(|peer| Some((peer.client_key.clone()?, peer.role?)));
            match identity {
                Some(identity) => identity,
                None => {
                    return vec![err_msg(
                        ErrorCode::NotAuthenticated,
                        "Say hello first",
                    )]
                }
            }
        };

        match peer_role {
            PeerRole::Gateway => self.dispatch_gateway(msg).await,
            PeerRole::Frontend => self.dispatch_frontend(&client_key, msg).await,
        }
    }

    async fn hello(&self, addr: SocketAddr, token: &str, role: PeerRole) -> ServerMessage {
        match validate_peer(token, role, &self.config.auth) {
            Ok(claims) => {
                let client_key = claims.client_key().to_string();
                let mut peers = self.peers.write().await;
                if let Some(peer) = peers.get_mut(&addr) {
                    peer.client_key = Some(client_key.clone());
                    peer.role = Some(role);
                }
                info!(%addr, client_key, ?role, "peer authenticated");
                ServerMessage::HelloResult {
                    success: true,
                    client_key: Some(client_key),
                    error: None,
                    server_version: self.config.version.clone(),
                }
            }
            Err(e) => {
                debug!(%addr, error = %e, "peer authentication failed");
                ServerMessage::HelloResult {
                    success: false,
                    client_key: None,
                    error: Some(e.to_string()),
                    server_version: self.config.version.clone(),
                }
            }
        }
    }

    async fn dispatch_gateway(&self, msg: ClientMessage) -> Vec<ServerMessage> {
        match msg {
            ClientMessage::PurchaseRequest { user_id, multiplier } => {
                if multiplier < 1 {
                    return vec![err_msg(ErrorCode::InvalidInput, "Multiplier must be >= 1")];
                }
                match self.pipeline.quote(multiplier) {
                    Ok(quote) => vec![ServerMessage::Invoice {
                        user_id,
                        base_price: quote.base_price,
                        multiplier: quote.multiplier,
                        total: quote.total,
                        payload: format!("throne_buy_{multiplier}"),
                    }],
                    Err(e) => internal(e),
                }
            }

            ClientMessage::PreCheckout { user_id, payload } => {
                // Always approved; refunds are out of scope
                vec![ServerMessage::PreCheckoutApproval { user_id, payload }]
            }

            ClientMessage::PaymentSuccess { user_id, paid, handle } => {
                match self.pipeline.handle_payment(user_id, paid, handle).await {
                    Ok(PaymentOutcome::SessionOpened { .. }) => vec![ServerMessage::Prompt {
                        user_id,
                        prompt: PromptKind::ChoosePrivacy,
                    }],
                    Ok(PaymentOutcome::AccessDenied) => vec![ServerMessage::Outcome(
                        SubmissionReply::AccessDenied { user_id },
                    )],
                    Err(e) => internal(e),
                }
            }

            ClientMessage::PrivacyChoice { user_id, show_handle } => {
                match self.pipeline.handle_privacy(user_id, show_handle).await {
                    PrivacyOutcome::Recorded => vec![ServerMessage::Prompt {
                        user_id,
                        prompt: PromptKind::SendPhoto,
                    }],
                    PrivacyOutcome::NoSession => {
                        vec![err_msg(ErrorCode::InvalidInput, "No open submission")]
                    }
                    PrivacyOutcome::Busy => {
                        vec![err_msg(ErrorCode::InvalidInput, "Submission already under review")]
                    }
                }
            }

            ClientMessage::PhotoSubmission { user_id, photo_ref, caption } => {
                match self.pipeline.handle_photo(user_id, &photo_ref, &caption).await {
                    Ok(outcome) => self.photo_outcome(user_id, outcome).await,
                    Err(e) => internal(e),
                }
            }

            ClientMessage::Admin(request) => {
                vec![ServerMessage::Admin(self.console.handle(request).await)]
            }

            _ => vec![err_msg(ErrorCode::Forbidden, "Not a gateway message")],
        }
    }

    async fn photo_outcome(&self, user_id: u64, outcome: PhotoOutcome) -> Vec<ServerMessage> {
        match outcome {
            PhotoOutcome::Crowned { record, post } => {
                self.broadcast_to_gateways(ServerMessage::Broadcast {
                    photo_ref: post.photo_ref,
                    caption: post.caption,
                    display: post.display,
                    paid: post.paid,
                })
                .await;
                vec![ServerMessage::Outcome(SubmissionReply::Crowned {
                    user_id,
                    view: ThroneView::from_record(&record),
                })]
            }
            PhotoOutcome::Rejected { reason } => vec![ServerMessage::Outcome(
                SubmissionReply::Rejected { user_id, reason },
            )],
            PhotoOutcome::CaptionTooLong => vec![ServerMessage::Outcome(
                SubmissionReply::CaptionTooLong {
                    user_id,
                    max_chars: CAPTION_MAX_CHARS as u32,
                },
            )],
            PhotoOutcome::PhotoUnavailable => vec![ServerMessage::Outcome(
                SubmissionReply::PhotoUnavailable { user_id },
            )],
            PhotoOutcome::NoSession => {
                vec![err_msg(ErrorCode::InvalidInput, "No open submission")]
            }
            PhotoOutcome::Busy => {
                vec![err_msg(ErrorCode::InvalidInput, "Submission already under review")]
            }
        }
    }

    async fn dispatch_frontend(&self, client_key: &str, msg: ClientMessage) -> Vec<ServerMessage> {
        if !self.limiter.check(client_key) {
            return vec![err_msg(
                ErrorCode::RateLimited,
                "Rate limit exceeded. Please try again later.",
            )];
        }

        match msg {
            ClientMessage::QueryCurrent => match self.pipeline.ledger().current() {
                Ok(record) => vec![ServerMessage::CurrentThrone {
                    view: ThroneView::from_record(&record),
                }],
                Err(e) => internal(e),
            },

            ClientMessage::QueryTop { limit } => {
                let limit = limit.unwrap_or(TOP_QUERY_DEFAULT).min(TOP_QUERY_CAP);
                match self.pipeline.ledger().top_by_price(limit) {
                    Ok(records) => vec![ServerMessage::TopThrones {
                        entries: records.iter().map(ThroneView::from_record).collect(),
                    }],
                    Err(e) => internal(e),
                }
            }

            ClientMessage::FetchPhoto { photo_ref } => {
                if validate_ref(&photo_ref).is_err() {
                    return vec![err_msg(ErrorCode::InvalidInput, "Invalid photo reference")];
                }
                match self.pipeline.photos().fetch(&photo_ref).await {
                    Ok(bytes) => vec![ServerMessage::Photo {
                        photo_ref,
                        content_base64: BASE64.encode(bytes),
                    }],
                    Err(e) => {
                        debug!(photo_ref, error = %e, "photo proxy fetch failed");
                        vec![err_msg(ErrorCode::InvalidInput, "Photo not available")]
                    }
                }
            }

            _ => vec![err_msg(ErrorCode::Forbidden, "Read-only peer")],
        }
    }

    /// Queues a message to every connected gateway. Best-effort: a full or
    /// closed queue is logged and skipped.
    async fn broadcast_to_gateways(&self, msg: ServerMessage) {
        let peers = self.peers.read().await;
        let mut delivered = 0usize;
        for (addr, peer) in peers.iter() {
            if peer.role != Some(PeerRole::Gateway) {
                continue;
            }
            if peer.sender.try_send(msg.clone()).is_err() {
                warn!(%addr, "broadcast to gateway failed; feed may lag the ledger");
            } else {
                delivered += 1;
            }
        }
        if delivered == 0 {
            warn!("no gateway received the broadcast; feed may lag the ledger");
        }
    }
}

fn err_msg(code: ErrorCode, message: &str) -> ServerMessage {
    ServerMessage::Error(ServerError {
        code,
        message: message.to_string(),
    })
}

fn internal(e: impl std::fmt::Display) -> Vec<ServerMessage> {
    error!("storage failure: {e}");
    vec![err_msg(ErrorCode::InternalError, "Internal error")]
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::time::Duration;

    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};

    use crate::game::admin::{AdminConfig, AdminReply, AdminRequest};
    use crate::game::ledger::ThroneLedger;
    use crate::moderation::gate::ModerationGate;
    use crate::moderation::provider::ProviderError;
    use crate::moderation::staging::StagedImage;
    use crate::network::auth::TokenClaims;
    use crate::network::files::FileStoreError;

    const JWT_SECRET: &str = "test-secret-key-256-bits-long!!";
    const ADMIN_SECRET: &str = "hunter2hunter2";

    struct AlwaysAllow;

    impl ModerationProvider for AlwaysAllow {
        fn review(
            &self,
            _image: &StagedImage,
        ) -> impl Future<Output = Result<String, ProviderError>> + Send {
            async { Ok("OK".to_string()) }
        }
    }

    struct FixedPhotos;

    impl PhotoStore for FixedPhotos {
        fn fetch(
            &self,
            _photo_ref: &str,
        ) -> impl Future<Output = Result<Vec<u8>, FileStoreError>> + Send {
            async { Ok(b"jpeg".to_vec()) }
        }
    }

    fn server() -> ThroneServer<AlwaysAllow, FixedPhotos> {
        let ledger = Arc::new(ThroneLedger::open_in_memory().unwrap());
        let gate = ModerationGate::with_retry_delay(AlwaysAllow, Duration::ZERO);
        let pipeline = SubmissionPipeline::new(ledger.clone(), gate, Arc::new(FixedPhotos));
        let console = AdminConsole::new(AdminConfig::new(ADMIN_SECRET), ledger);

        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            auth: AuthConfig {
                secret: Some(JWT_SECRET.into()),
                ..Default::default()
            },
            ..Default::default()
        };
        ThroneServer::new(config, pipeline, console)
    }

    fn token(sub: &str, role: Option<PeerRole>) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let claims = TokenClaims {
            sub: sub.into(),
            exp: now + 3600,
            iat: now,
            iss: None,
            aud: None,
            role,
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
        )
        .unwrap()
    }

    async fn connect(
        server: &ThroneServer<AlwaysAllow, FixedPhotos>,
        addr: &str,
        sub: &str,
        role: PeerRole,
    ) -> (SocketAddr, mpsc::Receiver<ServerMessage>) {
        let addr: SocketAddr = addr.parse().unwrap();
        let (tx, rx) = mpsc::channel(16);
        server.shared().register_peer(addr, tx).await;

        let replies = server
            .shared()
            .dispatch(
                addr,
                ClientMessage::Hello {
                    token: token(sub, Some(role)),
                    role,
                },
            )
            .await;
        assert!(matches!(
            replies[0],
            ServerMessage::HelloResult { success: true, .. }
        ));
        (addr, rx)
    }

    #[tokio::test]
    async fn test_unauthenticated_rejected() {
        let server = server();
        let addr: SocketAddr = "10.0.0.1:1000".parse().unwrap();
        let (tx, _rx) = mpsc::channel(16);
        server.shared().register_peer(addr, tx).await;

        let replies = server
            .shared()
            .dispatch(addr, ClientMessage::QueryCurrent)
            .await;
        assert!(matches!(
            &replies[0],
            ServerMessage::Error(ServerError {
                code: ErrorCode::NotAuthenticated,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_bad_token_hello_fails() {
        let server = server();
        let addr: SocketAddr = "10.0.0.1:1001".parse().unwrap();
        let (tx, _rx) = mpsc::channel(16);
        server.shared().register_peer(addr, tx).await;

        let replies = server
            .shared()
            .dispatch(
                addr,
                ClientMessage::Hello {
                    token: "not.a.jwt".into(),
                    role: PeerRole::Frontend,
                },
            )
            .await;
        assert!(matches!(
            replies[0],
            ServerMessage::HelloResult { success: false, .. }
        ));
    }

    #[tokio::test]
    async fn test_frontend_cannot_drive_the_game() {
        let server = server();
        let (addr, _rx) = connect(&server, "10.0.0.2:2000", "webapp-1", PeerRole::Frontend).await;

        let replies = server
            .shared()
            .dispatch(
                addr,
                ClientMessage::PaymentSuccess {
                    user_id: 1,
                    paid: 1,
                    handle: None,
                },
            )
            .await;
        assert!(matches!(
            &replies[0],
            ServerMessage::Error(ServerError {
                code: ErrorCode::Forbidden,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_purchase_flow_quotes_and_approves() {
        let server = server();
        let (addr, _rx) = connect(&server, "10.0.0.3:3000", "bridge-1", PeerRole::Gateway).await;

        let replies = server
            .shared()
            .dispatch(
                addr,
                ClientMessage::PurchaseRequest {
                    user_id: 1,
                    multiplier: 10,
                },
            )
            .await;
        match &replies[0] {
            ServerMessage::Invoice { base_price, total, payload, .. } => {
                assert_eq!(*base_price, 1);
                assert_eq!(*total, 10);
                assert_eq!(payload, "throne_buy_10");
            }
            other => panic!("expected invoice, got {other:?}"),
        }

        let replies = server
            .shared()
            .dispatch(
                addr,
                ClientMessage::PreCheckout {
                    user_id: 1,
                    payload: "throne_buy_10".into(),
                },
            )
            .await;
        assert!(matches!(
            replies[0],
            ServerMessage::PreCheckoutApproval { user_id: 1, .. }
        ));

        let replies = server
            .shared()
            .dispatch(
                addr,
                ClientMessage::PurchaseRequest {
                    user_id: 1,
                    multiplier: 0,
                },
            )
            .await;
        assert!(matches!(
            &replies[0],
            ServerMessage::Error(ServerError {
                code: ErrorCode::InvalidInput,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_full_claim_emits_broadcast_to_gateway() {
        let server = server();
        let (addr, mut rx) = connect(&server, "10.0.0.4:4000", "bridge-1", PeerRole::Gateway).await;

        let replies = server
            .shared()
            .dispatch(
                addr,
                ClientMessage::PaymentSuccess {
                    user_id: 9,
                    paid: 1,
                    handle: Some("grace".into()),
                },
            )
            .await;
        assert!(matches!(
            replies[0],
            ServerMessage::Prompt {
                prompt: PromptKind::ChoosePrivacy,
                ..
            }
        ));

        let replies = server
            .shared()
            .dispatch(
                addr,
                ClientMessage::PrivacyChoice {
                    user_id: 9,
                    show_handle: true,
                },
            )
            .await;
        assert!(matches!(
            replies[0],
            ServerMessage::Prompt {
                prompt: PromptKind::SendPhoto,
                ..
            }
        ));

        let replies = server
            .shared()
            .dispatch(
                addr,
                ClientMessage::PhotoSubmission {
                    user_id: 9,
                    photo_ref: "photo-9".into(),
                    caption: "mine now".into(),
                },
            )
            .await;
        match &replies[0] {
            ServerMessage::Outcome(SubmissionReply::Crowned { user_id, view }) => {
                assert_eq!(*user_id, 9);
                assert_eq!(view.price, 2);
                assert_eq!(view.display, "@grace");
            }
            other => panic!("expected crowned, got {other:?}"),
        }

        // The gateway's queue got the best-effort broadcast directive
        match rx.recv().await.unwrap() {
            ServerMessage::Broadcast { display, paid, .. } => {
                assert_eq!(display, "@grace");
                assert_eq!(paid, 1);
            }
            other => panic!("expected broadcast, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_frontend_queries_and_photo_proxy() {
        let server = server();
        let (gw, _gw_rx) = connect(&server, "10.0.0.5:5000", "bridge-1", PeerRole::Gateway).await;
        let (fe, _fe_rx) = connect(&server, "10.0.0.6:6000", "webapp-1", PeerRole::Frontend).await;

        // Seed visible before any claim
        let replies = server.shared().dispatch(fe, ClientMessage::QueryCurrent).await;
        match &replies[0] {
            ServerMessage::CurrentThrone { view } => {
                assert_eq!(view.user_id, 0);
                assert_eq!(view.price, 1);
            }
            other => panic!("expected current throne, got {other:?}"),
        }

        // One committed claim
        server
            .shared()
            .dispatch(gw, ClientMessage::PaymentSuccess { user_id: 3, paid: 1, handle: None })
            .await;
        server
            .shared()
            .dispatch(
                gw,
                ClientMessage::PhotoSubmission {
                    user_id: 3,
                    photo_ref: "photo-3".into(),
                    caption: String::new(),
                },
            )
            .await;

        let replies = server
            .shared()
            .dispatch(fe, ClientMessage::QueryTop { limit: None })
            .await;
        match &replies[0] {
            ServerMessage::TopThrones { entries } => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].user_id, 3);
            }
            other => panic!("expected top thrones, got {other:?}"),
        }

        let replies = server
            .shared()
            .dispatch(
                fe,
                ClientMessage::FetchPhoto {
                    photo_ref: "photo-3".into(),
                },
            )
            .await;
        match &replies[0] {
            ServerMessage::Photo { content_base64, .. } => {
                assert_eq!(content_base64, &BASE64.encode(b"jpeg"));
            }
            other => panic!("expected photo, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_frontend_rate_limited() {
        let server = server();
        let (fe, _rx) = connect(&server, "10.0.0.7:7000", "webapp-1", PeerRole::Frontend).await;

        let mut limited = false;
        for _ in 0..=crate::network::rate::FRONTEND_MAX_REQUESTS {
            let replies = server.shared().dispatch(fe, ClientMessage::QueryCurrent).await;
            if matches!(
                &replies[0],
                ServerMessage::Error(ServerError {
                    code: ErrorCode::RateLimited,
                    ..
                })
            ) {
                limited = true;
                break;
            }
        }
        assert!(limited, "the request past the budget must be throttled");
    }

    #[tokio::test]
    async fn test_admin_routes_through_console() {
        let server = server();
        let (gw, _rx) = connect(&server, "10.0.0.8:8000", "bridge-1", PeerRole::Gateway).await;

        let replies = server
            .shared()
            .dispatch(gw, ClientMessage::Admin(AdminRequest::Open))
            .await;
        assert!(matches!(
            replies[0],
            ServerMessage::Admin(AdminReply::PasswordPrompt)
        ));

        let replies = server
            .shared()
            .dispatch(
                gw,
                ClientMessage::Admin(AdminRequest::Password {
                    secret: ADMIN_SECRET.into(),
                }),
            )
            .await;
        assert!(matches!(
            replies[0],
            ServerMessage::Admin(AdminReply::Authorized)
        ));
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let server = server();
        let addr: SocketAddr = "10.0.0.9:9000".parse().unwrap();
        let (tx, _rx) = mpsc::channel(16);
        server.shared().register_peer(addr, tx).await;

        let replies = server
            .shared()
            .dispatch(addr, ClientMessage::Ping { timestamp: 7 })
            .await;
        assert!(matches!(
            replies[0],
            ServerMessage::Pong { timestamp: 7, .. }
        ));
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let server = server();
        assert_eq!(server.connection_count().await, 0);
        server.shutdown();
        // Should not panic
    }
}
