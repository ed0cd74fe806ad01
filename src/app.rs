// The session service event loop.
//
// One authoritative process per deployment: every mutating intent from every
// connected client funnels through this loop and is applied strictly in
// arrival order, which is the single-writer arbitration half of the
// concurrency design (the store-level bid guard is the other half).
//
// Snapshot flow: store subscriptions feed full documents into the loop; each
// one replaces the cached state wholesale and is fanned out to every client
// joined to that auction. Duplicate snapshots are dropped, so replaying one
// has no additional effect.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auction::model::Auction;
use crate::auction::referral;
use crate::auction::session::{SessionController, SessionError};
use crate::protocol::{ClientMessage, JoinRequest, RejectionCode, ServerMessage};
use crate::store::DocumentStore;
use crate::ws_server::HubEvent;

struct ClientHandle {
    outbound: mpsc::Sender<String>,
    /// Set once the client has joined an auction.
    auction_id: Option<String>,
}

struct SessionService<S> {
    controller: SessionController<S>,
    clients: HashMap<u64, ClientHandle>,
    /// One snapshot-forwarding task per auction with joined clients.
    feeds: HashMap<String, JoinHandle<()>>,
    last_snapshot: HashMap<String, Value>,
    snap_tx: mpsc::Sender<(String, Value)>,
}

/// Run the session loop until the hub channel closes.
pub async fn run<S: DocumentStore + 'static>(
    controller: SessionController<S>,
    mut hub_rx: mpsc::Receiver<HubEvent>,
) -> anyhow::Result<()> {
    let (snap_tx, mut snap_rx) = mpsc::channel::<(String, Value)>(256);
    let mut service = SessionService {
        controller,
        clients: HashMap::new(),
        feeds: HashMap::new(),
        last_snapshot: HashMap::new(),
        snap_tx,
    };

    loop {
        tokio::select! {
            event = hub_rx.recv() => match event {
                Some(event) => service.handle_hub_event(event).await,
                None => break,
            },
            Some((auction_id, doc)) = snap_rx.recv() => {
                service.handle_snapshot(&auction_id, doc).await;
            }
        }
    }

    for feed in service.feeds.values() {
        feed.abort();
    }
    info!("Session loop shut down");
    Ok(())
}

impl<S: DocumentStore + 'static> SessionService<S> {
    async fn handle_hub_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Connected {
                client_id,
                outbound,
            } => {
                debug!(client_id, "client connected");
                self.clients.insert(
                    client_id,
                    ClientHandle {
                        outbound,
                        auction_id: None,
                    },
                );
            }
            HubEvent::Disconnected { client_id } => {
                debug!(client_id, "client disconnected");
                self.clients.remove(&client_id);
                self.prune_feeds();
            }
            HubEvent::Frame { client_id, text } => {
                self.handle_frame(client_id, &text).await;
            }
        }
    }

    async fn handle_frame(&mut self, client_id: u64, text: &str) {
        let message: ClientMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                self.send(
                    client_id,
                    &ServerMessage::Error {
                        message: format!("unparseable frame: {e}"),
                    },
                )
                .await;
                return;
            }
        };

        let message = match message {
            ClientMessage::Join(req) => {
                self.handle_join(client_id, req).await;
                return;
            }
            other => other,
        };

        let Some(auction_id) = self
            .clients
            .get(&client_id)
            .and_then(|c| c.auction_id.clone())
        else {
            self.send(
                client_id,
                &ServerMessage::Error {
                    message: "join an auction before sending intents".into(),
                },
            )
            .await;
            return;
        };

        let response = match message {
            ClientMessage::Join(_) => unreachable!("handled above"),
            ClientMessage::PlaceBid(req) => self
                .controller
                .place_bid(&auction_id, &req.team_id, &req.player_id, req.amount)
                .await
                .map(|outcome| {
                    Some(ServerMessage::BidAccepted {
                        team_id: outcome.team_id,
                        amount: outcome.accepted_amount,
                    })
                }),
            ClientMessage::MarkSold(req) => self
                .controller
                .mark_sold(&auction_id, &req.player_id, &req.team_id, req.final_price)
                .await
                .map(|_| None),
            ClientMessage::MarkUnsold(req) => self
                .controller
                .mark_unsold(&auction_id, &req.player_id)
                .await
                .map(|_| None),
            ClientMessage::SelectPlayer(req) => self
                .controller
                .select_player(&auction_id, &req.player_id)
                .await
                .map(|_| None),
            ClientMessage::StartAuction => self
                .controller
                .start_auction(&auction_id)
                .await
                .map(|_| None),
            ClientMessage::CompleteAuction => self
                .controller
                .complete_auction(&auction_id)
                .await
                .map(|_| None),
        };

        match response {
            Ok(Some(message)) => self.send(client_id, &message).await,
            // Accepted silently; the snapshot feed carries the new state.
            Ok(None) => {}
            Err(err) => {
                let rejection = rejection(err);
                self.send(client_id, &rejection).await;
            }
        }
    }

    async fn handle_join(&mut self, client_id: u64, req: JoinRequest) {
        let now = Utc::now().timestamp_millis();
        let resolved: Result<Auction, SessionError> = match (&req.auction_id, &req.referral_code) {
            (Some(id), _) => self.controller.get_auction(id).await,
            (None, Some(code)) => match self.controller.auction_by_referral_code(code).await {
                Ok(Some(auction)) if referral::join_window_open(auction.auction_date, now) => {
                    Ok(auction)
                }
                Ok(Some(_)) => Err(SessionError::Validation(
                    "referral code has expired".into(),
                )),
                Ok(None) => Err(SessionError::AuctionNotFound(code.clone())),
                Err(e) => Err(e),
            },
            (None, None) => Err(SessionError::Validation(
                "join needs an auctionId or a referralCode".into(),
            )),
        };

        match resolved {
            Ok(auction) => {
                let auction_id = auction.id.clone();
                if let Some(client) = self.clients.get_mut(&client_id) {
                    client.auction_id = Some(auction_id.clone());
                }
                self.ensure_feed(&auction_id);
                info!(client_id, auction = %auction_id, "client joined auction");
                self.send(
                    client_id,
                    &ServerMessage::Joined {
                        auction_id: auction_id.clone(),
                    },
                )
                .await;
                self.send(
                    client_id,
                    &ServerMessage::Snapshot {
                        auction: Box::new(auction),
                    },
                )
                .await;
            }
            Err(err) => {
                let rejection = rejection(err);
                self.send(client_id, &rejection).await;
            }
        }
    }

    /// Fan a store snapshot out to every client joined to the auction.
    /// A snapshot identical to the last one delivered is a no-op.
    async fn handle_snapshot(&mut self, auction_id: &str, doc: Value) {
        if self.last_snapshot.get(auction_id) == Some(&doc) {
            debug!(auction = %auction_id, "duplicate snapshot dropped");
            return;
        }
        self.last_snapshot
            .insert(auction_id.to_string(), doc.clone());

        let auction: Auction = match serde_json::from_value(doc) {
            Ok(auction) => auction,
            Err(e) => {
                warn!(auction = %auction_id, "dropping undecodable snapshot: {e}");
                return;
            }
        };
        let frame = match serde_json::to_string(&ServerMessage::Snapshot {
            auction: Box::new(auction),
        }) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("failed to serialize snapshot frame: {e}");
                return;
            }
        };

        let targets: Vec<mpsc::Sender<String>> = self
            .clients
            .values()
            .filter(|c| c.auction_id.as_deref() == Some(auction_id))
            .map(|c| c.outbound.clone())
            .collect();
        for outbound in targets {
            let _ = outbound.send(frame.clone()).await;
        }
    }

    /// Start forwarding store snapshots for this auction into the loop, if
    /// not already running.
    fn ensure_feed(&mut self, auction_id: &str) {
        if self.feeds.contains_key(auction_id) {
            return;
        }
        let mut rx = self.controller.subscribe(auction_id);
        let snap_tx = self.snap_tx.clone();
        let id = auction_id.to_string();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(doc) => {
                        if snap_tx.send((id.clone(), doc)).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        // Skipped snapshots are fine; the next one is full state.
                        warn!(auction = %id, skipped, "snapshot feed lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.feeds.insert(auction_id.to_string(), handle);
    }

    /// Drop feeds for auctions no client is joined to anymore.
    fn prune_feeds(&mut self) {
        let active: std::collections::HashSet<&str> = self
            .clients
            .values()
            .filter_map(|c| c.auction_id.as_deref())
            .collect();
        let stale: Vec<String> = self
            .feeds
            .keys()
            .filter(|id| !active.contains(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            if let Some(handle) = self.feeds.remove(&id) {
                handle.abort();
            }
            self.last_snapshot.remove(&id);
        }
    }

    async fn send(&self, client_id: u64, message: &ServerMessage) {
        let Some(outbound) = self.clients.get(&client_id).map(|c| c.outbound.clone()) else {
            return;
        };
        match serde_json::to_string(message) {
            Ok(frame) => {
                let _ = outbound.send(frame).await;
            }
            Err(e) => warn!("failed to serialize server frame: {e}"),
        }
    }
}

/// Map a session error onto the wire taxonomy. Conflicts carry the
/// authoritative snapshot for client resync.
fn rejection(err: SessionError) -> ServerMessage {
    match err {
        SessionError::Validation(reason) => ServerMessage::Rejected {
            code: RejectionCode::Validation,
            reason,
            auction: None,
        },
        SessionError::Conflict { source, current } => ServerMessage::Rejected {
            code: RejectionCode::Conflict,
            reason: source.to_string(),
            auction: Some(current),
        },
        SessionError::AuctionNotFound(id) => ServerMessage::Rejected {
            code: RejectionCode::NotFound,
            reason: format!("auction not found: {id}"),
            auction: None,
        },
        SessionError::NotFound(source) => ServerMessage::Rejected {
            code: RejectionCode::NotFound,
            reason: source.to_string(),
            auction: None,
        },
        SessionError::Store(source) => ServerMessage::Rejected {
            code: RejectionCode::Store,
            reason: source.to_string(),
            auction: None,
        },
    }
}
