// Session controller: lifecycle orchestration and the operation surface
// consumed by UI/notification layers.
//
// Every mutation goes read → engine (pure validation + delta) → one atomic
// store write. Bid writes additionally carry the engine's compare-and-swap
// guard; a failed guard comes back as a conflict holding the fresh
// authoritative snapshot so the caller can resynchronize and retry.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::auction::engine::{self, AuctionError, ErrorKind};
use crate::auction::model::{
    is_palette_color, AddPlayerInput, AddTeamInput, Auction, AuctionStatus, AuctionType,
    CreateAuctionInput, CurrentAuctionState, Player, Team,
};
use crate::auction::referral;
use crate::auction::scheduler::flow_for;
use crate::store::blob::BlobStore;
use crate::store::{push_id, DocumentStore, StoreError, UpdateSet};

/// Teams an owner may add without a subscription.
pub const DEFAULT_FREE_TEAM_LIMIT: usize = 3;

const MAX_REFERRAL_ATTEMPTS: usize = 5;

/// Who is driving the session, as supplied by the identity collaborator.
#[derive(Debug, Clone)]
pub struct OwnerIdentity {
    pub user_id: String,
    pub user_name: String,
    pub has_subscription: bool,
}

#[derive(Debug, Error)]
pub enum SessionError {
    /// Malformed input; nothing was touched.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The operation lost against current state. Carries the authoritative
    /// snapshot so the caller can resynchronize.
    #[error("state conflict: {source}")]
    Conflict {
        source: AuctionError,
        current: Box<Auction>,
    },

    #[error("auction not found: {0}")]
    AuctionNotFound(String),

    #[error("{0}")]
    NotFound(AuctionError),

    /// Store/network failure; retryable, nothing was applied.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

impl SessionError {
    fn domain(err: AuctionError, current: Auction) -> Self {
        match err.kind() {
            ErrorKind::NotFound => SessionError::NotFound(err),
            ErrorKind::Conflict => SessionError::Conflict {
                source: err,
                current: Box::new(current),
            },
        }
    }
}

/// The result of an accepted bid.
#[derive(Debug, Clone)]
pub struct BidOutcome {
    pub team_id: String,
    pub accepted_amount: u64,
    pub auction: Auction,
}

pub struct SessionController<S> {
    store: Arc<S>,
    free_team_limit: usize,
}

impl<S: DocumentStore> SessionController<S> {
    pub fn new(store: Arc<S>) -> Self {
        SessionController {
            store,
            free_team_limit: DEFAULT_FREE_TEAM_LIMIT,
        }
    }

    pub fn with_free_team_limit(store: Arc<S>, free_team_limit: usize) -> Self {
        SessionController {
            store,
            free_team_limit,
        }
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn decode(value: Value) -> Result<Auction, SessionError> {
        serde_json::from_value(value)
            .map_err(|e| SessionError::Store(StoreError::backend(e)))
    }

    async fn read_auction(&self, auction_id: &str) -> Result<Auction, SessionError> {
        let value = self
            .store
            .read(auction_id)
            .await?
            .ok_or_else(|| SessionError::AuctionNotFound(auction_id.to_string()))?;
        Self::decode(value)
    }

    // -----------------------------------------------------------------------
    // Creation and pre-live configuration
    // -----------------------------------------------------------------------

    /// Validate the input, allocate a unique referral code, and write the
    /// initial document. Returns the generated auction id.
    pub async fn create_auction(
        &self,
        identity: &OwnerIdentity,
        input: CreateAuctionInput,
    ) -> Result<String, SessionError> {
        let now = Self::now_ms();
        if input.auction_name.trim().is_empty() {
            return Err(SessionError::Validation("enter an auction name".into()));
        }
        if input.venue.trim().is_empty() {
            return Err(SessionError::Validation("enter a venue".into()));
        }
        if input.total_credits_per_team == 0 {
            return Err(SessionError::Validation(
                "credits per team must be greater than 0".into(),
            ));
        }
        if input.players_per_team == 0 {
            return Err(SessionError::Validation(
                "players per team must be greater than 0".into(),
            ));
        }
        if input.min_bid_increment == 0 {
            return Err(SessionError::Validation(
                "minimum bid increment must be greater than 0".into(),
            ));
        }
        if input.auction_date <= now {
            return Err(SessionError::Validation(
                "auction date must be in the future".into(),
            ));
        }

        let mut referral_code = referral::generate_code();
        let mut attempts = 1;
        while self
            .store
            .query_by_referral_code(&referral_code)
            .await?
            .is_some()
        {
            if attempts >= MAX_REFERRAL_ATTEMPTS {
                return Err(SessionError::Store(StoreError::backend(anyhow::anyhow!(
                    "could not allocate a unique referral code after {MAX_REFERRAL_ATTEMPTS} attempts"
                ))));
            }
            warn!(code = %referral_code, "referral code collision, regenerating");
            referral_code = referral::generate_code();
            attempts += 1;
        }

        let auction = Auction {
            // Patched by the store on insert.
            id: String::new(),
            owner_id: identity.user_id.clone(),
            owner_name: identity.user_name.clone(),
            auction_name: input.auction_name,
            sport_type: input.sport_type,
            auction_type: input.auction_type,
            total_credits_per_team: input.total_credits_per_team,
            players_per_team: input.players_per_team,
            min_bid_increment: input.min_bid_increment,
            auction_date: input.auction_date,
            venue: input.venue,
            image_url: input.image_url,
            referral_code,
            players: Default::default(),
            teams: Default::default(),
            current_auction: CurrentAuctionState::default(),
            created_at: now,
            updated_at: now,
            status: AuctionStatus::Draft,
        };

        let doc = serde_json::to_value(&auction)
            .map_err(|e| SessionError::Store(StoreError::backend(e)))?;
        let id = self.store.create(doc).await?;
        info!(auction = %id, owner = %identity.user_id, "auction created");
        Ok(id)
    }

    fn ensure_pre_live(auction: &Auction) -> Result<(), SessionError> {
        match auction.status {
            AuctionStatus::Draft | AuctionStatus::Scheduled => Ok(()),
            _ => Err(SessionError::domain(
                AuctionError::AuctionAlreadyStarted,
                auction.clone(),
            )),
        }
    }

    /// Add a team (pre-live). Non-subscribers are capped by the identity
    /// collaborator's gate. Returns the generated team id.
    pub async fn add_team(
        &self,
        auction_id: &str,
        input: AddTeamInput,
        identity: &OwnerIdentity,
    ) -> Result<String, SessionError> {
        let auction = self.read_auction(auction_id).await?;
        Self::ensure_pre_live(&auction)?;

        if input.name.trim().is_empty() {
            return Err(SessionError::Validation("enter a team name".into()));
        }
        if !is_palette_color(&input.color) {
            return Err(SessionError::Validation(
                "team color must be from the palette".into(),
            ));
        }
        if !identity.has_subscription && auction.teams.len() >= self.free_team_limit {
            return Err(SessionError::Validation(format!(
                "a premium subscription is required to add more than {} teams",
                self.free_team_limit
            )));
        }

        let team_id = push_id();
        let team = Team::new(
            team_id.clone(),
            input,
            auction.total_credits_per_team,
            auction.teams.len(),
        );
        let team_value = serde_json::to_value(&team)
            .map_err(|e| SessionError::Store(StoreError::backend(e)))?;

        let updates = UpdateSet::new()
            .set(format!("teams/{team_id}"), team_value)
            .set("updatedAt", json!(Self::now_ms()));
        self.store.update(auction_id, updates).await?;
        Ok(team_id)
    }

    /// Add a player (pre-live). Returns the generated player id.
    pub async fn add_player(
        &self,
        auction_id: &str,
        input: AddPlayerInput,
    ) -> Result<String, SessionError> {
        let auction = self.read_auction(auction_id).await?;
        Self::ensure_pre_live(&auction)?;

        if input.name.trim().is_empty() {
            return Err(SessionError::Validation("enter a player name".into()));
        }

        let player_id = push_id();
        let player = Player::new(player_id.clone(), input, auction.players.len());
        let player_value = serde_json::to_value(&player)
            .map_err(|e| SessionError::Store(StoreError::backend(e)))?;

        let updates = UpdateSet::new()
            .set(format!("players/{player_id}"), player_value)
            .set("updatedAt", json!(Self::now_ms()));
        self.store.update(auction_id, updates).await?;
        Ok(player_id)
    }

    /// Upload an auction cover image through the blob collaborator and
    /// record its URL.
    pub async fn attach_auction_image<B: BlobStore>(
        &self,
        blob: &B,
        auction_id: &str,
        bytes: &[u8],
        file_name: &str,
    ) -> Result<String, SessionError> {
        // Verify the auction exists before uploading anything.
        self.read_auction(auction_id).await?;
        let url = blob
            .upload(bytes, &format!("auction-images/{auction_id}/{file_name}"))
            .await?;
        let updates = UpdateSet::new()
            .set("imageUrl", json!(url))
            .set("updatedAt", json!(Self::now_ms()));
        self.store.update(auction_id, updates).await?;
        Ok(url)
    }

    /// Delete an auction. Only allowed before it goes live; the live phase
    /// never removes entities.
    pub async fn delete_auction(&self, auction_id: &str) -> Result<(), SessionError> {
        let auction = self.read_auction(auction_id).await?;
        Self::ensure_pre_live(&auction)?;
        self.store.delete(auction_id).await?;
        info!(auction = %auction_id, "auction deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Move a draft auction to scheduled. Calling on an already-scheduled
    /// auction is a no-op.
    pub async fn schedule_auction(&self, auction_id: &str) -> Result<(), SessionError> {
        let auction = self.read_auction(auction_id).await?;
        match auction.status {
            AuctionStatus::Scheduled => Ok(()),
            AuctionStatus::Draft => {
                let updates = UpdateSet::new()
                    .set("status", json!("scheduled"))
                    .set("updatedAt", json!(Self::now_ms()));
                self.store.update(auction_id, updates).await?;
                Ok(())
            }
            _ => Err(SessionError::domain(
                AuctionError::AuctionAlreadyStarted,
                auction,
            )),
        }
    }

    /// Take the auction live. Safe to call repeatedly; the original start
    /// time is kept. Requires at least one team, at least one player, and
    /// enough players to fill every roster (equality is sufficient).
    pub async fn start_auction(&self, auction_id: &str) -> Result<Auction, SessionError> {
        let auction = self.read_auction(auction_id).await?;
        if auction.status == AuctionStatus::Completed {
            return Err(SessionError::domain(AuctionError::AuctionCompleted, auction));
        }

        if auction.teams.is_empty() {
            return Err(SessionError::Validation("add at least one team".into()));
        }
        if auction.players.is_empty() {
            return Err(SessionError::Validation("add at least one player".into()));
        }
        let required = auction.teams.len() * auction.players_per_team;
        if auction.players.len() < required {
            return Err(SessionError::Validation(format!(
                "need {required} players ({} per team x {} teams)",
                auction.players_per_team,
                auction.teams.len()
            )));
        }

        let now = Self::now_ms();
        let mut updates = UpdateSet::new()
            .set("status", json!("live"))
            .set("currentAuction/isActive", json!(true))
            .set("updatedAt", json!(now));
        if auction.current_auction.started_at.is_none() {
            updates.insert("currentAuction/startedAt", json!(now));
        }
        self.store.update(auction_id, updates).await?;
        info!(auction = %auction_id, "auction live");
        self.read_auction(auction_id).await
    }

    /// Close the auction for good. No operation transitions out of
    /// completed; calling again is a no-op.
    pub async fn complete_auction(&self, auction_id: &str) -> Result<Auction, SessionError> {
        let auction = self.read_auction(auction_id).await?;
        match auction.status {
            AuctionStatus::Completed => Ok(auction),
            AuctionStatus::Live => {
                let now = Self::now_ms();
                let updates = UpdateSet::new()
                    .set("status", json!("completed"))
                    .set("currentAuction/isActive", json!(false))
                    .set("currentAuction/completedAt", json!(now))
                    .set("updatedAt", json!(now));
                self.store.update(auction_id, updates).await?;
                info!(auction = %auction_id, "auction completed");
                self.read_auction(auction_id).await
            }
            _ => Err(SessionError::domain(AuctionError::AuctionNotLive, auction)),
        }
    }

    // -----------------------------------------------------------------------
    // Live operations
    // -----------------------------------------------------------------------

    /// Place a bid for a team on the player currently on the block.
    ///
    /// The write is guarded on the bid amount the decision was computed
    /// against; if another bid lands in between, nothing is applied and the
    /// caller gets a conflict with the fresh snapshot to retry from.
    pub async fn place_bid(
        &self,
        auction_id: &str,
        team_id: &str,
        player_id: &str,
        proposed_amount: u64,
    ) -> Result<BidOutcome, SessionError> {
        let auction = self.read_auction(auction_id).await?;
        let decision =
            engine::place_bid(&auction, team_id, player_id, proposed_amount, Self::now_ms())
                .map_err(|e| SessionError::domain(e, auction.clone()))?;

        let applied = self
            .store
            .update_guarded(
                auction_id,
                std::slice::from_ref(&decision.guard),
                decision.updates.clone(),
            )
            .await?;
        if !applied {
            let fresh = self.read_auction(auction_id).await?;
            warn!(
                auction = %auction_id,
                team = %team_id,
                prior = decision.prior_amount,
                "bid lost the write race"
            );
            return Err(SessionError::Conflict {
                source: AuctionError::BidSuperseded,
                current: Box::new(fresh),
            });
        }

        let auction = self.read_auction(auction_id).await?;
        Ok(BidOutcome {
            team_id: team_id.to_string(),
            accepted_amount: decision.accepted_amount,
            auction,
        })
    }

    /// Resolve the player as sold to `team_id` at `final_price`, as one
    /// atomic write.
    pub async fn mark_sold(
        &self,
        auction_id: &str,
        player_id: &str,
        team_id: &str,
        final_price: u64,
    ) -> Result<Auction, SessionError> {
        let auction = self.read_auction(auction_id).await?;
        let resolution = engine::mark_sold(&auction, player_id, team_id, final_price, Self::now_ms())
            .map_err(|e| SessionError::domain(e, auction.clone()))?;
        self.store.update(auction_id, resolution.updates).await?;
        self.read_auction(auction_id).await
    }

    /// Resolve the player as unsold, as one atomic write.
    pub async fn mark_unsold(
        &self,
        auction_id: &str,
        player_id: &str,
    ) -> Result<Auction, SessionError> {
        let auction = self.read_auction(auction_id).await?;
        let resolution = engine::mark_unsold(&auction, player_id, Self::now_ms())
            .map_err(|e| SessionError::domain(e, auction.clone()))?;
        self.store.update(auction_id, resolution.updates).await?;
        self.read_auction(auction_id).await
    }

    /// teamBid/numberWise selection: the team on turn takes `player_id` at
    /// no cost.
    pub async fn select_player(
        &self,
        auction_id: &str,
        player_id: &str,
    ) -> Result<Auction, SessionError> {
        let auction = self.read_auction(auction_id).await?;
        if auction.auction_type == AuctionType::PlayerBid {
            return Err(SessionError::domain(
                AuctionError::InvalidAuctionTypeForOperation {
                    operation: "selectPlayer",
                    auction_type: auction.auction_type.as_str(),
                },
                auction,
            ));
        }
        let team_id = flow_for(auction.auction_type)
            .current_team(&auction)
            .map(|team| team.id.clone());
        let Some(team_id) = team_id else {
            return Err(SessionError::domain(AuctionError::NoTeamOnTurn, auction));
        };

        let resolution = engine::mark_sold(&auction, player_id, &team_id, 0, Self::now_ms())
            .map_err(|e| SessionError::domain(e, auction.clone()))?;
        self.store.update(auction_id, resolution.updates).await?;
        self.read_auction(auction_id).await
    }

    // -----------------------------------------------------------------------
    // Reads and subscriptions
    // -----------------------------------------------------------------------

    pub async fn get_auction(&self, auction_id: &str) -> Result<Auction, SessionError> {
        self.read_auction(auction_id).await
    }

    /// All auctions for an owner, newest first.
    pub async fn auctions_by_owner(&self, owner_id: &str) -> Result<Vec<Auction>, SessionError> {
        let mut auctions = self
            .store
            .query_by_owner(owner_id)
            .await?
            .into_iter()
            .map(Self::decode)
            .collect::<Result<Vec<_>, _>>()?;
        auctions.sort_by_key(|a| std::cmp::Reverse(a.created_at));
        Ok(auctions)
    }

    pub async fn auction_by_referral_code(
        &self,
        code: &str,
    ) -> Result<Option<Auction>, SessionError> {
        match self.store.query_by_referral_code(code).await? {
            Some(value) => Ok(Some(Self::decode(value)?)),
            None => Ok(None),
        }
    }

    /// Raw snapshot stream for this auction's document.
    pub fn subscribe(&self, auction_id: &str) -> broadcast::Receiver<Value> {
        self.store.subscribe(auction_id)
    }

    /// Deliver the full auction snapshot to `callback` on every store
    /// change. Each call is a wholesale replacement of prior state; the
    /// stream may repeat snapshots under concurrent writes. Abort the
    /// returned handle to unsubscribe.
    pub fn on_auction_change<F>(&self, auction_id: &str, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(Auction) + Send + 'static,
    {
        let mut rx = self.store.subscribe(auction_id);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(value) => match serde_json::from_value::<Auction>(value) {
                        Ok(auction) => callback(auction),
                        Err(e) => warn!("dropping undecodable auction snapshot: {e}"),
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Fine to skip: the next snapshot is the full state.
                        warn!(skipped, "snapshot consumer lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
