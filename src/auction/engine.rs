// Allocation engine: validates bids and resolutions against the current
// auction snapshot and emits the atomic multi-path delta for the store.
//
// The engine is pure. It never touches I/O; callers hand the returned update
// set (and, for bids, the compare-and-swap guard) to the document store, so
// a failed write leaves prior state fully intact.

use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::auction::model::{Auction, AuctionStatus, AuctionType, PlayerStatus};
use crate::auction::scheduler::{flow_for, PointerAdvance};
use crate::store::{Guard, UpdateSet};

pub const BID_AMOUNT_PATH: &str = "currentAuction/currentBidAmount";
const BIDDING_TEAM_PATH: &str = "currentAuction/currentBiddingTeam";
const PLAYER_INDEX_PATH: &str = "currentAuction/currentPlayerIndex";
const TEAM_INDEX_PATH: &str = "currentAuction/currentTeamIndex";

#[derive(Debug, Error)]
pub enum AuctionError {
    #[error("auction is not live")]
    AuctionNotLive,

    #[error("auction is already completed")]
    AuctionCompleted,

    #[error("auction has already started")]
    AuctionAlreadyStarted,

    #[error("player {player_id} has already been resolved")]
    PlayerNotAvailable { player_id: String },

    #[error("player {player_id} is not the player on the block")]
    PlayerNotOnTheBlock { player_id: String },

    #[error("team {team_id} has {remaining} credits, needs {required}")]
    InsufficientCredits {
        team_id: String,
        remaining: u64,
        required: u64,
    },

    #[error("team not found: {team_id}")]
    TeamNotFound { team_id: String },

    #[error("player not found: {player_id}")]
    PlayerNotFound { player_id: String },

    #[error("{operation} is not valid for a {auction_type} auction")]
    InvalidAuctionTypeForOperation {
        operation: &'static str,
        auction_type: &'static str,
    },

    #[error("price {given} is below the base price {base}")]
    PriceBelowBase { given: u64, base: u64 },

    #[error("another bid was accepted first; refresh and retry")]
    BidSuperseded,

    #[error("no team is on turn")]
    NoTeamOnTurn,
}

/// The §7 bucket an error falls into. Conflicts get the authoritative
/// current state attached by the session controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Conflict,
    NotFound,
}

impl AuctionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuctionError::TeamNotFound { .. } | AuctionError::PlayerNotFound { .. } => {
                ErrorKind::NotFound
            }
            _ => ErrorKind::Conflict,
        }
    }
}

/// An accepted bid, ready to be written under its guard.
#[derive(Debug, Clone)]
pub struct BidDecision {
    pub team_id: String,
    pub player_id: String,
    /// The bid amount the decision was computed against; the guard pins it.
    pub prior_amount: u64,
    /// The canonical accepted amount (base price for the opening bid,
    /// otherwise prior plus the minimum increment).
    pub accepted_amount: u64,
    pub guard: Guard,
    pub updates: UpdateSet,
}

/// A sold/unsold resolution: one atomic write covering the player update,
/// the team update (for sales), the pointer advance, and the bidding reset.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub player_id: String,
    pub updates: UpdateSet,
}

fn ensure_live(auction: &Auction) -> Result<(), AuctionError> {
    match auction.status {
        AuctionStatus::Live => Ok(()),
        AuctionStatus::Completed => Err(AuctionError::AuctionCompleted),
        _ => Err(AuctionError::AuctionNotLive),
    }
}

fn pointer_update(advance: PointerAdvance) -> (&'static str, Value) {
    match advance {
        PointerAdvance::Player(idx) => (PLAYER_INDEX_PATH, json!(idx)),
        PointerAdvance::Team(idx) => (TEAM_INDEX_PATH, json!(idx)),
    }
}

/// Validate and accept a bid on the player currently on the block.
///
/// The caller's `proposed_amount` is advisory only: the canonical next
/// amount is always recomputed from the snapshot, so racing clients cannot
/// push the price past one increment per accepted bid. The returned guard
/// pins `currentBidAmount` to the value this decision was computed against;
/// a guarded write that fails means another bid landed first.
pub fn place_bid(
    auction: &Auction,
    team_id: &str,
    player_id: &str,
    proposed_amount: u64,
    now_ms: i64,
) -> Result<BidDecision, AuctionError> {
    ensure_live(auction)?;
    if auction.auction_type != AuctionType::PlayerBid {
        return Err(AuctionError::InvalidAuctionTypeForOperation {
            operation: "placeBid",
            auction_type: auction.auction_type.as_str(),
        });
    }

    let team = auction
        .team(team_id)
        .ok_or_else(|| AuctionError::TeamNotFound {
            team_id: team_id.to_string(),
        })?;
    let player = auction
        .player(player_id)
        .ok_or_else(|| AuctionError::PlayerNotFound {
            player_id: player_id.to_string(),
        })?;
    if player.status != PlayerStatus::Available {
        return Err(AuctionError::PlayerNotAvailable {
            player_id: player_id.to_string(),
        });
    }
    match flow_for(auction.auction_type).current_player(auction) {
        Some(current) if current.id == player_id => {}
        _ => {
            return Err(AuctionError::PlayerNotOnTheBlock {
                player_id: player_id.to_string(),
            })
        }
    }

    let prior = auction.current_auction.current_bid_amount;
    let accepted = if prior == 0 {
        player.base_price
    } else {
        prior + auction.min_bid_increment
    };
    if proposed_amount != accepted {
        debug!(
            auction = %auction.id,
            team = %team_id,
            proposed = proposed_amount,
            accepted,
            "proposed bid out of sync, using recomputed amount"
        );
    }
    if team.remaining_credits < accepted {
        return Err(AuctionError::InsufficientCredits {
            team_id: team_id.to_string(),
            remaining: team.remaining_credits,
            required: accepted,
        });
    }

    let updates = UpdateSet::new()
        .set(BIDDING_TEAM_PATH, json!(team_id))
        .set(BID_AMOUNT_PATH, json!(accepted))
        .set("updatedAt", json!(now_ms));

    Ok(BidDecision {
        team_id: team_id.to_string(),
        player_id: player_id.to_string(),
        prior_amount: prior,
        accepted_amount: accepted,
        guard: Guard::new(BID_AMOUNT_PATH, json!(prior)),
        updates,
    })
}

/// Resolve a player as sold to a team at `final_price`.
///
/// One atomic unit: player status/assignment/price, roster append, credit
/// deduction, pointer advance, bidding reset. For teamBid/numberWise
/// auctions a zero price is allowed (allocation by turn order, not
/// currency); playerBid sales must meet the base price.
pub fn mark_sold(
    auction: &Auction,
    player_id: &str,
    team_id: &str,
    final_price: u64,
    now_ms: i64,
) -> Result<Resolution, AuctionError> {
    ensure_live(auction)?;

    let player = auction
        .player(player_id)
        .ok_or_else(|| AuctionError::PlayerNotFound {
            player_id: player_id.to_string(),
        })?;
    if player.status != PlayerStatus::Available {
        return Err(AuctionError::PlayerNotAvailable {
            player_id: player_id.to_string(),
        });
    }
    let team = auction
        .team(team_id)
        .ok_or_else(|| AuctionError::TeamNotFound {
            team_id: team_id.to_string(),
        })?;

    if auction.auction_type == AuctionType::PlayerBid && final_price < player.base_price {
        return Err(AuctionError::PriceBelowBase {
            given: final_price,
            base: player.base_price,
        });
    }
    if team.remaining_credits < final_price {
        return Err(AuctionError::InsufficientCredits {
            team_id: team_id.to_string(),
            remaining: team.remaining_credits,
            required: final_price,
        });
    }

    let mut roster = team.players.clone();
    roster.push(player_id.to_string());
    let (pointer_path, pointer_value) =
        pointer_update(flow_for(auction.auction_type).advance(auction));

    let updates = UpdateSet::new()
        .set(format!("players/{player_id}/status"), json!("sold"))
        .set(
            format!("players/{player_id}/assignedToTeam"),
            json!(team_id),
        )
        .set(
            format!("players/{player_id}/finalPrice"),
            json!(final_price),
        )
        .set(format!("teams/{team_id}/players"), json!(roster))
        .set(
            format!("teams/{team_id}/remainingCredits"),
            json!(team.remaining_credits - final_price),
        )
        .set(pointer_path, pointer_value)
        .set(BIDDING_TEAM_PATH, Value::Null)
        .set(BID_AMOUNT_PATH, json!(0))
        .set("updatedAt", json!(now_ms));

    Ok(Resolution {
        player_id: player_id.to_string(),
        updates,
    })
}

/// Resolve a player as unsold: status flip, pointer advance, bidding reset.
/// No credit effect.
pub fn mark_unsold(
    auction: &Auction,
    player_id: &str,
    now_ms: i64,
) -> Result<Resolution, AuctionError> {
    ensure_live(auction)?;

    let player = auction
        .player(player_id)
        .ok_or_else(|| AuctionError::PlayerNotFound {
            player_id: player_id.to_string(),
        })?;
    if player.status != PlayerStatus::Available {
        return Err(AuctionError::PlayerNotAvailable {
            player_id: player_id.to_string(),
        });
    }

    let (pointer_path, pointer_value) =
        pointer_update(flow_for(auction.auction_type).advance(auction));

    let updates = UpdateSet::new()
        .set(format!("players/{player_id}/status"), json!("unsold"))
        .set(pointer_path, pointer_value)
        .set(BIDDING_TEAM_PATH, Value::Null)
        .set(BID_AMOUNT_PATH, json!(0))
        .set("updatedAt", json!(now_ms));

    Ok(Resolution {
        player_id: player_id.to_string(),
        updates,
    })
}
