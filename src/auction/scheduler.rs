// Turn scheduling: whose turn it is, how the pointer advances, and when an
// auction has nothing left to run.
//
// Each auction type gets its own `TurnFlow` implementation; the engine and
// session controller dispatch through the trait instead of branching on the
// type at every call site.

use crate::auction::model::{Auction, AuctionType, Player, Team};

/// The single pointer step taken after a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerAdvance {
    /// New value for `currentAuction/currentPlayerIndex`.
    Player(usize),
    /// New value for `currentAuction/currentTeamIndex`.
    Team(usize),
}

/// Per-auction-type turn protocol.
///
/// The stored pointer advances by exactly one per resolution; reads resolve
/// it against the current ordered view (modulo its length), so players
/// resolved sold/unsold are skipped naturally as the view shrinks.
pub trait TurnFlow: Send + Sync {
    /// The player currently up for resolution, if this flow tracks one.
    fn current_player<'a>(&self, auction: &'a Auction) -> Option<&'a Player>;

    /// The team whose turn it is, if this flow tracks one.
    fn current_team<'a>(&self, auction: &'a Auction) -> Option<&'a Team>;

    /// The pointer step to take after a sold/unsold/selection resolution.
    fn advance(&self, auction: &Auction) -> PointerAdvance;

    /// Whether there is nothing left to run. A terminal auction is eligible
    /// for completion but is never completed automatically.
    fn is_terminal(&self, auction: &Auction) -> bool;
}

/// Look up the flow for an auction type.
pub fn flow_for(auction_type: AuctionType) -> &'static dyn TurnFlow {
    match auction_type {
        AuctionType::PlayerBid => &PlayerBidFlow,
        AuctionType::TeamBid => &TeamBidFlow,
        AuctionType::NumberWise => &NumberWiseFlow,
    }
}

/// Convenience wrapper over the auction's own type.
pub fn is_terminal(auction: &Auction) -> bool {
    flow_for(auction.auction_type).is_terminal(auction)
}

// ---------------------------------------------------------------------------
// playerBid: one player on the block at a time
// ---------------------------------------------------------------------------

pub struct PlayerBidFlow;

impl TurnFlow for PlayerBidFlow {
    fn current_player<'a>(&self, auction: &'a Auction) -> Option<&'a Player> {
        let available = auction.available_players();
        if available.is_empty() {
            return None;
        }
        let idx = auction.current_auction.current_player_index % available.len();
        available.get(idx).copied()
    }

    fn current_team<'a>(&self, _auction: &'a Auction) -> Option<&'a Team> {
        None
    }

    fn advance(&self, auction: &Auction) -> PointerAdvance {
        PointerAdvance::Player(auction.current_auction.current_player_index + 1)
    }

    fn is_terminal(&self, auction: &Auction) -> bool {
        auction.available_players().is_empty()
    }
}

// ---------------------------------------------------------------------------
// teamBid / numberWise: team round-robin
// ---------------------------------------------------------------------------

fn team_on_turn(auction: &Auction) -> Option<&Team> {
    let teams = auction.ordered_teams();
    if teams.is_empty() {
        return None;
    }
    let idx = auction.current_auction.current_team_index % teams.len();
    teams.get(idx).copied()
}

fn rosters_full(auction: &Auction) -> bool {
    auction
        .teams
        .values()
        .all(|t| t.players.len() >= auction.players_per_team)
}

/// Teams take turns; the team on turn picks a player for its roster. The
/// pointer advances whatever the slot's outcome was.
pub struct TeamBidFlow;

impl TurnFlow for TeamBidFlow {
    fn current_player<'a>(&self, _auction: &'a Auction) -> Option<&'a Player> {
        None
    }

    fn current_team<'a>(&self, auction: &'a Auction) -> Option<&'a Team> {
        team_on_turn(auction)
    }

    fn advance(&self, auction: &Auction) -> PointerAdvance {
        PointerAdvance::Team(auction.current_auction.current_team_index + 1)
    }

    fn is_terminal(&self, auction: &Auction) -> bool {
        rosters_full(auction) || auction.available_players().is_empty()
    }
}

/// Same rotation as teamBid; selection is a direct assignment with no bid
/// amount at all.
pub struct NumberWiseFlow;

impl TurnFlow for NumberWiseFlow {
    fn current_player<'a>(&self, _auction: &'a Auction) -> Option<&'a Player> {
        None
    }

    fn current_team<'a>(&self, auction: &'a Auction) -> Option<&'a Team> {
        team_on_turn(auction)
    }

    fn advance(&self, auction: &Auction) -> PointerAdvance {
        PointerAdvance::Team(auction.current_auction.current_team_index + 1)
    }

    fn is_terminal(&self, auction: &Auction) -> bool {
        rosters_full(auction) || auction.available_players().is_empty()
    }
}
