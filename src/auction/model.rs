// Domain model: auctions, teams, players, and the live turn state.
//
// Pure data with construction defaults and read views. All mutation flows
// through the allocation engine, which emits atomic store deltas; nothing in
// this module writes state.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Fixed palette for team colors. A team color outside this list is rejected
/// at add-team time.
pub const TEAM_COLORS: [&str; 12] = [
    "#FF5733", // red
    "#3357FF", // blue
    "#33FF57", // green
    "#FF33F5", // magenta
    "#FFD700", // gold
    "#FF8C00", // dark orange
    "#8A2BE2", // blue violet
    "#00CED1", // dark turquoise
    "#FF1493", // deep pink
    "#32CD32", // lime green
    "#FF4500", // orange red
    "#9370DB", // medium purple
];

/// Whether `color` is one of the allowed team colors.
pub fn is_palette_color(color: &str) -> bool {
    TEAM_COLORS.iter().any(|c| c.eq_ignore_ascii_case(color))
}

/// The turn protocol an auction runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuctionType {
    /// Open bidding on one player at a time; highest bid wins.
    PlayerBid,
    /// Teams take turns picking a player; no price competition.
    TeamBid,
    /// Round-robin direct selection by team order; no bidding at all.
    NumberWise,
}

impl AuctionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuctionType::PlayerBid => "playerBid",
            AuctionType::TeamBid => "teamBid",
            AuctionType::NumberWise => "numberWise",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SportType {
    Cricket,
    Football,
    Basketball,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuctionStatus {
    Draft,
    Scheduled,
    Live,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    Available,
    Sold,
    Unsold,
}

/// A player registered in an auction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub base_price: u64,
    pub status: PlayerStatus,
    /// Team id once sold, null otherwise. Must agree with the owning team's
    /// roster list at all times.
    #[serde(default)]
    pub assigned_to_team: Option<String>,
    /// 0 until sold. For teamBid/numberWise auctions this may stay 0 after a
    /// sale (allocation by turn order, not currency).
    pub final_price: u64,
    /// Presentation order, assigned at creation, stable thereafter.
    pub order: usize,
}

impl Player {
    /// A freshly added player: available, unassigned, no price.
    pub fn new(id: String, input: AddPlayerInput, order: usize) -> Self {
        Player {
            id,
            name: input.name,
            position: input.position,
            image_url: input.image_url,
            base_price: input.base_price,
            status: PlayerStatus::Available,
            assigned_to_team: None,
            final_price: 0,
            order,
        }
    }
}

/// A team competing in an auction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sponsor_name: Option<String>,
    /// Fixed at creation to the auction's per-team budget.
    pub total_credits: u64,
    /// Invariant: totalCredits minus the sum of finalPrice over the roster.
    pub remaining_credits: u64,
    /// Player ids in acquisition order. Derived back-reference of
    /// `Player.assignedToTeam`.
    #[serde(default)]
    pub players: Vec<String>,
    /// Insertion order; drives the number-wise turn rotation.
    pub order: usize,
}

impl Team {
    /// A freshly added team with a full budget and empty roster.
    pub fn new(id: String, input: AddTeamInput, total_credits: u64, order: usize) -> Self {
        Team {
            id,
            name: input.name,
            icon_url: input.icon_url,
            color: input.color,
            sponsor_name: input.sponsor_name,
            total_credits,
            remaining_credits: total_credits,
            players: Vec::new(),
            order,
        }
    }

    /// Credits consumed so far.
    pub fn spent(&self) -> u64 {
        self.total_credits - self.remaining_credits
    }
}

/// The live turn-pointer state. The only part of an auction the engine
/// mutates on every resolution; reset to a neutral bidding state
/// (`currentBiddingTeam = null`, `currentBidAmount = 0`) after each one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentAuctionState {
    pub current_player_index: usize,
    pub current_team_index: usize,
    #[serde(default)]
    pub current_bidding_team: Option<String>,
    pub current_bid_amount: u64,
    pub is_active: bool,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub completed_at: Option<i64>,
}

impl Default for CurrentAuctionState {
    fn default() -> Self {
        CurrentAuctionState {
            current_player_index: 0,
            current_team_index: 0,
            current_bidding_team: None,
            current_bid_amount: 0,
            is_active: false,
            started_at: None,
            completed_at: None,
        }
    }
}

/// One configured auction: owner, settings, embedded teams and players, and
/// the live turn state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Auction {
    pub id: String,
    pub owner_id: String,
    pub owner_name: String,
    pub auction_name: String,
    pub sport_type: SportType,
    pub auction_type: AuctionType,
    pub total_credits_per_team: u64,
    pub players_per_team: usize,
    pub min_bid_increment: u64,
    /// Scheduled event date, epoch milliseconds UTC.
    pub auction_date: i64,
    pub venue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// 8-char [A-Z0-9] public lookup key.
    pub referral_code: String,
    #[serde(default)]
    pub players: HashMap<String, Player>,
    #[serde(default)]
    pub teams: HashMap<String, Team>,
    pub current_auction: CurrentAuctionState,
    pub created_at: i64,
    pub updated_at: i64,
    pub status: AuctionStatus,
}

impl Auction {
    pub fn team(&self, team_id: &str) -> Option<&Team> {
        self.teams.get(team_id)
    }

    pub fn player(&self, player_id: &str) -> Option<&Player> {
        self.players.get(player_id)
    }

    /// All players sorted by presentation order.
    pub fn ordered_players(&self) -> Vec<&Player> {
        let mut players: Vec<&Player> = self.players.values().collect();
        players.sort_by_key(|p| p.order);
        players
    }

    /// All teams sorted by insertion order.
    pub fn ordered_teams(&self) -> Vec<&Team> {
        let mut teams: Vec<&Team> = self.teams.values().collect();
        teams.sort_by_key(|t| t.order);
        teams
    }

    /// Players still up for allocation, in presentation order.
    pub fn available_players(&self) -> Vec<&Player> {
        self.ordered_players()
            .into_iter()
            .filter(|p| p.status == PlayerStatus::Available)
            .collect()
    }

    pub fn sold_players(&self) -> Vec<&Player> {
        self.ordered_players()
            .into_iter()
            .filter(|p| p.status == PlayerStatus::Sold)
            .collect()
    }

    pub fn unsold_players(&self) -> Vec<&Player> {
        self.ordered_players()
            .into_iter()
            .filter(|p| p.status == PlayerStatus::Unsold)
            .collect()
    }

    /// Money-conservation audit: remaining credits plus sold prices must
    /// equal the total budget handed out. Holds for playerBid and teamBid
    /// auctions after every engine mutation.
    pub fn credits_conserved(&self) -> bool {
        let total: u64 = self.teams.values().map(|t| t.total_credits).sum();
        let remaining: u64 = self.teams.values().map(|t| t.remaining_credits).sum();
        let sold: u64 = self
            .players
            .values()
            .filter(|p| p.status == PlayerStatus::Sold)
            .map(|p| p.final_price)
            .sum();
        remaining + sold == total
    }
}

// ---------------------------------------------------------------------------
// Operation inputs
// ---------------------------------------------------------------------------

/// Settings supplied when creating an auction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAuctionInput {
    pub auction_name: String,
    pub sport_type: SportType,
    pub auction_type: AuctionType,
    pub total_credits_per_team: u64,
    pub players_per_team: usize,
    pub min_bid_increment: u64,
    pub auction_date: i64,
    pub venue: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTeamInput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sponsor_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPlayerInput {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub base_price: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn team_input(name: &str) -> AddTeamInput {
        AddTeamInput {
            name: name.to_string(),
            icon_url: None,
            color: TEAM_COLORS[0].to_string(),
            sponsor_name: None,
        }
    }

    fn player_input(name: &str, base_price: u64) -> AddPlayerInput {
        AddPlayerInput {
            name: name.to_string(),
            position: None,
            image_url: None,
            base_price,
        }
    }

    fn empty_auction() -> Auction {
        Auction {
            id: "a1".into(),
            owner_id: "owner".into(),
            owner_name: "Owner".into(),
            auction_name: "Premier Cup".into(),
            sport_type: SportType::Cricket,
            auction_type: AuctionType::PlayerBid,
            total_credits_per_team: 1000,
            players_per_team: 2,
            min_bid_increment: 50,
            auction_date: 2_000_000_000_000,
            venue: "City Ground".into(),
            image_url: None,
            referral_code: "AB12CD34".into(),
            players: HashMap::new(),
            teams: HashMap::new(),
            current_auction: CurrentAuctionState::default(),
            created_at: 1,
            updated_at: 1,
            status: AuctionStatus::Draft,
        }
    }

    #[test]
    fn new_team_has_full_budget_and_empty_roster() {
        let team = Team::new("t1".into(), team_input("Strikers"), 1000, 0);
        assert_eq!(team.total_credits, 1000);
        assert_eq!(team.remaining_credits, 1000);
        assert!(team.players.is_empty());
        assert_eq!(team.spent(), 0);
    }

    #[test]
    fn new_player_is_available_and_unassigned() {
        let player = Player::new("p1".into(), player_input("A. Kumar", 100), 0);
        assert_eq!(player.status, PlayerStatus::Available);
        assert!(player.assigned_to_team.is_none());
        assert_eq!(player.final_price, 0);
        assert_eq!(player.base_price, 100);
    }

    #[test]
    fn ordered_views_sort_by_order_field() {
        let mut auction = empty_auction();
        for (i, name) in ["C", "A", "B"].iter().enumerate() {
            let player = Player::new(format!("p{i}"), player_input(name, 10), 2 - i);
            auction.players.insert(player.id.clone(), player);
        }
        let names: Vec<&str> = auction
            .ordered_players()
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["B", "A", "C"]);
    }

    #[test]
    fn available_view_excludes_resolved_players() {
        let mut auction = empty_auction();
        let mut sold = Player::new("p0".into(), player_input("Sold Guy", 10), 0);
        sold.status = PlayerStatus::Sold;
        sold.final_price = 10;
        sold.assigned_to_team = Some("t1".into());
        let open = Player::new("p1".into(), player_input("Open Guy", 10), 1);
        auction.players.insert(sold.id.clone(), sold);
        auction.players.insert(open.id.clone(), open);

        let avail = auction.available_players();
        assert_eq!(avail.len(), 1);
        assert_eq!(avail[0].name, "Open Guy");
        assert_eq!(auction.sold_players().len(), 1);
        assert!(auction.unsold_players().is_empty());
    }

    #[test]
    fn credits_conserved_detects_drift() {
        let mut auction = empty_auction();
        let mut team = Team::new("t1".into(), team_input("Strikers"), 1000, 0);
        let mut player = Player::new("p1".into(), player_input("A. Kumar", 100), 0);
        player.status = PlayerStatus::Sold;
        player.final_price = 150;
        player.assigned_to_team = Some(team.id.clone());
        team.players.push(player.id.clone());
        team.remaining_credits = 850;
        auction.teams.insert(team.id.clone(), team);
        auction.players.insert(player.id.clone(), player);
        assert!(auction.credits_conserved());

        // Drop a credit on the floor.
        auction.teams.get_mut("t1").unwrap().remaining_credits = 849;
        assert!(!auction.credits_conserved());
    }

    #[test]
    fn palette_membership_is_case_insensitive() {
        assert!(is_palette_color("#FF5733"));
        assert!(is_palette_color("#ff5733"));
        assert!(!is_palette_color("#123456"));
    }

    #[test]
    fn camel_case_wire_format() {
        let team = Team::new("t1".into(), team_input("Strikers"), 500, 3);
        let json = serde_json::to_value(&team).unwrap();
        assert_eq!(json["remainingCredits"], 500);
        assert_eq!(json["totalCredits"], 500);
        assert_eq!(json["order"], 3);
        assert!(json.get("iconUrl").is_none());

        let status = serde_json::to_value(AuctionStatus::Live).unwrap();
        assert_eq!(status, "live");
        let kind = serde_json::to_value(AuctionType::NumberWise).unwrap();
        assert_eq!(kind, "numberWise");
    }
}
