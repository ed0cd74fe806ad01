// Wire messages between auction clients and the session service.
//
// Tagged JSON frames: `{"type": "PLACE_BID", "payload": {...}}`. Clients
// join an auction first, then submit intents; the service answers the
// submitting client and pushes full snapshots to everyone joined.

use serde::{Deserialize, Serialize};

use crate::auction::model::Auction;

/// A frame from a client to the service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Join an auction by id (owner path) or referral code (guest path).
    Join(JoinRequest),
    PlaceBid(BidRequest),
    MarkSold(SoldRequest),
    MarkUnsold(UnsoldRequest),
    /// teamBid/numberWise: the team on turn takes the player.
    SelectPlayer(SelectRequest),
    StartAuction,
    CompleteAuction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referral_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BidRequest {
    pub team_id: String,
    pub player_id: String,
    /// Advisory; the engine recomputes the canonical amount.
    pub amount: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SoldRequest {
    pub player_id: String,
    pub team_id: String,
    pub final_price: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnsoldRequest {
    pub player_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelectRequest {
    pub player_id: String,
}

/// Which error bucket a rejection falls into.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum RejectionCode {
    Validation,
    Conflict,
    NotFound,
    Store,
}

/// A frame from the service to a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    Joined {
        #[serde(rename = "auctionId")]
        auction_id: String,
    },
    /// Full current state; a wholesale replacement of whatever the client
    /// held before.
    Snapshot { auction: Box<Auction> },
    BidAccepted {
        #[serde(rename = "teamId")]
        team_id: String,
        amount: u64,
    },
    /// The intent was refused. Conflicts carry the authoritative state so
    /// the client can resynchronize.
    Rejected {
        code: RejectionCode,
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auction: Option<Box<Auction>>,
    },
    /// The frame could not be understood at all.
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_round_trip() {
        let msg = ClientMessage::PlaceBid(BidRequest {
            team_id: "t1".into(),
            player_id: "p1".into(),
            amount: 150,
        });
        let text = serde_json::to_string(&msg).unwrap();
        assert!(text.contains(r#""type":"PLACE_BID""#));
        assert!(text.contains(r#""teamId":"t1""#));
        let back: ClientMessage = serde_json::from_str(&text).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn unit_variants_need_no_payload() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"START_AUCTION"}"#).unwrap();
        assert_eq!(msg, ClientMessage::StartAuction);
    }

    #[test]
    fn join_accepts_either_key() {
        let by_code: ClientMessage =
            serde_json::from_str(r#"{"type":"JOIN","payload":{"referralCode":"AB12CD34"}}"#)
                .unwrap();
        assert_eq!(
            by_code,
            ClientMessage::Join(JoinRequest {
                auction_id: None,
                referral_code: Some("AB12CD34".into()),
            })
        );
    }

    #[test]
    fn rejection_codes_serialize_camel_case() {
        assert_eq!(
            serde_json::to_value(RejectionCode::NotFound).unwrap(),
            serde_json::json!("notFound")
        );
    }

    #[test]
    fn unknown_frame_types_fail_to_parse() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"DANCE"}"#).is_err());
    }
}
