//! JSON-lines wire format between the node and its client boundary.
//!
//! Each inbound line is one [`Inbound`] message tagged by `type`; each
//! outbound line is one [`Outbound`] message.

use dispatch_core::events::DispatchEvent;
use dispatch_core::geo::Coordinates;
use dispatch_core::index::{DriverState, NearbyDriver};
use dispatch_core::ingestion::LocationUpdate;
use dispatch_core::matching::MatchCandidate;
use dispatch_core::query::{EtaQuote, QueryError};
use dispatch_core::rides::{RideIntake, RideRequest};
use dispatch_core::telemetry::TelemetrySnapshot;
use dispatch_core::types::{DriverId, RequestId, VehicleClass};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::node::Node;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    Location(LocationUpdate),
    Ride(RideIntake),
    Cancel {
        request_id: RequestId,
    },
    Nearby {
        lat: f64,
        lon: f64,
        #[serde(default)]
        radius_km: Option<f64>,
        #[serde(default)]
        vehicle_class: Option<VehicleClass>,
    },
    /// Ranked candidates for a known request without committing a match.
    Candidates {
        request_id: RequestId,
    },
    GetRide {
        request_id: RequestId,
    },
    /// Last persisted location of a driver (cache, then durable store).
    Driver {
        driver_id: DriverId,
    },
    /// Quote from an explicit driver position, or from the indexed position
    /// of `driver_id` when no coordinates are given.
    Eta {
        #[serde(default)]
        driver_id: Option<DriverId>,
        #[serde(default)]
        driver_lat: Option<f64>,
        #[serde(default)]
        driver_lon: Option<f64>,
        pickup_lat: f64,
        pickup_lon: f64,
        vehicle_class: VehicleClass,
    },
    Stats,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    Event {
        event: DispatchEvent,
    },
    Ride {
        request: RideRequest,
    },
    Nearby {
        drivers: Vec<NearbyDriver>,
    },
    Candidates {
        request_id: RequestId,
        candidates: Vec<MatchCandidate>,
    },
    Driver {
        driver_id: DriverId,
        state: Option<DriverState>,
    },
    Eta {
        #[serde(skip_serializing_if = "Option::is_none")]
        driver_id: Option<DriverId>,
        quote: EtaQuote,
    },
    Stats {
        drivers: usize,
        available: usize,
        pending_requests: usize,
        telemetry: TelemetrySnapshot,
    },
    Error {
        message: String,
    },
}

impl Outbound {
    fn error(message: impl ToString) -> Self {
        Self::Error {
            message: message.to_string(),
        }
    }
}

/// Parses and handles one input line. Blank lines and accepted location
/// updates produce no reply.
pub async fn handle_line(node: &Node, line: &str) -> Option<Outbound> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<Inbound>(line) {
        Ok(message) => handle(node, message).await,
        Err(error) => {
            debug!(%error, "unparseable input line");
            Some(Outbound::error(format!("malformed message: {error}")))
        }
    }
}

pub async fn handle(node: &Node, message: Inbound) -> Option<Outbound> {
    let reply = match message {
        Inbound::Location(update) => match node.locations.publish(update).await {
            Ok(()) => return None,
            Err(error) => Outbound::error(error),
        },
        Inbound::Ride(intake) => match node.dispatcher.submit(intake) {
            Ok((request, _)) => Outbound::Ride { request },
            Err(error) => Outbound::error(error),
        },
        Inbound::Cancel { request_id } => match node.dispatcher.cancel(request_id) {
            Ok(request) => Outbound::Ride { request },
            Err(error) => Outbound::error(error),
        },
        Inbound::Nearby {
            lat,
            lon,
            radius_km,
            vehicle_class,
        } => match node
            .query
            .nearby_drivers(lat, lon, radius_km, vehicle_class.as_ref())
        {
            Ok(drivers) => Outbound::Nearby { drivers },
            Err(error) => Outbound::error(error),
        },
        Inbound::Candidates { request_id } => {
            let Some(request) = node.dispatcher.rides().get(request_id) else {
                return Some(Outbound::error(format!("unknown ride request {request_id}")));
            };
            match node.query.match_request(&request) {
                Ok(candidates) => Outbound::Candidates {
                    request_id,
                    candidates,
                },
                Err(error) => Outbound::error(error),
            }
        }
        Inbound::GetRide { request_id } => match node.dispatcher.rides().get(request_id) {
            Some(request) => Outbound::Ride { request },
            None => Outbound::error(format!("unknown ride request {request_id}")),
        },
        Inbound::Driver { driver_id } => match node.driver_location(driver_id).await {
            Ok(state) => Outbound::Driver { driver_id, state },
            Err(error) => Outbound::error(error),
        },
        Inbound::Eta {
            driver_id,
            driver_lat,
            driver_lon,
            pickup_lat,
            pickup_lon,
            vehicle_class,
        } => {
            let driver = match (driver_lat, driver_lon, driver_id) {
                (Some(lat), Some(lon), _) => Coordinates::new(lat, lon).map_err(QueryError::from),
                (None, None, Some(id)) => match node.index.get(id) {
                    Some(state) => Ok(state.position),
                    None => return Some(Outbound::error(format!("unknown driver {id}"))),
                },
                _ => {
                    return Some(Outbound::error(
                        "eta needs driver_lat and driver_lon, or a driver_id",
                    ))
                }
            };
            let quote = driver.and_then(|driver| {
                let pickup = Coordinates::new(pickup_lat, pickup_lon)?;
                node.query.estimate_eta(driver, pickup, &vehicle_class)
            });
            match quote {
                Ok(quote) => Outbound::Eta { driver_id, quote },
                Err(error) => Outbound::error(error),
            }
        }
        Inbound::Stats => Outbound::Stats {
            drivers: node.index.len(),
            available: node.index.available_count(),
            pending_requests: node.dispatcher.rides().pending().len(),
            telemetry: node.telemetry.snapshot(),
        },
    };
    Some(reply)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use dispatch_core::clock::ManualClock;
    use dispatch_core::config::DispatchConfig;
    use dispatch_core::rides::RideStatus;
    use tokio_util::sync::CancellationToken;

    use super::*;

    const NOON_UTC_MS: u64 = 1_704_110_400_000;

    fn start() -> (Node, CancellationToken) {
        let shutdown = CancellationToken::new();
        let (node, _events) = Node::start(
            &DispatchConfig::default(),
            Arc::new(ManualClock::new(NOON_UTC_MS)),
            64,
            &shutdown,
        )
        .expect("node");
        (node, shutdown)
    }

    async fn send(node: &Node, line: &str) -> Option<Outbound> {
        handle_line(node, line).await
    }

    #[test]
    fn parses_tagged_messages() {
        let message: Inbound = serde_json::from_str(
            r#"{"type":"location","driver_id":7,"lat":37.77,"lon":-122.41,
                "online":true,"available":true,"vehicle_class":"STANDARD",
                "timestamp_ms":10}"#,
        )
        .expect("location");
        assert!(matches!(message, Inbound::Location(ref u) if u.driver_id == DriverId(7)));

        let message: Inbound =
            serde_json::from_str(r#"{"type":"nearby","lat":1.0,"lon":2.0}"#).expect("nearby");
        assert_eq!(
            message,
            Inbound::Nearby {
                lat: 1.0,
                lon: 2.0,
                radius_km: None,
                vehicle_class: None
            }
        );
        assert_eq!(
            serde_json::from_str::<Inbound>(r#"{"type":"stats"}"#).expect("stats"),
            Inbound::Stats
        );
    }

    #[test]
    fn outbound_is_tagged_json() {
        let json = serde_json::to_value(Outbound::error("boom")).expect("json");
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "boom");
    }

    #[tokio::test(start_paused = true)]
    async fn location_then_ride_is_matched() {
        let (node, shutdown) = start();
        let location = format!(
            r#"{{"type":"location","driver_id":1,"lat":37.7749,"lon":-122.4194,"online":true,"available":true,"vehicle_class":"STANDARD","timestamp_ms":{NOON_UTC_MS}}}"#
        );
        assert_eq!(send(&node, &location).await, None);
        for _ in 0..100 {
            if node.index.len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(node.index.len(), 1);

        let reply = send(
            &node,
            r#"{"type":"ride","request_id":5,"rider_id":50,"pickup_lat":37.7750,"pickup_lon":-122.4193,"dropoff_lat":37.79,"dropoff_lon":-122.41,"vehicle_class":"STANDARD"}"#,
        )
        .await;
        match reply {
            Some(Outbound::Ride { request }) => {
                assert_eq!(request.status, RideStatus::Matched);
                assert_eq!(request.matched_driver, Some(DriverId(1)));
            }
            other => panic!("unexpected reply {other:?}"),
        }

        let reply = send(&node, r#"{"type":"cancel","request_id":5}"#).await;
        assert!(matches!(reply, Some(Outbound::Error { .. })));

        shutdown.cancel();
        node.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn eta_accepts_explicit_driver_position() {
        let (node, shutdown) = start();
        let reply = send(
            &node,
            r#"{"type":"eta","driver_lat":37.7749,"driver_lon":-122.4194,"pickup_lat":37.7849,"pickup_lon":-122.4194,"vehicle_class":"PREMIUM"}"#,
        )
        .await;
        match reply {
            Some(Outbound::Eta { driver_id, quote }) => {
                assert_eq!(driver_id, None);
                assert!((quote.distance_km - 1.11).abs() < 0.01);
                assert!(quote.minutes > 0.0);
            }
            other => panic!("unexpected reply {other:?}"),
        }
        shutdown.cancel();
        node.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn driver_and_ride_lookups() {
        let (node, shutdown) = start();
        let location = format!(
            r#"{{"type":"location","driver_id":3,"lat":37.7749,"lon":-122.4194,"online":true,"available":true,"vehicle_class":"STANDARD","timestamp_ms":{NOON_UTC_MS}}}"#
        );
        assert_eq!(send(&node, &location).await, None);
        for _ in 0..100 {
            if node.telemetry.snapshot().write_through_ok >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        match send(&node, r#"{"type":"driver","driver_id":3}"#).await {
            Some(Outbound::Driver { driver_id, state }) => {
                assert_eq!(driver_id, DriverId(3));
                let state = state.expect("persisted driver");
                assert_eq!(state.last_update_ms, NOON_UTC_MS);
            }
            other => panic!("unexpected reply {other:?}"),
        }
        assert!(matches!(
            send(&node, r#"{"type":"driver","driver_id":404}"#).await,
            Some(Outbound::Driver { state: None, .. })
        ));

        send(
            &node,
            r#"{"type":"ride","request_id":8,"rider_id":80,"pickup_lat":37.70,"pickup_lon":-122.40,"dropoff_lat":37.71,"dropoff_lon":-122.40,"vehicle_class":"POOL"}"#,
        )
        .await;
        match send(&node, r#"{"type":"get_ride","request_id":8}"#).await {
            Some(Outbound::Ride { request }) => {
                assert_eq!(request.request_id, RequestId(8));
                assert_eq!(request.status, RideStatus::Pending);
            }
            other => panic!("unexpected reply {other:?}"),
        }
        shutdown.cancel();
        node.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn bad_input_yields_error_replies() {
        let (node, shutdown) = start();
        assert_eq!(send(&node, "   ").await, None);
        assert!(matches!(send(&node, "not json").await, Some(Outbound::Error { .. })));
        assert!(matches!(
            send(&node, r#"{"type":"nearby","lat":123.0,"lon":0.0}"#).await,
            Some(Outbound::Error { .. })
        ));
        assert!(matches!(
            send(
                &node,
                r#"{"type":"eta","driver_id":9,"pickup_lat":0.0,"pickup_lon":0.0,"vehicle_class":"STANDARD"}"#
            )
            .await,
            Some(Outbound::Error { .. })
        ));
        assert!(matches!(
            send(&node, r#"{"type":"eta","pickup_lat":0.0,"pickup_lon":0.0,"vehicle_class":"STANDARD"}"#).await,
            Some(Outbound::Error { .. })
        ));
        assert!(matches!(
            send(&node, r#"{"type":"get_ride","request_id":77}"#).await,
            Some(Outbound::Error { .. })
        ));
        match send(&node, r#"{"type":"stats"}"#).await {
            Some(Outbound::Stats {
                drivers,
                pending_requests,
                ..
            }) => assert_eq!((drivers, pending_requests), (0, 0)),
            other => panic!("unexpected reply {other:?}"),
        }
        shutdown.cancel();
        node.join().await;
    }
}
