// End-to-end negotiation walkthrough against the configured store. Uses a
// stub provider unless PLACES_API_KEY is set.
use std::sync::Arc;

use async_trait::async_trait;
use log::info;

use ritrovo::client::models::place::Place;
use ritrovo::client::services::invite_service::{parse_session_link, SmsInvite};
use ritrovo::client::services::places_service::{PlaceSearch, PlacesClient, PlacesError};
use ritrovo::client::services::session_service::SessionService;
use ritrovo::client::utils::token_store;
use ritrovo::common::geo::{haversine_distance_km, Coordinate};
use ritrovo::config::AppConfig;
use ritrovo::store::sqlite::SqliteSessionStore;
use ritrovo::store::SessionStore;
use ritrovo::utils::performance;

/// Fixed result set for runs without a provider credential.
struct StubPlaces;

#[async_trait]
impl PlaceSearch for StubPlaces {
    async fn search(
        &self,
        center: Coordinate,
        _category: &str,
        _radius_m: u32,
    ) -> Result<Vec<Place>, PlacesError> {
        let spots = [
            ("stub-1", "Caffè del Centro", "Piazza Castello 12", 0.004, 0.002, 4.6),
            ("stub-2", "Bar Lungofiume", "Corso Moncalieri 3", -0.006, 0.005, 4.4),
            ("stub-3", "Pasticceria Reale", "Via Po 21", 0.009, -0.007, 4.1),
        ];
        Ok(spots
            .iter()
            .map(|(id, name, address, dlat, dlng, rating)| {
                let location = Coordinate::new(center.latitude + dlat, center.longitude + dlng);
                Place {
                    id: id.to_string(),
                    name: name.to_string(),
                    address: address.to_string(),
                    location,
                    rating: *rating,
                    distance_km: haversine_distance_km(center, location),
                    provider_place_id: Some(id.to_string()),
                }
            })
            .collect())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env();
    std::env::set_var("RUST_LOG", &config.log_level);
    env_logger::init();

    let store = Arc::new(SqliteSessionStore::connect(&config.database_url).await?);

    // Start performance logger in background
    let perf_log_path = std::env::var("PERFORMANCE_LOG_PATH")
        .unwrap_or_else(|_| "data/ritrovo_performance.log".to_string());
    let perf_store = (*store).clone();
    tokio::spawn(async move {
        performance::start_performance_logger(perf_store, &perf_log_path).await;
    });

    let places: Arc<dyn PlaceSearch> = if config.places_api_key.trim().is_empty() {
        info!("No PLACES_API_KEY set, using the stub provider");
        Arc::new(StubPlaces)
    } else {
        Arc::new(PlacesClient::from_config(&config)?)
    };

    let service = SessionService::new(
        store.clone() as Arc<dyn SessionStore>,
        places,
        Arc::new(SmsInvite),
        &config.link_base,
    )
    .with_default_radius(config.default_search_radius_m);

    // Sender creates the session and shares the link
    let sender = Coordinate::new(37.7749, -122.4194);
    let session = service
        .create_session(sender, "cafe", true, Some("555-0100"))
        .await?;
    println!("Created session {} ({})", session.id, session.status);

    let url = service.session_url(&session)?;
    println!("Share link: {}", url);
    if let Err(e) = token_store::save_invite_token(&session.id, &session.invite_token) {
        println!("Could not stash invite token: {}", e);
    }

    // Watch the row like the counterpart's device would
    let mut subscription = service.subscribe(&session.id).await;
    let watcher = tokio::spawn(async move {
        while let Some(update) = subscription.recv().await {
            println!(
                "  [push] session {} -> {} ({} candidates)",
                update.id,
                update.status,
                update.candidate_places.len()
            );
            if update.status == ritrovo::client::models::session::MeetStatus::Confirmed {
                break;
            }
        }
    });

    // Receiver opens the link and joins
    let link = parse_session_link(&url).expect("demo link must parse");
    let receiver = Coordinate::new(37.8044, -122.2712);
    service
        .capture_receiver_location(&link.session_id, receiver, link.invite_token.as_deref())
        .await?;

    // Either device runs the search once both locations are known
    service.compute_midpoint_and_search(&link.session_id).await?;

    let ready = service.get_session(&link.session_id).await?;
    println!(
        "Midpoint: {}  (radius {}m)",
        ready.midpoint.expect("ready session has a midpoint"),
        ready.search_radius_m
    );
    for place in &ready.candidate_places {
        println!(
            "  candidate {}: {} ({:.1}★, {:.2} km) - {}",
            place.id, place.name, place.rating, place.distance_km, place.address
        );
    }

    // Negotiate: receiver proposes the top candidate, sender confirms
    if let Some(first) = ready.candidate_places.first() {
        let first_id = first.id.clone();
        service.propose_place(&ready.id, &first_id).await?;
        service.confirm_proposal(&ready.id).await?;
        let _ = watcher.await;
    } else {
        println!("No candidates found, nothing to propose");
        watcher.abort();
    }

    let done = service.get_session(&ready.id).await?;
    println!(
        "Final status: {} confirmed_place={:?}",
        done.status, done.confirmed_place_id
    );

    token_store::clear_invite_token(&done.id)?;
    Ok(())
}
