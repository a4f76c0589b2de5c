use ritrovo::store::sqlite::SqliteSessionStore;
use sqlx::Row;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let db_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:data/ritrovo.db?mode=rwc".to_string());
    println!("Connecting to {}", db_url);
    let store = SqliteSessionStore::connect(&db_url).await?;

    println!("\n-- meet_sessions --");
    let rows = sqlx::query(
        "SELECT id, category, status, privacy_masked, search_radius_m, selected_place_id, proposed_place_id, confirmed_place_id, created_at, updated_at FROM meet_sessions ORDER BY updated_at DESC",
    )
    .fetch_all(store.pool())
    .await?;
    for r in rows.iter() {
        let id: String = r.try_get("id").unwrap_or_default();
        let category: String = r.try_get("category").unwrap_or_default();
        let status: String = r.try_get("status").unwrap_or_default();
        let masked: i64 = r.try_get("privacy_masked").unwrap_or(0);
        let radius: i64 = r.try_get("search_radius_m").unwrap_or(0);
        let selected: Option<String> = r.try_get("selected_place_id").unwrap_or(None);
        let proposed: Option<String> = r.try_get("proposed_place_id").unwrap_or(None);
        let confirmed: Option<String> = r.try_get("confirmed_place_id").unwrap_or(None);
        let created_at: i64 = r.try_get("created_at").unwrap_or(0);
        let updated_at: i64 = r.try_get("updated_at").unwrap_or(0);
        println!(
            "id={} category={} status={} masked={} radius={}m selected={:?} proposed={:?} confirmed={:?} created_at={} updated_at={}",
            id, category, status, masked, radius, selected, proposed, confirmed, created_at, updated_at
        );
    }

    println!("\n-- candidate places (last 5 sessions) --");
    let rows = sqlx::query(
        "SELECT id, candidate_places FROM meet_sessions ORDER BY updated_at DESC LIMIT 5",
    )
    .fetch_all(store.pool())
    .await?;
    for r in rows.iter() {
        let id: String = r.try_get("id").unwrap_or_default();
        let places_json: String = r.try_get("candidate_places").unwrap_or_default();
        println!("session={} places={}", id, places_json);
    }

    Ok(())
}
