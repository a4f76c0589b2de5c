use std::{fs::OpenOptions, io::Write, time::Duration};

use chrono::Utc;
use log::{error, info, warn};
use sysinfo::System;
use tokio::time;

use crate::store::sqlite::SqliteSessionStore;

/// Append a line of session/process statistics to `log_path` every two
/// minutes. Runs until the process exits.
pub async fn start_performance_logger(store: SqliteSessionStore, log_path: &str) {
    let mut system = System::new_all();

    let mut file = match OpenOptions::new().create(true).append(true).open(log_path) {
        Ok(f) => f,
        Err(e) => {
            error!("Unable to open performance log file '{}': {}", log_path, e);
            return;
        }
    };

    // Write header if file is empty
    if file.metadata().map(|m| m.len()).unwrap_or(0) == 0 {
        if let Err(e) = writeln!(file, "# Ritrovo Performance Log") {
            error!("Failed to write header to performance log: {}", e);
            return;
        }
        if let Err(e) = writeln!(file, "# Timestamp, Total_Sessions, Awaiting, Confirmed, CPU_Usage") {
            error!("Failed to write header to performance log: {}", e);
            return;
        }
        info!("📊 Performance log initialized: {}", log_path);
    }

    loop {
        system.refresh_all();
        let cpu_usage =
            system.cpus().iter().map(|c| c.cpu_usage()).sum::<f32>() / system.cpus().len() as f32;
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");

        let total = count(&store, "SELECT COUNT(*) FROM meet_sessions").await;
        let awaiting = count(
            &store,
            "SELECT COUNT(*) FROM meet_sessions WHERE status = 'link_sent'",
        )
        .await;
        let confirmed = count(
            &store,
            "SELECT COUNT(*) FROM meet_sessions WHERE status = 'confirmed'",
        )
        .await;

        info!(
            "📊 Performance - Sessions: {}, Awaiting: {}, Confirmed: {}, CPU: {:.1}%",
            total, awaiting, confirmed, cpu_usage
        );

        if let Err(e) = writeln!(
            file,
            "{}, {}, {}, {}, {:.1}%",
            timestamp, total, awaiting, confirmed, cpu_usage
        ) {
            error!("Failed to write to performance log: {}", e);
        } else if let Err(e) = file.flush() {
            error!("Failed to flush performance log: {}", e);
        }

        time::sleep(Duration::from_secs(120)).await;
    }
}

async fn count(store: &SqliteSessionStore, query: &str) -> i64 {
    match sqlx::query_scalar::<_, i64>(query).fetch_one(store.pool()).await {
        Ok(n) => n,
        Err(e) => {
            warn!("Failed to query session stats: {}", e);
            -1
        }
    }
}
