//! Connection pooling demonstration.
//!
//! Opens and closes a series of connections to show physical reuse, then
//! clears one pool and all pools programmatically, and finally opens a
//! fresh connection to show that a new physical session is established.
//!
//! Runs against the in-memory mock driver so no database server is needed:
//!
//! ```bash
//! cargo run --example pool_demo
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use sqlpool::{ConnectConfig, PoolRegistry};
use sqlpool_testing::MockDriver;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = ConnectConfig::from_connection_string(
        "Server=sql.demo.local;Initial Catalog=master;User Id=demo;Password=Demo123!;\
         Pooling=True;Max Pool Size=20;Min Pool Size=5;",
    )?;

    println!("=== Connection Pooling Demonstration ===\n");
    println!("Pool configuration:");
    println!("  Min connections: {}", config.pool.min_size);
    println!("  Max connections: {}", config.pool.max_size);
    println!("  Idle timeout: {:?}", config.pool.idle_timeout);
    println!();

    let driver = MockDriver::new();
    let registry = PoolRegistry::new(driver.clone());

    // Part 1: open and close several connections. Because pooling is
    // enabled, releases return the session to the pool instead of closing
    // it, and every checkout after the first reuses it.
    println!("Part 1: opening and closing 10 connections through the pool");
    for i in 1..=10 {
        let conn = registry.get(&config).await?;
        println!(
            "  -> connection #{i} open (session {}, checkout {})",
            conn.metadata().id,
            conn.metadata().checkout_count
        );
        // Returned to the pool when the handle drops.
    }
    println!();
    println!(
        "  {} physical session(s) served all 10 checkouts",
        driver.opened()
    );
    print_status(&registry, &config);

    // Part 2: clear the pool programmatically. Useful after maintenance on
    // the server or a connection-level fault: idle sessions close now, and
    // anything still leased is discarded when released.
    println!("\nPart 2: clearing pools programmatically");
    println!("  -> clear_pool for this configuration...");
    registry.clear_pool(&config).await;
    println!(
        "  <- pool cleared ({} session(s) closed)",
        driver.closed()
    );
    print_status(&registry, &config);

    println!("\n  -> clear_all across the registry...");
    registry.clear_all().await;
    println!("  <- all {} pool(s) cleared", registry.pool_count());

    // Part 3: the pool is now empty, so the next checkout has to establish
    // a brand-new physical session.
    println!("\nPart 3: opening a connection after the clear");
    let conn = registry.get(&config).await?;
    println!(
        "  -> new physical session {} (generation {})",
        conn.metadata().id,
        conn.metadata().generation
    );
    drop(conn);
    print_status(&registry, &config);

    println!("\nClosing registry...");
    registry.close().await;
    println!("=== Demonstration Complete ===");

    Ok(())
}

fn print_status(registry: &PoolRegistry<MockDriver>, config: &ConnectConfig) {
    let status = registry.pool(config).status();
    println!(
        "  status: {} idle / {} in use / {} max ({:.1}% utilization)",
        status.idle,
        status.in_use,
        status.max,
        status.utilization()
    );
}
