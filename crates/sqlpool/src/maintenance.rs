//! Background maintenance.
//!
//! One sweep loop serves every pool in a registry. Each pass reaps expired
//! idle connections and pre-warms pools below their minimum population; see
//! [`Pool::sweep`](crate::pool::Pool::sweep). Errors inside a pass are
//! logged and swallowed so the loop never stops, and the loop itself ends
//! when the registry is dropped or closed.

use std::sync::Weak;
use std::time::Duration;

use crate::driver::Driver;
use crate::registry::RegistryInner;

pub(crate) async fn sweep_loop<D: Driver>(registry: Weak<RegistryInner<D>>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately; consume it so the first sweep
    // happens one interval from now.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(inner) = registry.upgrade() else { break };
        let pools = inner.pools_snapshot();
        drop(inner);
        for pool in pools {
            pool.sweep().await;
        }
    }
    tracing::debug!("maintenance sweeper stopped");
}
