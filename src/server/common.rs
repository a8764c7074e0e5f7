use diesel::prelude::*;

use crate::db::models::Channel;
use crate::db::DbPool;

/// Shared by the M3U, HDHomeRun lineup, and EPG endpoints so all three
/// surfaces always agree on the set of enabled channels, by construction.
pub fn enabled_channels(pool: &DbPool) -> Vec<Channel> {
    use crate::db::schema::channels::dsl;
    let Ok(mut conn) = pool.get() else {
        return Vec::new();
    };
    dsl::channels
        .filter(dsl::enabled.ne(0))
        .select(Channel::as_select())
        .load::<Channel>(&mut conn)
        .unwrap_or_default()
}
