pub mod connection;
pub mod models;
pub mod schema;

pub use connection::{
    database_url_for, default_db_path, establish_connection, run_migrations, DbConnection,
    DbPool, DbPooledConnection,
};
pub use models::{
    Channel, ChannelPlaybackPosition, Collection, CollectionItem, CollectionType, FfmpegProfile,
    MediaItem, MediaSourceKind, NewChannel, NewCollection, NewCollectionItem, NewMediaItem,
    PlayoutMode, Schedule, ScheduleItemRow,
};
