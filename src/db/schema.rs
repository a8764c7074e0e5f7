// @generated by hand to match the migrations under migrations/, in the
// style diesel print-schema would emit.

diesel::table! {
    channels (id) {
        id -> Nullable<Integer>,
        number -> Text,
        name -> Text,
        group_name -> Nullable<Text>,
        enabled -> Integer,
        logo_path -> Nullable<Text>,
        playout_mode -> Text,
        ffmpeg_profile_id -> Nullable<Integer>,
        hwaccel_hint -> Nullable<Text>,
        audio_language -> Nullable<Text>,
        subtitle_language -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    media_items (id) {
        id -> Nullable<Integer>,
        source -> Text,
        source_native_id -> Text,
        url -> Text,
        title -> Text,
        description -> Nullable<Text>,
        duration_secs -> Nullable<Integer>,
        thumbnail -> Nullable<Text>,
        uploader -> Nullable<Text>,
        upload_date -> Nullable<Text>,
        metadata_json -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    collections (id) {
        id -> Nullable<Integer>,
        name -> Text,
        collection_type -> Text,
        smart_query -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    collection_items (id) {
        id -> Nullable<Integer>,
        collection_id -> Integer,
        media_item_id -> Integer,
        position -> Integer,
    }
}

diesel::table! {
    schedules (id) {
        id -> Nullable<Integer>,
        channel_id -> Integer,
        is_yaml_source -> Integer,
        yaml_path -> Nullable<Text>,
        keep_multi_part_together -> Integer,
        treat_collections_as_shows -> Integer,
        shuffle -> Integer,
        random_start -> Integer,
        repeat -> Integer,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    schedule_items (id) {
        id -> Nullable<Integer>,
        schedule_id -> Integer,
        position -> Integer,
        start_type -> Text,
        target_type -> Text,
        target_id -> Nullable<Integer>,
        playback_order -> Text,
        playout_mode -> Text,
        fill_with_group_mode -> Nullable<Text>,
        tail_mode -> Nullable<Text>,
        guide_mode -> Nullable<Text>,
        custom_title -> Nullable<Text>,
        filler_kind -> Nullable<Text>,
        override_id -> Nullable<Integer>,
    }
}

diesel::table! {
    channel_playback_positions (channel_id) {
        channel_id -> Integer,
        playout_start_time -> Text,
        last_item_index -> Integer,
        last_item_media_id -> Nullable<Integer>,
        last_position_update -> Text,
        total_items_watched -> Integer,
    }
}

diesel::table! {
    ffmpeg_profiles (id) {
        id -> Nullable<Integer>,
        name -> Text,
        video_encoder -> Nullable<Text>,
        video_bitrate_kbps -> Nullable<Integer>,
        audio_encoder -> Nullable<Text>,
        audio_bitrate_kbps -> Nullable<Integer>,
        resolution_width -> Nullable<Integer>,
        resolution_height -> Nullable<Integer>,
        watermark_path -> Nullable<Text>,
        extra_flags -> Nullable<Text>,
    }
}

diesel::joinable!(channels -> ffmpeg_profiles (ffmpeg_profile_id));
diesel::joinable!(collection_items -> collections (collection_id));
diesel::joinable!(collection_items -> media_items (media_item_id));
diesel::joinable!(schedules -> channels (channel_id));
diesel::joinable!(schedule_items -> schedules (schedule_id));
diesel::joinable!(channel_playback_positions -> channels (channel_id));

diesel::allow_tables_to_appear_in_same_query!(
    channels,
    media_items,
    collections,
    collection_items,
    schedules,
    schedule_items,
    channel_playback_positions,
    ffmpeg_profiles,
);
