//! EPG generation: walks the same schedule-engine output and timeline
//! math the broadcaster uses to emit XMLTV `<programme>` elements whose
//! start/stop times match what is actually on the wire.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

use crate::channel::{broadcaster::ChannelBroadcaster, library};
use crate::config::Config;
use crate::db::models::Channel;
use crate::db::DbPool;
use crate::logo::resolve_logo_url;
use crate::schedule::PlayoutItem;

const MAX_PROGRAMMES_PER_CHANNEL: usize = 200;

/// Render the full XMLTV document for every enabled channel. Mirrors
/// C5's timeline math exactly (same `playout_start_time`, same item
/// list) so programme boundaries never drift from what the live stream
/// is actually doing (§4.8 "Time alignment").
pub fn generate_xmltv(pool: &DbPool, config: &Config, base_url: &str, now: DateTime<Utc>) -> String {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .ok();

    let tv_start = BytesStart::new("tv");
    writer.write_event(Event::Start(tv_start)).ok();

    let channels = enabled_channels(pool);
    let build_window = ChronoDuration::days(config.playout.build_days.max(1) as i64);
    let horizon = now + build_window;

    for channel in &channels {
        write_channel_element(&mut writer, channel, base_url);
    }

    for channel in &channels {
        let programmes = build_programmes(pool, config, channel, now, horizon);
        for programme in programmes {
            write_programme_element(&mut writer, &programme);
        }
    }

    writer.write_event(Event::End(BytesEnd::new("tv"))).ok();

    String::from_utf8(writer.into_inner().into_inner()).unwrap_or_default()
}

fn enabled_channels(pool: &DbPool) -> Vec<Channel> {
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

struct Programme {
    channel_number: String,
    title: String,
    description: String,
    sub_title: Option<String>,
    start: DateTime<Utc>,
    stop: DateTime<Utc>,
    categories: Vec<&'static str>,
}

fn build_programmes(
    pool: &DbPool,
    config: &Config,
    channel: &Channel,
    now: DateTime<Utc>,
    horizon: DateTime<Utc>,
) -> Vec<Programme> {
    let items = ChannelBroadcaster::load_items(pool, config, channel, now);

    if items.is_empty() {
        return vec![Programme {
            channel_number: channel.number.clone(),
            title: format!("{} - Live Stream", channel.name),
            description: format!("{} - Live Stream", channel.name),
            sub_title: None,
            start: now,
            stop: horizon,
            categories: vec!["General", "Live"],
        }];
    }

    let Ok(mut conn) = pool.get() else {
        return Vec::new();
    };
    let position = match library::load_or_init_position(&mut conn, channel.id.unwrap_or_default(), now) {
        Ok(p) => p,
        Err(_) => return Vec::new(),
    };
    drop(conn);

    let playout_start = position.playout_start_time();
    let Some(start_pos) = crate::channel::timeline::position_at(&items, playout_start, now) else {
        return Vec::new();
    };

    let mut programmes = Vec::new();
    let mut cursor = start_pos.item_absolute_start;
    let mut index = start_pos.current_index;

    while cursor < horizon && programmes.len() < MAX_PROGRAMMES_PER_CHANNEL {
        let item = &items[index % items.len()];
        let stop = cursor + chrono::Duration::from_std(item.duration).unwrap_or_default();

        if !item.is_skippable_filler() && stop > now {
            programmes.push(item_to_programme(&channel.number, item, cursor, stop));
        }

        cursor = stop;
        index += 1;
    }

    programmes
}

fn item_to_programme(channel_number: &str, item: &PlayoutItem, start: DateTime<Utc>, stop: DateTime<Utc>) -> Programme {
    use crate::schedule::PlayoutItemKind;

    let category = match item.filler_kind.as_deref() {
        Some("Commercial") => "Commercial",
        Some("PSA") => "PSA",
        Some(_) | None => match item.kind {
            PlayoutItemKind::PreRoll | PlayoutItemKind::MidRoll | PlayoutItemKind::PostRoll => "Commercial",
            _ => "General",
        },
    };

    Programme {
        channel_number: channel_number.to_string(),
        title: item.title.clone(),
        description: item.title.clone(),
        sub_title: None,
        start,
        stop,
        categories: vec![category],
    }
}

fn write_channel_element<W: std::io::Write>(writer: &mut Writer<W>, channel: &Channel, base_url: &str) {
    let mut start = BytesStart::new("channel");
    start.push_attribute(("id", channel.number.as_str()));
    writer.write_event(Event::Start(start)).ok();

    write_text_element(writer, "display-name", &channel.name);

    let icon_url = resolve_logo_url(base_url, &channel.number, channel.logo_path.as_deref());
    let mut icon = BytesStart::new("icon");
    icon.push_attribute(("src", icon_url.as_str()));
    writer.write_event(Event::Empty(icon)).ok();

    writer.write_event(Event::End(BytesEnd::new("channel"))).ok();
}

fn write_programme_element<W: std::io::Write>(writer: &mut Writer<W>, programme: &Programme) {
    let mut start = BytesStart::new("programme");
    start.push_attribute(("start", xmltv_timestamp(programme.start).as_str()));
    start.push_attribute(("stop", xmltv_timestamp(programme.stop).as_str()));
    start.push_attribute(("channel", programme.channel_number.as_str()));
    writer.write_event(Event::Start(start)).ok();

    write_text_element(writer, "title", &programme.title);
    if let Some(sub) = &programme.sub_title {
        write_text_element(writer, "sub-title", sub);
    }
    let desc = if programme.description.is_empty() {
        programme.title.as_str()
    } else {
        programme.description.as_str()
    };
    write_text_element(writer, "desc", desc);
    for category in &programme.categories {
        write_text_element(writer, "category", category);
    }

    writer.write_event(Event::End(BytesEnd::new("programme"))).ok();
}

fn write_text_element<W: std::io::Write>(writer: &mut Writer<W>, tag: &str, text: &str) {
    writer.write_event(Event::Start(BytesStart::new(tag))).ok();
    writer.write_event(Event::Text(BytesText::new(text))).ok();
    writer.write_event(Event::End(BytesEnd::new(tag))).ok();
}

fn xmltv_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S +0000").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_programme_has_two_categories() {
        let channel = Channel {
            id: Some(1),
            number: "80".to_string(),
            name: "Test Channel".to_string(),
            group_name: None,
            enabled: 1,
            logo_path: None,
            playout_mode: "CONTINUOUS".to_string(),
            ffmpeg_profile_id: None,
            hwaccel_hint: None,
            audio_language: None,
            subtitle_language: None,
            created_at: String::new(),
            updated_at: String::new(),
        };
        let now = Utc::now();
        let programmes = vec![Programme {
            channel_number: channel.number.clone(),
            title: format!("{} - Live Stream", channel.name),
            description: format!("{} - Live Stream", channel.name),
            sub_title: None,
            start: now,
            stop: now + ChronoDuration::days(1),
            categories: vec!["General", "Live"],
        }];
        assert_eq!(programmes[0].categories.len(), 2);
        assert!(!programmes[0].title.is_empty());
        assert!(!programmes[0].description.is_empty());
    }
}
