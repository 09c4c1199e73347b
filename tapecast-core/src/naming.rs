use std::sync::OnceLock;

use regex::Regex;

use crate::scrape::{ReleaseMetadata, TrackDescriptor};

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"<[^>]+>").expect("static regex"))
}

fn space_run_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    // Collapses runs of whitespace except newlines, which the truncation
    // rule below needs to see.
    PATTERN.get_or_init(|| Regex::new(r"[^\S\n]+").expect("static regex"))
}

/// Normalize a raw track name for titles, filenames and descriptions.
///
/// Strips HTML-like tags, decodes `&gt; &lt; &amp;`, collapses whitespace
/// runs to single spaces and trims. Names longer than 100 characters or
/// containing a newline are truncated to the text before the first newline.
/// An empty result is replaced with a synthetic `Track N` label.
///
/// Preview and upload must both go through this function so their output
/// never diverges.
pub fn sanitize_track_name(raw: &str, track_number: u32) -> String {
    let stripped = tag_pattern().replace_all(raw.trim(), "");
    let decoded = stripped
        .replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&amp;", "&");
    let mut name = space_run_pattern()
        .replace_all(&decoded, " ")
        .trim()
        .to_string();
    if name.chars().count() > 100 || name.contains('\n') {
        name = name
            .split('\n')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
    }
    if name.is_empty() {
        name = format!("Track {track_number}");
    }
    name
}

pub fn video_title(track: &TrackDescriptor, release: &ReleaseMetadata) -> String {
    let name = sanitize_track_name(&track.name, track.number);
    format!("{} - {} - {}", release.performer, name, release.date)
}

pub fn track_description(track: &TrackDescriptor, release: &ReleaseMetadata) -> String {
    let name = sanitize_track_name(&track.name, track.number);
    format!(
        "{performer} live at {venue}, {date}.\n\n\
         Track {number}: {name}\n\n\
         Source: {source}",
        performer = release.performer,
        venue = release.venue,
        date = release.date,
        number = track.number,
        name = name,
        source = release.source_url,
    )
}

pub fn playlist_title(release: &ReleaseMetadata) -> String {
    format!(
        "{} - {} {}",
        release.performer, release.date, release.venue
    )
}

pub fn playlist_description(release: &ReleaseMetadata) -> String {
    let mut description = format!(
        "{performer} live at {venue}, {date}.\n\nSetlist:\n",
        performer = release.performer,
        venue = release.venue,
        date = release.date,
    );
    for track in &release.tracks {
        let name = sanitize_track_name(&track.name, track.number);
        description.push_str(&format!("{}. {}\n", track.number, name));
    }
    description.push_str(&format!("\nSource: {}", release.source_url));
    description
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release_with(tracks: Vec<TrackDescriptor>) -> ReleaseMetadata {
        ReleaseMetadata {
            identifier: "gd77".into(),
            title: "1977-05-08".into(),
            performer: "Grateful Dead".into(),
            venue: "Barton Hall".into(),
            date: "1977-05-08".into(),
            source_url: "https://archive.org/details/gd77".into(),
            tracks,
        }
    }

    fn track(number: u32, name: &str) -> TrackDescriptor {
        TrackDescriptor {
            number,
            name: name.into(),
            audio_url: "https://archive.org/download/gd77/t.mp3".into(),
            filename: "t.mp3".into(),
        }
    }

    #[test]
    fn strips_tags_decodes_entities_collapses_whitespace() {
        assert_eq!(
            sanitize_track_name("Set 1 &gt; Jam <br> into   Drums", 1),
            "Set 1 > Jam into Drums"
        );
    }

    #[test]
    fn long_name_with_newline_truncates_to_first_line() {
        let raw = format!("{}\nsecond line", "a".repeat(120));
        assert_eq!(sanitize_track_name(&raw, 1), "a".repeat(120));
        let with_break = format!("first line\n{}", "b".repeat(120));
        assert_eq!(sanitize_track_name(&with_break, 1), "first line");
    }

    #[test]
    fn empty_name_becomes_synthetic_label() {
        assert_eq!(sanitize_track_name("", 3), "Track 3");
        assert_eq!(sanitize_track_name("<b></b>", 3), "Track 3");
    }

    #[test]
    fn titles_embed_sanitized_names() {
        let release = release_with(vec![track(2, "Scarlet &gt; Fire")]);
        assert_eq!(
            video_title(&release.tracks[0], &release),
            "Grateful Dead - Scarlet > Fire - 1977-05-08"
        );
        assert_eq!(
            playlist_title(&release),
            "Grateful Dead - 1977-05-08 Barton Hall"
        );
    }

    #[test]
    fn playlist_description_lists_every_track() {
        let release = release_with(vec![track(1, "Jack Straw"), track(2, "")]);
        let description = playlist_description(&release);
        assert!(description.contains("1. Jack Straw"));
        assert!(description.contains("2. Track 2"));
        assert!(description.contains("Source: https://archive.org/details/gd77"));
    }
}
