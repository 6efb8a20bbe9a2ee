//! Stable-identifier extraction from the three whakoom URL shapes.
//!
//! All three families share one shape (`/{marker}/{id}/{slug...}`) but differ
//! in the marker keyword and in identifier type. The marker segment is always
//! looked up by value, never by positional offset, since slugs and trailing
//! segments vary in count.

use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum MalformedIdentifier {
    #[error("url has no `{marker}` segment followed by an identifier: {url}")]
    MissingMarker { marker: &'static str, url: String },

    #[error("segment `{segment}` after `{marker}` is not a numeric identifier: {url}")]
    NotNumeric {
        marker: &'static str,
        segment: String,
        url: String,
    },
}

/// List URLs look like `.../{owner}/lists/{slug}_{numeric_id}`. Returns the
/// numeric id together with the human-readable slug.
pub fn resolve_list_identifier(url: &str) -> Result<(i64, String), MalformedIdentifier> {
    let segment = segment_after(url, "lists")?;

    let Some((slug, raw_id)) = segment.rsplit_once('_') else {
        return Err(not_numeric("lists", segment, url));
    };
    let id = raw_id
        .parse::<i64>()
        .map_err(|_| not_numeric("lists", segment, url))?;

    Ok((id, slug.to_owned()))
}

/// Volume URLs look like `.../comics/{volume_id}/{slug}/{number}`. The volume
/// id is an opaque case-sensitive token and is never coerced to an integer.
pub fn resolve_volume_identifier(url: &str) -> Result<String, MalformedIdentifier> {
    let segment = segment_after(url, "comics")?;
    Ok(segment.to_owned())
}

/// Title URLs look like `.../ediciones/{numeric_id}/{slug}`.
pub fn resolve_title_identifier(url: &str) -> Result<i64, MalformedIdentifier> {
    let segment = segment_after(url, "ediciones")?;
    segment
        .parse::<i64>()
        .map_err(|_| not_numeric("ediciones", segment, url))
}

/// The owner profile is the path segment immediately before `lists` in a
/// profile or list URL.
pub fn resolve_owner_profile(url: &str) -> Result<String, MalformedIdentifier> {
    let mut previous: Option<&str> = None;
    for segment in path_segments(url) {
        if segment == "lists" {
            return match previous {
                Some(owner) => Ok(owner.to_owned()),
                None => Err(missing("lists", url)),
            };
        }
        previous = Some(segment);
    }

    Err(missing("lists", url))
}

/// Resolves a possibly relative `href` against the page it was found on.
pub fn absolutize(base: &str, href: &str) -> Result<String, url::ParseError> {
    let base = Url::parse(base)?;
    Ok(base.join(href)?.to_string())
}

fn segment_after<'a>(url: &'a str, marker: &'static str) -> Result<&'a str, MalformedIdentifier> {
    let mut segments = path_segments(url);
    while let Some(segment) = segments.next() {
        if segment == marker {
            return segments.next().ok_or_else(|| missing(marker, url));
        }
    }

    Err(missing(marker, url))
}

fn path_segments(url: &str) -> impl Iterator<Item = &str> {
    let without_fragment = url.split('#').next().unwrap_or_default();
    let without_query = without_fragment.split('?').next().unwrap_or_default();
    without_query.split('/').filter(|segment| !segment.is_empty())
}

fn missing(marker: &'static str, url: &str) -> MalformedIdentifier {
    MalformedIdentifier::MissingMarker {
        marker,
        url: url.to_owned(),
    }
}

fn not_numeric(marker: &'static str, segment: &str, url: &str) -> MalformedIdentifier {
    MalformedIdentifier::NotNumeric {
        marker,
        segment: segment.to_owned(),
        url: url.to_owned(),
    }
}
