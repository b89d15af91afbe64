// src/transform.rs
//! Transform stage: broker envelope → canonical [`Movie`].
//!
//! Stateless record shaping. Both upstream shapes are recognised by their keys
//! (TMDB: `title`/`genre_ids`/`vote_average`; OMDB: `Title`/`imdbID`/`Genre`).
//! Records that carry no usable title are skipped, not failed.

use chrono::NaiveDate;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::extract::publisher::Envelope;
use crate::extract::types::RawRecord;

/// Canonical movie record shared by every loader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movie {
    pub imdb_id: Option<String>,
    pub movie_name: String,
    pub genres: Vec<String>,
    pub directors: Vec<String>,
    pub lead_actors: Vec<String>,
    pub rating: Option<f32>,
    pub awards: Vec<String>,
    pub release_date: Option<NaiveDate>,
}

impl Movie {
    /// Identity used by loaders to collapse duplicate deliveries.
    pub fn key(&self) -> String {
        match &self.imdb_id {
            Some(id) => id.clone(),
            None => format!(
                "{}|{}",
                self.movie_name.to_lowercase(),
                self.release_date.map(|d| d.to_string()).unwrap_or_default()
            ),
        }
    }
}

pub trait Transformer: Send + Sync {
    /// `Ok(None)` means the record carries nothing worth loading.
    fn transform(&self, envelope: &Envelope) -> anyhow::Result<Option<Movie>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MovieTransformer;

impl Transformer for MovieTransformer {
    fn transform(&self, envelope: &Envelope) -> anyhow::Result<Option<Movie>> {
        let r = &envelope.record;
        let movie = if r.contains_key("imdbID") || r.contains_key("Title") {
            from_omdb(r)
        } else {
            from_tmdb(r)
        };
        Ok(movie.filter(|m| !m.movie_name.is_empty()))
    }
}

/// Collapse whitespace, decode entities, strip tags.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();
    out
}

fn str_field<'a>(r: &'a RawRecord, key: &str) -> Option<&'a str> {
    r.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("N/A"))
}

/// OMDB packs lists into "A, B, C".
fn split_list(s: Option<&str>) -> Vec<String> {
    s.map(|s| {
        s.split(',')
            .map(normalize_text)
            .filter(|x| !x.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%d %b %Y"))
        .ok()
}

fn from_tmdb(r: &RawRecord) -> Option<Movie> {
    let name = str_field(r, "title").or_else(|| str_field(r, "original_title"))?;
    let genres = r
        .get("genre_ids")
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_u64)
                .filter_map(tmdb_genre)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(Movie {
        imdb_id: str_field(r, "imdb_id").map(str::to_string),
        movie_name: normalize_text(name),
        genres,
        directors: Vec::new(),
        lead_actors: Vec::new(),
        rating: r
            .get("vote_average")
            .and_then(Value::as_f64)
            .map(|v| v as f32),
        awards: Vec::new(),
        release_date: str_field(r, "release_date").and_then(parse_date),
    })
}

fn from_omdb(r: &RawRecord) -> Option<Movie> {
    let name = str_field(r, "Title")?;
    let release_date = str_field(r, "Released").and_then(parse_date).or_else(|| {
        str_field(r, "Year")
            .and_then(|y| y.get(..4))
            .and_then(|y| y.parse::<i32>().ok())
            .and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1))
    });
    Some(Movie {
        imdb_id: str_field(r, "imdbID").map(str::to_string),
        movie_name: normalize_text(name),
        genres: split_list(str_field(r, "Genre")),
        directors: split_list(str_field(r, "Director")),
        lead_actors: split_list(str_field(r, "Actors")),
        rating: str_field(r, "imdbRating").and_then(|v| v.parse::<f32>().ok()),
        awards: str_field(r, "Awards")
            .map(|a| vec![normalize_text(a)])
            .unwrap_or_default(),
        release_date,
    })
}

/// TMDB movie genre ids.
fn tmdb_genre(id: u64) -> Option<&'static str> {
    Some(match id {
        28 => "Action",
        12 => "Adventure",
        16 => "Animation",
        35 => "Comedy",
        80 => "Crime",
        99 => "Documentary",
        18 => "Drama",
        10751 => "Family",
        14 => "Fantasy",
        36 => "History",
        27 => "Horror",
        10402 => "Music",
        9648 => "Mystery",
        10749 => "Romance",
        878 => "Science Fiction",
        10770 => "TV Movie",
        53 => "Thriller",
        10752 => "War",
        37 => "Western",
        _ => return None,
    })
}
