//! Core data types for order recognition and candidate matching

use std::borrow::Cow;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::entities::normalize_session_time;

/// Structured fields recognised in a pasted order receipt.
///
/// Every field is empty (or `None`) when the receipt does not carry it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub order_id: String,
    pub city: String,
    pub cinema_name: String,
    pub cinema_address: String,
    pub film_name: String,
    pub session_time: String,
    pub hall_name: String,
    pub seats: Vec<String>,
    pub price: Option<f64>,
    pub raw_text: String,
}

impl OrderIntent {
    /// Returns true when nothing was recognised in the source text.
    pub fn is_empty(&self) -> bool {
        self.order_id.is_empty()
            && self.city.is_empty()
            && self.cinema_name.is_empty()
            && self.cinema_address.is_empty()
            && self.film_name.is_empty()
            && self.session_time.is_empty()
            && self.hall_name.is_empty()
            && self.seats.is_empty()
            && self.price.is_none()
    }
}

/// The strategy that produced a candidate's score, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Alias,
    Brand,
    Fuzzy,
    Keyword,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Alias => "alias",
            MatchType::Brand => "brand",
            MatchType::Fuzzy => "fuzzy",
            MatchType::Keyword => "keyword",
        }
    }

    /// Multiplier applied to the raw score when deriving confidence.
    pub fn confidence_multiplier(&self) -> f64 {
        match self {
            MatchType::Exact => 1.0,
            MatchType::Alias => 0.95,
            MatchType::Brand => 0.85,
            MatchType::Fuzzy => 0.75,
            MatchType::Keyword => 0.65,
        }
    }

    /// Lower is stronger. Used to break score ties.
    pub(crate) fn priority(&self) -> u8 {
        match self {
            MatchType::Exact => 0,
            MatchType::Alias => 1,
            MatchType::Brand => 2,
            MatchType::Fuzzy => 3,
            MatchType::Keyword => 4,
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A scored match between a target string and one candidate record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate<T> {
    pub record: T,
    pub score: f64,
    pub match_type: MatchType,
    pub confidence: f64,
    pub reasons: Vec<String>,
}

impl<T> MatchCandidate<T> {
    /// Map the inner record to a different type
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> MatchCandidate<U> {
        MatchCandidate {
            record: f(self.record),
            score: self.score,
            match_type: self.match_type,
            confidence: self.confidence,
            reasons: self.reasons,
        }
    }
}

/// Uniform projection of a candidate record onto the name it is matched by.
pub trait Candidate {
    fn primary_name(&self) -> Cow<'_, str>;
}

impl Candidate for String {
    fn primary_name(&self) -> Cow<'_, str> {
        Cow::Borrowed(self.as_str())
    }
}

impl Candidate for &str {
    fn primary_name(&self) -> Cow<'_, str> {
        Cow::Borrowed(self)
    }
}

/// The four cascade stages, in resolution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Cinema,
    Film,
    Showtime,
    Seats,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Cinema, Stage::Film, Stage::Showtime, Stage::Seats];

    pub fn index(&self) -> usize {
        match self {
            Stage::Cinema => 0,
            Stage::Film => 1,
            Stage::Showtime => 2,
            Stage::Seats => 3,
        }
    }

    /// Human-readable name shown by the UI layer.
    pub fn display_name(&self) -> &'static str {
        match self {
            Stage::Cinema => "影院",
            Stage::Film => "影片",
            Stage::Showtime => "场次",
            Stage::Seats => "座位",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CinemaRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub city: String,
    /// Vendor payload carried through untouched.
    #[serde(default)]
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilmRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShowtimeRecord {
    pub id: String,
    pub start_time: String,
    #[serde(default)]
    pub hall_name: String,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatRecord {
    pub id: String,
    pub row: u32,
    pub col: u32,
    #[serde(default = "default_available")]
    pub available: bool,
    #[serde(default)]
    pub raw: serde_json::Value,
}

fn default_available() -> bool {
    true
}

impl SeatRecord {
    pub fn new(id: impl Into<String>, row: u32, col: u32) -> Self {
        Self {
            id: id.into(),
            row,
            col,
            available: true,
            raw: serde_json::Value::Null,
        }
    }
}

impl Candidate for CinemaRecord {
    fn primary_name(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.name)
    }
}

impl Candidate for FilmRecord {
    fn primary_name(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.name)
    }
}

impl Candidate for ShowtimeRecord {
    fn primary_name(&self) -> Cow<'_, str> {
        Cow::Owned(normalize_session_time(&self.start_time))
    }
}

impl Candidate for SeatRecord {
    fn primary_name(&self) -> Cow<'_, str> {
        Cow::Owned(format!("{}排{}座", self.row, self.col))
    }
}

/// A candidate record of any stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "record", rename_all = "lowercase")]
pub enum StageRecord {
    Cinema(CinemaRecord),
    Film(FilmRecord),
    Showtime(ShowtimeRecord),
    Seat(SeatRecord),
}

impl StageRecord {
    pub fn stage(&self) -> Stage {
        match self {
            StageRecord::Cinema(_) => Stage::Cinema,
            StageRecord::Film(_) => Stage::Film,
            StageRecord::Showtime(_) => Stage::Showtime,
            StageRecord::Seat(_) => Stage::Seats,
        }
    }
}

impl Candidate for StageRecord {
    fn primary_name(&self) -> Cow<'_, str> {
        match self {
            StageRecord::Cinema(r) => r.primary_name(),
            StageRecord::Film(r) => r.primary_name(),
            StageRecord::Showtime(r) => r.primary_name(),
            StageRecord::Seat(r) => r.primary_name(),
        }
    }
}

impl From<CinemaRecord> for StageRecord {
    fn from(r: CinemaRecord) -> Self {
        StageRecord::Cinema(r)
    }
}

impl From<FilmRecord> for StageRecord {
    fn from(r: FilmRecord) -> Self {
        StageRecord::Film(r)
    }
}

impl From<ShowtimeRecord> for StageRecord {
    fn from(r: ShowtimeRecord) -> Self {
        StageRecord::Showtime(r)
    }
}

impl From<SeatRecord> for StageRecord {
    fn from(r: SeatRecord) -> Self {
        StageRecord::Seat(r)
    }
}

/// What gets applied to the external selection state when a stage resolves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "value", rename_all = "lowercase")]
pub enum Selection {
    Cinema(CinemaRecord),
    Film(FilmRecord),
    Showtime(ShowtimeRecord),
    Seats(Vec<SeatRecord>),
}

impl Selection {
    pub fn stage(&self) -> Stage {
        match self {
            Selection::Cinema(_) => Stage::Cinema,
            Selection::Film(_) => Stage::Film,
            Selection::Showtime(_) => Stage::Showtime,
            Selection::Seats(_) => Stage::Seats,
        }
    }
}

impl From<StageRecord> for Selection {
    fn from(record: StageRecord) -> Self {
        match record {
            StageRecord::Cinema(r) => Selection::Cinema(r),
            StageRecord::Film(r) => Selection::Film(r),
            StageRecord::Showtime(r) => Selection::Showtime(r),
            StageRecord::Seat(r) => Selection::Seats(vec![r]),
        }
    }
}

/// The resolved cinema/film/showtime/seats of a cascade, or a snapshot of the
/// external selection taken before one started.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedBundle {
    pub cinema: Option<CinemaRecord>,
    pub film: Option<FilmRecord>,
    pub showtime: Option<ShowtimeRecord>,
    pub seats: Vec<SeatRecord>,
}

impl ResolvedBundle {
    pub fn is_empty(&self) -> bool {
        self.cinema.is_none()
            && self.film.is_none()
            && self.showtime.is_none()
            && self.seats.is_empty()
    }

    pub(crate) fn record(&mut self, selection: &Selection) {
        match selection {
            Selection::Cinema(r) => self.cinema = Some(r.clone()),
            Selection::Film(r) => self.film = Some(r.clone()),
            Selection::Showtime(r) => self.showtime = Some(r.clone()),
            Selection::Seats(seats) => self.seats = seats.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_type_serializes_lowercase() {
        let json = serde_json::to_string(&MatchType::Keyword).unwrap();
        assert_eq!(json, "\"keyword\"");
    }

    #[test]
    fn test_showtime_primary_name_is_normalized() {
        let showtime = ShowtimeRecord {
            id: "s1".to_string(),
            start_time: "2025-06-08 20:00:00".to_string(),
            ..Default::default()
        };
        assert_eq!(showtime.primary_name(), "2025-06-08 20:00");
    }

    #[test]
    fn test_stage_record_converts_to_selection() {
        let record = StageRecord::from(FilmRecord {
            id: "f1".to_string(),
            name: "阿凡达".to_string(),
            raw: serde_json::Value::Null,
        });
        let selection = Selection::from(record);
        assert_eq!(selection.stage(), Stage::Film);
    }

    #[test]
    fn test_seat_record_deserializes_available_by_default() {
        let seat: SeatRecord =
            serde_json::from_str(r#"{"id":"a","row":5,"col":6}"#).unwrap();
        assert!(seat.available);
        assert_eq!(seat.primary_name(), "5排6座");
    }
}
