//! Field extraction from pasted order receipts
//!
//! Receipts arrive single-line, comma-joined or newline-joined. A field value
//! runs from its label up to a newline, the end of the text, or the next known
//! label, whichever comes first. Colons inside a value (film titles such as
//! `碟中谍：最终清算`) never end it.

use ahash::AHashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SeatParseError;
use crate::types::OrderIntent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Field {
    OrderId,
    City,
    CinemaName,
    CinemaAddress,
    FilmName,
    SessionTime,
    HallName,
    Seats,
    Price,
}

/// Recognised labels per field, most specific first. A longer label always
/// wins over a shorter one starting at the same position, and when a field
/// is labelled more than once the earlier label in its list wins.
const FIELD_LABELS: &[(Field, &[&str])] = &[
    (Field::OrderId, &["订单号", "订单编号", "订单"]),
    (Field::City, &["所在城市", "城市"]),
    (Field::CinemaName, &["影院名称", "影院", "影城"]),
    (Field::CinemaAddress, &["影院地址", "地址"]),
    (Field::FilmName, &["影片名称", "影片", "电影", "片名"]),
    (Field::SessionTime, &["放映时间", "开场时间", "场次", "时间"]),
    (Field::HallName, &["影厅", "厅号"]),
    (Field::Seats, &["座位号", "座位"]),
    (Field::Price, &["总价", "实付金额", "票价", "价格", "金额"]),
];

/// Receipt labels that end the previous value but fill no field. Without
/// them `下单时间` would read as `下单` + `时间`.
const IGNORED_LABELS: &[&str] = &[
    "下单时间",
    "支付时间",
    "购票时间",
    "出票时间",
    "取票时间",
    "优惠金额",
    "优惠",
    "服务费",
    "手续费",
    "手机号",
    "手机",
    "联系电话",
    "取票码",
    "验证码",
];

static SEAT_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\s*排\s*(\d+)\s*[座号]?$").expect("Invalid regex pattern"));

static SESSION_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{4})\s*[-/.年]\s*(\d{1,2})\s*[-/.月]\s*(\d{1,2})").expect("Invalid regex pattern")
});

static SESSION_CLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})\s*[:：]\s*(\d{2})").expect("Invalid regex pattern"));

/// A seat bound to its row and column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeatPosition {
    pub row: u32,
    pub col: u32,
}

/// Parse a raw seat token such as `10排13座` into a position.
pub fn parse_seat_token(token: &str) -> Result<SeatPosition, SeatParseError> {
    let trimmed = token.trim();
    let caps = SEAT_TOKEN
        .captures(trimmed)
        .ok_or_else(|| SeatParseError::Malformed(token.to_string()))?;

    let row: u32 = caps[1]
        .parse()
        .map_err(|_| SeatParseError::Malformed(token.to_string()))?;
    let col: u32 = caps[2]
        .parse()
        .map_err(|_| SeatParseError::Malformed(token.to_string()))?;

    if row == 0 || col == 0 {
        return Err(SeatParseError::ZeroIndex(token.to_string()));
    }
    Ok(SeatPosition { row, col })
}

/// Reduce a session string to `YYYY-MM-DD HH:MM`, or `HH:MM` when it carries
/// no date. Strings with neither are returned trimmed.
pub fn normalize_session_time(raw: &str) -> String {
    let date = SESSION_DATE.captures(raw).and_then(|caps| {
        let year: u32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let day: u32 = caps[3].parse().ok()?;
        Some((format!("{year:04}-{month:02}-{day:02}"), caps.get(0)?.end()))
    });

    // Only look for the clock after the date so `2025.06.08` is not read as one.
    let clock_from = date.as_ref().map(|(_, end)| *end).unwrap_or(0);
    let clock = SESSION_CLOCK.captures(&raw[clock_from..]).and_then(|caps| {
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps[2].parse().ok()?;
        (hour < 24 && minute < 60).then(|| format!("{hour:02}:{minute:02}"))
    });

    match (date, clock) {
        (Some((date, _)), Some(clock)) => format!("{date} {clock}"),
        (Some((date, _)), None) => date,
        (None, Some(clock)) => clock,
        (None, None) => raw.trim().to_string(),
    }
}

/// Extract an [`OrderIntent`] from receipt text.
///
/// Never fails: unrecognised text yields an empty intent carrying the input.
pub struct FieldExtractor {
    label_pattern: Regex,
    /// Field and priority per label; `None` for ignored labels.
    label_fields: AHashMap<&'static str, Option<(Field, usize)>>,
    seat_pattern: Regex,
    price_pattern: Regex,
    datetime_pattern: Regex,
}

impl FieldExtractor {
    pub fn new() -> Self {
        let mut labels: Vec<&'static str> = Vec::new();
        let mut label_fields = AHashMap::new();
        for (field, names) in FIELD_LABELS {
            for (rank, name) in names.iter().enumerate() {
                labels.push(*name);
                label_fields.insert(*name, Some((*field, rank)));
            }
        }
        for name in IGNORED_LABELS {
            labels.push(*name);
            label_fields.insert(*name, None);
        }
        // Regex alternation is leftmost-first, so longer labels go first.
        labels.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));
        let alternation = labels
            .iter()
            .map(|l| regex::escape(l))
            .collect::<Vec<_>>()
            .join("|");

        // Compile regex patterns once - these should never fail
        let label_pattern = Regex::new(&format!(r"(?:[,，、;；]\s*)?({alternation})\s*[：:]"))
            .expect("Invalid regex pattern");
        let seat_pattern = Regex::new(r"(\d+)\s*排\s*(\d+)\s*座").expect("Invalid regex pattern");
        let price_pattern = Regex::new(r"\d+(?:\.\d+)?").expect("Invalid regex pattern");
        let datetime_pattern =
            Regex::new(r"\d{4}[-/.]\d{1,2}[-/.]\d{1,2}\s+\d{1,2}:\d{2}(?::\d{2})?")
                .expect("Invalid regex pattern");

        Self {
            label_pattern,
            label_fields,
            seat_pattern,
            price_pattern,
            datetime_pattern,
        }
    }

    pub fn parse(&self, text: &str) -> OrderIntent {
        let LabelledValues { values, ignored } = self.labelled_values(text);
        let take = |field: Field| values.get(&field).cloned().unwrap_or_default();

        let mut session_time = take(Field::SessionTime);
        if session_time.is_empty() {
            // Legacy receipts print the session timestamp without a label.
            // Timestamps under ignored labels (order time, payment time) are not it.
            if let Some(m) = self
                .datetime_pattern
                .find_iter(text)
                .find(|m| !ignored.iter().any(|span| span.contains(&m.start())))
            {
                session_time = m.as_str().to_string();
            }
        }

        let seats = match values.get(&Field::Seats) {
            Some(raw) => self.seat_tokens(raw),
            None => self.seat_tokens(text),
        };

        let price = values
            .get(&Field::Price)
            .and_then(|raw| self.price_pattern.find(raw))
            .and_then(|m| m.as_str().parse::<f64>().ok());

        let intent = OrderIntent {
            order_id: take(Field::OrderId),
            city: take(Field::City),
            cinema_name: take(Field::CinemaName),
            cinema_address: take(Field::CinemaAddress),
            film_name: take(Field::FilmName),
            session_time,
            hall_name: take(Field::HallName),
            seats,
            price,
            raw_text: text.to_string(),
        };

        tracing::debug!(
            order_id = %intent.order_id,
            cinema = %intent.cinema_name,
            film = %intent.film_name,
            seats = intent.seats.len(),
            "order text parsed"
        );
        intent
    }

    /// Value per field, taken from the highest-priority label carrying a
    /// non-empty value; the first occurrence wins among equal labels.
    fn labelled_values(&self, text: &str) -> LabelledValues {
        let labels: Vec<(usize, usize, Option<(Field, usize)>)> = self
            .label_pattern
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let target = *self.label_fields.get(caps.get(1)?.as_str())?;
                Some((whole.start(), whole.end(), target))
            })
            .collect();

        let mut ranked: AHashMap<Field, (usize, String)> = AHashMap::new();
        let mut ignored = Vec::new();
        for (i, (_, value_start, target)) in labels.iter().enumerate() {
            let value_end = labels
                .get(i + 1)
                .map(|(next_start, _, _)| *next_start)
                .unwrap_or(text.len());

            let segment = &text[*value_start..value_end];
            let line = segment.split(['\n', '\r']).next().unwrap_or_default();

            let Some((field, rank)) = target else {
                ignored.push(*value_start..*value_start + line.len());
                continue;
            };

            let value = line
                .trim()
                .trim_end_matches([',', '，', '、', ';', '；'])
                .trim();

            if value.is_empty() {
                continue;
            }
            match ranked.get(field) {
                Some((best, _)) if *best <= *rank => {}
                _ => {
                    ranked.insert(*field, (*rank, value.to_string()));
                }
            }
        }

        LabelledValues {
            values: ranked
                .into_iter()
                .map(|(field, (_, value))| (field, value))
                .collect(),
            ignored,
        }
    }

    fn seat_tokens(&self, raw: &str) -> Vec<String> {
        self.seat_pattern
            .captures_iter(raw)
            .map(|caps| format!("{}排{}座", &caps[1], &caps[2]))
            .collect()
    }
}

struct LabelledValues {
    values: AHashMap<Field, String>,
    /// Byte ranges of values under ignored labels.
    ignored: Vec<std::ops::Range<usize>>,
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::new()
    }
}
