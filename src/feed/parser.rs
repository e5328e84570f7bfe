//! Provider push-frame parser.
//!
//! One frame carries an `events` map of event-id → event body. Bodies are
//! loosely typed (scores arrive as strings or numbers depending on feed
//! path), so parsing digs through `serde_json::Value` defensively and
//! rejects per-event rather than per-frame.

use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use serde_json::Value;
use tracing::debug;

use crate::feed::odds::{remove_vig2, remove_vig3};
use crate::models::{GameUpdate, MatchStatus, Pregame, Sport};

/// Events skipped because a required field was missing or malformed.
pub static PARSE_ERRORS: AtomicU64 = AtomicU64::new(0);

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Period strings that terminate a game. The two-letter codes are matched
/// as whole tokens so e.g. "2:00 left" never reads as full-time.
const FINISHED_PHRASES: [&str; 5] = ["finished", "final", "ended", "after overtime", "after penalties"];
const FINISHED_TOKENS: [&str; 2] = ["ft", "aet"];

const POWER_PLAY_STATES: [&str; 3] = ["5 ON 4", "5 ON 3", "4 ON 3"];

/// Decode one webhook body (raw or gzip JSON) into game updates. Events
/// that fail to parse are counted and skipped.
pub fn parse_frame(sport: Sport, body: &[u8]) -> Result<Vec<GameUpdate>> {
    let text = decompress(body)?;
    let envelope: Value = serde_json::from_str(&text).context("frame is not valid JSON")?;

    let Some(events) = envelope.get("events").and_then(Value::as_object) else {
        return Ok(Vec::new());
    };

    let mut updates = Vec::with_capacity(events.len());
    for (eid, event) in events {
        match parse_event(sport, eid, event) {
            Ok(update) => updates.push(update),
            Err(e) => {
                PARSE_ERRORS.fetch_add(1, Ordering::Relaxed);
                debug!(eid, sport = %sport, error = %e, "skipping unparseable event");
            }
        }
    }
    Ok(updates)
}

fn decompress(body: &[u8]) -> Result<String> {
    if body.starts_with(&GZIP_MAGIC) {
        let mut decoder = GzDecoder::new(body);
        let mut text = String::new();
        decoder
            .read_to_string(&mut text)
            .context("gzip decode failed")?;
        Ok(text)
    } else {
        Ok(String::from_utf8_lossy(body).into_owned())
    }
}

fn parse_event(sport: Sport, eid: &str, event: &Value) -> Result<GameUpdate> {
    let info = event.get("info").unwrap_or(&Value::Null);
    let team_info = event.get("team_info").unwrap_or(&Value::Null);

    let home = team_info.get("home").unwrap_or(&Value::Null);
    let away = team_info.get("away").unwrap_or(&Value::Null);

    let home_team = str_field(home, "name").context("missing home name")?;
    let away_team = str_field(away, "name").context("missing away name")?;

    let home_score = score_field(home, sport).context("bad home score")?;
    let away_score = score_field(away, sport).context("bad away score")?;

    let period = str_field(info, "period")
        .or_else(|| str_field(info, "status"))
        .unwrap_or_default()
        .trim()
        .to_lowercase();

    let league = str_field(info, "league")
        .or_else(|| str_field(info, "category"))
        .unwrap_or_default();

    let start_ts = int_field(info, "start_ts_utc").unwrap_or(0);

    let finished = is_finished(&period);
    let time_left_min = if finished {
        0.0
    } else {
        match sport {
            Sport::Soccer => soccer_time_left(info),
            Sport::Hockey => hockey_time_left(info, &period),
            Sport::Football => football_time_left(&period),
        }
    };

    let (home_red_cards, away_red_cards) = match sport {
        Sport::Soccer => {
            let stats = event.get("stats").unwrap_or(&Value::Null);
            (
                int_field(stats, "redcards_home").unwrap_or(0) as u32,
                int_field(stats, "redcards_away").unwrap_or(0) as u32,
            )
        }
        _ => (0, 0),
    };

    let (power_play, home_penalties, away_penalties) = match sport {
        Sport::Hockey => parse_sts(str_field(event, "sts").as_deref().unwrap_or("")),
        _ => (false, 0, 0),
    };

    let pregame = event.get("odds").and_then(|odds| parse_odds(sport, odds, &home_team));

    let status = if finished {
        MatchStatus::GameFinish
    } else {
        infer_status(sport, &period, (home_score, away_score), time_left_min)
    };

    Ok(GameUpdate {
        eid: eid.to_string(),
        sport,
        league,
        home_team,
        away_team,
        home_score,
        away_score,
        period,
        time_left_min,
        start_ts,
        home_red_cards,
        away_red_cards,
        power_play,
        home_penalties,
        away_penalties,
        status,
        pregame,
    })
}

fn is_finished(period: &str) -> bool {
    if FINISHED_PHRASES.iter().any(|p| period.contains(p)) {
        return true;
    }
    period
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| FINISHED_TOKENS.contains(&token))
}

/// Soccer clock: `info.minute` as "NN", "NN+M" (stoppage summed) or
/// "MM:SS" elapsed. Half-time leaves 45 minutes.
fn soccer_time_left(info: &Value) -> f64 {
    let minute = str_field(info, "minute").unwrap_or_default();
    let minute = minute.trim();
    if minute.eq_ignore_ascii_case("ht") || minute.eq_ignore_ascii_case("half time") {
        return 45.0;
    }

    let elapsed = if let Some((base, stoppage)) = minute.split_once('+') {
        let base: f64 = base.trim().parse().unwrap_or(0.0);
        let stoppage: f64 = stoppage.trim().parse().unwrap_or(0.0);
        base + stoppage
    } else if let Some((mm, ss)) = minute.split_once(':') {
        let mm: f64 = mm.trim().parse().unwrap_or(0.0);
        let ss: f64 = ss.trim().parse().unwrap_or(0.0);
        mm + ss / 60.0
    } else {
        minute.parse().unwrap_or(0.0)
    };

    (90.0 - elapsed).max(0.0)
}

/// Hockey clock: `info.seconds` is an in-period MM:SS countdown; add 20
/// minutes per remaining regulation period. Overtime is worth 5.
fn hockey_time_left(info: &Value, period: &str) -> f64 {
    if period.contains("overtime") || period.contains("shootout") {
        return 5.0;
    }

    let in_period = str_field(info, "seconds")
        .and_then(|s| {
            let (mm, ss) = s.split_once(':')?;
            let mm: f64 = mm.trim().parse().ok()?;
            let ss: f64 = ss.trim().parse().ok()?;
            Some(mm + ss / 60.0)
        })
        .unwrap_or(0.0);

    let period_num = if period.contains("1st") || period.starts_with('1') {
        1
    } else if period.contains("2nd") || period.starts_with('2') {
        2
    } else {
        3
    };
    let remaining_periods = (3 - period_num) as f64;

    in_period + remaining_periods * 20.0
}

/// Football clock is a step function on quarters.
fn football_time_left(period: &str) -> f64 {
    if period.contains("overtime") || period.contains("ot") {
        return 5.0;
    }
    if period.contains("half") {
        return 30.0;
    }
    if period.contains("1st") || period.contains("q1") {
        52.5
    } else if period.contains("2nd") || period.contains("q2") {
        37.5
    } else if period.contains("3rd") || period.contains("q3") {
        22.5
    } else if period.contains("4th") || period.contains("q4") {
        7.5
    } else {
        30.0
    }
}

/// Hockey special-teams string:
/// `Penalties=H:A|Goals on Power Play=h:a|INFO=5 ON 4|`
/// (older feeds separate entries with semicolons).
fn parse_sts(sts: &str) -> (bool, u32, u32) {
    let mut power_play = false;
    let mut home_penalties = 0;
    let mut away_penalties = 0;

    for entry in sts.split(['|', ';']) {
        let Some((key, value)) = entry.split_once('=') else {
            continue;
        };
        match key.trim() {
            "Penalties" => {
                if let Some((h, a)) = value.split_once(':') {
                    home_penalties = h.trim().parse().unwrap_or(0);
                    away_penalties = a.trim().parse().unwrap_or(0);
                }
            }
            "INFO" => {
                let state = value.trim();
                power_play = POWER_PLAY_STATES.iter().any(|s| state.eq_ignore_ascii_case(s));
            }
            _ => {}
        }
    }

    (power_play, home_penalties, away_penalties)
}

/// Pre-match book → vig-free probabilities. Soccer books are 3-way; the
/// rest are 2-way. The totals market, when present, seeds the Poisson
/// expected-goals figure.
fn parse_odds(sport: Sport, odds: &Value, home_team: &str) -> Option<Pregame> {
    let markets = odds.as_object()?;

    let want = if sport.has_draw() { 3 } else { 2 };
    let mut chosen: Option<Vec<(String, f64)>> = None;

    for (name, market) in markets {
        if market.get("suspend").and_then(Value::as_bool).unwrap_or(false) {
            continue;
        }
        let Some(participants) = market.get("participants").and_then(Value::as_object) else {
            continue;
        };
        let mut entries = Vec::new();
        for (pname, participant) in participants {
            let value = participant
                .get("value_eu")
                .and_then(value_as_f64)
                .or_else(|| value_as_f64(participant));
            if let Some(value) = value {
                entries.push((pname.clone(), value));
            }
        }
        if entries.len() != want {
            continue;
        }
        let name_lower = name.to_lowercase();
        let is_moneyline = name_lower.contains("money")
            || name_lower.contains("winner")
            || name_lower.contains("1x2")
            || name_lower.contains("match");
        if is_moneyline || chosen.is_none() {
            chosen = Some(entries);
            if is_moneyline {
                break;
            }
        }
    }

    let entries = chosen?;
    let expected_goals = parse_total_line(markets);

    if want == 3 {
        let draw_idx = entries.iter().position(|(name, _)| {
            let n = name.to_lowercase();
            n == "x" || n.contains("draw") || n.contains("tie")
        })?;
        let home_idx = entries
            .iter()
            .position(|(name, _)| name != &entries[draw_idx].0 && participant_is_home(name, home_team))
            .or_else(|| (0..entries.len()).find(|i| *i != draw_idx))?;
        let away_idx = (0..entries.len()).find(|i| *i != draw_idx && *i != home_idx)?;

        let (home, draw, away) = remove_vig3(
            entries[home_idx].1,
            entries[draw_idx].1,
            entries[away_idx].1,
        )?;
        Some(Pregame {
            home,
            draw: Some(draw),
            away,
            expected_goals,
        })
    } else {
        let home_idx = entries
            .iter()
            .position(|(name, _)| participant_is_home(name, home_team))
            .unwrap_or(0);
        let away_idx = if home_idx == 0 { 1 } else { 0 };
        let (home, away) = remove_vig2(entries[home_idx].1, entries[away_idx].1)?;
        Some(Pregame {
            home,
            draw: None,
            away,
            expected_goals,
        })
    }
}

fn participant_is_home(name: &str, home_team: &str) -> bool {
    let n = name.to_lowercase();
    n == "1"
        || n == "home"
        || n.contains(&home_team.to_lowercase())
        || home_team.to_lowercase().contains(&n)
}

/// "Over 5.5"-style participant in a totals market → the line value.
fn parse_total_line(markets: &serde_json::Map<String, Value>) -> Option<f64> {
    for (name, market) in markets {
        let name_lower = name.to_lowercase();
        if !name_lower.contains("total") && !name_lower.contains("over/under") {
            continue;
        }
        let participants = market.get("participants").and_then(Value::as_object)?;
        for pname in participants.keys() {
            let p = pname.to_lowercase();
            if let Some(rest) = p.strip_prefix("over") {
                if let Ok(line) = rest.trim().parse::<f64>() {
                    return Some(line);
                }
            }
        }
    }
    None
}

fn infer_status(
    sport: Sport,
    period: &str,
    score: (u32, u32),
    time_left_min: f64,
) -> MatchStatus {
    if sport == Sport::Hockey && (period.contains("overtime") || period.contains("shootout")) {
        return MatchStatus::Overtime;
    }
    let first_period = period.contains("1st") || period.starts_with('1');
    let near_start = time_left_min >= sport.regulation_minutes() - 1.0;
    if score == (0, 0) && first_period && near_start {
        return MatchStatus::GameStart;
    }
    MatchStatus::Live
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    let field = value.get(key)?;
    match field {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn int_field(value: &Value, key: &str) -> Option<i64> {
    let field = value.get(key)?;
    match field {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Scores must be numeric; soccer feeds sometimes carry them under `goals`.
fn score_field(team: &Value, sport: Sport) -> Result<u32> {
    let raw = int_field(team, "score").or_else(|| {
        if sport == Sport::Soccer {
            int_field(team, "goals")
        } else {
            None
        }
    });
    match raw {
        Some(n) if n >= 0 => Ok(n as u32),
        Some(n) => anyhow::bail!("negative score {n}"),
        None => anyhow::bail!("missing or non-numeric score"),
    }
}
