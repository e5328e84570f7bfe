//! Game actors, state, and score arbitration.

pub mod actor;
pub mod context;
pub mod overturn;
pub mod store;

use std::time::Instant;

use crate::game::context::GameContext;
use crate::game::overturn::ScoreEvent;
use crate::models::{GameUpdate, MatchStatus};
use crate::observers::GameEvent;
use crate::strategy::StrategyEngine;

/// Apply one provider snapshot to the game, arbitrate overturns, notify
/// observers, and run the strategy on score events. Runs as a single
/// mailbox job, so every step here is atomic with respect to the game.
pub fn process_update(
    ctx: &mut GameContext,
    update: &GameUpdate,
    engine: &StrategyEngine,
    now: Instant,
) {
    // Terminal frames win outright: a pending overturn is discarded and the
    // provider's final reading becomes truth.
    if update.status == MatchStatus::GameFinish {
        ctx.overturn.reset();
        ctx.state.home_score = update.home_score;
        ctx.state.away_score = update.away_score;
        ctx.state.period = update.period.clone();
        ctx.state.status = MatchStatus::GameFinish;
        ctx.notify(&GameEvent::GameFinish);
        return;
    }

    ctx.apply_pregame(update.pregame);

    if update.status == MatchStatus::GameStart && !ctx.started_notified {
        ctx.started_notified = true;
        ctx.notify(&GameEvent::GameStart);
        // Pregame edges are tradeable from the opening whistle.
        engine.evaluate(ctx, false);
    }

    let stored = ctx.state.score();
    let incoming = update.score();

    match ctx.overturn.observe(stored, incoming, now) {
        ScoreEvent::NoChange => {
            if apply_info_fields(ctx, update) {
                ctx.notify(&GameEvent::Info);
            }
        }
        ScoreEvent::ScoreChange { score } => {
            commit_score(ctx, update, score, false, engine);
        }
        ScoreEvent::OverturnPending { old, new } => {
            apply_info_fields(ctx, update);
            ctx.state.status = MatchStatus::OverturnPending;
            ctx.notify(&GameEvent::OverturnPending { old, new });
        }
        ScoreEvent::OverturnRejected => {
            apply_info_fields(ctx, update);
            ctx.state.status = MatchStatus::OverturnRejected;
            ctx.notify(&GameEvent::OverturnRejected);
        }
        ScoreEvent::OverturnConfirmed { score } => {
            commit_score(ctx, update, score, true, engine);
        }
    }
}

fn commit_score(
    ctx: &mut GameContext,
    update: &GameUpdate,
    score: (u32, u32),
    overturn: bool,
    engine: &StrategyEngine,
) {
    ctx.state.home_score = score.0;
    ctx.state.away_score = score.1;
    apply_info_fields(ctx, update);
    ctx.state.status = if overturn {
        MatchStatus::OverturnConfirmed
    } else {
        MatchStatus::ScoreChange
    };
    // Quotes predating the score change are no longer gating anything.
    ctx.awaiting_quotes = false;
    ctx.notify(&GameEvent::ScoreChange { overturn });
    engine.evaluate(ctx, overturn);
}

/// Refresh the informational fields (clock, period, cards, penalties).
/// Returns true when anything observable changed.
fn apply_info_fields(ctx: &mut GameContext, update: &GameUpdate) -> bool {
    let state = &mut ctx.state;
    let mut changed = false;

    if state.period != update.period {
        state.period = update.period.clone();
        changed = true;
    }
    if (state.time_left_min - update.time_left_min).abs() > f64::EPSILON {
        state.time_left_min = update.time_left_min;
        changed = true;
    }
    if state.power_play != update.power_play {
        state.power_play = update.power_play;
        changed = true;
    }
    if state.home_penalties != update.home_penalties
        || state.away_penalties != update.away_penalties
    {
        state.home_penalties = update.home_penalties;
        state.away_penalties = update.away_penalties;
        changed = true;
    }
    if state.home_red_cards != update.home_red_cards
        || state.away_red_cards != update.away_red_cards
    {
        state.home_red_cards = update.home_red_cards;
        state.away_red_cards = update.away_red_cards;
        changed = true;
    }
    if update.status == MatchStatus::Overtime && state.status != MatchStatus::Overtime {
        state.status = MatchStatus::Overtime;
        changed = true;
    }
    if update.start_ts != 0 && state.start_ts == 0 {
        state.start_ts = update.start_ts;
    }

    changed
}
