//! Chooses which of the oldest active turns to roll into a leaf while
//! keeping a fresh tail of recent turns verbatim.

use dolt_core::{LanePolicy, Record, SessionId};
use dolt_telemetry::events::{TelemetryKind, TurnChunkSelection as TurnChunkSelectionEvent};
use dolt_telemetry::{TelemetryBus, TelemetryEvent};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TurnChunkParams {
    pub lane_token_count: u64,
    pub policy: LanePolicy,
    pub fresh_tail_min_turns: usize,
    pub fresh_tail_token_limit: u64,
    pub min_chunk_turns: usize,
}

impl TurnChunkParams {
    /// Reset finalization ignores the fresh tail and only enforces a chunk
    /// floor. Chunks are cut by [`select_reset_chunk`].
    pub fn for_reset(lane_token_count: u64, policy: LanePolicy, min_chunk_turns: usize) -> Self {
        Self {
            lane_token_count,
            policy,
            fresh_tail_min_turns: 0,
            fresh_tail_token_limit: u64::MAX,
            min_chunk_turns,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TurnChunkSelection {
    /// Oldest first.
    pub selected: Vec<Record>,
    pub selected_token_count: u64,
    pub fresh_tail_preserved_count: usize,
    pub fresh_tail_token_count: u64,
    pub projected_lane_tokens: u64,
}

impl TurnChunkSelection {
    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }
}

/// Select the smallest prefix of `turns` (oldest first) after which the
/// remaining tail fits `fresh_tail_token_limit` and the projected lane is at
/// or under `policy.target`. Never eats into the last `fresh_tail_min_turns`
/// turns; a prefix shorter than `min_chunk_turns` selects nothing.
pub fn select_turn_chunk(turns: &[Record], params: &TurnChunkParams) -> TurnChunkSelection {
    let total: u64 = turns.iter().map(|t| t.token_count).sum();
    let max_prefix = turns.len().saturating_sub(params.fresh_tail_min_turns);

    let mut taken = 0usize;
    let mut selected_tokens = 0u64;
    while taken < max_prefix {
        let tail_fits = total - selected_tokens <= params.fresh_tail_token_limit;
        let lane_fits = params.lane_token_count.saturating_sub(selected_tokens) <= params.policy.target;
        if taken >= params.min_chunk_turns && tail_fits && lane_fits {
            break;
        }
        selected_tokens += turns[taken].token_count;
        taken += 1;
    }

    if taken < params.min_chunk_turns {
        taken = 0;
        selected_tokens = 0;
    }

    TurnChunkSelection {
        selected: turns[..taken].to_vec(),
        selected_token_count: selected_tokens,
        fresh_tail_preserved_count: turns.len() - taken,
        fresh_tail_token_count: total - selected_tokens,
        projected_lane_tokens: params.lane_token_count.saturating_sub(selected_tokens),
    }
}

/// Reset chunking: the oldest records whose tokens fit `chunk_token_cap`,
/// never fewer than `min_chunk`. Empty when fewer than `min_chunk` remain.
///
/// Unlike [`select_turn_chunk`] this ignores where the lane sits relative to
/// its target, so every pass removes at least `min_chunk` records and up to a
/// cap's worth of tokens.
pub fn select_reset_chunk(records: &[Record], chunk_token_cap: u64, min_chunk: usize) -> TurnChunkSelection {
    let min_chunk = min_chunk.max(1);
    let total: u64 = records.iter().map(|r| r.token_count).sum();

    let mut taken = 0usize;
    let mut selected_tokens = 0u64;
    if records.len() >= min_chunk {
        for record in records {
            let next = selected_tokens.saturating_add(record.token_count);
            if taken >= min_chunk && next > chunk_token_cap {
                break;
            }
            selected_tokens = next;
            taken += 1;
        }
    }

    TurnChunkSelection {
        selected: records[..taken].to_vec(),
        selected_token_count: selected_tokens,
        fresh_tail_preserved_count: records.len() - taken,
        fresh_tail_token_count: total - selected_tokens,
        projected_lane_tokens: total - selected_tokens,
    }
}

/// Publish `dolt_turn_chunk_selection`, including empty selections.
pub fn emit_turn_chunk_selection(
    bus: &TelemetryBus,
    session_id: &SessionId,
    session_key: Option<&str>,
    turn_count: usize,
    params: &TurnChunkParams,
    selection: &TurnChunkSelection,
) {
    bus.emit(TelemetryEvent::new(
        session_id,
        session_key,
        TelemetryKind::TurnChunkSelection(TurnChunkSelectionEvent {
            turn_count: turn_count as u64,
            selected_count: selection.selected.len() as u64,
            fresh_tail_preserved_count: selection.fresh_tail_preserved_count as u64,
            selected_token_count: selection.selected_token_count,
            fresh_tail_token_count: selection.fresh_tail_token_count,
            lane_token_count: params.lane_token_count,
            projected_lane_token_count: selection.projected_lane_tokens,
            fresh_tail_min_turns: params.fresh_tail_min_turns as u64,
            fresh_tail_token_limit: params.fresh_tail_token_limit,
            min_chunk_turns: params.min_chunk_turns as u64,
            first_selected_pointer: selection.selected.first().map(|r| r.pointer.clone()),
            last_selected_pointer: selection.selected.last().map(|r| r.pointer.clone()),
        }),
    ));
}
