//! Bounded replay of the conversation history.

use crate::core::types::ConversationTurn;

/// Select the turns replayed to the model.
///
/// Keeps turn 0 (the goal statement) plus the most recent `window - 1` turns.
/// When the suffix would start with the same role as turn 0, one more turn is
/// dropped so roles keep alternating.
pub fn bounded_window(turns: &[ConversationTurn], window: usize) -> Vec<ConversationTurn> {
    if turns.len() <= window || window == 0 {
        return turns.to_vec();
    }
    let Some((first, rest)) = turns.split_first() else {
        return Vec::new();
    };

    let keep = window.saturating_sub(1);
    let mut start = rest.len() - keep;
    if rest.get(start).is_some_and(|turn| turn.role == first.role) {
        start += 1;
    }

    let mut selected = Vec::with_capacity(window);
    selected.push(first.clone());
    selected.extend_from_slice(&rest[start..]);
    selected
}
