//! History trimming (§4.7): the view handed to the model, never mutating the
//! underlying session log.

use agent_core::{Message, Role};

/// Produce the trimmed message view for a history limit of `n` (0 =
/// unlimited). `messages` must be direct (non-sub-session) items, in order.
///
/// 1. Every system message is always kept.
/// 2. Every user message is always kept (protected).
/// 3. Remaining assistant/tool-result pairs are dropped oldest-first, as
///    whole pairs, until the non-system total is `<= n`.
/// 4. A pair is never split: if the assistant message is dropped, its
///    tool-role responses are dropped with it.
pub fn trim(messages: &[Message], n: usize) -> Vec<Message> {
    if n == 0 || n >= non_system_count(messages) {
        return messages.to_vec();
    }

    // Group the sequence into: protected singles (system/user) and
    // assistant-led groups (one assistant message plus every following
    // tool-role message that pairs to one of its tool calls).
    enum Group {
        Protected(usize),
        Pair(Vec<usize>),
    }

    let mut groups: Vec<Group> = Vec::new();
    let mut i = 0;
    while i < messages.len() {
        match messages[i].role {
            Role::System | Role::User => {
                groups.push(Group::Protected(i));
                i += 1;
            }
            Role::Assistant => {
                let mut ids: std::collections::HashSet<&str> =
                    messages[i].tool_calls.iter().map(|tc| tc.id.as_str()).collect();
                let mut member = vec![i];
                let mut j = i + 1;
                while !ids.is_empty() && j < messages.len() {
                    if messages[j].role == Role::Tool {
                        if let Some(call_id) = messages[j].tool_call_id.as_deref() {
                            if ids.remove(call_id) {
                                member.push(j);
                                j += 1;
                                continue;
                            }
                        }
                    }
                    break;
                }
                i = j;
                groups.push(Group::Pair(member));
            }
            Role::Tool => {
                // Orphan tool message with no preceding assistant in view;
                // treat as its own droppable unit rather than panicking.
                groups.push(Group::Pair(vec![i]));
                i += 1;
            }
        }
    }

    // Only user messages count toward the non-system budget; a protected
    // system message is kept unconditionally but never part of the "N"
    // floor §4.7 measures (it isn't a "non-system" item at all).
    let protected_count = groups
        .iter()
        .filter(|g| matches!(g, Group::Protected(pos) if messages[*pos].role != Role::System))
        .count();
    let mut pair_indices: Vec<usize> = groups
        .iter()
        .enumerate()
        .filter(|(_, g)| matches!(g, Group::Pair(_)))
        .map(|(idx, _)| idx)
        .collect();

    let mut kept_non_system = protected_count
        + pair_indices
            .iter()
            .map(|&idx| match &groups[idx] {
                Group::Pair(members) => members.len(),
                _ => 0,
            })
            .sum::<usize>();

    let mut dropped: std::collections::HashSet<usize> = std::collections::HashSet::new();
    // Drop oldest pairs first until we're at or under the floor.
    pair_indices.sort_unstable();
    for idx in pair_indices {
        if kept_non_system <= n.max(protected_count) {
            break;
        }
        if let Group::Pair(members) = &groups[idx] {
            kept_non_system -= members.len();
            dropped.insert(idx);
        }
    }

    let mut out = Vec::new();
    for (idx, group) in groups.iter().enumerate() {
        if dropped.contains(&idx) {
            continue;
        }
        match group {
            Group::Protected(pos) => out.push(messages[*pos].clone()),
            Group::Pair(members) => {
                for &pos in members {
                    out.push(messages[pos].clone());
                }
            }
        }
    }
    out
}

fn non_system_count(messages: &[Message]) -> usize {
    messages.iter().filter(|m| m.role != Role::System).count()
}
