//! Recipient → inbox resolution
//!
//! Turns a list of actor IRIs into the inbox IRIs to deliver to:
//! database lookups first, then signed dereference of the rest, with
//! collections expanded breadth-first up to the delivery depth bound.
//! Shared inboxes appearing for two or more recipients fold the
//! individual inboxes into one POST.

use std::collections::HashMap;
use std::sync::Arc;

use url::Url;

use crate::addressing::{actor_inbox, actor_shared_inbox};
use crate::context::Context;
use crate::db::InboxPair;
use crate::error::Result;
use crate::transport::Transport;
use crate::vocab::AsValue;

/// Resolve actor IRIs to the deduplicated, shared-inbox-folded list of
/// inboxes to deliver to, excluding `exclude` (the sender's own inbox).
pub(crate) async fn resolve_inboxes(
    ctx: &Context,
    transport: &Arc<dyn Transport>,
    actors: &[Url],
    exclude: Option<&Url>,
    max_depth: u32,
) -> Result<Vec<Url>> {
    let mut pairs: Vec<InboxPair> = Vec::new();
    let mut unresolved: Vec<Url> = Vec::new();

    // 1. Local lookups
    for actor in actors {
        match ctx.db().inbox_for_actor(actor).await? {
            Some(pair) => pairs.push(pair),
            None => unresolved.push(actor.clone()),
        }
    }

    // 2. Remote rounds, bounded by delivery depth. A fetched document
    // with an inbox is an actor; one with items is a collection whose
    // members queue for the next round.
    let mut queue = unresolved;
    let mut depth = 0u32;
    while !queue.is_empty() && depth < max_depth {
        let mut next = Vec::new();
        for iri in queue {
            let raw = transport.dereference(&iri).await?;
            let value = AsValue::from_map_unchecked(raw);
            if let Some(inbox) = actor_inbox(&value) {
                pairs.push(InboxPair {
                    inbox,
                    shared_inbox: actor_shared_inbox(&value),
                });
                continue;
            }
            for prop in ["orderedItems", "items"] {
                for member in value.iris(prop) {
                    if !next.contains(&member) {
                        next.push(member);
                    }
                }
            }
        }
        queue = next;
        depth += 1;
    }
    if !queue.is_empty() {
        tracing::debug!(
            remaining = queue.len(),
            max_depth,
            "delivery depth exhausted; dropping unresolved recipients"
        );
    }

    Ok(fold_shared_inboxes(pairs, exclude))
}

/// Collapse individual inboxes onto a shared inbox advertised by two or
/// more recipients; dedupe by IRI, drop the excluded inbox.
fn fold_shared_inboxes(pairs: Vec<InboxPair>, exclude: Option<&Url>) -> Vec<Url> {
    let mut shared_counts: HashMap<&Url, usize> = HashMap::new();
    for pair in &pairs {
        if let Some(shared) = &pair.shared_inbox {
            *shared_counts.entry(shared).or_insert(0) += 1;
        }
    }

    let mut out: Vec<Url> = Vec::new();
    for pair in &pairs {
        let target = match &pair.shared_inbox {
            Some(shared) if shared_counts[shared] >= 2 => shared.clone(),
            _ => pair.inbox.clone(),
        };
        if Some(&target) == exclude {
            continue;
        }
        if !out.contains(&target) {
            out.push(target);
        }
    }
    out
}
