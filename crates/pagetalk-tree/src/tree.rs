//! Pure traversal helpers over a conversation's message arena.
//!
//! Messages reference each other by id only; these functions materialize the
//! views the API exposes. Both guard against cycles with a visited set and
//! surface them as `DataIntegrity` instead of trusting acyclicity.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

use pagetalk_core::{ChatError, Message, Result};

/// A message with its children populated, for version browsing in the UI.
#[derive(Debug, Clone, Serialize)]
pub struct MessageTreeNode {
    pub message: Message,
    pub children: Vec<MessageTreeNode>,
}

/// Follow active-child pointers from the root to a leaf.
///
/// A dangling pointer ends the thread at the last valid node rather than
/// failing; a pointer cycle is a fatal integrity error.
pub fn resolve_active_thread(messages: &[Message], root_id: Uuid) -> Result<Vec<Message>> {
    let by_id: HashMap<Uuid, &Message> = messages.iter().map(|m| (m.id, m)).collect();
    let root = by_id
        .get(&root_id)
        .ok_or_else(|| ChatError::not_found(format!("root message {root_id}")))?;

    let mut thread = vec![(*root).clone()];
    let mut visited = HashSet::from([root_id]);
    let mut cursor = *root;

    while let Some(child_id) = cursor.active_child_id {
        if !visited.insert(child_id) {
            return Err(ChatError::integrity(format!(
                "active-child cycle through message {child_id}"
            )));
        }
        match by_id.get(&child_id) {
            Some(child) => {
                thread.push((*child).clone());
                cursor = child;
            }
            // Dangling pointer: stop at the last valid node.
            None => break,
        }
    }
    Ok(thread)
}

/// Materialize the full version tree. Children are ordered by version, so
/// sibling branches appear in creation order.
pub fn build_tree(messages: &[Message], root_id: Uuid) -> Result<MessageTreeNode> {
    let by_id: HashMap<Uuid, &Message> = messages.iter().map(|m| (m.id, m)).collect();
    if !by_id.contains_key(&root_id) {
        return Err(ChatError::not_found(format!("root message {root_id}")));
    }

    let mut children_of: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for message in messages {
        if let Some(parent_id) = message.parent_id {
            children_of.entry(parent_id).or_default().push(message.id);
        }
    }
    for children in children_of.values_mut() {
        children.sort_by_key(|id| {
            let message = by_id[id];
            (message.version, message.created_at)
        });
    }

    let mut visited = HashSet::new();
    build_node(root_id, &by_id, &children_of, &mut visited)
}

/// Ids reachable from the root through parent/child edges. Used to refuse
/// edits on detached messages.
pub fn reachable_from(messages: &[Message], root_id: Uuid) -> Result<HashSet<Uuid>> {
    let tree = build_tree(messages, root_id)?;
    let mut ids = HashSet::new();
    collect_ids(&tree, &mut ids);
    Ok(ids)
}

fn collect_ids(node: &MessageTreeNode, ids: &mut HashSet<Uuid>) {
    ids.insert(node.message.id);
    for child in &node.children {
        collect_ids(child, ids);
    }
}

fn build_node(
    id: Uuid,
    by_id: &HashMap<Uuid, &Message>,
    children_of: &HashMap<Uuid, Vec<Uuid>>,
    visited: &mut HashSet<Uuid>,
) -> Result<MessageTreeNode> {
    if !visited.insert(id) {
        return Err(ChatError::integrity(format!(
            "parent-child cycle through message {id}"
        )));
    }
    let mut children = Vec::new();
    for child_id in children_of.get(&id).into_iter().flatten() {
        children.push(build_node(*child_id, by_id, children_of, visited)?);
    }
    Ok(MessageTreeNode {
        message: by_id[&id].clone(),
        children,
    })
}
