//! Reconstructs a nested reply forest from the flat, arbitrarily-ordered
//! comment rows of a single story. Stateless: invoked fresh on every read,
//! performs no I/O, and may run on a stale snapshot.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use heron_types::api::CommentNode;
use heron_types::models::Comment;
use uuid::Uuid;

/// Transform the flat comment set of one story into its nested reply forest.
///
/// Attachment policy: a comment hangs under its parent only when the parent
/// id resolves to another comment in the same input set. Anything else (no
/// parent, or a parent outside the set, e.g. deleted) makes it a root —
/// orphans are demoted, never dropped. Children lists and the root list are
/// sorted by creation time ascending, ties broken by id.
///
/// Construction uses an explicit stack; reply depth is unbounded and must
/// not risk stack exhaustion. Comments trapped in a parent cycle (corrupt
/// data; parents normally precede their children) are appended as extra
/// roots so no content silently disappears.
pub fn build_forest(comments: Vec<Comment>) -> Vec<CommentNode> {
    if comments.is_empty() {
        return Vec::new();
    }

    let mut by_id: HashMap<Uuid, Comment> = HashMap::with_capacity(comments.len());
    for c in comments {
        by_id.insert(c.id, c);
    }

    // Sort keys survive node construction, which consumes `by_id` entries.
    let keys: HashMap<Uuid, DateTime<Utc>> =
        by_id.values().map(|c| (c.id, c.created_at)).collect();
    let sort_ids = |ids: &mut Vec<Uuid>| {
        ids.sort_by_key(|id| (keys.get(id).copied(), *id));
    };

    let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    let mut roots: Vec<Uuid> = Vec::new();
    for c in by_id.values() {
        match c.parent_id {
            Some(pid) if pid != c.id && by_id.contains_key(&pid) => {
                children.entry(pid).or_default().push(c.id);
            }
            _ => roots.push(c.id),
        }
    }

    sort_ids(&mut roots);
    for ids in children.values_mut() {
        sort_ids(ids);
    }

    let mut built: HashMap<Uuid, CommentNode> = HashMap::with_capacity(by_id.len());
    let mut visited: HashSet<Uuid> = HashSet::with_capacity(by_id.len());
    let mut forest: Vec<CommentNode> = Vec::with_capacity(roots.len());

    let mut seeds = roots;
    loop {
        for &seed in &seeds {
            drain_subtree(seed, &by_id, &mut children, &mut built, &mut visited);
        }
        forest.extend(seeds.iter().filter_map(|id| built.remove(id)));

        // Anything still unvisited sits in a parent cycle; surface it as
        // additional roots instead of losing it.
        let mut leftovers: Vec<Uuid> = by_id
            .keys()
            .filter(|id| !visited.contains(id))
            .copied()
            .collect();
        if leftovers.is_empty() {
            break;
        }
        sort_ids(&mut leftovers);
        seeds = leftovers;
    }

    forest
}

/// Iterative post-order build of one subtree: each node is constructed
/// after all of its (already sorted) children.
fn drain_subtree(
    seed: Uuid,
    by_id: &HashMap<Uuid, Comment>,
    children: &mut HashMap<Uuid, Vec<Uuid>>,
    built: &mut HashMap<Uuid, CommentNode>,
    visited: &mut HashSet<Uuid>,
) {
    if visited.contains(&seed) {
        return;
    }

    let mut stack: Vec<(Uuid, bool)> = vec![(seed, false)];
    while let Some((id, children_done)) = stack.pop() {
        if children_done {
            let replies: Vec<CommentNode> = children
                .remove(&id)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|cid| built.remove(&cid))
                .collect();
            if let Some(c) = by_id.get(&id) {
                built.insert(
                    id,
                    CommentNode {
                        id: c.id,
                        author_id: c.author_id,
                        content: c.content.clone(),
                        created_at: c.created_at,
                        replies,
                    },
                );
            }
        } else {
            visited.insert(id);
            stack.push((id, true));
            if let Some(kids) = children.get(&id) {
                for &k in kids.iter().rev() {
                    if !visited.contains(&k) {
                        stack.push((k, false));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn comment(id: u128, parent: Option<u128>, t: i64) -> Comment {
        Comment {
            id: uid(id),
            story_id: uid(1000),
            author_id: uid(2000 + id),
            content: format!("comment {}", id),
            parent_id: parent.map(uid),
            created_at: ts(t),
        }
    }

    fn ids(nodes: &[CommentNode]) -> Vec<Uuid> {
        nodes.iter().map(|n| n.id).collect()
    }

    #[test]
    fn empty_input_yields_empty_forest() {
        assert!(build_forest(Vec::new()).is_empty());
    }

    #[test]
    fn orphans_demote_to_root_and_children_sort_by_time() {
        // Comment 99 is absent: 5 is orphaned and must surface as a root.
        let comments = vec![
            comment(1, None, 1),
            comment(2, Some(1), 3),
            comment(3, Some(1), 2),
            comment(4, Some(2), 4),
            comment(5, Some(99), 5),
        ];

        let forest = build_forest(comments);
        assert_eq!(ids(&forest), vec![uid(1), uid(5)]);

        let one = &forest[0];
        assert_eq!(ids(&one.replies), vec![uid(3), uid(2)]);
        assert_eq!(ids(&one.replies[1].replies), vec![uid(4)]);
        assert!(one.replies[0].replies.is_empty());
        assert!(forest[1].replies.is_empty());
    }

    #[test]
    fn input_order_is_irrelevant() {
        let mut comments = vec![
            comment(1, None, 1),
            comment(2, Some(1), 3),
            comment(3, Some(1), 2),
            comment(4, Some(2), 4),
            comment(5, Some(99), 5),
        ];
        comments.reverse();

        let forest = build_forest(comments);
        assert_eq!(ids(&forest), vec![uid(1), uid(5)]);
        assert_eq!(ids(&forest[0].replies), vec![uid(3), uid(2)]);
    }

    #[test]
    fn timestamp_ties_break_by_id() {
        let comments = vec![
            comment(3, None, 7),
            comment(1, None, 7),
            comment(2, None, 7),
        ];
        let forest = build_forest(comments);
        assert_eq!(ids(&forest), vec![uid(1), uid(2), uid(3)]);
    }

    #[test]
    fn deep_thread_does_not_overflow_the_stack() {
        // 50k-deep chain; a recursive build would blow the call stack.
        let mut comments = vec![comment(1, None, 0)];
        for n in 2..=50_000u128 {
            comments.push(comment(n, Some(n - 1), n as i64));
        }

        let forest = build_forest(comments);
        assert_eq!(forest.len(), 1);

        let mut depth = 0u32;
        let mut node = &forest[0];
        while let Some(next) = node.replies.first() {
            depth += 1;
            node = next;
        }
        assert_eq!(depth, 49_999);
    }

    #[test]
    fn parent_cycle_loses_no_comments() {
        // a <-> b cycle with a dangling reply; all three must survive.
        let comments = vec![
            comment(10, Some(11), 1),
            comment(11, Some(10), 2),
            comment(12, Some(11), 3),
            comment(1, None, 0),
        ];

        let forest = build_forest(comments);
        let mut total = 0;
        let mut stack: Vec<&CommentNode> = forest.iter().collect();
        while let Some(n) = stack.pop() {
            total += 1;
            stack.extend(n.replies.iter());
        }
        assert_eq!(total, 4);
    }

    #[test]
    fn self_parent_is_treated_as_root() {
        let comments = vec![comment(7, Some(7), 1)];
        let forest = build_forest(comments);
        assert_eq!(ids(&forest), vec![uid(7)]);
        assert!(forest[0].replies.is_empty());
    }
}
