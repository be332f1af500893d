//! Segment-keyed prefix tree holding the permission rows of one storage.
//!
//! Each node stands for one path; its children are keyed by the next path
//! segment. Nodes exist only while they or a descendant hold a row, so the
//! presence of a node answers "is anything granted at or under this path".
//!
//! # Performance Characteristics
//!
//! - **Upsert / remove**: O(depth)
//! - **Ancestor-chain lookup**: O(depth) per candidate
//! - **Subtree delete / move**: O(depth + rows in subtree)
//! - **Sid presence**: O(sids) via the per-sid row counter

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::model::{
    Mask, PathRef, PathType, PermissionKey, Sid, StoredPermission, PATH_SEPARATOR,
};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Grant {
    mask: Mask,
    created: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
struct TrieNode {
    children: BTreeMap<String, TrieNode>,
    grants: BTreeMap<(PathType, Sid), Grant>,
}

impl TrieNode {
    fn is_empty(&self) -> bool {
        self.grants.is_empty() && self.children.is_empty()
    }

    fn row_count(&self) -> usize {
        self.grants.len()
            + self
                .children
                .values()
                .map(TrieNode::row_count)
                .sum::<usize>()
    }

    fn rows_here(&self, path: &str, path_type: Option<PathType>) -> Vec<StoredPermission> {
        self.grants
            .iter()
            .filter(|((t, _), _)| path_type.map_or(true, |wanted| *t == wanted))
            .map(|((t, sid), grant)| StoredPermission {
                path: path.to_string(),
                path_type: *t,
                sid: sid.clone(),
                mask: grant.mask,
                created: grant.created,
            })
            .collect()
    }

    fn collect(&self, path: &str, out: &mut Vec<StoredPermission>) {
        out.extend(self.rows_here(path, None));
        for (segment, child) in &self.children {
            child.collect(&join(path, segment), out);
        }
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split(PATH_SEPARATOR).collect()
}

fn join(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}{PATH_SEPARATOR}{segment}")
    }
}

fn descend<'a>(root: &'a TrieNode, path: &str) -> Option<&'a TrieNode> {
    let mut node = root;
    for segment in segments(path) {
        node = node.children.get(segment)?;
    }
    Some(node)
}

fn descend_or_insert<'a>(root: &'a mut TrieNode, path: &str) -> &'a mut TrieNode {
    let mut node = root;
    for segment in segments(path) {
        node = node.children.entry(segment.to_string()).or_default();
    }
    node
}

/// Removes one grant, pruning nodes left empty on the way back up.
fn remove_grant(node: &mut TrieNode, segs: &[&str], grant_key: &(PathType, Sid)) -> bool {
    let Some((first, rest)) = segs.split_first() else {
        return node.grants.remove(grant_key).is_some();
    };
    let Some(child) = node.children.get_mut(*first) else {
        return false;
    };
    let removed = remove_grant(child, rest, grant_key);
    if removed && child.is_empty() {
        node.children.remove(*first);
    }
    removed
}

/// Detaches the node at `segs`, pruning ancestors left empty.
fn detach(node: &mut TrieNode, segs: &[&str]) -> Option<TrieNode> {
    let (first, rest) = segs.split_first()?;
    if rest.is_empty() {
        return node.children.remove(*first);
    }
    let child = node.children.get_mut(*first)?;
    let detached = detach(child, rest);
    if detached.is_some() && child.is_empty() {
        node.children.remove(*first);
    }
    detached
}

/// Permission rows of a single storage.
#[derive(Debug, Default, Clone)]
pub(crate) struct PathTrie {
    root: TrieNode,
    rows: usize,
    /// Number of rows held by each sid.
    sid_rows: HashMap<Sid, usize>,
}

impl PathTrie {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.rows
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Returns true if any of `sids` holds at least one row.
    pub(crate) fn has_rows_for(&self, sids: &[Sid]) -> bool {
        sids.iter().any(|sid| self.sid_rows.contains_key(sid))
    }

    /// Inserts or overwrites a row. Returns the row it replaced.
    pub(crate) fn upsert(&mut self, entry: StoredPermission) -> Option<StoredPermission> {
        let node = descend_or_insert(&mut self.root, &entry.path);
        let previous = node.grants.insert(
            (entry.path_type, entry.sid.clone()),
            Grant {
                mask: entry.mask,
                created: entry.created,
            },
        );
        match previous {
            Some(grant) => Some(StoredPermission {
                mask: grant.mask,
                created: grant.created,
                ..entry
            }),
            None => {
                self.rows += 1;
                *self.sid_rows.entry(entry.sid).or_default() += 1;
                None
            }
        }
    }

    /// Removes the row with `key`. Returns true if it existed.
    pub(crate) fn remove(&mut self, key: &PermissionKey) -> bool {
        let removed = remove_grant(
            &mut self.root,
            &segments(&key.path),
            &(key.path_type, key.sid.clone()),
        );
        if removed {
            self.note_removed(&key.sid);
        }
        removed
    }

    fn note_removed(&mut self, sid: &Sid) {
        self.rows -= 1;
        if let Some(count) = self.sid_rows.get_mut(sid) {
            *count -= 1;
            if *count == 0 {
                self.sid_rows.remove(sid);
            }
        }
    }

    /// Rows stored at exactly `path` with the given type, for all sids.
    pub(crate) fn rows_at(&self, path: &str, path_type: PathType) -> Vec<StoredPermission> {
        descend(&self.root, path)
            .map(|node| node.rows_here(path, Some(path_type)))
            .unwrap_or_default()
    }

    /// Rows stored at any candidate for any of `sids`.
    pub(crate) fn applicable(&self, candidates: &[PathRef], sids: &[Sid]) -> Vec<StoredPermission> {
        let mut hits = Vec::new();
        for candidate in candidates {
            let Some(node) = descend(&self.root, &candidate.path) else {
                continue;
            };
            for sid in sids {
                if let Some(grant) = node.grants.get(&(candidate.path_type, sid.clone())) {
                    hits.push(StoredPermission {
                        path: candidate.path.clone(),
                        path_type: candidate.path_type,
                        sid: sid.clone(),
                        mask: grant.mask,
                        created: grant.created,
                    });
                }
            }
        }
        hits
    }

    /// True if a row exists that `root` governs (see `remove_tree`).
    pub(crate) fn is_occupied(&self, root: &PathRef) -> bool {
        match root.path_type {
            PathType::Folder => descend(&self.root, &root.path).is_some(),
            PathType::File => !self.rows_at(&root.path, PathType::File).is_empty(),
        }
    }

    /// Removes the rows `root` governs: the whole subtree for a folder, the
    /// FILE rows at the exact path for a file.
    pub(crate) fn remove_tree(&mut self, root: &PathRef) -> Vec<StoredPermission> {
        match root.path_type {
            PathType::Folder => {
                let Some(node) = detach(&mut self.root, &segments(&root.path)) else {
                    return Vec::new();
                };
                let mut removed = Vec::new();
                node.collect(&root.path, &mut removed);
                for row in &removed {
                    self.note_removed(&row.sid);
                }
                removed
            }
            PathType::File => {
                let removed = self.rows_at(&root.path, PathType::File);
                for row in &removed {
                    self.remove(&row.key());
                }
                removed
            }
        }
    }

    /// Relocates the rows `source` governs to `destination`.
    ///
    /// The caller guarantees the destination is unoccupied.
    pub(crate) fn move_tree(&mut self, source: &PathRef, destination: &PathRef) -> usize {
        match source.path_type {
            PathType::Folder => {
                let Some(node) = detach(&mut self.root, &segments(&source.path)) else {
                    return 0;
                };
                let moved = node.row_count();
                *descend_or_insert(&mut self.root, &destination.path) = node;
                moved
            }
            PathType::File => {
                let rows = self.remove_tree(source);
                let moved = rows.len();
                for row in rows {
                    self.upsert(StoredPermission {
                        path: destination.path.clone(),
                        ..row
                    });
                }
                moved
            }
        }
    }

    /// Every row, ordered by path then type then sid.
    pub(crate) fn entries(&self) -> Vec<StoredPermission> {
        let mut out = Vec::with_capacity(self.rows);
        for (segment, child) in &self.root.children {
            child.collect(segment, &mut out);
        }
        out
    }
}
