//! Group tree traversal and rollups. One post-order pass computes a node's
//! surface area and object count; totals are memoized per group for the
//! lifetime of a request so pruned and full views share the work.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use super::model::{Group, GroupSite};

/// The active groups of one owner, indexed by id and parent.
#[derive(Debug, Clone, Default)]
pub struct GroupTree {
    groups: HashMap<i64, Group>,
    children: HashMap<i64, Vec<i64>>,
}

impl GroupTree {
    pub fn new(groups: Vec<Group>) -> Self {
        let groups: HashMap<i64, Group> = groups.into_iter().map(|g| (g.id, g)).collect();
        let mut children: HashMap<i64, Vec<i64>> = HashMap::new();
        for group in groups.values() {
            if let Some(parent) = group.parent_id.filter(|p| groups.contains_key(p)) {
                children.entry(parent).or_default().push(group.id);
            }
        }
        for ids in children.values_mut() {
            ids.sort_unstable();
        }
        Self { groups, children }
    }

    pub fn get(&self, id: i64) -> Option<&Group> {
        self.groups.get(&id)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.groups.contains_key(&id)
    }

    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    pub fn children(&self, id: i64) -> &[i64] {
        self.children.get(&id).map_or(&[], Vec::as_slice)
    }

    /// Parent chain from the direct parent up to the root.
    pub fn ancestors(&self, id: i64) -> Vec<i64> {
        let mut chain = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut current = self.groups.get(&id).and_then(|g| g.parent_id);
        while let Some(parent) = current {
            if !self.groups.contains_key(&parent) || !seen.insert(parent) {
                break;
            }
            chain.push(parent);
            current = self.groups.get(&parent).and_then(|g| g.parent_id);
        }
        chain
    }

    pub fn root_of(&self, id: i64) -> i64 {
        self.ancestors(id).last().copied().unwrap_or(id)
    }

    /// `id` and every group below it, parents before children.
    pub fn descendants(&self, id: i64) -> Vec<i64> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// Whether re-parenting `id` under `new_parent` would close a loop.
    pub fn would_cycle(&self, id: i64, new_parent: i64) -> bool {
        new_parent == id || self.ancestors(new_parent).contains(&id)
    }

    /// The given groups plus all of their ancestors, deduplicated and sorted.
    pub fn with_ancestors(&self, ids: impl IntoIterator<Item = i64>) -> Vec<i64> {
        let mut all = HashSet::new();
        for id in ids {
            if !self.contains(id) {
                continue;
            }
            all.insert(id);
            all.extend(self.ancestors(id));
        }
        let mut out: Vec<i64> = all.into_iter().collect();
        out.sort_unstable();
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteRollup {
    pub site_id: i64,
    pub area_sq_km: f64,
    pub object_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HierarchyNode {
    pub group: Group,
    /// Sum of assignment area snapshots over this group and its subtree.
    pub surface_area_sq_km: f64,
    /// Catalog captures intersecting each member site, summed over the subtree.
    pub total_objects: i64,
    pub sites: Vec<SiteRollup>,
    pub children: Vec<HierarchyNode>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Totals {
    area: f64,
    objects: i64,
}

/// Builds annotated subtrees from a [`GroupTree`], the active assignments
/// and per-site object counts.
pub struct RollupBuilder<'a> {
    tree: &'a GroupTree,
    members: HashMap<i64, Vec<&'a GroupSite>>,
    object_counts: &'a HashMap<i64, i64>,
    memo: HashMap<i64, Totals>,
}

impl<'a> RollupBuilder<'a> {
    pub fn new(tree: &'a GroupTree, assignments: &'a [GroupSite], object_counts: &'a HashMap<i64, i64>) -> Self {
        let mut members: HashMap<i64, Vec<&GroupSite>> = HashMap::new();
        for assignment in assignments {
            members.entry(assignment.group_id).or_default().push(assignment);
        }
        Self {
            tree,
            members,
            object_counts,
            memo: HashMap::new(),
        }
    }

    fn own_sites(&self, id: i64) -> Vec<SiteRollup> {
        let mut sites: Vec<SiteRollup> = self
            .members
            .get(&id)
            .map(|assignments| {
                assignments
                    .iter()
                    .map(|a| SiteRollup {
                        site_id: a.site_id,
                        area_sq_km: a.area_sq_km_snapshot,
                        object_count: self.object_counts.get(&a.site_id).copied().unwrap_or(0),
                    })
                    .collect()
            })
            .unwrap_or_default();
        sites.sort_by_key(|site| site.site_id);
        sites
    }

    /// Post-order totals for the full subtree under `id`.
    fn totals(&mut self, id: i64) -> Totals {
        if let Some(done) = self.memo.get(&id) {
            return *done;
        }
        // Mark before descending so a corrupt parent loop terminates.
        self.memo.insert(id, Totals::default());
        let mut totals = self.own_sites(id).iter().fold(Totals::default(), |acc, site| Totals {
            area: acc.area + site.area_sq_km,
            objects: acc.objects + site.object_count,
        });
        for child in self.tree.children(id).to_vec() {
            let sub = self.totals(child);
            totals.area += sub.area;
            totals.objects += sub.objects;
        }
        totals.area = crate::geometry::round_to(totals.area, 2);
        self.memo.insert(id, totals);
        totals
    }

    /// The subtree under `id`; with `keep`, children outside the set are pruned.
    pub fn node(&mut self, id: i64, keep: Option<&HashSet<i64>>) -> Option<HierarchyNode> {
        let group = self.tree.get(id)?.clone();
        let totals = self.totals(id);
        let mut visited = HashSet::from([id]);
        let children = self.child_nodes(id, keep, &mut visited);
        Some(HierarchyNode {
            group,
            surface_area_sq_km: totals.area,
            total_objects: totals.objects,
            sites: self.own_sites(id),
            children,
        })
    }

    fn child_nodes(&mut self, id: i64, keep: Option<&HashSet<i64>>, visited: &mut HashSet<i64>) -> Vec<HierarchyNode> {
        let mut nodes = Vec::new();
        for child in self.tree.children(id).to_vec() {
            if keep.is_some_and(|keep| !keep.contains(&child)) || !visited.insert(child) {
                continue;
            }
            let Some(group) = self.tree.get(child).cloned() else {
                continue;
            };
            let totals = self.totals(child);
            let children = self.child_nodes(child, keep, visited);
            nodes.push(HierarchyNode {
                group,
                surface_area_sq_km: totals.area,
                total_objects: totals.objects,
                sites: self.own_sites(child),
                children,
            });
        }
        nodes
    }
}

/// Groups whose name contains `needle` (case-insensitive), grouped by root:
/// each root maps to the set of nodes to keep, which is every match plus
/// the ancestors linking it to the root.
pub fn prune_to_matches(tree: &GroupTree, needle: &str) -> BTreeMap<i64, HashSet<i64>> {
    let needle = needle.trim().to_lowercase();
    let mut by_root: BTreeMap<i64, HashSet<i64>> = BTreeMap::new();
    if needle.is_empty() {
        return by_root;
    }
    for group in tree.groups() {
        if !group.name.to_lowercase().contains(&needle) {
            continue;
        }
        let keep = by_root.entry(tree.root_of(group.id)).or_default();
        keep.insert(group.id);
        keep.extend(tree.ancestors(group.id));
    }
    by_root
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn group(id: i64, name: &str, parent: Option<i64>) -> Group {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Group {
            id,
            owner: "u1".into(),
            name: name.into(),
            parent_id: parent,
            description: None,
            notification: false,
            new_updates_count: 0,
            created_at: at,
            updated_at: at,
        }
    }

    fn assignment(id: i64, group_id: i64, site_id: i64, area: f64) -> GroupSite {
        GroupSite {
            id,
            group_id,
            site_id,
            area_sq_km_snapshot: area,
            assigned_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    /// A(1) -> B(2) -> C(3), A(1) -> D(4)
    fn tree() -> GroupTree {
        GroupTree::new(vec![
            group(1, "A", None),
            group(2, "B", Some(1)),
            group(3, "C", Some(2)),
            group(4, "D", Some(1)),
        ])
    }

    #[test]
    fn ancestry_and_cycles() {
        let tree = tree();
        assert_eq!(tree.ancestors(3), vec![2, 1]);
        assert_eq!(tree.root_of(3), 1);
        assert_eq!(tree.descendants(1), vec![1, 2, 3, 4]);
        assert!(tree.would_cycle(1, 3));
        assert!(tree.would_cycle(2, 2));
        assert!(!tree.would_cycle(4, 2));
        assert_eq!(tree.with_ancestors([3, 4]), vec![1, 2, 3, 4]);
    }

    #[test]
    fn corrupt_parent_loop_terminates() {
        let tree = GroupTree::new(vec![group(1, "x", Some(2)), group(2, "y", Some(1))]);
        assert_eq!(tree.ancestors(1), vec![2]);
        assert_eq!(tree.descendants(1).len(), 2);
    }

    #[test]
    fn rollup_sums_subtree() {
        let tree = tree();
        let assignments = vec![
            assignment(1, 1, 10, 1.5),
            assignment(2, 3, 11, 2.25),
            assignment(3, 4, 12, 4.0),
        ];
        let counts = HashMap::from([(10, 1), (11, 5), (12, 2)]);
        let mut builder = RollupBuilder::new(&tree, &assignments, &counts);

        let root = builder.node(1, None).unwrap();
        assert_eq!(root.surface_area_sq_km, 7.75);
        assert_eq!(root.total_objects, 8);
        assert_eq!(root.children.len(), 2);
        let b = &root.children[0];
        assert_eq!(b.group.name, "B");
        assert_eq!(b.surface_area_sq_km, 2.25);
        assert_eq!(b.total_objects, 5);
    }

    #[test]
    fn search_prunes_to_matching_branch() {
        let tree = tree();
        let matches = prune_to_matches(&tree, "c");
        assert_eq!(matches.len(), 1);
        let keep = &matches[&1];

        let counts = HashMap::new();
        let mut builder = RollupBuilder::new(&tree, &[], &counts);
        let root = builder.node(1, Some(keep)).unwrap();
        assert_eq!(root.group.name, "A");
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].group.name, "B");
        assert_eq!(root.children[0].children[0].group.name, "C");
        assert!(root.children[0].children[0].children.is_empty());
    }
}
