//! Role inheritance graph backing `g(...)` matcher calls.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Inheritance chains deeper than this are not followed.
pub const MAX_HIERARCHY_DEPTH: usize = 10;

/// Directed "member of" links, optionally scoped to a domain.
///
/// Links without a domain live under the empty domain.
#[derive(Debug, Clone, Default)]
pub struct RoleGraph {
    links: HashMap<String, HashMap<String, BTreeSet<String>>>,
}

impl RoleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from grouping rules (`[member, role]` or `[member, role, domain]`).
    pub fn from_rules<'a>(rules: impl IntoIterator<Item = &'a Vec<String>>) -> Self {
        let mut graph = Self::new();
        for rule in rules {
            if let [member, role, rest @ ..] = rule.as_slice() {
                graph.add_link(member, role, rest.first().map(String::as_str));
            }
        }
        graph
    }

    pub fn add_link(&mut self, member: &str, role: &str, domain: Option<&str>) {
        self.links
            .entry(domain.unwrap_or_default().to_string())
            .or_default()
            .entry(member.to_string())
            .or_default()
            .insert(role.to_string());
    }

    /// Whether `member` inherits `role` (directly or transitively) in `domain`.
    pub fn has_link(&self, member: &str, role: &str, domain: Option<&str>) -> bool {
        if member == role {
            return true;
        }
        let Some(edges) = self.links.get(domain.unwrap_or_default()) else {
            return false;
        };

        let mut seen: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(member, 0)]);
        while let Some((current, depth)) = queue.pop_front() {
            if depth >= MAX_HIERARCHY_DEPTH || !seen.insert(current) {
                continue;
            }
            if let Some(parents) = edges.get(current) {
                for parent in parents {
                    if parent == role {
                        return true;
                    }
                    queue.push_back((parent.as_str(), depth + 1));
                }
            }
        }
        false
    }
}
